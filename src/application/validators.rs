use validator::ValidateEmail;

pub const MAX_EXTERNAL_ID_LEN: usize = 128;

/// Validates that the input looks like a valid email address
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.validate_email()
}

/// Validates a provider-assigned identifier (customer, subscription, event).
/// Rules:
/// - 1-128 characters
/// - No whitespace or control characters
pub fn is_valid_external_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_EXTERNAL_ID_LEN {
        return false;
    }
    !id.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Normalizes an ISO-4217 currency code to upper case, rejecting anything
/// that is not exactly three ASCII letters.
pub fn normalize_currency(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}
