//! Strict parsing of provider webhook payloads.
//!
//! Raw JSON is turned into a tagged [`Event`] before anything touches the
//! ledger. Known kinds are validated field by field; unknown kinds are kept
//! verbatim as [`Event::Unknown`] so they can be acknowledged without being
//! applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::{
    app_error::{AppError, AppResult},
    application::validators::{is_valid_email, is_valid_external_id, normalize_currency},
    domain::entities::{
        payment::amount_to_cents,
        subscription::{BillingPeriod, SubscriptionStatus},
        user::UserDetails,
        webhook_event::EventKind,
    },
};

const MAX_DISPLAY_ATTR_LEN: usize = 255;

/// Keys the provider has used for the event name, in lookup order.
const EVENT_NAME_KEYS: [&str; 5] = ["event", "event_name", "event_type", "type", "name"];

/// Customer attributes that legacy bodies carry flat instead of under `customer`.
const FLAT_CUSTOMER_KEYS: [&str; 5] =
    ["telegram_user_id", "email", "username", "first_name", "last_name"];

const TEST_MARKER_KEYS: [&str; 3] = ["test", "ping", "test_event"];

/// Event name given to provider connectivity checks.
pub const TEST_EVENT_NAME: &str = "test";

// ============================================================================
// Parsed Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWebhook {
    pub name: String,
    pub idempotency_key: String,
    pub sent_at: Option<DateTime<Utc>>,
    /// Ordering timestamp: the provider's `sent_at`, or our receipt time.
    pub event_time: DateTime<Utc>,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Subscription(SubscriptionEvent),
    Payment(PaymentEvent),
    Unknown { name: String, raw: JsonValue },
}

impl Event {
    pub fn subscription_external_id(&self) -> Option<&str> {
        match self {
            Event::Subscription(e) => Some(e.subscription_id.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub external_id: String,
    pub details: UserDetails,
}

/// Distinguishes an omitted `expires_at` from an explicit `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Absent,
    Null,
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Amount {
    pub cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    pub kind: EventKind,
    pub customer: Customer,
    pub subscription_id: String,
    pub product_id: Option<String>,
    pub period: Option<BillingPeriod>,
    pub status: Option<SubscriptionStatus>,
    pub expires_at: Expiry,
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentEvent {
    pub customer: Customer,
    pub product_id: Option<String>,
    pub amount: Amount,
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Str(String),
    Int(i64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            IdValue::Str(s) => s.trim().to_string(),
            IdValue::Int(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    event_id: Option<IdValue>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawCustomer {
    #[serde(alias = "external_id")]
    telegram_user_id: Option<IdValue>,
    email: Option<String>,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    customer: Option<RawCustomer>,
    subscription_id: Option<IdValue>,
    product_id: Option<IdValue>,
    period: Option<String>,
    status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_present")]
    expires_at: Option<Option<DateTime<Utc>>>,
    amount: Option<f64>,
    currency: Option<String>,
}

/// `None` when the key is absent, `Some(None)` when it is `null`.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Parsing
// ============================================================================

/// Hex SHA-256 of the raw request body, used as the idempotency key when the
/// provider does not send an event id.
pub fn body_sha256(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Event name of the payload. Connectivity checks without a name are
/// reported as [`TEST_EVENT_NAME`].
pub fn peek_event_name(payload: &JsonValue) -> Option<String> {
    EVENT_NAME_KEYS
        .iter()
        .filter_map(|key| payload.get(key).and_then(JsonValue::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| is_test_ping(payload).then(|| TEST_EVENT_NAME.to_string()))
}

/// An empty object, or one carrying a truthy test marker.
fn is_test_ping(payload: &JsonValue) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };
    object.is_empty()
        || TEST_MARKER_KEYS.iter().any(|key| {
            object
                .get(*key)
                .is_some_and(|v| !matches!(v, JsonValue::Null | JsonValue::Bool(false)))
        })
}

/// Best-effort extraction of the provider's dispatch timestamp.
pub fn peek_sent_at(payload: &JsonValue) -> Option<DateTime<Utc>> {
    payload
        .get("sent_at")
        .and_then(JsonValue::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Best-effort idempotency key for labelling the stored record. Agrees with
/// [`parse_webhook`] whenever the payload is valid.
pub fn peek_idempotency_key(payload: Option<&JsonValue>, raw: &str) -> String {
    let event_id = payload.and_then(|p| p.get("event_id")).and_then(|id| match id {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => n.as_i64().map(|n| n.to_string()),
        _ => None,
    });
    match event_id {
        Some(id) if is_valid_external_id(&id) => id,
        _ => body_sha256(raw),
    }
}

pub fn parse_webhook(
    payload: &JsonValue,
    raw: &str,
    received_at: DateTime<Utc>,
) -> AppResult<ParsedWebhook> {
    let envelope: RawEnvelope = serde_json::from_value(payload.clone())
        .map_err(|e| AppError::ValidationError(format!("invalid webhook envelope: {}", e)))?;

    let name = peek_event_name(payload)
        .ok_or_else(|| AppError::ValidationError("missing event name".into()))?;

    let idempotency_key = match envelope.event_id.map(IdValue::into_string) {
        Some(id) if is_valid_external_id(&id) => id,
        Some(_) => return Err(AppError::ValidationError("invalid event_id".into())),
        None => body_sha256(raw),
    };

    let event = match EventKind::from_name(&name) {
        None => Event::Unknown {
            name: name.clone(),
            raw: payload.clone(),
        },
        Some(kind) => {
            let data = envelope.data.unwrap_or_else(|| flat_data(payload));
            let data: RawData = serde_json::from_value(data)
                .map_err(|e| AppError::ValidationError(format!("invalid data object: {}", e)))?;
            parse_known(kind, data)?
        }
    };

    Ok(ParsedWebhook {
        name,
        idempotency_key,
        sent_at: envelope.sent_at,
        event_time: envelope.sent_at.unwrap_or(received_at),
        event,
    })
}

fn parse_known(kind: EventKind, data: RawData) -> AppResult<Event> {
    let customer = parse_customer(data.customer)?;
    let product_id = data.product_id.map(IdValue::into_string);
    let amount = parse_amount(data.amount, data.currency)?;

    if kind == EventKind::Payment {
        let amount =
            amount.ok_or_else(|| AppError::ValidationError("payment event without amount".into()))?;
        return Ok(Event::Payment(PaymentEvent {
            customer,
            product_id,
            amount,
        }));
    }

    let subscription_id = data
        .subscription_id
        .map(IdValue::into_string)
        .unwrap_or_else(|| implicit_subscription_id(&customer.external_id, product_id.as_deref()));
    if !is_valid_external_id(&subscription_id) {
        return Err(AppError::ValidationError("invalid subscription_id".into()));
    }

    let period = data
        .period
        .map(|p| p.parse::<BillingPeriod>())
        .transpose()
        .map_err(AppError::ValidationError)?;
    if period.is_none()
        && matches!(
            kind,
            EventKind::SubscriptionCreated | EventKind::SubscriptionRenewed
        )
    {
        return Err(AppError::ValidationError(format!(
            "{} requires a period",
            kind
        )));
    }

    let status = data
        .status
        .map(|s| s.parse::<SubscriptionStatus>())
        .transpose()
        .map_err(AppError::ValidationError)?;

    let expires_at = match data.expires_at {
        None => Expiry::Absent,
        Some(None) => Expiry::Null,
        Some(Some(at)) => Expiry::At(at),
    };

    Ok(Event::Subscription(SubscriptionEvent {
        kind,
        customer,
        subscription_id,
        product_id,
        period,
        status,
        expires_at,
        amount,
    }))
}

/// Field object for bodies without `data`: the nested `payload` object when
/// present, else the envelope itself. Flat customer attributes are gathered
/// into a `customer` object.
fn flat_data(payload: &JsonValue) -> JsonValue {
    let mut source = payload
        .get("payload")
        .filter(|p| p.is_object())
        .unwrap_or(payload)
        .clone();

    if let Some(object) = source.as_object_mut() {
        if !object.contains_key("customer") {
            let mut customer = serde_json::Map::new();
            for key in FLAT_CUSTOMER_KEYS {
                if let Some(value) = object.get(key).or_else(|| payload.get(key)) {
                    customer.insert(key.to_string(), value.clone());
                }
            }
            if !customer.is_empty() {
                object.insert("customer".to_string(), JsonValue::Object(customer));
            }
        }
    }
    source
}

/// Identity used when the provider omits `subscription_id`: one subscription
/// per customer and product.
fn implicit_subscription_id(customer_id: &str, product_id: Option<&str>) -> String {
    format!("{}:{}", customer_id, product_id.unwrap_or("default"))
}

fn parse_customer(raw: Option<RawCustomer>) -> AppResult<Customer> {
    let raw = raw.ok_or_else(|| AppError::ValidationError("missing customer".into()))?;

    let external_id = raw
        .telegram_user_id
        .map(IdValue::into_string)
        .ok_or_else(|| AppError::ValidationError("missing customer identifier".into()))?;
    if !is_valid_external_id(&external_id) {
        return Err(AppError::ValidationError(
            "invalid customer identifier".into(),
        ));
    }

    let email = clean_attr(raw.email);
    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(AppError::ValidationError("invalid customer email".into()));
        }
    }

    Ok(Customer {
        external_id,
        details: UserDetails {
            username: clean_attr(raw.username),
            first_name: clean_attr(raw.first_name),
            last_name: clean_attr(raw.last_name),
            email,
        },
    })
}

fn clean_attr(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().chars().take(MAX_DISPLAY_ATTR_LEN).collect::<String>())
        .filter(|v| !v.is_empty())
}

fn parse_amount(amount: Option<f64>, currency: Option<String>) -> AppResult<Option<Amount>> {
    let Some(amount) = amount else {
        return Ok(None);
    };
    let cents = amount_to_cents(amount)
        .ok_or_else(|| AppError::ValidationError("amount must be a non-negative number".into()))?;
    let currency = currency
        .map(|c| {
            normalize_currency(&c)
                .ok_or_else(|| AppError::ValidationError(format!("invalid currency: {}", c)))
        })
        .transpose()?;
    Ok(Some(Amount { cents, currency }))
}
