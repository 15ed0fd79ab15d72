pub mod app_error;
pub mod ports;
pub mod reconciler;
pub mod use_cases;
pub mod validators;
pub mod webhook_payload;
