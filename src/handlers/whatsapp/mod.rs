pub mod data;
pub mod exchange;
pub mod response_mode;
pub mod stream;

use serde_json::Value;

use crate::error::ApiError;

// Re-export handler functions for use in routing
pub use data::get as data_get;
pub use data::missing_phone_number;
pub use exchange::post as record_exchange;
pub use response_mode::get_mode as get_response_mode;
pub use response_mode::update_mode as update_response_mode;
pub use stream::get as stream_get;

/// Required text field: non-empty strings pass through, numbers are stringified.
/// Anything else (missing, null, "", objects) counts as absent.
pub(crate) fn required_text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Path parameter guard for the business phone number
pub(crate) fn require_phone_number(raw: &str) -> Result<&str, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("Business phone number is required."));
    }
    Ok(trimmed)
}
