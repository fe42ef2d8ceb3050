use crate::error::{NotifyError, Result};
use serde_json::Value;

/// Email delivery is reserved. The channel type exists so stored configs
/// round-trip, but sending always reports not-implemented.
pub async fn send(_client: &reqwest::Client, _config: &Value, _message: &str) -> Result<()> {
    Err(NotifyError::NotImplemented)
}
