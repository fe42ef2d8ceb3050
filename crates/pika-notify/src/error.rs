/// Remote error text carried in a [`NotifyError::Api`] is truncated to this
/// many bytes before it reaches logs or the test endpoint.
pub const MAX_REMOTE_ERROR_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or malformed.
    #[error("notify: invalid {channel} configuration: {reason}")]
    InvalidConfig {
        channel: &'static str,
        reason: String,
    },

    /// The channel exists in the property blob but is disabled.
    #[error("notify: channel {0} is disabled")]
    Disabled(&'static str),

    /// The requested channel type has no stored configuration.
    #[error("notify: channel {0} is not configured")]
    NotConfigured(String),

    /// An HTTP request to the endpoint failed (connect, timeout, TLS).
    #[error("notify: request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered, but with a failure status or error body.
    #[error("notify: {channel} endpoint rejected the message: {detail}")]
    Api {
        channel: &'static str,
        detail: String,
    },

    /// The email channel is reserved and not yet implemented.
    #[error("notify: email delivery is not implemented")]
    NotImplemented,
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// Truncates remote error text on a char boundary at or below
/// [`MAX_REMOTE_ERROR_LEN`] bytes.
pub fn truncate_remote_error(s: &str) -> String {
    if s.len() <= MAX_REMOTE_ERROR_LEN {
        return s.to_string();
    }
    let mut end = MAX_REMOTE_ERROR_LEN;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_remote_errors() {
        let long = "x".repeat(2000);
        let out = truncate_remote_error(&long);
        assert!(out.starts_with(&"x".repeat(MAX_REMOTE_ERROR_LEN)));
        assert!(out.ends_with("[truncated]"));

        assert_eq!(truncate_remote_error("short"), "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(600); // 2 bytes per char, boundary falls mid-char
        let out = truncate_remote_error(&s);
        assert!(out.len() <= MAX_REMOTE_ERROR_LEN + "... [truncated]".len());
    }
}
