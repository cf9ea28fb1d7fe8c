use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
        transient: bool,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("label '{0}' does not exist in the mailbox")]
    LabelNotFound(String),

    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
            transient: true,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Api { transient: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_api_errors_are_retryable() {
        assert!(Error::transient("get_message", "503").is_transient());
        assert!(!Error::api("get_message", "404").is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::LabelNotFound("passed".into()).is_transient());
    }

    #[test]
    fn test_api_error_display_names_operation() {
        let err = Error::api("send_message", "quota exceeded");
        assert_eq!(err.to_string(), "send_message failed: quota exceeded");
    }
}
