use thiserror::Error;

/// Error taxonomy shared by the transport layer and every exchange adapter
/// built on top of it.
///
/// Every fatal variant is expected to trigger cleanup of the owning
/// handler (cancel registered tasks, close the socket, close an owned
/// session) before it escapes to the caller.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("invalid order book patch: {0}")]
    InvalidPatch(String),

    #[error("order book version error: expected {expected}, got {got}")]
    Version { expected: u64, got: u64 },

    #[error("order book sequence number error: expected {expected}, got {got}")]
    SeqNum { expected: u64, got: u64 },

    #[error("order book checksum mismatch: expected {expected}, computed {computed}")]
    Checksum { expected: u32, computed: u32 },

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("timed out waiting for a registered task")]
    Timeout,

    #[error("registered task '{0}' failed: {1}")]
    Execution(String, String),

    #[error("duplicate registration: {0}")]
    Duplicate(String),
}

impl From<reqwest::Error> for DataError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            DataError::Transport(format!("request timed out: {error}"))
        } else {
            DataError::Transport(error.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        DataError::Transport(error.to_string())
    }
}

impl From<url::ParseError> for DataError {
    fn from(error: url::ParseError) -> Self {
        DataError::InvalidUrl(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCase {
        error: DataError,
        is_fatal: bool,
    }

    fn is_fatal(error: &DataError) -> bool {
        !matches!(error, DataError::Timeout | DataError::Execution(..))
    }

    #[test]
    fn test_data_error_is_fatal() {
        let cases = vec![
            TestCase {
                error: DataError::Transport("closed".into()),
                is_fatal: true,
            },
            TestCase {
                error: DataError::Timeout,
                is_fatal: false,
            },
            TestCase {
                error: DataError::Execution("keepalive".into(), "panic".into()),
                is_fatal: false,
            },
            TestCase {
                error: DataError::Checksum {
                    expected: 1,
                    computed: 2,
                },
                is_fatal: true,
            },
        ];

        for (i, case) in cases.into_iter().enumerate() {
            assert_eq!(
                is_fatal(&case.error),
                case.is_fatal,
                "TC{i} failed: {:?}",
                case.error
            );
        }
    }
}
