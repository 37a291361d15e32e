use thiserror::Error;

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage service rejected request ({status}): {message}")]
    Storage { status: u16, message: String },

    #[error("Generation request failed: {0}")]
    GenerationFailed(String),

    #[error("All generation models failed: {0}")]
    ModelsExhausted(String),

    #[error("Generation model rejected the input")]
    GenerationRejected,

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("Generation request timed out")]
    GenerationTimeout,

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Image search failed: {0}")]
    ImageSearch(String),

    #[error("Schema check failed: table '{table}' is missing column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkerError {
    /// Whether the retry gate should treat this failure as a transient
    /// network condition. Anything else propagates on the first attempt.
    pub fn is_network_transient(&self) -> bool {
        match self {
            WorkerError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            WorkerError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // Gateway-class storage failures clear up on their own; 4xx never do.
            WorkerError::Storage { status, .. } => matches!(status, 502 | 503 | 504),
            WorkerError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_gateway_errors_are_transient() {
        let e = WorkerError::Storage {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(e.is_network_transient());

        let e = WorkerError::Storage {
            status: 404,
            message: "missing".into(),
        };
        assert!(!e.is_network_transient());
    }

    #[test]
    fn generation_errors_are_not_transient() {
        assert!(!WorkerError::GenerationTimeout.is_network_transient());
        assert!(!WorkerError::GenerationRejected.is_network_transient());
        assert!(!WorkerError::ModelsExhausted("quota".into()).is_network_transient());
    }

    #[test]
    fn io_connection_reset_is_transient() {
        let e = WorkerError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(e.is_network_transient());
    }
}
