//! Error handling for the interlink node
//!
//! Two layers of errors live here. [`ValidationError`] is the typed,
//! recoverable result of checking a block or transaction; callers log and
//! drop the offending item. [`Error`] covers everything else the node can
//! run into (I/O, storage, networking, configuration) and wraps validation
//! failures when they need to travel further up.

use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Rejection reasons for blocks and transactions
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationError {
    /// Block is identical to the current head
    #[error("known block")]
    KnownBlock,

    /// Block number does not follow the parent
    #[error("wrong block number")]
    WrongBlockNumber,

    /// Parent hash does not match the hash of the current head
    #[error("wrong parent hash")]
    WrongParentHash,

    /// Proof of work not satisfied
    #[error("too high hash")]
    TooHighHash,

    /// Interlink vector differs from the one derived from the parent
    #[error("wrong interlink")]
    WrongInterlink,

    /// Transaction digest does not match the header's tx root
    #[error("wrong transaction root")]
    WrongTxRoot,

    /// A participant signature is missing or does not verify
    #[error("invalid sender")]
    InvalidSender,

    /// A participant nonce does not continue the previous one
    #[error("incorrect nonce")]
    IncorrectNonce,

    /// Post balances do not add up to pre balances
    #[error("incorrect balance")]
    IncorrectBalance,

    /// A participant's previous transaction hash is stale
    #[error("incorrect previous state")]
    IncorrectPrevState,

    /// Field lengths disagree or the participant list is empty or repeated
    #[error("malformed transaction")]
    MalformedTransaction,
}

impl ValidationError {
    /// Whether the error concerns a block header rather than a transaction
    pub fn is_block_error(&self) -> bool {
        matches!(
            self,
            ValidationError::KnownBlock
                | ValidationError::WrongBlockNumber
                | ValidationError::WrongParentHash
                | ValidationError::TooHighHash
                | ValidationError::WrongInterlink
                | ValidationError::WrongTxRoot
        )
    }
}

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    /// Block or transaction rejected
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Storage backend errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Storage failed past the retry budget
    #[error("Fatal storage error after {attempts} attempts: {message}")]
    StorageFatal { attempts: usize, message: String },

    /// Peer connection errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Unexpected or malformed peer messages
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Key or signature handling errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Cancellation errors for async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a fatal storage error
    pub fn storage_fatal(attempts: usize, message: impl Into<String>) -> Self {
        Self::StorageFatal {
            attempts,
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage { .. } | Error::Network { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Check if this error must stop the node
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StorageFatal { .. })
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(e) if e.is_block_error() => "block",
            Error::Validation(_) => "transaction",
            Error::Json(_) | Error::Yaml(_) => "serialization",
            Error::ConfigSource(_) | Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Storage { .. } | Error::StorageFatal { .. } => "storage",
            Error::Network { .. } => "network",
            Error::Protocol { .. } => "protocol",
            Error::Crypto { .. } => "crypto",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("test message");
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(err.to_string(), "Configuration error: test message");
    }

    #[test]
    fn test_validation_error_display() {
        let err: Error = ValidationError::WrongInterlink.into();
        assert_eq!(err.to_string(), "Validation failed: wrong interlink");
        assert_eq!(err.category(), "block");

        let err: Error = ValidationError::IncorrectBalance.into();
        assert_eq!(err.category(), "transaction");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::storage("disk busy").is_retryable());
        assert!(Error::network("connection reset").is_retryable());
        assert!(!Error::config("bad").is_retryable());
        assert!(!Error::from(ValidationError::KnownBlock).is_retryable());
        assert!(!Error::storage_fatal(5, "gone").is_retryable());
        assert!(Error::storage_fatal(5, "gone").is_fatal());
    }
}
