//! The pipeline's error taxonomy.
//!
//! Variants correspond 1:1 to the meanings worker handlers reason about, not
//! to any one dependency's error type: a handler maps a failure to one of
//! these, then to an [`crate::broker::HandlerOutcome`] at the ack/nak
//! boundary.

use thiserror::Error;

/// Errors produced anywhere in the Sentinel pipeline.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// A required configuration value was missing or invalid. Fatal at
    /// startup — never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The broker could not be reached after exhausting its reconnect
    /// policy.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The vector store could not serve a request.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The relational registry store failed a query or write.
    #[error("database error: {0}")]
    Db(String),

    /// A message could not be decoded against its declared schema. The
    /// message is undeliverable and would loop forever if retried, so
    /// handlers ack-drop it after logging.
    #[error("schema error decoding {message_type}: {reason}")]
    Schema {
        /// The `message-type` header of the offending message.
        message_type: String,
        /// Why decoding failed.
        reason: String,
    },

    /// An external collaborator (LLM, scraper) failed or timed out.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias used throughout the workspace.
pub type SentinelResult<T> = Result<T, SentinelError>;

impl SentinelError {
    /// Maps this error onto the deterministic ack/nak policy of §7: recoverable
    /// dependency failures retry via nak, non-recoverable payload errors ack
    /// with a warning so the queue is not poisoned.
    pub fn handler_outcome(&self) -> crate::broker::HandlerOutcome {
        use crate::broker::HandlerOutcome;
        match self {
            SentinelError::BrokerUnavailable(_)
            | SentinelError::StoreUnavailable(_)
            | SentinelError::Db(_)
            | SentinelError::Dependency(_) => HandlerOutcome::Nak,
            SentinelError::Schema { .. } | SentinelError::NotFound(_) => HandlerOutcome::Drop,
            SentinelError::Config(_) => HandlerOutcome::Drop,
        }
    }

    /// The HTTP status a read-side API maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            SentinelError::NotFound(_) => 404,
            SentinelError::Config(_) | SentinelError::Schema { .. } => 400,
            _ => 503,
        }
    }
}
