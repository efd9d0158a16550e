//! Error types shared across the query service.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Unified error type for the query service.
///
/// Variants are grouped by how the caller should react: `InvalidInput`
/// and `NotFound` are client mistakes, `Conflict` is a precondition
/// failure, the rest are infrastructure faults. Capacity exhaustion is
/// deliberately absent; over-capacity work waits in the queue instead
/// of failing.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("engine '{engine}' failed: {message}")]
    Engine { engine: String, message: String },

    #[error("schema translation failed: {0}")]
    SchemaTranslation(String),

    #[error("protobuf decoding failed: {0}")]
    ProtobufDecoding(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Error for a failed operation against a named engine.
    pub fn engine(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.into(),
        }
    }
}
