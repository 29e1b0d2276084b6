use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Document {0} already owns a live offset")]
    DuplicateOffset(String),

    #[error("Index state lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// Stable machine-readable code used by the command surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ShapeMismatch { .. } => "shape_mismatch",
            Self::Storage(_) | Self::Io(_) => "storage_failure",
            Self::Engine(_) => "engine_failure",
            Self::Config(_) => "config",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::DuplicateOffset(_) | Self::Poisoned | Self::Serialization(_) => "internal",
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for IndexError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned
    }
}
