use thiserror::Error;

/// Top-level error type shared by the TaskMaster crates.
///
/// Subsystem crates define their own error enums and wrap this one where
/// they touch configuration or persistence, so `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskMasterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

impl From<toml::de::Error> for TaskMasterError {
    fn from(err: toml::de::Error) -> Self {
        TaskMasterError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TaskMasterError {
    fn from(err: toml::ser::Error) -> Self {
        TaskMasterError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TaskMasterError {
    fn from(err: serde_json::Error) -> Self {
        TaskMasterError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for TaskMaster operations.
pub type Result<T> = std::result::Result<T, TaskMasterError>;
