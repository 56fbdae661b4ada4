use thiserror::Error;

/// Result alias used by every pipeline stage.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures raised by the core stages.
///
/// The first three variants are the fail-fast taxonomy: nothing in the core
/// retries or substitutes a default after one of them. The remaining
/// variants wrap transport failures from the scoped file reads.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    /// Whether the error belongs to the configuration class.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Toml(_))
    }
}
