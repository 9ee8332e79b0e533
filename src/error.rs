//! Error types for the valuation triage engine.

use thiserror::Error;

/// Engine error taxonomy.
///
/// - `Data`: a record or file row is malformed or misses a required field.
///   Unknown asset classes are NOT errors; they fall into the "other" bucket.
/// - `ModelNotTrained`: inference was requested before the component was fitted.
/// - `Config`: an invalid parameter was rejected at construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed or missing field in a record.
    #[error("data error in {context}: {message}")]
    Data { context: String, message: String },

    /// Inference requested before fit.
    #[error("model not trained: {0}")]
    ModelNotTrained(&'static str),

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn data(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Data {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short machine-readable kind, used in HTTP error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data_error",
            Self::ModelNotTrained(_) => "model_not_trained",
            Self::Config(_) => "configuration_error",
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
