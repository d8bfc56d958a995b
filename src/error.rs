//! Error types for the scoring pipeline.

use thiserror::Error;

/// Errors surfaced by the core pipeline.
///
/// Schema problems abort the whole batch: downstream thresholds and account
/// aggregates are batch-relative and cannot be computed over a partial batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input column is missing or malformed.
    #[error("missing or invalid required column: {column}")]
    Schema { column: String },

    /// A model artifact could not be loaded at startup.
    #[error("failed to load model artifact: {0}")]
    ModelLoad(String),

    /// A model call failed at inference time.
    #[error("model inference failed: {0}")]
    Inference(String),
}

impl PipelineError {
    pub fn schema(column: impl Into<String>) -> Self {
        Self::Schema {
            column: column.into(),
        }
    }
}
