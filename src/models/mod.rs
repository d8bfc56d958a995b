//! Model artifacts and inference seams.
//!
//! The pipeline consumes the pre-trained models through [`AnomalyModels`];
//! the ONNX-backed implementation lives in [`onnx`], artifact loading in
//! [`loader`].

pub mod loader;
pub mod onnx;

pub use loader::ModelLoader;
pub use onnx::OnnxModels;

use crate::error::PipelineError;

/// Black-box contract over the pre-trained artifacts.
///
/// `reconstruct` and `encode` take the scaled model-input vector; `centroids`
/// are the k-means centers in latent space; `classify_proba` returns the
/// positive-class probability for the fixed classifier feature set.
pub trait AnomalyModels: Send + Sync {
    fn reconstruct(&self, entrada: &[f64]) -> Result<Vec<f64>, PipelineError>;

    fn encode(&self, entrada: &[f64]) -> Result<Vec<f64>, PipelineError>;

    fn centroids(&self) -> &[Vec<f64>];

    fn classify_proba(&self, features: &[f64]) -> Result<f64, PipelineError>;
}
