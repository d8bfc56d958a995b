//! Startup loading of the pre-fitted artifacts.
//!
//! Loads the JSON artifacts (scaler parameters, encoder category lists,
//! k-means centroids) and the three ONNX sessions from the models directory.
//! Any failure here is fatal: the service must not accept requests without a
//! complete model set.

use crate::error::PipelineError;
use crate::features::{FeaturePreprocessor, LinearScaler, OneHotEncoder};
use crate::models::onnx::{OnnxModels, OnnxSession};
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Fitted scaler parameters: parallel columns/means/scales arrays.
#[derive(Debug, Deserialize)]
struct ScalerArtifact {
    columns: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
}

/// Fitted category universes for the three one-hot encoders.
#[derive(Debug, Deserialize)]
struct EncoderArtifact {
    transacao_tipo: Vec<String>,
    dia_de_semana: Vec<String>,
    faixa_horaria: Vec<String>,
}

/// Loader for the model directory.
pub struct ModelLoader {
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a loader with default settings (1 inference thread).
    pub fn new() -> Result<Self, PipelineError> {
        Self::with_threads(1)
    }

    /// Create a loader with the given per-session thread count.
    pub fn with_threads(onnx_threads: usize) -> Result<Self, PipelineError> {
        ort::init()
            .commit()
            .map_err(|e| PipelineError::ModelLoad(format!("onnx runtime init: {e}")))?;
        info!(onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load every artifact from `models_dir`.
    ///
    /// Expected layout: `scaler.json`, `encoders.json`, `centroids.json`,
    /// `modelo_autoencoder.onnx`, `modelo_encoder.onnx`, `modelo_xgb.onnx`.
    pub fn load_artifacts<P: AsRef<Path>>(
        &self,
        models_dir: P,
    ) -> Result<(FeaturePreprocessor, OnnxModels), PipelineError> {
        let dir = models_dir.as_ref();
        info!(dir = %dir.display(), "loading model artifacts");

        let scaler: ScalerArtifact = load_json(&dir.join("scaler.json"))?;
        let encoders: EncoderArtifact = load_json(&dir.join("encoders.json"))?;
        let centroids: Vec<Vec<f64>> = load_json(&dir.join("centroids.json"))?;

        if centroids.is_empty() {
            return Err(PipelineError::ModelLoad(
                "centroids.json contains no centroids".to_string(),
            ));
        }
        let latent_dim = centroids[0].len();
        if centroids.iter().any(|c| c.len() != latent_dim) {
            return Err(PipelineError::ModelLoad(
                "centroids.json has inconsistent dimensions".to_string(),
            ));
        }

        let preprocessor = FeaturePreprocessor::new(
            OneHotEncoder::new("transacao_tipo", encoders.transacao_tipo),
            OneHotEncoder::new("dia_de_semana", encoders.dia_de_semana),
            OneHotEncoder::new("faixa_horaria", encoders.faixa_horaria),
            LinearScaler::new(scaler.columns, scaler.means, scaler.scales)?,
        );

        let autoencoder = self.load_session(&dir.join("modelo_autoencoder.onnx"), "autoencoder")?;
        let encoder = self.load_session(&dir.join("modelo_encoder.onnx"), "encoder")?;
        let classifier = self.load_session(&dir.join("modelo_xgb.onnx"), "xgboost")?;

        info!(
            centroids = centroids.len(),
            latent_dim, "model artifacts loaded"
        );
        Ok((
            preprocessor,
            OnnxModels::new(autoencoder, encoder, classifier, centroids),
        ))
    }

    fn load_session(&self, path: &Path, name: &str) -> Result<OnnxSession, PipelineError> {
        info!(model = %name, path = %path.display(), "loading ONNX model");

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(self.onnx_threads))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| {
                PipelineError::ModelLoad(format!("{name} ({}): {e}", path.display()))
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output".to_string());

        info!(model = %name, input = %input_name, output = %output_name, "model loaded");
        Ok(OnnxSession::new(
            name.to_string(),
            session,
            input_name,
            output_name,
        ))
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let file = File::open(path)
        .map_err(|e| PipelineError::ModelLoad(format!("{}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| PipelineError::ModelLoad(format!("{}: {e}", path.display())))
}
