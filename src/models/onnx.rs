//! ONNX Runtime implementations of the model seams.

use crate::error::PipelineError;
use crate::models::AnomalyModels;
use ort::memory::Allocator;
use ort::session::Session;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::sync::RwLock;
use tracing::{debug, warn};

/// One loaded ONNX session with its resolved input/output names.
///
/// `Session::run` needs `&mut`, so the session sits behind an `RwLock`; the
/// model weights themselves are immutable after load.
pub struct OnnxSession {
    pub name: String,
    session: RwLock<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    pub fn new(name: String, session: Session, input_name: String, output_name: String) -> Self {
        Self {
            name,
            session: RwLock::new(session),
            input_name,
            output_name,
        }
    }

    fn input_tensor(&self, input: &[f64]) -> Result<Tensor<f32>, PipelineError> {
        let features: Vec<f32> = input.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, features.len() as i64];
        Tensor::from_array((shape, features))
            .map_err(|e| PipelineError::Inference(format!("{}: input tensor: {e}", self.name)))
    }

    /// Run the session and return its primary output as a flat vector.
    pub fn run_vector(&self, input: &[f64]) -> Result<Vec<f64>, PipelineError> {
        let tensor = self.input_tensor(input)?;
        let mut session = self
            .session
            .write()
            .map_err(|e| PipelineError::Inference(format!("{}: lock poisoned: {e}", self.name)))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => tensor])
            .map_err(|e| PipelineError::Inference(format!("{}: {e}", self.name)))?;

        if let Some(output) = outputs.get(&self.output_name) {
            if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
                return Ok(data.iter().map(|&v| f64::from(v)).collect());
            }
        }
        // Fallback: first extractable float tensor among all outputs.
        for (name, output) in outputs.iter() {
            if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
                debug!(model = %self.name, output = %name, "extracted tensor via fallback");
                return Ok(data.iter().map(|&v| f64::from(v)).collect());
            }
        }
        Err(PipelineError::Inference(format!(
            "{}: no float tensor output",
            self.name
        )))
    }

    /// Run the session and return the positive-class probability.
    ///
    /// Handles both plain tensor outputs and the seq(map) layout emitted by
    /// sklearn-onnx for gradient-boosted-tree classifiers.
    pub fn run_proba(&self, input: &[f64]) -> Result<f64, PipelineError> {
        let tensor = self.input_tensor(input)?;
        let mut session = self
            .session
            .write()
            .map_err(|e| PipelineError::Inference(format!("{}: lock poisoned: {e}", self.name)))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => tensor])
            .map_err(|e| PipelineError::Inference(format!("{}: {e}", self.name)))?;

        if let Some(output) = outputs.get(&self.output_name) {
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                return Ok(positive_class_prob(&shape, data));
            }
            if DynSequenceValueType::can_downcast(&output.dtype()) {
                if let Ok(prob) = extract_from_sequence_map(output, &self.name) {
                    return Ok(prob);
                }
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                return Ok(positive_class_prob(&shape, data));
            }
            if DynSequenceValueType::can_downcast(&output.dtype()) {
                if let Ok(prob) = extract_from_sequence_map(&output, &self.name) {
                    return Ok(prob);
                }
            }
        }

        warn!(model = %self.name, "could not extract probability, using neutral 0.5");
        Ok(0.5)
    }
}

/// Probability extraction from seq(map(int64, float)).
fn extract_from_sequence_map(
    output: &ort::value::DynValue,
    model_name: &str,
) -> Result<f64, PipelineError> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| PipelineError::Inference(format!("{model_name}: not a sequence: {e}")))?;

    let maps = sequence
        .try_extract_sequence::<DynMapValueType>(&allocator)
        .map_err(|e| PipelineError::Inference(format!("{model_name}: sequence extract: {e}")))?;
    let map_value = maps
        .first()
        .ok_or_else(|| PipelineError::Inference(format!("{model_name}: empty sequence")))?;

    let kv_pairs = map_value
        .try_extract_key_values::<i64, f32>()
        .map_err(|e| PipelineError::Inference(format!("{model_name}: map extract: {e}")))?;

    for (class_id, prob) in &kv_pairs {
        if *class_id == 1 {
            return Ok(f64::from(*prob));
        }
    }
    for (class_id, prob) in &kv_pairs {
        if *class_id == 0 {
            return Ok(1.0 - f64::from(*prob));
        }
    }

    Err(PipelineError::Inference(format!(
        "{model_name}: no class probability in map"
    )))
}

fn positive_class_prob(shape: &ort::tensor::Shape, data: &[f32]) -> f64 {
    let dims: Vec<i64> = shape.iter().copied().collect();
    let num_classes = match dims.len() {
        2 => dims[1] as usize,
        1 => dims[0] as usize,
        _ => 0,
    };
    if num_classes >= 2 {
        return f64::from(data[1]);
    }
    if num_classes == 1 {
        return f64::from(data[0]);
    }
    data.last().map(|&v| f64::from(v)).unwrap_or(0.5)
}

/// The full pre-trained model set backed by ONNX sessions plus the k-means
/// centroids loaded alongside them.
pub struct OnnxModels {
    pub autoencoder: OnnxSession,
    pub encoder: OnnxSession,
    pub classifier: OnnxSession,
    centroids: Vec<Vec<f64>>,
}

impl OnnxModels {
    pub fn new(
        autoencoder: OnnxSession,
        encoder: OnnxSession,
        classifier: OnnxSession,
        centroids: Vec<Vec<f64>>,
    ) -> Self {
        Self {
            autoencoder,
            encoder,
            classifier,
            centroids,
        }
    }
}

impl AnomalyModels for OnnxModels {
    fn reconstruct(&self, entrada: &[f64]) -> Result<Vec<f64>, PipelineError> {
        self.autoencoder.run_vector(entrada)
    }

    fn encode(&self, entrada: &[f64]) -> Result<Vec<f64>, PipelineError> {
        self.encoder.run_vector(entrada)
    }

    fn centroids(&self) -> &[Vec<f64>] {
        &self.centroids
    }

    fn classify_proba(&self, features: &[f64]) -> Result<f64, PipelineError> {
        self.classifier.run_proba(features)
    }
}
