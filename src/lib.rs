//! Behavioral Anomaly Scoring Pipeline
//!
//! Batch fraud/anomaly scoring for banking transactions: feature
//! preprocessing, autoencoder/cluster anomaly signals, per-account
//! behavioral profiles and a layered rule/model decision engine.

pub mod config;
pub mod consumer;
pub mod decision;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod profiler;
pub mod scorer;
pub mod types;

pub use config::AppConfig;
pub use consumer::BatchConsumer;
pub use decision::{DecisionConfig, DecisionEngine, DecisionRow};
pub use error::PipelineError;
pub use features::FeaturePreprocessor;
pub use models::{AnomalyModels, ModelLoader};
pub use pipeline::InferencePipeline;
pub use producer::AlertProducer;
pub use types::{AnomalyAlert, InferenceSummary, Transaction};
