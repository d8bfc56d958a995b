//! End-to-end pipeline orchestration.
//!
//! Pure sequencing: preprocess, score, profile, join, decide. All-or-nothing
//! per batch; no partial results.

use crate::decision::{DecisionConfig, DecisionEngine, DecisionRow};
use crate::error::PipelineError;
use crate::features::FeaturePreprocessor;
use crate::models::AnomalyModels;
use crate::profiler::build_profiles;
use crate::scorer::score_batch;
use crate::types::decision::{InferenceSummary, SampleRow};
use crate::types::transaction::Transaction;
use std::sync::Arc;
use tracing::info;

/// The full scoring pipeline over immutable, shared model state.
pub struct InferencePipeline {
    preprocessor: FeaturePreprocessor,
    models: Arc<dyn AnomalyModels>,
    engine: DecisionEngine,
}

impl InferencePipeline {
    pub fn new(
        preprocessor: FeaturePreprocessor,
        models: Arc<dyn AnomalyModels>,
        config: DecisionConfig,
    ) -> Self {
        Self {
            preprocessor,
            models,
            engine: DecisionEngine::new(config),
        }
    }

    /// Score one batch end to end. Output row count equals input row count;
    /// output ordering is `(conta_id, transacao_data)`.
    pub fn run(&self, batch: &[Transaction]) -> Result<Vec<DecisionRow>, PipelineError> {
        info!(rows = batch.len(), "running inference pipeline");

        let features = self.preprocessor.preprocess(batch)?;
        let scored = score_batch(features, &*self.models)?;
        let profiles = build_profiles(&scored);
        let decided = self.engine.run(scored, &profiles, &*self.models)?;

        info!(
            rows = decided.len(),
            flagged = decided.iter().filter(|d| d.decisao_final == 1).count(),
            "inference pipeline complete"
        );
        Ok(decided)
    }

    /// Project a decided batch into the caller-facing summary.
    pub fn summarize(rows: &[DecisionRow], sample_size: usize) -> InferenceSummary {
        InferenceSummary {
            total_transacoes: rows.len(),
            anomalias_detectadas: rows.iter().filter(|d| d.decisao_final == 1).count() as u64,
            amostra: rows
                .iter()
                .take(sample_size)
                .map(|d| SampleRow {
                    transacao_id: d.row.features.transacao_id.clone(),
                    conta_id: d.row.features.conta_id.clone(),
                    decisao_final: d.decisao_final,
                    anomalia_confirmada: d.anomalia_confirmada,
                    nivel_suspeita: d.nivel_suspeita,
                    motivo_alerta: d.motivo_alerta.clone(),
                })
                .collect(),
        }
    }
}
