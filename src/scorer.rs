//! Statistical anomaly scoring: reconstruction error, cluster distance and
//! the batch-relative suspicion ladders.

use crate::error::PipelineError;
use crate::features::FeatureRow;
use crate::models::AnomalyModels;
use crate::types::decision::SuspicionTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A feature row extended with the statistical anomaly signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRow {
    pub features: FeatureRow,
    /// Mean squared error between the scaled input and its reconstruction
    pub erro_reconstrucao: f64,
    /// Euclidean distance to the nearest cluster centroid in latent space
    pub distancia_cluster: f64,
    /// Nearest-centroid id
    pub cluster_autoencoder: usize,
    /// Global-quantile tier (0.75/0.90/0.95 of the current batch)
    pub suspeita: SuspicionTier,
    /// Per-cluster tier (0.5x/1.0x/1.5x of the cluster's 95th percentile)
    pub suspeita_cluster: SuspicionTier,
}

/// Quantile with linear interpolation between order statistics, over a sorted
/// non-empty slice. A single-element slice yields that element for any q.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = h - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mse(a: &[f64], b: &[f64]) -> Result<f64, PipelineError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(PipelineError::Inference(format!(
            "reconstruction width mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    Ok(sum / a.len() as f64)
}

fn nearest_centroid(latent: &[f64], centroids: &[Vec<f64>]) -> Result<(usize, f64), PipelineError> {
    let mut best: Option<(usize, f64)> = None;
    for (id, centroid) in centroids.iter().enumerate() {
        if centroid.len() != latent.len() {
            return Err(PipelineError::Inference(format!(
                "latent width {} does not match centroid width {}",
                latent.len(),
                centroid.len()
            )));
        }
        let dist = latent
            .iter()
            .zip(centroid)
            .map(|(x, c)| (x - c) * (x - c))
            .sum::<f64>()
            .sqrt();
        if best.map_or(true, |(_, d)| dist < d) {
            best = Some((id, dist));
        }
    }
    best.ok_or_else(|| PipelineError::Inference("no cluster centroids".to_string()))
}

/// Score a preprocessed batch against the autoencoder/cluster models.
///
/// Both suspicion ladders are relative to the current batch, not fixed
/// constants; a single-row batch degenerates to that row's own error as every
/// quantile.
pub fn score_batch(
    rows: Vec<FeatureRow>,
    models: &dyn AnomalyModels,
) -> Result<Vec<ScoredRow>, PipelineError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut scored = Vec::with_capacity(rows.len());
    for features in rows {
        let reconstructed = models.reconstruct(&features.entrada_modelo)?;
        let erro_reconstrucao = mse(&features.entrada_modelo, &reconstructed)?;

        let latent = models.encode(&features.entrada_modelo)?;
        let (cluster_autoencoder, distancia_cluster) =
            nearest_centroid(&latent, models.centroids())?;

        scored.push(ScoredRow {
            features,
            erro_reconstrucao,
            distancia_cluster,
            cluster_autoencoder,
            suspeita: SuspicionTier::Nenhuma,
            suspeita_cluster: SuspicionTier::Nenhuma,
        });
    }

    let mut errors: Vec<f64> = scored.iter().map(|r| r.erro_reconstrucao).collect();
    errors.sort_by(|a, b| a.total_cmp(b));
    let q75 = quantile(&errors, 0.75);
    let q90 = quantile(&errors, 0.90);
    let q95 = quantile(&errors, 0.95);
    debug!(q75, q90, q95, rows = scored.len(), "global error quantiles");

    let mut by_cluster: HashMap<usize, Vec<f64>> = HashMap::new();
    for row in &scored {
        by_cluster
            .entry(row.cluster_autoencoder)
            .or_default()
            .push(row.erro_reconstrucao);
    }
    let cluster_thresholds: HashMap<usize, f64> = by_cluster
        .into_iter()
        .map(|(id, mut errs)| {
            errs.sort_by(|a, b| a.total_cmp(b));
            (id, quantile(&errs, 0.95))
        })
        .collect();

    for row in &mut scored {
        row.suspeita = if row.erro_reconstrucao > q95 {
            SuspicionTier::Alta
        } else if row.erro_reconstrucao > q90 {
            SuspicionTier::Media
        } else if row.erro_reconstrucao > q75 {
            SuspicionTier::Baixa
        } else {
            SuspicionTier::Nenhuma
        };

        // A cluster id always has at least one batch member by construction;
        // fall back to the global 95th percentile all the same.
        let threshold = cluster_thresholds
            .get(&row.cluster_autoencoder)
            .copied()
            .unwrap_or(q95);
        row.suspeita_cluster = if row.erro_reconstrucao > threshold * 1.5 {
            SuspicionTier::Alta
        } else if row.erro_reconstrucao > threshold {
            SuspicionTier::Media
        } else if row.erro_reconstrucao > threshold * 0.5 {
            SuspicionTier::Baixa
        } else {
            SuspicionTier::Nenhuma
        };
    }

    Ok(scored)
}
