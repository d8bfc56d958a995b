//! Performance metrics and statistics tracking for the scoring service.

use crate::decision::DecisionRow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the batch pipeline
pub struct PipelineMetrics {
    /// Total batches processed
    pub batches_processed: AtomicU64,
    /// Total transactions processed
    pub transactions_processed: AtomicU64,
    /// Transactions with a positive final decision
    pub anomalies_flagged: AtomicU64,
    /// Transactions flagged for manual review
    pub critical_flags: AtomicU64,
    /// Final decisions by suspicion level
    decisions_by_level: RwLock<HashMap<String, u64>>,
    /// Batch processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            batches_processed: AtomicU64::new(0),
            transactions_processed: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            critical_flags: AtomicU64::new(0),
            decisions_by_level: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record one decided batch
    pub fn record_batch(&self, rows: &[DecisionRow], processing_time: Duration) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.transactions_processed
            .fetch_add(rows.len() as u64, Ordering::Relaxed);

        let flagged = rows.iter().filter(|d| d.decisao_final == 1).count() as u64;
        let critical = rows.iter().filter(|d| d.risco_critico == 1).count() as u64;
        self.anomalies_flagged.fetch_add(flagged, Ordering::Relaxed);
        self.critical_flags.fetch_add(critical, Ordering::Relaxed);

        if let Ok(mut by_level) = self.decisions_by_level.write() {
            for row in rows {
                *by_level
                    .entry(row.nivel_suspeita.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only recent samples for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    /// Get batch processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get decisions by suspicion level
    pub fn get_decisions_by_level(&self) -> HashMap<String, u64> {
        self.decisions_by_level
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let batches = self.batches_processed.load(Ordering::Relaxed);
        let tx_count = self.transactions_processed.load(Ordering::Relaxed);
        let flagged = self.anomalies_flagged.load(Ordering::Relaxed);
        let critical = self.critical_flags.load(Ordering::Relaxed);
        let flag_rate = if tx_count > 0 {
            (flagged as f64 / tx_count as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let by_level = self.get_decisions_by_level();

        info!(
            batches,
            transactions = tx_count,
            throughput = format!("{:.1} tx/s", throughput),
            "=== scoring pipeline metrics ==="
        );
        info!(
            flagged,
            critical,
            flag_rate = format!("{:.1}%", flag_rate),
            "decisions"
        );
        info!(
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            "batch processing time"
        );
        for (level, count) in &by_level {
            let pct = if tx_count > 0 {
                (*count as f64 / tx_count as f64) * 100.0
            } else {
                0.0
            };
            info!(level = %level, count, pct = format!("{pct:.1}%"), "suspicion level");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;
    use crate::scorer::ScoredRow;
    use crate::types::decision::{FaixaRisco, SuspicionTier};

    fn decision_row(decisao: u8, nivel: SuspicionTier) -> DecisionRow {
        DecisionRow {
            row: ScoredRow {
                features: FeatureRow {
                    transacao_id: "t".to_string(),
                    cliente_id: 1,
                    conta_id: "c".to_string(),
                    conta_destino_id: "d".to_string(),
                    mesma_titularidade: 0,
                    transacao_data: None,
                    valor_original: 1.0,
                    transacao_valor: 1.0,
                    transacao_tipo: "pix".to_string(),
                    dia_de_semana: None,
                    fim_de_semana: 0,
                    faixa_horaria: None,
                    entrada_modelo: vec![1.0],
                },
                erro_reconstrucao: 0.0,
                distancia_cluster: 0.0,
                cluster_autoencoder: 0,
                suspeita: SuspicionTier::Nenhuma,
                suspeita_cluster: SuspicionTier::Nenhuma,
            },
            perfil: None,
            tempo_desde_ultima: None,
            regra_valor_alto: 0,
            regra_horario: 0,
            regra_frequencia: 0,
            regra_cluster: 0,
            regra_alerta: 0,
            pontuacao_fraude: 0,
            anomalia_confirmada: 0,
            modelo_predito: decisao,
            decisao_final: decisao,
            nivel_suspeita: nivel,
            risco_critico: 0,
            motivo_alerta: "sem alerta".to_string(),
            score_final: 0.0,
            faixa_risco: FaixaRisco::Baixo,
        }
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();
        let rows = vec![
            decision_row(1, SuspicionTier::Baixa),
            decision_row(0, SuspicionTier::Nenhuma),
        ];

        metrics.record_batch(&rows, Duration::from_micros(250));

        assert_eq!(metrics.batches_processed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.transactions_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.anomalies_flagged.load(Ordering::Relaxed), 1);

        let by_level = metrics.get_decisions_by_level();
        assert_eq!(by_level.get("baixa"), Some(&1));
        assert_eq!(by_level.get("nenhuma"), Some(&1));
    }
}
