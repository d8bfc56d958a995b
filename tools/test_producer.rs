//! Test Transaction Producer
//!
//! Generates transaction batches and sends them to the scoring service over
//! NATS request-reply, printing the batch summaries it gets back.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Transaction structure matching the pipeline's expected input format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Transaction {
    transacao_id: String,
    cliente_id: i64,
    conta_id: String,
    conta_destino_id: String,
    mesma_titularidade: bool,
    transacao_data: String,
    transacao_valor: f64,
    transacao_tipo: String,
}

/// Transaction generator for testing
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    transaction_counter: u64,
}

impl TransactionGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            transaction_counter: 0,
        }
    }

    /// Generate a random everyday transaction: daytime, moderate value.
    fn generate_legitimate(&mut self) -> Transaction {
        self.transaction_counter += 1;
        let conta = self.rng.gen_range(1..50);
        let data = self.random_timestamp(8, 20);

        Transaction {
            transacao_id: format!("tx_{:012}", self.transaction_counter),
            cliente_id: conta,
            conta_id: format!("conta_{conta:04}"),
            conta_destino_id: format!("conta_{:04}", self.rng.gen_range(1..500)),
            mesma_titularidade: self.rng.gen_bool(0.2),
            transacao_data: data,
            transacao_valor: self.rng.gen_range(10.0..500.0),
            transacao_tipo: self
                .random_choice(&["pix", "transferencia", "pagamento", "saque", "deposito"])
                .to_string(),
        }
    }

    /// Generate a suspicious transaction: small-hours timestamp, high value,
    /// outbound to a third party.
    fn generate_suspicious(&mut self) -> Transaction {
        self.transaction_counter += 1;
        let conta = self.rng.gen_range(1..50);
        let data = self.random_timestamp(0, 6);

        Transaction {
            transacao_id: format!("tx_{:012}", self.transaction_counter),
            cliente_id: conta,
            conta_id: format!("conta_{conta:04}"),
            conta_destino_id: format!("conta_{:04}", self.rng.gen_range(500..999)),
            mesma_titularidade: false,
            transacao_data: data,
            transacao_valor: self.rng.gen_range(5_000.0..50_000.0),
            transacao_tipo: self.random_choice(&["pix", "transferencia"]).to_string(),
        }
    }

    fn generate_batch(&mut self, size: usize, fraud_rate: f64) -> Vec<Transaction> {
        let mut batch = Vec::with_capacity(size);
        for _ in 0..size {
            if self.rng.gen_bool(fraud_rate) {
                batch.push(self.generate_suspicious());
            } else {
                batch.push(self.generate_legitimate());
            }
        }
        batch
    }

    /// Random timestamp within the last 30 days, hour drawn from
    /// `[hour_min, hour_max)`.
    fn random_timestamp(&mut self, hour_min: u32, hour_max: u32) -> String {
        let date = (Utc::now() - ChronoDuration::days(self.rng.gen_range(0..30))).date_naive();
        let hour = self.rng.gen_range(hour_min..hour_max);
        let minute = self.rng.gen_range(0..60);
        let second = self.rng.gen_range(0..60);
        format!("{date} {hour:02}:{minute:02}:{second:02}")
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let nats_url = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("nats://localhost:4222");
    let subject = args
        .get(2)
        .map(|s| s.as_str())
        .unwrap_or("transacoes.inferencia");
    let batches: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(10);
    let batch_size: usize = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(200);
    let fraud_rate: f64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(0.1);
    let delay_ms: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(500);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        batches = batches,
        batch_size = batch_size,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(batches, batch_size, fraud_rate, delay_ms).await;
        }
    };

    let mut generator = TransactionGenerator::new();

    info!("Sending {} batches of {} transactions...", batches, batch_size);

    for i in 0..batches {
        let batch = generator.generate_batch(batch_size, fraud_rate);
        let payload = serde_json::to_vec(&batch)?;

        match client.request(subject.to_string(), payload.into()).await {
            Ok(reply) => {
                let summary: serde_json::Value = serde_json::from_slice(&reply.payload)?;
                info!(
                    "Batch {}/{}: {}",
                    i + 1,
                    batches,
                    serde_json::to_string(&summary)?
                );
            }
            Err(e) => {
                warn!(error = %e, "Batch {}/{} got no reply", i + 1, batches);
            }
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!("Completed! Sent {} batches", batches);

    Ok(())
}

async fn run_dry_mode(
    batches: u64,
    batch_size: usize,
    fraud_rate: f64,
    delay_ms: u64,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = TransactionGenerator::new();

    for i in 0..batches {
        let batch = generator.generate_batch(batch_size, fraud_rate);

        if let Some(first) = batch.first() {
            let json = serde_json::to_string_pretty(first)?;
            info!("Batch {} sample transaction:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
