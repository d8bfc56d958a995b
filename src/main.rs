//! Anomaly Scoring Service - Main Entry Point
//!
//! Consumes transaction batches from NATS, runs the scoring pipeline, replies
//! with a batch summary and publishes per-transaction anomaly alerts.

use anomalia_pipeline::{
    config::AppConfig,
    consumer::BatchConsumer,
    metrics::{MetricsReporter, PipelineMetrics},
    models::ModelLoader,
    pipeline::InferencePipeline,
    producer::AlertProducer,
    types::decision::AnomalyAlert,
    Transaction,
};
use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("anomalia_pipeline={}", config.logging.level).parse()?);
    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting Anomaly Scoring Service");
    info!(
        classifier_cutoff = config.decision.classifier_cutoff,
        noise_rate = config.decision.noise_rate,
        noise_seed = config.decision.noise_seed,
        "Configuration loaded"
    );

    // Model loading is fatal: the service must not accept requests without a
    // complete artifact set.
    let loader = ModelLoader::with_threads(config.models.onnx_threads)
        .context("ONNX Runtime initialization failed")?;
    let (preprocessor, models) = loader
        .load_artifacts(&config.models.models_dir)
        .context("Model artifact loading failed")?;

    let pipeline = Arc::new(InferencePipeline::new(
        preprocessor,
        Arc::new(models),
        config.decision.clone(),
    ));
    info!("Inference pipeline initialized");

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = BatchConsumer::new(client.clone(), &config.nats.inference_subject);
    let producer = Arc::new(AlertProducer::new(client.clone(), &config.nats.alert_subject));

    let metrics = Arc::new(PipelineMetrics::new());
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, 30);
        reporter.start().await;
    });

    let num_workers = config.pipeline.workers;
    let sample_size = config.pipeline.sample_size;
    info!(
        workers = num_workers,
        subject = %config.nats.inference_subject,
        alerts = %config.nats.alert_subject,
        "Starting batch processing loop"
    );

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;
        let pipeline = pipeline.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let client = client.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let reply = match serde_json::from_slice::<Vec<Transaction>>(&message.payload) {
                Ok(batch) => {
                    let batch_size = batch.len();
                    // The pipeline is synchronous CPU work; keep it off the
                    // async runtime threads.
                    let result = tokio::task::spawn_blocking({
                        let pipeline = pipeline.clone();
                        move || pipeline.run(&batch)
                    })
                    .await;

                    match result {
                        Ok(Ok(rows)) => {
                            let processing_time = start_time.elapsed();
                            metrics.record_batch(&rows, processing_time);

                            let summary = InferencePipeline::summarize(&rows, sample_size);
                            info!(
                                rows = batch_size,
                                flagged = summary.anomalias_detectadas,
                                processing_time_us = processing_time.as_micros(),
                                "Batch scored"
                            );

                            let alerts: Vec<AnomalyAlert> = rows
                                .iter()
                                .filter(|d| d.decisao_final == 1)
                                .map(|d| {
                                    AnomalyAlert::new(
                                        d.row.features.transacao_id.clone(),
                                        d.row.features.conta_id.clone(),
                                        d.nivel_suspeita,
                                        d.risco_critico,
                                        d.motivo_alerta.clone(),
                                        d.score_final,
                                        d.faixa_risco,
                                    )
                                })
                                .collect();
                            if let Err(e) = producer.publish_batch(&alerts).await {
                                error!(error = %e, "Failed to publish alerts");
                            }

                            serde_json::to_vec(&summary).ok()
                        }
                        Ok(Err(e)) => {
                            // Core failure: one caller-visible message, no
                            // internal detail.
                            error!(error = %e, "Pipeline failed");
                            serde_json::to_vec(&json!({ "erro": e.to_string() })).ok()
                        }
                        Err(e) => {
                            error!(error = %e, "Pipeline task panicked");
                            serde_json::to_vec(&json!({ "erro": "internal error" })).ok()
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to deserialize transaction batch");
                    serde_json::to_vec(&json!({ "erro": format!("invalid batch: {e}") })).ok()
                }
            };

            if let (Some(reply_subject), Some(payload)) = (message.reply, reply) {
                if let Err(e) = client.publish(reply_subject, payload.into()).await {
                    error!(error = %e, "Failed to send reply");
                }
            }

            drop(permit);
        });
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}
