//! NATS producer for anomaly alerts

use crate::types::decision::AnomalyAlert;
use anyhow::Result;
use async_nats::Client;
use tracing::{debug, error};

/// Producer for publishing anomaly alerts to NATS
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    subject: String,
}

impl AlertProducer {
    /// Create a new alert producer
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish one anomaly alert
    pub async fn publish(&self, alert: &AnomalyAlert) -> Result<()> {
        let payload = serde_json::to_vec(alert)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            alert_id = %alert.alert_id,
            transacao_id = %alert.transacao_id,
            score_final = alert.score_final,
            "Published anomaly alert"
        );

        Ok(())
    }

    /// Publish all alerts of a decided batch
    pub async fn publish_batch(&self, alerts: &[AnomalyAlert]) -> Result<()> {
        for alert in alerts {
            if let Err(e) = self.publish(alert).await {
                error!(
                    alert_id = %alert.alert_id,
                    error = %e,
                    "Failed to publish alert"
                );
            }
        }
        Ok(())
    }

    /// Get the subject name
    pub fn subject(&self) -> &str {
        &self.subject
    }
}
