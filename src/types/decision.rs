//! Decision, profile and alert data structures.

use crate::types::transaction::{DiaDeSemana, FaixaHoraria};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suspicion tier shared by the quantile ladders and the final decision level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspicionTier {
    Nenhuma,
    Baixa,
    Media,
    Alta,
}

impl SuspicionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspicionTier::Nenhuma => "nenhuma",
            SuspicionTier::Baixa => "baixa",
            SuspicionTier::Media => "media",
            SuspicionTier::Alta => "alta",
        }
    }

    /// True for any tier above `nenhuma`.
    pub fn is_suspect(&self) -> bool {
        !matches!(self, SuspicionTier::Nenhuma)
    }
}

/// Continuous-score risk band: [0,0.4] baixo, (0.4,0.7] moderado, (0.7,1.0] alto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaixaRisco {
    Baixo,
    Moderado,
    Alto,
}

impl FaixaRisco {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            FaixaRisco::Alto
        } else if score > 0.4 {
            FaixaRisco::Moderado
        } else {
            FaixaRisco::Baixo
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaixaRisco::Baixo => "baixo",
            FaixaRisco::Moderado => "moderado",
            FaixaRisco::Alto => "alto",
        }
    }
}

/// Aggregated behavioral profile for one account, one row per `conta_id`.
///
/// Value statistics are over the scaled representation, matching the stage at
/// which profiles are computed in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub conta_id: String,
    /// Mean transaction value for the account
    pub media_valor: f64,
    /// Standard deviation of transaction value; undefined for single-sample
    /// accounts (null, not zero)
    pub std_valor: Option<f64>,
    pub percentual_pix: f64,
    pub percentual_transferencia: f64,
    pub percentual_pagamento: f64,
    pub percentual_saque: f64,
    pub percentual_deposito: f64,
    pub percentual_fim_de_semana: f64,
    pub percentual_mesma_titularidade: f64,
    /// Most common hour band; null when no row of the account has a parseable
    /// timestamp
    pub horario_mais_comum: Option<FaixaHoraria>,
    /// Most common weekday, same null semantics
    pub dia_semana_mais_comum: Option<DiaDeSemana>,
}

/// Per-row projection reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    pub transacao_id: String,
    pub conta_id: String,
    pub decisao_final: u8,
    pub anomalia_confirmada: u8,
    pub nivel_suspeita: SuspicionTier,
    pub motivo_alerta: String,
}

/// Batch-level response for one inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSummary {
    pub total_transacoes: usize,
    pub anomalias_detectadas: u64,
    pub amostra: Vec<SampleRow>,
}

/// Alert published for each transaction with a positive final decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Unique alert identifier
    pub alert_id: String,
    pub transacao_id: String,
    pub conta_id: String,
    pub nivel_suspeita: SuspicionTier,
    pub risco_critico: u8,
    pub motivo_alerta: String,
    pub score_final: f64,
    pub faixa_risco: FaixaRisco,
    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,
}

impl AnomalyAlert {
    pub fn new(
        transacao_id: String,
        conta_id: String,
        nivel_suspeita: SuspicionTier,
        risco_critico: u8,
        motivo_alerta: String,
        score_final: f64,
        faixa_risco: FaixaRisco,
    ) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transacao_id,
            conta_id,
            nivel_suspeita,
            risco_critico,
            motivo_alerta,
            score_final,
            faixa_risco,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faixa_risco_bins() {
        assert_eq!(FaixaRisco::from_score(0.0), FaixaRisco::Baixo);
        assert_eq!(FaixaRisco::from_score(0.4), FaixaRisco::Baixo);
        assert_eq!(FaixaRisco::from_score(0.41), FaixaRisco::Moderado);
        assert_eq!(FaixaRisco::from_score(0.7), FaixaRisco::Moderado);
        assert_eq!(FaixaRisco::from_score(0.71), FaixaRisco::Alto);
        assert_eq!(FaixaRisco::from_score(1.0), FaixaRisco::Alto);
    }

    #[test]
    fn test_tier_serializes_lowercase() {
        let json = serde_json::to_string(&SuspicionTier::Alta).unwrap();
        assert_eq!(json, "\"alta\"");
        let back: SuspicionTier = serde_json::from_str("\"nenhuma\"").unwrap();
        assert_eq!(back, SuspicionTier::Nenhuma);
    }

    #[test]
    fn test_alert_serialization() {
        let alert = AnomalyAlert::new(
            "tx_1".to_string(),
            "c_1".to_string(),
            SuspicionTier::Media,
            0,
            "modelo".to_string(),
            0.5,
            FaixaRisco::Moderado,
        );
        let json = serde_json::to_string(&alert).unwrap();
        let back: AnomalyAlert = serde_json::from_str(&json).unwrap();
        assert_eq!(alert.alert_id, back.alert_id);
        assert_eq!(back.faixa_risco, FaixaRisco::Moderado);
    }
}
