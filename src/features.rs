//! Feature preprocessing for the anomaly models.
//!
//! Mirrors the preprocessing the models were fitted with: calendar
//! derivations, pre-fitted one-hot encoders and a pre-fitted linear scaler
//! over a fixed, named column set.

use crate::error::PipelineError;
use crate::types::transaction::{DiaDeSemana, FaixaHoraria, Transaction};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Pre-fitted one-hot encoder over a fixed category universe.
///
/// Unseen categories (and null inputs) produce an all-zero indicator vector,
/// never an error: the encoders are fitted on the full known universe and the
/// models tolerate a zero row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneHotEncoder {
    prefix: String,
    categories: Vec<String>,
}

impl OneHotEncoder {
    pub fn new(prefix: impl Into<String>, categories: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            categories,
        }
    }

    /// Output column names, `{prefix}_{category}` in fitted order.
    pub fn feature_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|c| format!("{}_{}", self.prefix, c))
            .collect()
    }

    /// Fixed-width indicator vector for one value.
    pub fn transform(&self, value: Option<&str>) -> Vec<f64> {
        self.categories
            .iter()
            .map(|c| match value {
                Some(v) if v == c => 1.0,
                _ => 0.0,
            })
            .collect()
    }
}

/// Pre-fitted standardizing scaler over a fixed column set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearScaler {
    columns: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl LinearScaler {
    pub fn new(
        columns: Vec<String>,
        means: Vec<f64>,
        scales: Vec<f64>,
    ) -> Result<Self, PipelineError> {
        if columns.len() != means.len() || columns.len() != scales.len() {
            return Err(PipelineError::ModelLoad(format!(
                "scaler shape mismatch: {} columns, {} means, {} scales",
                columns.len(),
                means.len(),
                scales.len()
            )));
        }
        Ok(Self {
            columns,
            means,
            scales,
        })
    }

    /// The fixed column-name list the scaler (and the autoencoder) expect.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// `(x - mean) / scale` per column; zero-variance columns pass through.
    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.means.iter().zip(self.scales.iter()))
            .map(|(&v, (&mean, &scale))| {
                let scale = if scale.abs() < f64::EPSILON { 1.0 } else { scale };
                (v - mean) / scale
            })
            .collect()
    }
}

/// One transaction after preprocessing. Numeric features are in their scaled
/// representation wherever the scaler covers them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub transacao_id: String,
    pub cliente_id: i64,
    pub conta_id: String,
    pub conta_destino_id: String,
    pub mesma_titularidade: u8,
    /// Parsed timestamp; null when the raw value was unparseable
    pub transacao_data: Option<DateTime<Utc>>,
    /// Raw currency value as received
    pub valor_original: f64,
    /// Transaction value after scaling (scaled representation is what all
    /// downstream rules compare against)
    pub transacao_valor: f64,
    pub transacao_tipo: String,
    pub dia_de_semana: Option<DiaDeSemana>,
    pub fim_de_semana: u8,
    pub faixa_horaria: Option<FaixaHoraria>,
    /// Scaled model input over the scaler's fixed column set
    pub entrada_modelo: Vec<f64>,
}

impl FeatureRow {
    pub fn indicator_tipo(&self, tipo: &str) -> f64 {
        if self.transacao_tipo == tipo {
            1.0
        } else {
            0.0
        }
    }

    pub fn indicator_dia(&self, dia: DiaDeSemana) -> f64 {
        if self.dia_de_semana == Some(dia) {
            1.0
        } else {
            0.0
        }
    }

    pub fn indicator_faixa(&self, faixa: FaixaHoraria) -> f64 {
        if self.faixa_horaria == Some(faixa) {
            1.0
        } else {
            0.0
        }
    }
}

/// Preprocessor holding the pre-fitted encoders and scaler.
pub struct FeaturePreprocessor {
    encoder_tipo: OneHotEncoder,
    encoder_semana: OneHotEncoder,
    encoder_horario: OneHotEncoder,
    scaler: LinearScaler,
}

impl FeaturePreprocessor {
    pub fn new(
        encoder_tipo: OneHotEncoder,
        encoder_semana: OneHotEncoder,
        encoder_horario: OneHotEncoder,
        scaler: LinearScaler,
    ) -> Self {
        Self {
            encoder_tipo,
            encoder_semana,
            encoder_horario,
            scaler,
        }
    }

    /// Preprocess a batch. Row count is preserved; input ordering is not
    /// significant downstream (the decision engine re-sorts).
    pub fn preprocess(&self, batch: &[Transaction]) -> Result<Vec<FeatureRow>, PipelineError> {
        let rows = batch
            .iter()
            .map(|tx| self.preprocess_one(tx))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(rows = rows.len(), "preprocessing complete");
        Ok(rows)
    }

    fn preprocess_one(&self, tx: &Transaction) -> Result<FeatureRow, PipelineError> {
        if tx.conta_id.is_empty() {
            return Err(PipelineError::schema("conta_id"));
        }
        if !tx.transacao_valor.is_finite() || tx.transacao_valor < 0.0 {
            return Err(PipelineError::schema("transacao_valor"));
        }

        let data = tx.parse_data();
        let dia_de_semana = data.map(|d| DiaDeSemana::from_weekday(d.weekday()));
        let fim_de_semana = dia_de_semana.is_some_and(|d| d.is_fim_de_semana()) as u8;
        let faixa_horaria = data.map(|d| FaixaHoraria::from_hour(d.hour()));
        let mesma_titularidade = tx.mesma_titularidade as u8;

        // Named column space the scaler draws from: base numerics plus every
        // encoder output column.
        let mut columns: HashMap<&str, f64> = HashMap::new();
        columns.insert("transacao_valor", tx.transacao_valor);
        columns.insert("mesma_titularidade", f64::from(mesma_titularidade));
        columns.insert("fim_de_semana", f64::from(fim_de_semana));
        columns.insert("cliente_id", tx.cliente_id as f64);

        let encoded = [
            (
                &self.encoder_tipo,
                Some(tx.transacao_tipo.as_str()),
            ),
            (
                &self.encoder_semana,
                dia_de_semana.map(|d| d.as_str()),
            ),
            (
                &self.encoder_horario,
                faixa_horaria.map(|f| f.as_str()),
            ),
        ];
        let mut onehot: Vec<(String, f64)> = Vec::new();
        for (encoder, value) in encoded {
            let names = encoder.feature_names();
            let values = encoder.transform(value);
            onehot.extend(names.into_iter().zip(values));
        }
        for (name, value) in &onehot {
            columns.insert(name.as_str(), *value);
        }

        let raw: Vec<f64> = self
            .scaler
            .columns()
            .iter()
            .map(|name| {
                columns
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| PipelineError::schema(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let entrada_modelo = self.scaler.transform(&raw);

        // The scaled value replaces the raw one for every downstream rule.
        let transacao_valor = self
            .scaler
            .columns()
            .iter()
            .position(|c| c == "transacao_valor")
            .map(|i| entrada_modelo[i])
            .unwrap_or(tx.transacao_valor);

        Ok(FeatureRow {
            transacao_id: tx.transacao_id.clone(),
            cliente_id: tx.cliente_id,
            conta_id: tx.conta_id.clone(),
            conta_destino_id: tx.conta_destino_id.clone(),
            mesma_titularidade,
            transacao_data: data,
            valor_original: tx.transacao_valor,
            transacao_valor,
            transacao_tipo: tx.transacao_tipo.clone(),
            dia_de_semana,
            fim_de_semana,
            faixa_horaria,
            entrada_modelo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, data: &str, valor: f64, tipo: &str) -> Transaction {
        Transaction {
            transacao_id: id.to_string(),
            cliente_id: 1,
            conta_id: "c_1".to_string(),
            conta_destino_id: "c_2".to_string(),
            mesma_titularidade: false,
            transacao_data: data.to_string(),
            transacao_valor: valor,
            transacao_tipo: tipo.to_string(),
        }
    }

    fn preprocessor() -> FeaturePreprocessor {
        let tipos = ["pix", "transferencia", "pagamento", "saque", "deposito"];
        let encoder_tipo = OneHotEncoder::new(
            "transacao_tipo",
            tipos.iter().map(|s| s.to_string()).collect(),
        );
        let encoder_semana = OneHotEncoder::new(
            "dia_de_semana",
            DiaDeSemana::ALL.iter().map(|d| d.as_str().to_string()).collect(),
        );
        let encoder_horario = OneHotEncoder::new(
            "faixa_horaria",
            FaixaHoraria::ALL.iter().map(|f| f.as_str().to_string()).collect(),
        );
        // Identity scaler over a small fixed column set.
        let columns = vec![
            "transacao_valor".to_string(),
            "mesma_titularidade".to_string(),
            "fim_de_semana".to_string(),
            "transacao_tipo_pix".to_string(),
            "faixa_horaria_Madrugada".to_string(),
        ];
        let n = columns.len();
        let scaler = LinearScaler::new(columns, vec![0.0; n], vec![1.0; n]).unwrap();
        FeaturePreprocessor::new(encoder_tipo, encoder_semana, encoder_horario, scaler)
    }

    #[test]
    fn test_calendar_derivations() {
        let pre = preprocessor();
        // 2025-03-15 is a Saturday, 02:00 is Madrugada.
        let rows = pre
            .preprocess(&[tx("t1", "2025-03-15 02:00:00", 10.0, "pix")])
            .unwrap();
        let row = &rows[0];
        assert_eq!(row.dia_de_semana, Some(DiaDeSemana::Sabado));
        assert_eq!(row.fim_de_semana, 1);
        assert_eq!(row.faixa_horaria, Some(FaixaHoraria::Madrugada));
        assert_eq!(row.indicator_tipo("pix"), 1.0);
        assert_eq!(row.indicator_tipo("saque"), 0.0);
        // entrada_modelo follows the scaler column order.
        assert_eq!(row.entrada_modelo, vec![10.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_invalid_timestamp_degrades_to_null() {
        let pre = preprocessor();
        let rows = pre.preprocess(&[tx("t1", "garbage", 10.0, "pix")]).unwrap();
        let row = &rows[0];
        assert!(row.transacao_data.is_none());
        assert!(row.dia_de_semana.is_none());
        assert!(row.faixa_horaria.is_none());
        assert_eq!(row.fim_de_semana, 0);
        assert_eq!(row.indicator_faixa(FaixaHoraria::Madrugada), 0.0);
    }

    #[test]
    fn test_unseen_category_yields_zero_vector() {
        let encoder = OneHotEncoder::new("transacao_tipo", vec!["pix".to_string()]);
        assert_eq!(encoder.transform(Some("boleto")), vec![0.0]);
        assert_eq!(encoder.transform(None), vec![0.0]);
    }

    #[test]
    fn test_negative_value_is_schema_error() {
        let pre = preprocessor();
        let err = pre
            .preprocess(&[tx("t1", "2025-03-15 02:00:00", -1.0, "pix")])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema { column } if column == "transacao_valor"
        ));
    }

    #[test]
    fn test_unknown_scaler_column_is_schema_error() {
        let scaler =
            LinearScaler::new(vec!["nao_existe".to_string()], vec![0.0], vec![1.0]).unwrap();
        let pre = FeaturePreprocessor::new(
            OneHotEncoder::new("transacao_tipo", vec![]),
            OneHotEncoder::new("dia_de_semana", vec![]),
            OneHotEncoder::new("faixa_horaria", vec![]),
            scaler,
        );
        let err = pre
            .preprocess(&[tx("t1", "2025-03-15 02:00:00", 1.0, "pix")])
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema { column } if column == "nao_existe"
        ));
    }

    #[test]
    fn test_scaler_transform() {
        let scaler = LinearScaler::new(
            vec!["a".to_string(), "b".to_string()],
            vec![10.0, 0.0],
            vec![2.0, 0.0],
        )
        .unwrap();
        // Zero-variance column passes through.
        assert_eq!(scaler.transform(&[14.0, 3.0]), vec![2.0, 3.0]);
    }

    #[test]
    fn test_scaler_shape_mismatch() {
        let err = LinearScaler::new(vec!["a".to_string()], vec![], vec![1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::ModelLoad(_)));
    }
}
