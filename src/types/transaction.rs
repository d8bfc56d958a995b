//! Transaction data structures for behavioral anomaly scoring.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A raw banking transaction submitted for scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    pub transacao_id: String,

    /// Customer identifier
    pub cliente_id: i64,

    /// Source account identifier
    pub conta_id: String,

    /// Destination account identifier
    pub conta_destino_id: String,

    /// Whether source and destination belong to the same owner
    pub mesma_titularidade: bool,

    /// Transaction timestamp as supplied by the caller; unparseable values
    /// degrade to null during preprocessing instead of failing the batch
    pub transacao_data: String,

    /// Transaction value (non-negative, raw currency)
    pub transacao_valor: f64,

    /// Transaction type (pix, transferencia, pagamento, saque, deposito)
    pub transacao_tipo: String,
}

impl Transaction {
    /// Parse the transaction timestamp, coercing failures to `None`.
    pub fn parse_data(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.transacao_data)
    }
}

/// Lenient timestamp parsing: RFC 3339 first, then the common
/// `YYYY-MM-DD[ T]HH:MM:SS` layouts, then a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Weekday names as used by the fitted encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiaDeSemana {
    Segunda,
    Terca,
    Quarta,
    Quinta,
    Sexta,
    Sabado,
    Domingo,
}

impl DiaDeSemana {
    /// All variants in encoder iteration order (also the tie-break order for
    /// "most common weekday" in account profiles).
    pub const ALL: [DiaDeSemana; 7] = [
        DiaDeSemana::Segunda,
        DiaDeSemana::Terca,
        DiaDeSemana::Quarta,
        DiaDeSemana::Quinta,
        DiaDeSemana::Sexta,
        DiaDeSemana::Sabado,
        DiaDeSemana::Domingo,
    ];

    pub fn from_weekday(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DiaDeSemana::Segunda,
            Weekday::Tue => DiaDeSemana::Terca,
            Weekday::Wed => DiaDeSemana::Quarta,
            Weekday::Thu => DiaDeSemana::Quinta,
            Weekday::Fri => DiaDeSemana::Sexta,
            Weekday::Sat => DiaDeSemana::Sabado,
            Weekday::Sun => DiaDeSemana::Domingo,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiaDeSemana::Segunda => "Segunda",
            DiaDeSemana::Terca => "Terca",
            DiaDeSemana::Quarta => "Quarta",
            DiaDeSemana::Quinta => "Quinta",
            DiaDeSemana::Sexta => "Sexta",
            DiaDeSemana::Sabado => "Sabado",
            DiaDeSemana::Domingo => "Domingo",
        }
    }

    pub fn is_fim_de_semana(&self) -> bool {
        matches!(self, DiaDeSemana::Sabado | DiaDeSemana::Domingo)
    }
}

/// Hour-of-day bands, half-open: [0,6) [6,12) [12,18) [18,24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaixaHoraria {
    Madrugada,
    Manha,
    Tarde,
    Noite,
}

impl FaixaHoraria {
    /// All variants in encoder iteration order.
    pub const ALL: [FaixaHoraria; 4] = [
        FaixaHoraria::Madrugada,
        FaixaHoraria::Manha,
        FaixaHoraria::Tarde,
        FaixaHoraria::Noite,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => FaixaHoraria::Madrugada,
            6..=11 => FaixaHoraria::Manha,
            12..=17 => FaixaHoraria::Tarde,
            _ => FaixaHoraria::Noite,
        }
    }

    /// Label as produced by the fitted encoder (accented).
    pub fn as_str(&self) -> &'static str {
        match self {
            FaixaHoraria::Madrugada => "Madrugada",
            FaixaHoraria::Manha => "Manhã",
            FaixaHoraria::Tarde => "Tarde",
            FaixaHoraria::Noite => "Noite",
        }
    }
}
