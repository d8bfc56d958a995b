//! Per-account behavioral profiles aggregated from the scored batch.

use crate::scorer::ScoredRow;
use crate::types::decision::AccountProfile;
use crate::types::transaction::{DiaDeSemana, FaixaHoraria};
use std::collections::HashMap;
use tracing::debug;

/// Transaction types tracked as profile percentage columns. Types absent for
/// an account contribute 0, not null.
pub const TIPOS_TRANSACAO: [&str; 5] = ["pix", "transferencia", "pagamento", "saque", "deposito"];

/// Build one profile per distinct `conta_id` in the batch.
///
/// Value statistics use the scaled representation (profiles are computed
/// after preprocessing). Standard deviation is the sample deviation and is
/// undefined (null) for single-transaction accounts. "Most common" hour-band
/// and weekday are the argmax of indicator counts; ties break on the first
/// variant in declaration order, an arbitrary but deterministic choice.
pub fn build_profiles(rows: &[ScoredRow]) -> HashMap<String, AccountProfile> {
    let mut grouped: HashMap<&str, Vec<&ScoredRow>> = HashMap::new();
    for row in rows {
        grouped.entry(&row.features.conta_id).or_default().push(row);
    }

    let profiles: HashMap<String, AccountProfile> = grouped
        .into_iter()
        .map(|(conta_id, members)| (conta_id.to_string(), profile_for(conta_id, &members)))
        .collect();
    debug!(accounts = profiles.len(), "account profiles built");
    profiles
}

fn profile_for(conta_id: &str, members: &[&ScoredRow]) -> AccountProfile {
    let n = members.len() as f64;

    let values: Vec<f64> = members.iter().map(|r| r.features.transacao_valor).collect();
    let media_valor = values.iter().sum::<f64>() / n;
    let std_valor = if values.len() > 1 {
        let var = values
            .iter()
            .map(|v| (v - media_valor).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        Some(var.sqrt())
    } else {
        None
    };

    let pct_tipo = |tipo: &str| -> f64 {
        members
            .iter()
            .filter(|r| r.features.transacao_tipo == tipo)
            .count() as f64
            / n
    };

    let percentual_fim_de_semana = members
        .iter()
        .map(|r| f64::from(r.features.fim_de_semana))
        .sum::<f64>()
        / n;
    let percentual_mesma_titularidade = members
        .iter()
        .map(|r| f64::from(r.features.mesma_titularidade))
        .sum::<f64>()
        / n;

    let horario_mais_comum = most_common(&FaixaHoraria::ALL, |f| {
        members
            .iter()
            .filter(|r| r.features.faixa_horaria == Some(*f))
            .count()
    });
    let dia_semana_mais_comum = most_common(&DiaDeSemana::ALL, |d| {
        members
            .iter()
            .filter(|r| r.features.dia_de_semana == Some(*d))
            .count()
    });

    AccountProfile {
        conta_id: conta_id.to_string(),
        media_valor,
        std_valor,
        percentual_pix: pct_tipo("pix"),
        percentual_transferencia: pct_tipo("transferencia"),
        percentual_pagamento: pct_tipo("pagamento"),
        percentual_saque: pct_tipo("saque"),
        percentual_deposito: pct_tipo("deposito"),
        percentual_fim_de_semana,
        percentual_mesma_titularidade,
        horario_mais_comum,
        dia_semana_mais_comum,
    }
}

/// Argmax over summed indicators; `None` when every count is zero (no row of
/// the account had a parseable timestamp). Strict `>` keeps the first variant
/// on ties.
fn most_common<T: Copy>(variants: &[T], count: impl Fn(&T) -> usize) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for variant in variants {
        let c = count(variant);
        if c > 0 && best.map_or(true, |(_, b)| c > b) {
            best = Some((*variant, c));
        }
    }
    best.map(|(v, _)| v)
}
