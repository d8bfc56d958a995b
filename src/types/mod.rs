//! Type definitions for the anomaly scoring pipeline

pub mod decision;
pub mod transaction;

pub use decision::{AccountProfile, AnomalyAlert, FaixaRisco, InferenceSummary, SuspicionTier};
pub use transaction::{DiaDeSemana, FaixaHoraria, Transaction};
