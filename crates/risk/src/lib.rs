//! `sentra-risk` — weighted risk scoring of permission sets.
//!
//! Independent of SoD screening but composable with it: the caller passes in
//! whether conflicts were found and the scorer adds a fixed penalty. Pure
//! function over immutable inputs.

pub mod score;

pub use score::{RiskBand, RiskReason, RiskScore, SOD_CONFLICT_PENALTY, calculate_score};
