//! Action, SoD rule, and risk weight catalogs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use sentra_core::{EngineError, EngineResult};

use crate::slug::PermissionSlug;

/// 1:1 mapping from an entity/action pair to its permission slug.
///
/// No OR/AND composition and no partial matches are permitted at this layer,
/// so the audit trail stays exact: one action key, one slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPermissionDef {
    pub entity_key: String,
    pub action_key: String,
    pub slug: PermissionSlug,
}

impl ActionPermissionDef {
    pub fn new(
        entity_key: impl Into<String>,
        action_key: impl Into<String>,
        slug: impl Into<PermissionSlug>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            action_key: action_key.into(),
            slug: slug.into(),
        }
    }
}

/// Risk tier of a segregation-of-duties rule.
///
/// Policy per tier: `Critical` blocks the save outright, `High` forces the
/// mutation through the approval workflow, `Medium` is advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Medium,
    High,
    Critical,
}

impl core::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
            RiskTier::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A forbidden permission combination.
///
/// The rule fires when an evaluated permission set is a superset of
/// `conflicting_slugs` — never on partial overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SodRule {
    pub id: String,
    pub name: String,
    pub risk_tier: RiskTier,
    pub conflicting_slugs: BTreeSet<PermissionSlug>,
    pub recommendation: String,
}

impl SodRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        risk_tier: RiskTier,
        conflicting_slugs: impl IntoIterator<Item = PermissionSlug>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            risk_tier,
            conflicting_slugs: conflicting_slugs.into_iter().collect(),
            recommendation: recommendation.into(),
        }
    }

    /// A rule needs at least two slugs; a smaller set can never express a
    /// combination and would fire on a single grant.
    pub fn validate(&self) -> EngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::validation("SoD rule id cannot be empty"));
        }
        if self.conflicting_slugs.len() < 2 {
            return Err(EngineError::validation(format!(
                "SoD rule '{}' must declare at least two conflicting slugs",
                self.id
            )));
        }
        for slug in &self.conflicting_slugs {
            slug.validate()?;
        }
        Ok(())
    }
}

/// Weighted risk contribution of a single permission slug.
///
/// `pattern` is an exact-match slug — no wildcards by design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskWeight {
    pub pattern: PermissionSlug,
    pub weight: u8,
    pub category: String,
}

impl RiskWeight {
    pub const MIN_WEIGHT: u8 = 1;
    pub const MAX_WEIGHT: u8 = 20;

    pub fn new(pattern: impl Into<PermissionSlug>, weight: u8, category: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            weight,
            category: category.into(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.pattern.validate()?;
        if !(Self::MIN_WEIGHT..=Self::MAX_WEIGHT).contains(&self.weight) {
            return Err(EngineError::validation(format!(
                "risk weight for '{}' must be within {}..={}, got {}",
                self.pattern,
                Self::MIN_WEIGHT,
                Self::MAX_WEIGHT,
                self.weight
            )));
        }
        if self.category.trim().is_empty() {
            return Err(EngineError::validation(format!(
                "risk weight for '{}' has an empty category",
                self.pattern
            )));
        }
        Ok(())
    }
}
