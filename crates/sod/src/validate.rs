use std::collections::BTreeSet;

use serde::Serialize;

use sentra_core::{EngineError, EngineResult, PolicyViolationKind};
use sentra_registry::{PermissionSlug, RiskTier, SodRule};

/// One fired rule, carrying the slugs actually held in combination.
///
/// `matched_slugs` lists the offending permissions from the evaluated set,
/// not merely the rule's declared set — callers highlight exactly what the
/// candidate already holds together with the one being added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SodConflict {
    pub rule_id: String,
    pub name: String,
    pub risk_tier: RiskTier,
    pub matched_slugs: BTreeSet<PermissionSlug>,
    pub recommendation: String,
}

/// Outcome of screening one permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SodValidationResult {
    pub conflicts: Vec<SodConflict>,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
}

impl SodValidationResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// CRITICAL conflicts make the candidate mutation unsavable (hard stop).
    pub fn blocks_save(&self) -> bool {
        self.critical_count > 0
    }

    /// HIGH conflicts force the mutation through the approval workflow.
    /// MEDIUM conflicts are advisory only; save is permitted.
    pub fn requires_approval_routing(&self) -> bool {
        self.high_count > 0
    }
}

/// Screen a permission set against the rule catalog.
///
/// Conflicts come back in catalog order; counts are per tier.
pub fn validate(perms: &BTreeSet<PermissionSlug>, rules: &[SodRule]) -> SodValidationResult {
    let mut conflicts = Vec::new();
    let mut critical_count = 0;
    let mut high_count = 0;
    let mut medium_count = 0;

    for rule in rules {
        let fires = rule.conflicting_slugs.iter().all(|slug| perms.contains(slug));
        if !fires {
            continue;
        }

        match rule.risk_tier {
            RiskTier::Critical => critical_count += 1,
            RiskTier::High => high_count += 1,
            RiskTier::Medium => medium_count += 1,
        }

        conflicts.push(SodConflict {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            risk_tier: rule.risk_tier,
            matched_slugs: rule
                .conflicting_slugs
                .iter()
                .filter(|slug| perms.contains(*slug))
                .cloned()
                .collect(),
            recommendation: rule.recommendation.clone(),
        });
    }

    SodValidationResult {
        conflicts,
        critical_count,
        high_count,
        medium_count,
    }
}

/// Reject a save that carries a CRITICAL conflict.
///
/// The failure is a policy violation, deliberately distinguishable from
/// transient errors so UIs never offer a retry for it.
pub fn enforce_savable(result: &SodValidationResult) -> EngineResult<()> {
    if !result.blocks_save() {
        return Ok(());
    }
    let first = result
        .conflicts
        .iter()
        .find(|c| c.risk_tier == RiskTier::Critical)
        .map(|c| c.rule_id.as_str())
        .unwrap_or("unknown");
    Err(EngineError::policy(
        PolicyViolationKind::CriticalSodConflict,
        format!(
            "permission set triggers {} critical SoD conflict(s), first rule '{}'",
            result.critical_count, first
        ),
    ))
}
