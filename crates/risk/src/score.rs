use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use sentra_registry::{PermissionSlug, RiskWeight};

/// Fixed penalty added when the set carries any SoD conflict.
pub const SOD_CONFLICT_PENALTY: u32 = 30;

/// Scores are clamped to this ceiling.
pub const MAX_SCORE: u32 = 100;

/// Maximum number of reasons reported, to bound UI payload size without
/// losing the dominant risk drivers.
pub const MAX_REASONS: usize = 5;

/// Qualitative band of a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    /// Banding: ≤30 LOW, 31–70 MEDIUM, >70 HIGH.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=30 => RiskBand::Low,
            31..=70 => RiskBand::Medium,
            _ => RiskBand::High,
        }
    }
}

impl core::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RiskBand::Low => write!(f, "LOW"),
            RiskBand::Medium => write!(f, "MEDIUM"),
            RiskBand::High => write!(f, "HIGH"),
        }
    }
}

/// One dominant risk driver: the heaviest matched slug of its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskReason {
    pub category: String,
    pub slug: PermissionSlug,
    pub weight: u8,
}

/// Scoring result for one permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskScore {
    pub score: u8,
    pub level: RiskBand,
    /// At most [`MAX_REASONS`] entries, one per category, heaviest first.
    pub reasons: Vec<RiskReason>,
}

impl RiskScore {
    /// Only HIGH-band sets are forced through the approval workflow.
    pub fn requires_approval(&self) -> bool {
        self.level == RiskBand::High
    }
}

/// Score a permission set against the weight catalog.
///
/// Sum of exact-match weights, plus [`SOD_CONFLICT_PENALTY`] when the caller
/// reports conflicts, clamped to [`MAX_SCORE`]. Reasons are deduplicated by
/// category (keeping the heaviest), sorted by weight descending then
/// category, and truncated to the top [`MAX_REASONS`].
pub fn calculate_score(
    perms: &BTreeSet<PermissionSlug>,
    has_sod_conflicts: bool,
    weights: &[RiskWeight],
) -> RiskScore {
    let mut total: u32 = 0;
    let mut per_category: BTreeMap<&str, &RiskWeight> = BTreeMap::new();

    for weight in weights {
        if !perms.contains(&weight.pattern) {
            continue;
        }
        total += u32::from(weight.weight);
        per_category
            .entry(weight.category.as_str())
            .and_modify(|current| {
                if weight.weight > current.weight {
                    *current = weight;
                }
            })
            .or_insert(weight);
    }

    if has_sod_conflicts {
        total += SOD_CONFLICT_PENALTY;
    }

    let score = total.min(MAX_SCORE) as u8;

    let mut reasons: Vec<RiskReason> = per_category
        .into_values()
        .map(|w| RiskReason {
            category: w.category.clone(),
            slug: w.pattern.clone(),
            weight: w.weight,
        })
        .collect();
    reasons.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.category.cmp(&b.category)));
    reasons.truncate(MAX_REASONS);

    RiskScore {
        score,
        level: RiskBand::from_score(score),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slugs(names: &[&str]) -> BTreeSet<PermissionSlug> {
        names.iter().map(|s| PermissionSlug::new(s.to_string())).collect()
    }

    fn weight(pattern: &str, weight: u8, category: &str) -> RiskWeight {
        RiskWeight::new(PermissionSlug::new(pattern.to_string()), weight, category)
    }

    fn catalog() -> Vec<RiskWeight> {
        vec![
            weight("system.users.delete", 20, "destructive"),
            weight("system.roles.update", 15, "privilege"),
            weight("system.roles.approve", 18, "privilege"),
            weight("reports.export", 10, "data-egress"),
            weight("tenants.read", 1, "read"),
        ]
    }

    #[test]
    fn unmatched_set_scores_zero_low() {
        let score = calculate_score(&slugs(&["billing.read"]), false, &catalog());
        assert_eq!(score.score, 0);
        assert_eq!(score.level, RiskBand::Low);
        assert!(score.reasons.is_empty());
        assert!(!score.requires_approval());
    }

    #[test]
    fn exact_match_only_no_prefix_credit() {
        // Holding a sibling verb must not pick up the weight.
        let score = calculate_score(&slugs(&["system.users.read"]), false, &catalog());
        assert_eq!(score.score, 0);
    }

    #[test]
    fn weights_sum_and_penalty_applies() {
        let perms = slugs(&["system.users.delete", "reports.export"]);
        let without = calculate_score(&perms, false, &catalog());
        assert_eq!(without.score, 30);
        assert_eq!(without.level, RiskBand::Low);

        let with = calculate_score(&perms, true, &catalog());
        assert_eq!(with.score, 60);
        assert_eq!(with.level, RiskBand::Medium);
    }

    #[test]
    fn band_boundaries_are_exact() {
        assert_eq!(RiskBand::from_score(30), RiskBand::Low);
        assert_eq!(RiskBand::from_score(31), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(70), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(71), RiskBand::High);
    }

    #[test]
    fn score_clamps_at_one_hundred() {
        let weights: Vec<RiskWeight> = (0..10)
            .map(|i| weight(&format!("module{i}.entity.delete"), 20, &format!("cat{i}")))
            .collect();
        let perms: BTreeSet<PermissionSlug> = weights.iter().map(|w| w.pattern.clone()).collect();
        let score = calculate_score(&perms, true, &weights);
        assert_eq!(score.score, 100);
        assert_eq!(score.level, RiskBand::High);
        assert!(score.requires_approval());
    }

    #[test]
    fn reasons_dedupe_by_category_keeping_heaviest() {
        let perms = slugs(&["system.roles.update", "system.roles.approve", "tenants.read"]);
        let score = calculate_score(&perms, false, &catalog());
        let privilege: Vec<&RiskReason> = score
            .reasons
            .iter()
            .filter(|r| r.category == "privilege")
            .collect();
        assert_eq!(privilege.len(), 1);
        assert_eq!(privilege[0].weight, 18);
        assert_eq!(privilege[0].slug.as_str(), "system.roles.approve");
    }

    #[test]
    fn reasons_sorted_descending_and_truncated() {
        let weights: Vec<RiskWeight> = (0..8)
            .map(|i| weight(&format!("module{i}.entity.update"), (i + 2) as u8, &format!("cat{i}")))
            .collect();
        let perms: BTreeSet<PermissionSlug> = weights.iter().map(|w| w.pattern.clone()).collect();
        let score = calculate_score(&perms, false, &weights);

        assert_eq!(score.reasons.len(), MAX_REASONS);
        let reported: Vec<u8> = score.reasons.iter().map(|r| r.weight).collect();
        assert_eq!(reported, vec![9, 8, 7, 6, 5]);
    }

    #[test]
    fn penalty_alone_stays_low_band() {
        // 30 points exactly is still LOW; the band flips at 31.
        let score = calculate_score(&slugs(&[]), true, &catalog());
        assert_eq!(score.score, 30);
        assert_eq!(score.level, RiskBand::Low);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the score is always within 0..=100 and its band always
        /// agrees with the banding function.
        #[test]
        fn score_is_clamped_and_banded(
            held in prop::collection::btree_set(0usize..10, 0..10),
            conflicts in any::<bool>(),
        ) {
            let weights: Vec<RiskWeight> = (0..10)
                .map(|i| weight(&format!("module{i}.entity.delete"), 20, &format!("cat{i}")))
                .collect();
            let perms: BTreeSet<PermissionSlug> = held
                .iter()
                .map(|i| weights[*i].pattern.clone())
                .collect();

            let score = calculate_score(&perms, conflicts, &weights);
            prop_assert!(score.score <= 100);
            prop_assert_eq!(score.level, RiskBand::from_score(score.score));
            prop_assert!(score.reasons.len() <= MAX_REASONS);
        }
    }
}
