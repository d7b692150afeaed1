//! Permission normalization.
//!
//! Maps a raw permission set into canonical form. Rules are applied
//! independently per input slug and the results unioned:
//!
//! - identity: every slug is kept as-is;
//! - verb alias: a `.view` slug also yields the `.read` form of the same path;
//! - write-implies-read: `.create`/`.update`/`.delete`/`.approve`/`.export`
//!   additionally yield the base path + `.read`.
//!
//! No other inference is permitted — no prefix inheritance and no scope
//! inheritance. Loose matching here would leak privileges everywhere
//! downstream, so the rule set is closed.

use std::collections::BTreeSet;

use sentra_registry::PermissionSlug;

use sentra_core::EngineResult;

/// Deduplicated, canonical permission set held by a principal at evaluation
/// time. Recomputed per request; the engine only ever reads it.
pub type PermissionSet = BTreeSet<PermissionSlug>;

/// Verbs whose grant implies the ability to read the same path.
const READ_IMPLYING_VERBS: [&str; 5] = ["create", "update", "delete", "approve", "export"];

/// Normalize raw slugs into a canonical [`PermissionSet`].
///
/// Every input slug is validated; a malformed slug surfaces as
/// [`sentra_core::EngineError::Validation`] rather than being silently
/// dropped or kept.
pub fn normalize<I, S>(raw: I) -> EngineResult<PermissionSet>
where
    I: IntoIterator<Item = S>,
    S: Into<PermissionSlug>,
{
    let mut out = PermissionSet::new();
    for slug in raw {
        let slug = slug.into();
        slug.validate()?;

        let verb = slug.verb();
        if verb == "view" || READ_IMPLYING_VERBS.contains(&verb) {
            out.insert(slug.with_verb("read"));
        }
        out.insert(slug);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(slugs: &[&str]) -> Vec<PermissionSlug> {
        slugs.iter().map(|s| PermissionSlug::new(s.to_string())).collect()
    }

    fn as_strs(perms: &PermissionSet) -> Vec<&str> {
        perms.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn identity_is_kept() {
        let perms = normalize(set(&["tenants.read"])).unwrap();
        assert_eq!(as_strs(&perms), vec!["tenants.read"]);
    }

    #[test]
    fn view_aliases_to_read() {
        let perms = normalize(set(&["tenants.users.view"])).unwrap();
        assert_eq!(as_strs(&perms), vec!["tenants.users.read", "tenants.users.view"]);
    }

    #[test]
    fn write_verbs_imply_read() {
        for verb in ["create", "update", "delete", "approve", "export"] {
            let perms = normalize([PermissionSlug::new(format!("system.roles.{verb}"))]).unwrap();
            assert!(
                perms.contains(&PermissionSlug::new("system.roles.read")),
                "{verb} should imply read"
            );
            assert_eq!(perms.len(), 2);
        }
    }

    #[test]
    fn read_implies_nothing_further() {
        let perms = normalize(set(&["system.roles.read"])).unwrap();
        assert_eq!(as_strs(&perms), vec!["system.roles.read"]);
    }

    #[test]
    fn no_prefix_inference() {
        // Holding a deep slug never grants its parents.
        let perms = normalize(set(&["system.roles.members.update"])).unwrap();
        assert!(!perms.contains(&PermissionSlug::new("system.roles.read")));
        assert!(perms.contains(&PermissionSlug::new("system.roles.members.read")));
    }

    #[test]
    fn malformed_slug_is_surfaced() {
        assert!(normalize(set(&["tenants.read", "BAD SLUG"])).is_err());
    }

    #[test]
    fn duplicates_collapse() {
        let perms = normalize(set(&["tenants.read", "tenants.read", "tenants.view"])).unwrap();
        assert_eq!(as_strs(&perms), vec!["tenants.read", "tenants.view"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: normalization is idempotent — normalizing an already
        /// canonical set changes nothing.
        #[test]
        fn normalize_is_idempotent(
            segments in prop::collection::vec(("[a-z]{2,8}", "[a-z]{2,8}"), 1..8),
            verbs in prop::collection::vec(
                prop::sample::select(vec![
                    "read", "view", "create", "update", "delete", "approve", "export", "list",
                ]),
                1..8
            )
        ) {
            let raw: Vec<PermissionSlug> = segments
                .iter()
                .zip(verbs.iter())
                .map(|((a, b), verb)| PermissionSlug::new(format!("{a}.{b}.{verb}")))
                .collect();

            let once = normalize(raw).unwrap();
            let twice = normalize(once.clone()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
