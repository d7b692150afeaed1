//! Access resolver: navigation visibility and safe-location computation.
//!
//! Redirect-before-render: a guard calls [`evaluate_navigation`] and acts on
//! the decision *before* anything is rendered, so restricted content is never
//! transiently exposed. Matching is exact-slug only; an unregistered path
//! passes through untouched for the caller's capability checks.

use serde::Serialize;

use sentra_registry::{NavigationNode, PageEntry, RegistrySnapshot};

use crate::location::{RequestedLocation, ResolvedLocation};
use crate::normalize::PermissionSet;

/// Why a navigation request was terminally denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    /// The page is registered but none of its tabs is allowed.
    NoAllowedTabs,
}

/// Diagnostic payload attached to a terminal deny.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyReason {
    pub kind: DenyKind,
    pub page: String,
    pub message: String,
}

impl DenyReason {
    fn no_allowed_tabs(page: &str) -> Self {
        Self {
            kind: DenyKind::NoAllowedTabs,
            page: page.to_string(),
            message: format!("no tab on page '{page}' is allowed for this permission set"),
        }
    }
}

/// Outcome of [`resolve_safe_location`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SafeLocation {
    /// The path is not registered in the navigation tree; the request passes
    /// through unchanged for capability-based checks by the caller.
    PassThrough,
    /// A location on the registered page that the permission set allows.
    At(ResolvedLocation),
    /// Terminal deny: render the deny page, attempt no further redirect.
    Denied(DenyReason),
}

/// Route-guard decision derived from [`resolve_safe_location`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NavigationDecision {
    /// The requested location is already allowed (or ungoverned).
    Allow,
    /// The requested location is disallowed; go here instead.
    Redirect { target: ResolvedLocation },
    /// Terminal deny.
    Deny { reason: DenyReason },
}

/// Whether a node's own OR-requirement is satisfied (exact match only;
/// empty requirement ⇒ public).
fn satisfied(node: &NavigationNode, perms: &PermissionSet) -> bool {
    node.is_public() || node.required_any_of.iter().any(|slug| perms.contains(slug))
}

fn allowed_children<'a>(node: &'a NavigationNode, perms: &PermissionSet) -> Vec<&'a NavigationNode> {
    node.children.iter().filter(|c| satisfied(c, perms)).collect()
}

/// Tab keys of a page the permission set allows, in registry order.
pub fn allowed_tabs<'a>(
    page_path: &str,
    perms: &PermissionSet,
    snapshot: &'a RegistrySnapshot,
) -> Vec<&'a str> {
    let Some(page) = snapshot.page(page_path) else {
        return Vec::new();
    };
    allowed_children(&page.menu, perms)
        .into_iter()
        .map(|t| t.key.as_str())
        .collect()
}

/// Sub-tab keys under a given tab the permission set allows, in registry order.
pub fn allowed_sub_tabs<'a>(
    page_path: &str,
    tab_key: &str,
    perms: &PermissionSet,
    snapshot: &'a RegistrySnapshot,
) -> Vec<&'a str> {
    let Some(page) = snapshot.page(page_path) else {
        return Vec::new();
    };
    let Some(tab) = page.tab(tab_key) else {
        return Vec::new();
    };
    allowed_children(tab, perms)
        .into_iter()
        .map(|s| s.key.as_str())
        .collect()
}

/// Compute the safe location for a request.
///
/// For a registered page: zero allowed tabs is a terminal deny; a missing or
/// disallowed tab silently redirects to the first allowed tab (registry
/// order) plus its first allowed sub-tab if any; a disallowed sub-tab
/// redirects within the same tab. An already-allowed request comes back
/// unchanged, which makes the function its own fixed point.
pub fn resolve_safe_location(
    request: &RequestedLocation,
    perms: &PermissionSet,
    snapshot: &RegistrySnapshot,
) -> SafeLocation {
    let Some(page) = snapshot.page(&request.pathname) else {
        return SafeLocation::PassThrough;
    };

    let allowed = allowed_children(&page.menu, perms);
    if allowed.is_empty() {
        return SafeLocation::Denied(DenyReason::no_allowed_tabs(&request.pathname));
    }

    let requested_tab = request
        .tab()
        .and_then(|key| allowed.iter().find(|t| t.key == key).copied());

    let (tab, tab_rewritten) = match requested_tab {
        Some(tab) => (tab, false),
        None => (allowed[0], true),
    };

    let allowed_subs = allowed_children(tab, perms);
    let sub_tab = if tab_rewritten {
        // Fresh landing on the tab: pick its first allowed sub-tab if any.
        allowed_subs.first().map(|s| s.key.clone())
    } else {
        match request.sub_tab() {
            Some(requested) if allowed_subs.iter().any(|s| s.key == requested) => {
                Some(requested.to_string())
            }
            Some(_) => allowed_subs.first().map(|s| s.key.clone()),
            None => None,
        }
    };

    SafeLocation::At(ResolvedLocation {
        pathname: request.pathname.clone(),
        tab: Some(tab.key.clone()),
        sub_tab,
        extra: request.extra_params(),
    })
}

/// Single entry point for route guards.
///
/// Wraps [`resolve_safe_location`], diffing the computed safe location
/// against the request. Pure and side-effect-free: identical inputs always
/// produce the identical decision.
pub fn evaluate_navigation(
    request: &RequestedLocation,
    perms: &PermissionSet,
    snapshot: &RegistrySnapshot,
) -> NavigationDecision {
    match resolve_safe_location(request, perms, snapshot) {
        SafeLocation::PassThrough => NavigationDecision::Allow,
        SafeLocation::Denied(reason) => NavigationDecision::Deny { reason },
        SafeLocation::At(resolved) => {
            if resolved.matches_request(request) {
                NavigationDecision::Allow
            } else {
                NavigationDecision::Redirect { target: resolved }
            }
        }
    }
}

/// First allowed landing spot on a page, for building outbound links that
/// never lead into a dead end.
pub fn first_allowed_target(
    page_path: &str,
    perms: &PermissionSet,
    snapshot: &RegistrySnapshot,
) -> Option<ResolvedLocation> {
    let page: &PageEntry = snapshot.page(page_path)?;
    let allowed = allowed_children(&page.menu, perms);
    let tab = allowed.first()?;
    let sub_tab = allowed_children(tab, perms).first().map(|s| s.key.clone());
    Some(ResolvedLocation {
        pathname: page.path.clone(),
        tab: Some(tab.key.clone()),
        sub_tab,
        extra: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sentra_core::Scope;
    use sentra_registry::{NavigationNode, PageEntry, PermissionSlug};

    use crate::normalize::normalize;

    /// `/admin/settings` with a gated security tab and a gated dictionaries
    /// tab that owns two sub-tabs (currency public, holidays gated).
    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::builder(Scope::System)
            .page(PageEntry::new(
                "/admin/settings",
                NavigationNode::menu("settings", "Settings")
                    .child(NavigationNode::tab("security", "Security").require("security.read"))
                    .child(
                        NavigationNode::tab("dictionaries", "Dictionaries")
                            .require("dictionaries.read")
                            .child(NavigationNode::sub_tab("currency", "Currency"))
                            .child(
                                NavigationNode::sub_tab("holidays", "Holidays")
                                    .require("holidays.read"),
                            ),
                    ),
            ))
            .page(PageEntry::new(
                "/admin/tenants",
                NavigationNode::menu("tenants", "Tenants")
                    .child(NavigationNode::tab("list", "All tenants").require("tenants.read")),
            ))
            .build()
            .unwrap()
    }

    fn perms(slugs: &[&str]) -> PermissionSet {
        normalize(slugs.iter().map(|s| PermissionSlug::new(s.to_string()))).unwrap()
    }

    #[test]
    fn unregistered_path_passes_through() {
        let decision = evaluate_navigation(
            &RequestedLocation::new("/reports/daily"),
            &perms(&[]),
            &snapshot(),
        );
        assert_eq!(decision, NavigationDecision::Allow);
    }

    #[test]
    fn empty_set_on_gated_page_is_terminal_deny() {
        // Scenario A: no permission matches any tab requirement.
        let result = resolve_safe_location(
            &RequestedLocation::new("/admin/tenants"),
            &perms(&[]),
            &snapshot(),
        );
        match result {
            SafeLocation::Denied(reason) => {
                assert_eq!(reason.kind, DenyKind::NoAllowedTabs);
                assert_eq!(reason.page, "/admin/tenants");
            }
            other => panic!("expected terminal deny, got {other:?}"),
        }
    }

    #[test]
    fn disallowed_tab_redirects_to_first_allowed_with_sub_tab() {
        // Scenario B: security denied, dictionaries allowed; lands on the
        // first allowed sub-tab in registry order.
        let request = RequestedLocation::new("/admin/settings").with_param("tab", "security");
        let decision = evaluate_navigation(&request, &perms(&["dictionaries.read"]), &snapshot());
        match decision {
            NavigationDecision::Redirect { target } => {
                assert_eq!(target.to_url(), "/admin/settings?tab=dictionaries&subTab=currency");
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn allowed_request_is_unchanged() {
        let request = RequestedLocation::new("/admin/settings").with_param("tab", "security");
        let decision = evaluate_navigation(&request, &perms(&["security.read"]), &snapshot());
        assert_eq!(decision, NavigationDecision::Allow);
    }

    #[test]
    fn disallowed_sub_tab_redirects_within_same_tab() {
        let request = RequestedLocation::new("/admin/settings")
            .with_param("tab", "dictionaries")
            .with_param("subTab", "holidays");
        let decision = evaluate_navigation(&request, &perms(&["dictionaries.read"]), &snapshot());
        match decision {
            NavigationDecision::Redirect { target } => {
                assert_eq!(target.tab.as_deref(), Some("dictionaries"));
                assert_eq!(target.sub_tab.as_deref(), Some("currency"));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn extra_query_params_survive_redirect() {
        let request = RequestedLocation::new("/admin/settings")
            .with_param("tab", "security")
            .with_param("q", "usd");
        let result = resolve_safe_location(&request, &perms(&["dictionaries.read"]), &snapshot());
        match result {
            SafeLocation::At(loc) => {
                assert_eq!(loc.extra.get("q").map(String::as_str), Some("usd"));
            }
            other => panic!("expected resolved location, got {other:?}"),
        }
    }

    #[test]
    fn tab_ordering_follows_registry_declaration() {
        let p = perms(&["security.read", "dictionaries.read"]);
        assert_eq!(
            allowed_tabs("/admin/settings", &p, &snapshot()),
            vec!["security", "dictionaries"]
        );
        assert_eq!(
            allowed_sub_tabs("/admin/settings", "dictionaries", &p, &snapshot()),
            vec!["currency"]
        );
    }

    #[test]
    fn unknown_page_yields_no_allowed_tabs() {
        // Fail-closed: a lookup miss never manufactures an allow.
        let p = perms(&["security.read"]);
        assert!(allowed_tabs("/nope", &p, &snapshot()).is_empty());
        assert!(allowed_sub_tabs("/nope", "security", &p, &snapshot()).is_empty());
        assert!(first_allowed_target("/nope", &p, &snapshot()).is_none());
    }

    #[test]
    fn first_allowed_target_skips_denied_tabs() {
        let target = first_allowed_target("/admin/settings", &perms(&["dictionaries.read"]), &snapshot())
            .unwrap();
        assert_eq!(target.to_url(), "/admin/settings?tab=dictionaries&subTab=currency");
    }

    #[test]
    fn evaluate_navigation_is_deterministic() {
        let request = RequestedLocation::new("/admin/settings").with_param("tab", "security");
        let p = perms(&["dictionaries.read"]);
        let snap = snapshot();
        let first = evaluate_navigation(&request, &p, &snap);
        for _ in 0..10 {
            assert_eq!(evaluate_navigation(&request, &p, &snap), first);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: resolving the resolver's own output is a fixed point.
        #[test]
        fn resolve_converges_in_one_step(
            granted in prop::collection::vec(
                prop::sample::select(vec![
                    "security.read", "dictionaries.read", "holidays.read", "tenants.read",
                ]),
                0..4
            ),
            tab in prop::option::of(prop::sample::select(vec![
                "security", "dictionaries", "bogus",
            ])),
            sub_tab in prop::option::of(prop::sample::select(vec![
                "currency", "holidays", "bogus",
            ])),
        ) {
            let snap = snapshot();
            let p = perms(&granted.iter().map(|s| *s).collect::<Vec<_>>());

            let mut request = RequestedLocation::new("/admin/settings");
            if let Some(tab) = tab {
                request = request.with_param("tab", tab);
            }
            if let Some(sub_tab) = sub_tab {
                request = request.with_param("subTab", sub_tab);
            }

            if let SafeLocation::At(resolved) = resolve_safe_location(&request, &p, &snap) {
                let again = resolve_safe_location(&resolved.to_request(), &p, &snap);
                prop_assert_eq!(again, SafeLocation::At(resolved));
            }
        }
    }
}
