//! Role preview: what a permission set will see, before it is saved.
//!
//! Consumed by admin tooling. Everything reported here is advisory — the
//! resolver remains the only authority at navigation time.

use serde::Serialize;

use sentra_registry::{NavigationNode, RegistrySnapshot};

use crate::location::ResolvedLocation;
use crate::normalize::PermissionSet;
use crate::resolver::first_allowed_target;

/// Advisory finding attached to a preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessWarning {
    /// The permission set reaches no menu at all.
    NoAccess,
    /// A granted permission matches no navigation node in this scope.
    OrphanPermission { slug: String },
}

/// Denied navigation item, reported as `path` plus the node key chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeniedItem {
    pub page: String,
    pub tab: String,
    pub sub_tab: Option<String>,
}

/// What a permission set will see across the whole scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessPreview {
    /// Page paths whose menu is visible (own requirement satisfied or a
    /// descendant reachable — visibility bubbles upward, never downward).
    pub visible_menus: Vec<String>,
    /// Allowed tab keys per page, `(page path, tab key)`, registry order.
    pub visible_tabs: Vec<(String, String)>,
    /// Tabs and sub-tabs the set cannot reach.
    pub denied_items: Vec<DeniedItem>,
    pub warnings: Vec<AccessWarning>,
    /// Where this set should land after login, if anywhere.
    pub landing_route: Option<ResolvedLocation>,
}

fn satisfied(node: &NavigationNode, perms: &PermissionSet) -> bool {
    node.is_public() || node.required_any_of.iter().any(|slug| perms.contains(slug))
}

/// Visibility per the navigation invariant: a node is visible iff its own
/// requirement is satisfied or any descendant is reachable.
fn visible(node: &NavigationNode, perms: &PermissionSet) -> bool {
    satisfied(node, perms) || node.children.iter().any(|c| visible(c, perms))
}

/// Compute the full preview for a (normalized) permission set.
pub fn preview(perms: &PermissionSet, snapshot: &RegistrySnapshot) -> AccessPreview {
    let mut visible_menus = Vec::new();
    let mut visible_tabs = Vec::new();
    let mut denied_items = Vec::new();
    let mut landing_route = None;

    for page in snapshot.pages() {
        if visible(&page.menu, perms) {
            visible_menus.push(page.path.clone());
        }

        for tab in page.tabs() {
            if satisfied(tab, perms) {
                visible_tabs.push((page.path.clone(), tab.key.clone()));
                for sub in &tab.children {
                    if !satisfied(sub, perms) {
                        denied_items.push(DeniedItem {
                            page: page.path.clone(),
                            tab: tab.key.clone(),
                            sub_tab: Some(sub.key.clone()),
                        });
                    }
                }
            } else {
                denied_items.push(DeniedItem {
                    page: page.path.clone(),
                    tab: tab.key.clone(),
                    sub_tab: None,
                });
            }
        }

        if landing_route.is_none() {
            landing_route = first_allowed_target(&page.path, perms, snapshot);
        }
    }

    let mut warnings = Vec::new();
    if visible_menus.is_empty() {
        warnings.push(AccessWarning::NoAccess);
    }

    let nav_slugs = snapshot.navigation_slugs();
    for slug in perms {
        if !nav_slugs.contains(slug) {
            warnings.push(AccessWarning::OrphanPermission {
                slug: slug.as_str().to_string(),
            });
        }
    }

    AccessPreview {
        visible_menus,
        visible_tabs,
        denied_items,
        warnings,
        landing_route,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::Scope;
    use sentra_registry::{NavigationNode, PageEntry, PermissionSlug, RegistrySnapshot};

    use crate::normalize::normalize;

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::builder(Scope::Tenant)
            .page(PageEntry::new(
                "/settings",
                NavigationNode::menu("settings", "Settings")
                    .require("settings.read")
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
            .build()
            .unwrap()
    }

    fn perms(slugs: &[&str]) -> PermissionSet {
        normalize(slugs.iter().map(|s| PermissionSlug::new(s.to_string()))).unwrap()
    }

    #[test]
    fn empty_set_reports_no_access() {
        let p = preview(&perms(&[]), &snapshot());
        assert!(p.visible_menus.is_empty());
        assert!(p.visible_tabs.is_empty());
        assert!(p.landing_route.is_none());
        assert!(p.warnings.contains(&AccessWarning::NoAccess));
    }

    #[test]
    fn visibility_bubbles_upward_from_allowed_tab() {
        // The menu's own requirement is unmet, but a reachable tab makes it
        // visible; the reverse (menu grant opening tabs) must not happen.
        let p = preview(&perms(&["dictionaries.read"]), &snapshot());
        assert_eq!(p.visible_menus, vec!["/settings"]);
        assert_eq!(
            p.visible_tabs,
            vec![("/settings".to_string(), "dictionaries".to_string())]
        );
        assert_eq!(
            p.landing_route.unwrap().to_url(),
            "/settings?tab=dictionaries&subTab=currency"
        );
    }

    #[test]
    fn menu_grant_does_not_open_tabs() {
        let p = preview(&perms(&["settings.read"]), &snapshot());
        assert_eq!(p.visible_menus, vec!["/settings"]);
        assert!(p.visible_tabs.is_empty());
        // Every tab is denied, so there is nowhere to land.
        assert!(p.landing_route.is_none());
    }

    #[test]
    fn denied_items_cover_tabs_and_sub_tabs() {
        let p = preview(&perms(&["dictionaries.read"]), &snapshot());
        assert_eq!(
            p.denied_items,
            vec![
                DeniedItem {
                    page: "/settings".to_string(),
                    tab: "security".to_string(),
                    sub_tab: None,
                },
                DeniedItem {
                    page: "/settings".to_string(),
                    tab: "dictionaries".to_string(),
                    sub_tab: Some("holidays".to_string()),
                },
            ]
        );
    }

    #[test]
    fn orphan_permission_is_flagged() {
        let p = preview(&perms(&["billing.export"]), &snapshot());
        // billing.export matches nothing; its normalized read twin is orphaned too.
        assert!(p.warnings.contains(&AccessWarning::OrphanPermission {
            slug: "billing.export".to_string()
        }));
        assert!(p.warnings.contains(&AccessWarning::OrphanPermission {
            slug: "billing.read".to_string()
        }));
    }
}
