//! Navigation tree data model.
//!
//! A page owns one `Menu` node; a menu's children are `Tab`s; a tab's
//! children are `SubTab`s. Requirements are OR-sets: a node with an empty
//! `required_any_of` is public. Evaluation (visibility, redirects) lives in
//! the access crate — nodes here are inert data.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::slug::PermissionSlug;

/// Position of a node in the navigation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationKind {
    Menu,
    Tab,
    SubTab,
}

impl core::fmt::Display for NavigationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NavigationKind::Menu => write!(f, "menu"),
            NavigationKind::Tab => write!(f, "tab"),
            NavigationKind::SubTab => write!(f, "sub_tab"),
        }
    }
}

/// One node of the navigation tree.
///
/// `key` is unique within its parent; `required_any_of` is satisfied by any
/// single exact-match slug; `children` keep their declared order, which is
/// also the redirect preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub kind: NavigationKind,
    pub key: String,
    pub label: String,
    pub required_any_of: BTreeSet<PermissionSlug>,
    pub children: Vec<NavigationNode>,
}

impl NavigationNode {
    pub fn menu(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::node(NavigationKind::Menu, key, label)
    }

    pub fn tab(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::node(NavigationKind::Tab, key, label)
    }

    pub fn sub_tab(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self::node(NavigationKind::SubTab, key, label)
    }

    fn node(kind: NavigationKind, key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            label: label.into(),
            required_any_of: BTreeSet::new(),
            children: Vec::new(),
        }
    }

    /// Add one slug to the OR-requirement set.
    pub fn require(mut self, slug: impl Into<PermissionSlug>) -> Self {
        self.required_any_of.insert(slug.into());
        self
    }

    /// Append a child, preserving declared order.
    pub fn child(mut self, node: NavigationNode) -> Self {
        self.children.push(node);
        self
    }

    /// True when the node carries no requirement of its own.
    pub fn is_public(&self) -> bool {
        self.required_any_of.is_empty()
    }

    /// Child with the given key, if any.
    pub fn child_by_key(&self, key: &str) -> Option<&NavigationNode> {
        self.children.iter().find(|c| c.key == key)
    }

    /// All slugs referenced by this node and its descendants.
    pub fn referenced_slugs(&self) -> BTreeSet<&PermissionSlug> {
        let mut out: BTreeSet<&PermissionSlug> = self.required_any_of.iter().collect();
        for child in &self.children {
            out.extend(child.referenced_slugs());
        }
        out
    }
}

/// A registered page: a routable path plus its menu tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    /// Routable pathname, e.g. `/admin/settings`.
    pub path: String,
    pub menu: NavigationNode,
}

impl sentra_core::Entity for PageEntry {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.path
    }
}

impl sentra_core::ValueObject for NavigationNode {}

impl PageEntry {
    pub fn new(path: impl Into<String>, menu: NavigationNode) -> Self {
        Self {
            path: path.into(),
            menu,
        }
    }

    /// Tabs in declared order.
    pub fn tabs(&self) -> &[NavigationNode] {
        &self.menu.children
    }

    pub fn tab(&self, key: &str) -> Option<&NavigationNode> {
        self.menu.child_by_key(key)
    }
}
