//! Immutable registry snapshot, loaded once and never mutated.
//!
//! Persistence hands the engine its catalogs as a read-only snapshot per
//! evaluation. The builder validates every invariant up front so the "pure
//! data, no logic" boundary is enforced by construction: a snapshot that
//! exists is a snapshot that is well-formed.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use sentra_core::{EngineError, EngineResult, Scope};

use crate::catalog::{ActionPermissionDef, RiskWeight, SodRule};
use crate::nav::{NavigationKind, NavigationNode, PageEntry};
use crate::slug::PermissionSlug;
use crate::workflow_def::WorkflowDefinition;

/// Scope-partitioned, immutable bundle of every catalog the engine reads.
///
/// Reload atomically by building a fresh snapshot and swapping the handle;
/// snapshots themselves never change after `build()`. Rehydrating a snapshot
/// from stored catalogs goes through the builder again so the invariants are
/// re-checked, which is why this type serializes but does not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrySnapshot {
    scope: Scope,
    pages: Vec<PageEntry>,
    action_defs: Vec<ActionPermissionDef>,
    sod_rules: Vec<SodRule>,
    risk_weights: Vec<RiskWeight>,
    workflows: Vec<WorkflowDefinition>,

    #[serde(skip)]
    page_index: HashMap<String, usize>,
    #[serde(skip)]
    action_index: HashMap<(String, String), usize>,
}

impl RegistrySnapshot {
    pub fn builder(scope: Scope) -> RegistrySnapshotBuilder {
        RegistrySnapshotBuilder::new(scope)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Pages in declared order.
    pub fn pages(&self) -> &[PageEntry] {
        &self.pages
    }

    /// Exact path lookup; a miss means the path is not governed here.
    pub fn page(&self, path: &str) -> Option<&PageEntry> {
        self.page_index.get(path).map(|&idx| &self.pages[idx])
    }

    /// Address a node by path, then optionally tab key, then sub-tab key.
    ///
    /// Returns the deepest addressed node; any miss along the way is `None`
    /// (fail-closed at the caller).
    pub fn node(&self, path: &str, tab: Option<&str>, sub_tab: Option<&str>) -> Option<&NavigationNode> {
        let page = self.page(path)?;
        let Some(tab_key) = tab else {
            return Some(&page.menu);
        };
        let tab_node = page.tab(tab_key)?;
        let Some(sub_key) = sub_tab else {
            return Some(tab_node);
        };
        tab_node.child_by_key(sub_key)
    }

    /// Exact entity/action lookup.
    pub fn action_def(&self, entity_key: &str, action_key: &str) -> Option<&ActionPermissionDef> {
        self.action_index
            .get(&(entity_key.to_string(), action_key.to_string()))
            .map(|&idx| &self.action_defs[idx])
    }

    pub fn sod_rules(&self) -> &[SodRule] {
        &self.sod_rules
    }

    pub fn risk_weights(&self) -> &[RiskWeight] {
        &self.risk_weights
    }

    /// Workflow definitions in declared order (selection precedence).
    pub fn workflows(&self) -> &[WorkflowDefinition] {
        &self.workflows
    }

    pub fn workflow(&self, key: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|w| w.key == key)
    }

    /// Every slug referenced anywhere in the navigation tree.
    ///
    /// Used to flag granted permissions that match no navigation node.
    pub fn navigation_slugs(&self) -> BTreeSet<&PermissionSlug> {
        let mut out = BTreeSet::new();
        for page in &self.pages {
            out.extend(page.menu.referenced_slugs());
        }
        out
    }
}

/// Validating builder for [`RegistrySnapshot`].
#[derive(Debug)]
pub struct RegistrySnapshotBuilder {
    scope: Scope,
    pages: Vec<PageEntry>,
    action_defs: Vec<ActionPermissionDef>,
    sod_rules: Vec<SodRule>,
    risk_weights: Vec<RiskWeight>,
    workflows: Vec<WorkflowDefinition>,
}

impl RegistrySnapshotBuilder {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            pages: Vec::new(),
            action_defs: Vec::new(),
            sod_rules: Vec::new(),
            risk_weights: Vec::new(),
            workflows: Vec::new(),
        }
    }

    pub fn page(mut self, page: PageEntry) -> Self {
        self.pages.push(page);
        self
    }

    pub fn action_def(mut self, def: ActionPermissionDef) -> Self {
        self.action_defs.push(def);
        self
    }

    pub fn sod_rule(mut self, rule: SodRule) -> Self {
        self.sod_rules.push(rule);
        self
    }

    pub fn risk_weight(mut self, weight: RiskWeight) -> Self {
        self.risk_weights.push(weight);
        self
    }

    pub fn workflow(mut self, def: WorkflowDefinition) -> Self {
        self.workflows.push(def);
        self
    }

    /// Validate every catalog invariant and freeze the snapshot.
    pub fn build(self) -> EngineResult<RegistrySnapshot> {
        let mut page_index: HashMap<String, usize> = HashMap::new();
        for (idx, page) in self.pages.iter().enumerate() {
            if page.path.is_empty() || !page.path.starts_with('/') {
                return Err(EngineError::validation(format!(
                    "page path '{}' must start with '/'",
                    page.path
                )));
            }
            if page_index.insert(page.path.clone(), idx).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate page path '{}'",
                    page.path
                )));
            }
            validate_node(&page.menu, NavigationKind::Menu, &page.path)?;
        }

        let mut action_index: HashMap<(String, String), usize> = HashMap::new();
        for (idx, def) in self.action_defs.iter().enumerate() {
            def.slug.validate()?;
            let key = (def.entity_key.clone(), def.action_key.clone());
            if action_index.insert(key, idx).is_some() {
                return Err(EngineError::validation(format!(
                    "duplicate action definition '{}.{}'",
                    def.entity_key, def.action_key
                )));
            }
        }

        let mut rule_ids: BTreeSet<&str> = BTreeSet::new();
        for rule in &self.sod_rules {
            rule.validate()?;
            if !rule_ids.insert(&rule.id) {
                return Err(EngineError::validation(format!(
                    "duplicate SoD rule id '{}'",
                    rule.id
                )));
            }
        }

        let mut patterns: BTreeSet<&PermissionSlug> = BTreeSet::new();
        for weight in &self.risk_weights {
            weight.validate()?;
            if !patterns.insert(&weight.pattern) {
                return Err(EngineError::validation(format!(
                    "duplicate risk weight pattern '{}'",
                    weight.pattern
                )));
            }
        }

        let mut workflow_keys: BTreeSet<&str> = BTreeSet::new();
        for def in &self.workflows {
            def.validate()?;
            if !workflow_keys.insert(&def.key) {
                return Err(EngineError::validation(format!(
                    "duplicate workflow definition key '{}'",
                    def.key
                )));
            }
        }

        Ok(RegistrySnapshot {
            scope: self.scope,
            pages: self.pages,
            action_defs: self.action_defs,
            sod_rules: self.sod_rules,
            risk_weights: self.risk_weights,
            workflows: self.workflows,
            page_index,
            action_index,
        })
    }
}

fn validate_node(node: &NavigationNode, expected: NavigationKind, path: &str) -> EngineResult<()> {
    if node.kind != expected {
        return Err(EngineError::validation(format!(
            "navigation node '{}' under page '{}' has kind {}, expected {}",
            node.key, path, node.kind, expected
        )));
    }
    if node.key.trim().is_empty() {
        return Err(EngineError::validation(format!(
            "navigation node under page '{}' has an empty key",
            path
        )));
    }
    for slug in &node.required_any_of {
        slug.validate()?;
    }

    let child_kind = match node.kind {
        NavigationKind::Menu => Some(NavigationKind::Tab),
        NavigationKind::Tab => Some(NavigationKind::SubTab),
        NavigationKind::SubTab => None,
    };
    if child_kind.is_none() && !node.children.is_empty() {
        return Err(EngineError::validation(format!(
            "sub-tab '{}' under page '{}' cannot have children",
            node.key, path
        )));
    }

    let mut keys: BTreeSet<&str> = BTreeSet::new();
    for child in &node.children {
        if !keys.insert(&child.key) {
            return Err(EngineError::validation(format!(
                "duplicate navigation key '{}' under '{}' on page '{}'",
                child.key, node.key, path
            )));
        }
        if let Some(kind) = child_kind {
            validate_node(child, kind, path)?;
        }
    }
    Ok(())
}
