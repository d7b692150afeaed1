//! Location types exchanged with route guards.
//!
//! A guard hands the resolver the requested pathname plus parsed query
//! parameters; the resolver hands back a structured location whose `tab` /
//! `subTab` parameters may have been rewritten. Rendering to a URL string is
//! deterministic (sorted extra parameters) so that identical decisions
//! compare equal byte-for-byte.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Query parameter carrying the requested tab.
pub const TAB_PARAM: &str = "tab";
/// Query parameter carrying the requested sub-tab.
pub const SUB_TAB_PARAM: &str = "subTab";

/// An incoming path + query, as seen by a route guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedLocation {
    pub pathname: String,
    pub query: BTreeMap<String, String>,
}

impl RequestedLocation {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn tab(&self) -> Option<&str> {
        self.query.get(TAB_PARAM).map(String::as_str)
    }

    pub fn sub_tab(&self) -> Option<&str> {
        self.query.get(SUB_TAB_PARAM).map(String::as_str)
    }

    /// Query parameters other than the tab/sub-tab selectors.
    pub fn extra_params(&self) -> BTreeMap<String, String> {
        self.query
            .iter()
            .filter(|(k, _)| k.as_str() != TAB_PARAM && k.as_str() != SUB_TAB_PARAM)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A location the resolver has vouched for.
///
/// All non-selector query parameters pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub pathname: String,
    pub tab: Option<String>,
    pub sub_tab: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl ResolvedLocation {
    /// Render as `path?tab=..&subTab=..&rest` with deterministic ordering.
    pub fn to_url(&self) -> String {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(tab) = &self.tab {
            params.push((TAB_PARAM, tab));
        }
        if let Some(sub_tab) = &self.sub_tab {
            params.push((SUB_TAB_PARAM, sub_tab));
        }
        for (k, v) in &self.extra {
            params.push((k, v));
        }

        if params.is_empty() {
            return self.pathname.clone();
        }

        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}?{}", self.pathname, query.join("&"))
    }

    /// The same location expressed as a request (used for fixed-point checks
    /// and for chaining guard evaluations).
    pub fn to_request(&self) -> RequestedLocation {
        let mut query = self.extra.clone();
        if let Some(tab) = &self.tab {
            query.insert(TAB_PARAM.to_string(), tab.clone());
        }
        if let Some(sub_tab) = &self.sub_tab {
            query.insert(SUB_TAB_PARAM.to_string(), sub_tab.clone());
        }
        RequestedLocation {
            pathname: self.pathname.clone(),
            query,
        }
    }

    /// Whether this location is byte-identical to what was requested.
    pub fn matches_request(&self, request: &RequestedLocation) -> bool {
        self.pathname == request.pathname
            && self.tab.as_deref() == request.tab()
            && self.sub_tab.as_deref() == request.sub_tab()
            && self.extra == request.extra_params()
    }
}
