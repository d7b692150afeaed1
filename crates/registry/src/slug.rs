use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use sentra_core::{EngineError, EngineResult};

/// Canonical permission identifier.
///
/// Permissions are modeled as opaque dot-delimited strings (e.g.
/// "system.roles.approve"). Uniqueness is global within a scope; no hierarchy
/// is inferred from the dots. The only sanctioned inference over slugs is the
/// normalizer's verb aliasing — slugs themselves are exact-match values and
/// are immutable once referenced by a role or rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSlug(Cow<'static, str>);

impl PermissionSlug {
    /// Wrap a slug without validating it.
    ///
    /// Registry builders validate every slug at `build()`; use [`parse`] for
    /// untrusted input.
    ///
    /// [`parse`]: PermissionSlug::parse
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Parse and validate a slug from untrusted input.
    pub fn parse(raw: impl Into<Cow<'static, str>>) -> EngineResult<Self> {
        let slug = Self(raw.into());
        slug.validate()?;
        Ok(slug)
    }

    /// Check well-formedness: at least two non-empty dot-delimited segments,
    /// each limited to `[a-z0-9_-]`.
    pub fn validate(&self) -> EngineResult<()> {
        let segments: Vec<&str> = self.0.split('.').collect();
        if segments.len() < 2 {
            return Err(EngineError::validation(format!(
                "malformed permission slug '{}': expected at least two dot-delimited segments",
                self.0
            )));
        }
        for segment in segments {
            if segment.is_empty() {
                return Err(EngineError::validation(format!(
                    "malformed permission slug '{}': empty segment",
                    self.0
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            {
                return Err(EngineError::validation(format!(
                    "malformed permission slug '{}': segment '{}' has characters outside [a-z0-9_-]",
                    self.0, segment
                )));
            }
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final dot-delimited segment (the action verb).
    pub fn verb(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or("")
    }

    /// Everything before the final segment.
    pub fn base(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Same base path with a different final verb.
    pub fn with_verb(&self, verb: &str) -> Self {
        Self(Cow::Owned(format!("{}.{}", self.base(), verb)))
    }
}

impl core::fmt::Display for PermissionSlug {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for PermissionSlug {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl sentra_core::ValueObject for PermissionSlug {}
