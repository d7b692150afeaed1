//! Workflow definition templates.
//!
//! Definitions are static data: ordered approval stages, expiry/escalation
//! windows, and trigger conditions that decide whether a definition applies
//! to a candidate change at all. The workflow engine consumes these; nothing
//! here mutates or decides on live requests.

use serde::{Deserialize, Serialize};

use sentra_core::{EngineError, EngineResult, PrincipalId};

use crate::slug::PermissionSlug;

/// How a request's stages gather decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalType {
    /// Stages must be satisfied in declared order; a later stage's decision
    /// is void while an earlier stage is still pending.
    Sequential,
    /// Stages gather decisions in any order; the request approves once every
    /// stage has met its threshold.
    Parallel,
}

/// Who may decide at a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverSelector {
    /// Any principal holding the named role.
    ByRole(String),
    /// A specific principal.
    ByUser(PrincipalId),
    /// Any principal holding the permission slug.
    ByPermission(PermissionSlug),
}

impl ApproverSelector {
    /// Whether a principal with the given roles/permissions is designated by
    /// this selector. Exact match only, like every other check in the engine.
    pub fn matches(
        &self,
        principal: PrincipalId,
        roles: &[String],
        perms: &std::collections::BTreeSet<PermissionSlug>,
    ) -> bool {
        match self {
            ApproverSelector::ByRole(role) => roles.iter().any(|r| r == role),
            ApproverSelector::ByUser(user) => *user == principal,
            ApproverSelector::ByPermission(slug) => perms.contains(slug),
        }
    }
}

/// One approval stage of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    pub selector: ApproverSelector,
    pub required_approvals: u32,
}

impl WorkflowStage {
    pub fn new(name: impl Into<String>, selector: ApproverSelector, required_approvals: u32) -> Self {
        Self {
            name: name.into(),
            selector,
            required_approvals,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::validation("workflow stage name cannot be empty"));
        }
        if self.required_approvals == 0 {
            return Err(EngineError::validation(format!(
                "workflow stage '{}' must require at least one approval",
                self.name
            )));
        }
        if let ApproverSelector::ByPermission(slug) = &self.selector {
            slug.validate()?;
        }
        Ok(())
    }
}

/// Field of a candidate change a trigger condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerField {
    EntityType,
    Action,
    RiskLevel,
    RiskScore,
    SodConflictCount,
}

/// Comparison operator of a trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
}

/// Comparison operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerValue {
    Text(String),
    Number(i64),
}

/// Candidate change snapshot the trigger conditions are evaluated against.
///
/// The orchestrator fills this in from the screening results (risk scorer,
/// SoD validator) before asking which workflow applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeContext {
    pub entity_type: String,
    pub action: String,
    /// Qualitative band as reported by the risk scorer ("LOW"/"MEDIUM"/"HIGH").
    pub risk_level: String,
    pub risk_score: i64,
    pub sod_conflict_count: i64,
}

/// One field/operator/value predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub field: TriggerField,
    pub operator: TriggerOperator,
    pub value: TriggerValue,
}

impl TriggerCondition {
    pub fn new(field: TriggerField, operator: TriggerOperator, value: TriggerValue) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    /// Evaluate against a candidate change.
    ///
    /// Type mismatches (ordering a text field, comparing text to a number)
    /// evaluate to `false` — a misconfigured condition must never widen the
    /// set of changes a workflow skips.
    pub fn matches(&self, ctx: &ChangeContext) -> bool {
        match self.field {
            TriggerField::EntityType => self.match_text(&ctx.entity_type),
            TriggerField::Action => self.match_text(&ctx.action),
            TriggerField::RiskLevel => self.match_text(&ctx.risk_level),
            TriggerField::RiskScore => self.match_number(ctx.risk_score),
            TriggerField::SodConflictCount => self.match_number(ctx.sod_conflict_count),
        }
    }

    fn match_text(&self, actual: &str) -> bool {
        let TriggerValue::Text(expected) = &self.value else {
            return false;
        };
        match self.operator {
            TriggerOperator::Equals => actual == expected,
            TriggerOperator::NotEquals => actual != expected,
            TriggerOperator::GreaterThan | TriggerOperator::LessThan => false,
        }
    }

    fn match_number(&self, actual: i64) -> bool {
        let TriggerValue::Number(expected) = &self.value else {
            return false;
        };
        match self.operator {
            TriggerOperator::Equals => actual == *expected,
            TriggerOperator::NotEquals => actual != *expected,
            TriggerOperator::GreaterThan => actual > *expected,
            TriggerOperator::LessThan => actual < *expected,
        }
    }
}

/// Static workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub key: String,
    pub name: String,
    pub approval_type: ApprovalType,
    /// Ordered stages; order is the sequential satisfaction order.
    pub stages: Vec<WorkflowStage>,
    pub auto_expire_days: u32,
    pub escalation_after_hours: u32,
    /// All conditions must hold for the definition to apply. An empty list
    /// means the definition applies unconditionally.
    pub trigger_conditions: Vec<TriggerCondition>,
}

impl WorkflowDefinition {
    pub fn validate(&self) -> EngineResult<()> {
        if self.key.trim().is_empty() {
            return Err(EngineError::validation("workflow definition key cannot be empty"));
        }
        if self.stages.is_empty() {
            return Err(EngineError::validation(format!(
                "workflow definition '{}' must declare at least one stage",
                self.key
            )));
        }
        if self.auto_expire_days == 0 {
            return Err(EngineError::validation(format!(
                "workflow definition '{}' must auto-expire after at least one day",
                self.key
            )));
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(())
    }

    /// Whether this workflow gates the given candidate change.
    pub fn applies_to(&self, ctx: &ChangeContext) -> bool {
        self.trigger_conditions.iter().all(|c| c.matches(ctx))
    }

    /// Total approvals needed across all stages.
    pub fn total_required_approvals(&self) -> u32 {
        self.stages.iter().map(|s| s.required_approvals).sum()
    }
}
