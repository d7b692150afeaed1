//! Approval request aggregate (pure state machine).
//!
//! This module implements the lifecycle of a gated mutation with strict
//! 4-eyes enforcement: the initiator can never appear among the approvers,
//! checked at creation and again at submission, not merely at decision time.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sentra_core::{
    Aggregate, AggregateId, AggregateRoot, EngineError, PolicyViolationKind, PrincipalId, Scope,
    TenantId,
};
use sentra_events::Event;
use sentra_registry::{ApprovalType, ApproverSelector, PermissionSlug, WorkflowDefinition};

// ─────────────────────────────────────────────────────────────────────────────
// Approval Request ID
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of an approval request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalRequestId(pub AggregateId);

impl ApprovalRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn as_aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl ApprovalStatus {
    /// Terminal states accept no further transitions; requests in them are
    /// archived, never deleted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::Cancelled
                | ApprovalStatus::Expired
        )
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ApprovalStatus::Draft => write!(f, "DRAFT"),
            ApprovalStatus::PendingApproval => write!(f, "PENDING_APPROVAL"),
            ApprovalStatus::Approved => write!(f, "APPROVED"),
            ApprovalStatus::Rejected => write!(f, "REJECTED"),
            ApprovalStatus::Cancelled => write!(f, "CANCELLED"),
            ApprovalStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supporting types
// ─────────────────────────────────────────────────────────────────────────────

/// Identity material of an actor at the moment of a command.
///
/// Supplied complete and upfront by the identity collaborator; the aggregate
/// never fetches roles or permissions itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub principal: PrincipalId,
    pub roles: Vec<String>,
    pub permissions: BTreeSet<PermissionSlug>,
}

impl ActorSnapshot {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            roles: Vec::new(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_permission(mut self, slug: impl Into<PermissionSlug>) -> Self {
        self.permissions.insert(slug.into());
        self
    }

    fn matches(&self, selector: &ApproverSelector) -> bool {
        selector.matches(self.principal, &self.roles, &self.permissions)
    }
}

/// An approve/reject verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionVerdict {
    Approve,
    Reject,
}

/// A recorded approver decision. One entry per approver: a later decision by
/// the same approver overwrites the earlier one (idempotent), while the
/// timeline keeps every occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverDecision {
    pub approver: PrincipalId,
    pub verdict: DecisionVerdict,
    pub stage_index: usize,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Progress of a single workflow stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub name: String,
    pub selector: ApproverSelector,
    pub required_approvals: u32,
    pub approved_by: BTreeSet<PrincipalId>,
}

impl StageProgress {
    pub fn satisfied(&self) -> bool {
        self.approved_by.len() as u32 >= self.required_approvals
    }
}

/// Kind of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Opened,
    Submitted,
    Decision,
    Approved,
    Rejected,
    Cancelled,
    Expired,
    Escalated,
}

/// Append-only audit record of everything that happened to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub actor: Option<PrincipalId>,
    pub kind: TimelineKind,
    pub detail: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Approval request aggregate.
///
/// # Invariants
/// - `requested_by` never appears in `approvers` (4-eyes), enforced at open
///   and submit, and again defensively at decision time.
/// - Terminal states accept no transitions.
/// - `timeline` is append-only; every applied event adds exactly one entry.
/// - Sequential workflows satisfy stages in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    id: ApprovalRequestId,
    scope: Scope,
    tenant_id: Option<TenantId>,
    entity_type: String,
    entity_id: String,
    action: String,
    status: ApprovalStatus,
    requested_by: PrincipalId,
    workflow_key: String,
    approval_type: ApprovalType,
    stages: Vec<StageProgress>,
    approvers: Vec<ApproverDecision>,
    risk_score: u8,
    sod_conflict_count: u32,
    timeline: Vec<TimelineEntry>,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    escalation_after_hours: u32,
    escalated: bool,
    version: u64,
    created: bool,
}

impl ApprovalRequest {
    /// Create an empty, not-yet-created instance for rehydration.
    pub fn empty(id: ApprovalRequestId) -> Self {
        Self {
            id,
            scope: Scope::System,
            tenant_id: None,
            entity_type: String::new(),
            entity_id: String::new(),
            action: String::new(),
            status: ApprovalStatus::Draft,
            requested_by: PrincipalId::from_uuid(uuid::Uuid::nil()),
            workflow_key: String::new(),
            approval_type: ApprovalType::Parallel,
            stages: Vec::new(),
            approvers: Vec::new(),
            risk_score: 0,
            sod_conflict_count: 0,
            timeline: Vec::new(),
            created_at: DateTime::<Utc>::MIN_UTC,
            submitted_at: None,
            expires_at: DateTime::<Utc>::MIN_UTC,
            escalation_after_hours: 0,
            escalated: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ApprovalRequestId {
        self.id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn requested_by(&self) -> PrincipalId {
        self.requested_by
    }

    pub fn approval_type(&self) -> ApprovalType {
        self.approval_type
    }

    pub fn stages(&self) -> &[StageProgress] {
        &self.stages
    }

    pub fn approvers(&self) -> &[ApproverDecision] {
        &self.approvers
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn risk_score(&self) -> u8 {
        self.risk_score
    }

    pub fn sod_conflict_count(&self) -> u32 {
        self.sod_conflict_count
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn escalated(&self) -> bool {
        self.escalated
    }

    /// Approvals received across all stages.
    pub fn current_approvals(&self) -> u32 {
        self.stages.iter().map(|s| s.approved_by.len() as u32).sum()
    }

    /// Approvals required across all stages.
    pub fn required_approvals(&self) -> u32 {
        self.stages.iter().map(|s| s.required_approvals).sum()
    }

    fn ensure_created(&self) -> Result<(), EngineError> {
        if !self.created {
            return Err(EngineError::NotFound);
        }
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), EngineError> {
        if self.status != ApprovalStatus::PendingApproval {
            return Err(EngineError::invariant(format!(
                "request is {} — only PENDING_APPROVAL accepts this transition",
                self.status
            )));
        }
        Ok(())
    }

    /// 4-eyes: the requester must not be designated by any stage selector.
    fn ensure_four_eyes(
        requester: &ActorSnapshot,
        stages: &[StageProgress],
    ) -> Result<(), EngineError> {
        for stage in stages {
            if requester.matches(&stage.selector) {
                return Err(EngineError::policy(
                    PolicyViolationKind::FourEyes,
                    format!(
                        "requester {} is an eligible approver for stage '{}'",
                        requester.principal, stage.name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Index of the first stage that has not met its threshold.
    fn first_unsatisfied_stage(&self) -> Option<usize> {
        self.stages.iter().position(|s| !s.satisfied())
    }
}

impl AggregateRoot for ApprovalRequest {
    type Id = ApprovalRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Command to stage a gated mutation as a draft request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub request_id: ApprovalRequestId,
    pub scope: Scope,
    pub tenant_id: Option<TenantId>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub requester: ActorSnapshot,
    pub definition: WorkflowDefinition,
    pub risk_score: u8,
    pub sod_conflict_count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command to submit a draft for approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub request_id: ApprovalRequestId,
    /// Fresh identity snapshot; roles may have changed since the draft was
    /// opened, so 4-eyes is re-checked here.
    pub requester: ActorSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command to record an approver's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecideRequest {
    pub request_id: ApprovalRequestId,
    pub approver: ActorSnapshot,
    pub verdict: DecisionVerdict,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command to cancel a request (requester only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub request_id: ApprovalRequestId,
    pub actor: PrincipalId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command issued by the scheduler when a pending request outlives its window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireRequest {
    pub request_id: ApprovalRequestId,
    pub now: DateTime<Utc>,
}

/// Command issued by the scheduler to broadcast an escalation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateRequest {
    pub request_id: ApprovalRequestId,
    pub now: DateTime<Utc>,
}

/// All approval request commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalCommand {
    Open(OpenRequest),
    Submit(SubmitRequest),
    Decide(DecideRequest),
    Cancel(CancelRequest),
    Expire(ExpireRequest),
    Escalate(EscalateRequest),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Event emitted when a draft request is staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOpened {
    pub request_id: ApprovalRequestId,
    pub scope: Scope,
    pub tenant_id: Option<TenantId>,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub requested_by: PrincipalId,
    pub workflow_key: String,
    pub approval_type: ApprovalType,
    pub stages: Vec<StageProgress>,
    pub risk_score: u8,
    pub sod_conflict_count: u32,
    pub expires_at: DateTime<Utc>,
    pub escalation_after_hours: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted when a draft enters the approval pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmitted {
    pub request_id: ApprovalRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted for every recorded approver decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecorded {
    pub request_id: ApprovalRequestId,
    pub approver: PrincipalId,
    pub stage_index: usize,
    pub verdict: DecisionVerdict,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted when every stage has met its threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproved {
    pub request_id: ApprovalRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted when any single rejection terminates the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub request_id: ApprovalRequestId,
    pub rejected_by: PrincipalId,
    pub comment: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted when the requester withdraws a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCancelled {
    pub request_id: ApprovalRequestId,
    pub cancelled_by: PrincipalId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted when the scheduler expires a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestExpired {
    pub request_id: ApprovalRequestId,
    pub occurred_at: DateTime<Utc>,
}

/// Event emitted to notify alternate approvers of a stalled request.
///
/// Escalation never changes status; the request stays PENDING_APPROVAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRaised {
    pub request_id: ApprovalRequestId,
    pub stalled_stage_index: usize,
    pub occurred_at: DateTime<Utc>,
}

/// All approval request events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalEvent {
    Opened(RequestOpened),
    Submitted(RequestSubmitted),
    DecisionRecorded(DecisionRecorded),
    Approved(RequestApproved),
    Rejected(RequestRejected),
    Cancelled(RequestCancelled),
    Expired(RequestExpired),
    EscalationRaised(EscalationRaised),
}

impl Event for ApprovalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ApprovalEvent::Opened(_) => "workflow.request.opened",
            ApprovalEvent::Submitted(_) => "workflow.request.submitted",
            ApprovalEvent::DecisionRecorded(_) => "workflow.request.decision_recorded",
            ApprovalEvent::Approved(_) => "workflow.request.approved",
            ApprovalEvent::Rejected(_) => "workflow.request.rejected",
            ApprovalEvent::Cancelled(_) => "workflow.request.cancelled",
            ApprovalEvent::Expired(_) => "workflow.request.expired",
            ApprovalEvent::EscalationRaised(_) => "workflow.request.escalation_raised",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ApprovalEvent::Opened(e) => e.occurred_at,
            ApprovalEvent::Submitted(e) => e.occurred_at,
            ApprovalEvent::DecisionRecorded(e) => e.occurred_at,
            ApprovalEvent::Approved(e) => e.occurred_at,
            ApprovalEvent::Rejected(e) => e.occurred_at,
            ApprovalEvent::Cancelled(e) => e.occurred_at,
            ApprovalEvent::Expired(e) => e.occurred_at,
            ApprovalEvent::EscalationRaised(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for ApprovalRequest {
    type Command = ApprovalCommand;
    type Event = ApprovalEvent;
    type Error = EngineError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ApprovalEvent::Opened(e) => self.apply_opened(e),
            ApprovalEvent::Submitted(e) => self.apply_submitted(e),
            ApprovalEvent::DecisionRecorded(e) => self.apply_decision_recorded(e),
            ApprovalEvent::Approved(e) => self.apply_approved(e),
            ApprovalEvent::Rejected(e) => self.apply_rejected(e),
            ApprovalEvent::Cancelled(e) => self.apply_cancelled(e),
            ApprovalEvent::Expired(e) => self.apply_expired(e),
            ApprovalEvent::EscalationRaised(e) => self.apply_escalation_raised(e),
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ApprovalCommand::Open(cmd) => self.handle_open(cmd),
            ApprovalCommand::Submit(cmd) => self.handle_submit(cmd),
            ApprovalCommand::Decide(cmd) => self.handle_decide(cmd),
            ApprovalCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ApprovalCommand::Expire(cmd) => self.handle_expire(cmd),
            ApprovalCommand::Escalate(cmd) => self.handle_escalate(cmd),
        }
    }
}

impl ApprovalRequest {
    // ─────────────────────────────────────────────────────────────────────────
    // Command Handlers
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_open(&self, cmd: &OpenRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        if self.created {
            return Err(EngineError::invariant("request already exists"));
        }

        cmd.definition.validate()?;

        if cmd.entity_type.trim().is_empty() || cmd.action.trim().is_empty() {
            return Err(EngineError::validation(
                "entity_type and action cannot be empty",
            ));
        }

        match (cmd.scope, cmd.tenant_id) {
            (Scope::Tenant, None) => {
                return Err(EngineError::validation(
                    "tenant-scope request requires a tenant id",
                ));
            }
            (Scope::System, Some(_)) => {
                return Err(EngineError::validation(
                    "system-scope request cannot carry a tenant id",
                ));
            }
            _ => {}
        }

        let stages: Vec<StageProgress> = cmd
            .definition
            .stages
            .iter()
            .map(|s| StageProgress {
                name: s.name.clone(),
                selector: s.selector.clone(),
                required_approvals: s.required_approvals,
                approved_by: BTreeSet::new(),
            })
            .collect();

        // 4-eyes is a creation-time invariant, not merely a decision-time one.
        Self::ensure_four_eyes(&cmd.requester, &stages)?;

        let expires_at = cmd.occurred_at + Duration::days(i64::from(cmd.definition.auto_expire_days));

        Ok(vec![ApprovalEvent::Opened(RequestOpened {
            request_id: cmd.request_id,
            scope: cmd.scope,
            tenant_id: cmd.tenant_id,
            entity_type: cmd.entity_type.clone(),
            entity_id: cmd.entity_id.clone(),
            action: cmd.action.clone(),
            requested_by: cmd.requester.principal,
            workflow_key: cmd.definition.key.clone(),
            approval_type: cmd.definition.approval_type,
            stages,
            risk_score: cmd.risk_score,
            sod_conflict_count: cmd.sod_conflict_count,
            expires_at,
            escalation_after_hours: cmd.definition.escalation_after_hours,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        self.ensure_created()?;

        if self.status != ApprovalStatus::Draft {
            return Err(EngineError::invariant(format!(
                "request is {} — only DRAFT can be submitted",
                self.status
            )));
        }

        if cmd.requester.principal != self.requested_by {
            return Err(EngineError::policy(
                PolicyViolationKind::NotRequester,
                "only the original requester may submit",
            ));
        }

        // Re-check 4-eyes with the fresh identity snapshot: role grants since
        // the draft was opened must not turn the requester into an approver.
        Self::ensure_four_eyes(&cmd.requester, &self.stages)?;

        Ok(vec![ApprovalEvent::Submitted(RequestSubmitted {
            request_id: cmd.request_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decide(&self, cmd: &DecideRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        self.ensure_created()?;

        if self.status.is_terminal() {
            // Duplicate-decision acknowledgment: the same approver repeating
            // the decision that already concluded is a no-op, not an error.
            let duplicate = self.approvers.iter().any(|d| {
                d.approver == cmd.approver.principal && d.verdict == cmd.verdict
            });
            if duplicate {
                return Ok(vec![]);
            }
            return Err(EngineError::invariant(format!(
                "request is {} — no further decisions are accepted",
                self.status
            )));
        }

        self.ensure_pending()?;

        if cmd.approver.principal == self.requested_by {
            return Err(EngineError::policy(
                PolicyViolationKind::FourEyes,
                "the requester cannot decide on their own request",
            ));
        }

        let eligible: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| cmd.approver.matches(&s.selector))
            .map(|(idx, _)| idx)
            .collect();

        if eligible.is_empty() {
            return Err(EngineError::policy(
                PolicyViolationKind::NotDesignatedApprover,
                format!(
                    "{} is not a designated approver for any stage",
                    cmd.approver.principal
                ),
            ));
        }

        match cmd.verdict {
            DecisionVerdict::Reject => self.decide_reject(cmd, eligible[0]),
            DecisionVerdict::Approve => self.decide_approve(cmd, &eligible),
        }
    }

    /// Any single rejection terminates the request; stage completion is not
    /// required. A non-empty comment is mandatory.
    fn decide_reject(
        &self,
        cmd: &DecideRequest,
        stage_index: usize,
    ) -> Result<Vec<ApprovalEvent>, EngineError> {
        let comment = cmd
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| EngineError::validation("rejection requires a non-empty comment"))?;

        Ok(vec![
            ApprovalEvent::DecisionRecorded(DecisionRecorded {
                request_id: cmd.request_id,
                approver: cmd.approver.principal,
                stage_index,
                verdict: DecisionVerdict::Reject,
                comment: Some(comment.to_string()),
                occurred_at: cmd.occurred_at,
            }),
            ApprovalEvent::Rejected(RequestRejected {
                request_id: cmd.request_id,
                rejected_by: cmd.approver.principal,
                comment: comment.to_string(),
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn decide_approve(
        &self,
        cmd: &DecideRequest,
        eligible: &[usize],
    ) -> Result<Vec<ApprovalEvent>, EngineError> {
        let target = match self.approval_type {
            ApprovalType::Sequential => {
                // Stages satisfy in declared order: the only stage currently
                // accepting approvals is the first unsatisfied one. A decision
                // for a later stage is void while an earlier one is pending.
                let current = self
                    .first_unsatisfied_stage()
                    .ok_or_else(|| EngineError::invariant("no unsatisfied stage remains"))?;
                if eligible.contains(&current) {
                    current
                } else if let Some(&earlier) = eligible.iter().find(|&&idx| idx < current) {
                    // Re-recording against an already satisfied earlier stage
                    // is idempotent and changes no counts.
                    earlier
                } else {
                    return Err(EngineError::invariant(format!(
                        "stage '{}' is still pending — a later-stage decision is void",
                        self.stages[current].name
                    )));
                }
            }
            ApprovalType::Parallel => *eligible
                .iter()
                .find(|&&idx| {
                    !self.stages[idx].satisfied()
                        && !self.stages[idx].approved_by.contains(&cmd.approver.principal)
                })
                .unwrap_or(&eligible[0]),
        };

        let mut events = vec![ApprovalEvent::DecisionRecorded(DecisionRecorded {
            request_id: cmd.request_id,
            approver: cmd.approver.principal,
            stage_index: target,
            verdict: DecisionVerdict::Approve,
            comment: cmd.comment.clone(),
            occurred_at: cmd.occurred_at,
        })];

        // Simulate the count to see whether this decision completes the request.
        let all_satisfied = self.stages.iter().enumerate().all(|(idx, stage)| {
            let mut count = stage.approved_by.len() as u32;
            if idx == target && !stage.approved_by.contains(&cmd.approver.principal) {
                count += 1;
            }
            count >= stage.required_approvals
        });

        if all_satisfied {
            events.push(ApprovalEvent::Approved(RequestApproved {
                request_id: cmd.request_id,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_cancel(&self, cmd: &CancelRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        self.ensure_created()?;

        if self.status.is_terminal() {
            return Err(EngineError::invariant(format!(
                "request is {} — it can no longer be cancelled",
                self.status
            )));
        }

        if cmd.actor != self.requested_by {
            return Err(EngineError::policy(
                PolicyViolationKind::NotRequester,
                "only the original requester may cancel",
            ));
        }

        Ok(vec![ApprovalEvent::Cancelled(RequestCancelled {
            request_id: cmd.request_id,
            cancelled_by: cmd.actor,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        self.ensure_created()?;
        self.ensure_pending()?;

        if cmd.now <= self.expires_at {
            return Err(EngineError::invariant(format!(
                "request does not expire until {}",
                self.expires_at
            )));
        }

        Ok(vec![ApprovalEvent::Expired(RequestExpired {
            request_id: cmd.request_id,
            occurred_at: cmd.now,
        })])
    }

    /// Escalation is a notification, not a transition: the request stays
    /// pending and only a timeline entry plus a broadcast event are produced.
    /// Not-yet-due or already-escalated requests no-op so the scheduler can
    /// sweep without bookkeeping.
    fn handle_escalate(&self, cmd: &EscalateRequest) -> Result<Vec<ApprovalEvent>, EngineError> {
        self.ensure_created()?;

        if self.status != ApprovalStatus::PendingApproval || self.escalated {
            return Ok(vec![]);
        }

        let pending_since = self.submitted_at.unwrap_or(self.created_at);
        let due_at = pending_since + Duration::hours(i64::from(self.escalation_after_hours));
        if cmd.now < due_at {
            return Ok(vec![]);
        }

        let stalled = self.first_unsatisfied_stage().unwrap_or(0);

        Ok(vec![ApprovalEvent::EscalationRaised(EscalationRaised {
            request_id: cmd.request_id,
            stalled_stage_index: stalled,
            occurred_at: cmd.now,
        })])
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event Appliers
    // ─────────────────────────────────────────────────────────────────────────

    fn push_timeline(
        &mut self,
        at: DateTime<Utc>,
        actor: Option<PrincipalId>,
        kind: TimelineKind,
        detail: impl Into<String>,
    ) {
        self.timeline.push(TimelineEntry {
            at,
            actor,
            kind,
            detail: detail.into(),
        });
    }

    fn apply_opened(&mut self, e: &RequestOpened) {
        self.id = e.request_id;
        self.scope = e.scope;
        self.tenant_id = e.tenant_id;
        self.entity_type = e.entity_type.clone();
        self.entity_id = e.entity_id.clone();
        self.action = e.action.clone();
        self.status = ApprovalStatus::Draft;
        self.requested_by = e.requested_by;
        self.workflow_key = e.workflow_key.clone();
        self.approval_type = e.approval_type;
        self.stages = e.stages.clone();
        self.risk_score = e.risk_score;
        self.sod_conflict_count = e.sod_conflict_count;
        self.created_at = e.occurred_at;
        self.expires_at = e.expires_at;
        self.escalation_after_hours = e.escalation_after_hours;
        self.created = true;
        self.push_timeline(
            e.occurred_at,
            Some(e.requested_by),
            TimelineKind::Opened,
            format!("draft opened for {} {} ({})", e.entity_type, e.entity_id, e.action),
        );
    }

    fn apply_submitted(&mut self, e: &RequestSubmitted) {
        self.status = ApprovalStatus::PendingApproval;
        self.submitted_at = Some(e.occurred_at);
        self.push_timeline(
            e.occurred_at,
            Some(self.requested_by),
            TimelineKind::Submitted,
            "submitted for approval",
        );
    }

    fn apply_decision_recorded(&mut self, e: &DecisionRecorded) {
        let decision = ApproverDecision {
            approver: e.approver,
            verdict: e.verdict,
            stage_index: e.stage_index,
            comment: e.comment.clone(),
            decided_at: e.occurred_at,
        };
        // Idempotent per approver: overwrite, never duplicate.
        match self.approvers.iter_mut().find(|d| d.approver == e.approver) {
            Some(existing) => *existing = decision,
            None => self.approvers.push(decision),
        }

        if e.verdict == DecisionVerdict::Approve {
            if let Some(stage) = self.stages.get_mut(e.stage_index) {
                stage.approved_by.insert(e.approver);
            }
        }

        // The timeline, unlike the approvers list, keeps every occurrence.
        self.push_timeline(
            e.occurred_at,
            Some(e.approver),
            TimelineKind::Decision,
            format!(
                "{} stage #{}{}",
                match e.verdict {
                    DecisionVerdict::Approve => "approved",
                    DecisionVerdict::Reject => "rejected",
                },
                e.stage_index,
                e.comment
                    .as_deref()
                    .map(|c| format!(": {c}"))
                    .unwrap_or_default()
            ),
        );
    }

    fn apply_approved(&mut self, e: &RequestApproved) {
        self.status = ApprovalStatus::Approved;
        self.push_timeline(e.occurred_at, None, TimelineKind::Approved, "request approved");
    }

    fn apply_rejected(&mut self, e: &RequestRejected) {
        self.status = ApprovalStatus::Rejected;
        self.push_timeline(
            e.occurred_at,
            Some(e.rejected_by),
            TimelineKind::Rejected,
            format!("request rejected: {}", e.comment),
        );
    }

    fn apply_cancelled(&mut self, e: &RequestCancelled) {
        self.status = ApprovalStatus::Cancelled;
        self.push_timeline(
            e.occurred_at,
            Some(e.cancelled_by),
            TimelineKind::Cancelled,
            e.reason.clone().unwrap_or_else(|| "cancelled by requester".to_string()),
        );
    }

    fn apply_expired(&mut self, e: &RequestExpired) {
        self.status = ApprovalStatus::Expired;
        self.push_timeline(e.occurred_at, None, TimelineKind::Expired, "request expired");
    }

    fn apply_escalation_raised(&mut self, e: &EscalationRaised) {
        self.escalated = true;
        self.push_timeline(
            e.occurred_at,
            None,
            TimelineKind::Escalated,
            format!("escalation raised for stage #{}", e.stalled_stage_index),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
