//! Stateful workflow engine: serialized transitions + post-commit broadcast.
//!
//! This is the engine's only stateful component. Transitions are applied
//! under a per-store lock with an optimistic-concurrency check: of two racing
//! decisions, whichever commits first wins and the loser receives an explicit
//! stale-state error, never a silently dropped decision. Committed events are
//! published to the bus strictly *after* the store commit; a publish failure
//! cannot un-commit a transition.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use sentra_core::{Aggregate, AggregateRoot, EngineError, EngineResult, ExpectedVersion};
use sentra_events::{EventBus, EventEnvelope};
use sentra_registry::{ChangeContext, RegistrySnapshot, WorkflowDefinition};

use crate::request::{
    ApprovalCommand, ApprovalEvent, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
    CancelRequest, DecideRequest, EscalateRequest, ExpireRequest, OpenRequest, SubmitRequest,
};

/// Stream type identifier used on published envelopes.
const AGGREGATE_TYPE: &str = "workflow.approval_request";

/// Pick the workflow definition gating a candidate change.
///
/// Definitions are consulted in registry order; the first whose trigger
/// conditions all hold wins. A gated mutation with no matching definition is
/// a configuration fault and surfaces as a validation error, never as an
/// ungated pass-through.
pub fn select_workflow<'a>(
    snapshot: &'a RegistrySnapshot,
    ctx: &ChangeContext,
) -> EngineResult<&'a WorkflowDefinition> {
    snapshot
        .workflows()
        .iter()
        .find(|def| def.applies_to(ctx))
        .ok_or_else(|| {
            EngineError::validation(format!(
                "no workflow definition matches {} '{}' (risk {} / {} SoD conflicts)",
                ctx.entity_type, ctx.action, ctx.risk_score, ctx.sod_conflict_count
            ))
        })
}

/// In-memory, lock-serialized approval request store plus notification bus.
///
/// Requests in terminal states stay in the store (archived, never deleted).
pub struct WorkflowEngine<B> {
    requests: Mutex<HashMap<ApprovalRequestId, ApprovalRequest>>,
    bus: B,
}

impl<B> WorkflowEngine<B>
where
    B: EventBus<EventEnvelope<ApprovalEvent>>,
{
    pub fn new(bus: B) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Current state of a request.
    pub fn get(&self, id: ApprovalRequestId) -> EngineResult<ApprovalRequest> {
        let map = self.lock()?;
        map.get(&id).cloned().ok_or(EngineError::NotFound)
    }

    /// Ids of all requests still awaiting approval.
    pub fn pending(&self) -> EngineResult<Vec<ApprovalRequestId>> {
        let map = self.lock()?;
        Ok(map
            .values()
            .filter(|r| r.status() == ApprovalStatus::PendingApproval)
            .map(|r| r.id_typed())
            .collect())
    }

    /// Stage a gated mutation as a draft request.
    pub fn open(&self, cmd: OpenRequest) -> EngineResult<ApprovalRequest> {
        let id = cmd.request_id;
        let events;
        let updated;
        {
            let mut map = self.lock()?;
            if map.contains_key(&id) {
                return Err(EngineError::invariant(format!(
                    "approval request {id} already exists"
                )));
            }

            let mut request = ApprovalRequest::empty(id);
            events = request.handle(&ApprovalCommand::Open(cmd))?;
            for event in &events {
                request.apply(event);
            }
            updated = request.clone();
            map.insert(id, request);
        }
        self.publish_committed(&updated, &events);
        Ok(updated)
    }

    /// Submit a draft for approval.
    pub fn submit(
        &self,
        cmd: SubmitRequest,
        expected: ExpectedVersion,
    ) -> EngineResult<ApprovalRequest> {
        self.execute(cmd.request_id, expected, ApprovalCommand::Submit(cmd))
    }

    /// Record an approve/reject decision.
    pub fn decide(
        &self,
        cmd: DecideRequest,
        expected: ExpectedVersion,
    ) -> EngineResult<ApprovalRequest> {
        self.execute(cmd.request_id, expected, ApprovalCommand::Decide(cmd))
    }

    /// Cancel a request (requester only).
    pub fn cancel(
        &self,
        cmd: CancelRequest,
        expected: ExpectedVersion,
    ) -> EngineResult<ApprovalRequest> {
        self.execute(cmd.request_id, expected, ApprovalCommand::Cancel(cmd))
    }

    /// Scheduler entry point: expire an overdue pending request.
    ///
    /// The scheduler does not carry a version; expiry is terminal and races
    /// benignly with any concurrent decision (the later of the two fails on
    /// status, which the scheduler does not retry).
    pub fn expire(&self, cmd: ExpireRequest) -> EngineResult<ApprovalRequest> {
        self.execute(cmd.request_id, ExpectedVersion::Any, ApprovalCommand::Expire(cmd))
    }

    /// Scheduler sweep: broadcast escalation notices for stalled requests.
    ///
    /// Returns the ids that actually escalated. State never changes — the
    /// requests remain pending while alternate approvers are notified.
    pub fn escalate_due(&self, now: DateTime<Utc>) -> EngineResult<Vec<ApprovalRequestId>> {
        let mut escalated = Vec::new();
        for id in self.pending()? {
            let updated = self.execute(
                id,
                ExpectedVersion::Any,
                ApprovalCommand::Escalate(EscalateRequest { request_id: id, now }),
            )?;
            if updated.escalated() && updated.timeline().last().is_some_and(|e| e.at == now) {
                escalated.push(id);
            }
        }
        Ok(escalated)
    }

    /// Load → check expectation → decide → apply → commit, all under the
    /// store lock; publish only after the lock is released.
    fn execute(
        &self,
        id: ApprovalRequestId,
        expected: ExpectedVersion,
        command: ApprovalCommand,
    ) -> EngineResult<ApprovalRequest> {
        let events;
        let updated;
        {
            let mut map = self.lock()?;
            let request = map.get_mut(&id).ok_or(EngineError::NotFound)?;
            expected.check(request.version())?;

            events = request.handle(&command)?;
            for event in &events {
                request.apply(event);
            }
            updated = request.clone();
        }
        self.publish_committed(&updated, &events);
        Ok(updated)
    }

    fn publish_committed(&self, request: &ApprovalRequest, events: &[ApprovalEvent]) {
        if events.is_empty() {
            return;
        }

        info!(
            request_id = %request.id_typed(),
            status = %request.status(),
            version = request.version(),
            events = events.len(),
            "approval request transition committed"
        );

        // Sequence numbers of the just-committed suffix of the stream.
        let base = request.version() - events.len() as u64;
        for (offset, event) in events.iter().enumerate() {
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                request.scope(),
                request.tenant_id(),
                request.id_typed().as_aggregate_id(),
                AGGREGATE_TYPE,
                base + offset as u64 + 1,
                event.clone(),
            );
            if let Err(e) = self.bus.publish(envelope) {
                // The transition is already durable; notification is
                // at-least-once and can be republished.
                warn!(request_id = %request.id_typed(), error = ?e, "post-commit publish failed");
            }
        }
    }

    fn lock(&self) -> EngineResult<std::sync::MutexGuard<'_, HashMap<ApprovalRequestId, ApprovalRequest>>> {
        self.requests
            .lock()
            .map_err(|_| EngineError::state_conflict("workflow store lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    use sentra_core::{AggregateId, PrincipalId, Scope};
    use sentra_events::InMemoryEventBus;
    use sentra_registry::{
        ApprovalType, ApproverSelector, PermissionSlug, TriggerCondition, TriggerField,
        TriggerOperator, TriggerValue, WorkflowStage,
    };

    use crate::request::{ActorSnapshot, DecisionVerdict};

    type TestEngine = WorkflowEngine<Arc<InMemoryEventBus<EventEnvelope<ApprovalEvent>>>>;

    fn engine() -> (TestEngine, Arc<InMemoryEventBus<EventEnvelope<ApprovalEvent>>>) {
        let bus = Arc::new(InMemoryEventBus::new());
        (WorkflowEngine::new(Arc::clone(&bus)), bus)
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn requester() -> ActorSnapshot {
        ActorSnapshot::new(PrincipalId::new()).with_role("role-editor")
    }

    fn officer() -> ActorSnapshot {
        ActorSnapshot::new(PrincipalId::new()).with_role("security-officer")
    }

    fn parallel_definition(required: u32) -> WorkflowDefinition {
        WorkflowDefinition {
            key: "role-change".to_string(),
            name: "Role change approval".to_string(),
            approval_type: ApprovalType::Parallel,
            stages: vec![WorkflowStage::new(
                "security-review",
                ApproverSelector::ByRole("security-officer".to_string()),
                required,
            )],
            auto_expire_days: 7,
            escalation_after_hours: 24,
            trigger_conditions: vec![],
        }
    }

    fn open_cmd(requester: &ActorSnapshot, def: WorkflowDefinition) -> OpenRequest {
        OpenRequest {
            request_id: ApprovalRequestId::new(AggregateId::new()),
            scope: Scope::System,
            tenant_id: None,
            entity_type: "role".to_string(),
            entity_id: "role-42".to_string(),
            action: "update".to_string(),
            requester: requester.clone(),
            definition: def,
            risk_score: 85,
            sod_conflict_count: 1,
            occurred_at: test_time(),
        }
    }

    fn open_pending(engine: &TestEngine, requester: &ActorSnapshot) -> ApprovalRequest {
        let opened = engine.open(open_cmd(requester, parallel_definition(1))).unwrap();
        engine
            .submit(
                SubmitRequest {
                    request_id: opened.id_typed(),
                    requester: requester.clone(),
                    occurred_at: test_time(),
                },
                ExpectedVersion::Exact(opened.version()),
            )
            .unwrap()
    }

    fn approve_cmd(id: ApprovalRequestId, approver: &ActorSnapshot) -> DecideRequest {
        DecideRequest {
            request_id: id,
            approver: approver.clone(),
            verdict: DecisionVerdict::Approve,
            comment: None,
            occurred_at: test_time(),
        }
    }

    #[test]
    fn full_lifecycle_publishes_after_each_commit() {
        let (engine, bus) = engine();
        let sub = bus.subscribe();

        let original = requester();
        let pending = open_pending(&engine, &original);
        let approved = engine
            .decide(
                approve_cmd(pending.id_typed(), &officer()),
                ExpectedVersion::Exact(pending.version()),
            )
            .unwrap();
        assert_eq!(approved.status(), ApprovalStatus::Approved);

        let mut types = Vec::new();
        while let Ok(envelope) = sub.try_recv() {
            assert_eq!(envelope.aggregate_type(), AGGREGATE_TYPE);
            assert_eq!(envelope.scope(), Scope::System);
            types.push(sentra_events::Event::event_type(envelope.payload()).to_string());
        }
        assert_eq!(
            types,
            vec![
                "workflow.request.opened",
                "workflow.request.submitted",
                "workflow.request.decision_recorded",
                "workflow.request.approved",
            ]
        );

        // Sequence numbers line up with the aggregate version.
        assert_eq!(engine.get(approved.id_typed()).unwrap().version(), 4);
    }

    #[test]
    fn stale_version_gets_state_conflict() {
        let (engine, _bus) = engine();
        let pending = open_pending(&engine, &requester());
        let stale = ExpectedVersion::Exact(pending.version());

        engine
            .decide(approve_cmd(pending.id_typed(), &officer()), stale)
            .unwrap();

        let err = engine
            .decide(approve_cmd(pending.id_typed(), &officer()), stale)
            .unwrap_err();
        assert!(matches!(err, EngineError::StateConflict(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn concurrent_approvals_resolve_to_one_winner() {
        // Two racing approvals with the same expected version: exactly one
        // transition to APPROVED, the loser gets an explicit stale-state
        // error rather than a silent drop.
        let (engine, _bus) = engine();
        let engine = Arc::new(engine);
        let pending = open_pending(&engine, &requester());
        let id = pending.id_typed();
        let expected = ExpectedVersion::Exact(pending.version());

        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = Arc::clone(&engine);
            let tx = tx.clone();
            let approver = officer();
            handles.push(std::thread::spawn(move || {
                let result = engine.decide(approve_cmd(id, &approver), expected);
                tx.send(result).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        drop(tx);

        let results: Vec<_> = rx.iter().collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::StateConflict(_))))
            .count();
        assert_eq!((wins, conflicts), (1, 1));
        assert_eq!(engine.get(id).unwrap().status(), ApprovalStatus::Approved);
    }

    #[test]
    fn unknown_request_is_not_found() {
        let (engine, _bus) = engine();
        let missing = ApprovalRequestId::new(AggregateId::new());
        assert_eq!(engine.get(missing).unwrap_err(), EngineError::NotFound);
        assert_eq!(
            engine
                .decide(approve_cmd(missing, &officer()), ExpectedVersion::Any)
                .unwrap_err(),
            EngineError::NotFound
        );
    }

    #[test]
    fn duplicate_open_rejected() {
        let (engine, _bus) = engine();
        let cmd = open_cmd(&requester(), parallel_definition(1));
        engine.open(cmd.clone()).unwrap();
        assert!(matches!(
            engine.open(cmd).unwrap_err(),
            EngineError::InvariantViolation(_)
        ));
    }

    #[test]
    fn scheduler_expiry_is_terminal() {
        let (engine, _bus) = engine();
        let pending = open_pending(&engine, &requester());
        let id = pending.id_typed();

        let expired = engine
            .expire(ExpireRequest {
                request_id: id,
                now: pending.expires_at() + chrono::Duration::hours(1),
            })
            .unwrap();
        assert_eq!(expired.status(), ApprovalStatus::Expired);
        assert!(engine.pending().unwrap().is_empty());
    }

    #[test]
    fn escalation_sweep_notifies_only_due_requests() {
        let (engine, bus) = engine();
        let sub = bus.subscribe();

        let pending = open_pending(&engine, &requester());
        let id = pending.id_typed();

        // Too early: nothing escalates.
        assert!(engine.escalate_due(test_time()).unwrap().is_empty());

        let due = test_time() + chrono::Duration::hours(25);
        let escalated = engine.escalate_due(due).unwrap();
        assert_eq!(escalated, vec![id]);
        assert_eq!(engine.get(id).unwrap().status(), ApprovalStatus::PendingApproval);

        // A second sweep stays quiet.
        assert!(engine.escalate_due(due + chrono::Duration::hours(1)).unwrap().is_empty());

        let mut saw_escalation = false;
        while let Ok(envelope) = sub.try_recv() {
            if matches!(envelope.payload(), ApprovalEvent::EscalationRaised(_)) {
                saw_escalation = true;
            }
        }
        assert!(saw_escalation);
    }

    #[test]
    fn select_workflow_honors_registry_order_and_fails_closed() {
        let high_risk = WorkflowDefinition {
            key: "high-risk".to_string(),
            name: "High risk gate".to_string(),
            trigger_conditions: vec![TriggerCondition::new(
                TriggerField::RiskLevel,
                TriggerOperator::Equals,
                TriggerValue::Text("HIGH".to_string()),
            )],
            ..parallel_definition(2)
        };
        let fallback = WorkflowDefinition {
            key: "default".to_string(),
            name: "Default gate".to_string(),
            ..parallel_definition(1)
        };
        let snapshot = RegistrySnapshot::builder(Scope::System)
            .workflow(high_risk)
            .workflow(fallback)
            .build()
            .unwrap();

        let mut ctx = ChangeContext {
            entity_type: "role".to_string(),
            action: "update".to_string(),
            risk_level: "HIGH".to_string(),
            risk_score: 85,
            sod_conflict_count: 0,
        };
        assert_eq!(select_workflow(&snapshot, &ctx).unwrap().key, "high-risk");

        ctx.risk_level = "LOW".to_string();
        assert_eq!(select_workflow(&snapshot, &ctx).unwrap().key, "default");

        let empty = RegistrySnapshot::builder(Scope::System).build().unwrap();
        assert!(matches!(
            select_workflow(&empty, &ctx).unwrap_err(),
            EngineError::Validation(_)
        ));
    }

    #[test]
    fn four_eyes_surfaces_through_the_engine() {
        let (engine, _bus) = engine();
        let self_approver = ActorSnapshot::new(PrincipalId::new()).with_role("security-officer");
        let err = engine
            .open(open_cmd(&self_approver, parallel_definition(1)))
            .unwrap_err();
        assert!(matches!(err, EngineError::PolicyViolation { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn permission_selector_matches_exactly() {
        let (engine, _bus) = engine();
        let def = WorkflowDefinition {
            stages: vec![WorkflowStage::new(
                "security-review",
                ApproverSelector::ByPermission(PermissionSlug::new("system.roles.approve")),
                1,
            )],
            ..parallel_definition(1)
        };
        let original = requester();
        let opened = engine.open(open_cmd(&original, def)).unwrap();
        let pending = engine
            .submit(
                SubmitRequest {
                    request_id: opened.id_typed(),
                    requester: original,
                    occurred_at: test_time(),
                },
                ExpectedVersion::Exact(opened.version()),
            )
            .unwrap();

        // A sibling verb is not the required slug: exact match only.
        let near_miss = ActorSnapshot::new(PrincipalId::new())
            .with_permission(PermissionSlug::new("system.roles.read"));
        let err = engine
            .decide(
                approve_cmd(pending.id_typed(), &near_miss),
                ExpectedVersion::Exact(pending.version()),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PolicyViolation {
                kind: sentra_core::PolicyViolationKind::NotDesignatedApprover,
                ..
            }
        ));

        let holder = ActorSnapshot::new(PrincipalId::new())
            .with_permission(PermissionSlug::new("system.roles.approve"));
        let approved = engine
            .decide(
                approve_cmd(pending.id_typed(), &holder),
                ExpectedVersion::Exact(pending.version()),
            )
            .unwrap();
        assert_eq!(approved.status(), ApprovalStatus::Approved);
    }
}
