//! `sentra-workflow` — the approval workflow state machine.
//!
//! The one stateful component of the engine. The [`request`] module is the
//! pure aggregate: a tagged-status state type with a transition function
//! `(state, command) -> Result<events>`, enabling exhaustive-transition
//! testing. The [`engine`] module serializes transitions behind optimistic
//! concurrency and broadcasts committed events — never uncommitted ones.

pub mod engine;
pub mod request;

pub use engine::{WorkflowEngine, select_workflow};
pub use request::{
    ActorSnapshot, ApprovalCommand, ApprovalEvent, ApprovalRequest, ApprovalRequestId,
    ApprovalStatus, ApproverDecision, CancelRequest, DecideRequest, DecisionVerdict,
    EscalateRequest, ExpireRequest, OpenRequest, StageProgress, SubmitRequest, TimelineEntry,
    TimelineKind,
};
