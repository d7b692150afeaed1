use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sentra_core::{AggregateId, Scope, TenantId};

/// Envelope for an event, containing scope + stream metadata.
///
/// This is the unit you hand to a bus or append to a stream.
///
/// Notes:
/// - **Scope partitioning** is enforced here: system-scope streams carry no
///   tenant id, tenant-scope streams always do.
/// - **Append-only**: `sequence_number` is intended to be monotonically
///   increasing per stream.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    scope: Scope,
    tenant_id: Option<TenantId>,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        scope: Scope,
        tenant_id: Option<TenantId>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            scope,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// Helper trait for scope-partitioned messages.
///
/// Marks types that carry their scope partition, enabling scope-aware
/// filtering in subscription loops (e.g. a notifier pinned to one tenant).
pub trait ScopeScoped {
    fn scope(&self) -> Scope;

    fn tenant_id(&self) -> Option<TenantId>;
}

impl<E> ScopeScoped for EventEnvelope<E> {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}
