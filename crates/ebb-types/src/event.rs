use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EventId;
use crate::status::EventStatus;

/// Identifier of the tracked session aggregate a mutation applies to.
///
/// Events sharing a subject are delivered strictly in id order relative to
/// each other; events for different subjects are independent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Classification of mutation events. One variant per user-intended
/// change the client can record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    StartContraction,
    EndContraction,
    UpdateContraction,
    DeleteContraction,
    PlanSession,
    CompleteSession,
    PostUpdate,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StartContraction => "StartContraction",
            Self::EndContraction => "EndContraction",
            Self::UpdateContraction => "UpdateContraction",
            Self::DeleteContraction => "DeleteContraction",
            Self::PlanSession => "PlanSession",
            Self::CompleteSession => "CompleteSession",
            Self::PostUpdate => "PostUpdate",
        };
        write!(f, "{s}")
    }
}

/// Kind-shaped payload data carried by a mutation event.
///
/// Contraction identifiers are client-assigned (the record may not exist
/// on the server yet when the mutation is queued).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationPayload {
    StartContraction {
        contraction_id: String,
        started_at: DateTime<Utc>,
        intensity: Option<u8>,
    },
    EndContraction {
        contraction_id: String,
        ended_at: DateTime<Utc>,
    },
    UpdateContraction {
        contraction_id: String,
        intensity: Option<u8>,
        note: Option<String>,
    },
    DeleteContraction {
        contraction_id: String,
    },
    PlanSession {
        title: String,
        planned_for: Option<DateTime<Utc>>,
    },
    CompleteSession {
        completed_at: DateTime<Utc>,
    },
    PostUpdate {
        body: String,
    },
}

impl MutationPayload {
    /// The kind this payload shape belongs to.
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::StartContraction { .. } => MutationKind::StartContraction,
            Self::EndContraction { .. } => MutationKind::EndContraction,
            Self::UpdateContraction { .. } => MutationKind::UpdateContraction,
            Self::DeleteContraction { .. } => MutationKind::DeleteContraction,
            Self::PlanSession { .. } => MutationKind::PlanSession,
            Self::CompleteSession { .. } => MutationKind::CompleteSession,
            Self::PostUpdate { .. } => MutationKind::PostUpdate,
        }
    }
}

/// A single durable record of a user-intended change.
///
/// Created the instant a user action occurs, applied optimistically to
/// local state, and delivered to the remote authority in `id` order
/// relative to other events of the same subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    /// Primary ordering key, assigned at creation, immutable.
    pub id: EventId,
    /// Classification of the change (derived from the payload shape).
    pub kind: MutationKind,
    /// The tracked session this mutation applies to.
    pub subject: SubjectId,
    /// Kind-specific data.
    pub payload: MutationPayload,
    /// Queue lifecycle state.
    pub status: EventStatus,
    /// Number of transient delivery failures so far.
    pub attempts: u32,
    /// Rejection reason, set when the event becomes `Failed`.
    pub failure: Option<String>,
    /// Wall-clock creation time, for UI display only. The ordering key is
    /// the timestamp inside `id`.
    pub created_at: DateTime<Utc>,
}

impl MutationEvent {
    /// Build a new `Pending` event with a fresh identifier.
    pub fn new(subject: SubjectId, payload: MutationPayload) -> Self {
        Self::with_id(EventId::generate(), subject, payload)
    }

    /// Build a new `Pending` event with an explicit identifier.
    pub fn with_id(id: EventId, subject: SubjectId, payload: MutationPayload) -> Self {
        Self {
            id,
            kind: payload.kind(),
            subject,
            payload,
            status: EventStatus::Pending,
            attempts: 0,
            failure: None,
            created_at: Utc::now(),
        }
    }
}
