use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ebb_engine::SubmitAck;
use ebb_types::{EventId, MutationEvent, MutationPayload, SubjectId};

/// One contraction record inside a session projection.
///
/// `source_event` is set while the record only exists optimistically;
/// it is cleared (and `remote_id` adopted) once the server confirms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractionRecord {
    /// Client-assigned record identifier.
    pub id: String,
    /// Server identifier, once known.
    pub remote_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub intensity: Option<u8>,
    pub note: Option<String>,
    /// The mutation event this record originated from, while provisional.
    pub source_event: Option<EventId>,
}

/// A free-text status update posted to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePost {
    pub body: String,
    pub posted_at: DateTime<Utc>,
    pub remote_id: Option<String>,
    pub source_event: Option<EventId>,
}

/// UI-facing read model of one tracked session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub subject: SubjectId,
    pub title: Option<String>,
    pub planned_for: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub contractions: Vec<ContractionRecord>,
    pub updates: Vec<UpdatePost>,
}

impl SessionSnapshot {
    /// An empty projection for a subject with no authoritative state yet.
    pub fn empty(subject: SubjectId) -> Self {
        Self {
            subject,
            title: None,
            planned_for: None,
            completed_at: None,
            contractions: Vec::new(),
            updates: Vec::new(),
        }
    }

    fn contraction_mut(&mut self, id: &str) -> Option<&mut ContractionRecord> {
        self.contractions.iter_mut().find(|c| c.id == id)
    }

    /// Fold one mutation event into the projection.
    pub fn apply_event(&mut self, event: &MutationEvent) {
        match &event.payload {
            MutationPayload::StartContraction {
                contraction_id,
                started_at,
                intensity,
            } => {
                if self.contraction_mut(contraction_id).is_none() {
                    self.contractions.push(ContractionRecord {
                        id: contraction_id.clone(),
                        remote_id: None,
                        started_at: *started_at,
                        ended_at: None,
                        intensity: *intensity,
                        note: None,
                        source_event: Some(event.id),
                    });
                }
            }
            MutationPayload::EndContraction {
                contraction_id,
                ended_at,
            } => {
                if let Some(record) = self.contraction_mut(contraction_id) {
                    record.ended_at = Some(*ended_at);
                }
            }
            MutationPayload::UpdateContraction {
                contraction_id,
                intensity,
                note,
            } => {
                if let Some(record) = self.contraction_mut(contraction_id) {
                    if intensity.is_some() {
                        record.intensity = *intensity;
                    }
                    if note.is_some() {
                        record.note = note.clone();
                    }
                }
            }
            MutationPayload::DeleteContraction { contraction_id } => {
                self.contractions.retain(|c| &c.id != contraction_id);
            }
            MutationPayload::PlanSession { title, planned_for } => {
                self.title = Some(title.clone());
                self.planned_for = *planned_for;
            }
            MutationPayload::CompleteSession { completed_at } => {
                self.completed_at = Some(*completed_at);
            }
            MutationPayload::PostUpdate { body } => {
                self.updates.push(UpdatePost {
                    body: body.clone(),
                    posted_at: event.created_at,
                    remote_id: None,
                    source_event: Some(event.id),
                });
            }
        }
    }

    /// Adopt server-assigned identifiers for the record `event` created,
    /// and drop its provisional marker.
    pub fn confirm_event(&mut self, event: &MutationEvent, ack: &SubmitAck) {
        match &event.payload {
            MutationPayload::StartContraction { contraction_id, .. } => {
                if let Some(record) = self.contraction_mut(contraction_id) {
                    if record.source_event == Some(event.id) {
                        record.remote_id = ack.remote_id.clone();
                        record.source_event = None;
                    }
                }
            }
            MutationPayload::PostUpdate { .. } => {
                if let Some(post) = self
                    .updates
                    .iter_mut()
                    .find(|u| u.source_event == Some(event.id))
                {
                    post.remote_id = ack.remote_id.clone();
                    post.source_event = None;
                }
            }
            // The remaining kinds touch existing records; there is no
            // provisional identifier to adopt.
            _ => {}
        }
    }
}
