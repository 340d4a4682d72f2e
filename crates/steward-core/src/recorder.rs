//! Decision recorder
//!
//! Persists every evaluated candidate action asynchronously so the
//! user-facing response path never waits on the knowledge store. Modeled
//! as a bounded work queue with a background worker: `record` is
//! non-blocking, the worker computes the optional embedding and inserts.
//! Under catastrophic pressure the queue drops the oldest-unsent draft
//! with a loud warning; a single lost record is acceptable, a blocked
//! chat response is not.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::confidence::ConfidenceFactors;
use crate::embedding::EmbeddingProvider;
use crate::store::{DecisionRecord, KnowledgeStore};
use crate::types::{now, DomainCategory};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A decision waiting to be persisted
#[derive(Debug, Clone)]
pub struct DecisionDraft {
    /// Pre-assigned decision id, so callers can reference it immediately
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Evaluated tool
    pub tool_name: String,
    /// Tool category
    pub category: DomainCategory,
    /// Short description of the candidate input
    pub input_summary: String,
    /// Factors when the tool was scored; the composite becomes the
    /// stored `confidence`
    pub factors: Option<ConfidenceFactors>,
    /// Whether the gate allowed execution and the tool ran
    pub was_auto_executed: bool,
}

impl DecisionDraft {
    /// New draft with a fresh id
    pub fn new(
        user_id: impl Into<String>,
        tool_name: impl Into<String>,
        category: DomainCategory,
        input_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tool_name: tool_name.into(),
            category,
            input_summary: input_summary.into(),
            factors: None,
            was_auto_executed: false,
        }
    }
}

/// Fire-and-forget persistence for evaluated decisions
pub struct DecisionRecorder {
    tx: std::sync::Mutex<Option<mpsc::Sender<DecisionDraft>>>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DecisionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionRecorder").finish()
    }
}

impl DecisionRecorder {
    /// Spawn the worker over the store and embedding provider
    pub fn spawn(store: Arc<KnowledgeStore>, embedder: Arc<dyn EmbeddingProvider>) -> Arc<Self> {
        Self::spawn_with_capacity(store, embedder, DEFAULT_QUEUE_CAPACITY)
    }

    /// Spawn with an explicit queue capacity
    pub fn spawn_with_capacity(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        capacity: usize,
    ) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<DecisionDraft>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(draft) = rx.recv().await {
                Self::persist(&store, embedder.as_ref(), draft).await;
            }
        });

        Arc::new(Self {
            tx: std::sync::Mutex::new(Some(tx)),
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    async fn persist(store: &KnowledgeStore, embedder: &dyn EmbeddingProvider, draft: DecisionDraft) {
        // Decisions tolerate a missing embedding; the record simply never
        // surfaces through similarity search.
        let embedding = match embedder.embed(&draft.input_summary).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(decision = %draft.id, error = %e, "decision embedding failed");
                None
            }
        };

        let record = DecisionRecord {
            id: draft.id,
            user_id: draft.user_id,
            tool_name: draft.tool_name,
            category: draft.category,
            input_summary: draft.input_summary,
            confidence: draft.factors.as_ref().map(|f| f.composite),
            confidence_factors: draft.factors,
            embedding,
            owner_feedback: None,
            was_auto_executed: draft.was_auto_executed,
            created_at: now(),
        };

        if let Err(e) = store.insert_decision(&record) {
            tracing::error!(decision = %record.id, error = %e, "failed to persist decision");
        }
    }

    /// Enqueue a decision for persistence without blocking.
    ///
    /// Returns the draft's id. Drops the draft with a warning when the
    /// queue is full or the worker is gone.
    pub fn record(&self, draft: DecisionDraft) -> Uuid {
        let id = draft.id;
        let tx = self.tx.lock().unwrap();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(draft) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(draft)) => {
                    tracing::warn!(decision = %draft.id, "decision queue full; dropping record");
                }
                Err(mpsc::error::TrySendError::Closed(draft)) => {
                    tracing::error!(decision = %draft.id, "decision recorder stopped; dropping record");
                }
            },
            None => {
                tracing::error!(decision = %id, "decision recorder shut down; dropping record");
            }
        }
        id
    }

    /// Drain the queue and stop the worker. Used by shutdown paths and
    /// tests that need deterministic persistence.
    pub async fn shutdown(&self) {
        // Dropping the sender ends the worker loop once the queue drains
        drop(self.tx.lock().unwrap().take());
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn factors(composite: f32) -> ConfidenceFactors {
        ConfidenceFactors {
            historical_accuracy: composite,
            source_quality: composite,
            precedent_alignment: composite,
            rule_alignment: composite,
            golden_alignment: composite,
            outcome_track: composite,
            composite,
        }
    }

    #[tokio::test]
    async fn test_record_persists_in_background() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let recorder = DecisionRecorder::spawn(store.clone(), Arc::new(HashEmbedder::new()));

        let mut draft = DecisionDraft::new(
            "owner-1",
            "send_rent_reminder",
            DomainCategory::RentCollection,
            "Tenant 5 days overdue at 12 Acacia Ave",
        );
        draft.factors = Some(factors(0.8));
        let id = recorder.record(draft);

        // Drain deterministically
        recorder.shutdown().await;

        let decision = store.get_decision("owner-1", id).unwrap().unwrap();
        assert_eq!(decision.confidence, Some(0.8));
        assert!(decision.embedding.is_some());
        assert!(decision.confidence_factors.is_some());
    }

    #[tokio::test]
    async fn test_record_is_nonblocking_when_full() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let recorder =
            DecisionRecorder::spawn_with_capacity(store, Arc::new(HashEmbedder::new()), 1);

        // Flooding a capacity-1 queue must never block the caller
        for _ in 0..50 {
            recorder.record(DecisionDraft::new(
                "owner-1",
                "assign_trade",
                DomainCategory::Maintenance,
                "open job",
            ));
        }
    }
}
