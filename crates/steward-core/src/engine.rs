//! Decision engine facade
//!
//! Wires the confidence scorer, the autonomy gate and the fire-and-forget
//! recorder behind a single `evaluate` call used by both the chat path
//! and the heartbeat scanner. Every evaluated candidate is recorded,
//! taken or not.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::autonomy::{gate, Disposition};
use crate::confidence::{CandidateAction, ConfidenceFactors, ConfidenceScorer};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::recorder::{DecisionDraft, DecisionRecorder};
use crate::store::KnowledgeStore;

/// Executes an allowed tool against the business backend.
///
/// The engine never executes anything itself; callers hand execution to
/// this seam once the gate returns an auto-capable disposition.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute the named tool for a user and return its result payload
    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// Executor that records the request and performs nothing.
///
/// Default seam for environments without a business backend wired in.
#[derive(Debug, Default, Clone)]
pub struct NoopExecutor;

#[async_trait]
impl ToolExecutor for NoopExecutor {
    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        _arguments: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        tracing::info!(user = user_id, tool = tool_name, "noop executor invoked");
        Ok(serde_json::json!({ "status": "queued", "tool": tool_name }))
    }
}

/// Outcome of evaluating one candidate action
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Id of the recorded decision (persistence is asynchronous)
    pub decision_id: Uuid,
    /// Gate disposition
    pub disposition: Disposition,
    /// Factors when the tool was scored; `None` for exempt tools
    pub factors: Option<ConfidenceFactors>,
}

/// The agentic decision engine
pub struct DecisionEngine {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: ConfidenceScorer,
    recorder: Arc<DecisionRecorder>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine").finish()
    }
}

impl DecisionEngine {
    /// Create an engine over the store and embedding provider
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let scorer = ConfidenceScorer::new(store.clone());
        let recorder = DecisionRecorder::spawn(store.clone(), embedder.clone());
        Self {
            store,
            embedder,
            scorer,
            recorder,
        }
    }

    /// Replace the default scorer (custom weights or golden set)
    pub fn with_scorer(mut self, scorer: ConfidenceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// The underlying knowledge store
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// The decision recorder, exposed for shutdown draining
    pub fn recorder(&self) -> &Arc<DecisionRecorder> {
        &self.recorder
    }

    /// Evaluate a candidate action for a user.
    ///
    /// Scores it (unless the tool kind is exempt), gates the composite
    /// against the user's autonomy settings and records the decision
    /// without blocking on persistence. Exempt tools come back
    /// `AutoSilent` with no factors: there is no side effect to gate.
    ///
    /// Caller contract: when the disposition allows execution, the caller
    /// performs the execution; `was_auto_executed` is recorded with that
    /// intent.
    pub async fn evaluate(
        &self,
        user_id: &str,
        mut candidate: CandidateAction,
    ) -> Result<Evaluation> {
        if candidate.embedding.is_none() {
            // Best-effort: a decision without an embedding is still stored,
            // it just never surfaces through similarity search.
            candidate.embedding = match self.embedder.embed(&candidate.input_summary).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(tool = %candidate.tool.name, error = %e, "candidate embedding failed");
                    None
                }
            };
        }

        let factors = self.scorer.score(user_id, &candidate)?;

        let disposition = match &factors {
            Some(factors) => {
                let settings = self.store.get_autonomy(user_id)?;
                gate(&settings, candidate.tool.category, factors.composite)
            }
            // Exempt tools have no side effect to gate
            None => Disposition::AutoSilent,
        };

        let was_auto_executed = factors.is_some() && disposition.allows_execution();

        let draft = DecisionDraft {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tool_name: candidate.tool.name.clone(),
            category: candidate.tool.category,
            input_summary: candidate.input_summary.clone(),
            factors,
            was_auto_executed,
        };
        let factors = draft.factors;
        let decision_id = self.recorder.record(draft);

        tracing::debug!(
            user = user_id,
            tool = %candidate.tool.name,
            disposition = ?disposition,
            "candidate evaluated"
        );

        Ok(Evaluation {
            decision_id,
            disposition,
            factors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autonomy::{AutonomyLevel, AutonomyPreset, AutonomySettings};
    use crate::confidence::SourceQuality;
    use crate::embedding::HashEmbedder;
    use crate::types::{DomainCategory, ToolDescriptor, ToolKind};

    fn engine() -> DecisionEngine {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        DecisionEngine::new(store, Arc::new(HashEmbedder::new()))
    }

    fn compliance_candidate() -> CandidateAction {
        CandidateAction {
            tool: ToolDescriptor::new(
                "file_compliance_certificate",
                ToolKind::External,
                DomainCategory::Compliance,
                "Arrange certificate renewal",
            ),
            input_summary: "Smoke alarm certificate expired at 12 Acacia Ave".to_string(),
            source: SourceQuality::LiveQuery,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_category_blocks_any_confidence() {
        let engine = engine();
        let mut settings = AutonomySettings::for_preset("owner-1", AutonomyPreset::HandsOff);
        settings.set_level(DomainCategory::Compliance, AutonomyLevel::Disabled);
        engine.store().put_autonomy(&settings).unwrap();

        let evaluation = engine
            .evaluate("owner-1", compliance_candidate())
            .await
            .unwrap();

        assert_eq!(evaluation.disposition, Disposition::Block);
        assert!(evaluation.factors.is_some());
    }

    #[tokio::test]
    async fn test_exempt_tool_bypasses_gate() {
        let engine = engine();

        let candidate = CandidateAction {
            tool: ToolDescriptor::new(
                "query_portfolio",
                ToolKind::Query,
                DomainCategory::General,
                "Look up records",
            ),
            input_summary: "current leases".to_string(),
            source: SourceQuality::LiveQuery,
            embedding: None,
        };
        let evaluation = engine.evaluate("owner-1", candidate).await.unwrap();

        assert_eq!(evaluation.disposition, Disposition::AutoSilent);
        assert!(evaluation.factors.is_none());
    }

    #[tokio::test]
    async fn test_evaluation_is_recorded() {
        let engine = engine();

        let evaluation = engine
            .evaluate("owner-1", compliance_candidate())
            .await
            .unwrap();
        engine.recorder().shutdown().await;

        let decision = engine
            .store()
            .get_decision("owner-1", evaluation.decision_id)
            .unwrap()
            .expect("decision persisted");
        assert_eq!(decision.tool_name, "file_compliance_certificate");
        let factors = decision.confidence_factors.expect("scored");
        assert!((decision.confidence.unwrap() - factors.composite).abs() <= 0.01);
    }
}
