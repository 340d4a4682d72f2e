//! Learning pipeline
//!
//! Classifies explicit corrections and tool-execution errors into one of
//! four artifact kinds and upserts the corresponding knowledge-store
//! record. Learning is best-effort from the caller's point of view:
//! classification problems produce a typed `LearnResult` with
//! `learned: false`, never an error that would break the chat turn.
//! Storage or embedding unavailability on a mandatory-embedding write is
//! the exception — those fail the whole write.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, Result};
use crate::store::{CorrectionRecord, KnowledgeStore, PreferenceKind};
use crate::types::{now, DomainCategory, OwnerFeedback, ParseEnumError};

/// Cosine similarity above which a new factual rule is treated as a
/// near-duplicate of an existing one and reinforces it instead
pub const RULE_DEDUP_THRESHOLD: f32 = 0.92;

/// Confidence assigned to a freshly learned rule
pub const RULE_START_CONFIDENCE: f32 = 0.5;

/// Confidence bump applied when a rule is reinforced
pub const RULE_REINFORCE_BUMP: f32 = 0.1;

/// Similarity floor for memory recall
const RECALL_THRESHOLD: f32 = 0.3;

/// Classified source of a learning event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The agent asserted something factually wrong
    FactualError,
    /// The agent reasoned incorrectly from correct facts
    ReasoningError,
    /// The agent invoked a tool wrongly
    ToolMisuse,
    /// The agent acted without context it should have fetched first
    ContextMissing,
}

impl ErrorKind {
    /// Wire name, e.g. `FACTUAL_ERROR`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FactualError => "FACTUAL_ERROR",
            ErrorKind::ReasoningError => "REASONING_ERROR",
            ErrorKind::ToolMisuse => "TOOL_MISUSE",
            ErrorKind::ContextMissing => "CONTEXT_MISSING",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "FACTUAL_ERROR" => Ok(ErrorKind::FactualError),
            "REASONING_ERROR" => Ok(ErrorKind::ReasoningError),
            "TOOL_MISUSE" => Ok(ErrorKind::ToolMisuse),
            "CONTEXT_MISSING" => Ok(ErrorKind::ContextMissing),
            other => Err(ParseEnumError {
                kind: "error kind",
                value: other.to_string(),
            }),
        }
    }
}

/// The closed set of artifacts the pipeline can produce.
///
/// Dispatch from `ErrorKind` is a total match; adding a fifth error class
/// is a compile-time-checked addition, not a string branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A learned factual rule (possibly reinforcing an existing one)
    Rule,
    /// A prompt-guidance preference
    PromptGuidance,
    /// A structural per-tool failure-pattern update
    ToolGenomeUpdate,
    /// A required-context preference
    ContextPattern,
}

/// Typed result of a learning attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnResult {
    /// Whether an artifact was produced or reinforced
    pub learned: bool,
    /// Which artifact kind was produced
    pub artifact_type: Option<ArtifactKind>,
    /// Identifier of the produced/reinforced artifact, where applicable
    pub artifact_id: Option<Uuid>,
    /// Why nothing was learned, when `learned` is false
    pub reason: Option<String>,
}

impl LearnResult {
    fn learned(artifact_type: ArtifactKind, artifact_id: Option<Uuid>) -> Self {
        Self {
            learned: true,
            artifact_type: Some(artifact_type),
            artifact_id,
            reason: None,
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            learned: false,
            artifact_type: None,
            artifact_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// One hit from a semantic memory recall
#[derive(Debug, Clone, Serialize)]
pub struct RecallHit {
    /// Which memory surfaced it: `rule`, `preference` or `decision`
    pub kind: String,
    /// The remembered text
    pub text: String,
    /// Cosine similarity to the query
    pub similarity: f32,
}

/// Classifies corrections and errors into knowledge-store artifacts
pub struct LearningPipeline {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for LearningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningPipeline").finish()
    }
}

impl LearningPipeline {
    /// Create a pipeline over the store and embedding provider
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Record an explicit human correction.
    ///
    /// Always inserts; the embedding is mandatory, so empty correction
    /// text or a failed embedding call fails the whole write.
    pub async fn record_correction(
        &self,
        user_id: &str,
        original_action: &str,
        correction: &str,
        context_snapshot: serde_json::Value,
        category: DomainCategory,
    ) -> Result<Uuid> {
        if correction.trim().is_empty() {
            return Err(crate::error::LearningError::EmptyCorrection.into());
        }

        let embedding = self
            .embedder
            .embed(correction)
            .await?
            .ok_or(EmbeddingError::MissingEmbedding("correction"))?;

        let record = CorrectionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            original_action: original_action.to_string(),
            correction_text: correction.to_string(),
            context_snapshot,
            category,
            embedding,
            created_at: now(),
        };
        self.store.insert_correction(&record)?;

        tracing::info!(user = user_id, category = %category, "correction recorded");
        Ok(record.id)
    }

    /// Classify a tool-execution error and learn from it.
    ///
    /// Routed by `error_kind`; see `ArtifactKind` for what each class
    /// produces. Returns `learned: false` with a reason instead of
    /// erroring when there is nothing useful to learn.
    pub async fn classify_and_learn(
        &self,
        user_id: &str,
        error_kind: ErrorKind,
        tool_name: &str,
        error_message: &str,
        input_summary: &str,
        category: DomainCategory,
    ) -> Result<LearnResult> {
        if error_message.trim().is_empty() {
            return Ok(LearnResult::skipped("empty error message"));
        }

        match error_kind {
            ErrorKind::FactualError => {
                let embedding = self
                    .embedder
                    .embed(error_message)
                    .await?
                    .ok_or(EmbeddingError::MissingEmbedding("rule"))?;

                let (id, reinforced) = self.store.dedup_or_insert_rule(
                    user_id,
                    error_message,
                    &embedding,
                    RULE_DEDUP_THRESHOLD,
                    RULE_START_CONFIDENCE,
                    RULE_REINFORCE_BUMP,
                )?;

                tracing::info!(
                    user = user_id,
                    rule = %id,
                    reinforced,
                    "factual correction learned"
                );
                Ok(LearnResult::learned(ArtifactKind::Rule, Some(id)))
            }

            ErrorKind::ReasoningError => {
                let guidance = format!(
                    "When using {tool_name}: {error_message}"
                );
                let embedding = self
                    .embedder
                    .embed(&guidance)
                    .await?
                    .ok_or(EmbeddingError::MissingEmbedding("preference"))?;

                let id = self.store.upsert_preference(
                    user_id,
                    &format!("prompt_guidance:{tool_name}"),
                    &guidance,
                    category,
                    PreferenceKind::PromptGuidance,
                    &embedding,
                )?;
                Ok(LearnResult::learned(ArtifactKind::PromptGuidance, Some(id)))
            }

            ErrorKind::ToolMisuse => {
                let guardrail = format!(
                    "Previous invocation failed: {error_message}. \
                     Double-check arguments before calling {tool_name}."
                );
                let failures =
                    self.store
                        .record_tool_failure(user_id, tool_name, error_message, &guardrail)?;

                tracing::info!(
                    user = user_id,
                    tool = tool_name,
                    failures,
                    "tool failure pattern updated"
                );
                Ok(LearnResult::learned(ArtifactKind::ToolGenomeUpdate, None))
            }

            ErrorKind::ContextMissing => {
                let pattern = if input_summary.trim().is_empty() {
                    format!(
                        "Before using {tool_name} for {category}, fetch: {error_message}"
                    )
                } else {
                    format!(
                        "Before using {tool_name} for {category} ({input_summary}), fetch: {error_message}"
                    )
                };
                let embedding = self
                    .embedder
                    .embed(&pattern)
                    .await?
                    .ok_or(EmbeddingError::MissingEmbedding("preference"))?;

                let id = self.store.upsert_preference(
                    user_id,
                    &format!("context_pattern:{}:{tool_name}", category.as_str()),
                    &pattern,
                    category,
                    PreferenceKind::ContextPattern,
                    &embedding,
                )?;
                Ok(LearnResult::learned(ArtifactKind::ContextPattern, Some(id)))
            }
        }
    }

    /// Store an explicit "remember" preference.
    ///
    /// Upserts by `(user_id, preference_key)`; the embedding is mandatory.
    pub async fn remember(
        &self,
        user_id: &str,
        preference_key: &str,
        value: &str,
        category: DomainCategory,
    ) -> Result<Uuid> {
        let embedding = self
            .embedder
            .embed(value)
            .await?
            .ok_or(EmbeddingError::MissingEmbedding("preference"))?;

        self.store.upsert_preference(
            user_id,
            preference_key,
            value,
            category,
            PreferenceKind::Remembered,
            &embedding,
        )
    }

    /// Search the semantic memory across rules, preferences and past
    /// decisions, ranked by similarity to the query text.
    pub async fn recall(
        &self,
        user_id: &str,
        query: &str,
        count: usize,
    ) -> Result<Vec<RecallHit>> {
        let Some(embedding) = self.embedder.embed(query).await? else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for m in self
            .store
            .search_similar_rules(&embedding, user_id, RECALL_THRESHOLD, count)?
        {
            hits.push(RecallHit {
                kind: "rule".to_string(),
                text: m.record.rule_text,
                similarity: m.similarity,
            });
        }
        for m in self
            .store
            .search_similar_preferences(&embedding, user_id, RECALL_THRESHOLD, count)?
        {
            hits.push(RecallHit {
                kind: "preference".to_string(),
                text: m.record.value,
                similarity: m.similarity,
            });
        }
        for m in self
            .store
            .search_similar_decisions(&embedding, user_id, RECALL_THRESHOLD, count)?
        {
            hits.push(RecallHit {
                kind: "decision".to_string(),
                text: m.record.input_summary,
                similarity: m.similarity,
            });
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(count);
        Ok(hits)
    }

    /// Apply explicit owner feedback to a recorded decision.
    ///
    /// Linearizable per decision id: the feedback transition happens
    /// exactly once, and a second call fails with a conflict.
    pub fn process_feedback(
        &self,
        user_id: &str,
        decision_id: Uuid,
        feedback: OwnerFeedback,
    ) -> Result<()> {
        self.store
            .set_owner_feedback(user_id, decision_id, feedback)?;
        tracing::info!(
            user = user_id,
            decision = %decision_id,
            feedback = feedback.as_str(),
            "owner feedback recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::{StoreError, StewardError};
    use crate::store::DecisionRecord;

    fn pipeline() -> (Arc<KnowledgeStore>, LearningPipeline) {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new());
        (store.clone(), LearningPipeline::new(store, embedder))
    }

    #[tokio::test]
    async fn test_correction_always_inserts_with_embedding() {
        let (store, pipeline) = pipeline();

        let id = pipeline
            .record_correction(
                "owner-1",
                "scheduled the plumber for Saturday",
                "This owner never wants weekend callout fees; book weekdays only",
                serde_json::json!({"job": "leaking tap"}),
                DomainCategory::Maintenance,
            )
            .await
            .unwrap();

        assert!(!id.is_nil());
        assert_eq!(store.counts().unwrap().corrections, 1);
    }

    #[tokio::test]
    async fn test_empty_correction_rejected() {
        let (_, pipeline) = pipeline();

        let err = pipeline
            .record_correction(
                "owner-1",
                "original",
                "   ",
                serde_json::Value::Null,
                DomainCategory::General,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StewardError::Learning(_)));
    }

    #[tokio::test]
    async fn test_factual_error_dedups_into_one_rule() {
        let (store, pipeline) = pipeline();
        let message = "The bond for 12 Acacia Ave is held by the state authority, not in trust";

        let first = pipeline
            .classify_and_learn(
                "owner-1",
                ErrorKind::FactualError,
                "lodge_bond",
                message,
                "bond lodgement",
                DomainCategory::Bonds,
            )
            .await
            .unwrap();
        let second = pipeline
            .classify_and_learn(
                "owner-1",
                ErrorKind::FactualError,
                "lodge_bond",
                message,
                "bond lodgement",
                DomainCategory::Bonds,
            )
            .await
            .unwrap();

        assert!(first.learned && second.learned);
        assert_eq!(first.artifact_type, Some(ArtifactKind::Rule));
        assert_eq!(first.artifact_id, second.artifact_id);

        let rules = store.active_rules("owner-1").unwrap();
        assert_eq!(rules.len(), 1);
        // Reinforced: 0.5 start + 0.1 bump
        assert!((rules[0].confidence - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reasoning_error_upserts_guidance() {
        let (store, pipeline) = pipeline();

        for message in [
            "compare quotes before assigning",
            "always compare at least two quotes before assigning",
        ] {
            let result = pipeline
                .classify_and_learn(
                    "owner-1",
                    ErrorKind::ReasoningError,
                    "assign_trade",
                    message,
                    "",
                    DomainCategory::Maintenance,
                )
                .await
                .unwrap();
            assert_eq!(result.artifact_type, Some(ArtifactKind::PromptGuidance));
        }

        // Upsert by key: one row, latest value wins
        assert_eq!(store.counts().unwrap().preferences, 1);
        let preference = store
            .get_preference("owner-1", "prompt_guidance:assign_trade")
            .unwrap()
            .unwrap();
        assert!(preference.value.contains("two quotes"));
    }

    #[tokio::test]
    async fn test_tool_misuse_accumulates_genome() {
        let (store, pipeline) = pipeline();

        for _ in 0..3 {
            pipeline
                .classify_and_learn(
                    "owner-1",
                    ErrorKind::ToolMisuse,
                    "sync_accounting",
                    "called with an unreconciled period",
                    "",
                    DomainCategory::General,
                )
                .await
                .unwrap();
        }

        let genome = store
            .get_tool_genome("owner-1", "sync_accounting")
            .unwrap()
            .unwrap();
        assert_eq!(genome.failure_count, 3);
        assert!(genome.guardrail.contains("sync_accounting"));
    }

    #[tokio::test]
    async fn test_empty_error_message_is_typed_skip() {
        let (_, pipeline) = pipeline();

        let result = pipeline
            .classify_and_learn(
                "owner-1",
                ErrorKind::FactualError,
                "assign_trade",
                "",
                "",
                DomainCategory::Maintenance,
            )
            .await
            .unwrap();

        assert!(!result.learned);
        assert!(result.reason.is_some());
    }

    #[tokio::test]
    async fn test_feedback_exactly_once() {
        let (store, pipeline) = pipeline();

        let decision_id = Uuid::new_v4();
        store
            .insert_decision(&DecisionRecord {
                id: decision_id,
                user_id: "owner-1".into(),
                tool_name: "send_rent_reminder".into(),
                category: DomainCategory::RentCollection,
                input_summary: "reminder".into(),
                confidence_factors: None,
                confidence: None,
                embedding: None,
                owner_feedback: None,
                was_auto_executed: false,
                created_at: now(),
            })
            .unwrap();

        pipeline
            .process_feedback("owner-1", decision_id, OwnerFeedback::Approved)
            .unwrap();

        let err = pipeline
            .process_feedback("owner-1", decision_id, OwnerFeedback::Rejected)
            .unwrap_err();
        assert!(matches!(
            err,
            StewardError::Store(StoreError::FeedbackAlreadySet(_))
        ));

        // The first transition survives
        let decision = store.get_decision("owner-1", decision_id).unwrap().unwrap();
        assert_eq!(decision.owner_feedback, Some(OwnerFeedback::Approved));
    }

    #[tokio::test]
    async fn test_remember_then_recall() {
        let (_, pipeline) = pipeline();

        pipeline
            .remember(
                "owner-1",
                "trades:weekends",
                "Never book weekend trade callouts for this portfolio",
                DomainCategory::Maintenance,
            )
            .await
            .unwrap();

        let hits = pipeline
            .recall("owner-1", "Never book weekend trade callouts for this portfolio", 5)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].kind, "preference");
        assert!(hits[0].similarity > 0.9);

        // Another user's memory stays isolated
        let foreign = pipeline.recall("owner-2", "weekend callouts", 5).await.unwrap();
        assert!(foreign.is_empty());
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            "FACTUAL_ERROR".parse::<ErrorKind>().unwrap(),
            ErrorKind::FactualError
        );
        assert_eq!(ErrorKind::ContextMissing.as_str(), "CONTEXT_MISSING");
        assert!("OTHER".parse::<ErrorKind>().is_err());
    }
}
