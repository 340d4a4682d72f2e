//! Confidence scorer
//!
//! Computes six independent confidence factors plus a weighted composite
//! for any candidate tool invocation. Purely computational: no side
//! effects. All factors are populated together or the computation fails —
//! a partial score is an error, never a default. Query/memory tools are
//! exempt by construction (`ToolKind::requires_scoring`) and score to
//! `None`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::store::KnowledgeStore;
use crate::types::{OwnerFeedback, ToolDescriptor};

/// Neutral prior used for factors with no history to draw on
const NEUTRAL: f32 = 0.5;

/// Similarity floor when collecting precedents and rules as signals
const SIGNAL_THRESHOLD: f32 = 0.3;

/// How many candidate precedents/rules to consider per factor
const SIGNAL_COUNT: usize = 20;

/// Per-step multiplier for recency weighting of outcomes, newest first
const RECENCY_FALLOFF: f32 = 0.85;

/// Reliability of the data a candidate action is based on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceQuality {
    /// Fresh query against live business data
    LiveQuery,
    /// Recently cached data
    CachedRecent,
    /// Stale cache
    CachedStale,
    /// Inferred or secondhand
    Inferred,
}

impl SourceQuality {
    /// Factor contribution for this source class
    pub fn score(self) -> f32 {
        match self {
            SourceQuality::LiveQuery => 1.0,
            SourceQuality::CachedRecent => 0.8,
            SourceQuality::CachedStale => 0.5,
            SourceQuality::Inferred => 0.3,
        }
    }
}

/// The six confidence factors plus their weighted composite.
///
/// Every field is in [0, 1]; `composite` is the fixed-weight combination
/// of the other six.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    /// Success rate of past decisions with matching (tool, category)
    pub historical_accuracy: f32,
    /// Reliability of the data the action is based on
    pub source_quality: f32,
    /// Max similarity against prior successful decisions
    pub precedent_alignment: f32,
    /// Presence/strength of matching active rules
    pub rule_alignment: f32,
    /// Similarity to the curated golden set, when configured
    pub golden_alignment: f32,
    /// Recency-weighted outcome success for the tool/category
    pub outcome_track: f32,
    /// Weighted combination of the six factors
    pub composite: f32,
}

impl ConfidenceFactors {
    /// Whether every factor and the composite sit in [0, 1]
    pub fn is_normalized(&self) -> bool {
        [
            self.historical_accuracy,
            self.source_quality,
            self.precedent_alignment,
            self.rule_alignment,
            self.golden_alignment,
            self.outcome_track,
            self.composite,
        ]
        .iter()
        .all(|f| (0.0..=1.0).contains(f))
    }
}

/// Fixed weights combining the six factors into the composite
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorWeights {
    /// Weight of historical accuracy
    pub historical_accuracy: f32,
    /// Weight of source quality
    pub source_quality: f32,
    /// Weight of precedent alignment
    pub precedent_alignment: f32,
    /// Weight of rule alignment
    pub rule_alignment: f32,
    /// Weight of golden alignment
    pub golden_alignment: f32,
    /// Weight of the outcome track
    pub outcome_track: f32,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            historical_accuracy: 0.25,
            source_quality: 0.15,
            precedent_alignment: 0.20,
            rule_alignment: 0.15,
            golden_alignment: 0.10,
            outcome_track: 0.15,
        }
    }
}

impl FactorWeights {
    fn total(&self) -> f32 {
        self.historical_accuracy
            + self.source_quality
            + self.precedent_alignment
            + self.rule_alignment
            + self.golden_alignment
            + self.outcome_track
    }

    /// Weighted composite of six factor values
    pub fn composite(
        &self,
        historical_accuracy: f32,
        source_quality: f32,
        precedent_alignment: f32,
        rule_alignment: f32,
        golden_alignment: f32,
        outcome_track: f32,
    ) -> f32 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted = historical_accuracy * self.historical_accuracy
            + source_quality * self.source_quality
            + precedent_alignment * self.precedent_alignment
            + rule_alignment * self.rule_alignment
            + golden_alignment * self.golden_alignment
            + outcome_track * self.outcome_track;
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// A curated known-correct example for the golden-alignment factor
#[derive(Debug, Clone)]
pub struct GoldenExample {
    /// What the example demonstrates
    pub description: String,
    /// Its embedding
    pub embedding: Vec<f32>,
}

/// A candidate tool invocation to score
#[derive(Debug, Clone)]
pub struct CandidateAction {
    /// The registered tool being considered
    pub tool: ToolDescriptor,
    /// Short description of the proposed input
    pub input_summary: String,
    /// Reliability class of the data behind the proposal
    pub source: SourceQuality,
    /// Embedding of the input summary, when one could be computed
    pub embedding: Option<Vec<f32>>,
}

/// Computes confidence factors from knowledge-store signals
pub struct ConfidenceScorer {
    store: Arc<KnowledgeStore>,
    weights: FactorWeights,
    golden: Vec<GoldenExample>,
}

impl std::fmt::Debug for ConfidenceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidenceScorer")
            .field("weights", &self.weights)
            .field("golden", &self.golden.len())
            .finish()
    }
}

impl ConfidenceScorer {
    /// Create a scorer with default weights and no golden set
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self {
            store,
            weights: FactorWeights::default(),
            golden: Vec::new(),
        }
    }

    /// Override the factor weights
    pub fn with_weights(mut self, weights: FactorWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Provide a curated golden set
    pub fn with_golden_set(mut self, golden: Vec<GoldenExample>) -> Self {
        self.golden = golden;
        self
    }

    /// Score a candidate action.
    ///
    /// Returns `Ok(None)` for scoring-exempt tools. Any failure while
    /// computing a factor fails the whole computation; the caller never
    /// sees a partially populated score.
    pub fn score(
        &self,
        user_id: &str,
        candidate: &CandidateAction,
    ) -> Result<Option<ConfidenceFactors>> {
        if candidate.tool.scoring_exempt() {
            return Ok(None);
        }

        let historical_accuracy = self.historical_accuracy(user_id, candidate)?;
        let source_quality = candidate.source.score();
        let precedent_alignment = self.precedent_alignment(user_id, candidate)?;
        let rule_alignment = self.rule_alignment(user_id, candidate)?;
        let golden_alignment = self.golden_alignment(candidate);
        let outcome_track = self.outcome_track(user_id, candidate)?;

        let composite = self.weights.composite(
            historical_accuracy,
            source_quality,
            precedent_alignment,
            rule_alignment,
            golden_alignment,
            outcome_track,
        );

        Ok(Some(ConfidenceFactors {
            historical_accuracy,
            source_quality,
            precedent_alignment,
            rule_alignment,
            golden_alignment,
            outcome_track,
            composite,
        }))
    }

    /// Success rate of past (tool, category) decisions, Laplace-smoothed
    /// so zero history lands on the neutral prior
    fn historical_accuracy(&self, user_id: &str, candidate: &CandidateAction) -> Result<f32> {
        let record =
            self.store
                .decision_track_record(user_id, &candidate.tool.name, candidate.tool.category)?;

        let positive = record.approvals + record.successes;
        let negative = record.rejections + record.failures;
        let total = positive + negative;

        Ok(((positive as f32 + 1.0) / (total as f32 + 2.0)).clamp(0.0, 1.0))
    }

    /// Max similarity against prior decisions that went well
    fn precedent_alignment(&self, user_id: &str, candidate: &CandidateAction) -> Result<f32> {
        let Some(embedding) = &candidate.embedding else {
            return Ok(NEUTRAL);
        };

        let matches = self.store.search_similar_decisions(
            embedding,
            user_id,
            SIGNAL_THRESHOLD,
            SIGNAL_COUNT,
        )?;

        let best = matches
            .iter()
            .filter(|m| {
                m.record.owner_feedback == Some(OwnerFeedback::Approved)
                    || m.record.was_auto_executed
            })
            .map(|m| m.similarity)
            .fold(None::<f32>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

        Ok(best.unwrap_or(NEUTRAL).clamp(0.0, 1.0))
    }

    /// Strength of matching active rules: similarity weighted by the
    /// rule's own decaying confidence
    fn rule_alignment(&self, user_id: &str, candidate: &CandidateAction) -> Result<f32> {
        let Some(embedding) = &candidate.embedding else {
            return Ok(NEUTRAL);
        };

        let matches =
            self.store
                .search_similar_rules(embedding, user_id, SIGNAL_THRESHOLD, SIGNAL_COUNT)?;

        let best = matches
            .iter()
            .map(|m| m.similarity * m.record.confidence)
            .fold(None::<f32>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

        Ok(best.unwrap_or(NEUTRAL).clamp(0.0, 1.0))
    }

    /// Similarity to the curated golden set, neutral when none configured
    fn golden_alignment(&self, candidate: &CandidateAction) -> f32 {
        let Some(embedding) = &candidate.embedding else {
            return NEUTRAL;
        };
        if self.golden.is_empty() {
            return NEUTRAL;
        }

        self.golden
            .iter()
            .map(|g| cosine_similarity(embedding, &g.embedding))
            .fold(0.0f32, f32::max)
            .clamp(0.0, 1.0)
    }

    /// Recency-weighted average of linked outcome success
    fn outcome_track(&self, user_id: &str, candidate: &CandidateAction) -> Result<f32> {
        let outcomes = self.store.recent_outcomes(
            user_id,
            &candidate.tool.name,
            candidate.tool.category,
            SIGNAL_COUNT,
        )?;

        if outcomes.is_empty() {
            return Ok(NEUTRAL);
        }

        let mut weight = 1.0f32;
        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        for (success, _measured_at) in &outcomes {
            weighted_sum += if *success { weight } else { 0.0 };
            weight_total += weight;
            weight *= RECENCY_FALLOFF;
        }

        Ok((weighted_sum / weight_total).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashEmbedder};
    use crate::store::{DecisionRecord, OutcomeRecord};
    use crate::types::{now, DomainCategory, ToolKind};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn action_tool() -> ToolDescriptor {
        ToolDescriptor::new(
            "send_rent_reminder",
            ToolKind::Action,
            DomainCategory::RentCollection,
            "Send an arrears reminder",
        )
    }

    fn candidate(embedding: Option<Vec<f32>>) -> CandidateAction {
        CandidateAction {
            tool: action_tool(),
            input_summary: "Tenant at 12 Acacia Ave is 5 days overdue".to_string(),
            source: SourceQuality::LiveQuery,
            embedding,
        }
    }

    async fn embed(text: &str) -> Vec<f32> {
        HashEmbedder::new().embed(text).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_exempt_tools_score_to_none() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let scorer = ConfidenceScorer::new(store);

        let query_tool = ToolDescriptor::new(
            "query_ledger",
            ToolKind::Query,
            DomainCategory::RentCollection,
            "Look up the rent ledger",
        );
        let candidate = CandidateAction {
            tool: query_tool,
            input_summary: "ledger for tenancy 42".to_string(),
            source: SourceQuality::LiveQuery,
            embedding: None,
        };

        assert!(scorer.score("owner-1", &candidate).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cold_start_is_fully_populated() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let scorer = ConfidenceScorer::new(store);

        let embedding = embed("overdue rent reminder").await;
        let factors = scorer
            .score("owner-1", &candidate(Some(embedding)))
            .unwrap()
            .expect("action tools are scored");

        assert!(factors.is_normalized());
        // No history: everything except source quality sits on the prior
        assert!((factors.historical_accuracy - 0.5).abs() < 1e-6);
        assert!((factors.source_quality - 1.0).abs() < 1e-6);
        assert!((factors.outcome_track - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_history_moves_historical_accuracy() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());

        // Two approved decisions and a successful outcome
        for _ in 0..2 {
            let id = Uuid::new_v4();
            store
                .insert_decision(&DecisionRecord {
                    id,
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
            store
                .set_owner_feedback("owner-1", id, OwnerFeedback::Approved)
                .unwrap();
            store
                .insert_outcome(&OutcomeRecord {
                    id: Uuid::new_v4(),
                    decision_id: id,
                    measured_at: now(),
                    success: true,
                    detail: "rent paid".into(),
                })
                .unwrap();
        }

        let scorer = ConfidenceScorer::new(store);
        let factors = scorer
            .score("owner-1", &candidate(None))
            .unwrap()
            .expect("scored");

        assert!(factors.historical_accuracy > 0.5);
        assert!(factors.outcome_track > 0.9);
    }

    #[tokio::test]
    async fn test_golden_alignment_tracks_similarity() {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let golden_text = "send a polite arrears reminder after five days overdue";
        let golden = vec![GoldenExample {
            description: golden_text.to_string(),
            embedding: embed(golden_text).await,
        }];
        let scorer = ConfidenceScorer::new(store).with_golden_set(golden);

        let same = scorer
            .score("owner-1", &candidate(Some(embed(golden_text).await)))
            .unwrap()
            .unwrap();
        let different = scorer
            .score(
                "owner-1",
                &candidate(Some(embed("replace the hot water system").await)),
            )
            .unwrap()
            .unwrap();

        assert!(same.golden_alignment > different.golden_alignment);
    }

    proptest! {
        #[test]
        fn composite_stays_normalized(
            a in 0.0f32..=1.0, b in 0.0f32..=1.0, c in 0.0f32..=1.0,
            d in 0.0f32..=1.0, e in 0.0f32..=1.0, f in 0.0f32..=1.0,
        ) {
            let composite = FactorWeights::default().composite(a, b, c, d, e, f);
            prop_assert!((0.0..=1.0).contains(&composite));
        }
    }
}
