//! Outcome tracking and temporal decay
//!
//! Runs on the heartbeat schedule. Two independent jobs: reconcile
//! whether past auto-executed or approved decisions actually succeeded,
//! and decay confidence on rules that have not been reinforced recently.
//! Rules that reach zero confidence are deactivated, never deleted.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::{DecisionRecord, KnowledgeStore, OutcomeRecord};
use crate::types::{now, OwnerFeedback};

/// How many pending decisions one pass measures at most
const MEASURE_BATCH: usize = 200;

/// Measures the real-world result of a past decision.
///
/// Returns `Ok(None)` when no signal is available yet; the tracker will
/// retry on the next pass until the decision ages out.
#[async_trait]
pub trait OutcomeProbe: Send + Sync {
    /// Measure one decision: `Some((success, detail))` or no signal yet
    async fn measure(&self, decision: &DecisionRecord) -> Result<Option<(bool, String)>>;
}

/// Default probe: derives success from explicitly recorded owner
/// feedback. Deployments inject a backend-query probe for real
/// measurement (did the rent reminder result in payment, etc.).
#[derive(Debug, Default, Clone)]
pub struct FeedbackProbe;

#[async_trait]
impl OutcomeProbe for FeedbackProbe {
    async fn measure(&self, decision: &DecisionRecord) -> Result<Option<(bool, String)>> {
        Ok(decision.owner_feedback.map(|feedback| match feedback {
            OwnerFeedback::Approved => (true, "owner approved the action".to_string()),
            OwnerFeedback::Rejected => (false, "owner rejected the action".to_string()),
        }))
    }
}

/// Counters for one tracker pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutcomeSummary {
    /// Outcomes measured and inserted
    pub measured: usize,
    /// Decisions closed as unmeasured after the hard ceiling
    pub closed_unmeasured: usize,
    /// Decisions still awaiting a signal
    pub still_pending: usize,
    /// Rules decayed across all users
    pub rules_decayed: usize,
}

/// Closes the feedback loop on past decisions and decays stale rules
pub struct OutcomeTracker {
    store: Arc<KnowledgeStore>,
    probe: Arc<dyn OutcomeProbe>,
    /// Decisions younger than this are not measured yet
    grace: chrono::Duration,
    /// Decisions older than this without a signal are closed as failures
    max_age: chrono::Duration,
}

impl std::fmt::Debug for OutcomeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeTracker")
            .field("grace", &self.grace)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl OutcomeTracker {
    /// Tracker with the default feedback-derived probe, a 24h grace
    /// period and a 90-day measurement ceiling
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self {
            store,
            probe: Arc::new(FeedbackProbe),
            grace: chrono::Duration::hours(24),
            max_age: chrono::Duration::days(90),
        }
    }

    /// Inject a custom probe
    pub fn with_probe(mut self, probe: Arc<dyn OutcomeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Override the grace period
    pub fn with_grace(mut self, grace: chrono::Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Measure pending decisions past the grace period.
    ///
    /// Decisions older than the ceiling with no signal are closed as
    /// unmeasured failures so the loop always terminates.
    pub async fn measure_pending(&self) -> Result<OutcomeSummary> {
        let mut summary = OutcomeSummary::default();
        let pending = self
            .store
            .decisions_awaiting_outcome(self.grace, MEASURE_BATCH)?;

        for decision in pending {
            match self.probe.measure(&decision).await? {
                Some((success, detail)) => {
                    self.store.insert_outcome(&OutcomeRecord {
                        id: Uuid::new_v4(),
                        decision_id: decision.id,
                        measured_at: now(),
                        success,
                        detail,
                    })?;
                    summary.measured += 1;
                }
                None if now() - decision.created_at > self.max_age => {
                    self.store.insert_outcome(&OutcomeRecord {
                        id: Uuid::new_v4(),
                        decision_id: decision.id,
                        measured_at: now(),
                        success: false,
                        detail: format!(
                            "no outcome signal within {} days",
                            self.max_age.num_days()
                        ),
                    })?;
                    summary.closed_unmeasured += 1;
                }
                None => summary.still_pending += 1,
            }
        }

        tracing::info!(
            measured = summary.measured,
            closed = summary.closed_unmeasured,
            pending = summary.still_pending,
            "outcome measurement pass finished"
        );
        Ok(summary)
    }

    /// Decay stale rules for one user; see the knowledge-store RPC
    pub fn decay_stale_rules(
        &self,
        user_id: &str,
        days_threshold: i64,
        decay_amount: f32,
    ) -> Result<usize> {
        self.store
            .decay_stale_rules(user_id, days_threshold, decay_amount)
    }

    /// Decay stale rules for every user holding active rules
    pub fn decay_all(&self, days_threshold: i64, decay_amount: f32) -> Result<usize> {
        let mut decayed = 0;
        for user_id in self.store.rule_users()? {
            decayed += self
                .store
                .decay_stale_rules(&user_id, days_threshold, decay_amount)?;
        }
        Ok(decayed)
    }

    /// Prune learning data past the retention window
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        self.store.cleanup_old_learning_data(retention_days)
    }

    /// Full tracker pass: measurement plus global decay
    pub async fn run(&self, decay_days: i64, decay_amount: f32) -> Result<OutcomeSummary> {
        let mut summary = self.measure_pending().await?;
        summary.rules_decayed = self.decay_all(decay_days, decay_amount)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashEmbedder};
    use crate::store::RuleRecord;
    use crate::types::DomainCategory;

    fn store() -> Arc<KnowledgeStore> {
        Arc::new(KnowledgeStore::open_in_memory().unwrap())
    }

    fn decision_at(store: &KnowledgeStore, age: chrono::Duration, auto: bool) -> Uuid {
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
                was_auto_executed: auto,
                created_at: now() - age,
            })
            .unwrap();
        id
    }

    async fn rule_reinforced_at(store: &KnowledgeStore, age_days: i64) -> Uuid {
        let embedding = HashEmbedder::new()
            .embed("weekday trades only")
            .await
            .unwrap()
            .unwrap();
        let rule = RuleRecord {
            id: Uuid::new_v4(),
            user_id: "owner-1".into(),
            rule_text: "weekday trades only".into(),
            embedding,
            confidence: 0.5,
            active: true,
            last_reinforced_at: now() - chrono::Duration::days(age_days),
            created_at: now() - chrono::Duration::days(age_days),
        };
        store.insert_rule(&rule).unwrap();
        rule.id
    }

    #[tokio::test]
    async fn test_feedback_probe_measures_approved() {
        let store = store();
        let id = decision_at(&store, chrono::Duration::days(2), false);
        store
            .set_owner_feedback("owner-1", id, OwnerFeedback::Approved)
            .unwrap();

        let tracker = OutcomeTracker::new(store.clone());
        let summary = tracker.measure_pending().await.unwrap();

        assert_eq!(summary.measured, 1);
        let record = store
            .recent_outcomes("owner-1", "send_rent_reminder", DomainCategory::RentCollection, 5)
            .unwrap();
        assert_eq!(record.len(), 1);
        assert!(record[0].0);
    }

    #[tokio::test]
    async fn test_unsignalled_decision_stays_pending_then_closes() {
        let store = store();
        // Auto-executed, no feedback: no signal from the default probe
        decision_at(&store, chrono::Duration::days(2), true);
        decision_at(&store, chrono::Duration::days(120), true);

        let tracker = OutcomeTracker::new(store);
        let summary = tracker.measure_pending().await.unwrap();

        assert_eq!(summary.still_pending, 1);
        assert_eq!(summary.closed_unmeasured, 1);
    }

    #[tokio::test]
    async fn test_grace_period_excludes_fresh_decisions() {
        let store = store();
        decision_at(&store, chrono::Duration::hours(1), true);

        let tracker = OutcomeTracker::new(store);
        let summary = tracker.measure_pending().await.unwrap();

        assert_eq!(summary.measured + summary.still_pending + summary.closed_unmeasured, 0);
    }

    #[tokio::test]
    async fn test_decay_respects_threshold() {
        let store = store();
        let rule_id = rule_reinforced_at(&store, 1).await;
        let tracker = OutcomeTracker::new(store.clone());

        // Threshold exceeds elapsed time: unchanged
        tracker.decay_stale_rules("owner-1", 30, 0.1).unwrap();
        let rule = store.get_rule("owner-1", rule_id).unwrap().unwrap();
        assert!((rule.confidence - 0.5).abs() < 1e-6);

        // Elapsed time exceeds threshold: reduced to 0.4
        tracker.decay_stale_rules("owner-1", 0, 0.1).unwrap();
        let rule = store.get_rule("owner-1", rule_id).unwrap().unwrap();
        assert!((rule.confidence - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_decay_floors_at_zero_and_deactivates() {
        let store = store();
        let rule_id = rule_reinforced_at(&store, 100).await;
        let tracker = OutcomeTracker::new(store.clone());

        for _ in 0..6 {
            tracker.decay_stale_rules("owner-1", 0, 0.1).unwrap();
        }

        let rule = store.get_rule("owner-1", rule_id).unwrap().unwrap();
        assert!(rule.confidence.abs() < 1e-6);
        assert!(!rule.active, "zero-confidence rules deactivate, not delete");
    }
}
