//! Heartbeat scanner
//!
//! Scheduled, stateless sweep over every domain category looking for
//! business state changes that need proactive action, independent of any
//! chat turn. Each qualifying record is synthesized into a task with a
//! concrete recommendation, run through the confidence scorer and the
//! autonomy gate, and either suggested, drafted, or executed. Re-running
//! a sweep never duplicates tasks: the idempotency key is the business
//! entity, the category and a coarse time bucket.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::confidence::{CandidateAction, SourceQuality};
use crate::engine::{DecisionEngine, ToolExecutor};
use crate::error::{Result, StewardError};
use crate::store::TaskRecord;
use crate::types::{now, DomainCategory, Priority, TaskStatus, Timestamp, ToolRegistry};

/// An opaque business record surfaced by the portfolio feed.
///
/// The engine never interprets the domain schema beyond these fields; the
/// feed decides what maps onto them.
#[derive(Debug, Clone)]
pub struct PortfolioRecord {
    /// Stable business-entity id (request id, lease id, policy id, ...)
    pub entity_id: String,
    /// Owning user
    pub user_id: String,
    /// Domain the record belongs to
    pub category: DomainCategory,
    /// Human-readable description, e.g. "Leaking tap at 12 Acacia Ave"
    pub summary: String,
    /// Opaque state label, e.g. "open", "overdue", "expired"
    pub state: String,
    /// When the current state began
    pub opened_at: Timestamp,
    /// Deadline, where the domain has one
    pub due_at: Option<Timestamp>,
    /// Money amount in cents, where relevant
    pub amount_cents: Option<i64>,
    /// Whether a trade/agent is already assigned
    pub assigned: bool,
}

/// Source of business records for the sweep
#[async_trait]
pub trait PortfolioFeed: Send + Sync {
    /// Records for one category, optionally narrowed to one user
    async fn scan(
        &self,
        category: DomainCategory,
        user_id: Option<&str>,
    ) -> Result<Vec<PortfolioRecord>>;
}

/// In-memory feed used by tests and local development
#[derive(Debug, Default)]
pub struct FixtureFeed {
    records: std::sync::Mutex<Vec<PortfolioRecord>>,
}

impl FixtureFeed {
    /// Empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record
    pub fn push(&self, record: PortfolioRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[async_trait]
impl PortfolioFeed for FixtureFeed {
    async fn scan(
        &self,
        category: DomainCategory,
        user_id: Option<&str>,
    ) -> Result<Vec<PortfolioRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.category == category)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect())
    }
}

/// HTTP-backed feed querying the business backend
#[derive(Debug, Clone)]
pub struct HttpPortfolioFeed {
    client: reqwest::Client,
    base_url: String,
    service_token: String,
}

impl HttpPortfolioFeed {
    /// Create a feed against the backend base URL
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            service_token: service_token.into(),
        }
    }
}

#[derive(serde::Deserialize)]
struct WireRecord {
    entity_id: String,
    user_id: String,
    summary: String,
    state: String,
    opened_at: Timestamp,
    due_at: Option<Timestamp>,
    amount_cents: Option<i64>,
    #[serde(default)]
    assigned: bool,
}

#[async_trait]
impl PortfolioFeed for HttpPortfolioFeed {
    async fn scan(
        &self,
        category: DomainCategory,
        user_id: Option<&str>,
    ) -> Result<Vec<PortfolioRecord>> {
        let mut request = self
            .client
            .get(format!("{}/portfolio/{}", self.base_url, category))
            .bearer_auth(&self.service_token);
        if let Some(user_id) = user_id {
            request = request.query(&[("user_id", user_id)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StewardError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| StewardError::Upstream(e.to_string()))?;

        let wire: Vec<WireRecord> = response
            .json()
            .await
            .map_err(|e| StewardError::Upstream(e.to_string()))?;

        Ok(wire
            .into_iter()
            .map(|w| PortfolioRecord {
                entity_id: w.entity_id,
                user_id: w.user_id,
                category,
                summary: w.summary,
                state: w.state,
                opened_at: w.opened_at,
                due_at: w.due_at,
                amount_cents: w.amount_cents,
                assigned: w.assigned,
            })
            .collect())
    }
}

/// Counters for one heartbeat sweep
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HeartbeatSummary {
    /// Tasks created this sweep
    pub tasks_created: usize,
    /// Created as suggestions
    pub suggested: usize,
    /// Created as drafts awaiting approval
    pub drafted: usize,
    /// Executed under an auto-capable level
    pub auto_executed: usize,
    /// Candidates blocked by the gate
    pub blocked: usize,
    /// Records that did not qualify for action
    pub unqualified: usize,
    /// Records already covered by an earlier sweep
    pub duplicates: usize,
    /// Per-record or per-category failures (sweep continues)
    pub errors: usize,
}

/// What a qualifying record turns into
struct Qualification {
    priority: Priority,
    timeline: String,
    title: String,
    recommendation: String,
    tool_name: &'static str,
}

/// Scheduled scanner over all domain categories
pub struct HeartbeatScanner {
    feed: Arc<dyn PortfolioFeed>,
    engine: Arc<DecisionEngine>,
    executor: Arc<dyn ToolExecutor>,
    registry: ToolRegistry,
}

impl std::fmt::Debug for HeartbeatScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatScanner").finish()
    }
}

impl HeartbeatScanner {
    /// Create a scanner
    pub fn new(
        feed: Arc<dyn PortfolioFeed>,
        engine: Arc<DecisionEngine>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            feed,
            engine,
            executor,
            registry: ToolRegistry::property_management(),
        }
    }

    /// One sweep: global when `user_id` is `None`, targeted otherwise.
    ///
    /// Per-record and per-category failures are counted and logged, never
    /// abort the sweep.
    pub async fn run(&self, user_id: Option<&str>) -> Result<HeartbeatSummary> {
        let mut summary = HeartbeatSummary::default();
        let started = now();

        for category in DomainCategory::ALL {
            let records = match self.feed.scan(category, user_id).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(category = %category, error = %e, "portfolio scan failed");
                    summary.errors += 1;
                    continue;
                }
            };

            for record in records {
                if let Err(e) = self.process(&record, &mut summary).await {
                    tracing::error!(
                        entity = %record.entity_id,
                        category = %category,
                        error = %e,
                        "heartbeat item failed"
                    );
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            elapsed_ms = (now() - started).num_milliseconds(),
            created = summary.tasks_created,
            auto = summary.auto_executed,
            "heartbeat sweep finished"
        );
        Ok(summary)
    }

    async fn process(&self, record: &PortfolioRecord, summary: &mut HeartbeatSummary) -> Result<()> {
        let Some(q) = qualify(record, now()) else {
            summary.unqualified += 1;
            return Ok(());
        };

        let tool_name = q.tool_name;
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(StewardError::InvalidInput(format!(
                "no registered tool named {tool_name}"
            )));
        };

        let candidate = CandidateAction {
            tool: tool.clone(),
            input_summary: format!("{} - {}", q.title, record.summary),
            source: SourceQuality::LiveQuery,
            embedding: None,
        };
        let evaluation = self.engine.evaluate(&record.user_id, candidate).await?;

        if evaluation.disposition == crate::autonomy::Disposition::Block {
            summary.blocked += 1;
            return Ok(());
        }

        let status = if evaluation.disposition.allows_execution() {
            TaskStatus::AutoExecuted
        } else if evaluation.disposition == crate::autonomy::Disposition::Draft {
            TaskStatus::Draft
        } else {
            TaskStatus::Suggested
        };

        let task = TaskRecord {
            id: Uuid::new_v4(),
            user_id: record.user_id.clone(),
            category: record.category,
            title: q.title,
            description: record.summary.clone(),
            recommendation: q.recommendation,
            priority: q.priority,
            timeline: q.timeline,
            status,
            idempotency_key: idempotency_key(&record.entity_id, record.category, now()),
            created_at: now(),
        };

        // Insert before executing: if the key already exists an earlier
        // sweep owns this state change, including its side effect.
        let Some(task_id) = self.engine.store().insert_task_if_new(&task)? else {
            summary.duplicates += 1;
            return Ok(());
        };
        summary.tasks_created += 1;

        match status {
            TaskStatus::Suggested => summary.suggested += 1,
            TaskStatus::Draft => summary.drafted += 1,
            TaskStatus::AutoExecuted => {
                let arguments = serde_json::json!({
                    "entity_id": record.entity_id,
                    "category": record.category.as_str(),
                });
                match self
                    .executor
                    .execute(&record.user_id, tool_name, &arguments)
                    .await
                {
                    Ok(_) => summary.auto_executed += 1,
                    Err(e) => {
                        // Execution failed: fall back to a draft and keep
                        // the failure pattern for future gating.
                        tracing::warn!(task = %task_id, error = %e, "auto execution failed");
                        self.engine.store().record_tool_failure(
                            &record.user_id,
                            tool_name,
                            &e.to_string(),
                            &format!("Auto execution failed during heartbeat: {e}"),
                        )?;
                        self.engine
                            .store()
                            .update_task_status(&record.user_id, task_id, TaskStatus::Draft)?;
                        summary.drafted += 1;
                    }
                }
            }
            TaskStatus::Dismissed | TaskStatus::Done => {}
        }

        Ok(())
    }
}

/// Idempotency key: business entity + category + coarse (daily) bucket
pub fn idempotency_key(entity_id: &str, category: DomainCategory, at: Timestamp) -> String {
    let bucket = at.format("%Y-%m-%d").to_string();
    let hash = blake3::hash(format!("{entity_id}|{category}|{bucket}").as_bytes());
    hash.to_hex().to_string()
}

fn days_since(ts: Timestamp, now: Timestamp) -> i64 {
    (now - ts).num_days()
}

fn hours_since(ts: Timestamp, now: Timestamp) -> i64 {
    (now - ts).num_hours()
}

fn days_until(ts: Timestamp, now: Timestamp) -> i64 {
    (ts - now).num_days()
}

fn dollars(cents: i64) -> String {
    format!("${:.2}", cents as f64 / 100.0)
}

/// Category-specific qualification rules.
///
/// Returns `None` when the record needs no action yet. Every produced
/// recommendation is a concrete, non-trivial course of action.
fn qualify(record: &PortfolioRecord, now: Timestamp) -> Option<Qualification> {
    use DomainCategory as C;

    match record.category {
        C::Maintenance => {
            let open_hours = hours_since(record.opened_at, now);
            if record.state == "open" && !record.assigned && open_hours > 48 {
                let open_days = open_hours / 24;
                return Some(Qualification {
                    priority: if open_days >= 7 {
                        Priority::Urgent
                    } else {
                        Priority::High
                    },
                    timeline: "within 2 business days".to_string(),
                    title: format!("Maintenance request open {open_days} days with no trade"),
                    recommendation: format!(
                        "This maintenance request has been open for {open_days} days without a \
                         trade assigned. Recommend requesting quotes from your preferred trades \
                         and booking the repair now; unattended issues of this kind tend to \
                         escalate in cost and tenant goodwill. Job: {}.",
                        record.summary
                    ),
                    tool_name: "assign_trade",
                });
            }
            None
        }

        C::RentCollection => {
            let overdue_days = days_since(record.opened_at, now);
            if record.state == "overdue" && overdue_days >= 3 {
                let amount = record.amount_cents.map(dollars).unwrap_or_default();
                return Some(Qualification {
                    priority: if overdue_days >= 14 {
                        Priority::Urgent
                    } else {
                        Priority::High
                    },
                    timeline: "today".to_string(),
                    title: format!("Rent {overdue_days} days overdue"),
                    recommendation: format!(
                        "Rent is {overdue_days} days overdue{}. Recommend sending a polite \
                         arrears reminder referencing the ledger; if this passes 14 days, a \
                         formal breach notice becomes available in most jurisdictions. \
                         Tenancy: {}.",
                        if amount.is_empty() {
                            String::new()
                        } else {
                            format!(" ({amount} outstanding)")
                        },
                        record.summary
                    ),
                    tool_name: "send_rent_reminder",
                });
            }
            None
        }

        C::LeaseManagement => {
            let ends_in = record.due_at.map(|d| days_until(d, now))?;
            if (0..=60).contains(&ends_in) {
                return Some(Qualification {
                    priority: if ends_in <= 21 {
                        Priority::High
                    } else {
                        Priority::Normal
                    },
                    timeline: "this week".to_string(),
                    title: format!("Lease ends in {ends_in} days"),
                    recommendation: format!(
                        "The fixed term ends in {ends_in} days. Recommend preparing a renewal \
                         offer now so the tenant has time to respond before the lease rolls \
                         periodic; include a current market-rent comparison. Lease: {}.",
                        record.summary
                    ),
                    tool_name: "prepare_lease_renewal",
                });
            }
            None
        }

        C::Compliance => {
            let expired = record.state == "expired";
            let due_soon = record
                .due_at
                .map(|d| (0..=30).contains(&days_until(d, now)))
                .unwrap_or(false);
            if expired || due_soon {
                return Some(Qualification {
                    priority: if expired {
                        Priority::Urgent
                    } else {
                        Priority::High
                    },
                    timeline: if expired {
                        "immediately".to_string()
                    } else {
                        "within 30 days".to_string()
                    },
                    title: if expired {
                        "Safety certificate expired".to_string()
                    } else {
                        "Safety certificate expiring soon".to_string()
                    },
                    recommendation: format!(
                        "{} Recommend booking the recertification now and keeping the \
                         compliance record updated; an expired certificate exposes the owner \
                         to liability and can void insurance. Item: {}.",
                        if expired {
                            "A required safety certificate has expired."
                        } else {
                            "A required safety certificate expires within 30 days."
                        },
                        record.summary
                    ),
                    tool_name: "file_compliance_certificate",
                });
            }
            None
        }

        C::Listings => {
            let listed_days = days_since(record.opened_at, now);
            if record.state == "active" && listed_days > 21 {
                return Some(Qualification {
                    priority: Priority::Normal,
                    timeline: "this week".to_string(),
                    title: format!("Listing stale after {listed_days} days"),
                    recommendation: format!(
                        "This listing has been active for {listed_days} days without securing \
                         a tenant. Recommend refreshing the copy and photos and reviewing the \
                         asking rent against comparable listings; every extra vacant week costs \
                         roughly a quarter of a month's rent. Listing: {}.",
                        record.summary
                    ),
                    tool_name: "draft_listing",
                });
            }
            None
        }

        C::Inspections => {
            let due_in = record.due_at.map(|d| days_until(d, now))?;
            if (0..=14).contains(&due_in) {
                return Some(Qualification {
                    priority: Priority::Normal,
                    timeline: format!("within {due_in} days"),
                    title: format!("Routine inspection due in {due_in} days"),
                    recommendation: format!(
                        "A routine inspection falls due in {due_in} days. Recommend booking it \
                         now and issuing the tenant the required entry notice for your state. \
                         Property: {}.",
                        record.summary
                    ),
                    tool_name: "schedule_inspection",
                });
            }
            None
        }

        C::Insurance => {
            let expires_in = record.due_at.map(|d| days_until(d, now))?;
            if (0..=30).contains(&expires_in) {
                return Some(Qualification {
                    priority: Priority::High,
                    timeline: format!("within {expires_in} days"),
                    title: format!("Insurance policy expires in {expires_in} days"),
                    recommendation: format!(
                        "The landlord insurance policy expires in {expires_in} days. Recommend \
                         requesting a renewal quote now and comparing at least one alternative \
                         insurer before it lapses; a coverage gap leaves the owner uninsured \
                         against tenant damage and loss of rent. Policy: {}.",
                        record.summary
                    ),
                    tool_name: "renew_insurance",
                });
            }
            None
        }

        C::Bonds => {
            let held_days = days_since(record.opened_at, now);
            if record.state == "unlodged" && held_days > 10 {
                return Some(Qualification {
                    priority: Priority::High,
                    timeline: "immediately".to_string(),
                    title: format!("Bond unlodged after {held_days} days"),
                    recommendation: format!(
                        "A rental bond has been held for {held_days} days without being lodged \
                         with the bond authority. Most states require lodgement within 10 \
                         business days; recommend lodging it today to avoid penalties. \
                         Tenancy: {}.",
                        record.summary
                    ),
                    tool_name: "lodge_bond",
                });
            }
            None
        }

        C::TenantFinding => {
            let waiting_hours = hours_since(record.opened_at, now);
            if record.state == "application_received" && waiting_hours > 72 {
                return Some(Qualification {
                    priority: Priority::Normal,
                    timeline: "within 24 hours".to_string(),
                    title: "Tenancy application awaiting review".to_string(),
                    recommendation: format!(
                        "An application has been waiting {} days for review. Good applicants \
                         accept other properties quickly; recommend screening it against the \
                         owner's criteria and responding today. Application: {}.",
                        waiting_hours / 24,
                        record.summary
                    ),
                    tool_name: "review_application",
                });
            }
            None
        }

        C::General => {
            if record.state == "attention" {
                return Some(Qualification {
                    priority: Priority::Low,
                    timeline: "this week".to_string(),
                    title: "Portfolio item needs attention".to_string(),
                    recommendation: format!(
                        "A portfolio item was flagged for attention and does not fit a \
                         specific workflow. Recommend reviewing it and sending the owner a \
                         short status update. Item: {}.",
                        record.summary
                    ),
                    tool_name: "send_owner_update",
                });
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::engine::NoopExecutor;
    use crate::store::KnowledgeStore;

    fn maintenance_record(open_days: i64, assigned: bool) -> PortfolioRecord {
        PortfolioRecord {
            entity_id: "job-77".to_string(),
            user_id: "owner-1".to_string(),
            category: DomainCategory::Maintenance,
            summary: "Leaking tap in the kitchen at 12 Acacia Ave".to_string(),
            state: "open".to_string(),
            opened_at: now() - chrono::Duration::days(open_days),
            due_at: None,
            amount_cents: None,
            assigned,
        }
    }

    fn scanner(feed: Arc<FixtureFeed>) -> HeartbeatScanner {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let engine = Arc::new(DecisionEngine::new(store, Arc::new(HashEmbedder::new())));
        HeartbeatScanner::new(feed, engine, Arc::new(NoopExecutor))
    }

    #[test]
    fn test_qualification_rules() {
        let ts = now();

        // Fresh request: not yet qualifying
        assert!(qualify(&maintenance_record(1, false), ts).is_none());
        // Assigned request: handled
        assert!(qualify(&maintenance_record(10, true), ts).is_none());
        // Stale unassigned request qualifies with a concrete recommendation
        let q = qualify(&maintenance_record(10, false), ts).unwrap();
        assert_eq!(q.priority, Priority::Urgent);
        assert!(q.recommendation.len() > 10);
        assert!(q.recommendation.contains("10 days"));
    }

    #[test]
    fn test_idempotency_key_buckets_by_day() {
        let ts = now();
        let a = idempotency_key("job-77", DomainCategory::Maintenance, ts);
        let b = idempotency_key("job-77", DomainCategory::Maintenance, ts);
        let c = idempotency_key("job-77", DomainCategory::Maintenance, ts + chrono::Duration::days(2));
        let d = idempotency_key("job-78", DomainCategory::Maintenance, ts);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn test_sweep_produces_maintenance_task() {
        let feed = Arc::new(FixtureFeed::new());
        feed.push(maintenance_record(10, false));
        let scanner = scanner(feed);

        let summary = scanner.run(Some("owner-1")).await.unwrap();
        assert_eq!(summary.tasks_created, 1);

        let tasks = scanner.engine.store().tasks_for_user("owner-1").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].category, DomainCategory::Maintenance);
        assert!(tasks[0].recommendation.len() > 10);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let feed = Arc::new(FixtureFeed::new());
        feed.push(maintenance_record(10, false));
        let scanner = scanner(feed);

        let first = scanner.run(None).await.unwrap();
        let second = scanner.run(None).await.unwrap();

        assert_eq!(first.tasks_created, 1);
        assert_eq!(second.tasks_created, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(
            scanner.engine.store().tasks_for_user("owner-1").unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unqualified_records_are_counted() {
        let feed = Arc::new(FixtureFeed::new());
        feed.push(maintenance_record(1, false));
        let scanner = scanner(feed);

        let summary = scanner.run(None).await.unwrap();
        assert_eq!(summary.tasks_created, 0);
        assert_eq!(summary.unqualified, 1);
    }
}
