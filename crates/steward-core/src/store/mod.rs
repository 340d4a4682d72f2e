//! Knowledge store — SQLite WAL persistence for the decision engine
//!
//! Durable tables for decisions, rules, preferences, corrections, outcomes,
//! tasks, tool genomes and autonomy settings, all scoped by `user_id`.
//! Concurrency model:
//! - WAL mode: non-blocking concurrent reads, serialized writes
//! - Rule dedup-or-reinforce and preference upsert run as atomic
//!   read-modify-write inside one transaction
//! - Owner feedback transitions exactly once via a guarded UPDATE

mod search;

pub use search::{Scored, VectorMatch, VectorScope, VectorStore};

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::autonomy::{AutonomyLevel, AutonomyPreset, AutonomySettings};
use crate::confidence::ConfidenceFactors;
use crate::embedding::ensure_dimension;
use crate::error::{Result, StewardError, StoreError};
use crate::types::{
    now, DomainCategory, OwnerFeedback, Priority, TaskStatus, Timestamp,
};

/// Tolerance between a decision's `confidence` and its factors' composite
pub const CONFIDENCE_TOLERANCE: f32 = 0.01;

/// An evaluated candidate action, persisted once per evaluation.
///
/// Immutable except `owner_feedback`. Query/memory tools skip confidence
/// computation entirely, so `confidence_factors` and `confidence` are null
/// for those rows.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Tool that was evaluated
    pub tool_name: String,
    /// Domain category of the tool
    pub category: DomainCategory,
    /// Short description of the candidate input
    pub input_summary: String,
    /// Six factors plus composite, when the tool is scored
    pub confidence_factors: Option<ConfidenceFactors>,
    /// Equals the factors' composite (within tolerance) when present
    pub confidence: Option<f32>,
    /// Embedding of the input summary, when one could be computed
    pub embedding: Option<Vec<f32>>,
    /// Set exactly once by feedback processing
    pub owner_feedback: Option<OwnerFeedback>,
    /// Whether the gate allowed execution and the tool ran
    pub was_auto_executed: bool,
    /// Creation time
    pub created_at: Timestamp,
}

/// A learned factual correction with decaying confidence
#[derive(Debug, Clone)]
pub struct RuleRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// The learned fact
    pub rule_text: String,
    /// Mandatory embedding of the rule text
    pub embedding: Vec<f32>,
    /// Rises with reinforcement, decays with inactivity, floor 0
    pub confidence: f32,
    /// Deactivated (never deleted) once confidence reaches 0
    pub active: bool,
    /// Last time this rule was reinforced
    pub last_reinforced_at: Timestamp,
    /// Creation time
    pub created_at: Timestamp,
}

/// Sub-kind of a stored preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceKind {
    /// Stored by an explicit "remember" action
    Remembered,
    /// Corrected reasoning pattern, learned from REASONING_ERROR
    PromptGuidance,
    /// Required context, learned from CONTEXT_MISSING
    ContextPattern,
}

impl PreferenceKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceKind::Remembered => "remembered",
            PreferenceKind::PromptGuidance => "prompt_guidance",
            PreferenceKind::ContextPattern => "context_pattern",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "remembered" => Ok(PreferenceKind::Remembered),
            "prompt_guidance" => Ok(PreferenceKind::PromptGuidance),
            "context_pattern" => Ok(PreferenceKind::ContextPattern),
            other => Err(corrupt("kind", other)),
        }
    }
}

/// A stored owner preference, upserted by `(user_id, preference_key)`
#[derive(Debug, Clone)]
pub struct PreferenceRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Domain category
    pub category: DomainCategory,
    /// Upsert key, unique per user
    pub preference_key: String,
    /// Sub-kind
    pub kind: PreferenceKind,
    /// Preference content
    pub value: String,
    /// Mandatory embedding of the value
    pub embedding: Vec<f32>,
    /// Last write time
    pub updated_at: Timestamp,
}

/// Append-only audit record of an explicit human correction
#[derive(Debug, Clone)]
pub struct CorrectionRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// What the agent originally did
    pub original_action: String,
    /// What the human said instead
    pub correction_text: String,
    /// Context at the time of correction
    pub context_snapshot: serde_json::Value,
    /// Domain category
    pub category: DomainCategory,
    /// Mandatory embedding of the correction text
    pub embedding: Vec<f32>,
    /// Creation time
    pub created_at: Timestamp,
}

/// A later-measured result linked back to a decision
#[derive(Debug, Clone)]
pub struct OutcomeRecord {
    /// Unique identifier
    pub id: Uuid,
    /// The decision this closes the loop on
    pub decision_id: Uuid,
    /// When measurement happened
    pub measured_at: Timestamp,
    /// Whether the real-world result was a success
    pub success: bool,
    /// Human-readable measurement detail
    pub detail: String,
}

/// A proactive task emitted by the heartbeat scanner
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Unique identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: String,
    /// Domain category
    pub category: DomainCategory,
    /// Short title
    pub title: String,
    /// What was detected
    pub description: String,
    /// Human-readable recommended course of action, never boilerplate
    pub recommendation: String,
    /// Urgency
    pub priority: Priority,
    /// Human-readable timeline, e.g. "this week"
    pub timeline: String,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Dedup key: business entity + category + coarse time bucket
    pub idempotency_key: String,
    /// Creation time
    pub created_at: Timestamp,
}

/// Per-(user, tool) structural failure aggregate.
///
/// Not embedded; this is the TOOL_MISUSE guardrail surface.
#[derive(Debug, Clone)]
pub struct ToolGenome {
    /// Owning user
    pub user_id: String,
    /// Tool the failures belong to
    pub tool_name: String,
    /// Total recorded misuse failures
    pub failure_count: i64,
    /// Most recent error message
    pub last_error: String,
    /// Guardrail note surfaced on future invocations
    pub guardrail: String,
    /// Last write time
    pub updated_at: Timestamp,
}

/// Row counts for the status surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreCounts {
    /// Recorded decisions
    pub decisions: i64,
    /// Active rules
    pub active_rules: i64,
    /// Stored preferences
    pub preferences: i64,
    /// Stored corrections
    pub corrections: i64,
    /// Measured outcomes
    pub outcomes: i64,
    /// Emitted tasks
    pub tasks: i64,
}

/// Success/approval history for one `(user, tool, category)` triple
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRecord {
    /// Evaluated decisions
    pub total: u32,
    /// Explicitly approved
    pub approvals: u32,
    /// Explicitly rejected
    pub rejections: u32,
    /// Measured successful outcomes
    pub successes: u32,
    /// Measured failed outcomes
    pub failures: u32,
}

/// SQLite-backed knowledge store
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore").finish()
    }
}

fn corrupt(column: &'static str, detail: impl std::fmt::Display) -> StewardError {
    StoreError::CorruptColumn {
        column,
        detail: detail.to_string(),
    }
    .into()
}

fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(corrupt("embedding", format!("{} bytes", blob.len())));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn ts_from_ms(ms: i64, column: &'static str) -> Result<Timestamp> {
    chrono::DateTime::from_timestamp_millis(ms).ok_or_else(|| corrupt(column, ms))
}

fn parse_uuid(s: &str, column: &'static str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| corrupt(column, e))
}

fn parse_category(s: &str) -> Result<DomainCategory> {
    s.parse().map_err(|e| corrupt("category", e))
}

impl KnowledgeStore {
    /// Open (or create) the store at `path` in WAL mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(StoreError::from)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Idempotent DDL migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS decisions (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL,
                tool_name           TEXT NOT NULL,
                category            TEXT NOT NULL,
                input_summary       TEXT NOT NULL,
                confidence_factors  TEXT,
                confidence          REAL,
                embedding           BLOB,
                owner_feedback      TEXT,
                was_auto_executed   INTEGER NOT NULL DEFAULT 0,
                created_at_ms       INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_decisions_user_tool
                ON decisions(user_id, tool_name, category);
            CREATE INDEX IF NOT EXISTS idx_decisions_user_created
                ON decisions(user_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS rules (
                id                    TEXT PRIMARY KEY,
                user_id               TEXT NOT NULL,
                rule_text             TEXT NOT NULL,
                embedding             BLOB NOT NULL,
                confidence            REAL NOT NULL,
                active                INTEGER NOT NULL DEFAULT 1,
                last_reinforced_at_ms INTEGER NOT NULL,
                created_at_ms         INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_user_active
                ON rules(user_id, active);

            CREATE TABLE IF NOT EXISTS preferences (
                id             TEXT PRIMARY KEY,
                user_id        TEXT NOT NULL,
                category       TEXT NOT NULL,
                preference_key TEXT NOT NULL,
                kind           TEXT NOT NULL,
                value          TEXT NOT NULL,
                embedding      BLOB NOT NULL,
                updated_at_ms  INTEGER NOT NULL,
                UNIQUE(user_id, preference_key)
            );

            CREATE TABLE IF NOT EXISTS corrections (
                id               TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                original_action  TEXT NOT NULL,
                correction_text  TEXT NOT NULL,
                context_snapshot TEXT NOT NULL,
                category         TEXT NOT NULL,
                embedding        BLOB NOT NULL,
                created_at_ms    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_corrections_user_created
                ON corrections(user_id, created_at_ms DESC);

            CREATE TABLE IF NOT EXISTS outcomes (
                id             TEXT PRIMARY KEY,
                decision_id    TEXT NOT NULL UNIQUE,
                measured_at_ms INTEGER NOT NULL,
                success        INTEGER NOT NULL,
                detail         TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                category        TEXT NOT NULL,
                title           TEXT NOT NULL,
                description     TEXT NOT NULL,
                recommendation  TEXT NOT NULL,
                priority        TEXT NOT NULL,
                timeline        TEXT NOT NULL,
                status          TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                created_at_ms   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user_status
                ON tasks(user_id, status);

            CREATE TABLE IF NOT EXISTS tool_genomes (
                user_id       TEXT NOT NULL,
                tool_name     TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                last_error    TEXT NOT NULL,
                guardrail     TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (user_id, tool_name)
            );

            CREATE TABLE IF NOT EXISTS autonomy_settings (
                user_id        TEXT PRIMARY KEY,
                preset         TEXT NOT NULL,
                levels         TEXT NOT NULL,
                min_confidence TEXT NOT NULL,
                updated_at_ms  INTEGER NOT NULL
            );
            ",
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Decisions
    // ─────────────────────────────────────────────────────────────────────

    /// Persist an evaluated candidate action.
    ///
    /// Rejects records where `confidence` and the factors' composite
    /// disagree beyond tolerance, or where one is present without the
    /// other.
    pub fn insert_decision(&self, decision: &DecisionRecord) -> Result<()> {
        match (&decision.confidence_factors, decision.confidence) {
            (Some(factors), Some(confidence)) => {
                if (confidence - factors.composite).abs() > CONFIDENCE_TOLERANCE {
                    return Err(StewardError::InvalidInput(format!(
                        "decision confidence {confidence} diverges from composite {}",
                        factors.composite
                    )));
                }
            }
            (None, None) => {}
            _ => {
                return Err(StewardError::InvalidInput(
                    "confidence and confidence_factors must be set together".into(),
                ))
            }
        }
        if let Some(embedding) = &decision.embedding {
            ensure_dimension(embedding)?;
        }

        let factors_json = decision
            .confidence_factors
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO decisions (id, user_id, tool_name, category, input_summary,
                                    confidence_factors, confidence, embedding,
                                    owner_feedback, was_auto_executed, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                decision.id.to_string(),
                decision.user_id,
                decision.tool_name,
                decision.category.as_str(),
                decision.input_summary,
                factors_json,
                decision.confidence,
                decision.embedding.as_deref().map(vec_to_blob),
                decision.owner_feedback.map(|f| f.as_str()),
                decision.was_auto_executed as i64,
                decision.created_at.timestamp_millis(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Fetch one decision scoped to a user
    pub fn get_decision(&self, user_id: &str, id: Uuid) -> Result<Option<DecisionRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, user_id, tool_name, category, input_summary,
                        confidence_factors, confidence, embedding,
                        owner_feedback, was_auto_executed, created_at_ms
                 FROM decisions WHERE user_id = ?1 AND id = ?2",
                params![user_id, id.to_string()],
                Self::decision_row,
            )
            .optional()
            .map_err(StoreError::from)?;

        row.map(Self::decision_from_parts).transpose()
    }

    /// Set owner feedback exactly once.
    ///
    /// The guarded UPDATE makes the transition linearizable per decision:
    /// the second caller always fails with `FeedbackAlreadySet`.
    pub fn set_owner_feedback(
        &self,
        user_id: &str,
        decision_id: Uuid,
        feedback: OwnerFeedback,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE decisions SET owner_feedback = ?1
                 WHERE user_id = ?2 AND id = ?3 AND owner_feedback IS NULL",
                params![feedback.as_str(), user_id, decision_id.to_string()],
            )
            .map_err(StoreError::from)?;

        if changed == 1 {
            return Ok(());
        }

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM decisions WHERE user_id = ?1 AND id = ?2",
                params![user_id, decision_id.to_string()],
                |_| Ok(true),
            )
            .optional()
            .map_err(StoreError::from)?
            .unwrap_or(false);

        if exists {
            Err(StoreError::FeedbackAlreadySet(decision_id).into())
        } else {
            Err(StoreError::DecisionNotFound(decision_id).into())
        }
    }

    /// Approval/outcome history for a `(user, tool, category)` triple
    pub fn decision_track_record(
        &self,
        user_id: &str,
        tool_name: &str,
        category: DomainCategory,
    ) -> Result<TrackRecord> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*),
                    SUM(CASE WHEN d.owner_feedback = 'approved' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN d.owner_feedback = 'rejected' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN o.success = 1 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN o.success = 0 THEN 1 ELSE 0 END)
             FROM decisions d
             LEFT JOIN outcomes o ON o.decision_id = d.id
             WHERE d.user_id = ?1 AND d.tool_name = ?2 AND d.category = ?3",
            params![user_id, tool_name, category.as_str()],
            |row| {
                Ok(TrackRecord {
                    total: row.get::<_, Option<u32>>(0)?.unwrap_or(0),
                    approvals: row.get::<_, Option<u32>>(1)?.unwrap_or(0),
                    rejections: row.get::<_, Option<u32>>(2)?.unwrap_or(0),
                    successes: row.get::<_, Option<u32>>(3)?.unwrap_or(0),
                    failures: row.get::<_, Option<u32>>(4)?.unwrap_or(0),
                })
            },
        )
        .map_err(|e| StoreError::from(e).into())
    }

    /// Measured outcomes for a tool/category, newest first
    pub fn recent_outcomes(
        &self,
        user_id: &str,
        tool_name: &str,
        category: DomainCategory,
        limit: usize,
    ) -> Result<Vec<(bool, Timestamp)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT o.success, o.measured_at_ms
                 FROM outcomes o
                 JOIN decisions d ON d.id = o.decision_id
                 WHERE d.user_id = ?1 AND d.tool_name = ?2 AND d.category = ?3
                 ORDER BY o.measured_at_ms DESC
                 LIMIT ?4",
            )
            .map_err(StoreError::from)?;

        let rows = stmt
            .query_map(
                params![user_id, tool_name, category.as_str(), limit as i64],
                |row| Ok((row.get::<_, i64>(0)? == 1, row.get::<_, i64>(1)?)),
            )
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            let (success, ms) = row.map_err(StoreError::from)?;
            out.push((success, ts_from_ms(ms, "measured_at_ms")?));
        }
        Ok(out)
    }

    /// Auto-executed or approved decisions past the grace period with no
    /// linked outcome yet
    pub fn decisions_awaiting_outcome(
        &self,
        grace: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>> {
        let cutoff_ms = (now() - grace).timestamp_millis();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT d.id, d.user_id, d.tool_name, d.category, d.input_summary,
                        d.confidence_factors, d.confidence, d.embedding,
                        d.owner_feedback, d.was_auto_executed, d.created_at_ms
                 FROM decisions d
                 LEFT JOIN outcomes o ON o.decision_id = d.id
                 WHERE o.id IS NULL
                   AND d.created_at_ms < ?1
                   AND (d.was_auto_executed = 1 OR d.owner_feedback = 'approved')
                 ORDER BY d.created_at_ms ASC
                 LIMIT ?2",
            )
            .map_err(StoreError::from)?;

        let rows = stmt
            .query_map(params![cutoff_ms, limit as i64], Self::decision_row)
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::decision_from_parts(row.map_err(StoreError::from)?)?);
        }
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Rules
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a new rule. The embedding is mandatory and dimension-checked.
    pub fn insert_rule(&self, rule: &RuleRecord) -> Result<()> {
        ensure_dimension(&rule.embedding)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rules (id, user_id, rule_text, embedding, confidence,
                                active, last_reinforced_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rule.id.to_string(),
                rule.user_id,
                rule.rule_text,
                vec_to_blob(&rule.embedding),
                rule.confidence as f64,
                rule.active as i64,
                rule.last_reinforced_at.timestamp_millis(),
                rule.created_at.timestamp_millis(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Atomic dedup-or-insert for a learned rule.
    ///
    /// Inside one transaction: if an active rule for this user is more
    /// similar than `dedup_threshold`, reinforce it (bump confidence,
    /// refresh `last_reinforced_at`) and return `(id, true)`; otherwise
    /// insert a fresh rule at `start_confidence` and return `(id, false)`.
    /// The transaction is what keeps concurrent corrections referencing
    /// the same fact from inserting near-identical rules.
    pub fn dedup_or_insert_rule(
        &self,
        user_id: &str,
        rule_text: &str,
        embedding: &[f32],
        dedup_threshold: f32,
        start_confidence: f32,
        reinforce_bump: f32,
    ) -> Result<(Uuid, bool)> {
        ensure_dimension(embedding)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let best = {
            let mut stmt = tx
                .prepare("SELECT id, embedding FROM rules WHERE user_id = ?1 AND active = 1")
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(StoreError::from)?;

            let mut best: Option<(Uuid, f32)> = None;
            for row in rows {
                let (id, blob) = row.map_err(StoreError::from)?;
                let candidate = blob_to_vec(&blob)?;
                let similarity = crate::embedding::cosine_similarity(embedding, &candidate);
                if best.map_or(true, |(_, s)| similarity > s) {
                    best = Some((parse_uuid(&id, "id")?, similarity));
                }
            }
            best
        };

        let now_ms = now().timestamp_millis();

        let result = if let Some((existing, similarity)) = best.filter(|(_, s)| *s >= dedup_threshold)
        {
            tracing::debug!(rule = %existing, similarity, "reinforcing near-duplicate rule");
            tx.execute(
                "UPDATE rules
                 SET confidence = MIN(1.0, confidence + ?1), last_reinforced_at_ms = ?2
                 WHERE id = ?3",
                params![reinforce_bump as f64, now_ms, existing.to_string()],
            )
            .map_err(StoreError::from)?;
            (existing, true)
        } else {
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO rules (id, user_id, rule_text, embedding, confidence,
                                    active, last_reinforced_at_ms, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    id.to_string(),
                    user_id,
                    rule_text,
                    vec_to_blob(embedding),
                    start_confidence as f64,
                    now_ms,
                ],
            )
            .map_err(StoreError::from)?;
            (id, false)
        };

        tx.commit().map_err(StoreError::from)?;
        Ok(result)
    }

    /// Fetch one rule
    pub fn get_rule(&self, user_id: &str, id: Uuid) -> Result<Option<RuleRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, user_id, rule_text, embedding, confidence, active,
                        last_reinforced_at_ms, created_at_ms
                 FROM rules WHERE user_id = ?1 AND id = ?2",
                params![user_id, id.to_string()],
                Self::rule_row,
            )
            .optional()
            .map_err(StoreError::from)?;
        row.map(Self::rule_from_parts).transpose()
    }

    /// Active rules for a user
    pub fn active_rules(&self, user_id: &str) -> Result<Vec<RuleRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, rule_text, embedding, confidence, active,
                        last_reinforced_at_ms, created_at_ms
                 FROM rules WHERE user_id = ?1 AND active = 1",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![user_id], Self::rule_row)
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::rule_from_parts(row.map_err(StoreError::from)?)?);
        }
        Ok(out)
    }

    /// Lower confidence on active rules not reinforced within
    /// `days_threshold` days, by `decay_amount`, floor 0. Rules reaching 0
    /// are deactivated, never deleted. Returns the number of decayed rows.
    pub fn decay_stale_rules(
        &self,
        user_id: &str,
        days_threshold: i64,
        decay_amount: f32,
    ) -> Result<usize> {
        let cutoff_ms = (now() - chrono::Duration::days(days_threshold)).timestamp_millis();
        let conn = self.conn.lock().unwrap();

        let decayed = conn
            .execute(
                "UPDATE rules
                 SET confidence = MAX(0.0, confidence - ?1)
                 WHERE user_id = ?2 AND active = 1 AND last_reinforced_at_ms < ?3",
                params![decay_amount as f64, user_id, cutoff_ms],
            )
            .map_err(StoreError::from)?;

        conn.execute(
            "UPDATE rules SET active = 0
             WHERE user_id = ?1 AND active = 1 AND confidence <= 0.0",
            params![user_id],
        )
        .map_err(StoreError::from)?;

        Ok(decayed)
    }

    /// Users that currently hold active rules
    pub fn rule_users(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM rules WHERE active = 1")
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(StoreError::from)?);
        }
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Preferences
    // ─────────────────────────────────────────────────────────────────────

    /// Upsert a preference keyed by `(user_id, preference_key)`.
    ///
    /// A single ON CONFLICT statement keeps the read-modify-write atomic
    /// under concurrent chat turns. Returns the row id.
    pub fn upsert_preference(
        &self,
        user_id: &str,
        preference_key: &str,
        value: &str,
        category: DomainCategory,
        kind: PreferenceKind,
        embedding: &[f32],
    ) -> Result<Uuid> {
        ensure_dimension(embedding)?;
        let conn = self.conn.lock().unwrap();
        let now_ms = now().timestamp_millis();
        let new_id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO preferences (id, user_id, category, preference_key, kind,
                                      value, embedding, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, preference_key) DO UPDATE SET
                 category = excluded.category,
                 kind = excluded.kind,
                 value = excluded.value,
                 embedding = excluded.embedding,
                 updated_at_ms = excluded.updated_at_ms",
            params![
                new_id.to_string(),
                user_id,
                category.as_str(),
                preference_key,
                kind.as_str(),
                value,
                vec_to_blob(embedding),
                now_ms,
            ],
        )
        .map_err(StoreError::from)?;

        let id: String = conn
            .query_row(
                "SELECT id FROM preferences WHERE user_id = ?1 AND preference_key = ?2",
                params![user_id, preference_key],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        parse_uuid(&id, "id")
    }

    /// Fetch one preference by key
    pub fn get_preference(
        &self,
        user_id: &str,
        preference_key: &str,
    ) -> Result<Option<PreferenceRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, user_id, category, preference_key, kind, value,
                        embedding, updated_at_ms
                 FROM preferences WHERE user_id = ?1 AND preference_key = ?2",
                params![user_id, preference_key],
                Self::preference_row,
            )
            .optional()
            .map_err(StoreError::from)?;
        row.map(Self::preference_from_parts).transpose()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Corrections, outcomes, tasks
    // ─────────────────────────────────────────────────────────────────────

    /// Append a correction. Embedding is mandatory.
    pub fn insert_correction(&self, correction: &CorrectionRecord) -> Result<()> {
        ensure_dimension(&correction.embedding)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO corrections (id, user_id, original_action, correction_text,
                                      context_snapshot, category, embedding, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                correction.id.to_string(),
                correction.user_id,
                correction.original_action,
                correction.correction_text,
                serde_json::to_string(&correction.context_snapshot)?,
                correction.category.as_str(),
                vec_to_blob(&correction.embedding),
                correction.created_at.timestamp_millis(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Link a measured outcome to its decision. One outcome per decision.
    pub fn insert_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO outcomes (id, decision_id, measured_at_ms, success, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                outcome.id.to_string(),
                outcome.decision_id.to_string(),
                outcome.measured_at.timestamp_millis(),
                outcome.success as i64,
                outcome.detail,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Insert a task unless its idempotency key already exists.
    ///
    /// Returns `Some(id)` when the task was created, `None` when an
    /// earlier sweep already emitted a task for the same underlying state
    /// change.
    pub fn insert_task_if_new(&self, task: &TaskRecord) -> Result<Option<Uuid>> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO tasks
                     (id, user_id, category, title, description, recommendation,
                      priority, timeline, status, idempotency_key, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    task.id.to_string(),
                    task.user_id,
                    task.category.as_str(),
                    task.title,
                    task.description,
                    task.recommendation,
                    task.priority.as_str(),
                    task.timeline,
                    task.status.as_str(),
                    task.idempotency_key,
                    task.created_at.timestamp_millis(),
                ],
            )
            .map_err(StoreError::from)?;

        Ok((changed == 1).then_some(task.id))
    }

    /// Update a task's lifecycle status
    pub fn update_task_status(&self, user_id: &str, task_id: Uuid, status: TaskStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET status = ?1 WHERE user_id = ?2 AND id = ?3",
            params![status.as_str(), user_id, task_id.to_string()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// All tasks for a user, newest first
    pub fn tasks_for_user(&self, user_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, category, title, description, recommendation,
                        priority, timeline, status, idempotency_key, created_at_ms
                 FROM tasks WHERE user_id = ?1 ORDER BY created_at_ms DESC",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![user_id], Self::task_row)
            .map_err(StoreError::from)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Self::task_from_parts(row.map_err(StoreError::from)?)?);
        }
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tool genomes
    // ─────────────────────────────────────────────────────────────────────

    /// Record a tool-misuse failure, accumulating the per-tool aggregate.
    /// Returns the updated failure count.
    pub fn record_tool_failure(
        &self,
        user_id: &str,
        tool_name: &str,
        error: &str,
        guardrail: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tool_genomes (user_id, tool_name, failure_count, last_error,
                                       guardrail, updated_at_ms)
             VALUES (?1, ?2, 1, ?3, ?4, ?5)
             ON CONFLICT(user_id, tool_name) DO UPDATE SET
                 failure_count = failure_count + 1,
                 last_error = excluded.last_error,
                 guardrail = excluded.guardrail,
                 updated_at_ms = excluded.updated_at_ms",
            params![user_id, tool_name, error, guardrail, now().timestamp_millis()],
        )
        .map_err(StoreError::from)?;

        conn.query_row(
            "SELECT failure_count FROM tool_genomes WHERE user_id = ?1 AND tool_name = ?2",
            params![user_id, tool_name],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::from(e).into())
    }

    /// Fetch the failure aggregate for a tool
    pub fn get_tool_genome(&self, user_id: &str, tool_name: &str) -> Result<Option<ToolGenome>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, tool_name, failure_count, last_error, guardrail, updated_at_ms
             FROM tool_genomes WHERE user_id = ?1 AND tool_name = ?2",
            params![user_id, tool_name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()
        .map_err(StoreError::from)?
        .map(|(user_id, tool_name, failure_count, last_error, guardrail, ms)| {
            Ok(ToolGenome {
                user_id,
                tool_name,
                failure_count,
                last_error,
                guardrail,
                updated_at: ts_from_ms(ms, "updated_at_ms")?,
            })
        })
        .transpose()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Autonomy settings
    // ─────────────────────────────────────────────────────────────────────

    /// Autonomy settings for a user; the balanced preset when none stored
    pub fn get_autonomy(&self, user_id: &str) -> Result<AutonomySettings> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT preset, levels, min_confidence FROM autonomy_settings WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)?;

        match row {
            Some((preset, levels, min_confidence)) => Ok(AutonomySettings {
                user_id: user_id.to_string(),
                preset: preset.parse::<AutonomyPreset>().map_err(|e| corrupt("preset", e))?,
                levels: serde_json::from_str(&levels)?,
                min_confidence: serde_json::from_str(&min_confidence)?,
            }),
            None => Ok(AutonomySettings::for_preset(
                user_id,
                AutonomyPreset::Balanced,
            )),
        }
    }

    /// Persist a user's autonomy settings
    pub fn put_autonomy(&self, settings: &AutonomySettings) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO autonomy_settings (user_id, preset, levels, min_confidence, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 preset = excluded.preset,
                 levels = excluded.levels,
                 min_confidence = excluded.min_confidence,
                 updated_at_ms = excluded.updated_at_ms",
            params![
                settings.user_id,
                settings.preset.as_str(),
                serde_json::to_string(&settings.levels)?,
                serde_json::to_string(&settings.min_confidence)?,
                now().timestamp_millis(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    /// Override one category level for a user.
    ///
    /// Loading and saving the settings record flips the preset to
    /// `custom`, per the preset/custom state machine.
    pub fn set_category_level(
        &self,
        user_id: &str,
        category: DomainCategory,
        level: AutonomyLevel,
    ) -> Result<AutonomySettings> {
        let mut settings = self.get_autonomy(user_id)?;
        settings.set_level(category, level);
        self.put_autonomy(&settings)?;
        Ok(settings)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────

    /// Prune learning data past the retention window: corrections older
    /// than the window, inactive rules not reinforced within it, and
    /// decisions (with their outcomes) older than it. Returns total rows
    /// removed.
    pub fn cleanup_old_learning_data(&self, retention_days: i64) -> Result<usize> {
        let cutoff_ms = (now() - chrono::Duration::days(retention_days)).timestamp_millis();
        let conn = self.conn.lock().unwrap();

        let corrections = conn
            .execute(
                "DELETE FROM corrections WHERE created_at_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(StoreError::from)?;

        let rules = conn
            .execute(
                "DELETE FROM rules WHERE active = 0 AND last_reinforced_at_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(StoreError::from)?;

        let outcomes = conn
            .execute(
                "DELETE FROM outcomes WHERE decision_id IN
                     (SELECT id FROM decisions WHERE created_at_ms < ?1)",
                params![cutoff_ms],
            )
            .map_err(StoreError::from)?;

        let decisions = conn
            .execute(
                "DELETE FROM decisions WHERE created_at_ms < ?1",
                params![cutoff_ms],
            )
            .map_err(StoreError::from)?;

        Ok(corrections + rules + outcomes + decisions)
    }

    /// Row counts for the status surface
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| StoreError::from(e).into())
        };

        Ok(StoreCounts {
            decisions: count("SELECT COUNT(*) FROM decisions")?,
            active_rules: count("SELECT COUNT(*) FROM rules WHERE active = 1")?,
            preferences: count("SELECT COUNT(*) FROM preferences")?,
            corrections: count("SELECT COUNT(*) FROM corrections")?,
            outcomes: count("SELECT COUNT(*) FROM outcomes")?,
            tasks: count("SELECT COUNT(*) FROM tasks")?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Row mapping
    // ─────────────────────────────────────────────────────────────────────

    #[allow(clippy::type_complexity)]
    fn decision_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<f64>,
        Option<Vec<u8>>,
        Option<String>,
        i64,
        i64,
    )> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn decision_from_parts(
        parts: (
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            Option<f64>,
            Option<Vec<u8>>,
            Option<String>,
            i64,
            i64,
        ),
    ) -> Result<DecisionRecord> {
        let (id, user_id, tool_name, category, input_summary, factors, confidence, embedding, feedback, auto, created_ms) =
            parts;

        Ok(DecisionRecord {
            id: parse_uuid(&id, "id")?,
            user_id,
            tool_name,
            category: parse_category(&category)?,
            input_summary,
            confidence_factors: factors.as_deref().map(serde_json::from_str).transpose()?,
            confidence: confidence.map(|c| c as f32),
            embedding: embedding.as_deref().map(blob_to_vec).transpose()?,
            owner_feedback: feedback
                .as_deref()
                .map(|s| s.parse().map_err(|e| corrupt("owner_feedback", e)))
                .transpose()?,
            was_auto_executed: auto == 1,
            created_at: ts_from_ms(created_ms, "created_at_ms")?,
        })
    }

    #[allow(clippy::type_complexity)]
    fn rule_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, Vec<u8>, f64, i64, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    fn rule_from_parts(
        parts: (String, String, String, Vec<u8>, f64, i64, i64, i64),
    ) -> Result<RuleRecord> {
        let (id, user_id, rule_text, embedding, confidence, active, reinforced_ms, created_ms) =
            parts;
        Ok(RuleRecord {
            id: parse_uuid(&id, "id")?,
            user_id,
            rule_text,
            embedding: blob_to_vec(&embedding)?,
            confidence: confidence as f32,
            active: active == 1,
            last_reinforced_at: ts_from_ms(reinforced_ms, "last_reinforced_at_ms")?,
            created_at: ts_from_ms(created_ms, "created_at_ms")?,
        })
    }

    #[allow(clippy::type_complexity)]
    fn preference_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, String, String, String, Vec<u8>, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn preference_from_parts(
        parts: (String, String, String, String, String, String, Vec<u8>, i64),
    ) -> Result<PreferenceRecord> {
        let (id, user_id, category, preference_key, kind, value, embedding, updated_ms) = parts;
        Ok(PreferenceRecord {
            id: parse_uuid(&id, "id")?,
            user_id,
            category: parse_category(&category)?,
            preference_key,
            kind: PreferenceKind::parse(&kind)?,
            value,
            embedding: blob_to_vec(&embedding)?,
            updated_at: ts_from_ms(updated_ms, "updated_at_ms")?,
        })
    }

    #[allow(clippy::type_complexity)]
    fn task_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        i64,
    )> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
            row.get(10)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn task_from_parts(
        parts: (
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            i64,
        ),
    ) -> Result<TaskRecord> {
        let (id, user_id, category, title, description, recommendation, priority, timeline, status, key, created_ms) =
            parts;
        Ok(TaskRecord {
            id: parse_uuid(&id, "id")?,
            user_id,
            category: parse_category(&category)?,
            title,
            description,
            recommendation,
            priority: priority.parse().map_err(|e| corrupt("priority", e))?,
            timeline,
            status: status.parse().map_err(|e| corrupt("status", e))?,
            idempotency_key: key,
            created_at: ts_from_ms(created_ms, "created_at_ms")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EMBEDDING_DIM;

    fn store() -> KnowledgeStore {
        KnowledgeStore::open_in_memory().unwrap()
    }

    fn unit_vector(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[hot % EMBEDDING_DIM] = 1.0;
        v
    }

    fn decision(user_id: &str) -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            tool_name: "send_rent_reminder".to_string(),
            category: DomainCategory::RentCollection,
            input_summary: "tenant overdue".to_string(),
            confidence_factors: None,
            confidence: None,
            embedding: Some(unit_vector(1)),
            owner_feedback: None,
            was_auto_executed: false,
            created_at: now(),
        }
    }

    #[test]
    fn test_decision_roundtrip() {
        let store = store();
        let record = decision("owner-1");
        store.insert_decision(&record).unwrap();

        let loaded = store.get_decision("owner-1", record.id).unwrap().unwrap();
        assert_eq!(loaded.tool_name, record.tool_name);
        assert_eq!(loaded.category, record.category);
        assert_eq!(loaded.embedding, record.embedding);
        // Scoped by user
        assert!(store.get_decision("owner-2", record.id).unwrap().is_none());
    }

    #[test]
    fn test_decision_rejects_divergent_confidence() {
        let store = store();
        let mut record = decision("owner-1");
        record.confidence_factors = Some(ConfidenceFactors {
            historical_accuracy: 0.5,
            source_quality: 0.5,
            precedent_alignment: 0.5,
            rule_alignment: 0.5,
            golden_alignment: 0.5,
            outcome_track: 0.5,
            composite: 0.5,
        });
        record.confidence = Some(0.9);
        assert!(store.insert_decision(&record).is_err());

        // Factors without confidence are rejected too
        record.confidence = None;
        assert!(store.insert_decision(&record).is_err());
    }

    #[test]
    fn test_rule_embedding_dimension_enforced() {
        let store = store();
        let rule = RuleRecord {
            id: Uuid::new_v4(),
            user_id: "owner-1".to_string(),
            rule_text: "weekday trades only".to_string(),
            embedding: vec![1.0, 0.0, 0.0],
            confidence: 0.5,
            active: true,
            last_reinforced_at: now(),
            created_at: now(),
        };
        assert!(store.insert_rule(&rule).is_err());
    }

    #[test]
    fn test_feedback_transitions_exactly_once() {
        let store = store();
        let record = decision("owner-1");
        store.insert_decision(&record).unwrap();

        store
            .set_owner_feedback("owner-1", record.id, OwnerFeedback::Rejected)
            .unwrap();
        let second = store.set_owner_feedback("owner-1", record.id, OwnerFeedback::Approved);
        assert!(matches!(
            second,
            Err(StewardError::Store(StoreError::FeedbackAlreadySet(_)))
        ));

        let missing = store.set_owner_feedback("owner-1", Uuid::new_v4(), OwnerFeedback::Approved);
        assert!(matches!(
            missing,
            Err(StewardError::Store(StoreError::DecisionNotFound(_)))
        ));
    }

    #[test]
    fn test_task_idempotency_key_is_unique() {
        let store = store();
        let task = TaskRecord {
            id: Uuid::new_v4(),
            user_id: "owner-1".to_string(),
            category: DomainCategory::Maintenance,
            title: "Open job".to_string(),
            description: "Leaking tap".to_string(),
            recommendation: "Assign a plumber this week".to_string(),
            priority: Priority::High,
            timeline: "this week".to_string(),
            status: TaskStatus::Suggested,
            idempotency_key: "job-1|maintenance|2026-08-06".to_string(),
            created_at: now(),
        };
        assert!(store.insert_task_if_new(&task).unwrap().is_some());

        let replay = TaskRecord {
            id: Uuid::new_v4(),
            ..task.clone()
        };
        assert!(store.insert_task_if_new(&replay).unwrap().is_none());
        assert_eq!(store.tasks_for_user("owner-1").unwrap().len(), 1);
    }

    #[test]
    fn test_preference_upsert_by_key() {
        let store = store();
        let first = store
            .upsert_preference(
                "owner-1",
                "prompt_guidance:assign_trade",
                "compare quotes",
                DomainCategory::Maintenance,
                PreferenceKind::PromptGuidance,
                &unit_vector(2),
            )
            .unwrap();
        let second = store
            .upsert_preference(
                "owner-1",
                "prompt_guidance:assign_trade",
                "compare at least two quotes",
                DomainCategory::Maintenance,
                PreferenceKind::PromptGuidance,
                &unit_vector(3),
            )
            .unwrap();

        assert_eq!(first, second);
        let preference = store
            .get_preference("owner-1", "prompt_guidance:assign_trade")
            .unwrap()
            .unwrap();
        assert_eq!(preference.value, "compare at least two quotes");
        assert_eq!(preference.embedding, unit_vector(3));
    }

    #[test]
    fn test_similarity_search_scoped_and_ordered() {
        let store = store();

        for (user, hot) in [("owner-1", 1), ("owner-1", 2), ("owner-2", 1)] {
            let mut record = decision(user);
            record.embedding = Some(unit_vector(hot));
            store.insert_decision(&record).unwrap();
        }

        let matches = store
            .search_similar_decisions(&unit_vector(1), "owner-1", 0.5, 10)
            .unwrap();
        // Only owner-1's matching vector clears the threshold
        assert_eq!(matches.len(), 1);
        assert!(matches[0].similarity > 0.99);
        assert_eq!(matches[0].record.user_id, "owner-1");
    }

    #[test]
    fn test_dedup_or_insert_rule_atomicity_contract() {
        let store = store();
        let vector = unit_vector(5);

        let (first, deduped_first) = store
            .dedup_or_insert_rule("owner-1", "water billed to tenant", &vector, 0.92, 0.5, 0.1)
            .unwrap();
        assert!(!deduped_first);

        let (second, deduped_second) = store
            .dedup_or_insert_rule("owner-1", "water billed to tenant", &vector, 0.92, 0.5, 0.1)
            .unwrap();
        assert!(deduped_second);
        assert_eq!(first, second);

        // A different user never reinforces another tenant's rule
        let (_, cross_user) = store
            .dedup_or_insert_rule("owner-2", "water billed to tenant", &vector, 0.92, 0.5, 0.1)
            .unwrap();
        assert!(!cross_user);
    }

    #[test]
    fn test_counts() {
        let store = store();
        store.insert_decision(&decision("owner-1")).unwrap();
        let counts = store.counts().unwrap();
        assert_eq!(counts.decisions, 1);
        assert_eq!(counts.active_rules, 0);
    }
}
