//! Steward Core - the agentic decision engine for property management
//!
//! Steward's proactive assistant decides whether it may act, draft or
//! merely suggest an action on an owner's behalf, scores its own
//! confidence from independent signals, keeps a semantic memory of past
//! decisions and corrections, learns from feedback, and sweeps the
//! portfolio on a heartbeat for state changes that need attention.
//!
//! # Architecture
//!
//! The engine is built from small, separately testable layers:
//!
//! 1. **Knowledge store** (`store`): SQLite WAL tables for decisions,
//!    rules, preferences, corrections, outcomes and tasks, with semantic
//!    similarity search
//! 2. **Confidence scorer** (`confidence`): six independent factors plus
//!    a weighted composite for any candidate action
//! 3. **Autonomy gate** (`autonomy`): maps configured levels L0-L4 plus
//!    confidence to a disposition; confidence only ever demotes
//! 4. **Learning pipeline** (`learning`): classifies corrections and tool
//!    errors into typed artifacts with semantic dedup
//! 5. **Heartbeat scanner** (`heartbeat`): idempotent proactive sweep
//!    over every portfolio domain
//! 6. **Outcome tracker** (`outcome`): closes the feedback loop and
//!    decays stale knowledge
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use steward_core::{
//!     CandidateAction, DecisionEngine, HashEmbedder, KnowledgeStore,
//!     SourceQuality, ToolDescriptor, ToolKind,
//! };
//! use steward_core::types::DomainCategory;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
//! let engine = DecisionEngine::new(store, Arc::new(HashEmbedder::new()));
//!
//! let candidate = CandidateAction {
//!     tool: ToolDescriptor::new(
//!         "send_rent_reminder",
//!         ToolKind::Action,
//!         DomainCategory::RentCollection,
//!         "Send an arrears reminder",
//!     ),
//!     input_summary: "Tenant 5 days overdue".to_string(),
//!     source: SourceQuality::LiveQuery,
//!     embedding: None,
//! };
//!
//! let evaluation = engine.evaluate("owner-1", candidate).await.unwrap();
//! println!("disposition: {:?}", evaluation.disposition);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod autonomy;
pub mod confidence;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod learning;
pub mod outcome;
pub mod recorder;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use autonomy::{gate, AutonomyLevel, AutonomyPreset, AutonomySettings, Disposition};
pub use confidence::{
    CandidateAction, ConfidenceFactors, ConfidenceScorer, FactorWeights, GoldenExample,
    SourceQuality,
};
pub use embedding::{
    cosine_similarity, EmbeddingProvider, HashEmbedder, HttpEmbedder, EMBEDDING_DIM,
};
pub use engine::{DecisionEngine, Evaluation, NoopExecutor, ToolExecutor};
pub use error::{Result, StewardError};
pub use heartbeat::{
    FixtureFeed, HeartbeatScanner, HeartbeatSummary, HttpPortfolioFeed, PortfolioFeed,
    PortfolioRecord,
};
pub use learning::{ArtifactKind, ErrorKind, LearnResult, LearningPipeline, RecallHit};
pub use outcome::{FeedbackProbe, OutcomeProbe, OutcomeSummary, OutcomeTracker};
pub use recorder::{DecisionDraft, DecisionRecorder};
pub use store::{
    CorrectionRecord, DecisionRecord, KnowledgeStore, OutcomeRecord, PreferenceKind,
    PreferenceRecord, RuleRecord, Scored, StoreCounts, TaskRecord, ToolGenome, VectorScope,
    VectorStore,
};
pub use types::{
    now, DomainCategory, OwnerFeedback, Priority, TaskStatus, Timestamp, ToolDescriptor, ToolKind,
    ToolRegistry,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
