//! Shared types for the Steward decision engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type used throughout the engine
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current UTC timestamp
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Error returned when parsing one of the closed enums from a string
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    /// Which enum failed to parse
    pub kind: &'static str,
    /// The offending input
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// The fixed set of property-management domains the engine reasons about.
///
/// Every knowledge-store record and every heartbeat sweep is scoped to one
/// of these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCategory {
    /// Repair and maintenance requests
    Maintenance,

    /// Advertising, applications and tenant selection
    TenantFinding,

    /// Lease renewals, expiries and terminations
    LeaseManagement,

    /// Rent schedules, arrears and reminders
    RentCollection,

    /// Safety certificates and regulatory obligations
    Compliance,

    /// Property listings and advertising campaigns
    Listings,

    /// Routine and entry/exit inspections
    Inspections,

    /// Landlord and building insurance policies
    Insurance,

    /// Rental bond lodgement and release
    Bonds,

    /// Anything that does not fit a specific domain
    General,
}

impl DomainCategory {
    /// All domain categories, in heartbeat sweep order
    pub const ALL: [DomainCategory; 10] = [
        DomainCategory::Maintenance,
        DomainCategory::TenantFinding,
        DomainCategory::LeaseManagement,
        DomainCategory::RentCollection,
        DomainCategory::Compliance,
        DomainCategory::Listings,
        DomainCategory::Inspections,
        DomainCategory::Insurance,
        DomainCategory::Bonds,
        DomainCategory::General,
    ];

    /// Stable snake_case name, as stored in the knowledge store
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainCategory::Maintenance => "maintenance",
            DomainCategory::TenantFinding => "tenant_finding",
            DomainCategory::LeaseManagement => "lease_management",
            DomainCategory::RentCollection => "rent_collection",
            DomainCategory::Compliance => "compliance",
            DomainCategory::Listings => "listings",
            DomainCategory::Inspections => "inspections",
            DomainCategory::Insurance => "insurance",
            DomainCategory::Bonds => "bonds",
            DomainCategory::General => "general",
        }
    }
}

impl fmt::Display for DomainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| ParseEnumError::new("domain category", s))
    }
}

/// The kind of a registered tool.
///
/// Scoring exemption is a structural property of the kind, not a string
/// match on category names: `query` and `memory` tools have no side effect
/// to gate, so the confidence scorer skips them by construction. Adding a
/// new kind forces a compile-time decision about whether it is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Read-only lookup against business data
    Query,

    /// Read/write against the agent's own semantic memory
    Memory,

    /// A state-changing action on a business record
    Action,

    /// Content generation (drafts, letters, listings)
    Generate,

    /// A call to an external party or government portal
    External,

    /// A sync with a third-party integration
    Integration,
}

impl ToolKind {
    /// Whether candidate invocations of this kind go through the
    /// confidence scorer before the autonomy gate.
    pub fn requires_scoring(self) -> bool {
        match self {
            ToolKind::Query | ToolKind::Memory => false,
            ToolKind::Action | ToolKind::Generate | ToolKind::External | ToolKind::Integration => {
                true
            }
        }
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Query => "query",
            ToolKind::Memory => "memory",
            ToolKind::Action => "action",
            ToolKind::Generate => "generate",
            ToolKind::External => "external",
            ToolKind::Integration => "integration",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered tool the agent may invoke on a user's behalf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name, e.g. `send_rent_reminder`
    pub name: String,

    /// Structural kind, which carries the scoring exemption
    pub kind: ToolKind,

    /// Domain the tool operates in
    pub category: DomainCategory,

    /// Human-readable description, surfaced to the LLM collaborator
    pub description: String,
}

impl ToolDescriptor {
    /// Create a new descriptor
    pub fn new(
        name: impl Into<String>,
        kind: ToolKind,
        category: DomainCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            category,
            description: description.into(),
        }
    }

    /// Whether this tool skips confidence scoring entirely
    pub fn scoring_exempt(&self) -> bool {
        !self.kind.requires_scoring()
    }
}

/// Registry of every tool the engine knows about
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The standard property-management tool set
    pub fn property_management() -> Self {
        use DomainCategory as C;
        use ToolKind as K;

        let mut registry = Self::new();
        for (name, kind, category, description) in [
            (
                "send_rent_reminder",
                K::Action,
                C::RentCollection,
                "Send an arrears reminder to a tenant for an overdue rent payment",
            ),
            (
                "assign_trade",
                K::Action,
                C::Maintenance,
                "Request quotes from preferred trades and assign one to an open maintenance job",
            ),
            (
                "schedule_inspection",
                K::Action,
                C::Inspections,
                "Book a routine inspection and notify the tenant with the required notice period",
            ),
            (
                "review_application",
                K::Action,
                C::TenantFinding,
                "Shortlist a tenancy application against the owner's selection criteria",
            ),
            (
                "prepare_lease_renewal",
                K::Generate,
                C::LeaseManagement,
                "Draft a lease renewal offer for a fixed term ending soon",
            ),
            (
                "draft_listing",
                K::Generate,
                C::Listings,
                "Draft or refresh an advertising listing for a vacant property",
            ),
            (
                "send_owner_update",
                K::Generate,
                C::General,
                "Draft a status update to the property owner",
            ),
            (
                "file_compliance_certificate",
                K::External,
                C::Compliance,
                "Arrange renewal of an expired or expiring safety certificate",
            ),
            (
                "renew_insurance",
                K::External,
                C::Insurance,
                "Request a renewal quote for an expiring landlord insurance policy",
            ),
            (
                "lodge_bond",
                K::External,
                C::Bonds,
                "Lodge a held rental bond with the state bond authority",
            ),
            (
                "sync_accounting",
                K::Integration,
                C::General,
                "Push reconciled transactions to the connected accounting platform",
            ),
            (
                "query_portfolio",
                K::Query,
                C::General,
                "Look up current property, lease and tenancy records",
            ),
            (
                "query_ledger",
                K::Query,
                C::RentCollection,
                "Look up the rent ledger for a tenancy",
            ),
            (
                "recall_memory",
                K::Memory,
                C::General,
                "Search past decisions, rules and preferences by semantic similarity",
            ),
            (
                "remember_preference",
                K::Memory,
                C::General,
                "Store an owner preference for future decisions",
            ),
        ] {
            registry.register(ToolDescriptor::new(name, kind, category, description));
        }
        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: ToolDescriptor) {
        self.tools.push(tool);
    }

    /// Find a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// All registered tools
    pub fn all(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

/// Priority assigned to a proactive task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Informational, no deadline pressure
    Low,
    /// Normal course of business
    Normal,
    /// Needs attention this week
    High,
    /// Needs attention today
    Urgent,
}

impl Priority {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(ParseEnumError::new("priority", other)),
        }
    }
}

/// Lifecycle state of a proactive task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Surfaced as a suggestion only
    Suggested,
    /// Prepared and awaiting explicit approval
    Draft,
    /// Executed by the agent under an auto-capable autonomy level
    AutoExecuted,
    /// Dismissed by the user
    Dismissed,
    /// Completed
    Done,
}

impl TaskStatus {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Suggested => "suggested",
            TaskStatus::Draft => "draft",
            TaskStatus::AutoExecuted => "auto_executed",
            TaskStatus::Dismissed => "dismissed",
            TaskStatus::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suggested" => Ok(TaskStatus::Suggested),
            "draft" => Ok(TaskStatus::Draft),
            "auto_executed" => Ok(TaskStatus::AutoExecuted),
            "dismissed" => Ok(TaskStatus::Dismissed),
            "done" => Ok(TaskStatus::Done),
            other => Err(ParseEnumError::new("task status", other)),
        }
    }
}

/// Explicit owner feedback on a recorded decision.
///
/// Transitions null -> approved/rejected exactly once; the store enforces
/// the single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerFeedback {
    /// The owner approved the action
    Approved,
    /// The owner rejected the action
    Rejected,
}

impl OwnerFeedback {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerFeedback::Approved => "approved",
            OwnerFeedback::Rejected => "rejected",
        }
    }
}

impl FromStr for OwnerFeedback {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(OwnerFeedback::Approved),
            "rejected" => Ok(OwnerFeedback::Rejected),
            other => Err(ParseEnumError::new("owner feedback", other)),
        }
    }
}
