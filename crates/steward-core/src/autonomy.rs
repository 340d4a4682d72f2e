//! Autonomy gate
//!
//! Maps a configured `(user, category)` autonomy level plus a composite
//! confidence to a disposition. Confidence can only demote the effective
//! level, never promote it; L0 blocks outright regardless of confidence.
//! The settings are an explicit record passed into the pure `gate`
//! function, never ambient state, so the gate is trivially testable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::types::{DomainCategory, ParseEnumError};

/// How independently the agent may act within one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// L0 - reject any candidate action outright
    Disabled,
    /// L1 - surface a suggestion only, prepare nothing
    Suggest,
    /// L2 - prepare the action, require explicit approval
    Draft,
    /// L3 - execute, then notify
    AutoNotice,
    /// L4 - execute silently
    AutoSilent,
}

impl AutonomyLevel {
    /// One step more conservative. Suggest is the floor for enabled
    /// categories: low confidence narrows what the agent does, it never
    /// silences an enabled category outright.
    pub fn demoted(self) -> AutonomyLevel {
        match self {
            AutonomyLevel::Disabled => AutonomyLevel::Disabled,
            AutonomyLevel::Suggest | AutonomyLevel::Draft => AutonomyLevel::Suggest,
            AutonomyLevel::AutoNotice => AutonomyLevel::Draft,
            AutonomyLevel::AutoSilent => AutonomyLevel::AutoNotice,
        }
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyLevel::Disabled => "disabled",
            AutonomyLevel::Suggest => "suggest",
            AutonomyLevel::Draft => "draft",
            AutonomyLevel::AutoNotice => "auto_notice",
            AutonomyLevel::AutoSilent => "auto_silent",
        }
    }
}

impl FromStr for AutonomyLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(AutonomyLevel::Disabled),
            "suggest" => Ok(AutonomyLevel::Suggest),
            "draft" => Ok(AutonomyLevel::Draft),
            "auto_notice" => Ok(AutonomyLevel::AutoNotice),
            "auto_silent" => Ok(AutonomyLevel::AutoSilent),
            other => Err(ParseEnumError {
                kind: "autonomy level",
                value: other.to_string(),
            }),
        }
    }
}

/// Gate output for one candidate action.
///
/// Gate rejections are a normal disposition surfaced to the caller, never
/// an error and never silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Rejected outright (L0)
    Block,
    /// Surface only; nothing prepared
    Suggest,
    /// Prepared, awaiting explicit approval
    Draft,
    /// Execute, then notify the user
    AutoWithNotice,
    /// Execute silently
    AutoSilent,
}

impl Disposition {
    /// Whether this disposition permits executing the underlying tool
    pub fn allows_execution(&self) -> bool {
        matches!(self, Disposition::AutoWithNotice | Disposition::AutoSilent)
    }
}

/// Named autonomy presets.
///
/// A preset is just a level-vector over categories. `custom` is the only
/// state with independent per-category levels; mutating a single category
/// while on a named preset implicitly flips the setting to `custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyPreset {
    /// Suggest-only across the board
    Cautious,
    /// Drafts for routine money/maintenance flows, suggestions elsewhere
    Balanced,
    /// Auto-with-notice for routine flows, drafts for the rest
    HandsOff,
    /// Independent per-category levels
    Custom,
}

impl AutonomyPreset {
    /// The level-vector this preset expands to
    pub fn levels(&self) -> BTreeMap<DomainCategory, AutonomyLevel> {
        use AutonomyLevel as L;
        use DomainCategory as C;

        let assign = |level: fn(C) -> L| {
            C::ALL
                .iter()
                .map(|c| (*c, level(*c)))
                .collect::<BTreeMap<_, _>>()
        };

        match self {
            AutonomyPreset::Cautious | AutonomyPreset::Custom => assign(|_| L::Suggest),
            AutonomyPreset::Balanced => assign(|c| match c {
                C::Maintenance | C::RentCollection | C::Inspections => L::Draft,
                _ => L::Suggest,
            }),
            AutonomyPreset::HandsOff => assign(|c| match c {
                C::Maintenance | C::RentCollection => L::AutoNotice,
                _ => L::Draft,
            }),
        }
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyPreset::Cautious => "cautious",
            AutonomyPreset::Balanced => "balanced",
            AutonomyPreset::HandsOff => "hands_off",
            AutonomyPreset::Custom => "custom",
        }
    }
}

impl FromStr for AutonomyPreset {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cautious" => Ok(AutonomyPreset::Cautious),
            "balanced" => Ok(AutonomyPreset::Balanced),
            "hands_off" => Ok(AutonomyPreset::HandsOff),
            "custom" => Ok(AutonomyPreset::Custom),
            other => Err(ParseEnumError {
                kind: "autonomy preset",
                value: other.to_string(),
            }),
        }
    }
}

/// Per-user autonomy configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomySettings {
    /// Owning user
    pub user_id: String,

    /// Active preset; `Custom` once any single category is overridden
    pub preset: AutonomyPreset,

    /// Configured level per category
    pub levels: BTreeMap<DomainCategory, AutonomyLevel>,

    /// Minimum composite confidence per category; below this the
    /// effective level is demoted by one step
    pub min_confidence: BTreeMap<DomainCategory, f32>,
}

impl AutonomySettings {
    /// Expand a named preset into settings for a user
    pub fn for_preset(user_id: impl Into<String>, preset: AutonomyPreset) -> Self {
        Self {
            user_id: user_id.into(),
            preset,
            levels: preset.levels(),
            min_confidence: default_thresholds(),
        }
    }

    /// Configured level for a category
    pub fn level_for(&self, category: DomainCategory) -> AutonomyLevel {
        self.levels
            .get(&category)
            .copied()
            .unwrap_or(AutonomyLevel::Suggest)
    }

    /// Minimum composite confidence for a category
    pub fn min_for(&self, category: DomainCategory) -> f32 {
        self.min_confidence
            .get(&category)
            .copied()
            .unwrap_or(DEFAULT_MIN_CONFIDENCE)
    }

    /// Override one category's level. Flips the preset to `Custom`.
    pub fn set_level(&mut self, category: DomainCategory, level: AutonomyLevel) {
        self.levels.insert(category, level);
        self.preset = AutonomyPreset::Custom;
    }
}

/// Fallback minimum confidence when a category has no configured threshold
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;

fn default_thresholds() -> BTreeMap<DomainCategory, f32> {
    use DomainCategory as C;

    C::ALL
        .iter()
        .map(|c| {
            let threshold = match c {
                C::Compliance => 0.9,
                C::Insurance | C::Bonds => 0.85,
                C::LeaseManagement | C::RentCollection => 0.8,
                C::Maintenance | C::Inspections | C::TenantFinding => 0.75,
                C::Listings | C::General => 0.7,
            };
            (*c, threshold)
        })
        .collect()
}

/// Gate a scored candidate action.
///
/// A composite below the category minimum demotes the effective level by
/// one step regardless of configuration; it never promotes.
pub fn gate(
    settings: &AutonomySettings,
    category: DomainCategory,
    composite: f32,
) -> Disposition {
    let configured = settings.level_for(category);

    if configured == AutonomyLevel::Disabled {
        return Disposition::Block;
    }

    let effective = if composite < settings.min_for(category) {
        configured.demoted()
    } else {
        configured
    };

    match effective {
        AutonomyLevel::Disabled => Disposition::Block,
        AutonomyLevel::Suggest => Disposition::Suggest,
        AutonomyLevel::Draft => Disposition::Draft,
        AutonomyLevel::AutoNotice => Disposition::AutoWithNotice,
        AutonomyLevel::AutoSilent => Disposition::AutoSilent,
    }
}
