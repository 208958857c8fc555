//! Tier constraint policy and overlap propagation mode.
//!
//! A dependent tier carries exactly one [`Constraint`] describing how its
//! annotations relate to the annotations of the parent tier. The constraint
//! alone decides which annotation kind the tier holds:
//!
//! | Constraint              | Kind       | Time relation to the parent          |
//! |-------------------------|------------|--------------------------------------|
//! | (none, top-level tier)  | alignable  | free, own time slots                 |
//! | `TimeSubdivision`       | alignable  | contiguous children, shared slots    |
//! | `IncludedIn`            | alignable  | inside the parent, own slots, gaps   |
//! | `SymbolicSubdivision`   | reference  | equal shares of the parent, chained  |
//! | `SymbolicAssociation`   | reference  | one-to-one, same extent as parent    |

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

/// Parent/child rule of a dependent tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Constraint {
    /// Children tile the parent's interval; adjacent children share a slot.
    #[strum(serialize = "time_subdivision", serialize = "timesubdivision")]
    TimeSubdivision,
    /// Children lie inside the parent's interval with their own slots.
    #[strum(serialize = "included_in", serialize = "includedin")]
    IncludedIn,
    /// Reference children split the parent's duration equally, in chain order.
    #[strum(serialize = "symbolic_subdivision", serialize = "symbolicsubdivision")]
    SymbolicSubdivision,
    /// A single reference child mirrors the parent's extent.
    #[strum(serialize = "symbolic_association", serialize = "symbolicassociation")]
    SymbolicAssociation,
}

impl Constraint {
    /// Parse from string (case-insensitive, `Time_Subdivision` style accepted).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Constraint::TimeSubdivision => "time_subdivision",
            Constraint::IncludedIn => "included_in",
            Constraint::SymbolicSubdivision => "symbolic_subdivision",
            Constraint::SymbolicAssociation => "symbolic_association",
        }
    }

    /// Whether annotations on a tier with this constraint own time slots.
    pub fn is_alignable(&self) -> bool {
        matches!(self, Constraint::TimeSubdivision | Constraint::IncludedIn)
    }

    /// Whether children must share boundary slots with the parent and with
    /// each other.
    pub fn shares_boundaries(&self) -> bool {
        matches!(self, Constraint::TimeSubdivision)
    }

    /// Whether reference children of one parent form a `next`/`previous` chain.
    pub fn is_chained(&self) -> bool {
        matches!(self, Constraint::SymbolicSubdivision)
    }
}

/// Whether a tier with this (optional) constraint holds alignable annotations.
///
/// Top-level tiers have no constraint and are always alignable.
pub fn uses_alignable(constraint: Option<Constraint>) -> bool {
    constraint.is_none_or(|c| c.is_alignable())
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overlap correction applied when a top-level annotation's interval changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum PropagationMode {
    /// Push overlapping neighbors out of the way, preserving their durations.
    #[default]
    Bulldozer,
    /// Shift everything after the edited annotation by the change of its end.
    Shift,
}

impl PropagationMode {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationMode::Bulldozer => "bulldozer",
            PropagationMode::Shift => "shift",
        }
    }
}

impl std::fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
