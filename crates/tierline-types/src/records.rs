//! Plain record shapes exchanged with format collaborators.
//!
//! Parsers (EAF, CHAT, delimited text) produce these records; the engine's
//! two-phase loader turns them into a live document, and export walks the
//! document back into the same shapes. Records reference each other by the
//! string ids of the source format, never by arena index, so a parser can
//! emit a reference annotation before the annotation it points at.

use serde::{Deserialize, Serialize};

use crate::{Constraint, Millis};

/// A complete document in record form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecords {
    /// Time slots in timeline order.
    #[serde(default)]
    pub time_slots: Vec<TimeSlotRecord>,
    /// Tiers, parents before or after children.
    #[serde(default)]
    pub tiers: Vec<TierRecord>,
    /// Annotations in any order.
    #[serde(default)]
    pub annotations: Vec<AnnotationRecord>,
}

impl DocumentRecords {
    /// Check if there is nothing to load.
    pub fn is_empty(&self) -> bool {
        self.time_slots.is_empty() && self.tiers.is_empty() && self.annotations.is_empty()
    }
}

/// One point on the timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlotRecord {
    pub id: String,
    /// `None` for an unaligned slot.
    #[serde(default)]
    pub time: Option<Millis>,
}

impl TimeSlotRecord {
    pub fn aligned(id: impl Into<String>, time: Millis) -> Self {
        Self { id: id.into(), time: Some(time) }
    }

    pub fn unaligned(id: impl Into<String>) -> Self {
        Self { id: id.into(), time: None }
    }
}

/// A tier and its place in the tier hierarchy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRecord {
    pub name: String,
    /// `None` for a top-level tier.
    #[serde(default)]
    pub constraint: Option<Constraint>,
    /// Name of the parent tier.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub linguistic_type: Option<String>,
}

impl TierRecord {
    /// A top-level tier.
    pub fn top_level(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            parent: None,
            participant: None,
            linguistic_type: None,
        }
    }

    /// A dependent tier under `parent`.
    pub fn dependent(name: impl Into<String>, constraint: Constraint, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Some(constraint),
            parent: Some(parent.into()),
            participant: None,
            linguistic_type: None,
        }
    }
}

/// Reference to a resource outside the document (concept registry, lexicon entry).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    pub kind: String,
    pub value: String,
}

/// How an annotation is anchored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extent {
    /// Anchored to two time slots.
    Alignable { begin: String, end: String },
    /// Derived from parent annotations; `previous` links a subdivision chain.
    Reference {
        parents: Vec<String>,
        #[serde(default)]
        previous: Option<String>,
    },
}

/// One annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: String,
    pub tier: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub cv_entry_id: Option<String>,
    #[serde(default)]
    pub external_refs: Vec<ExternalRef>,
    pub extent: Extent,
}

impl AnnotationRecord {
    pub fn alignable(
        id: impl Into<String>,
        tier: impl Into<String>,
        begin: impl Into<String>,
        end: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tier: tier.into(),
            value: value.into(),
            cv_entry_id: None,
            external_refs: Vec::new(),
            extent: Extent::Alignable { begin: begin.into(), end: end.into() },
        }
    }

    pub fn reference(
        id: impl Into<String>,
        tier: impl Into<String>,
        parent: impl Into<String>,
        previous: Option<&str>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tier: tier.into(),
            value: value.into(),
            cv_entry_id: None,
            external_refs: Vec::new(),
            extent: Extent::Reference {
                parents: vec![parent.into()],
                previous: previous.map(str::to_string),
            },
        }
    }
}
