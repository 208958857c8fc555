//! Temporal annotation engine for tierline.
//!
//! A [`Document`] holds one shared timeline ([`TimeOrder`]) and a hierarchy
//! of tiers. Annotations on top-level tiers anchor on time slots directly;
//! annotations on dependent tiers follow their tier's [`Constraint`]:
//!
//! - **Time subdivision**: alignable children tile the parent with no gaps,
//!   sharing boundary slots with each other and with the parent.
//! - **Included in**: alignable children lie inside the parent, with gaps.
//! - **Symbolic subdivision**: reference children in an ordered chain, each
//!   taking an equal share of the parent.
//! - **Symbolic association**: one reference child mirroring the parent.
//!
//! # Consistency
//!
//! Edits never fail. Out-of-range requests are clamped into the parent or
//! ignored; overlaps are corrected by trimming, deleting, pushing
//! (bulldozer) or shifting; annotations left with no duration are deleted
//! with everything depending on them. After every edit:
//!
//! - aligned slot times are non-decreasing in position order
//! - every live alignable annotation has a positive duration
//! - children lie inside their parents
//! - chain links are symmetric
//! - tier collections are in [`Document::compare`] order
//!
//! [`Document::verify`] checks all of these.
//!
//! # Observing changes
//!
//! Edits publish [`ChangeEvent`]s on a broadcast bus; see [`events`].

mod annotation;
pub mod config;
pub mod constraint;
mod document;
mod error;
pub mod events;
mod hierarchy;
mod interval;
mod loader;
mod ordering;
mod reference;
mod tier;
mod time_order;
mod verify;

pub use annotation::{Alignable, Annotation, AnnotationKind, AnnotationSnapshot, Reference};
pub use config::DocumentConfig;
pub use document::{Document, SharedDocument, shared};
pub use error::{ConfigError, LoadError, TierError};
pub use events::{ChangeBus, ChangeEvent, ChangeMessage, ChangeOp, Subscription};
pub use hierarchy::MAX_HIERARCHY_DEPTH;
pub use loader::DocumentLoader;
pub use tier::Tier;
pub use time_order::{DEFAULT_UNALIGNED_SPACING_MS, TimeOrder, TimeSlot};
pub use verify::Violation;

pub use tierline_types::{
    AnnotationId, AnnotationRecord, Constraint, DocumentId, DocumentRecords, Extent, ExternalRef, Millis,
    PropagationMode, SlotId, TierId, TierRecord, TimeSlotRecord,
};

/// Result type for loading documents.
pub type Result<T, E = LoadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        let a = doc.create_annotation(t, 0, 250, "hello").unwrap();
        let json = serde_json::to_value(doc.snapshot(a)).unwrap();
        assert_eq!(json["tier"], "utterance");
        assert_eq!(json["begin"], 0);
        assert_eq!(json["end"], 250);
        assert_eq!(json["time_aligned"], true);
    }

    #[test]
    fn test_violations_serialize_tagged() {
        let v = Violation::OrphanSlot { slot: SlotId::from_index(3) };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "orphan_slot");
    }
}
