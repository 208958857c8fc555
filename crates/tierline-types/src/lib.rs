//! Shared identity, constraint, and record types for tierline.
//!
//! This crate is the leaf of the workspace: typed ids, the per-tier
//! constraint policy, the propagation mode, and the plain record shapes that
//! parsers and exporters exchange with the annotation engine. It has **no
//! internal tierline dependencies**.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Document (DocumentId)
//!     └── owns TimeOrder ── ordered TimeSlots (SlotId)
//!     └── owns Tiers (TierId)
//!             └── parent tier + Constraint decide the annotation kind
//!             └── holds Annotations (AnnotationId)
//!                     ├── Alignable: begin/end SlotId
//!                     └── Reference: parents + next/previous chain
//! ```
//!
//! # Key Types
//!
//! |-----------------------|------------------------------------------------|
//! | Type                  | Purpose                                        |
//! |-----------------------|------------------------------------------------|
//! | [`SlotId`]            | Arena index of a time slot                     |
//! | [`AnnotationId`]      | Arena index of an annotation                   |
//! | [`TierId`]            | Arena index of a tier                          |
//! | [`DocumentId`]        | Which document (UUIDv7, for logs and events)   |
//! | [`Constraint`]        | Parent/child time rule of a dependent tier     |
//! | [`PropagationMode`]   | Overlap correction for top-level edits         |
//! | [`DocumentRecords`]   | Load/export shape used by format collaborators |
//! |-----------------------|------------------------------------------------|

pub mod constraint;
pub mod ids;
pub mod records;

pub use constraint::{Constraint, PropagationMode, uses_alignable};
pub use ids::{AnnotationId, DocumentId, SlotId, TierId};
pub use records::{
    AnnotationRecord, DocumentRecords, Extent, ExternalRef, TierRecord, TimeSlotRecord,
};

/// Milliseconds on the document timeline.
pub type Millis = i64;
