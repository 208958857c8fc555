//! Annotation records held in the document arena.
//!
//! Shared fields live on [`Annotation`]; the anchoring differs per kind and
//! is a tagged variant ([`AnnotationKind`]) matched on by the engine:
//!
//! - **Alignable**: two slot ids, possibly shared with the parent (time
//!   subdivision) or with siblings. `begin == end` on a live annotation marks
//!   it for deletion.
//! - **Reference**: no slots; extent derived from parent annotations and the
//!   position in a same-tier chain.
//!
//! Structural listeners (the children that depend on an annotation) are not
//! stored here; the document keeps them in an adjacency map keyed by parent.

use serde::{Deserialize, Serialize};
use tierline_types::{AnnotationId, ExternalRef, Millis, SlotId, TierId};

/// Anchoring of an alignable annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alignable {
    pub(crate) begin: SlotId,
    pub(crate) end: SlotId,
    /// The annotation on the parent tier this one lies in.
    pub(crate) parent: Option<AnnotationId>,
}

impl Alignable {
    pub fn begin(&self) -> SlotId {
        self.begin
    }

    pub fn end(&self) -> SlotId {
        self.end
    }

    pub fn parent(&self) -> Option<AnnotationId> {
        self.parent
    }
}

/// Parents and chain links of a reference annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    pub(crate) parents: Vec<AnnotationId>,
    pub(crate) next: Option<AnnotationId>,
    pub(crate) previous: Option<AnnotationId>,
}

impl Reference {
    pub fn parents(&self) -> &[AnnotationId] {
        &self.parents
    }

    pub fn next(&self) -> Option<AnnotationId> {
        self.next
    }

    pub fn previous(&self) -> Option<AnnotationId> {
        self.previous
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationKind {
    Alignable(Alignable),
    Reference(Reference),
}

/// One annotation in the document arena.
#[derive(Clone, Debug)]
pub struct Annotation {
    pub(crate) id: AnnotationId,
    /// Id used by the source format and by export.
    pub(crate) external_id: String,
    pub(crate) value: String,
    pub(crate) tier: TierId,
    pub(crate) deleted: bool,
    pub(crate) cv_entry_id: Option<String>,
    pub(crate) external_refs: Vec<ExternalRef>,
    pub(crate) kind: AnnotationKind,
}

impl Annotation {
    pub(crate) fn new(
        id: AnnotationId,
        external_id: String,
        tier: TierId,
        value: String,
        kind: AnnotationKind,
    ) -> Self {
        Self {
            id,
            external_id,
            value,
            tier,
            deleted: false,
            cv_entry_id: None,
            external_refs: Vec::new(),
            kind,
        }
    }

    pub fn id(&self) -> AnnotationId {
        self.id
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn tier(&self) -> TierId {
        self.tier
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn cv_entry_id(&self) -> Option<&str> {
        self.cv_entry_id.as_deref()
    }

    pub fn external_refs(&self) -> &[ExternalRef] {
        &self.external_refs
    }

    pub fn kind(&self) -> &AnnotationKind {
        &self.kind
    }

    pub fn is_alignable(&self) -> bool {
        matches!(self.kind, AnnotationKind::Alignable(_))
    }

    pub fn as_alignable(&self) -> Option<&Alignable> {
        match &self.kind {
            AnnotationKind::Alignable(a) => Some(a),
            AnnotationKind::Reference(_) => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match &self.kind {
            AnnotationKind::Reference(r) => Some(r),
            AnnotationKind::Alignable(_) => None,
        }
    }

    pub(crate) fn alignable_mut(&mut self) -> &mut Alignable {
        match &mut self.kind {
            AnnotationKind::Alignable(a) => a,
            AnnotationKind::Reference(_) => panic!("annotation {} is not alignable", self.id),
        }
    }

    pub(crate) fn reference_mut(&mut self) -> &mut Reference {
        match &mut self.kind {
            AnnotationKind::Reference(r) => r,
            AnnotationKind::Alignable(_) => panic!("annotation {} is not a reference", self.id),
        }
    }

    /// The annotation this one depends on first: the alignable parent, or
    /// `parents[0]` of a reference.
    pub fn primary_parent(&self) -> Option<AnnotationId> {
        match &self.kind {
            AnnotationKind::Alignable(a) => a.parent,
            AnnotationKind::Reference(r) => r.parents.first().copied(),
        }
    }

    /// Slots this annotation anchors to (empty for references).
    pub fn slots(&self) -> Vec<SlotId> {
        match &self.kind {
            AnnotationKind::Alignable(a) => vec![a.begin, a.end],
            AnnotationKind::Reference(_) => Vec::new(),
        }
    }
}

/// Serializable view of an annotation with its effective times.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSnapshot {
    pub id: AnnotationId,
    pub external_id: String,
    pub tier: String,
    pub value: String,
    pub begin: Millis,
    pub end: Millis,
    /// Both boundaries carry stored times (always false for references).
    pub time_aligned: bool,
    pub parent: Option<String>,
}
