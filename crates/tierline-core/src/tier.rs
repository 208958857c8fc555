//! Tiers: named, ordered annotation collections in a tier hierarchy.

use tierline_types::{uses_alignable, AnnotationId, Constraint, TierId};

/// A tier of the document.
///
/// `annotations` is kept in comparator order by the document; only live
/// annotations are listed (deleted ones are detached).
#[derive(Clone, Debug)]
pub struct Tier {
    pub(crate) id: TierId,
    pub(crate) name: String,
    pub(crate) constraint: Option<Constraint>,
    pub(crate) parent: Option<TierId>,
    pub(crate) participant: Option<String>,
    pub(crate) linguistic_type: Option<String>,
    pub(crate) annotations: Vec<AnnotationId>,
}

impl Tier {
    pub(crate) fn new(id: TierId, name: String, constraint: Option<Constraint>, parent: Option<TierId>) -> Self {
        Self {
            id,
            name,
            constraint,
            parent,
            participant: None,
            linguistic_type: None,
            annotations: Vec::new(),
        }
    }

    pub fn id(&self) -> TierId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constraint(&self) -> Option<Constraint> {
        self.constraint
    }

    pub fn parent(&self) -> Option<TierId> {
        self.parent
    }

    pub fn participant(&self) -> Option<&str> {
        self.participant.as_deref()
    }

    pub fn linguistic_type(&self) -> Option<&str> {
        self.linguistic_type.as_deref()
    }

    /// Live annotations in document order.
    pub fn annotations(&self) -> &[AnnotationId] {
        &self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Top-level tiers have no parent and no constraint.
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether annotations on this tier are alignable.
    pub fn is_alignable(&self) -> bool {
        uses_alignable(self.constraint)
    }

    /// Position of an annotation in the tier collection.
    pub fn index_of(&self, id: AnnotationId) -> Option<usize> {
        self.annotations.iter().position(|a| *a == id)
    }

    pub(crate) fn detach(&mut self, id: AnnotationId) -> bool {
        match self.index_of(id) {
            Some(i) => {
                self.annotations.remove(i);
                true
            }
            None => false,
        }
    }
}
