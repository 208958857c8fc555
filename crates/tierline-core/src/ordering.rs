//! Document order of annotations.
//!
//! Annotations are ordered by their first alignable root (the annotation
//! itself when alignable, else the root reached through `parents[0]`):
//!
//! 1. Different roots: by the root's begin slot position, then end slot
//!    position, then arena id.
//! 2. Same root: the alignable root sorts before references under it.
//! 3. Two references: the order of their primary parents; under the same
//!    parent, chain order (`a` first when `b` is reachable through `next`),
//!    separate chains by head, then arena id.
//!
//! A deleted annotation compares by its tier index when both are still
//! listed, and as `Less` otherwise. That fallback is asymmetric; tier lists
//! never contain deleted annotations, so sorting never sees it.

use std::cmp::Ordering;

use tierline_types::{AnnotationId, TierId};

use crate::annotation::AnnotationKind;
use crate::document::Document;
use crate::hierarchy::MAX_HIERARCHY_DEPTH;

impl Document {
    /// The annotation's first alignable ancestor along `parents[0]`, or the
    /// annotation itself when alignable.
    pub fn first_alignable_root(&self, id: AnnotationId) -> AnnotationId {
        let mut current = id;
        for _ in 0..MAX_HIERARCHY_DEPTH {
            match &self.annotation(current).kind {
                AnnotationKind::Alignable(_) => return current,
                AnnotationKind::Reference(r) => match r.parents.first() {
                    Some(p) => current = *p,
                    None => return current,
                },
            }
        }
        tracing::warn!(annotation = %id, "first_alignable_root() hit MAX_HIERARCHY_DEPTH ({MAX_HIERARCHY_DEPTH})");
        current
    }

    /// Compare two annotations in document order.
    pub fn compare(&self, a: AnnotationId, b: AnnotationId) -> Ordering {
        self.compare_at_depth(a, b, 0)
    }

    fn compare_at_depth(&self, a: AnnotationId, b: AnnotationId, depth: usize) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let (aa, bb) = (self.annotation(a), self.annotation(b));
        if aa.deleted || bb.deleted {
            return self.compare_detached(a, b);
        }

        let (ra, rb) = (self.first_alignable_root(a), self.first_alignable_root(b));
        if ra != rb {
            return self
                .root_positions(ra)
                .cmp(&self.root_positions(rb))
                .then_with(|| ra.cmp(&rb));
        }

        match (aa.is_alignable(), bb.is_alignable()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => a.cmp(&b),
            (false, false) => match (aa.primary_parent(), bb.primary_parent()) {
                (Some(pa), Some(pb)) if pa != pb && depth < MAX_HIERARCHY_DEPTH => {
                    self.compare_at_depth(pa, pb, depth + 1).then_with(|| a.cmp(&b))
                }
                _ => self.chain_key(a).cmp(&self.chain_key(b)).then_with(|| a.cmp(&b)),
            },
        }
    }

    /// `(head, index)` within the chain: siblings in one chain sort by
    /// `next` order, separate chains by their heads.
    fn chain_key(&self, id: AnnotationId) -> (AnnotationId, usize) {
        let chain = self.chain(id);
        let index = chain.iter().position(|c| *c == id).unwrap_or(0);
        (chain[0], index)
    }

    fn root_positions(&self, root: AnnotationId) -> (usize, usize) {
        match &self.annotation(root).kind {
            AnnotationKind::Alignable(r) => (self.slot_position(r.begin), self.slot_position(r.end)),
            AnnotationKind::Reference(_) => (usize::MAX, usize::MAX),
        }
    }

    fn slot_position(&self, slot: tierline_types::SlotId) -> usize {
        if self.time_order.contains(slot) {
            self.time_order.position(slot)
        } else {
            usize::MAX
        }
    }

    fn compare_detached(&self, a: AnnotationId, b: AnnotationId) -> Ordering {
        let index = |id: AnnotationId| {
            self.get_tier(self.annotation(id).tier)
                .and_then(|t| t.index_of(id))
        };
        match (index(a), index(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Less,
        }
    }

    /// Re-sort a tier's collection if it is out of comparator order.
    /// Returns whether anything moved.
    pub(crate) fn ensure_tier_order(&mut self, tier: TierId) -> bool {
        let mut list = std::mem::take(&mut self.tier_mut(tier).annotations);
        let sorted = list.windows(2).all(|w| self.compare(w[0], w[1]).is_lt());
        if !sorted {
            list.sort_by(|x, y| self.compare(*x, *y));
            tracing::trace!(%tier, "tier re-sorted");
        }
        self.tier_mut(tier).annotations = list;
        !sorted
    }
}
