//! Reference annotations: parent sets and same-tier chains.
//!
//! Symbolic-subdivision children of one parent form a doubly linked chain
//! through `previous`/`next`. The links are always symmetric: when `a.next`
//! is `b` then `b.previous` is `a`.

use tierline_types::AnnotationId;

use crate::document::{Document, EditScope};
use crate::events::ChangeOp;

impl Document {
    /// Add `parent` to a reference annotation's parents. The derived extent
    /// becomes the union over all parents when the tier rule cannot apply.
    ///
    /// # Panics
    ///
    /// If either annotation is deleted, `id` is not a reference, `parent` is
    /// not on the parent tier of `id`'s tier, `parent` is `id` or depends on
    /// it, or `id` is linked into a chain. Chain members share one parent set.
    pub fn add_reference(&mut self, id: AnnotationId, parent: AnnotationId) {
        let parent_tier = self.live(parent).tier;
        let ann = self.live(id);
        let tier = ann.tier;
        let r = ann
            .as_reference()
            .unwrap_or_else(|| panic!("annotation {id} is not a reference"));
        if r.parents.contains(&parent) {
            return;
        }
        assert!(
            r.previous.is_none() && r.next.is_none(),
            "annotation {id} is chained; its parents follow the chain"
        );
        assert_eq!(
            self.tier(tier).parent(),
            Some(parent_tier),
            "annotation {parent} is not on the parent tier of {id}"
        );
        assert!(!self.is_within(parent, id), "annotation {parent} depends on {id}");

        let parents = &mut self.annotation_mut(id).reference_mut().parents;
        parents.push(parent);
        self.add_listener(parent, id);
        tracing::debug!(annotation = %id, %parent, "reference added");
        self.ensure_tier_order(tier);
        self.publish(ChangeOp::TimeChanged, id, tier);
    }

    /// Drop `parent` from a reference annotation. An annotation left without
    /// parents is deleted.
    pub fn remove_reference(&mut self, id: AnnotationId, parent: AnnotationId) {
        let tier = self.live(id).tier;
        let parents = &mut self.annotation_mut(id).reference_mut().parents;
        let before = parents.len();
        parents.retain(|p| *p != parent);
        if parents.len() == before {
            return;
        }
        let orphaned = parents.is_empty();
        self.remove_listener(parent, id);
        tracing::debug!(annotation = %id, %parent, orphaned, "reference removed");

        let mut scope = EditScope::default();
        scope.tiers.insert(tier);
        if orphaned {
            self.mark_deleted(id, &mut scope);
        } else {
            scope.changed(id);
        }
        self.notify_interval_changed(&mut scope);
        self.finish_edit(&mut scope);
    }

    /// The chain `id` belongs to, head first.
    pub fn chain(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let limit = self.annotations.len();
        let mut head = id;
        for _ in 0..limit {
            match self.annotation(head).as_reference().and_then(|r| r.previous) {
                Some(p) if p != id => head = p,
                _ => break,
            }
        }

        let mut chain = vec![head];
        let mut current = head;
        while chain.len() <= limit {
            match self.annotation(current).as_reference().and_then(|r| r.next) {
                Some(n) if !chain.contains(&n) => {
                    chain.push(n);
                    current = n;
                }
                _ => break,
            }
        }
        chain
    }

    /// `(index, length)` of `id` within its chain.
    pub fn chain_position(&self, id: AnnotationId) -> (usize, usize) {
        let chain = self.chain(id);
        let index = chain.iter().position(|a| *a == id).unwrap_or(0);
        (index, chain.len())
    }

    /// Whether walking `next` from `from` reaches `to`.
    pub fn chain_reaches(&self, from: AnnotationId, to: AnnotationId) -> bool {
        let mut current = from;
        for _ in 0..self.annotations.len() {
            match self.annotation(current).as_reference().and_then(|r| r.next) {
                Some(n) if n == to => return true,
                Some(n) if n != from => current = n,
                _ => return false,
            }
        }
        false
    }

    /// Reference children of `parent` on `tier` in chain order. Children
    /// outside any chain follow in listener order.
    pub fn chain_children(&self, parent: AnnotationId, tier: tierline_types::TierId) -> Vec<AnnotationId> {
        let children = self.children_on_tier(parent, tier);
        let mut ordered: Vec<AnnotationId> = Vec::with_capacity(children.len());
        let heads = children.iter().copied().filter(|c| {
            self.annotation(*c)
                .as_reference()
                .and_then(|r| r.previous)
                .is_none_or(|p| !children.contains(&p))
        });
        for head in heads {
            for member in self.chain(head) {
                if children.contains(&member) && !ordered.contains(&member) {
                    ordered.push(member);
                }
            }
        }
        for c in children {
            if !ordered.contains(&c) {
                ordered.push(c);
            }
        }
        ordered
    }

    pub(crate) fn link_after(&mut self, anchor: AnnotationId, id: AnnotationId) {
        let next = self.annotation(anchor).as_reference().and_then(|r| r.next);
        self.annotation_mut(anchor).reference_mut().next = Some(id);
        let r = self.annotation_mut(id).reference_mut();
        r.previous = Some(anchor);
        r.next = next;
        if let Some(n) = next {
            self.annotation_mut(n).reference_mut().previous = Some(id);
        }
    }

    pub(crate) fn link_before(&mut self, anchor: AnnotationId, id: AnnotationId) {
        let previous = self.annotation(anchor).as_reference().and_then(|r| r.previous);
        self.annotation_mut(anchor).reference_mut().previous = Some(id);
        let r = self.annotation_mut(id).reference_mut();
        r.next = Some(anchor);
        r.previous = previous;
        if let Some(p) = previous {
            self.annotation_mut(p).reference_mut().next = Some(id);
        }
    }

    /// Take `id` out of its chain, joining its neighbours.
    pub(crate) fn unlink(&mut self, id: AnnotationId) {
        let r = self.annotation_mut(id).reference_mut();
        let previous = r.previous.take();
        let next = r.next.take();
        if let Some(p) = previous {
            self.annotation_mut(p).reference_mut().next = next;
        }
        if let Some(n) = next {
            self.annotation_mut(n).reference_mut().previous = previous;
        }
    }
}
