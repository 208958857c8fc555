//! Structural self-check.
//!
//! [`Document::verify`] walks the whole document and reports every broken
//! invariant it finds. A document built only through the public API always
//! verifies clean; the check exists for loaded data and for tests.

use serde::Serialize;
use tierline_types::{AnnotationId, SlotId, TierId};

use crate::annotation::AnnotationKind;
use crate::document::Document;

/// One broken invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Aligned times decrease between two positions.
    TimeOrder { position: usize, slot: SlotId },
    /// A live annotation anchors on a slot not in the time order.
    DanglingSlot { annotation: AnnotationId, slot: SlotId },
    /// A live alignable annotation whose begin slot is not before its end
    /// slot, or whose effective duration is not positive.
    Degenerate { annotation: AnnotationId },
    /// A child's effective interval leaves its parent's.
    Containment { annotation: AnnotationId, parent: AnnotationId },
    /// A reference without parents, or with a deleted parent.
    BrokenParent { annotation: AnnotationId },
    /// `a.next == b` without `b.previous == a`, or the reverse.
    ChainLink { annotation: AnnotationId },
    /// A live annotation missing from its tier, or a deleted one listed.
    TierMembership { annotation: AnnotationId, tier: TierId },
    /// Two neighbours in a tier collection are out of comparator order.
    TierOrder { tier: TierId, index: usize },
    /// A slot no annotation anchors on.
    OrphanSlot { slot: SlotId },
}

impl Document {
    /// Check every structural invariant. Empty means consistent.
    pub fn verify(&self) -> Vec<Violation> {
        let mut found = Vec::new();
        self.verify_time_order(&mut found);
        self.verify_annotations(&mut found);
        self.verify_tiers(&mut found);
        if !found.is_empty() {
            tracing::warn!(count = found.len(), "document failed verification");
        }
        found
    }

    fn verify_time_order(&self, found: &mut Vec<Violation>) {
        let mut last = None;
        for (position, slot) in self.time_order.iter().enumerate() {
            if let Some(t) = slot.time() {
                if last.is_some_and(|l| t < l) {
                    found.push(Violation::TimeOrder { position, slot: slot.id() });
                }
                last = Some(t);
            }
            if self.slot_users(slot.id()).is_empty() {
                found.push(Violation::OrphanSlot { slot: slot.id() });
            }
        }
    }

    fn verify_annotations(&self, found: &mut Vec<Violation>) {
        for ann in &self.annotations {
            let id = ann.id;
            if ann.deleted {
                if let Some(tier) = self.get_tier(ann.tier) {
                    if tier.index_of(id).is_some() {
                        found.push(Violation::TierMembership { annotation: id, tier: ann.tier });
                    }
                }
                continue;
            }
            let Some(tier) = self.get_tier(ann.tier) else {
                continue;
            };
            if tier.index_of(id).is_none() {
                found.push(Violation::TierMembership { annotation: id, tier: ann.tier });
            }

            match &ann.kind {
                AnnotationKind::Alignable(a) => {
                    let mut dangling = false;
                    for slot in [a.begin, a.end] {
                        if !self.time_order.contains(slot) {
                            found.push(Violation::DanglingSlot { annotation: id, slot });
                            dangling = true;
                        }
                    }
                    if dangling {
                        continue;
                    }
                    if self.time_order.position(a.begin) >= self.time_order.position(a.end)
                        || self.is_degenerate(id)
                    {
                        found.push(Violation::Degenerate { annotation: id });
                    }
                    if let Some(parent) = a.parent {
                        let (b, e) = self.interval(id);
                        let (pb, pe) = self.interval(parent);
                        if self.annotation(parent).deleted || b < pb || e > pe {
                            found.push(Violation::Containment { annotation: id, parent });
                        }
                    }
                }
                AnnotationKind::Reference(r) => {
                    if r.parents.is_empty() || r.parents.iter().any(|p| self.annotation(*p).deleted) {
                        found.push(Violation::BrokenParent { annotation: id });
                    }
                    let next_ok = r.next.is_none_or(|n| {
                        self.annotation(n).as_reference().and_then(|nr| nr.previous) == Some(id)
                    });
                    let previous_ok = r.previous.is_none_or(|p| {
                        self.annotation(p).as_reference().and_then(|pr| pr.next) == Some(id)
                    });
                    if !next_ok || !previous_ok {
                        found.push(Violation::ChainLink { annotation: id });
                    }
                }
            }
        }
    }

    fn verify_tiers(&self, found: &mut Vec<Violation>) {
        for tier in self.tiers() {
            for (index, pair) in tier.annotations().windows(2).enumerate() {
                if !self.compare(pair[0], pair[1]).is_lt() {
                    found.push(Violation::TierOrder { tier: tier.id(), index });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tierline_types::Constraint;

    use super::*;

    #[test]
    fn test_api_built_document_is_clean() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        let morph = doc
            .add_tier("morphemes", Some(Constraint::SymbolicSubdivision), Some("words"))
            .unwrap();
        let u = doc.create_annotation(utt, 0, 1000, "").unwrap();
        let w = doc.create_annotation(words, 0, 1000, "").unwrap();
        doc.create_annotation(words, 500, 1000, "").unwrap();
        let m = doc.create_annotation(morph, 0, 0, "").unwrap();
        doc.create_reference_after(m, "");
        doc.update_interval(w, 0, 700);
        doc.update_interval(u, 100, 800);
        assert_eq!(doc.verify(), Vec::<Violation>::new());
    }

    #[test]
    fn test_broken_links_are_reported() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let morph = doc
            .add_tier("morphemes", Some(Constraint::SymbolicSubdivision), Some("utterance"))
            .unwrap();
        doc.create_annotation(utt, 0, 1000, "").unwrap();
        let m1 = doc.create_annotation(morph, 0, 0, "").unwrap();
        let m2 = doc.create_reference_after(m1, "");

        doc.annotation_mut(m2).reference_mut().previous = None;
        let found = doc.verify();
        assert!(found.contains(&Violation::ChainLink { annotation: m1 }));
    }
}
