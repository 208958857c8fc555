//! Traversal of the annotation hierarchy.
//!
//! Parent links form a forest: alignable annotations point at one parent,
//! references at one or more. Walks follow the primary parent upwards and the
//! listener adjacency downwards. Both directions track visited nodes and
//! circuit-break at [`MAX_HIERARCHY_DEPTH`] levels so corrupted links cannot
//! loop forever.

use std::collections::{HashSet, VecDeque};

use tierline_types::{AnnotationId, TierId};

use crate::document::Document;

/// Maximum depth of parent links followed by any walk.
pub const MAX_HIERARCHY_DEPTH: usize = 256;

impl Document {
    /// Annotations this one depends on, from the immediate primary parent up
    /// to the top-level root.
    pub fn ancestors(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let mut result = Vec::new();
        let mut current = self.annotation(id).primary_parent();

        while let Some(parent) = current {
            if result.len() >= MAX_HIERARCHY_DEPTH {
                tracing::warn!("ancestors() hit MAX_HIERARCHY_DEPTH ({MAX_HIERARCHY_DEPTH}), truncating");
                break;
            }
            if result.contains(&parent) {
                break;
            }
            result.push(parent);
            current = self.annotation(parent).primary_parent();
        }

        result
    }

    /// Number of primary-parent links above an annotation (0 for roots).
    pub fn depth(&self, id: AnnotationId) -> usize {
        self.ancestors(id).len()
    }

    /// Whether `root` is `candidate` or one of its ancestors.
    pub fn is_within(&self, candidate: AnnotationId, root: AnnotationId) -> bool {
        candidate == root || self.ancestors(candidate).contains(&root)
    }

    /// Live annotations depending on `id`, directly or transitively, in
    /// breadth-first order. Excludes `id` itself.
    pub fn descendants(&self, id: AnnotationId) -> Vec<AnnotationId> {
        self.descendants_with_depth(id).into_iter().map(|(_, a)| a).collect()
    }

    /// Like [`Document::descendants`], paired with the distance from `id`.
    pub fn descendants_with_depth(&self, id: AnnotationId) -> Vec<(usize, AnnotationId)> {
        let mut result = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut queue: VecDeque<(usize, AnnotationId)> =
            self.children_of(id).iter().map(|c| (1, *c)).collect();

        while let Some((depth, current)) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if depth > MAX_HIERARCHY_DEPTH {
                tracing::warn!("descendants() hit MAX_HIERARCHY_DEPTH ({MAX_HIERARCHY_DEPTH}), truncating");
                break;
            }
            if self.annotation(current).is_deleted() {
                continue;
            }
            result.push((depth, current));
            for child in self.children_of(current) {
                queue.push_back((depth + 1, *child));
            }
        }

        result
    }

    /// Tiers below `tier`, transitively, parents before children.
    pub fn dependent_tiers(&self, tier: TierId) -> Vec<TierId> {
        let mut result = Vec::new();
        let mut queue = VecDeque::from([(0usize, tier)]);

        while let Some((depth, current)) = queue.pop_front() {
            if depth > MAX_HIERARCHY_DEPTH {
                tracing::warn!("dependent_tiers() hit MAX_HIERARCHY_DEPTH ({MAX_HIERARCHY_DEPTH}), truncating");
                break;
            }
            for child in self.child_tiers(current) {
                if !result.contains(&child) {
                    result.push(child);
                    queue.push_back((depth + 1, child));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use tierline_types::Constraint;

    use crate::document::Document;

    fn three_levels() -> (Document, [tierline_types::AnnotationId; 4]) {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        let gloss = doc
            .add_tier("gloss", Some(Constraint::SymbolicAssociation), Some("words"))
            .unwrap();

        let u = doc.create_annotation(utt, 0, 1000, "hello world").unwrap();
        let w1 = doc.create_annotation(words, 0, 1000, "hello").unwrap();
        let w2 = doc.create_annotation(words, 500, 1000, "world").unwrap();
        let g = doc.create_annotation(gloss, 0, 100, "greeting").unwrap();
        (doc, [u, w1, w2, g])
    }

    #[test]
    fn test_ancestors_and_depth() {
        let (doc, [u, w1, _, g]) = three_levels();
        assert_eq!(doc.ancestors(g), vec![w1, u]);
        assert_eq!(doc.depth(u), 0);
        assert_eq!(doc.depth(g), 2);
        assert!(doc.is_within(g, u));
        assert!(doc.is_within(u, u));
        assert!(!doc.is_within(u, g));
    }

    #[test]
    fn test_descendants_breadth_first() {
        let (doc, [u, w1, w2, g]) = three_levels();
        let got = doc.descendants_with_depth(u);
        assert_eq!(got, vec![(1, w1), (1, w2), (2, g)]);
        assert!(doc.descendants(g).is_empty());
    }

    #[test]
    fn test_dependent_tiers() {
        let (doc, _) = three_levels();
        let utt = doc.tier_by_name("utterance").unwrap();
        let names: Vec<&str> = doc
            .dependent_tiers(utt)
            .into_iter()
            .map(|t| doc.tier(t).name())
            .collect();
        assert_eq!(names, vec!["words", "gloss"]);
    }
}
