//! Interval edits on alignable annotations and their propagation.
//!
//! `update_interval` runs in a fixed order:
//!
//! 1. Clamp the request into the parent (or, for top-level annotations in
//!    shift mode, behind the preceding sibling). Nothing mutates before this.
//! 2. Retime the annotation's own slots. Slots shared with the parent stay.
//! 3. Correct overlapping siblings according to the tier constraint, or the
//!    document's propagation mode for top-level tiers.
//! 4. Notify dependents breadth-first: clamp their aligned slots into the new
//!    parent bounds and delete fully aligned children that collapsed.
//! 5. Finish the edit: repair the time order, sweep degenerate annotations,
//!    prune orphan slots, restore tier order and publish.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tierline_types::{AnnotationId, Constraint, Millis, PropagationMode};

use crate::constraint::clamp_to_parent;
use crate::document::{Document, EditScope};

impl Document {
    /// Move an alignable annotation to `begin..end`.
    ///
    /// Requests with `begin >= end`, or lying entirely outside the parent,
    /// are ignored.
    ///
    /// # Panics
    ///
    /// If the annotation is deleted or is a reference annotation.
    pub fn update_interval(&mut self, id: AnnotationId, begin: Millis, end: Millis) {
        let ann = self.live(id);
        let tier = ann.tier;
        let a = ann
            .as_alignable()
            .cloned()
            .unwrap_or_else(|| panic!("annotation {id} is not alignable"));

        let span = tracing::debug_span!("update_interval", annotation = %id, begin, end);
        let _enter = span.enter();

        if begin >= end {
            tracing::debug!("empty interval ignored");
            return;
        }

        let constraint = self.tier(tier).constraint();
        let mode = self.propagation_mode();
        let (old_begin, old_end) = self.interval(id);
        let parent_slots = a
            .parent
            .and_then(|p| self.annotation(p).as_alignable().map(|pa| (pa.begin, pa.end)));
        let shares_begin = parent_slots.is_some_and(|(pb, _)| pb == a.begin);
        let shares_end = parent_slots.is_some_and(|(_, pe)| pe == a.end);

        let (b, e) = match a.parent {
            Some(parent) => {
                let Some((b, e)) = clamp_to_parent(begin, end, self.interval(parent)) else {
                    tracing::debug!("interval outside parent ignored");
                    return;
                };
                (
                    if shares_begin { old_begin } else { b },
                    if shares_end { old_end } else { e },
                )
            }
            None => {
                let mut b = begin.max(0);
                if mode == PropagationMode::Shift {
                    if let Some(floor) = self.preceding_sibling_end(id, old_begin) {
                        b = b.max(floor);
                    }
                }
                (b, end)
            }
        };
        if b >= e {
            tracing::debug!(b, e, "interval empty after clamping, ignored");
            return;
        }

        let following: Vec<AnnotationId> = if a.parent.is_none() && mode == PropagationMode::Shift {
            self.siblings(id)
                .into_iter()
                .filter(|s| self.begin_time(*s) >= old_end)
                .collect()
        } else {
            Vec::new()
        };

        let mut scope = EditScope::default();
        scope.tiers.insert(tier);
        scope.changed(id);
        if !shares_begin {
            self.retime(a.begin, b, &mut scope);
        }
        if !shares_end {
            self.retime(a.end, e, &mut scope);
        }

        match (a.parent, constraint) {
            (Some(_), Some(Constraint::TimeSubdivision)) => self.pull_subdivision_siblings(id, b, e, &mut scope),
            (Some(_), _) => self.trim_overlapping_siblings(id, b, e, &mut scope),
            (None, _) => match mode {
                PropagationMode::Bulldozer => self.bulldoze(id, b, e, &mut scope),
                PropagationMode::Shift => {
                    let delta = e - old_end;
                    for s in following {
                        self.shift_subtree(s, delta, &mut scope);
                    }
                }
            },
        }

        self.notify_interval_changed(&mut scope);
        self.finish_edit(&mut scope);
    }

    /// Give an annotation stored times at its current effective bounds,
    /// aligning its alignable ancestors first.
    pub fn make_time_aligned(&mut self, id: AnnotationId) {
        let parent = self
            .live(id)
            .as_alignable()
            .unwrap_or_else(|| panic!("annotation {id} is not alignable"))
            .parent;
        if let Some(p) = parent {
            if !self.is_time_aligned(p) {
                self.make_time_aligned(p);
            }
        }
        if self.is_deleted(id) {
            return;
        }
        let (b, e) = self.interval(id);
        self.update_interval(id, b, e);
    }

    /// Live annotations on the same tier with the same parent.
    pub fn siblings(&self, id: AnnotationId) -> Vec<AnnotationId> {
        let ann = self.annotation(id);
        match ann.primary_parent() {
            Some(parent) => self
                .children_on_tier(parent, ann.tier)
                .into_iter()
                .filter(|s| *s != id)
                .collect(),
            None => self
                .tier(ann.tier)
                .annotations()
                .iter()
                .copied()
                .filter(|s| *s != id)
                .collect(),
        }
    }

    fn preceding_sibling_end(&self, id: AnnotationId, begin: Millis) -> Option<Millis> {
        self.siblings(id)
            .into_iter()
            .filter(|s| self.begin_time(*s) < begin)
            .map(|s| self.end_time(s))
            .max()
    }

    /// Remove siblings the new interval covers, and trim those it overlaps.
    pub(crate) fn trim_overlapping_siblings(&mut self, id: AnnotationId, b: Millis, e: Millis, scope: &mut EditScope) {
        for s in self.siblings(id) {
            if self.is_deleted(s) {
                continue;
            }
            let (sb, se) = self.interval(s);
            if se <= b || sb >= e {
                continue;
            }
            if sb >= b && se <= e {
                tracing::debug!(sibling = %s, "covered sibling removed");
                self.mark_deleted(s, scope);
                continue;
            }
            let Some(sa) = self.annotation(s).as_alignable().cloned() else {
                continue;
            };
            if sb < b {
                self.retime(sa.end, b, scope);
            } else {
                self.retime(sa.begin, e, scope);
            }
            scope.changed(s);
        }
    }

    /// Time-subdivision siblings tile the parent: earlier boundaries later
    /// than `b` come down to `b`, later boundaries earlier than `e` go up to
    /// `e`. Siblings squeezed to nothing are swept afterwards.
    fn pull_subdivision_siblings(&mut self, id: AnnotationId, b: Millis, e: Millis, scope: &mut EditScope) {
        let ann = self.annotation(id);
        let tier = ann.tier;
        let Some(parent) = ann.primary_parent() else {
            return;
        };
        let Some((parent_begin, parent_end)) = self
            .annotation(parent)
            .as_alignable()
            .map(|pa| (pa.begin, pa.end))
        else {
            return;
        };
        let siblings = self.subdivision_children(parent, tier);
        let Some(index) = siblings.iter().position(|s| *s == id) else {
            return;
        };

        for &s in siblings[..index].iter().rev() {
            let Some(slot) = self.annotation(s).as_alignable().map(|sa| sa.begin) else {
                continue;
            };
            scope.changed(s);
            if slot == parent_begin {
                break;
            }
            match self.time_order.time(slot) {
                Some(t) if t > b => self.retime(slot, b, scope),
                Some(_) => break,
                None => {}
            }
        }

        for &s in &siblings[index + 1..] {
            let Some(slot) = self.annotation(s).as_alignable().map(|sa| sa.end) else {
                continue;
            };
            scope.changed(s);
            if slot == parent_end {
                break;
            }
            match self.time_order.time(slot) {
                Some(t) if t < e => self.retime(slot, e, scope),
                Some(_) => break,
                None => {}
            }
        }
    }

    /// Push overlapping top-level neighbours out of `b..e`, moving each
    /// neighbour together with its dependents. A neighbour that would be
    /// pushed before zero is trimmed instead.
    fn bulldoze(&mut self, id: AnnotationId, b: Millis, e: Millis, scope: &mut EditScope) {
        let neighbours: Vec<(AnnotationId, Millis, Millis)> = self
            .siblings(id)
            .into_iter()
            .map(|s| {
                let (sb, se) = self.interval(s);
                (s, sb, se)
            })
            .collect();

        let mut later: Vec<_> = neighbours.iter().copied().filter(|(_, sb, _)| *sb >= b).collect();
        later.sort_by_key(|(_, sb, _)| *sb);
        let mut cursor = e;
        for (s, sb, se) in later {
            if sb >= cursor {
                break;
            }
            let delta = cursor - sb;
            self.shift_subtree(s, delta, scope);
            cursor = se + delta;
        }

        let mut earlier: Vec<_> = neighbours.iter().copied().filter(|(_, sb, _)| *sb < b).collect();
        earlier.sort_by_key(|(_, sb, _)| std::cmp::Reverse(*sb));
        let mut cursor = b;
        for (s, sb, se) in earlier {
            if se <= cursor {
                break;
            }
            let delta = cursor - se;
            if sb + delta < 0 {
                if let Some(end) = self.annotation(s).as_alignable().map(|sa| sa.end) {
                    self.retime(end, cursor, scope);
                    scope.changed(s);
                }
                break;
            }
            self.shift_subtree(s, delta, scope);
            cursor = sb + delta;
        }
    }

    /// Shift the aligned slots of an annotation and all its descendants.
    fn shift_subtree(&mut self, root: AnnotationId, delta: Millis, scope: &mut EditScope) {
        if delta == 0 {
            return;
        }
        let mut slots = BTreeSet::new();
        for member in std::iter::once(root).chain(self.descendants(root)) {
            let ann = self.annotation(member);
            for slot in ann.slots() {
                if self.time_order.is_aligned(slot) {
                    slots.insert(slot);
                }
            }
            scope.annotations.insert(member);
            scope.tiers.insert(ann.tier);
        }
        scope.moved.insert(root);
        let slots: Vec<_> = slots.into_iter().collect();
        tracing::trace!(annotation = %root, delta, slots = slots.len(), "subtree shifted");
        self.time_order.shift(&slots, delta);
        scope.slots.extend(slots);
    }

    /// Walk dependents of every annotation in `scope.pending`, clamping
    /// their own aligned slots into the parent's new bounds. Fully aligned
    /// children left with no duration are deleted here.
    pub(crate) fn notify_interval_changed(&mut self, scope: &mut EditScope) {
        let mut queue: VecDeque<AnnotationId> = VecDeque::new();
        let mut seen: HashSet<AnnotationId> = HashSet::new();

        loop {
            for id in scope.pending.drain(..) {
                seen.remove(&id);
                queue.push_back(id);
            }
            let Some(parent) = queue.pop_front() else {
                break;
            };
            if !seen.insert(parent) || self.is_deleted(parent) {
                continue;
            }

            let (pb, pe) = self.interval(parent);
            let parent_slots = self.annotation(parent).as_alignable().map(|pa| [pa.begin, pa.end]);

            for child in self.children_of(parent).to_vec() {
                if self.is_deleted(child) {
                    continue;
                }
                scope.annotations.insert(child);
                scope.tiers.insert(self.annotation(child).tier);

                if let Some(c) = self.annotation(child).as_alignable().cloned() {
                    if pb < pe {
                        for slot in [c.begin, c.end] {
                            if parent_slots.is_some_and(|ps| ps.contains(&slot)) {
                                continue;
                            }
                            if let Some(t) = self.time_order.time(slot) {
                                let clamped = t.max(pb).min(pe);
                                if clamped != t {
                                    self.retime(slot, clamped, scope);
                                    scope.moved.insert(child);
                                }
                            }
                        }
                    }
                    if self.is_time_aligned(child) && self.is_degenerate(child) {
                        tracing::debug!(annotation = %child, "child collapsed by parent edit");
                        self.mark_deleted(child, scope);
                        continue;
                    }
                }
                queue.push_back(child);
            }
        }
    }
}
