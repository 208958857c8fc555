//! The shared document timeline.
//!
//! `TimeOrder` owns every [`TimeSlot`] of a document in an arena keyed by
//! [`SlotId`], plus an order vector mapping positions to slots. Annotations
//! only ever hold slot ids, so every change of a slot's time goes through
//! this type.
//!
//! # Positions
//!
//! `position` always equals the slot's index in the order vector; positions
//! are contiguous `0..len`. Inserting or removing a slot reindexes the slots
//! after it.
//!
//! # Unaligned slots
//!
//! A slot without a stored time is *unaligned*. Its effective time is a
//! linear interpolation between the nearest aligned slots around it:
//!
//! ```text
//!   pos:   4        5      6      7
//!   time:  100      ·      ·      500
//!   eff:   100      233    366    500
//! ```
//!
//! With no aligned slot on the left, interpolation starts from `0` at
//! position `-1`; with none on the right, every step adds the configured
//! spacing. The interpolated values are memoized per slot and recomputed only
//! for the unaligned runs next to a mutation.
//!
//! # Repair
//!
//! Setting a time never moves other slots. When edits leave aligned times
//! out of position order, [`TimeOrder::resort_window`] re-sorts a bounded
//! window: every aligned slot travels together with the unaligned slots that
//! trail it, so unaligned runs keep their anchors.

use tierline_types::{Millis, SlotId};

/// Default spacing for unaligned slots past the last aligned slot.
pub const DEFAULT_UNALIGNED_SPACING_MS: Millis = 100;

/// A point on the document timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSlot {
    id: SlotId,
    position: usize,
    time: Option<Millis>,
    /// Memoized interpolation; `None` for aligned slots.
    proposed: Option<Millis>,
}

impl TimeSlot {
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Index in the time order.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Stored time; `None` when unaligned.
    pub fn time(&self) -> Option<Millis> {
        self.time
    }

    pub fn is_aligned(&self) -> bool {
        self.time.is_some()
    }

    /// The memoized interpolated time of an unaligned slot.
    pub fn proposed_time(&self) -> Option<Millis> {
        self.proposed
    }
}

/// Ordered collection of time slots.
#[derive(Clone, Debug)]
pub struct TimeOrder {
    /// Slots indexed by `SlotId`. Removed slots leave `None` behind so ids
    /// are never reused.
    slots: Vec<Option<TimeSlot>>,
    /// Position → slot.
    order: Vec<SlotId>,
    /// Step used when no aligned slot follows an unaligned run.
    spacing: Millis,
}

impl Default for TimeOrder {
    fn default() -> Self {
        Self::new(DEFAULT_UNALIGNED_SPACING_MS)
    }
}

impl TimeOrder {
    pub fn new(spacing: Millis) -> Self {
        Self {
            slots: Vec::new(),
            order: Vec::new(),
            spacing,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn spacing(&self) -> Millis {
        self.spacing
    }

    /// Check whether `id` names a live slot of this time order.
    pub fn contains(&self, id: SlotId) -> bool {
        matches!(self.slots.get(id.index()), Some(Some(_)))
    }

    /// Get a slot.
    ///
    /// Panics if the slot does not belong to this time order or was removed.
    pub fn slot(&self, id: SlotId) -> &TimeSlot {
        match self.slots.get(id.index()) {
            Some(Some(slot)) => slot,
            _ => panic!("time slot {id} is not owned by this time order"),
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut TimeSlot {
        match self.slots.get_mut(id.index()) {
            Some(Some(slot)) => slot,
            _ => panic!("time slot {id} is not owned by this time order"),
        }
    }

    pub fn position(&self, id: SlotId) -> usize {
        self.slot(id).position
    }

    /// Stored time of a slot; `None` when unaligned.
    pub fn time(&self, id: SlotId) -> Option<Millis> {
        self.slot(id).time
    }

    pub fn is_aligned(&self, id: SlotId) -> bool {
        self.slot(id).is_aligned()
    }

    /// Effective time of a slot: its stored time, or the memoized
    /// interpolation for an unaligned slot.
    pub fn propose_time(&self, id: SlotId) -> Millis {
        let slot = self.slot(id);
        match (slot.time, slot.proposed) {
            (Some(t), _) => t,
            (None, Some(p)) => p,
            (None, None) => self.interpolate(slot.position),
        }
    }

    /// Slot at a position.
    pub fn at(&self, position: usize) -> Option<SlotId> {
        self.order.get(position).copied()
    }

    /// Slots in position order.
    pub fn iter(&self) -> impl Iterator<Item = &TimeSlot> + '_ {
        self.order.iter().map(move |id| self.slot(*id))
    }

    fn is_aligned_at(&self, position: usize) -> bool {
        self.slot(self.order[position]).is_aligned()
    }

    fn time_at(&self, position: usize) -> Option<Millis> {
        self.slot(self.order[position]).time
    }

    // =========================================================================
    // Slot lifecycle
    // =========================================================================

    fn insert_at(&mut self, position: usize, time: Option<Millis>) -> SlotId {
        let id = SlotId::from_index(self.slots.len());
        self.slots.push(Some(TimeSlot {
            id,
            position,
            time,
            proposed: None,
        }));
        self.order.insert(position, id);
        self.reindex(position, self.order.len());
        self.refresh_around(position);
        id
    }

    /// Append a slot at the end of the timeline (document load order).
    pub fn push(&mut self, time: Option<Millis>) -> SlotId {
        self.insert_at(self.order.len(), time)
    }

    /// Insert an aligned slot by time: before the first aligned slot with a
    /// later time.
    pub fn insert_aligned(&mut self, ms: Millis) -> SlotId {
        self.insert_aligned_in(ms, None, None)
    }

    /// Insert an aligned slot by time, restricted to positions strictly after
    /// `lower` and at or before `upper`'s current position.
    pub fn insert_aligned_in(&mut self, ms: Millis, lower: Option<SlotId>, upper: Option<SlotId>) -> SlotId {
        let lo = lower.map_or(0, |s| self.position(s) + 1);
        let hi = upper.map_or(self.order.len(), |s| self.position(s));
        assert!(lo <= hi, "insertion window {lo}..{hi} is inverted");

        let position = (lo..hi)
            .find(|&p| matches!(self.time_at(p), Some(t) if t > ms))
            .unwrap_or(hi);
        self.insert_at(position, Some(ms))
    }

    /// Insert an unaligned slot directly after `anchor`.
    pub fn insert_unaligned_after(&mut self, anchor: SlotId) -> SlotId {
        let position = self.position(anchor) + 1;
        self.insert_at(position, None)
    }

    /// Insert an unaligned slot directly before `anchor`.
    pub fn insert_unaligned_before(&mut self, anchor: SlotId) -> SlotId {
        let position = self.position(anchor);
        self.insert_at(position, None)
    }

    /// Remove a slot and close the gap.
    pub fn remove(&mut self, id: SlotId) {
        let position = self.position(id);
        self.order.remove(position);
        self.slots[id.index()] = None;
        self.reindex(position, self.order.len());
        if !self.order.is_empty() {
            let lo = position.saturating_sub(1);
            let hi = position.min(self.order.len() - 1);
            for p in lo..=hi {
                self.refresh_run_at(p);
            }
        }
    }

    fn reindex(&mut self, from: usize, to: usize) {
        for p in from..to {
            let id = self.order[p];
            self.slot_mut(id).position = p;
        }
    }

    // =========================================================================
    // Retiming
    // =========================================================================

    /// Align a slot at `ms`.
    ///
    /// Never reorders other slots; if the new time breaks position order the
    /// caller runs [`TimeOrder::resort_window`].
    pub fn set_time(&mut self, id: SlotId, ms: Millis) {
        let slot = self.slot_mut(id);
        slot.time = Some(ms);
        slot.proposed = None;
        let position = slot.position;
        self.refresh_around(position);
    }

    /// Turn a slot back into an unaligned one.
    pub fn clear_time(&mut self, id: SlotId) {
        let slot = self.slot_mut(id);
        slot.time = None;
        let position = slot.position;
        self.refresh_around(position);
    }

    /// Move every aligned slot in `ids` by `delta`. Unaligned slots follow
    /// through interpolation.
    pub fn shift(&mut self, ids: &[SlotId], delta: Millis) {
        if delta == 0 {
            return;
        }
        for &id in ids {
            if let Some(t) = self.time(id) {
                self.set_time(id, t + delta);
            }
        }
    }

    // =========================================================================
    // Interpolation
    // =========================================================================

    /// Recompute the memoized times of the unaligned runs touching `position`.
    fn refresh_around(&mut self, position: usize) {
        let lo = position.saturating_sub(1);
        let hi = (position + 1).min(self.order.len().saturating_sub(1));
        let mut p = lo;
        while p <= hi && p < self.order.len() {
            p = self.refresh_run_at(p) + 1;
        }
    }

    /// Recompute the run containing `position` if it is unaligned. Returns
    /// the last position of the run (or `position` itself when aligned).
    fn refresh_run_at(&mut self, position: usize) -> usize {
        if self.is_aligned_at(position) {
            return position;
        }
        let (l, r) = self.run_bounds(position);
        for p in l..=r {
            let value = self.interpolate(p);
            let id = self.order[p];
            self.slot_mut(id).proposed = Some(value);
        }
        r
    }

    /// Recompute every unaligned run.
    pub fn refresh_all(&mut self) {
        let mut p = 0;
        while p < self.order.len() {
            p = self.refresh_run_at(p) + 1;
        }
    }

    fn run_bounds(&self, position: usize) -> (usize, usize) {
        let mut l = position;
        while l > 0 && !self.is_aligned_at(l - 1) {
            l -= 1;
        }
        let mut r = position;
        while r + 1 < self.order.len() && !self.is_aligned_at(r + 1) {
            r += 1;
        }
        (l, r)
    }

    /// Interpolated time for the unaligned slot at `position`.
    fn interpolate(&self, position: usize) -> Millis {
        let (l, r) = self.run_bounds(position);
        let left = if l > 0 { self.time_at(l - 1).map(|t| (l as i64 - 1, t)) } else { None };
        let right = if r + 1 < self.order.len() {
            self.time_at(r + 1).map(|t| (r as i64 + 1, t))
        } else {
            None
        };
        let p = position as i64;

        let (p0, t0) = left.unwrap_or((-1, 0));
        match right {
            Some((p1, t1)) => t0 + (t1 - t0) * (p - p0) / (p1 - p0),
            None => t0 + self.spacing * (p - p0),
        }
    }

    // =========================================================================
    // Consistency and repair
    // =========================================================================

    /// Whether aligned times are non-decreasing over positions `lo..=hi`.
    pub fn is_consistent(&self, lo: usize, hi: usize) -> bool {
        if self.order.is_empty() {
            return true;
        }
        let hi = hi.min(self.order.len() - 1);
        let mut last: Option<Millis> = None;
        for p in lo..=hi {
            if let Some(t) = self.time_at(p) {
                if last.is_some_and(|l| t < l) {
                    return false;
                }
                last = Some(t);
            }
        }
        true
    }

    /// Whether the whole timeline is consistent.
    pub fn is_fully_consistent(&self) -> bool {
        self.order.is_empty() || self.is_consistent(0, self.order.len() - 1)
    }

    /// Grow the window spanned by `slots` until no aligned slot outside it is
    /// out of order with an aligned slot inside it. Returns `None` for an
    /// empty input.
    pub fn repair_window(&self, slots: impl IntoIterator<Item = SlotId>) -> Option<(usize, usize)> {
        let positions: Vec<usize> = slots
            .into_iter()
            .filter(|s| self.contains(*s))
            .map(|s| self.position(s))
            .collect();
        let mut lo = *positions.iter().min()?;
        let mut hi = *positions.iter().max()?;
        let last = self.order.len() - 1;

        loop {
            // Snap to group boundaries: a group is an aligned slot and the
            // unaligned slots trailing it.
            while lo > 0 && !self.is_aligned_at(lo) {
                lo -= 1;
            }
            while hi < last && !self.is_aligned_at(hi + 1) {
                hi += 1;
            }

            let times: Vec<Millis> = (lo..=hi).filter_map(|p| self.time_at(p)).collect();
            let (Some(&min_t), Some(&max_t)) = (times.iter().min(), times.iter().max()) else {
                return Some((lo, hi));
            };

            let mut grown = false;
            if lo > 0 {
                let prev = (0..lo).rev().find(|&p| self.is_aligned_at(p));
                if let Some(p) = prev {
                    if self.time_at(p).is_some_and(|t| t > min_t) {
                        lo = p;
                        grown = true;
                    }
                }
            }
            if hi < last {
                let next = hi + 1;
                if self.time_at(next).is_some_and(|t| t < max_t) {
                    hi = next;
                    grown = true;
                }
            }
            if !grown {
                return Some((lo, hi));
            }
        }
    }

    /// Re-sort positions `lo..=hi` by aligned time, keeping each aligned
    /// slot's trailing unaligned run attached to it, then re-interpolate the
    /// window. Returns whether anything moved.
    pub fn resort_window(&mut self, lo: usize, hi: usize) -> bool {
        if self.order.is_empty() || lo > hi {
            return false;
        }
        let hi = hi.min(self.order.len() - 1);

        let mut leading: Vec<SlotId> = Vec::new();
        let mut groups: Vec<(Millis, Vec<SlotId>)> = Vec::new();
        for p in lo..=hi {
            let id = self.order[p];
            match self.time_at(p) {
                Some(t) => groups.push((t, vec![id])),
                None => match groups.last_mut() {
                    Some((_, members)) => members.push(id),
                    None => leading.push(id),
                },
            }
        }

        if groups.windows(2).all(|w| w[0].0 <= w[1].0) {
            return false;
        }
        groups.sort_by_key(|(t, _)| *t);

        let reordered: Vec<SlotId> = leading
            .into_iter()
            .chain(groups.into_iter().flat_map(|(_, members)| members))
            .collect();
        self.order.splice(lo..=hi, reordered);
        self.reindex(lo, hi + 1);

        let from = lo.saturating_sub(1);
        let to = (hi + 1).min(self.order.len() - 1);
        let mut p = from;
        while p <= to {
            p = self.refresh_run_at(p) + 1;
        }
        tracing::debug!(lo, hi, "time order window re-sorted");
        true
    }

    /// Re-sort the whole timeline.
    pub fn resort_all(&mut self) -> bool {
        if self.order.is_empty() {
            return false;
        }
        self.resort_window(0, self.order.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with(times: &[Option<Millis>]) -> (TimeOrder, Vec<SlotId>) {
        let mut order = TimeOrder::default();
        let ids = times.iter().map(|t| order.push(*t)).collect();
        (order, ids)
    }

    #[test]
    fn test_positions_are_contiguous() {
        let (mut order, ids) = order_with(&[Some(0), Some(100), Some(200)]);
        let mid = order.insert_aligned(50);
        assert_eq!(order.position(ids[0]), 0);
        assert_eq!(order.position(mid), 1);
        assert_eq!(order.position(ids[1]), 2);
        assert_eq!(order.position(ids[2]), 3);

        order.remove(mid);
        for (p, slot) in order.iter().enumerate() {
            assert_eq!(slot.position(), p);
        }
    }

    #[test]
    fn test_propose_time_interpolates_between_aligned() {
        let (order, ids) = order_with(&[Some(100), None, None, Some(500)]);
        let a = order.propose_time(ids[1]);
        let b = order.propose_time(ids[2]);
        assert!(100 < a && a < b && b < 500);
        assert_eq!(a, 233);
        assert_eq!(b, 366);
    }

    #[test]
    fn test_propose_time_is_memoized_and_refreshed() {
        let (mut order, ids) = order_with(&[Some(100), None, Some(500)]);
        assert_eq!(order.slot(ids[1]).proposed_time(), Some(300));

        order.set_time(ids[2], 900);
        assert_eq!(order.slot(ids[1]).proposed_time(), Some(500));
        assert_eq!(order.propose_time(ids[1]), 500);
    }

    #[test]
    fn test_propose_time_edges() {
        let (order, ids) = order_with(&[None, Some(300), None, None]);
        // No aligned slot on the left: interpolate from 0 at position -1.
        assert_eq!(order.propose_time(ids[0]), 150);
        // No aligned slot on the right: default spacing per step.
        assert_eq!(order.propose_time(ids[2]), 300 + DEFAULT_UNALIGNED_SPACING_MS);
        assert_eq!(order.propose_time(ids[3]), 300 + 2 * DEFAULT_UNALIGNED_SPACING_MS);
    }

    #[test]
    fn test_set_time_aligns_and_splits_run() {
        let (mut order, ids) = order_with(&[Some(0), None, None, None, Some(400)]);
        order.set_time(ids[2], 100);
        assert!(order.is_aligned(ids[2]));
        assert_eq!(order.propose_time(ids[1]), 50);
        assert_eq!(order.propose_time(ids[3]), 250);
    }

    #[test]
    fn test_clear_time_rejoins_run() {
        let (mut order, ids) = order_with(&[Some(0), Some(100), Some(400)]);
        order.clear_time(ids[1]);
        assert!(!order.is_aligned(ids[1]));
        assert_eq!(order.propose_time(ids[1]), 200);
    }

    #[test]
    fn test_insert_aligned_in_respects_window() {
        let (mut order, ids) = order_with(&[Some(100), Some(500)]);
        // Equal to the upper bound's time: still lands before it.
        let s = order.insert_aligned_in(500, Some(ids[0]), Some(ids[1]));
        assert_eq!(order.position(s), 1);
        assert_eq!(order.position(ids[1]), 2);
    }

    #[test]
    fn test_insert_unaligned_neighbors() {
        let (mut order, ids) = order_with(&[Some(0), Some(300)]);
        let after = order.insert_unaligned_after(ids[0]);
        let before = order.insert_unaligned_before(ids[1]);
        assert_eq!(order.position(after), 1);
        assert_eq!(order.position(before), 2);
        assert_eq!(order.propose_time(after), 100);
        assert_eq!(order.propose_time(before), 200);
    }

    #[test]
    fn test_shift_moves_aligned_only() {
        let (mut order, ids) = order_with(&[Some(100), None, Some(300)]);
        order.shift(&ids, 50);
        assert_eq!(order.time(ids[0]), Some(150));
        assert_eq!(order.time(ids[1]), None);
        assert_eq!(order.propose_time(ids[1]), 250);
        assert_eq!(order.time(ids[2]), Some(350));
    }

    #[test]
    fn test_resort_window_moves_groups() {
        let (mut order, ids) = order_with(&[Some(0), Some(800), None, Some(400), Some(1000)]);
        assert!(!order.is_fully_consistent());

        let (lo, hi) = order.repair_window([ids[1]]).unwrap();
        assert!(order.resort_window(lo, hi));
        assert!(order.is_fully_consistent());

        // The unaligned slot stays behind its anchor at 800.
        assert_eq!(order.position(ids[3]), 1);
        assert_eq!(order.position(ids[1]), 2);
        assert_eq!(order.position(ids[2]), 3);
        assert_eq!(order.propose_time(ids[2]), 900);
    }

    #[test]
    fn test_resort_is_idempotent() {
        let (mut order, _) = order_with(&[Some(0), Some(800), Some(400), None, Some(1000)]);
        assert!(order.resort_all());
        let snapshot: Vec<_> = order.iter().cloned().collect();
        assert!(!order.resort_all());
        let again: Vec<_> = order.iter().cloned().collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn test_repair_window_grows_to_cover_inversion() {
        let (mut order, ids) = order_with(&[Some(0), Some(100), Some(200), Some(300), Some(400)]);
        order.set_time(ids[0], 350);
        let (lo, hi) = order.repair_window([ids[0]]).unwrap();
        assert_eq!(lo, 0);
        assert_eq!(hi, 3);
        order.resort_window(lo, hi);
        assert!(order.is_fully_consistent());
        assert_eq!(order.position(ids[0]), 3);
    }

    #[test]
    #[should_panic(expected = "not owned by this time order")]
    fn test_foreign_slot_panics() {
        let (order, _) = order_with(&[Some(0)]);
        order.slot(SlotId::from_index(99));
    }

    #[test]
    #[should_panic(expected = "not owned by this time order")]
    fn test_removed_slot_panics() {
        let (mut order, ids) = order_with(&[Some(0), Some(10)]);
        order.remove(ids[0]);
        order.set_time(ids[0], 5);
    }
}
