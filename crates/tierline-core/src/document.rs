//! The annotation document: tiers, annotations, and the shared timeline.
//!
//! A [`Document`] owns everything. Annotations live in an append-only arena
//! indexed by [`AnnotationId`]; deletion marks a tombstone and detaches the
//! annotation from its tier, parents and listeners. Tiers are an arena too,
//! with a name index in declaration order.
//!
//! Two side indices are maintained on every edit:
//!
//! - `listeners`: parent → children that derive their extent from it.
//! - `slot_users`: slot → alignable annotations anchored on it. A slot with
//!   no users is removed from the time order at the end of the edit.
//!
//! Every edit runs through an [`EditScope`] that collects touched slots,
//! annotations and tiers, then [`Document::finish_edit`] repairs the time
//! order, sweeps degenerate annotations, prunes orphan slots, restores tier
//! order and publishes change events.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tierline_types::{
    AnnotationId, Constraint, DocumentId, ExternalRef, Millis, PropagationMode, SlotId, TierId,
};

use crate::annotation::{Alignable, Annotation, AnnotationKind, AnnotationSnapshot, Reference};
use crate::config::DocumentConfig;
use crate::constraint::{clamp_to_parent, derived_interval, union_of};
use crate::error::TierError;
use crate::events::{ChangeBus, ChangeEvent, ChangeOp, Subscription};
use crate::hierarchy::MAX_HIERARCHY_DEPTH;
use crate::tier::Tier;
use crate::time_order::TimeOrder;

/// A document shared between threads.
pub type SharedDocument = Arc<RwLock<Document>>;

/// Wrap a document for sharing.
pub fn shared(document: Document) -> SharedDocument {
    Arc::new(RwLock::new(document))
}

// ============================================================================
// Edit scope
// ============================================================================

/// What an edit touched. Drives the repair steps in `finish_edit`.
#[derive(Debug, Default)]
pub(crate) struct EditScope {
    /// Slots retimed, inserted next to, or released.
    pub slots: BTreeSet<SlotId>,
    /// Annotations to check for degeneration.
    pub annotations: BTreeSet<AnnotationId>,
    /// Tiers whose order may have changed.
    pub tiers: BTreeSet<TierId>,
    /// Annotations whose interval changed; their children get notified.
    pub pending: Vec<AnnotationId>,
    /// Annotations to report with a time-changed event.
    pub moved: BTreeSet<AnnotationId>,
    /// Annotations deleted by this edit, in cascade order.
    pub deleted: Vec<AnnotationId>,
}

impl EditScope {
    pub(crate) fn changed(&mut self, id: AnnotationId) {
        self.annotations.insert(id);
        self.pending.push(id);
        self.moved.insert(id);
    }
}

// ============================================================================
// Document
// ============================================================================

/// A multi-tier annotation document over one timeline.
#[derive(Debug)]
pub struct Document {
    pub(crate) id: DocumentId,
    pub(crate) config: DocumentConfig,
    pub(crate) time_order: TimeOrder,
    pub(crate) tiers: Vec<Option<Tier>>,
    pub(crate) tier_names: IndexMap<String, TierId>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) listeners: HashMap<AnnotationId, Vec<AnnotationId>>,
    pub(crate) slot_users: HashMap<SlotId, Vec<AnnotationId>>,
    pub(crate) external_ids: HashMap<String, AnnotationId>,
    pub(crate) next_external: u64,
    pub(crate) bus: ChangeBus,
}

impl Default for Document {
    fn default() -> Self {
        Self::new(DocumentConfig::default())
    }
}

impl Document {
    pub fn new(config: DocumentConfig) -> Self {
        Self {
            id: DocumentId::new(),
            time_order: TimeOrder::new(config.unaligned_spacing_ms),
            bus: ChangeBus::new(config.event_capacity),
            config,
            tiers: Vec::new(),
            tier_names: IndexMap::new(),
            annotations: Vec::new(),
            listeners: HashMap::new(),
            slot_users: HashMap::new(),
            external_ids: HashMap::new(),
            next_external: 0,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }

    pub fn time_order(&self) -> &TimeOrder {
        &self.time_order
    }

    pub fn propagation_mode(&self) -> PropagationMode {
        self.config.propagation_mode
    }

    pub fn set_propagation_mode(&mut self, mode: PropagationMode) {
        if self.config.propagation_mode == mode {
            return;
        }
        tracing::info!(document = %self.id.short(), ?mode, "propagation mode changed");
        self.config.propagation_mode = mode;
        self.bus.publish(ChangeEvent::document(self.id, ChangeOp::ModeChanged));
    }

    /// Subscribe to change events matching a subject pattern.
    pub fn subscribe(&self, pattern: &str) -> Subscription<ChangeEvent> {
        self.bus.subscribe(pattern)
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    // =========================================================================
    // Tiers
    // =========================================================================

    /// Declare a tier. Dependent tiers need both a constraint and a parent
    /// tier name; top-level tiers need neither.
    pub fn add_tier(
        &mut self,
        name: &str,
        constraint: Option<Constraint>,
        parent: Option<&str>,
    ) -> Result<TierId, TierError> {
        if self.tier_names.contains_key(name) {
            return Err(TierError::DuplicateTier(name.to_string()));
        }
        let parent = match parent {
            Some(p) => Some(
                self.tier_by_name(p)
                    .ok_or_else(|| TierError::UnknownParent(p.to_string()))?,
            ),
            None => None,
        };
        if constraint.is_some() != parent.is_some() {
            return Err(TierError::ConstraintMismatch { tier: name.to_string() });
        }
        if let (Some(c), Some(p)) = (constraint, parent) {
            let parent_tier = self.tier(p);
            if c.is_alignable() && !parent_tier.is_alignable() {
                return Err(TierError::IncompatibleParent {
                    tier: name.to_string(),
                    constraint: c.to_string(),
                    parent: parent_tier.name().to_string(),
                });
            }
        }

        let id = TierId::from_index(self.tiers.len());
        self.tiers.push(Some(Tier::new(id, name.to_string(), constraint, parent)));
        self.tier_names.insert(name.to_string(), id);
        tracing::debug!(tier = %id, name, ?constraint, "tier added");
        self.bus.publish(ChangeEvent::tier(self.id, ChangeOp::TierAdded, id));
        Ok(id)
    }

    /// Attach speaker and type metadata to a tier.
    pub fn set_tier_metadata(&mut self, tier: TierId, participant: Option<String>, linguistic_type: Option<String>) {
        let t = self.tier_mut(tier);
        t.participant = participant;
        t.linguistic_type = linguistic_type;
    }

    /// Remove a tier with all dependent tiers and every annotation on them.
    pub fn remove_tier(&mut self, tier: TierId) {
        let span = tracing::debug_span!("remove_tier", %tier);
        let _enter = span.enter();

        let mut doomed = vec![tier];
        doomed.extend(self.dependent_tiers(tier));

        let mut scope = EditScope::default();
        for &t in doomed.iter().rev() {
            for id in self.tier(t).annotations().to_vec() {
                self.mark_deleted(id, &mut scope);
            }
        }
        self.finish_edit(&mut scope);

        for &t in doomed.iter().rev() {
            if let Some(removed) = self.tiers[t.index()].take() {
                self.tier_names.shift_remove(removed.name());
                tracing::debug!(tier = %t, name = removed.name(), "tier removed");
                self.bus.publish(ChangeEvent::tier(self.id, ChangeOp::TierRemoved, t));
            }
        }
    }

    /// Look up a tier.
    ///
    /// # Panics
    ///
    /// If the id does not name a live tier of this document.
    pub fn tier(&self, id: TierId) -> &Tier {
        self.get_tier(id)
            .unwrap_or_else(|| panic!("tier {id} does not exist in this document"))
    }

    pub fn get_tier(&self, id: TierId) -> Option<&Tier> {
        self.tiers.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn tier_mut(&mut self, id: TierId) -> &mut Tier {
        self.tiers
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("tier {id} does not exist in this document"))
    }

    pub fn tier_by_name(&self, name: &str) -> Option<TierId> {
        self.tier_names.get(name).copied()
    }

    /// Live tiers in declaration order.
    pub fn tiers(&self) -> impl Iterator<Item = &Tier> + '_ {
        self.tier_names.values().map(|id| self.tier(*id))
    }

    /// Tiers whose parent tier is `tier`.
    pub fn child_tiers(&self, tier: TierId) -> Vec<TierId> {
        self.tiers()
            .filter(|t| t.parent() == Some(tier))
            .map(Tier::id)
            .collect()
    }

    /// Constraint of the tier an annotation lives on.
    pub fn constraint_of(&self, id: AnnotationId) -> Option<Constraint> {
        self.tier(self.annotation(id).tier).constraint()
    }

    // =========================================================================
    // Annotations
    // =========================================================================

    /// Look up an annotation, live or deleted.
    ///
    /// # Panics
    ///
    /// If the id was not issued by this document.
    pub fn annotation(&self, id: AnnotationId) -> &Annotation {
        self.annotations
            .get(id.index())
            .unwrap_or_else(|| panic!("annotation {id} does not exist in this document"))
    }

    pub fn get_annotation(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.get(id.index())
    }

    pub(crate) fn annotation_mut(&mut self, id: AnnotationId) -> &mut Annotation {
        self.annotations
            .get_mut(id.index())
            .unwrap_or_else(|| panic!("annotation {id} does not exist in this document"))
    }

    /// A live annotation. Editing a deleted annotation is a caller bug.
    pub(crate) fn live(&self, id: AnnotationId) -> &Annotation {
        let ann = self.annotation(id);
        assert!(!ann.deleted, "annotation {id} was deleted");
        ann
    }

    pub fn is_deleted(&self, id: AnnotationId) -> bool {
        self.annotation(id).deleted
    }

    pub fn by_external_id(&self, external_id: &str) -> Option<AnnotationId> {
        self.external_ids.get(external_id).copied()
    }

    /// Live annotations across all tiers, in tier declaration order.
    pub fn live_annotations(&self) -> impl Iterator<Item = AnnotationId> + '_ {
        self.tiers().flat_map(|t| t.annotations().iter().copied())
    }

    pub fn annotation_count(&self) -> usize {
        self.live_annotations().count()
    }

    /// Direct dependents of an annotation.
    pub fn children_of(&self, id: AnnotationId) -> &[AnnotationId] {
        self.listeners.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of `id` on one tier.
    pub fn children_on_tier(&self, id: AnnotationId, tier: TierId) -> Vec<AnnotationId> {
        self.children_of(id)
            .iter()
            .copied()
            .filter(|c| self.annotation(*c).tier == tier && !self.annotation(*c).deleted)
            .collect()
    }

    /// Alignable annotations anchored on a slot.
    pub fn slot_users(&self, slot: SlotId) -> &[AnnotationId] {
        self.slot_users.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Live annotations on `tier` whose extent contains `time`.
    pub fn annotations_at(&self, tier: TierId, time: Millis) -> Vec<AnnotationId> {
        self.tier(tier)
            .annotations()
            .iter()
            .copied()
            .filter(|id| {
                let (b, e) = self.interval(*id);
                b <= time && time < e
            })
            .collect()
    }

    pub fn set_value(&mut self, id: AnnotationId, value: impl Into<String>) {
        let tier = self.live(id).tier;
        self.annotation_mut(id).value = value.into();
        self.publish(ChangeOp::ValueChanged, id, tier);
    }

    pub fn set_cv_entry(&mut self, id: AnnotationId, cv_entry_id: Option<String>) {
        let tier = self.live(id).tier;
        self.annotation_mut(id).cv_entry_id = cv_entry_id;
        self.publish(ChangeOp::ValueChanged, id, tier);
    }

    pub fn add_external_ref(&mut self, id: AnnotationId, reference: ExternalRef) {
        let tier = self.live(id).tier;
        self.annotation_mut(id).external_refs.push(reference);
        self.publish(ChangeOp::ValueChanged, id, tier);
    }

    pub(crate) fn publish(&self, op: ChangeOp, id: AnnotationId, tier: TierId) {
        self.bus.publish(ChangeEvent::annotation(self.id, op, id, tier));
    }

    // =========================================================================
    // Times
    // =========================================================================

    /// Effective begin time.
    pub fn begin_time(&self, id: AnnotationId) -> Millis {
        self.interval(id).0
    }

    /// Effective end time.
    pub fn end_time(&self, id: AnnotationId) -> Millis {
        self.interval(id).1
    }

    /// Effective `(begin, end)`: stored or interpolated slot times for
    /// alignable annotations, derived from parents for references.
    pub fn interval(&self, id: AnnotationId) -> (Millis, Millis) {
        self.interval_at_depth(id, 0)
    }

    fn interval_at_depth(&self, id: AnnotationId, depth: usize) -> (Millis, Millis) {
        let ann = self.annotation(id);
        match &ann.kind {
            AnnotationKind::Alignable(a) => (self.slot_time(a.begin), self.slot_time(a.end)),
            AnnotationKind::Reference(r) => {
                if depth >= MAX_HIERARCHY_DEPTH {
                    tracing::warn!(annotation = %id, "interval() hit MAX_HIERARCHY_DEPTH ({MAX_HIERARCHY_DEPTH})");
                    return (0, 0);
                }
                let constraint = self.get_tier(ann.tier).and_then(Tier::constraint);
                match (constraint, r.parents.first()) {
                    (Some(c), Some(&parent)) if !c.is_alignable() => {
                        let bounds = self.interval_at_depth(parent, depth + 1);
                        let (index, count) = if c.is_chained() {
                            self.chain_position(id)
                        } else {
                            (0, 1)
                        };
                        derived_interval(c, bounds, index, count)
                    }
                    _ => union_of(r.parents.iter().map(|p| self.interval_at_depth(*p, depth + 1)))
                        .unwrap_or((0, 0)),
                }
            }
        }
    }

    /// Proposed time of a slot; 0 for a slot no longer in the time order.
    pub(crate) fn slot_time(&self, slot: SlotId) -> Millis {
        if self.time_order.contains(slot) {
            self.time_order.propose_time(slot)
        } else {
            0
        }
    }

    /// Both boundaries carry stored times. Always false for references.
    pub fn is_time_aligned(&self, id: AnnotationId) -> bool {
        match &self.annotation(id).kind {
            AnnotationKind::Alignable(a) => {
                self.time_order.is_aligned(a.begin) && self.time_order.is_aligned(a.end)
            }
            AnnotationKind::Reference(_) => false,
        }
    }

    /// An alignable annotation that can no longer exist: both boundaries on
    /// one slot, or a non-positive duration. With an unaligned boundary the
    /// duration is judged by slot position, since interpolation in a tight
    /// gap can give distinct slots the same proposed time.
    pub(crate) fn is_degenerate(&self, id: AnnotationId) -> bool {
        match &self.annotation(id).kind {
            AnnotationKind::Alignable(a) => {
                let order = &self.time_order;
                if a.begin == a.end {
                    true
                } else if order.contains(a.begin)
                    && order.contains(a.end)
                    && !(order.is_aligned(a.begin) && order.is_aligned(a.end))
                {
                    order.position(a.begin) >= order.position(a.end)
                } else {
                    self.slot_time(a.begin) >= self.slot_time(a.end)
                }
            }
            AnnotationKind::Reference(_) => false,
        }
    }

    /// Serializable view with effective times.
    pub fn snapshot(&self, id: AnnotationId) -> AnnotationSnapshot {
        let ann = self.annotation(id);
        let (begin, end) = self.interval(id);
        AnnotationSnapshot {
            id,
            external_id: ann.external_id.clone(),
            tier: self
                .get_tier(ann.tier)
                .map(|t| t.name().to_string())
                .unwrap_or_default(),
            value: ann.value.clone(),
            begin,
            end,
            time_aligned: self.is_time_aligned(id),
            parent: ann
                .primary_parent()
                .map(|p| self.annotation(p).external_id.clone()),
        }
    }

    /// Snapshots of a tier's annotations in document order.
    pub fn tier_snapshots(&self, tier: TierId) -> Vec<AnnotationSnapshot> {
        self.tier(tier)
            .annotations()
            .iter()
            .map(|id| self.snapshot(*id))
            .collect()
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create an annotation on `tier` covering `begin..end`, wired according
    /// to the tier's constraint. Returns `None` when the tier's rules leave
    /// no room for it (no parent at `begin`, nothing to subdivide, an
    /// association slot already taken, or an empty interval).
    pub fn create_annotation(
        &mut self,
        tier: TierId,
        begin: Millis,
        end: Millis,
        value: impl Into<String>,
    ) -> Option<AnnotationId> {
        let span = tracing::debug_span!("create_annotation", %tier, begin, end);
        let _enter = span.enter();
        let value = value.into();

        let created = match self.tier(tier).constraint() {
            None => self.create_top_level(tier, begin, end, value),
            Some(Constraint::IncludedIn) => self.create_included(tier, begin, end, value),
            Some(Constraint::TimeSubdivision) => self.create_subdivision(tier, begin, end, value),
            Some(c) => self.create_reference(tier, c, begin, end, value),
        };
        match created {
            Some(id) => tracing::debug!(annotation = %id, "annotation created"),
            None => tracing::debug!("no annotation created"),
        }
        created
    }

    fn create_top_level(&mut self, tier: TierId, begin: Millis, end: Millis, value: String) -> Option<AnnotationId> {
        let begin = begin.max(0);
        if begin >= end {
            return None;
        }
        let b = self.time_order.insert_aligned(begin);
        let e = self.time_order.insert_aligned_in(end, Some(b), None);
        let id = self.allocate(tier, value, AnnotationKind::Alignable(Alignable { begin: b, end: e, parent: None }));

        let mut scope = EditScope::default();
        scope.slots.extend([b, e]);
        self.trim_overlapping_siblings(id, begin, end, &mut scope);
        self.complete_creation(id, scope);
        Some(id)
    }

    fn create_included(&mut self, tier: TierId, begin: Millis, end: Millis, value: String) -> Option<AnnotationId> {
        let parent = self.parent_annotation_at(tier, begin, end)?;
        let (b_ms, e_ms) = clamp_to_parent(begin, end, self.interval(parent))?;
        let pa = self.annotation(parent).as_alignable()?.clone();

        let b = self.time_order.insert_aligned_in(b_ms, Some(pa.begin), Some(pa.end));
        let e = self.time_order.insert_aligned_in(e_ms, Some(b), Some(pa.end));
        let id = self.allocate(
            tier,
            value,
            AnnotationKind::Alignable(Alignable { begin: b, end: e, parent: Some(parent) }),
        );

        let mut scope = EditScope::default();
        scope.slots.extend([b, e]);
        self.trim_overlapping_siblings(id, b_ms, e_ms, &mut scope);
        self.complete_creation(id, scope);
        Some(id)
    }

    fn create_subdivision(&mut self, tier: TierId, begin: Millis, end: Millis, value: String) -> Option<AnnotationId> {
        let parent = self.parent_annotation_at(tier, begin, end)?;
        let (b_ms, e_ms) = clamp_to_parent(begin, end, self.interval(parent))?;
        let pa = self.annotation(parent).as_alignable()?.clone();
        let siblings = self.subdivision_children(parent, tier);
        let mut scope = EditScope::default();

        if siblings.is_empty() {
            let id = self.allocate(
                tier,
                value,
                AnnotationKind::Alignable(Alignable { begin: pa.begin, end: pa.end, parent: Some(parent) }),
            );
            self.complete_creation(id, scope);
            return Some(id);
        }

        let split = siblings.into_iter().find(|s| {
            let (xb, xe) = self.interval(*s);
            xb <= b_ms && b_ms < xe
        })?;
        let xa = self.annotation(split).as_alignable()?.clone();
        let (xb, xe) = self.interval(split);

        let id = if b_ms > xb {
            let s = self.time_order.insert_aligned_in(b_ms, Some(xa.begin), Some(xa.end));
            let id = self.allocate(
                tier,
                value,
                AnnotationKind::Alignable(Alignable { begin: s, end: xa.end, parent: Some(parent) }),
            );
            self.retarget_slot_in_subtree(split, xa.end, s, &mut scope);
            scope.slots.insert(s);
            id
        } else if e_ms < xe {
            let s = self.time_order.insert_aligned_in(e_ms, Some(xa.begin), Some(xa.end));
            let id = self.allocate(
                tier,
                value,
                AnnotationKind::Alignable(Alignable { begin: xa.begin, end: s, parent: Some(parent) }),
            );
            self.retarget_slot_in_subtree(split, xa.begin, s, &mut scope);
            scope.slots.insert(s);
            id
        } else {
            return None;
        };

        scope.changed(split);
        scope.tiers.insert(tier);
        self.complete_creation(id, scope);
        Some(id)
    }

    fn create_reference(
        &mut self,
        tier: TierId,
        constraint: Constraint,
        begin: Millis,
        end: Millis,
        value: String,
    ) -> Option<AnnotationId> {
        let parent = self.parent_annotation_at(tier, begin, end)?;
        let siblings = self.chain_children(parent, tier);

        let after = match constraint {
            Constraint::SymbolicAssociation if !siblings.is_empty() => return None,
            Constraint::SymbolicSubdivision => siblings
                .iter()
                .copied()
                .find(|s| {
                    let (sb, se) = self.interval(*s);
                    sb <= begin && begin < se
                })
                .or_else(|| siblings.last().copied()),
            _ => None,
        };

        let id = self.allocate(
            tier,
            value,
            AnnotationKind::Reference(Reference { parents: vec![parent], next: None, previous: None }),
        );
        if let Some(anchor) = after {
            self.link_after(anchor, id);
        }
        let mut scope = EditScope::default();
        scope.tiers.insert(tier);
        self.complete_creation(id, scope);
        Some(id)
    }

    /// Add a reference after `anchor` in its symbolic-subdivision chain.
    ///
    /// # Panics
    ///
    /// If `anchor` is deleted or not on a symbolic-subdivision tier.
    pub fn create_reference_after(&mut self, anchor: AnnotationId, value: impl Into<String>) -> AnnotationId {
        self.create_chained(anchor, value.into(), false)
    }

    /// Add a reference before `anchor` in its symbolic-subdivision chain.
    pub fn create_reference_before(&mut self, anchor: AnnotationId, value: impl Into<String>) -> AnnotationId {
        self.create_chained(anchor, value.into(), true)
    }

    fn create_chained(&mut self, anchor: AnnotationId, value: String, before: bool) -> AnnotationId {
        let ann = self.live(anchor);
        let tier = ann.tier;
        assert_eq!(
            self.tier(tier).constraint(),
            Some(Constraint::SymbolicSubdivision),
            "annotation {anchor} is not on a symbolic-subdivision tier"
        );
        let parents = ann
            .as_reference()
            .unwrap_or_else(|| panic!("annotation {anchor} is not a reference"))
            .parents
            .clone();
        let id = self.allocate(tier, value, AnnotationKind::Reference(Reference { parents, next: None, previous: None }));
        if before {
            self.link_before(anchor, id);
        } else {
            self.link_after(anchor, id);
        }
        let mut scope = EditScope::default();
        scope.tiers.insert(tier);
        self.complete_creation(id, scope);
        id
    }

    fn complete_creation(&mut self, id: AnnotationId, mut scope: EditScope) {
        let tier = self.annotation(id).tier;
        scope.tiers.insert(tier);
        scope.annotations.insert(id);
        scope.moved.remove(&id);
        self.notify_interval_changed(&mut scope);
        self.finish_edit(&mut scope);
        if !self.annotation(id).deleted {
            self.publish(ChangeOp::AnnotationCreated, id, tier);
        }
    }

    /// Annotation on the parent tier of `tier` that a new annotation at
    /// `begin..end` belongs to: the one containing `begin`, else the one
    /// containing the midpoint.
    pub(crate) fn parent_annotation_at(&self, tier: TierId, begin: Millis, end: Millis) -> Option<AnnotationId> {
        let parent_tier = self.tier(tier).parent()?;
        let candidates = self.tier(parent_tier).annotations();
        let containing = |t: Millis| {
            candidates.iter().copied().find(|p| {
                let (pb, pe) = self.interval(*p);
                pb <= t && t < pe
            })
        };
        containing(begin).or_else(|| containing(begin + (end - begin) / 2))
    }

    /// Time-subdivision children of `parent` on `tier`, in slot order.
    pub(crate) fn subdivision_children(&self, parent: AnnotationId, tier: TierId) -> Vec<AnnotationId> {
        let mut children = self.children_on_tier(parent, tier);
        children.sort_by_key(|c| {
            let a = self.annotation(*c).as_alignable().map(|a| a.begin);
            a.map(|s| self.time_order.position(s))
        });
        children
    }

    /// Push a new annotation into the arena and wire it into the indices.
    pub(crate) fn allocate(&mut self, tier: TierId, value: String, kind: AnnotationKind) -> AnnotationId {
        let external_id = self.fresh_external_id();
        let id = self.allocate_raw(external_id, tier, value, kind);
        self.attach(id);
        id
    }

    /// Push without wiring. Used by the loader before links are resolved.
    pub(crate) fn allocate_raw(&mut self, external_id: String, tier: TierId, value: String, kind: AnnotationKind) -> AnnotationId {
        let id = AnnotationId::from_index(self.annotations.len());
        self.external_ids.insert(external_id.clone(), id);
        self.annotations.push(Annotation::new(id, external_id, tier, value, kind));
        id
    }

    /// Register slot users and listener links, then insert into the tier in
    /// comparator order.
    pub(crate) fn attach(&mut self, id: AnnotationId) {
        self.register_links(id);
        let tier = self.annotation(id).tier;
        self.insert_sorted(tier, id);
    }

    pub(crate) fn register_links(&mut self, id: AnnotationId) {
        match self.annotation(id).kind.clone() {
            AnnotationKind::Alignable(a) => {
                self.add_slot_user(a.begin, id);
                self.add_slot_user(a.end, id);
                if let Some(p) = a.parent {
                    self.add_listener(p, id);
                }
            }
            AnnotationKind::Reference(r) => {
                for p in r.parents {
                    self.add_listener(p, id);
                }
            }
        }
    }

    fn fresh_external_id(&mut self) -> String {
        loop {
            self.next_external += 1;
            let candidate = format!("a{}", self.next_external);
            if !self.external_ids.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    // =========================================================================
    // Index maintenance
    // =========================================================================

    pub(crate) fn add_listener(&mut self, parent: AnnotationId, child: AnnotationId) {
        let list = self.listeners.entry(parent).or_default();
        if !list.contains(&child) {
            list.push(child);
        }
    }

    pub(crate) fn remove_listener(&mut self, parent: AnnotationId, child: AnnotationId) {
        if let Some(list) = self.listeners.get_mut(&parent) {
            list.retain(|c| *c != child);
            if list.is_empty() {
                self.listeners.remove(&parent);
            }
        }
    }

    fn add_slot_user(&mut self, slot: SlotId, id: AnnotationId) {
        let users = self.slot_users.entry(slot).or_default();
        if !users.contains(&id) {
            users.push(id);
        }
    }

    fn remove_slot_user(&mut self, slot: SlotId, id: AnnotationId) {
        if let Some(users) = self.slot_users.get_mut(&slot) {
            users.retain(|u| *u != id);
        }
    }

    /// Re-anchor one boundary of an alignable annotation.
    pub(crate) fn set_boundary(&mut self, id: AnnotationId, end: bool, slot: SlotId, scope: &mut EditScope) {
        let a = self.annotation_mut(id).alignable_mut();
        let old = if end {
            std::mem::replace(&mut a.end, slot)
        } else {
            std::mem::replace(&mut a.begin, slot)
        };
        if old == slot {
            return;
        }
        let a = self.annotation(id).as_alignable().cloned();
        if a.is_some_and(|a| a.begin != old && a.end != old) {
            self.remove_slot_user(old, id);
        }
        self.add_slot_user(slot, id);
        scope.slots.extend([old, slot]);
        scope.changed(id);
        scope.tiers.insert(self.annotation(id).tier);
    }

    /// Move every boundary on `old` held by `root` or its descendants onto
    /// `new`.
    pub(crate) fn retarget_slot_in_subtree(&mut self, root: AnnotationId, old: SlotId, new: SlotId, scope: &mut EditScope) {
        let users: Vec<AnnotationId> = self
            .slot_users(old)
            .iter()
            .copied()
            .filter(|u| !self.annotation(*u).deleted && self.is_within(*u, root))
            .collect();
        for user in users {
            let Some(a) = self.annotation(user).as_alignable().cloned() else {
                continue;
            };
            if a.begin == old {
                self.set_boundary(user, false, new, scope);
            }
            if a.end == old {
                self.set_boundary(user, true, new, scope);
            }
        }
    }

    /// Set a slot's time and record it as touched.
    pub(crate) fn retime(&mut self, slot: SlotId, ms: Millis, scope: &mut EditScope) {
        if self.time_order.time(slot) != Some(ms) {
            self.time_order.set_time(slot, ms);
        }
        scope.slots.insert(slot);
    }

    /// Insert into the tier collection at the comparator position.
    pub(crate) fn insert_sorted(&mut self, tier: TierId, id: AnnotationId) {
        let mut list = std::mem::take(&mut self.tier_mut(tier).annotations);
        let index = list.partition_point(|other| self.compare(*other, id).is_lt());
        list.insert(index, id);
        self.tier_mut(tier).annotations = list;
    }

    /// Remove slots no annotation anchors on any more.
    fn prune_slots(&mut self, scope: &EditScope) {
        for &slot in &scope.slots {
            if !self.time_order.contains(slot) {
                continue;
            }
            if self.slot_users.get(&slot).is_none_or(Vec::is_empty) {
                self.slot_users.remove(&slot);
                self.time_order.remove(slot);
                tracing::trace!(%slot, "orphan slot removed");
            }
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete an annotation and everything depending on it.
    ///
    /// Alignable dependents are always deleted. Reference dependents lose
    /// this parent and are deleted only when none remain. Deleting a
    /// time-subdivision child hands its span to the preceding sibling (or
    /// the following one when it was first).
    pub fn delete_annotation(&mut self, id: AnnotationId) {
        self.live(id);
        let span = tracing::debug_span!("delete_annotation", annotation = %id);
        let _enter = span.enter();

        let mut scope = EditScope::default();
        self.mark_deleted(id, &mut scope);
        self.notify_interval_changed(&mut scope);
        self.finish_edit(&mut scope);
    }

    /// Tombstone `root` and cascade to dependents. Events are published by
    /// `finish_edit`.
    pub(crate) fn mark_deleted(&mut self, root: AnnotationId, scope: &mut EditScope) {
        let mut queue = VecDeque::from([root]);

        while let Some(id) = queue.pop_front() {
            if self.annotation(id).deleted {
                continue;
            }
            self.annotation_mut(id).deleted = true;
            let tier = self.annotation(id).tier;
            if self.get_tier(tier).is_some() {
                self.tier_mut(tier).detach(id);
                scope.tiers.insert(tier);
            }

            match self.annotation(id).kind.clone() {
                AnnotationKind::Alignable(a) => {
                    self.close_subdivision_gap(id, &a, scope);
                    if let Some(p) = a.parent {
                        self.remove_listener(p, id);
                    }
                    self.remove_slot_user(a.begin, id);
                    self.remove_slot_user(a.end, id);
                    scope.slots.extend([a.begin, a.end]);
                }
                AnnotationKind::Reference(r) => {
                    for p in &r.parents {
                        self.remove_listener(*p, id);
                    }
                    self.unlink(id);
                    for p in r.parents {
                        scope.annotations.insert(p);
                    }
                }
            }

            for child in self.listeners.remove(&id).unwrap_or_default() {
                let child_ann = self.annotation_mut(child);
                match &mut child_ann.kind {
                    AnnotationKind::Alignable(a) => {
                        a.parent = None;
                        queue.push_back(child);
                    }
                    AnnotationKind::Reference(r) => {
                        r.parents.retain(|p| *p != id);
                        if r.parents.is_empty() {
                            queue.push_back(child);
                        } else {
                            scope.changed(child);
                        }
                    }
                }
            }

            scope.annotations.remove(&id);
            scope.moved.remove(&id);
            scope.deleted.push(id);
            tracing::debug!(annotation = %id, "annotation deleted");
        }
    }

    /// When a time-subdivision child goes away while its parent stays, the
    /// neighbouring sibling absorbs its span.
    fn close_subdivision_gap(&mut self, id: AnnotationId, a: &Alignable, scope: &mut EditScope) {
        let tier = self.annotation(id).tier;
        if self.get_tier(tier).and_then(Tier::constraint) != Some(Constraint::TimeSubdivision) {
            return;
        }
        let Some(parent) = a.parent else {
            return;
        };
        if self.annotation(parent).deleted {
            return;
        }

        let siblings = self.children_on_tier(parent, tier);
        let boundary = |which: fn(&Alignable) -> SlotId, slot: SlotId| {
            siblings.iter().copied().find(|s| {
                *s != id && self.annotation(*s).as_alignable().is_some_and(|sa| which(sa) == slot)
            })
        };
        let previous = boundary(Alignable::end, a.begin);
        let next = boundary(Alignable::begin, a.end);

        match (previous, next) {
            (Some(previous), _) => self.retarget_slot_in_subtree(previous, a.begin, a.end, scope),
            (None, Some(next)) => self.retarget_slot_in_subtree(next, a.end, a.begin, scope),
            (None, None) => {}
        }
    }

    // =========================================================================
    // Finishing an edit
    // =========================================================================

    /// Restore every structural invariant after an edit, then publish.
    pub(crate) fn finish_edit(&mut self, scope: &mut EditScope) {
        let mut resorted = self.repair_time_order(scope);

        for slot in &scope.slots {
            if let Some(users) = self.slot_users.get(slot) {
                scope.annotations.extend(users.iter().copied());
            }
        }

        // Merging a deleted subdivision child into its sibling can expose
        // further degenerate annotations; loop until clean.
        loop {
            let degenerate: Vec<AnnotationId> = scope
                .annotations
                .iter()
                .copied()
                .filter(|id| !self.annotation(*id).deleted && self.is_degenerate(*id))
                .collect();
            if degenerate.is_empty() {
                break;
            }
            for id in degenerate {
                tracing::debug!(annotation = %id, "degenerate annotation removed");
                self.mark_deleted(id, scope);
            }
        }

        self.prune_slots(scope);
        resorted |= self.repair_time_order(scope);

        let mut tiers = scope.tiers.clone();
        if resorted {
            // Unaligned slots travel with the aligned slot they trail, so
            // untouched tiers can change order too.
            tiers.extend(self.tier_names.values().copied());
        } else {
            for t in &scope.tiers {
                if self.get_tier(*t).is_some() {
                    tiers.extend(self.dependent_tiers(*t));
                }
            }
        }
        for t in tiers {
            if self.get_tier(t).is_some() {
                self.ensure_tier_order(t);
            }
        }

        for id in std::mem::take(&mut scope.deleted) {
            let tier = self.annotation(id).tier;
            self.publish(ChangeOp::AnnotationDeleted, id, tier);
        }
        for id in std::mem::take(&mut scope.moved) {
            if !self.annotation(id).deleted {
                let tier = self.annotation(id).tier;
                self.publish(ChangeOp::TimeChanged, id, tier);
            }
        }
    }

    fn repair_time_order(&mut self, scope: &EditScope) -> bool {
        let Some((lo, hi)) = self.time_order.repair_window(scope.slots.iter().copied()) else {
            return false;
        };
        if self.time_order.is_consistent(lo, hi) {
            return false;
        }
        tracing::debug!(lo, hi, "time order inconsistent after edit, re-sorting window");
        self.time_order.resort_window(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn times(doc: &Document, tier: TierId) -> Vec<(Millis, Millis)> {
        doc.tier(tier).annotations().iter().map(|a| doc.interval(*a)).collect()
    }

    #[test]
    fn test_add_tier_validation() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        assert_eq!(doc.tier_by_name("utterance"), Some(utt));

        assert_eq!(
            doc.add_tier("utterance", None, None),
            Err(TierError::DuplicateTier("utterance".into()))
        );
        assert_eq!(
            doc.add_tier("words", Some(Constraint::TimeSubdivision), Some("nope")),
            Err(TierError::UnknownParent("nope".into()))
        );
        assert!(matches!(
            doc.add_tier("words", None, Some("utterance")),
            Err(TierError::ConstraintMismatch { .. })
        ));
        doc.add_tier("gloss", Some(Constraint::SymbolicAssociation), Some("utterance"))
            .unwrap();
        assert!(matches!(
            doc.add_tier("sub", Some(Constraint::IncludedIn), Some("gloss")),
            Err(TierError::IncompatibleParent { .. })
        ));
    }

    #[test]
    fn test_top_level_creation_trims_overlaps() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        let a = doc.create_annotation(t, 0, 1000, "a").unwrap();
        let b = doc.create_annotation(t, 800, 1500, "b").unwrap();
        assert_eq!(doc.interval(a), (0, 800));
        assert_eq!(doc.interval(b), (800, 1500));

        // Fully covered annotations are removed.
        let c = doc.create_annotation(t, 700, 2000, "c").unwrap();
        assert!(doc.is_deleted(b));
        assert_eq!(times(&doc, t), vec![(0, 700), (700, 2000)]);
        assert_eq!(doc.tier(t).annotations(), &[a, c]);
    }

    #[test]
    fn test_empty_interval_is_refused() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        assert!(doc.create_annotation(t, 500, 500, "x").is_none());
        assert!(doc.create_annotation(t, -200, -100, "x").is_none());
        assert!(doc.time_order().is_empty());
    }

    #[test]
    fn test_subdivision_splits_existing_child() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        let u = doc.create_annotation(utt, 0, 1000, "").unwrap();

        let w1 = doc.create_annotation(words, 0, 1000, "one").unwrap();
        let ua = doc.annotation(u).as_alignable().unwrap().clone();
        let wa = doc.annotation(w1).as_alignable().unwrap().clone();
        assert_eq!((wa.begin, wa.end), (ua.begin, ua.end));

        let w2 = doc.create_annotation(words, 400, 1000, "two").unwrap();
        let w3 = doc.create_annotation(words, 0, 200, "zero").unwrap();
        assert_eq!(doc.tier(words).annotations(), &[w3, w1, w2]);
        assert_eq!(times(&doc, words), vec![(0, 200), (200, 400), (400, 1000)]);
        assert_eq!(doc.children_of(u), &[w1, w2, w3]);
    }

    #[test]
    fn test_subdivision_needs_room() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        doc.create_annotation(utt, 0, 1000, "").unwrap();
        doc.create_annotation(words, 0, 1000, "all").unwrap();
        assert!(doc.create_annotation(words, 0, 1000, "again").is_none());
        assert!(doc.create_annotation(words, 2000, 3000, "outside").is_none());
    }

    #[test]
    fn test_included_in_is_clamped() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let notes = doc
            .add_tier("notes", Some(Constraint::IncludedIn), Some("utterance"))
            .unwrap();
        let u = doc.create_annotation(utt, 100, 900, "").unwrap();
        let n = doc.create_annotation(notes, 500, 1200, "note").unwrap();
        assert_eq!(doc.interval(n), (500, 900));
        assert_eq!(doc.annotation(n).primary_parent(), Some(u));
        assert!(doc.create_annotation(notes, 1000, 1200, "outside").is_none());
    }

    #[test]
    fn test_association_is_one_per_parent() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let tr = doc
            .add_tier("translation", Some(Constraint::SymbolicAssociation), Some("utterance"))
            .unwrap();
        doc.create_annotation(utt, 0, 1000, "").unwrap();
        let t1 = doc.create_annotation(tr, 10, 10, "hi").unwrap();
        assert_eq!(doc.interval(t1), (0, 1000));
        assert!(doc.create_annotation(tr, 10, 10, "again").is_none());
    }

    #[test]
    fn test_delete_cascades_to_alignable_children() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        let gloss = doc
            .add_tier("gloss", Some(Constraint::SymbolicAssociation), Some("words"))
            .unwrap();
        let u = doc.create_annotation(utt, 0, 1000, "").unwrap();
        let w = doc.create_annotation(words, 0, 1000, "").unwrap();
        let g = doc.create_annotation(gloss, 0, 0, "").unwrap();

        let mut sub = doc.subscribe("annotation.deleted");
        doc.delete_annotation(u);
        assert!(doc.is_deleted(u) && doc.is_deleted(w) && doc.is_deleted(g));
        assert!(doc.time_order().is_empty());
        assert_eq!(doc.annotation_count(), 0);
        let deleted: Vec<_> = sub.drain().into_iter().filter_map(|m| m.payload.annotation).collect();
        assert_eq!(deleted, vec![u, w, g]);
    }

    #[test]
    fn test_delete_subdivision_child_merges_into_previous() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        doc.create_annotation(utt, 0, 1000, "").unwrap();
        let w1 = doc.create_annotation(words, 0, 1000, "").unwrap();
        let w2 = doc.create_annotation(words, 300, 1000, "").unwrap();
        let w3 = doc.create_annotation(words, 600, 1000, "").unwrap();

        doc.delete_annotation(w2);
        assert_eq!(times(&doc, words), vec![(0, 600), (600, 1000)]);
        doc.delete_annotation(w1);
        assert_eq!(doc.interval(w3), (0, 1000));
        assert_eq!(doc.time_order().len(), 2);
    }

    #[test]
    fn test_remove_tier_cascades() {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        let u = doc.create_annotation(utt, 0, 1000, "").unwrap();
        let w = doc.create_annotation(words, 0, 1000, "").unwrap();

        doc.remove_tier(words);
        assert!(doc.is_deleted(w));
        assert!(!doc.is_deleted(u));
        assert!(doc.get_tier(words).is_none());
        assert!(doc.tier_by_name("words").is_none());
        assert!(doc.children_of(u).is_empty());
        assert_eq!(doc.time_order().len(), 2);
    }

    #[test]
    fn test_values_and_events() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        let a = doc.create_annotation(t, 0, 100, "x").unwrap();
        let mut sub = doc.subscribe("annotation.value_changed");
        doc.set_value(a, "y");
        doc.set_cv_entry(a, Some("cv1".into()));
        assert_eq!(doc.annotation(a).value(), "y");
        assert_eq!(doc.annotation(a).cv_entry_id(), Some("cv1"));
        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    #[should_panic(expected = "was deleted")]
    fn test_editing_deleted_annotation_panics() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        let a = doc.create_annotation(t, 0, 100, "x").unwrap();
        doc.delete_annotation(a);
        doc.set_value(a, "y");
    }

    #[test]
    fn test_annotations_at() {
        let mut doc = Document::default();
        let t = doc.add_tier("utterance", None, None).unwrap();
        let a = doc.create_annotation(t, 0, 100, "").unwrap();
        let b = doc.create_annotation(t, 100, 200, "").unwrap();
        assert_eq!(doc.annotations_at(t, 50), vec![a]);
        assert_eq!(doc.annotations_at(t, 100), vec![b]);
        assert!(doc.annotations_at(t, 200).is_empty());
    }

    #[test]
    fn test_shared_document() {
        let doc = shared(Document::default());
        let t = doc.write().add_tier("utterance", None, None).unwrap();
        doc.write().create_annotation(t, 0, 10, "x").unwrap();
        assert_eq!(doc.read().annotation_count(), 1);
    }
}
