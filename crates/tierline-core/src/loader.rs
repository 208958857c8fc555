//! Two-phase construction of a document from flat records, and export back.
//!
//! Records may arrive in any order and reference each other by string id.
//! [`DocumentLoader`] buffers them, then `finish` builds the document:
//!
//! 1. Time slots in record order (record order is slot position).
//! 2. Tiers, parents before children.
//! 3. Phase A: every annotation, unlinked.
//! 4. Phase B: resolve reference parents and chain links, and find each
//!    alignable annotation's parent by slot containment.
//! 5. Register indices, prune unused slots, re-sort an inconsistent
//!    timeline, sort tiers.
//!
//! No change events are published for a load.

use std::collections::{HashMap, HashSet};

use tierline_types::{
    AnnotationId, AnnotationRecord, DocumentRecords, Extent, SlotId, TierId, TierRecord, TimeSlotRecord,
};

use crate::annotation::{Alignable, AnnotationKind, Reference};
use crate::config::DocumentConfig;
use crate::document::Document;
use crate::error::LoadError;

/// Buffers records for [`DocumentLoader::finish`].
#[derive(Debug, Default)]
pub struct DocumentLoader {
    config: DocumentConfig,
    time_slots: Vec<TimeSlotRecord>,
    tiers: Vec<TierRecord>,
    annotations: Vec<AnnotationRecord>,
}

impl DocumentLoader {
    pub fn new(config: DocumentConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn add_time_slot(&mut self, record: TimeSlotRecord) -> &mut Self {
        self.time_slots.push(record);
        self
    }

    pub fn add_tier(&mut self, record: TierRecord) -> &mut Self {
        self.tiers.push(record);
        self
    }

    pub fn add_annotation(&mut self, record: AnnotationRecord) -> &mut Self {
        self.annotations.push(record);
        self
    }

    pub fn add_records(&mut self, records: DocumentRecords) -> &mut Self {
        self.time_slots.extend(records.time_slots);
        self.tiers.extend(records.tiers);
        self.annotations.extend(records.annotations);
        self
    }

    /// Build the document. Fails on the first dangling or contradictory
    /// reference.
    pub fn finish(self) -> Result<Document, LoadError> {
        let span = tracing::info_span!(
            "load",
            slots = self.time_slots.len(),
            tiers = self.tiers.len(),
            annotations = self.annotations.len()
        );
        let _enter = span.enter();

        let mut doc = Document::new(self.config);
        let slots = load_slots(&mut doc, self.time_slots)?;
        load_tiers(&mut doc, self.tiers)?;
        let created = create_annotations(&mut doc, &slots, &self.annotations)?;
        link_references(&mut doc, &created, &self.annotations)?;
        link_alignable_parents(&mut doc, &created)?;

        for &id in &created {
            doc.register_links(id);
            let tier = doc.annotation(id).tier;
            doc.tier_mut(tier).annotations.push(id);
        }

        let unused: Vec<SlotId> = slots
            .values()
            .copied()
            .filter(|s| doc.slot_users(*s).is_empty())
            .collect();
        if !unused.is_empty() {
            tracing::debug!(count = unused.len(), "unused time slots dropped");
        }
        for slot in unused {
            doc.time_order.remove(slot);
        }

        doc.time_order.refresh_all();
        if !doc.time_order.is_fully_consistent() {
            tracing::warn!("time slots out of order in source, re-sorting timeline");
            doc.time_order.resort_all();
        }

        let tiers: Vec<TierId> = doc.tier_names.values().copied().collect();
        for tier in tiers {
            doc.ensure_tier_order(tier);
        }

        doc.next_external = created
            .iter()
            .filter_map(|id| doc.annotation(*id).external_id.strip_prefix('a')?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        tracing::info!(document = %doc.id().short(), annotations = created.len(), "document loaded");
        Ok(doc)
    }
}

impl Document {
    /// Build a document from records.
    pub fn load(records: DocumentRecords, config: DocumentConfig) -> Result<Document, LoadError> {
        let mut loader = DocumentLoader::new(config);
        loader.add_records(records);
        loader.finish()
    }

    /// Export the live document. Slots are renumbered `ts1..` in position
    /// order and carry only stored times.
    pub fn to_records(&self) -> DocumentRecords {
        let mut slot_names: HashMap<SlotId, String> = HashMap::new();
        let time_slots = self
            .time_order
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let name = format!("ts{}", i + 1);
                slot_names.insert(slot.id(), name.clone());
                TimeSlotRecord { id: name, time: slot.time() }
            })
            .collect();

        let tiers = self
            .tiers()
            .map(|t| TierRecord {
                name: t.name().to_string(),
                constraint: t.constraint(),
                parent: t.parent().map(|p| self.tier(p).name().to_string()),
                participant: t.participant.clone(),
                linguistic_type: t.linguistic_type.clone(),
            })
            .collect();

        let external = |id: AnnotationId| self.annotation(id).external_id.clone();
        let annotations = self
            .tiers()
            .flat_map(|t| t.annotations().iter().map(move |id| (t, *id)))
            .map(|(t, id)| {
                let ann = self.annotation(id);
                let extent = match &ann.kind {
                    AnnotationKind::Alignable(a) => Extent::Alignable {
                        begin: slot_names[&a.begin].clone(),
                        end: slot_names[&a.end].clone(),
                    },
                    AnnotationKind::Reference(r) => Extent::Reference {
                        parents: r.parents.iter().map(|p| external(*p)).collect(),
                        previous: r.previous.map(external),
                    },
                };
                AnnotationRecord {
                    id: ann.external_id.clone(),
                    tier: t.name().to_string(),
                    value: ann.value.clone(),
                    cv_entry_id: ann.cv_entry_id.clone(),
                    external_refs: ann.external_refs.clone(),
                    extent,
                }
            })
            .collect();

        DocumentRecords {
            time_slots,
            tiers,
            annotations,
        }
    }
}

// ============================================================================
// Phases
// ============================================================================

fn load_slots(doc: &mut Document, records: Vec<TimeSlotRecord>) -> Result<HashMap<String, SlotId>, LoadError> {
    let mut slots = HashMap::with_capacity(records.len());
    for record in records {
        if slots.contains_key(&record.id) {
            return Err(LoadError::DuplicateId { kind: "time slot", id: record.id });
        }
        let slot = doc.time_order.push(record.time);
        slots.insert(record.id, slot);
    }
    Ok(slots)
}

fn load_tiers(doc: &mut Document, records: Vec<TierRecord>) -> Result<(), LoadError> {
    let mut names = HashSet::new();
    for record in &records {
        if !names.insert(record.name.as_str()) {
            return Err(LoadError::DuplicateId { kind: "tier", id: record.name.clone() });
        }
    }
    for record in &records {
        if let Some(parent) = &record.parent {
            if !names.contains(parent.as_str()) {
                return Err(LoadError::UnknownTier(parent.clone()));
            }
        }
    }

    let mut pending = records;
    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|r| r.parent.as_deref().is_none_or(|p| doc.tier_by_name(p).is_some()));
        if ready.is_empty() {
            return Err(LoadError::TierCycle(blocked[0].name.clone()));
        }
        for record in ready {
            let tier = doc.add_tier(&record.name, record.constraint, record.parent.as_deref())?;
            doc.set_tier_metadata(tier, record.participant, record.linguistic_type);
        }
        pending = blocked;
    }
    Ok(())
}

fn create_annotations(
    doc: &mut Document,
    slots: &HashMap<String, SlotId>,
    records: &[AnnotationRecord],
) -> Result<Vec<AnnotationId>, LoadError> {
    let mut created = Vec::with_capacity(records.len());
    for record in records {
        if doc.by_external_id(&record.id).is_some() {
            return Err(LoadError::DuplicateId { kind: "annotation", id: record.id.clone() });
        }
        let tier = doc
            .tier_by_name(&record.tier)
            .ok_or_else(|| LoadError::UnknownTier(record.tier.clone()))?;

        let kind = match (&record.extent, doc.tier(tier).is_alignable()) {
            (Extent::Alignable { begin, end }, true) => {
                let slot = |name: &String| {
                    slots.get(name).copied().ok_or_else(|| LoadError::UnknownSlot {
                        annotation: record.id.clone(),
                        slot: name.clone(),
                    })
                };
                let (begin, end) = (slot(begin)?, slot(end)?);
                if doc.time_order.position(begin) >= doc.time_order.position(end) {
                    return Err(LoadError::InvertedSlots(record.id.clone()));
                }
                AnnotationKind::Alignable(Alignable { begin, end, parent: None })
            }
            (Extent::Reference { .. }, false) => AnnotationKind::Reference(Reference::default()),
            _ => {
                return Err(LoadError::KindMismatch {
                    annotation: record.id.clone(),
                    tier: record.tier.clone(),
                });
            }
        };

        let id = doc.allocate_raw(record.id.clone(), tier, record.value.clone(), kind);
        let ann = doc.annotation_mut(id);
        ann.cv_entry_id = record.cv_entry_id.clone();
        ann.external_refs = record.external_refs.clone();
        created.push(id);
    }
    Ok(created)
}

fn link_references(doc: &mut Document, created: &[AnnotationId], records: &[AnnotationRecord]) -> Result<(), LoadError> {
    let resolve = |doc: &Document, annotation: &str, target: &str| {
        doc.by_external_id(target).ok_or_else(|| LoadError::UnknownAnnotation {
            annotation: annotation.to_string(),
            target: target.to_string(),
        })
    };

    let mut links: Vec<(AnnotationId, AnnotationId)> = Vec::new();
    for (&id, record) in created.iter().zip(records) {
        let Extent::Reference { parents, previous } = &record.extent else {
            continue;
        };
        if parents.is_empty() {
            return Err(LoadError::NoParents(record.id.clone()));
        }
        let parent_tier = doc.tier(doc.annotation(id).tier).parent();
        let mut resolved = Vec::with_capacity(parents.len());
        for name in parents {
            let parent = resolve(doc, &record.id, name)?;
            if Some(doc.annotation(parent).tier) != parent_tier {
                return Err(LoadError::WrongParentTier {
                    annotation: record.id.clone(),
                    parent: name.clone(),
                });
            }
            if !resolved.contains(&parent) {
                resolved.push(parent);
            }
        }
        doc.annotation_mut(id).reference_mut().parents = resolved;
        if let Some(previous) = previous {
            links.push((resolve(doc, &record.id, previous)?, id));
        }
    }

    for (previous, id) in links {
        let mismatch = || LoadError::ChainMismatch {
            annotation: doc.annotation(id).external_id.clone(),
            previous: doc.annotation(previous).external_id.clone(),
        };
        let (ann, prev) = (doc.annotation(id), doc.annotation(previous));
        let compatible = ann.tier == prev.tier
            && prev.as_reference().is_some_and(|r| r.next.is_none())
            && ann.primary_parent() == prev.primary_parent()
            && previous != id;
        if !compatible {
            return Err(mismatch());
        }
        doc.annotation_mut(previous).reference_mut().next = Some(id);
        doc.annotation_mut(id).reference_mut().previous = Some(previous);
    }

    // A chain that loops back on itself has no head.
    for &id in created {
        if doc.annotation(id).as_reference().is_some_and(|r| r.previous.is_some()) {
            let head = doc.chain(id)[0];
            if doc.annotation(head).as_reference().and_then(|r| r.previous).is_some() {
                return Err(LoadError::ChainMismatch {
                    annotation: doc.annotation(id).external_id.clone(),
                    previous: doc.annotation(head).external_id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Find each alignable annotation's parent: the annotation on the parent tier
/// whose slot span contains its own.
fn link_alignable_parents(doc: &mut Document, created: &[AnnotationId]) -> Result<(), LoadError> {
    let mut by_tier: HashMap<TierId, Vec<(usize, usize, AnnotationId)>> = HashMap::new();
    for &id in created {
        if let Some(a) = doc.annotation(id).as_alignable() {
            let span = (doc.time_order.position(a.begin), doc.time_order.position(a.end), id);
            by_tier.entry(doc.annotation(id).tier).or_default().push(span);
        }
    }
    for spans in by_tier.values_mut() {
        spans.sort();
    }

    for &id in created {
        let ann = doc.annotation(id);
        let Some(a) = ann.as_alignable() else {
            continue;
        };
        let Some(parent_tier) = doc.tier(ann.tier).parent() else {
            continue;
        };
        let (begin, end) = (doc.time_order.position(a.begin), doc.time_order.position(a.end));
        let candidates = by_tier.get(&parent_tier).map(Vec::as_slice).unwrap_or(&[]);
        let index = candidates.partition_point(|(pb, _, _)| *pb <= begin);
        let parent = candidates[..index]
            .iter()
            .rev()
            .find(|(pb, pe, _)| *pb <= begin && end <= *pe)
            .map(|(_, _, p)| *p)
            .ok_or_else(|| LoadError::MissingParent(ann.external_id.clone()))?;
        doc.annotation_mut(id).alignable_mut().parent = Some(parent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tierline_types::Constraint;

    use super::*;

    fn records() -> DocumentRecords {
        DocumentRecords {
            time_slots: vec![
                TimeSlotRecord::aligned("ts1", 0),
                TimeSlotRecord::unaligned("ts2"),
                TimeSlotRecord::unaligned("ts3"),
                TimeSlotRecord::aligned("ts4", 900),
            ],
            tiers: vec![
                TierRecord::dependent("gloss", Constraint::SymbolicAssociation, "words"),
                TierRecord::dependent("words", Constraint::TimeSubdivision, "utterance"),
                TierRecord::top_level("utterance"),
            ],
            annotations: vec![
                AnnotationRecord::reference("a5", "gloss", "a3", None, "PL"),
                AnnotationRecord::alignable("a1", "utterance", "ts1", "ts4", "dogs bark"),
                AnnotationRecord::alignable("a2", "words", "ts1", "ts2", "dogs"),
                AnnotationRecord::alignable("a3", "words", "ts2", "ts3", "-s"),
                AnnotationRecord::alignable("a4", "words", "ts3", "ts4", "bark"),
            ],
        }
    }

    #[test]
    fn test_load_resolves_structure() {
        let doc = Document::load(records(), DocumentConfig::default()).unwrap();
        let a1 = doc.by_external_id("a1").unwrap();
        let a3 = doc.by_external_id("a3").unwrap();
        let a5 = doc.by_external_id("a5").unwrap();

        let names: Vec<&str> = doc.tiers().map(|t| t.name()).collect();
        assert_eq!(names, vec!["utterance", "words", "gloss"]);
        assert_eq!(doc.annotation(a3).primary_parent(), Some(a1));
        assert_eq!(doc.annotation(a5).primary_parent(), Some(a3));

        // Unaligned slots interpolate evenly between 0 and 900.
        assert_eq!(doc.interval(a3), (300, 600));
        assert_eq!(doc.interval(a5), (300, 600));
        assert!(!doc.is_time_aligned(a3));
        assert_eq!(doc.annotation_count(), 5);
    }

    #[test]
    fn test_unaligned_then_make_time_aligned() {
        let mut doc = Document::load(records(), DocumentConfig::default()).unwrap();
        let a3 = doc.by_external_id("a3").unwrap();
        doc.make_time_aligned(a3);
        assert!(doc.is_time_aligned(a3));
        assert_eq!(doc.interval(a3), (300, 600));
    }

    #[test]
    fn test_roundtrip_through_records() {
        let doc = Document::load(records(), DocumentConfig::default()).unwrap();
        let exported = doc.to_records();
        assert_eq!(exported.time_slots.len(), 4);
        assert_eq!(exported.tiers[0], TierRecord::top_level("utterance"));

        let again = Document::load(exported.clone(), DocumentConfig::default()).unwrap();
        assert_eq!(again.to_records(), exported);
    }

    #[test]
    fn test_unknown_slot() {
        let mut recs = records();
        recs.annotations.push(AnnotationRecord::alignable("a9", "utterance", "ts1", "ts99", ""));
        let err = Document::load(recs, DocumentConfig::default()).unwrap_err();
        assert_eq!(err, LoadError::UnknownSlot { annotation: "a9".into(), slot: "ts99".into() });
    }

    #[test]
    fn test_tier_cycle_and_unknown_parent() {
        let mut recs = records();
        recs.tiers.push(TierRecord::dependent("x", Constraint::IncludedIn, "y"));
        recs.tiers.push(TierRecord::dependent("y", Constraint::IncludedIn, "x"));
        assert_eq!(
            Document::load(recs, DocumentConfig::default()).unwrap_err(),
            LoadError::TierCycle("x".into())
        );

        let mut recs = records();
        recs.tiers.push(TierRecord::dependent("x", Constraint::IncludedIn, "nowhere"));
        assert_eq!(
            Document::load(recs, DocumentConfig::default()).unwrap_err(),
            LoadError::UnknownTier("nowhere".into())
        );
    }

    #[test]
    fn test_kind_mismatch_and_missing_parent() {
        let mut recs = records();
        recs.annotations.push(AnnotationRecord::reference("a9", "words", "a1", None, ""));
        assert!(matches!(
            Document::load(recs, DocumentConfig::default()).unwrap_err(),
            LoadError::KindMismatch { .. }
        ));

        let mut recs = records();
        recs.time_slots.push(TimeSlotRecord::aligned("ts5", 1000));
        recs.time_slots.push(TimeSlotRecord::aligned("ts6", 1100));
        recs.annotations.push(AnnotationRecord::alignable("a9", "words", "ts5", "ts6", ""));
        assert_eq!(
            Document::load(recs, DocumentConfig::default()).unwrap_err(),
            LoadError::MissingParent("a9".into())
        );
    }

    #[test]
    fn test_chain_conflicts() {
        let mut recs = records();
        recs.annotations.push(AnnotationRecord::reference("a6", "gloss", "a4", Some("a5"), ""));
        assert!(matches!(
            Document::load(recs, DocumentConfig::default()).unwrap_err(),
            LoadError::ChainMismatch { .. }
        ));
    }

    #[test]
    fn test_out_of_order_slots_are_resorted() {
        let recs = DocumentRecords {
            time_slots: vec![
                TimeSlotRecord::aligned("ts1", 500),
                TimeSlotRecord::aligned("ts2", 800),
                TimeSlotRecord::aligned("ts3", 100),
                TimeSlotRecord::aligned("ts4", 300),
            ],
            tiers: vec![TierRecord::top_level("t")],
            annotations: vec![
                AnnotationRecord::alignable("a1", "t", "ts1", "ts2", "late"),
                AnnotationRecord::alignable("a2", "t", "ts3", "ts4", "early"),
            ],
        };
        let doc = Document::load(recs, DocumentConfig::default()).unwrap();
        assert!(doc.time_order().is_fully_consistent());
        let t = doc.tier_by_name("t").unwrap();
        let values: Vec<&str> = doc
            .tier(t)
            .annotations()
            .iter()
            .map(|a| doc.annotation(*a).value())
            .collect();
        assert_eq!(values, vec!["early", "late"]);
    }

    #[test]
    fn test_tightly_packed_unaligned_slots_are_not_degenerate() {
        let recs = DocumentRecords {
            time_slots: vec![
                TimeSlotRecord::aligned("ts1", 100),
                TimeSlotRecord::unaligned("ts2"),
                TimeSlotRecord::unaligned("ts3"),
                TimeSlotRecord::unaligned("ts4"),
                TimeSlotRecord::aligned("ts5", 102),
            ],
            tiers: vec![
                TierRecord::top_level("utterance"),
                TierRecord::dependent("words", Constraint::TimeSubdivision, "utterance"),
            ],
            annotations: vec![
                AnnotationRecord::alignable("a1", "utterance", "ts1", "ts5", ""),
                AnnotationRecord::alignable("a2", "words", "ts1", "ts2", "w0"),
                AnnotationRecord::alignable("a3", "words", "ts2", "ts3", "w1"),
                AnnotationRecord::alignable("a4", "words", "ts3", "ts4", "w2"),
                AnnotationRecord::alignable("a5", "words", "ts4", "ts5", "w3"),
            ],
        };
        let mut doc = Document::load(recs, DocumentConfig::default()).unwrap();
        let a2 = doc.by_external_id("a2").unwrap();
        assert_eq!(doc.interval(a2), (100, 100));
        assert_eq!(doc.verify(), vec![]);

        let a1 = doc.by_external_id("a1").unwrap();
        doc.update_interval(a1, 100, 103);
        let words = doc.tier_by_name("words").unwrap();
        assert_eq!(doc.tier(words).annotations().len(), 4);
        assert!(!doc.is_deleted(a2));
        assert_eq!(doc.verify(), vec![]);
    }

    #[test]
    fn test_fresh_ids_do_not_collide() {
        let mut doc = Document::load(records(), DocumentConfig::default()).unwrap();
        let utt = doc.tier_by_name("utterance").unwrap();
        let id = doc.create_annotation(utt, 2000, 3000, "").unwrap();
        assert_eq!(doc.annotation(id).external_id(), "a6");
    }
}
