//! End-to-end editing scenarios on a three-level document.

use pretty_assertions::assert_eq;
use tierline_core::{
    AnnotationId, AnnotationRecord, ChangeOp, Constraint, Document, DocumentConfig, DocumentRecords, Millis,
    PropagationMode, TierId, TierRecord, TimeSlotRecord,
};

struct Fixture {
    doc: Document,
    utterance: TierId,
    words: TierId,
    gloss: TierId,
}

fn fixture(mode: PropagationMode) -> Fixture {
    let mut doc = Document::new(DocumentConfig::default().with_mode(mode));
    let utterance = doc.add_tier("utterance", None, None).unwrap();
    let words = doc
        .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
        .unwrap();
    let gloss = doc
        .add_tier("gloss", Some(Constraint::SymbolicAssociation), Some("words"))
        .unwrap();
    Fixture { doc, utterance, words, gloss }
}

fn intervals(doc: &Document, tier: TierId) -> Vec<(Millis, Millis)> {
    doc.tier(tier).annotations().iter().map(|a| doc.interval(*a)).collect()
}

fn values(doc: &Document, tier: TierId) -> Vec<String> {
    doc.tier(tier)
        .annotations()
        .iter()
        .map(|a| doc.annotation(*a).value().to_string())
        .collect()
}

fn words_under(f: &mut Fixture, begin: Millis, end: Millis, cuts: &[Millis]) -> (AnnotationId, Vec<AnnotationId>) {
    let u = f.doc.create_annotation(f.utterance, begin, end, "utt").unwrap();
    let mut words = vec![f.doc.create_annotation(f.words, begin, end, "w0").unwrap()];
    for (i, cut) in cuts.iter().enumerate() {
        words.push(
            f.doc
                .create_annotation(f.words, *cut, end, format!("w{}", i + 1))
                .unwrap(),
        );
    }
    (u, words)
}

#[test]
fn subdivision_edit_moves_neighbours_through_shared_slots() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let (_, w) = words_under(&mut f, 0, 1000, &[300, 600]);

    f.doc.update_interval(w[1], 200, 900);
    assert_eq!(intervals(&f.doc, f.words), vec![(0, 200), (200, 900), (900, 1000)]);
    assert!(f.doc.verify().is_empty());
}

#[test]
fn squeezed_sibling_is_deleted_and_gap_closed() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let (_, w) = words_under(&mut f, 0, 1000, &[300, 600]);
    let g = f.doc.create_annotation(f.gloss, 400, 400, "gloss").unwrap();
    assert_eq!(f.doc.annotation(g).primary_parent(), Some(w[1]));

    // w2 grows over all of w1.
    f.doc.update_interval(w[2], 300, 1000);
    f.doc.update_interval(w[2], 100, 1000);
    assert!(f.doc.is_deleted(w[1]));
    assert!(f.doc.is_deleted(g));
    assert_eq!(intervals(&f.doc, f.words), vec![(0, 100), (100, 1000)]);
    assert_eq!(values(&f.doc, f.words), vec!["w0", "w2"]);
    assert!(f.doc.verify().is_empty());
}

#[test]
fn moving_a_root_far_away_keeps_the_last_child() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let (u, w) = words_under(&mut f, 0, 1000, &[500]);

    f.doc.update_interval(u, 5000, 6000);
    assert_eq!(f.doc.interval(u), (5000, 6000));
    assert!(f.doc.is_deleted(w[0]));
    assert_eq!(f.doc.interval(w[1]), (5000, 6000));
    assert!(f.doc.time_order().is_fully_consistent());
    assert!(f.doc.verify().is_empty());
}

#[test]
fn bulldozer_pushes_whole_subtrees() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let (u1, _) = words_under(&mut f, 0, 1000, &[]);
    let (u2, w2) = words_under(&mut f, 1000, 2000, &[1500]);

    f.doc.update_interval(u1, 0, 1200);
    assert_eq!(f.doc.interval(u2), (1200, 2200));
    assert_eq!(f.doc.interval(w2[0]), (1200, 1700));
    assert_eq!(f.doc.interval(w2[1]), (1700, 2200));
    assert!(f.doc.verify().is_empty());
}

#[test]
fn shift_mode_keeps_gaps() {
    let mut f = fixture(PropagationMode::Shift);
    let (u1, _) = words_under(&mut f, 0, 1000, &[]);
    let (u2, _) = words_under(&mut f, 1500, 2000, &[]);

    f.doc.update_interval(u1, 0, 800);
    assert_eq!(f.doc.interval(u2), (1300, 1800));

    f.doc.set_propagation_mode(PropagationMode::Bulldozer);
    f.doc.update_interval(u1, 0, 1500);
    assert_eq!(f.doc.interval(u2), (1500, 2000));
}

#[test]
fn mode_change_is_published() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let mut sub = f.doc.subscribe("document.*");
    f.doc.set_propagation_mode(PropagationMode::Shift);
    f.doc.set_propagation_mode(PropagationMode::Shift);
    let got = sub.drain();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].payload.op, ChangeOp::ModeChanged);
}

#[test]
fn creation_and_deletion_events_cover_the_cascade() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let mut sub = f.doc.subscribe("annotation.>");
    let (u, w) = words_under(&mut f, 0, 1000, &[500]);
    let created = sub
        .drain()
        .into_iter()
        .filter(|m| m.payload.op == ChangeOp::AnnotationCreated)
        .count();
    assert_eq!(created, 3);

    f.doc.delete_annotation(u);
    let deleted: Vec<AnnotationId> = sub
        .drain()
        .into_iter()
        .filter(|m| m.payload.op == ChangeOp::AnnotationDeleted)
        .filter_map(|m| m.payload.annotation)
        .collect();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.contains(&w[0]) && deleted.contains(&w[1]));
    assert!(f.doc.time_order().is_empty());
}

#[test]
fn loaded_partially_aligned_document_edits_cleanly() {
    let records = DocumentRecords {
        time_slots: vec![
            TimeSlotRecord::aligned("ts1", 1000),
            TimeSlotRecord::unaligned("ts2"),
            TimeSlotRecord::unaligned("ts3"),
            TimeSlotRecord::unaligned("ts4"),
            TimeSlotRecord::aligned("ts5", 1400),
        ],
        tiers: vec![
            TierRecord::top_level("utterance"),
            TierRecord::dependent("words", Constraint::TimeSubdivision, "utterance"),
        ],
        annotations: vec![
            AnnotationRecord::alignable("a1", "utterance", "ts1", "ts5", ""),
            AnnotationRecord::alignable("a2", "words", "ts1", "ts2", "one"),
            AnnotationRecord::alignable("a3", "words", "ts2", "ts3", "two"),
            AnnotationRecord::alignable("a4", "words", "ts3", "ts4", "three"),
            AnnotationRecord::alignable("a5", "words", "ts4", "ts5", "four"),
        ],
    };
    let mut doc = Document::load(records, DocumentConfig::default()).unwrap();
    let words = doc.tier_by_name("words").unwrap();
    assert_eq!(
        intervals(&doc, words),
        vec![(1000, 1100), (1100, 1200), (1200, 1300), (1300, 1400)]
    );

    // Only the edited boundaries gain stored times; ts4 stays interpolated.
    let a3 = doc.by_external_id("a3").unwrap();
    doc.update_interval(a3, 1150, 1200);
    assert_eq!(
        intervals(&doc, words),
        vec![(1000, 1150), (1150, 1200), (1200, 1300), (1300, 1400)]
    );
    assert!(doc.time_order().is_aligned(doc.annotation(a3).as_alignable().unwrap().begin()));
    assert!(doc.verify().is_empty());
}

#[test]
fn export_after_edits_reloads_identically() {
    let mut f = fixture(PropagationMode::Bulldozer);
    let (_, w) = words_under(&mut f, 0, 1000, &[250, 500]);
    f.doc.create_annotation(f.gloss, 600, 600, "end").unwrap();
    f.doc.delete_annotation(w[1]);

    let exported = f.doc.to_records();
    let reloaded = Document::load(exported.clone(), DocumentConfig::default()).unwrap();
    assert_eq!(reloaded.to_records(), exported);
    assert!(reloaded.verify().is_empty());
}
