//! Plain-text views of a document for the terminal.

use std::fmt::Write;

use tierline_core::{ChangeEvent, ChangeMessage, Document, Tier, Violation};

/// One heading per tier, then one line per annotation with effective
/// times. Interpolated intervals are marked with `~`.
pub fn render_tiers(doc: &Document, only: Option<&str>) -> String {
    let mut out = String::new();
    for tier in doc.tiers().filter(|t| only.is_none_or(|name| t.name() == name)) {
        let _ = writeln!(out, "{}", tier_heading(doc, tier));
        for snap in doc.tier_snapshots(tier.id()) {
            let marker = if snap.time_aligned || !tier.is_alignable() { ' ' } else { '~' };
            let _ = writeln!(
                out,
                "  {:<6} {}{:>8} .. {:<8} {:?}",
                snap.external_id, marker, snap.begin, snap.end, snap.value
            );
        }
    }
    out
}

fn tier_heading(doc: &Document, tier: &Tier) -> String {
    let mut heading = format!("{} ({} annotations", tier.name(), tier.len());
    if let (Some(constraint), Some(parent)) = (tier.constraint(), tier.parent()) {
        let _ = write!(heading, ", {constraint} of {}", doc.tier(parent).name());
    }
    heading.push(')');
    heading
}

/// One line per published change, naming annotations by external id.
pub fn render_events(doc: &Document, messages: &[ChangeMessage<ChangeEvent>]) -> String {
    let mut out = String::new();
    for message in messages {
        let event = &message.payload;
        let mut line = message.subject.clone();
        if let Some(id) = event.annotation.and_then(|a| doc.get_annotation(a)) {
            let _ = write!(line, " {}", id.external_id());
        }
        if let Some(tier) = event.tier.and_then(|t| doc.get_tier(t)) {
            let _ = write!(line, " [{}]", tier.name());
        }
        let _ = writeln!(out, "{line}");
    }
    out
}

pub fn render_violations(doc: &Document, violations: &[Violation]) -> String {
    let name = |id| {
        doc.get_annotation(id)
            .map(|a| a.external_id().to_string())
            .unwrap_or_else(|| id.to_string())
    };
    let mut out = String::new();
    for v in violations {
        let line = match v {
            Violation::TimeOrder { position, slot } => {
                format!("time order decreases at position {position} (slot {slot})")
            }
            Violation::DanglingSlot { annotation, slot } => {
                format!("{} anchors on missing slot {slot}", name(*annotation))
            }
            Violation::Degenerate { annotation } => format!("{} has no duration", name(*annotation)),
            Violation::Containment { annotation, parent } => {
                format!("{} leaves its parent {}", name(*annotation), name(*parent))
            }
            Violation::BrokenParent { annotation } => format!("{} has no live parent", name(*annotation)),
            Violation::ChainLink { annotation } => format!("{} has an asymmetric chain link", name(*annotation)),
            Violation::TierMembership { annotation, tier } => {
                format!("{} is misfiled on tier {tier}", name(*annotation))
            }
            Violation::TierOrder { tier, index } => {
                let tier = doc.get_tier(*tier).map(|t| t.name().to_string()).unwrap_or_default();
                format!("tier {tier} out of order at index {index}")
            }
            Violation::OrphanSlot { slot } => format!("slot {slot} is unused"),
        };
        let _ = writeln!(out, "{line}");
    }
    out
}

/// `check` summary line.
pub fn render_summary(doc: &Document) -> String {
    format!(
        "{} tiers, {} annotations, {} time slots ({} aligned), mode {}",
        doc.tiers().count(),
        doc.annotation_count(),
        doc.time_order().len(),
        doc.time_order().iter().filter(|s| s.is_aligned()).count(),
        doc.propagation_mode()
    )
}

#[cfg(test)]
mod tests {
    use tierline_core::{Constraint, SlotId};

    use super::*;

    fn doc() -> Document {
        let mut doc = Document::default();
        let utt = doc.add_tier("utterance", None, None).unwrap();
        let words = doc
            .add_tier("words", Some(Constraint::TimeSubdivision), Some("utterance"))
            .unwrap();
        doc.create_annotation(utt, 0, 1000, "hello there").unwrap();
        doc.create_annotation(words, 0, 1000, "hello").unwrap();
        doc.create_annotation(words, 400, 1000, "there").unwrap();
        doc
    }

    #[test]
    fn test_render_tiers() {
        let doc = doc();
        let text = render_tiers(&doc, None);
        assert!(text.contains("utterance (1 annotations)"));
        assert!(text.contains("words (2 annotations, time_subdivision of utterance)"));
        assert!(text.contains("\"there\""));
        assert_eq!(render_tiers(&doc, Some("words")).lines().count(), 3);
    }

    #[test]
    fn test_render_events() {
        let mut doc = doc();
        let mut sub = doc.subscribe(">");
        let a2 = doc.by_external_id("a2").unwrap();
        doc.set_value(a2, "hi");
        let text = render_events(&doc, &sub.drain());
        assert_eq!(text, "annotation.value_changed a2 [words]\n");
    }

    #[test]
    fn test_render_violations_and_summary() {
        let doc = doc();
        let text = render_violations(&doc, &[Violation::OrphanSlot { slot: SlotId::from_index(9) }]);
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("slot "));
        assert_eq!(
            render_summary(&doc),
            "2 tiers, 3 annotations, 3 time slots (3 aligned), mode bulldozer"
        );
    }
}
