//! Library side of the `tierline` binary.
//!
//! Each subcommand is a function from paths to the text it prints, so the
//! commands can be tested without spawning the binary.

pub mod records_io;
pub mod render;
pub mod script;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tierline_core::{AnnotationSnapshot, Document, DocumentConfig, PropagationMode};

pub use records_io::{Format, RecordsError, read_records, write_records};
pub use script::{CommandError, EditCommand, ScriptError, apply_script, parse_script};

/// Build the document configuration from an optional RON file and an
/// optional mode override.
pub fn document_config(path: Option<&Path>, mode: Option<PropagationMode>) -> Result<DocumentConfig> {
    let mut config = match path {
        Some(p) => DocumentConfig::load(p).with_context(|| format!("reading config {}", p.display()))?,
        None => DocumentConfig::default(),
    };
    if let Some(mode) = mode {
        config.propagation_mode = mode;
    }
    Ok(config)
}

pub fn load_document(path: &Path, config: DocumentConfig) -> Result<Document> {
    let records = read_records(path)?;
    let doc = Document::load(records, config).with_context(|| format!("loading {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        tiers = doc.tiers().count(),
        annotations = doc.annotation_count(),
        "document loaded"
    );
    Ok(doc)
}

/// Result of `check`.
#[derive(Debug)]
pub struct CheckReport {
    pub clean: bool,
    pub text: String,
}

pub fn check(path: &Path, config: DocumentConfig) -> Result<CheckReport> {
    let doc = load_document(path, config)?;
    let violations = doc.verify();
    let mut text = render::render_summary(&doc);
    text.push('\n');
    if violations.is_empty() {
        text.push_str("ok\n");
    } else {
        text.push_str(&render::render_violations(&doc, &violations));
    }
    Ok(CheckReport { clean: violations.is_empty(), text })
}

#[derive(Serialize)]
struct TierView {
    name: String,
    annotations: Vec<AnnotationSnapshot>,
}

pub fn show(path: &Path, config: DocumentConfig, tier: Option<&str>, json: bool) -> Result<String> {
    let doc = load_document(path, config)?;
    if let Some(name) = tier {
        if doc.tier_by_name(name).is_none() {
            anyhow::bail!("no tier named {name:?} in {}", path.display());
        }
    }
    if !json {
        return Ok(render::render_tiers(&doc, tier));
    }
    let views: Vec<TierView> = doc
        .tiers()
        .filter(|t| tier.is_none_or(|name| t.name() == name))
        .map(|t| TierView { name: t.name().to_string(), annotations: doc.tier_snapshots(t.id()) })
        .collect();
    Ok(serde_json::to_string_pretty(&views)? + "\n")
}

/// Apply an edit script, report what changed, and optionally write the
/// result. Nothing is written when the script fails.
pub fn edit(path: &Path, script_path: &Path, config: DocumentConfig, out: Option<&Path>) -> Result<String> {
    let mut doc = load_document(path, config)?;
    let text = std::fs::read_to_string(script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let commands = parse_script(&text)?;

    let mut events = doc.subscribe(">");
    let created = apply_script(&mut doc, &commands)?;
    let messages = events.drain();
    tracing::info!(commands = commands.len(), events = messages.len(), "script applied");

    let mut report = String::new();
    for (index, id) in created.iter().enumerate() {
        if let Some(id) = id {
            report.push_str(&format!("command {index} created {}\n", doc.annotation(*id).external_id()));
        }
    }
    report.push_str(&render::render_events(&doc, &messages));
    report.push_str(&render::render_tiers(&doc, None));

    let violations = doc.verify();
    if !violations.is_empty() {
        report.push_str(&render::render_violations(&doc, &violations));
    }

    if let Some(out) = out {
        write_records(out, &doc.to_records())?;
        tracing::info!(path = %out.display(), "document written");
    }
    Ok(report)
}
