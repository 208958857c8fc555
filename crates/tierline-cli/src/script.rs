//! RON edit scripts.
//!
//! A script is a list of [`EditCommand`]s applied in order. Annotations are
//! named by their external ids; annotations created earlier in the same
//! script get fresh `aN` ids, which the `edit` command prints.
//!
//! ```ron
//! [
//!     AddTier(name: "notes", constraint: Some(included_in), parent: Some("utterance")),
//!     Create(tier: "notes", begin: 120, end: 480, value: "laughs"),
//!     Update(id: "a2", begin: 200, end: 900),
//!     SetMode(shift),
//!     Delete(id: "a4"),
//! ]
//! ```

use serde::{Deserialize, Serialize};
use tierline_core::{AnnotationId, Constraint, Document, Millis, PropagationMode, TierError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditCommand {
    AddTier {
        name: String,
        #[serde(default)]
        constraint: Option<Constraint>,
        #[serde(default)]
        parent: Option<String>,
    },
    RemoveTier {
        name: String,
    },
    Create {
        tier: String,
        begin: Millis,
        end: Millis,
        #[serde(default)]
        value: String,
    },
    /// Insert into a symbolic-subdivision chain after `anchor`.
    CreateAfter {
        anchor: String,
        #[serde(default)]
        value: String,
    },
    /// Insert into a symbolic-subdivision chain before `anchor`.
    CreateBefore {
        anchor: String,
        #[serde(default)]
        value: String,
    },
    Update {
        id: String,
        begin: Millis,
        end: Millis,
    },
    /// Store times at the annotation's current effective bounds.
    Align {
        id: String,
    },
    SetValue {
        id: String,
        value: String,
    },
    Delete {
        id: String,
    },
    SetMode(PropagationMode),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),
    #[error("unknown annotation: {0}")]
    UnknownAnnotation(String),
    #[error("annotation {0} has been deleted")]
    Deleted(String),
    #[error("annotation {0} is not alignable")]
    NotAlignable(String),
    #[error("annotation {0} is not on a symbolic subdivision tier")]
    NotChained(String),
    #[error(transparent)]
    Tier(#[from] TierError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("command {index}: {source}")]
    Command {
        index: usize,
        #[source]
        source: CommandError,
    },
}

pub fn parse_script(text: &str) -> Result<Vec<EditCommand>, ScriptError> {
    Ok(ron::from_str(text)?)
}

/// Apply commands in order, stopping at the first failure. Returns the
/// annotation each command created, if any.
pub fn apply_script(doc: &mut Document, commands: &[EditCommand]) -> Result<Vec<Option<AnnotationId>>, ScriptError> {
    commands
        .iter()
        .enumerate()
        .map(|(index, command)| apply_command(doc, command).map_err(|source| ScriptError::Command { index, source }))
        .collect()
}

/// Apply one command. `Create` returns `Ok(None)` when the tier's rules
/// leave no room for the annotation.
pub fn apply_command(doc: &mut Document, command: &EditCommand) -> Result<Option<AnnotationId>, CommandError> {
    tracing::debug!(?command, "applying edit command");
    match command {
        EditCommand::AddTier { name, constraint, parent } => {
            doc.add_tier(name, *constraint, parent.as_deref())?;
        }
        EditCommand::RemoveTier { name } => {
            let tier = tier_named(doc, name)?;
            doc.remove_tier(tier);
        }
        EditCommand::Create { tier, begin, end, value } => {
            let tier = tier_named(doc, tier)?;
            let created = doc.create_annotation(tier, *begin, *end, value.as_str());
            if created.is_none() {
                tracing::info!(begin, end, "annotation not created");
            }
            return Ok(created);
        }
        EditCommand::CreateAfter { anchor, value } => {
            let anchor = chained(doc, anchor)?;
            return Ok(Some(doc.create_reference_after(anchor, value.as_str())));
        }
        EditCommand::CreateBefore { anchor, value } => {
            let anchor = chained(doc, anchor)?;
            return Ok(Some(doc.create_reference_before(anchor, value.as_str())));
        }
        EditCommand::Update { id, begin, end } => {
            let id = alignable(doc, id)?;
            doc.update_interval(id, *begin, *end);
        }
        EditCommand::Align { id } => {
            let id = alignable(doc, id)?;
            doc.make_time_aligned(id);
        }
        EditCommand::SetValue { id, value } => {
            let id = live(doc, id)?;
            doc.set_value(id, value.as_str());
        }
        EditCommand::Delete { id } => {
            let id = live(doc, id)?;
            doc.delete_annotation(id);
        }
        EditCommand::SetMode(mode) => doc.set_propagation_mode(*mode),
    }
    Ok(None)
}

fn tier_named(doc: &Document, name: &str) -> Result<tierline_core::TierId, CommandError> {
    doc.tier_by_name(name)
        .ok_or_else(|| CommandError::UnknownTier(name.to_string()))
}

fn live(doc: &Document, external_id: &str) -> Result<AnnotationId, CommandError> {
    let id = doc
        .by_external_id(external_id)
        .ok_or_else(|| CommandError::UnknownAnnotation(external_id.to_string()))?;
    if doc.is_deleted(id) {
        return Err(CommandError::Deleted(external_id.to_string()));
    }
    Ok(id)
}

fn alignable(doc: &Document, external_id: &str) -> Result<AnnotationId, CommandError> {
    let id = live(doc, external_id)?;
    if !doc.annotation(id).is_alignable() {
        return Err(CommandError::NotAlignable(external_id.to_string()));
    }
    Ok(id)
}

fn chained(doc: &Document, external_id: &str) -> Result<AnnotationId, CommandError> {
    let id = live(doc, external_id)?;
    if doc.constraint_of(id) != Some(Constraint::SymbolicSubdivision) {
        return Err(CommandError::NotChained(external_id.to_string()));
    }
    Ok(id)
}
