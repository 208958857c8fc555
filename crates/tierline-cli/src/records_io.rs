//! Reading and writing document records.
//!
//! The format follows the file extension: `.ron` or `.json`.

use std::path::{Path, PathBuf};

use tierline_core::DocumentRecords;

#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}: unknown document format (expected .ron or .json)")]
    UnknownFormat(PathBuf),
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),
    #[error("RON write error: {0}")]
    RonWrite(#[from] ron::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Ron,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, RecordsError> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("ron") => Ok(Format::Ron),
            Some("json") => Ok(Format::Json),
            _ => Err(RecordsError::UnknownFormat(path.to_path_buf())),
        }
    }
}

pub fn parse_records(text: &str, format: Format) -> Result<DocumentRecords, RecordsError> {
    Ok(match format {
        Format::Ron => ron::from_str(text)?,
        Format::Json => serde_json::from_str(text)?,
    })
}

pub fn render_records(records: &DocumentRecords, format: Format) -> Result<String, RecordsError> {
    Ok(match format {
        Format::Ron => ron::ser::to_string_pretty(records, ron::ser::PrettyConfig::default())?,
        Format::Json => serde_json::to_string_pretty(records)?,
    })
}

pub fn read_records(path: &Path) -> Result<DocumentRecords, RecordsError> {
    let format = Format::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| RecordsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_records(&text, format)?;
    tracing::debug!(
        path = %path.display(),
        slots = records.time_slots.len(),
        tiers = records.tiers.len(),
        annotations = records.annotations.len(),
        "records read"
    );
    Ok(records)
}

pub fn write_records(path: &Path, records: &DocumentRecords) -> Result<(), RecordsError> {
    let text = render_records(records, Format::from_path(path)?)?;
    std::fs::write(path, text).map_err(|source| RecordsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
