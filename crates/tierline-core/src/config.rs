//! Per-document settings, readable from RON.
//!
//! ```ron
//! (
//!     propagation_mode: shift,
//!     unaligned_spacing_ms: 250,
//!     event_capacity: 512,
//! )
//! ```
//!
//! Every field is optional; missing fields take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tierline_types::{Millis, PropagationMode};

use crate::error::ConfigError;
use crate::time_order::DEFAULT_UNALIGNED_SPACING_MS;

/// Default capacity of the change event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Overlap correction for top-level interval edits.
    pub propagation_mode: PropagationMode,
    /// Interpolation step for unaligned slots after the last aligned slot.
    pub unaligned_spacing_ms: Millis,
    /// Buffered change events per subscriber before it lags.
    pub event_capacity: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            propagation_mode: PropagationMode::default(),
            unaligned_spacing_ms: DEFAULT_UNALIGNED_SPACING_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DocumentConfig {
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron_str(&text)
    }

    pub fn with_mode(mut self, mode: PropagationMode) -> Self {
        self.propagation_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DocumentConfig::default();
        assert_eq!(config.propagation_mode, PropagationMode::Bulldozer);
        assert_eq!(config.unaligned_spacing_ms, DEFAULT_UNALIGNED_SPACING_MS);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_partial_ron_fills_defaults() {
        let config = DocumentConfig::from_ron_str("(propagation_mode: shift)").unwrap();
        assert_eq!(config.propagation_mode, PropagationMode::Shift);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(unaligned_spacing_ms: 250, event_capacity: 8)").unwrap();
        let config = DocumentConfig::load(file.path()).unwrap();
        assert_eq!(config.unaligned_spacing_ms, 250);
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn test_bad_ron_is_an_error() {
        let err = DocumentConfig::from_ron_str("(propagation_mode: sideways)").unwrap_err();
        assert!(matches!(err, ConfigError::Ron(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = DocumentConfig::load("/nonexistent/tierline.ron").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
