//! Typed identifiers for slots, annotations, tiers, and documents.
//!
//! Slot, annotation, and tier ids are dense arena indices. They are `Copy`,
//! cheap to hash, and only meaningful inside the document that minted them;
//! handing one to another document is a programming error the engine turns
//! into a panic. `DocumentId` wraps a UUIDv7 so documents stay
//! distinguishable in logs and change events.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Arena index of a time slot inside a document's time order.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u32);

/// Arena index of an annotation inside a document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(u32);

/// Arena index of a tier inside a document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(u32);

/// A document identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_index_id {
    ($T:ident, $name:literal, $prefix:literal) => {
        impl $T {
            /// Build an id from an arena index.
            ///
            /// Panics if the index does not fit in 32 bits; a document that
            /// large is already broken.
            pub fn from_index(index: usize) -> Self {
                match u32::try_from(index) {
                    Ok(raw) => Self(raw),
                    Err(_) => panic!("{} index {index} overflows u32", $name),
                }
            }

            /// The arena index.
            pub fn index(&self) -> usize {
                self.0 as usize
            }

            /// The raw 32-bit value.
            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $T {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl From<$T> for u32 {
            fn from(id: $T) -> u32 {
                id.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}{})", $name, $prefix, self.0)
            }
        }
    };
}

impl_index_id!(SlotId, "SlotId", "ts");
impl_index_id!(AnnotationId, "AnnotationId", "a");
impl_index_id!(TierId, "TierId", "tier");

// ── DocumentId ──────────────────────────────────────────────────────────────

impl DocumentId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for human display only. Never a lookup key.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }

    /// The nil id. Sentinel use only.
    pub fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Check if this is the nil ID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for DocumentId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip() {
        let id = AnnotationId::from_index(42);
        assert_eq!(id.index(), 42);
        assert_eq!(id.raw(), 42);
        assert_eq!(AnnotationId::from(42u32), id);
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(SlotId::from_index(3).to_string(), "ts3");
        assert_eq!(AnnotationId::from_index(7).to_string(), "a7");
        assert_eq!(TierId::from_index(0).to_string(), "tier0");
        assert_eq!(format!("{:?}", SlotId::from_index(3)), "SlotId(ts3)");
    }

    #[test]
    fn test_ids_order_by_index() {
        assert!(SlotId::from_index(1) < SlotId::from_index(2));
    }

    #[test]
    fn test_document_id_parse_roundtrip() {
        let id = DocumentId::new();
        let parsed = DocumentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
        assert!(!id.is_nil());
        assert!(DocumentId::nil().is_nil());
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&TierId::from_index(5)).unwrap();
        assert_eq!(json, "5");
    }
}
