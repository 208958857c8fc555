//! Error types for the fallible boundaries of the engine.
//!
//! Edits never fail: invalid intervals are clamped or ignored, and misuse
//! (foreign ids, deleted annotations) panics. Errors exist only where input
//! comes from outside: loading records, declaring tiers, reading config.

use thiserror::Error;

/// Errors from tier declarations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TierError {
    /// A tier with this name already exists.
    #[error("tier already exists: {0}")]
    DuplicateTier(String),

    /// Named parent tier not found.
    #[error("parent tier not found: {0}")]
    UnknownParent(String),

    /// A dependent tier was declared without a constraint, or a top-level
    /// tier with one.
    #[error("tier {tier}: a constraint requires a parent tier and a parent tier requires a constraint")]
    ConstraintMismatch { tier: String },

    /// Alignable constraints need an alignable parent tier.
    #[error("tier {tier}: {constraint} cannot depend on reference tier {parent}")]
    IncompatibleParent {
        tier: String,
        constraint: String,
        parent: String,
    },
}

/// Errors from the two-phase document loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Two records share an id.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },

    /// A time slot id is referenced but never declared.
    #[error("annotation {annotation}: unknown time slot {slot}")]
    UnknownSlot { annotation: String, slot: String },

    /// A tier name is referenced but never declared.
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// Tier parents form a cycle.
    #[error("tier hierarchy has a cycle through {0}")]
    TierCycle(String),

    /// Tier declaration was rejected.
    #[error(transparent)]
    Tier(#[from] TierError),

    /// An alignable record on a reference tier, or the reverse.
    #[error("annotation {annotation}: extent does not match tier {tier}")]
    KindMismatch { annotation: String, tier: String },

    /// A referenced parent or chain annotation does not exist.
    #[error("annotation {annotation}: unknown annotation {target}")]
    UnknownAnnotation { annotation: String, target: String },

    /// No annotation on the parent tier contains this alignable annotation.
    #[error("annotation {0}: no enclosing annotation on the parent tier")]
    MissingParent(String),

    /// A reference annotation lists no parents.
    #[error("annotation {0}: reference annotation without parents")]
    NoParents(String),

    /// A reference parent lives on a tier other than the parent tier.
    #[error("annotation {annotation}: parent {parent} is not on the parent tier")]
    WrongParentTier { annotation: String, parent: String },

    /// Chain links between annotations with different parents or tiers, or
    /// two annotations claiming the same predecessor.
    #[error("annotation {annotation}: invalid chain link to {previous}")]
    ChainMismatch { annotation: String, previous: String },

    /// Start and end slot of an alignable annotation are the same or out of
    /// position order.
    #[error("annotation {0}: begin slot is not before end slot")]
    InvertedSlots(String),
}

/// Errors from reading a document configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}
