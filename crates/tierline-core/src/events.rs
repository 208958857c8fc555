//! Change notifications for observers of a document.
//!
//! Every structural or value edit publishes a [`ChangeEvent`] on the
//! document's [`ChangeBus`]. Subscribers filter by NATS-style subject
//! patterns:
//!
//! - `*` matches exactly one token: `annotation.*` matches
//!   `annotation.created` but not `tier.added`
//! - `>` matches one or more tokens (only at end): `>` matches everything
//! - Exact match: `annotation.time_changed` only matches itself
//!
//! The bus is a broadcast channel. Publishing never blocks and succeeds with
//! no subscribers; a subscriber that falls more than the channel capacity
//! behind loses the oldest events and logs a warning.
//!
//! # Example
//!
//! ```ignore
//! let mut sub = doc.subscribe("annotation.*");
//! doc.set_value(id, "hello");
//! for msg in sub.drain() {
//!     println!("{}: {:?}", msg.subject, msg.payload.annotation);
//! }
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use tierline_types::{AnnotationId, DocumentId, TierId};
use tokio::sync::broadcast;

// ============================================================================
// Pattern Matching
// ============================================================================

/// Check if a subject matches a pattern.
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;

    while pi < pattern_tokens.len() && si < subject_tokens.len() {
        match pattern_tokens[pi] {
            ">" => return pi == pattern_tokens.len() - 1,
            "*" => {
                pi += 1;
                si += 1;
            }
            token => {
                if token != subject_tokens[si] {
                    return false;
                }
                pi += 1;
                si += 1;
            }
        }
    }

    pi == pattern_tokens.len() && si == subject_tokens.len()
}

// ============================================================================
// Events
// ============================================================================

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOp {
    AnnotationCreated,
    AnnotationDeleted,
    ValueChanged,
    TimeChanged,
    TierAdded,
    TierRemoved,
    ModeChanged,
}

impl ChangeOp {
    /// Subject string for this operation.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::AnnotationCreated => "annotation.created",
            Self::AnnotationDeleted => "annotation.deleted",
            Self::ValueChanged => "annotation.value_changed",
            Self::TimeChanged => "annotation.time_changed",
            Self::TierAdded => "tier.added",
            Self::TierRemoved => "tier.removed",
            Self::ModeChanged => "document.mode_changed",
        }
    }
}

/// A change to a document. Carries ids only; observers read current state
/// from the document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub document: DocumentId,
    pub op: ChangeOp,
    pub annotation: Option<AnnotationId>,
    pub tier: Option<TierId>,
}

impl ChangeEvent {
    pub fn annotation(document: DocumentId, op: ChangeOp, annotation: AnnotationId, tier: TierId) -> Self {
        Self {
            document,
            op,
            annotation: Some(annotation),
            tier: Some(tier),
        }
    }

    pub fn tier(document: DocumentId, op: ChangeOp, tier: TierId) -> Self {
        Self {
            document,
            op,
            annotation: None,
            tier: Some(tier),
        }
    }

    pub fn document(document: DocumentId, op: ChangeOp) -> Self {
        Self {
            document,
            op,
            annotation: None,
            tier: None,
        }
    }
}

/// Trait for payloads that know their subject.
pub trait HasSubject {
    fn subject(&self) -> &str;
}

impl HasSubject for ChangeEvent {
    fn subject(&self) -> &str {
        self.op.subject()
    }
}

/// A message delivered to subscribers.
#[derive(Clone, Debug)]
pub struct ChangeMessage<T> {
    /// The subject (derived from payload).
    pub subject: String,
    pub payload: T,
    /// When this message was published.
    pub timestamp: Instant,
}

impl<T: HasSubject> ChangeMessage<T> {
    pub fn new(payload: T) -> Self {
        Self {
            subject: payload.subject().to_string(),
            payload,
            timestamp: Instant::now(),
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Broadcast bus for change events.
pub struct ChangeBus<T: Clone + Send + 'static = ChangeEvent> {
    tx: broadcast::Sender<ChangeMessage<T>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> ChangeBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + HasSubject + 'static> ChangeBus<T> {
    /// Publish a payload. Returns the number of subscribers reached.
    pub fn publish(&self, payload: T) -> usize {
        self.tx.send(ChangeMessage::new(payload)).unwrap_or(0)
    }

    /// Subscribe to messages whose subject matches `pattern`.
    pub fn subscribe(&self, pattern: &str) -> Subscription<T> {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for ChangeBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for ChangeBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A pattern-filtered subscription to a [`ChangeBus`].
pub struct Subscription<T: Clone> {
    pattern: String,
    rx: broadcast::Receiver<ChangeMessage<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next matching message, waiting if necessary.
    ///
    /// Returns None if the bus is gone.
    pub async fn recv(&mut self) -> Option<ChangeMessage<T>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Some(msg);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "change subscription lagged behind");
                }
            }
        }
    }

    /// Receive the next matching message without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeMessage<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Some(msg);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "change subscription lagged behind");
                }
                Err(_) => return None,
            }
        }
    }

    /// Collect every pending matching message.
    pub fn drain(&mut self) -> Vec<ChangeMessage<T>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
