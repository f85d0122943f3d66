//! Indications
//!
//! Lifecycle notifications for CIM instances. Request handlers enqueue
//! indications synchronously; a single background task delivers them, in
//! enqueue order, to every subscribed sink whose filter matches.

pub mod dispatcher;

pub use dispatcher::*;

use crate::domain::name::InstanceName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Kind of lifecycle change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicationKind {
    Creation,
    Deletion,
    Modification,
}

impl IndicationKind {
    /// CIM class of the indication
    pub fn class_name(&self) -> &'static str {
        match self {
            IndicationKind::Creation => "LMI_StorageInstCreation",
            IndicationKind::Deletion => "LMI_StorageInstDeletion",
            IndicationKind::Modification => "LMI_StorageInstModification",
        }
    }
}

impl std::fmt::Display for IndicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicationKind::Creation => write!(f, "creation"),
            IndicationKind::Deletion => write!(f, "deletion"),
            IndicationKind::Modification => write!(f, "modification"),
        }
    }
}

/// A lifecycle notification about one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Indication {
    pub kind: IndicationKind,
    pub source: InstanceName,
    pub timestamp: DateTime<Utc>,
    /// Position in the queue, strictly increasing
    pub sequence: u64,
}

impl Indication {
    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Producer side of the indication FIFO
///
/// Enqueueing never blocks; the queue is unbounded and owned by the
/// dispatcher once it starts.
#[derive(Debug)]
pub struct IndicationQueue {
    tx: mpsc::UnboundedSender<Indication>,
    rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Indication>>>,
    sequence: AtomicU64,
}

impl Default for IndicationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicationQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: parking_lot::Mutex::new(Some(rx)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Append an indication; returns false when nobody will ever deliver it
    pub fn enqueue(&self, kind: IndicationKind, source: InstanceName) -> bool {
        let indication = Indication {
            kind,
            source,
            timestamp: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        debug!(
            "Enqueue {} #{} for {}",
            indication.kind, indication.sequence, indication.source
        );
        match self.tx.send(indication) {
            Ok(()) => true,
            Err(mpsc::error::SendError(dropped)) => {
                warn!(
                    "Indication dispatcher stopped, dropping {} for {}",
                    dropped.kind, dropped.source
                );
                false
            }
        }
    }

    /// Number of indications enqueued so far
    pub fn enqueued(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Hand the consumer side to the dispatcher; only the first call succeeds
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Indication>> {
        self.rx.lock().take()
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Selects the indications a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicationFilter {
    /// Unique subscription name
    pub name: String,
    /// Kinds to deliver; empty means every kind
    #[serde(default)]
    pub kinds: Vec<IndicationKind>,
    /// Source classes to deliver; empty means every class
    #[serde(default)]
    pub source_classes: Vec<String>,
}

impl IndicationFilter {
    /// Filter accepting everything
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kinds: Vec::new(),
            source_classes: Vec::new(),
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = IndicationKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_source_classes(mut self, classes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, indication: &Indication) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&indication.kind))
            && (self.source_classes.is_empty()
                || self
                    .source_classes
                    .iter()
                    .any(|class| indication.source.is_class(class)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(class: &str) -> InstanceName {
        InstanceName::with_instance_id(class, "LMI:VG:vg0")
    }

    #[test]
    fn test_filter_matching() {
        let queue = IndicationQueue::new();
        let mut rx = queue.take_receiver().unwrap();
        queue.enqueue(IndicationKind::Creation, name("LMI_VGStoragePool"));
        let indication = rx.try_recv().unwrap();

        assert!(IndicationFilter::all("any").matches(&indication));
        assert!(IndicationFilter::all("kinds")
            .with_kinds([IndicationKind::Creation])
            .matches(&indication));
        assert!(!IndicationFilter::all("kinds")
            .with_kinds([IndicationKind::Deletion])
            .matches(&indication));
        assert!(IndicationFilter::all("classes")
            .with_source_classes(["lmi_vgstoragepool"])
            .matches(&indication));
        assert!(!IndicationFilter::all("classes")
            .with_source_classes(["LMI_LVStorageExtent"])
            .matches(&indication));
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let queue = IndicationQueue::new();
        let mut rx = queue.take_receiver().unwrap();
        for _ in 0..3 {
            queue.enqueue(IndicationKind::Modification, name("LMI_VGStoragePool"));
        }
        let sequences: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|i| i.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(queue.enqueued(), 3);
        assert!(queue.take_receiver().is_none());
    }

    #[test]
    fn test_enqueue_after_consumer_dropped() {
        let queue = IndicationQueue::new();
        drop(queue.take_receiver());
        assert!(!queue.enqueue(IndicationKind::Deletion, name("LMI_VGStoragePool")));
    }
}
