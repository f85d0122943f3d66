//! Indication Dispatcher
//!
//! Background task draining the indication queue into subscribed sinks.

use super::{Indication, IndicationFilter, IndicationQueue};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiver of delivered indications (the CIMOM in production)
#[async_trait]
pub trait IndicationSink: Send + Sync {
    async fn deliver(&self, indication: &Indication) -> Result<()>;
}

pub type IndicationSinkRef = Arc<dyn IndicationSink>;

/// Sink that writes every indication to the log
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl IndicationSink for LoggingSink {
    async fn deliver(&self, indication: &Indication) -> Result<()> {
        info!(
            class = indication.class_name(),
            sequence = indication.sequence,
            "{} {}",
            indication.kind,
            indication.source
        );
        Ok(())
    }
}

struct Subscription {
    filter: IndicationFilter,
    sink: IndicationSinkRef,
}

type Subscriptions = Arc<RwLock<Vec<Arc<Subscription>>>>;

/// Delivery counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub unmatched: AtomicU64,
}

/// Handle of the running delivery task
pub struct IndicationDispatcher {
    subscriptions: Subscriptions,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl IndicationDispatcher {
    /// Start delivering from the queue; the queue's consumer side can be taken once
    pub fn spawn(queue: &IndicationQueue, shutdown: CancellationToken) -> Result<Self> {
        let rx = queue
            .take_receiver()
            .ok_or_else(|| Error::Failed("indication dispatcher already started".into()))?;

        let subscriptions: Subscriptions = Arc::new(RwLock::new(Vec::new()));
        let stats = Arc::new(DispatchStats::default());
        let handle = tokio::spawn(run(rx, subscriptions.clone(), stats.clone(), shutdown.clone()));

        info!("Indication dispatcher started");
        Ok(Self {
            subscriptions,
            stats,
            shutdown,
            handle,
        })
    }

    /// Add a subscription; a filter name can only be used once
    pub fn subscribe(&self, filter: IndicationFilter, sink: IndicationSinkRef) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.iter().any(|s| s.filter.name == filter.name) {
            return Err(Error::invalid(
                "Filter",
                format!("subscription {} already exists", filter.name),
            ));
        }
        info!("Subscribed {}", filter.name);
        subscriptions.push(Arc::new(Subscription { filter, sink }));
        Ok(())
    }

    /// Remove a subscription by filter name
    pub fn unsubscribe(&self, name: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.filter.name != name);
        if subscriptions.len() == before {
            return Err(Error::NotFound(format!("subscription {}", name)));
        }
        info!("Unsubscribed {}", name);
        Ok(())
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .iter()
            .map(|s| s.filter.name.clone())
            .collect()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Stop the task and wait for it; queued indications are not delivered
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            warn!("Indication dispatcher ended abnormally: {}", e);
        }
        info!("Indication dispatcher stopped");
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Indication>,
    subscriptions: Subscriptions,
    stats: Arc<DispatchStats>,
    shutdown: CancellationToken,
) {
    loop {
        let indication = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(indication) => indication,
                None => break,
            },
        };

        // Snapshot so subscribe/unsubscribe never wait on a slow sink
        let targets: Vec<Arc<Subscription>> = subscriptions
            .read()
            .iter()
            .filter(|s| s.filter.matches(&indication))
            .cloned()
            .collect();

        if targets.is_empty() {
            stats.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!("No subscriber for indication #{}", indication.sequence);
            continue;
        }

        for subscription in targets {
            match subscription.sink.deliver(&indication).await {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Delivery of #{} to {} failed: {}",
                        indication.sequence, subscription.filter.name, e
                    );
                }
            }
        }
    }
    debug!("Indication loop finished");
}
