//! Provider Metrics
//!
//! Cache-line aligned counters updated on every request; the host binary
//! exports snapshots of them to Prometheus.

use crate::error::{Error, FaultCategory};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Request Counters (Cache-Line Aligned)
// =============================================================================

/// Request counters, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct RequestMetrics {
    /// Instance and association enumerations
    pub enumerations: AtomicU64,
    /// Single instance lookups
    pub gets: AtomicU64,
    /// Service method invocations
    pub invocations: AtomicU64,
    /// Setting creations, modifications and deletions
    pub setting_changes: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<RequestMetrics>() <= CACHE_LINE_SIZE);

impl Default for RequestMetrics {
    fn default() -> Self {
        Self {
            enumerations: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            setting_changes: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 24],
        }
    }
}

impl RequestMetrics {
    #[inline]
    fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }
}

/// Fault counters per CIM category
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct FaultMetrics {
    pub not_found: AtomicU64,
    pub invalid_parameter: AtomicU64,
    pub not_supported: AtomicU64,
    pub failed: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<FaultMetrics>() <= CACHE_LINE_SIZE);

impl FaultMetrics {
    fn counter(&self, category: FaultCategory) -> &AtomicU64 {
        match category {
            FaultCategory::NotFound => &self.not_found,
            FaultCategory::InvalidParameter => &self.invalid_parameter,
            FaultCategory::NotSupported => &self.not_supported,
            FaultCategory::Failed => &self.failed,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time snapshot of provider metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub enumerations: u64,
    pub gets: u64,
    pub invocations: u64,
    pub setting_changes: u64,
    pub faults_not_found: u64,
    pub faults_invalid_parameter: u64,
    pub faults_not_supported: u64,
    pub faults_failed: u64,
    pub indications_enqueued: u64,
}

impl MetricsSnapshot {
    pub fn total_faults(&self) -> u64 {
        self.faults_not_found + self.faults_invalid_parameter + self.faults_not_supported + self.faults_failed
    }

    /// Share of requests that faulted (0.0 to 1.0)
    pub fn fault_ratio(&self) -> f64 {
        let total = self.enumerations + self.gets + self.invocations + self.setting_changes;
        if total == 0 {
            0.0
        } else {
            self.total_faults() as f64 / total as f64
        }
    }
}

// =============================================================================
// Provider Metrics
// =============================================================================

/// Global metrics container of one provider context
#[derive(Debug, Default)]
pub struct ProviderMetrics {
    pub requests: RequestMetrics,
    pub faults: FaultMetrics,
    pub indications: AtomicU64,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_enumeration(&self) {
        self.requests.bump(&self.requests.enumerations);
    }

    #[inline]
    pub fn record_get(&self) {
        self.requests.bump(&self.requests.gets);
    }

    #[inline]
    pub fn record_invocation(&self) {
        self.requests.bump(&self.requests.invocations);
    }

    #[inline]
    pub fn record_setting_change(&self) {
        self.requests.bump(&self.requests.setting_changes);
    }

    #[inline]
    pub fn record_indication(&self) {
        self.indications.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a fault under its category and log it
    pub fn record_fault(&self, error: &Error) {
        self.faults
            .counter(error.category())
            .fetch_add(1, Ordering::Relaxed);
        error.trace();
    }

    /// Pass a result through, counting its fault if any
    pub fn observe<T>(&self, result: crate::Result<T>) -> crate::Result<T> {
        if let Err(e) = &result {
            self.record_fault(e);
        }
        result
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enumerations: self.requests.enumerations.load(Ordering::Relaxed),
            gets: self.requests.gets.load(Ordering::Relaxed),
            invocations: self.requests.invocations.load(Ordering::Relaxed),
            setting_changes: self.requests.setting_changes.load(Ordering::Relaxed),
            faults_not_found: self.faults.not_found.load(Ordering::Relaxed),
            faults_invalid_parameter: self.faults.invalid_parameter.load(Ordering::Relaxed),
            faults_not_supported: self.faults.not_supported.load(Ordering::Relaxed),
            faults_failed: self.faults.failed.load(Ordering::Relaxed),
            indications_enqueued: self.indications.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<RequestMetrics>(), CACHE_LINE_SIZE);
        assert_eq!(std::mem::align_of::<FaultMetrics>(), CACHE_LINE_SIZE);
    }

    #[test]
    fn test_fault_counting() {
        let metrics = ProviderMetrics::new();
        metrics.record_enumeration();
        metrics.record_get();
        metrics.record_fault(&Error::DeviceNotFound {
            device: "/dev/sdz".into(),
        });
        let result: crate::Result<()> = Err(Error::Failed("engine gone".into()));
        assert!(metrics.observe(result).is_err());
        assert!(metrics.observe(Ok(1)).is_ok());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.faults_not_found, 1);
        assert_eq!(snapshot.faults_failed, 1);
        assert_eq!(snapshot.total_faults(), 2);
        assert!((snapshot.fault_ratio() - 1.0).abs() < f64::EPSILON);
        assert!(metrics.requests.last_update_ms.load(Ordering::Relaxed) > 0);
    }
}
