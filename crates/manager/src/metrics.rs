//! Prometheus metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `certkeeper_batches_total` | Counter | `outcome` (`completed`, `panicked`) |
//! | `certkeeper_records_processed_total` | Counter | – |
//! | `certkeeper_transitions_total` | Counter | `from`, `to` |
//! | `certkeeper_transition_failures_total` | Counter | `step` (`acquire_challenge`, `finalize_challenge`) |
//!
//! Exposed in text format on `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::acme::{BatchReport, IssueStatus};

/// Lifecycle metrics registered in a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    batches_total: IntCounterVec,
    records_processed_total: IntCounter,
    transitions_total: IntCounterVec,
    transition_failures_total: IntCounterVec,
}

impl Metrics {
    /// Create and register all metrics
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let batches_total = IntCounterVec::new(
            Opts::new("certkeeper_batches_total", "Scheduler batches run"),
            &["outcome"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let records_processed_total = IntCounter::new(
            "certkeeper_records_processed_total",
            "Domain records examined by scheduler batches",
        )?;
        registry.register(Box::new(records_processed_total.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "certkeeper_transitions_total",
                "Committed issuance state transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let transition_failures_total = IntCounterVec::new(
            Opts::new(
                "certkeeper_transition_failures_total",
                "Failed issuance steps",
            ),
            &["step"],
        )?;
        registry.register(Box::new(transition_failures_total.clone()))?;

        Ok(Self {
            registry,
            batches_total,
            records_processed_total,
            transitions_total,
            transition_failures_total,
        })
    }

    /// Count a finished batch
    pub fn batch_completed(&self, report: &BatchReport) {
        self.batches_total.with_label_values(&["completed"]).inc();
        self.records_processed_total.inc_by(report.selected as u64);
    }

    /// Count a batch aborted by a panic
    pub fn batch_panicked(&self) {
        self.batches_total.with_label_values(&["panicked"]).inc();
    }

    /// Count a committed state change
    pub fn transition(&self, from: IssueStatus, to: IssueStatus) {
        self.transitions_total
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    /// Count a failed acquisition
    pub fn acquire_failed(&self) {
        self.transition_failures_total
            .with_label_values(&["acquire_challenge"])
            .inc();
    }

    /// Count a failed finalization, including an issuance that could not
    /// be recorded
    pub fn finalize_failed(&self) {
        self.transition_failures_total
            .with_label_values(&["finalize_challenge"])
            .inc();
    }

    /// Render every metric in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.transition(IssueStatus::Pending, IssueStatus::Challenging);
        metrics.finalize_failed();
        metrics.finalize_failed();
        metrics.acquire_failed();
        metrics.batch_panicked();

        let text = metrics.encode().unwrap();

        assert!(text.contains(
            "certkeeper_transitions_total{from=\"pending\",to=\"challenging\"} 1"
        ));
        assert!(text.contains(
            "certkeeper_transition_failures_total{step=\"finalize_challenge\"} 2"
        ));
        assert!(text.contains(
            "certkeeper_transition_failures_total{step=\"acquire_challenge\"} 1"
        ));
        assert!(!text.contains("step=\"idle\""));
        assert!(text.contains("certkeeper_batches_total{outcome=\"panicked\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.batch_panicked();

        assert!(!second.encode().unwrap().contains("outcome=\"panicked\"} 1"));
    }
}
