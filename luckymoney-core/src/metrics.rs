//! Metrics collection for observability
//!
//! Prometheus counters on a private registry, so several services in one
//! process (or one test binary) never collide on metric names.
//!
//! # Metrics
//!
//! - `luckymoney_envelopes_created_total` - Envelopes persisted
//! - `luckymoney_claims_total` - Successful claims
//! - `luckymoney_claim_rejections_total{reason}` - Failed claims by error kind
//! - `luckymoney_compensations_total` - Reservations cancelled after a failed create
//! - `luckymoney_envelopes_expired_total` - Envelopes expired

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::fmt;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Envelopes persisted
    pub envelopes_created: IntCounter,

    /// Successful claims
    pub claims_total: IntCounter,

    /// Failed claims, labelled by error kind
    pub claim_rejections: IntCounterVec,

    /// Compensating reservation cancels
    pub compensations_total: IntCounter,

    /// Envelopes expired
    pub envelopes_expired: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("envelopes_created", &self.envelopes_created.get())
            .field("claims_total", &self.claims_total.get())
            .field("compensations_total", &self.compensations_total.get())
            .field("envelopes_expired", &self.envelopes_expired.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let envelopes_created = IntCounter::new(
            "luckymoney_envelopes_created_total",
            "Total number of envelopes created",
        )?;
        registry.register(Box::new(envelopes_created.clone()))?;

        let claims_total =
            IntCounter::new("luckymoney_claims_total", "Total number of successful claims")?;
        registry.register(Box::new(claims_total.clone()))?;

        let claim_rejections = IntCounterVec::new(
            Opts::new(
                "luckymoney_claim_rejections_total",
                "Failed claims by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(claim_rejections.clone()))?;

        let compensations_total = IntCounter::new(
            "luckymoney_compensations_total",
            "Reservations cancelled after a failed envelope creation",
        )?;
        registry.register(Box::new(compensations_total.clone()))?;

        let envelopes_expired = IntCounter::new(
            "luckymoney_envelopes_expired_total",
            "Total number of envelopes expired",
        )?;
        registry.register(Box::new(envelopes_expired.clone()))?;

        Ok(Self {
            envelopes_created,
            claims_total,
            claim_rejections,
            compensations_total,
            envelopes_expired,
            registry,
        })
    }

    /// Record envelope creation
    pub fn record_envelope_created(&self) {
        self.envelopes_created.inc();
    }

    /// Record successful claim
    pub fn record_claim(&self) {
        self.claims_total.inc();
    }

    /// Record failed claim
    pub fn record_claim_rejection(&self, reason: &str) {
        self.claim_rejections.with_label_values(&[reason]).inc();
    }

    /// Record compensating cancel
    pub fn record_compensation(&self) {
        self.compensations_total.inc();
    }

    /// Record expiry
    pub fn record_expired(&self) {
        self.envelopes_expired.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.envelopes_created.get(), 0);
        assert_eq!(metrics.claims_total.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Private registries allow more than one collector per process
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.record_claim();
        assert_eq!(first.claims_total.get(), 1);
        assert_eq!(second.claims_total.get(), 0);
    }

    #[test]
    fn test_claim_rejections_by_reason() {
        let metrics = Metrics::new().unwrap();
        metrics.record_claim_rejection("already_claimed");
        metrics.record_claim_rejection("already_claimed");
        metrics.record_claim_rejection("expired");

        assert_eq!(
            metrics
                .claim_rejections
                .with_label_values(&["already_claimed"])
                .get(),
            2
        );
        assert_eq!(metrics.claim_rejections.with_label_values(&["expired"]).get(), 1);
    }

    #[test]
    fn test_registry_gathers_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_envelope_created();
        metrics.record_compensation();
        metrics.record_expired();

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "luckymoney_envelopes_created_total"));
    }
}
