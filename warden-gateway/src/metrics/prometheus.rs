use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use warden_policy_engine::{AdmissionObserver, DecisionRecord, ReloadRecord};

/// Prometheus metrics for the admission pipeline.
///
/// Fed by the pipeline through [`AdmissionObserver`]; one decision record per
/// admission call, one reload record per reload attempt.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    /// Decision counter: warden_admission_decisions_total{allowed, cause}
    decisions_total: CounterVec,

    /// Decision latency: warden_admission_duration_seconds
    decision_duration: Histogram,

    /// Reload counter: warden_policy_reloads_total{result}
    reloads_total: CounterVec,

    /// Policies excluded from reload batches: warden_policy_rejected_total
    rejected_total: IntCounter,

    /// Generation of the enforced policy set: warden_policy_set_generation
    generation: Gauge,

    /// Policies in the enforced policy set: warden_policies_loaded
    policies_loaded: Gauge,
}

impl Metrics {
    /// Create a new metrics registry with all series registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let decisions_total = CounterVec::new(
            Opts::new("warden_admission_decisions_total", "Total admission decisions"),
            &["allowed", "cause"],
        )
        .expect("failed to create decisions_total counter");

        // Buckets from 0.5ms up to past the default deadline
        let decision_duration = Histogram::with_opts(
            HistogramOpts::new(
                "warden_admission_duration_seconds",
                "Admission decision latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0,
            ]),
        )
        .expect("failed to create decision_duration histogram");

        let reloads_total = CounterVec::new(
            Opts::new("warden_policy_reloads_total", "Total policy reload attempts"),
            &["result"],
        )
        .expect("failed to create reloads_total counter");

        let rejected_total = IntCounter::new(
            "warden_policy_rejected_total",
            "Policies excluded from reload batches",
        )
        .expect("failed to create rejected_total counter");

        let generation = Gauge::new(
            "warden_policy_set_generation",
            "Generation of the enforced policy set",
        )
        .expect("failed to create generation gauge");

        let policies_loaded = Gauge::new(
            "warden_policies_loaded",
            "Policies in the enforced policy set",
        )
        .expect("failed to create policies_loaded gauge");

        registry
            .register(Box::new(decisions_total.clone()))
            .expect("failed to register decisions_total");
        registry
            .register(Box::new(decision_duration.clone()))
            .expect("failed to register decision_duration");
        registry
            .register(Box::new(reloads_total.clone()))
            .expect("failed to register reloads_total");
        registry
            .register(Box::new(rejected_total.clone()))
            .expect("failed to register rejected_total");
        registry
            .register(Box::new(generation.clone()))
            .expect("failed to register generation");
        registry
            .register(Box::new(policies_loaded.clone()))
            .expect("failed to register policies_loaded");

        Self {
            registry: Arc::new(registry),
            decisions_total,
            decision_duration,
            reloads_total,
            rejected_total,
            generation,
            policies_loaded,
        }
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("failed to encode metrics");
        String::from_utf8(buffer).expect("metrics are not valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionObserver for Metrics {
    fn decision(&self, record: &DecisionRecord) {
        let allowed = if record.allowed { "true" } else { "false" };
        self.decisions_total
            .with_label_values(&[allowed, record.cause.as_str()])
            .inc();
        self.decision_duration.observe(record.latency.as_secs_f64());
    }

    fn reload(&self, record: &ReloadRecord) {
        let result = if record.success { "success" } else { "failure" };
        self.reloads_total.with_label_values(&[result]).inc();
        self.rejected_total.inc_by(record.rejected.len() as u64);

        if let Some(generation) = record.generation {
            self.generation.set(generation as f64);
            self.policies_loaded.set(record.loaded as f64);
        }
    }
}
