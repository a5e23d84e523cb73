/// Metrics and telemetry for EduHub
///
/// Provides Prometheus-compatible counters for:
/// - Redemption outcomes and compensation runs
/// - Session elevation decisions
/// - Expiry sweep results
/// - Rate limit denials

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    /// Redemptions by outcome
    pub static ref REDEMPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "eduhub_redemptions_total",
        "Activation code redemptions by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Compensation runs by outcome (clean / partial)
    pub static ref COMPENSATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "eduhub_compensations_total",
        "Redemption compensation runs by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Edu elevation attempts by result
    pub static ref ELEVATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "eduhub_elevations_total",
        "Personal to edu session elevations by result",
        &["result"]
    )
    .unwrap();

    /// Mailboxes handled by the expiry sweep
    pub static ref SWEEP_MAILBOXES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "eduhub_sweep_mailboxes_total",
        "Mailboxes processed by the expiry sweep by result",
        &["result"]
    )
    .unwrap();

    /// Requests refused by the per-route windows
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "eduhub_rate_limited_total",
        "Requests refused by per-route rate limits",
        &["route"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    // touch lazies so families show up before first use
    lazy_static::initialize(&REDEMPTIONS_TOTAL);
    lazy_static::initialize(&COMPENSATIONS_TOTAL);
    lazy_static::initialize(&ELEVATIONS_TOTAL);
    lazy_static::initialize(&SWEEP_MAILBOXES_TOTAL);
    lazy_static::initialize(&RATE_LIMITED_TOTAL);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        REDEMPTIONS_TOTAL.with_label_values(&["success"]).inc();
        let metrics = render_metrics();
        assert!(metrics.contains("eduhub_redemptions_total"));
    }
}
