//! Prometheus metrics for the ladder worker (§10.5).
//!
//! One registry, created once at process start and shared (via `Arc`)
//! between the orchestrator, executor, and the metrics HTTP server. Metric
//! families mirror the operator-visible events named in §7: submits,
//! cancels, retries, STP triggers, settlement outcomes, and live order
//! counts per side.

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use tracing::info;

/// Central registry for all Prometheus metrics this worker exposes.
#[derive(Clone)]
pub struct LadderMetrics {
    registry: Registry,
    pub submits_total: IntCounterVec,
    pub cancels_total: IntCounterVec,
    pub cancel_retries_total: IntCounterVec,
    pub stp_triggers_total: IntCounterVec,
    pub settlement_outcomes_total: IntCounterVec,
    pub live_orders: IntGaugeVec,
    pub replacement_cycle_seconds: Histogram,
    pub price_ticks_total: IntGauge,
}

impl LadderMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let submits_total = IntCounterVec::new(
            Opts::new("submits_total", "Total order submit attempts by result").namespace("ladder_mm"),
            &["result"],
        )?;
        registry.register(Box::new(submits_total.clone()))?;

        let cancels_total = IntCounterVec::new(
            Opts::new("cancels_total", "Total order cancel attempts by result").namespace("ladder_mm"),
            &["result"],
        )?;
        registry.register(Box::new(cancels_total.clone()))?;

        let cancel_retries_total = IntCounterVec::new(
            Opts::new("cancel_retries_total", "Total cancel retries and their outcome").namespace("ladder_mm"),
            &["result"],
        )?;
        registry.register(Box::new(cancel_retries_total.clone()))?;

        let stp_triggers_total = IntCounterVec::new(
            Opts::new("stp_triggers_total", "Self-trade-prevention peel events by side").namespace("ladder_mm"),
            &["side"],
        )?;
        registry.register(Box::new(stp_triggers_total.clone()))?;

        let settlement_outcomes_total = IntCounterVec::new(
            Opts::new("settlement_outcomes_total", "Settlement planner outcomes").namespace("ladder_mm"),
            &["outcome"],
        )?;
        registry.register(Box::new(settlement_outcomes_total.clone()))?;

        let live_orders = IntGaugeVec::new(
            Opts::new("live_orders", "Ladder slots currently believed live, by side").namespace("ladder_mm"),
            &["side"],
        )?;
        registry.register(Box::new(live_orders.clone()))?;

        let replacement_cycle_seconds = Histogram::with_opts(
            HistogramOpts::new("replacement_cycle_seconds", "Wall-clock duration of one replacement pipeline run")
                .namespace("ladder_mm")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        )?;
        registry.register(Box::new(replacement_cycle_seconds.clone()))?;

        let price_ticks_total = IntGauge::with_opts(
            Opts::new("price_ticks_total", "Count of distinct index price ticks observed").namespace("ladder_mm"),
        )?;
        registry.register(Box::new(price_ticks_total.clone()))?;

        info!("prometheus metrics registry initialized");

        Ok(Self {
            registry,
            submits_total,
            cancels_total,
            cancel_retries_total,
            stp_triggers_total,
            settlement_outcomes_total,
            live_orders,
            replacement_cycle_seconds,
            price_ticks_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_live_orders(&self, bid_count: i64, ask_count: i64) {
        self.live_orders.with_label_values(&["bid"]).set(bid_count);
        self.live_orders.with_label_values(&["ask"]).set(ask_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn registers_without_name_collisions() {
        let metrics = LadderMetrics::new().unwrap();
        metrics.submits_total.with_label_values(&["success"]).inc();
        metrics.set_live_orders(2, 1);

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metrics.registry().gather(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("ladder_mm_submits_total"));
        assert!(text.contains("ladder_mm_live_orders"));
    }
}
