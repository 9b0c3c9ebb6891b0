//! Prometheus metric handles for blockwatch.
//!
//! All collectors live under the `missed_blocks_checker_` prefix and hang
//! off one explicitly constructed [`Metrics`] handle with its own registry.
//! The handle is built once at startup and passed by reference; nothing
//! here is a process-global.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

const PREFIX: &str = "missed_blocks_checker_";

/// Central metrics handle.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    rpc_queries: IntCounterVec,
    rpc_query_duration: HistogramVec,
    reporter_queries: IntCounterVec,
    reporter_errors: IntCounterVec,
    last_block_height: IntGaugeVec,
    events: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rpc_queries = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}rpc_queries_total"),
                "RPC queries issued, by endpoint and outcome",
            ),
            &["chain", "endpoint", "query_type", "success"],
        )?;
        let rpc_query_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}rpc_query_duration_seconds"),
                "RPC query latency in seconds",
            ),
            &["chain", "endpoint", "query_type"],
        )?;
        let reporter_queries = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}reporter_queries_total"),
                "Interactive reporter queries received",
            ),
            &["chain", "reporter", "query"],
        )?;
        let reporter_errors = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}reporter_errors_total"),
                "Reporter send failures",
            ),
            &["chain", "reporter"],
        )?;
        let last_block_height = IntGaugeVec::new(
            Opts::new(
                format!("{PREFIX}last_block_height"),
                "Height of the last block received over websocket",
            ),
            &["chain"],
        )?;
        let events = IntCounterVec::new(
            Opts::new(format!("{PREFIX}events_total"), "Domain events emitted"),
            &["chain", "type"],
        )?;

        registry.register(Box::new(rpc_queries.clone()))?;
        registry.register(Box::new(rpc_query_duration.clone()))?;
        registry.register(Box::new(reporter_queries.clone()))?;
        registry.register(Box::new(reporter_errors.clone()))?;
        registry.register(Box::new(last_block_height.clone()))?;
        registry.register(Box::new(events.clone()))?;

        Ok(Self {
            registry,
            rpc_queries,
            rpc_query_duration,
            reporter_queries,
            reporter_errors,
            last_block_height,
            events,
        })
    }

    pub fn record_rpc_query(
        &self,
        chain: &str,
        endpoint: &str,
        query_type: &str,
        success: bool,
        duration: Duration,
    ) {
        let success_label = if success { "true" } else { "false" };
        self.rpc_queries
            .with_label_values(&[chain, endpoint, query_type, success_label])
            .inc();
        self.rpc_query_duration
            .with_label_values(&[chain, endpoint, query_type])
            .observe(duration.as_secs_f64());
    }

    pub fn record_reporter_query(&self, chain: &str, reporter: &str, query: &str) {
        self.reporter_queries
            .with_label_values(&[chain, reporter, query])
            .inc();
    }

    pub fn record_reporter_error(&self, chain: &str, reporter: &str) {
        self.reporter_errors.with_label_values(&[chain, reporter]).inc();
    }

    pub fn set_last_block_height(&self, chain: &str, height: i64) {
        self.last_block_height.with_label_values(&[chain]).set(height);
    }

    pub fn record_event(&self, chain: &str, event_type: &str) {
        self.events.with_label_values(&[chain, event_type]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_collectors_register_under_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rpc_query(
            "cosmoshub",
            "https://rpc-a",
            "block",
            true,
            Duration::from_millis(120),
        );
        metrics.record_reporter_query("cosmoshub", "telegram", "subscribe");
        metrics.record_reporter_error("cosmoshub", "discord");
        metrics.set_last_block_height("cosmoshub", 123_456);
        metrics.record_event("cosmoshub", "ValidatorJailed");

        let text = metrics.gather_text();
        assert!(text.contains("missed_blocks_checker_rpc_queries_total"));
        assert!(text.contains("missed_blocks_checker_rpc_query_duration_seconds"));
        assert!(text.contains("missed_blocks_checker_reporter_queries_total"));
        assert!(text.contains("missed_blocks_checker_reporter_errors_total"));
        assert!(text.contains("missed_blocks_checker_last_block_height"));
        assert!(text.contains("missed_blocks_checker_events_total"));
        assert!(text.contains("123456"));
    }

    #[test]
    fn success_label_is_boolean_text() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rpc_query("c", "e", "q", false, Duration::ZERO);
        let text = metrics.gather_text();
        assert!(text.contains("success=\"false\""));
    }
}
