//! Prometheus metrics for import-service.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

struct ImportMetrics {
    registry: Registry,
    entries_inserted: IntCounterVec,
    entry_write_failures: IntCounterVec,
    cache_invalidations: IntCounterVec,
    suggestion_pairs: IntCounterVec,
    suggestion_streams: IntCounterVec,
    db_query_duration: HistogramVec,
    sessions_created: IntCounter,
}

static METRICS: OnceLock<ImportMetrics> = OnceLock::new();

/// Initialize all metrics. Later calls are no-ops.
pub fn init_metrics() {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let entries_inserted = IntCounterVec::new(
            Opts::new("tracker_entries_inserted_total", "Tracker entries written by team"),
            &["team_id"],
        )
        .expect("Failed to create tracker_entries_inserted_total metric");

        let entry_write_failures = IntCounterVec::new(
            Opts::new(
                "tracker_entry_write_failures_total",
                "Failed tracker entry batch writes by team",
            ),
            &["team_id"],
        )
        .expect("Failed to create tracker_entry_write_failures_total metric");

        let cache_invalidations = IntCounterVec::new(
            Opts::new("cache_tag_invalidations_total", "Cache tag invalidations by outcome"),
            &["status"],
        )
        .expect("Failed to create cache_tag_invalidations_total metric");

        let suggestion_pairs = IntCounterVec::new(
            Opts::new(
                "mapping_suggestion_pairs_total",
                "Suggested field/column pairs by outcome",
            ),
            &["outcome"],
        )
        .expect("Failed to create mapping_suggestion_pairs_total metric");

        let suggestion_streams = IntCounterVec::new(
            Opts::new(
                "mapping_suggestion_streams_total",
                "Suggestion streams by how they ended",
            ),
            &["outcome"],
        )
        .expect("Failed to create mapping_suggestion_streams_total metric");

        let db_query_duration = HistogramVec::new(
            HistogramOpts::new("db_query_duration_seconds", "Database query duration in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["query"],
        )
        .expect("Failed to create db_query_duration_seconds metric");

        let sessions_created = IntCounter::new(
            "import_sessions_created_total",
            "Import mapping sessions created",
        )
        .expect("Failed to create import_sessions_created_total metric");

        registry
            .register(Box::new(entries_inserted.clone()))
            .expect("Failed to register tracker_entries_inserted_total");
        registry
            .register(Box::new(entry_write_failures.clone()))
            .expect("Failed to register tracker_entry_write_failures_total");
        registry
            .register(Box::new(cache_invalidations.clone()))
            .expect("Failed to register cache_tag_invalidations_total");
        registry
            .register(Box::new(suggestion_pairs.clone()))
            .expect("Failed to register mapping_suggestion_pairs_total");
        registry
            .register(Box::new(suggestion_streams.clone()))
            .expect("Failed to register mapping_suggestion_streams_total");
        registry
            .register(Box::new(db_query_duration.clone()))
            .expect("Failed to register db_query_duration_seconds");
        registry
            .register(Box::new(sessions_created.clone()))
            .expect("Failed to register import_sessions_created_total");

        ImportMetrics {
            registry,
            entries_inserted,
            entry_write_failures,
            cache_invalidations,
            suggestion_pairs,
            suggestion_streams,
            db_query_duration,
            sessions_created,
        }
    });
}

/// Render all metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let Some(metrics) = METRICS.get() else {
        return "# Metrics not initialized\n".to_string();
    };

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&metrics.registry.gather(), &mut buffer).ok();
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_entries_inserted(team_id: &str, count: usize) {
    if let Some(m) = METRICS.get() {
        m.entries_inserted
            .with_label_values(&[team_id])
            .inc_by(count as u64);
    }
}

pub fn record_entry_write_failure(team_id: &str) {
    if let Some(m) = METRICS.get() {
        m.entry_write_failures.with_label_values(&[team_id]).inc();
    }
}

pub fn record_cache_invalidation(ok: bool) {
    if let Some(m) = METRICS.get() {
        let status = if ok { "ok" } else { "error" };
        m.cache_invalidations.with_label_values(&[status]).inc();
    }
}

pub fn record_suggestion_pairs(applied: usize, rejected: usize) {
    if let Some(m) = METRICS.get() {
        m.suggestion_pairs
            .with_label_values(&["applied"])
            .inc_by(applied as u64);
        m.suggestion_pairs
            .with_label_values(&["rejected"])
            .inc_by(rejected as u64);
    }
}

pub fn record_suggestion_stream(outcome: &str) {
    if let Some(m) = METRICS.get() {
        m.suggestion_streams.with_label_values(&[outcome]).inc();
    }
}

pub fn record_session_created() {
    if let Some(m) = METRICS.get() {
        m.sessions_created.inc();
    }
}

/// Start a timer for a database query; the duration is observed on drop.
pub fn db_timer(query: &str) -> Option<prometheus::HistogramTimer> {
    METRICS
        .get()
        .map(|m| m.db_query_duration.with_label_values(&[query]).start_timer())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_rendered_output() {
        init_metrics();
        init_metrics();

        record_entries_inserted("org_metrics", 2);
        record_suggestion_pairs(1, 3);

        let output = get_metrics();
        assert!(output.contains("tracker_entries_inserted_total{team_id=\"org_metrics\"}"));
        assert!(output.contains("mapping_suggestion_pairs_total"));
    }
}
