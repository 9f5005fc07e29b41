use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names recorded by the ingestion pipeline and the aggregator.
///
/// Recording is a no-op until the embedding process installs a recorder.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    pub visits_ingested_total: &'static str,
    pub visit_ingest_duration: &'static str,
    pub address_conflicts_total: &'static str,
    pub points_awarded_total: &'static str,
    pub enqueue_failures_total: &'static str,

    pub aggregations_total: &'static str,
    pub aggregation_duration: &'static str,
    pub queue_depth: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            visits_ingested_total: "ground_game_visits_ingested_total",
            visit_ingest_duration: "ground_game_visit_ingest_duration_seconds",
            address_conflicts_total: "ground_game_address_conflicts_total",
            points_awarded_total: "ground_game_points_awarded_total",
            enqueue_failures_total: "ground_game_enqueue_failures_total",

            aggregations_total: "ground_game_aggregations_total",
            aggregation_duration: "ground_game_aggregation_duration_seconds",
            queue_depth: "ground_game_queue_depth",
        }
    }
}

impl MetricsCollector {
    /// Record the outcome of one ingestion ("ok" or an error identifier)
    pub fn record_visit_ingested(&self, outcome: &'static str, duration: Duration) {
        counter!(self.visits_ingested_total, "outcome" => outcome).increment(1);
        histogram!(self.visit_ingest_duration, "outcome" => outcome).record(duration.as_secs_f64());
    }

    pub fn record_address_conflict(&self, attempt: u32) {
        counter!(self.address_conflicts_total, "attempt" => attempt.to_string()).increment(1);
    }

    pub fn record_points_awarded(&self, points: i64) {
        counter!(self.points_awarded_total).increment(u64::try_from(points).unwrap_or(0));
    }

    pub fn record_enqueue_failure(&self) {
        counter!(self.enqueue_failures_total).increment(1);
    }

    pub fn record_aggregation(&self, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };
        counter!(self.aggregations_total, "status" => status).increment(1);
        histogram!(self.aggregation_duration).record(duration.as_secs_f64());
    }

    pub fn set_queue_depth(&self, depth: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(self.queue_depth).set(depth as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.visits_ingested_total, "ground_game_visits_ingested_total");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::default();
        collector.record_visit_ingested("ok", Duration::from_millis(3));
        collector.record_points_awarded(-1);
        collector.record_aggregation(false, Duration::ZERO);
    }
}
