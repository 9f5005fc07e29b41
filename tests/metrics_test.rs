//! Unit tests for metrics.rs module

use std::time::Duration;
use ground_game::metrics::MetricsCollector;

#[test]
fn test_metric_names_are_prefixed() {
    let collector = MetricsCollector::default();
    let names = [
        collector.visits_ingested_total,
        collector.visit_ingest_duration,
        collector.address_conflicts_total,
        collector.points_awarded_total,
        collector.enqueue_failures_total,
        collector.aggregations_total,
        collector.aggregation_duration,
        collector.queue_depth,
    ];

    for name in names {
        assert!(name.starts_with("ground_game_"), "unprefixed metric: {}", name);
    }
}

#[test]
fn test_metric_names_are_unique() {
    let collector = MetricsCollector::default();
    let mut names = vec![
        collector.visits_ingested_total,
        collector.visit_ingest_duration,
        collector.address_conflicts_total,
        collector.points_awarded_total,
        collector.enqueue_failures_total,
        collector.aggregations_total,
        collector.aggregation_duration,
        collector.queue_depth,
    ];
    let count = names.len();
    names.sort_unstable();
    names.dedup();

    assert_eq!(names.len(), count);
}

#[test]
fn test_recording_without_installed_recorder() {
    let collector = MetricsCollector::default();

    collector.record_visit_ingested("ok", Duration::from_millis(12));
    collector.record_visit_ingested("VALIDATION_FAILED", Duration::ZERO);
    collector.record_address_conflict(1);
    collector.record_points_awarded(7);
    collector.record_points_awarded(-3);
    collector.record_enqueue_failure();
    collector.record_aggregation(true, Duration::from_millis(4));
    collector.set_queue_depth(0);
}

#[test]
fn test_collector_is_copy() {
    let collector = MetricsCollector::default();
    let copied = collector;

    assert_eq!(collector.queue_depth, copied.queue_depth);
}
