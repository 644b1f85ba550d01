// ABOUTME: Metrics helpers over the `metrics` facade.
// ABOUTME: Counters and gauges for engine and presence activity.

/// Record a message delivered to the handler and acknowledged.
pub fn record_message_processed(room_id: &str) {
    metrics::counter!("parley_messages_processed_total", "room" => room_id.to_string())
        .increment(1);
}

/// Record a handler failure reported to the platform.
pub fn record_message_failed(room_id: &str) {
    metrics::counter!("parley_messages_failed_total", "room" => room_id.to_string()).increment(1);
}

/// Record a duplicate delivery suppressed by the dedup cache.
pub fn record_duplicate_skipped(room_id: &str) {
    metrics::counter!("parley_duplicates_skipped_total", "room" => room_id.to_string())
        .increment(1);
}

/// Record a message abandoned after exhausting its retry budget.
pub fn record_retry_exhausted(room_id: &str) {
    metrics::counter!("parley_retries_exhausted_total", "room" => room_id.to_string())
        .increment(1);
}

/// Record completion of startup reconciliation for a room.
pub fn record_sync_complete(room_id: &str, backlog_processed: u64) {
    metrics::counter!("parley_backlog_messages_total", "room" => room_id.to_string())
        .increment(backlog_processed);
    metrics::counter!("parley_syncs_completed_total").increment(1);
}

/// Track the number of rooms with a live engine.
pub fn set_active_rooms(count: usize) {
    metrics::gauge!("parley_active_rooms").set(count as f64);
}

/// Record time spent inside the user handler.
pub fn record_handler_duration(seconds: f64) {
    metrics::histogram!("parley_handler_duration_seconds").record(seconds);
}
