use tracing::trace;

// Trace-level counters; the Prometheus recorder in main only renders them
// when a metrics layer is attached.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "appraisal.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "appraisal.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn degraded(stage: &'static str, reason: &'static str) {
    trace!(
        target = "appraisal.metrics",
        stage = stage,
        reason = reason,
        "stage_degraded_inc"
    );
}
