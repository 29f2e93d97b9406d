use tracing::trace;

// Lightweight metrics helpers. Trace-based so the Prometheus recorder stays
// optional in local runs.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "subasta.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "subasta.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
