use tracing::trace;

// Counters are emitted as trace events; the Prometheus handle only renders
// what the recorder has seen.

pub fn inc_requests(route: &'static str) {
    trace!(target = "lister.metrics", route = route, "requests_total_inc");
}

pub fn upstream_elapsed(operation: &'static str, elapsed_ms: u128) {
    trace!(
        target = "lister.metrics",
        operation = operation,
        elapsed_ms = elapsed_ms as u64,
        "upstream_elapsed"
    );
}

pub fn credential_event(event: &'static str) {
    trace!(target = "lister.metrics", event = event, "credential_event");
}
