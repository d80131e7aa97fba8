//! Lightweight metrics helpers for Kinetix.
//!
//! Convenience functions and RAII timers wrapping the `metrics` crate macros. No exporter
//! is embedded; the application installs whichever recorder it wants and these calls are
//! no-ops until it does.
//!
//! Provided metrics:
//! * `kinetix_requests_total` (counter, labels: method, status)
//! * `kinetix_request_duration_seconds` (histogram, labels: method)
//! * `kinetix_forward_total` (counter, labels: service, outcome)
//! * `kinetix_forward_duration_seconds` (histogram, labels: service)
//! * `kinetix_routing_table_rebuilds_total` (counter, labels: outcome)
//! * `kinetix_routing_table_routes` (gauge)
//! * `kinetix_revoked_tokens` (gauge)
//!
//! Request paths are never used as labels.
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const KINETIX_REQUESTS_TOTAL: &str = "kinetix_requests_total";
pub const KINETIX_REQUEST_DURATION_SECONDS: &str = "kinetix_request_duration_seconds";
pub const KINETIX_FORWARD_TOTAL: &str = "kinetix_forward_total";
pub const KINETIX_FORWARD_DURATION_SECONDS: &str = "kinetix_forward_duration_seconds";
pub const KINETIX_ROUTING_TABLE_REBUILDS_TOTAL: &str = "kinetix_routing_table_rebuilds_total";
pub const KINETIX_ROUTING_TABLE_ROUTES: &str = "kinetix_routing_table_routes";
pub const KINETIX_REVOKED_TOKENS: &str = "kinetix_revoked_tokens";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        KINETIX_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        KINETIX_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        KINETIX_FORWARD_TOTAL,
        Unit::Count,
        "Requests forwarded to registered services, by outcome."
    );
    describe_histogram!(
        KINETIX_FORWARD_DURATION_SECONDS,
        Unit::Seconds,
        "Time until a registered service answered a forwarded request."
    );
    describe_counter!(
        KINETIX_ROUTING_TABLE_REBUILDS_TOTAL,
        Unit::Count,
        "Routing table regenerations, by outcome."
    );
    describe_gauge!(
        KINETIX_ROUTING_TABLE_ROUTES,
        "Number of routes in the currently installed routing table."
    );
    describe_gauge!(
        KINETIX_REVOKED_TOKENS,
        "Number of revoked tokens still remembered by the ledger."
    );
});

/// Outcome label for forwards and rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        KINETIX_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(method: &str, duration: std::time::Duration) {
    histogram!(
        KINETIX_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_forward_total(service: &str, outcome: Outcome) {
    counter!(
        KINETIX_FORWARD_TOTAL,
        "service" => service.to_string(),
        "outcome" => outcome.as_label()
    )
    .increment(1);
}

pub fn record_routing_table_rebuild(outcome: Outcome, routes: Option<usize>) {
    counter!(KINETIX_ROUTING_TABLE_REBUILDS_TOTAL, "outcome" => outcome.as_label()).increment(1);
    if let Some(routes) = routes {
        gauge!(KINETIX_ROUTING_TABLE_ROUTES).set(routes as f64);
    }
}

pub fn set_revoked_tokens(count: usize) {
    gauge!(KINETIX_REVOKED_TOKENS).set(count as f64);
}

/// RAII helper measuring how long a registered service takes to answer.
pub struct ForwardTimer {
    start: Instant,
    service: String,
}

impl ForwardTimer {
    pub fn new(service: &str) -> Self {
        Self {
            start: Instant::now(),
            service: service.to_string(),
        }
    }
}

impl Drop for ForwardTimer {
    fn drop(&mut self) {
        histogram!(
            KINETIX_FORWARD_DURATION_SECONDS,
            "service" => self.service.clone()
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::info!("Kinetix metric descriptions registered");
    Ok(())
}
