//! Metrics Store Port
//!
//! Defines the interface for recording and exposing runtime metrics.

use crate::domain::value_objects::ConnectionState;
use std::time::Duration;

/// Label tuple shared by the request counter and the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestLabels {
    pub method: String,
    /// Matched route pattern, or the raw path when nothing matched
    pub route: String,
    pub status: u16,
}

impl RequestLabels {
    pub fn new(method: impl Into<String>, route: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            status,
        }
    }
}

/// Process-wide metrics registry.
///
/// Constructed once at startup and shared by handle with the request
/// instrumentation, the connection manager and the exposition endpoint.
pub trait MetricsStore: Send + Sync {
    /// Record one completed request: count it and observe its latency.
    fn record_request(&self, labels: &RequestLabels, elapsed: Duration);

    /// A request started being served.
    fn request_started(&self);

    /// A request finished being served.
    fn request_finished(&self);

    /// The connection handle moved to `state`.
    fn record_connection_state(&self, state: ConnectionState);

    /// A connect attempt finished.
    fn record_connect_attempt(&self, success: bool);

    /// A connected handle was lost and a reconnect cycle began.
    fn record_reconnect(&self);

    /// Render everything in the Prometheus text exposition format.
    fn render(&self) -> String;
}
