//! Request Instrumentation
//!
//! Middleware that counts every completed request and observes its latency,
//! labelled by method, route pattern and status.

use super::api_server::AppState;
use crate::domain::ports::{MetricsStore, RequestLabels};
use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use std::time::Instant;

/// Path of the exposition endpoint, which is not instrumented.
pub const METRICS_PATH: &str = "/metrics";

/// Keeps the in-flight gauge up while a request is being served.
struct InFlight {
    metrics: Arc<dyn MetricsStore>,
}

impl InFlight {
    fn start(metrics: Arc<dyn MetricsStore>) -> Self {
        metrics.request_started();
        Self { metrics }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.request_finished();
    }
}

/// Route label for a request: the matched pattern, else the raw path.
///
/// The raw-path fallback means unmatched paths each get their own series.
pub fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.uri().path() == METRICS_PATH {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().to_string();
    let route = route_label(&request);

    let _drain = state.shutdown.request_guard();
    let _in_flight = InFlight::start(state.metrics.clone());

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let labels = RequestLabels::new(method, route, response.status().as_u16());
    state.metrics.record_request(&labels, elapsed);
    tracing::debug!(
        "{} {} -> {} in {:?}",
        labels.method,
        labels.route,
        labels.status,
        elapsed
    );

    response
}
