//! Prometheus Metrics Store
//!
//! Implements MetricsStore with Prometheus text exposition.

use crate::domain::ports::{MetricsStore, RequestLabels};
use crate::domain::value_objects::ConnectionState;
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Upper bounds (seconds) of the request latency histogram.
pub const LATENCY_BUCKETS: [f64; 6] = [0.1, 0.3, 0.5, 1.0, 2.0, 5.0];

/// Counter and histogram for one label tuple.
#[derive(Debug, Default)]
pub struct RequestSeries {
    /// Completed requests
    pub count: AtomicU64,
    /// Observations per bucket (not cumulative); the last slot is `+Inf`
    buckets: [AtomicU64; LATENCY_BUCKETS.len() + 1],
    /// Sum of observed latencies in nanoseconds
    sum_nanos: AtomicU64,
}

impl RequestSeries {
    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let slot = LATENCY_BUCKETS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(LATENCY_BUCKETS.len());

        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with `+Inf`.
    pub fn cumulative_buckets(&self) -> Vec<u64> {
        let mut total = 0;
        self.buckets
            .iter()
            .map(|b| {
                total += b.load(Ordering::Relaxed);
                total
            })
            .collect()
    }

    /// Sum of observed latencies in seconds.
    pub fn sum_seconds(&self) -> f64 {
        self.sum_nanos.load(Ordering::Relaxed) as f64 / 1e9
    }
}

/// Datastore connection metrics.
#[derive(Debug, Default)]
struct DbMetrics {
    state: AtomicU8,
    attempts_ok: AtomicU64,
    attempts_failed: AtomicU64,
    reconnects: AtomicU64,
}

fn state_code(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
    }
}

/// Prometheus-compatible metrics store.
///
/// Series are created on first use and never removed.
pub struct PrometheusMetricsStore {
    prefix: String,
    requests: DashMap<RequestLabels, Arc<RequestSeries>>,
    in_flight: AtomicUsize,
    db: DbMetrics,
    started_at: Instant,
    start_time_secs: f64,
}

impl PrometheusMetricsStore {
    /// Create a new store whose metric names start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        let start_time_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            prefix: prefix.into(),
            requests: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            db: DbMetrics::default(),
            started_at: Instant::now(),
            start_time_secs,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn get_or_create(&self, labels: &RequestLabels) -> Arc<RequestSeries> {
        if let Some(series) = self.requests.get(labels) {
            return series.clone();
        }
        self.requests
            .entry(labels.clone())
            .or_insert_with(|| Arc::new(RequestSeries::default()))
            .clone()
    }

    /// Get the series for a label tuple, if any request was recorded with it.
    pub fn series(&self, labels: &RequestLabels) -> Option<Arc<RequestSeries>> {
        self.requests.get(labels).map(|e| e.clone())
    }

    /// Total requests recorded across every label tuple.
    pub fn total_requests(&self) -> u64 {
        self.requests
            .iter()
            .map(|e| e.value().count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.db.reconnects.load(Ordering::Relaxed)
    }

    fn write_process(&self, out: &mut String) {
        let p = &self.prefix;
        let _ = writeln!(
            out,
            "# HELP {p}_process_start_time_seconds Start time of the process since unix epoch in seconds."
        );
        let _ = writeln!(out, "# TYPE {p}_process_start_time_seconds gauge");
        let _ = writeln!(
            out,
            "{p}_process_start_time_seconds {}",
            self.start_time_secs.floor()
        );

        let _ = writeln!(
            out,
            "# HELP {p}_process_uptime_seconds Seconds since the process started."
        );
        let _ = writeln!(out, "# TYPE {p}_process_uptime_seconds gauge");
        let _ = writeln!(
            out,
            "{p}_process_uptime_seconds {:.3}",
            self.started_at.elapsed().as_secs_f64()
        );
    }

    fn write_requests(&self, out: &mut String) {
        let p = &self.prefix;
        let mut series: Vec<(RequestLabels, Arc<RequestSeries>)> = self
            .requests
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));

        let _ = writeln!(
            out,
            "# HELP {p}_http_requests_total Total number of HTTP requests"
        );
        let _ = writeln!(out, "# TYPE {p}_http_requests_total counter");
        for (labels, s) in &series {
            let _ = writeln!(
                out,
                "{p}_http_requests_total{{{}}} {}",
                label_set(labels),
                s.count.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {p}_http_request_duration_seconds Duration of HTTP requests in seconds"
        );
        let _ = writeln!(out, "# TYPE {p}_http_request_duration_seconds histogram");
        for (labels, s) in &series {
            let base = label_set(labels);
            let cumulative = s.cumulative_buckets();
            for (bound, count) in LATENCY_BUCKETS.iter().zip(&cumulative) {
                let _ = writeln!(
                    out,
                    "{p}_http_request_duration_seconds_bucket{{{base},le=\"{bound}\"}} {count}"
                );
            }
            let _ = writeln!(
                out,
                "{p}_http_request_duration_seconds_bucket{{{base},le=\"+Inf\"}} {}",
                cumulative.last().copied().unwrap_or(0)
            );
            let _ = writeln!(
                out,
                "{p}_http_request_duration_seconds_sum{{{base}}} {}",
                s.sum_seconds()
            );
            let _ = writeln!(
                out,
                "{p}_http_request_duration_seconds_count{{{base}}} {}",
                s.count.load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {p}_http_requests_in_flight Requests currently being served"
        );
        let _ = writeln!(out, "# TYPE {p}_http_requests_in_flight gauge");
        let _ = writeln!(out, "{p}_http_requests_in_flight {}", self.in_flight());
    }

    fn write_db(&self, out: &mut String) {
        let p = &self.prefix;
        let current = self.db.state.load(Ordering::Relaxed);

        let _ = writeln!(
            out,
            "# HELP {p}_db_connection_state Datastore connection state (1 for the current state)"
        );
        let _ = writeln!(out, "# TYPE {p}_db_connection_state gauge");
        for state in ConnectionState::ALL {
            let _ = writeln!(
                out,
                "{p}_db_connection_state{{state=\"{}\"}} {}",
                state.as_str(),
                u8::from(state_code(state) == current)
            );
        }

        let _ = writeln!(
            out,
            "# HELP {p}_db_connect_attempts_total Datastore connect attempts"
        );
        let _ = writeln!(out, "# TYPE {p}_db_connect_attempts_total counter");
        let _ = writeln!(
            out,
            "{p}_db_connect_attempts_total{{result=\"success\"}} {}",
            self.db.attempts_ok.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "{p}_db_connect_attempts_total{{result=\"failure\"}} {}",
            self.db.attempts_failed.load(Ordering::Relaxed)
        );

        let _ = writeln!(
            out,
            "# HELP {p}_db_reconnects_total Times a connected datastore handle was lost"
        );
        let _ = writeln!(out, "# TYPE {p}_db_reconnects_total counter");
        let _ = writeln!(out, "{p}_db_reconnects_total {}", self.reconnects());
    }
}

impl Default for PrometheusMetricsStore {
    fn default() -> Self {
        Self::new("journal")
    }
}

impl MetricsStore for PrometheusMetricsStore {
    fn record_request(&self, labels: &RequestLabels, elapsed: Duration) {
        self.get_or_create(labels).observe(elapsed);
    }

    fn request_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn request_finished(&self) {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        while current > 0 {
            match self.in_flight.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    fn record_connection_state(&self, state: ConnectionState) {
        self.db.state.store(state_code(state), Ordering::Relaxed);
    }

    fn record_connect_attempt(&self, success: bool) {
        let counter = if success {
            &self.db.attempts_ok
        } else {
            &self.db.attempts_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reconnect(&self) {
        self.db.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self) -> String {
        let mut out = String::new();
        self.write_process(&mut out);
        self.write_requests(&mut out);
        self.write_db(&mut out);
        out
    }
}

fn label_set(labels: &RequestLabels) -> String {
    format!(
        "method=\"{}\",route=\"{}\",status=\"{}\"",
        escape_label(&labels.method),
        escape_label(&labels.route),
        labels.status
    )
}

/// Escape a label value for the text exposition format.
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
