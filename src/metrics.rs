//! Lightweight global metrics for QuiverMarks.
//!
//! Потокобезопасные атомарные счётчики для подсистем:
//! - Snapshots (store + scheduler + final snapshot)
//! - HTTP (requests / 4xx / 5xx / auth failures)
//!
//! render_prometheus() отдаёт текстовый формат Prometheus для GET /metrics.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Snapshots -----
static SNAPSHOTS_SAVED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_FAILURES: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_BYTES_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAST_BYTES: AtomicU64 = AtomicU64::new(0);

// ----- HTTP -----
static HTTP_REQUESTS: AtomicU64 = AtomicU64::new(0);
static HTTP_RESPONSES_4XX: AtomicU64 = AtomicU64::new(0);
static HTTP_RESPONSES_5XX: AtomicU64 = AtomicU64::new(0);
static HTTP_AUTH_FAILURES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    // Snapshots
    pub snapshots_saved: u64,
    pub snapshot_failures: u64,
    pub snapshot_bytes_total: u64,
    pub snapshot_last_bytes: u64,

    // HTTP
    pub http_requests: u64,
    pub http_responses_4xx: u64,
    pub http_responses_5xx: u64,
    pub http_auth_failures: u64,
}

impl MetricsSnapshot {
    pub fn snapshot_failure_ratio(&self) -> f64 {
        let total = self.snapshots_saved + self.snapshot_failures;
        if total == 0 {
            0.0
        } else {
            self.snapshot_failures as f64 / total as f64
        }
    }
}

// ----- Recorders (Snapshots) -----
pub fn record_snapshot(bytes: u64) {
    SNAPSHOTS_SAVED.fetch_add(1, Ordering::Relaxed);
    SNAPSHOT_BYTES_TOTAL.fetch_add(bytes, Ordering::Relaxed);
    SNAPSHOT_LAST_BYTES.store(bytes, Ordering::Relaxed);
}

pub fn record_snapshot_failure() {
    SNAPSHOT_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (HTTP) -----
pub fn record_request() {
    HTTP_REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_response(status: u16) {
    match status {
        400..=499 => {
            HTTP_RESPONSES_4XX.fetch_add(1, Ordering::Relaxed);
        }
        500..=599 => {
            HTTP_RESPONSES_5XX.fetch_add(1, Ordering::Relaxed);
        }
        _ => {}
    }
}

pub fn record_auth_failure() {
    HTTP_AUTH_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Snapshot / Reset -----
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        snapshots_saved: SNAPSHOTS_SAVED.load(Ordering::Relaxed),
        snapshot_failures: SNAPSHOT_FAILURES.load(Ordering::Relaxed),
        snapshot_bytes_total: SNAPSHOT_BYTES_TOTAL.load(Ordering::Relaxed),
        snapshot_last_bytes: SNAPSHOT_LAST_BYTES.load(Ordering::Relaxed),

        http_requests: HTTP_REQUESTS.load(Ordering::Relaxed),
        http_responses_4xx: HTTP_RESPONSES_4XX.load(Ordering::Relaxed),
        http_responses_5xx: HTTP_RESPONSES_5XX.load(Ordering::Relaxed),
        http_auth_failures: HTTP_AUTH_FAILURES.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    SNAPSHOTS_SAVED.store(0, Ordering::Relaxed);
    SNAPSHOT_FAILURES.store(0, Ordering::Relaxed);
    SNAPSHOT_BYTES_TOTAL.store(0, Ordering::Relaxed);
    SNAPSHOT_LAST_BYTES.store(0, Ordering::Relaxed);

    HTTP_REQUESTS.store(0, Ordering::Relaxed);
    HTTP_RESPONSES_4XX.store(0, Ordering::Relaxed);
    HTTP_RESPONSES_5XX.store(0, Ordering::Relaxed);
    HTTP_AUTH_FAILURES.store(0, Ordering::Relaxed);
}

/// Живые значения хранилища, которые не хранятся в глобальных счётчиках.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreGauges {
    pub records: u64,
    pub id_counter: u64,
}

/// Текстовый формат Prometheus (version 0.0.4).
pub fn render_prometheus(gauges: StoreGauges) -> String {
    let m = snapshot();
    let mut out = String::new();

    let ver = env!("CARGO_PKG_VERSION");
    metric(&mut out, "quivermarks_build_info", "gauge", "Build info.",
        &format!("{{version=\"{}\"}} 1", ver));

    // --- Store ---
    metric(&mut out, "quivermarks_records", "gauge", "Bookmarks currently held in memory.",
        &format!(" {}", gauges.records));
    metric(&mut out, "quivermarks_idx_counter", "gauge", "Highest bookmark id ever assigned.",
        &format!(" {}", gauges.id_counter));

    // --- Snapshots ---
    metric(&mut out, "quivermarks_snapshots_saved_total", "counter", "Snapshots written to the backing file.",
        &format!(" {}", m.snapshots_saved));
    metric(&mut out, "quivermarks_snapshot_failures_total", "counter", "Snapshot attempts that failed.",
        &format!(" {}", m.snapshot_failures));
    metric(&mut out, "quivermarks_snapshot_bytes_total", "counter", "Bytes written by successful snapshots.",
        &format!(" {}", m.snapshot_bytes_total));
    metric(&mut out, "quivermarks_snapshot_last_bytes", "gauge", "Size of the last successful snapshot.",
        &format!(" {}", m.snapshot_last_bytes));

    // --- HTTP ---
    metric(&mut out, "quivermarks_http_requests_total", "counter", "HTTP requests received.",
        &format!(" {}", m.http_requests));
    metric(&mut out, "quivermarks_http_responses_4xx_total", "counter", "Responses with a 4xx status.",
        &format!(" {}", m.http_responses_4xx));
    metric(&mut out, "quivermarks_http_responses_5xx_total", "counter", "Responses with a 5xx status.",
        &format!(" {}", m.http_responses_5xx));
    metric(&mut out, "quivermarks_http_auth_failures_total", "counter", "Rejected basic-auth attempts.",
        &format!(" {}", m.http_auth_failures));

    out
}

fn metric(out: &mut String, name: &str, kind: &str, help: &str, sample: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
    let _ = writeln!(out, "{}{}", name, sample);
}
