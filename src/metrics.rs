// Lock-free process counters using atomics
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

static REQUESTS_TOTAL: AtomicU64 = AtomicU64::new(0);
static REQUESTS_OK: AtomicU64 = AtomicU64::new(0);
static REQUESTS_ERR: AtomicU64 = AtomicU64::new(0);
static BYTES_IN: AtomicU64 = AtomicU64::new(0);
static BYTES_OUT: AtomicU64 = AtomicU64::new(0);
static LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static LATENCY_MAX_MS: AtomicU64 = AtomicU64::new(0);
static CONNECTIONS_TOTAL: AtomicU64 = AtomicU64::new(0);
static STREAMS_ABORTED: AtomicU64 = AtomicU64::new(0);
static FAULTS_INJECTED: AtomicU64 = AtomicU64::new(0);
static INTERNAL_ERRORS: AtomicU64 = AtomicU64::new(0);
static REDIRECTS_ISSUED: AtomicU64 = AtomicU64::new(0);
static SLOW_SESSIONS: AtomicU64 = AtomicU64::new(0);
static SLOW_SESSIONS_PENDING: AtomicU64 = AtomicU64::new(0);

pub fn init() {
    START_TIME.get_or_init(Instant::now);
}

#[inline]
pub fn inc_requests() { REQUESTS_TOTAL.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_requests_ok() { REQUESTS_OK.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_requests_err() { REQUESTS_ERR.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn add_bytes_in(n: u64) { BYTES_IN.fetch_add(n, Ordering::Relaxed); }

#[inline]
pub fn add_bytes_out(n: u64) { BYTES_OUT.fetch_add(n, Ordering::Relaxed); }

#[inline]
pub fn inc_connections() { CONNECTIONS_TOTAL.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_streams_aborted() { STREAMS_ABORTED.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_faults() { FAULTS_INJECTED.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_internal_errors() { INTERNAL_ERRORS.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn inc_redirects() { REDIRECTS_ISSUED.fetch_add(1, Ordering::Relaxed); }

#[inline]
pub fn slow_session_opened() {
    SLOW_SESSIONS.fetch_add(1, Ordering::Relaxed);
    SLOW_SESSIONS_PENDING.fetch_add(1, Ordering::AcqRel);
}

#[inline]
pub fn slow_session_closed() { SLOW_SESSIONS_PENDING.fetch_sub(1, Ordering::AcqRel); }

#[inline]
pub fn record_latency(ms: u64) {
    LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    let mut current = LATENCY_MAX_MS.load(Ordering::Relaxed);
    while ms > current {
        match LATENCY_MAX_MS.compare_exchange_weak(current, ms, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(c) => current = c,
        }
    }
}

struct Snapshot {
    uptime: u64,
    total: u64,
    ok: u64,
    err: u64,
    b_in: u64,
    b_out: u64,
    lat_sum: u64,
    lat_max: u64,
    conns: u64,
    aborted: u64,
    faults: u64,
    internal: u64,
    redirects: u64,
    slow: u64,
    slow_pending: u64,
}

fn snapshot() -> Snapshot {
    Snapshot {
        uptime: START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0),
        total: REQUESTS_TOTAL.load(Ordering::Relaxed),
        ok: REQUESTS_OK.load(Ordering::Relaxed),
        err: REQUESTS_ERR.load(Ordering::Relaxed),
        b_in: BYTES_IN.load(Ordering::Relaxed),
        b_out: BYTES_OUT.load(Ordering::Relaxed),
        lat_sum: LATENCY_SUM_MS.load(Ordering::Relaxed),
        lat_max: LATENCY_MAX_MS.load(Ordering::Relaxed),
        conns: CONNECTIONS_TOTAL.load(Ordering::Relaxed),
        aborted: STREAMS_ABORTED.load(Ordering::Relaxed),
        faults: FAULTS_INJECTED.load(Ordering::Relaxed),
        internal: INTERNAL_ERRORS.load(Ordering::Relaxed),
        redirects: REDIRECTS_ISSUED.load(Ordering::Relaxed),
        slow: SLOW_SESSIONS.load(Ordering::Relaxed),
        slow_pending: SLOW_SESSIONS_PENDING.load(Ordering::Relaxed),
    }
}

pub fn snapshot_prometheus() -> String {
    let s = snapshot();
    let rows: [(&str, &str, u64); 15] = [
        ("uptime_seconds", "gauge", s.uptime),
        ("requests_total", "counter", s.total),
        ("requests_ok", "counter", s.ok),
        ("requests_err", "counter", s.err),
        ("bytes_in", "counter", s.b_in),
        ("bytes_out", "counter", s.b_out),
        ("latency_sum_ms", "counter", s.lat_sum),
        ("latency_max_ms", "gauge", s.lat_max),
        ("connections_total", "counter", s.conns),
        ("streams_aborted", "counter", s.aborted),
        ("faults_injected", "counter", s.faults),
        ("internal_errors", "counter", s.internal),
        ("redirects_issued", "counter", s.redirects),
        ("slow_accept_sessions", "counter", s.slow),
        ("slow_accept_pending", "gauge", s.slow_pending),
    ];
    let mut out = String::new();
    for (name, kind, value) in rows {
        out.push_str(&format!("# TYPE scenario_mock_{name} {kind}\nscenario_mock_{name} {value}\n"));
    }
    out
}

pub fn snapshot_json() -> serde_json::Value {
    let s = snapshot();
    let avg_lat = if s.total > 0 { s.lat_sum / s.total } else { 0 };
    serde_json::json!({
        "uptime_seconds": s.uptime,
        "requests_total": s.total,
        "requests_ok": s.ok,
        "requests_err": s.err,
        "connections_total": s.conns,
        "bytes_in": s.b_in,
        "bytes_out": s.b_out,
        "latency_avg_ms": avg_lat,
        "latency_max_ms": s.lat_max,
        "streams_aborted": s.aborted,
        "faults_injected": s.faults,
        "internal_errors": s.internal,
        "redirects_issued": s.redirects,
        "slow_accept_sessions": s.slow,
        "slow_accept_pending": s.slow_pending,
    })
}
