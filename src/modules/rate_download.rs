// Rate-controlled download generator
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{ChunkSource, HttpRequest, HttpResponse};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

const MB: u64 = 1024 * 1024;
const KB: u64 = 1024;
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("tick_ms".into(), toml::Value::Integer(1000));
    t.insert("max_size_mb".into(), toml::Value::Integer(100));
    t.insert("max_size_kb".into(), toml::Value::Integer(102_400));
    t.insert("max_speed_kbps".into(), toml::Value::Integer(1024));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "rate_download") { return; }
    ctx.pipeline.add(Box::new(RateDownload {
        tick: h::config_millis(ctx.config, "rate_download", "tick_ms", 1000),
        max_size_mb: h::config_u64(ctx.config, "rate_download", "max_size_mb", 100),
        max_size_kb: h::config_u64(ctx.config, "rate_download", "max_size_kb", 102_400),
        max_speed_kbps: h::config_u64(ctx.config, "rate_download", "max_speed_kbps", 1024),
    }));
}

/// Bytes-over-time plan: `total_bytes` split into chunks of at most
/// `rate_bytes_per_tick`, one `tick` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPlan {
    pub total_bytes: u64,
    pub rate_bytes_per_tick: u64,
    pub tick: Duration,
}

impl StreamPlan {
    pub fn new(total_bytes: u64, rate_bytes_per_tick: u64, tick: Duration) -> Option<Self> {
        if rate_bytes_per_tick == 0 {
            return None;
        }
        Some(StreamPlan { total_bytes, rate_bytes_per_tick, tick })
    }

    pub fn chunk_count(&self) -> u64 {
        self.total_bytes.div_ceil(self.rate_bytes_per_tick)
    }

    /// Wall time of a full transfer, ignoring write time.
    pub fn expected_duration(&self) -> Duration {
        let gaps = self.chunk_count().saturating_sub(1);
        self.tick.saturating_mul(gaps.min(u32::MAX as u64) as u32)
    }
}

/// Emits a `StreamPlan` lazily. Each chunk after the first is due one tick
/// after the previous one; never sleeps after the last. The due time
/// survives a cancelled `next_chunk`.
pub struct RateStream {
    plan: StreamPlan,
    remaining: u64,
    next_due: Option<Instant>,
}

impl RateStream {
    pub fn new(plan: StreamPlan) -> Self {
        RateStream { plan, remaining: plan.total_bytes, next_due: None }
    }
}

#[async_trait]
impl ChunkSource for RateStream {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }
        let n = self.plan.rate_bytes_per_tick.min(self.remaining);
        self.remaining -= n;
        if !self.plan.tick.is_zero() {
            let now = Instant::now();
            self.next_due = Some(now.checked_add(self.plan.tick).unwrap_or_else(|| now + FAR_FUTURE));
        }
        Some(Bytes::from(vec![0u8; n as usize]))
    }
}

struct RateDownload {
    tick: Duration,
    max_size_mb: u64,
    max_size_kb: u64,
    max_speed_kbps: u64,
}

impl RateDownload {
    fn slow(&self, r: &HttpRequest) -> HttpResponse {
        let size_kb = match h::query_num::<i64>(r, "size_kb") {
            Ok(v) => v.unwrap_or(1024),
            Err(_) => return h::bad_request("size_kb must be an integer"),
        };
        let speed_kbps = match h::query_num::<i64>(r, "speed_kbps") {
            Ok(v) => v.unwrap_or(100),
            Err(_) => return h::bad_request("speed_kbps must be an integer"),
        };
        if size_kb <= 0 || size_kb as u64 > self.max_size_kb {
            return h::bad_request(&format!("Size must be between 1 and {} KB", self.max_size_kb));
        }
        if speed_kbps <= 0 || speed_kbps as u64 > self.max_speed_kbps {
            return h::bad_request(&format!("Speed must be between 1 and {} KB/s", self.max_speed_kbps));
        }
        let (size_kb, speed_kbps) = (size_kb as u64, speed_kbps as u64);
        let Some(plan) = StreamPlan::new(size_kb * KB, speed_kbps * KB, self.tick) else {
            return h::bad_request("speed_kbps must be positive");
        };
        crate::log::debug(&format!(
            "rate_download: {} bytes in {} chunks over ~{:?}",
            plan.total_bytes, plan.chunk_count(), plan.expected_duration()
        ));
        HttpResponse::streaming(200, "application/octet-stream", Box::new(RateStream::new(plan)))
            .with_header("Content-Length", &plan.total_bytes.to_string())
            .with_header("Content-Disposition", &format!("attachment; filename=slow_{size_kb}kb_{speed_kbps}kbps.bin"))
            .with_header("X-Download-Size", &plan.total_bytes.to_string())
            .with_header("X-Download-Speed", &plan.rate_bytes_per_tick.to_string())
    }

    fn sized(&self, raw: &str) -> HttpResponse {
        let size_mb = match raw.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return h::bad_request(&format!("Invalid size '{raw}'")),
        };
        if size_mb <= 0 || size_mb as u64 > self.max_size_mb {
            return h::bad_request(&format!("Size must be between 1 and {} MB", self.max_size_mb));
        }
        let size_mb = size_mb as u64;
        let Some(plan) = StreamPlan::new(size_mb * MB, MB, Duration::ZERO) else {
            return HttpResponse::error(500, "Invalid download plan");
        };
        HttpResponse::streaming(200, "application/octet-stream", Box::new(RateStream::new(plan)))
            .with_header("Content-Length", &plan.total_bytes.to_string())
            .with_header("Content-Disposition", &format!("attachment; filename=test_{size_mb}mb.bin"))
    }
}

#[async_trait]
impl Module for RateDownload {
    fn name(&self) -> &str { "rate_download" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) { return None; }
        let route = r.route();
        if route == "/download/slow" {
            return Some(self.slow(r));
        }
        let rest = route.strip_prefix("/download/")?;
        if rest.is_empty() || rest.contains('/') { return None; }
        Some(self.sized(rest))
    }
}
