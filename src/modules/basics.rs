// Baseline routes: hello, protocol probe, ticking text stream
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{ChunkSource, HttpRequest, HttpResponse};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::time::Duration;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("stream_chunks".into(), toml::Value::Integer(10));
    t.insert("stream_tick_ms".into(), toml::Value::Integer(1000));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "basics") { return; }
    ctx.pipeline.add(Box::new(Basics {
        stream_chunks: h::config_u64(ctx.config, "basics", "stream_chunks", 10),
        stream_tick: h::config_millis(ctx.config, "basics", "stream_tick_ms", 1000),
    }));
}

/// `chunk {i}\n` lines, one tick before each.
pub struct Ticker {
    next: u64,
    total: u64,
    tick: Duration,
}

impl Ticker {
    pub fn new(total: u64, tick: Duration) -> Self {
        Ticker { next: 0, total, tick }
    }
}

#[async_trait]
impl ChunkSource for Ticker {
    async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.next >= self.total {
            return None;
        }
        tokio::time::sleep(self.tick).await;
        let line = format!("chunk {}\n", self.next);
        self.next += 1;
        Some(Bytes::from(line))
    }
}

struct Basics {
    stream_chunks: u64,
    stream_tick: Duration,
}

#[async_trait]
impl Module for Basics {
    fn name(&self) -> &str { "basics" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) { return None; }
        match r.route() {
            "/" => Some(HttpResponse::json(200, &json!({ "message": "Hello World!" }))),
            "/test" => {
                let protocol = r.query_param("protocol").unwrap_or_else(|| "Unknown".into());
                Some(HttpResponse::json(200, &json!({
                    "status": "ok",
                    "protocol": protocol,
                    "timestamp": "test",
                })))
            }
            "/stream" => Some(HttpResponse::streaming(
                200,
                "text/plain",
                Box::new(Ticker::new(self.stream_chunks, self.stream_tick)),
            )),
            _ => None,
        }
    }
}
