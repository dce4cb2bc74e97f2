// Fixed-content gzip route
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("endpoint".into(), toml::Value::String("/gzip".into()));
    t.insert("level".into(), toml::Value::Integer(6));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "compression") { return; }
    let level = h::config_u64(ctx.config, "compression", "level", 6).min(9) as u32;
    let endpoint = h::config_str(ctx.config, "compression", "endpoint", "/gzip");
    match gzip_payload(level) {
        Ok(body) => ctx.pipeline.add(Box::new(Gzip { endpoint, body })),
        Err(e) => crate::log::error(&format!("compression: failed to build gzip payload: {e}")),
    }
}

/// Uncompressed JSON served by the gzip route.
pub fn plain_payload() -> String {
    serde_json::json!({
        "message": "This response is gzip compressed",
        "compressed": true,
        "data": "x".repeat(1024),
    })
    .to_string()
}

pub fn gzip_payload(level: u32) -> std::io::Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::new(level));
    enc.write_all(plain_payload().as_bytes())?;
    enc.finish()
}

struct Gzip {
    endpoint: String,
    /// Compressed once at startup.
    body: Vec<u8>,
}

#[async_trait]
impl Module for Gzip {
    fn name(&self) -> &str { "compression" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) || r.route() != self.endpoint { return None; }
        let mut resp = HttpResponse::new(200);
        resp.headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Encoding".to_string(), "gzip".to_string()),
            ("Content-Length".to_string(), self.body.len().to_string()),
        ];
        resp.body = self.body.clone();
        Some(resp)
    }
}
