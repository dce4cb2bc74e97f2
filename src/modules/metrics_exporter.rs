// Metrics exporter: Prometheus text, or JSON with ?format=json
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("endpoint".into(), toml::Value::String("/metrics".into()));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "metrics_exporter") { return; }
    let ep = h::config_str(ctx.config, "metrics_exporter", "endpoint", "/metrics");
    ctx.pipeline.add(Box::new(MetricsExporter { endpoint: ep }));
}

struct MetricsExporter {
    endpoint: String,
}

#[async_trait]
impl Module for MetricsExporter {
    fn name(&self) -> &str { "metrics_exporter" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) || r.route() != self.endpoint { return None; }
        if r.query_param("format").as_deref() == Some("json") {
            return Some(HttpResponse::json(200, &crate::metrics::snapshot_json()));
        }
        let body = crate::metrics::snapshot_prometheus();
        let mut resp = HttpResponse::new(200);
        resp.headers = vec![
            ("Content-Type".to_string(), "text/plain; version=0.0.4; charset=utf-8".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        resp.body = body.into_bytes();
        Some(resp)
    }
}
