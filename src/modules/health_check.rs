// Health check endpoint for harness readiness polling
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("endpoint".into(), toml::Value::String("/health".into()));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "health_check") { return; }
    let e = h::config_str(ctx.config, "health_check", "endpoint", "/health");
    ctx.pipeline.add(Box::new(Health { endpoint: e }));
}

struct Health {
    endpoint: String,
}

#[async_trait]
impl Module for Health {
    fn name(&self) -> &str { "health_check" }
    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if r.route() == self.endpoint {
            Some(HttpResponse::json(200, &serde_json::json!({ "status": "ok" })))
        } else {
            None
        }
    }
}
