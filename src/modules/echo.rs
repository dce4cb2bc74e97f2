// Request introspection: reflects method, url, query, headers and body
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];
const HIDDEN_HEADERS: [&str; 3] = ["connection", "content-length", "transfer-encoding"];

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("endpoint".into(), toml::Value::String("/echo".into()));
    t.insert("cors_max_age".into(), toml::Value::Integer(86_400));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "echo") { return; }
    ctx.pipeline.add(Box::new(Echo {
        endpoint: h::config_str(ctx.config, "echo", "endpoint", "/echo"),
        cors_max_age: h::config_u64(ctx.config, "echo", "cors_max_age", 86_400),
    }));
}

/// JSON reflection of `r`. `scheme` comes from the transport.
pub fn describe(r: &HttpRequest, scheme: &str) -> Value {
    let host = r.get_header("Host").unwrap_or("localhost");
    let mut query = Map::new();
    for (k, v) in r.query_pairs() {
        query.insert(k, Value::String(v));
    }

    let mut headers = Map::new();
    for (k, v) in &r.headers {
        let k = k.to_ascii_lowercase();
        if HIDDEN_HEADERS.contains(&k.as_str()) { continue; }
        match headers.get_mut(&k) {
            Some(Value::String(prev)) => {
                prev.push_str(", ");
                prev.push_str(v);
            }
            _ => {
                headers.insert(k, Value::String(v.clone()));
            }
        }
    }

    let body = if !r.body.is_empty() && h::is_textual(r.content_type()) {
        Value::String(String::from_utf8_lossy(&r.body).into_owned())
    } else {
        Value::Null
    };

    json!({
        "method": r.method.to_ascii_uppercase(),
        "url": format!("{scheme}://{host}{}", r.path),
        "path": r.route(),
        "query": query,
        "headers": headers,
        "body": body,
        "body_length": r.body.len(),
    })
}

struct Echo {
    endpoint: String,
    cors_max_age: u64,
}

impl Echo {
    fn cors(&self, r: &HttpRequest, mut resp: HttpResponse) -> HttpResponse {
        let origin = r.get_header("Origin").unwrap_or("*");
        let methods = r.get_header("Access-Control-Request-Method")
            .map(|m| m.to_string())
            .unwrap_or_else(|| METHODS.join(", "));
        resp.set_header("Access-Control-Allow-Origin", origin);
        resp.set_header("Access-Control-Allow-Methods", &methods);
        if let Some(hs) = r.get_header("Access-Control-Request-Headers") {
            resp.set_header("Access-Control-Allow-Headers", hs);
        }
        resp.set_header("Access-Control-Max-Age", &self.cors_max_age.to_string());
        resp
    }
}

#[async_trait]
impl Module for Echo {
    fn name(&self) -> &str { "echo" }

    async fn handle(&self, r: &mut HttpRequest, c: &mut Context) -> Option<HttpResponse> {
        if r.route() != self.endpoint { return None; }
        if !h::is_method(r, &METHODS) {
            return Some(HttpResponse::error(405, "Method Not Allowed")
                .with_header("Allow", &METHODS.join(", ")));
        }
        let resp = HttpResponse::json(200, &describe(r, c.scheme()))
            .with_header("X-Echo-Server", "scenario-mock");
        if h::is_method(r, &["OPTIONS"]) {
            return Some(self.cors(r, resp));
        }
        Some(resp)
    }
}
