// Cookie set/verify pair
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::json;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("name".into(), toml::Value::String("test_cookie".into()));
    t.insert("value".into(), toml::Value::String("test_value".into()));
    t.insert("max_age".into(), toml::Value::Integer(3600));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "cookies") { return; }
    ctx.pipeline.add(Box::new(Cookies {
        name: h::config_str(ctx.config, "cookies", "name", "test_cookie"),
        value: h::config_str(ctx.config, "cookies", "value", "test_value"),
        max_age: h::config_u64(ctx.config, "cookies", "max_age", 3600),
    }));
}

/// Value of cookie `name` across every `Cookie` header of `r`.
pub fn cookie_value<'a>(r: &'a HttpRequest, name: &str) -> Option<&'a str> {
    r.headers
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("Cookie"))
        .flat_map(|(_, v)| v.split(';'))
        .find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k.trim() == name).then(|| v.trim())
        })
}

struct Cookies {
    name: String,
    value: String,
    max_age: u64,
}

#[async_trait]
impl Module for Cookies {
    fn name(&self) -> &str { "cookies" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) { return None; }
        match r.route() {
            "/cookie/set" => Some(HttpResponse::json(200, &json!({ "message": "Cookie set" }))
                .with_header("Set-Cookie", &format!(
                    "{}={}; Max-Age={}; Path=/; HttpOnly",
                    self.name, self.value, self.max_age
                ))),
            "/cookie/verify" => Some(match cookie_value(r, &self.name) {
                Some(v) if v == self.value => HttpResponse::json(200, &json!({ "valid": true })),
                Some(v) => HttpResponse::json(400, &json!({
                    "valid": false,
                    "detail": format!("Cookie {} has unexpected value '{v}'", self.name),
                })),
                None => HttpResponse::json(400, &json!({
                    "valid": false,
                    "detail": format!("Cookie {} is missing", self.name),
                })),
            }),
            _ => None,
        }
    }
}
