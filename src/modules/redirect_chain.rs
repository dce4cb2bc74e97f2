// Redirect chains: counted hops, arbitrary target, fixed named chain
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::json;

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("hop_status".into(), toml::Value::Integer(307));
    t.insert("target_status".into(), toml::Value::Integer(302));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "redirect_chain") { return; }
    let status = |k: &str, d: u64| {
        let s = h::config_u64(ctx.config, "redirect_chain", k, d);
        if (300..=399).contains(&s) {
            s as u16
        } else {
            crate::log::warn(&format!("redirect_chain: {k} {s} is not a 3xx status, using {d}"));
            d as u16
        }
    };
    let hop_status = status("hop_status", 307);
    let target_status = status("target_status", 302);
    // the named chain lands on wherever the echo module is mounted
    let echo_path = h::config_str(ctx.config, "echo", "endpoint", "/echo");
    ctx.pipeline.add(Box::new(RedirectChain { hop_status, target_status, echo_path }));
}

/// Next step of a counted chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    /// Chain complete, serve the terminal payload.
    Arrived,
    Redirect(String),
}

/// `remaining` hops left before the terminal payload. Only the last hop
/// (`remaining - 1 == 0`) may jump to `final_url`.
pub fn next_hop(remaining: i64, final_url: Option<&str>) -> Hop {
    if remaining <= 0 {
        return Hop::Arrived;
    }
    match final_url {
        Some(u) if remaining == 1 && !u.is_empty() => Hop::Redirect(u.to_string()),
        _ => Hop::Redirect(format!("/redirect/{}", remaining - 1)),
    }
}

struct RedirectChain {
    hop_status: u16,
    target_status: u16,
    echo_path: String,
}

impl RedirectChain {
    fn counted(&self, r: &HttpRequest, raw: &str) -> HttpResponse {
        let n = match raw.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return h::bad_request(&format!("Invalid redirect count '{raw}'")),
        };
        let final_url = r.query_param("final_url");
        match next_hop(n, final_url.as_deref()) {
            Hop::Arrived => HttpResponse::json(200, &json!({
                "message": "Reached final destination",
                "redirects": "completed",
            })),
            Hop::Redirect(mut loc) => {
                // Carry the terminal url down the chain until it is used.
                if let Some(u) = final_url.filter(|u| !u.is_empty() && loc.starts_with("/redirect/")) {
                    let q: String = url::form_urlencoded::Serializer::new(String::new())
                        .append_pair("final_url", &u)
                        .finish();
                    loc = format!("{loc}?{q}");
                }
                crate::metrics::inc_redirects();
                HttpResponse::redirect(self.hop_status, &loc)
            }
        }
    }

    /// Named chain `/redirect/chain -> /redirect/single -> echo`: stage
    /// label and next location for `route`.
    fn named_stage(&self, route: &str) -> Option<(&'static str, &str)> {
        match route {
            "/redirect/chain" => Some(("chain", "/redirect/single")),
            "/redirect/single" => Some(("single", self.echo_path.as_str())),
            _ => None,
        }
    }

    fn to_target(&self, r: &HttpRequest) -> HttpResponse {
        match r.query_param("url") {
            Some(u) if !u.trim().is_empty() => {
                crate::metrics::inc_redirects();
                HttpResponse::redirect(self.target_status, u.trim())
            }
            _ => h::bad_request("Missing redirect target 'url'"),
        }
    }
}

#[async_trait]
impl Module for RedirectChain {
    fn name(&self) -> &str { "redirect_chain" }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) { return None; }
        let route = r.route();
        if route == "/redirect-to" {
            return Some(self.to_target(r));
        }
        if let Some((stage, next)) = self.named_stage(route) {
            crate::metrics::inc_redirects();
            return Some(HttpResponse::redirect(self.target_status, next)
                .with_header("X-Redirect-Stage", stage)
                .with_header("X-Redirect-Next", next));
        }
        let rest = route.strip_prefix("/redirect/")?;
        if rest.is_empty() || rest.contains('/') { return None; }
        Some(self.counted(r, rest))
    }
}
