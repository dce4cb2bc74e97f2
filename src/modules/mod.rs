// Auto-generated module registry: 11 modules discovered
pub mod basics;
pub mod compression;
pub mod connection_tracker;
pub mod cookies;
pub mod echo;
pub mod fault_upload;
pub mod health_check;
pub mod helpers;
pub mod metrics_exporter;
pub mod rate_download;
pub mod redirect_chain;

use crate::config::Srv;
use crate::context::Context;
use crate::http::{BodyReader, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;
    /// Return Some(response) to short-circuit, None to continue.
    async fn handle(&self, r: &mut HttpRequest, c: &mut Context) -> Option<HttpResponse>;
    /// Claim the request body unread; the server then calls
    /// `handle_body_stream` instead of buffering the body for `handle`.
    fn streams_body(&self, _r: &HttpRequest) -> bool { false }
    async fn handle_body_stream(&self, _r: &mut HttpRequest, _b: &mut BodyReader<'_>, _c: &mut Context) -> Option<HttpResponse> {
        None
    }
}

pub struct Pipeline {
    mods: Vec<Box<dyn Module>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { mods: Vec::new() }
    }
    pub fn add(&mut self, m: Box<dyn Module>) {
        crate::log::module_loaded(m.name());
        self.mods.push(m);
    }
    pub fn module_names(&self) -> Vec<&str> {
        self.mods.iter().map(|m| m.name()).collect()
    }
    pub fn streams_body(&self, r: &HttpRequest) -> bool {
        self.mods.iter().any(|m| m.streams_body(r))
    }
    pub async fn handle(&self, r: &mut HttpRequest, c: &mut Context) -> HttpResponse {
        for m in &self.mods {
            if let Some(resp) = m.handle(r, c).await {
                return resp;
            }
        }
        HttpResponse::error(404, "Not Found")
    }
    pub async fn handle_streamed(&self, r: &mut HttpRequest, b: &mut BodyReader<'_>, c: &mut Context) -> HttpResponse {
        for m in &self.mods {
            if !m.streams_body(r) { continue; }
            if let Some(resp) = m.handle_body_stream(r, b, c).await {
                return resp;
            }
        }
        HttpResponse::error(404, "Not Found")
    }
}

pub struct ModuleContext<'a> {
    pub pipeline: &'a mut Pipeline,
    pub config: &'a HashMap<String, toml::Value>,
    pub server: &'a Srv,
}

pub fn register_all(p: &mut Pipeline, mc: &HashMap<String, toml::Value>, sc: &Srv) {
    let mut ctx = ModuleContext { pipeline: p, config: mc, server: sc };
    health_check::register(&mut ctx);
    metrics_exporter::register(&mut ctx);
    basics::register(&mut ctx);
    echo::register(&mut ctx);
    redirect_chain::register(&mut ctx);
    connection_tracker::register(&mut ctx);
    rate_download::register(&mut ctx);
    fault_upload::register(&mut ctx);
    compression::register(&mut ctx);
    cookies::register(&mut ctx);
}

pub fn collect_defaults() -> HashMap<String, toml::Value> {
    let mut d = HashMap::new();
    d.insert("basics".into(), toml::Value::Table(basics::default_config()));
    d.insert("compression".into(), toml::Value::Table(compression::default_config()));
    d.insert("connection_tracker".into(), toml::Value::Table(connection_tracker::default_config()));
    d.insert("cookies".into(), toml::Value::Table(cookies::default_config()));
    d.insert("echo".into(), toml::Value::Table(echo::default_config()));
    d.insert("fault_upload".into(), toml::Value::Table(fault_upload::default_config()));
    d.insert("health_check".into(), toml::Value::Table(health_check::default_config()));
    d.insert("metrics_exporter".into(), toml::Value::Table(metrics_exporter::default_config()));
    d.insert("rate_download".into(), toml::Value::Table(rate_download::default_config()));
    d.insert("redirect_chain".into(), toml::Value::Table(redirect_chain::default_config()));
    d
}
