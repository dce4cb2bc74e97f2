// Auto-discovery and code generation for scenario modules
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=src/modules");

    let modules_dir = Path::new("src/modules");
    let mod_file = modules_dir.join("mod.rs");

    let mut module_names = Vec::new();
    let mut registerable = Vec::new();
    let mut has_defaults = Vec::new();

    if let Ok(entries) = fs::read_dir(modules_dir) {
        for entry in entries.flatten() {
            let path = entry.path();

            if path.is_file() {
                let file_name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                if !file_name.ends_with(".rs") || file_name == "mod.rs" {
                    continue;
                }
                println!("cargo:rerun-if-changed={}", path.display());
                let name = file_name.trim_end_matches(".rs").to_string();
                let content = match fs::read_to_string(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        println!("cargo:warning=Failed to read {}: {}", path.display(), e);
                        continue;
                    }
                };
                module_names.push(name.clone());
                if content.contains("pub fn register") {
                    registerable.push(name.clone());
                }
                if content.contains("pub fn default_config") {
                    has_defaults.push(name);
                }
                continue;
            }

            if path.is_dir() {
                let mod_rs = path.join("mod.rs");
                if !mod_rs.exists() { continue; }
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n.to_string(),
                    None => continue,
                };
                let content = match fs::read_to_string(&mod_rs) {
                    Ok(c) => c,
                    Err(e) => {
                        println!("cargo:warning=Failed to read {}: {}", mod_rs.display(), e);
                        continue;
                    }
                };
                module_names.push(name.clone());
                if content.contains("pub fn register") {
                    registerable.push(name.clone());
                }
                if content.contains("pub fn default_config") {
                    has_defaults.push(name);
                }
            }
        }
    }

    module_names.sort();
    registerable.sort();
    has_defaults.sort();

    if module_names.is_empty() {
        println!("cargo:warning=No modules found in src/modules/");
    }
    if registerable.is_empty() {
        println!("cargo:warning=No registerable modules found (missing pub fn register)");
    }

    println!("cargo:warning=Discovered {} modules, {} registerable, {} with defaults",
        module_names.len(), registerable.len(), has_defaults.len());

    let mut c = format!(
        "// Auto-generated module registry: {} modules discovered\n",
        module_names.len()
    );
    for name in &module_names {
        c.push_str(&format!("pub mod {};\n", name));
    }

    c.push_str("\n");
    c.push_str(r#"use crate::config::Srv;
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
"#);

    // Registration order: probes first, then scenario routes
    let priority = [
        "health_check", "metrics_exporter", "basics", "echo",
        "redirect_chain", "connection_tracker", "rate_download",
        "fault_upload", "compression", "cookies",
    ];

    let mut ordered: Vec<&String> = Vec::new();
    for p in &priority {
        if let Some(name) = registerable.iter().find(|n| n.as_str() == *p) {
            ordered.push(name);
        }
    }
    // Any remaining modules not in priority list, alphabetically
    for name in &registerable {
        if !priority.contains(&name.as_str()) {
            ordered.push(name);
        }
    }

    for name in &ordered {
        c.push_str(&format!("    {}::register(&mut ctx);\n", name));
    }
    c.push_str("}\n\npub fn collect_defaults() -> HashMap<String, toml::Value> {\n    let mut d = HashMap::new();\n");
    for name in &has_defaults {
        c.push_str(&format!("    d.insert(\"{}\".into(), toml::Value::Table({}::default_config()));\n", name, name));
    }
    c.push_str("    d\n}\n");

    if fs::read_to_string(&mod_file).map(|old| old == c).unwrap_or(false) {
        return;
    }
    if let Err(e) = fs::write(&mod_file, c) {
        panic!("Failed to write module registry {}: {}", mod_file.display(), e);
    }
}

