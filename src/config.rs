// Configuration loading, validation, and default generation
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Srv,
    #[serde(default)]
    pub modules: HashMap<String, toml::Value>,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct Srv {
    pub listen_addr: String,
    pub slow_accept_addr: String,
    pub slow_accept_delay_ms: u64,
    pub slow_accept_poll_ms: u64,
    pub buffer_size: usize,
    pub client_timeout: u64,
    pub keep_alive_timeout: u64,
    pub keep_alive_max: usize,
    pub max_header_size: usize,
    pub max_body_size: usize,
    pub max_connections: usize,
    pub shutdown_timeout: u64,
    pub log_level: String,
    pub logging: bool,
    pub tls_cert: String,
    pub tls_key: String,
    pub http2: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { server: Srv::default(), modules: HashMap::new() }
    }
}

impl Default for Srv {
    fn default() -> Self {
        Srv {
            listen_addr: "127.0.0.1:9080".to_string(),
            slow_accept_addr: "127.0.0.1:9081".to_string(),
            slow_accept_delay_ms: 10_000,
            slow_accept_poll_ms: 100,
            buffer_size: 8192,
            client_timeout: 30,
            keep_alive_timeout: 30,
            keep_alive_max: 100,
            max_header_size: crate::http::MAX_HEADER_SIZE,
            max_body_size: crate::http::MAX_BODY_SIZE,
            max_connections: 10_000,
            shutdown_timeout: 15,
            log_level: "info".to_string(),
            logging: true,
            tls_cert: String::new(),
            tls_key: String::new(),
            http2: true,
        }
    }
}

impl Srv {
    pub fn validate(&mut self) -> bool {
        let mut valid = true;

        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            crate::log::error(&format!("listen_addr '{}' is not a valid address (expected ip:port)", self.listen_addr));
            valid = false;
        }
        if self.slow_accept_addr.parse::<std::net::SocketAddr>().is_err() {
            crate::log::error(&format!("slow_accept_addr '{}' is not a valid address (expected ip:port)", self.slow_accept_addr));
            valid = false;
        }
        if self.listen_addr == self.slow_accept_addr {
            crate::log::error("listen_addr and slow_accept_addr must be different ports");
            valid = false;
        }

        if self.buffer_size < 1024 {
            crate::log::warn(&format!("buffer_size too small ({}), using 1024", self.buffer_size));
            self.buffer_size = 1024;
        }
        if self.client_timeout == 0 {
            crate::log::warn("client_timeout is 0, using 30");
            self.client_timeout = 30;
        }
        if self.keep_alive_timeout == 0 {
            crate::log::warn("keep_alive_timeout is 0, using 30");
            self.keep_alive_timeout = 30;
        }
        if self.keep_alive_max == 0 {
            self.keep_alive_max = 100;
        }
        if self.slow_accept_poll_ms == 0 {
            self.slow_accept_poll_ms = 100;
        }
        if self.max_body_size == 0 {
            self.max_body_size = crate::http::MAX_BODY_SIZE;
        }
        if self.max_header_size == 0 {
            self.max_header_size = crate::http::MAX_HEADER_SIZE;
        }
        if self.max_connections == 0 {
            self.max_connections = 10_000;
        }
        if self.shutdown_timeout == 0 {
            self.shutdown_timeout = 15;
        }
        if self.max_connections > 100_000 {
            crate::log::warn(&format!("max_connections very high ({}), may exhaust file descriptors", self.max_connections));
        }

        if !self.tls_cert.is_empty() || !self.tls_key.is_empty() {
            if self.tls_cert.is_empty() {
                crate::log::error("tls_key is set but tls_cert is missing");
                valid = false;
            } else if self.tls_key.is_empty() {
                crate::log::error("tls_cert is set but tls_key is missing");
                valid = false;
            } else {
                if !std::path::Path::new(&self.tls_cert).exists() {
                    crate::log::error(&format!("tls_cert file not found: {}", self.tls_cert));
                    valid = false;
                }
                if !std::path::Path::new(&self.tls_key).exists() {
                    crate::log::error(&format!("tls_key file not found: {}", self.tls_key));
                    valid = false;
                }
            }
        }

        valid
    }

    pub fn tls_enabled(&self) -> bool {
        !self.tls_cert.is_empty() && !self.tls_key.is_empty()
    }
}

fn atomic_write(path: &str, content: &str) -> std::io::Result<()> {
    let tmp = format!("{path}.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load `--config <path>` (default `config.toml`). A missing file is
/// written out with defaults; invalid fields fall back to safe values so
/// the process can always start.
pub fn load_config(module_defaults: &HashMap<String, toml::Value>) -> Config {
    let p = path();
    let mut cfg = read_or_generate(&p, module_defaults);
    if !cfg.server.validate() {
        crate::log::error("Configuration errors, falling back to safe defaults for invalid fields");
        repair(&mut cfg.server);
    }
    if merge_module_defaults(&mut cfg, module_defaults) {
        match atomic_write(&p, &generate_config(&cfg)) {
            Ok(()) => crate::log::info("Config updated with new module defaults"),
            Err(e) => crate::log::error(&format!("Failed to write config: {e}")),
        }
    }
    cfg
}

fn read_or_generate(p: &str, module_defaults: &HashMap<String, toml::Value>) -> Config {
    let txt = match fs::read_to_string(p) {
        Ok(t) => t,
        Err(_) => {
            let cfg = Config { server: Srv::default(), modules: module_defaults.clone() };
            match atomic_write(p, &generate_config(&cfg)) {
                Ok(()) => crate::log::info(&format!("Generated {p}")),
                Err(_) => crate::log::warn(&format!("No config at '{p}', using defaults")),
            }
            return cfg;
        }
    };
    match toml::from_str(&txt) {
        Ok(c) => {
            crate::log::info(&format!("Loaded {p}"));
            c
        }
        Err(e) => {
            crate::log::error(&format!("Parse error {p}: {e}"));
            crate::log::warn("Using defaults");
            Config::default()
        }
    }
}

/// Replace fields `validate` rejected. The two listeners never end up
/// sharing an address.
pub(crate) fn repair(s: &mut Srv) {
    let d = Srv::default();
    if s.listen_addr.parse::<std::net::SocketAddr>().is_err() {
        crate::log::warn(&format!("listen_addr invalid, using {}", d.listen_addr));
        s.listen_addr = d.listen_addr.clone();
    }
    if s.slow_accept_addr.parse::<std::net::SocketAddr>().is_err() || s.slow_accept_addr == s.listen_addr {
        let fallback = if s.listen_addr == d.slow_accept_addr { d.listen_addr } else { d.slow_accept_addr };
        crate::log::warn(&format!("slow_accept_addr invalid, using {fallback}"));
        s.slow_accept_addr = fallback;
    }
    let usable = |f: &str| !f.is_empty() && std::path::Path::new(f).exists();
    if (!s.tls_cert.is_empty() || !s.tls_key.is_empty()) && !(usable(&s.tls_cert) && usable(&s.tls_key)) {
        crate::log::warn("TLS config invalid, disabling TLS");
        s.tls_cert.clear();
        s.tls_key.clear();
    }
}

/// Add tables for modules the file does not mention yet. True if any were added.
fn merge_module_defaults(cfg: &mut Config, module_defaults: &HashMap<String, toml::Value>) -> bool {
    let before = cfg.modules.len();
    for (name, value) in module_defaults {
        cfg.modules.entry(name.clone()).or_insert_with(|| value.clone());
    }
    cfg.modules.len() != before
}

pub fn generate_config(cfg: &Config) -> String {
    let s = &cfg.server;
    let mut doc = toml::Table::new();
    let mut srv = toml::Table::new();
    srv.insert("listen_addr".into(), toml::Value::String(s.listen_addr.clone()));
    srv.insert("slow_accept_addr".into(), toml::Value::String(s.slow_accept_addr.clone()));
    srv.insert("slow_accept_delay_ms".into(), toml::Value::Integer(s.slow_accept_delay_ms as i64));
    srv.insert("slow_accept_poll_ms".into(), toml::Value::Integer(s.slow_accept_poll_ms as i64));
    srv.insert("buffer_size".into(), toml::Value::Integer(s.buffer_size as i64));
    srv.insert("client_timeout".into(), toml::Value::Integer(s.client_timeout as i64));
    srv.insert("keep_alive_timeout".into(), toml::Value::Integer(s.keep_alive_timeout as i64));
    srv.insert("keep_alive_max".into(), toml::Value::Integer(s.keep_alive_max as i64));
    srv.insert("max_header_size".into(), toml::Value::Integer(s.max_header_size as i64));
    srv.insert("max_body_size".into(), toml::Value::Integer(s.max_body_size as i64));
    srv.insert("max_connections".into(), toml::Value::Integer(s.max_connections as i64));
    srv.insert("shutdown_timeout".into(), toml::Value::Integer(s.shutdown_timeout as i64));
    srv.insert("log_level".into(), toml::Value::String(s.log_level.clone()));
    srv.insert("logging".into(), toml::Value::Boolean(s.logging));
    srv.insert("tls_cert".into(), toml::Value::String(s.tls_cert.clone()));
    srv.insert("tls_key".into(), toml::Value::String(s.tls_key.clone()));
    srv.insert("http2".into(), toml::Value::Boolean(s.http2));
    doc.insert("server".into(), toml::Value::Table(srv));
    let mut mods = toml::Table::new();
    for (name, value) in &cfg.modules {
        mods.insert(name.clone(), value.clone());
    }
    doc.insert("modules".into(), toml::Value::Table(mods));
    match toml::to_string_pretty(&doc) {
        Ok(s) => s,
        Err(e) => {
            crate::log::error(&format!("Config serialization failed: {e}"));
            String::new()
        }
    }
}

fn path() -> String {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| "config.toml".to_string())
}
