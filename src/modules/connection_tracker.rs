// Connection identity probes for keep-alive, close and pipelining tests
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("probe_delay_ms".into(), toml::Value::Integer(100));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "connection_tracker") { return; }
    ctx.pipeline.add(Box::new(ConnectionTracker {
        registry: ConnectionRegistry::new(),
        probe_delay: h::config_millis(ctx.config, "connection_tracker", "probe_delay_ms", 100),
        keep_alive_timeout: ctx.server.keep_alive_timeout,
        keep_alive_max: ctx.server.keep_alive_max,
    }));
}

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub peer_identity: String,
    pub connection_token: String,
    /// Unix time in milliseconds.
    pub created_at: u64,
}

/// Peer identity to connection token map. Lookup-or-create and removal
/// each run under one lock, so concurrent callers never see duplicate tokens.
pub struct ConnectionRegistry {
    records: Mutex<HashMap<String, ConnectionRecord>>,
    seq: AtomicU64,
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry { records: Mutex::new(HashMap::new()), seq: AtomicU64::new(0) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_token(&self) -> String {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("conn-{ts:x}-{seq:04x}")
    }

    /// Existing token for `peer`, or a freshly allocated one.
    pub fn identify(&self, peer: &str) -> String {
        let mut records = self.lock();
        if let Some(r) = records.get(peer) {
            return r.connection_token.clone();
        }
        let rec = ConnectionRecord {
            peer_identity: peer.to_string(),
            connection_token: self.next_token(),
            created_at: now_millis(),
        };
        let token = rec.connection_token.clone();
        records.insert(peer.to_string(), rec);
        crate::log::session("identified", peer);
        token
    }

    /// Drop the record for `peer`. Unknown peers are ignored.
    pub fn forget(&self, peer: &str) -> Option<ConnectionRecord> {
        let removed = self.lock().remove(peer);
        if removed.is_some() {
            crate::log::session("forgotten", peer);
        }
        removed
    }

    pub fn stats(&self) -> HashMap<String, String> {
        self.lock()
            .iter()
            .map(|(peer, r)| (peer.clone(), r.connection_token.clone()))
            .collect()
    }

    pub fn record(&self, peer: &str) -> Option<ConnectionRecord> {
        self.lock().get(peer).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

struct ConnectionTracker {
    registry: ConnectionRegistry,
    probe_delay: Duration,
    keep_alive_timeout: u64,
    keep_alive_max: usize,
}

impl ConnectionTracker {
    async fn probe(&self, r: &HttpRequest, c: &Context, delay: bool) -> HttpResponse {
        if delay && !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        let peer = c.peer();
        let token = self.registry.identify(peer);
        HttpResponse::json(200, &json!({
            "connection_id": token,
            "request_number": r.query_param("request"),
            "peer": peer,
        }))
    }
}

#[async_trait]
impl Module for ConnectionTracker {
    fn name(&self) -> &str { "connection_tracker" }

    async fn handle(&self, r: &mut HttpRequest, c: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["GET", "HEAD"]) { return None; }
        let resp = match r.route().strip_prefix("/connection/")? {
            "id" => self.probe(r, c, true).await,
            "keep-alive" => self.probe(r, c, true).await
                .with_header("Connection", "keep-alive")
                .with_header("Keep-Alive", &format!("timeout={}, max={}", self.keep_alive_timeout, self.keep_alive_max)),
            "pipeline" => self.probe(r, c, false).await,
            "close" => {
                let peer = c.peer();
                let removed = self.registry.forget(peer);
                HttpResponse::json(200, &json!({
                    "message": "Connection will be closed",
                    "connection_id": removed.map(|r| r.connection_token),
                    "peer": peer,
                }))
                .with_header("Connection", "close")
            }
            "stats" => {
                let stats = self.registry.stats();
                HttpResponse::json(200, &json!({
                    "active_connections": stats.len(),
                    "connections": stats,
                }))
            }
            _ => return None,
        };
        Some(resp)
    }
}
