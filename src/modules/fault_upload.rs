// Upload sinks with deterministic mid-transfer fault injection
use super::{helpers as h, Module};
use crate::context::Context;
use crate::http::{BodyReader, HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const STAGED: &str = "/upload/fault";
const IMMEDIATE: &str = "/upload/fault/immediate";
const STREAMED: &str = "/upload/fault/streamed";

pub fn default_config() -> toml::Table {
    let mut t = toml::Table::new();
    t.insert("enabled".into(), toml::Value::Boolean(true));
    t.insert("tick_ms".into(), toml::Value::Integer(100));
    t.insert("fault_after_bytes".into(), toml::Value::Integer(1_048_576));
    t.insert("fault_status".into(), toml::Value::Integer(503));
    t.insert("fault_message".into(), toml::Value::String("Simulated server fault".into()));
    t.insert("chunk_size".into(), toml::Value::Integer(65_536));
    t
}

pub fn register(ctx: &mut super::ModuleContext) {
    if !h::is_enabled(ctx.config, "fault_upload") { return; }
    let m = "fault_upload";
    let status = h::config_u64(ctx.config, m, "fault_status", 503);
    let status = if (400..=599).contains(&status) {
        status as u16
    } else {
        crate::log::warn(&format!("fault_upload: fault_status {status} out of range, using 503"));
        503
    };
    let chunk_size = match h::config_usize(ctx.config, m, "chunk_size", 65_536) {
        0 => {
            crate::log::warn("fault_upload: chunk_size is 0, using 65536");
            65_536
        }
        n => n,
    };
    ctx.pipeline.add(Box::new(FaultUpload {
        tick: h::config_millis(ctx.config, m, "tick_ms", 100),
        defaults: FaultPlan {
            threshold: h::config_usize(ctx.config, m, "fault_after_bytes", 1_048_576),
            status,
            message: h::config_str(ctx.config, m, "fault_message", "Simulated server fault"),
            chunk_size,
        },
    }));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fault fires once processed bytes exceed this.
    pub threshold: usize,
    pub status: u16,
    pub message: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    Idle,
    Reading,
    Processing,
    Faulted,
    Completed,
}

/// Per-request fault state machine:
/// `Idle -> Reading -> Processing* -> Faulted | Completed`.
pub struct FaultInjector {
    plan: FaultPlan,
    state: FaultState,
    processed: usize,
}

impl FaultInjector {
    pub fn new(plan: FaultPlan) -> Self {
        FaultInjector { plan, state: FaultState::Idle, processed: 0 }
    }

    pub fn plan(&self) -> &FaultPlan { &self.plan }

    pub fn state(&self) -> FaultState { self.state }

    pub fn processed(&self) -> usize { self.processed }

    pub fn begin(&mut self) {
        if self.state == FaultState::Idle {
            self.state = FaultState::Reading;
        }
    }

    /// Account for `n` more processed bytes. Terminal states are sticky.
    pub fn advance(&mut self, n: usize) -> FaultState {
        if matches!(self.state, FaultState::Faulted | FaultState::Completed) {
            return self.state;
        }
        self.processed += n;
        self.state = if self.processed > self.plan.threshold {
            FaultState::Faulted
        } else {
            FaultState::Processing
        };
        self.state
    }

    pub fn finish(&mut self) -> FaultState {
        if self.state != FaultState::Faulted {
            self.state = FaultState::Completed;
        }
        self.state
    }
}

struct FaultUpload {
    tick: Duration,
    defaults: FaultPlan,
}

impl FaultUpload {
    /// Module defaults overridden by `fail_after`, `status`, `chunk_size`
    /// and `message` query parameters.
    fn plan_for(&self, r: &HttpRequest) -> Result<FaultPlan, HttpResponse> {
        let mut plan = self.defaults.clone();
        match h::query_num::<usize>(r, "fail_after") {
            Ok(Some(n)) => plan.threshold = n,
            Ok(None) => {}
            Err(v) => return Err(h::bad_request(&format!("Invalid fail_after '{v}'"))),
        }
        match h::query_num::<u16>(r, "status") {
            Ok(Some(s)) if (400..=599).contains(&s) => plan.status = s,
            Ok(Some(s)) => return Err(h::bad_request(&format!("status {s} must be between 400 and 599"))),
            Ok(None) => {}
            Err(v) => return Err(h::bad_request(&format!("Invalid status '{v}'"))),
        }
        match h::query_num::<usize>(r, "chunk_size") {
            Ok(Some(0)) => return Err(h::bad_request("chunk_size must be positive")),
            Ok(Some(n)) => plan.chunk_size = n,
            Ok(None) => {}
            Err(v) => return Err(h::bad_request(&format!("Invalid chunk_size '{v}'"))),
        }
        if let Some(m) = r.query_param("message") {
            plan.message = m;
        }
        Ok(plan)
    }

    /// Eagerly read body, then walked one simulated chunk per tick.
    async fn staged(&self, body: &[u8], plan: FaultPlan, ct: &str) -> HttpResponse {
        let mut inj = FaultInjector::new(plan);
        inj.begin();
        for chunk in body.chunks(inj.plan().chunk_size) {
            tokio::time::sleep(self.tick).await;
            if inj.advance(chunk.len()) == FaultState::Faulted {
                return fault_response(STAGED, &inj);
            }
        }
        inj.finish();
        success(inj.processed(), ct)
    }

    /// Body pulled off the connection one simulated chunk per tick; the
    /// fault reply can go out while the client is still uploading.
    async fn streamed(&self, b: &mut BodyReader<'_>, plan: FaultPlan, ct: &str) -> HttpResponse {
        let mut inj = FaultInjector::new(plan);
        inj.begin();
        loop {
            let chunk = match b.read_chunk(inj.plan().chunk_size).await {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => return internal_error(STREAMED, &e),
            };
            tokio::time::sleep(self.tick).await;
            if inj.advance(chunk.len()) == FaultState::Faulted {
                return fault_response(STREAMED, &inj);
            }
        }
        inj.finish();
        success(inj.processed(), ct)
    }
}

fn success(total: usize, ct: &str) -> HttpResponse {
    let ct = if ct.is_empty() { serde_json::Value::Null } else { json!(ct) };
    HttpResponse::json(200, &json!({
        "status": "success",
        "total_bytes": total,
        "content_type": ct,
    }))
}

fn fault_response(route: &str, inj: &FaultInjector) -> HttpResponse {
    let plan = inj.plan();
    crate::metrics::inc_faults();
    crate::log::fault(route, plan.status, inj.processed(), plan.threshold);
    HttpResponse::json(plan.status, &json!({ "detail": plan.message }))
}

fn internal_error(route: &str, e: &std::io::Error) -> HttpResponse {
    crate::metrics::inc_internal_errors();
    crate::log::error(&format!("{route}: I/O failure while simulating fault: {e}"));
    HttpResponse::json(500, &json!({ "detail": "Internal error", "error": e.to_string() }))
        .with_header("Connection", "close")
}

/// `filename`, `content_type`, `size_bytes` of an upload. Multipart bodies
/// describe their first file part; anything else the raw body.
pub fn upload_info(ct: &str, body: &[u8]) -> Option<serde_json::Value> {
    match multipart_boundary(ct) {
        Some(boundary) => {
            let part = first_file_part(body, &boundary)?;
            Some(json!({
                "filename": part.filename,
                "content_type": part.content_type,
                "size_bytes": part.size,
            }))
        }
        None => Some(json!({
            "filename": serde_json::Value::Null,
            "content_type": if ct.is_empty() { serde_json::Value::Null } else { json!(ct) },
            "size_bytes": body.len(),
        })),
    }
}

fn multipart_boundary(ct: &str) -> Option<String> {
    let (kind, params) = ct.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|p| {
        let (k, v) = p.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("boundary") {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

struct Part {
    filename: Option<String>,
    content_type: Option<String>,
    size: usize,
}

fn find_bytes(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > hay.len() { return None; }
    hay[from..].windows(needle.len()).position(|w| w == needle).map(|i| i + from)
}

fn disposition_param(disposition: &str, key: &str) -> Option<String> {
    disposition.split(';').find_map(|p| {
        let (k, v) = p.split_once('=')?;
        if k.trim().eq_ignore_ascii_case(key) {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn first_file_part(body: &[u8], boundary: &str) -> Option<Part> {
    let delim = format!("--{boundary}").into_bytes();
    let mut first = None;
    let mut pos = find_bytes(body, &delim, 0)? + delim.len();
    loop {
        if body[pos..].starts_with(b"--") { break; }
        let hdr_start = pos + 2;
        let hdr_end = find_bytes(body, b"\r\n\r\n", hdr_start)?;
        let data_start = hdr_end + 4;
        let next = find_bytes(body, &delim, data_start)?;
        let data_end = next.saturating_sub(2).max(data_start);

        let head = String::from_utf8_lossy(&body[hdr_start..hdr_end]);
        let mut filename = None;
        let mut content_type = None;
        for line in head.lines() {
            let Some((k, v)) = line.split_once(':') else { continue };
            if k.trim().eq_ignore_ascii_case("Content-Disposition") {
                filename = disposition_param(v, "filename");
            } else if k.trim().eq_ignore_ascii_case("Content-Type") {
                content_type = Some(v.trim().to_string());
            }
        }
        let part = Part { filename, content_type, size: data_end - data_start };
        if part.filename.is_some() {
            return Some(part);
        }
        if first.is_none() {
            first = Some(part);
        }
        pos = next + delim.len();
    }
    first
}

#[async_trait]
impl Module for FaultUpload {
    fn name(&self) -> &str { "fault_upload" }

    fn streams_body(&self, r: &HttpRequest) -> bool {
        h::is_method(r, &["POST", "PUT"]) && matches!(r.route(), IMMEDIATE | STREAMED)
    }

    async fn handle(&self, r: &mut HttpRequest, _: &mut Context) -> Option<HttpResponse> {
        if !h::is_method(r, &["POST", "PUT"]) { return None; }
        match r.route() {
            "/upload" => Some(match upload_info(r.content_type(), &r.body) {
                Some(info) => HttpResponse::json(200, &info),
                None => h::bad_request("Missing file part in multipart body"),
            }),
            STAGED => {
                let plan = match self.plan_for(r) {
                    Ok(p) => p,
                    Err(resp) => return Some(resp),
                };
                Some(self.staged(&r.body, plan, r.content_type()).await)
            }
            _ => None,
        }
    }

    async fn handle_body_stream(&self, r: &mut HttpRequest, b: &mut BodyReader<'_>, _: &mut Context) -> Option<HttpResponse> {
        let plan = match self.plan_for(r) {
            Ok(p) => p,
            Err(resp) => return Some(resp),
        };
        match r.route() {
            IMMEDIATE => {
                let inj = FaultInjector::new(plan);
                Some(fault_response(IMMEDIATE, &inj))
            }
            STREAMED => Some(self.streamed(b, plan, r.content_type()).await),
            _ => None,
        }
    }
}
