// Async TCP/TLS server: HTTP/1.1 keep-alive and pipelining, HTTP/2 over ALPN
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::config::Srv;
use crate::context::Context;
use crate::http::{self, BodyFraming, BodyReader, BodyResult, HttpResponse, ReadResult};
use crate::modules::Pipeline;

/// Process-wide stop flag shared by both listeners.
#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Shutdown::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Resolves on Ctrl-C or SIGTERM and flips `shutdown`.
pub async fn wait_for_signal(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                crate::log::warn(&format!("SIGTERM handler unavailable: {e}"));
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    crate::log::info("Shutdown requested");
    shutdown.trigger();
}

struct ConnGuard(Arc<AtomicUsize>);

impl ConnGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        ConnGuard(Arc::clone(active))
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// How long a connection closed with request bytes still in flight keeps
/// reading, so the client sees the reply instead of a reset.
const LINGER: Duration = Duration::from_secs(2);

/// Per-connection limits lifted out of `Srv`.
#[derive(Clone, Copy)]
struct Limits {
    buf_size: usize,
    client_timeout: Duration,
    keep_alive_timeout: Duration,
    keep_alive_max: usize,
    max_header: usize,
    max_body: usize,
}

impl Limits {
    fn from_cfg(c: &Srv) -> Self {
        Limits {
            buf_size: c.buffer_size,
            client_timeout: Duration::from_secs(c.client_timeout),
            keep_alive_timeout: Duration::from_secs(c.keep_alive_timeout),
            keep_alive_max: c.keep_alive_max,
            max_header: c.max_header_size,
            max_body: c.max_body_size,
        }
    }
}

pub struct Server {
    cfg: Srv,
    pipe: Arc<Pipeline>,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the HTTP listener. Failure here is fatal for the process.
    pub async fn bind(cfg: Srv, pipe: Pipeline) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&cfg.listen_addr).await?;
        let tls = build_tls_config(&cfg).map(TlsAcceptor::from);
        Ok(Server { cfg, pipe: Arc::new(pipe), listener, tls, active: Arc::new(AtomicUsize::new(0)) })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub async fn run(self, shutdown: Shutdown) -> std::io::Result<()> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let mut protos = vec!["HTTP/1.1"];
        if self.tls.is_some() && self.cfg.http2 { protos.push("HTTP/2"); }
        crate::log::info(&format!(
            "Listening on {} ({scheme}) [{}]",
            self.local_addr()?,
            protos.join(", ")
        ));
        crate::log::info(&format!(
            "Modules: {} | Max connections: {}",
            self.pipe.module_names().join(", "),
            self.cfg.max_connections
        ));

        let limits = Limits::from_cfg(&self.cfg);
        loop {
            if shutdown.is_triggered() { break; }
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((tcp, addr)) => self.dispatch(tcp, addr, limits, &shutdown),
                    Err(e) => {
                        if !shutdown.is_triggered() {
                            crate::log::error(&format!("Accept error: {e}"));
                        }
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        crate::log::info("Draining connections...");
        let timeout_secs = self.cfg.shutdown_timeout;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        let mut last_logged = 0usize;
        loop {
            let active = self.active_connections();
            if active == 0 {
                crate::log::info("All connections drained");
                break;
            }
            if tokio::time::Instant::now() > deadline {
                crate::log::warn(&format!("Forcing shutdown with {active} active connections (timeout {timeout_secs}s)"));
                break;
            }
            if active != last_logged {
                crate::log::info(&format!("Waiting for {active} connection(s) to finish..."));
                last_logged = active;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        crate::log::info("HTTP server stopped");
        Ok(())
    }

    fn dispatch(&self, tcp: TcpStream, addr: SocketAddr, limits: Limits, shutdown: &Shutdown) {
        if self.active_connections() >= self.cfg.max_connections {
            tokio::spawn(reject_overloaded(tcp));
            return;
        }
        let guard = ConnGuard::new(&self.active);
        let pipe = Arc::clone(&self.pipe);
        let tls = self.tls.clone();
        let http2 = self.cfg.http2;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _guard = guard;
            crate::metrics::inc_connections();
            let _ = tcp.set_nodelay(true);
            let Some(acceptor) = tls else {
                serve_h1(tcp, addr, "http", &pipe, limits, &shutdown).await;
                return;
            };
            let stream = match tokio::time::timeout(Duration::from_secs(10), acceptor.accept(tcp)).await {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    crate::log::debug(&format!("TLS handshake failed from {addr}: {e}"));
                    return;
                }
                Err(_) => {
                    crate::log::debug(&format!("TLS handshake timeout from {addr}"));
                    return;
                }
            };
            if http2 && stream.get_ref().1.alpn_protocol() == Some(&b"h2"[..]) {
                crate::h2_handler::handle_connection(stream, pipe, addr).await;
            } else {
                serve_h1(stream, addr, "https", &pipe, limits, &shutdown).await;
            }
        });
    }
}

async fn reject_overloaded(mut tcp: TcpStream) {
    crate::metrics::inc_requests_err();
    let mut resp = HttpResponse::error(503, "Server overloaded").with_header("Connection", "close");
    let mut out = resp.head_bytes();
    out.append(&mut resp.body);
    let _ = tcp.write_all(&out).await;
    let _ = tcp.shutdown().await;
}

/// Reply to a request that could not be framed, then close.
async fn reply_and_close<S>(io: &mut S, code: u16, msg: &str)
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    crate::metrics::inc_requests_err();
    let mut resp = HttpResponse::error(code, msg).with_header("Connection", "close");
    crate::log::response(code, 0, false);
    let mut scratch = Vec::new();
    if let Ok(n) = http::write_response(io, &mut resp, false, &mut scratch).await {
        crate::metrics::add_bytes_out(n);
    }
}

/// Serve HTTP/1.1 requests on one connection until either side closes it.
async fn serve_h1<S>(mut io: S, addr: SocketAddr, scheme: &str, pipe: &Pipeline, limits: Limits, shutdown: &Shutdown)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = addr.to_string();
    let mut buf: Vec<u8> = Vec::new();
    let mut served = 0usize;
    let mut linger = false;

    loop {
        let wait = if served == 0 { limits.client_timeout } else { limits.keep_alive_timeout };
        let head = tokio::time::timeout(wait, http::read_request_head(&mut io, &mut buf, limits.buf_size, limits.max_header)).await;
        let mut req = match head {
            Ok(ReadResult::Ok(r)) => r,
            Ok(ReadResult::Closed) | Ok(ReadResult::TimedOut) => break,
            Err(_) => {
                crate::log::debug(&format!("Idle timeout for {peer} after {served} request(s)"));
                break;
            }
            Ok(ReadResult::Error(e)) => {
                match e.as_str() {
                    "headers too large" => reply_and_close(&mut io, 431, "Request Header Fields Too Large").await,
                    "bad request" => reply_and_close(&mut io, 400, "Bad Request").await,
                    _ => crate::log::debug(&format!("Read error from {peer}: {e}")),
                }
                break;
            }
        };
        served += 1;
        crate::metrics::inc_requests();
        crate::log::request(&req.method, &req.path, &peer);

        let mut ctx = Context::new();
        ctx.set("_peer", peer.clone());
        ctx.set("_client_ip", addr.ip().to_string());
        ctx.set("_protocol", "h1".to_string());
        ctx.set("_scheme", scheme.to_string());
        let head_only = req.method.eq_ignore_ascii_case("HEAD");

        let Some(framing) = req.framing() else {
            reply_and_close(&mut io, 400, "Invalid Content-Length").await;
            break;
        };
        if let BodyFraming::Length(n) = framing {
            if n > limits.max_body {
                reply_and_close(&mut io, 413, "Payload Too Large").await;
                break;
            }
        }
        if framing != BodyFraming::Empty
            && req.get_header("Expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
        {
            if io.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.is_err() { break; }
        }

        let streamed = pipe.streams_body(&req);
        let on_wire = match framing {
            BodyFraming::Length(n) if streamed => {
                Some(BodyReader::from_conn(&mut io, &mut buf, n, limits.client_timeout))
            }
            BodyFraming::Chunked if streamed => {
                Some(BodyReader::from_conn_chunked(&mut io, &mut buf, limits.max_body, limits.client_timeout))
            }
            _ => None,
        };
        let (mut resp, drained) = match on_wire {
            Some(mut reader) => {
                let resp = pipe.handle_streamed(&mut req, &mut reader, &mut ctx).await;
                crate::metrics::add_bytes_in(reader.consumed() as u64);
                (resp, reader.is_drained())
            }
            None => {
                match http::read_body(&mut io, &mut buf, framing, limits.max_body, limits.client_timeout).await {
                    BodyResult::Ok(b) => req.body = b,
                    BodyResult::TooLarge => {
                        reply_and_close(&mut io, 413, "Payload Too Large").await;
                        break;
                    }
                    BodyResult::Malformed => {
                        reply_and_close(&mut io, 400, "Malformed chunked body").await;
                        break;
                    }
                    BodyResult::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // stalled client: reply before closing
                        crate::metrics::inc_internal_errors();
                        crate::log::error(&format!("{}: body read from {peer} failed: {e}", req.route()));
                        reply_and_close(&mut io, 500, "Internal error: request body timed out").await;
                        linger = true;
                        break;
                    }
                    BodyResult::Io(e) => {
                        crate::log::debug(&format!("Body read from {peer} failed: {e}"));
                        break;
                    }
                }
                crate::metrics::add_bytes_in(req.body.len() as u64);
                let resp = if streamed {
                    let body = std::mem::take(&mut req.body);
                    let mut reader = BodyReader::buffered(&body);
                    pipe.handle_streamed(&mut req, &mut reader, &mut ctx).await
                } else {
                    pipe.handle(&mut req, &mut ctx).await
                };
                (resp, true)
            }
        };

        linger = !drained;
        let close = !drained
            || !req.keep_alive()
            || resp.wants_close()
            || served >= limits.keep_alive_max
            || shutdown.is_triggered();
        if close {
            resp.set_header("Connection", "close");
        } else if req.version == "HTTP/1.0" {
            resp.set_header("Connection", "keep-alive");
        }

        let status = resp.status_code;
        let streaming = resp.stream.is_some();
        let written = http::write_response(&mut io, &mut resp, head_only, &mut buf).await;

        crate::metrics::record_latency(ctx.elapsed_ms() as u64);
        if status < 400 {
            crate::metrics::inc_requests_ok();
        } else {
            crate::metrics::inc_requests_err();
        }
        crate::log::response(status, ctx.elapsed_ms(), streaming);

        match written {
            Ok(n) => crate::metrics::add_bytes_out(n),
            Err(e) => {
                if streaming {
                    crate::metrics::inc_streams_aborted();
                    crate::log::debug(&format!("Stream to {peer} aborted: {e}"));
                } else {
                    crate::log::warn(&format!("Failed to write response to {peer}: {e}"));
                }
                break;
            }
        }
        crate::log::separator();
        if close { break; }
    }
    let _ = io.shutdown().await;
    if linger {
        let mut sink = vec![0u8; 8192];
        let _ = tokio::time::timeout(LINGER, async {
            while let Ok(n) = io.read(&mut sink).await {
                if n == 0 { break; }
            }
        })
        .await;
    }
}

fn build_tls_config(cfg: &Srv) -> Option<Arc<rustls::ServerConfig>> {
    if !cfg.tls_enabled() {
        return None;
    }

    let _ = rustls::crypto::ring::default_provider().install_default();

    let certs = load_certs(&cfg.tls_cert)?;
    let key = load_private_key(&cfg.tls_key)?;

    let mut config = match rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
    {
        Ok(c) => c,
        Err(e) => {
            crate::log::error(&format!("TLS config error: {e}"));
            return None;
        }
    };

    if cfg.http2 {
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    } else {
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
    }

    crate::log::info("TLS enabled");
    Some(Arc::new(config))
}

fn load_certs(path: &str) -> Option<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            crate::log::error(&format!("Failed to open TLS cert {path}: {e}"));
            return None;
        }
    };
    let mut reader = std::io::BufReader::new(file);
    let mut certs = Vec::new();
    for item in rustls_pemfile::certs(&mut reader) {
        match item {
            Ok(cert) => certs.push(cert),
            Err(e) => {
                crate::log::error(&format!("Failed to parse TLS cert: {e}"));
                return None;
            }
        }
    }
    if certs.is_empty() {
        crate::log::error("No certificates found in TLS cert file");
        return None;
    }
    Some(certs)
}

fn load_private_key(path: &str) -> Option<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            crate::log::error(&format!("Failed to open TLS key {path}: {e}"));
            return None;
        }
    };
    let mut reader = std::io::BufReader::new(file);
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(k)) => Some(k),
        Ok(None) => {
            crate::log::error("No private key found in TLS key file");
            None
        }
        Err(e) => {
            crate::log::error(&format!("Failed to parse TLS key: {e}"));
            None
        }
    }
}
