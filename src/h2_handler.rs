// HTTP/2 connection handler: h2 streams to/from pipeline HttpRequest/HttpResponse
use crate::context::Context;
use crate::http::{BodyReader, HttpRequest, HttpResponse};
use crate::modules::Pipeline;
use bytes::Bytes;
use h2::server;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Connection-specific headers HTTP/2 forbids.
const HOP_BY_HOP: [&str; 4] = ["connection", "keep-alive", "transfer-encoding", "upgrade"];

/// Handle one HTTP/2 connection (may carry many streams).
pub async fn handle_connection<S>(io: S, pipeline: Arc<Pipeline>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = match server::handshake(io).await {
        Ok(c) => c,
        Err(e) => {
            crate::log::error(&format!("h2: handshake failed: {e}"));
            return;
        }
    };

    while let Some(result) = conn.accept().await {
        let (request, respond) = match result {
            Ok(pair) => pair,
            Err(e) => {
                if !e.is_go_away() {
                    crate::log::warn(&format!("h2: stream error: {e}"));
                }
                break;
            }
        };

        let pipe = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(e) = handle_stream(request, respond, pipe, peer).await {
                crate::log::debug(&format!("h2: stream error: {e}"));
            }
        });
    }
}

async fn handle_stream(
    request: http::Request<h2::RecvStream>,
    mut respond: server::SendResponse<Bytes>,
    pipeline: Arc<Pipeline>,
    peer: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (parts, mut body_stream) = request.into_parts();

    let mut body = Vec::new();
    while let Some(chunk) = body_stream.data().await {
        let data = chunk?;
        let _ = body_stream.flow_control().release_capacity(data.len());
        body.extend_from_slice(&data);
        if body.len() > crate::http::MAX_BODY_SIZE {
            let resp = http::Response::builder().status(413).body(())?;
            let mut send = respond.send_response(resp, false)?;
            send.send_data(Bytes::from_static(b"Payload Too Large"), true)?;
            return Ok(());
        }
    }

    let mut headers = Vec::new();
    if let Some(authority) = parts.uri.authority() {
        headers.push(("host".to_string(), authority.to_string()));
    }
    for (name, value) in parts.headers.iter() {
        if let Ok(v) = value.to_str() {
            headers.push((name.to_string(), v.to_string()));
        }
    }
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());
    let method = parts.method.to_string();

    crate::metrics::inc_requests();
    crate::metrics::add_bytes_in(body.len() as u64);
    crate::log::request(&method, &path, &peer.to_string());

    let mut req = HttpRequest {
        method,
        path,
        version: "HTTP/2".to_string(),
        headers,
        body,
    };
    let head_only = req.method.eq_ignore_ascii_case("HEAD");

    let mut ctx = Context::new();
    ctx.set("_peer", peer.to_string());
    ctx.set("_client_ip", peer.ip().to_string());
    ctx.set("_protocol", "h2".to_string());
    ctx.set("_scheme", "https".to_string());
    let mut resp = if pipeline.streams_body(&req) {
        let body = std::mem::take(&mut req.body);
        let mut reader = BodyReader::buffered(&body);
        pipeline.handle_streamed(&mut req, &mut reader, &mut ctx).await
    } else {
        pipeline.handle(&mut req, &mut ctx).await
    };

    let streaming = resp.stream.is_some();
    crate::log::response(resp.status_code, ctx.elapsed_ms(), streaming);
    crate::metrics::record_latency(ctx.elapsed_ms() as u64);
    if resp.status_code < 400 {
        crate::metrics::inc_requests_ok();
    } else {
        crate::metrics::inc_requests_err();
    }

    send(&mut respond, &mut resp, head_only).await.inspect_err(|_| {
        if streaming {
            crate::metrics::inc_streams_aborted();
        }
    })
}

async fn send(
    respond: &mut server::SendResponse<Bytes>,
    resp: &mut HttpResponse,
    head_only: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut builder = http::Response::builder().status(resp.status_code);
    for (name, value) in &resp.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) { continue; }
        builder = builder.header(name.as_str(), value.as_str());
    }
    let h2_resp = builder.body(())?;

    let source = resp.stream.take();
    let is_empty = head_only || (source.is_none() && resp.body.is_empty());
    let mut send = respond.send_response(h2_resp, is_empty)?;
    if is_empty {
        return Ok(());
    }

    let Some(mut src) = source else {
        crate::metrics::add_bytes_out(resp.body.len() as u64);
        send.send_data(Bytes::from(std::mem::take(&mut resp.body)), true)?;
        return Ok(());
    };
    // A peer reset ends generation at once; the source is dropped with it.
    loop {
        let next = tokio::select! {
            next = src.next_chunk() => next,
            reset = std::future::poll_fn(|cx| send.poll_reset(cx)) => {
                let err: h2::Error = match reset {
                    Ok(reason) => reason.into(),
                    Err(e) => e,
                };
                return Err(err.into());
            }
        };
        let Some(data) = next else { break };
        crate::metrics::add_bytes_out(data.len() as u64);
        send_flow_controlled(&mut send, data).await?;
    }
    send.send_data(Bytes::new(), true)?;
    Ok(())
}

/// Send `data` no faster than the peer's flow-control window allows.
async fn send_flow_controlled(send: &mut h2::SendStream<Bytes>, mut data: Bytes) -> Result<(), h2::Error> {
    while !data.is_empty() {
        send.reserve_capacity(data.len());
        let cap = match std::future::poll_fn(|cx| send.poll_capacity(cx)).await {
            Some(Ok(n)) => n,
            Some(Err(e)) => return Err(e),
            None => return Err(h2::Reason::CANCEL.into()),
        };
        if cap == 0 { continue; }
        let n = cap.min(data.len());
        send.send_data(data.split_to(n), false)?;
    }
    Ok(())
}
