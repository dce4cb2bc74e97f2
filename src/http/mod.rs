// HTTP/1.1 message framing and async I/O
mod body;
mod request;
mod response;
pub use body::{BodyReader, ChunkSource};
pub use request::{BodyFraming, HttpRequest};
pub use response::HttpResponse;

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const MAX_HEADER_SIZE: usize = 65_536;
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

pub fn find_hdr_end(d: &[u8]) -> Option<usize> {
    d.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_crlf(d: &[u8]) -> Option<usize> {
    d.windows(2).position(|w| w == b"\r\n")
}

pub fn get_hdr<'a>(h: &'a [(String, String)], n: &str) -> Option<&'a str> {
    for (k, v) in h {
        if k.eq_ignore_ascii_case(n) { return Some(v.as_str()); }
    }
    None
}

pub enum ReadResult {
    Ok(HttpRequest),
    /// Peer closed cleanly between two requests.
    Closed,
    TimedOut,
    Error(String),
}

pub enum BodyResult {
    Ok(Vec<u8>),
    TooLarge,
    Malformed,
    Io(std::io::Error),
}

#[derive(Debug, PartialEq)]
pub enum Chunked {
    Complete { body: Vec<u8>, consumed: usize },
    Incomplete,
    Invalid,
}

/// Hex size of a chunk-size line, extensions ignored.
fn parse_chunk_size(line: &[u8]) -> Option<usize> {
    let line = std::str::from_utf8(line).ok()?;
    let size_str = line.split(';').next().unwrap_or("").trim();
    if size_str.is_empty() || !size_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    usize::from_str_radix(size_str, 16).ok()
}

/// Decode a chunked body from the start of `d`. `consumed` covers the
/// terminating zero chunk and any trailers.
pub fn decode_chunked(d: &[u8]) -> Chunked {
    let mut pos = 0usize;
    let mut body = Vec::new();
    loop {
        let line_end = match find_crlf(&d[pos..]) {
            Some(i) => pos + i,
            None => return Chunked::Incomplete,
        };
        let Some(size) = parse_chunk_size(&d[pos..line_end]) else {
            return Chunked::Invalid;
        };
        pos = line_end + 2;

        if size == 0 {
            loop {
                let end = match find_crlf(&d[pos..]) {
                    Some(i) => pos + i,
                    None => return Chunked::Incomplete,
                };
                let empty = end == pos;
                pos = end + 2;
                if empty {
                    return Chunked::Complete { body, consumed: pos };
                }
            }
        }

        let data_end = match pos.checked_add(size) {
            Some(e) => e,
            None => return Chunked::Invalid,
        };
        if d.len() < data_end + 2 {
            return Chunked::Incomplete;
        }
        body.extend_from_slice(&d[pos..data_end]);
        if &d[data_end..data_end + 2] != b"\r\n" {
            return Chunked::Invalid;
        }
        pos = data_end + 2;
    }
}

/// Read one request head. Bytes past the head (body, pipelined requests)
/// stay in `buf`.
pub async fn read_request_head<R>(r: &mut R, buf: &mut Vec<u8>, buf_size: usize, max_header: usize) -> ReadResult
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; buf_size];
    loop {
        while buf.starts_with(b"\r\n") {
            buf.drain(..2);
        }
        if let Some(p) = find_hdr_end(buf) {
            let req = HttpRequest::parse_head(&buf[..p + 4]);
            buf.drain(..p + 4);
            return match req {
                Some(r) => ReadResult::Ok(r),
                None => ReadResult::Error("bad request".into()),
            };
        }
        if buf.len() > max_header {
            return ReadResult::Error("headers too large".into());
        }
        match r.read(&mut chunk).await {
            Ok(0) => {
                return if buf.is_empty() {
                    ReadResult::Closed
                } else {
                    ReadResult::Error("connection closed".into())
                };
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut
                       || e.kind() == std::io::ErrorKind::WouldBlock => return ReadResult::TimedOut,
            Err(e) => return ReadResult::Error(e.to_string()),
        }
    }
}

async fn fill<R>(r: &mut R, buf: &mut Vec<u8>, chunk: &mut [u8], timeout: Duration) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let n = match tokio::time::timeout(timeout, r.read(chunk)).await {
        Ok(res) => res?,
        Err(_) => return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "body read timed out")),
    };
    if n == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "body truncated"));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

/// Buffer a complete request body according to `framing`.
pub async fn read_body<R>(
    r: &mut R,
    buf: &mut Vec<u8>,
    framing: BodyFraming,
    max_body: usize,
    timeout: Duration,
) -> BodyResult
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = vec![0u8; 8192];
    match framing {
        BodyFraming::Empty => BodyResult::Ok(Vec::new()),
        BodyFraming::Length(n) => {
            if n > max_body {
                return BodyResult::TooLarge;
            }
            while buf.len() < n {
                if let Err(e) = fill(r, buf, &mut chunk, timeout).await {
                    return BodyResult::Io(e);
                }
            }
            BodyResult::Ok(buf.drain(..n).collect())
        }
        BodyFraming::Chunked => loop {
            match decode_chunked(buf) {
                Chunked::Complete { body, consumed } => {
                    buf.drain(..consumed);
                    return BodyResult::Ok(body);
                }
                Chunked::Invalid => return BodyResult::Malformed,
                Chunked::Incomplete => {
                    if buf.len() > max_body {
                        return BodyResult::TooLarge;
                    }
                    if let Err(e) = fill(r, buf, &mut chunk, timeout).await {
                        return BodyResult::Io(e);
                    }
                }
            }
        },
    }
}

/// Write `resp` to the peer. Streaming bodies are pulled one chunk at a time;
/// if the peer goes away mid-stream the source is dropped and an error is
/// returned. Bytes the peer sends meanwhile are kept in `buf`. EOF from the
/// peer only ends probing; the stream is aborted by the next failed write.
pub async fn write_response<S>(io: &mut S, resp: &mut HttpResponse, head_only: bool, buf: &mut Vec<u8>) -> std::io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut source = resp.stream.take();
    let chunked = source.is_some() && resp.get_header("Content-Length").is_none();
    if chunked {
        resp.set_header("Transfer-Encoding", "chunked");
    } else if source.is_none() && resp.get_header("Content-Length").is_none() {
        resp.set_header("Content-Length", &resp.body.len().to_string());
    }

    let head = resp.head_bytes();
    io.write_all(&head).await?;
    let mut written = head.len() as u64;

    let Some(src) = source.as_mut() else {
        if !head_only {
            io.write_all(&resp.body).await?;
            written += resp.body.len() as u64;
        }
        io.flush().await?;
        return Ok(written);
    };
    if head_only {
        io.flush().await?;
        return Ok(written);
    }
    io.flush().await?;

    let mut probe = [0u8; 1024];
    // A half-closed peer may still be reading; stop probing, keep writing.
    let mut peer_eof = false;
    loop {
        tokio::select! {
            next = src.next_chunk() => {
                let Some(data) = next else { break };
                if chunked {
                    let size_line = format!("{:x}\r\n", data.len());
                    io.write_all(size_line.as_bytes()).await?;
                    io.write_all(&data).await?;
                    io.write_all(b"\r\n").await?;
                    written += (size_line.len() + data.len() + 2) as u64;
                } else {
                    io.write_all(&data).await?;
                    written += data.len() as u64;
                }
                io.flush().await?;
            }
            read = io.read(&mut probe), if !peer_eof => match read {
                Ok(0) => peer_eof = true,
                Ok(n) => buf.extend_from_slice(&probe[..n]),
                Err(e) => return Err(e),
            },
        }
    }
    if chunked {
        io.write_all(b"0\r\n\r\n").await?;
        written += 5;
    }
    io.flush().await?;
    Ok(written)
}
