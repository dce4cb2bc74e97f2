// Lazy response bodies and incremental request body consumption
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{Error, ErrorKind};
use std::time::Duration;
use tokio::io::AsyncRead;

/// A finite, non-restartable sequence of body chunks. The writer pulls one
/// chunk at a time and drops the source as soon as the peer is gone, so any
/// suspension inside `next_chunk` is also a cancellation point.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Option<Bytes>;
}

/// Longest chunk-size or trailer line accepted while streaming.
const MAX_LINE: usize = 4096;

/// Where a chunked body on the wire stands between two reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    SizeLine,
    Data(usize),
    DataEnd,
    Trailers,
    Done,
}

enum Wire {
    Length(usize),
    Chunked { cursor: Cursor, limit: usize },
}

enum Source<'a> {
    Conn {
        io: &'a mut (dyn AsyncRead + Unpin + Send),
        buf: &'a mut Vec<u8>,
        timeout: Duration,
        wire: Wire,
    },
    Buffered(&'a [u8]),
}

/// Request body handed to a module before it has been read, framed either
/// by Content-Length or by chunked transfer coding.
pub struct BodyReader<'a> {
    src: Source<'a>,
    consumed: usize,
}

fn invalid(msg: &str) -> Error {
    Error::new(ErrorKind::InvalidData, msg.to_string())
}

impl<'a> BodyReader<'a> {
    /// Body of `len` bytes still on the wire. `buf` holds bytes already
    /// pulled off the socket past the request head.
    pub fn from_conn(
        io: &'a mut (dyn AsyncRead + Unpin + Send),
        buf: &'a mut Vec<u8>,
        len: usize,
        timeout: Duration,
    ) -> Self {
        BodyReader { src: Source::Conn { io, buf, timeout, wire: Wire::Length(len) }, consumed: 0 }
    }

    /// Chunked body still on the wire, decoded as it is read. More than
    /// `limit` decoded bytes is an error.
    pub fn from_conn_chunked(
        io: &'a mut (dyn AsyncRead + Unpin + Send),
        buf: &'a mut Vec<u8>,
        limit: usize,
        timeout: Duration,
    ) -> Self {
        let wire = Wire::Chunked { cursor: Cursor::SizeLine, limit };
        BodyReader { src: Source::Conn { io, buf, timeout, wire }, consumed: 0 }
    }

    pub fn buffered(data: &'a [u8]) -> Self {
        BodyReader { src: Source::Buffered(data), consumed: 0 }
    }

    pub fn consumed(&self) -> usize { self.consumed }

    /// The whole body, framing included, has been taken off the connection.
    pub fn is_drained(&self) -> bool {
        match &self.src {
            Source::Buffered(data) => data.is_empty(),
            Source::Conn { wire: Wire::Length(n), .. } => *n == 0,
            Source::Conn { wire: Wire::Chunked { cursor, .. }, .. } => *cursor == Cursor::Done,
        }
    }

    /// Next piece of the body, at most `max` bytes. Only a short final piece
    /// is smaller than `max`. `Ok(None)` once the body is exhausted.
    pub async fn read_chunk(&mut self, max: usize) -> std::io::Result<Option<Vec<u8>>> {
        if max == 0 || self.is_drained() {
            return Ok(None);
        }
        let consumed = self.consumed;
        let out = match &mut self.src {
            Source::Buffered(data) => {
                let all: &'a [u8] = *data;
                let (head, tail) = all.split_at(max.min(all.len()));
                *data = tail;
                head.to_vec()
            }
            Source::Conn { io, buf, timeout, wire: Wire::Length(remaining) } => {
                let want = max.min(*remaining);
                let mut scratch = vec![0u8; want.min(64 * 1024)];
                while buf.len() < want {
                    super::fill(&mut **io, buf, &mut scratch, *timeout).await?;
                }
                *remaining -= want;
                buf.drain(..want).collect()
            }
            Source::Conn { io, buf, timeout, wire: Wire::Chunked { cursor, limit } } => {
                let out = read_chunked(&mut **io, buf, *timeout, cursor, max).await?;
                if consumed + out.len() > *limit {
                    return Err(invalid("chunked body too large"));
                }
                out
            }
        };
        if out.is_empty() {
            return Ok(None);
        }
        self.consumed += out.len();
        Ok(Some(out))
    }
}

/// Index of the next CRLF in `buf`, reading more from `io` until one shows up.
async fn line_end(
    io: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut Vec<u8>,
    scratch: &mut [u8],
    timeout: Duration,
) -> std::io::Result<usize> {
    loop {
        if let Some(i) = super::find_crlf(buf) {
            return Ok(i);
        }
        if buf.len() > MAX_LINE {
            return Err(invalid("chunk line too long"));
        }
        super::fill(&mut *io, buf, scratch, timeout).await?;
    }
}

/// Decode up to `max` body bytes of a chunked body, across chunk boundaries.
async fn read_chunked(
    io: &mut (dyn AsyncRead + Unpin + Send),
    buf: &mut Vec<u8>,
    timeout: Duration,
    cursor: &mut Cursor,
    max: usize,
) -> std::io::Result<Vec<u8>> {
    let mut scratch = vec![0u8; 16 * 1024];
    let mut out = Vec::new();
    while out.len() < max {
        match *cursor {
            Cursor::Done => break,
            Cursor::SizeLine => {
                let end = line_end(&mut *io, buf, &mut scratch, timeout).await?;
                let size = super::parse_chunk_size(&buf[..end]).ok_or_else(|| invalid("bad chunk size"))?;
                buf.drain(..end + 2);
                *cursor = if size == 0 { Cursor::Trailers } else { Cursor::Data(size) };
            }
            Cursor::Data(left) => {
                if buf.is_empty() {
                    super::fill(&mut *io, buf, &mut scratch, timeout).await?;
                }
                let n = left.min(max - out.len()).min(buf.len());
                out.extend(buf.drain(..n));
                *cursor = if n == left { Cursor::DataEnd } else { Cursor::Data(left - n) };
            }
            Cursor::DataEnd => {
                while buf.len() < 2 {
                    super::fill(&mut *io, buf, &mut scratch, timeout).await?;
                }
                if &buf[..2] != b"\r\n" {
                    return Err(invalid("missing CRLF after chunk data"));
                }
                buf.drain(..2);
                *cursor = Cursor::SizeLine;
            }
            Cursor::Trailers => {
                let end = line_end(&mut *io, buf, &mut scratch, timeout).await?;
                buf.drain(..end + 2);
                if end == 0 {
                    *cursor = Cursor::Done;
                }
            }
        }
    }
    Ok(out)
}
