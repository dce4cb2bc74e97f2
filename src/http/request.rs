// HTTP request head parsing and accessors
use super::{find_hdr_end, get_hdr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
}

#[derive(Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent, including the query string.
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Parse a request head (request line + headers, terminated by a blank
    /// line). Returns None for malformed or suspicious input.
    pub fn parse_head(r: &[u8]) -> Option<Self> {
        let e = find_hdr_end(r)?;
        let t = std::str::from_utf8(&r[..e]).ok()?;
        let mut l = t.lines();
        let rl = l.next()?;
        let mut p = rl.split_whitespace();
        let m = p.next()?.to_string();
        let path = p.next()?.to_string();
        let v = p.next()?.to_string();

        if p.next().is_some() { return None; }

        if !matches!(m.as_str(),
            "GET" | "POST" | "PUT" | "DELETE" | "PATCH" |
            "HEAD" | "OPTIONS" | "CONNECT" | "TRACE") {
            return None;
        }

        if path.bytes().any(|b| b < 0x20 || b == 0x7F) {
            return None;
        }

        if v != "HTTP/1.0" && v != "HTTP/1.1" {
            return None;
        }

        let mut h = Vec::new();
        for ln in l {
            if ln.is_empty() { break; }
            if let Some((k, val)) = ln.split_once(':') {
                h.push((k.trim().to_string(), val.trim().to_string()));
            }
        }
        Some(HttpRequest { method: m, path, version: v, headers: h, body: Vec::new() })
    }

    pub fn get_header(&self, n: &str) -> Option<&str> {
        get_hdr(&self.headers, n)
    }

    pub fn set_header(&mut self, n: &str, val: &str) {
        for (k, v) in self.headers.iter_mut() {
            if k.eq_ignore_ascii_case(n) {
                *v = val.to_string();
                return;
            }
        }
        self.headers.push((n.to_string(), val.to_string()));
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split_once('?').map(|(p, _)| p).unwrap_or(&self.path)
    }

    pub fn query(&self) -> &str {
        self.path.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    /// Decoded query pairs in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// First decoded value for `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query().as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Body framing declared by the headers. None when Content-Length is
    /// unparsable.
    pub fn framing(&self) -> Option<BodyFraming> {
        let chunked = self.get_header("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false);
        if chunked {
            return Some(BodyFraming::Chunked);
        }
        match self.get_header("Content-Length") {
            Some(v) => match v.parse::<usize>() {
                Ok(0) => Some(BodyFraming::Empty),
                Ok(n) => Some(BodyFraming::Length(n)),
                Err(_) => None,
            },
            None => Some(BodyFraming::Empty),
        }
    }

    /// Whether the client asked to keep the connection open afterwards.
    pub fn keep_alive(&self) -> bool {
        let conn = self.get_header("Connection").unwrap_or("");
        if self.version == "HTTP/1.0" {
            conn.eq_ignore_ascii_case("keep-alive")
        } else {
            !conn.eq_ignore_ascii_case("close")
        }
    }

    pub fn content_type(&self) -> &str {
        self.get_header("Content-Type").unwrap_or("")
    }
}
