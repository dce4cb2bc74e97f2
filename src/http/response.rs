// HTTP response construction and serialization
use super::{get_hdr, ChunkSource};

pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Lazily produced body; takes precedence over `body` when set.
    pub stream: Option<Box<dyn ChunkSource>>,
}

pub fn reason(c: u16) -> &'static str {
    match c {
        200 => "OK",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Error",
    }
}

impl HttpResponse {
    pub fn new(c: u16) -> Self {
        HttpResponse {
            version: "HTTP/1.1".to_string(),
            status_code: c,
            status_text: reason(c).to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            stream: None,
        }
    }

    pub fn error(c: u16, m: &str) -> Self {
        let mut r = HttpResponse::new(c);
        r.headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Content-Length".to_string(), m.len().to_string()),
        ];
        r.body = m.as_bytes().to_vec();
        r
    }

    pub fn json(c: u16, v: &serde_json::Value) -> Self {
        let body = v.to_string();
        let mut r = HttpResponse::new(c);
        r.headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        r.body = body.into_bytes();
        r
    }

    pub fn redirect(c: u16, location: &str) -> Self {
        let mut r = HttpResponse::new(c);
        r.headers = vec![
            ("Location".to_string(), location.to_string()),
            ("Content-Length".to_string(), "0".to_string()),
        ];
        r
    }

    /// Streamed response. Callers that know the total size should also set
    /// Content-Length; otherwise the body goes out chunked.
    pub fn streaming(c: u16, content_type: &str, src: Box<dyn ChunkSource>) -> Self {
        let mut r = HttpResponse::new(c);
        r.headers.push(("Content-Type".to_string(), content_type.to_string()));
        r.stream = Some(src);
        r
    }

    pub fn with_header(mut self, n: &str, val: &str) -> Self {
        self.headers.push((n.to_string(), val.to_string()));
        self
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

    pub fn wants_close(&self) -> bool {
        self.get_header("Connection").map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false)
    }

    pub fn head_bytes(&self) -> Vec<u8> {
        let mut o = format!("{} {} {}\r\n", self.version, self.status_code, self.status_text);
        for (k, v) in &self.headers {
            o.push_str(k);
            o.push_str(": ");
            o.push_str(v);
            o.push_str("\r\n");
        }
        o.push_str("\r\n");
        o.into_bytes()
    }
}
