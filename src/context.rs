// Per-request context handed through the module pipeline
use std::collections::HashMap;
use std::time::Instant;

pub struct Context {
    strings: HashMap<String, String>,
    pub started_at: Instant,
}

impl Context {
    pub fn new() -> Self {
        Context {
            strings: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn set(&mut self, k: &str, v: String) {
        self.strings.insert(k.to_string(), v);
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.strings.get(k).map(|v| v.as_str())
    }

    /// Transport peer identity, `ip:port` of the accepted socket.
    pub fn peer(&self) -> &str {
        self.get("_peer").unwrap_or("?")
    }

    pub fn scheme(&self) -> &str {
        self.get("_scheme").unwrap_or("http")
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}
