// Raw TCP listener that accepts, stays silent for a fixed delay, then hangs up
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use crate::server::Shutdown;

/// Why a held connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    DelayElapsed,
    PeerLeft,
    Shutdown,
}

impl SessionEnd {
    fn as_str(self) -> &'static str {
        match self {
            SessionEnd::DelayElapsed => "closed after delay",
            SessionEnd::PeerLeft => "peer left early",
            SessionEnd::Shutdown => "closed on shutdown",
        }
    }
}

struct SessionGuard(Arc<AtomicUsize>);

impl SessionGuard {
    fn new(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        crate::metrics::slow_session_opened();
        SessionGuard(Arc::clone(pending))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        crate::metrics::slow_session_closed();
    }
}

pub struct SlowAcceptServer {
    listener: TcpListener,
    delay: Duration,
    poll: Duration,
    pending: Arc<AtomicUsize>,
}

impl SlowAcceptServer {
    pub async fn bind(addr: &str, delay: Duration, poll: Duration) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(SlowAcceptServer {
            listener,
            delay,
            poll: poll.max(Duration::from_millis(1)),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepted connections still being held.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Accept until `shutdown` fires. Each connection is held on its own task
    /// so a pending delay never blocks the next accept.
    pub async fn run(&self, shutdown: Shutdown) -> std::io::Result<()> {
        crate::log::info(&format!(
            "Slow-accept listener on {} (delay {}ms)",
            self.local_addr()?,
            self.delay.as_millis()
        ));
        loop {
            if shutdown.is_triggered() { break; }
            tokio::select! {
                res = self.listener.accept() => match res {
                    Ok((tcp, addr)) => {
                        let guard = SessionGuard::new(&self.pending);
                        let (delay, poll, shutdown) = (self.delay, self.poll, shutdown.clone());
                        tokio::spawn(async move {
                            let _guard = guard;
                            let peer = addr.to_string();
                            crate::log::session("slow-accept opened", &peer);
                            let end = hold(tcp, delay, poll, &shutdown).await;
                            crate::log::session(&format!("slow-accept {}", end.as_str()), &peer);
                        });
                    }
                    Err(e) => {
                        if !shutdown.is_triggered() {
                            crate::log::error(&format!("Slow-accept error: {e}"));
                        }
                    }
                },
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
        crate::log::info("Slow-accept listener stopped");
        Ok(())
    }
}

/// Keep `tcp` open and silent until `delay` has passed, the peer goes away,
/// or shutdown is requested. Anything the peer sends is discarded.
pub async fn hold(mut tcp: TcpStream, delay: Duration, poll: Duration, shutdown: &Shutdown) -> SessionEnd {
    let deadline = Instant::now() + delay;
    let mut sink = [0u8; 1024];
    loop {
        if shutdown.is_triggered() {
            return SessionEnd::Shutdown;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return SessionEnd::DelayElapsed,
            read = tcp.read(&mut sink) => match read {
                Ok(0) | Err(_) => return SessionEnd::PeerLeft,
                Ok(_) => {}
            },
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
