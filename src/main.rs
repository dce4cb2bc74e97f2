mod colors;
mod config;
mod context;
mod h2_handler;
mod http;
mod log;
mod metrics;
mod modules;
mod server;
mod slow_accept;


use std::time::Duration;

fn main() {
    metrics::init();
    let defaults = modules::collect_defaults();
    let c = config::load_config(&defaults);
    log::init(c.server.logging);
    log::set_level(&c.server.log_level);
    log::separator();
    log::info("Loading modules...");
    let mut p = modules::Pipeline::new();
    modules::register_all(&mut p, &c.modules, &c.server);
    log::separator();

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error(&format!("Failed to start runtime: {e}"));
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run(c.server, p)) {
        log::error(&format!("Server failed: {e}"));
        std::process::exit(1);
    }
}

/// Bind both listeners up front, then serve them side by side until a
/// shutdown signal arrives.
async fn run(srv: config::Srv, p: modules::Pipeline) -> std::io::Result<()> {
    let slow = slow_accept::SlowAcceptServer::bind(
        &srv.slow_accept_addr,
        Duration::from_millis(srv.slow_accept_delay_ms),
        Duration::from_millis(srv.slow_accept_poll_ms),
    )
    .await
    .map_err(|e| std::io::Error::new(e.kind(), format!("slow-accept bind {}: {e}", srv.slow_accept_addr)))?;
    let listen = srv.listen_addr.clone();
    let web = server::Server::bind(srv, p)
        .await
        .map_err(|e| std::io::Error::new(e.kind(), format!("bind {listen}: {e}")))?;

    let shutdown = server::Shutdown::new();
    tokio::spawn(server::wait_for_signal(shutdown.clone()));
    let (a, b) = tokio::join!(web.run(shutdown.clone()), slow.run(shutdown.clone()));
    a?;
    b?;
    log::info("Server stopped.");
    Ok(())
}
