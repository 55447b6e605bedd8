use std::net::SocketAddr;
use std::sync::Arc;

use balancer::{BalancerSink, StubDecoderClient};
use clap::Command;
use mt_workerpool::WorkerPool;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = mt_config::parse_cli(
        Command::new("balancer")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Balancer control plane service"),
    );
    mt_config::init_logging(&cli.log_level);

    let cfg = match mt_config::load_balancer_config(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let worker_pool = Arc::new(WorkerPool::new(cfg.transport.num_threads));
    let sink = BalancerSink::new(cfg.languages, Arc::new(StubDecoderClient), worker_pool);

    let sink_for_close = Arc::clone(&sink);
    let server = mt_transport::WsServer::new(Arc::clone(&sink), |_session_id| {}, move |session_id| {
        sink_for_close.cancel_session(session_id);
    });
    sink.bind_sessions(Arc::clone(&server.sessions));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.transport.port));
    info!(%addr, "balancer listening");

    let result = match cfg.transport.tls {
        Some(tls_cfg) => match tls_cfg.build() {
            Ok(rustls_cfg) => {
                let axum_tls = mt_transport::into_axum_rustls_config(rustls_cfg);
                server.serve_tls(addr, axum_tls).await
            }
            Err(err) => {
                error!(%err, "invalid TLS configuration");
                std::process::exit(1);
            }
        },
        None => server.serve_plain(addr).await,
    };

    if let Err(err) = result {
        error!(%err, "balancer server error");
        std::process::exit(1);
    }
}
