use std::net::SocketAddr;
use std::sync::Arc;

use clap::Command;
use mt_processor::Variant;
use mt_workerpool::WorkerPool;
use processor::ProcessorSink;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = mt_config::parse_cli(
        Command::new("processor")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Pre/post-processor control plane service"),
    );
    mt_config::init_logging(&cli.log_level);

    let cfg = match mt_config::load_processor_config(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let (variant, lang_config) = if cfg.pre.is_defined() {
        (Variant::Pre, Arc::new(cfg.pre))
    } else {
        (Variant::Post, Arc::new(cfg.post))
    };
    info!(?variant, "processor role selected from configuration");

    let worker_pool = Arc::new(WorkerPool::new(cfg.transport.num_threads));
    let sink = ProcessorSink::new(variant, lang_config, worker_pool);

    let sink_for_close = Arc::clone(&sink);
    let server = mt_transport::WsServer::new(Arc::clone(&sink), |_session_id| {}, move |session_id| {
        sink_for_close.cancel_session(session_id);
    });
    sink.bind_sessions(Arc::clone(&server.sessions));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.transport.port));
    info!(%addr, "processor listening");

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
        error!(%err, "processor server error");
        std::process::exit(1);
    }
}
