/// Initialises `tracing-subscriber` the way every teacher binary does:
/// `RUST_LOG` wins if set, otherwise the CLI `-d <level>` value becomes the
/// default filter.
pub fn init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_owned()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
