//! INI configuration loading and the shared CLI/logging surface every role
//! binary starts from (spec §6).

mod balancer;
mod cli;
mod decoder_frontend;
mod error;
mod ini_source;
mod logging;
mod processor;
mod transport;

pub use balancer::{load as load_balancer_config, BalancerConfig};
pub use cli::{parse as parse_cli, CliArgs};
pub use decoder_frontend::{load as load_decoder_frontend_config, DecoderFrontendConfig};
pub use error::ConfigError;
pub use logging::init as init_logging;
pub use processor::{load as load_processor_config, ProcessorConfig};
pub use transport::TransportConfig;
