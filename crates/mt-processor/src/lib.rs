//! The processor job (spec §4.5): file-based external script invocation
//! with chunked streaming replies, shared by the pre- and post-processor
//! roles.

mod config;
mod job;

pub use config::{ConfigError, LanguageConfig};
pub use job::{ProcessorError, ProcessorJob, ResponseSender, Variant, MESSAGE_MAX_CHAR_LEN};
