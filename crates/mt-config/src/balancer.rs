use crate::error::ConfigError;
use crate::ini_source::IniSource;
use crate::transport::{self, TransportConfig};

const SECTION: &str = "balancer";

/// Loaded `[balancer]` INI section: the shared listener/TLS config plus the
/// static set of languages the balancer advertises in response to a
/// `SuppLangRequest`. The balancer's language registry has no decoder to
/// introspect (spec Non-goals exclude decoder internals), so `languages` is
/// a flat, comma-separated list and every language is reported as a valid
/// target for every other.
pub struct BalancerConfig {
    pub transport: TransportConfig,
    pub languages: Vec<String>,
}

pub fn load(path: &std::path::Path) -> Result<BalancerConfig, ConfigError> {
    let source = IniSource::load(path)?;
    let transport = transport::load(&source, SECTION)?;
    let raw = source.required(SECTION, "languages")?;
    let languages: Vec<String> = raw.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect();
    if languages.is_empty() {
        return Err(ConfigError::InvalidValue {
            section: SECTION,
            key: "languages",
            reason: "must list at least one language".to_owned(),
        });
    }
    Ok(BalancerConfig { transport, languages })
}
