use crate::error::ConfigError;
use crate::ini_source::IniSource;
use crate::transport::{self, TransportConfig};

const SECTION: &str = "decoder_frontend";

/// Loaded `[decoder_frontend]` INI section: just the shared listener/TLS
/// config. The stub decode backend (spec §D) needs no further tuning keys.
pub struct DecoderFrontendConfig {
    pub transport: TransportConfig,
}

pub fn load(path: &std::path::Path) -> Result<DecoderFrontendConfig, ConfigError> {
    let source = IniSource::load(path)?;
    let transport = transport::load(&source, SECTION)?;
    Ok(DecoderFrontendConfig { transport })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_plaintext_section() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[decoder_frontend]\nserver_port = 9200\nnum_threads = 4\nis_tls_server = false\n").unwrap();
        let cfg = load(f.path()).unwrap();
        assert_eq!(cfg.transport.port, 9200);
    }
}
