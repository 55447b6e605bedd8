use std::path::PathBuf;

use mt_transport::{ServerTlsConfig, TlsProfile};
use tracing::warn;

use crate::error::ConfigError;
use crate::ini_source::IniSource;

/// The listener/TLS keys every role's INI section carries in common (spec
/// §6: `server_port`, `is_tls_server`, `tls_mode`, `tls_ciphers`,
/// `tls_crt_file`/`tls_key_file`/`tls_tmp_dh_file`, `num_threads`).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub port: u16,
    pub num_threads: usize,
    pub tls: Option<ServerTlsConfig>,
}

pub fn load(source: &IniSource, section: &'static str) -> Result<TransportConfig, ConfigError> {
    let port = source.required_u16(section, "server_port")?;
    let num_threads = source.required_usize_positive(section, "num_threads")?;
    let is_tls_server = source.required_bool(section, "is_tls_server")?;

    if let Some(ciphers) = source.optional(section, "tls_ciphers") {
        warn!(section, ciphers, "tls_ciphers is set but not applied; rustls selects its own suite set");
    }

    let tls = if is_tls_server {
        let mode = source.required(section, "tls_mode")?;
        let profile = TlsProfile::parse(&mode).ok_or_else(|| ConfigError::InvalidValue {
            section,
            key: "tls_mode",
            reason: format!("'{mode}' is not one of old/int/mod"),
        })?;
        Some(ServerTlsConfig {
            profile,
            cert_file: PathBuf::from(source.required(section, "tls_crt_file")?),
            key_file: PathBuf::from(source.required(section, "tls_key_file")?),
            dh_file: PathBuf::from(source.required(section, "tls_tmp_dh_file")?),
        })
    } else {
        None
    };

    Ok(TransportConfig { port, num_threads, tls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_section(contents: &str) -> Result<TransportConfig, ConfigError> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        let src = IniSource::load(f.path()).unwrap();
        load(&src, "processor")
    }

    #[test]
    fn plaintext_listener_has_no_tls() {
        let cfg = load_section(
            "[processor]\nserver_port = 9001\nnum_threads = 4\nis_tls_server = false\n",
        )
        .unwrap();
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.num_threads, 4);
        assert!(cfg.tls.is_none());
    }

    #[test]
    fn tls_listener_requires_mode_and_files() {
        let err = load_section(
            "[processor]\nserver_port = 9001\nnum_threads = 4\nis_tls_server = true\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { key: "tls_mode", .. }));
    }

    #[test]
    fn unknown_tls_mode_is_rejected() {
        let err = load_section(concat!(
            "[processor]\nserver_port = 9001\nnum_threads = 4\nis_tls_server = true\n",
            "tls_mode = bogus\ntls_crt_file = a\ntls_key_file = b\ntls_tmp_dh_file = c\n",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "tls_mode", .. }));
    }
}
