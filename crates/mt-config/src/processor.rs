use std::path::PathBuf;

use mt_processor::LanguageConfig;

use crate::error::ConfigError;
use crate::ini_source::IniSource;
use crate::transport::{self, TransportConfig};

const SECTION: &str = "processor";

/// Loaded `[processor]` INI section (spec §6): the shared listener/TLS
/// config plus the pre/post call templates. At least one of
/// `pre_call_templ`/`post_call_templ` must be set.
pub struct ProcessorConfig {
    pub transport: TransportConfig,
    pub work_dir: PathBuf,
    pub pre: LanguageConfig,
    pub post: LanguageConfig,
}

pub fn load(path: &std::path::Path) -> Result<ProcessorConfig, ConfigError> {
    let source = IniSource::load(path)?;
    let transport = transport::load(&source, SECTION)?;

    let work_dir = PathBuf::from(source.required(SECTION, "work_dir")?);
    std::fs::create_dir_all(&work_dir)
        .map_err(|e| ConfigError::InvalidValue { section: SECTION, key: "work_dir", reason: e.to_string() })?;

    let pre_templ = source.optional(SECTION, "pre_call_templ");
    let post_templ = source.optional(SECTION, "post_call_templ");
    if pre_templ.is_none() && post_templ.is_none() {
        return Err(ConfigError::InvalidValue {
            section: SECTION,
            key: "pre_call_templ/post_call_templ",
            reason: "at least one of pre_call_templ or post_call_templ must be non-empty".to_owned(),
        });
    }

    let pre = build_language_config(&work_dir, pre_templ, "pre_call_templ")?;
    let post = build_language_config(&work_dir, post_templ, "post_call_templ")?;

    Ok(ProcessorConfig { transport, work_dir, pre, post })
}

fn build_language_config(
    work_dir: &std::path::Path,
    templ: Option<String>,
    key: &'static str,
) -> Result<LanguageConfig, ConfigError> {
    match templ {
        Some(templ) => LanguageConfig::new(work_dir.to_path_buf(), Some(templ))
            .map_err(|e| ConfigError::InvalidValue { section: SECTION, key, reason: e.to_string() }),
        None => Ok(LanguageConfig::undefined(work_dir.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn requires_at_least_one_call_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "[processor]\nserver_port = 9001\nnum_threads = 2\nis_tls_server = false\nwork_dir = {}\n",
            dir.path().display()
        )
        .unwrap();
        let err = load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "pre_call_templ/post_call_templ", .. }));
    }

    #[test]
    fn pre_only_config_leaves_post_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            concat!(
                "[processor]\nserver_port = 9001\nnum_threads = 2\nis_tls_server = false\n",
                "work_dir = {}\npre_call_templ = /bin/echo <WORK_DIR> <JOB_UID> <LANGUAGE>\n",
            ),
            dir.path().display()
        )
        .unwrap();
        let cfg = load(f.path()).unwrap();
        assert!(cfg.pre.is_defined());
        assert!(!cfg.post.is_defined());
    }
}
