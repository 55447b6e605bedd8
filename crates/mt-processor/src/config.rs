use std::path::PathBuf;

use thiserror::Error;

/// Per-language processor configuration (spec §4.5): a work directory for
/// job files and a shell call template. `call_templ` is `None` when the
/// role has no processor configured for the language in question — spec
/// §4.5 step 1 treats that as "language not supported, no default
/// processor" rather than a startup error.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    work_dir: PathBuf,
    call_templ: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("call template is missing the required placeholder '{0}'")]
    MissingPlaceholder(&'static str),
}

impl LanguageConfig {
    /// `call_templ` must be `Some` and contain `<WORK_DIR>`, `<JOB_UID>` and
    /// `<LANGUAGE>` or construction fails fast (spec §4.5: "missing template
    /// parameters in the call string is fatal at configuration time").
    pub fn new(work_dir: PathBuf, call_templ: Option<String>) -> Result<Self, ConfigError> {
        if let Some(templ) = &call_templ {
            for placeholder in ["<WORK_DIR>", "<JOB_UID>", "<LANGUAGE>"] {
                if !templ.contains(placeholder) {
                    return Err(ConfigError::MissingPlaceholder(match placeholder {
                        "<WORK_DIR>" => "<WORK_DIR>",
                        "<JOB_UID>" => "<JOB_UID>",
                        _ => "<LANGUAGE>",
                    }));
                }
            }
        }
        Ok(Self { work_dir, call_templ })
    }

    /// A config with no call template at all — "not supported" for every
    /// language.
    pub fn undefined(work_dir: PathBuf) -> Self {
        Self { work_dir, call_templ: None }
    }

    pub fn is_defined(&self) -> bool {
        self.call_templ.is_some()
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    /// Substitutes `<WORK_DIR>`, `<JOB_UID>`, `<LANGUAGE>` into the call
    /// template. Only callable when [`is_defined`](Self::is_defined).
    pub fn call_string(&self, job_token: &str, language: &str) -> String {
        let templ = self
            .call_templ
            .as_ref()
            .expect("call_string must only be called on a defined language config");
        templ
            .replace("<WORK_DIR>", &self.work_dir.display().to_string())
            .replace("<JOB_UID>", job_token)
            .replace("<LANGUAGE>", language)
    }
}
