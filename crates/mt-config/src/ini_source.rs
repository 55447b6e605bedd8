use std::path::Path;

use ini::Ini;

use crate::error::ConfigError;

/// Thin wrapper over a parsed INI document giving typed, section-scoped
/// reads with the "missing key is fatal" semantics spec §6 asks for.
pub struct IniSource {
    ini: Ini,
}

impl IniSource {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(Self { ini })
    }

    fn get(&self, section: &'static str, key: &'static str) -> Option<String> {
        self.ini.section(Some(section)).and_then(|props| props.get(key)).map(str::to_owned)
    }

    pub fn required(&self, section: &'static str, key: &'static str) -> Result<String, ConfigError> {
        self.get(section, key).ok_or(ConfigError::MissingKey { section, key })
    }

    pub fn optional(&self, section: &'static str, key: &'static str) -> Option<String> {
        self.get(section, key).filter(|v| !v.is_empty())
    }

    pub fn required_u16(&self, section: &'static str, key: &'static str) -> Result<u16, ConfigError> {
        let raw = self.required(section, key)?;
        raw.parse().map_err(|_| ConfigError::InvalidValue {
            section,
            key,
            reason: format!("'{raw}' is not a valid port number"),
        })
    }

    pub fn required_bool(&self, section: &'static str, key: &'static str) -> Result<bool, ConfigError> {
        let raw = self.required(section, key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                section,
                key,
                reason: format!("'{raw}' is not a boolean"),
            }),
        }
    }

    pub fn required_usize_positive(
        &self,
        section: &'static str,
        key: &'static str,
    ) -> Result<usize, ConfigError> {
        let raw = self.required(section, key)?;
        let value: usize = raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { section, key, reason: format!("'{raw}' is not a number") })?;
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                section,
                key,
                reason: "must be greater than zero".to_owned(),
            });
        }
        Ok(value)
    }
}
