//! INI file configuration adapter.

use crate::domain::error::TrendgateError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

/// Settings loaded from an INI file. Section and key names are
/// case-insensitive; values keep their case.
#[derive(Debug)]
pub struct FileConfigAdapter {
    ini: Ini,
    source: String,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TrendgateError> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let mut ini = Ini::new();
        ini.load(path).map_err(|reason| TrendgateError::ConfigParse {
            file: source.clone(),
            reason,
        })?;
        Ok(Self { ini, source })
    }

    pub fn from_string(content: &str) -> Result<Self, TrendgateError> {
        let source = "<inline>".to_string();
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| TrendgateError::ConfigParse {
                file: source.clone(),
                reason,
            })?;
        Ok(Self { ini, source })
    }

    /// Where the settings came from, for messages.
    pub fn source(&self) -> &str {
        &self.source
    }

    fn raw(&self, section: &str, key: &str) -> Option<String> {
        self.ini
            .get(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.raw(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.raw(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.raw(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}
