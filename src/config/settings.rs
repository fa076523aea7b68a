//! Orchestration settings
//!
//! Only a fixed set of keys is accepted; anything else is a configuration
//! error.

use crate::config::interpolate::DEFAULT_PATTERN;
use crate::error::{ConfigError, ConfigResult};
use regex::Regex;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Recognized setting keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Regex used to find placeholders; must have exactly one capture group
    InterpolationPattern,
    /// Base directory relative paths are resolved against
    Cwd,
}

impl Setting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Setting::InterpolationPattern => "interpolation_pattern",
            Setting::Cwd => "cwd",
        }
    }
}

impl FromStr for Setting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interpolation_pattern" => Ok(Setting::InterpolationPattern),
            "cwd" => Ok(Setting::Cwd),
            other => Err(ConfigError::UnknownSetting(other.to_string())),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current values of all settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub interpolation_pattern: Regex,
    pub cwd: PathBuf,
}

impl Settings {
    pub fn new() -> Self {
        Settings {
            interpolation_pattern: default_pattern(),
            cwd: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Apply a setting given in its string form
    pub fn set(&mut self, key: &str, value: &str) -> ConfigResult<Setting> {
        let setting = key.parse::<Setting>()?;
        match setting {
            Setting::InterpolationPattern => {
                self.interpolation_pattern = compile_pattern(value)?;
            }
            Setting::Cwd => {
                self.cwd = self.resolve(value);
            }
        }
        Ok(setting)
    }

    /// String form of a setting
    pub fn get(&self, key: &str) -> ConfigResult<String> {
        Ok(match key.parse::<Setting>()? {
            Setting::InterpolationPattern => self.interpolation_pattern.as_str().to_string(),
            Setting::Cwd => self.cwd.display().to_string(),
        })
    }

    /// Resolve a path against `cwd`
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.cwd.join(path)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

fn default_pattern() -> Regex {
    Regex::new(DEFAULT_PATTERN).expect("default interpolation pattern is valid")
}

/// Compile an interpolation pattern, requiring exactly one capture group
pub fn compile_pattern(pattern: &str) -> ConfigResult<Regex> {
    let re = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        error: e.to_string(),
    })?;

    // captures_len counts the implicit whole-match group
    if re.captures_len() != 2 {
        return Err(ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            error: format!(
                "expected exactly one capture group, found {}",
                re.captures_len() - 1
            ),
        });
    }

    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_setting_fails() {
        let mut settings = Settings::new();
        let result = settings.set("colour", "blue");
        assert!(matches!(result, Err(ConfigError::UnknownSetting(k)) if k == "colour"));
        assert!(settings.get("colour").is_err());
    }

    #[test]
    fn test_set_pattern() {
        let mut settings = Settings::new();
        settings.set("interpolation_pattern", r"\{\{(\w+)\}\}").unwrap();
        assert_eq!(settings.get("interpolation_pattern").unwrap(), r"\{\{(\w+)\}\}");
    }

    #[test]
    fn test_pattern_without_group_is_rejected() {
        let mut settings = Settings::new();
        let result = settings.set("interpolation_pattern", r"\$\w+");
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
        // previous pattern is kept
        assert_eq!(settings.get("interpolation_pattern").unwrap(), DEFAULT_PATTERN);
    }

    #[test]
    fn test_pattern_with_two_groups_is_rejected() {
        assert!(compile_pattern(r"(\w+)-(\w+)").is_err());
    }

    #[test]
    fn test_malformed_pattern_is_rejected() {
        assert!(matches!(
            compile_pattern(r"\$\{(.+"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_cwd_is_resolved() {
        let mut settings = Settings::new();
        settings.set("cwd", "/tmp/project").unwrap();
        assert_eq!(settings.cwd, PathBuf::from("/tmp/project"));
        settings.set("cwd", "sub").unwrap();
        assert_eq!(settings.cwd, PathBuf::from("/tmp/project/sub"));
    }
}
