//! JIT configuration
//!
//! Settings come from defaults, an optional `[jit]` table in a TOML file,
//! and `TESSERA_JIT_*` environment variables, in increasing precedence.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest Cranelift optimization level accepted
pub const MAX_OPT_LEVEL: u8 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {file}: {error}")]
    Io {
        file: PathBuf,
        error: std::io::Error,
    },

    #[error("Invalid TOML syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for the JIT compiler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    /// Whether to compile at all
    pub enabled: bool,
    /// Calls of a prototype before it is compiled
    pub compilation_threshold: u64,
    /// Optimization level for Cranelift (0=none, 1=speed, 2=speed+size)
    pub opt_level: u8,
    /// Largest prototype, in instruction words, that will be compiled
    pub max_function_words: usize,
    /// Run the Cranelift IR verifier on every function
    pub verify_ir: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compilation_threshold: 1,
            opt_level: 1,
            max_function_words: 16 * 1024,
            verify_ir: cfg!(debug_assertions),
        }
    }
}

/// File layout: everything lives under `[jit]`; other tables are ignored
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    jit: Option<JitConfig>,
}

impl JitConfig {
    /// Create a config suitable for testing (compile on first call, verify IR)
    pub fn for_testing() -> Self {
        Self {
            enabled: true,
            compilation_threshold: 1,
            opt_level: 0,
            max_function_words: 4 * 1024,
            verify_ir: true,
        }
    }

    /// Parse a TOML document; a missing `[jit]` table means defaults
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(source)?;
        let config = file.jit.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            file: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.opt_level > MAX_OPT_LEVEL {
            return Err(ConfigError::InvalidValue {
                field: "opt_level".to_string(),
                reason: format!("must be between 0 and {}", MAX_OPT_LEVEL),
            });
        }
        if self.max_function_words == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_function_words".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Apply `TESSERA_JIT_ENABLED`, `TESSERA_JIT_THRESHOLD` and
    /// `TESSERA_JIT_OPT_LEVEL` from the process environment
    pub fn apply_env_overrides(self) -> ConfigResult<Self> {
        self.apply_overrides_from(env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; unrelated names are ignored
    pub fn apply_overrides_from<I, K, V>(mut self, vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let value = value.as_ref().trim();
            match name.as_ref() {
                "TESSERA_JIT_ENABLED" => {
                    self.enabled = matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
                }
                "TESSERA_JIT_THRESHOLD" => {
                    self.compilation_threshold =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            field: "TESSERA_JIT_THRESHOLD".to_string(),
                            reason: format!("'{}' is not a call count", value),
                        })?;
                }
                "TESSERA_JIT_OPT_LEVEL" => {
                    self.opt_level = value.parse().map_err(|_| ConfigError::InvalidValue {
                        field: "TESSERA_JIT_OPT_LEVEL".to_string(),
                        reason: format!("'{}' is not an optimization level", value),
                    })?;
                }
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Cranelift's name for the configured optimization level
    pub fn cranelift_opt_level(&self) -> &'static str {
        opt_level_name(self.opt_level)
    }
}

/// Cranelift's `opt_level` setting for a numeric level
pub fn opt_level_name(level: u8) -> &'static str {
    match level {
        0 => "none",
        1 => "speed",
        _ => "speed_and_size",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_missing_table_gives_defaults() {
        let config = JitConfig::from_toml_str("").unwrap();
        assert_eq!(config, JitConfig::default());
    }

    #[test]
    fn test_partial_table() {
        let config = JitConfig::from_toml_str(
            r#"
            [jit]
            compilation_threshold = 50
            opt_level = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.compilation_threshold, 50);
        assert_eq!(config.opt_level, 2);
        assert!(config.enabled);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = JitConfig::from_toml_str("[jit]\ncache_size = 3\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_opt_level_out_of_range() {
        let result = JitConfig::from_toml_str("[jit]\nopt_level = 3\n");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "opt_level"
        ));
    }

    #[rstest]
    #[case("1", true)]
    #[case("yes", true)]
    #[case("TRUE", true)]
    #[case("0", false)]
    #[case("off", false)]
    fn test_enabled_override(#[case] value: &str, #[case] expected: bool) {
        let config = JitConfig::default()
            .apply_overrides_from([("TESSERA_JIT_ENABLED", value)])
            .unwrap();
        assert_eq!(config.enabled, expected);
    }

    #[test]
    fn test_numeric_overrides() {
        let config = JitConfig::default()
            .apply_overrides_from([
                ("TESSERA_JIT_THRESHOLD", "7"),
                ("TESSERA_JIT_OPT_LEVEL", "0"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(config.compilation_threshold, 7);
        assert_eq!(config.opt_level, 0);
    }

    #[test]
    fn test_bad_override() {
        let result = JitConfig::default().apply_overrides_from([("TESSERA_JIT_THRESHOLD", "lots")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        let result = JitConfig::default().apply_overrides_from([("TESSERA_JIT_OPT_LEVEL", "9")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = JitConfig::load_from_file(Path::new("/nonexistent/tessera.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = JitConfig::for_testing();
        let text = format!("[jit]\n{}", toml::to_string(&config).unwrap());
        assert_eq!(JitConfig::from_toml_str(&text).unwrap(), config);
    }
}
