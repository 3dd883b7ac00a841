use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_LOOP_TICK_MS: u64 = 16; // ~60 Hz, one UI frame
pub const DEFAULT_LOG_FILTER: &str = "cadence_scheduler=info";
pub const ENV_PREFIX: &str = "CADENCE_";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
///
/// Every section is optional; an empty file yields [`CadenceConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Human-text period parser settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Extra word → number synonyms on top of the built-in `one`..`twelve`,
    /// e.g. `{ dozen = 12, fortnight-days = 14 }`.
    #[serde(default)]
    pub quantifiers: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tick period of a run-loop driven execution context, in milliseconds.
    #[serde(default = "default_loop_tick_ms")]
    pub loop_tick_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            loop_tick_ms: DEFAULT_LOOP_TICK_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_loop_tick_ms() -> u64 {
    DEFAULT_LOOP_TICK_MS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `CADENCE_CONFIG` env var
    ///   3. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; nested keys in env vars use `__`
    /// (`CADENCE_RUNTIME__LOOP_TICK_MS=8`).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("CADENCE_CONFIG").ok())
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading configuration");

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["CONFIG"]).split("__"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn loop_tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.runtime.loop_tick_ms.max(1))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = CadenceConfig::load(Some("/nonexistent/cadence.toml")).unwrap();
        assert_eq!(config.runtime.loop_tick_ms, DEFAULT_LOOP_TICK_MS);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
        assert!(config.parser.quantifiers.is_empty());
    }

    #[test]
    fn file_sections_are_merged() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[parser.quantifiers]
dozen = 12
score = 20

[runtime]
loop_tick_ms = 50
"#
        )
        .unwrap();

        let config = CadenceConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.parser.quantifiers.get("dozen"), Some(&12));
        assert_eq!(config.parser.quantifiers.get("score"), Some(&20));
        assert_eq!(config.runtime.loop_tick_ms, 50);
        assert_eq!(config.loop_tick(), std::time::Duration::from_millis(50));
        // untouched section keeps its default
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nloop_tick_ms = \"fast\"").unwrap();

        let err = CadenceConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn zero_tick_is_clamped() {
        let mut config = CadenceConfig::default();
        config.runtime.loop_tick_ms = 0;
        assert_eq!(config.loop_tick(), std::time::Duration::from_millis(1));
    }
}
