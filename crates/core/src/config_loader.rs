use crate::config::EngineConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Prefix for environment overrides, e.g. `SIGNALSCAN_SCORING__ALERT_THRESHOLD=70`.
pub const ENV_PREFIX: &str = "SIGNALSCAN_";

/// Default configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads engine configuration from the default path merged with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load() -> Result<EngineConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads engine configuration by merging defaults, a TOML (or JSON) file and
    /// `SIGNALSCAN_` environment variables, then validates it.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or the result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        let figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        let figment = if path.extension().is_some_and(|ext| ext == "json") {
            figment.merge(Json::file(path))
        } else {
            figment.merge(Toml::file(path))
        };

        let config: EngineConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("failed to parse configuration from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;

        Ok(config)
    }
}
