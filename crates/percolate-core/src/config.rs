//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Typed engine settings live under the `percolate` key.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub struct Config {
    figment: Figment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercolateSettings {
    pub default_shards: u32,
    pub batch_timeout_ms: u64,
    pub max_concurrent_items: usize,
    pub analyzer: String,
    pub default_size: usize,
}

impl Default for PercolateSettings {
    fn default() -> Self {
        Self { default_shards: 5, batch_timeout_ms: 30_000, max_concurrent_items: 64, analyzer: "standard".to_string(), default_size: 10 }
    }
}

impl PercolateSettings {
    pub fn batch_timeout(&self) -> Duration { Duration::from_millis(self.batch_timeout_ms) }

    pub fn validate(&self) -> Result<(), Error> {
        if self.default_shards == 0 { return Err(Error::InvalidConfig("percolate.default_shards must be > 0".into())); }
        if self.max_concurrent_items == 0 { return Err(Error::InvalidConfig("percolate.max_concurrent_items must be > 0".into())); }
        if !matches!(self.analyzer.as_str(), "standard" | "stopwords") {
            return Err(Error::InvalidConfig(format!("unknown analyzer '{}'", self.analyzer)));
        }
        Ok(())
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::default("percolate", PercolateSettings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    /// Load from an explicit file, still honouring `APP_*` overrides.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::default("percolate", PercolateSettings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("APP_").split("__"));
        let config = Self { figment };
        config.settings()?.validate()?;
        Ok(config)
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<PercolateSettings> { self.get("percolate") }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
