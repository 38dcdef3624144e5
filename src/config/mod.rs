//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::str::FromStr;

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{PoolConfig, checked_expiry};
use crate::drivers::files::ExecutionContext;

pub use cli::{
    CacheOverrides, CliArgs, Command, DeleteArgs, GetArgs, PathArgs, SetArgs, TagsArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cachepool";
const ENV_PREFIX: &str = "CACHEPOOL";
const MAX_CHMOD: u32 = 0o7777;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: PoolConfig,
    pub logging: LoggingSettings,
    pub driver: DriverKind,
    pub context: ExecutionContext,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Storage driver backing the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DriverKind {
    #[default]
    Files,
    Memory,
}

impl DriverKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "files" => Ok(Self::Files),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown driver `{other}` (expected files|memory)")),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: PoolConfig,
    logging: RawLoggingSettings,
    driver: Option<String>,
    context: RawContextSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(driver) = overrides.driver {
            self.driver = Some(driver.as_str().to_string());
        }
        if let Some(path) = overrides.path.as_ref() {
            self.cache.path = Some(path.clone());
        }
        if let Some(key) = overrides.security_key.as_ref() {
            self.cache.security_key = Some(key.clone());
        }
        if let Some(ttl) = overrides.default_ttl {
            self.cache.default_ttl = ttl;
        }
        if let Some(secure) = overrides.secure_writes {
            self.cache.secure_file_manipulation = secure;
        }
        if let Some(fallback) = overrides.auto_tmp_fallback {
            self.cache.auto_tmp_fallback = fallback;
        }
        if let Some(host) = overrides.host.as_ref() {
            self.context.served = Some(true);
            self.context.host = Some(host.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            logging,
            driver,
            context,
        } = raw;

        Ok(Self {
            cache: build_cache_settings(cache)?,
            logging: build_logging_settings(logging)?,
            driver: build_driver(driver)?,
            context: build_context(context),
        })
    }
}

fn build_cache_settings(cache: PoolConfig) -> Result<PoolConfig, LoadError> {
    if cache.default_chmod > MAX_CHMOD {
        return Err(LoadError::invalid(
            "cache.default_chmod",
            format!("{:o} is not a permission mode", cache.default_chmod),
        ));
    }

    if checked_expiry(cache.default_ttl()).is_none() {
        return Err(LoadError::invalid(
            "cache.default_ttl",
            format!("{} seconds reaches past the latest representable instant", cache.default_ttl),
        ));
    }

    if cache
        .security_key
        .as_deref()
        .is_some_and(|key| key.contains(['/', '\\']))
    {
        return Err(LoadError::invalid(
            "cache.security_key",
            "must not contain path separators",
        ));
    }

    Ok(cache)
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_driver(driver: Option<String>) -> Result<DriverKind, LoadError> {
    match driver {
        Some(value) => {
            value.parse::<DriverKind>().map_err(|reason| LoadError::invalid("driver", reason))
        }
        None => Ok(DriverKind::default()),
    }
}

fn build_context(context: RawContextSettings) -> ExecutionContext {
    let host = context.host.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if context.served.unwrap_or(false) || host.is_some() {
        ExecutionContext::Served { host }
    } else {
        ExecutionContext::CommandLine
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContextSettings {
    served: Option<bool>,
    host: Option<String>,
}
