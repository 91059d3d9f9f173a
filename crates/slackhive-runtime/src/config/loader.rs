//! Layered configuration loading on figment.
//!
//! # Layers (lowest to highest)
//!
//! 1. Built-in defaults, then any programmatic base ([`ConfigLoader::merge`])
//! 2. The main file, `slackhive.{toml,yaml,yml}` (or `config.*`)
//! 3. The profile file next to it, `slackhive.{profile}.{ext}`
//! 4. Environment variables `SLACKHIVE_*`, `__` separating nested keys
//! 5. Single-key overrides ([`ConfigLoader::set`])
//!
//! If no layer provides a token, `SLACK_TOKEN` is used.
//!
//! ```text
//! SLACKHIVE_LOGGING__LEVEL=debug       logging.level = "debug"
//! SLACKHIVE_DISPATCH__MAX_WORKERS=8    dispatch.max_workers = 8
//! SLACKHIVE_SLACK__TOKEN=xoxb-...      slack.token = "xoxb-..."
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use slackhive_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .with_current_dir()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::HiveConfig;
use super::validation::validate_config;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SLACKHIVE_";

/// Fallback environment variable for the bearer token.
pub const TOKEN_ENV: &str = "SLACK_TOKEN";

/// Selects the profile when none is set programmatically.
pub const PROFILE_ENV: &str = "SLACKHIVE_PROFILE";

/// File stems tried in each search directory, in order.
const FILE_STEMS: [&str; 2] = ["slackhive", "config"];

// =============================================================================
// Profile
// =============================================================================

/// Names the overlay file loaded on top of the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Case-insensitive; `dev` and `prod` are accepted.
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            _ => Self::Custom(name),
        }
    }

    fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// File formats
// =============================================================================

/// A configuration file syntax enabled at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl ConfigFormat {
    const ENABLED: &'static [ConfigFormat] = &[
        #[cfg(feature = "toml-config")]
        ConfigFormat::Toml,
        #[cfg(feature = "yaml-config")]
        ConfigFormat::Yaml,
    ];

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&ext))
    }

    fn layer(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(Yaml::file(path)),
        }
    }
}

/// The sibling `{stem}.{profile}.{ext}` of a main file.
fn profile_sibling(main: &Path, profile: &Profile) -> Option<PathBuf> {
    let stem = main.file_stem()?.to_str()?;
    let ext = main.extension()?.to_str()?;
    Some(main.with_file_name(format!("{stem}.{profile}.{ext}")))
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Builds a [`HiveConfig`] from defaults, files, the environment and code.
pub struct ConfigLoader {
    base: Figment,
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    load_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader with the profile from `SLACKHIVE_PROFILE` and environment
    /// loading enabled.
    pub fn new() -> Self {
        Self {
            base: Figment::new(),
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            load_env: true,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a directory searched for the main file. Without any, the
    /// working directory and the user config directory are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads this file as the main file instead of searching. It must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Ignores `SLACKHIVE_*` and `SLACK_TOKEN`.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Layers a whole configuration just above the built-in defaults.
    /// Files and the environment still take precedence.
    pub fn merge(mut self, config: HiveConfig) -> Self {
        self.base = self.base.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one dotted key, e.g. `set("dispatch.max_workers", 8)`.
    /// Takes precedence over every other source.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<HiveConfig> {
        let profile = self.profile.clone();
        let load_env = self.load_env;

        let mut config: HiveConfig = self
            .into_figment()?
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;

        if load_env && config.slack.token().is_none() {
            config.slack.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
            if config.slack.token.is_some() {
                trace!("Using token from {TOKEN_ENV}");
            }
        }

        validate_config(&config)?;

        debug!(
            %profile,
            level = %config.logging.level,
            max_workers = config.dispatch.max_workers,
            channels = config.channels.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn into_figment(self) -> ConfigResult<Figment> {
        let main = match &self.file {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.clone())),
            Some(path) => Some(path.clone()),
            None => self.discover(),
        };

        let mut figment = Figment::from(Serialized::defaults(HiveConfig::default())).merge(self.base);

        match main {
            Some(path) => {
                let format = ConfigFormat::from_path(&path)
                    .ok_or_else(|| ConfigError::UnsupportedFormat(path.clone()))?;
                info!(path = %path.display(), "Loading configuration file");
                figment = format.layer(figment, &path);

                if let Some(overlay) = profile_sibling(&path, &self.profile)
                    && overlay.exists()
                {
                    debug!(path = %overlay.display(), profile = %self.profile, "Loading profile overlay");
                    figment = format.layer(figment, &overlay);
                }
            }
            None => debug!("No configuration file found, using defaults"),
        }

        if self.load_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    /// The first `{stem}.{ext}` present in the search directories.
    fn discover(&self) -> Option<PathBuf> {
        let defaults;
        let roots = if self.search_paths.is_empty() {
            defaults = std::env::current_dir()
                .ok()
                .into_iter()
                .chain(dirs::config_dir().map(|d| d.join("slackhive")))
                .collect::<Vec<_>>();
            &defaults
        } else {
            &self.search_paths
        };

        roots.iter().find_map(|dir| {
            FILE_STEMS.iter().find_map(|stem| {
                ConfigFormat::ENABLED.iter().find_map(|format| {
                    format
                        .extensions()
                        .iter()
                        .map(|ext| dir.join(format!("{stem}.{ext}")))
                        .find(|path| path.exists())
                })
            })
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
