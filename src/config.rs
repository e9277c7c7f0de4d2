//! Runtime configuration.
//!
//! Settings come from an optional TOML file, then `NEXUS_*` environment
//! overrides, and are validated once before anything is served. Every
//! threshold consumed by the metric modules lives here rather than being
//! compiled in.

use crate::error::{NexusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const NEXUS_DIR_NAME: &str = ".nexus";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "nexus.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of most recent commits every calculation sees.
    pub window_size: usize,
    pub activity: ActivityThresholds,
    pub concentration: ConcentrationThresholds,
    pub limits: Limits,
    pub alerts: AlertSettings,
    /// Extra `extension = "Label"` entries merged over the built-in table.
    pub technologies: BTreeMap<String, String>,
}

/// Commit counts over the 30-day sub-window. Zero recent commits is always stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityThresholds {
    pub high: usize,
    pub medium: usize,
}

/// Percent of window commits held by the top author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcentrationThresholds {
    pub warning: u8,
    pub critical: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub top_contributors: usize,
    pub top_hotspots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationPolicy {
    /// Block on the in-flight generation.
    #[default]
    Wait,
    /// Serve the last cached collection while regeneration runs in the background.
    ServeStale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    #[default]
    Rules,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Human readable duration, e.g. `"20s"` or `"1m 30s"`.
    pub timeout: String,
    pub policy: RegenerationPolicy,
    pub generator: GeneratorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_size: 300,
            activity: ActivityThresholds::default(),
            concentration: ConcentrationThresholds::default(),
            limits: Limits::default(),
            alerts: AlertSettings::default(),
            technologies: BTreeMap::new(),
        }
    }
}

impl Default for ActivityThresholds {
    fn default() -> Self {
        Self { high: 30, medium: 10 }
    }
}

impl Default for ConcentrationThresholds {
    fn default() -> Self {
        Self {
            warning: 50,
            critical: 70,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            top_contributors: 3,
            top_hotspots: 5,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            timeout: "20s".to_string(),
            policy: RegenerationPolicy::Wait,
            generator: GeneratorKind::Rules,
            endpoint: None,
        }
    }
}

impl AlertSettings {
    pub fn timeout(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(self.timeout.trim())
            .map_err(|e| NexusError::Config(format!("invalid alerts.timeout '{}': {e}", self.timeout)))?;
        if timeout.is_zero() {
            return Err(NexusError::Config("alerts.timeout must be greater than zero".to_string()));
        }
        Ok(timeout)
    }
}

pub fn nexus_dir(root: impl AsRef<Path>) -> PathBuf {
    root.as_ref().join(NEXUS_DIR_NAME)
}

pub fn default_config_path(root: impl AsRef<Path>) -> PathBuf {
    nexus_dir(root).join(CONFIG_FILE_NAME)
}

pub fn default_database_path(root: impl AsRef<Path>) -> PathBuf {
    nexus_dir(root).join(DATABASE_FILE_NAME)
}

impl Settings {
    /// Load, apply environment overrides and validate.
    ///
    /// An explicit `path` must exist; without one, `.nexus/config.toml` under
    /// the working directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = default_config_path(std::env::current_dir()?);
                if fallback.exists() {
                    Self::from_file(&fallback)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `NEXUS_*` overrides. `lookup` is injectable so tests need not touch the process env.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "NEXUS_WINDOW_SIZE", &mut self.window_size)?;
        override_parsed(&lookup, "NEXUS_ACTIVITY_HIGH", &mut self.activity.high)?;
        override_parsed(&lookup, "NEXUS_ACTIVITY_MEDIUM", &mut self.activity.medium)?;
        override_parsed(&lookup, "NEXUS_CONCENTRATION_WARNING", &mut self.concentration.warning)?;
        override_parsed(&lookup, "NEXUS_CONCENTRATION_CRITICAL", &mut self.concentration.critical)?;
        override_parsed(&lookup, "NEXUS_TOP_CONTRIBUTORS", &mut self.limits.top_contributors)?;
        override_parsed(&lookup, "NEXUS_TOP_HOTSPOTS", &mut self.limits.top_hotspots)?;
        if let Some(timeout) = lookup("NEXUS_GENERATOR_TIMEOUT") {
            self.alerts.timeout = timeout;
        }
        if let Some(endpoint) = lookup("NEXUS_GENERATOR_ENDPOINT") {
            self.alerts.endpoint = Some(endpoint);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 1 {
            return Err(config_error("window_size must be at least 1"));
        }
        if self.activity.medium < 1 {
            return Err(config_error("activity.medium must be at least 1"));
        }
        if self.activity.high < self.activity.medium {
            return Err(config_error("activity.high must not be below activity.medium"));
        }
        if self.concentration.warning > 100 || self.concentration.critical > 100 {
            return Err(config_error("concentration thresholds are percentages (0-100)"));
        }
        if self.concentration.warning > self.concentration.critical {
            return Err(config_error("concentration.warning must not exceed concentration.critical"));
        }
        if self.limits.top_contributors < 1 || self.limits.top_hotspots < 1 {
            return Err(config_error("top-K limits must be at least 1"));
        }
        self.alerts.timeout()?;
        if self.alerts.generator == GeneratorKind::Http
            && self.alerts.endpoint.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(config_error("alerts.endpoint is required for the http generator"));
        }
        for (extension, label) in &self.technologies {
            if extension.trim().is_empty() || label.trim().is_empty() {
                return Err(config_error("technology mappings need a non-empty extension and label"));
            }
        }
        Ok(())
    }
}

fn config_error(message: &str) -> NexusError {
    NexusError::Config(message.to_string())
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| NexusError::Config(format!("invalid {name} '{raw}': {e}")))?;
    }
    Ok(())
}
