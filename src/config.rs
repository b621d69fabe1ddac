// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current config file version. Increment when making breaking changes.
const CONFIG_VERSION: u32 = 1;

/// Upper bound for the store existence poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config file version for future migration support
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    /// Keep reacting to store changes instead of exiting after the first split
    #[serde(default)]
    pub daemon: bool,
    /// How often to check whether the certificate store exists yet
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Warn after a split when the leaf certificate expires within this many days
    #[serde(default = "default_renew_warning_days")]
    pub renew_warning_days: u32,
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_renew_warning_days() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            daemon: false,
            poll_interval_ms: default_poll_interval_ms(),
            log_level: default_log_level(),
            renew_warning_days: default_renew_warning_days(),
        }
    }
}

impl Config {
    /// Load config from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        Self::migrate(&mut config);
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Bring an older config up to the current version.
    /// Returns true if config was modified.
    fn migrate(config: &mut Self) -> bool {
        if config.config_version >= CONFIG_VERSION {
            return false;
        }

        // v0 had no poll interval; a zero there meant "use the default"
        if config.poll_interval_ms == 0 {
            config.poll_interval_ms = default_poll_interval_ms();
        }

        config.config_version = CONFIG_VERSION;
        true
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_version > CONFIG_VERSION {
            tracing::warn!(
                version = self.config_version,
                supported = CONFIG_VERSION,
                "config file is newer than this build; some settings may be ignored"
            );
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms cannot be 0".into()));
        }
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(Error::Config(format!(
                "poll_interval_ms cannot exceed {}",
                MAX_POLL_INTERVAL_MS
            )));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "unknown log_level '{}' (expected one of: {})",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// On-disk layout: the combined bundle written by the ACME client and the
/// two files derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Directory holding the bundle; the ACME client's cache directory
    pub storage_dir: PathBuf,
    /// Combined key + certificate chain bundle
    pub bundle: PathBuf,
    /// Derived private key file (`<bundle>.key`)
    pub key: PathBuf,
    /// Derived certificate chain file (`<bundle>.crt`)
    pub cert: PathBuf,
}

impl Paths {
    /// Layout used by the ACME client: `<root>/<domain>/<domain>`.
    pub fn new(storage_root: &Path, domain: &str) -> Result<Self> {
        let safe_domain = Self::sanitize_domain_for_filename(domain)?;
        let storage_dir = storage_root.join(&safe_domain);
        let bundle = storage_dir.join(&safe_domain);
        Ok(Self::with_bundle(storage_dir, bundle))
    }

    /// Use an explicit bundle file; derived files sit next to it.
    pub fn for_bundle(bundle: &Path) -> Result<Self> {
        if bundle.file_name().is_none() {
            return Err(Error::InvalidPath(bundle.to_path_buf()));
        }
        let storage_dir = match bundle.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self::with_bundle(storage_dir, bundle.to_path_buf()))
    }

    fn with_bundle(storage_dir: PathBuf, bundle: PathBuf) -> Self {
        let key = Self::with_suffix(&bundle, "key");
        let cert = Self::with_suffix(&bundle, "crt");
        Self {
            storage_dir,
            bundle,
            key,
            cert,
        }
    }

    /// Append `.suffix` to the full file name (`example.com` -> `example.com.crt`).
    fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Sanitize a domain name for safe use in file paths.
    fn sanitize_domain_for_filename(domain: &str) -> Result<String> {
        let invalid = |reason: &str| Error::InvalidDomain {
            domain: domain.to_string(),
            reason: reason.to_string(),
        };

        if domain.is_empty() {
            return Err(invalid("domain cannot be empty"));
        }
        if domain.contains('\0') {
            return Err(invalid("domain contains null byte"));
        }
        // Percent-encoded separators could sneak past the checks below
        if domain.contains('%') {
            return Err(invalid("domain contains percent encoding"));
        }
        if domain.contains("..") {
            return Err(invalid("domain contains path traversal sequence"));
        }
        if domain.contains('/') || domain.contains('\\') {
            return Err(invalid("domain contains path separator"));
        }
        if domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("domain cannot start or end with a dot"));
        }

        if let Some(c) = domain
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
        {
            return Err(invalid(&format!("domain contains invalid character: '{}'", c)));
        }

        Ok(domain.to_string())
    }

    /// Create the storage directory (mode 0700) if it is missing.
    pub fn ensure_dir(&self) -> Result<()> {
        crate::fs::create_private_dir(&self.storage_dir)
    }
}
