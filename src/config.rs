//! Configuration loading for the CLI binary.
//!
//! Settings come from an optional config file at
//! `~/.config/duffel/config.toml`, overlaid by `DUFFEL_*` environment
//! variables. CLI flags take final precedence and are applied by the
//! caller.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::sync::RemoteLocation;

/// On-disk and environment configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote bucket name.
    pub bucket: Option<String>,
    /// Key prefix for this session's files.
    pub prefix: Option<String>,
    /// Local working directory.
    pub workdir: Option<PathBuf>,
    /// Store region.
    pub region: Option<String>,
    /// Custom S3-compatible endpoint.
    pub endpoint: Option<String>,
}

impl Config {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file()?.unwrap_or_default();
        config.apply_env();
        Ok(config)
    }

    fn from_file() -> Result<Option<Self>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        let path = dir.join("duffel").join("config.toml");
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Some(config))
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("DUFFEL_BUCKET") {
            self.bucket = Some(value);
        }
        if let Ok(value) = env::var("DUFFEL_PREFIX") {
            self.prefix = Some(value);
        }
        if let Ok(value) = env::var("DUFFEL_WORKDIR") {
            self.workdir = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("DUFFEL_REGION") {
            self.region = Some(value);
        }
        if let Ok(value) = env::var("DUFFEL_ENDPOINT") {
            self.endpoint = Some(value);
        }
    }

    /// Remote location, if a bucket is configured. A missing prefix means
    /// the bucket root.
    pub fn remote(&self) -> Option<RemoteLocation> {
        let bucket = self.bucket.as_deref()?;
        let prefix = self.prefix.as_deref().unwrap_or("");
        Some(RemoteLocation::new(bucket, prefix))
    }
}
