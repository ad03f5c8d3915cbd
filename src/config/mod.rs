//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Per-campaign allocation policy lives in [`campaign`].

pub mod campaign;

pub use campaign::{CampaignConfig, CampaignRegistry, Padding};

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub campaign_dir: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_path: PathBuf::from(required_var("DATABASE_PATH")?),
            campaign_dir: std::env::var("CAMPAIGN_DIR").ok().map(PathBuf::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Load the campaign registry, or an empty one when no directory is set.
    pub fn campaigns(&self) -> Result<CampaignRegistry> {
        load_campaigns(self.campaign_dir.as_deref())
    }
}

/// Campaign registry from `CAMPAIGN_DIR` alone, for commands that do not
/// touch the database.
pub fn campaigns_from_env() -> Result<CampaignRegistry> {
    let dir = std::env::var("CAMPAIGN_DIR").ok().map(PathBuf::from);
    load_campaigns(dir.as_deref())
}

fn load_campaigns(dir: Option<&Path>) -> Result<CampaignRegistry> {
    match dir {
        Some(dir) => CampaignRegistry::load_from_dir(dir),
        None => Ok(CampaignRegistry::empty()),
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
