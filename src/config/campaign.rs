//! Campaign policy and registry.
//!
//! One parameterised policy per campaign replaces per-edition forks of the
//! allocator: capacity defaults, completion thresholds, trust and the
//! crowd-worker cap are all read from here.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct CampaignFile {
    campaign: CampaignConfig,
}

/// How the builder fills a trailing partial batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// Re-append leading items; some items then appear in two batches.
    #[default]
    Cyclic,
    /// Drop the partial batch.
    None,
}

/// Allocation and completion policy for one campaign.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub name: String,
    /// Used when an imported batch descriptor does not carry its own value.
    pub required_annotations: u32,
    /// Coverage each required annotation stands for, judged by an untrusted user.
    pub untrusted_results_per_annotator: u32,
    /// Coverage each required annotation stands for, judged by a trusted user.
    pub trusted_results_per_annotator: u32,
    /// Completed annotations in the campaign before a user becomes trusted.
    pub trust_threshold: u32,
    /// Members are never trusted and are subject to the task cap.
    pub low_trust_group: String,
    /// Fully annotated tasks after which low-trust users get no more work.
    pub max_completed_tasks_for_low_trust: u32,
    pub padding: Padding,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            required_annotations: 1,
            untrusted_results_per_annotator: 100,
            trusted_results_per_annotator: 70,
            trust_threshold: 100,
            low_trust_group: "crowd".to_string(),
            max_completed_tasks_for_low_trust: 3,
            padding: Padding::Cyclic,
        }
    }
}

impl CampaignConfig {
    /// Default policy for a named campaign.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Distinct annotated items needed before a task completes.
    pub fn completion_threshold(&self, required_annotations: u32, trusted: bool) -> u32 {
        let per_annotator = if trusted {
            self.trusted_results_per_annotator
        } else {
            self.untrusted_results_per_annotator
        };
        required_annotations.saturating_mul(per_annotator)
    }
}

/// Registry of campaign policies, indexed by name.
#[derive(Debug, Default)]
pub struct CampaignRegistry {
    campaigns: HashMap<String, CampaignConfig>,
}

impl CampaignRegistry {
    /// Create an empty registry; every lookup yields the default policy.
    pub fn empty() -> Self {
        Self {
            campaigns: HashMap::new(),
        }
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut campaigns = HashMap::new();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read campaign dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let config = Self::parse(&content).map_err(|e| {
                    Error::Config(format!("bad campaign config {}: {e}", path.display()))
                })?;
                campaigns.insert(config.name.clone(), config);
            }
        }

        Ok(Self { campaigns })
    }

    /// Parse one campaign file.
    pub fn parse(content: &str) -> Result<CampaignConfig> {
        let file: CampaignFile =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        if file.campaign.name.is_empty() {
            return Err(Error::Config("campaign name is required".to_string()));
        }
        Ok(file.campaign)
    }

    pub fn insert(&mut self, config: CampaignConfig) {
        self.campaigns.insert(config.name.clone(), config);
    }

    /// Look up a campaign, falling back to the default policy.
    pub fn get(&self, name: &str) -> CampaignConfig {
        self.campaigns
            .get(name)
            .cloned()
            .unwrap_or_else(|| CampaignConfig::named(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = CampaignRegistry::parse(
            r#"
            [campaign]
            name = "wmt21"
            trust_threshold = 250
            padding = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "wmt21");
        assert_eq!(config.trust_threshold, 250);
        assert_eq!(config.padding, Padding::None);
        assert_eq!(config.untrusted_results_per_annotator, 100);
        assert_eq!(config.trusted_results_per_annotator, 70);
    }

    #[test]
    fn unnamed_campaign_is_rejected() {
        assert!(CampaignRegistry::parse("[campaign]\ntrust_threshold = 1\n").is_err());
    }

    #[test]
    fn unknown_campaign_gets_default_policy() {
        let registry = CampaignRegistry::empty();
        let config = registry.get("adhoc");
        assert_eq!(config.name, "adhoc");
        assert_eq!(config.completion_threshold(2, false), 200);
        assert_eq!(config.completion_threshold(2, true), 140);
    }
}
