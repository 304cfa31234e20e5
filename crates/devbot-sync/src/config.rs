//! `config.yaml` plus environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use devbot_adapters::{BoundingBox, OpenDataQuery, DEFAULT_APPLIED_SINCE, DEVELOPMENT_PERMITS_URL};
use devbot_core::RecordKind;
use devbot_notify::rss::DEFAULT_MAX_ITEMS;
use devbot_notify::FeedMeta;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "DEVBOT_CONFIG";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_PAT";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Derive and report, but leave GitHub alone.
    #[default]
    Development,
    Production,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Production => "production",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Neighborhood {
    pub name: String,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Datasets {
    #[serde(default = "default_permits_url")]
    pub development_permits: Option<String>,
    #[serde(default)]
    pub rezoning_applications: Option<String>,
}

impl Default for Datasets {
    fn default() -> Self {
        Self {
            development_permits: default_permits_url(),
            rezoning_applications: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscussionsConfig {
    pub owner: String,
    pub repository: String,
    pub permit_category: String,
    #[serde(default)]
    pub rezoning_category: Option<String>,
    /// How far back to look for discussions closed by hand.
    #[serde(default = "default_closed_window_days")]
    pub closed_window_days: u64,
}

impl DiscussionsConfig {
    pub fn category_names(&self) -> Vec<(RecordKind, String)> {
        let mut names = vec![(RecordKind::DevelopmentPermit, self.permit_category.clone())];
        if let Some(rezoning) = &self.rezoning_category {
            names.push((RecordKind::RezoningApplication, rezoning.clone()));
        }
        names
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RssConfig {
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub link: String,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl RssConfig {
    pub fn meta(&self) -> FeedMeta {
        FeedMeta {
            title: self.title.clone(),
            description: self.description.clone(),
            link: self.link.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DevbotConfig {
    #[serde(default)]
    pub runmode: RunMode,
    pub neighborhood: Neighborhood,
    #[serde(default)]
    pub datasets: Datasets,
    #[serde(default = "default_applied_since")]
    pub applied_since: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub discussions: Option<DiscussionsConfig>,
    #[serde(default)]
    pub rss: Option<RssConfig>,
    #[serde(skip)]
    pub github_token: Option<String>,
}

fn default_permits_url() -> Option<String> {
    Some(DEVELOPMENT_PERMITS_URL.to_string())
}

fn default_closed_window_days() -> u64 {
    14
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_applied_since() -> String {
    DEFAULT_APPLIED_SINCE.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_http_timeout_secs() -> u64 {
    20
}

fn default_user_agent() -> String {
    format!("devbot/{}", env!("CARGO_PKG_VERSION"))
}

impl DevbotConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("parsing devbot config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Reads `path`, else the file named by `DEVBOT_CONFIG`, else
    /// `config.yaml`, and picks up the GitHub token from `GITHUB_PAT`.
    pub fn from_env_with_path(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load(&path)?;
        config.github_token = std::env::var(GITHUB_TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let b = &self.neighborhood.bounding_box;
        if b.north_latitude <= b.south_latitude {
            bail!(
                "bounding box north-latitude {} must be greater than south-latitude {}",
                b.north_latitude,
                b.south_latitude
            );
        }
        if b.east_longitude <= b.west_longitude {
            bail!(
                "bounding box east-longitude {} must be greater than west-longitude {}",
                b.east_longitude,
                b.west_longitude
            );
        }
        if matches!(&self.rss, Some(rss) if rss.max_items == 0) {
            bail!("rss max-items must be at least 1");
        }
        Ok(())
    }

    pub fn dataset_url(&self, kind: RecordKind) -> Option<&str> {
        match kind {
            RecordKind::DevelopmentPermit => self.datasets.development_permits.as_deref(),
            RecordKind::RezoningApplication => self.datasets.rezoning_applications.as_deref(),
        }
    }

    pub fn query(&self) -> OpenDataQuery {
        OpenDataQuery {
            applied_since: self.applied_since.clone(),
            bounds: self.neighborhood.bounding_box,
        }
    }
}
