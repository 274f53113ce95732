//! Configuration Management
//!
//! A YAML file lists one or more fabrics plus global settings; each fabric
//! may override any global value. Resolution produces one read-only
//! [`FabricTarget`] per fabric.

use crate::apic::Credentials;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 7;
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no fabrics defined in config file")]
    NoFabrics,

    #[error("fabric {0}: url is required")]
    MissingUrl(usize),

    #[error("fabric {0}: username and password are required")]
    MissingCredentials(String),

    #[error("duplicate fabric name/url: {0}")]
    DuplicateFabric(String),

    #[error("fabric {fabric}: output {} is already used by another fabric", .path.display())]
    DuplicateOutput { fabric: String, path: PathBuf },
}

/// Per-fabric pipeline settings. Built once, read-only during the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Extra attempts after the first failed one
    pub request_retry_count: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    /// Requests in flight per wave
    pub batch_size: usize,
    /// Objects per page when paginating
    pub page_size: u64,
    /// Fall back to pagination when the controller reports an oversized result
    pub paginate_oversized: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            request_retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            paginate_oversized: true,
        }
    }
}

/// Settings shared by all fabrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_retry_count: u32,
    pub retry_delay: u64,
    pub batch_size: usize,
    pub page_size: u64,
    pub paginate: bool,
    /// DEBUG on the console; `--verbose` turns it on as well
    pub verbose: bool,
    pub class: String,
    pub query: BTreeMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            request_retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            paginate: true,
            verbose: false,
            class: crate::resource::ALL_CLASSES.to_string(),
            query: BTreeMap::new(),
        }
    }
}

/// One fabric entry; unset fields inherit from [`GlobalConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub name: Option<String>,
    pub url: Option<String>,
    pub output: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_retry_count: Option<u32>,
    pub retry_delay: Option<u64>,
    pub batch_size: Option<usize>,
    pub page_size: Option<u64>,
    pub paginate: Option<bool>,
    pub class: Option<String>,
    pub query: Option<BTreeMap<String, String>>,
}

impl FabricConfig {
    /// Display name: explicit name, else the URL
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.url.clone().filter(|u| !u.trim().is_empty()))
            .unwrap_or_else(|| format!("fabric-{}", index + 1))
    }
}

/// Full configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub fabrics: Vec<FabricConfig>,
}

/// Everything needed to collect from one fabric
#[derive(Debug, Clone)]
pub struct FabricTarget {
    pub name: String,
    pub url: String,
    pub credentials: Credentials,
    pub output: PathBuf,
    pub run: RunConfig,
    pub class: String,
    pub query: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Merge global values into every fabric and check the result is runnable
    pub fn resolve(&self) -> Result<Vec<FabricTarget>, ConfigError> {
        if self.fabrics.is_empty() {
            return Err(ConfigError::NoFabrics);
        }

        let global = &self.global;
        let mut names = HashSet::new();
        let mut outputs = HashSet::new();
        let mut targets = Vec::with_capacity(self.fabrics.len());

        for (i, fabric) in self.fabrics.iter().enumerate() {
            let url = fabric
                .url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or(ConfigError::MissingUrl(i))?;

            let name = fabric.display_name(i);
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateFabric(name));
            }

            let username = fabric.username.clone().or_else(|| global.username.clone());
            let password = fabric.password.clone().or_else(|| global.password.clone());
            let (Some(username), Some(password)) = (username, password) else {
                return Err(ConfigError::MissingCredentials(name));
            };

            let run = RunConfig {
                request_retry_count: fabric
                    .request_retry_count
                    .unwrap_or(global.request_retry_count),
                retry_delay: Duration::from_secs(fabric.retry_delay.unwrap_or(global.retry_delay)),
                batch_size: non_zero(fabric.batch_size.unwrap_or(global.batch_size), DEFAULT_BATCH_SIZE),
                page_size: non_zero(fabric.page_size.unwrap_or(global.page_size), DEFAULT_PAGE_SIZE),
                paginate_oversized: fabric.paginate.unwrap_or(global.paginate),
            };

            // Explicit outputs must be distinct; derived ones get a numeric suffix
            let output = match &fabric.output {
                Some(path) if outputs.contains(path) => {
                    return Err(ConfigError::DuplicateOutput {
                        fabric: name,
                        path: path.clone(),
                    });
                }
                Some(path) => path.clone(),
                None => derived_output(&name, &outputs),
            };
            outputs.insert(output.clone());

            targets.push(FabricTarget {
                credentials: Credentials::new(&username, &password),
                class: fabric.class.clone().unwrap_or_else(|| global.class.clone()),
                query: fabric.query.clone().unwrap_or_else(|| global.query.clone()),
                name,
                url,
                output,
                run,
            });
        }

        Ok(targets)
    }
}

fn non_zero<T: PartialEq + Default>(value: T, fallback: T) -> T {
    if value == T::default() {
        fallback
    } else {
        value
    }
}

/// `<stem>.zip`, or `<stem>-N.zip` when an earlier fabric already took it.
/// `https://apic1` and `http://apic1` sanitize to the same stem.
fn derived_output(name: &str, taken: &HashSet<PathBuf>) -> PathBuf {
    let stem = sanitize_file_stem(name);
    let first = PathBuf::from(format!("{}.zip", stem));
    if !taken.contains(&first) {
        return first;
    }

    (2..)
        .map(|i| PathBuf::from(format!("{}-{}.zip", stem, i)))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(first)
}

/// Fabric names often are URLs; keep them usable as file names
fn sanitize_file_stem(name: &str) -> String {
    let stripped = name
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}
