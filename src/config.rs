//! Configuration management for botstatus.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::{LOCAL_SERVER, UNASSOCIATED_SERVER};

const DEFAULT_CONFIG_FILES: [&str; 2] = ["botstatus.yaml", "status.yaml"];
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INTERPRETER_PREFIX: &str = "python";
const DEFAULT_NODE_PATH: &str = "/status";

/// Represents the structure of the configuration file as written on disk.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    refresh_interval: Option<String>,
    request_timeout: Option<String>,
    lock_timeout: Option<String>,
    status_dir: Option<String>,
    interpreter_prefix: Option<String>,
    #[serde(default)]
    nodes: BTreeMap<String, NodeConfig>,
    #[serde(default)]
    services: Vec<String>,
    admin: Option<i64>,
}

/// Resolved configuration consumed by the status engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum age of the snapshot before a non-forced read refreshes it.
    pub refresh_interval: Duration,
    /// Upper bound for a single node health request.
    pub request_timeout: Duration,
    /// Upper bound for waiting on another caller's refresh.
    pub lock_timeout: Duration,
    /// Directory holding self-registered process descriptors.
    pub status_dir: PathBuf,
    /// Executable name prefix a live local process must carry to count as online.
    pub interpreter_prefix: String,
    /// Remote nodes keyed by node id.
    pub nodes: BTreeMap<String, NodeConfig>,
    /// Services expected to exist somewhere; unreported ones show up as unassociated.
    pub services: Vec<String>,
    /// Admin identity for the chat front end. Not used by the engine.
    pub admin: Option<i64>,
}

/// Connection details for a remote node.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Base address, e.g. `http://10.0.0.2:8080`.
    pub address: String,
    /// Health endpoint path appended to the address.
    #[serde(default = "default_node_path")]
    pub path: String,
}

fn default_node_path() -> String {
    DEFAULT_NODE_PATH.to_string()
}

impl NodeConfig {
    /// Full URL of the node's health endpoint.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.address.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            status_dir: default_status_dir(),
            interpreter_prefix: DEFAULT_INTERPRETER_PREFIX.to_string(),
            nodes: BTreeMap::new(),
            services: Vec::new(),
            admin: None,
        }
    }
}

impl Config {
    /// Parses configuration from YAML text. Relative paths resolve against `base`.
    pub fn from_yaml_str(content: &str, base: &Path) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content)?;
        let file: ConfigFile = if expanded.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        Self::resolve(file, base)
    }

    fn resolve(file: ConfigFile, base: &Path) -> Result<Self, ConfigError> {
        for id in file.nodes.keys() {
            if id == LOCAL_SERVER || id == UNASSOCIATED_SERVER {
                return Err(ConfigError::ReservedNodeId(id.clone()));
            }
        }

        let status_dir = match file.status_dir {
            Some(dir) => {
                let path = Path::new(&dir);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    base.join(path)
                }
            }
            None => default_status_dir(),
        };

        Ok(Self {
            refresh_interval: parse_field(
                "refresh_interval",
                file.refresh_interval,
                DEFAULT_REFRESH_INTERVAL,
            )?,
            request_timeout: parse_field(
                "request_timeout",
                file.request_timeout,
                DEFAULT_REQUEST_TIMEOUT,
            )?,
            lock_timeout: parse_field("lock_timeout", file.lock_timeout, DEFAULT_LOCK_TIMEOUT)?,
            status_dir,
            interpreter_prefix: file
                .interpreter_prefix
                .unwrap_or_else(|| DEFAULT_INTERPRETER_PREFIX.to_string()),
            nodes: file.nodes,
            services: file.services,
            admin: file.admin,
        })
    }
}

/// `$HOME/.bot_status`, falling back to `/` when `HOME` is unset.
pub fn default_status_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".bot_status")
}

fn parse_field(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidDuration { field, value }),
        None => Ok(default),
    }
}

/// Parses a user-facing duration string in the format `<number>[s|m|h]`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str.parse().ok()?;
    Some(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(ConfigError::MissingEnvVar(missing));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.to_string())
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// Without an explicit path the first existing default file is used; if none exists the
/// built-in defaults apply.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    let config_path = match config_path {
        Some(path) => PathBuf::from(path),
        None => match DEFAULT_CONFIG_FILES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
        {
            Some(path) => path,
            None => {
                debug!("no configuration file found, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let content = fs::read_to_string(&config_path).map_err(|e| {
        ConfigError::ReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let base_path = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    Config::from_yaml_str(&content, &base_path)
}
