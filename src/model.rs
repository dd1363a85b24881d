//! Uniform status model shared by every probe source.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr, time::Instant};
use strum::{AsRefStr, Display, EnumString};

/// Server id used for services probed on this machine.
pub const LOCAL_SERVER: &str = "local";

/// Server id used for expected services that no source reported.
pub const UNASSOCIATED_SERVER: &str = "none";

/// Runtime category of an online service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceType {
    /// Interpreted-language process (`python`).
    Python,
    /// Plain Node.js process (`node`).
    Node,
    /// Node.js process supervised by PM2 (`node-pm2`).
    NodePm2,
    /// Anything a node reports that is not recognised.
    #[serde(other)]
    Unknown,
}

impl ServiceType {
    /// Maps a reported tag onto a known type, never failing.
    pub fn from_tag(tag: &str) -> Self {
        Self::from_str(tag.trim()).unwrap_or(Self::Unknown)
    }

    /// Type of a local process run by an interpreter whose name starts with `prefix`.
    ///
    /// Versioned names such as `python3` or `nodejs` resolve to their family.
    pub fn from_interpreter(prefix: &str) -> Self {
        let prefix = prefix.trim();
        if prefix.starts_with("python") {
            Self::Python
        } else if prefix.starts_with("node") {
            Self::Node
        } else {
            Self::from_tag(prefix)
        }
    }
}

/// One monitored service within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub online: bool,
    pub server: String,
    /// Only present while the service is online.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

impl ServiceStatus {
    pub fn online(name: impl Into<String>, server: impl Into<String>, ty: ServiceType) -> Self {
        Self {
            name: name.into(),
            online: true,
            server: server.into(),
            service_type: Some(ty),
        }
    }

    pub fn offline(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            online: false,
            server: server.into(),
            service_type: None,
        }
    }
}

/// Projection returned by the brief status read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefStatus {
    pub online: bool,
}

/// Projection returned by the detailed status read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub online: bool,
    pub server: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
}

impl From<&ServiceStatus> for DetailedStatus {
    fn from(status: &ServiceStatus) -> Self {
        Self {
            online: status.online,
            server: status.server.clone(),
            service_type: if status.online {
                status.service_type
            } else {
                None
            },
        }
    }
}

/// A change in one service between two consecutive refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Transition {
    /// Was offline, now online.
    Up { name: String },
    /// Was online, now offline.
    Down { name: String },
    /// Not present before.
    New { name: String, online: bool },
    /// Present before, gone now.
    Deleted { name: String },
}

impl Transition {
    pub fn name(&self) -> &str {
        match self {
            Self::Up { name }
            | Self::Down { name }
            | Self::New { name, .. }
            | Self::Deleted { name } => name,
        }
    }
}

/// Full set of service entries computed by one refresh.
///
/// Keyed by service name, which makes names unique per snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Number of refreshes that produced this snapshot; zero before the first.
    pub generation: u64,
    /// Wall-clock time of the refresh.
    pub captured_at: DateTime<Utc>,
    /// Monotonic time of the refresh, `None` before the first.
    pub refreshed_at: Option<Instant>,
    pub services: BTreeMap<String, ServiceStatus>,
    /// What changed relative to the previous snapshot. Empty for the first refresh.
    pub changes: Vec<Transition>,
}

impl Snapshot {
    /// Returns an empty snapshot used before any refresh has run.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            captured_at: Utc::now(),
            refreshed_at: None,
            services: BTreeMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn brief(&self) -> BTreeMap<String, BriefStatus> {
        self.services
            .iter()
            .map(|(name, status)| {
                (
                    name.clone(),
                    BriefStatus {
                        online: status.online,
                    },
                )
            })
            .collect()
    }

    pub fn detailed(&self) -> BTreeMap<String, DetailedStatus> {
        self.services
            .iter()
            .map(|(name, status)| (name.clone(), DetailedStatus::from(status)))
            .collect()
    }
}
