//! Grouping of detailed status into a per-server report, and its text rendering.
//!
//! Everything here is a pure function of its inputs; the engine never depends on display
//! text.
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    BriefStatus, DetailedStatus, LOCAL_SERVER, ServiceStatus, ServiceType, Transition,
    UNASSOCIATED_SERVER,
};

/// Rendered when there is nothing to report.
pub const NO_SERVICES: &str = "No services available.";

/// Services grouped by server, then by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailedReport {
    pub servers: Vec<ServerReport>,
    /// Offline services that no source claimed.
    pub unassociated_offline: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerReport {
    pub server: String,
    #[serde(flatten)]
    pub state: ServerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServerState {
    /// The last fetch from this server failed; its services are not listed.
    Offline { reason: String },
    /// Reachable; empty `groups` and `offline` means no services are running.
    Online {
        groups: Vec<TypeGroup>,
        offline: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeGroup {
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub services: Vec<String>,
}

#[derive(Default)]
struct ServerBuckets {
    online: BTreeMap<ServiceType, Vec<String>>,
    offline: Vec<String>,
}

/// Builds the grouped report.
///
/// Servers are ordered `local`, then `node_ids` in the given order, then any other server
/// that shows up in the data. A server present in `down` is reported offline with its
/// reason regardless of its service entries.
pub fn build_report<'a>(
    detailed: &BTreeMap<String, DetailedStatus>,
    down: &BTreeMap<String, String>,
    node_ids: impl IntoIterator<Item = &'a String>,
) -> DetailedReport {
    let mut order: Vec<String> = vec![LOCAL_SERVER.to_string()];
    for id in node_ids {
        if !order.contains(id) {
            order.push(id.clone());
        }
    }

    let mut buckets: BTreeMap<String, ServerBuckets> = BTreeMap::new();
    let mut unassociated_offline = Vec::new();

    for (name, status) in detailed {
        if status.server == UNASSOCIATED_SERVER {
            if !status.online {
                unassociated_offline.push(name.clone());
            }
            continue;
        }

        let bucket = buckets.entry(status.server.clone()).or_default();
        if status.online {
            bucket
                .online
                .entry(status.service_type.unwrap_or(ServiceType::Unknown))
                .or_default()
                .push(name.clone());
        } else {
            bucket.offline.push(name.clone());
        }
    }

    let extra: BTreeSet<&String> = buckets
        .keys()
        .chain(down.keys())
        .filter(|server| !order.contains(*server) && server.as_str() != UNASSOCIATED_SERVER)
        .collect();
    order.extend(extra.into_iter().cloned());

    let servers = order
        .into_iter()
        .map(|server| {
            let state = match down.get(&server) {
                Some(reason) => ServerState::Offline {
                    reason: reason.clone(),
                },
                None => {
                    let bucket = buckets.remove(&server).unwrap_or_default();
                    ServerState::Online {
                        groups: bucket
                            .online
                            .into_iter()
                            .map(|(service_type, services)| TypeGroup {
                                service_type,
                                services,
                            })
                            .collect(),
                        offline: bucket.offline,
                    }
                }
            };
            ServerReport { server, state }
        })
        .collect();

    DetailedReport {
        servers,
        unassociated_offline,
    }
}

fn language_label(service_type: ServiceType) -> Option<&'static str> {
    match service_type {
        ServiceType::Python => Some("Python"),
        ServiceType::Node => Some("Node.JS"),
        ServiceType::NodePm2 => Some("Node.JS with PM2"),
        ServiceType::Unknown => None,
    }
}

fn push_list(msg: &mut String, names: &[String]) {
    for name in names {
        msg.push_str(&format!("  - {name}\n"));
    }
    msg.push('\n');
}

/// One line per service.
pub fn render_brief(status: &BTreeMap<String, BriefStatus>) -> String {
    if status.is_empty() {
        return NO_SERVICES.to_string();
    }

    status
        .iter()
        .map(|(name, entry)| {
            if entry.online {
                format!("✅ {name} is online\n")
            } else {
                format!("❌ {name} is offline\n")
            }
        })
        .collect()
}

pub fn render_detailed(report: &DetailedReport) -> String {
    let mut msg = String::new();

    for server in &report.servers {
        match &server.state {
            ServerState::Offline { reason } => {
                msg.push_str(&format!(
                    "Server {} is offline:\nLast Error: {reason}\n",
                    server.server
                ));
            }
            ServerState::Online { groups, offline } => {
                msg.push_str(&format!("Server {} is online:\n", server.server));
                if groups.is_empty() && offline.is_empty() {
                    msg.push_str("  ❔ No service running on this server\n\n");
                    continue;
                }
                for group in groups {
                    match language_label(group.service_type) {
                        Some(lang) => {
                            msg.push_str(&format!("  ✅ Service running in {lang}:\n"))
                        }
                        None => msg.push_str("  ❔ Service with unknown status/type:\n"),
                    }
                    push_list(&mut msg, &group.services);
                }
                if !offline.is_empty() {
                    msg.push_str("  ❌ Service offline:\n");
                    push_list(&mut msg, offline);
                }
            }
        }
    }

    if !report.unassociated_offline.is_empty() {
        msg.push_str("Service without server association:\n  ❌ Service offline:\n");
        push_list(&mut msg, &report.unassociated_offline);
    }

    if msg.is_empty() {
        NO_SERVICES.to_string()
    } else {
        msg
    }
}

/// One line per node whose last fetch failed.
pub fn render_down(down: &BTreeMap<String, String>) -> String {
    down.iter()
        .map(|(server, reason)| {
            format!("🚫 Errored when fetching status from node `{server}`: {reason}\n")
        })
        .collect()
}

/// Compares two service maps by name and online flag.
///
/// A change of server or type alone is not a transition. Output is ordered by name.
pub fn diff_snapshots(
    previous: &BTreeMap<String, ServiceStatus>,
    next: &BTreeMap<String, ServiceStatus>,
) -> Vec<Transition> {
    let names: BTreeSet<&String> = previous.keys().chain(next.keys()).collect();

    names
        .into_iter()
        .filter_map(|name| {
            let name = name.clone();
            match (previous.get(&name), next.get(&name)) {
                (Some(before), Some(after)) if before.online == after.online => None,
                (Some(_), Some(after)) if after.online => Some(Transition::Up { name }),
                (Some(_), Some(_)) => Some(Transition::Down { name }),
                (None, Some(after)) => Some(Transition::New {
                    name,
                    online: after.online,
                }),
                (Some(_), None) => Some(Transition::Deleted { name }),
                (None, None) => None,
            }
        })
        .collect()
}

pub fn render_transition(transition: &Transition) -> String {
    match transition {
        Transition::Up { name } => format!("✅ {name} is up"),
        Transition::Down { name } => format!("❌ {name} is down"),
        Transition::New { name, online: true } => {
            format!("🆕✅ {name} just popped up and indicates online")
        }
        Transition::New {
            name,
            online: false,
        } => format!("🆕❌ {name} showed up but it is offline"),
        Transition::Deleted { name } => format!("🗑 {name} has been deleted"),
    }
}

/// One line per transition.
pub fn render_transitions(transitions: &[Transition]) -> String {
    transitions
        .iter()
        .map(|transition| format!("{}\n", render_transition(transition)))
        .collect()
}
