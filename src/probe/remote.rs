//! Health queries against remote nodes.
use reqwest::blocking::Client;
use serde::Deserialize;
use std::{collections::BTreeMap, time::Duration};
use tracing::warn;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::model::{ServiceStatus, ServiceType};

/// Fetches the services hosted on one node.
pub trait NodeClient: Send + Sync {
    /// Returns the node's services attributed to `node_id`, or why they could not be read.
    fn fetch(&self, node_id: &str, node: &NodeConfig) -> Result<Vec<ServiceStatus>, NodeError>;
}

/// A single service as reported by a node.
#[derive(Debug, Deserialize)]
struct RemoteEntry {
    #[serde(default)]
    name: Option<String>,
    online: bool,
    #[serde(rename = "type", default)]
    service_type: Option<String>,
    #[serde(default)]
    server: Option<String>,
}

/// Accepted reply shapes: a list of entries or a map keyed by service name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeReply {
    List(Vec<RemoteEntry>),
    Map(BTreeMap<String, RemoteEntry>),
}

/// Decodes a node reply body into statuses attributed to `node_id`.
pub fn parse_reply(
    node_id: &str,
    address: &str,
    body: &str,
) -> Result<Vec<ServiceStatus>, NodeError> {
    let reply: NodeReply = serde_json::from_str(body).map_err(|source| NodeError::Decode {
        address: address.to_string(),
        source,
    })?;

    let entries: Vec<(String, RemoteEntry)> = match reply {
        NodeReply::List(entries) => entries
            .into_iter()
            .filter_map(|entry| match entry.name.clone() {
                Some(name) => Some((name, entry)),
                None => {
                    warn!("node '{node_id}' reported a service without a name, ignoring it");
                    None
                }
            })
            .collect(),
        NodeReply::Map(entries) => entries
            .into_iter()
            .map(|(key, entry)| (entry.name.clone().unwrap_or(key), entry))
            .collect(),
    };

    Ok(entries
        .into_iter()
        .map(|(name, entry)| {
            if let Some(claimed) = entry.server.as_deref()
                && claimed != node_id
            {
                warn!(
                    "service '{name}' on node '{node_id}' claims server '{claimed}', attributing it to '{node_id}'"
                );
            }

            if entry.online {
                let ty = entry
                    .service_type
                    .as_deref()
                    .map(ServiceType::from_tag)
                    .unwrap_or(ServiceType::Unknown);
                ServiceStatus::online(name, node_id, ty)
            } else {
                ServiceStatus::offline(name, node_id)
            }
        })
        .collect())
}

/// Node client issuing blocking HTTP `GET` requests with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    client: Client,
}

impl HttpNodeClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl NodeClient for HttpNodeClient {
    fn fetch(&self, node_id: &str, node: &NodeConfig) -> Result<Vec<ServiceStatus>, NodeError> {
        let url = node.url();
        let request_error = |source: reqwest::Error| NodeError::Request {
            address: node.address.clone(),
            source,
        };

        let response = self.client.get(&url).send().map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Status {
                address: node.address.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(request_error)?;
        parse_reply(node_id, &node.address, &body)
    }
}
