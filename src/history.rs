//! Last-seen failure per remote node.
use std::collections::BTreeMap;

/// Records the most recent fetch failure per server.
///
/// A server has an entry exactly when its latest probe failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryTracker {
    last_errors: BTreeMap<String, String>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or overwrites the last error for `server_id`.
    pub fn record_failure(&mut self, server_id: &str, reason: impl Into<String>) {
        self.last_errors.insert(server_id.to_string(), reason.into());
    }

    /// Clears the last error for `server_id`. Returns whether the server was down.
    pub fn record_success(&mut self, server_id: &str) -> bool {
        self.last_errors.remove(server_id).is_some()
    }

    pub fn last_error(&self, server_id: &str) -> Option<&str> {
        self.last_errors.get(server_id).map(String::as_str)
    }

    /// Servers currently carrying a recorded error, mapped to that error.
    pub fn down_servers(&self) -> BTreeMap<String, String> {
        self.last_errors.clone()
    }
}
