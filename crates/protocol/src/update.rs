//! Machine state snapshots carried by UPDATE_BASIC and UPDATE_SERVICES.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// State of an OS service, encoded as its numeric status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Stopped = 1,
    StartPending = 2,
    StopPending = 3,
    Running = 4,
    ContinuePending = 5,
    PausePending = 6,
    Paused = 7,
}

impl ServiceState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Stopped,
            2 => Self::StartPending,
            3 => Self::StopPending,
            4 => Self::Running,
            5 => Self::ContinuePending,
            6 => Self::PausePending,
            7 => Self::Paused,
            _ => return None,
        })
    }
}

/// Most recent state reported by an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateData {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub auth_key: String,
    /// Service name to status code.
    #[serde(default)]
    pub services: BTreeMap<String, i32>,
}

impl UpdateData {
    pub fn new(hostname: impl Into<String>, auth_key: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            auth_key: auth_key.into(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, state: ServiceState) -> Self {
        self.services.insert(name.into(), state.code());
        self
    }

    /// Decoded state of a service; `None` if absent or the code is unknown.
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.services.get(name).copied().and_then(ServiceState::from_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_codes_match_status_table() {
        assert_eq!(ServiceState::Stopped.code(), 1);
        assert_eq!(ServiceState::Running.code(), 4);
        assert_eq!(ServiceState::from_code(7), Some(ServiceState::Paused));
        assert_eq!(ServiceState::from_code(0), None);
    }

    #[test]
    fn service_lookup() {
        let mut update = UpdateData::new("web01", "secret").with_service("nginx", ServiceState::Running);
        update.services.insert("broken".into(), 99);
        assert_eq!(update.service_state("nginx"), Some(ServiceState::Running));
        assert_eq!(update.service_state("broken"), None);
        assert_eq!(update.service_state("missing"), None);
    }

    #[test]
    fn missing_fields_default() {
        let update: UpdateData = serde_json::from_str(r#"{"hostname":"db01"}"#).unwrap();
        assert_eq!(update.hostname, "db01");
        assert!(update.auth_key.is_empty());
        assert!(update.services.is_empty());
    }
}
