//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the mesh orchestrator.
///
/// Missing fields deserialize to their defaults, so a config file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Text a guest sends once its channel to the host opens.
    pub greeting: String,

    /// Answer inbound calls with our own microphone stream.
    ///
    /// With `false` calls are answered without media, so audio only
    /// flows from caller to callee.
    pub answer_with_local_stream: bool,

    /// Whether the host calls each peer as soon as its channel opens.
    pub call_joining_peers: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            greeting: "hello, host".to_string(),
            answer_with_local_stream: true,
            call_joining_peers: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_config_default() {
        let config = MeshConfig::default();
        assert_eq!(config.greeting, "hello, host");
        assert!(config.answer_with_local_stream);
        assert!(config.call_joining_peers);
    }

    #[test]
    fn test_mesh_config_partial_json_keeps_defaults() {
        let config: MeshConfig =
            serde_json::from_str(r#"{"answer_with_local_stream": false}"#).unwrap();
        assert!(!config.answer_with_local_stream);
        assert_eq!(config.greeting, "hello, host");
    }
}
