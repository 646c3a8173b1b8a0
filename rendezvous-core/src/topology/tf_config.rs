//! JSON hand-off to the training runtime.
//!
//! The descriptor is encoded in the `{"cluster": ..., "task": ...}` shape
//! distributed training runtimes read their topology from. It is passed on
//! as an explicit value (stdout or a file), never through process-wide
//! environment state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ClusterDescriptor, Endpoint, Role};
use crate::error::{Result, RendezvousError};

/// Cluster plus task, as consumed by the training runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfConfig {
    /// Role group name to `host:port` strings, ordered by ordinal.
    pub cluster: BTreeMap<Role, Vec<String>>,
    pub task: TfTask,
}

/// The local task: its group and its position within that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfTask {
    #[serde(rename = "type")]
    pub role: Role,
    pub index: usize,
}

impl TfConfig {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RendezvousError::serialization(format!("failed to encode cluster config: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RendezvousError::config_with_source("failed to parse cluster config", e))
    }

    /// Load a hand-written cluster config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RendezvousError::config_with_source(
                format!("failed to read cluster config {}", path.display()),
                e,
            )
        })?;
        Self::from_json(&content)
    }

    /// Write the config to `path` atomically (temp file then rename).
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RendezvousError::config(format!("invalid output path {}", path.display())))?;
        let temp_path = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(e) = write_synced(&temp_path, json.as_bytes()) {
            let _ = fs::remove_file(&temp_path);
            return Err(RendezvousError::output_with_source(path, "failed to write temp file", e));
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            RendezvousError::output_with_source(path, "failed to rename temp file into place", e)
        })
    }
}

fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

impl From<&ClusterDescriptor> for TfConfig {
    fn from(descriptor: &ClusterDescriptor) -> Self {
        let cluster = descriptor
            .groups()
            .iter()
            .map(|(role, endpoints)| (*role, endpoints.iter().map(ToString::to_string).collect()))
            .collect();

        Self {
            cluster,
            task: TfTask {
                role: descriptor.task().role,
                index: descriptor.task_index(),
            },
        }
    }
}

impl TryFrom<&TfConfig> for ClusterDescriptor {
    type Error = RendezvousError;

    fn try_from(config: &TfConfig) -> Result<Self> {
        let groups = config
            .cluster
            .iter()
            .map(|(role, endpoints)| {
                let endpoints = endpoints
                    .iter()
                    .map(|e| e.parse::<Endpoint>())
                    .collect::<Result<Vec<_>>>()?;
                Ok((*role, endpoints))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        ClusterDescriptor::from_groups(groups, config.task.role, config.task.index)
    }
}

impl ClusterDescriptor {
    pub fn to_tf_config(&self) -> TfConfig {
        TfConfig::from(self)
    }

    pub fn from_tf_config(config: &TfConfig) -> Result<Self> {
        Self::try_from(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Advertisement, TaskId};
    use tempfile::TempDir;

    fn two_worker_descriptor(ordinal: u32) -> ClusterDescriptor {
        let ads = vec![
            Advertisement::new(0, Endpoint::new("10.0.0.1", 49200)),
            Advertisement::new(1, Endpoint::new("10.0.0.2", 49300)),
            Advertisement::new(2, Endpoint::new("10.0.0.3", 49400)),
        ];
        ClusterDescriptor::assemble(&ads, TaskId::new(ordinal))
    }

    #[test]
    fn test_to_tf_config_json() {
        let config = two_worker_descriptor(2).to_tf_config();
        let value: serde_json::Value = serde_json::from_str(&config.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "cluster": {
                    "ps": ["10.0.0.1:49200"],
                    "worker": ["10.0.0.2:49300", "10.0.0.3:49400"]
                },
                "task": {"type": "worker", "index": 1}
            })
        );
    }

    #[test]
    fn test_parameter_server_task() {
        let config = two_worker_descriptor(0).to_tf_config();
        assert_eq!(config.task, TfTask { role: Role::Coordinator, index: 0 });
    }

    #[test]
    fn test_from_json_hand_written() {
        let json = r#"{
            "cluster": {
                "worker": ["host1:2222", "host2:2222"],
                "ps": ["host0:2222"]
            },
            "task": {"type": "worker", "index": 0}
        }"#;

        let config = TfConfig::from_json(json).unwrap();
        let descriptor = ClusterDescriptor::from_tf_config(&config).unwrap();

        assert_eq!(descriptor.group(Role::Worker)[0], Endpoint::new("host1", 2222));
        assert_eq!(descriptor.task(), TaskId::new(1));
        assert_eq!(descriptor.to_tf_config(), config);
    }

    #[test]
    fn test_from_json_unknown_group() {
        let json = r#"{"cluster": {"chief": ["h:1"]}, "task": {"type": "worker", "index": 0}}"#;
        assert!(TfConfig::from_json(json).is_err());
    }

    #[test]
    fn test_from_tf_config_bad_endpoint() {
        let json = r#"{"cluster": {"ps": ["no-port"]}, "task": {"type": "ps", "index": 0}}"#;
        let config = TfConfig::from_json(json).unwrap();
        assert!(ClusterDescriptor::from_tf_config(&config).is_err());
    }

    #[test]
    fn test_write_and_read_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cluster.json");
        let config = two_worker_descriptor(1).to_tf_config();

        config.write_file(&path).unwrap();
        config.write_file(&path).unwrap();

        assert_eq!(TfConfig::from_file(&path).unwrap(), config);
        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cluster.json"]);
    }

    #[test]
    fn test_write_file_failure_names_the_output() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("cluster.json");

        let err = two_worker_descriptor(1).to_tf_config().write_file(&path).unwrap_err();

        assert!(matches!(err, RendezvousError::Output { .. }));
        assert!(err.to_string().contains("cluster.json"));
        assert!(!err.to_string().contains("store"));
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(TfConfig::from_file("/nonexistent/cluster.json").is_err());
    }
}
