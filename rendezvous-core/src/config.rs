// rendezvous-core/src/config.rs

//! Configuration management for the rendezvous.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, RendezvousError};
use crate::net::PortRange;

// Top-level rendezvous configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub cluster: ClusterConfig,
    pub ports: PortConfig,
    pub store: StoreConfig,
    pub quorum: QuorumConfig,
    pub network: NetworkConfig,
}

/// Job shape and this process's position in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Total number of participants, including the parameter server.
    pub n_workers: u32,
    /// Ordinal of this process. Ordinal 0 is the parameter server.
    pub worker_ordinal: u32,
}

// Port allocation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    // First port of the global range (inclusive).
    pub range_start: u16,
    // Last port of the global range (inclusive).
    pub range_end: u16,
    // How long a liveness probe waits for a connection before calling the port free.
    pub probe_timeout_ms: u64,
    // Bind and hold the chosen port instead of probing it.
    pub reserve: bool,
}

// Shared advertisement directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    // Directory shared by all participants.
    pub comm_folder: PathBuf,
    /// Optional run identifier; entries live under `<comm_folder>/<run_id>/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

// Quorum wait options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    // Sleep between two reads of the store.
    pub poll_interval_ms: u64,
    /// Give up after this long. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Network identity options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host to advertise instead of the auto-detected address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_address: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            n_workers: 1,
            worker_ordinal: 0,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_start: 49152,
            range_end: 65535,
            probe_timeout_ms: 200,
            reserve: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            comm_folder: PathBuf::from("./tfcluster"),
            run_id: None,
        }
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_ms: None,
        }
    }
}

impl PortConfig {
    pub fn range(&self) -> PortRange {
        PortRange::new(self.range_start, self.range_end)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl StoreConfig {
    /// Directory the advertisements of this run are written to.
    pub fn location(&self) -> PathBuf {
        match &self.run_id {
            Some(run_id) => self.comm_folder.join(run_id),
            None => self.comm_folder.clone(),
        }
    }
}

impl QuorumConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl FromStr for RendezvousConfig {
    type Err = RendezvousError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| RendezvousError::config_with_source("failed to parse TOML config", e))
    }
}

impl RendezvousConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it.
    ///
    /// For callers that layer further overrides on top of the file and
    /// validate the merged result.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RendezvousError::config_with_source(
                format!("failed to read config file {}", path.display()),
                e,
            )
        })?;
        content.parse()
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `RDV_` and use underscores
    // to separate nested fields. For example:
    // - `RDV_CLUSTER_N_WORKERS` overrides `cluster.n_workers`
    // - `RDV_PORTS_RANGE_START` overrides `ports.range_start`
    // - `RDV_STORE_RUN_ID` overrides `store.run_id`
    // - `RDV_QUORUM_TIMEOUT_MS` overrides `quorum.timeout_ms`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Cluster overrides
        if let Ok(val) = std::env::var("RDV_CLUSTER_N_WORKERS") {
            if let Ok(v) = val.parse() {
                self.cluster.n_workers = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_CLUSTER_WORKER_ORDINAL") {
            if let Ok(v) = val.parse() {
                self.cluster.worker_ordinal = v;
            }
        }

        // Port overrides
        if let Ok(val) = std::env::var("RDV_PORTS_RANGE_START") {
            if let Ok(v) = val.parse() {
                self.ports.range_start = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_PORTS_RANGE_END") {
            if let Ok(v) = val.parse() {
                self.ports.range_end = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_PORTS_PROBE_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.ports.probe_timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_PORTS_RESERVE") {
            if let Ok(v) = val.parse() {
                self.ports.reserve = v;
            }
        }

        // Store overrides
        if let Ok(val) = std::env::var("RDV_STORE_COMM_FOLDER") {
            self.store.comm_folder = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("RDV_STORE_RUN_ID") {
            self.store.run_id = Some(val);
        }

        // Quorum overrides
        if let Ok(val) = std::env::var("RDV_QUORUM_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.quorum.poll_interval_ms = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_QUORUM_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.quorum.timeout_ms = Some(v);
            }
        }

        // Network overrides
        if let Ok(val) = std::env::var("RDV_NETWORK_ADVERTISE_ADDRESS") {
            self.network.advertise_address = Some(val);
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        // Cluster validation
        if self.cluster.n_workers == 0 {
            return Err(RendezvousError::config(
                "cluster.n_workers must be greater than 0",
            ));
        }
        if self.cluster.worker_ordinal >= self.cluster.n_workers {
            return Err(RendezvousError::config(format!(
                "cluster.worker_ordinal must be less than cluster.n_workers ({} >= {})",
                self.cluster.worker_ordinal, self.cluster.n_workers
            )));
        }

        // Port validation
        if self.ports.range_start >= self.ports.range_end {
            return Err(RendezvousError::config(format!(
                "ports.range_start must be less than ports.range_end ({} >= {})",
                self.ports.range_start, self.ports.range_end
            )));
        }
        if self.ports.range_start == 0 {
            return Err(RendezvousError::config(
                "ports.range_start must be greater than 0",
            ));
        }
        if self.ports.probe_timeout_ms == 0 {
            return Err(RendezvousError::config(
                "ports.probe_timeout_ms must be greater than 0",
            ));
        }

        // Store validation
        if self.store.comm_folder.as_os_str().is_empty() {
            return Err(RendezvousError::config(
                "store.comm_folder must not be empty",
            ));
        }
        if let Some(run_id) = &self.store.run_id {
            if run_id.is_empty() || run_id.contains(&['/', '\\'][..]) || run_id == "." || run_id == ".." {
                return Err(RendezvousError::config(format!(
                    "store.run_id must be a plain directory name, got '{run_id}'"
                )));
            }
        }

        // Quorum validation
        if self.quorum.poll_interval_ms == 0 {
            return Err(RendezvousError::config(
                "quorum.poll_interval_ms must be greater than 0",
            ));
        }

        if let Some(address) = &self.network.advertise_address {
            if address.trim().is_empty() {
                return Err(RendezvousError::config(
                    "network.advertise_address must not be empty",
                ));
            }
        }

        Ok(())
    }
}
