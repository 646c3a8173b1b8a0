//! Cluster topology types.
//!
//! This module defines the values exchanged during a rendezvous:
//!
//! - `Role` and `WorkerOrdinal`: a participant's fixed position in the job
//! - `Endpoint`: a host/port pair reachable by the other participants
//! - `Advertisement`: what a participant publishes about itself
//! - `ClusterDescriptor`: the ordered topology every participant assembles
//! - `TfConfig`: the JSON hand-off consumed by the training runtime

mod descriptor;
mod tf_config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RendezvousError};

pub use descriptor::{ClusterDescriptor, TaskId};
pub use tf_config::{TfConfig, TfTask};

/// Position of a participant within the job, in `[0, n_workers)`.
pub type WorkerOrdinal = u32;

/// Role of a participant.
///
/// Ordinal 0 is the parameter server; every other ordinal is a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ps", alias = "coordinator")]
    Coordinator,
    #[serde(rename = "worker")]
    Worker,
}

impl Role {
    /// All roles, in group order.
    pub const ALL: [Role; 2] = [Role::Coordinator, Role::Worker];

    pub fn from_ordinal(ordinal: WorkerOrdinal) -> Self {
        if ordinal == 0 {
            Self::Coordinator
        } else {
            Self::Worker
        }
    }

    /// Group name used in entry names and in the training runtime's cluster spec.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "ps",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ps" | "coordinator" => Ok(Self::Coordinator),
            "worker" => Ok(Self::Worker),
            other => Err(RendezvousError::config(format!("unknown role '{other}'"))),
        }
    }
}

/// A network endpoint reachable from every participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IP address or hostname.
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // IPv6 literals must be bracketed to keep the port separable.
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RendezvousError::config(format!("endpoint '{s}' has no port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| RendezvousError::config_with_source(format!("invalid port in '{s}'"), e))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(RendezvousError::config(format!("endpoint '{s}' has no host")));
        }
        Ok(Self::new(host, port))
    }
}

/// A participant's announcement of its role, ordinal and endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "AdvertisementRecord", into = "AdvertisementRecord")]
pub struct Advertisement {
    pub role: Role,
    pub ordinal: WorkerOrdinal,
    pub endpoint: Endpoint,
}

impl Advertisement {
    /// Create an advertisement, deriving the role from the ordinal.
    pub fn new(ordinal: WorkerOrdinal, endpoint: Endpoint) -> Self {
        Self {
            role: Role::from_ordinal(ordinal),
            ordinal,
            endpoint,
        }
    }

    /// Identity of the publisher. Two advertisements with the same key
    /// describe the same participant.
    pub fn key(&self) -> (Role, WorkerOrdinal) {
        (self.role, self.ordinal)
    }

    /// Entry name without extension, e.g. `worker_3`.
    pub fn entry_stem(&self) -> String {
        format!("{}_{}", self.role, self.ordinal)
    }
}

/// On-disk shape of an advertisement.
///
/// The aliases accept entries written by the older launch scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AdvertisementRecord {
    #[serde(alias = "task")]
    role: Role,
    #[serde(alias = "worker_idx")]
    ordinal: WorkerOrdinal,
    #[serde(alias = "ip_address")]
    address: String,
    port: u16,
}

impl From<AdvertisementRecord> for Advertisement {
    fn from(record: AdvertisementRecord) -> Self {
        Self {
            role: record.role,
            ordinal: record.ordinal,
            endpoint: Endpoint::new(record.address, record.port),
        }
    }
}

impl From<Advertisement> for AdvertisementRecord {
    fn from(ad: Advertisement) -> Self {
        Self {
            role: ad.role,
            ordinal: ad.ordinal,
            address: ad.endpoint.host,
            port: ad.endpoint.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_ordinal() {
        assert_eq!(Role::from_ordinal(0), Role::Coordinator);
        assert_eq!(Role::from_ordinal(1), Role::Worker);
        assert_eq!(Role::from_ordinal(17), Role::Worker);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("ps".parse::<Role>().unwrap(), Role::Coordinator);
        assert_eq!("coordinator".parse::<Role>().unwrap(), Role::Coordinator);
        assert_eq!("worker".parse::<Role>().unwrap(), Role::Worker);
        assert!("chief".parse::<Role>().is_err());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("10.0.0.1", 49200).to_string(), "10.0.0.1:49200");
        assert_eq!(Endpoint::new("::1", 8080).to_string(), "[::1]:8080");
        assert_eq!(Endpoint::new("node-1", 3000).to_string(), "node-1:3000");
    }

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            "10.0.0.2:49300".parse::<Endpoint>().unwrap(),
            Endpoint::new("10.0.0.2", 49300)
        );
        assert_eq!(
            "[2001:db8::1]:9999".parse::<Endpoint>().unwrap(),
            Endpoint::new("2001:db8::1", 9999)
        );
        assert!("10.0.0.2".parse::<Endpoint>().is_err());
        assert!(":80".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_advertisement_json_shape() {
        let ad = Advertisement::new(0, Endpoint::new("10.0.0.1", 49200));
        let value = serde_json::to_value(&ad).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "role": "ps",
                "ordinal": 0,
                "address": "10.0.0.1",
                "port": 49200
            })
        );
    }

    #[test]
    fn test_advertisement_accepts_legacy_fields() {
        let json = r#"{"task": "worker", "worker_idx": 2, "ip_address": "10.0.0.3", "port": 50001}"#;
        let ad: Advertisement = serde_json::from_str(json).unwrap();

        assert_eq!(ad.role, Role::Worker);
        assert_eq!(ad.ordinal, 2);
        assert_eq!(ad.endpoint, Endpoint::new("10.0.0.3", 50001));
    }

    #[test]
    fn test_advertisement_rejects_unknown_role() {
        let json = r#"{"role": "chief", "ordinal": 0, "address": "h", "port": 1}"#;
        assert!(serde_json::from_str::<Advertisement>(json).is_err());
    }

    #[test]
    fn test_entry_stem() {
        let ps = Advertisement::new(0, Endpoint::new("h", 1));
        let worker = Advertisement::new(4, Endpoint::new("h", 1));

        assert_eq!(ps.entry_stem(), "ps_0");
        assert_eq!(worker.entry_stem(), "worker_4");
        assert_eq!(worker.key(), (Role::Worker, 4));
    }
}
