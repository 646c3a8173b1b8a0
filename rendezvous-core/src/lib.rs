// rendezvous-core/src/lib.rs

//! Filesystem Rendezvous - Core Library
//!
//! This crate lets the participants of a distributed training job find each
//! other through a shared directory: each one resolves its own address and
//! port, publishes an advertisement, waits until all participants are
//! visible, and assembles the same ordinal-sorted cluster descriptor.

pub mod config;
pub mod error;
pub mod net;
pub mod store;
pub mod topology;

// Re-export commonly used types for convenience
pub use config::RendezvousConfig;
pub use error::{RendezvousError, Result};
pub use net::{allocate_port, resolve_local_address, PortRange, PortReservation};
pub use store::{AdvertisementStore, FileAdvertisementStore};
pub use topology::{Advertisement, ClusterDescriptor, Endpoint, Role, TaskId, TfConfig, WorkerOrdinal};

pub mod rendezvous;
pub use rendezvous::{rendezvous, Rendezvous, RendezvousState};
