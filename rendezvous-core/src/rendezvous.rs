// rendezvous-core/src/rendezvous.rs

//! Rendezvous of the participants of a training job.
//!
//! Every participant runs the same sequence independently:
//!
//! 1. Resolve its own address and port
//! 2. Publish an advertisement to the shared store
//! 3. Poll the store until all `n_workers` participants are visible
//! 4. Assemble the ordinal-sorted cluster descriptor
//!
//! Since every participant sorts by ordinal, all of them end up with the
//! same groups without ever exchanging a message.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ClusterConfig, PortConfig, RendezvousConfig, StoreConfig};
use crate::error::{Result, RendezvousError};
use crate::net::{
    allocate_port, reserve_port, AddressResolver, InterfaceAddressResolver, PortRange,
    PortReservation, StaticAddressResolver,
};
use crate::store::{AdvertisementStore, FileAdvertisementStore};
use crate::topology::{Advertisement, ClusterDescriptor, Endpoint, TaskId, WorkerOrdinal};

/// Progress of a rendezvous. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RendezvousState {
    Resolving,
    Resolved,
    Published,
    AwaitingQuorum,
    Complete,
}

/// A single participant's rendezvous.
pub struct Rendezvous {
    config: RendezvousConfig,
    store: Arc<dyn AdvertisementStore>,
    resolver: Arc<dyn AddressResolver>,
    state: RendezvousState,
    advertisement: Option<Advertisement>,
    reservation: Option<PortReservation>,
}

impl Rendezvous {
    /// Create a rendezvous using the file store and address resolver the
    /// configuration describes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: RendezvousConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn AdvertisementStore> =
            Arc::new(FileAdvertisementStore::from_config(&config.store));
        let resolver: Arc<dyn AddressResolver> = match &config.network.advertise_address {
            Some(host) => Arc::new(StaticAddressResolver::new(host.clone())),
            None => Arc::new(InterfaceAddressResolver),
        };

        Ok(Self {
            config,
            store,
            resolver,
            state: RendezvousState::Resolving,
            advertisement: None,
            reservation: None,
        })
    }

    /// Replace the advertisement store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn AdvertisementStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the address resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    pub fn state(&self) -> RendezvousState {
        self.state
    }

    /// This participant's advertisement, once resolved.
    pub fn advertisement(&self) -> Option<&Advertisement> {
        self.advertisement.as_ref()
    }

    /// Take the held port, if `ports.reserve` is enabled.
    pub fn take_reservation(&mut self) -> Option<PortReservation> {
        self.reservation.take()
    }

    /// Run the rendezvous to completion.
    ///
    /// # Errors
    ///
    /// - `Resolution` or `ExhaustedRange` if this participant cannot
    ///   determine its endpoint
    /// - `StoreUnavailable` if its advertisement cannot be published
    /// - `RendezvousTimeout` if `quorum.timeout_ms` elapses first
    /// - `Cancelled` if `cancel` fires before publishing or while waiting
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ClusterDescriptor> {
        if self.state != RendezvousState::Resolving {
            return Err(RendezvousError::config(format!(
                "rendezvous cannot be run again from state {:?}",
                self.state
            )));
        }

        let cluster = &self.config.cluster;
        let task = TaskId::new(cluster.worker_ordinal);
        tracing::info!(
            "Starting rendezvous as {} {} of {} in {}",
            task.role,
            task.ordinal,
            cluster.n_workers,
            self.store.location()
        );

        let advertisement = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Rendezvous cancelled before publishing");
                return Err(RendezvousError::Cancelled);
            }
            advertisement = self.resolve() => advertisement?,
        };
        self.advertisement = Some(advertisement.clone());
        self.transition(RendezvousState::Resolved);

        self.store.publish(&advertisement).await?;
        self.transition(RendezvousState::Published);
        tracing::info!("Advertised {} at {}", task.role, advertisement.endpoint);

        self.transition(RendezvousState::AwaitingQuorum);
        let advertisements = self.await_quorum(cancel).await?;

        let descriptor = ClusterDescriptor::assemble(&advertisements, task);
        self.transition(RendezvousState::Complete);
        tracing::info!(
            "Rendezvous complete: {} endpoints, task {} index {}",
            descriptor.len(),
            task.role,
            descriptor.task_index()
        );

        Ok(descriptor)
    }

    fn transition(&mut self, next: RendezvousState) {
        tracing::debug!("Rendezvous state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    async fn resolve(&mut self) -> Result<Advertisement> {
        let host = self.resolver.resolve()?;

        let ordinal = self.config.cluster.worker_ordinal;
        let n_workers = self.config.cluster.n_workers;
        let range = self.config.ports.range();

        let port = if self.config.ports.reserve {
            let reservation = reserve_port(ordinal, n_workers, range)?;
            let port = reservation.port();
            self.reservation = Some(reservation);
            port
        } else {
            allocate_port(ordinal, n_workers, range, self.config.ports.probe_timeout()).await?
        };

        tracing::debug!("Resolved endpoint {}:{}", host, port);
        Ok(Advertisement::new(ordinal, Endpoint::new(host, port)))
    }

    async fn await_quorum(&self, cancel: &CancellationToken) -> Result<Vec<Advertisement>> {
        let required = self.config.cluster.n_workers as usize;
        let poll_interval = self.config.quorum.poll_interval();
        let deadline = self.config.quorum.timeout().map(|t| Instant::now() + t);

        loop {
            let advertisements = match self.store.read_all().await {
                Ok(ads) => ads,
                Err(e) => {
                    tracing::warn!("Failed to read advertisements: {}", e);
                    Vec::new()
                }
            };

            let observed = advertisements
                .iter()
                .map(Advertisement::key)
                .collect::<BTreeSet<_>>()
                .len();
            if observed >= required {
                if observed > required {
                    tracing::warn!(
                        "Found {} advertisements for {} workers in {}; stale entries from an earlier run are included",
                        observed,
                        required,
                        self.store.location()
                    );
                }
                return Ok(advertisements);
            }

            tracing::info!("Waiting for the other workers ({} < {})", observed, required);

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RendezvousError::timeout(observed, required));
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Rendezvous cancelled with {} of {} workers", observed, required);
                    return Err(RendezvousError::Cancelled);
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

/// Run a rendezvous with default settings: auto-detected address, probed
/// port, file store in `comm_folder`, no timeout.
///
/// # Errors
///
/// See [`Rendezvous::run`].
pub async fn rendezvous(
    n_workers: u32,
    worker_ordinal: WorkerOrdinal,
    port_range: PortRange,
    comm_folder: impl Into<PathBuf>,
) -> Result<ClusterDescriptor> {
    let config = RendezvousConfig {
        cluster: ClusterConfig {
            n_workers,
            worker_ordinal,
        },
        ports: PortConfig {
            range_start: port_range.start,
            range_end: port_range.end,
            ..PortConfig::default()
        },
        store: StoreConfig {
            comm_folder: comm_folder.into(),
            run_id: None,
        },
        ..RendezvousConfig::default()
    };

    let mut rendezvous = Rendezvous::new(config)?;
    rendezvous.run(&CancellationToken::new()).await
}
