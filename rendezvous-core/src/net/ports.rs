//! Per-worker port allocation.
//!
//! The global port range is split into one contiguous sub-range per worker
//! ordinal, so workers starting at the same time on the same host never
//! compete for the same candidate port.

use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{Result, RendezvousError};
use crate::topology::WorkerOrdinal;

/// Inclusive range of TCP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports in the range.
    pub fn len(&self) -> u32 {
        if self.end < self.start {
            0
        } else {
            u32::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    /// Sub-range owned by `ordinal` when the range is shared by `n_workers`.
    ///
    /// Boundaries are `start + i * (end - start) / n_workers` for
    /// `i in 0..=n_workers`; sub-range `i` spans `[b_i, b_{i+1})` and the
    /// last one also includes `end`. Returns `Ok(None)` when the sub-range is
    /// empty, which happens when there are more workers than ports.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `n_workers == 0`,
    /// `ordinal >= n_workers` or `start >= end`.
    pub fn split(&self, ordinal: WorkerOrdinal, n_workers: u32) -> Result<Option<PortRange>> {
        if n_workers == 0 {
            return Err(RendezvousError::config("n_workers must be greater than 0"));
        }
        if ordinal >= n_workers {
            return Err(RendezvousError::config(format!(
                "worker ordinal {ordinal} is out of range for {n_workers} workers"
            )));
        }
        if self.start >= self.end {
            return Err(RendezvousError::config(format!(
                "port range start {} must be less than end {}",
                self.start, self.end
            )));
        }

        let width = u64::from(self.end - self.start);
        let n = u64::from(n_workers);
        let boundary = |i: u64| u64::from(self.start) + i * width / n;

        let lo = boundary(u64::from(ordinal));
        let hi = if ordinal + 1 == n_workers {
            u64::from(self.end) + 1
        } else {
            boundary(u64::from(ordinal) + 1)
        };

        if lo >= hi {
            return Ok(None);
        }
        // Both bounds lie within [start, end], so they fit in u16.
        Ok(Some(PortRange::new(lo as u16, (hi - 1) as u16)))
    }
}

/// Returns `true` if something accepts TCP connections on `localhost:port`.
///
/// A refused or timed-out connection means the port is free. This is a
/// point-in-time check; nothing is reserved.
pub async fn is_port_in_use(port: u16, probe_timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(probe_timeout, TcpStream::connect((Ipv4Addr::LOCALHOST, port))).await,
        Ok(Ok(_))
    )
}

/// Find the first free port in the sub-range of `worker_ordinal`.
///
/// # Errors
///
/// Returns `RendezvousError::ExhaustedRange` if every port of the sub-range
/// is in use (or the sub-range is empty), and a configuration error for
/// invalid arguments.
pub async fn allocate_port(
    worker_ordinal: WorkerOrdinal,
    n_workers: u32,
    range: PortRange,
    probe_timeout: Duration,
) -> Result<u16> {
    let sub_range = assigned_range(worker_ordinal, n_workers, range)?;

    for port in sub_range.ports() {
        if is_port_in_use(port, probe_timeout).await {
            tracing::trace!("Port {} is in use", port);
            continue;
        }
        tracing::debug!(
            "Allocated port {} from [{}, {}]",
            port,
            sub_range.start,
            sub_range.end
        );
        return Ok(port);
    }

    Err(RendezvousError::exhausted_range(sub_range.start, sub_range.end))
}

/// Like `allocate_port`, but binds the port and keeps it bound.
///
/// The returned reservation holds a listener on `0.0.0.0:port`, closing the
/// window between choosing a port and the training runtime binding it.
///
/// # Errors
///
/// Returns `RendezvousError::ExhaustedRange` if no port of the sub-range can
/// be bound.
pub fn reserve_port(
    worker_ordinal: WorkerOrdinal,
    n_workers: u32,
    range: PortRange,
) -> Result<PortReservation> {
    let sub_range = assigned_range(worker_ordinal, n_workers, range)?;

    for port in sub_range.ports() {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                tracing::debug!("Reserved port {}", port);
                return Ok(PortReservation { listener, port });
            }
            Err(e) => tracing::trace!("Port {} unavailable: {}", port, e),
        }
    }

    Err(RendezvousError::exhausted_range(sub_range.start, sub_range.end))
}

fn assigned_range(
    worker_ordinal: WorkerOrdinal,
    n_workers: u32,
    range: PortRange,
) -> Result<PortRange> {
    range.split(worker_ordinal, n_workers)?.ok_or_else(|| {
        tracing::warn!(
            "Worker {} has no ports: {} workers share only {} ports",
            worker_ordinal,
            n_workers,
            range.len()
        );
        RendezvousError::exhausted_range(range.start, range.end)
    })
}

/// A port held open by this process until released.
#[derive(Debug)]
pub struct PortReservation {
    listener: TcpListener,
    port: u16,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Hand over the bound listener.
    pub fn into_listener(self) -> TcpListener {
        self.listener
    }

    /// Close the listener so another component can bind the port.
    pub fn release(self) {
        tracing::debug!("Releasing port {}", self.port);
    }
}
