//! The assembled cluster descriptor.

use std::collections::BTreeMap;

use super::{Advertisement, Endpoint, Role, WorkerOrdinal};
use crate::error::{Result, RendezvousError};

/// Identity of the local process within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub role: Role,
    pub ordinal: WorkerOrdinal,
}

impl TaskId {
    pub fn new(ordinal: WorkerOrdinal) -> Self {
        Self {
            role: Role::from_ordinal(ordinal),
            ordinal,
        }
    }
}

/// Ordered topology of a job plus the local task.
///
/// Every role has a group, possibly empty. Endpoints inside a group are
/// sorted by ordinal ascending, so every participant assembling from the
/// same advertisements gets identical groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    groups: BTreeMap<Role, Vec<Endpoint>>,
    task: TaskId,
    task_index: usize,
}

impl ClusterDescriptor {
    /// Build a descriptor from a snapshot of advertisements.
    ///
    /// All advertisements are included, even if there are more than the
    /// job expects. Duplicated keys keep the first occurrence.
    pub fn assemble(advertisements: &[Advertisement], task: TaskId) -> Self {
        let mut sorted: Vec<&Advertisement> = advertisements.iter().collect();
        sorted.sort_by_key(|ad| ad.key());
        sorted.dedup_by_key(|ad| ad.key());

        let task_index = sorted
            .iter()
            .filter(|ad| ad.role == task.role && ad.ordinal < task.ordinal)
            .count();

        let mut groups: BTreeMap<Role, Vec<Endpoint>> =
            Role::ALL.iter().map(|role| (*role, Vec::new())).collect();
        for ad in sorted {
            groups.entry(ad.role).or_default().push(ad.endpoint.clone());
        }

        Self {
            groups,
            task,
            task_index,
        }
    }

    /// Static single-machine topology: every participant on `localhost`,
    /// ordinal `i` listening on `base_port + i`.
    pub fn localhost(
        n_workers: u32,
        worker_ordinal: WorkerOrdinal,
        base_port: u16,
    ) -> Result<Self> {
        if n_workers == 0 || worker_ordinal >= n_workers {
            return Err(RendezvousError::config(format!(
                "worker ordinal {worker_ordinal} is outside a job of {n_workers} workers"
            )));
        }

        let advertisements = (0..n_workers)
            .map(|ordinal| {
                let port = u16::try_from(u32::from(base_port) + ordinal).map_err(|_| {
                    RendezvousError::config(format!(
                        "base port {base_port} leaves no room for {n_workers} workers"
                    ))
                })?;
                Ok(Advertisement::new(ordinal, Endpoint::new("localhost", port)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::assemble(&advertisements, TaskId::new(worker_ordinal)))
    }

    /// Build a descriptor from already-ordered groups.
    ///
    /// Ordinals are implied: parameter servers come first, then workers.
    pub(crate) fn from_groups(
        mut groups: BTreeMap<Role, Vec<Endpoint>>,
        role: Role,
        task_index: usize,
    ) -> Result<Self> {
        for r in Role::ALL {
            groups.entry(r).or_default();
        }

        let group_len = groups.get(&role).map(Vec::len).unwrap_or(0);
        if task_index >= group_len {
            return Err(RendezvousError::config(format!(
                "task index {task_index} is outside the '{role}' group of {group_len} endpoints"
            )));
        }

        let preceding: usize = groups
            .iter()
            .take_while(|(r, _)| **r < role)
            .map(|(_, endpoints)| endpoints.len())
            .sum();
        let ordinal = WorkerOrdinal::try_from(preceding + task_index)
            .map_err(|_| RendezvousError::config("cluster is too large"))?;

        Ok(Self {
            groups,
            task: TaskId { role, ordinal },
            task_index,
        })
    }

    /// Endpoints of one role, ordered by ordinal.
    pub fn group(&self, role: Role) -> &[Endpoint] {
        self.groups.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn groups(&self) -> &BTreeMap<Role, Vec<Endpoint>> {
        &self.groups
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Position of the local task within its role group.
    pub fn task_index(&self) -> usize {
        self.task_index
    }

    /// Total number of endpoints across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
