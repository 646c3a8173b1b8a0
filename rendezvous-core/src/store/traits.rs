// rendezvous-core/src/store/traits.rs

//! Advertisement store abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::topology::Advertisement;

/// Shared, append-only collection of advertisements.
///
/// Writers only ever touch their own (role, ordinal) entry, so no locking
/// across the store is needed. A single entry must become visible
/// atomically: readers see either the previous content or the new one.
///
/// # Object Safety
///
/// This trait is object-safe and can be used with `Arc<dyn AdvertisementStore>`.
#[async_trait]
pub trait AdvertisementStore: Send + Sync {
    /// Publishes an advertisement, replacing any earlier one with the same
    /// role and ordinal.
    ///
    /// # Errors
    ///
    /// Returns `RendezvousError::StoreUnavailable` if the store cannot be
    /// created or written.
    async fn publish(&self, advertisement: &Advertisement) -> Result<()>;

    /// Returns a snapshot of all readable advertisements, one per
    /// (role, ordinal), sorted by role then ordinal.
    ///
    /// Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `RendezvousError::StoreUnavailable` if the store cannot be
    /// enumerated.
    async fn read_all(&self) -> Result<Vec<Advertisement>>;

    /// Human-readable location, for diagnostics.
    fn location(&self) -> String;
}
