// rendezvous-core/src/store/mod.rs

//! Advertisement storage for the rendezvous.
//!
//! Participants never talk to each other during a rendezvous; the store is
//! the only thing they share. Each participant publishes its own entry and
//! polls for everybody else's.
//!
//! # Example
//!
//! ```no_run
//! use rendezvous_core::store::{AdvertisementStore, FileAdvertisementStore};
//! use rendezvous_core::topology::{Advertisement, Endpoint};
//!
//! # async fn example() -> rendezvous_core::Result<()> {
//! let store = FileAdvertisementStore::new("/shared/tfcluster");
//!
//! store
//!     .publish(&Advertisement::new(1, Endpoint::new("10.0.0.2", 49300)))
//!     .await?;
//!
//! for ad in store.read_all().await? {
//!     println!("{} {} {}", ad.role, ad.ordinal, ad.endpoint);
//! }
//! # Ok(())
//! # }
//! ```

mod local;
mod traits;

pub use local::{FileAdvertisementStore, ENTRY_EXTENSION};
pub use traits::AdvertisementStore;
