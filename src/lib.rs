//! # offsetkv
//!
//! A small, strongly-consistent key-value cache whose source of truth is a
//! compacted, partitioned, replicated log. Worker processes share offset
//! bookkeeping through it without a coordination service:
//! - any worker reads the latest value of a key
//! - any worker writes a new value
//! - a read issued after a write completed observes that write (or a later
//!   one), whichever worker wrote it
//!
//! ## Architecture
//!
//! ```text
//!   get(keys)                         set(entries, callback)
//!      │                                   │
//! ┌────▼───────────────────────────────────▼────┐
//! │                 OffsetStore                  │
//! │  read_to_end barrier      one send / entry   │
//! │  snapshot lookup          batch completion   │
//! └────▲───────────────────────────────────┬────┘
//!      │ consumption callback              │ send
//! ┌────┴───────────────────────────────────▼────┐
//! │        ReplicatedLog (compacted topic)       │
//! │   partition 0 │ partition 1 │ ... │ N-1     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use bytes::Bytes;
//! use offsetkv::{log::MemoryCluster, OffsetStore, StoreConfig};
//!
//! # async fn demo() -> offsetkv::Result<()> {
//! let cluster = MemoryCluster::new();
//! let store = OffsetStore::new(cluster.factory());
//! store.configure(&StoreConfig::default())?;
//! store.start()?;
//!
//! let key = Some(Bytes::from_static(b"source-1"));
//! store
//!     .set(vec![(key.clone(), Some(Bytes::from_static(b"42")))], |_| {})
//!     .await?;
//! let offsets = store.get(vec![key.clone()]).await?;
//! assert_eq!(offsets[&key], Some(Bytes::from_static(b"42")));
//!
//! store.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod log;
pub mod store;

// Re-export commonly used types
pub use common::{Error, Result, StoreConfig};
pub use store::{OffsetMap, OffsetStore, StoreState};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
