//! # univrs-persist
//!
//! Observable state with debounced, versioned persistence.
//!
//! This crate provides:
//!
//! - **Observable store**: [`Store`] holds a value and synchronously notifies
//!   subscribers on every replacement
//! - **Persistence engine**: [`Persist`] mirrors a store into a key-value
//!   [`Storage`] backend with debounced writes, deduplicated hydration and a
//!   version-gated migrate/merge pipeline
//! - **Multi-store hydration**: [`Hydrator`] joins the hydration of many engines
//! - **Error channel**: storage, migration, persistence and clear failures are
//!   reported through `on_error` and never escape the engine
//!
//! ## Backends
//!
//! - [`MemoryStorage`]: synchronous, in-process (default)
//! - [`SqliteStorage`]: asynchronous, durable, via [`AsyncAdapter`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use univrs_persist::{Persist, PersistOptions};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Counter {
//!     count: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> univrs_persist::Result<()> {
//!     let counter = Persist::with_initial(
//!         Counter { count: 0 },
//!         PersistOptions::new("counter"),
//!     )?;
//!
//!     // Load whatever was persisted before
//!     counter.hydrate().await;
//!
//!     // Written to storage 100ms after the last change
//!     counter.set_with(|c| Counter { count: c.count + 1 });
//!
//!     // Or right now
//!     counter.flush().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Migrations
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use univrs_persist::{Persist, PersistOptions, SqliteStorage};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Settings {
//!     theme: String,
//!     font_size: u8,
//! }
//!
//! #[tokio::main]
//! async fn main() -> univrs_persist::Result<()> {
//!     let storage = SqliteStorage::open("settings.db").await?;
//!
//!     let settings = Persist::with_initial(
//!         Settings { theme: "light".into(), font_size: 12 },
//!         PersistOptions::new("settings")
//!             .version(1)
//!             .storage(storage.into_adapter())
//!             .migrate(|mut state, stored_version| {
//!                 // v0 had no font size
//!                 if stored_version == Some(0) {
//!                     state["font_size"] = json!(14);
//!                 }
//!                 Ok(Some(state))
//!             }),
//!     )?;
//!
//!     settings.hydrate().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod hydrator;
pub mod memory;
pub mod options;
pub mod persist;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod watch;

// Re-export main types
pub use codec::{Envelope, MergeShape};
pub use error::{ErrorKind, PersistError, Result};
pub use hydrator::{setup_hydrator, Hydrate, Hydrator};
pub use memory::MemoryStorage;
pub use options::{PersistConfig, PersistOptions, PersistState, DEFAULT_DEBOUNCE_MS};
pub use persist::{Hydration, Persist};
pub use sqlite::SqliteStorage;
pub use storage::{
    AsyncAdapter, AsyncStorage, NoopStorage, Storage, StorageOp, StorageSource, MAX_KEY_LENGTH,
};
pub use store::{Store, Subscription};
pub use watch::{EventType, PersistEvent, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorKind, PersistError, Result};
    pub use crate::hydrator::{setup_hydrator, Hydrate, Hydrator};
    pub use crate::memory::MemoryStorage;
    pub use crate::options::{PersistConfig, PersistOptions};
    pub use crate::persist::{Hydration, Persist};
    pub use crate::storage::{AsyncAdapter, AsyncStorage, Storage, StorageOp};
    pub use crate::store::{Store, Subscription};
}
