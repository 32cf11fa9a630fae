//! Persistence engine configuration.
//!
//! [`PersistOptions`] is the full builder, including the pluggable codec,
//! migration and storage hooks. [`PersistConfig`] is the plain-data subset
//! that can live in a host application's configuration file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::codec::{self, Envelope};
use crate::error::{ErrorKind, PersistError, Result};
use crate::memory::MemoryStorage;
use crate::storage::{Storage, StorageSource};

/// Default delay between the last mutation and the write.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Bounds required of state managed by a persistence engine.
pub trait PersistState:
    Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
}

impl<T> PersistState for T where
    T: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static
{
}

pub(crate) type SerializeFn = Arc<dyn Fn(&Envelope) -> Result<String> + Send + Sync>;
pub(crate) type DeserializeFn = Arc<dyn Fn(&str) -> Result<Envelope> + Send + Sync>;
pub(crate) type MigrateFn = Arc<dyn Fn(Value, Option<u32>) -> Result<Option<Value>> + Send + Sync>;
pub(crate) type PartialFn<T> = Arc<dyn Fn(&T) -> Result<Value> + Send + Sync>;
pub(crate) type MergeFn<T> = Arc<dyn Fn(T, Value) -> Result<T> + Send + Sync>;
pub(crate) type ErrorFn = Arc<dyn Fn(ErrorKind, &PersistError) + Send + Sync>;

/// Serializable engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Storage key.
    pub name: String,

    /// Debounce window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Current schema version.
    #[serde(default)]
    pub version: u32,

    /// Never hydrate automatically on first access.
    #[serde(default)]
    pub skip_hydrate: bool,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl PersistConfig {
    /// Create settings with defaults for everything but the key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            version: 0,
            skip_hydrate: false,
        }
    }

    /// Parse settings from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(Into::into)
    }
}

/// Full configuration of a [`Persist`](crate::persist::Persist) engine.
pub struct PersistOptions<T> {
    pub(crate) name: String,
    pub(crate) debounce: Duration,
    pub(crate) version: u32,
    pub(crate) skip_hydrate: bool,
    pub(crate) serialize: SerializeFn,
    pub(crate) deserialize: DeserializeFn,
    pub(crate) migrate: Option<MigrateFn>,
    pub(crate) partial: PartialFn<T>,
    pub(crate) merge: MergeFn<T>,
    pub(crate) storage: StorageSource,
    pub(crate) on_error: ErrorFn,
}

impl<T: PersistState> PersistOptions<T> {
    /// Options for the given storage key with every hook at its default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            version: 0,
            skip_hydrate: false,
            serialize: Arc::new(codec::serialize_json),
            deserialize: Arc::new(codec::deserialize_json),
            migrate: None,
            partial: Arc::new(|state: &T| serde_json::to_value(state).map_err(Into::into)),
            merge: Arc::new(codec::merge_shallow::<T>),
            storage: StorageSource::Adapter(MemoryStorage::global()),
            on_error: Arc::new(log_error),
        }
    }

    /// Options from serializable settings.
    pub fn from_config(config: PersistConfig) -> Self {
        Self::new(config.name)
            .debounce(Duration::from_millis(config.debounce_ms))
            .version(config.version)
            .skip_hydrate(config.skip_hydrate)
    }
}

impl<T> PersistOptions<T> {
    /// Delay between the last mutation and the write.
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Schema version written alongside the state.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Never hydrate automatically; wait for an explicit `hydrate()`.
    pub fn skip_hydrate(mut self, skip: bool) -> Self {
        self.skip_hydrate = skip;
        self
    }

    /// Replace the envelope serializer.
    pub fn serialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&Envelope) -> Result<String> + Send + Sync + 'static,
    {
        self.serialize = Arc::new(f);
        self
    }

    /// Replace the envelope deserializer.
    pub fn deserialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Envelope> + Send + Sync + 'static,
    {
        self.deserialize = Arc::new(f);
        self
    }

    /// Transform `(stored_state, stored_version)` into the current shape.
    ///
    /// `Ok(None)` (or JSON `null`) discards the stored state. Without a
    /// migration, stored state is kept only if its version matches.
    pub fn migrate<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, Option<u32>) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.migrate = Some(Arc::new(f));
        self
    }

    /// Select the part of the state that gets persisted.
    pub fn partial<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> Result<Value> + Send + Sync + 'static,
    {
        self.partial = Arc::new(f);
        self
    }

    /// Combine the initial state with migrated persisted state.
    pub fn merge<F>(mut self, f: F) -> Self
    where
        F: Fn(T, Value) -> Result<T> + Send + Sync + 'static,
    {
        self.merge = Arc::new(f);
        self
    }

    /// Use a fixed storage adapter.
    pub fn storage<S: Storage + 'static>(self, storage: S) -> Self {
        self.storage_arc(Arc::new(storage))
    }

    /// Use a fixed, shared storage adapter.
    pub fn storage_arc(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = StorageSource::Adapter(storage);
        self
    }

    /// Resolve the storage adapter through `factory` on every access.
    pub fn storage_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        self.storage = StorageSource::factory(factory);
        self
    }

    /// Handle failures caught by the engine.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(ErrorKind, &PersistError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(f);
        self
    }

    /// The storage key.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run_migrate(&self, state: Value, stored: Option<u32>) -> Result<Option<Value>> {
        match &self.migrate {
            Some(migrate) => migrate(state, stored),
            None => codec::migrate_same_version(state, stored, self.version),
        }
    }
}

impl<T> fmt::Debug for PersistOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistOptions")
            .field("name", &self.name)
            .field("debounce", &self.debounce)
            .field("version", &self.version)
            .field("skip_hydrate", &self.skip_hydrate)
            .field("custom_migrate", &self.migrate.is_some())
            .field("storage", &self.storage)
            .finish()
    }
}

/// Default error handler: log and carry on.
fn log_error(kind: ErrorKind, err: &PersistError) {
    error!(kind = %kind, error = %err, "persistence failure");
}
