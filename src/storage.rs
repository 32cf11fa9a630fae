//! Storage adapters - the key-value backends persisted state is written to.
//!
//! An adapter may answer synchronously ([`StorageOp::Ready`]) or hand back a
//! future ([`StorageOp::Pending`]). The persistence engine keeps that
//! distinction visible: a synchronous read hydrates inline, an asynchronous
//! one yields a pending [`Hydration`](crate::persist::Hydration).
//!
//! Backends that are naturally async implement [`AsyncStorage`] and are
//! wrapped with [`AsyncAdapter`].

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::error::{PersistError, Result};

/// Maximum storage key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Outcome of a storage call: already settled, or still in flight.
pub enum StorageOp<T> {
    /// The adapter answered synchronously.
    Ready(Result<T>),
    /// The adapter answered with a future.
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T> StorageOp<T> {
    /// Returns true if the operation has not settled yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, StorageOp::Pending(_))
    }

    /// Wait for the operation regardless of how it was answered.
    pub async fn settle(self) -> Result<T> {
        match self {
            StorageOp::Ready(result) => result,
            StorageOp::Pending(fut) => fut.await,
        }
    }
}

impl<T> fmt::Debug for StorageOp<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOp::Ready(_) => f.write_str("StorageOp::Ready"),
            StorageOp::Pending(_) => f.write_str("StorageOp::Pending"),
        }
    }
}

/// Validate that a storage key is well-formed.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PersistError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(PersistError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// The key-value contract consumed by the persistence engine.
///
/// Values are opaque strings produced by the configured serializer.
pub trait Storage: Send + Sync {
    /// Read an entry. `None` when the key is absent.
    fn get_item(&self, key: &str) -> StorageOp<Option<String>>;

    /// Write an entry, replacing any previous value.
    fn set_item(&self, key: &str, value: String) -> StorageOp<()>;

    /// Remove an entry. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> StorageOp<()>;
}

/// Async flavour of [`Storage`] for backends that always suspend.
#[async_trait]
pub trait AsyncStorage: Send + Sync + 'static {
    /// Read an entry. `None` when the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write an entry, replacing any previous value.
    async fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// Remove an entry.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// Exposes an [`AsyncStorage`] backend through the [`Storage`] contract.
pub struct AsyncAdapter<S> {
    backend: Arc<S>,
}

impl<S: AsyncStorage> AsyncAdapter<S> {
    /// Wrap an async backend.
    pub fn new(backend: S) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Wrap an async backend that is already shared.
    pub fn from_arc(backend: Arc<S>) -> Self {
        Self { backend }
    }

    /// Get the wrapped backend.
    pub fn backend(&self) -> &Arc<S> {
        &self.backend
    }
}

impl<S> Clone for AsyncAdapter<S> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<S: AsyncStorage> Storage for AsyncAdapter<S> {
    fn get_item(&self, key: &str) -> StorageOp<Option<String>> {
        let backend = Arc::clone(&self.backend);
        let key = key.to_string();
        StorageOp::Pending(Box::pin(async move { backend.get_item(&key).await }))
    }

    fn set_item(&self, key: &str, value: String) -> StorageOp<()> {
        let backend = Arc::clone(&self.backend);
        let key = key.to_string();
        StorageOp::Pending(Box::pin(async move { backend.set_item(&key, value).await }))
    }

    fn remove_item(&self, key: &str) -> StorageOp<()> {
        let backend = Arc::clone(&self.backend);
        let key = key.to_string();
        StorageOp::Pending(Box::pin(async move { backend.remove_item(&key).await }))
    }
}

/// Fallback adapter used when a storage factory cannot produce a backend.
///
/// Reads are always empty and writes are discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

impl Storage for NoopStorage {
    fn get_item(&self, _key: &str) -> StorageOp<Option<String>> {
        StorageOp::Ready(Ok(None))
    }

    fn set_item(&self, _key: &str, _value: String) -> StorageOp<()> {
        StorageOp::Ready(Ok(()))
    }

    fn remove_item(&self, _key: &str) -> StorageOp<()> {
        StorageOp::Ready(Ok(()))
    }
}

type StorageFactory = Arc<dyn Fn() -> Result<Arc<dyn Storage>> + Send + Sync>;

/// Where the engine gets its adapter from.
///
/// A factory is invoked anew on every storage access, so callers may swap
/// the backing store between operations.
#[derive(Clone)]
pub enum StorageSource {
    /// A fixed adapter.
    Adapter(Arc<dyn Storage>),
    /// A factory resolved lazily on each access.
    Factory(StorageFactory),
}

impl StorageSource {
    /// Create a source from a factory function.
    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Storage>> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// Resolve the adapter for one storage operation.
    ///
    /// A factory that errors or panics is replaced by [`NoopStorage`].
    pub fn resolve(&self) -> Arc<dyn Storage> {
        match self {
            StorageSource::Adapter(storage) => Arc::clone(storage),
            StorageSource::Factory(factory) => {
                match catch_unwind(AssertUnwindSafe(|| factory())) {
                    Ok(Ok(storage)) => storage,
                    Ok(Err(err)) => {
                        warn!(error = %err, "storage unavailable, falling back to no-op storage");
                        Arc::new(NoopStorage)
                    }
                    Err(_) => {
                        warn!("storage factory panicked, falling back to no-op storage");
                        Arc::new(NoopStorage)
                    }
                }
            }
        }
    }
}

impl fmt::Debug for StorageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageSource::Adapter(_) => f.write_str("StorageSource::Adapter"),
            StorageSource::Factory(_) => f.write_str("StorageSource::Factory"),
        }
    }
}

impl<S: Storage + 'static> From<Arc<S>> for StorageSource {
    fn from(storage: Arc<S>) -> Self {
        StorageSource::Adapter(storage)
    }
}
