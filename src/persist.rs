//! Persistence engine - keeps a [`Store`] in sync with a storage adapter.
//!
//! Two flows:
//!
//! - **Writes**: every store mutation (re)arms a debounce timer; when the
//!   store has been quiet for `debounce`, the store's current value is read,
//!   and `{state: partial(value), version}` is serialized and written. A
//!   newer mutation cancels the pending timer.
//! - **Hydration**: one storage read, then deserialize, migrate, merge with
//!   the initial state and `set` on the store. Completion (re)installs the
//!   change subscription that drives the write flow.
//!
//! Failures never escape the public operations. Each is caught at its origin
//! and reported through `on_error` with an [`ErrorKind`]:
//!
//! | stage                               | kind          |
//! |-------------------------------------|---------------|
//! | storage read during hydration       | `storage`     |
//! | deserialize / migrate / merge       | `migration`   |
//! | debounced or flushed write          | `persistence` |
//! | `clear`                             | `clear`       |
//!
//! Panics raised by store listeners are not caught.

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::{self, Envelope};
use crate::error::{ErrorKind, PersistError, Result};
use crate::options::{PersistOptions, PersistState};
use crate::storage::{validate_key, Storage, StorageOp};
use crate::store::{Store, Subscription};
use crate::watch::{PersistEvent, WatchSender, WatchStream};

type SharedHydration = Shared<BoxFuture<'static, ()>>;

/// Result of starting a hydration.
///
/// `Ready` when storage answered synchronously and the store is already
/// hydrated. `Pending` wraps a shared handle: every caller that asks while the
/// read is in flight gets a clone of the same handle. Awaiting either variant
/// waits for hydration to finish.
#[derive(Clone)]
pub enum Hydration {
    /// Hydration finished inline.
    Ready,
    /// Hydration is waiting on storage.
    Pending(SharedHydration),
}

impl Hydration {
    /// Returns true if this hydration had to wait on storage.
    pub fn is_pending(&self) -> bool {
        matches!(self, Hydration::Pending(_))
    }

    /// Returns true if the underlying work has completed.
    pub fn is_complete(&self) -> bool {
        match self {
            Hydration::Ready => true,
            Hydration::Pending(shared) => shared.peek().is_some(),
        }
    }

    /// Returns true if both handles refer to the same pending hydration.
    pub fn same_as(&self, other: &Hydration) -> bool {
        match (self, other) {
            (Hydration::Pending(a), Hydration::Pending(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Future for Hydration {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match &mut *self {
            Hydration::Ready => Poll::Ready(()),
            Hydration::Pending(shared) => shared.poll_unpin(cx),
        }
    }
}

impl fmt::Debug for Hydration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hydration::Ready => f.write_str("Hydration::Ready"),
            Hydration::Pending(shared) => f
                .debug_struct("Hydration::Pending")
                .field("complete", &shared.peek().is_some())
                .finish(),
        }
    }
}

struct PendingWrite {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner<T> {
    store: Store<T>,
    options: PersistOptions<T>,
    timer: Mutex<Option<PendingWrite>>,
    next_timer_id: AtomicU64,
    subscription: Mutex<Option<Subscription<T>>>,
    hydration: Mutex<Option<SharedHydration>>,
    hydrate_triggered: AtomicBool,
    has_hydrated: AtomicBool,
    disposed: AtomicBool,
    events: WatchSender,
}

/// A store wrapped with debounced, versioned persistence.
///
/// Cloning yields another handle to the same engine.
pub struct Persist<T> {
    inner: Arc<Inner<T>>,
}

impl<T: PersistState> Persist<T> {
    /// Wrap `store` with persistence configured by `options`.
    ///
    /// Nothing is read or subscribed yet: hydration starts on the first
    /// [`get`](Persist::get) (unless `skip_hydrate`) or an explicit
    /// [`hydrate`](Persist::hydrate).
    pub fn new(store: Store<T>, options: PersistOptions<T>) -> Result<Self> {
        validate_key(&options.name)?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                options,
                timer: Mutex::new(None),
                next_timer_id: AtomicU64::new(0),
                subscription: Mutex::new(None),
                hydration: Mutex::new(None),
                hydrate_triggered: AtomicBool::new(false),
                has_hydrated: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                events: WatchSender::default(),
            }),
        })
    }

    /// Create a store from `initial` and wrap it.
    pub fn with_initial(initial: T, options: PersistOptions<T>) -> Result<Self> {
        Self::new(Store::new(initial), options)
    }

    /// Current value. The first call triggers hydration unless
    /// `skip_hydrate` is set or a hydration was already started.
    pub fn get(&self) -> T {
        if !self.inner.options.skip_hydrate
            && !self.inner.hydrate_triggered.swap(true, Ordering::SeqCst)
        {
            debug!(key = %self.inner.options.name, "first access, hydrating");
            // Fire and forget: a pending read was spawned on the runtime
            let _ = Inner::hydrate(&self.inner);
        }
        self.inner.store.get()
    }

    /// Value captured when the store was created.
    pub fn get_initial(&self) -> T {
        self.inner.store.get_initial()
    }

    /// Replace the store value.
    pub fn set(&self, next: T) {
        self.inner.store.set(next);
    }

    /// Compute and replace the store value.
    pub fn set_with<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        self.inner.store.set_with(f);
    }

    /// Subscribe to the wrapped store.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(listener)
    }

    /// The wrapped store.
    pub fn store(&self) -> &Store<T> {
        &self.inner.store
    }

    /// The storage key.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// The schema version written with every envelope.
    pub fn version(&self) -> u32 {
        self.inner.options.version
    }

    /// Returns true once any hydration attempt has finished.
    pub fn has_hydrated(&self) -> bool {
        self.inner.has_hydrated.load(Ordering::SeqCst)
    }

    /// Stream of lifecycle events for this engine.
    pub fn watch(&self) -> WatchStream {
        self.inner.events.subscribe()
    }

    /// Read persisted state into the store.
    ///
    /// While a previous hydration is still waiting on storage, returns that
    /// same handle without reading again.
    pub fn hydrate(&self) -> Hydration {
        self.inner.hydrate_triggered.store(true, Ordering::SeqCst);
        Inner::hydrate(&self.inner)
    }

    /// Drop any memoized hydration and read storage again.
    pub fn force_hydrate(&self) -> Hydration {
        self.inner.hydration.lock().take();
        self.hydrate()
    }

    /// The memoized pending hydration, if the last hydration needed one.
    pub fn wait_for_persistence(&self) -> Option<Hydration> {
        self.inner
            .hydration
            .lock()
            .as_ref()
            .map(|shared| Hydration::Pending(shared.clone()))
    }

    /// Cancel the pending write and detach from the store. Idempotent.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.cancel_timer();
        if self.inner.subscription.lock().take().is_some() {
            debug!(key = %self.inner.options.name, "persistence disposed");
        }
    }

    /// Remove the storage entry. Failures are reported as `clear` and the
    /// returned future still completes normally.
    pub fn clear(&self) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        match self.inner.storage().remove_item(&self.inner.options.name) {
            StorageOp::Ready(result) => {
                inner.finish_clear(result);
                future::ready(()).boxed()
            }
            StorageOp::Pending(fut) => async move {
                let result = fut.await;
                inner.finish_clear(result);
            }
            .boxed(),
        }
    }

    /// Cancel the pending write and persist the current value now.
    ///
    /// The value is read when `flush` is called, not when the returned
    /// future is polled. A disposed engine writes nothing.
    pub fn flush(&self) -> BoxFuture<'static, ()> {
        self.inner.cancel_timer();
        if self.inner.disposed.load(Ordering::SeqCst) {
            debug!(key = %self.inner.options.name, "flush skipped, engine disposed");
            return future::ready(()).boxed();
        }
        let value = self.inner.store.get();
        Inner::write_state(&self.inner, &value)
    }

    /// Returns true if a debounced write is waiting to fire.
    pub fn has_pending_write(&self) -> bool {
        self.inner.timer.lock().is_some()
    }
}

impl<T> Clone for Persist<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Persist<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persist")
            .field("options", &self.inner.options)
            .field("has_hydrated", &self.inner.has_hydrated.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T: PersistState> Inner<T> {
    fn storage(&self) -> Arc<dyn Storage> {
        self.options.storage.resolve()
    }

    fn report(&self, kind: ErrorKind, err: &PersistError) {
        (self.options.on_error)(kind, err);
        self.events.send(PersistEvent::failed(&self.options.name, kind));
    }

    fn hydrate(this: &Arc<Self>) -> Hydration {
        let mut memo = this.hydration.lock();
        if let Some(pending) = memo.as_ref() {
            if pending.peek().is_none() {
                return Hydration::Pending(pending.clone());
            }
        }

        match this.storage().get_item(&this.options.name) {
            StorageOp::Ready(result) => {
                *memo = None;
                drop(memo);
                this.complete_hydration(result);
                Hydration::Ready
            }
            StorageOp::Pending(read) => {
                let inner = Arc::clone(this);
                let shared = async move {
                    let result = read.await;
                    inner.complete_hydration(result);
                }
                .boxed()
                .shared();

                *memo = Some(shared.clone());
                drop(memo);

                // Drive the read even if nobody awaits it
                match Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(shared.clone());
                    }
                    Err(_) => {
                        debug!(key = %this.options.name, "no runtime, hydration runs when awaited")
                    }
                }
                Hydration::Pending(shared)
            }
        }
    }

    fn complete_hydration(self: &Arc<Self>, read: Result<Option<String>>) {
        // Applying the persisted value must not schedule a write of it
        self.subscription.lock().take();

        match read {
            Ok(Some(raw)) => {
                if let Err(err) = self.apply_persisted(&raw) {
                    self.report(ErrorKind::Migration, &err);
                }
            }
            Ok(None) => debug!(key = %self.options.name, "nothing persisted"),
            Err(err) => self.report(ErrorKind::Storage, &err),
        }

        // Installed even after a failed read so later changes still persist
        self.install_subscription();
        self.has_hydrated.store(true, Ordering::SeqCst);
        self.events.send(PersistEvent::hydrated(&self.options.name));
    }

    fn apply_persisted(&self, raw: &str) -> Result<()> {
        let Envelope { state, version } = (self.options.deserialize)(raw)?;
        let migrated = self.options.run_migrate(state, version)?;
        if codec::is_veto(&migrated) {
            debug!(
                key = %self.options.name,
                stored_version = ?version,
                version = self.options.version,
                "persisted state discarded by migration"
            );
            return Ok(());
        }

        if let Some(persisted) = migrated {
            let merged = (self.options.merge)(self.store.get_initial(), persisted)?;
            self.store.set(merged);
            debug!(key = %self.options.name, "store hydrated");
        }
        Ok(())
    }

    fn install_subscription(self: &Arc<Self>) {
        let mut slot = self.subscription.lock();
        slot.take();

        let weak: Weak<Self> = Arc::downgrade(self);
        *slot = Some(self.store.subscribe(move |_: &T| {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_write();
            }
        }));
        self.disposed.store(false, Ordering::SeqCst);
    }

    fn schedule_write(self: &Arc<Self>) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(key = %self.options.name, "no runtime for debounce timer, writing immediately");
                self.cancel_timer();
                let value = self.store.get();
                // Only synchronous adapters complete without a runtime
                if Inner::write_state(self, &value).now_or_never().is_none() {
                    let err = PersistError::Storage(
                        "asynchronous write needs a tokio runtime".to_string(),
                    );
                    self.report(ErrorKind::Persistence, &err);
                }
                return;
            }
        };

        let id = self.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + self.options.debounce;
        let weak = Arc::downgrade(self);

        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.handle.abort();
            debug!(key = %self.options.name, "debounce reset");
        }

        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                // Superseded or cancelled while the sleep was finishing
                let mut timer = inner.timer.lock();
                if timer.as_ref().map(|pending| pending.id) != Some(id) {
                    return;
                }
                timer.take();
            }
            let value = inner.store.get();
            Inner::write_state(&inner, &value).await;
        });

        *timer = Some(PendingWrite { id, handle });
    }

    fn cancel_timer(&self) {
        if let Some(pending) = self.timer.lock().take() {
            pending.handle.abort();
        }
    }

    fn encode(&self, value: &T) -> Result<String> {
        let state = (self.options.partial)(value)?;
        (self.options.serialize)(&Envelope::new(state, self.options.version))
    }

    fn write_state(this: &Arc<Self>, value: &T) -> BoxFuture<'static, ()> {
        let payload = match this.encode(value) {
            Ok(payload) => payload,
            Err(err) => {
                this.report(ErrorKind::Persistence, &err);
                return future::ready(()).boxed();
            }
        };

        match this.storage().set_item(&this.options.name, payload) {
            StorageOp::Ready(result) => {
                this.finish_write(result);
                future::ready(()).boxed()
            }
            StorageOp::Pending(write) => {
                let inner = Arc::clone(this);
                async move {
                    let result = write.await;
                    inner.finish_write(result);
                }
                .boxed()
            }
        }
    }

    fn finish_write(&self, result: Result<()>) {
        match result {
            Ok(()) => {
                debug!(key = %self.options.name, "state persisted");
                self.events.send(PersistEvent::written(&self.options.name));
            }
            Err(err) => self.report(ErrorKind::Persistence, &err),
        }
    }

    fn finish_clear(&self, result: Result<()>) {
        match result {
            Ok(()) => {
                debug!(key = %self.options.name, "persisted state cleared");
                self.events.send(PersistEvent::cleared(&self.options.name));
            }
            Err(err) => self.report(ErrorKind::Clear, &err),
        }
    }
}
