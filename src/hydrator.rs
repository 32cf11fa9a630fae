//! Hydrating many persisted stores at once.
//!
//! [`Hydrator`] fans `hydrate()` out over an ordered list of engines and
//! joins whatever had to wait on storage. If every engine hydrated inline the
//! result is [`Hydration::Ready`]; otherwise one pending handle that
//! completes when all pending engines have.

use futures_util::future::{join_all, FutureExt};
use std::fmt;
use std::sync::Arc;

use crate::options::PersistState;
use crate::persist::{Hydration, Persist};

/// Anything that can be hydrated.
pub trait Hydrate: Send + Sync {
    /// Start (or join) a hydration.
    fn hydrate(&self) -> Hydration;
}

impl<T: PersistState> Hydrate for Persist<T> {
    fn hydrate(&self) -> Hydration {
        Persist::hydrate(self)
    }
}

/// Hydrates a fixed set of engines together.
#[derive(Clone)]
pub struct Hydrator {
    targets: Vec<Arc<dyn Hydrate>>,
}

impl Hydrator {
    /// Create a hydrator over `targets`, hydrated in the given order.
    pub fn new(targets: impl IntoIterator<Item = Arc<dyn Hydrate>>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// Hydrate every target.
    pub fn hydrate(&self) -> Hydration {
        let pending: Vec<Hydration> = self
            .targets
            .iter()
            .map(|target| target.hydrate())
            .filter(Hydration::is_pending)
            .collect();

        if pending.is_empty() {
            return Hydration::Ready;
        }

        Hydration::Pending(join_all(pending).map(|_| ()).boxed().shared())
    }

    /// Number of engines managed.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if no engines are managed.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl Hydrate for Hydrator {
    fn hydrate(&self) -> Hydration {
        Hydrator::hydrate(self)
    }
}

impl fmt::Debug for Hydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hydrator")
            .field("targets", &self.targets.len())
            .finish()
    }
}

/// Build a callable that hydrates every engine in `targets`.
pub fn setup_hydrator(
    targets: impl IntoIterator<Item = Arc<dyn Hydrate>>,
) -> impl Fn() -> Hydration + Send + Sync + 'static {
    let hydrator = Hydrator::new(targets);
    move || hydrator.hydrate()
}
