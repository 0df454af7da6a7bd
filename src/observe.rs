//! Observer registration.
//!
//! An [`Observable`] holds a list of observers, either strongly (the
//! observable keeps them alive) or weakly. Registering returns a
//! [`Registration`] token; dropping the token unregisters the observer.

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

enum Entry<T: ?Sized> {
    Strong(Arc<T>),
    Weak(Weak<T>),
}

impl<T: ?Sized> Entry<T> {
    fn get(&self) -> Option<Arc<T>> {
        match self {
            Entry::Strong(observer) => Some(Arc::clone(observer)),
            Entry::Weak(observer) => observer.upgrade(),
        }
    }
}

struct Registry<T: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Entry<T>)>,
}

/// A list of observers of type `T` (typically a `dyn Trait`).
pub struct Observable<T: ?Sized> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> Observable<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register an observer, keeping it alive until the token is dropped.
    pub fn register(&self, observer: Arc<T>) -> Registration {
        self.insert(Entry::Strong(observer))
    }

    /// Register an observer without keeping it alive.
    pub fn register_weak(&self, observer: Weak<T>) -> Registration {
        self.insert(Entry::Weak(observer))
    }

    /// Snapshot of the live observers, in registration order.
    ///
    /// Weak observers that have gone away are pruned.
    pub fn observers(&self) -> Vec<Arc<T>> {
        let mut registry = self.registry.lock();
        let mut live = Vec::with_capacity(registry.entries.len());
        registry.entries.retain(|(_, entry)| match entry.get() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }

    /// Number of registered observers, including dead weak ones not yet pruned.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, entry: Entry<T>) -> Registration {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, entry));
            id
        };

        let registry = Arc::downgrade(&self.registry);
        Registration::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Token for a registered observer. Dropping it unregisters.
///
/// A registration can also keep other resources alive for as long as the
/// observer stays registered (for instance the task queue of a load the
/// observer is waiting for).
#[must_use = "dropping a Registration unregisters the observer"]
pub struct Registration {
    unregister: Option<Box<dyn FnOnce() + Send>>,
    attached: Vec<Box<dyn Any + Send>>,
}

impl Registration {
    fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
            attached: Vec::new(),
        }
    }

    /// Tie the lifetime of `resource` to this registration.
    pub fn attach<R: Any + Send>(&mut self, resource: R) {
        self.attached.push(Box::new(resource));
    }

    /// Combine several registrations into one token.
    pub fn merge(registrations: Vec<Registration>) -> Self {
        let mut merged = Self {
            unregister: None,
            attached: Vec::new(),
        };
        for registration in registrations {
            merged.attach(registration);
        }
        merged
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("attached", &self.attached.len())
            .finish()
    }
}
