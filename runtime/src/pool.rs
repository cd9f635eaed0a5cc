//! Named, lazily opened connection handles.
//!
//! The pool owns at most one [`ConnectionHandle`] per configured name. The
//! first request for a name opens and authenticates the handle; later
//! requests get the cached `Arc`. Concurrent first requests for one name
//! wait on a per-name creation lock, so the database is opened once.
//! Each attach/detach starts a new generation; a handle opened under an
//! earlier generation is closed instead of cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dbstrap_core::TypeRegistry;
use dbstrap_setup::ResolvedConfig;
use dbstrap_sqlite::ConnectionHandle;
use tracing::{debug, warn};

use crate::error::{ConfigError, Error, Result, StateError};

#[derive(Clone)]
struct Attached {
    config: Arc<ResolvedConfig>,
    types: Arc<TypeRegistry>,
    generation: u64,
}

/// Cache of open connection handles keyed by connection name.
#[derive(Default)]
pub struct ConnectionPool {
    attached: RwLock<Option<Attached>>,
    handles: Mutex<HashMap<String, Arc<ConnectionHandle>>>,
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `config` the source of connection settings.
    pub fn attach(&self, config: Arc<ResolvedConfig>, types: Arc<TypeRegistry>) {
        let mut attached = self.attached.write().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *attached = Some(Attached {
            config,
            types,
            generation,
        });
    }

    /// Forgets the configuration; later [`get`](Self::get) calls fail with
    /// [`StateError::NotInitialized`].
    pub fn detach(&self) {
        let mut attached = self.attached.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *attached = None;
        lock(&self.creating).clear();
    }

    pub fn is_attached(&self) -> bool {
        self.attached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn attached(&self) -> Result<Attached> {
        self.attached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StateError::NotInitialized.into())
    }

    fn cached(&self, name: &str) -> Option<Arc<ConnectionHandle>> {
        lock(&self.handles).get(name).cloned()
    }

    fn creation_lock(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            lock(&self.creating)
                .entry(name.to_string())
                .or_default(),
        )
    }

    /// Returns the handle for `name`, opening it on first use.
    ///
    /// A failed open caches nothing, so the next call tries again.
    ///
    /// # Errors
    ///
    /// - [`StateError::NotInitialized`] when no configuration is attached
    /// - [`ConfigError::ConnectionNotFound`] for unknown names
    /// - [`Error::Connection`] when the database cannot be opened
    /// - [`StateError::NotInitialized`] when the pool is detached while the
    ///   handle is being opened
    pub fn get(&self, name: &str) -> Result<Arc<ConnectionHandle>> {
        let attached = self.attached()?;
        self.get_attached(attached, name)
    }

    fn get_attached(&self, attached: Attached, name: &str) -> Result<Arc<ConnectionHandle>> {
        if let Some(handle) = self.cached(name) {
            return Ok(handle);
        }

        let config = attached
            .config
            .connection(name)?
            .ok_or_else(|| ConfigError::ConnectionNotFound(name.to_string()))?;

        let gate = self.creation_lock(name);
        let _creating = lock(&gate);
        if let Some(handle) = self.cached(name) {
            return Ok(handle);
        }

        let handle = ConnectionHandle::open(&config, attached.types).map_err(Error::from)?;
        let handle = Arc::new(handle);

        {
            let mut handles = lock(&self.handles);
            if self.generation.load(Ordering::SeqCst) == attached.generation {
                handles.insert(name.to_string(), Arc::clone(&handle));
                debug!(connection = %name, "connection cached");
                return Ok(handle);
            }
        }

        debug!(connection = %name, "pool detached during open; closing handle");
        if let Err(err) = handle.close() {
            warn!(connection = %name, error = %err, "failed to close connection");
        }
        Err(StateError::NotInitialized.into())
    }

    /// Closes every cached handle, one at a time, and empties the pool.
    ///
    /// Keeps going past individual close failures and returns the first.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<ConnectionHandle>)> =
            lock(&self.handles).drain().collect();

        let mut first_error = None;
        for (name, handle) in drained {
            if let Err(err) = handle.close() {
                warn!(connection = %name, error = %err, "failed to close connection");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.handles).is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.handles).contains_key(name)
    }

    /// Names of the cached handles, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.handles).keys().cloned().collect();
        names.sort();
        names
    }
}
