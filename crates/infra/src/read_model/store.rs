use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use proofing_events::ProjectionError;

/// Key/value store abstraction for disposable read models.
///
/// Written only by the owning projection; read directly by queries.
pub trait ReadModelStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>, ProjectionError>;

    fn upsert(&self, key: K, value: V) -> Result<(), ProjectionError>;

    /// Returns whether a record was removed.
    fn remove(&self, key: &K) -> Result<bool, ProjectionError>;

    fn list(&self) -> Result<Vec<V>, ProjectionError>;

    /// Remove every record (rebuild support).
    fn clear(&self) -> Result<(), ProjectionError>;
}

impl<K, V, S> ReadModelStore<K, V> for Arc<S>
where
    S: ReadModelStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Result<Option<V>, ProjectionError> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ProjectionError> {
        (**self).upsert(key, value)
    }

    fn remove(&self, key: &K) -> Result<bool, ProjectionError> {
        (**self).remove(key)
    }

    fn list(&self) -> Result<Vec<V>, ProjectionError> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), ProjectionError> {
        (**self).clear()
    }
}

/// In-memory ordered store for tests/dev. `list` is ordered by key.
#[derive(Debug)]
pub struct InMemoryReadModelStore<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> InMemoryReadModelStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadModelStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ProjectionError {
    ProjectionError::store("read model lock poisoned")
}

impl<K, V> ReadModelStore<K, V> for InMemoryReadModelStore<K, V>
where
    K: Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>, ProjectionError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ProjectionError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(key, value);
        Ok(())
    }

    fn remove(&self, key: &K) -> Result<bool, ProjectionError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        Ok(map.remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<V>, ProjectionError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }

    fn clear(&self) -> Result<(), ProjectionError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.clear();
        Ok(())
    }
}
