use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use koinonia_core::ParishId;

/// Parish-isolated key/value store abstraction for disposable read models.
pub trait ParishStore<K, V>: Send + Sync {
    fn get(&self, parish_id: ParishId, key: &K) -> Option<V>;
    fn upsert(&self, parish_id: ParishId, key: K, value: V);
    fn list(&self, parish_id: ParishId) -> Vec<V>;
    /// Clear all read-model records for a parish (rebuild support).
    fn clear_parish(&self, parish_id: ParishId);
}

impl<K, V, S> ParishStore<K, V> for Arc<S>
where
    S: ParishStore<K, V> + ?Sized,
{
    fn get(&self, parish_id: ParishId, key: &K) -> Option<V> {
        (**self).get(parish_id, key)
    }

    fn upsert(&self, parish_id: ParishId, key: K, value: V) {
        (**self).upsert(parish_id, key, value)
    }

    fn list(&self, parish_id: ParishId) -> Vec<V> {
        (**self).list(parish_id)
    }

    fn clear_parish(&self, parish_id: ParishId) {
        (**self).clear_parish(parish_id)
    }
}

/// In-memory parish-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryParishStore<K, V> {
    inner: RwLock<HashMap<(ParishId, K), V>>,
}

impl<K, V> InMemoryParishStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryParishStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ParishStore<K, V> for InMemoryParishStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, parish_id: ParishId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(parish_id, key.clone())).cloned()
    }

    fn upsert(&self, parish_id: ParishId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((parish_id, key), value);
        }
    }

    fn list(&self, parish_id: ParishId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((p, _k), v)| if *p == parish_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_parish(&self, parish_id: ParishId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(p, _k), _v| *p != parish_id);
        }
    }
}
