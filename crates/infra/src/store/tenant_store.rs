use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use boxprice_core::TenantId;

/// Tenant-isolated key/value store.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }
}

/// In-memory tenant-isolated store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Write-once insert. Returns `false` (and keeps the old value) if the key exists.
    pub fn insert_new(&self, tenant_id: TenantId, key: K, value: V) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        match map.entry((tenant_id, key)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Entries of one tenant matching `predicate`.
    pub fn filter(&self, tenant_id: TenantId, predicate: impl Fn(&K, &V) -> bool) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.iter()
            .filter(|((t, k), v)| *t == tenant_id && predicate(k, v))
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        self.filter(tenant_id, |_, _| true)
    }
}

/// Append-only, tenant-partitioned log (observations, forecasts).
#[derive(Debug)]
pub struct TenantLog<V> {
    inner: RwLock<HashMap<TenantId, Vec<V>>>,
}

impl<V> Default for TenantLog<V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TenantLog<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, tenant_id: TenantId, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(tenant_id).or_default().push(value);
        }
    }

    /// Entries of one tenant matching `predicate`, in append order.
    pub fn filter(&self, tenant_id: TenantId, predicate: impl Fn(&V) -> bool) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.get(&tenant_id)
            .map(|entries| entries.iter().filter(|v| predicate(v)).cloned().collect())
            .unwrap_or_default()
    }
}
