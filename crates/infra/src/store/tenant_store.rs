use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use stockledger_core::{DomainResult, Entity, TenantId};

use crate::error::StoreError;

/// In-memory tenant-isolated row store for tests/dev.
///
/// Rows are keyed by `(tenant, Entity::id)`; listing preserves insertion order.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<Rows<K, V>>,
}

#[derive(Debug)]
struct Rows<K, V> {
    next_seq: u64,
    map: HashMap<(TenantId, K), (u64, V)>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Rows {
                next_seq: 0,
                map: HashMap::new(),
            }),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl<K, V> InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + core::fmt::Display,
    V: Entity<Id = K> + Clone,
{
    pub fn get(&self, tenant_id: TenantId, key: &K) -> Result<Option<V>, StoreError> {
        let rows = self.inner.read().map_err(|_| poisoned())?;
        Ok(rows.map.get(&(tenant_id, key.clone())).map(|(_, v)| v.clone()))
    }

    /// Insert a new row under its id, rejecting it if `conflicts` matches any
    /// row of the tenant.
    pub fn insert_unique(
        &self,
        tenant_id: TenantId,
        value: V,
        conflicts: impl Fn(&V) -> bool,
    ) -> Result<(), StoreError> {
        let key = value.id().clone();
        let mut rows = self.inner.write().map_err(|_| poisoned())?;
        if rows.map.contains_key(&(tenant_id, key.clone())) {
            return Err(StoreError::Duplicate(format!("id {key}")));
        }
        if rows
            .map
            .iter()
            .any(|((t, _), (_, v))| *t == tenant_id && conflicts(v))
        {
            return Err(StoreError::Duplicate(format!("row conflicting with {key}")));
        }
        let seq = rows.next_seq;
        rows.next_seq += 1;
        rows.map.insert((tenant_id, key), (seq, value));
        Ok(())
    }

    /// Rows of one tenant matching `filter`, in insertion order.
    pub fn list(
        &self,
        tenant_id: TenantId,
        filter: impl Fn(&V) -> bool,
    ) -> Result<Vec<V>, StoreError> {
        let rows = self.inner.read().map_err(|_| poisoned())?;
        let mut found: Vec<(u64, V)> = rows
            .map
            .iter()
            .filter(|((t, _), (_, v))| *t == tenant_id && filter(v))
            .map(|(_, (seq, v))| (*seq, v.clone()))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found.into_iter().map(|(_, v)| v).collect())
    }

    /// Modify one row under the write lock. The row is left untouched if `apply` fails.
    pub fn update(
        &self,
        tenant_id: TenantId,
        key: &K,
        apply: &mut dyn FnMut(&mut V) -> DomainResult<()>,
    ) -> Result<V, StoreError> {
        let mut rows = self.inner.write().map_err(|_| poisoned())?;
        let (_, row) = rows
            .map
            .get_mut(&(tenant_id, key.clone()))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let mut next = row.clone();
        apply(&mut next)?;
        *row = next.clone();
        Ok(next)
    }

    /// Remove a row if `allow` accepts it.
    pub fn remove_if(
        &self,
        tenant_id: TenantId,
        key: &K,
        allow: impl Fn(&V) -> Result<(), StoreError>,
    ) -> Result<V, StoreError> {
        let mut rows = self.inner.write().map_err(|_| poisoned())?;
        let map_key = (tenant_id, key.clone());
        let (_, row) = rows
            .map
            .get(&map_key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        allow(row)?;
        rows.map
            .remove(&map_key)
            .map(|(_, v)| v)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
