//! In-memory `StateStore`, used by this crate's tests and as the backend
//! for the `crdgen`-adjacent dry-run mode (no `ConfigMap` wiring needed).

use super::{Entry, StateStore};
use crate::crd::CertId;
use crate::error::StdError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStateStore {
    map: Mutex<BTreeMap<CertId, Entry>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, id: &CertId) -> Option<Entry> {
        self.map.lock().await.get(id).cloned()
    }

    async fn set_ssl_certificate_name(&self, id: &CertId, name: &str) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        let entry = map.entry(id.clone()).or_default();
        if entry.ssl_certificate_name.is_empty() {
            entry.ssl_certificate_name = name.to_string();
        }
        Ok(())
    }

    async fn set_soft_deleted(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        map.get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?
            .soft_deleted = true;
        Ok(())
    }

    async fn set_excluded_from_slo(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        map.get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?
            .excluded_from_slo = true;
        Ok(())
    }

    async fn set_creation_reported(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        map.get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?
            .creation_reported = true;
        Ok(())
    }

    async fn delete(&self, id: &CertId) -> Result<(), StdError> {
        self.map.lock().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Vec<(CertId, Entry)> {
        self.map
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_ssl_certificate_name_never_rewrites_once_set() {
        let store = InMemoryStateStore::new();
        let id = CertId::new("default", "ex");
        store.set_ssl_certificate_name(&id, "mcrt-first").await.unwrap();
        store.set_ssl_certificate_name(&id, "mcrt-second").await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().ssl_certificate_name, "mcrt-first");
    }

    #[tokio::test]
    async fn field_updates_on_missing_entry_return_not_found() {
        let store = InMemoryStateStore::new();
        let id = CertId::new("default", "ghost");
        let err = store.set_soft_deleted(&id).await.unwrap_err();
        assert!(matches!(err, StdError::StateNotFound(_)));
    }

    #[tokio::test]
    async fn delete_of_absent_entry_is_a_no_op() {
        let store = InMemoryStateStore::new();
        let id = CertId::new("default", "ghost");
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn list_reflects_all_mutations() {
        let store = InMemoryStateStore::new();
        let a = CertId::new("default", "a");
        let b = CertId::new("default", "b");
        store.set_ssl_certificate_name(&a, "mcrt-a").await.unwrap();
        store.set_ssl_certificate_name(&b, "mcrt-b").await.unwrap();
        store.delete(&a).await.unwrap();
        let listed = store.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, b);
    }
}
