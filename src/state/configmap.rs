//! `ConfigMap`-backed implementation of `StateStore`.
//!
//! One `ConfigMap`, one data key (`STATE_KEY`), holding the canonical
//! serialized map from `state::serialize`. Every mutation re-serializes the
//! whole map and writes it back via server-side apply (`Patch::Apply`).

use super::{deserialize, serialize, Entry, StateStore};
use crate::crd::CertId;
use crate::error::StdError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

pub const STATE_KEY: &str = "state";
const FIELD_MANAGER: &str = "managed-certificate-controller";

pub struct ConfigMapStateStore {
    client: Client,
    namespace: String,
    name: String,
    map: Mutex<BTreeMap<CertId, Entry>>,
}

impl ConfigMapStateStore {
    /// Loads the map from the backing `ConfigMap`, creating it empty if
    /// absent, per the persistence contract ("loss of the backing blob is
    /// treated as an empty map").
    pub async fn load(client: Client, namespace: &str, name: &str) -> Result<Self, StdError> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        let map = match api.get_opt(name).await.map_err(StdError::from)? {
            Some(cm) => {
                let blob = cm
                    .data
                    .as_ref()
                    .and_then(|d| d.get(STATE_KEY))
                    .cloned()
                    .unwrap_or_default();
                deserialize(&blob)?
            }
            None => BTreeMap::new(),
        };
        Ok(ConfigMapStateStore {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
            map: Mutex::new(map),
        })
    }

    async fn persist(&self, map: &BTreeMap<CertId, Entry>) -> Result<(), StdError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let blob = serialize(map);
        let patch = Patch::Apply(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
            },
            "data": {
                STATE_KEY: blob,
            }
        }));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        match api.patch(&self.name, &params, &patch).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                // first write: the ConfigMap doesn't exist yet and apply
                // against a nonexistent object can race with the informer
                // cache, so fall back to an explicit create.
                let cm = ConfigMap {
                    metadata: kube::api::ObjectMeta {
                        name: Some(self.name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    data: Some(std::collections::BTreeMap::from([(
                        STATE_KEY.to_string(),
                        serialize(map),
                    )])),
                    ..Default::default()
                };
                api.create(&PostParams::default(), &cm)
                    .await
                    .map_err(StdError::from)?;
                Ok(())
            }
            Err(e) => Err(StdError::from(e)),
        }
    }
}

#[async_trait]
impl StateStore for ConfigMapStateStore {
    async fn get(&self, id: &CertId) -> Option<Entry> {
        self.map.lock().await.get(id).cloned()
    }

    async fn set_ssl_certificate_name(&self, id: &CertId, name: &str) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        let entry = map.entry(id.clone()).or_default();
        if entry.ssl_certificate_name.is_empty() {
            entry.ssl_certificate_name = name.to_string();
        }
        self.persist(&map).await
    }

    async fn set_soft_deleted(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?;
        entry.soft_deleted = true;
        self.persist(&map).await
    }

    async fn set_excluded_from_slo(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?;
        entry.excluded_from_slo = true;
        self.persist(&map).await
    }

    async fn set_creation_reported(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StdError::StateNotFound(id.to_string()))?;
        entry.creation_reported = true;
        self.persist(&map).await
    }

    async fn delete(&self, id: &CertId) -> Result<(), StdError> {
        let mut map = self.map.lock().await;
        if map.remove(id).is_some() {
            self.persist(&map).await
        } else {
            Ok(())
        }
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
