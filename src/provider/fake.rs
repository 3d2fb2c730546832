//! In-memory `SslCertificateManager` used by this crate's own tests and as
//! the default backend when no real Provider credentials are configured.

use super::{report_create_error, CreateErrorClass, SslCertificate, SslCertificateManager};
use crate::crd::ManagedCertificate;
use crate::error::StdError;
use crate::events::{self, EventSink};
use crate::metrics::Metrics;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Controls how the fake's `create` call behaves, so reconciler tests can
/// exercise the quota/backend/success paths without a real backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateBehavior {
    Succeed,
    QuotaExceeded,
    Backend,
}

pub struct FakeSslCertificateManager {
    certs: Mutex<BTreeMap<String, SslCertificate>>,
    behavior: CreateBehavior,
    metrics: Metrics,
}

impl FakeSslCertificateManager {
    pub fn new() -> Self {
        Self::with_metrics(Metrics::new())
    }

    /// Construct with the controller's live `Metrics`, so the
    /// quota-error/backend-error counters this backend increments are the
    /// same series exposed on `/metrics`, rather than a private, unreported
    /// copy.
    pub fn with_metrics(metrics: Metrics) -> Self {
        FakeSslCertificateManager {
            certs: Mutex::new(BTreeMap::new()),
            behavior: CreateBehavior::Succeed,
            metrics,
        }
    }

    pub fn with_behavior(behavior: CreateBehavior) -> Self {
        FakeSslCertificateManager {
            certs: Mutex::new(BTreeMap::new()),
            behavior,
            metrics: Metrics::new(),
        }
    }

    /// Test/diagnostic hook: snapshot of every certificate currently held.
    pub fn snapshot(&self) -> BTreeMap<String, SslCertificate> {
        self.certs.lock().unwrap().clone()
    }

    /// Test hook: mark a certificate Active with per-domain Active status,
    /// simulating the Provider having finished provisioning.
    pub fn mark_active(&self, name: &str) {
        let mut certs = self.certs.lock().unwrap();
        if let Some(cert) = certs.get_mut(name) {
            cert.status = "ACTIVE".to_string();
            for domain in cert.domains.clone() {
                cert.domain_status.insert(domain, "ACTIVE".to_string());
            }
            cert.expire_time = Some("2026-12-31T00:00:00Z".to_string());
        }
    }
}

impl Default for FakeSslCertificateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SslCertificateManager for FakeSslCertificateManager {
    async fn create(
        &self,
        name: &str,
        domains: &[String],
        owner: &ManagedCertificate,
        events_sink: &dyn EventSink,
    ) -> Result<(), StdError> {
        match self.behavior {
            CreateBehavior::QuotaExceeded => {
                let msg = format!("quota exceeded creating {name}");
                return Err(report_create_error(
                    CreateErrorClass::QuotaExceeded(msg),
                    owner,
                    events_sink,
                    &self.metrics,
                )
                .await);
            }
            CreateBehavior::Backend => {
                let msg = format!("backend error creating {name}");
                return Err(report_create_error(
                    CreateErrorClass::Backend(msg),
                    owner,
                    events_sink,
                    &self.metrics,
                )
                .await);
            }
            CreateBehavior::Succeed => {}
        }

        let mut certs = self.certs.lock().unwrap();
        certs.insert(
            name.to_string(),
            SslCertificate {
                name: name.to_string(),
                domains: domains.to_vec(),
                status: "PROVISIONING".to_string(),
                domain_status: domains
                    .iter()
                    .map(|d| (d.clone(), "PROVISIONING".to_string()))
                    .collect(),
                expire_time: None,
            },
        );
        drop(certs);

        events::publish_normal(
            events_sink,
            events::REASON_CREATE,
            &format!("created SslCertificate {name} for {}", owner.name_any()),
        )
        .await;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StdError> {
        self.certs.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, StdError> {
        Ok(self.certs.lock().unwrap().contains_key(name))
    }

    async fn get(&self, name: &str) -> Result<SslCertificate, StdError> {
        self.certs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StdError::StateNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn create_then_exists_then_get_round_trips() {
        let fake = FakeSslCertificateManager::new();
        let owner = fixtures::managed_certificate("default", "ex", &["a.example.com"]);
        let sink = events::CapturingEventSink::new();

        assert!(!fake.exists("mcrt-x").await.unwrap());
        fake.create("mcrt-x", &["a.example.com".to_string()], &owner, &sink)
            .await
            .unwrap();
        assert!(fake.exists("mcrt-x").await.unwrap());

        let cert = fake.get("mcrt-x").await.unwrap();
        assert_eq!(cert.domains, vec!["a.example.com".to_string()]);
        assert_eq!(cert.status, "PROVISIONING");
    }

    #[tokio::test]
    async fn delete_of_absent_certificate_is_success() {
        let fake = FakeSslCertificateManager::new();
        fake.delete("mcrt-never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn quota_behavior_surfaces_quota_exceeded() {
        let fake = FakeSslCertificateManager::with_behavior(CreateBehavior::QuotaExceeded);
        let owner = fixtures::managed_certificate("default", "ex", &["a.example.com"]);
        let sink = events::CapturingEventSink::new();
        let err = fake
            .create("mcrt-x", &["a.example.com".to_string()], &owner, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, StdError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn mark_active_updates_status_and_domain_statuses() {
        let fake = FakeSslCertificateManager::new();
        let owner = fixtures::managed_certificate("default", "ex", &["a.example.com"]);
        let sink = events::CapturingEventSink::new();
        fake.create("mcrt-x", &["a.example.com".to_string()], &owner, &sink)
            .await
            .unwrap();
        fake.mark_active("mcrt-x");
        let cert = fake.get("mcrt-x").await.unwrap();
        assert_eq!(cert.status, "ACTIVE");
        assert_eq!(cert.domain_status.get("a.example.com").unwrap(), "ACTIVE");
    }
}
