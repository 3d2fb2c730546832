//! C3: Provider SSL manager.
//!
//! The real GCE Compute API client is an external collaborator that is out
//! of scope here: this module defines the narrow trait the reconciler
//! consumes, the wire-shaped `SslCertificate` type, and
//! the error classification every concrete implementation must perform. A
//! production binary plugs in a `SslCertificateManager` that talks to the
//! real Provider; this crate ships the in-memory `fake` implementation used
//! by its own tests and suitable for running the controller against no
//! backend at all (dry-run / local development).

pub mod fake;

use crate::crd::ManagedCertificate;
use crate::error::StdError;
use crate::events::{self, EventSink};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Provider-side managed TLS certificate resource, as it appears on the
/// wire. `domain_status` is a map because the Provider returns it as such;
/// callers needing the sorted `Vec<DomainStatus>` form go through
/// `status::translate_domain_statuses`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslCertificate {
    pub name: String,
    pub domains: Vec<String>,
    pub status: String,
    pub domain_status: BTreeMap<String, String>,
    pub expire_time: Option<String>,
}

pub const TYPE_MANAGED: &str = "MANAGED";
pub const NAME_PREFIX: &str = "mcrt-";

/// The narrow interface the reconciler (C6) consumes. Implementations must
/// classify errors per the taxonomy documented on each method; the
/// reconciler relies on `StdError`'s variant to decide retry behavior
/// (`StdError::is_retriable`).
#[async_trait]
pub trait SslCertificateManager: Send + Sync {
    /// Creates a `MANAGED` SslCertificate with the given name and domain
    /// set. On success, emits a `Create` Normal event on `owner`.
    ///
    /// Errors are classified as `QuotaExceeded` (API reason
    /// `quotaExceeded`; a `TooManyCertificates` Warning event is emitted and
    /// the quota-error metric incremented), `BackendTransient` (other
    /// 5xx/transient; a `BackendError` Warning event is emitted and the
    /// backend-error metric incremented), or passed through unclassified.
    async fn create(
        &self,
        name: &str,
        domains: &[String],
        owner: &ManagedCertificate,
        events: &dyn EventSink,
    ) -> Result<(), StdError>;

    /// Deletes the named SslCertificate. A 404-equivalent is mapped to
    /// `Ok(())` by implementations: deletion of an already-absent resource
    /// is success, not an error, so callers never need to special-case
    /// NotFound themselves.
    async fn delete(&self, name: &str) -> Result<(), StdError>;

    /// Whether a SslCertificate with this name currently exists.
    async fn exists(&self, name: &str) -> Result<bool, StdError>;

    /// Fetches the current state of the named SslCertificate.
    async fn get(&self, name: &str) -> Result<SslCertificate, StdError>;
}

/// Shared helper for concrete `SslCertificateManager` implementations:
/// applies the error-classification/event/metric side effects documented on
/// `SslCertificateManager::create`, given a raw classification already
/// extracted from the backend's wire error. Kept here (rather than
/// duplicated per-implementation) so every Provider backend reports
/// consistently.
pub async fn report_create_error(
    classification: CreateErrorClass,
    _owner: &ManagedCertificate,
    events_sink: &dyn EventSink,
    metrics: &crate::metrics::Metrics,
) -> StdError {
    match classification {
        CreateErrorClass::QuotaExceeded(msg) => {
            metrics.quota_errors.inc();
            events::publish_warning(events_sink, events::REASON_TOO_MANY_CERTIFICATES, &msg).await;
            StdError::QuotaExceeded(msg)
        }
        CreateErrorClass::Backend(msg) => {
            metrics.backend_errors.inc();
            events::publish_warning(events_sink, events::REASON_BACKEND_ERROR, &msg).await;
            StdError::BackendTransient(msg)
        }
        CreateErrorClass::Other(msg) => StdError::BackendTransient(msg),
    }
}

pub enum CreateErrorClass {
    QuotaExceeded(String),
    Backend(String),
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_certificate_equality_is_structural() {
        let a = SslCertificate {
            name: "mcrt-a".into(),
            domains: vec!["a.example.com".into()],
            status: "ACTIVE".into(),
            domain_status: BTreeMap::new(),
            expire_time: None,
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
