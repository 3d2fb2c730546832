//! `ManagedCertificate` type definitions.
//!
//! Schema validation (domain syntax, array bounds) is the CRD's job, enforced
//! by the API server via the `schemars`-derived OpenAPI schema below; this
//! crate treats a `ManagedCertificate` it receives as already valid and never
//! re-validates `spec.domains`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const GROUP: &str = "networking.gke.io";
pub const VERSION: &str = "v1";
pub const SHORTNAME: &str = "mcrt";

/// `(namespace, name)` pair identifying a `ManagedCertificate` within the
/// cluster. Serializes as `"<namespace>:<name>"` for the persistent state map
/// (`state::Entry`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CertId {
    pub namespace: String,
    pub name: String,
}

impl CertId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        CertId {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The queue key form, `"namespace/name"`, used by `queue::WorkQueue`.
    pub fn queue_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn from_queue_key(key: &str) -> Option<Self> {
        let (namespace, name) = key.split_once('/')?;
        Some(CertId::new(namespace, name))
    }
}

impl fmt::Display for CertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for CertId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed CertID {s:?}, expected \"namespace:name\""))?;
        Ok(CertId::new(namespace, name))
    }
}

/// Generate the Kubernetes wrapper struct `ManagedCertificate` from our Spec
/// and Status types. This provides a hook for generating the CRD yaml (in
/// `crdgen.rs`).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "ManagedCertificate",
    group = "networking.gke.io",
    version = "v1",
    namespaced,
    shortname = "mcrt",
    status = "ManagedCertificateStatus"
)]
pub struct ManagedCertificateSpec {
    /// Non-wildcard DNS names, 1..100 entries, each ≤63 chars. Validated by
    /// the CRD schema, not by this controller.
    pub domains: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct ManagedCertificateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_status: Option<String>,
    #[serde(default)]
    pub domain_status: Vec<DomainStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
pub struct DomainStatus {
    pub domain: String,
    pub status: String,
}

pub const CERTIFICATE_STATUS_PROVISIONING: &str = "Provisioning";
pub const CERTIFICATE_STATUS_ACTIVE: &str = "Active";
pub const CERTIFICATE_STATUS_PROVISIONING_FAILED: &str = "ProvisioningFailed";
pub const CERTIFICATE_STATUS_PROVISIONING_FAILED_PERMANENTLY: &str =
    "ProvisioningFailedPermanently";
pub const CERTIFICATE_STATUS_RENEWAL_FAILED: &str = "RenewalFailed";

pub const DOMAIN_STATUS_PROVISIONING: &str = "Provisioning";
pub const DOMAIN_STATUS_ACTIVE: &str = "Active";
pub const DOMAIN_STATUS_FAILED_NOT_VISIBLE: &str = "FailedNotVisible";
pub const DOMAIN_STATUS_FAILED_CAA_CHECKING: &str = "FailedCaaChecking";
pub const DOMAIN_STATUS_FAILED_CAA_FORBIDDEN: &str = "FailedCaaForbidden";
pub const DOMAIN_STATUS_FAILED_RATE_LIMITED: &str = "FailedRateLimited";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_id_round_trips_through_its_string_form() {
        let id = CertId::new("default", "ex");
        let s = id.to_string();
        assert_eq!(s, "default:ex");
        let parsed: CertId = s.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn cert_id_queue_key_uses_slash_separator() {
        let id = CertId::new("default", "ex");
        assert_eq!(id.queue_key(), "default/ex");
        assert_eq!(CertId::from_queue_key("default/ex"), Some(id));
    }

    #[test]
    fn cert_id_from_str_rejects_missing_separator() {
        assert!("no-colon-here".parse::<CertId>().is_err());
    }
}
