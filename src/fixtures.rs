//! Test-only builder functions for `ManagedCertificate`/`Ingress` objects:
//! colocated test doubles instead of a shared mocking framework.

use crate::crd::{ManagedCertificate, ManagedCertificateSpec, ManagedCertificateStatus};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub fn managed_certificate(namespace: &str, name: &str, domains: &[&str]) -> ManagedCertificate {
    ManagedCertificate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ManagedCertificateSpec {
            domains: domains.iter().map(|d| d.to_string()).collect(),
        },
        status: Some(ManagedCertificateStatus::default()),
    }
}

pub fn ingress(namespace: &str, name: &str, managed_certificates: &str) -> Ingress {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        crate::ingress::ANNOTATION_MANAGED_CERTIFICATES.to_string(),
        managed_certificates.to_string(),
    );
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: None,
        status: None,
    }
}
