//! Ingress boundary: annotation names,
//! the pure parsing/class-match helpers, and the async driver that couples
//! Ingress events to `ManagedCertificate` reconciliation.

use crate::crd::{CertId, ManagedCertificate};
use crate::error::StdError;
use crate::events::{self, EventSink};
use crate::queue::WorkQueue;
use kube::api::Api;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const ANNOTATION_MANAGED_CERTIFICATES: &str = "networking.gke.io/managed-certificates";
pub const ANNOTATION_PRE_SHARED_CERT: &str = "ingress.gcp.kubernetes.io/pre-shared-cert";

/// Parses the `managed-certificates` annotation value into a deduplicated,
/// order-preserving list of names. Whitespace around each name is trimmed;
/// empty entries (from a trailing comma or an entirely empty annotation)
/// are dropped.
pub fn parse_managed_certificate_names(raw: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for part in raw.split(',') {
        let name = part.trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Whether this Ingress belongs to this controller: an empty class
/// (neither annotation nor `spec.ingressClassName` set) or a class of
/// exactly `"gce"` is ours; anything else is some other Ingress
/// controller's concern.
pub fn is_our_ingress_class(class_annotation: Option<&str>, spec_class_name: Option<&str>) -> bool {
    let class = class_annotation.or(spec_class_name);
    match class {
        None => true,
        Some(c) if c.is_empty() || c == "gce" => true,
        Some(_) => false,
    }
}

pub const ANNOTATION_INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

/// The Ingress reconciler. Couples Ingress events to
/// `ManagedCertificate` reconciliation: every referenced name gets its
/// `ManagedCertificate` key enqueued, and a reference to a name with no
/// matching `ManagedCertificate` raises `MissingCertificate`.
pub async fn reconcile_ingress(
    namespace: &str,
    name: &str,
    ingress_api: &Api<k8s_openapi::api::networking::v1::Ingress>,
    mc_api: &Api<ManagedCertificate>,
    mc_queue: &Arc<WorkQueue<String>>,
    events_sink: &dyn EventSink,
) -> Result<(), StdError> {
    let ingress = match ingress_api.get_opt(name).await? {
        Some(ing) => ing,
        None => return Ok(()),
    };

    let class_annotation = ingress
        .annotations()
        .get(ANNOTATION_INGRESS_CLASS)
        .map(String::as_str);
    let spec_class_name = ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref());
    if !is_our_ingress_class(class_annotation, spec_class_name) {
        return Ok(());
    }

    let raw = ingress
        .annotations()
        .get(ANNOTATION_MANAGED_CERTIFICATES)
        .cloned()
        .unwrap_or_default();
    let names = parse_managed_certificate_names(&raw);

    for cert_name in &names {
        if mc_api.get_opt(cert_name).await?.is_none() {
            events::publish_warning(
                events_sink,
                events::REASON_MISSING_CERTIFICATE,
                &format!("ManagedCertificate {cert_name} referenced by Ingress {namespace}/{name} does not exist"),
            )
            .await;
            continue;
        }
        let id = CertId::new(namespace, cert_name.as_str());
        mc_queue.add(id.queue_key()).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dedupes_trims_and_drops_empty_entries() {
        let names = parse_managed_certificate_names(" ex1, ex2 ,ex1,,ex3");
        assert_eq!(names, vec!["ex1", "ex2", "ex3"]);
    }

    #[test]
    fn parse_of_empty_annotation_is_empty_list() {
        assert!(parse_managed_certificate_names("").is_empty());
        assert!(parse_managed_certificate_names("   ").is_empty());
    }

    #[test]
    fn our_ingress_class_accepts_empty_and_gce() {
        assert!(is_our_ingress_class(None, None));
        assert!(is_our_ingress_class(Some(""), None));
        assert!(is_our_ingress_class(Some("gce"), None));
        assert!(is_our_ingress_class(None, Some("gce")));
    }

    #[test]
    fn our_ingress_class_rejects_other_classes() {
        assert!(!is_our_ingress_class(Some("nginx"), None));
        assert!(!is_our_ingress_class(None, Some("nginx")));
    }

    #[test]
    fn annotation_class_takes_precedence_over_spec_class_name() {
        assert!(!is_our_ingress_class(Some("nginx"), Some("gce")));
    }
}
