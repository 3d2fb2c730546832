//! C7: the annotation computer.
//!
//! Periodically, and on Ingress events, recomputes the `pre-shared-cert`
//! annotation on every observed Ingress from its `managed-certificates`
//! annotation plus current state, so the platform's Ingress controller
//! only ever learns about Provider resources that already exist.

use crate::ingress::{
    is_our_ingress_class, parse_managed_certificate_names, ANNOTATION_INGRESS_CLASS,
    ANNOTATION_MANAGED_CERTIFICATES, ANNOTATION_PRE_SHARED_CERT,
};
use crate::state::StateStore;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::warn;

const FIELD_MANAGER: &str = "managed-certificate-controller";

/// Pure computation of the `pre-shared-cert` annotation value: maps each
/// referenced name to its bound Provider resource name, keeps only names
/// present in `existing_provider_names`, sorts, and joins with `", "`.
/// Returns `None` when the set is empty, leaving the caller to skip the
/// patch so an unchanged Ingress is never touched.
pub fn compute_pre_shared_cert(
    names: &[String],
    bound_names: &std::collections::HashMap<String, String>,
    existing_provider_names: &HashSet<String>,
) -> Option<String> {
    let resolved: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| bound_names.get(n))
        .filter(|provider_name| existing_provider_names.contains(provider_name.as_str()))
        .map(String::as_str)
        .collect();

    if resolved.is_empty() {
        return None;
    }
    Some(resolved.into_iter().collect::<Vec<_>>().join(", "))
}

/// Recomputes and patches the `pre-shared-cert` annotation for a single
/// Ingress, given a snapshot of bound Provider names (`CertId.name ->
/// sslCertificateName`, namespace-qualified by caller) and existing
/// Provider resources.
pub async fn recompute_one(
    ingress_api: &Api<Ingress>,
    ingress: &Ingress,
    bound_names: &std::collections::HashMap<String, String>,
    existing_provider_names: &HashSet<String>,
) -> Result<(), kube::Error> {
    let raw = ingress
        .annotations()
        .get(ANNOTATION_MANAGED_CERTIFICATES)
        .cloned()
        .unwrap_or_default();
    let names = parse_managed_certificate_names(&raw);

    let Some(value) = compute_pre_shared_cert(&names, bound_names, existing_provider_names) else {
        return Ok(());
    };

    if ingress.annotations().get(ANNOTATION_PRE_SHARED_CERT) == Some(&value) {
        return Ok(());
    }

    let patch = Patch::Merge(json!({
        "metadata": {
            "annotations": {
                ANNOTATION_PRE_SHARED_CERT: value,
            }
        }
    }));
    ingress_api
        .patch(&ingress.name_any(), &PatchParams::default(), &patch)
        .await?;
    Ok(())
}

/// Resolves every `managed-certificates` name on an Ingress in `namespace`
/// to its bound (and not soft-deleted) Provider resource name via C2.
/// Shared by the periodic sweep (`recompute_all`) and the per-event path
/// (`recompute_for_ingress`) so both compute the binding snapshot the same
/// way.
pub async fn bound_names_for(
    state: &Arc<dyn StateStore>,
    namespace: &str,
    names: &[String],
) -> std::collections::HashMap<String, String> {
    let mut bound_names = std::collections::HashMap::new();
    for name in names {
        let id = crate::crd::CertId::new(namespace, name.as_str());
        if let Some(entry) = state.get(&id).await {
            if !entry.soft_deleted && !entry.ssl_certificate_name.is_empty() {
                bound_names.insert(name.clone(), entry.ssl_certificate_name);
            }
        }
    }
    bound_names
}

/// Recomputes the `pre-shared-cert` annotation for a single, already-fetched
/// Ingress, skipping it if it isn't ours per `ingress::is_our_ingress_class`.
/// Called on every successful Ingress reconcile (`controller::run_ingress_worker`)
/// so a newly-created or newly-annotated Ingress is bound without waiting
/// for the periodic sweep.
pub async fn recompute_for_ingress(
    ingress_api: &Api<Ingress>,
    ingress: &Ingress,
    state: &Arc<dyn StateStore>,
    existing_provider_names: &HashSet<String>,
) -> Result<(), kube::Error> {
    let ns = match ingress.namespace() {
        Some(ns) => ns,
        None => return Ok(()),
    };
    let class_annotation = ingress.annotations().get(ANNOTATION_INGRESS_CLASS).map(String::as_str);
    let spec_class_name = ingress.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref());
    if !is_our_ingress_class(class_annotation, spec_class_name) {
        return Ok(());
    }

    let raw = ingress
        .annotations()
        .get(ANNOTATION_MANAGED_CERTIFICATES)
        .cloned()
        .unwrap_or_default();
    let names = parse_managed_certificate_names(&raw);
    let bound_names = bound_names_for(state, ns.as_str(), &names).await;

    recompute_one(ingress_api, ingress, &bound_names, existing_provider_names).await
}

/// One full sweep over every Ingress in `namespace` (or all namespaces
/// when `None`), consulting `state` for each referenced `CertId`'s bound
/// Provider name and `existing_provider_names` for whether that Provider
/// resource is actually ready.
pub async fn recompute_all(
    client: kube::Client,
    namespace: Option<&str>,
    state: &Arc<dyn StateStore>,
    existing_provider_names: &HashSet<String>,
) {
    let ingress_api: Api<Ingress> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let ingresses = match ingress_api.list(&Default::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "failed to list Ingresses for annotation sweep");
            return;
        }
    };

    for ingress in &ingresses {
        if let Err(e) = recompute_for_ingress(&ingress_api, ingress, state, existing_provider_names).await {
            warn!(error = %e, ingress = %ingress.name_any(), "failed to patch pre-shared-cert annotation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn computes_sorted_comma_space_joined_names_for_ready_certs() {
        let mut bound = HashMap::new();
        bound.insert("ex2".to_string(), "mcrt-bbb".to_string());
        bound.insert("ex1".to_string(), "mcrt-aaa".to_string());
        let existing: HashSet<String> = ["mcrt-aaa".to_string(), "mcrt-bbb".to_string()].into();

        let value = compute_pre_shared_cert(
            &["ex1".to_string(), "ex2".to_string()],
            &bound,
            &existing,
        );
        assert_eq!(value, Some("mcrt-aaa, mcrt-bbb".to_string()));
    }

    #[test]
    fn omits_names_whose_provider_resource_does_not_exist_yet() {
        let mut bound = HashMap::new();
        bound.insert("ex1".to_string(), "mcrt-aaa".to_string());
        bound.insert("ex2".to_string(), "mcrt-bbb".to_string());
        let existing: HashSet<String> = ["mcrt-aaa".to_string()].into();

        let value = compute_pre_shared_cert(
            &["ex1".to_string(), "ex2".to_string()],
            &bound,
            &existing,
        );
        assert_eq!(value, Some("mcrt-aaa".to_string()));
    }

    #[test]
    fn empty_resolution_yields_none_so_caller_leaves_annotation_unchanged() {
        let bound = HashMap::new();
        let existing = HashSet::new();
        assert_eq!(compute_pre_shared_cert(&[], &bound, &existing), None);
    }
}
