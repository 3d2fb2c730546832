//! C4: status translator.
//!
//! Two pure total functions from Provider vocabulary to user-visible
//! vocabulary, plus a domain-set diff. Both translation functions reject
//! unrecognized input rather than silently passing it through, because a
//! status string this controller doesn't understand is a sign the Provider
//! API has grown a value we haven't accounted for.

use crate::crd::{self, DomainStatus};
use crate::error::StdError;
use crate::provider::SslCertificate;
use std::collections::BTreeSet;

/// Maps a Provider `managed.status` value to the user-visible
/// `status.certificateStatus` value.
pub fn translate_certificate_status(provider_status: &str) -> Result<String, StdError> {
    let translated = match provider_status {
        "" | "MANAGED_CERTIFICATE_STATUS_UNSPECIFIED" => "",
        "PROVISIONING" => crd::CERTIFICATE_STATUS_PROVISIONING,
        "ACTIVE" => crd::CERTIFICATE_STATUS_ACTIVE,
        "PROVISIONING_FAILED" => crd::CERTIFICATE_STATUS_PROVISIONING_FAILED,
        "PROVISIONING_FAILED_PERMANENTLY" => crd::CERTIFICATE_STATUS_PROVISIONING_FAILED_PERMANENTLY,
        "RENEWAL_FAILED" => crd::CERTIFICATE_STATUS_RENEWAL_FAILED,
        other => return Err(StdError::UnknownStatus(other.to_string())),
    };
    Ok(translated.to_string())
}

/// Maps a Provider per-domain status value to the user-visible
/// `status.domainStatus[].status` value. The Provider's domain-status
/// vocabulary happens to already match ours except it has no "Provisioning"
/// alias for the empty string, so this is mostly an identity/validation pass.
pub fn translate_domain_status(provider_status: &str) -> Result<String, StdError> {
    let translated = match provider_status {
        "" | "PROVISIONING" => crd::DOMAIN_STATUS_PROVISIONING,
        "ACTIVE" => crd::DOMAIN_STATUS_ACTIVE,
        "FAILED_NOT_VISIBLE" => crd::DOMAIN_STATUS_FAILED_NOT_VISIBLE,
        "FAILED_CAA_CHECKING" => crd::DOMAIN_STATUS_FAILED_CAA_CHECKING,
        "FAILED_CAA_FORBIDDEN" => crd::DOMAIN_STATUS_FAILED_CAA_FORBIDDEN,
        "FAILED_RATE_LIMITED" => crd::DOMAIN_STATUS_FAILED_RATE_LIMITED,
        other => return Err(StdError::UnknownStatus(other.to_string())),
    };
    Ok(translated.to_string())
}

/// Translates a whole `SslCertificate`'s domain-status map into the sorted
/// `Vec<DomainStatus>` the `ManagedCertificate` status expects.
pub fn translate_domain_statuses(cert: &SslCertificate) -> Result<Vec<DomainStatus>, StdError> {
    let mut out = Vec::with_capacity(cert.domain_status.len());
    for (domain, status) in &cert.domain_status {
        out.push(DomainStatus {
            domain: domain.clone(),
            status: translate_domain_status(status)?,
        });
    }
    out.sort();
    Ok(out)
}

/// Compares the desired domain set (from `spec.domains`) against the
/// Provider resource's actual domain set. Returns an empty string if they're
/// equal (as sets; order and duplicates don't matter), otherwise a
/// human-readable description of the difference for event/log messages.
pub fn diff(desired_domains: &[String], provider: &SslCertificate) -> String {
    let desired: BTreeSet<&str> = desired_domains.iter().map(String::as_str).collect();
    let actual: BTreeSet<&str> = provider.domains.iter().map(String::as_str).collect();

    if desired == actual {
        return String::new();
    }

    let missing: Vec<&str> = desired.difference(&actual).copied().collect();
    let extra: Vec<&str> = actual.difference(&desired).copied().collect();

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing from provider: {}", missing.join(",")));
    }
    if !extra.is_empty() {
        parts.push(format!("not in spec: {}", extra.join(",")));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cert(domains: &[&str]) -> SslCertificate {
        SslCertificate {
            name: "mcrt-x".into(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            status: "ACTIVE".into(),
            domain_status: BTreeMap::new(),
            expire_time: None,
        }
    }

    #[test]
    fn certificate_status_translation_covers_the_documented_domain() {
        assert_eq!(translate_certificate_status("ACTIVE").unwrap(), "Active");
        assert_eq!(
            translate_certificate_status("PROVISIONING").unwrap(),
            "Provisioning"
        );
        assert_eq!(
            translate_certificate_status("PROVISIONING_FAILED_PERMANENTLY").unwrap(),
            "ProvisioningFailedPermanently"
        );
        assert_eq!(translate_certificate_status("").unwrap(), "");
    }

    #[test]
    fn certificate_status_translation_rejects_unknown_values() {
        assert!(translate_certificate_status("SOMETHING_NEW").is_err());
    }

    #[test]
    fn domain_status_translation_covers_the_documented_domain() {
        assert_eq!(translate_domain_status("ACTIVE").unwrap(), "Active");
        assert_eq!(
            translate_domain_status("FAILED_CAA_FORBIDDEN").unwrap(),
            "FailedCaaForbidden"
        );
        assert_eq!(translate_domain_status("").unwrap(), "Provisioning");
    }

    #[test]
    fn diff_is_empty_for_equal_sets_regardless_of_order() {
        let c = cert(&["b.example.com", "a.example.com"]);
        let desired = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        assert_eq!(diff(&desired, &c), "");
    }

    #[test]
    fn diff_reports_mismatched_domains() {
        let c = cert(&["a.example.com"]);
        let desired = vec!["b.example.com".to_string()];
        let d = diff(&desired, &c);
        assert!(d.contains("missing from provider"));
        assert!(d.contains("not in spec"));
    }
}
