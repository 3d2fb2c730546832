//! C2: persistent state map.
//!
//! A process-wide mapping `CertID -> Entry` backed by a single
//! cluster-visible `ConfigMap` (`state::configmap::ConfigMapStateStore`).
//! The wire format is defined here so it can be unit tested without a live
//! apiserver; the ConfigMap plumbing lives in `configmap.rs`.

pub mod configmap;
pub mod memory;

use crate::crd::CertId;
use crate::error::StdError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A persistent state row binding a `CertID` to a Provider resource name and
/// bookkeeping flags. `ssl_certificate_name` is set exactly once per live
/// entry: once non-empty it is never rewritten by `set_ssl_certificate_name`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub ssl_certificate_name: String,
    pub soft_deleted: bool,
    pub excluded_from_slo: bool,
    pub creation_reported: bool,
}

/// The operations C6 needs against the persistent map. Implementations must
/// be linearizable: the controller loop guarantees single-writer access via
/// leader election, but the trait itself is guarded internally by a mutex so
/// misuse (e.g. from tests driving concurrent tasks) can't corrupt state.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &CertId) -> Option<Entry>;

    /// Creates the entry if absent. If a live entry already has a
    /// non-empty `ssl_certificate_name`, this is a no-op: it is never
    /// rewritten once set.
    async fn set_ssl_certificate_name(&self, id: &CertId, name: &str) -> Result<(), StdError>;

    async fn set_soft_deleted(&self, id: &CertId) -> Result<(), StdError>;

    async fn set_excluded_from_slo(&self, id: &CertId) -> Result<(), StdError>;

    async fn set_creation_reported(&self, id: &CertId) -> Result<(), StdError>;

    async fn delete(&self, id: &CertId) -> Result<(), StdError>;

    /// Snapshot iteration for sweeps and for (re)persisting the backing
    /// object.
    async fn list(&self) -> Vec<(CertId, Entry)>;
}

/// Serializes the map to its canonical on-disk form: one line per entry,
/// sorted by `CertID` so diffs of the backing object are stable.
/// Format per line: `namespace:name,sslCertificateName,softDeleted,excludedFromSLO,creationReported`.
pub fn serialize(map: &BTreeMap<CertId, Entry>) -> String {
    let mut lines: Vec<String> = map
        .iter()
        .map(|(id, entry)| {
            format!(
                "{}:{},{},{},{},{}",
                id.namespace,
                id.name,
                entry.ssl_certificate_name,
                entry.soft_deleted,
                entry.excluded_from_slo,
                entry.creation_reported
            )
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Parses the canonical on-disk form back into a map. Blank lines are
/// skipped (covers a trailing newline and an absent/empty blob, which both
/// load as an empty map per the persistence contract).
pub fn deserialize(blob: &str) -> Result<BTreeMap<CertId, Entry>, StdError> {
    let mut map = BTreeMap::new();
    for line in blob.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id_part, rest) = line
            .split_once(',')
            .ok_or_else(|| StdError::StateCorrupt(line.to_string()))?;
        let id: CertId = id_part
            .parse()
            .map_err(|_| StdError::StateCorrupt(line.to_string()))?;
        let fields: Vec<&str> = rest.split(',').collect();
        if fields.len() != 4 {
            return Err(StdError::StateCorrupt(line.to_string()));
        }
        let entry = Entry {
            ssl_certificate_name: fields[0].to_string(),
            soft_deleted: parse_bool(fields[1], line)?,
            excluded_from_slo: parse_bool(fields[2], line)?,
            creation_reported: parse_bool(fields[3], line)?,
        };
        map.insert(id, entry);
    }
    Ok(map)
}

fn parse_bool(s: &str, line: &str) -> Result<bool, StdError> {
    s.parse::<bool>()
        .map_err(|_| StdError::StateCorrupt(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> BTreeMap<CertId, Entry> {
        let mut m = BTreeMap::new();
        m.insert(
            CertId::new("default", "b-cert"),
            Entry {
                ssl_certificate_name: "mcrt-222".into(),
                soft_deleted: false,
                excluded_from_slo: true,
                creation_reported: true,
            },
        );
        m.insert(
            CertId::new("default", "a-cert"),
            Entry {
                ssl_certificate_name: "mcrt-111".into(),
                soft_deleted: false,
                excluded_from_slo: false,
                creation_reported: false,
            },
        );
        m
    }

    #[test]
    fn serialize_sorts_lines_by_cert_id_for_stable_diffs() {
        let blob = serialize(&sample_map());
        let lines: Vec<&str> = blob.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("default:a-cert,"));
        assert!(lines[1].starts_with("default:b-cert,"));
    }

    #[test]
    fn serialize_then_deserialize_round_trips() {
        let original = sample_map();
        let blob = serialize(&original);
        let parsed = deserialize(&blob).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn empty_blob_deserializes_to_empty_map() {
        assert!(deserialize("").unwrap().is_empty());
        assert!(deserialize("\n\n").unwrap().is_empty());
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(deserialize("not-a-valid-line-at-all").is_err());
        assert!(deserialize("default:a,mcrt-1,notabool,false,false").is_err());
    }
}
