//! C10: CLI/env configuration. `clap` derive with env-var fallbacks.

use clap::Parser;
use std::time::Duration;

fn parse_duration_secs(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| e.to_string())
}

#[derive(Parser, Debug, Clone)]
#[command(name = "managed-certificate-controller", version, about)]
pub struct Config {
    /// Path to the Provider config file (credentials, project id). Absent
    /// means run against the in-memory fake Provider backend.
    #[arg(long, env = "GCE_CONFIG")]
    pub gce_config: Option<String>,

    /// Liveness endpoint bind address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub health_check_address: String,

    /// Liveness endpoint path.
    #[arg(long, default_value = "/healthz")]
    pub health_check_path: String,

    /// Periodic full-sweep interval.
    #[arg(long, default_value = "60", value_parser = parse_duration_secs)]
    pub resync_interval: Duration,

    /// Metrics listen address. Served off its own actix-web app, separate
    /// from `health_check_address`, matching the CLI contract's distinct
    /// `--health-check-address`/`--prometheus-address` flags.
    #[arg(long, default_value = "0.0.0.0:8081")]
    pub prometheus_address: String,

    /// Namespace of the ConfigMap backing the persistent state map (C2).
    #[arg(long, default_value = "kube-system")]
    pub state_configmap_namespace: String,

    /// Name of the ConfigMap backing the persistent state map (C2).
    #[arg(long, default_value = "managed-certificate-state")]
    pub state_configmap_name: String,

    /// Prefix for generated Provider resource names (C1).
    #[arg(long, default_value = crate::namegen::DEFAULT_PREFIX)]
    pub ssl_cert_name_prefix: String,

    /// Namespace the leader-election Lease lives in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// This process's identity for leader election; falls back to a random
    /// id if neither `POD_NAME` nor `HOSTNAME` is set.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Number of parallel workers per queue (1 is sufficient for
    /// correctness, more is an optimization).
    #[arg(long, default_value = "2")]
    pub workers_per_queue: usize,
}

impl Config {
    pub fn holder_id(&self) -> String {
        self.pod_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("managed-certificate-controller-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_program_name_alone() {
        let cfg = Config::parse_from(["managed-certificate-controller"]);
        assert_eq!(cfg.resync_interval, Duration::from_secs(60));
        assert_eq!(cfg.ssl_cert_name_prefix, "mcrt-");
        assert_eq!(cfg.health_check_path, "/healthz");
    }

    #[test]
    fn holder_id_falls_back_to_a_generated_uuid_based_name() {
        let cfg = Config::parse_from(["managed-certificate-controller"]);
        let id = cfg.holder_id();
        assert!(!id.is_empty());
    }
}
