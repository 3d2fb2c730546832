//! Leader-election gate: at most one controller process in the cluster
//! runs the reconciler workers at a time. A `coordination.k8s.io/v1`
//! `Lease` object is acquired/renewed on an interval via
//! `kube_leader_election::LeaseLock`, gated by a `CancellationToken`.
//!
//! Lease TTL 15s, retry period 2s. `kube_leader_election`'s
//! acquire-or-renew API has no separate renew-deadline parameter; a renew
//! attempt more than `lease_ttl - retry_period` late simply loses the
//! lease on the next tick, a conservative approximation rather than a
//! looser guarantee.

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const LEASE_TTL: Duration = Duration::from_secs(15);
pub const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Runs `on_acquire`/`on_lose` transitions forever (until `shutdown` is
/// cancelled), driven by repeated `try_acquire_or_renew` calls against a
/// single shared `Lease` object. `on_acquire` spawns the leader's worker
/// set and returns a handle; `on_lose`/shutdown aborts it.
pub async fn run<F>(
    client: Client,
    namespace: &str,
    lease_name: &str,
    holder_id: String,
    shutdown: CancellationToken,
    mut on_acquire: F,
) where
    F: FnMut() -> tokio::task::JoinHandle<()>,
{
    let lock = LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: lease_name.to_string(),
            lease_ttl: LEASE_TTL,
        },
    );

    let mut workers: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(RETRY_PERIOD);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = workers.take() {
                    task.abort();
                }
                return;
            }
            _ = tick.tick() => {}
        }

        match lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if workers.is_none() {
                    info!("acquired leadership; starting reconcile workers");
                    workers = Some(on_acquire());
                }
            }
            Ok(LeaseLockResult::NotAcquired(_)) => {
                if let Some(task) = workers.take() {
                    warn!("lost leadership; stopping reconcile workers");
                    task.abort();
                }
            }
            Err(e) => {
                warn!(error = %e, "leader election acquire/renew failed");
                if let Some(task) = workers.take() {
                    task.abort();
                }
            }
        }
    }
}
