//! C8: the controller loop. Wires together informers, event handlers, the
//! worker pools (C5/C6), the periodic sweep, the annotation computer
//! (C7), and the leader-election gate (`leader.rs`), and exposes the
//! `State`/`Diagnostics` the `actix-web` surface in `main.rs` reads from.

use crate::annotate;
use crate::config::Config;
use crate::crd::{CertId, ManagedCertificate};
use crate::ingress::reconcile_ingress;
use crate::metrics::Metrics;
use crate::namegen::NameGenerator;
use crate::provider::fake::FakeSslCertificateManager;
use crate::provider::SslCertificateManager;
use crate::queue::WorkQueue;
use crate::reconcile::{reconcile_managed_certificate, ReconcileContext};
use crate::state::configmap::ConfigMapStateStore;
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::events::Reporter;
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const REPORTER_NAME: &str = "managed-certificate-controller";
const ANNOTATE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Liveness bookkeeping: if either timestamp
/// goes stale past a configured timeout, the health handler reports 5xx so
/// the supervisor restarts the process.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_activity: DateTime<Utc>,
    pub last_successful_run: DateTime<Utc>,
    pub is_leader: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        let now = Utc::now();
        Diagnostics {
            last_activity: now,
            last_successful_run: now,
            is_leader: false,
        }
    }
}

/// State shared between the controller loop and the web server.
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    registry: prometheus::Registry,
}

impl State {
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    /// Whether the liveness endpoint should report healthy: both
    /// timestamps must be within `timeout` of now.
    pub async fn is_healthy(&self, timeout: Duration) -> bool {
        let d = self.diagnostics.read().await;
        let age_activity = Utc::now().signed_duration_since(d.last_activity);
        let age_run = Utc::now().signed_duration_since(d.last_successful_run);
        age_activity.to_std().map(|a| a <= timeout).unwrap_or(false)
            && age_run.to_std().map(|a| a <= timeout).unwrap_or(false)
    }

    async fn touch_activity(&self) {
        self.diagnostics.write().await.last_activity = Utc::now();
    }

    async fn touch_success(&self) {
        let mut d = self.diagnostics.write().await;
        d.last_activity = Utc::now();
        d.last_successful_run = Utc::now();
    }

    async fn set_leader(&self, is_leader: bool) {
        self.diagnostics.write().await.is_leader = is_leader;
    }

    fn register_metrics(&self) -> Metrics {
        Metrics::new().register(&self.registry).expect("metric registration")
    }
}

/// Top-level entrypoint. Builds the
/// Kubernetes client, the Provider backend, the persistent state store,
/// and drives the leader-election loop; returns only on shutdown.
pub async fn run(state: State, config: Config, shutdown: CancellationToken) {
    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create kube client");
            std::process::exit(1);
        }
    };

    let mcs = Api::<ManagedCertificate>::all(client.clone());
    if let Err(e) = mcs.list(&kube::api::ListParams::default().limit(1)).await {
        error!(error = %e, "ManagedCertificate CRD is not queryable; is it installed?");
        info!("installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let store = match ConfigMapStateStore::load(
        client.clone(),
        &config.state_configmap_namespace,
        &config.state_configmap_name,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to load persistent state map");
            std::process::exit(1);
        }
    };
    let state_store: Arc<dyn StateStore> = Arc::new(store);

    let leader_state = state.clone();
    let metrics = leader_state.register_metrics();

    // The real GCE Compute API client is out of scope; without
    // `--gce-config` this runs against the in-memory fake, suitable for
    // dry-run/local development as documented in `provider::fake`. It
    // shares `metrics` with the rest of the controller so the quota/backend
    // error counters it increments show up on `/metrics`.
    let ssl: Arc<dyn SslCertificateManager> = Arc::new(FakeSslCertificateManager::with_metrics(metrics.clone()));
    if config.gce_config.is_some() {
        warn!("--gce-config given but no real Provider backend is wired in this build; using the in-memory fake");
    }

    let namegen = NameGenerator::new(config.ssl_cert_name_prefix.clone());
    let reporter: Reporter = REPORTER_NAME.into();

    let mc_queue: Arc<WorkQueue<String>> = WorkQueue::new();
    let ingress_queue: Arc<WorkQueue<String>> = WorkQueue::new();

    let holder_id = config.holder_id();
    let lease_namespace = config.namespace.clone();

    let leader_client = client.clone();
    let leader_shutdown = shutdown.clone();

    let acquire_ctx = AcquireContext {
        client: client.clone(),
        state_store,
        ssl,
        namegen,
        metrics,
        reporter,
        config: config.clone(),
        mc_queue,
        ingress_queue,
        web_state: leader_state.clone(),
        mc_api: mcs,
    };

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = crate::leader::run(
            leader_client,
            &lease_namespace,
            "managed-certificate-controller-lock",
            holder_id,
            leader_shutdown,
            {
                let state = leader_state.clone();
                let acquire_ctx = acquire_ctx.clone();
                move || {
                    let state = state.clone();
                    let ctx = acquire_ctx.clone();
                    tokio::spawn(async move {
                        state.set_leader(true).await;
                        run_as_leader(ctx).await;
                        state.set_leader(false).await;
                    })
                }
            },
        ) => {}
    }
}

#[derive(Clone)]
struct AcquireContext {
    client: Client,
    state_store: Arc<dyn StateStore>,
    ssl: Arc<dyn SslCertificateManager>,
    namegen: NameGenerator,
    metrics: Metrics,
    reporter: Reporter,
    config: Config,
    mc_queue: Arc<WorkQueue<String>>,
    ingress_queue: Arc<WorkQueue<String>>,
    web_state: State,
    mc_api: Api<ManagedCertificate>,
}

/// Runs everything that only the leader does: informers, workers, sweep,
/// annotation computer. Returns when the surrounding task is aborted on
/// leadership loss or shutdown.
async fn run_as_leader(ctx: AcquireContext) {
    let reconcile_ctx = Arc::new(ReconcileContext {
        client: ctx.client.clone(),
        state: ctx.state_store.clone(),
        ssl: ctx.ssl.clone(),
        namegen: ctx.namegen.clone(),
        metrics: ctx.metrics.clone(),
        reporter: ctx.reporter.clone(),
    });

    let mut tasks = Vec::new();

    for _ in 0..ctx.config.workers_per_queue.max(1) {
        let queue = ctx.mc_queue.clone();
        let reconcile_ctx = reconcile_ctx.clone();
        let web_state = ctx.web_state.clone();
        tasks.push(tokio::spawn(run_mc_worker(queue, reconcile_ctx, web_state)));
    }

    for _ in 0..ctx.config.workers_per_queue.max(1) {
        let mc_queue = ctx.mc_queue.clone();
        let ingress_queue = ctx.ingress_queue.clone();
        let client = ctx.client.clone();
        let web_state = ctx.web_state.clone();
        let state_store = ctx.state_store.clone();
        let ssl = ctx.ssl.clone();
        tasks.push(tokio::spawn(run_ingress_worker(
            ingress_queue,
            mc_queue,
            client,
            web_state,
            state_store,
            ssl,
        )));
    }

    tasks.push(tokio::spawn(run_mc_informer(
        ctx.client.clone(),
        ctx.mc_queue.clone(),
    )));
    tasks.push(tokio::spawn(run_ingress_informer(
        ctx.client.clone(),
        ctx.ingress_queue.clone(),
    )));
    tasks.push(tokio::spawn(run_sweep(
        ctx.mc_api.clone(),
        ctx.state_store.clone(),
        ctx.mc_queue.clone(),
        ctx.metrics.clone(),
        ctx.config.resync_interval,
    )));
    tasks.push(tokio::spawn(run_annotation_sweep(
        ctx.client.clone(),
        ctx.state_store.clone(),
        ctx.ssl.clone(),
    )));

    futures::future::join_all(tasks).await;
}

async fn run_mc_worker(queue: Arc<WorkQueue<String>>, ctx: Arc<ReconcileContext>, web_state: State) {
    loop {
        let Some(key) = queue.get().await else {
            return;
        };
        web_state.touch_activity().await;

        let Some(id) = CertId::from_queue_key(&key) else {
            warn!(key, "malformed ManagedCertificate queue key, dropping");
            queue.done(&key).await;
            queue.forget(&key).await;
            continue;
        };

        let outcome = tokio::time::timeout(Duration::from_secs(60), reconcile_managed_certificate(&id, &ctx)).await;

        match outcome {
            Ok(Ok(())) => {
                queue.done(&key).await;
                queue.forget(&key).await;
                web_state.touch_success().await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, cert_id = %id, "reconcile failed, requeueing");
                ctx.metrics
                    .reconcile_failures
                    .with_label_values(&[id.to_string().as_str(), e.metric_label()])
                    .inc();
                queue.done(&key).await;
                if e.is_retriable() {
                    queue.add_rate_limited(key.clone());
                } else {
                    queue.forget(&key).await;
                }
            }
            Err(_) => {
                warn!(cert_id = %id, "reconcile timed out after 60s, requeueing");
                queue.done(&key).await;
                queue.add_rate_limited(key.clone());
            }
        }
    }
}

async fn run_ingress_worker(
    queue: Arc<WorkQueue<String>>,
    mc_queue: Arc<WorkQueue<String>>,
    client: Client,
    web_state: State,
    state_store: Arc<dyn StateStore>,
    ssl: Arc<dyn SslCertificateManager>,
) {
    loop {
        let Some(key) = queue.get().await else {
            return;
        };
        web_state.touch_activity().await;

        let Some((namespace, name)) = key.split_once('/') else {
            queue.done(&key).await;
            queue.forget(&key).await;
            continue;
        };

        let ingress_api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
        let mc_api: Api<ManagedCertificate> = Api::namespaced(client.clone(), namespace);
        let object_ref = k8s_openapi::api::core::v1::ObjectReference {
            kind: Some("Ingress".to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        };
        let events_sink = crate::events::KubeEventSink(kube::runtime::events::Recorder::new(
            client.clone(),
            REPORTER_NAME.into(),
            object_ref,
        ));

        let result = reconcile_ingress(namespace, name, &ingress_api, &mc_api, &mc_queue, &events_sink).await;
        queue.done(&key).await;
        match result {
            Ok(()) => {
                // SPEC_FULL.md's annotation computer runs "periodically ...
                // and on Ingress events": recompute this Ingress's
                // `pre-shared-cert` annotation right away rather than
                // waiting for `run_annotation_sweep`'s next tick.
                match ingress_api.get_opt(name).await {
                    Ok(Some(ing)) => {
                        let existing = existing_provider_names(&state_store, &ssl).await;
                        if let Err(e) =
                            annotate::recompute_for_ingress(&ingress_api, &ing, &state_store, &existing).await
                        {
                            warn!(error = %e, ingress = %key, "failed to patch pre-shared-cert annotation");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, ingress = %key, "failed to re-fetch ingress for annotation recompute"),
                }

                queue.forget(&key).await;
                web_state.touch_success().await;
            }
            Err(e) => {
                warn!(error = %e, ingress = %key, "ingress reconcile failed, requeueing");
                queue.add_rate_limited(key.clone());
            }
        }
    }
}

async fn run_mc_informer(client: Client, queue: Arc<WorkQueue<String>>) {
    let api = Api::<ManagedCertificate>::all(client);
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(m)) => enqueue_mc(&queue, &m).await,
            Ok(Event::Deleted(m)) => enqueue_mc(&queue, &m).await,
            Ok(Event::Restarted(list)) => {
                for m in list {
                    enqueue_mc(&queue, &m).await;
                }
            }
            Err(e) => warn!(error = %e, "ManagedCertificate watch error"),
        }
    }
}

async fn enqueue_mc(queue: &Arc<WorkQueue<String>>, m: &ManagedCertificate) {
    if let Some(ns) = m.namespace() {
        queue.add(CertId::new(ns, m.name_any()).queue_key()).await;
    }
}

async fn run_ingress_informer(client: Client, queue: Arc<WorkQueue<String>>) {
    let api = Api::<Ingress>::all(client);
    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Applied(ing)) => enqueue_ingress(&queue, &ing).await,
            Ok(Event::Deleted(ing)) => enqueue_ingress(&queue, &ing).await,
            Ok(Event::Restarted(list)) => {
                for ing in list {
                    enqueue_ingress(&queue, &ing).await;
                }
            }
            Err(e) => warn!(error = %e, "Ingress watch error"),
        }
    }
}

async fn enqueue_ingress(queue: &Arc<WorkQueue<String>>, ing: &Ingress) {
    if let Some(ns) = ing.namespace() {
        queue.add(format!("{ns}/{}", ing.name_any())).await;
    }
}

/// Periodic sweep: re-enqueues every known key (informer cache +
/// persistent map) every `interval`, and recomputes the per-status
/// histogram.
async fn run_sweep(
    mc_api: Api<ManagedCertificate>,
    state: Arc<dyn StateStore>,
    queue: Arc<WorkQueue<String>>,
    metrics: Metrics,
    interval: Duration,
) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;

        let known = match mc_api.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "sweep: failed to list ManagedCertificates");
                continue;
            }
        };

        let mut status_counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
        for m in &known {
            if let Some(ns) = m.namespace() {
                queue.add(CertId::new(ns, m.name_any()).queue_key()).await;
            }
            let status = m
                .status
                .as_ref()
                .and_then(|s| s.certificate_status.clone())
                .unwrap_or_default();
            *status_counts.entry(status).or_insert(0) += 1;
        }
        for (status, count) in &status_counts {
            metrics.status_count.with_label_values(&[status.as_str()]).set(*count as f64);
        }

        for (id, _) in state.list().await {
            queue.add(id.queue_key()).await;
        }

        metrics.queue_length.with_label_values(&["managedcertificate"]).set(queue.len().await as i64);
    }
}

/// C7's periodic half: covers every Ingress every `ANNOTATE_SWEEP_INTERVAL`,
/// independent of events, so an Ingress whose bound certs turn ready without
/// a fresh Ingress/ManagedCertificate event (e.g. the Provider resource
/// finishes provisioning on its own) still gets picked up. The on-event half
/// lives in `run_ingress_worker`, which calls `annotate::recompute_for_ingress`
/// directly after each successful `reconcile_ingress`.
async fn run_annotation_sweep(client: Client, state: Arc<dyn StateStore>, ssl: Arc<dyn SslCertificateManager>) {
    let mut tick = tokio::time::interval(ANNOTATE_SWEEP_INTERVAL);
    loop {
        tick.tick().await;
        let existing = existing_provider_names(&state, &ssl).await;
        annotate::recompute_all(client.clone(), None, &state, &existing).await;
    }
}

/// The "cached listing" of currently-`exists`ing Provider resources
/// Every Provider name the persistent map currently binds,
/// confirmed live against the backend so a name whose resource was
/// deleted out-of-band doesn't get published in `pre-shared-cert`.
async fn existing_provider_names(
    state: &Arc<dyn StateStore>,
    ssl: &Arc<dyn SslCertificateManager>,
) -> HashSet<String> {
    let mut out = HashSet::new();
    for (_, entry) in state.list().await {
        if entry.soft_deleted || entry.ssl_certificate_name.is_empty() {
            continue;
        }
        if ssl.exists(&entry.ssl_certificate_name).await.unwrap_or(false) {
            out.insert(entry.ssl_certificate_name);
        }
    }
    out
}
