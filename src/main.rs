use actix_web::{get, middleware, web, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::Parser;
use mcrt_controller::config::Config;
use mcrt_controller::controller::{self, State};
use mcrt_controller::telemetry;
use prometheus::{Encoder, TextEncoder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIVENESS_TIMEOUT: Duration = Duration::from_secs(120);

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&metrics, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

async fn healthz(c: Data<State>, _req: HttpRequest) -> impl Responder {
    if c.is_healthy(LIVENESS_TIMEOUT).await {
        HttpResponse::Ok().json("healthy")
    } else {
        HttpResponse::ServiceUnavailable().json("stale")
    }
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let config = Config::parse();
    let shutdown = CancellationToken::new();

    let state = State::default();
    let controller_shutdown = shutdown.clone();
    let controller_state = state.clone();
    let controller_config = config.clone();
    let controller_task =
        tokio::spawn(async move { controller::run(controller_state, controller_config, controller_shutdown).await });

    // Liveness endpoint: bound to `--health-check-address`, served at
    // `--health-check-path` (both configurable per the CLI contract).
    let health_check_address = config.health_check_address.clone();
    let health_check_path = config.health_check_path.clone();
    let health_state = state.clone();
    let health_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(health_state.clone()))
            .wrap(middleware::Logger::default().exclude(health_check_path.as_str()))
            .service(index)
            .route(&health_check_path, web::get().to(healthz))
    })
    .bind(health_check_address.as_str())?
    .shutdown_timeout(5);

    // Metrics endpoint: its own listener on `--prometheus-address`, separate
    // from the liveness server per the CLI contract.
    let prometheus_address = config.prometheus_address.clone();
    let metrics_state = state.clone();
    let metrics_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(metrics_state.clone()))
            .wrap(middleware::Logger::default())
            .service(metrics)
    })
    .bind(prometheus_address.as_str())?
    .shutdown_timeout(5);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        signal_shutdown.cancel();
    });

    // All three runtimes implement graceful shutdown on SIGINT, so poll
    // until they're all done.
    let (controller_result, health_result, metrics_result) =
        tokio::join!(controller_task, health_server.run(), metrics_server.run());
    controller_result?;
    health_result?;
    metrics_result?;
    Ok(())
}
