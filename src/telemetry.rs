//! Ambient logging/tracing init. Reconcile spans carry a `trace_id`
//! field via `#[instrument]` at the call sites in `reconcile.rs`.

use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Initializes the global tracing subscriber: a compact formatter filtered
/// by `RUST_LOG` (default `info`).
pub async fn init() {
    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();

    let collector = Registry::default().with(logger).with(env_filter);

    tracing::subscriber::set_global_default(collector).unwrap();
}

/// A trace id for the current span, for correlating logs with the
/// `#[instrument]`-recorded `trace_id` field. Plain span id when the
/// `telemetry` (OTLP) feature is off.
pub fn get_trace_id() -> String {
    #[cfg(feature = "telemetry")]
    {
        use opentelemetry::trace::TraceContextExt;
        use tracing_opentelemetry::OpenTelemetrySpanExt;
        tracing::Span::current()
            .context()
            .span()
            .span_context()
            .trace_id()
            .to_string()
    }
    #[cfg(not(feature = "telemetry"))]
    {
        "unset".to_string()
    }
}
