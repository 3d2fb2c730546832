//! Domain-specific Kubernetes event reasons behind a small
//! `EventSink` trait, so C3/C6 can be unit tested without a live apiserver
//! to post `Event` objects against — the same "narrow interface, test
//! doubles implement it directly" approach also used for C2/C3.

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder};
use std::sync::Mutex;

pub const REASON_CREATE: &str = "Create";
pub const REASON_TOO_MANY_CERTIFICATES: &str = "TooManyCertificates";
pub const REASON_BACKEND_ERROR: &str = "BackendError";
pub const REASON_MISSING_CERTIFICATE: &str = "MissingCertificate";

const ACTION_RECONCILE: &str = "Reconcile";

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, type_: EventType, reason: &str, note: &str);
}

pub async fn publish_normal(sink: &dyn EventSink, reason: &str, note: &str) {
    sink.publish(EventType::Normal, reason, note).await;
}

pub async fn publish_warning(sink: &dyn EventSink, reason: &str, note: &str) {
    sink.publish(EventType::Warning, reason, note).await;
}

/// Production sink: posts to the cluster via `kube::runtime::events::Recorder`.
pub struct KubeEventSink(pub Recorder);

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, type_: EventType, reason: &str, note: &str) {
        let result = self
            .0
            .publish(Event {
                type_,
                reason: reason.to_string(),
                note: Some(note.to_string()),
                action: ACTION_RECONCILE.to_string(),
                secondary: None,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, reason, "failed to publish event");
        }
    }
}

/// Test sink: records every publish in memory instead of calling the
/// apiserver.
#[derive(Default)]
pub struct CapturingEventSink {
    published: Mutex<Vec<(EventType, String, String)>>,
}

impl CapturingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(EventType, String, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for CapturingEventSink {
    async fn publish(&self, type_: EventType, reason: &str, note: &str) {
        self.published
            .lock()
            .unwrap()
            .push((type_, reason.to_string(), note.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capturing_sink_records_reason_and_note() {
        let sink = CapturingEventSink::new();
        publish_warning(&sink, REASON_BACKEND_ERROR, "boom").await;
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, REASON_BACKEND_ERROR);
        assert_eq!(events[0].2, "boom");
        assert!(matches!(events[0].0, EventType::Warning));
    }
}
