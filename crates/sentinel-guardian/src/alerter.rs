//! Pluggable alert dispatch, per §4.9 step 3: a single capability,
//! `send_alert(subject, message, details)`, with variants grounded on
//! `logging_alerter.py` (stderr-with-context) and
//! `fake_message_alerter.py` (a fake chat sink). Alerters never nak;
//! dispatch failures are logged, never surfaced to the advisory ack.

use async_trait::async_trait;

/// Structured alert details the guardian attaches to every dispatch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertDetails {
    /// The stream the failing message originated from.
    pub stream: String,
    /// The durable consumer that exhausted redelivery.
    pub consumer: String,
    /// The message's sequence number within its stream.
    pub stream_seq: u64,
    /// The subject the message was published on.
    pub subject: String,
    /// How many times the message was delivered before giving up.
    pub delivery_count: u32,
    /// The failing message's `message-type` header, or `"unknown"` if
    /// it could not be recovered from the stream.
    pub message_type: String,
}

/// A destination for structured alerts. Implementors own their own
/// delivery mechanism; a failed delivery is the implementor's concern
/// to log, never the guardian's to retry (§4.9 step 3).
#[async_trait]
pub trait Alerter: Send + Sync {
    /// A short label identifying this alerter in logs (e.g. `"logging"`).
    fn name(&self) -> &str;

    /// Sends one alert. `subject` is a short human title, `message` a
    /// one-line summary, `details` the structured context.
    async fn send_alert(&self, subject: &str, message: &str, details: &AlertDetails);
}

/// Logs the alert to stderr with full structured context, grounded on
/// `logging_alerter.py`.
#[derive(Debug, Clone, Default)]
pub struct LoggingAlerter;

impl LoggingAlerter {
    /// Builds a new logging alerter.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Alerter for LoggingAlerter {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send_alert(&self, subject: &str, message: &str, details: &AlertDetails) {
        tracing::error!(
            subject,
            message,
            stream = %details.stream,
            consumer = %details.consumer,
            stream_seq = details.stream_seq,
            advisory_subject = %details.subject,
            delivery_count = details.delivery_count,
            message_type = %details.message_type,
            "dead-letter alert"
        );
    }
}

/// Sends the alert to a fake chat endpoint, grounded on
/// `fake_message_alerter.py` — a stand-in for a real chat-ops webhook,
/// exercising the dispatch contract end-to-end without a live
/// integration.
#[derive(Debug, Clone, Default)]
pub struct FakeChatAlerter {
    sent: std::sync::Arc<tokio::sync::Mutex<Vec<(String, String)>>>,
}

impl FakeChatAlerter {
    /// Builds a new fake chat alerter with an empty sent-message log.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(subject, message)` pairs sent so far, for test assertions.
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Alerter for FakeChatAlerter {
    fn name(&self) -> &str {
        "fake_message"
    }

    async fn send_alert(&self, subject: &str, message: &str, _details: &AlertDetails) {
        tracing::info!(subject, message, "fake chat alert dispatched");
        self.sent
            .lock()
            .await
            .push((subject.to_string(), message.to_string()));
    }
}

/// Dispatches one alert to every configured alerter concurrently
/// (§4.9 step 3), awaiting all of them before returning.
pub async fn dispatch_all(alerters: &[std::sync::Arc<dyn Alerter>], subject: &str, message: &str, details: &AlertDetails) {
    let sends = alerters
        .iter()
        .map(|alerter| alerter.send_alert(subject, message, details));
    futures::future::join_all(sends).await;
}
