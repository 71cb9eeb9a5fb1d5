//! Durable publish/subscribe broker adapter.
//!
//! Generalises the publisher/durable-pull-subscriber split of a
//! JetStream-shaped broker into a trait two backends can share: a real
//! NATS client (not part of this workspace, see `DESIGN.md`) and
//! [`memory::InMemoryBroker`], the in-process reference backend every
//! worker binary and integration test runs against.

mod memory;
mod reconnect;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryBroker;
pub use reconnect::ReconnectPolicy;

use crate::error::{SentinelError, SentinelResult};

/// What a handler decided to do with a delivered message.
///
/// [`SentinelError::handler_outcome`] maps a failure onto this directly;
/// success is always [`HandlerOutcome::Ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Positive acknowledgement; the message is removed from the stream.
    Ack,
    /// Negative acknowledgement; the broker redelivers after `ack_wait`.
    Nak,
    /// Non-recoverable payload error. Acked to avoid poisoning the queue,
    /// but distinguished from a successful `Ack` for logging.
    Drop,
}

/// One message handed to a durable pull-subscriber, together with the
/// metadata needed to ack/nak it and to build a dead-letter advisory.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Raw `bincode`-encoded payload.
    pub payload: Vec<u8>,
    /// The `message-type` header naming the payload schema.
    pub message_type: String,
    /// Monotonic sequence number within the stream.
    pub stream_seq: u64,
    /// Number of times this message has been delivered (1 on first try).
    pub delivery_count: u32,
}

/// A JSON advisory the broker raises when a message exceeds `max_deliver`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetterAdvisory {
    /// The stream the message originated from.
    pub stream: String,
    /// The durable consumer that exhausted redelivery.
    pub consumer: String,
    /// The message's sequence number within its stream.
    pub stream_seq: u64,
    /// The subject the message was published on.
    pub subject: String,
    /// How many times the message was delivered before giving up.
    pub delivery_count: u32,
}

/// The subject every broker implementation publishes dead-letter
/// advisories to.
pub const ADVISORY_SUBJECT: &str = "$advisory.max-deliveries";

/// Parameters of a durable pull-subscription, per §4.1.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// The stream backing `subject`.
    pub stream: String,
    /// The subject to consume.
    pub subject: String,
    /// Durable consumer name; deliveries load-balance across every
    /// process registered under the same name.
    pub durable_name: String,
    /// Visibility timeout. A message not acked/naked within this window
    /// is implicitly naked.
    pub ack_wait: Duration,
    /// Redelivery cap before the message is routed to
    /// [`ADVISORY_SUBJECT`].
    pub max_deliver: u32,
}

/// A previously-published message retained on its stream, as the
/// guardian sees it when it looks up the failing message named by a
/// dead-letter advisory (§4.9 step 2).
#[derive(Debug, Clone)]
pub struct ArchivedMessage {
    /// The `message-type` header the message was published with.
    pub message_type: String,
    /// Raw wire-encoded payload.
    pub payload: Vec<u8>,
}

/// A handle a worker's fetch loop polls for the next delivery.
#[async_trait]
pub trait PullSubscription: Send + Sync {
    /// Blocks for up to a short internal pull timeout, returning the next
    /// delivery if one is available.
    async fn fetch(&mut self) -> SentinelResult<Option<Delivery>>;

    /// Acknowledges successful processing of `stream_seq`.
    async fn ack(&mut self, stream_seq: u64) -> SentinelResult<()>;

    /// Negatively acknowledges `stream_seq`, requesting redelivery.
    async fn nak(&mut self, stream_seq: u64) -> SentinelResult<()>;
}

/// Typed publish/subscribe over a durable broker.
///
/// Implementors own the reconnect policy internally; callers never retry
/// on their own (§7: "No service retries independently of the broker").
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` (already wire-encoded) to `subject`, tagged
    /// with `message_type`. Ensures the backing stream exists on first
    /// use. Fails with [`SentinelError::BrokerUnavailable`] once the
    /// reconnect policy is exhausted.
    async fn publish(&self, subject: &str, message_type: &str, payload: Vec<u8>)
        -> SentinelResult<()>;

    /// Opens a durable pull-subscription per `opts`.
    async fn subscribe(
        &self,
        opts: SubscribeOptions,
    ) -> SentinelResult<Box<dyn PullSubscription>>;

    /// Whether the broker connection is currently usable; backs the
    /// readiness beacon (§10 supplemented features).
    async fn is_connected(&self) -> bool;

    /// Looks up a message still retained on `stream` by its sequence
    /// number, regardless of delivery/ack state. Used by the guardian
    /// to read the `message-type` header of a message a dead-letter
    /// advisory names (§4.9 step 2). Returns `None` if the message was
    /// never published on this broker or has since been deleted.
    async fn fetch_message(
        &self,
        stream: &str,
        stream_seq: u64,
    ) -> SentinelResult<Option<ArchivedMessage>>;

    /// Permanently removes a message from `stream` by sequence, per the
    /// guardian's final step (§4.9 step 4). A no-op if already absent.
    async fn delete_message(&self, stream: &str, stream_seq: u64) -> SentinelResult<()>;
}

/// Encodes `message` with the workspace wire codec and publishes it,
/// tagging the `message-type` header with `T`'s type name tail.
pub async fn publish_typed<T>(broker: &dyn Broker, subject: &str, message: &T) -> SentinelResult<()>
where
    T: serde::Serialize + TypeTag,
{
    let payload = crate::codec::encode(message)
        .map_err(|e| SentinelError::Schema {
            message_type: T::TYPE_TAG.to_string(),
            reason: e.to_string(),
        })?;
    broker.publish(subject, T::TYPE_TAG, payload).await
}

/// Associates a wire type with the `message-type` header it travels
/// under, so publishers and decoders agree without subject coupling.
pub trait TypeTag {
    /// The header value identifying this schema.
    const TYPE_TAG: &'static str;
}

impl TypeTag for crate::domain::NewSource {
    const TYPE_TAG: &'static str = "NewSource";
}
impl TypeTag for crate::domain::RemovedSource {
    const TYPE_TAG: &'static str = "RemovedSource";
}
impl TypeTag for crate::domain::PollSource {
    const TYPE_TAG: &'static str = "PollSource";
}
impl TypeTag for crate::domain::RawEvent {
    const TYPE_TAG: &'static str = "RawEvent";
}
impl TypeTag for crate::domain::FilteredEvent {
    const TYPE_TAG: &'static str = "FilteredEvent";
}
impl TypeTag for crate::domain::RankedEvent {
    const TYPE_TAG: &'static str = "RankedEvent";
}

/// Subject/stream naming table of §6, exposed so binaries don't
/// hand-roll subject strings.
pub mod subjects {
    /// `new.source` — registry → scheduler.
    pub const NEW_SOURCE: &str = "new.source";
    /// `removed.source` — registry → scheduler.
    pub const REMOVED_SOURCE: &str = "removed.source";
    /// `poll.source` — scheduler → connector.
    pub const POLL_SOURCE: &str = "poll.source";
    /// `raw.events` — connector → filter.
    pub const RAW_EVENTS: &str = "raw.events";
    /// `filtered.events` — filter → ranker.
    pub const FILTERED_EVENTS: &str = "filtered.events";
    /// `ranked.events` — ranker → inspector.
    pub const RANKED_EVENTS: &str = "ranked.events";

    /// `(stream_name, subject)` pairs every durable stream must bind.
    pub const STREAMS: &[(&str, &str)] = &[
        ("new-source-stream", NEW_SOURCE),
        ("removed-source-stream", REMOVED_SOURCE),
        ("poll-source-stream", POLL_SOURCE),
        ("raw-events-stream", RAW_EVENTS),
        ("filtered-events-stream", FILTERED_EVENTS),
        ("ranked-events-stream", RANKED_EVENTS),
    ];

    /// Resolves a stream name back to the subject it binds, per
    /// [`STREAMS`]. Falls back to treating `stream` as the subject
    /// itself, so ad-hoc test streams don't need a table entry.
    pub fn subject_for_stream(stream: &str) -> &str {
        STREAMS
            .iter()
            .find(|(name, _)| *name == stream)
            .map(|(_, subject)| *subject)
            .unwrap_or(stream)
    }
}
