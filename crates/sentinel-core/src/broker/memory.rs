//! In-process reference broker. Implements the durable-stream,
//! durable-pull-consumer, ack/nak, redelivery-cap and dead-letter
//! contract of §4.1 without an external NATS deployment, so every
//! worker binary and integration test has a working broker out of the
//! box.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{
    subjects, ArchivedMessage, DeadLetterAdvisory, Delivery, PullSubscription, ReconnectPolicy,
    SubscribeOptions, ADVISORY_SUBJECT,
};
use crate::error::SentinelResult;

const PULL_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the background task sweeps every subject for expired
/// in-flight messages and, while disconnected, drives a reconnect
/// attempt. A fraction of the shortest `ack_wait` any worker configures.
const BACKGROUND_SWEEP_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Clone)]
struct QueuedMessage {
    seq: u64,
    message_type: String,
    payload: Vec<u8>,
    delivery_count: u32,
}

struct InFlight {
    message: QueuedMessage,
    stream: String,
    subject: String,
    durable_name: String,
    max_deliver: u32,
    deadline: Instant,
}

#[derive(Default)]
struct SubjectState {
    next_seq: u64,
    ready: VecDeque<QueuedMessage>,
    in_flight: HashMap<u64, InFlight>,
    /// Every message ever published on this subject, retained after ack
    /// so the guardian can look one up by sequence even once it is no
    /// longer deliverable (§4.9 step 2). `None` once deleted.
    archive: HashMap<u64, Option<QueuedMessage>>,
}

struct Inner {
    subjects: Mutex<HashMap<String, SubjectState>>,
    notify: Notify,
    connected: AtomicBool,
    reconnect_policy: ReconnectPolicy,
}

/// A single-process, in-memory work-queue broker.
///
/// Every subject is its own durable stream with work-queue retention.
/// Multiple [`InMemoryPullSubscription`]s opened with the same
/// `durable_name` share one delivery cursor, load-balancing deliveries
/// exactly as a real durable consumer would across processes.
///
/// A background task (spawned once, in [`InMemoryBroker::new`]) sweeps
/// every subject for expired in-flight messages on its own schedule, so
/// dead-lettering doesn't depend on a consumer calling `fetch()` again,
/// and drives the [`ReconnectPolicy`] whenever the broker is marked
/// disconnected. The task holds only a [`Weak`] reference and exits once
/// the last [`InMemoryBroker`] clone is dropped.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Creates an empty broker with no subjects yet.
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            subjects: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            connected: AtomicBool::new(true),
            reconnect_policy: ReconnectPolicy::default(),
        });
        spawn_background_task(Arc::downgrade(&inner));
        Self { inner }
    }

    /// Marks the broker disconnected, so the next background sweep drives
    /// a reconnect attempt through the [`ReconnectPolicy`] instead of
    /// reaping. Exists to exercise the reconnect path without a real
    /// transport to fail; see `DESIGN.md` for why an in-memory backend
    /// has a reconnect policy at all.
    pub fn simulate_disconnect(&self) {
        self.inner.connected.store(false, Ordering::Release);
    }

    async fn publish_internal(&self, subject: &str, message_type: &str, payload: Vec<u8>) {
        let mut subjects = self.inner.subjects.lock().await;
        let state = subjects.entry(subject.to_string()).or_default();
        state.next_seq += 1;
        let message = QueuedMessage {
            seq: state.next_seq,
            message_type: message_type.to_string(),
            payload,
            delivery_count: 0,
        };
        state.archive.insert(message.seq, Some(message.clone()));
        state.ready.push_back(message);
        drop(subjects);
        self.inner.notify.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::Broker for InMemoryBroker {
    async fn publish(
        &self,
        subject: &str,
        message_type: &str,
        payload: Vec<u8>,
    ) -> SentinelResult<()> {
        self.publish_internal(subject, message_type, payload).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        opts: SubscribeOptions,
    ) -> SentinelResult<Box<dyn PullSubscription>> {
        self.inner
            .subjects
            .lock()
            .await
            .entry(opts.subject.clone())
            .or_default();
        Ok(Box::new(InMemoryPullSubscription {
            inner: self.inner.clone(),
            opts,
        }))
    }

    async fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn fetch_message(
        &self,
        stream: &str,
        stream_seq: u64,
    ) -> SentinelResult<Option<ArchivedMessage>> {
        let subject = subjects::subject_for_stream(stream);
        let subjects = self.inner.subjects.lock().await;
        Ok(subjects.get(subject).and_then(|state| {
            state
                .archive
                .get(&stream_seq)
                .and_then(|slot| slot.as_ref())
                .map(|message| ArchivedMessage {
                    message_type: message.message_type.clone(),
                    payload: message.payload.clone(),
                })
        }))
    }

    async fn delete_message(&self, stream: &str, stream_seq: u64) -> SentinelResult<()> {
        let subject = subjects::subject_for_stream(stream);
        let mut subjects = self.inner.subjects.lock().await;
        if let Some(state) = subjects.get_mut(subject) {
            state.archive.insert(stream_seq, None);
        }
        Ok(())
    }
}

/// Reaps every in-flight message in `subject` whose `ack_wait` deadline
/// has passed: requeues it if under `max_deliver`, otherwise raises a
/// dead-letter advisory.
async fn reap_expired(inner: &Arc<Inner>, subject: &str) {
    let now = Instant::now();
    let mut expired = Vec::new();

    {
        let mut subjects = inner.subjects.lock().await;
        if let Some(state) = subjects.get_mut(subject) {
            let expired_seqs: Vec<u64> = state
                .in_flight
                .iter()
                .filter(|(_, f)| f.deadline <= now)
                .map(|(seq, _)| *seq)
                .collect();

            for seq in expired_seqs {
                if let Some(flight) = state.in_flight.remove(&seq) {
                    expired.push(flight);
                }
            }
        }
    }

    for flight in expired {
        settle_expired(inner, flight).await;
    }
}

async fn settle_expired(inner: &Arc<Inner>, flight: InFlight) {
    if flight.message.delivery_count >= flight.max_deliver {
        let advisory = DeadLetterAdvisory {
            stream: flight.stream,
            consumer: flight.durable_name,
            stream_seq: flight.message.seq,
            subject: flight.subject,
            delivery_count: flight.message.delivery_count,
        };
        let payload = serde_json::to_vec(&advisory).unwrap_or_default();
        let mut subjects = inner.subjects.lock().await;
        let state = subjects.entry(ADVISORY_SUBJECT.to_string()).or_default();
        state.next_seq += 1;
        state.ready.push_back(QueuedMessage {
            seq: state.next_seq,
            message_type: "DeadLetterAdvisory".to_string(),
            payload,
            delivery_count: 0,
        });
        drop(subjects);
        inner.notify.notify_waiters();
    } else {
        let mut subjects = inner.subjects.lock().await;
        let state = subjects.entry(flight.subject).or_default();
        state.ready.push_back(flight.message);
        drop(subjects);
        inner.notify.notify_waiters();
    }
}

/// Runs for as long as `inner` has a live strong reference. Every
/// `BACKGROUND_SWEEP_INTERVAL`, either reaps every subject's expired
/// in-flight messages, or, while disconnected, drives one attempt of the
/// reconnect policy.
fn spawn_background_task(inner: Weak<Inner>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(BACKGROUND_SWEEP_INTERVAL).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };

            if !inner.connected.load(Ordering::Acquire) {
                reconnect(&inner).await;
                continue;
            }

            let subjects: Vec<String> = {
                let subjects = inner.subjects.lock().await;
                subjects.keys().cloned().collect()
            };
            for subject in subjects {
                reap_expired(&inner, &subject).await;
            }
        }
    });
}

/// Drives the broker's [`ReconnectPolicy`] to flip `connected` back on.
/// The in-memory backend never actually loses its state, so a "connect
/// attempt" is just the policy's backoff schedule around an always-ok
/// closure; a real client would redial here instead.
async fn reconnect(inner: &Arc<Inner>) {
    let result = inner
        .reconnect_policy
        .executor()
        .execute("broker-reconnect", || async {
            Ok::<(), std::convert::Infallible>(())
        })
        .await;
    match result {
        Ok(()) => inner.connected.store(true, Ordering::Release),
        Err(err) => tracing::warn!(attempts = err.attempts, "broker reconnect attempts exhausted"),
    }
}

/// A durable pull-subscription against [`InMemoryBroker`].
pub struct InMemoryPullSubscription {
    inner: Arc<Inner>,
    opts: SubscribeOptions,
}

#[async_trait]
impl PullSubscription for InMemoryPullSubscription {
    async fn fetch(&mut self) -> SentinelResult<Option<Delivery>> {
        reap_expired(&self.inner, &self.opts.subject).await;

        let popped = {
            let mut subjects = self.inner.subjects.lock().await;
            let state = subjects.entry(self.opts.subject.clone()).or_default();
            state.ready.pop_front()
        };

        let mut message = match popped {
            Some(message) => message,
            None => {
                let _ = tokio::time::timeout(PULL_TIMEOUT, self.inner.notify.notified()).await;
                return Ok(None);
            }
        };

        message.delivery_count += 1;
        let delivery = Delivery {
            payload: message.payload.clone(),
            message_type: message.message_type.clone(),
            stream_seq: message.seq,
            delivery_count: message.delivery_count,
        };

        let mut subjects = self.inner.subjects.lock().await;
        let state = subjects.entry(self.opts.subject.clone()).or_default();
        state.in_flight.insert(
            message.seq,
            InFlight {
                message,
                stream: self.opts.stream.clone(),
                subject: self.opts.subject.clone(),
                durable_name: self.opts.durable_name.clone(),
                max_deliver: self.opts.max_deliver,
                deadline: Instant::now() + self.opts.ack_wait,
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&mut self, stream_seq: u64) -> SentinelResult<()> {
        let mut subjects = self.inner.subjects.lock().await;
        if let Some(state) = subjects.get_mut(&self.opts.subject) {
            state.in_flight.remove(&stream_seq);
        }
        Ok(())
    }

    async fn nak(&mut self, stream_seq: u64) -> SentinelResult<()> {
        let flight = {
            let mut subjects = self.inner.subjects.lock().await;
            subjects
                .get_mut(&self.opts.subject)
                .and_then(|state| state.in_flight.remove(&stream_seq))
        };
        if let Some(flight) = flight {
            settle_expired(&self.inner, flight).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::{Broker, SubscribeOptions};

    fn opts(subject: &str, max_deliver: u32, ack_wait: Duration) -> SubscribeOptions {
        SubscribeOptions {
            stream: format!("{subject}-stream"),
            subject: subject.to_string(),
            durable_name: "test-consumer".to_string(),
            ack_wait,
            max_deliver,
        }
    }

    #[tokio::test]
    async fn publish_then_fetch_roundtrips_payload() {
        let broker = InMemoryBroker::new();
        broker
            .publish("raw.events", "RawEvent", b"hello".to_vec())
            .await
            .unwrap();

        let mut sub = broker
            .subscribe(opts("raw.events", 5, Duration::from_secs(30)))
            .await
            .unwrap();

        let delivery = sub.fetch().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.message_type, "RawEvent");
        assert_eq!(delivery.delivery_count, 1);

        sub.ack(delivery.stream_seq).await.unwrap();
        assert!(sub.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nak_redelivers_until_max_deliver_then_dead_letters() {
        let broker = InMemoryBroker::new();
        broker
            .publish("raw.events", "RawEvent", b"poison".to_vec())
            .await
            .unwrap();

        let mut sub = broker
            .subscribe(opts("raw.events", 2, Duration::from_secs(30)))
            .await
            .unwrap();

        let first = sub.fetch().await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);
        sub.nak(first.stream_seq).await.unwrap();

        let second = sub.fetch().await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
        sub.nak(second.stream_seq).await.unwrap();

        assert!(sub.fetch().await.unwrap().is_none());

        let mut advisory_sub = broker
            .subscribe(opts(ADVISORY_SUBJECT, 1, Duration::from_secs(30)))
            .await
            .unwrap();
        let advisory_delivery = advisory_sub.fetch().await.unwrap().unwrap();
        let advisory: DeadLetterAdvisory =
            serde_json::from_slice(&advisory_delivery.payload).unwrap();
        assert_eq!(advisory.subject, "raw.events");
        assert_eq!(advisory.delivery_count, 2);
    }

    #[tokio::test]
    async fn background_task_dead_letters_without_a_second_fetch_call() {
        let broker = InMemoryBroker::new();
        broker
            .publish("raw.events", "RawEvent", b"poison".to_vec())
            .await
            .unwrap();

        let mut sub = broker
            .subscribe(opts("raw.events", 1, Duration::from_millis(10)))
            .await
            .unwrap();
        let delivery = sub.fetch().await.unwrap().unwrap();
        assert_eq!(delivery.delivery_count, 1);

        // No further fetch/ack/nak on `sub` — the background sweep, not
        // this test, must notice the expired ack_wait and dead-letter it.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut advisory_sub = broker
            .subscribe(opts(ADVISORY_SUBJECT, 1, Duration::from_secs(30)))
            .await
            .unwrap();
        let advisory_delivery = advisory_sub.fetch().await.unwrap().unwrap();
        let advisory: DeadLetterAdvisory =
            serde_json::from_slice(&advisory_delivery.payload).unwrap();
        assert_eq!(advisory.subject, "raw.events");
    }

    #[tokio::test]
    async fn background_task_reconnects_after_simulated_disconnect() {
        let broker = InMemoryBroker::new();
        assert!(broker.is_connected().await);

        broker.simulate_disconnect();
        assert!(!broker.is_connected().await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(broker.is_connected().await);
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_ack_wait() {
        let broker = InMemoryBroker::new();
        broker
            .publish("raw.events", "RawEvent", b"slow".to_vec())
            .await
            .unwrap();

        let mut sub = broker
            .subscribe(opts("raw.events", 5, Duration::from_millis(20)))
            .await
            .unwrap();

        let first = sub.fetch().await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let second = sub.fetch().await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 2);
        assert_eq!(second.stream_seq, first.stream_seq);
    }
}
