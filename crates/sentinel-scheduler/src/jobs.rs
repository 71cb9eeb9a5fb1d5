//! The scheduler's job map: one periodic timer per active source, per
//! §4.4. Owned exclusively by the scheduler's own tasks — no concurrent
//! mutation (§5's "Shared resources" table).

use std::{collections::HashMap, sync::Arc, time::Duration};

use sentinel_core::{
    broker::{self, subjects, Broker},
    domain::PollSource,
    registry::SourceRepository,
};
use tokio::{sync::Mutex, task::JoinHandle};

/// Holds every source's active polling job, keyed by `source_id`.
pub struct JobMap {
    default_interval: Duration,
    repo: Arc<dyn SourceRepository>,
    broker: Arc<dyn Broker>,
    jobs: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl JobMap {
    /// Builds an empty job map.
    pub fn new(
        default_interval: Duration,
        repo: Arc<dyn SourceRepository>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        Self {
            default_interval,
            repo,
            broker,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Schedules or reschedules the job for `source_id`, replacing any
    /// existing timer for the same id (§4.4's `new.source` handling).
    pub async fn upsert(&self, source_id: i64, interval: Duration) {
        let repo = Arc::clone(&self.repo);
        let broker = Arc::clone(&self.broker);
        let handle = tokio::spawn(run_job(source_id, interval, repo, broker));

        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(source_id, handle) {
            previous.abort();
        }
    }

    /// Tears down the job for `source_id`, if one exists (§4.4's
    /// `removed.source` handling).
    pub async fn remove(&self, source_id: i64) {
        if let Some(handle) = self.jobs.lock().await.remove(&source_id) {
            handle.abort();
        }
    }

    /// The default cadence used when a source doesn't configure its own
    /// `poll_interval_seconds`.
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Aborts every scheduled job; used on shutdown.
    pub async fn clear(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }
}

/// The periodic tick loop for a single source. Runs until aborted by
/// [`JobMap::remove`] or [`JobMap::upsert`] replacing it.
async fn run_job(
    source_id: i64,
    interval: Duration,
    repo: Arc<dyn SourceRepository>,
    broker: Arc<dyn Broker>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a freshly scheduled
    // job waits a full interval before its first poll.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let source = match repo.get(source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                tracing::debug!(source_id, "tick no-op: source no longer exists");
                continue;
            }
            Err(err) => {
                tracing::warn!(source_id, %err, "scheduler tick skipped: db error");
                continue;
            }
        };

        if !source.is_active {
            tracing::debug!(source_id, "tick no-op: source deactivated");
            continue;
        }

        let message = PollSource {
            id: source.id,
            name: source.name.clone(),
            source_type: source.source_type.clone(),
            config_json: source.config.to_string(),
            is_active: source.is_active,
        };

        if let Err(err) = broker::publish_typed(broker.as_ref(), subjects::POLL_SOURCE, &message).await
        {
            tracing::warn!(source_id, %err, "failed to publish poll.source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{
        broker::{Broker, InMemoryBroker, SubscribeOptions},
        codec,
        domain::PollSource,
        registry::{NewSourceInput, SourceRepository, SqliteSourceRepository},
    };

    async fn repo_with_source(name: &str, interval_secs: u64) -> (Arc<SqliteSourceRepository>, i64) {
        let repo = Arc::new(SqliteSourceRepository::open(None).await.unwrap());
        let created = repo
            .create(NewSourceInput {
                name: name.to_string(),
                source_type: "rss".to_string(),
                config: serde_json::json!({ "poll_interval_seconds": interval_secs }),
                is_active: true,
            })
            .await
            .unwrap();
        (repo, created.id)
    }

    #[tokio::test]
    async fn upsert_schedules_a_tick_that_publishes_poll_source() {
        let (repo, id) = repo_with_source("example.com", 60).await;
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let jobs = JobMap::new(
            Duration::from_secs(300),
            repo as Arc<dyn SourceRepository>,
            Arc::clone(&broker),
        );

        jobs.upsert(id, Duration::from_millis(10)).await;

        let mut sub = broker
            .subscribe(SubscribeOptions {
                stream: "poll-source-stream".to_string(),
                subject: sentinel_core::broker::subjects::POLL_SOURCE.to_string(),
                durable_name: "test".to_string(),
                ack_wait: Duration::from_secs(5),
                max_deliver: 3,
            })
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(delivery) = sub.fetch().await.unwrap() {
                    return delivery;
                }
            }
        })
        .await
        .expect("expected a poll.source tick within timeout");

        let message: PollSource = codec::decode(&delivery.payload).unwrap();
        assert_eq!(message.id, id);
        assert!(message.is_active);

        jobs.clear().await;
    }

    #[tokio::test]
    async fn remove_tears_down_the_job_so_no_further_ticks_publish() {
        let (repo, id) = repo_with_source("example.com", 60).await;
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let jobs = JobMap::new(
            Duration::from_secs(300),
            repo as Arc<dyn SourceRepository>,
            Arc::clone(&broker),
        );

        jobs.upsert(id, Duration::from_millis(10)).await;
        jobs.remove(id).await;

        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut sub = broker
            .subscribe(SubscribeOptions {
                stream: "poll-source-stream".to_string(),
                subject: sentinel_core::broker::subjects::POLL_SOURCE.to_string(),
                durable_name: "test".to_string(),
                ack_wait: Duration::from_secs(5),
                max_deliver: 3,
            })
            .await
            .unwrap();
        assert!(sub.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_the_previous_timer_for_the_same_source() {
        let (repo, id) = repo_with_source("example.com", 60).await;
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let jobs = JobMap::new(
            Duration::from_secs(300),
            repo as Arc<dyn SourceRepository>,
            Arc::clone(&broker),
        );

        jobs.upsert(id, Duration::from_secs(300)).await;
        jobs.upsert(id, Duration::from_millis(10)).await;

        let mut sub = broker
            .subscribe(SubscribeOptions {
                stream: "poll-source-stream".to_string(),
                subject: sentinel_core::broker::subjects::POLL_SOURCE.to_string(),
                durable_name: "test".to_string(),
                ack_wait: Duration::from_secs(5),
                max_deliver: 3,
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if sub.fetch().await.unwrap().is_some() {
                    return;
                }
            }
        })
        .await
        .expect("the fast replacement timer should fire, not the slow original");

        jobs.clear().await;
    }
}
