//! `sentinel-scheduler`: converts source configuration into `poll.source`
//! ticks on a per-source cadence, per §4.4.

use std::{sync::Arc, time::Duration};

use sentinel_core::{
    broker::{subjects, Broker, HandlerOutcome, InMemoryBroker, SubscribeOptions},
    codec,
    config::RegistryConfig,
    domain::{NewSource, RemovedSource, Source},
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    registry::SqliteSourceRepository,
    shutdown::GracefulShutdown,
};
use sentinel_scheduler::jobs::JobMap;

/// How long a lifecycle fetch loop may go without iterating before its
/// heartbeat is considered stale; a multiple of the in-memory broker's
/// internal pull timeout.
const FETCH_LOOP_STALE_AFTER: Duration = Duration::from_secs(30);

struct BrokerHealth {
    broker: Arc<dyn Broker>,
    timeout: Duration,
}

impl Dependency for BrokerHealth {
    fn name(&self) -> &str {
        "broker"
    }

    fn check(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = DependencyStatus> + Send + '_>> {
        Box::pin(async move {
            if self.broker.is_connected().await {
                DependencyStatus::Healthy
            } else {
                DependencyStatus::Unhealthy("broker disconnected".to_string())
            }
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Rebuilds a minimal [`Source`] from a `NewSource` wire message, enough
/// to read `poll_interval_seconds` off its `config_json`.
fn source_from_new(message: &NewSource) -> Source {
    Source {
        id: message.id,
        name: message.name.clone(),
        source_type: message.source_type.clone(),
        config: serde_json::from_str(&message.config_json).unwrap_or(serde_json::Value::Null),
        is_active: message.is_active,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let registry_config = RegistryConfig::from_env()?;
    let default_interval = sentinel_core::config::scheduler_default_poll_interval()?;
    let readiness_timeout = sentinel_core::config::readiness_timeout("SCHEDULER")?;

    let repo = Arc::new(SqliteSourceRepository::open(registry_config.sqlite_path()).await?);
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let shutdown = Arc::new(GracefulShutdown::new());

    let new_source_heartbeat = Heartbeat::new();
    let removed_source_heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(new_source_heartbeat.dependency("new-source-consumer", FETCH_LOOP_STALE_AFTER))
        .add_dependency(
            removed_source_heartbeat.dependency("removed-source-consumer", FETCH_LOOP_STALE_AFTER),
        );
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let jobs = Arc::new(JobMap::new(
        default_interval,
        Arc::clone(&repo) as Arc<dyn sentinel_core::registry::SourceRepository>,
        Arc::clone(&broker),
    ));

    // Bootstrap: schedule every currently-active source.
    match repo.list_active().await {
        Ok(sources) => {
            for source in sources {
                let interval = source
                    .poll_interval_seconds()
                    .map(Duration::from_secs)
                    .unwrap_or(default_interval);
                jobs.upsert(source.id, interval).await;
            }
        }
        Err(err) => tracing::warn!(%err, "scheduler bootstrap skipped: db error"),
    }

    let new_source_sub = broker
        .subscribe(SubscribeOptions {
            stream: "new-source-stream".to_string(),
            subject: subjects::NEW_SOURCE.to_string(),
            durable_name: "scheduler".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
        })
        .await?;
    let removed_source_sub = broker
        .subscribe(SubscribeOptions {
            stream: "removed-source-stream".to_string(),
            subject: subjects::REMOVED_SOURCE.to_string(),
            durable_name: "scheduler".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
        })
        .await?;

    let new_source_jobs = Arc::clone(&jobs);
    let new_source_default_interval = default_interval;
    shutdown.spawn("new-source-consumer", async move {
        let mut sub = new_source_sub;
        loop {
            new_source_heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<NewSource>(&delivery.payload) {
                        Ok(message) => {
                            if message.is_active {
                                let source = source_from_new(&message);
                                let interval = source
                                    .poll_interval_seconds()
                                    .map(Duration::from_secs)
                                    .unwrap_or(new_source_default_interval);
                                new_source_jobs.upsert(message.id, interval).await;
                            } else {
                                new_source_jobs.remove(message.id).await;
                            }
                            HandlerOutcome::Ack
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable new.source message");
                            HandlerOutcome::Drop
                        }
                    };
                    match outcome {
                        HandlerOutcome::Nak => {
                            let _ = sub.nak(delivery.stream_seq).await;
                        }
                        _ => {
                            let _ = sub.ack(delivery.stream_seq).await;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(%err, "new.source fetch error"),
            }
        }
    });

    let removed_source_jobs = Arc::clone(&jobs);
    shutdown.spawn("removed-source-consumer", async move {
        let mut sub = removed_source_sub;
        loop {
            removed_source_heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<RemovedSource>(&delivery.payload) {
                        Ok(message) => {
                            removed_source_jobs.remove(message.id).await;
                            HandlerOutcome::Ack
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable removed.source message");
                            HandlerOutcome::Drop
                        }
                    };
                    match outcome {
                        HandlerOutcome::Nak => {
                            let _ = sub.nak(delivery.stream_seq).await;
                        }
                        _ => {
                            let _ = sub.ack(delivery.stream_seq).await;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::warn!(%err, "removed.source fetch error"),
            }
        }
    });

    tracing::info!("sentinel-scheduler running");
    shutdown.wait().await;
    jobs.clear().await;
    Ok(())
}
