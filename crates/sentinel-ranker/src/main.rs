//! `sentinel-ranker`: scores `filtered.events` by importance and
//! recency, patches the vector store, and emits `ranked.events`, per
//! §4.7.

mod scoring;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sentinel_core::{
    broker::{self, subjects, Broker, HandlerOutcome, InMemoryBroker, SubscribeOptions},
    codec,
    config::RankerConfig,
    domain::{EventPayload, FilteredEvent, RankedEvent},
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    shutdown::GracefulShutdown,
    store::{InMemoryVectorStore, VectorStore},
};

/// How long the `filtered.events` fetch loop may go without iterating
/// before its heartbeat is considered stale; a multiple of the
/// in-memory broker's internal pull timeout.
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

/// Scores one `filtered.events` message, patches the stored payload,
/// and re-publishes the scored event, per §4.7 steps 1-5. The payload
/// patch is unconditional: if the filter stage's record is missing
/// (the race noted in §9), the store's three-way upsert falls through
/// to its stub-insert path rather than the scores being dropped.
async fn handle_filtered_event(
    event: &FilteredEvent,
    config: &RankerConfig,
    store: &dyn VectorStore,
    broker: &dyn Broker,
) -> Result<(), sentinel_core::error::SentinelError> {
    let importance = scoring::importance_score(config, &event.categories);
    let recency = scoring::recency_score(config, &event.timestamp, Utc::now());
    let final_score = scoring::final_score(config, importance, recency);

    store
        .upsert_event(EventPayload {
            original_id: event.id.clone(),
            importance_score: Some(importance),
            recency_score: Some(recency),
            final_score: Some(final_score),
            ..Default::default()
        })
        .await?;

    let ranked = RankedEvent {
        id: event.id.clone(),
        title: event.title.clone(),
        timestamp: event.timestamp.clone(),
        source: event.source.clone(),
        categories: event.categories.clone(),
        is_relevant: event.is_relevant,
        importance_score: importance,
        recency_score: recency,
        final_score,
    };
    broker::publish_typed(broker, subjects::RANKED_EVENTS, &ranked).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let config_path = sentinel_core::config::ranker_config_path();
    let config_contents = std::fs::read_to_string(&config_path).map_err(|e| {
        sentinel_core::error::SentinelError::Config(format!(
            "failed to read ranker config at {config_path}: {e}"
        ))
    })?;
    let ranker_config = Arc::new(RankerConfig::from_toml(&config_contents)?);

    let readiness_timeout = sentinel_core::config::readiness_timeout("RANKER")?;

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.initialize_collection().await?;
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let shutdown = Arc::new(GracefulShutdown::new());

    let heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(heartbeat.dependency("filtered-events-consumer", FETCH_LOOP_STALE_AFTER));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let mut sub = broker
        .subscribe(SubscribeOptions {
            stream: "filtered-events-stream".to_string(),
            subject: subjects::FILTERED_EVENTS.to_string(),
            durable_name: "ranker".to_string(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 3,
        })
        .await?;

    shutdown.spawn("filtered-events-consumer", async move {
        loop {
            heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<FilteredEvent>(&delivery.payload) {
                        Ok(event) => {
                            match handle_filtered_event(
                                &event,
                                ranker_config.as_ref(),
                                store.as_ref(),
                                broker.as_ref(),
                            )
                            .await
                            {
                                Ok(()) => HandlerOutcome::Ack,
                                Err(err) => {
                                    tracing::warn!(id = %event.id, %err, "filtered event handling failed");
                                    err.handler_outcome()
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable filtered.events message");
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
                Err(err) => tracing::warn!(%err, "filtered.events fetch error"),
            }
        }
    });

    tracing::info!("sentinel-ranker running");
    shutdown.wait().await;
    Ok(())
}
