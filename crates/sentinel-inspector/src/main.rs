//! `sentinel-inspector`: evaluates configurable anomaly detectors over
//! `ranked.events` and flags the stored payload, per §4.8.

mod detectors;

use std::{sync::Arc, time::Duration};

use sentinel_core::{
    broker::{Broker, HandlerOutcome, InMemoryBroker, SubscribeOptions},
    codec,
    config::InspectorConfig,
    domain::{EventPayload, RankedEvent},
    error::SentinelError,
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    llm::{LlmCompletion, StubLlmClient},
    shutdown::GracefulShutdown,
    store::{InMemoryVectorStore, VectorStore},
};

/// How long the `ranked.events` fetch loop may go without iterating
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

/// Evaluates one `ranked.events` message's detectors and patches the
/// stored payload if flagged, per §4.8: retrieve the payload by `id`,
/// merge the ranker's `final_score` into the in-memory copy, run the
/// detectors, and patch `is_anomaly = true` only if one trips.
async fn handle_ranked_event(
    event: &RankedEvent,
    config: &InspectorConfig,
    llm: &dyn LlmCompletion,
    store: &dyn VectorStore,
) -> Result<(), SentinelError> {
    let mut payload = store
        .retrieve_event_by_id(&event.id)
        .await?
        .unwrap_or_else(|| EventPayload {
            original_id: event.id.clone(),
            ..Default::default()
        });
    payload.final_score = Some(event.final_score);

    let is_anomaly = detectors::evaluate(&config.anomaly_detectors, &payload, llm).await?;
    if is_anomaly {
        tracing::info!(id = %event.id, "event flagged anomalous");
        store
            .upsert_event(EventPayload {
                original_id: event.id.clone(),
                is_anomaly: Some(true),
                ..Default::default()
            })
            .await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let config_path = sentinel_core::config::inspector_config_path();
    let config_contents = std::fs::read_to_string(&config_path).map_err(|e| {
        SentinelError::Config(format!("failed to read inspector config at {config_path}: {e}"))
    })?;
    let inspector_config = Arc::new(InspectorConfig::from_toml(&config_contents)?);

    let readiness_timeout = sentinel_core::config::readiness_timeout("INSPECTOR")?;

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.initialize_collection().await?;
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let llm: Arc<dyn LlmCompletion> = Arc::new(StubLlmClient::new());

    let shutdown = Arc::new(GracefulShutdown::new());

    let heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(heartbeat.dependency("ranked-events-consumer", FETCH_LOOP_STALE_AFTER));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let mut sub = broker
        .subscribe(SubscribeOptions {
            stream: "ranked-events-stream".to_string(),
            subject: sentinel_core::broker::subjects::RANKED_EVENTS.to_string(),
            durable_name: "inspector".to_string(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 3,
        })
        .await?;

    shutdown.spawn("ranked-events-consumer", async move {
        loop {
            heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<RankedEvent>(&delivery.payload) {
                        Ok(event) => {
                            match handle_ranked_event(
                                &event,
                                inspector_config.as_ref(),
                                llm.as_ref(),
                                store.as_ref(),
                            )
                            .await
                            {
                                Ok(()) => HandlerOutcome::Ack,
                                Err(err) => {
                                    tracing::warn!(id = %event.id, %err, "ranked event handling failed");
                                    err.handler_outcome()
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable ranked.events message");
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
                Err(err) => tracing::warn!(%err, "ranked.events fetch error"),
            }
        }
    });

    tracing::info!("sentinel-inspector running");
    shutdown.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InspectorConfig {
        InspectorConfig::from_toml(
            r#"
            [[anomaly_detectors]]
            type = "keyword_match"
            parameters = { keywords = ["satire"] }
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn flags_payload_when_a_detector_trips() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_event(EventPayload {
                original_id: "e1".to_string(),
                content: Some("this story was pure satire".to_string()),
                is_relevant: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let event = RankedEvent {
            id: "e1".to_string(),
            title: "Title".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            source: "example.com".to_string(),
            categories: vec!["Other".to_string()],
            is_relevant: true,
            importance_score: 0.1,
            recency_score: 1.0,
            final_score: 0.5,
        };

        let llm = StubLlmClient::new();
        handle_ranked_event(&event, &config(), &llm, &store).await.unwrap();

        let patched = store.retrieve_event_by_id("e1").await.unwrap().unwrap();
        assert_eq!(patched.is_anomaly, Some(true));
        assert_eq!(patched.final_score, None, "inspector patch carries no score fields");
    }

    #[tokio::test]
    async fn leaves_payload_untouched_when_no_detector_trips() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_event(EventPayload {
                original_id: "e1".to_string(),
                content: Some("a perfectly ordinary news report".to_string()),
                is_relevant: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let event = RankedEvent {
            id: "e1".to_string(),
            title: "Title".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            source: "example.com".to_string(),
            categories: vec!["Other".to_string()],
            is_relevant: true,
            importance_score: 0.1,
            recency_score: 1.0,
            final_score: 0.5,
        };

        let llm = StubLlmClient::new();
        handle_ranked_event(&event, &config(), &llm, &store).await.unwrap();

        let untouched = store.retrieve_event_by_id("e1").await.unwrap().unwrap();
        assert_eq!(untouched.is_anomaly, None);
    }
}
