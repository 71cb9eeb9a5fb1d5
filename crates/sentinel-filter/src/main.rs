//! `sentinel-filter`: classifies `raw.events` for relevance and
//! category, upserts the result into the vector store, and emits
//! `filtered.events`, per §4.6.

mod classifier;

use std::{sync::Arc, time::Duration};

use sentinel_core::{
    broker::{self, subjects, Broker, HandlerOutcome, InMemoryBroker, SubscribeOptions},
    codec,
    config::LlmConfig,
    domain::{EventPayload, FilteredEvent, RawEvent},
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    llm::StubLlmClient,
    shutdown::GracefulShutdown,
    store::{InMemoryVectorStore, VectorStore},
};

use classifier::{CategoryClassifier, LlmClassifier, RelevanceClassifier};

/// How long the `raw.events` fetch loop may go without iterating before
/// its heartbeat is considered stale; a multiple of the in-memory
/// broker's internal pull timeout.
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

/// Classifies, persists, and re-publishes one `raw.events` message, per
/// §4.6 steps 1-4. Returns `Ok(false)` when the event was irrelevant and
/// therefore only acked, never persisted or re-published.
async fn handle_raw_event(
    event: &RawEvent,
    classifier: &(impl RelevanceClassifier + CategoryClassifier),
    store: &dyn VectorStore,
    broker: &dyn Broker,
) -> Result<bool, sentinel_core::error::SentinelError> {
    let is_relevant = classifier.is_relevant(&event.content).await?;
    if !is_relevant {
        tracing::info!(id = %event.id, "event deemed irrelevant, skipping");
        return Ok(false);
    }

    let categories = classifier.categorize(&event.content).await?;

    store
        .upsert_event(EventPayload {
            original_id: event.id.clone(),
            title: Some(event.title.clone()),
            content: Some(event.content.clone()),
            timestamp: Some(event.timestamp.clone()),
            source: Some(event.source.clone()),
            categories: Some(categories.clone()),
            is_relevant: Some(true),
            ..Default::default()
        })
        .await?;

    let filtered = FilteredEvent {
        id: event.id.clone(),
        title: event.title.clone(),
        timestamp: event.timestamp.clone(),
        source: event.source.clone(),
        categories,
        is_relevant: true,
    };
    broker::publish_typed(broker, subjects::FILTERED_EVENTS, &filtered).await?;

    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    // Validates LLM provider configuration fails fast at startup
    // (§4.6); the shipped classifier is a deterministic stub, so the
    // resolved config itself isn't threaded any further than this.
    let llm_config = LlmConfig::from_env()?;
    tracing::info!(provider = ?llm_config.provider, model = %llm_config.model_name, "LLM classifier configured");

    let readiness_timeout = sentinel_core::config::readiness_timeout("FILTER")?;

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.initialize_collection().await?;
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let classifier = Arc::new(LlmClassifier::new(StubLlmClient::new()));

    let shutdown = Arc::new(GracefulShutdown::new());

    let heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(heartbeat.dependency("raw-events-consumer", FETCH_LOOP_STALE_AFTER));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let mut sub = broker
        .subscribe(SubscribeOptions {
            stream: "raw-events-stream".to_string(),
            subject: subjects::RAW_EVENTS.to_string(),
            durable_name: "filter".to_string(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 3,
        })
        .await?;

    shutdown.spawn("raw-events-consumer", async move {
        loop {
            heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<RawEvent>(&delivery.payload) {
                        Ok(event) => {
                            match handle_raw_event(&event, classifier.as_ref(), store.as_ref(), broker.as_ref())
                                .await
                            {
                                Ok(_) => HandlerOutcome::Ack,
                                Err(err) => {
                                    tracing::warn!(id = %event.id, %err, "raw event handling failed");
                                    err.handler_outcome()
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable raw.events message");
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
                Err(err) => tracing::warn!(%err, "raw.events fetch error"),
            }
        }
    });

    tracing::info!("sentinel-filter running");
    shutdown.wait().await;
    Ok(())
}
