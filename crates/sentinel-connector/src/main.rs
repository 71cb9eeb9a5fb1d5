//! `sentinel-connector`: scrapes a `poll.source` target, deduplicates
//! against items already seen, and emits `raw.events` for the rest, per
//! §4.5.

mod dedup;
mod scraper;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sentinel_core::{
    broker::{self, subjects, Broker, HandlerOutcome, InMemoryBroker, SubscribeOptions},
    codec,
    config::RegistryConfig,
    domain::{PollSource, RawEvent},
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    shutdown::GracefulShutdown,
};

use dedup::{Candidate, ProcessedItemStore};
use scraper::{HttpScraper, Scraper};

/// How long the `poll.source` fetch loop may go without iterating
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

/// Scrapes `source`'s resolved URL, dedups its candidates against
/// `dedup`, and publishes a `RawEvent` for each one newly seen (§4.5
/// steps 1-4). Titles are truncated to 200 chars, with `content` set
/// equal to the (untruncated) title, matching the original connector's
/// publish shape.
async fn handle_poll_source(
    source: &PollSource,
    scraper: &dyn Scraper,
    dedup: &ProcessedItemStore,
    broker: &dyn Broker,
) -> Result<usize, sentinel_core::error::SentinelError> {
    let url = poll_source_url(source);
    if !url.starts_with("http") {
        tracing::warn!(source_id = source.id, %url, "source has invalid URL, skipping");
        return Ok(0);
    }

    let candidates = scraper.scrape(&url).await?;
    let candidates: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.title.len() > 25 && c.href.starts_with("http"))
        .collect();
    tracing::info!(source_id = source.id, %url, count = candidates.len(), "scraped candidates");

    let unseen = dedup.filter_unseen(source.id, candidates).await?;

    let timestamp = Utc::now().to_rfc3339();
    let mut published = 0usize;
    for candidate in unseen {
        let title: String = candidate.title.chars().take(200).collect();
        let event = RawEvent {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.name.clone(),
            title: title.clone(),
            content: title,
            timestamp: timestamp.clone(),
        };
        broker::publish_typed(broker, subjects::RAW_EVENTS, &event).await?;
        published += 1;
    }

    tracing::info!(source_id = source.id, published, "published new raw events");
    Ok(published)
}

/// `config_json.url`, falling back to `name`, mirroring
/// `Source::resolved_url` for the wire-only `PollSource` shape.
fn poll_source_url(source: &PollSource) -> String {
    serde_json::from_str::<serde_json::Value>(&source.config_json)
        .ok()
        .and_then(|v| v.get("url").and_then(|u| u.as_str()).map(str::to_owned))
        .unwrap_or_else(|| source.name.clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let registry_config = RegistryConfig::from_env()?;
    let readiness_timeout = sentinel_core::config::readiness_timeout("CONNECTOR")?;

    let dedup = Arc::new(ProcessedItemStore::open(registry_config.sqlite_path()).await?);
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let http_client = sentinel_core::httpclient::client_with_timeout(Duration::from_secs(15))?;
    let scraper: Arc<dyn Scraper> = Arc::new(HttpScraper::new(http_client));

    let shutdown = Arc::new(GracefulShutdown::new());

    let heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(heartbeat.dependency("poll-source-consumer", FETCH_LOOP_STALE_AFTER));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let mut sub = broker
        .subscribe(SubscribeOptions {
            stream: "poll-source-stream".to_string(),
            subject: subjects::POLL_SOURCE.to_string(),
            durable_name: "connector".to_string(),
            ack_wait: Duration::from_secs(60),
            max_deliver: 3,
        })
        .await?;

    shutdown.spawn("poll-source-consumer", async move {
        loop {
            heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match codec::decode::<PollSource>(&delivery.payload) {
                        Ok(message) => {
                            match handle_poll_source(&message, scraper.as_ref(), &dedup, broker.as_ref())
                                .await
                            {
                                Ok(_) => HandlerOutcome::Ack,
                                Err(err) => {
                                    tracing::warn!(%err, "poll.source handling failed");
                                    err.handler_outcome()
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable poll.source message");
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
                Err(err) => tracing::warn!(%err, "poll.source fetch error"),
            }
        }
    });

    tracing::info!("sentinel-connector running");
    shutdown.wait().await;
    Ok(())
}
