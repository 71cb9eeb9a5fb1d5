//! `sentinel-guardian`: consumes the broker's max-deliveries advisory
//! subject and dispatches structured alerts for every message that
//! exceeded its consumer's redelivery cap, per §4.9.

mod alerter;

use std::{sync::Arc, time::Duration};

use sentinel_core::{
    broker::{Broker, DeadLetterAdvisory, HandlerOutcome, InMemoryBroker, SubscribeOptions, ADVISORY_SUBJECT},
    config::AlerterKind,
    error::SentinelError,
    health::{Dependency, DependencyStatus, Heartbeat, HealthServer, SimpleHealthCheck},
    shutdown::GracefulShutdown,
};

use alerter::{Alerter, AlertDetails, FakeChatAlerter, LoggingAlerter};

/// How long the advisory fetch loop may go without iterating before its
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

fn build_alerters(kinds: &[AlerterKind]) -> Vec<Arc<dyn Alerter>> {
    kinds
        .iter()
        .map(|kind| -> Arc<dyn Alerter> {
            match kind {
                AlerterKind::Logging => Arc::new(LoggingAlerter::new()),
                AlerterKind::FakeMessage => Arc::new(FakeChatAlerter::new()),
            }
        })
        .collect()
}

/// Handles one max-deliveries advisory, per §4.9 steps 1-4: parse it,
/// look up the failing message's `message-type` header, dispatch an
/// alert to every configured alerter concurrently, then delete the
/// failing message from its stream.
async fn handle_advisory(
    advisory: &DeadLetterAdvisory,
    alerters: &[Arc<dyn Alerter>],
    broker: &dyn Broker,
) -> Result<(), SentinelError> {
    let message_type = broker
        .fetch_message(&advisory.stream, advisory.stream_seq)
        .await?
        .map(|message| message.message_type)
        .unwrap_or_else(|| "unknown".to_string());

    let details = AlertDetails {
        stream: advisory.stream.clone(),
        consumer: advisory.consumer.clone(),
        stream_seq: advisory.stream_seq,
        subject: advisory.subject.clone(),
        delivery_count: advisory.delivery_count,
        message_type: message_type.clone(),
    };

    let subject = "dead letter";
    let message = format!(
        "message on subject '{}' exceeded max_deliver after {} attempts (type: {message_type})",
        advisory.subject, advisory.delivery_count
    );
    alerter::dispatch_all(alerters, subject, &message, &details).await;

    broker.delete_message(&advisory.stream, advisory.stream_seq).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let alerter_kinds = sentinel_core::config::alerters_from_env()?;
    let alerters = build_alerters(&alerter_kinds);
    tracing::info!(alerters = ?alerter_kinds, "guardian alerters configured");

    let readiness_timeout = sentinel_core::config::readiness_timeout("GUARDIAN")?;

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let shutdown = Arc::new(GracefulShutdown::new());

    let heartbeat = Heartbeat::new();
    let health = SimpleHealthCheck::new()
        .add_arc_dependency(Arc::new(BrokerHealth {
            broker: Arc::clone(&broker),
            timeout: readiness_timeout,
        }))
        .add_dependency(heartbeat.dependency("advisory-consumer", FETCH_LOOP_STALE_AFTER));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    // §4.9: the advisory subscription itself never redelivers more
    // than once — a dropped alert is logged and the advisory is still
    // consumed, since there is nowhere further to escalate to.
    let mut sub = broker
        .subscribe(SubscribeOptions {
            stream: ADVISORY_SUBJECT.to_string(),
            subject: ADVISORY_SUBJECT.to_string(),
            durable_name: "guardian".to_string(),
            ack_wait: Duration::from_secs(30),
            max_deliver: 1,
        })
        .await?;

    shutdown.spawn("advisory-consumer", async move {
        loop {
            heartbeat.touch();
            match sub.fetch().await {
                Ok(Some(delivery)) => {
                    let outcome = match serde_json::from_slice::<DeadLetterAdvisory>(&delivery.payload) {
                        Ok(advisory) => match handle_advisory(&advisory, &alerters, broker.as_ref()).await {
                            Ok(()) => HandlerOutcome::Ack,
                            Err(err) => {
                                tracing::warn!(%err, "advisory handling failed");
                                err.handler_outcome()
                            }
                        },
                        Err(err) => {
                            tracing::warn!(%err, "dropping undecodable advisory message");
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
                Err(err) => tracing::warn!(%err, "advisory fetch error"),
            }
        }
    });

    tracing::info!("sentinel-guardian running");
    shutdown.wait().await;
    Ok(())
}
