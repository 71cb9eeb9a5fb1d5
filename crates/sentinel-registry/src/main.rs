//! `sentinel-registry`: thin CRUD over the relational source store plus
//! `new.source`/`removed.source` lifecycle emission, per §4.3.

mod http;

use std::sync::Arc;

use std::time::Duration;

use sentinel_core::{
    broker::{Broker, InMemoryBroker},
    config::RegistryConfig,
    health::{Dependency, DependencyStatus, HealthServer, SimpleHealthCheck},
    registry::SqliteSourceRepository,
    shutdown::GracefulShutdown,
};

use http::RegistryApi;

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    sentinel_core::telemetry::init_tracing();

    let registry_config = RegistryConfig::from_env()?;
    let readiness_timeout = sentinel_core::config::readiness_timeout("API")?;

    let repo = Arc::new(SqliteSourceRepository::open(registry_config.sqlite_path()).await?);
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());

    let shutdown = Arc::new(GracefulShutdown::new());

    let health = SimpleHealthCheck::new().add_arc_dependency(Arc::new(BrokerHealth {
        broker: Arc::clone(&broker),
        timeout: readiness_timeout,
    }));
    let health_server = HealthServer::new(health).port(8081);
    shutdown.spawn("health-beacon", async move {
        if let Err(err) = health_server.serve().await {
            tracing::error!(%err, "health server exited");
        }
    });

    let api = Arc::new(RegistryApi::new(Arc::clone(&repo), Arc::clone(&broker)));
    let api_addr = ([0, 0, 0, 0], 8080).into();
    let serve_handle = tokio::spawn(async move {
        if let Err(err) = api.serve(api_addr).await {
            tracing::error!(%err, "registry http server exited");
        }
    });

    tracing::info!("sentinel-registry listening on 0.0.0.0:8080");
    shutdown.wait().await;
    serve_handle.abort();
    Ok(())
}
