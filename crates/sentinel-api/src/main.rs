//! `sentinel-api`: the read-side retrieval surface over the vector
//! store plus `/ingest`, per §4.10/§6. Source CRUD lives in
//! `sentinel-registry`'s own HTTP surface.

mod routes;

use std::{sync::Arc, time::Duration};

use sentinel_core::{
    broker::{Broker, InMemoryBroker},
    health::{Dependency, DependencyStatus, HealthServer, SimpleHealthCheck},
    shutdown::GracefulShutdown,
    store::{InMemoryVectorStore, VectorStore},
};

use routes::RetrievalApi;

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

    let readiness_timeout = sentinel_core::config::readiness_timeout("API")?;

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    store.initialize_collection().await?;
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

    let api = Arc::new(RetrievalApi::new(store, broker));
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], 8080).into();
    let serve_handle = tokio::spawn(async move {
        if let Err(err) = api.serve(addr).await {
            tracing::error!(%err, "retrieval http server exited");
        }
    });

    tracing::info!(%addr, "sentinel-api running");
    shutdown.wait().await;
    serve_handle.abort();
    Ok(())
}
