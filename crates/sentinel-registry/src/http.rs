//! `GET/POST/PUT/DELETE /sources[...]` CRUD surface, per §6. Mutations
//! emit `new.source`/`removed.source` through the broker (§4.3);
//! grounded on `sentinel_core::health::server`'s hyper service-fn loop.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use sentinel_core::{
    broker::{self, subjects, Broker},
    domain::{NewSource, RemovedSource},
    error::SentinelError,
    registry::{NewSourceInput, SourceRepository, SourceUpdate},
};
use tokio::net::TcpListener;

/// Shared state the HTTP service closes over.
pub struct RegistryApi<R: SourceRepository> {
    repo: Arc<R>,
    broker: Arc<dyn Broker>,
}

impl<R: SourceRepository + 'static> RegistryApi<R> {
    /// Builds the API surface over `repo` and `broker`.
    pub fn new(repo: Arc<R>, broker: Arc<dyn Broker>) -> Self {
        Self { repo, broker }
    }

    /// Serves the CRUD surface on `addr` until the process is
    /// interrupted.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let api = Arc::clone(&self);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let api = Arc::clone(&api);
                    async move { handle(api, req).await }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(error = %err, "registry http connection error");
                }
            });
        }
    }
}

async fn handle<R: SourceRepository>(
    api: Arc<RegistryApi<R>>,
    req: Request<Incoming>,
) -> Result<Response<String>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["sources"]) => list(&api).await,
        (&Method::POST, ["sources"]) => create(&api, req).await,
        (&Method::GET, ["sources", id]) => get(&api, id).await,
        (&Method::PUT, ["sources", id]) => update(&api, id, req).await,
        (&Method::DELETE, ["sources", id]) => delete(&api, id).await,
        _ => Err(SentinelError::NotFound("route".to_string())),
    };

    Ok(match result {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(body)
            .unwrap(),
        Err(err) => error_response(&err),
    })
}

fn error_response(err: &SentinelError) -> Response<String> {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({ "error": err.to_string() }).to_string();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(body)
        .unwrap()
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, SentinelError> {
    use http_body_util::BodyExt;
    req.into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| SentinelError::Schema {
            message_type: "HttpBody".to_string(),
            reason: e.to_string(),
        })
}

async fn list<R: SourceRepository>(api: &RegistryApi<R>) -> Result<String, SentinelError> {
    let sources = api.repo.list().await?;
    Ok(serde_json::to_string(&sources).unwrap())
}

async fn get<R: SourceRepository>(api: &RegistryApi<R>, id: &str) -> Result<String, SentinelError> {
    let id: i64 = id
        .parse()
        .map_err(|_| SentinelError::NotFound(id.to_string()))?;
    let source = api
        .repo
        .get(id)
        .await?
        .ok_or_else(|| SentinelError::NotFound(format!("source {id}")))?;
    Ok(serde_json::to_string(&source).unwrap())
}

#[derive(serde::Deserialize)]
struct CreateBody {
    name: String,
    #[serde(rename = "type")]
    source_type: String,
    #[serde(default)]
    config: serde_json::Value,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

async fn create<R: SourceRepository>(
    api: &RegistryApi<R>,
    req: Request<Incoming>,
) -> Result<String, SentinelError> {
    let body = read_body(req).await?;
    let parsed: CreateBody = serde_json::from_slice(&body).map_err(|e| SentinelError::Schema {
        message_type: "CreateSourceBody".to_string(),
        reason: e.to_string(),
    })?;

    let created = api
        .repo
        .create(NewSourceInput {
            name: parsed.name,
            source_type: parsed.source_type,
            config: parsed.config,
            is_active: parsed.is_active,
        })
        .await?;

    // §4.3: creation always emits `new.source`, regardless of the
    // created row's `is_active` — the scheduler itself decides whether
    // to schedule a job from the `is_active` carried on the message.
    emit_new_source(&api.broker, &created).await?;

    Ok(serde_json::to_string(&created).unwrap())
}

#[derive(serde::Deserialize, Default)]
struct UpdateBody {
    name: Option<String>,
    config: Option<serde_json::Value>,
    is_active: Option<bool>,
}

async fn update<R: SourceRepository>(
    api: &RegistryApi<R>,
    id: &str,
    req: Request<Incoming>,
) -> Result<String, SentinelError> {
    let id: i64 = id
        .parse()
        .map_err(|_| SentinelError::NotFound(id.to_string()))?;
    let body = read_body(req).await?;
    let parsed: UpdateBody = serde_json::from_slice(&body).map_err(|e| SentinelError::Schema {
        message_type: "UpdateSourceBody".to_string(),
        reason: e.to_string(),
    })?;

    // §4.3: lifecycle events fire only "on update of `is_active`" — a
    // patch that never touched the field (e.g. a pure rename) must not
    // spuriously republish a lifecycle event and bounce the
    // scheduler's job for that source.
    let is_active_touched = parsed.is_active.is_some();

    let updated = api
        .repo
        .update(
            id,
            SourceUpdate {
                name: parsed.name,
                config: parsed.config,
                is_active: parsed.is_active,
            },
        )
        .await?;

    if is_active_touched {
        if updated.is_active {
            emit_new_source(&api.broker, &updated).await?;
        } else {
            emit_removed_source(&api.broker, updated.id).await?;
        }
    }

    Ok(serde_json::to_string(&updated).unwrap())
}

async fn delete<R: SourceRepository>(api: &RegistryApi<R>, id: &str) -> Result<String, SentinelError> {
    let id: i64 = id
        .parse()
        .map_err(|_| SentinelError::NotFound(id.to_string()))?;
    let deleted = api.repo.delete(id).await?;
    if !deleted {
        return Err(SentinelError::NotFound(format!("source {id}")));
    }
    emit_removed_source(&api.broker, id).await?;
    Ok(serde_json::json!({ "deleted": true }).to_string())
}

async fn emit_new_source(
    broker: &Arc<dyn Broker>,
    source: &sentinel_core::domain::Source,
) -> Result<(), SentinelError> {
    let message = NewSource {
        id: source.id,
        name: source.name.clone(),
        source_type: source.source_type.clone(),
        config_json: source.config.to_string(),
        is_active: source.is_active,
    };
    broker::publish_typed(broker.as_ref(), subjects::NEW_SOURCE, &message).await
}

async fn emit_removed_source(broker: &Arc<dyn Broker>, id: i64) -> Result<(), SentinelError> {
    let message = RemovedSource { id };
    broker::publish_typed(broker.as_ref(), subjects::REMOVED_SOURCE, &message).await
}
