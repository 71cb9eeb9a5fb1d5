//! Read-side retrieval surface plus `/ingest`, per §4.10/§6: thin JSON
//! handlers over [`VectorStore`], grounded on
//! `sentinel_core::health::server`'s hyper service-fn loop (the same
//! pattern `sentinel-registry`'s CRUD surface follows).

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use chrono::Utc;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use sentinel_core::{
    broker::{self, subjects, Broker},
    domain::RawEvent,
    error::SentinelError,
    store::VectorStore,
};
use tokio::net::TcpListener;

const DEFAULT_LIMIT: usize = 20;

/// Shared state the HTTP service closes over.
pub struct RetrievalApi {
    store: Arc<dyn VectorStore>,
    broker: Arc<dyn Broker>,
}

impl RetrievalApi {
    /// Builds the read-side API surface over `store` and `broker`
    /// (the latter only used by `/ingest`'s publish step).
    pub fn new(store: Arc<dyn VectorStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Serves the retrieval surface on `addr` until the process is
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
                    tracing::debug!(error = %err, "retrieval api http connection error");
                }
            });
        }
    }
}

/// Splits a request's raw query string into `(key, value)` pairs,
/// URL-decoding neither side beyond `+`/`%20` — acceptable since every
/// query parameter this surface reads is either numeric or passed
/// through a JSON body instead (`query` for `/news/rerank`).
fn query_params(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.replace('+', " ")),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn query_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn parse_limit(params: &[(String, String)]) -> usize {
    query_value(params, "limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT)
}

async fn handle(
    api: Arc<RetrievalApi>,
    req: Request<Incoming>,
) -> Result<Response<String>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["news"]) => list_all(&api, query.as_deref()).await,
        (&Method::GET, ["news", "filtered"]) => list_filtered(&api, query.as_deref()).await,
        (&Method::GET, ["news", "ranked"]) => list_ranked(&api, query.as_deref()).await,
        (&Method::POST, ["news", "rerank"]) => rerank(&api, req).await,
        (&Method::GET, ["retrieve"]) => retrieve(&api, query.as_deref()).await,
        (&Method::POST, ["ingest"]) => ingest(&api, req).await.map(|body| (body, 202)),
        _ => Err(SentinelError::NotFound("route".to_string())),
    };

    Ok(match result {
        Ok((body, status)) => Response::builder()
            .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
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

type Handled = Result<(String, u16), SentinelError>;

/// `GET /news?limit=20`: most recent stored events.
async fn list_all(api: &RetrievalApi, query: Option<&str>) -> Handled {
    let params = query_params(query);
    let limit = parse_limit(&params);
    let events = api.store.list_all_events(limit).await?;
    Ok((serde_json::to_string(&events).unwrap(), 200))
}

/// `GET /news/filtered?limit=20`: relevant, unranked.
async fn list_filtered(api: &RetrievalApi, query: Option<&str>) -> Handled {
    let params = query_params(query);
    let limit = parse_limit(&params);
    let mut events = api.store.list_filtered_events().await?;
    events.truncate(limit);
    Ok((serde_json::to_string(&events).unwrap(), 200))
}

/// `GET /news/ranked?limit=20`: ranked, `final_score` desc.
async fn list_ranked(api: &RetrievalApi, query: Option<&str>) -> Handled {
    let params = query_params(query);
    let limit = parse_limit(&params);
    let events = api.store.list_ranked_events(limit).await?;
    Ok((serde_json::to_string(&events).unwrap(), 200))
}

#[derive(serde::Deserialize)]
struct RerankBody {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// `POST /news/rerank`: keyword search; body `{query, limit}`.
async fn rerank(api: &RetrievalApi, req: Request<Incoming>) -> Handled {
    let body = read_body(req).await?;
    let parsed: RerankBody = serde_json::from_slice(&body).map_err(|e| SentinelError::Schema {
        message_type: "RerankBody".to_string(),
        reason: e.to_string(),
    })?;
    let events = api
        .store
        .search_events_by_keyword(&parsed.query, parsed.limit)
        .await?;
    Ok((serde_json::to_string(&events).unwrap(), 200))
}

/// `GET /retrieve?batch_id=<id>`: single event by `id`; 404 when absent.
async fn retrieve(api: &RetrievalApi, query: Option<&str>) -> Handled {
    let params = query_params(query);
    let id = query_value(&params, "batch_id")
        .ok_or_else(|| SentinelError::NotFound("missing batch_id".to_string()))?;
    let event = api
        .store
        .retrieve_event_by_id(id)
        .await?
        .ok_or_else(|| SentinelError::NotFound(format!("event {id}")))?;
    Ok((serde_json::to_string(&event).unwrap(), 200))
}

#[derive(serde::Deserialize)]
struct IngestEvent {
    #[serde(default)]
    id: Option<String>,
    source: String,
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// `POST /ingest`: accepts an array of events and enqueues them on
/// `raw.events`. Per §9's open-question pin, this bypasses nothing —
/// every ingested item is emitted as a `RawEvent` and flows through the
/// filter stage like any scraped candidate.
async fn ingest(api: &RetrievalApi, req: Request<Incoming>) -> Result<String, SentinelError> {
    let body = read_body(req).await?;
    ingest_from_body(&body, api.broker.as_ref()).await
}

/// The body of [`ingest`], split out so it's testable without a live
/// hyper connection.
async fn ingest_from_body(body: &[u8], broker: &dyn Broker) -> Result<String, SentinelError> {
    let parsed: Vec<IngestEvent> = serde_json::from_slice(body).map_err(|e| SentinelError::Schema {
        message_type: "IngestBody".to_string(),
        reason: e.to_string(),
    })?;

    let mut accepted = 0usize;
    for item in parsed {
        let event = RawEvent {
            id: item.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source: item.source,
            content: item.content.clone().unwrap_or_else(|| item.title.clone()),
            title: item.title,
            timestamp: item.timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        };
        broker::publish_typed(broker, subjects::RAW_EVENTS, &event).await?;
        accepted += 1;
    }

    Ok(serde_json::json!({ "accepted": accepted }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{
        broker::InMemoryBroker,
        domain::EventPayload,
        store::InMemoryVectorStore,
    };

    fn api() -> Arc<RetrievalApi> {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        Arc::new(RetrievalApi::new(store, broker))
    }

    #[tokio::test]
    async fn retrieve_returns_not_found_for_unknown_id() {
        let api = api();
        let err = retrieve(&api, Some("batch_id=missing")).await.unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }

    #[tokio::test]
    async fn retrieve_returns_stored_payload() {
        let api = api();
        api.store
            .upsert_event(EventPayload {
                original_id: "e1".to_string(),
                title: Some("Title".to_string()),
                content: Some("Body".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let (body, status) = retrieve(&api, Some("batch_id=e1")).await.unwrap();
        assert_eq!(status, 200);
        assert!(body.contains("\"e1\""));
    }

    #[tokio::test]
    async fn list_filtered_excludes_ranked_events() {
        let api = api();
        api.store
            .upsert_event(EventPayload {
                original_id: "filtered-only".to_string(),
                content: Some("body".to_string()),
                is_relevant: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        api.store
            .upsert_event(EventPayload {
                original_id: "ranked".to_string(),
                content: Some("body".to_string()),
                is_relevant: Some(true),
                final_score: Some(0.5),
                ..Default::default()
            })
            .await
            .unwrap();

        let (body, _) = list_filtered(&api, None).await.unwrap();
        assert!(body.contains("filtered-only"));
        assert!(!body.contains("\"ranked\""));
    }

    #[tokio::test]
    async fn ingest_accepts_an_array_and_fills_in_missing_fields() {
        let api = api();
        let body = br#"[{"source":"example.com","title":"Breaking news at the plant"}]"#;

        let response = ingest_from_body(body, api.broker.as_ref()).await.unwrap();
        assert!(response.contains("\"accepted\":1"));

        let mut sub = api
            .broker
            .subscribe(sentinel_core::broker::SubscribeOptions {
                stream: "raw-events-stream".to_string(),
                subject: subjects::RAW_EVENTS.to_string(),
                durable_name: "test".to_string(),
                ack_wait: std::time::Duration::from_secs(5),
                max_deliver: 3,
            })
            .await
            .unwrap();
        let delivery = sub.fetch().await.unwrap().expect("ingest should publish a raw event");
        let event: RawEvent = sentinel_core::codec::decode(&delivery.payload).unwrap();
        assert_eq!(event.source, "example.com");
        assert_eq!(event.content, "Breaking news at the plant");
    }

    #[tokio::test]
    async fn ingest_rejects_malformed_bodies_as_a_schema_error() {
        let api = api();
        let err = ingest_from_body(b"not json", api.broker.as_ref()).await.unwrap_err();
        assert!(matches!(err, SentinelError::Schema { .. }));
    }
}
