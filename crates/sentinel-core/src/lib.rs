//! # Sentinel Core
//!
//! Shared primitives for every Sentinel binary: wire schema, broker
//! adapter, vector store adapter, source registry, resilience
//! patterns, configuration loading, structured logging, and the HTTP
//! readiness beacon.
//!
//! Each binary crate in the workspace depends on this one and supplies
//! its own `main.rs` wiring: load config, init tracing, construct a
//! `Broker`/`VectorStore`, run its fetch loop until shutdown.

#![warn(missing_docs)]
#![deny(unsafe_code)]

/// Durable publish/subscribe broker adapter.
pub mod broker;

/// The wire codec (structured binary + advisory JSON).
pub mod codec;

/// Environment and TOML configuration loading.
pub mod config;

/// Wire schemas and persistent domain types.
pub mod domain;

/// The pipeline's error taxonomy.
pub mod error;

/// Readiness and liveness beacon.
#[cfg(feature = "health")]
pub mod health;

/// Shared `reqwest` client builder for outbound HTTP calls.
#[cfg(feature = "http-client")]
pub mod httpclient;

/// Deterministic physical key derivation.
pub mod ids;

/// Pluggable LLM completion capability shared by the filter and
/// inspector workers.
pub mod llm;

/// Source registry persistence.
pub mod registry;

/// Retry and backoff primitives.
pub mod resilience;

/// Graceful shutdown coordination.
pub mod shutdown;

/// Vector + payload store adapter.
pub mod store;

/// Structured logging bootstrap.
pub mod telemetry;

/// Re-exports the types most binaries need at their call sites.
pub mod prelude {
    pub use crate::broker::{
        Broker, Delivery, HandlerOutcome, InMemoryBroker, PullSubscription, SubscribeOptions,
    };
    pub use crate::domain::{
        EventPayload, FilteredEvent, NewSource, PollSource, RankedEvent, RawEvent, RemovedSource,
        Source,
    };
    pub use crate::error::{SentinelError, SentinelResult};
    pub use crate::ids::physical_key;
    pub use crate::llm::{LlmCompletion, StubLlmClient};
    pub use crate::shutdown::{
        GracefulShutdown, ShutdownAwareTaskSpawner, ShutdownSignal, ShutdownToken,
    };
    pub use crate::store::{InMemoryVectorStore, VectorStore};
}
