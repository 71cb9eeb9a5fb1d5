//! Transient-failure handling shared by the broker's reconnect policy and
//! any outbound call a worker makes (scraper fetch, LLM classification).

mod retry;

pub use retry::{
    AlwaysRetry, NeverRetry, RetryBudget, RetryConfig, RetryError, RetryExecutor, RetryPolicy,
};
