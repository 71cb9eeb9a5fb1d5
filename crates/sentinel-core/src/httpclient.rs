//! Shared `reqwest` client builder for outbound HTTP calls: the
//! connector's scrape fetch and any LLM provider call, both of which are
//! explicit await boundaries with their own timeout per §5.

use std::time::Duration;

/// Builds a client with `timeout` as its per-request deadline. Used by
/// the connector (15s scrape timeout, §5) and by filter/inspector's LLM
/// provider clients (provider-specific timeout, §5).
pub fn client_with_timeout(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_client_with_the_requested_timeout() {
        let client = client_with_timeout(Duration::from_secs(15));
        assert!(client.is_ok());
    }
}
