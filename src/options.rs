// ABOUTME: Configuration options for the engine and the fluent ExecutorBuilder.
// ABOUTME: Mirrors the fetch-layer knobs: timeout, user agent, private-network policy, headers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::executor::Executor;
use crate::source::BookSource;

/// Configuration options for an Executor.
#[derive(Debug, Clone)]
pub struct Options {
    pub timeout: Duration,
    pub user_agent: String,
    /// Allow fetches to loopback/private addresses. Off by default; tests
    /// against a local mock server turn it on. The script sandbox's `ajax`
    /// destination guard is not affected by this flag.
    pub allow_private_networks: bool,
    pub http_client: Option<reqwest::Client>,
    /// Extra headers merged over the source's own header map.
    pub headers: HashMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Ruleshelf/0.1".to_string(),
            allow_private_networks: false,
            http_client: None,
            headers: HashMap::new(),
        }
    }
}

/// Builder for constructing Executor instances with custom configuration.
pub struct ExecutorBuilder {
    source: Arc<BookSource>,
    opts: Options,
}

impl ExecutorBuilder {
    pub fn new(source: Arc<BookSource>) -> Self {
        Self {
            source,
            opts: Options::default(),
        }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    /// Allow or disallow requests to private networks.
    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.opts.allow_private_networks = allow;
        self
    }

    /// Use a custom HTTP client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.opts.http_client = Some(client);
        self
    }

    /// Add a custom header to all requests.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.headers.insert(key.into(), value.into());
        self
    }

    /// Build the Executor with the configured options.
    pub fn build(self) -> Executor {
        Executor::new(self.source, self.opts)
    }
}
