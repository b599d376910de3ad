//! Session builder and HTTP client configuration.

use crate::error::SessionError;
use crate::reconnect::ReconnectConfig;
use crate::session::Session;
use reqwest::Url;
use std::time::Duration;

/// Builder for configuring a [`Session`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct SessionBuilder {
    uri: String,
    token: String,
    config: ReconnectConfig,
    http_client: Option<reqwest::Client>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("uri", &self.uri)
            .field("config", &self.config)
            .field("has_http_client", &self.http_client.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// Create a new session builder.
    pub fn new(uri: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            token: token.into(),
            config: ReconnectConfig::default(),
            http_client: None,
        }
    }

    /// Set the wait before each reconnect attempt.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the longest silence tolerated on an open stream.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the whole reconnect configuration.
    pub fn config(mut self, config: ReconnectConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing HTTP client (proxies, TLS roots, user agent...).
    ///
    /// Do not set a total request timeout on it: the stream is meant to stay
    /// open indefinitely. Silence is handled by the idle timeout instead.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the session.
    ///
    /// Returns an error if the URI is not an absolute http(s) URI, the
    /// configuration is invalid, or the HTTP client fails to build
    /// (e.g., due to TLS configuration issues).
    pub fn build(self) -> Result<Session, SessionError> {
        self.config.validate()?;

        let uri = Url::parse(&self.uri).map_err(|e| SessionError::InvalidUri {
            uri: self.uri.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(uri.scheme(), "http" | "https") {
            return Err(SessionError::InvalidUri {
                uri: self.uri,
                reason: format!("unsupported scheme `{}`", uri.scheme()),
            });
        }

        let http = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| SessionError::Config(format!("failed to build HTTP client: {}", e)))?,
        };

        Ok(Session::from_parts(uri, self.token, self.config, http))
    }
}
