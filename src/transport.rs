//! HTTP transport for a single stream connection.

use crate::error::SessionError;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Query parameter carrying the caller's token.
pub(crate) const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Build the request URL: the stream URI with the token appended.
pub(crate) fn request_url(uri: &Url, token: &str) -> Url {
    let mut url = uri.clone();
    url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
    url
}

/// Scheme, host and port of a URI.
pub(crate) fn origin(uri: &Url) -> String {
    uri.origin().ascii_serialization()
}

/// The body of an accepted stream response.
///
/// Dropping it closes the connection.
pub(crate) struct BodyChunks {
    uri: String,
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for BodyChunks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyChunks")
            .field("uri", &self.uri)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl BodyChunks {
    /// Wait for the next body chunk.
    ///
    /// Returns `Ok(None)` once the server ends the body. Silence longer than
    /// the idle timeout fails with [`SessionError::IdleTimeout`].
    pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>, SessionError> {
        match timeout(self.idle_timeout, self.chunks.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(SessionError::network(&self.uri, e.without_url())),
            Ok(None) => Ok(None),
            Err(_) => Err(SessionError::IdleTimeout {
                after: self.idle_timeout,
            }),
        }
    }
}

/// Issue the stream request and wait for the response to begin.
///
/// A non-200 response is read in full; its body is parsed as JSON when
/// possible and otherwise kept as the raw text.
pub(crate) async fn open(
    client: &reqwest::Client,
    uri: &Url,
    token: &str,
    idle_timeout: Duration,
) -> Result<BodyChunks, SessionError> {
    let req = client.get(request_url(uri, token));

    let resp = timeout(idle_timeout, req.send())
        .await
        .map_err(|_| SessionError::IdleTimeout {
            after: idle_timeout,
        })?
        .map_err(|e| SessionError::network(uri.as_str(), e.without_url()))?;

    let status = resp.status().as_u16();
    debug!(uri = %uri, status, "stream response");

    if status != 200 {
        let text = timeout(idle_timeout, resp.text())
            .await
            .map_err(|_| SessionError::IdleTimeout {
                after: idle_timeout,
            })?
            .map_err(|e| SessionError::network(uri.as_str(), e.without_url()))?;

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(json) => json,
            Err(_) => Value::String(text),
        };
        return Err(SessionError::from_status(status, body));
    }

    Ok(BodyChunks {
        uri: uri.to_string(),
        chunks: resp.bytes_stream().boxed(),
        idle_timeout,
    })
}
