use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::error::ProxyError;

/// Inbound request headers copied to the upstream call. Everything else is
/// dropped so client-identifying headers never cross the proxy boundary.
pub const FORWARDED_REQUEST_HEADERS: [&str; 3] = ["authorization", "x-api-key", "anthropic-version"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP transport for upstream dispatch.
///
/// One pooled client for the process lifetime; redirects are never followed
/// (the validated URL is the URL that gets fetched). Only the connect phase
/// carries a timeout: streamed completions can outlive any fixed budget.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .tcp_nodelay(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap_or_else(|err| {
                tracing::error!(error = %err, "failed to build configured HTTP client, falling back to defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Forward a request to the validated upstream URL.
    ///
    /// Copies only the whitelisted headers from the inbound request and
    /// always sets `Content-Type: application/json` on body-carrying methods.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] on connection, TLS, or protocol
    /// failures. Upstream HTTP error statuses are not errors here; the
    /// response is returned for the caller to mirror.
    pub async fn forward(
        &self,
        method: Method,
        url: &url::Url,
        inbound_headers: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, ProxyError> {
        let mut headers = HeaderMap::new();
        for name in FORWARDED_REQUEST_HEADERS {
            if let Some(value) = inbound_headers.get(name) {
                headers.insert(name, value.clone());
            }
        }
        if method != Method::GET && method != Method::HEAD {
            headers.insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/json"),
            );
        }

        let mut request = self.client.request(method.clone(), url.clone()).headers(headers);
        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = body {
                request = request.body(body);
            }
        }

        request
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}
