//! HTTP client facade over a `Balancer`: convenience `get`/`post`/`request`
//! methods that serialize/deserialize JSON payloads, plus the transport
//! implementation (`HyperTransport`) that balancers dispatch through.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::base::{Balancer, BalancerBody, Transport};
use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::BalancerError;

/// Total attempts per logical request: one initial try plus three retries,
/// as long as the previous attempt errored or returned a >= 400 status.
const TOTAL_ATTEMPTS: u32 = 4;

/// `Transport` backed by a real `hyper-util` legacy client over TLS, bounded
/// by `options.timeout` (seconds; <= 0 falls back to the 30s default).
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, BalancerBody>,
    timeout: Duration,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::with_timeout_secs(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout_secs(timeout_secs: i64) -> Self {
        let secs = if timeout_secs <= 0 {
            DEFAULT_TIMEOUT_SECS
        } else {
            timeout_secs
        };
        let https = HttpsConnector::new();
        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
            timeout: Duration::from_secs(secs as u64),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for HyperTransport {
    async fn send(
        &self,
        req: Request<BalancerBody>,
    ) -> Result<Response<BalancerBody>, BalancerError> {
        let resp = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| BalancerError::Transport("request timed out".to_string()))?
            .map_err(|e| BalancerError::Transport(e.to_string()))?;
        let (parts, body) = resp.into_parts();
        let boxed = body
            .map_err(|e| BalancerError::Transport(e.to_string()))
            .boxed();
        Ok(Response::from_parts(parts, boxed))
    }
}

fn empty_body() -> BalancerBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn bytes_body(payload: Bytes) -> BalancerBody {
    Full::new(payload)
        .map_err(|never| match never {})
        .boxed()
}

/// Facade over a `Balancer` instance: builds requests from method/URL/
/// header/payload components and retries failed attempts.
pub struct HttpClient {
    balancer: Arc<dyn Balancer>,
}

impl HttpClient {
    pub fn new(balancer: Arc<dyn Balancer>) -> Self {
        Self { balancer }
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, BalancerError> {
        self.get_with_header(url, &HashMap::new()).await
    }

    pub async fn get_with_header<T: DeserializeOwned>(
        &self,
        url: &str,
        header: &HashMap<String, String>,
    ) -> Result<T, BalancerError> {
        self.request("GET", url, header, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        payload: &impl Serialize,
    ) -> Result<T, BalancerError> {
        self.post_with_header(url, &HashMap::new(), payload).await
    }

    pub async fn post_with_header<T: DeserializeOwned>(
        &self,
        url: &str,
        header: &HashMap<String, String>,
        payload: &impl Serialize,
    ) -> Result<T, BalancerError> {
        let body = serde_json::to_vec(payload).map_err(|e| BalancerError::Transport(e.to_string()))?;
        self.request("POST", url, header, Some(Bytes::from(body))).await
    }

    /// Sends `method url` with the given headers and optional payload,
    /// retrying failed attempts, and deserializes the response body as JSON.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        header: &HashMap<String, String>,
        payload: Option<Bytes>,
    ) -> Result<T, BalancerError> {
        let resp = self.do_with_retry(method, url, header, payload).await?;
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| BalancerError::Transport(e.to_string()))?
            .to_bytes();
        serde_json::from_slice(&body).map_err(|e| BalancerError::Transport(e.to_string()))
    }

    async fn do_with_retry(
        &self,
        method: &str,
        url: &str,
        header: &HashMap<String, String>,
        payload: Option<Bytes>,
    ) -> Result<Response<BalancerBody>, BalancerError> {
        let mut attempt = 0;
        let mut last = self.do_once(method, url, header, payload.clone()).await;

        while !is_success(&last) && attempt + 1 < TOTAL_ATTEMPTS {
            attempt += 1;
            last = self.do_once(method, url, header, payload.clone()).await;
        }

        last
    }

    async fn do_once(
        &self,
        method: &str,
        url: &str,
        header: &HashMap<String, String>,
        payload: Option<Bytes>,
    ) -> Result<Response<BalancerBody>, BalancerError> {
        let mut builder = Request::builder()
            .method(method)
            .uri(url)
            .header("Content-Type", "application/json");
        for (k, v) in header {
            builder = builder.header(k, v);
        }

        let body = match payload {
            Some(bytes) => bytes_body(bytes),
            None => empty_body(),
        };

        let req = builder
            .body(body)
            .map_err(|e| BalancerError::Transport(e.to_string()))?;

        self.balancer.do_request(req).await
    }
}

fn is_success(result: &Result<Response<BalancerBody>, BalancerError>) -> bool {
    matches!(result, Ok(resp) if resp.status().as_u16() < 400)
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    #[test]
    fn non_positive_timeout_falls_back_to_default() {
        let t = HyperTransport::with_timeout_secs(0);
        assert_eq!(t.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64));

        let t = HyperTransport::with_timeout_secs(-5);
        assert_eq!(t.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64));
    }

    #[test]
    fn positive_timeout_is_used_verbatim() {
        let t = HyperTransport::with_timeout_secs(7);
        assert_eq!(t.timeout, Duration::from_secs(7));
    }
}
