use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use reqwest::multipart::Form;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, RagStreamError};

/// Request context carries tracing IDs forwarded to the backend.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub turn_id: Option<&'a str>,
}

/// Raw response body chunks, in arrival order. A transport failure mid-body is yielded as an
/// `Err` item; the stream ends after it.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpClient {
    pub fn new(cfg: &HttpCfg) -> CoreResult<Self> {
        // No client-wide total timeout: it would also cut long chat streams.
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(cfg.connect_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RagStreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("ragstream/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    pub fn new_default() -> CoreResult<Self> {
        Self::new(&HttpCfg::default())
    }

    fn request(
        &self,
        req: reqwest::RequestBuilder,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> reqwest::RequestBuilder {
        let mut req = req.header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(tid) = ctx.turn_id {
            req = req.header("X-Turn-Id", tid);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, u32)> {
        let req = self
            .request(self.inner.post(url).json(body), headers, ctx)
            .timeout(self.request_timeout);
        self.send_json(url, req).await
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<(R, u32)> {
        let req = self
            .request(self.inner.get(url), headers, ctx)
            .timeout(self.request_timeout);
        self.send_json(url, req).await
    }

    /// POST a multipart form with `query` parameters; the response body is not inspected.
    /// Returns the latency in milliseconds.
    pub async fn post_multipart(
        &self,
        url: &str,
        form: Form,
        query: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<u32> {
        let req = self
            .request(self.inner.post(url).query(query).multipart(form), &[], ctx)
            .timeout(self.request_timeout);
        let (_resp, latency) = self.send_checked(url, req).await?;
        Ok(latency)
    }

    /// Send and turn transport failures and non-success statuses into errors.
    async fn send_checked(
        &self,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> CoreResult<(Response, u32)> {
        let start = Instant::now();
        let resp = req.send().await.map_err(|e| {
            tracing::debug!(url, error = %e, "request failed");
            RagStreamError::BackendUnavailable {
                endpoint: url.to_string(),
            }
        })?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, &text));
        }
        Ok((resp, latency))
    }

    async fn send_json<R: DeserializeOwned>(
        &self,
        url: &str,
        req: reqwest::RequestBuilder,
    ) -> CoreResult<(R, u32)> {
        let (resp, latency) = self.send_checked(url, req).await?;
        let status = resp.status();
        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| RagStreamError::BackendError {
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })?;
        Ok((parsed, latency))
    }

    /// POST JSON and return the raw response body as a chunk stream.
    /// Only the connect phase is bounded by a timeout; reads may block indefinitely.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ByteStream> {
        let req = self
            .request(self.inner.post(url).json(body), headers, ctx)
            .header("Accept", "text/event-stream");

        let resp = req.send().await.map_err(|e| {
            tracing::debug!(url, error = %e, "stream request failed");
            RagStreamError::BackendUnavailable {
                endpoint: url.to_string(),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, &body));
        }

        let endpoint = url.to_string();
        let chunks = resp.bytes_stream().map(move |item| {
            item.map_err(|e| {
                tracing::debug!(url = %endpoint, error = %e, "stream read failed");
                RagStreamError::BackendUnavailable {
                    endpoint: endpoint.clone(),
                }
            })
        });
        Ok(Box::pin(chunks))
    }
}

fn map_http_error(endpoint: &str, status: StatusCode, body: &str) -> RagStreamError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RagStreamError::Unauthorized,
        s if s.is_server_error() => RagStreamError::BackendUnavailable {
            endpoint: endpoint.to_string(),
        },
        s => RagStreamError::BackendError {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => {
            let mut t = s[..cut].to_string();
            t.push_str("...");
            t
        }
        None => s.to_string(),
    }
}
