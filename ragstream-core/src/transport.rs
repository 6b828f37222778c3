use async_trait::async_trait;

use crate::config::Config;
use crate::error::CoreResult;
use crate::http_client::{ByteStream, HttpClient, RequestCtx};
use crate::model::ChatStreamRequest;

/// Opens the response stream for one chat message.
///
/// The returned stream yields raw body chunks; how they are framed is not the transport's
/// concern. A failure before the body starts is returned as `Err`, a failure while reading is
/// yielded as an `Err` item.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Where requests go, for logs and telemetry.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    async fn open_stream(&self, message: &str, ctx: &RequestCtx<'_>) -> CoreResult<ByteStream>;
}

/// `POST {"message": ...}` to the backend's streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    http: HttpClient,
    url: String,
}

impl HttpChatTransport {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Ok(Self::new(HttpClient::new(&cfg.http)?, cfg.backend.chat_url()))
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    fn endpoint(&self) -> Option<&str> {
        Some(&self.url)
    }

    async fn open_stream(&self, message: &str, ctx: &RequestCtx<'_>) -> CoreResult<ByteStream> {
        let body = ChatStreamRequest {
            message: message.to_string(),
        };
        self.http
            .post_stream(&self.url, &body, &[("Content-Type", "application/json")], ctx)
            .await
    }
}
