use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{CoreResult, RagStreamError};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_ERROR_PLACEHOLDER: &str = "Connection error. Please check backend.";

fn default_chat_path() -> String {
    "/chat/stream".into()
}
fn default_documents_path() -> String {
    "/documents".into()
}
fn default_login_path() -> String {
    "/auth/login".into()
}
fn default_health_path() -> String {
    "/".into()
}
fn default_upload_path() -> String {
    "/upload".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackendCfg {
    /// Scheme, host and port of the RAG backend, without a trailing slash.
    pub base_url: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default = "default_documents_path")]
    pub documents_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Multipart document upload; admin sessions only.
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

impl BackendCfg {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            chat_path: default_chat_path(),
            documents_path: default_documents_path(),
            login_path: default_login_path(),
            health_path: default_health_path(),
            upload_path: default_upload_path(),
        }
    }

    /// Join `path` onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn chat_url(&self) -> String {
        self.url(&self.chat_path)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Timeout for non-streaming JSON calls in milliseconds (default 60000ms).
    /// The chat stream itself has no read timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_error_placeholder() -> String {
    DEFAULT_ERROR_PLACEHOLDER.into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConversationCfg {
    /// Shown in an assistant turn whose stream failed before any content arrived.
    #[serde(default = "default_error_placeholder")]
    pub error_placeholder: String,
    /// Optional first assistant turn of a new conversation.
    #[serde(default)]
    pub greeting: Option<String>,
}

impl Default for ConversationCfg {
    fn default() -> Self {
        Self {
            error_placeholder: default_error_placeholder(),
            greeting: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendCfg,
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub conversation: ConversationCfg,
}

impl Config {
    /// Defaults around a backend base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            backend: BackendCfg::new(base_url),
            http: HttpCfg::default(),
            conversation: ConversationCfg::default(),
        }
    }

    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(RagStreamError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| RagStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| RagStreamError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| RagStreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| RagStreamError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| RagStreamError::Other(e.into())))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        let base = self.backend.base_url.trim();
        if base.is_empty() {
            return Err(RagStreamError::Validation("backend.base_url is empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(RagStreamError::Validation(format!(
                "backend.base_url must be http(s): '{base}'"
            )));
        }
        for (name, path) in [
            ("chat_path", &self.backend.chat_path),
            ("documents_path", &self.backend.documents_path),
            ("login_path", &self.backend.login_path),
            ("health_path", &self.backend.health_path),
            ("upload_path", &self.backend.upload_path),
        ] {
            if !path.starts_with('/') {
                return Err(RagStreamError::Validation(format!(
                    "backend.{name} must start with '/': '{path}'"
                )));
            }
        }
        Ok(())
    }
}
