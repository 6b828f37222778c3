//! Non-streaming calls against the RAG backend: health, login, the document list and uploads.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{BackendCfg, Config};
use crate::error::{CoreResult, RagStreamError};
use crate::http_client::{HttpClient, RequestCtx};
use crate::model::{DocumentSummary, HealthStatus};

pub const ROLE_ADMIN: &str = "admin";

/// File types the backend indexes.
pub const UPLOAD_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];

const UPLOAD_TOKEN_PARAM: &str = "user_token";

/// Credentials issued by a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SecretString,
    pub role: String,
}

impl Session {
    /// Admins may upload documents.
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Raw token, for the query parameter the backend expects it in.
    pub fn expose_token(&self) -> &str {
        self.token.expose_secret()
    }
}

#[derive(Serialize)]
struct LoginReq<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResp {
    token: String,
    role: String,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: HttpClient,
    cfg: BackendCfg,
}

impl BackendClient {
    pub fn new(http: HttpClient, cfg: BackendCfg) -> Self {
        Self { http, cfg }
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Ok(Self::new(HttpClient::new(&cfg.http)?, cfg.backend.clone()))
    }

    pub async fn health(&self) -> CoreResult<HealthStatus> {
        let url = self.cfg.url(&self.cfg.health_path);
        let (status, latency_ms) = self
            .http
            .get_json::<HealthStatus>(&url, &[], &RequestCtx::default())
            .await?;
        tracing::debug!(latency_ms, model_loaded = status.model_loaded, "health checked");
        Ok(status)
    }

    /// Exchange username/password for a session. Rejected credentials map to `Unauthorized`.
    pub async fn login(&self, username: &str, password: &SecretString) -> CoreResult<Session> {
        let url = self.cfg.url(&self.cfg.login_path);
        let body = LoginReq {
            username,
            password: password.expose_secret(),
        };
        let (resp, _latency) = self
            .http
            .post_json::<_, LoginResp>(&url, &body, &[], &RequestCtx::default())
            .await?;
        tracing::info!(username, role = %resp.role, "logged in");
        Ok(Session {
            token: SecretString::from(resp.token),
            role: resp.role,
        })
    }

    pub async fn list_documents(&self) -> CoreResult<Vec<DocumentSummary>> {
        let url = self.cfg.url(&self.cfg.documents_path);
        let (docs, _latency) = self
            .http
            .get_json::<Vec<DocumentSummary>>(&url, &[], &RequestCtx::default())
            .await?;
        Ok(docs)
    }

    /// Upload one document for indexing as multipart field `file`. Requires an admin session;
    /// the session token travels as the `user_token` query parameter.
    pub async fn upload(&self, session: &Session, path: &Path) -> CoreResult<()> {
        if !session.is_admin() {
            return Err(RagStreamError::Unauthorized);
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RagStreamError::Validation(format!("not a file path: {}", path.display()))
            })?
            .to_owned();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
            return Err(RagStreamError::Validation(format!(
                "unsupported document type '{file_name}' (expected one of {})",
                UPLOAD_EXTENSIONS.join(", ")
            )));
        }

        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.clone()));
        let url = self.cfg.url(&self.cfg.upload_path);
        let latency_ms = self
            .http
            .post_multipart(
                &url,
                form,
                &[(UPLOAD_TOKEN_PARAM, session.expose_token())],
                &RequestCtx::default(),
            )
            .await?;
        tracing::info!(file = %file_name, size, latency_ms, "document uploaded");
        Ok(())
    }
}
