use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Open,
    Closed,
    /// Transport failed before any content arrived; content holds the placeholder.
    Errored,
}

/// A passage of an uploaded document backing an assistant answer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Citation {
    pub document_name: String,
    /// 1-based.
    pub page_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text_snippet: String,
    /// Retrieval score, passed through unvalidated.
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: f64,
}

/// Optional wire fields may be absent or `null`.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Option::unwrap_or_default)
}

impl Citation {
    /// Required fields: a non-empty document name and a positive page number.
    pub fn is_valid(&self) -> bool {
        !self.document_name.trim().is_empty() && self.page_number >= 1
    }
}

/// Body of the streaming chat request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatStreamRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub model_loaded: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
}
