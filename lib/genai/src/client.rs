/// Capability surface of an LLM client, implemented by concrete clients and
/// by [`crate::InstrumentedClient`]. Instrumentation composes over this trait
/// at construction time; nothing is injected into the wrapped client.
pub trait ChatClient: Send + Sync {
    /// Provider identifier as reported by the client, e.g. `"OpenAI"`.
    fn provider(&self) -> &str;

    /// Default model used when a request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;

    fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ClientError>;
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub model: Option<String>,
    pub id: Option<String>,
    pub content: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub finish_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingRequest {
    pub model: Option<String>,
    pub input: String,
    pub dimensions: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingResponse {
    pub model: Option<String>,
    pub embedding: Vec<f64>,
    pub input_tokens: Option<i64>,
}

/// Error surface shared by all providers: a machine-readable kind (used as
/// `error.type`) and a human-readable message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: String,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
