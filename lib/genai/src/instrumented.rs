use std::sync::Arc;

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::{KeyValue, StringValue, Value};
use span_bridge::{ErrorDetails, TraceBackend};

use crate::attributes;
use crate::client::{
    ChatClient, ChatRequest, ChatResponse, ClientError, EmbeddingRequest, EmbeddingResponse,
};
use crate::TARGET_NAME;

/// Operations instrumented on the client surface. The display form is the
/// `gen_ai.operation.name` attribute value.
#[derive(Debug, Clone, Copy, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
enum Operation {
    Chat,
    Embeddings,
}

impl Operation {
    fn output_type(self) -> &'static str {
        match self {
            Operation::Chat => "text",
            Operation::Embeddings => "embedding",
        }
    }
}

/// Instruments a [`ChatClient`] with client-kind GenAI spans.
///
/// This is a decorator composed at construction time: it implements the same
/// capability trait as the wrapped client and can be handed to anything that
/// takes a `ChatClient`. Instrumentation failures are reported through the
/// backend's error hook and the wrapped call proceeds unobserved.
pub struct InstrumentedClient<C, B> {
    inner: C,
    backend: Arc<B>,
    capture_content: bool,
}

impl<C: ChatClient, B: TraceBackend> InstrumentedClient<C, B> {
    pub fn new(inner: C, backend: Arc<B>) -> Self {
        InstrumentedClient {
            inner,
            backend,
            capture_content: false,
        }
    }

    /// Also log prompt and response content. Off by default: content is
    /// user data and often large.
    pub fn with_capture_content(mut self, capture_content: bool) -> Self {
        self.capture_content = capture_content;
        self
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn span_name(&self, operation: Operation, model: Option<&str>) -> String {
        match model {
            Some(model) if !model.is_empty() => format!("{operation} {model}"),
            _ => operation.to_string(),
        }
    }

    fn request_model(&self, model: Option<&String>) -> Option<String> {
        model
            .cloned()
            .or_else(|| self.inner.default_model().map(str::to_owned))
    }

    fn base_attributes(&self, operation: Operation, model: Option<&str>) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new(attributes::GEN_AI_OPERATION_NAME, operation.to_string()),
            KeyValue::new(
                attributes::GEN_AI_PROVIDER_NAME,
                normalized_provider(self.inner.provider()),
            ),
            KeyValue::new(attributes::GEN_AI_OUTPUT_TYPE, operation.output_type()),
        ];
        if let Some(model) = model {
            attributes.push(KeyValue::new(
                attributes::GEN_AI_REQUEST_MODEL,
                model.to_owned(),
            ));
        }
        attributes
    }

    fn record_failure(&self, span: &mut B::Span, error: &ClientError) {
        self.backend.set_attribute(
            span,
            KeyValue::new(attributes::ERROR_TYPE, error.kind.clone()),
        );
        self.backend.record_exception(
            span,
            &ErrorDetails::new(error.kind.clone(), error.message.clone()),
        );
        self.backend.set_status(span, Status::error(error.message.clone()));
    }
}

impl<C: ChatClient, B: TraceBackend> ChatClient for InstrumentedClient<C, B> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn default_model(&self) -> Option<&str> {
        self.inner.default_model()
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let model = self.request_model(request.model.as_ref());
        let name = self.span_name(Operation::Chat, model.as_deref());
        let mut span = match self.backend.start_span(&name, SpanKind::Client) {
            Ok(span) => span,
            Err(error) => {
                self.backend
                    .report_error("failed to start span for chat operation", &error);
                return self.inner.chat(request);
            }
        };

        let mut attributes = self.base_attributes(Operation::Chat, model.as_deref());
        if let Some(temperature) = request.temperature {
            attributes.push(KeyValue::new(
                attributes::GEN_AI_REQUEST_TEMPERATURE,
                temperature,
            ));
        }
        if let Some(max_tokens) = request.max_tokens {
            attributes.push(KeyValue::new(
                attributes::GEN_AI_REQUEST_MAX_TOKENS,
                max_tokens,
            ));
        }
        if let Some(top_p) = request.top_p {
            attributes.push(KeyValue::new(attributes::GEN_AI_REQUEST_TOP_P, top_p));
        }
        if !request.stop_sequences.is_empty() {
            attributes.push(KeyValue::new(
                attributes::GEN_AI_REQUEST_STOP_SEQUENCES,
                Value::Array(string_array(&request.stop_sequences)),
            ));
        }
        self.backend.add_attributes(&mut span, attributes);

        if self.capture_content {
            for message in &request.messages {
                tracing::debug!(
                    target: TARGET_NAME,
                    role = %message.role,
                    content = %message.content,
                    "gen_ai message"
                );
            }
        }

        let result = self.inner.chat(request);
        match &result {
            Ok(response) => {
                let mut attributes = Vec::new();
                if let Some(model) = &response.model {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_RESPONSE_MODEL,
                        model.clone(),
                    ));
                }
                if let Some(id) = &response.id {
                    attributes.push(KeyValue::new(attributes::GEN_AI_RESPONSE_ID, id.clone()));
                }
                if let Some(input_tokens) = response.input_tokens {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_USAGE_INPUT_TOKENS,
                        input_tokens,
                    ));
                }
                if let Some(output_tokens) = response.output_tokens {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_USAGE_OUTPUT_TOKENS,
                        output_tokens,
                    ));
                }
                if !response.finish_reasons.is_empty() {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_RESPONSE_FINISH_REASONS,
                        Value::Array(string_array(&response.finish_reasons)),
                    ));
                }
                self.backend.add_attributes(&mut span, attributes);

                if self.capture_content {
                    tracing::debug!(
                        target: TARGET_NAME,
                        content = %response.content,
                        "gen_ai choice"
                    );
                }
            }
            Err(error) => self.record_failure(&mut span, error),
        }
        self.backend.end_span(span);
        result
    }

    fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse, ClientError> {
        let model = self.request_model(request.model.as_ref());
        let name = self.span_name(Operation::Embeddings, model.as_deref());
        let mut span = match self.backend.start_span(&name, SpanKind::Client) {
            Ok(span) => span,
            Err(error) => {
                self.backend
                    .report_error("failed to start span for embeddings operation", &error);
                return self.inner.embed(request);
            }
        };

        let mut attributes = self.base_attributes(Operation::Embeddings, model.as_deref());
        if let Some(dimensions) = request.dimensions {
            attributes.push(KeyValue::new(
                attributes::GEN_AI_REQUEST_DIMENSIONS,
                dimensions,
            ));
        }
        self.backend.add_attributes(&mut span, attributes);

        let result = self.inner.embed(request);
        match &result {
            Ok(response) => {
                let mut attributes = Vec::new();
                if let Some(model) = &response.model {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_RESPONSE_MODEL,
                        model.clone(),
                    ));
                }
                if !response.embedding.is_empty() {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_EMBEDDINGS_DIMENSION_COUNT,
                        response.embedding.len() as i64,
                    ));
                }
                if let Some(input_tokens) = response.input_tokens {
                    attributes.push(KeyValue::new(
                        attributes::GEN_AI_USAGE_INPUT_TOKENS,
                        input_tokens,
                    ));
                }
                self.backend.add_attributes(&mut span, attributes);
            }
            Err(error) => self.record_failure(&mut span, error),
        }
        self.backend.end_span(span);
        result
    }
}

fn string_array(values: &[String]) -> opentelemetry::Array {
    values
        .iter()
        .map(|value| StringValue::from(value.clone()))
        .collect::<Vec<_>>()
        .into()
}

/// Normalizes a client-reported provider name to the semantic-convention
/// value, falling back to the lowercased raw name.
fn normalized_provider(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    for (needle, normalized) in [
        ("openai", "openai"),
        ("anthropic", "anthropic"),
        ("googlegemini", "google"),
        ("googlevertexai", "google"),
        ("googlepalm", "google"),
        ("cohere", "cohere"),
        ("ai21", "ai21"),
        ("huggingface", "huggingface"),
        ("ollama", "ollama"),
        ("azure", "azure"),
        ("replicate", "replicate"),
        ("llamacpp", "llamacpp"),
        ("mistral", "mistralai"),
    ] {
        if lowered.contains(needle) {
            return normalized.to_owned();
        }
    }
    lowered
}
