use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;

use crate::error::BridgeError;
use crate::payload::ErrorDetails;

/// Log target for the bridge's own diagnostics.
pub const TARGET_NAME: &str = "span-bridge";

/// The span-emitting surface the bridge drives.
///
/// `Span` is the open-span handle kept in the correlation table between
/// `start` and `finish`. `Token` restores the execution context that was
/// current before [`TraceBackend::activate`]; both cross threads with the
/// correlation entry, so they must be `Send`.
///
/// Span emission may be asynchronous behind `end_span` (batching, export
/// buffers); that is the backend's concern, none of these methods block.
pub trait TraceBackend: Send + Sync + 'static {
    type Span: Send + 'static;
    type Token: Send + 'static;

    fn start_span(&self, name: &str, kind: SpanKind) -> Result<Self::Span, BridgeError>;

    /// Makes `span` the current execution context and returns the restore
    /// token for the context it replaced.
    fn activate(&self, span: &Self::Span) -> Self::Token;

    /// Restores the context captured by [`TraceBackend::activate`]. Must not
    /// panic: a stale or foreign token is reported, not fatal.
    fn restore(&self, token: Self::Token);

    fn set_attribute(&self, span: &mut Self::Span, attribute: KeyValue);

    fn add_attributes(&self, span: &mut Self::Span, attributes: Vec<KeyValue>) {
        for attribute in attributes {
            self.set_attribute(span, attribute);
        }
    }

    /// Records a structured `exception` event on the span.
    fn record_exception(&self, span: &mut Self::Span, error: &ErrorDetails);

    fn set_status(&self, span: &mut Self::Span, status: Status);

    fn end_span(&self, span: Self::Span);

    /// Non-fatal internal failures (failed span creation, bad name formatter)
    /// are surfaced here instead of breaking the instrumented event.
    fn report_error(&self, message: &str, error: &BridgeError) {
        tracing::error!(target: TARGET_NAME, error = %error, "{message}");
    }
}
