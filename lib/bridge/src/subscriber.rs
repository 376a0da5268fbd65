use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;

use crate::backend::{TraceBackend, TARGET_NAME};
use crate::error::BridgeError;
use crate::payload::Payload;
use crate::sanitize::{self, sanitized_attributes};

/// Formats an event name into a span display name. Returning `None` or an
/// empty string falls back to the raw event name.
pub type NameFormatter = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Rewrites a payload before sanitation. Receives the payload with the
/// reserved handoff keys already stripped; its output replaces the payload.
pub type PayloadTransform = Arc<dyn Fn(&Payload) -> Payload + Send + Sync>;

/// Span name formatter that reverses dot-separated event name segments:
/// `"bar.foo"` becomes `"foo bar"`.
pub fn reversed_name_formatter(event_name: &str) -> Option<String> {
    let mut segments: Vec<&str> = event_name.split('.').collect();
    segments.reverse();
    Some(segments.join(" "))
}

/// Per-subscription options; the defaults match a bare subscription (internal
/// span kind, empty denylist, raw event names, untransformed payloads).
#[derive(Clone)]
pub struct SubscribeOptions {
    pub kind: SpanKind,
    pub denylist: Vec<String>,
    pub name_formatter: Option<NameFormatter>,
    pub payload_transform: Option<PayloadTransform>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions {
            kind: SpanKind::Internal,
            denylist: Vec::new(),
            name_formatter: None,
            payload_transform: None,
        }
    }
}

impl SubscribeOptions {
    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn denylist(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.denylist = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn name_formatter(
        mut self,
        formatter: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.name_formatter = Some(Arc::new(formatter));
        self
    }

    pub fn payload_transform(
        mut self,
        transform: impl Fn(&Payload) -> Payload + Send + Sync + 'static,
    ) -> Self {
        self.payload_transform = Some(Arc::new(transform));
        self
    }
}

/// The start-to-finish binding of a span and context token to one event
/// instance, for explicit handoff between [`SpanSubscriber::begin`] and
/// [`SpanSubscriber::complete`].
pub struct CorrelationEntry<B: TraceBackend> {
    span: B::Span,
    token: B::Token,
}

/// Turns bus events into spans: opens and activates a span on `start`,
/// sanitizes the payload and closes the span on `finish`.
///
/// One subscriber serves a whole channel; per-event state lives in the
/// correlation table keyed by the bus-supplied event instance id, so events
/// may overlap freely across threads. An entry whose `finish` never arrives
/// leaks, matching the host bus's own contract.
pub struct SpanSubscriber<B: TraceBackend> {
    backend: Arc<B>,
    kind: SpanKind,
    denylist: HashSet<String>,
    name_formatter: Option<NameFormatter>,
    payload_transform: Option<PayloadTransform>,
    in_flight: DashMap<String, CorrelationEntry<B>>,
}

impl<B: TraceBackend> SpanSubscriber<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_options(backend, SubscribeOptions::default())
    }

    pub fn with_options(backend: Arc<B>, options: SubscribeOptions) -> Self {
        SpanSubscriber {
            backend,
            kind: options.kind,
            denylist: options.denylist.into_iter().collect(),
            name_formatter: options.name_formatter,
            payload_transform: options.payload_transform,
            in_flight: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Opens and activates a span for `event_name`, returning the correlation
    /// entry for explicit handoff. The bus-facing [`SpanSubscriber::start`]
    /// stores the entry in the correlation table instead.
    pub fn begin(&self, event_name: &str) -> Result<CorrelationEntry<B>, BridgeError> {
        let name = self.span_name(event_name);
        let span = self.backend.start_span(&name, self.kind.clone())?;
        let token = self.backend.activate(&span);
        Ok(CorrelationEntry { span, token })
    }

    /// Closes an explicitly-held entry: restores the prior context first,
    /// then sanitizes `payload` into attributes, applies the designated
    /// exception as status and event, and ends the span.
    ///
    /// The span is ended on every exit path; a panicking payload transform
    /// propagates only after the span has been closed.
    pub fn complete(&self, entry: CorrelationEntry<B>, payload: &Payload) {
        let CorrelationEntry { span, token } = entry;
        self.backend.restore(token);

        let mut closer = SpanCloser {
            backend: self.backend.as_ref(),
            span: Some(span),
        };
        let attributes = self.attributes_for(payload);
        if let Some(span) = closer.span.as_mut() {
            self.backend.add_attributes(span, attributes);
            if let Some(error) = sanitize::designated_exception(payload) {
                self.backend.set_status(
                    span,
                    Status::error(format!(
                        "Unhandled exception of type: {}",
                        error.type_name
                    )),
                );
                self.backend.record_exception(span, error);
            }
        }
    }

    /// Bus-facing start callback. Never fails: a backend failure is reported
    /// through the error hook and the event proceeds unobserved.
    pub fn start(&self, event_name: &str, event_id: &str, _payload: &Payload) {
        match self.begin(event_name) {
            Ok(entry) => {
                self.in_flight.insert(event_id.to_owned(), entry);
            }
            Err(error) => {
                self.backend
                    .report_error("failed to start span for event", &error);
            }
        }
    }

    /// Bus-facing finish callback. An unknown event id is a lookup miss, not
    /// an error; the bus may legitimately deliver finish for events whose
    /// start the bridge never observed.
    pub fn finish(&self, event_name: &str, event_id: &str, payload: &Payload) {
        let Some((_, entry)) = self.in_flight.remove(event_id) else {
            tracing::debug!(
                target: TARGET_NAME,
                event_name,
                event_id,
                "finish without matching start"
            );
            return;
        };
        self.complete(entry, payload);
    }

    fn span_name(&self, event_name: &str) -> String {
        let Some(formatter) = &self.name_formatter else {
            return event_name.to_owned();
        };
        match panic::catch_unwind(AssertUnwindSafe(|| formatter(event_name))) {
            Ok(Some(name)) if !name.is_empty() => name,
            Ok(_) => {
                self.backend.report_error(
                    "span name formatter produced no name, using the event name",
                    &BridgeError::NameFormatter("empty span name".to_owned()),
                );
                event_name.to_owned()
            }
            Err(panic) => {
                self.backend.report_error(
                    "span name formatter panicked, using the event name",
                    &BridgeError::NameFormatter(panic_message(panic.as_ref())),
                );
                event_name.to_owned()
            }
        }
    }

    fn attributes_for(&self, payload: &Payload) -> Vec<KeyValue> {
        match &self.payload_transform {
            Some(transform) => {
                let mut stripped = payload.clone();
                stripped.retain(|key, _| !sanitize::is_reserved_key(key));
                // A panicking transform is a caller-configuration bug and
                // propagates; the span is still closed by the caller's guard.
                let transformed = transform(&stripped);
                sanitized_attributes(&transformed, &self.denylist)
            }
            None => sanitized_attributes(payload, &self.denylist),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_owned()
    }
}

/// Ends the span on drop so [`SpanSubscriber::complete`] closes it on every
/// exit path, including unwinds out of a payload transform.
struct SpanCloser<'a, B: TraceBackend> {
    backend: &'a B,
    span: Option<B::Span>,
}

impl<B: TraceBackend> Drop for SpanCloser<'_, B> {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            self.backend.end_span(span);
        }
    }
}
