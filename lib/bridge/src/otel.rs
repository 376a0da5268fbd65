use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::trace::{SpanBuilder, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, ContextGuard, KeyValue};

use crate::attributes;
use crate::backend::TraceBackend;
use crate::error::BridgeError;
use crate::payload::ErrorDetails;

thread_local! {
    /// Activation guards for this thread, innermost last. Guards must drop in
    /// reverse activation order to restore the prior context correctly.
    static ACTIVE_GUARDS: RefCell<Vec<(u64, ContextGuard)>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Token restoring the context that was current before
/// [`OtelBackend::activate`] on the activating thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken(u64);

/// Drives spans through any `opentelemetry` tracer.
///
/// Span handles are [`Context`] values carrying the started span, so nested
/// events parent onto the currently active span. The OpenTelemetry context is
/// guard-scoped per thread; activation pushes a guard onto a thread-local
/// stack and `restore` pops back down to the matching token. Restoring a
/// token on a different thread cannot touch the originating thread's stack
/// and is reported through the error hook instead.
pub struct OtelBackend<T> {
    tracer: T,
}

impl<T> OtelBackend<T> {
    pub fn new(tracer: T) -> Self {
        OtelBackend { tracer }
    }
}

impl<T> TraceBackend for OtelBackend<T>
where
    T: Tracer + Send + Sync + 'static,
    T::Span: Send + Sync + 'static,
{
    type Span = Context;
    type Token = ContextToken;

    fn start_span(&self, name: &str, kind: SpanKind) -> Result<Context, BridgeError> {
        let parent = Context::current();
        let builder = SpanBuilder::from_name(name.to_owned()).with_kind(kind);
        let span = self.tracer.build_with_context(builder, &parent);
        Ok(parent.with_span(span))
    }

    fn activate(&self, span: &Context) -> ContextToken {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let guard = span.clone().attach();
        ACTIVE_GUARDS.with(|guards| guards.borrow_mut().push((token, guard)));
        ContextToken(token)
    }

    fn restore(&self, token: ContextToken) {
        let found = ACTIVE_GUARDS.with(|guards| {
            let mut guards = guards.borrow_mut();
            let Some(position) = guards.iter().position(|(id, _)| *id == token.0) else {
                return false;
            };
            if position + 1 != guards.len() {
                self.report_error(
                    "context token is not the innermost activation, unwinding stale guards",
                    &BridgeError::ContextRestore(format!(
                        "{} guard(s) left active above the token",
                        guards.len() - position - 1
                    )),
                );
            }
            while guards.len() > position {
                // Pop one at a time so guards drop innermost-first.
                guards.pop();
            }
            true
        });
        if !found {
            self.report_error(
                "context token does not belong to this thread, skipping restore",
                &BridgeError::ContextRestore("token not found on the activation stack".to_owned()),
            );
        }
    }

    fn set_attribute(&self, span: &mut Context, attribute: KeyValue) {
        span.span().set_attribute(attribute);
    }

    fn record_exception(&self, span: &mut Context, error: &ErrorDetails) {
        let mut attributes = vec![
            KeyValue::new(attributes::EXCEPTION_TYPE, error.type_name.clone()),
            KeyValue::new(attributes::EXCEPTION_MESSAGE, error.message.clone()),
        ];
        if let Some(stacktrace) = &error.stacktrace {
            attributes.push(KeyValue::new(
                attributes::EXCEPTION_STACKTRACE,
                stacktrace.clone(),
            ));
        }
        span.span().add_event("exception", attributes);
    }

    fn set_status(&self, span: &mut Context, status: Status) {
        span.span().set_status(status);
    }

    fn end_span(&self, span: Context) {
        span.span().end();
    }
}
