//! In-memory doubles for the bus and backend boundaries, used by this crate's
//! tests and exposed to downstream crates through the `testing` feature.

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::KeyValue;

use crate::backend::TraceBackend;
use crate::bus::{EventBus, EventHandler, Selector, SubscriptionHandle};
use crate::error::BridgeError;
use crate::payload::{ErrorDetails, Payload};

/// A span recorded by [`RecordingBackend`] once `end_span` ran.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub id: u64,
    pub name: String,
    pub kind: SpanKind,
    pub attributes: Vec<KeyValue>,
    pub status: Status,
    pub events: Vec<RecordedEvent>,
}

impl FinishedSpan {
    pub fn attribute(&self, key: &str) -> Option<&opentelemetry::Value> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| &kv.value)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub name: String,
    pub attributes: Vec<KeyValue>,
}

/// Open span handle of the recording backend.
pub struct RecordedSpan {
    id: u64,
    name: String,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
    status: Status,
    events: Vec<RecordedEvent>,
}

/// Context token of the recording backend; remembers the span it activated so
/// tests can assert start/finish pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedToken {
    pub id: u64,
    pub span_id: u64,
}

#[derive(Default)]
struct RecordingState {
    next_span_id: u64,
    next_token_id: u64,
    finished: Vec<FinishedSpan>,
    activations: Vec<RecordedToken>,
    restorations: Vec<RecordedToken>,
    errors: Vec<String>,
}

/// In-memory backend recording finished spans, context activations, and
/// reported errors. `fail_next_start` arms a one-shot `start_span` failure
/// for exercising the unobserved-event path.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    state: Arc<Mutex<RecordingState>>,
    fail_next_start: Arc<AtomicBool>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.state.lock().expect("recording state lock").finished.clone()
    }

    pub fn last_span(&self) -> Option<FinishedSpan> {
        self.finished_spans().into_iter().next_back()
    }

    /// Activation tokens in the order `activate` handed them out.
    pub fn activations(&self) -> Vec<RecordedToken> {
        self.state
            .lock()
            .expect("recording state lock")
            .activations
            .clone()
    }

    /// Tokens in the order `restore` consumed them.
    pub fn restorations(&self) -> Vec<RecordedToken> {
        self.state
            .lock()
            .expect("recording state lock")
            .restorations
            .clone()
    }

    pub fn reported_errors(&self) -> Vec<String> {
        self.state.lock().expect("recording state lock").errors.clone()
    }
}

impl TraceBackend for RecordingBackend {
    type Span = RecordedSpan;
    type Token = RecordedToken;

    fn start_span(&self, name: &str, kind: SpanKind) -> Result<RecordedSpan, BridgeError> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::SpanStart("induced start failure".to_owned()));
        }
        let mut state = self.state.lock().expect("recording state lock");
        state.next_span_id += 1;
        Ok(RecordedSpan {
            id: state.next_span_id,
            name: name.to_owned(),
            kind,
            attributes: Vec::new(),
            status: Status::Unset,
            events: Vec::new(),
        })
    }

    fn activate(&self, span: &RecordedSpan) -> RecordedToken {
        let mut state = self.state.lock().expect("recording state lock");
        state.next_token_id += 1;
        let token = RecordedToken {
            id: state.next_token_id,
            span_id: span.id,
        };
        state.activations.push(token);
        token
    }

    fn restore(&self, token: RecordedToken) {
        self.state
            .lock()
            .expect("recording state lock")
            .restorations
            .push(token);
    }

    fn set_attribute(&self, span: &mut RecordedSpan, attribute: KeyValue) {
        span.attributes.push(attribute);
    }

    fn record_exception(&self, span: &mut RecordedSpan, error: &ErrorDetails) {
        let mut attributes = vec![
            KeyValue::new(crate::attributes::EXCEPTION_TYPE, error.type_name.clone()),
            KeyValue::new(crate::attributes::EXCEPTION_MESSAGE, error.message.clone()),
        ];
        if let Some(stacktrace) = &error.stacktrace {
            attributes.push(KeyValue::new(
                crate::attributes::EXCEPTION_STACKTRACE,
                stacktrace.clone(),
            ));
        }
        span.events.push(RecordedEvent {
            name: "exception".to_owned(),
            attributes,
        });
    }

    fn set_status(&self, span: &mut RecordedSpan, status: Status) {
        span.status = status;
    }

    fn end_span(&self, span: RecordedSpan) {
        let mut state = self.state.lock().expect("recording state lock");
        state.finished.push(FinishedSpan {
            id: span.id,
            name: span.name,
            kind: span.kind,
            attributes: span.attributes,
            status: span.status,
            events: span.events,
        });
    }

    fn report_error(&self, message: &str, error: &BridgeError) {
        self.state
            .lock()
            .expect("recording state lock")
            .errors
            .push(format!("{message}: {error}"));
    }
}

struct BusSubscription {
    handle: SubscriptionHandle,
    selector: Selector,
    handler: Arc<dyn EventHandler>,
}

/// Minimal in-process fanout bus with notification-bus delivery semantics:
/// every matching subscriber gets `start`, the instrumented block runs, and
/// `finish` is attempted for every subscriber even when one of them panicked;
/// the first panic resumes once delivery completed.
///
/// [`FanoutBus::without_finish_guarantee`] reproduces older bus behavior
/// where a panicking subscriber aborts dispatch before the remaining `finish`
/// calls — the documented integration gap with hosts that lack the guarantee.
pub struct FanoutBus {
    subscriptions: Mutex<Vec<BusSubscription>>,
    next_handle: AtomicU64,
    next_event_id: AtomicU64,
    guaranteed_finish: bool,
}

impl FanoutBus {
    pub fn new() -> Self {
        FanoutBus {
            subscriptions: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
            guaranteed_finish: true,
        }
    }

    pub fn without_finish_guarantee() -> Self {
        FanoutBus {
            guaranteed_finish: false,
            ..Self::new()
        }
    }

    /// Dispatches one event around `f`: `start` to every matching subscriber,
    /// then `f`, then `finish` to every matching subscriber.
    pub fn instrument<R>(&self, name: &str, payload: Payload, f: impl FnOnce() -> R) -> R {
        let event_id = format!("event-{}", self.next_event_id.fetch_add(1, Ordering::Relaxed));
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscriptions
            .lock()
            .expect("bus subscription lock")
            .iter()
            .filter(|subscription| subscription.selector.matches(name))
            .map(|subscription| subscription.handler.clone())
            .collect();

        let mut first_panic: Option<Box<dyn Any + Send>> = None;

        for handler in &handlers {
            let delivery =
                catch_unwind(AssertUnwindSafe(|| handler.start(name, &event_id, &payload)));
            if let Err(panic) = delivery {
                if !self.guaranteed_finish {
                    resume_unwind(panic);
                }
                first_panic.get_or_insert(panic);
            }
        }

        let outcome = catch_unwind(AssertUnwindSafe(f));

        for handler in &handlers {
            let delivery =
                catch_unwind(AssertUnwindSafe(|| handler.finish(name, &event_id, &payload)));
            if let Err(panic) = delivery {
                if !self.guaranteed_finish {
                    resume_unwind(panic);
                }
                first_panic.get_or_insert(panic);
            }
        }

        match outcome {
            Ok(value) => {
                if let Some(panic) = first_panic {
                    resume_unwind(panic);
                }
                value
            }
            Err(panic) => resume_unwind(first_panic.unwrap_or(panic)),
        }
    }
}

impl Default for FanoutBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for FanoutBus {
    fn subscribe(&self, selector: Selector, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .expect("bus subscription lock")
            .push(BusSubscription {
                handle,
                selector,
                handler,
            });
        handle
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions
            .lock()
            .expect("bus subscription lock")
            .retain(|subscription| subscription.handle != handle);
    }
}
