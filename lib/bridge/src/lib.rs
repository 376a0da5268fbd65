//! Bridges in-process notification-bus events into OpenTelemetry spans.
//!
//! A [`SpanSubscriber`] is registered on a host event bus for a channel
//! selector. Each event `start` opens a span and activates it as the current
//! context; the matching `finish` restores the prior context, sanitizes the
//! event payload into span attributes, applies the designated exception as
//! span status, and ends the span. Per-event state lives in a concurrent
//! correlation table keyed by the bus-supplied event instance id, so events
//! overlap freely across threads.
//!
//! The bus and the tracing backend are both boundaries: [`EventBus`] /
//! [`EventHandler`] on one side, [`TraceBackend`] on the other, with
//! [`OtelBackend`] driving any `opentelemetry` tracer. Instrumentation
//! failures are reported through the backend's error hook and never change
//! how the instrumented application behaves.

pub mod attributes;
pub mod backend;
pub mod bus;
mod error;
pub mod otel;
pub mod payload;
pub mod registry;
pub mod sanitize;
pub mod subscriber;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use backend::{TraceBackend, TARGET_NAME};
pub use bus::{subscribe, EventBus, EventHandler, Selector, SubscriptionHandle};
pub use error::BridgeError;
pub use otel::OtelBackend;
pub use payload::{ErrorDetails, EventValue, Payload};
pub use registry::{InstrumentationRegistry, SubscriptionSpec};
pub use subscriber::{
    reversed_name_formatter, CorrelationEntry, NameFormatter, PayloadTransform, SpanSubscriber,
    SubscribeOptions,
};
