use std::sync::Arc;

use regex_automata::meta::Regex;

use crate::backend::TraceBackend;
use crate::error::BridgeError;
use crate::payload::Payload;
use crate::subscriber::{SpanSubscriber, SubscribeOptions};

/// Selects the notification channels a subscription observes.
#[derive(Debug, Clone)]
pub enum Selector {
    /// A single channel, matched by name.
    Exact(String),
    /// Any channel whose name matches the pattern.
    Pattern(Regex),
}

impl Selector {
    pub fn exact(name: impl Into<String>) -> Self {
        Selector::Exact(name.into())
    }

    /// Compiles `pattern` into a pattern selector.
    pub fn pattern(pattern: &str) -> Result<Self, BridgeError> {
        Regex::new(pattern)
            .map(Selector::Pattern)
            .map_err(|e| BridgeError::InvalidPattern(e.to_string()))
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            Selector::Exact(name) => name == channel,
            Selector::Pattern(regex) => regex.is_match(channel),
        }
    }
}

/// The two-method callback object the host bus drives for each matching
/// event: `start` when the event opens, `finish` when it closes. The bus
/// guarantees a `finish` attempt for every `start`, even when another
/// subscriber on the channel fails mid-dispatch.
pub trait EventHandler: Send + Sync {
    fn start(&self, event_name: &str, event_id: &str, payload: &Payload);
    fn finish(&self, event_name: &str, event_id: &str, payload: &Payload);
}

impl<B: TraceBackend> EventHandler for SpanSubscriber<B>
where
    B::Span: Sync,
    B::Token: Sync,
{
    fn start(&self, event_name: &str, event_id: &str, payload: &Payload) {
        SpanSubscriber::start(self, event_name, event_id, payload);
    }

    fn finish(&self, event_name: &str, event_id: &str, payload: &Payload) {
        SpanSubscriber::finish(self, event_name, event_id, payload);
    }
}

/// Opaque handle identifying a live subscription for later unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        SubscriptionHandle(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// The subscribe/unsubscribe surface the host bus exposes. The bus owns
/// selector matching and delivery; the bridge only hands it a handler.
pub trait EventBus: Send + Sync {
    fn subscribe(&self, selector: Selector, handler: Arc<dyn EventHandler>) -> SubscriptionHandle;
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Registers a span subscriber for `selector` on `bus` and returns the bus's
/// subscription handle. This is the adapter entry point; adapters needing
/// fine control build a [`SpanSubscriber`] themselves and register it as an
/// [`EventHandler`].
pub fn subscribe<B: TraceBackend>(
    bus: &dyn EventBus,
    backend: Arc<B>,
    selector: Selector,
    options: SubscribeOptions,
) -> SubscriptionHandle
where
    B::Span: Sync,
    B::Token: Sync,
{
    let subscriber = SpanSubscriber::with_options(backend, options);
    bus.subscribe(selector, Arc::new(subscriber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_selector_matches_only_its_channel() {
        let selector = Selector::exact("bar.foo");
        assert!(selector.matches("bar.foo"));
        assert!(!selector.matches("bar.foo.baz"));
        assert!(!selector.matches("other"));
    }

    #[test]
    fn test_pattern_selector_matches_by_regex() {
        let selector = Selector::pattern(r".*\.foo").expect("valid pattern");
        assert!(selector.matches("bar.foo"));
        assert!(selector.matches("baz.foo"));
        assert!(!selector.matches("foo.bar"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let result = Selector::pattern("(unclosed");
        assert!(matches!(result, Err(BridgeError::InvalidPattern(_))));
    }
}
