use std::sync::{Arc, Mutex};

use opentelemetry::trace::SpanKind;
use span_bridge_config::{BridgeConfig, ChannelSelector, SpanKindConfig};

use crate::backend::TraceBackend;
use crate::bus::{EventBus, Selector, SubscriptionHandle};
use crate::error::BridgeError;
use crate::subscriber::{SpanSubscriber, SubscribeOptions};

/// One declarative subscription the registry installs.
#[derive(Clone)]
pub struct SubscriptionSpec {
    pub selector: Selector,
    pub options: SubscribeOptions,
}

#[derive(Default)]
struct ActiveSubscriptions {
    installed: bool,
    handles: Vec<SubscriptionHandle>,
}

/// Wires a set of subscriptions into a bus with an explicit install/uninstall
/// lifecycle.
///
/// The registry is a plain value handed to process bootstrap; there is no
/// global instance. `install` is idempotent and `uninstall` returns the bus
/// to its pre-install state, so tests can cycle instrumentation freely.
pub struct InstrumentationRegistry<B: TraceBackend> {
    backend: Arc<B>,
    specs: Vec<SubscriptionSpec>,
    active: Mutex<ActiveSubscriptions>,
}

impl<B: TraceBackend> InstrumentationRegistry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        InstrumentationRegistry {
            backend,
            specs: Vec::new(),
            active: Mutex::new(ActiveSubscriptions::default()),
        }
    }

    /// Builds a registry from declarative configuration, compiling pattern
    /// selectors up front so a bad pattern fails at load time, not dispatch
    /// time.
    pub fn from_config(config: &BridgeConfig, backend: Arc<B>) -> Result<Self, BridgeError> {
        let mut registry = Self::new(backend);
        for subscription in &config.subscriptions {
            let selector = match &subscription.channel {
                ChannelSelector::Exact(name) => Selector::exact(name.clone()),
                ChannelSelector::Pattern { pattern } => Selector::pattern(pattern)?,
            };
            let options = SubscribeOptions::default()
                .kind(span_kind_from_config(subscription.kind))
                .denylist(subscription.denylist.iter().cloned());
            registry.register(SubscriptionSpec { selector, options });
        }
        Ok(registry)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn register(&mut self, spec: SubscriptionSpec) -> &mut Self {
        self.specs.push(spec);
        self
    }

    pub fn is_installed(&self) -> bool {
        self.active.lock().expect("registry subscription lock").installed
    }

    /// Subscribes every registered spec on `bus`. Installing an already
    /// installed registry is a no-op.
    pub fn install(&self, bus: &dyn EventBus)
    where
        B::Span: Sync,
        B::Token: Sync,
    {
        let mut active = self.active.lock().expect("registry subscription lock");
        if active.installed {
            return;
        }
        for spec in &self.specs {
            let subscriber =
                SpanSubscriber::with_options(self.backend.clone(), spec.options.clone());
            let handle = bus.subscribe(spec.selector.clone(), Arc::new(subscriber));
            active.handles.push(handle);
        }
        active.installed = true;
    }

    /// Removes every subscription installed by this registry from `bus`.
    pub fn uninstall(&self, bus: &dyn EventBus) {
        let mut active = self.active.lock().expect("registry subscription lock");
        for handle in active.handles.drain(..) {
            bus.unsubscribe(handle);
        }
        active.installed = false;
    }
}

fn span_kind_from_config(kind: SpanKindConfig) -> SpanKind {
    match kind {
        SpanKindConfig::Internal => SpanKind::Internal,
        SpanKindConfig::Client => SpanKind::Client,
        SpanKindConfig::Server => SpanKind::Server,
        SpanKindConfig::Producer => SpanKind::Producer,
        SpanKindConfig::Consumer => SpanKind::Consumer,
    }
}
