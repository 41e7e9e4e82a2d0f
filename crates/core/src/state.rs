use std::sync::Arc;

use sb_domain::config::Config;
use sb_events::EventStore;
use sb_hooks::HookEngine;
use sb_providers::ProviderRegistry;

use crate::guardrail::Guardrail;
use crate::rpc::fanout::EventFanout;
use crate::runtime::cancel::CancelMap;
use crate::tools::ToolRegistry;

/// Shared handles passed to the orchestrator, the turn pipeline, and RPC
/// handlers.
///
/// Everything here is either internally synchronized (event store, fan-out,
/// cancel map) or immutable after construction (config, registries).
#[derive(Clone)]
pub struct CoreState {
    pub config: Arc<Config>,
    pub store: Arc<EventStore>,
    pub providers: Arc<ProviderRegistry>,
    pub hooks: Arc<HookEngine>,
    pub guardrails: Arc<Vec<Arc<dyn Guardrail>>>,
    pub tools: Arc<ToolRegistry>,
    pub fanout: Arc<EventFanout>,
    pub cancel_map: Arc<CancelMap>,
}

impl CoreState {
    /// Assemble state from the pieces a host wired up.
    pub fn new(
        config: Config,
        store: EventStore,
        providers: ProviderRegistry,
        hooks: HookEngine,
        guardrails: Vec<Arc<dyn Guardrail>>,
        tools: ToolRegistry,
    ) -> Self {
        let queue_capacity = config.limits.event_queue_capacity;
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            providers: Arc::new(providers),
            hooks: Arc::new(hooks),
            guardrails: Arc::new(guardrails),
            tools: Arc::new(tools),
            fanout: Arc::new(EventFanout::new(queue_capacity)),
            cancel_map: Arc::new(CancelMap::new()),
        }
    }
}
