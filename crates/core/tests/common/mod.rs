#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sb_core::runtime::orchestrator::{CreateSessionOpts, Orchestrator};
use sb_core::state::CoreState;
use sb_core::tools::{Tool, ToolRegistry};
use sb_domain::config::Config;
use sb_domain::event::EventType;
use sb_domain::session::SessionInfo;
use sb_events::{EventFilter, EventStore};
use sb_hooks::HookEngine;
use sb_providers::{ProviderRegistry, ScriptedProvider};
use sb_domain::token::ProviderKind;

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub provider: Arc<ScriptedProvider>,
}

pub fn provider_id(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Anthropic => "anthropic",
        ProviderKind::Openai => "openai",
        ProviderKind::Google => "google",
        ProviderKind::Codex => "codex",
    }
}

pub fn harness(kind: ProviderKind, window: u64, tools: Vec<Arc<dyn Tool>>) -> Harness {
    harness_with_config(Config::default(), kind, window, tools)
}

pub fn harness_with_config(
    config: Config,
    kind: ProviderKind,
    window: u64,
    tools: Vec<Arc<dyn Tool>>,
) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = EventStore::open_in_memory().unwrap();

    let provider = Arc::new(ScriptedProvider::new(provider_id(kind), kind));
    provider.set_context_window(window);
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());

    let hooks = HookEngine::new(Duration::from_secs(5));
    let mut tool_registry = ToolRegistry::new();
    for tool in tools {
        tool_registry.register(tool);
    }

    let state = CoreState::new(config, store, providers, hooks, Vec::new(), tool_registry);
    Harness {
        orchestrator: Orchestrator::new(state),
        provider,
    }
}

pub async fn create_session(h: &Harness, kind: ProviderKind) -> SessionInfo {
    h.orchestrator
        .create_session(CreateSessionOpts {
            workspace_id: "ws1".into(),
            working_directory: "/tmp/work".into(),
            model: format!("{}/test-model", provider_id(kind)),
            title: None,
        })
        .await
        .unwrap()
}

/// Poll the log until an event of the given type shows up (turns run in a
/// background task, so tests wait on the journal rather than the spawn).
pub async fn wait_for_event(h: &Harness, session_id: &str, ty: EventType) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events = h
            .orchestrator
            .state()
            .store
            .get_events_by_session(session_id, &EventFilter::default())
            .unwrap();
        if events.iter().any(|e| e.event_type() == ty) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {ty} in session {session_id}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn events_of_type(
    h: &Harness,
    session_id: &str,
    ty: EventType,
) -> Vec<sb_domain::event::Event> {
    h.orchestrator
        .state()
        .store
        .get_events_by_session(
            session_id,
            &EventFilter {
                types: Some(vec![ty]),
                limit: None,
                before_event_id: None,
            },
        )
        .unwrap()
}

pub fn all_events(h: &Harness, session_id: &str) -> Vec<sb_domain::event::Event> {
    h.orchestrator
        .state()
        .store
        .get_events_by_session(session_id, &EventFilter::default())
        .unwrap()
}
