//! The RPC core: transport-agnostic request dispatch and event fan-out.
//!
//! A host owns the transport (WebSocket, HTTP push, a test harness). For
//! each connection it calls [`RpcServer::connect`] to get the outbound event
//! queue and [`RpcServer::handle`] for every inbound request.

pub mod fanout;
pub mod methods;
pub mod middleware;
pub mod registry;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use sb_protocol::{ErrorCode, RpcRequest, RpcResponse, ServerEvent};

use crate::runtime::orchestrator::Orchestrator;
use crate::rpc::middleware::{IdempotencyMiddleware, LoggingMiddleware, Middleware};
use crate::rpc::registry::{Manager, MethodRegistry};

/// Connection-scoped bookkeeping the RPC surface maintains: registered
/// devices and identified clients. Push delivery itself is an external
/// collaborator; the core only keeps the registry.
pub struct RpcExtras {
    pub devices: Mutex<HashMap<String, serde_json::Value>>,
    pub clients: Mutex<HashMap<String, serde_json::Value>>,
    pub started_at: Instant,
}

impl RpcExtras {
    fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }
}

pub struct RpcServer {
    orchestrator: Arc<Orchestrator>,
    registry: MethodRegistry,
    middlewares: Vec<Arc<dyn Middleware>>,
    extras: Arc<RpcExtras>,
    request_timeout: Duration,
}

impl RpcServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let state = orchestrator.state();

        let mut available: HashSet<Manager> =
            HashSet::from([Manager::Store, Manager::Hooks, Manager::Orchestrator]);
        if !state.providers.is_empty() {
            available.insert(Manager::Providers);
        }
        if !state.tools.is_empty() {
            available.insert(Manager::Tools);
        }

        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(LoggingMiddleware),
            Arc::new(IdempotencyMiddleware::new(
                Duration::from_secs(state.config.timeouts.idempotency_ttl_secs),
                state.config.limits.idempotency_capacity,
            )),
        ];

        Self {
            registry: methods::build_registry(available),
            middlewares,
            extras: Arc::new(RpcExtras::new()),
            request_timeout: Duration::from_secs(state.config.timeouts.rpc_secs),
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// Register a connection and hand back its outbound event queue.
    pub fn connect(
        &self,
        connection_id: &str,
        interests: Option<HashSet<String>>,
    ) -> mpsc::Receiver<ServerEvent> {
        self.orchestrator
            .state()
            .fanout
            .subscribe(connection_id, interests)
    }

    pub fn disconnect(&self, connection_id: &str) {
        self.orchestrator.state().fanout.unsubscribe(connection_id);
        self.extras.clients.lock().remove(connection_id);
    }

    /// Handle one request. Exactly one response per request id.
    pub async fn handle(&self, connection_id: &str, req: RpcRequest) -> RpcResponse {
        for mw in &self.middlewares {
            if let Some(resp) = mw.before(connection_id, &req) {
                return resp;
            }
        }

        let dispatched = tokio::time::timeout(
            self.request_timeout,
            self.registry.dispatch(
                self.orchestrator.clone(),
                self.extras.clone(),
                connection_id,
                &req,
            ),
        )
        .await;
        let resp = match dispatched {
            Ok(resp) => resp,
            Err(_) => RpcResponse::err(
                &req.id,
                ErrorCode::InternalError,
                format!("request exceeded {:?}", self.request_timeout),
            ),
        };

        for mw in self.middlewares.iter().rev() {
            mw.after(connection_id, &req, &resp);
        }
        resp
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.registry.method_names()
    }
}
