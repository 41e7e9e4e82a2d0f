//! Method registry and dispatch.
//!
//! Each method declares its name, required params, required managers, and an
//! async handler. Dispatch validates params, verifies the managers are
//! wired, invokes the handler, and maps errors onto the wire taxonomy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use sb_domain::error::Error;
use sb_protocol::{ErrorCode, RpcRequest, RpcResponse};

use crate::runtime::orchestrator::Orchestrator;
use crate::rpc::RpcExtras;

/// Managers a method may require. `NOT_AVAILABLE` is returned when the host
/// did not wire one (e.g. no providers configured).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manager {
    Store,
    Providers,
    Tools,
    Hooks,
    Orchestrator,
}

/// A dispatch-time failure mapped onto the wire taxonomy.
#[derive(Debug, Clone)]
pub struct MethodError {
    pub code: ErrorCode,
    pub message: String,
}

impl MethodError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }
}

impl From<Error> for MethodError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::EventNotFound(_) => ErrorCode::ParentNotFound,
            Error::Blocked(_) => ErrorCode::Blocked,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            Error::Io(_) => ErrorCode::FileError,
            Error::Config(_) => ErrorCode::InvalidParams,
            Error::ShuttingDown => ErrorCode::NotAvailable,
            _ => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Context handed to every handler.
pub struct MethodCtx {
    pub orchestrator: Arc<Orchestrator>,
    pub extras: Arc<RpcExtras>,
    pub connection_id: String,
    pub params: serde_json::Value,
}

pub type Handler = Arc<
    dyn Fn(MethodCtx) -> BoxFuture<'static, Result<serde_json::Value, MethodError>>
        + Send
        + Sync,
>;

pub struct MethodDef {
    pub name: &'static str,
    pub required_params: &'static [&'static str],
    pub required_managers: &'static [Manager],
    pub handler: Handler,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MethodRegistry {
    methods: HashMap<&'static str, MethodDef>,
    available: HashSet<Manager>,
}

impl MethodRegistry {
    pub fn new(available: HashSet<Manager>) -> Self {
        Self {
            methods: HashMap::new(),
            available,
        }
    }

    pub fn register(&mut self, def: MethodDef) {
        self.methods.insert(def.name, def);
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.methods.keys().copied().collect();
        names.sort();
        names
    }

    pub async fn dispatch(
        &self,
        orchestrator: Arc<Orchestrator>,
        extras: Arc<RpcExtras>,
        connection_id: &str,
        req: &RpcRequest,
    ) -> RpcResponse {
        let Some(def) = self.methods.get(req.method.as_str()) else {
            return RpcResponse::err(
                &req.id,
                ErrorCode::MethodNotFound,
                format!("no such method: {}", req.method),
            );
        };

        for manager in def.required_managers {
            if !self.available.contains(manager) {
                return RpcResponse::err(
                    &req.id,
                    ErrorCode::NotAvailable,
                    format!("required manager not wired: {manager:?}"),
                );
            }
        }

        let params = req
            .params
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        for required in def.required_params {
            let present = params.get(*required).map(|v| !v.is_null()).unwrap_or(false);
            if !present {
                return RpcResponse::err(
                    &req.id,
                    ErrorCode::InvalidParams,
                    format!("missing required param: {required}"),
                );
            }
        }

        let ctx = MethodCtx {
            orchestrator,
            extras,
            connection_id: connection_id.to_owned(),
            params,
        };
        match (def.handler)(ctx).await {
            Ok(result) => RpcResponse::ok(&req.id, result),
            Err(err) => RpcResponse::err(&req.id, err.code, err.message),
        }
    }
}

/// Wrap an async closure into the registry's handler shape.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(MethodCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, MethodError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Param extraction helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn str_param(params: &serde_json::Value, name: &str) -> Result<String, MethodError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| MethodError::invalid_params(format!("param {name} must be a string")))
}

pub fn opt_str_param(params: &serde_json::Value, name: &str) -> Option<String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_owned())
}

pub fn opt_u64_param(params: &serde_json::Value, name: &str) -> Option<u64> {
    params.get(name).and_then(|v| v.as_u64())
}

pub fn opt_bool_param(params: &serde_json::Value, name: &str) -> Option<bool> {
    params.get(name).and_then(|v| v.as_bool())
}

pub fn uuid_param(params: &serde_json::Value, name: &str) -> Result<uuid::Uuid, MethodError> {
    let raw = str_param(params, name)?;
    raw.parse()
        .map_err(|_| MethodError::invalid_params(format!("param {name} must be a UUID")))
}
