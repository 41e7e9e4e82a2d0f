//! Request middleware: wraps dispatch with cross-cutting behavior.
//!
//! `before` runs in registration order and may short-circuit with a
//! response; `after` runs in reverse order once a response exists. The two
//! standard middlewares are request logging and the idempotency cache.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sb_protocol::{RpcRequest, RpcResponse};

pub trait Middleware: Send + Sync {
    fn before(&self, _connection_id: &str, _req: &RpcRequest) -> Option<RpcResponse> {
        None
    }
    fn after(&self, _connection_id: &str, _req: &RpcRequest, _resp: &RpcResponse) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, connection_id: &str, req: &RpcRequest) -> Option<RpcResponse> {
        tracing::debug!(
            connection_id,
            request_id = %req.id,
            method = %req.method,
            "rpc request"
        );
        None
    }

    fn after(&self, connection_id: &str, req: &RpcRequest, resp: &RpcResponse) {
        if resp.success {
            tracing::debug!(connection_id, request_id = %req.id, method = %req.method, "rpc ok");
        } else {
            let code = resp.error.as_ref().map(|e| format!("{:?}", e.code));
            tracing::warn!(
                connection_id,
                request_id = %req.id,
                method = %req.method,
                code,
                "rpc error"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idempotency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Key = (String, String);

struct CacheEntry {
    response: RpcResponse,
    inserted: Instant,
}

/// Bounded TTL + LRU response cache keyed `(connection_id, idempotency_key)`.
/// Eviction removes expired entries first, then the least recently used.
pub struct IdempotencyCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<Key, CacheEntry>,
    /// Recency order, least recent at the front.
    order: VecDeque<Key>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, connection_id: &str, idempotency_key: &str) -> Option<RpcResponse> {
        let key: Key = (connection_id.to_owned(), idempotency_key.to_owned());
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&key) {
            Some(entry) => entry.inserted.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
            return None;
        }

        // Touch for LRU.
        inner.order.retain(|k| k != &key);
        inner.order.push_back(key.clone());
        inner.entries.get(&key).map(|e| e.response.clone())
    }

    pub fn insert(&self, connection_id: &str, idempotency_key: &str, response: RpcResponse) {
        let key: Key = (connection_id.to_owned(), idempotency_key.to_owned());
        let mut inner = self.inner.lock();

        if inner.entries.insert(
            key.clone(),
            CacheEntry {
                response,
                inserted: Instant::now(),
            },
        )
        .is_none()
        {
            inner.order.push_back(key);
        }

        // Expired first, then LRU.
        if inner.entries.len() > self.capacity {
            let ttl = self.ttl;
            let stale: Vec<Key> = inner
                .order
                .iter()
                .filter(|k| {
                    inner
                        .entries
                        .get(*k)
                        .is_some_and(|e| e.inserted.elapsed() >= ttl)
                })
                .cloned()
                .collect();
            for k in stale {
                inner.entries.remove(&k);
                inner.order.retain(|q| q != &k);
            }
        }
        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct IdempotencyMiddleware {
    cache: IdempotencyCache,
}

impl IdempotencyMiddleware {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            cache: IdempotencyCache::new(ttl, capacity),
        }
    }
}

impl Middleware for IdempotencyMiddleware {
    fn before(&self, connection_id: &str, req: &RpcRequest) -> Option<RpcResponse> {
        let key = req.idempotency_key.as_deref()?;
        let mut cached = self.cache.get(connection_id, key)?;
        tracing::debug!(connection_id, idempotency_key = key, "idempotency cache hit");
        // The replayed response answers the current request id.
        cached.id = req.id.clone();
        Some(cached)
    }

    fn after(&self, connection_id: &str, req: &RpcRequest, resp: &RpcResponse) {
        if let Some(key) = req.idempotency_key.as_deref() {
            self.cache.insert(connection_id, key, resp.clone());
        }
    }
}
