//! The durable event store: an append-only DAG of typed events in SQLite.
//!
//! Every semantic change to a session is one immutable row in `events`.
//! Appends are serialized per session (the connection lock makes them
//! serialized globally, which is stricter than the contract requires);
//! queries are repeatable-read against the same store.

pub mod error;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{AppendEvent, EventFilter, EventStore, NewSession, SinceQuery};
