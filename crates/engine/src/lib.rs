//! Relay dispatch engine.
//!
//! - [`store`] / [`pg_store`]: persisted recipient queue and its cursor
//! - [`generator`] / [`input`]: where a session's recipients come from
//! - [`controller`]: the single-flight, paced, cancellable send loop
//! - [`transport`] / [`supervisor`]: the messaging network and its connection upkeep
//! - [`sink`]: observer event publishing

pub mod controller;
pub mod generator;
pub mod input;
pub mod pg_store;
pub mod session;
pub mod sink;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use controller::{DispatchConfig, DispatchController, DispatchHandle, SessionOutcome};
pub use store::{InsertReport, MemoryRecipientStore, PendingCursor, RecipientStore};
pub use transport::{ConnectionState, Transport, TransportError};
