//! Shared configuration, connections, errors and types for the Relay workspace.

pub mod config;
pub mod db;
pub mod error;
pub mod redis_pool;
pub mod types;
