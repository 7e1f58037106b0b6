//! Signal database, DBC parser and registry cache
//!
//! This module contains the DBC parser, the unified signal database and
//! the caller-owned cache that reuses built databases.

pub mod cache;
pub mod database;
pub mod dbc;

// Re-export key types for convenience
pub use cache::RegistryCache;
pub use database::{
    AttributeValue, ByteOrder, DatabaseStats, MessageDefinition, MultiplexTable,
    MultiplexerInfo, SignalAttributeMap, SignalDatabase, SignalDefinition, ValueType,
};
