//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern. The engine only ever sees the traits in
//! [`crate::domain::ports`]; these are the batteries shipped in the box:
//! the process-local store, the permissive and deny-list access deciders,
//! and the broker-less mqtt stand-in.

mod memory;

pub use memory::{
    AllowAllDecider, DenyListDecider, InMemoryStore, ListDefaults, UnboundMqttPublisher,
};
