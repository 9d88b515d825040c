//! MeshCSE - Federated IoT Resource Middleware Node
//!
//! A middleware node of a federated IoT resource tree. Every interaction is a
//! request primitive (create / retrieve / update / delete / notify) addressed
//! to a node in the tree; the engine routes it locally, relays it to the peer
//! node that owns the target, or serves it through a virtual resource view.
//!
//! # Architecture
//!
//! One pipeline handles every request:
//!
//! ```text
//! Resolver (Where) → Dispatcher (What) → Store / Forwarder / Fan-Out (How)
//!                                      ↘ Notification Engine (side effects)
//! ```
//!
//! # Features
//!
//! - Three-scope addressing (absolute, peer-relative, local-relative)
//! - Virtual resource views (`la`, `ol`, `fopt`, `rpt`)
//! - Capacity-bounded ordered child lists with oldest-first eviction
//! - Subscription notifications over http, mqtt topics, and entity addresses
//! - Transparent forwarding to registered federation peers
//! - Group fan-out with ordered response aggregation
//!
//! # Modules
//!
//! - [`addressing`] - Target resolution and virtual-resource detection
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`capacity`] - Bounded child-list bookkeeping and eviction
//! - [`dispatch`] - The request pipeline and group fan-out
//! - [`domain`] - Domain layer with ports and value objects
//! - [`error`] - Error types and status-code mapping
//! - [`forward`] - Relay of requests owned by federation peers
//! - [`metrics`] - Prometheus counters
//! - [`notify`] - Subscription evaluation and notification delivery
//! - [`primitive`] - Request/response primitives and the wire vocabulary

pub mod adapters;
pub mod addressing;
pub mod capacity;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod notify;
pub mod primitive;

// Re-export commonly used types
pub use addressing::{resolve_target, CseIdentity, ResolvedTarget, VirtualKind};
pub use capacity::CapacityManager;
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use error::{Error, Result};
pub use forward::{Forwarder, ForwarderConfig};
pub use notify::NotificationEngine;
pub use primitive::{
    Operation, RequestPrimitive, ResourceType, ResponsePrimitive, StatusCode,
};
