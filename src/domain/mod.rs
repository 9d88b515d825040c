//! Domain Layer
//!
//! Core model types and the port traits the engine depends on.
//!
//! - **Resource model** (`resource.rs`) - identifiers, directory entries,
//!   subscriptions, peer records, ordered child lists
//! - **Ports** (`ports.rs`) - trait abstractions for the directory, the
//!   resource store, the access decider, and the MQTT seam

pub mod ports;
pub mod resource;

pub use ports::{
    AccessDecider, AccessDecision, CreatedChild, Directory, MqttPublisher, ResourceStore,
    StoreRequest, StoreResponse,
};
pub use resource::{
    ChildEntry, ContentMode, DirectoryEntry, EventCriteria, EventKind, OrderedChildList,
    RemotePeerRecord, ResourceId, StructuredPath, Subscription,
};
