//! Domain Ports (Port/Adapter Pattern)
//!
//! Trait abstractions for the engine's external collaborators: the directory
//! index, the per-type resource store, the access decider, and the MQTT
//! transport seam. The dispatcher and its helpers hold these as injected
//! handles; there are no hidden call-graph cycles between handlers and
//! collaborators.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::primitive::{
    FilterCriteria, Operation, RequestPrimitive, ResourceType, ResultContent, StatusCode,
};

use super::resource::{
    DirectoryEntry, OrderedChildList, RemotePeerRecord, ResourceId, StructuredPath, Subscription,
};

// =============================================================================
// Store Request / Response
// =============================================================================

/// Request context handed to the resource store's per-type handlers.
///
/// `target` is the resolved resource being operated on; for create it is the
/// parent under which the new resource is placed.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub operation: Operation,
    pub originator: String,
    pub target: DirectoryEntry,
    /// Type tag of the resource being created
    pub resource_type: Option<ResourceType>,
    pub payload: Option<Value>,
    pub result_content: ResultContent,
    pub filter_criteria: FilterCriteria,
    /// Engine-internal request (capacity eviction), bypasses creator checks
    pub internal: bool,
}

impl StoreRequest {
    /// Context for an engine-internal operation issued as the admin originator.
    pub fn internal(operation: Operation, admin: &str, target: DirectoryEntry) -> Self {
        Self {
            operation,
            originator: admin.to_string(),
            target,
            resource_type: None,
            payload: None,
            result_content: ResultContent::Nothing,
            filter_criteria: FilterCriteria::default(),
            internal: true,
        }
    }
}

/// Identity of a child resource just created by the store.
#[derive(Debug, Clone)]
pub struct CreatedChild {
    pub ri: ResourceId,
    pub resource_type: ResourceType,
    pub parent: ResourceId,
    /// Recorded content byte size (list-member kinds)
    pub byte_size: u64,
}

/// Outcome of a store handler.
///
/// `status: None` means "default success for the operation kind"; the
/// dispatcher fills in Created/Ok/Updated/Deleted. Handlers signal not-found,
/// validation failure, and type mismatch through the shared status
/// vocabulary, so the dispatcher never needs type-specific translation.
#[derive(Debug, Clone, Default)]
pub struct StoreResponse {
    pub status: Option<StatusCode>,
    pub payload: Option<Value>,
    pub created: Option<CreatedChild>,
}

impl StoreResponse {
    pub fn ok_with(payload: Value) -> Self {
        Self {
            status: None,
            payload: Some(payload),
            created: None,
        }
    }

    pub fn failed(status: StatusCode, debug: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            payload: Some(serde_json::json!({ "m2m:dbg": debug.into() })),
            created: None,
        }
    }

    /// True unless the handler set a non-success status.
    pub fn is_success(&self) -> bool {
        self.status.map(|s| s.is_success()).unwrap_or(true)
    }
}

// =============================================================================
// Directory Port
// =============================================================================

/// Port for the directory index mapping identifier ⇄ structured path.
///
/// One entry per live resource; implementations create the entry together
/// with the resource and delete it exactly when the resource is deleted.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up an entry by structured path.
    async fn resolve_by_path(&self, sid: &StructuredPath) -> Result<Option<DirectoryEntry>>;

    /// Look up an entry by resource identifier.
    async fn resolve_by_id(&self, ri: &ResourceId) -> Result<Option<DirectoryEntry>>;

    /// Record a new entry.
    async fn create(&self, entry: DirectoryEntry) -> Result<()>;

    /// Remove an entry.
    async fn delete(&self, ri: &ResourceId) -> Result<()>;
}

// =============================================================================
// Resource Store Port
// =============================================================================

/// Port for per-type resource CRUD plus the lookups the engine consumes.
///
/// Implementations own the attribute tables and are responsible for keeping
/// the directory and the owner child lists consistent on cascading delete.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create(&self, request: StoreRequest) -> Result<StoreResponse>;

    async fn retrieve(&self, request: StoreRequest) -> Result<StoreResponse>;

    async fn update(&self, request: StoreRequest) -> Result<StoreResponse>;

    async fn delete(&self, request: StoreRequest) -> Result<StoreResponse>;

    /// Subscription children of the given resource.
    async fn subscriptions_of(&self, parent: &ResourceId) -> Result<Vec<Subscription>>;

    /// Member id list of a group resource.
    async fn group_members(&self, group: &ResourceId) -> Result<Vec<String>>;

    /// Registration record of a federated peer, by peer id (with leading `/`).
    async fn peer_record(&self, cse_id: &str) -> Result<Option<RemotePeerRecord>>;

    /// Declared reachable addresses of an entity resource.
    async fn entity_addresses(&self, ri: &ResourceId) -> Result<Vec<String>>;

    /// The ordered child list of an owner resource, if it bears one.
    async fn child_list(&self, owner: &ResourceId) -> Result<Option<OrderedChildList>>;

    /// Persist an owner's ordered child list and its totals.
    async fn put_child_list(&self, owner: &ResourceId, list: OrderedChildList) -> Result<()>;

    /// Stamp a list member with the owner's sequence at insertion time.
    async fn put_state_tag(&self, member: &ResourceId, sequence: u64) -> Result<()>;
}

// =============================================================================
// Access Decider Port
// =============================================================================

/// Outcome of an access decision.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    pub granted: bool,
    /// Collaborator-supplied status overriding the default denial
    pub status_override: Option<(StatusCode, String)>,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            granted: true,
            status_override: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            status_override: None,
        }
    }

    pub fn denied_with(status: StatusCode, debug: impl Into<String>) -> Self {
        Self {
            granted: false,
            status_override: Some((status, debug.into())),
        }
    }
}

/// Port for access-control evaluation.
#[async_trait]
pub trait AccessDecider: Send + Sync {
    /// Decide whether the request may proceed against the resolved target.
    async fn decide(
        &self,
        request: &RequestPrimitive,
        target: &DirectoryEntry,
    ) -> Result<AccessDecision>;
}

// =============================================================================
// MQTT Publisher Port
// =============================================================================

/// Port for MQTT notification delivery.
///
/// The broker connection is a transport binding outside this engine; the
/// notification engine derives the topic and hands off here.
#[async_trait]
pub trait MqttPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;
}
