//! Core resource model value objects
//!
//! Identifiers, directory entries, subscriptions, peer records, and the
//! ordered child list whose totals the capacity manager keeps honest.

use serde::{Deserialize, Serialize};

use crate::primitive::ResourceType;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque, globally unique resource identifier (value object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// `/`-delimited human-readable path from the root resource (value object).
///
/// Derived as `parent.path + "/" + name` at creation time and never
/// recomputed afterward; rename is not supported by this engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructuredPath(pub String);

impl StructuredPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Child path under this one.
    pub fn join(&self, name: &str) -> StructuredPath {
        StructuredPath(format!("{}/{}", self.0, name))
    }

    /// Path depth (number of segments).
    pub fn depth(&self) -> u32 {
        self.0.split('/').count() as u32
    }

    /// True when `other` is this path or lies underneath it.
    pub fn contains(&self, other: &StructuredPath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }
}

impl std::fmt::Display for StructuredPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StructuredPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Directory Entry
// =============================================================================

/// Directory index record, one per live resource.
///
/// Mirrors the identifying fields of a resource for fast lookup by either
/// identifier or structured path, independent of the type-specific store.
/// Created together with the resource and deleted exactly when it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Resource identifier
    pub ri: ResourceId,
    /// Resource kind
    pub ty: ResourceType,
    /// Local resource name
    pub rn: String,
    /// Structured path
    pub sid: StructuredPath,
    /// Parent identifier (absent only for the root)
    pub pi: Option<ResourceId>,
    /// Path depth
    pub level: u32,
    /// Creator originator, when recorded
    pub creator: Option<String>,
}

// =============================================================================
// Subscription
// =============================================================================

/// Change-event kind delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A resource was updated (wire code 1)
    Updated,
    /// A direct child was created (wire code 3)
    Created,
}

impl EventKind {
    pub fn code(&self) -> u8 {
        match self {
            EventKind::Updated => 1,
            EventKind::Created => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventKind::Updated),
            3 => Some(EventKind::Created),
            _ => None,
        }
    }
}

/// Per-subscription event criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCriteria {
    /// Event kinds that trigger delivery
    pub event_kinds: Vec<EventKind>,
    /// For created events, the child kinds that match; absent matches all
    pub child_types: Option<Vec<ResourceType>>,
}

impl Default for EventCriteria {
    fn default() -> Self {
        // When criteria are unset the default is "updated attributes"
        Self {
            event_kinds: vec![EventKind::Updated],
            child_types: None,
        }
    }
}

/// What the delivery payload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    /// Full resulting resource representation (wire code 1, default)
    FullAttributes,
    /// Only the attributes carried by the triggering request (wire code 2)
    ModifiedAttributes,
}

impl ContentMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ContentMode::FullAttributes),
            2 => Some(ContentMode::ModifiedAttributes),
            _ => None,
        }
    }
}

/// Subscription resource as consumed by the notification engine.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Subscription resource identifier
    pub ri: ResourceId,
    /// Structured path, reported as the subscription reference in deliveries
    pub sid: StructuredPath,
    /// Subscribed-to (parent) resource
    pub parent: ResourceId,
    /// Delivery endpoints, in declared order
    pub targets: Vec<String>,
    /// Event criteria; unset means the default criteria apply
    pub criteria: Option<EventCriteria>,
    /// Delivery content mode
    pub content_mode: ContentMode,
}

// =============================================================================
// Remote Peer Record
// =============================================================================

/// Registration record of a federated peer node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePeerRecord {
    /// Peer identifier, with its leading `/` (e.g. `/peerZ`)
    pub cse_id: String,
    /// Reachable addresses, first-reachable semantics
    pub addresses: Vec<String>,
    /// Declared protocol release version
    pub release_version: Option<String>,
}

// =============================================================================
// Ordered Child List
// =============================================================================

/// One member of an ordered child list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub ri: ResourceId,
    /// Recorded byte size at insertion time
    pub byte_size: u64,
}

/// Append-ordered, capacity-bounded child list of an owner resource.
///
/// Invariants: `count()` equals the entry count and `cumulative_size` equals
/// the sum of the recorded sizes of still-present entries. Mutated only
/// through the capacity manager, never directly by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedChildList {
    entries: Vec<ChildEntry>,
    cumulative_size: u64,
    /// Maximum number of entries
    pub max_count: u32,
    /// Maximum cumulative byte size
    pub max_byte_size: u64,
    /// Owner modification sequence, bumped on every list mutation
    pub sequence: u64,
}

impl OrderedChildList {
    pub fn new(max_count: u32, max_byte_size: u64) -> Self {
        Self {
            entries: Vec::new(),
            cumulative_size: 0,
            max_count,
            max_byte_size,
            sequence: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn cumulative_size(&self) -> u64 {
        self.cumulative_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a new entry and account its size.
    pub fn append(&mut self, ri: ResourceId, byte_size: u64) {
        self.cumulative_size += byte_size;
        self.entries.push(ChildEntry { ri, byte_size });
    }

    /// Remove and return the oldest entry, subtracting its recorded size.
    pub fn evict_oldest(&mut self) -> Option<ChildEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.remove(0);
        self.cumulative_size = self.cumulative_size.saturating_sub(entry.byte_size);
        Some(entry)
    }

    /// Remove and return the newest entry, subtracting its recorded size.
    pub fn evict_newest(&mut self) -> Option<ChildEntry> {
        let entry = self.entries.pop()?;
        self.cumulative_size = self.cumulative_size.saturating_sub(entry.byte_size);
        Some(entry)
    }

    /// Remove a specific member (direct delete of a list member).
    pub fn remove(&mut self, ri: &ResourceId) -> Option<ChildEntry> {
        let idx = self.entries.iter().position(|e| &e.ri == ri)?;
        let entry = self.entries.remove(idx);
        self.cumulative_size = self.cumulative_size.saturating_sub(entry.byte_size);
        Some(entry)
    }

    /// Oldest (first-appended) entry.
    pub fn oldest(&self) -> Option<&ChildEntry> {
        self.entries.first()
    }

    /// Newest (last-appended) entry.
    pub fn newest(&self) -> Option<&ChildEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[ChildEntry] {
        &self.entries
    }

    /// Check the count/size bookkeeping against the entries.
    pub fn totals_consistent(&self) -> bool {
        self.cumulative_size == self.entries.iter().map(|e| e.byte_size).sum::<u64>()
    }

    /// True when both bounds hold.
    pub fn within_bounds(&self) -> bool {
        self.count() <= self.max_count && self.cumulative_size <= self.max_byte_size
    }
}
