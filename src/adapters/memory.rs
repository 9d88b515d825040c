//! In-Memory Store Adapter
//!
//! A process-local implementation of the [`Directory`] and [`ResourceStore`]
//! ports backing a single node: attribute tables, the path index, and the
//! ordered child lists all live in maps behind `parking_lot` locks. Locks are
//! never held across an await point.
//!
//! Resource representations use the short-name attribute vocabulary
//! (`ri`, `rn`, `pi`, `ty`, `ct`, `lt`, ...) wrapped in the type's
//! `m2m:<short>` envelope.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::capacity::content_byte_size;
use crate::domain::{
    AccessDecider, AccessDecision, ContentMode, CreatedChild, Directory, DirectoryEntry,
    EventCriteria, EventKind, MqttPublisher, OrderedChildList, RemotePeerRecord, ResourceId,
    ResourceStore, StoreRequest, StoreResponse, StructuredPath, Subscription,
};
use crate::error::{Error, Result};
use crate::primitive::{
    FilterCriteria, RequestPrimitive, ResourceType, ResultContent, StatusCode,
};

// =============================================================================
// Defaults
// =============================================================================

/// Capacity bounds applied when a list-bearing resource declares none.
#[derive(Debug, Clone, Copy)]
pub struct ListDefaults {
    pub max_count: u32,
    pub max_byte_size: u64,
}

impl Default for ListDefaults {
    fn default() -> Self {
        Self {
            max_count: 100,
            max_byte_size: 1024 * 1024,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

struct StoredResource {
    entry: DirectoryEntry,
    attrs: Map<String, Value>,
}

#[derive(Default)]
struct State {
    resources: HashMap<ResourceId, StoredResource>,
    by_path: HashMap<String, ResourceId>,
    lists: HashMap<ResourceId, OrderedChildList>,
}

pub struct InMemoryStore {
    state: RwLock<State>,
    defaults: ListDefaults,
}

impl InMemoryStore {
    pub fn new(defaults: ListDefaults) -> Self {
        Self {
            state: RwLock::new(State::default()),
            defaults,
        }
    }

    /// Install the base resource. Called once at startup, before the node
    /// accepts requests.
    pub fn seed_base(&self, cse_id: &str, base_rn: &str) -> DirectoryEntry {
        let ri = ResourceId::new(cse_id.trim_start_matches('/'));
        let entry = DirectoryEntry {
            ri: ri.clone(),
            ty: ResourceType::CseBase,
            rn: base_rn.to_string(),
            sid: StructuredPath::new(base_rn),
            pi: None,
            level: 0,
            creator: None,
        };
        let now = timestamp();
        let mut attrs = Map::new();
        attrs.insert("ri".into(), json!(ri.as_str()));
        attrs.insert("rn".into(), json!(base_rn));
        attrs.insert("ty".into(), json!(ResourceType::CseBase.code()));
        attrs.insert("csi".into(), json!(cse_id));
        attrs.insert("ct".into(), json!(now));
        attrs.insert("lt".into(), json!(now));
        attrs.insert("srv".into(), json!(["2a", "3"]));

        let mut state = self.state.write();
        state.by_path.insert(base_rn.to_string(), ri.clone());
        state.resources.insert(
            ri,
            StoredResource {
                entry: entry.clone(),
                attrs,
            },
        );
        entry
    }

    /// Parent kinds a child kind may be created under.
    fn allowed_parents(ty: ResourceType) -> &'static [ResourceType] {
        use ResourceType::*;
        match ty {
            AccessControlPolicy => &[CseBase, ApplicationEntity],
            ApplicationEntity => &[CseBase],
            Container => &[CseBase, ApplicationEntity, Container, FlexContainer],
            ContentInstance => &[Container],
            CseBase => &[],
            Group => &[CseBase, ApplicationEntity],
            RemoteCse => &[CseBase],
            Subscription => &[
                AccessControlPolicy,
                ApplicationEntity,
                Container,
                CseBase,
                Group,
                RemoteCse,
                FlexContainer,
                ModelRepo,
                ModelDeployments,
                Deployment,
                Dataset,
            ],
            FlexContainer => &[CseBase, ApplicationEntity, FlexContainer],
            ModelRepo => &[CseBase, ApplicationEntity],
            MlModel => &[ModelRepo],
            ModelDeployments => &[CseBase, ApplicationEntity],
            Deployment => &[ModelDeployments],
            Dataset => &[CseBase, ApplicationEntity],
            DatasetFragment => &[Dataset],
        }
    }

    /// Unwrap `{"m2m:<short>": {...}}` into the attribute map; a bare object
    /// passes through.
    fn unwrap_payload(payload: Option<&Value>) -> Option<Map<String, Value>> {
        let value = payload?;
        let object = value.as_object()?;
        if object.len() == 1 {
            if let Some((key, inner)) = object.iter().next() {
                if key.contains(':') {
                    return inner.as_object().cloned();
                }
            }
        }
        Some(object.clone())
    }

    fn wrap(ty: ResourceType, attrs: &Map<String, Value>) -> Value {
        let mut envelope = Map::new();
        envelope.insert(
            format!("m2m:{}", ty.short_name()),
            Value::Object(attrs.clone()),
        );
        Value::Object(envelope)
    }

    /// Attributes of a resource with the list-derived counters overlaid.
    fn view(state: &State, stored: &StoredResource) -> Map<String, Value> {
        let mut attrs = stored.attrs.clone();
        if let Some(list) = state.lists.get(&stored.entry.ri) {
            attrs.insert("cni".into(), json!(list.count()));
            attrs.insert("cbs".into(), json!(list.cumulative_size()));
            attrs.insert("st".into(), json!(list.sequence));
        }
        attrs
    }

    fn direct_children(state: &State, parent: &DirectoryEntry) -> Vec<Value> {
        let prefix = format!("{}/", parent.sid.as_str());
        let mut children: Vec<&StoredResource> = state
            .resources
            .values()
            .filter(|r| {
                r.entry.sid.as_str().starts_with(&prefix)
                    && r.entry.level == parent.level + 1
            })
            .collect();
        children.sort_by(|a, b| a.entry.sid.as_str().cmp(b.entry.sid.as_str()));
        children
            .iter()
            .map(|r| {
                json!({
                    "nm": r.entry.rn,
                    "typ": r.entry.ty.code(),
                    "val": r.entry.sid.as_str(),
                })
            })
            .collect()
    }

    fn discover(state: &State, root: &DirectoryEntry, fc: &FilterCriteria) -> Vec<String> {
        let prefix = format!("{}/", root.sid.as_str());
        let mut matches: Vec<String> = state
            .resources
            .values()
            .filter(|r| {
                r.entry.sid.as_str() == root.sid.as_str()
                    || r.entry.sid.as_str().starts_with(&prefix)
            })
            .filter(|r| match fc.resource_types {
                Some(ref types) => types.contains(&r.entry.ty),
                None => true,
            })
            .filter(|r| match fc.labels {
                Some(ref wanted) => r
                    .attrs
                    .get("lbl")
                    .and_then(Value::as_array)
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(Value::as_str)
                            .any(|l| wanted.iter().any(|w| w == l))
                    })
                    .unwrap_or(false),
                None => true,
            })
            .map(|r| r.entry.sid.as_str().to_string())
            .collect();
        matches.sort();
        matches
    }

    /// Type-specific attribute validation at creation.
    fn validate_new(ty: ResourceType, attrs: &Map<String, Value>) -> Option<StoreResponse> {
        match ty {
            ResourceType::Subscription => {
                let targets_ok = attrs
                    .get("nu")
                    .and_then(Value::as_array)
                    .map(|a| !a.is_empty())
                    .unwrap_or(false);
                if !targets_ok {
                    return Some(StoreResponse::failed(
                        StatusCode::BadRequest,
                        "nu cannot be empty",
                    ));
                }
            }
            ResourceType::ContentInstance => {
                if !attrs.contains_key("con") {
                    return Some(StoreResponse::failed(
                        StatusCode::BadRequest,
                        "con is mandatory for a content instance",
                    ));
                }
            }
            ResourceType::RemoteCse => {
                let csi_ok = attrs.get("csi").and_then(Value::as_str).is_some();
                if !csi_ok {
                    return Some(StoreResponse::failed(
                        StatusCode::BadRequest,
                        "csi is mandatory for a remote node registration",
                    ));
                }
            }
            ResourceType::Group => {
                if let Some(mid) = attrs.get("mid") {
                    if !mid.is_array() {
                        return Some(StoreResponse::failed(
                            StatusCode::BadRequest,
                            "mid must be a list of member addresses",
                        ));
                    }
                }
            }
            _ => {}
        }
        None
    }
}

// =============================================================================
// Directory Port
// =============================================================================

#[async_trait]
impl Directory for InMemoryStore {
    async fn resolve_by_path(&self, sid: &StructuredPath) -> Result<Option<DirectoryEntry>> {
        let state = self.state.read();
        Ok(state
            .by_path
            .get(sid.as_str())
            .and_then(|ri| state.resources.get(ri))
            .map(|r| r.entry.clone()))
    }

    async fn resolve_by_id(&self, ri: &ResourceId) -> Result<Option<DirectoryEntry>> {
        let state = self.state.read();
        Ok(state.resources.get(ri).map(|r| r.entry.clone()))
    }

    async fn create(&self, entry: DirectoryEntry) -> Result<()> {
        let mut state = self.state.write();
        state
            .by_path
            .insert(entry.sid.as_str().to_string(), entry.ri.clone());
        state.resources.insert(
            entry.ri.clone(),
            StoredResource {
                entry,
                attrs: Map::new(),
            },
        );
        Ok(())
    }

    async fn delete(&self, ri: &ResourceId) -> Result<()> {
        let mut state = self.state.write();
        if let Some(removed) = state.resources.remove(ri) {
            state.by_path.remove(removed.entry.sid.as_str());
            state.lists.remove(ri);
        }
        Ok(())
    }
}

// =============================================================================
// Resource Store Port
// =============================================================================

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn create(&self, request: StoreRequest) -> Result<StoreResponse> {
        let ty = request
            .resource_type
            .ok_or_else(|| Error::BadRequest("create requires a resource type".into()))?;
        let parent = request.target;

        if !Self::allowed_parents(ty).contains(&parent.ty) {
            let response = if ty == ResourceType::Subscription {
                StoreResponse::failed(
                    StatusCode::TargetNotSubscribable,
                    format!("a {} cannot be subscribed to", parent.ty),
                )
            } else {
                StoreResponse::failed(
                    StatusCode::InvalidChildType,
                    format!("a {} cannot be created under a {}", ty, parent.ty),
                )
            };
            return Ok(response);
        }

        let mut attrs = Self::unwrap_payload(request.payload.as_ref())
            .ok_or_else(|| Error::BadRequest("create requires an object payload".into()))?;

        if let Some(rejection) = Self::validate_new(ty, &attrs) {
            return Ok(rejection);
        }

        let ri = ResourceId::generate();
        let rn = attrs
            .get("rn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_{}", ty.short_name(), ri.as_str()));
        let sid = parent.sid.join(&rn);

        let mut state = self.state.write();
        if state.by_path.contains_key(sid.as_str()) {
            return Ok(StoreResponse::failed(
                StatusCode::Conflict,
                format!("{} already exists", sid),
            ));
        }

        // Explicit `cr: null` asks the node to record the originator
        let creator = match attrs.get("cr") {
            Some(Value::Null) => {
                attrs.insert("cr".into(), json!(request.originator));
                Some(request.originator.clone())
            }
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };

        let now = timestamp();
        attrs.insert("ri".into(), json!(ri.as_str()));
        attrs.insert("rn".into(), json!(rn));
        attrs.insert("pi".into(), json!(parent.ri.as_str()));
        attrs.insert("ty".into(), json!(ty.code()));
        attrs.insert("ct".into(), json!(now));
        attrs.insert("lt".into(), json!(now));

        let mut byte_size = 0;
        if ty.list_parent().is_some() {
            byte_size = content_byte_size(attrs.get("con"));
            attrs.insert("cs".into(), json!(byte_size));
            // State tag is stamped by the capacity manager once the
            // insertion is recorded under the owner's lock
        }

        if ty.has_ordered_children() {
            let max_count = attrs
                .get("mni")
                .and_then(Value::as_u64)
                .map(|v| v as u32)
                .unwrap_or(self.defaults.max_count);
            let max_bytes = attrs
                .get("mbs")
                .and_then(Value::as_u64)
                .unwrap_or(self.defaults.max_byte_size);
            attrs.insert("mni".into(), json!(max_count));
            attrs.insert("mbs".into(), json!(max_bytes));
            state
                .lists
                .insert(ri.clone(), OrderedChildList::new(max_count, max_bytes));
        }

        let entry = DirectoryEntry {
            ri: ri.clone(),
            ty,
            rn,
            sid: sid.clone(),
            pi: Some(parent.ri.clone()),
            level: parent.level + 1,
            creator,
        };

        debug!(sid = %sid, ty = %ty, "resource created");
        state.by_path.insert(sid.as_str().to_string(), ri.clone());
        state.resources.insert(
            ri.clone(),
            StoredResource {
                entry,
                attrs: attrs.clone(),
            },
        );

        let payload = match request.result_content {
            ResultContent::Nothing => None,
            _ => Some(Self::wrap(ty, &attrs)),
        };
        Ok(StoreResponse {
            status: None,
            payload,
            created: Some(CreatedChild {
                ri,
                resource_type: ty,
                parent: parent.ri,
                byte_size,
            }),
        })
    }

    async fn retrieve(&self, request: StoreRequest) -> Result<StoreResponse> {
        let state = self.state.read();
        let Some(stored) = state.resources.get(&request.target.ri) else {
            return Ok(StoreResponse::failed(
                StatusCode::NotFound,
                format!("resource {} does not exist", request.target.sid),
            ));
        };

        if request.filter_criteria.is_discovery() {
            let found = Self::discover(&state, &stored.entry, &request.filter_criteria);
            return Ok(StoreResponse::ok_with(json!({ "m2m:uril": found })));
        }

        let attrs = Self::view(&state, stored);
        let payload = match request.result_content {
            ResultContent::Nothing => None,
            ResultContent::Attributes => Some(Self::wrap(stored.entry.ty, &attrs)),
            ResultContent::AttributesAndChildren => {
                let mut with_children = attrs;
                with_children.insert(
                    "ch".into(),
                    Value::Array(Self::direct_children(&state, &stored.entry)),
                );
                Some(Self::wrap(stored.entry.ty, &with_children))
            }
            ResultContent::ChildrenOnly => Some(json!({
                "m2m:ch": Self::direct_children(&state, &stored.entry)
            })),
        };
        Ok(StoreResponse {
            status: None,
            payload,
            created: None,
        })
    }

    async fn update(&self, request: StoreRequest) -> Result<StoreResponse> {
        let changes = Self::unwrap_payload(request.payload.as_ref())
            .ok_or_else(|| Error::BadRequest("update requires an object payload".into()))?;

        for fixed in ["ri", "ty", "pi", "rn", "ct"] {
            if changes.contains_key(fixed) {
                return Ok(StoreResponse::failed(
                    StatusCode::BadRequest,
                    format!("attribute {} cannot be updated", fixed),
                ));
            }
        }

        let mut state = self.state.write();
        let ri = request.target.ri.clone();
        let Some(stored) = state.resources.get_mut(&ri) else {
            return Ok(StoreResponse::failed(
                StatusCode::NotFound,
                format!("resource {} does not exist", request.target.sid),
            ));
        };

        if stored.entry.ty == ResourceType::Subscription {
            if let Some(nu) = changes.get("nu") {
                let empty = nu.as_array().map(|a| a.is_empty()).unwrap_or(true);
                if empty {
                    return Ok(StoreResponse::failed(
                        StatusCode::BadRequest,
                        "nu cannot be empty",
                    ));
                }
            }
        }

        for (key, value) in changes {
            if value.is_null() {
                stored.attrs.remove(&key);
            } else {
                stored.attrs.insert(key, value);
            }
        }
        stored.attrs.insert("lt".into(), json!(timestamp()));
        let ty = stored.entry.ty;

        let stored = &state.resources[&ri];
        let attrs = Self::view(&state, stored);
        let payload = match request.result_content {
            ResultContent::Nothing => None,
            _ => Some(Self::wrap(ty, &attrs)),
        };
        Ok(StoreResponse {
            status: None,
            payload,
            created: None,
        })
    }

    async fn delete(&self, request: StoreRequest) -> Result<StoreResponse> {
        let mut state = self.state.write();
        let ri = request.target.ri.clone();
        let Some(root) = state.resources.get(&ri) else {
            return Ok(StoreResponse::failed(
                StatusCode::NotFound,
                format!("resource {} does not exist", request.target.sid),
            ));
        };
        let root_ty = root.entry.ty;
        let representation = Self::wrap(root_ty, &Self::view(&state, root));

        // Cascade over the whole subtree by path prefix
        let prefix = format!("{}/", request.target.sid.as_str());
        let doomed: Vec<ResourceId> = state
            .resources
            .values()
            .filter(|r| {
                r.entry.ri == ri || r.entry.sid.as_str().starts_with(&prefix)
            })
            .map(|r| r.entry.ri.clone())
            .collect();

        debug!(sid = %request.target.sid, subtree = doomed.len(), "resource deleted");
        for victim in doomed {
            if let Some(removed) = state.resources.remove(&victim) {
                state.by_path.remove(removed.entry.sid.as_str());
                state.lists.remove(&victim);
            }
        }

        Ok(StoreResponse {
            status: None,
            payload: Some(representation),
            created: None,
        })
    }

    async fn subscriptions_of(&self, parent: &ResourceId) -> Result<Vec<Subscription>> {
        let state = self.state.read();
        let mut subs: Vec<Subscription> = state
            .resources
            .values()
            .filter(|r| {
                r.entry.ty == ResourceType::Subscription
                    && r.entry.pi.as_ref() == Some(parent)
            })
            .map(|r| {
                let targets = r
                    .attrs
                    .get("nu")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let criteria = r.attrs.get("enc").and_then(parse_event_criteria);
                let content_mode = r
                    .attrs
                    .get("nct")
                    .and_then(Value::as_u64)
                    .and_then(|c| ContentMode::from_code(c as u8))
                    .unwrap_or(ContentMode::FullAttributes);
                Subscription {
                    ri: r.entry.ri.clone(),
                    sid: r.entry.sid.clone(),
                    parent: parent.clone(),
                    targets,
                    criteria,
                    content_mode,
                }
            })
            .collect();
        subs.sort_by(|a, b| a.sid.as_str().cmp(b.sid.as_str()));
        Ok(subs)
    }

    async fn group_members(&self, group: &ResourceId) -> Result<Vec<String>> {
        let state = self.state.read();
        let members = state
            .resources
            .get(group)
            .and_then(|r| r.attrs.get("mid"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(members)
    }

    async fn peer_record(&self, cse_id: &str) -> Result<Option<RemotePeerRecord>> {
        let state = self.state.read();
        let record = state
            .resources
            .values()
            .find(|r| {
                r.entry.ty == ResourceType::RemoteCse
                    && r.attrs.get("csi").and_then(Value::as_str) == Some(cse_id)
            })
            .map(|r| RemotePeerRecord {
                cse_id: cse_id.to_string(),
                addresses: r
                    .attrs
                    .get("poa")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                release_version: r
                    .attrs
                    .get("srv")
                    .and_then(Value::as_array)
                    .and_then(|a| a.last())
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        Ok(record)
    }

    async fn entity_addresses(&self, ri: &ResourceId) -> Result<Vec<String>> {
        let state = self.state.read();
        let addresses = state
            .resources
            .get(ri)
            .and_then(|r| r.attrs.get("poa"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(addresses)
    }

    async fn child_list(&self, owner: &ResourceId) -> Result<Option<OrderedChildList>> {
        let state = self.state.read();
        Ok(state.lists.get(owner).cloned())
    }

    async fn put_child_list(&self, owner: &ResourceId, list: OrderedChildList) -> Result<()> {
        let mut state = self.state.write();
        // A write racing the owner's deletion must not resurrect its list
        if !state.resources.contains_key(owner) {
            return Ok(());
        }
        state.lists.insert(owner.clone(), list);
        Ok(())
    }

    async fn put_state_tag(&self, member: &ResourceId, sequence: u64) -> Result<()> {
        let mut state = self.state.write();
        if let Some(resource) = state.resources.get_mut(member) {
            resource.attrs.insert("st".into(), json!(sequence));
        }
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

fn parse_event_criteria(enc: &Value) -> Option<EventCriteria> {
    let enc = enc.as_object()?;
    let event_kinds = enc
        .get("net")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_u64)
                .filter_map(|c| EventKind::from_code(c as u8))
                .collect()
        })
        .unwrap_or_else(|| vec![EventKind::Updated]);
    let child_types = enc.get("chty").and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_u64)
            .filter_map(|c| ResourceType::from_code(c as u16))
            .collect()
    });
    Some(EventCriteria {
        event_kinds,
        child_types,
    })
}

// =============================================================================
// Access Deciders
// =============================================================================

/// Grants every request. The default until a policy collaborator is wired in.
pub struct AllowAllDecider;

#[async_trait]
impl AccessDecider for AllowAllDecider {
    async fn decide(
        &self,
        _request: &RequestPrimitive,
        _target: &DirectoryEntry,
    ) -> Result<AccessDecision> {
        Ok(AccessDecision::granted())
    }
}

/// Denies a fixed set of originators. Test and lockdown tooling.
pub struct DenyListDecider {
    denied: Vec<String>,
}

impl DenyListDecider {
    pub fn new(denied: Vec<String>) -> Self {
        Self { denied }
    }
}

#[async_trait]
impl AccessDecider for DenyListDecider {
    async fn decide(
        &self,
        request: &RequestPrimitive,
        _target: &DirectoryEntry,
    ) -> Result<AccessDecision> {
        if self.denied.iter().any(|d| d == &request.originator) {
            Ok(AccessDecision::denied())
        } else {
            Ok(AccessDecision::granted())
        }
    }
}

// =============================================================================
// MQTT Publisher
// =============================================================================

/// Stand-in publisher for nodes running without a broker binding. Always
/// reports failure so delivery falls through to the next registered address.
pub struct UnboundMqttPublisher;

#[async_trait]
impl MqttPublisher for UnboundMqttPublisher {
    async fn publish(&self, topic: &str, _payload: &Value) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "no mqtt binding configured for topic {}",
            topic
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Operation;

    fn store() -> InMemoryStore {
        InMemoryStore::new(ListDefaults::default())
    }

    fn create_request(parent: DirectoryEntry, ty: ResourceType, payload: Value) -> StoreRequest {
        StoreRequest {
            operation: Operation::Create,
            originator: "Cclient".into(),
            target: parent,
            resource_type: Some(ty),
            payload: Some(payload),
            result_content: ResultContent::Attributes,
            filter_criteria: FilterCriteria::default(),
            internal: false,
        }
    }

    #[tokio::test]
    async fn test_create_under_seeded_base() {
        let store = store();
        let base = store.seed_base("/peerY", "base");

        let response = ResourceStore::create(&store, create_request(
                base,
                ResourceType::ApplicationEntity,
                json!({"m2m:ae": {"rn": "ae1", "poa": ["http://dev.example:8080"]}}),
            ))
            .await
            .unwrap();
        assert!(response.is_success());
        let created = response.created.unwrap();
        assert_eq!(created.resource_type, ResourceType::ApplicationEntity);

        let entry = store
            .resolve_by_path(&StructuredPath::new("base/ae1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.ri, created.ri);
        assert_eq!(entry.level, 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let payload = json!({"m2m:ae": {"rn": "ae1"}});

        let first = ResourceStore::create(&store, create_request(
                base.clone(),
                ResourceType::ApplicationEntity,
                payload.clone(),
            ))
            .await
            .unwrap();
        assert!(first.is_success());

        let second = ResourceStore::create(&store, create_request(base, ResourceType::ApplicationEntity, payload))
            .await
            .unwrap();
        assert_eq!(second.status, Some(StatusCode::Conflict));
    }

    #[tokio::test]
    async fn test_content_instance_needs_container_parent() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let response = ResourceStore::create(&store, create_request(
                base,
                ResourceType::ContentInstance,
                json!({"m2m:cin": {"con": "21"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status, Some(StatusCode::InvalidChildType));
    }

    #[tokio::test]
    async fn test_subscription_target_compatibility() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let cnt = ResourceStore::create(&store, create_request(
                base.clone(),
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1"}}),
            ))
            .await
            .unwrap();
        assert!(cnt.is_success());
        let cnt_entry = store
            .resolve_by_path(&StructuredPath::new("base/cnt1"))
            .await
            .unwrap()
            .unwrap();
        let cin = ResourceStore::create(&store, create_request(
                cnt_entry.clone(),
                ResourceType::ContentInstance,
                json!({"m2m:cin": {"rn": "cin1", "con": "21"}}),
            ))
            .await
            .unwrap();
        assert!(cin.is_success());
        let cin_entry = store
            .resolve_by_path(&StructuredPath::new("base/cnt1/cin1"))
            .await
            .unwrap()
            .unwrap();

        // A content instance cannot carry subscriptions
        let sub = ResourceStore::create(&store, create_request(
                cin_entry,
                ResourceType::Subscription,
                json!({"m2m:sub": {"rn": "sub1", "nu": ["http://x"]}}),
            ))
            .await
            .unwrap();
        assert_eq!(sub.status, Some(StatusCode::TargetNotSubscribable));
    }

    #[tokio::test]
    async fn test_subscription_requires_targets() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let response = ResourceStore::create(&store, create_request(
                base,
                ResourceType::Subscription,
                json!({"m2m:sub": {"rn": "sub1", "nu": []}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status, Some(StatusCode::BadRequest));
    }

    #[tokio::test]
    async fn test_update_merges_and_null_removes() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        ResourceStore::create(&store, create_request(
                base,
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1", "lbl": ["room1"]}}),
            ))
            .await
            .unwrap();
        let entry = store
            .resolve_by_path(&StructuredPath::new("base/cnt1"))
            .await
            .unwrap()
            .unwrap();

        let response = store
            .update(StoreRequest {
                operation: Operation::Update,
                originator: "Cclient".into(),
                target: entry,
                resource_type: None,
                payload: Some(json!({"m2m:cnt": {"lbl": null, "mni": 5}})),
                result_content: ResultContent::Attributes,
                filter_criteria: FilterCriteria::default(),
                internal: false,
            })
            .await
            .unwrap();
        assert!(response.is_success());
        let attrs = &response.payload.unwrap()["m2m:cnt"];
        assert!(attrs.get("lbl").is_none());
        assert_eq!(attrs["mni"], 5);
    }

    #[tokio::test]
    async fn test_fixed_attributes_reject_update() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        ResourceStore::create(&store, create_request(
                base,
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1"}}),
            ))
            .await
            .unwrap();
        let entry = store
            .resolve_by_path(&StructuredPath::new("base/cnt1"))
            .await
            .unwrap()
            .unwrap();

        let response = store
            .update(StoreRequest {
                operation: Operation::Update,
                originator: "Cclient".into(),
                target: entry,
                resource_type: None,
                payload: Some(json!({"m2m:cnt": {"ri": "other"}})),
                result_content: ResultContent::Attributes,
                filter_criteria: FilterCriteria::default(),
                internal: false,
            })
            .await
            .unwrap();
        assert_eq!(response.status, Some(StatusCode::BadRequest));
    }

    #[tokio::test]
    async fn test_delete_cascades_by_path() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        ResourceStore::create(&store, create_request(
                base.clone(),
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1"}}),
            ))
            .await
            .unwrap();
        let cnt = store
            .resolve_by_path(&StructuredPath::new("base/cnt1"))
            .await
            .unwrap()
            .unwrap();
        ResourceStore::create(&store, create_request(
                cnt.clone(),
                ResourceType::ContentInstance,
                json!({"m2m:cin": {"rn": "cin1", "con": "21"}}),
            ))
            .await
            .unwrap();

        ResourceStore::delete(&store, StoreRequest::internal(Operation::Delete, "Superman", cnt))
            .await
            .unwrap();

        assert!(store
            .resolve_by_path(&StructuredPath::new("base/cnt1"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .resolve_by_path(&StructuredPath::new("base/cnt1/cin1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_discovery_filters_by_type_and_label() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        ResourceStore::create(&store, create_request(
                base.clone(),
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1", "lbl": ["room1"]}}),
            ))
            .await
            .unwrap();
        ResourceStore::create(&store, create_request(
                base.clone(),
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt2", "lbl": ["room2"]}}),
            ))
            .await
            .unwrap();

        let response = store
            .retrieve(StoreRequest {
                operation: Operation::Retrieve,
                originator: "Cclient".into(),
                target: base,
                resource_type: None,
                payload: None,
                result_content: ResultContent::Attributes,
                filter_criteria: FilterCriteria {
                    usage: Some(crate::primitive::FilterUsage::Discovery),
                    resource_types: Some(vec![ResourceType::Container]),
                    labels: Some(vec!["room1".into()]),
                },
                internal: false,
            })
            .await
            .unwrap();
        let found = response.payload.unwrap()["m2m:uril"].clone();
        assert_eq!(found, json!(["base/cnt1"]));
    }

    #[tokio::test]
    async fn test_subscription_parsing() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let base_ri = base.ri.clone();
        ResourceStore::create(&store, create_request(
                base,
                ResourceType::Subscription,
                json!({"m2m:sub": {
                    "rn": "sub1",
                    "nu": ["http://listener.example/notify"],
                    "enc": {"net": [1, 3], "chty": [3]},
                    "nct": 2,
                }}),
            ))
            .await
            .unwrap();

        let subs = store.subscriptions_of(&base_ri).await.unwrap();
        assert_eq!(subs.len(), 1);
        let sub = &subs[0];
        assert_eq!(sub.targets, vec!["http://listener.example/notify"]);
        assert_eq!(sub.content_mode, ContentMode::ModifiedAttributes);
        let criteria = sub.criteria.as_ref().unwrap();
        assert_eq!(
            criteria.event_kinds,
            vec![EventKind::Updated, EventKind::Created]
        );
        assert_eq!(
            criteria.child_types,
            Some(vec![ResourceType::Container])
        );
    }

    #[tokio::test]
    async fn test_peer_record_lookup() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        ResourceStore::create(&store, create_request(
                base,
                ResourceType::RemoteCse,
                json!({"m2m:csr": {
                    "rn": "peerZ",
                    "csi": "/peerZ",
                    "poa": ["http://peerz.example:7579"],
                    "srv": ["2a"],
                }}),
            ))
            .await
            .unwrap();

        let record = store.peer_record("/peerZ").await.unwrap().unwrap();
        assert_eq!(record.addresses, vec!["http://peerz.example:7579"]);
        assert_eq!(record.release_version.as_deref(), Some("2a"));
        assert!(store.peer_record("/peerQ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_list_write_after_owner_delete_is_dropped() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let response = ResourceStore::create(&store, create_request(
                base,
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1"}}),
            ))
            .await
            .unwrap();
        let owner = response.created.unwrap().ri;
        assert!(store.child_list(&owner).await.unwrap().is_some());

        let entry = store.resolve_by_id(&owner).await.unwrap().unwrap();
        let deleted = ResourceStore::delete(&store, StoreRequest::internal(Operation::Delete, "Superman", entry))
            .await
            .unwrap();
        assert!(deleted.is_success());

        store
            .put_child_list(&owner, OrderedChildList::new(5, 100))
            .await
            .unwrap();
        assert!(store.child_list(&owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_tag_written_on_demand() {
        let store = store();
        let base = store.seed_base("/peerY", "base");
        let cnt = ResourceStore::create(&store, create_request(
                base,
                ResourceType::Container,
                json!({"m2m:cnt": {"rn": "cnt1"}}),
            ))
            .await
            .unwrap();
        let cnt_entry = store
            .resolve_by_id(&cnt.created.unwrap().ri)
            .await
            .unwrap()
            .unwrap();
        let cin = ResourceStore::create(&store, create_request(
                cnt_entry.clone(),
                ResourceType::ContentInstance,
                json!({"m2m:cin": {"con": "hello"}}),
            ))
            .await
            .unwrap();
        let member = cin.created.unwrap().ri;

        store.put_state_tag(&member, 7).await.unwrap();

        let request = StoreRequest {
            operation: Operation::Retrieve,
            originator: "Cclient".into(),
            target: store.resolve_by_id(&member).await.unwrap().unwrap(),
            resource_type: None,
            payload: None,
            result_content: ResultContent::Attributes,
            filter_criteria: FilterCriteria::default(),
            internal: false,
        };
        let view = store.retrieve(request).await.unwrap();
        assert_eq!(view.payload.unwrap()["m2m:cin"]["st"], json!(7));
    }
}
