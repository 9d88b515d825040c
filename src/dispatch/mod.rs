//! Request Dispatcher
//!
//! The single entry point for every request primitive. A request flows
//! through one pipeline: defaults, address resolution, forwarding for
//! non-local targets, virtual-resource detection, the root-operation guard,
//! the access decision, then the store operation and its notification side
//! effect. Failures anywhere surface as error response primitives through
//! one boundary at the bottom; no error escapes as a panic or a bare
//! transport failure.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::addressing::{
    detect_virtual, resolve_entry_by_address, resolve_target, CseIdentity, VirtualKind,
    VirtualTarget,
};
use crate::capacity::{estimate_content_size, CapacityManager};
use crate::domain::{
    AccessDecider, Directory, DirectoryEntry, EventKind, ResourceStore, StoreRequest,
    StoreResponse,
};
use crate::error::{Error, Result};
use crate::forward::{Forwarder, DEFAULT_RELEASE_VERSION};
use crate::metrics;
use crate::notify::{NotificationEngine, ResourceEvent};
use crate::primitive::{
    Operation, RequestPrimitive, ResourceType, ResponsePrimitive, ResultContent, StatusCode,
};

mod fanout;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub identity: CseIdentity,
    /// Originator granted unconditional access (engine-internal operations)
    pub admin_originator: String,
    /// Release version stamped on responses lacking one
    pub protocol_version: String,
}

impl DispatcherConfig {
    pub fn new(identity: CseIdentity, admin_originator: impl Into<String>) -> Self {
        Self {
            identity,
            admin_originator: admin_originator.into(),
            protocol_version: DEFAULT_RELEASE_VERSION.to_string(),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    directory: Arc<dyn Directory>,
    store: Arc<dyn ResourceStore>,
    access: Arc<dyn AccessDecider>,
    forwarder: Forwarder,
    notifier: Arc<NotificationEngine>,
    capacity: Arc<CapacityManager>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn ResourceStore>,
        access: Arc<dyn AccessDecider>,
        forwarder: Forwarder,
        notifier: Arc<NotificationEngine>,
        capacity: Arc<CapacityManager>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            directory,
            store,
            access,
            forwarder,
            notifier,
            capacity,
            config,
        }
    }

    pub fn identity(&self) -> &CseIdentity {
        &self.config.identity
    }

    /// Handle one request primitive end to end.
    #[instrument(skip_all, fields(op = %request.operation, to = %request.target, rqi = %request.request_id))]
    pub async fn handle(&self, request: RequestPrimitive) -> ResponsePrimitive {
        let started = Instant::now();
        metrics::REQUESTS_TOTAL
            .with_label_values(&[&request.operation.to_string()])
            .inc();

        let request_id = request.request_id.clone();
        let release_version = request
            .release_version
            .clone()
            .unwrap_or_else(|| self.config.protocol_version.clone());

        let mut response = match self.handle_inner(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "request rejected");
                ResponsePrimitive::error(e.status_code(), &request_id, e.to_string())
            }
        };
        if response.release_version.is_none() {
            response.release_version = Some(release_version);
        }

        info!(rsc = response.status.code(), elapsed_ms = started.elapsed().as_millis() as u64,
            "request handled");
        response
    }

    /// Boxed re-entry point: fan-out recursion needs a nameable future.
    pub(crate) fn handle_boxed(
        &self,
        request: RequestPrimitive,
    ) -> BoxFuture<'_, ResponsePrimitive> {
        Box::pin(self.handle(request))
    }

    async fn handle_inner(&self, mut request: RequestPrimitive) -> Result<ResponsePrimitive> {
        request.normalize_defaults();

        // Locality first: anything addressed to another node is relayed as-is
        let resolved = resolve_target(&request.target, &self.config.identity);
        if !resolved.is_local {
            return Ok(self.forwarder.forward(&request, &resolved.path).await);
        }
        let local_path = resolved.path;

        // Virtual resources shadow real resolution
        if let Some(virtual_target) = detect_virtual(&local_path, self.directory.as_ref()).await? {
            return self.dispatch_virtual(request, virtual_target).await;
        }

        let entry = resolve_entry_by_address(&local_path, self.directory.as_ref())
            .await?
            .ok_or_else(|| Error::NotFound(format!("resource {} does not exist", local_path)))?;

        self.guard_root_operations(&request, &entry)?;
        self.check_access(&request, &entry).await?;

        match request.operation {
            Operation::Create => self.dispatch_create(request, entry).await,
            Operation::Retrieve => self.dispatch_retrieve(request, entry).await,
            Operation::Update => self.dispatch_update(request, entry).await,
            Operation::Delete => self.dispatch_delete(request, entry).await,
            Operation::Notify => self.dispatch_notify(request, entry).await,
        }
    }

    // =========================================================================
    // Guards
    // =========================================================================

    /// The base resource is created at startup and lives as long as the node:
    /// it can never be created, replaced, or deleted through the request path.
    fn guard_root_operations(&self, request: &RequestPrimitive, entry: &DirectoryEntry) -> Result<()> {
        let creates_root = request.operation == Operation::Create
            && request.resource_type == Some(ResourceType::CseBase);
        let mutates_root = matches!(request.operation, Operation::Update | Operation::Delete)
            && entry.ty == ResourceType::CseBase;
        if creates_root || mutates_root {
            return Err(Error::OperationNotAllowed(
                "operations on the base resource itself are not permitted".into(),
            ));
        }
        Ok(())
    }

    /// Run the access decision, except for discovery retrieves whose results
    /// are filtered resource by resource inside the store.
    async fn check_access(&self, request: &RequestPrimitive, entry: &DirectoryEntry) -> Result<()> {
        if request.originator == self.config.admin_originator {
            return Ok(());
        }
        if request.operation == Operation::Retrieve && request.effective_filter().is_discovery() {
            return Ok(());
        }
        let decision = self.access.decide(request, entry).await?;
        if decision.granted {
            return Ok(());
        }
        match decision.status_override {
            // The decider's status answers the caller unchanged
            Some((status, debug)) => Err(Error::Denied(status, debug)),
            None => Err(Error::NoPrivilege(format!(
                "originator {} has no privilege on {}",
                request.originator, entry.sid
            ))),
        }
    }

    // =========================================================================
    // CRUD dispatch
    // =========================================================================

    async fn dispatch_create(
        &self,
        request: RequestPrimitive,
        parent: DirectoryEntry,
    ) -> Result<ResponsePrimitive> {
        let ty = request
            .resource_type
            .ok_or_else(|| Error::BadRequest("create requires a resource type".into()))?;

        // Members of bounded lists must be admissible before anything is made
        let is_list_member = ty.list_parent() == Some(parent.ty);
        if is_list_member {
            let size = estimate_content_size(request.payload.as_ref());
            self.capacity.admit(&parent.ri, size).await?;
        }

        let parent_ri = parent.ri.clone();
        let outcome = self
            .store
            .create(self.store_request(&request, parent))
            .await?;
        let mut response = self.finish(&request, outcome.clone(), StatusCode::Created)?;

        if response.status.is_success() {
            if let Some(ref created) = outcome.created {
                if is_list_member {
                    let sequence = self
                        .capacity
                        .insert_bounded(&parent_ri, &created.ri, created.byte_size)
                        .await?;
                    stamp_state_tag(&mut response.payload, sequence);
                }
                self.spawn_event(ResourceEvent {
                    subscribed_to: parent_ri,
                    kind: EventKind::Created,
                    created_type: Some(created.resource_type),
                    full: response.payload.clone().unwrap_or_else(|| json!({})),
                    modified: request.payload.clone(),
                });
            }
        }
        Ok(response)
    }

    async fn dispatch_retrieve(
        &self,
        request: RequestPrimitive,
        entry: DirectoryEntry,
    ) -> Result<ResponsePrimitive> {
        let outcome = self
            .store
            .retrieve(self.store_request(&request, entry))
            .await?;
        self.finish(&request, outcome, StatusCode::Ok)
    }

    async fn dispatch_update(
        &self,
        request: RequestPrimitive,
        entry: DirectoryEntry,
    ) -> Result<ResponsePrimitive> {
        let updated_ri = entry.ri.clone();
        let outcome = self
            .store
            .update(self.store_request(&request, entry))
            .await?;
        let response = self.finish(&request, outcome, StatusCode::Updated)?;

        if response.status.is_success() {
            self.spawn_event(ResourceEvent {
                subscribed_to: updated_ri,
                kind: EventKind::Updated,
                created_type: None,
                full: response.payload.clone().unwrap_or_else(|| json!({})),
                modified: request.payload.clone(),
            });
        }
        Ok(response)
    }

    async fn dispatch_delete(
        &self,
        request: RequestPrimitive,
        entry: DirectoryEntry,
    ) -> Result<ResponsePrimitive> {
        let member_of = match (entry.ty.list_parent(), entry.pi.clone()) {
            (Some(_), Some(parent)) => Some(parent),
            _ => None,
        };
        let bears_list = entry.ty.has_ordered_children();
        let deleted_ri = entry.ri.clone();

        let outcome = self
            .store
            .delete(self.store_request(&request, entry))
            .await?;
        let mut response = self.finish(&request, outcome, StatusCode::Deleted)?;

        if response.status.is_success() {
            // Keep the owner's list totals honest after a direct member delete
            if let Some(owner) = member_of {
                self.capacity.forget(&owner, &deleted_ri).await?;
            }
            if bears_list {
                self.capacity.release(&deleted_ri);
            }
            if request.effective_result_content() == ResultContent::Nothing {
                response.payload = None;
            }
        }
        Ok(response)
    }

    /// A notify addressed to a local entity is acknowledged unconditionally;
    /// delivery to the entity's registered addresses is best effort.
    async fn dispatch_notify(
        &self,
        request: RequestPrimitive,
        entry: DirectoryEntry,
    ) -> Result<ResponsePrimitive> {
        if let Some(ref payload) = request.payload {
            if let Err(e) = self.notifier.notify_entity(&entry.ri, payload).await {
                debug!(target = %entry.sid, error = %e, "notify delivery failed");
            }
        }
        Ok(ResponsePrimitive::new(StatusCode::Ok, &request.request_id))
    }

    // =========================================================================
    // Virtual dispatch
    // =========================================================================

    async fn dispatch_virtual(
        &self,
        request: RequestPrimitive,
        target: VirtualTarget,
    ) -> Result<ResponsePrimitive> {
        let parent = self
            .directory
            .resolve_by_id(&target.parent_ri)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("resource {} does not exist", target.parent_ri))
            })?;
        self.check_access(&request, &parent).await?;

        match target.kind {
            VirtualKind::FanOut => fanout::fan_out(self, request, &target).await,
            VirtualKind::RetrievalPoint => Err(Error::NotImplemented(
                "dataset retrieval points are served by the dataset collaborator".into(),
            )),
            VirtualKind::Latest | VirtualKind::Oldest => {
                self.dispatch_list_end(request, &target).await
            }
        }
    }

    /// Serve the `la`/`ol` views: retrieve or delete the member at the
    /// corresponding end of the parent's ordered child list.
    async fn dispatch_list_end(
        &self,
        request: RequestPrimitive,
        target: &VirtualTarget,
    ) -> Result<ResponsePrimitive> {
        let newest = target.kind == VirtualKind::Latest;
        match request.operation {
            Operation::Retrieve => {
                let member = if newest {
                    self.capacity.latest(&target.parent_ri).await?
                } else {
                    self.capacity.oldest(&target.parent_ri).await?
                };
                let member = member.ok_or_else(|| {
                    Error::NotFound(format!("{} holds no members", target.parent_ri))
                })?;
                let entry = self
                    .directory
                    .resolve_by_id(&member)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("member {} does not exist", member)))?;
                let outcome = self
                    .store
                    .retrieve(self.store_request(&request, entry))
                    .await?;
                self.finish(&request, outcome, StatusCode::Ok)
            }
            Operation::Delete => {
                let removed = if newest {
                    self.capacity.remove_latest(&target.parent_ri).await?
                } else {
                    self.capacity.remove_oldest(&target.parent_ri).await?
                };
                removed.ok_or_else(|| {
                    Error::NotFound(format!("{} holds no members", target.parent_ri))
                })?;
                Ok(ResponsePrimitive::new(
                    StatusCode::Deleted,
                    &request.request_id,
                ))
            }
            _ => Err(Error::OperationNotAllowed(
                "only Retrieve or Delete operation is allowed".into(),
            )),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn store_request(&self, request: &RequestPrimitive, target: DirectoryEntry) -> StoreRequest {
        StoreRequest {
            operation: request.operation,
            originator: request.originator.clone(),
            target,
            resource_type: request.resource_type,
            payload: request.payload.clone(),
            result_content: request.effective_result_content(),
            filter_criteria: request.effective_filter(),
            internal: false,
        }
    }

    /// Turn a store outcome into the response primitive, filling in the
    /// operation's default success status when the handler set none.
    fn finish(
        &self,
        request: &RequestPrimitive,
        outcome: StoreResponse,
        default_status: StatusCode,
    ) -> Result<ResponsePrimitive> {
        let status = outcome.status.unwrap_or(default_status);
        let mut response = ResponsePrimitive::new(status, &request.request_id);
        response.payload = outcome.payload;
        Ok(response)
    }

    /// Notification evaluation runs detached; the response never waits on it.
    fn spawn_event(&self, event: ResourceEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.on_resource_event(event).await;
        });
    }
}

/// Write the insertion sequence into a wrapped member representation.
fn stamp_state_tag(payload: &mut Option<serde_json::Value>, sequence: u64) {
    if let Some(serde_json::Value::Object(map)) = payload {
        if let Some(serde_json::Value::Object(inner)) = map.values_mut().next() {
            inner.insert("st".into(), json!(sequence));
        }
    }
}

pub use fanout::aggregate_payload;
