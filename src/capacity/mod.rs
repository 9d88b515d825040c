//! Capacity Manager
//!
//! Maintains the bounded, ordered child lists carried by container-like
//! resources. Admission is checked before a member is created; eviction of
//! the oldest members restores the count and cumulative-size bounds after
//! each insertion. All mutations of a given owner's list are serialized
//! through a per-owner async lock so that concurrent insertions never
//! interleave their read-modify-write cycles.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Directory, ResourceId, ResourceStore, StoreRequest};
use crate::error::{Error, Result};
use crate::metrics;
use crate::primitive::Operation;

#[cfg(test)]
mod proptest;

// =============================================================================
// Capacity Manager
// =============================================================================

pub struct CapacityManager {
    store: Arc<dyn ResourceStore>,
    directory: Arc<dyn Directory>,
    /// Per-owner serialization of list read-modify-write cycles
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
    /// Originator stamped on internally generated eviction deletes
    admin_originator: String,
}

impl CapacityManager {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        directory: Arc<dyn Directory>,
        admin_originator: impl Into<String>,
    ) -> Self {
        Self {
            store,
            directory,
            locks: DashMap::new(),
            admin_originator: admin_originator.into(),
        }
    }

    fn owner_lock(&self, owner: &ResourceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Admission check, performed before a member is created. A member whose
    /// own size exceeds the owner's byte bound can never be admitted; no
    /// amount of eviction would make room for it.
    pub async fn admit(&self, owner: &ResourceId, member_size: u64) -> Result<()> {
        let Some(list) = self.store.child_list(owner).await? else {
            return Err(Error::NotFound(format!(
                "no child list maintained for {}",
                owner
            )));
        };
        if member_size > list.max_byte_size {
            return Err(Error::NotAcceptable(format!(
                "content size {} exceeds the byte bound {} of {}",
                member_size, list.max_byte_size, owner
            )));
        }
        Ok(())
    }

    /// Record a newly created member and evict until the owner's bounds hold
    /// again. Returns the owner's new sequence number, which the caller
    /// stamps on the member as its state tag.
    pub async fn insert_bounded(
        &self,
        owner: &ResourceId,
        member: &ResourceId,
        member_size: u64,
    ) -> Result<u64> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let Some(mut list) = self.store.child_list(owner).await? else {
            return Err(Error::NotFound(format!(
                "no child list maintained for {}",
                owner
            )));
        };

        list.append(member.clone(), member_size);

        // One over on count after a single insertion, at most
        if list.count() > list.max_count {
            if let Some(evicted) = list.evict_oldest() {
                self.cascade_delete(&evicted.ri).await?;
            }
        }
        // Size can require several evictions when the new member is large
        while list.cumulative_size() > list.max_byte_size {
            let Some(evicted) = list.evict_oldest() else {
                break;
            };
            self.cascade_delete(&evicted.ri).await?;
        }

        list.sequence += 1;
        let sequence = list.sequence;
        // The member's state tag is authoritative only under the owner lock
        self.store.put_state_tag(member, sequence).await?;
        self.store.put_child_list(owner, list).await?;
        Ok(sequence)
    }

    /// Identifier of the newest member, for the `la` virtual view.
    pub async fn latest(&self, owner: &ResourceId) -> Result<Option<ResourceId>> {
        let list = self.store.child_list(owner).await?;
        Ok(list.and_then(|l| l.newest().map(|e| e.ri.clone())))
    }

    /// Identifier of the oldest member, for the `ol` virtual view.
    pub async fn oldest(&self, owner: &ResourceId) -> Result<Option<ResourceId>> {
        let list = self.store.child_list(owner).await?;
        Ok(list.and_then(|l| l.oldest().map(|e| e.ri.clone())))
    }

    /// Delete the newest member and its subtree.
    pub async fn remove_latest(&self, owner: &ResourceId) -> Result<Option<ResourceId>> {
        self.remove_end(owner, true).await
    }

    /// Delete the oldest member and its subtree.
    pub async fn remove_oldest(&self, owner: &ResourceId) -> Result<Option<ResourceId>> {
        self.remove_end(owner, false).await
    }

    async fn remove_end(&self, owner: &ResourceId, newest: bool) -> Result<Option<ResourceId>> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let Some(mut list) = self.store.child_list(owner).await? else {
            return Ok(None);
        };
        let evicted = if newest {
            list.evict_newest()
        } else {
            list.evict_oldest()
        };
        let Some(evicted) = evicted else {
            return Ok(None);
        };
        self.cascade_delete(&evicted.ri).await?;
        self.store.put_child_list(owner, list).await?;
        Ok(Some(evicted.ri))
    }

    /// Remove a member's bookkeeping after its resource was deleted through
    /// the normal delete path (not by eviction).
    pub async fn forget(&self, owner: &ResourceId, member: &ResourceId) -> Result<()> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let Some(mut list) = self.store.child_list(owner).await? else {
            return Ok(());
        };
        if list.remove(member).is_some() {
            self.store.put_child_list(owner, list).await?;
        }
        Ok(())
    }

    /// Drop the lock entry of a deleted owner so the table tracks only live
    /// list-bearing resources.
    pub fn release(&self, owner: &ResourceId) {
        self.locks.remove(owner);
    }

    /// Delete an evicted member's subtree through the store, stamped with the
    /// administrative originator so access control never blocks eviction.
    async fn cascade_delete(&self, member: &ResourceId) -> Result<()> {
        let Some(entry) = self.directory.resolve_by_id(member).await? else {
            warn!(member = %member, "evicted member already gone from the directory");
            return Ok(());
        };
        debug!(member = %member, "evicting list member");
        let request = StoreRequest::internal(Operation::Delete, &self.admin_originator, entry);
        self.store.delete(request).await?;
        metrics::EVICTIONS_TOTAL.inc();
        Ok(())
    }
}

/// Byte size attributed to a member's content. A string payload counts its
/// raw bytes; any other value counts its JSON encoding.
pub fn content_byte_size(content: Option<&Value>) -> u64 {
    match content {
        None => 0,
        Some(Value::String(s)) => s.len() as u64,
        Some(other) => other.to_string().len() as u64,
    }
}

/// Extract the member's content field (`con`) out of a possibly wrapped
/// payload (`{"m2m:cin": {...}}`) and return its attributed byte size.
pub fn estimate_content_size(payload: Option<&Value>) -> u64 {
    let Some(payload) = payload else {
        return 0;
    };
    let inner = match payload.as_object() {
        Some(map) if map.len() == 1 => map.values().next().unwrap_or(payload),
        _ => payload,
    };
    match inner.get("con") {
        Some(con) => content_byte_size(Some(con)),
        None => content_byte_size(Some(inner)),
    }
}

// =============================================================================
// Tests
// =============================================================================
