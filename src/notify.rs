//! Notification Engine
//!
//! Evaluates subscriptions after successful create and update operations and
//! delivers `m2m:sgn` notification envelopes to each subscription target.
//! Delivery runs detached from the request path: the response to the
//! triggering request never waits on notification transport.
//!
//! Targets come in three forms: http(s) URIs, mqtt URIs, and entity
//! identifiers whose registered point-of-access addresses are tried in order
//! until one delivery succeeds.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::addressing::{resolve_entry_by_address, resolve_target, CseIdentity};
use crate::domain::{
    ContentMode, Directory, EventKind, MqttPublisher, ResourceId, ResourceStore, Subscription,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::primitive::ResourceType;

// =============================================================================
// Engine
// =============================================================================

pub struct NotificationEngine {
    store: Arc<dyn ResourceStore>,
    directory: Arc<dyn Directory>,
    mqtt: Arc<dyn MqttPublisher>,
    http: reqwest::Client,
    identity: CseIdentity,
}

/// A resource event observed by the dispatcher.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    /// The subscribed-to resource: the parent for created children, the
    /// resource itself for updates
    pub subscribed_to: ResourceId,
    pub kind: EventKind,
    /// Type of the created child, for create events
    pub created_type: Option<ResourceType>,
    /// Full representation of the affected resource
    pub full: Value,
    /// Just the attributes the triggering request carried, when available
    pub modified: Option<Value>,
}

impl NotificationEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        directory: Arc<dyn Directory>,
        mqtt: Arc<dyn MqttPublisher>,
        identity: CseIdentity,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            mqtt,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            identity,
        }
    }

    /// Evaluate all subscriptions on the event's subscribed-to resource and
    /// deliver to every matching one. Called from a detached task.
    pub async fn on_resource_event(&self, event: ResourceEvent) {
        let subscriptions = match self.store.subscriptions_of(&event.subscribed_to).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(resource = %event.subscribed_to, error = %e,
                    "failed to load subscriptions");
                return;
            }
        };

        for sub in subscriptions {
            if !Self::matches(&sub, &event) {
                continue;
            }
            let envelope = Self::envelope(&sub, &event);
            for target in &sub.targets {
                match self.deliver(target, &envelope).await {
                    Ok(()) => {
                        metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&["delivered"])
                            .inc();
                        debug!(subscription = %sub.ri, target = %target, "notification delivered");
                    }
                    Err(e) => {
                        metrics::NOTIFICATIONS_TOTAL
                            .with_label_values(&["failed"])
                            .inc();
                        warn!(subscription = %sub.ri, target = %target, error = %e,
                            "notification delivery failed");
                    }
                }
            }
        }
    }

    /// Relay a notification body to a locally registered entity, trying its
    /// declared addresses in order. Serves the Notify operation.
    pub async fn notify_entity(&self, entity: &ResourceId, body: &Value) -> Result<()> {
        let addresses = self.store.entity_addresses(entity).await?;
        if addresses.is_empty() {
            return Err(Error::BadRequest(format!(
                "entity {} has no point of access",
                entity
            )));
        }
        let mut last_error = Error::Internal("no delivery attempted".into());
        for address in &addresses {
            let attempt = if address.starts_with("mqtt://") {
                self.deliver_mqtt(address, body).await
            } else {
                self.deliver_http(address, body).await
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Does a subscription's event criteria admit this event?
    fn matches(sub: &Subscription, event: &ResourceEvent) -> bool {
        let criteria = sub.criteria.clone().unwrap_or_default();
        if !criteria.event_kinds.contains(&event.kind) {
            return false;
        }
        // Child-type filter applies to create events only
        if event.kind == EventKind::Created {
            if let Some(ref child_types) = criteria.child_types {
                match event.created_type {
                    Some(ty) => {
                        if !child_types.contains(&ty) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }

    /// Build the `m2m:sgn` envelope for one subscription.
    fn envelope(sub: &Subscription, event: &ResourceEvent) -> Value {
        let rep = match sub.content_mode {
            ContentMode::FullAttributes => event.full.clone(),
            ContentMode::ModifiedAttributes => {
                event.modified.clone().unwrap_or_else(|| event.full.clone())
            }
        };
        json!({
            "m2m:sgn": {
                "nev": {
                    "rep": rep,
                    "sur": sub.sid.as_str(),
                    "net": event.kind.code(),
                }
            }
        })
    }

    /// Deliver one envelope to one target.
    async fn deliver(&self, target: &str, envelope: &Value) -> Result<()> {
        if target.starts_with("http://") || target.starts_with("https://") {
            self.deliver_http(target, envelope).await
        } else if target.starts_with("mqtt://") {
            self.deliver_mqtt(target, envelope).await
        } else {
            self.deliver_entity(target, envelope).await
        }
    }

    async fn deliver_http(&self, uri: &str, envelope: &Value) -> Result<()> {
        let response = self
            .http
            .post(uri)
            .header("X-M2M-Origin", &self.identity.cse_id)
            .header("X-M2M-RI", ResourceId::generate().as_str())
            .json(envelope)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Forwarding(format!(
                "notification target {} answered {}",
                uri,
                response.status()
            )))
        }
    }

    async fn deliver_mqtt(&self, uri: &str, envelope: &Value) -> Result<()> {
        let topic = mqtt_topic(uri);
        self.mqtt.publish(&topic, envelope).await
    }

    /// An entity-id target: resolve its registered addresses and try them in
    /// order until one delivery succeeds.
    async fn deliver_entity(&self, target: &str, envelope: &Value) -> Result<()> {
        let resolved = resolve_target(target, &self.identity);
        if !resolved.is_local {
            return Err(Error::Forwarding(format!(
                "notification target {} is not registered locally",
                target
            )));
        }
        let entry = resolve_entry_by_address(&resolved.path, self.directory.as_ref())
            .await?
            .ok_or_else(|| Error::NotFound(format!("notification target {} not found", target)))?;
        self.notify_entity(&entry.ri, envelope).await
    }
}

/// Derive the mqtt topic from an mqtt URI: the path component with any query
/// string removed, suffixed with the serialization hint.
pub fn mqtt_topic(uri: &str) -> String {
    let without_scheme = uri.split("://").nth(1).unwrap_or(uri);
    let path = match without_scheme.find('/') {
        Some(idx) => &without_scheme[idx..],
        None => "",
    };
    let path = path.split('?').next().unwrap_or("");
    format!("{}/json", path.trim_end_matches('/'))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventCriteria, StructuredPath};

    fn subscription(criteria: Option<EventCriteria>) -> Subscription {
        Subscription {
            ri: ResourceId::new("sub1"),
            sid: StructuredPath::new("base/cnt1/sub1"),
            parent: ResourceId::new("cnt1"),
            targets: vec!["http://listener.example/notify".into()],
            criteria,
            content_mode: ContentMode::FullAttributes,
        }
    }

    fn created_event(ty: ResourceType) -> ResourceEvent {
        ResourceEvent {
            subscribed_to: ResourceId::new("cnt1"),
            kind: EventKind::Created,
            created_type: Some(ty),
            full: json!({"m2m:cin": {"rn": "cin1"}}),
            modified: None,
        }
    }

    #[test]
    fn test_default_criteria_admits_updates_only() {
        let sub = subscription(None);
        let update = ResourceEvent {
            subscribed_to: ResourceId::new("cnt1"),
            kind: EventKind::Updated,
            created_type: None,
            full: json!({}),
            modified: None,
        };
        assert!(NotificationEngine::matches(&sub, &update));
        assert!(!NotificationEngine::matches(
            &sub,
            &created_event(ResourceType::ContentInstance)
        ));
    }

    #[test]
    fn test_child_type_filter_applies_to_creates() {
        let sub = subscription(Some(EventCriteria {
            event_kinds: vec![EventKind::Created],
            child_types: Some(vec![ResourceType::ContentInstance]),
        }));
        assert!(NotificationEngine::matches(
            &sub,
            &created_event(ResourceType::ContentInstance)
        ));
        assert!(!NotificationEngine::matches(
            &sub,
            &created_event(ResourceType::Container)
        ));
    }

    #[test]
    fn test_envelope_carries_subscription_reference_and_event_code() {
        let sub = subscription(Some(EventCriteria {
            event_kinds: vec![EventKind::Created],
            child_types: None,
        }));
        let envelope =
            NotificationEngine::envelope(&sub, &created_event(ResourceType::ContentInstance));
        let nev = &envelope["m2m:sgn"]["nev"];
        assert_eq!(nev["sur"], "base/cnt1/sub1");
        assert_eq!(nev["net"], 3);
        assert_eq!(nev["rep"]["m2m:cin"]["rn"], "cin1");
    }

    #[test]
    fn test_modified_mode_prefers_the_request_attributes() {
        let mut sub = subscription(None);
        sub.content_mode = ContentMode::ModifiedAttributes;
        let event = ResourceEvent {
            subscribed_to: ResourceId::new("cnt1"),
            kind: EventKind::Updated,
            created_type: None,
            full: json!({"m2m:cnt": {"rn": "cnt1", "lbl": ["a"]}}),
            modified: Some(json!({"m2m:cnt": {"lbl": ["a"]}})),
        };
        let envelope = NotificationEngine::envelope(&sub, &event);
        assert_eq!(
            envelope["m2m:sgn"]["nev"]["rep"],
            json!({"m2m:cnt": {"lbl": ["a"]}})
        );
    }

    #[test]
    fn test_mqtt_topic_derivation() {
        assert_eq!(
            mqtt_topic("mqtt://broker.example:1883/oneM2M/req/peerY"),
            "/oneM2M/req/peerY/json"
        );
        assert_eq!(
            mqtt_topic("mqtt://broker.example/oneM2M/req/peerY?rt=1"),
            "/oneM2M/req/peerY/json"
        );
        assert_eq!(mqtt_topic("mqtt://broker.example"), "/json");
    }
}
