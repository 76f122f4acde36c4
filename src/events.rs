//! Kubernetes Event recording for the binding controller.
//!
//! Wraps `kube::runtime::events::Recorder` behind a trait so the reconciler
//! can be driven without an API server. Events are fire-and-forget: a failed
//! publish is logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on the given object.
    ///
    /// * `resource_ref` - the object the event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - machine-readable reason (e.g. "ResourceReferenced")
    /// * `action` - what the controller was doing (e.g. "Delete")
    /// * `note` - human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reason strings (REASON column of `kubectl get events`).
pub mod reasons {
    /// Deletion refused because Shoots still reference the binding
    pub const RESOURCE_REFERENCED: &str = "ResourceReferenced";
}

/// Event action strings (ACTION column of `kubectl get events`).
pub mod actions {
    /// Delete-path reconciliation
    pub const DELETE: &str = "Delete";
}
