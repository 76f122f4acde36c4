//! credbind - reference-counting reconciler for CredentialsBinding objects
//!
//! A CredentialsBinding points at one credential Secret and any number of
//! Quotas. Many bindings, owned by different tenants, may share the same
//! Secret or Quota, and the API server has no way to express "N owners,
//! release when zero". This crate implements that protocol client-side:
//!
//! - finalizers gate physical deletion of bindings (and of referenced Secrets)
//! - marker labels on Secrets and Quotas record that a binding refers to them
//! - on binding deletion, markers are released only after a scan of all
//!   bindings shows that no other binding still points at the same object
//!
//! # Modules
//!
//! - [`crd`] - CredentialsBinding, Quota and Shoot resource types
//! - [`markers`] - typed marker labels and the label/finalizer state machine
//! - [`refcount`] - reference counting over the binding collection
//! - [`consumers`] - resolver for workloads still depending on a binding
//! - [`controller`] - the reconciliation driver and store client
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - controller configuration (CLI flags and env vars)
//! - [`telemetry`] - tracing subscriber setup
//! - [`error`] - error types for the controller

#![deny(missing_docs)]

pub mod config;
pub mod consumers;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod markers;
pub mod refcount;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Store schema constants
// =============================================================================
// These values are a compatibility contract with objects already persisted in
// the API server. Changing any of them requires a migration.

/// Finalizer the controller places on every CredentialsBinding it has seen
pub const BINDING_FINALIZER: &str = "gardener";

/// Finalizer the controller places on every Secret referenced by a binding
///
/// The legacy SecretBinding controller uses the same token, so it may only be
/// removed when no legacy marker is present on the Secret.
pub const CREDENTIAL_FINALIZER: &str = "gardener.cloud/gardener";

/// Prefix of the provider-type label placed on referenced Secrets
pub const PROVIDER_LABEL_PREFIX: &str = "provider.shoot.gardener.cloud/";

/// Marker label: object is referenced by at least one CredentialsBinding
pub const CREDENTIALS_BINDING_REFERENCE_LABEL: &str = "reference.gardener.cloud/credentialsbinding";

/// Marker label: object is referenced by at least one legacy SecretBinding
pub const SECRET_BINDING_REFERENCE_LABEL: &str = "reference.gardener.cloud/secretbinding";

/// Value written for every marker label
pub const MARKER_VALUE: &str = "true";

/// Field manager used for every patch issued by the controller
pub const FIELD_MANAGER: &str = "credentialsbinding-controller";
