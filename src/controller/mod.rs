//! Controller for CredentialsBinding resources
//!
//! Reconciliation logic, the store client it runs against, and the runner
//! wiring it into a `kube::runtime::Controller`.

mod binding;
mod client;
mod deadline;
mod runner;

pub use binding::{error_policy, reconcile, reconcile_key, Context, ContextBuilder};
pub use client::{KubeClient, KubeClientImpl, ObjectKind, ObjectTarget};
pub use deadline::Deadline;
pub use runner::build_binding_controller;
