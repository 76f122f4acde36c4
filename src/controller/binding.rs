//! CredentialsBinding controller implementation
//!
//! Each pass fetches the binding fresh and branches on its deletion state:
//!
//! - add-path: hold the binding finalizer, then make sure the credential
//!   Secret and every Quota carry their reference markers
//! - delete-path: refuse while Shoots still use the binding, otherwise
//!   release the markers no other binding needs and drop the finalizer last
//!
//! All coordination between concurrent passes goes through conditional
//! writes. A lost write surfaces as a conflict and the pass is retried from a
//! fresh read.

use std::collections::HashMap;
use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::reflector::Store;
use kube::{Client, Resource};
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, KubeClientImpl, ObjectTarget};
use super::deadline::Deadline;
use crate::config::ControllerConfig;
use crate::consumers::{ConsumerResolver, ShootConsumerResolver};
use crate::crd::{BindingKey, CredentialsBinding, QuotaReference};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::markers::{
    add_finalizer_patch, credential_reference_patch, credential_release_patch,
    quota_reference_patch, quota_release_patch, remove_finalizer_patch,
};
use crate::refcount::{distinct_quotas, Holders, ReferenceIndex};
use crate::{Error, BINDING_FINALIZER, FIELD_MANAGER};

/// Controller context shared by every reconcile
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(config)
///     .binding_cache(controller.store())
///     .build();
/// ```
pub struct Context {
    /// Store client (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Resolver for workloads using a binding
    pub consumers: Arc<dyn ConsumerResolver>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Controller tunables
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Assemble a context from explicit parts
    ///
    /// Used where no API server is available, such as tests driving the
    /// reconciler against an in-memory store.
    pub fn from_parts(
        kube: Arc<dyn KubeClient>,
        consumers: Arc<dyn ConsumerResolver>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            consumers,
            events,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    consumers: Option<Arc<dyn ConsumerResolver>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
    binding_cache: Option<Store<CredentialsBinding>>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            consumers: None,
            events: None,
            config: ControllerConfig::default(),
            binding_cache: None,
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the controller's reflector store; used when the config enables it
    pub fn binding_cache(mut self, store: Store<CredentialsBinding>) -> Self {
        self.binding_cache = Some(store);
        self
    }

    /// Override the store client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the consumer resolver (primarily for testing)
    pub fn consumer_resolver(mut self, consumers: Arc<dyn ConsumerResolver>) -> Self {
        self.consumers = Some(consumers);
        self
    }

    /// Override the event publisher (primarily for testing)
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        let use_cache = self.config.use_binding_cache;
        let binding_cache = self.binding_cache;

        let kube = self.kube.unwrap_or_else(|| {
            let kube = KubeClientImpl::new(client.clone());
            let kube = match binding_cache {
                Some(store) if use_cache => kube.with_binding_cache(store),
                _ => kube,
            };
            Arc::new(kube)
        });

        Context {
            kube,
            consumers: self
                .consumers
                .unwrap_or_else(|| Arc::new(ShootConsumerResolver::new(client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, FIELD_MANAGER))),
            config: self.config,
        }
    }
}

/// Reconcile a CredentialsBinding
///
/// A lost write conflict is not a failure: the binding is requeued shortly
/// and the next pass starts from a fresh read.
#[instrument(skip(binding, ctx), fields(binding = %binding.key()))]
pub async fn reconcile(binding: Arc<CredentialsBinding>, ctx: Arc<Context>) -> Result<Action, Error> {
    match reconcile_key(&binding.key(), &ctx).await {
        Err(e) if e.is_conflict() => {
            debug!(error = %e, "write conflict, requeueing from a fresh read");
            Ok(Action::requeue(ctx.config.conflict_requeue()))
        }
        result => result,
    }
}

/// Run one pass for the binding stored under `key`
///
/// The object handed over by the watch may be stale, so the binding is read
/// again before deciding anything.
pub async fn reconcile_key(key: &BindingKey, ctx: &Context) -> Result<Action, Error> {
    let deadline = Deadline::start(ctx.config.reconcile_timeout());

    let Some(binding) = ctx.kube.get_binding(&key.namespace, &key.name).await? else {
        debug!("binding is gone, stop reconciling");
        return Ok(Action::await_change());
    };

    if binding.is_deleting() {
        release_references(&binding, ctx, &deadline).await?;
        Ok(Action::await_change())
    } else {
        ensure_references(&binding, ctx, &deadline).await?;
        Ok(Action::requeue(ctx.config.resync()))
    }
}

/// Error policy for the binding controller
///
/// Blocked deletions are expected and re-polled at a slower pace; invalid
/// bindings wait for a user change; everything else is retried.
pub fn error_policy(binding: Arc<CredentialsBinding>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = binding.key();
    match error {
        Error::DeletionBlocked { consumers, .. } => {
            warn!(binding = %key, ?consumers, "deletion blocked by consumers");
            Action::requeue(ctx.config.blocked_requeue())
        }
        e if e.is_conflict() => {
            debug!(binding = %key, error = %e, "write conflict");
            Action::requeue(ctx.config.conflict_requeue())
        }
        e if !e.is_retryable() => {
            error!(binding = %key, error = %e, "reconciliation failed, waiting for a change");
            Action::await_change()
        }
        e => {
            error!(binding = %key, error = %e, "reconciliation failed");
            Action::requeue(ctx.config.error_requeue())
        }
    }
}

async fn ensure_references(
    binding: &CredentialsBinding,
    ctx: &Context,
    deadline: &Deadline,
) -> Result<(), Error> {
    binding.validate()?;
    let key = binding.key();

    if let Some(patch) = add_finalizer_patch(&binding.metadata, BINDING_FINALIZER) {
        info!("adding finalizer");
        ctx.kube
            .patch_metadata(&ObjectTarget::binding(&key.namespace, &key.name), &patch)
            .await?;
    }

    deadline.check("ensure credential markers")?;
    let cref = &binding.credentials_ref;
    let target = ObjectTarget::secret(&cref.namespace, &cref.name);
    let secret = ctx
        .kube
        .get_secret(&cref.namespace, &cref.name)
        .await?
        .ok_or_else(|| target.not_found())?;

    if let Some(patch) = credential_reference_patch(&secret.metadata, binding.provider_type()) {
        info!(secret = %target, "marking credential as referenced");
        ctx.kube.patch_metadata(&target, &patch).await?;
    }

    for quota_ref in distinct_quotas(binding) {
        deadline.check("ensure quota markers")?;
        let target = ObjectTarget::quota(&quota_ref.namespace, &quota_ref.name);
        let quota = ctx
            .kube
            .get_quota(&quota_ref.namespace, &quota_ref.name)
            .await?
            .ok_or_else(|| target.not_found())?;

        if let Some(patch) = quota_reference_patch(&quota.metadata) {
            info!(quota = %quota_ref, "marking quota as referenced");
            ctx.kube.patch_metadata(&target, &patch).await?;
        }
    }

    Ok(())
}

async fn release_references(
    binding: &CredentialsBinding,
    ctx: &Context,
    deadline: &Deadline,
) -> Result<(), Error> {
    if !binding.has_finalizer(BINDING_FINALIZER) {
        debug!("finalizer already removed");
        return Ok(());
    }
    let key = binding.key();

    let consumers = ctx.consumers.associated_consumers(binding).await?;
    if !consumers.is_empty() {
        let note = format!(
            "Cannot delete CredentialsBinding, because the following Shoots are still referencing it: {}",
            consumers.join(", ")
        );
        ctx.events
            .publish(
                &binding.object_ref(&()),
                EventType::Warning,
                reasons::RESOURCE_REFERENCED,
                actions::DELETE,
                Some(note),
            )
            .await;
        return Err(Error::deletion_blocked(key.to_string(), consumers));
    }
    info!("no Shoots reference the binding, deletion accepted");

    deadline.check("count references")?;
    let bindings = ctx.kube.list_bindings().await?;
    let index = ReferenceIndex::build(&bindings);
    let mut gate = ReleaseGate::new(&bindings, ctx.consumers.as_ref());

    let holders = index.credential_holders(&binding.credentials_ref, &key);
    if gate.still_held(&holders).await? {
        info!(
            credential = %binding.credentials_ref,
            holders = ?holders,
            "credential still referenced by other bindings"
        );
    } else {
        deadline.check("release credential")?;
        release_credential(binding, ctx).await?;
    }

    let mut conflict = None;
    for quota_ref in distinct_quotas(binding) {
        let holders = index.quota_holders(quota_ref, &key);
        if gate.still_held(&holders).await? {
            debug!(quota = %quota_ref, "quota still referenced by other bindings");
            continue;
        }
        deadline.check("release quotas")?;
        match release_quota(quota_ref, ctx).await {
            Err(e) if e.is_conflict() => {
                debug!(quota = %quota_ref, "quota changed concurrently");
                conflict.get_or_insert(e);
            }
            other => other?,
        }
    }
    if let Some(e) = conflict {
        return Err(e);
    }

    deadline.check("remove finalizer")?;
    if let Some(patch) = remove_finalizer_patch(&binding.metadata, BINDING_FINALIZER) {
        info!("removing finalizer");
        match ctx
            .kube
            .patch_metadata(&ObjectTarget::binding(&key.namespace, &key.name), &patch)
            .await
        {
            Err(e) if e.is_not_found() => debug!("binding vanished before finalizer removal"),
            other => other?,
        }
    }

    Ok(())
}

async fn release_credential(binding: &CredentialsBinding, ctx: &Context) -> Result<(), Error> {
    let cref = &binding.credentials_ref;
    let target = ObjectTarget::secret(&cref.namespace, &cref.name);

    let Some(secret) = ctx.kube.get_secret(&cref.namespace, &cref.name).await? else {
        debug!(secret = %target, "credential already gone");
        return Ok(());
    };

    let Some(patch) = credential_release_patch(&secret.metadata) else {
        return Ok(());
    };
    info!(secret = %target, "releasing credential markers");
    match ctx.kube.patch_metadata(&target, &patch).await {
        Err(e) if e.is_not_found() => {
            debug!(secret = %target, "credential deleted during release");
            Ok(())
        }
        other => other,
    }
}

async fn release_quota(quota_ref: &QuotaReference, ctx: &Context) -> Result<(), Error> {
    let target = ObjectTarget::quota(&quota_ref.namespace, &quota_ref.name);

    let Some(quota) = ctx
        .kube
        .get_quota(&quota_ref.namespace, &quota_ref.name)
        .await?
    else {
        debug!(quota = %quota_ref, "quota already gone");
        return Ok(());
    };

    let Some(patch) = quota_release_patch(&quota.metadata) else {
        return Ok(());
    };
    info!(quota = %quota_ref, "releasing quota marker");
    match ctx.kube.patch_metadata(&target, &patch).await {
        Err(e) if e.is_not_found() => {
            debug!(quota = %quota_ref, "quota deleted during release");
            Ok(())
        }
        other => other,
    }
}

/// Decides whether other bindings still hold a shared object
///
/// Active holders always do. A holder that is itself being deleted only does
/// while its own deletion is blocked by consumers; the answer is asked once
/// per holder and pass.
struct ReleaseGate<'a> {
    bindings: HashMap<BindingKey, &'a CredentialsBinding>,
    consumers: &'a dyn ConsumerResolver,
    blocked: HashMap<BindingKey, bool>,
}

impl<'a> ReleaseGate<'a> {
    fn new(bindings: &'a [CredentialsBinding], consumers: &'a dyn ConsumerResolver) -> Self {
        Self {
            bindings: bindings.iter().map(|b| (b.key(), b)).collect(),
            consumers,
            blocked: HashMap::new(),
        }
    }

    async fn still_held(&mut self, holders: &Holders) -> Result<bool, Error> {
        if holders.has_active() {
            return Ok(true);
        }
        for key in &holders.releasing {
            if self.is_blocked(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn is_blocked(&mut self, key: &BindingKey) -> Result<bool, Error> {
        if let Some(blocked) = self.blocked.get(key) {
            return Ok(*blocked);
        }
        let Some(binding) = self.bindings.get(key).copied() else {
            return Ok(false);
        };
        let blocked = !self
            .consumers
            .associated_consumers(binding)
            .await?
            .is_empty();
        self.blocked.insert(key.clone(), blocked);
        Ok(blocked)
    }
}
