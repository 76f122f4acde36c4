//! Store client used by the binding reconciler
//!
//! The trait keeps the reconciler independent of the API server so it can be
//! driven by mocks and in-memory stores in tests.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::reflector::Store;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{CredentialsBinding, Quota};
use crate::markers::MetadataPatch;
use crate::{Error, FIELD_MANAGER};

/// Kinds of object the reconciler writes to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// security.gardener.cloud/v1alpha1 CredentialsBinding
    CredentialsBinding,
    /// core/v1 Secret
    Secret,
    /// core.gardener.cloud/v1beta1 Quota
    Quota,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::CredentialsBinding => "CredentialsBinding",
            ObjectKind::Secret => "Secret",
            ObjectKind::Quota => "Quota",
        })
    }
}

/// A namespaced object addressed by kind, namespace and name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectTarget {
    /// Kind of the object
    pub kind: ObjectKind,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
}

impl ObjectTarget {
    /// Target a CredentialsBinding
    pub fn binding(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::CredentialsBinding, namespace, name)
    }

    /// Target a Secret
    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Secret, namespace, name)
    }

    /// Target a Quota
    pub fn quota(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Quota, namespace, name)
    }

    fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Not-found error for this target
    pub fn not_found(&self) -> Error {
        Error::not_found(self.kind.to_string(), &self.namespace, &self.name)
    }

    /// Conflict error for this target
    pub fn conflict(&self) -> Error {
        Error::conflict(self.kind.to_string(), &self.namespace, &self.name)
    }

    /// Translate an API error for this target into a classified [`Error`]
    pub fn classify(&self, err: kube::Error) -> Error {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => self.not_found(),
            kube::Error::Api(ae) if ae.code == 409 => self.conflict(),
            _ => Error::from(err),
        }
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Trait abstracting store operations for the binding reconciler
///
/// Reads return `Ok(None)` for absent objects. Writes report a missing
/// object as [`Error::NotFound`] and a failed precondition as
/// [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fresh read of one binding
    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialsBinding>, Error>;

    /// Snapshot of every binding in every namespace
    async fn list_bindings(&self) -> Result<Vec<CredentialsBinding>, Error>;

    /// Read a credential Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Read a Quota
    async fn get_quota(&self, namespace: &str, name: &str) -> Result<Option<Quota>, Error>;

    /// Apply a metadata merge patch to the target object
    async fn patch_metadata(&self, target: &ObjectTarget, patch: &MetadataPatch)
        -> Result<(), Error>;
}

/// Real Kubernetes client implementation
///
/// Bindings are listed from the controller's reflector cache when one is
/// attached, falling back to a live list otherwise. Single-object reads
/// always go to the API server.
pub struct KubeClientImpl {
    client: Client,
    binding_cache: Option<Store<CredentialsBinding>>,
}

impl KubeClientImpl {
    /// Create a client without a binding cache
    pub fn new(client: Client) -> Self {
        Self {
            client,
            binding_cache: None,
        }
    }

    /// Attach the controller's reflector store as the binding cache
    pub fn with_binding_cache(mut self, store: Store<CredentialsBinding>) -> Self {
        self.binding_cache = Some(store);
        self
    }

    async fn get_opt<K>(&self, target: ObjectTarget) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &target.namespace);
        api.get_opt(&target.name)
            .await
            .map_err(|e| target.classify(e))
    }

    async fn patch<K>(&self, target: &ObjectTarget, patch: &MetadataPatch) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &target.namespace);
        let body = patch.to_merge_patch();
        api.patch(
            &target.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&body),
        )
        .await
        .map_err(|e| target.classify(e))?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CredentialsBinding>, Error> {
        self.get_opt(ObjectTarget::binding(namespace, name)).await
    }

    async fn list_bindings(&self) -> Result<Vec<CredentialsBinding>, Error> {
        if let Some(store) = &self.binding_cache {
            store
                .wait_until_ready()
                .await
                .map_err(|e| Error::internal_with_context("cache", e.to_string()))?;
            let bindings: Vec<CredentialsBinding> =
                store.state().iter().map(|b| (**b).clone()).collect();
            debug!(count = bindings.len(), "listed bindings from cache");
            return Ok(bindings);
        }

        let api: Api<CredentialsBinding> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "listed bindings from API server");
        Ok(list.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        self.get_opt(ObjectTarget::secret(namespace, name)).await
    }

    async fn get_quota(&self, namespace: &str, name: &str) -> Result<Option<Quota>, Error> {
        self.get_opt(ObjectTarget::quota(namespace, name)).await
    }

    async fn patch_metadata(
        &self,
        target: &ObjectTarget,
        patch: &MetadataPatch,
    ) -> Result<(), Error> {
        match target.kind {
            ObjectKind::CredentialsBinding => self.patch::<CredentialsBinding>(target, patch).await,
            ObjectKind::Secret => self.patch::<Secret>(target, patch).await,
            ObjectKind::Quota => self.patch::<Quota>(target, patch).await,
        }
    }
}
