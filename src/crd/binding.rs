//! CredentialsBinding resource
//!
//! CredentialsBinding is owned by the Gardener API and keeps its fields at the
//! top level of the object instead of under `spec`, so the `kube::Resource`
//! impl is written by hand rather than derived.
//!
//! Example:
//! ```yaml
//! apiVersion: security.gardener.cloud/v1alpha1
//! kind: CredentialsBinding
//! metadata:
//!   name: b1
//!   namespace: ns1
//! provider:
//!   type: aws
//! credentialsRef:
//!   apiVersion: v1
//!   kind: Secret
//!   namespace: ns1
//!   name: secret-a
//! quotas:
//!   - namespace: ns1
//!     name: q1
//! ```

use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Deserialize, Serialize};

use super::types::{BindingKey, BindingProvider, CredentialsReference, QuotaReference};
use crate::Error;

/// A binding of one credential and zero or more quotas for a provider type
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsBinding {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Provider the credential is meant for
    pub provider: BindingProvider,

    /// The credential object this binding refers to
    pub credentials_ref: CredentialsReference,

    /// Quotas applying to workloads using this binding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotas: Vec<QuotaReference>,
}

impl Resource for CredentialsBinding {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("CredentialsBinding")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("security.gardener.cloud")
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("v1alpha1")
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("credentialsbindings")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl CredentialsBinding {
    /// Create a binding in `namespace` referencing a Secret credential
    pub fn new(
        namespace: &str,
        name: &str,
        provider_type: &str,
        credentials_ref: CredentialsReference,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            provider: BindingProvider::new(provider_type),
            credentials_ref,
            quotas: Vec::new(),
        }
    }

    /// Builder-style helper to attach quota references
    pub fn with_quotas(mut self, quotas: impl IntoIterator<Item = QuotaReference>) -> Self {
        self.quotas = quotas.into_iter().collect();
        self
    }

    /// Store identity of this binding
    pub fn key(&self) -> BindingKey {
        BindingKey::new(
            self.metadata.namespace.clone().unwrap_or_default(),
            self.metadata.name.clone().unwrap_or_default(),
        )
    }

    /// Provider type of this binding
    pub fn provider_type(&self) -> &str {
        &self.provider.type_
    }

    /// True once a deletion timestamp has been set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|s| s == finalizer))
    }

    /// Check the fields the reconciler depends on
    pub fn validate(&self) -> Result<(), Error> {
        let key = self.key();
        if key.namespace.is_empty() || key.name.is_empty() {
            return Err(Error::validation_for(
                key.to_string(),
                "binding must have a namespace and a name",
            ));
        }
        if self.credentials_ref.name.is_empty() || self.credentials_ref.namespace.is_empty() {
            return Err(Error::validation_for(
                key.to_string(),
                "credentialsRef must name a namespace and an object",
            ));
        }
        if self.provider.type_.is_empty() {
            return Err(Error::validation_for(
                key.to_string(),
                "provider.type must not be empty",
            ));
        }
        Ok(())
    }
}
