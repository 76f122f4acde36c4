//! Consumers of a binding
//!
//! A binding may not be released while a workload still uses it. The only
//! workload kind today is the Shoot, which names its binding through
//! `spec.credentialsBindingName` in the binding's own namespace.

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::{CredentialsBinding, Shoot};
use crate::Error;

/// Resolves the workloads that still depend on a binding
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsumerResolver: Send + Sync {
    /// Identities ("namespace/name") of every consumer of `binding`
    ///
    /// An empty list means the binding may be released.
    async fn associated_consumers(&self, binding: &CredentialsBinding)
        -> Result<Vec<String>, Error>;
}

/// Shoots in `shoots` that reference the binding `binding_name`, sorted
pub fn shoots_referencing(shoots: &[Shoot], binding_name: &str) -> Vec<String> {
    let mut names: Vec<String> = shoots
        .iter()
        .filter(|s| s.uses_credentials_binding(binding_name))
        .map(|s| format!("{}/{}", s.namespace().unwrap_or_default(), s.name_any()))
        .collect();
    names.sort();
    names
}

/// Resolver listing Shoots from the API server
pub struct ShootConsumerResolver {
    client: Client,
}

impl ShootConsumerResolver {
    /// Create a resolver using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConsumerResolver for ShootConsumerResolver {
    async fn associated_consumers(
        &self,
        binding: &CredentialsBinding,
    ) -> Result<Vec<String>, Error> {
        let key = binding.key();
        let api: Api<Shoot> = Api::namespaced(self.client.clone(), &key.namespace);
        let shoots = api.list(&ListParams::default()).await?;
        Ok(shoots_referencing(&shoots.items, &key.name))
    }
}
