//! Shoot resource (core.gardener.cloud/v1beta1), the consumer of a binding
//!
//! Only the fields needed to resolve binding consumers are modelled; the rest
//! of the Shoot spec is ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The subset of a Shoot spec relevant to binding consumption
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.gardener.cloud",
    version = "v1beta1",
    kind = "Shoot",
    plural = "shoots",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// Name of the CredentialsBinding (in the Shoot's namespace) it uses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_binding_name: Option<String>,
}

impl Shoot {
    /// True if this Shoot uses the named CredentialsBinding
    pub fn uses_credentials_binding(&self, binding_name: &str) -> bool {
        self.spec.credentials_binding_name.as_deref() == Some(binding_name)
    }
}
