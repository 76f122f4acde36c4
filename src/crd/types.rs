//! Reference types shared by the binding and quota resources

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provider section of a CredentialsBinding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct BindingProvider {
    /// Provider type (e.g. "aws", "gcp"); drives the provider label on the Secret
    #[serde(rename = "type")]
    pub type_: String,
}

impl BindingProvider {
    /// Create a provider section for the given type
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
        }
    }
}

/// Reference to the credential object of a binding
///
/// Two bindings share a credential only if all four fields match.
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsReference {
    /// API version of the referenced object (e.g. "v1")
    pub api_version: String,
    /// Kind of the referenced object (e.g. "Secret")
    pub kind: String,
    /// Namespace of the referenced object
    pub namespace: String,
    /// Name of the referenced object
    pub name: String,
}

impl CredentialsReference {
    /// Reference to a core/v1 Secret
    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CredentialsReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {}/{}",
            self.api_version, self.kind, self.namespace, self.name
        )
    }
}

/// Reference to a Quota; matched across bindings by namespace and name only
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct QuotaReference {
    /// Namespace of the Quota
    #[serde(default)]
    pub namespace: String,
    /// Name of the Quota
    pub name: String,
}

impl QuotaReference {
    /// Create a quota reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QuotaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of a binding in the store (namespace + name)
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    /// Namespace of the binding
    pub namespace: String,
    /// Name of the binding
    pub name: String,
}

impl BindingKey {
    /// Create a binding key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
