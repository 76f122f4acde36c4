//! Quota resource (core.gardener.cloud/v1beta1)
//!
//! Only the metadata of a Quota is touched by the controller; the spec is
//! modelled so that objects round-trip and tests can build realistic fixtures.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Limits applied to workloads created through a binding
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.gardener.cloud",
    version = "v1beta1",
    kind = "Quota",
    plural = "quotas",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSpec {
    /// Maximum lifetime of clusters bound to this quota, in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_lifetime_days: Option<i32>,

    /// Resource limits keyed by metric name (values are Kubernetes quantities)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, String>,

    /// What the quota is scoped to (project or secret)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<QuotaScope>,
}

/// Scope of a quota
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaScope {
    /// API version of the scope object
    pub api_version: String,
    /// Kind of the scope object
    pub kind: String,
}
