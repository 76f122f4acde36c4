//! Marker labels and the label/finalizer state machine
//!
//! Every decision about which labels and finalizers to add to or remove from a
//! Secret or Quota is made here, as a pure function of the object's current
//! metadata. The result is a [`MetadataPatch`], or `None` when the object is
//! already in the desired state; callers never patch when there is nothing to
//! change, which keeps reconciles idempotent.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Map, Value};

use crate::{
    CREDENTIALS_BINDING_REFERENCE_LABEL, CREDENTIAL_FINALIZER, MARKER_VALUE,
    PROVIDER_LABEL_PREFIX, SECRET_BINDING_REFERENCE_LABEL,
};

/// Kind of object a marker can be placed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerTarget {
    /// The Secret referenced by `credentialsRef`
    Credential,
    /// A Quota listed in `quotas`
    Quota,
}

/// A label the controller recognizes on referenced objects
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marker {
    /// `provider.shoot.gardener.cloud/<type>`: credential usable for a provider
    ProviderType(String),
    /// Referenced by at least one CredentialsBinding
    CredentialsBindingReference,
    /// Referenced by at least one legacy SecretBinding (read-only for us)
    SecretBindingReference,
}

impl Marker {
    /// The label key this marker is stored under
    pub fn label_key(&self) -> String {
        match self {
            Marker::ProviderType(provider) => format!("{PROVIDER_LABEL_PREFIX}{provider}"),
            Marker::CredentialsBindingReference => CREDENTIALS_BINDING_REFERENCE_LABEL.to_string(),
            Marker::SecretBindingReference => SECRET_BINDING_REFERENCE_LABEL.to_string(),
        }
    }

    /// Parse a label key into a marker, if it is one we recognize
    pub fn from_label_key(key: &str) -> Option<Self> {
        if key == CREDENTIALS_BINDING_REFERENCE_LABEL {
            return Some(Marker::CredentialsBindingReference);
        }
        if key == SECRET_BINDING_REFERENCE_LABEL {
            return Some(Marker::SecretBindingReference);
        }
        key.strip_prefix(PROVIDER_LABEL_PREFIX)
            .filter(|provider| !provider.is_empty())
            .map(|provider| Marker::ProviderType(provider.to_string()))
    }

    /// True if the controller may write this marker on the given target
    pub fn is_managed_on(&self, target: MarkerTarget) -> bool {
        match (self, target) {
            (Marker::CredentialsBindingReference, _) => true,
            (Marker::ProviderType(_), MarkerTarget::Credential) => true,
            (Marker::ProviderType(_), MarkerTarget::Quota) => false,
            (Marker::SecretBindingReference, _) => false,
        }
    }

    /// True if the marker is present in `labels`
    pub fn is_set(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.contains_key(&self.label_key())
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label_key())
    }
}

/// All markers currently present on an object
pub fn markers_in(labels: &BTreeMap<String, String>) -> Vec<Marker> {
    labels
        .keys()
        .filter_map(|k| Marker::from_label_key(k))
        .collect()
}

/// A JSON merge patch restricted to `metadata.labels` and `metadata.finalizers`
///
/// Label entries map to `Some(value)` to set and `None` to delete. Because a
/// merge patch replaces the finalizer list wholesale, a patch that rewrites
/// finalizers should carry the observed resource version as a precondition so
/// the store rejects it if the list changed underneath.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    /// Label changes (`None` removes the label)
    pub labels: BTreeMap<String, Option<String>>,
    /// Replacement finalizer list, if finalizers change
    pub finalizers: Option<Vec<String>>,
    /// Resource version the object must still have for the patch to apply
    pub resource_version: Option<String>,
}

impl MetadataPatch {
    /// Patch replacing the finalizer list
    pub fn finalizers(finalizers: Vec<String>) -> Self {
        Self {
            finalizers: Some(finalizers),
            ..Default::default()
        }
    }

    /// Set a marker label
    pub fn set_marker(mut self, marker: &Marker) -> Self {
        self.labels
            .insert(marker.label_key(), Some(MARKER_VALUE.to_string()));
        self
    }

    /// Delete a label
    pub fn remove_label(mut self, key: impl Into<String>) -> Self {
        self.labels.insert(key.into(), None);
        self
    }

    /// Make the patch conditional on the object's observed resource version
    pub fn with_precondition(mut self, resource_version: Option<String>) -> Self {
        self.resource_version = resource_version;
        self
    }

    /// True if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.finalizers.is_none()
    }

    /// True if the patch is conditional on a resource version
    pub fn is_conditional(&self) -> bool {
        self.resource_version.is_some()
    }

    /// Render the patch as a JSON merge patch document
    pub fn to_merge_patch(&self) -> Value {
        let mut metadata = Map::new();
        if !self.labels.is_empty() {
            let labels: Map<String, Value> = self
                .labels
                .iter()
                .map(|(k, v)| {
                    let value = v.as_ref().map_or(Value::Null, |v| Value::String(v.clone()));
                    (k.clone(), value)
                })
                .collect();
            metadata.insert("labels".to_string(), Value::Object(labels));
        }
        if let Some(finalizers) = &self.finalizers {
            metadata.insert("finalizers".to_string(), json!(finalizers));
        }
        if let Some(rv) = &self.resource_version {
            metadata.insert("resourceVersion".to_string(), json!(rv));
        }
        json!({ "metadata": metadata })
    }

    /// Apply the patch to metadata in memory (used by store fakes and tests)
    pub fn apply_to(&self, meta: &mut ObjectMeta) {
        if !self.labels.is_empty() {
            let labels = meta.labels.get_or_insert_with(BTreeMap::new);
            for (key, value) in &self.labels {
                match value {
                    Some(v) => {
                        labels.insert(key.clone(), v.clone());
                    }
                    None => {
                        labels.remove(key);
                    }
                }
            }
        }
        if let Some(finalizers) = &self.finalizers {
            meta.finalizers = Some(finalizers.clone());
        }
    }
}

fn labels_of(meta: &ObjectMeta) -> BTreeMap<String, String> {
    meta.labels.clone().unwrap_or_default()
}

/// True if `finalizer` is present on the object
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == finalizer))
}

/// Finalizer list with `finalizer` appended, or `None` if already present
pub fn with_finalizer(meta: &ObjectMeta, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(meta, finalizer) {
        return None;
    }
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizer list without `finalizer`, or `None` if it was not present
pub fn without_finalizer(meta: &ObjectMeta, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(meta, finalizer) {
        return None;
    }
    Some(
        meta.finalizers
            .iter()
            .flatten()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect(),
    )
}

/// Patch that adds `finalizer` to an object, conditional on its version
pub fn add_finalizer_patch(meta: &ObjectMeta, finalizer: &str) -> Option<MetadataPatch> {
    with_finalizer(meta, finalizer).map(|f| {
        MetadataPatch::finalizers(f).with_precondition(meta.resource_version.clone())
    })
}

/// Patch that removes `finalizer` from an object, conditional on its version
pub fn remove_finalizer_patch(meta: &ObjectMeta, finalizer: &str) -> Option<MetadataPatch> {
    without_finalizer(meta, finalizer).map(|f| {
        MetadataPatch::finalizers(f).with_precondition(meta.resource_version.clone())
    })
}

/// Changes needed for a credential Secret referenced by a live binding
///
/// Ensures the provider label for `provider_type`, the binding reference
/// marker and the credential finalizer. Labels and finalizer go out in one
/// patch; the patch is conditional only when it rewrites the finalizer list.
pub fn credential_reference_patch(meta: &ObjectMeta, provider_type: &str) -> Option<MetadataPatch> {
    let labels = labels_of(meta);
    let mut patch = MetadataPatch::default();

    for marker in [
        Marker::ProviderType(provider_type.to_string()),
        Marker::CredentialsBindingReference,
    ] {
        if !marker.is_set(&labels) {
            patch = patch.set_marker(&marker);
        }
    }

    if let Some(finalizers) = with_finalizer(meta, CREDENTIAL_FINALIZER) {
        patch.finalizers = Some(finalizers);
        patch.resource_version = meta.resource_version.clone();
    }

    (!patch.is_empty()).then_some(patch)
}

/// Changes needed for a Quota referenced by a live binding
pub fn quota_reference_patch(meta: &ObjectMeta) -> Option<MetadataPatch> {
    let marker = Marker::CredentialsBindingReference;
    (!marker.is_set(&labels_of(meta))).then(|| MetadataPatch::default().set_marker(&marker))
}

/// Changes releasing a credential Secret after its last binding went away
///
/// Removes the binding reference marker. Provider labels and the credential
/// finalizer are shared with the legacy SecretBinding kind, so they are only
/// removed when the legacy marker is absent.
pub fn credential_release_patch(meta: &ObjectMeta) -> Option<MetadataPatch> {
    let labels = labels_of(meta);
    let legacy_reference = Marker::SecretBindingReference.is_set(&labels);
    let mut patch = MetadataPatch::default();

    for marker in markers_in(&labels) {
        if !marker.is_managed_on(MarkerTarget::Credential) {
            continue;
        }
        let shared_with_legacy = matches!(marker, Marker::ProviderType(_));
        if !(shared_with_legacy && legacy_reference) {
            patch = patch.remove_label(marker.label_key());
        }
    }

    if !legacy_reference {
        if let Some(finalizers) = without_finalizer(meta, CREDENTIAL_FINALIZER) {
            patch.finalizers = Some(finalizers);
            patch.resource_version = meta.resource_version.clone();
        }
    }

    (!patch.is_empty()).then_some(patch)
}

/// Changes releasing a Quota after its last binding went away
///
/// Several bindings may race to release the same Quota, so the patch is
/// always conditional on the observed resource version.
pub fn quota_release_patch(meta: &ObjectMeta) -> Option<MetadataPatch> {
    let patch = markers_in(&labels_of(meta))
        .into_iter()
        .filter(|marker| marker.is_managed_on(MarkerTarget::Quota))
        .fold(MetadataPatch::default(), |patch, marker| {
            patch.remove_label(marker.label_key())
        });
    (!patch.is_empty()).then(|| patch.with_precondition(meta.resource_version.clone()))
}
