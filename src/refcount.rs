//! Reference counting over the binding collection
//!
//! The store has no per-object owner count, so the count is recomputed from a
//! snapshot of every CredentialsBinding at release time. A credential is shared
//! when another binding matches it on all four reference fields; a Quota is
//! shared when another binding lists the same namespace and name.
//!
//! Other bindings fall into two groups. An active binding (no deletion
//! timestamp) always keeps a shared object referenced. A releasing binding
//! (deletion timestamp set, finalizer still held) is itself on its way out;
//! the driver decides whether it still counts by asking whether its deletion
//! is blocked. A deleting binding without the finalizer has finished its own
//! bookkeeping and is ignored.

use std::collections::{BTreeMap, BTreeSet};

use crate::crd::{BindingKey, CredentialsBinding, CredentialsReference, QuotaReference};
use crate::BINDING_FINALIZER;

/// How a binding participates in reference counting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolderState {
    /// Not being deleted
    Active,
    /// Being deleted, finalizer still held
    Releasing,
}

impl HolderState {
    /// State of `binding`, or `None` if it no longer holds references
    pub fn of(binding: &CredentialsBinding) -> Option<Self> {
        if !binding.is_deleting() {
            Some(HolderState::Active)
        } else if binding.has_finalizer(BINDING_FINALIZER) {
            Some(HolderState::Releasing)
        } else {
            None
        }
    }
}

/// Other bindings referencing an object
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Holders {
    /// Active bindings
    pub active: Vec<BindingKey>,
    /// Bindings that are themselves being deleted
    pub releasing: Vec<BindingKey>,
}

impl Holders {
    /// True if no other binding references the object
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.releasing.is_empty()
    }

    /// True if an active binding references the object
    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }
}

type HolderMap = BTreeMap<BindingKey, HolderState>;

/// Index from referenced objects to the bindings that hold them
#[derive(Clone, Debug, Default)]
pub struct ReferenceIndex {
    credentials: BTreeMap<CredentialsReference, HolderMap>,
    quotas: BTreeMap<QuotaReference, HolderMap>,
}

fn holders_in(map: Option<&HolderMap>, excluding: &BindingKey) -> Holders {
    let mut holders = Holders::default();
    for (key, state) in map.into_iter().flatten() {
        if key == excluding {
            continue;
        }
        match state {
            HolderState::Active => holders.active.push(key.clone()),
            HolderState::Releasing => holders.releasing.push(key.clone()),
        }
    }
    holders
}

impl ReferenceIndex {
    /// Build the index from a snapshot of all bindings
    pub fn build<'a>(bindings: impl IntoIterator<Item = &'a CredentialsBinding>) -> Self {
        let mut index = Self::default();
        for binding in bindings {
            let Some(state) = HolderState::of(binding) else {
                continue;
            };
            let key = binding.key();
            index
                .credentials
                .entry(binding.credentials_ref.clone())
                .or_default()
                .insert(key.clone(), state);
            for quota in &binding.quotas {
                index
                    .quotas
                    .entry(quota.clone())
                    .or_default()
                    .insert(key.clone(), state);
            }
        }
        index
    }

    /// Bindings other than `excluding` that reference `credential`
    pub fn credential_holders(
        &self,
        credential: &CredentialsReference,
        excluding: &BindingKey,
    ) -> Holders {
        holders_in(self.credentials.get(credential), excluding)
    }

    /// Bindings other than `excluding` that reference `quota`
    pub fn quota_holders(&self, quota: &QuotaReference, excluding: &BindingKey) -> Holders {
        holders_in(self.quotas.get(quota), excluding)
    }
}

/// Quota references of `binding` with duplicates removed, order preserved
pub fn distinct_quotas(binding: &CredentialsBinding) -> Vec<&QuotaReference> {
    let mut seen = BTreeSet::new();
    binding
        .quotas
        .iter()
        .filter(|q| seen.insert(*q))
        .collect()
}
