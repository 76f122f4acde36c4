//! Resource types used by the CredentialsBinding controller
//!
//! None of these are owned by this controller: bindings, quotas and shoots are
//! served by the Gardener API. The types model only what the reconciler reads.

mod binding;
mod quota;
mod shoot;
mod types;

pub use binding::CredentialsBinding;
pub use quota::{Quota, QuotaScope, QuotaSpec};
pub use shoot::{Shoot, ShootSpec};
pub use types::{BindingKey, BindingProvider, CredentialsReference, QuotaReference};
