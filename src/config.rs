//! Controller configuration
//!
//! Every setting is a CLI flag that can also be supplied through an
//! environment variable, so the same binary works from a shell and from a
//! Deployment manifest.

use std::time::Duration;

use clap::{ArgAction, Args, ValueEnum};

use crate::Error;

/// Tunables for the binding controller
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of bindings reconciled in parallel
    #[arg(long, env = "CREDBIND_CONCURRENT_SYNCS", default_value_t = 5)]
    pub concurrent_syncs: u16,

    /// Time budget for one reconcile pass, in seconds
    #[arg(long, env = "CREDBIND_RECONCILE_TIMEOUT_SECS", default_value_t = 180)]
    pub reconcile_timeout_secs: u64,

    /// Requeue interval after a failed reconcile, in seconds
    #[arg(long, env = "CREDBIND_ERROR_REQUEUE_SECS", default_value_t = 5)]
    pub error_requeue_secs: u64,

    /// Requeue interval while deletion is blocked by consumers, in seconds
    #[arg(long, env = "CREDBIND_BLOCKED_REQUEUE_SECS", default_value_t = 30)]
    pub blocked_requeue_secs: u64,

    /// Requeue interval after losing a write conflict, in milliseconds
    #[arg(long, env = "CREDBIND_CONFLICT_REQUEUE_MILLIS", default_value_t = 500)]
    pub conflict_requeue_millis: u64,

    /// Interval after which a healthy binding is reconciled again, in seconds
    #[arg(long, env = "CREDBIND_RESYNC_SECS", default_value_t = 600)]
    pub resync_secs: u64,

    /// Read bindings from the watch cache instead of listing the API server
    #[arg(
        long,
        env = "CREDBIND_USE_BINDING_CACHE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub use_binding_cache: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrent_syncs: 5,
            reconcile_timeout_secs: 180,
            error_requeue_secs: 5,
            blocked_requeue_secs: 30,
            conflict_requeue_millis: 500,
            resync_secs: 600,
            use_binding_cache: true,
        }
    }
}

impl ControllerConfig {
    /// Budget for one reconcile pass
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Requeue delay after an error
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }

    /// Requeue delay while deletion is blocked
    pub fn blocked_requeue(&self) -> Duration {
        Duration::from_secs(self.blocked_requeue_secs)
    }

    /// Requeue delay after a conflict
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_millis(self.conflict_requeue_millis)
    }

    /// Requeue delay after a successful add-path
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.concurrent_syncs == 0 {
            return Err(Error::validation_for(
                "concurrent-syncs",
                "must be at least 1",
            ));
        }
        if self.reconcile_timeout_secs == 0 {
            return Err(Error::validation_for(
                "reconcile-timeout-secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}
