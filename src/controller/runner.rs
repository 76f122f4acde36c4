//! Controller runner - builds the CredentialsBinding controller future
//!
//! Construction is kept separate from execution so the caller decides how to
//! drive the future (and what else to run next to it).

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::{self, Config as ControllerSettings};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use super::binding::{error_policy, reconcile, Context};
use crate::config::ControllerConfig;
use crate::crd::CredentialsBinding;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the CredentialsBinding controller future
///
/// The controller's reflector store doubles as the binding cache used for
/// reference counting when `use_binding_cache` is set.
pub fn build_binding_controller(
    client: Client,
    config: ControllerConfig,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let bindings: Api<CredentialsBinding> = Api::all(client.clone());
    let concurrency = config.concurrent_syncs;

    let ctrl = Controller::new(bindings, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .with_config(ControllerSettings::default().concurrency(concurrency));

    let ctx = Arc::new(
        Context::builder(client)
            .config(config)
            .binding_cache(ctrl.store())
            .build(),
    );

    tracing::info!(concurrency, "- CredentialsBinding controller");

    Box::pin(
        ctrl.shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("CredentialsBinding")),
    )
}

/// Log the outcome of one reconcile
///
/// Reconciler failures were already logged by the error policy, so they are
/// only traced at debug here; watch and queue failures are errors.
fn log_reconcile_result<T: Debug, E: std::error::Error + 'static, Q: std::error::Error + 'static>(
    controller_name: &'static str,
) -> impl Fn(Result<T, controller::Error<E, Q>>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(controller::Error::ReconcilerFailed(e, obj)) => {
                tracing::debug!(error = %e, object = %obj, "{} reconciliation failed", controller_name)
            }
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
