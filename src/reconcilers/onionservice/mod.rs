// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `OnionService` reconciliation.
//!
//! An `OnionService` is backed by a dedicated single-replica Tor Deployment. The
//! reconciler converges the objects that Deployment needs and then polls it for
//! the generated `.onion` address.
//!
//! ## Module Structure
//!
//! - [`resources`] - `ConfigMap`, PVC and Deployment builders and lifecycle
//! - [`status_helpers`] - phase computation and the hostname probe

pub mod resources;
pub mod status_helpers;

use resources::{create_or_update_resources, delete_resources};
use status_helpers::{compute_status, update_status};

use crate::context::Context;
use crate::crd::{OnionService, OnionServicePhase, OnionServiceSpec, OnionServiceStatus};
use crate::exec::RemoteExec;
use crate::labels::FINALIZER_ONION_SERVICE;
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::ReconcileOutcome;
use crate::store::ObjectStore;
use anyhow::Result;
use kube::ResourceExt;
use tracing::{info, warn};

/// Check that `spec` can be turned into a working onion service.
///
/// # Errors
///
/// Returns a human-readable reason when the spec is unusable.
pub fn validate_spec(spec: &OnionServiceSpec) -> Result<(), String> {
    if spec.hidden_service_port == 0 {
        return Err("hiddenServicePort must be greater than 0".to_string());
    }

    let target = spec.hidden_service_target.trim();
    let valid_target = target.rsplit_once(':').is_some_and(|(host, port)| {
        !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0)
    });
    if !valid_target {
        return Err(format!(
            "hiddenServiceTarget must be host:port, got \"{target}\""
        ));
    }

    Ok(())
}

#[async_trait::async_trait]
impl FinalizerCleanup for OnionService {
    async fn cleanup<S: ObjectStore, E: RemoteExec>(&self, ctx: &Context<S, E>) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        info!(namespace = %namespace, name = %name, "Deleting onion service resources");
        delete_resources(&ctx.store, &namespace, &name).await
    }
}

/// Reconcile an `OnionService`.
///
/// Returns [`ReconcileOutcome::Converged`] once the service is `Ready` (or
/// `Failed` on an invalid spec, which only a spec change can fix) and
/// [`ReconcileOutcome::pending`] while the address is still being generated.
///
/// # Errors
///
/// Returns an error if a resource write fails. Failures while polling for the
/// address are reported through status instead.
pub async fn reconcile_onionservice<S, E>(
    ctx: &Context<S, E>,
    service: OnionService,
) -> Result<ReconcileOutcome>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();

    info!(namespace = %namespace, name = %name, "Reconciling OnionService");

    if service.metadata.deletion_timestamp.is_some() {
        handle_deletion(ctx, &service, FINALIZER_ONION_SERVICE).await?;
        return Ok(ReconcileOutcome::Converged);
    }

    if ensure_finalizer(&ctx.store, &service, FINALIZER_ONION_SERVICE).await? {
        return Ok(ReconcileOutcome::finalizer_added());
    }

    if let Err(reason) = validate_spec(&service.spec) {
        warn!(namespace = %namespace, name = %name, reason = %reason, "Invalid OnionService spec");
        let failed = OnionServiceStatus::with_phase(OnionServicePhase::Failed, &reason);
        update_status(&ctx.store, &service, &failed).await?;
        return Ok(ReconcileOutcome::Converged);
    }

    create_or_update_resources(ctx, &service).await?;

    let status = compute_status(ctx, &service).await;
    update_status(&ctx.store, &service, &status).await?;

    if status.is_ready_with_address() {
        Ok(ReconcileOutcome::Converged)
    } else {
        Ok(ReconcileOutcome::pending())
    }
}
