// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status poller for `OnionService`.
//!
//! Walks `Pending -> Initializing -> Ready`. Once an address is recorded the
//! status is returned as-is and the relay is never probed again. Failures on
//! this path (store reads, exec transport, empty hostname file) only ever
//! produce a status message; they never fail the reconcile.

use crate::constants::{ONION_CONTAINER_NAME, ONION_HOSTNAME_FILE};
use crate::context::Context;
use crate::crd::{OnionService, OnionServicePhase, OnionServiceStatus};
use crate::exec::RemoteExec;
use crate::labels::APP_LABEL;
use crate::metrics;
use crate::reconcilers::status::patch_status;
use crate::selector::LabelQuery;
use crate::status_reasons::{
    MESSAGE_ADDRESS_FILE_EMPTY, MESSAGE_DEPLOYMENT_NOT_CREATED, MESSAGE_NO_PODS_FOUND,
    MESSAGE_ONION_READY, MESSAGE_WAITING_FOR_ADDRESS, MESSAGE_WAITING_FOR_POD_START,
    MESSAGE_WAITING_FOR_READY_POD,
};
use crate::store::ObjectStore;
use anyhow::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info, warn};

const POD_PHASE_RUNNING: &str = "Running";

fn initializing(message: &str) -> OnionServiceStatus {
    OnionServiceStatus::with_phase(OnionServicePhase::Initializing, message)
}

/// Path of the file Tor writes the `.onion` address to.
#[must_use]
pub fn hostname_path(hidden_service_dir: &str) -> String {
    format!(
        "{}/{ONION_HOSTNAME_FILE}",
        hidden_service_dir.trim_end_matches('/')
    )
}

fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == POD_PHASE_RUNNING)
}

/// Read the hostname file from a running relay pod.
async fn probe_address<S, E>(ctx: &Context<S, E>, service: &OnionService, pod: &Pod) -> OnionServiceStatus
where
    S: ObjectStore,
    E: RemoteExec,
{
    let namespace = pod.namespace().unwrap_or_default();
    let pod_name = pod.name_any();
    let command = vec![
        "cat".to_string(),
        hostname_path(service.spec.effective_hidden_service_dir()),
    ];

    let output = match ctx
        .exec
        .exec(&namespace, &pod_name, ONION_CONTAINER_NAME, &command)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(
                namespace = %namespace,
                pod = %pod_name,
                error = %e,
                "Could not reach relay to read onion address, will retry"
            );
            metrics::record_onion_probe("unreachable");
            return initializing(MESSAGE_WAITING_FOR_ADDRESS);
        }
    };

    if !output.success {
        info!(
            namespace = %namespace,
            pod = %pod_name,
            stderr = %output.stderr.trim(),
            "Failed to read onion address, will retry"
        );
        metrics::record_onion_probe("failed");
        return initializing(MESSAGE_WAITING_FOR_ADDRESS);
    }

    let address = output.stdout.trim();
    if address.is_empty() {
        metrics::record_onion_probe("empty");
        return initializing(MESSAGE_ADDRESS_FILE_EMPTY);
    }

    info!(namespace = %namespace, service = %service.name_any(), address = %address, "Onion address published");
    metrics::record_onion_probe("address");
    OnionServiceStatus {
        onion_address: Some(address.to_string()),
        phase: Some(OnionServicePhase::Ready),
        message: Some(MESSAGE_ONION_READY.to_string()),
    }
}

/// Compute the status `service` should report.
///
/// Never fails: store or transport errors become an `Initializing` (or
/// `Pending`) status carrying the error text.
pub async fn compute_status<S, E>(ctx: &Context<S, E>, service: &OnionService) -> OnionServiceStatus
where
    S: ObjectStore,
    E: RemoteExec,
{
    if let Some(current) = service.status.as_ref().filter(|s| s.is_ready_with_address()) {
        debug!(service = %service.name_any(), "Onion address already known, skipping probe");
        return current.clone();
    }

    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();

    let deployment: Option<Deployment> = match ctx.store.get(&namespace, &name).await {
        Ok(deployment) => deployment,
        Err(e) => {
            warn!(namespace = %namespace, name = %name, error = %e, "Failed to read deployment");
            return OnionServiceStatus::with_phase(
                OnionServicePhase::Pending,
                &format!("Unable to read deployment: {e}"),
            );
        }
    };
    let Some(deployment) = deployment else {
        return OnionServiceStatus::with_phase(
            OnionServicePhase::Pending,
            MESSAGE_DEPLOYMENT_NOT_CREATED,
        );
    };

    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready_replicas == 0 {
        return initializing(MESSAGE_WAITING_FOR_READY_POD);
    }

    let selector = LabelQuery::new().with(APP_LABEL, name.as_str());
    let pods: Vec<Pod> = match ctx.store.list(&namespace, &selector).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!(namespace = %namespace, name = %name, error = %e, "Failed to list relay pods");
            return initializing(&format!("Unable to list pods: {e}"));
        }
    };
    if pods.is_empty() {
        return initializing(MESSAGE_NO_PODS_FOUND);
    }

    match pods.iter().find(|p| is_running(p)) {
        Some(pod) => probe_address(ctx, service, pod).await,
        None => initializing(MESSAGE_WAITING_FOR_POD_START),
    }
}

/// Patch `status` onto `service` unless it already reports exactly that.
///
/// # Errors
///
/// Returns an error if the status patch fails.
pub async fn update_status<S: ObjectStore>(
    store: &S,
    service: &OnionService,
    status: &OnionServiceStatus,
) -> Result<()> {
    if service.status.as_ref() == Some(status) {
        debug!(service = %service.name_any(), "Status unchanged, skipping update");
        return Ok(());
    }

    info!(
        namespace = %service.namespace().unwrap_or_default(),
        name = %service.name_any(),
        phase = ?status.phase,
        message = ?status.message,
        "Updating OnionService status"
    );
    // Null fields remove the key under merge-patch semantics, clearing a stale address
    let patch = serde_json::json!({
        "onionAddress": status.onion_address,
        "phase": status.phase,
        "message": status.message,
    });
    patch_status(store, service, &patch).await
}

#[cfg(test)]
#[path = "status_helpers_tests.rs"]
mod status_helpers_tests;
