// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `TorBridgeConfig` and sentinel pod reconciliation.
//!
//! Two entry points share the same mutation path:
//!
//! - [`reconcile_torbridgeconfig`] runs per config: it renders the relay torrc into a
//!   `ConfigMap`, then fans out over every sentinel-labelled pod in the namespace and
//!   makes sure the workload behind it carries the sidecar.
//! - [`reconcile_pod`] runs per sentinel pod. It catches pods created after the config
//!   was last reconciled and unwinds pods whose config no longer exists (a deleted
//!   config is never handed to the config reconciler, so the pod's back-reference
//!   labels are the only trace left).

use crate::constants::TORRC_CONFIGMAP_KEY;
use crate::context::Context;
use crate::crd::{RelayMode, TorBridgeConfig, TorBridgeConfigStatus};
use crate::errors::ResolveError;
use crate::exec::RemoteExec;
use crate::labels::{
    ANNOTATION_TORRC_HASH, BACKREF_CONFIG_NAME, BACKREF_CONFIG_NAMESPACE, COMPONENT_RELAY_CONFIG,
    FINALIZER_TOR_BRIDGE_CONFIG, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_PART_OF,
    MANAGED_BY_TOR_BRIDGE_CONFIG, PART_OF_SIDETOR,
};
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::ownership::{resolve_target, TargetRef};
use crate::reconcilers::resources::{create_or_replace_if, delete_if_exists};
use crate::reconcilers::sidecar::{ensure_injected, ensure_removed, torrc_configmap_name};
use crate::reconcilers::status::{conditions_equal, patch_status, update_condition_in_memory};
use crate::reconcilers::{status_changed, ReconcileOutcome};
use crate::selector::LabelQuery;
use crate::status_reasons::{
    CONDITION_TYPE_READY, REASON_INJECTION_FAILED, REASON_NO_WORKLOADS,
    REASON_SIDECARS_INJECTED, REASON_UNSUPPORTED_MODE,
};
use crate::store::ObjectStore;
use crate::torrc::{content_hash, render_relay_config};
use anyhow::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Build the `ConfigMap` holding the rendered relay torrc.
#[must_use]
pub fn build_torrc_configmap(config: &TorBridgeConfig, torrc: &str, torrc_hash: &str) -> ConfigMap {
    let name = config.name_any();
    let labels = BTreeMap::from([
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_TOR_BRIDGE_CONFIG.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_SIDETOR.to_string()),
        (K8S_COMPONENT.to_string(), COMPONENT_RELAY_CONFIG.to_string()),
        (K8S_INSTANCE.to_string(), name.clone()),
    ]);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(torrc_configmap_name(&name)),
            namespace: config.namespace(),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_TORRC_HASH.to_string(),
                torrc_hash.to_string(),
            )])),
            owner_references: config.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            TORRC_CONFIGMAP_KEY.to_string(),
            torrc.to_string(),
        )])),
        ..Default::default()
    }
}

/// Selector for pods (or deployments) mutated on behalf of `config`.
fn backref_selector(config_name: &str, config_namespace: &str) -> LabelQuery {
    LabelQuery::new()
        .with(BACKREF_CONFIG_NAME, config_name)
        .with(BACKREF_CONFIG_NAMESPACE, config_namespace)
}

/// The config a pod points back at, if any.
fn backref_of(pod: &Pod) -> Option<(String, String)> {
    let labels = pod.labels();
    let name = labels.get(BACKREF_CONFIG_NAME)?.clone();
    let namespace = labels
        .get(BACKREF_CONFIG_NAMESPACE)
        .cloned()
        .unwrap_or_else(|| pod.namespace().unwrap_or_default());
    Some((name, namespace))
}

/// Resolve `pod` and inject the sidecar into whatever owns it.
///
/// Returns the `(kind, name)` of the workload that now carries the sidecar, or
/// `None` when the pod is owned by a controller the engine does not mutate.
async fn inject_pod<S, E>(
    ctx: &Context<S, E>,
    pod: &Pod,
    config: &TorBridgeConfig,
    torrc_hash: &str,
) -> Result<Option<(&'static str, String)>>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let target = match resolve_target(&ctx.store, pod).await {
        Ok(target) => target,
        Err(e) if e.is_unsupported() => {
            warn!(pod = %pod.name_any(), error = %e, "Skipping pod with unsupported owner");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    ensure_injected(ctx, &target, config, torrc_hash).await?;
    Ok(Some((target.kind(), target.name())))
}

async fn unwind_pod<S, E>(ctx: &Context<S, E>, pod: &Pod) -> Result<()>
where
    S: ObjectStore,
    E: RemoteExec,
{
    match resolve_target(&ctx.store, pod).await {
        Ok(target) => {
            ensure_removed(ctx, &target).await?;
            Ok(())
        }
        Err(e) if e.is_unsupported() => {
            warn!(pod = %pod.name_any(), error = %e, "Skipping pod with unsupported owner");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn desired_status(
    config: &TorBridgeConfig,
    injected: usize,
    failure: Option<&str>,
) -> TorBridgeConfigStatus {
    let mut status = config.status.clone().unwrap_or_default();
    let (state, reason, message) = match (failure, config.spec.mode) {
        (Some(error), _) => ("False", REASON_INJECTION_FAILED, error.to_string()),
        (None, RelayMode::Unsupported) => (
            "False",
            REASON_UNSUPPORTED_MODE,
            "Relay mode is not supported; the generated torrc contains a diagnostic".to_string(),
        ),
        (None, _) if injected == 0 => (
            "True",
            REASON_NO_WORKLOADS,
            "No sentinel-labelled workloads in namespace".to_string(),
        ),
        (None, _) => (
            "True",
            REASON_SIDECARS_INJECTED,
            format!("Relay sidecar present on {injected} workload(s)"),
        ),
    };

    update_condition_in_memory(&mut status.conditions, CONDITION_TYPE_READY, state, reason, &message);
    status.observed_generation = config.metadata.generation;
    status.injected_workloads = Some(i32::try_from(injected).unwrap_or(i32::MAX));
    status
}

async fn update_status<S: ObjectStore>(
    store: &S,
    config: &TorBridgeConfig,
    status: &TorBridgeConfigStatus,
) -> Result<()> {
    let current = config.status.clone().unwrap_or_default();
    if conditions_equal(&current.conditions, &status.conditions)
        && !status_changed(&current.observed_generation, &status.observed_generation)
        && !status_changed(&current.injected_workloads, &status.injected_workloads)
    {
        debug!(config = %config.name_any(), "Status unchanged, skipping update");
        return Ok(());
    }
    patch_status(store, config, status).await
}

/// Reconcile a `TorBridgeConfig`.
///
/// # Errors
///
/// Returns an error when a store write fails or a pod's owner chain cannot be
/// resolved; the controller retries with backoff.
pub async fn reconcile_torbridgeconfig<S, E>(
    ctx: &Context<S, E>,
    config: TorBridgeConfig,
) -> Result<ReconcileOutcome>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let namespace = config.namespace().unwrap_or_default();
    let name = config.name_any();

    info!(namespace = %namespace, name = %name, mode = %config.spec.mode, "Reconciling TorBridgeConfig");

    if config.metadata.deletion_timestamp.is_some() {
        handle_deletion(ctx, &config, FINALIZER_TOR_BRIDGE_CONFIG).await?;
        return Ok(ReconcileOutcome::Converged);
    }

    if ensure_finalizer(&ctx.store, &config, FINALIZER_TOR_BRIDGE_CONFIG).await? {
        return Ok(ReconcileOutcome::finalizer_added());
    }

    if config.spec.mode == RelayMode::Unsupported {
        warn!(namespace = %namespace, name = %name, "Unsupported relay mode, rendering diagnostic torrc");
    }

    let torrc = render_relay_config(&config.spec);
    let torrc_hash = content_hash(&torrc);
    create_or_replace_if(
        &ctx.store,
        &namespace,
        &build_torrc_configmap(&config, &torrc, &torrc_hash),
        |live: &ConfigMap, desired: &ConfigMap| live.data != desired.data,
    )
    .await?;

    let pods: Vec<Pod> = ctx
        .store
        .list(&namespace, &ctx.settings.sentinel_selector())
        .await?;

    let mut workloads: BTreeSet<(&'static str, String)> = BTreeSet::new();
    for pod in &pods {
        if pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        if let Some((owner, owner_ns)) = backref_of(pod) {
            if owner != name || owner_ns != namespace {
                debug!(pod = %pod.name_any(), config = %owner, "Pod belongs to another config");
                continue;
            }
        }

        match inject_pod(ctx, pod, &config, &torrc_hash).await {
            Ok(Some(workload)) => {
                workloads.insert(workload);
            }
            Ok(None) => {}
            Err(e) => {
                let status = desired_status(&config, workloads.len(), Some(&e.to_string()));
                if let Err(status_err) = update_status(&ctx.store, &config, &status).await {
                    warn!(error = %status_err, "Failed to record injection failure in status");
                }
                return Err(e);
            }
        }
    }

    let status = desired_status(&config, workloads.len(), None);
    update_status(&ctx.store, &config, &status).await?;

    info!(
        namespace = %namespace,
        name = %name,
        workloads = workloads.len(),
        "TorBridgeConfig reconciled"
    );
    Ok(ReconcileOutcome::Converged)
}

#[async_trait::async_trait]
impl FinalizerCleanup for TorBridgeConfig {
    async fn cleanup<S: ObjectStore, E: RemoteExec>(&self, ctx: &Context<S, E>) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        let name = self.name_any();
        let selector = backref_selector(&name, &namespace);

        let deployments: Vec<Deployment> = ctx.store.list(&namespace, &selector).await?;
        for deployment in deployments {
            ensure_removed(ctx, &TargetRef::TopLevelController(deployment)).await?;
        }

        let pods: Vec<Pod> = ctx.store.list(&namespace, &selector).await?;
        for pod in pods {
            let bare = pod.metadata.owner_references.as_ref().is_none_or(Vec::is_empty);
            if bare && pod.metadata.deletion_timestamp.is_none() {
                ensure_removed(ctx, &TargetRef::Bare(pod)).await?;
            }
        }

        delete_if_exists::<S, ConfigMap>(&ctx.store, &namespace, &torrc_configmap_name(&name))
            .await?;
        Ok(())
    }
}

/// The first live `TorBridgeConfig` in `namespace`, by name.
async fn first_live_config<S: ObjectStore>(store: &S, namespace: &str) -> Result<Option<TorBridgeConfig>> {
    let mut configs: Vec<TorBridgeConfig> = store.list(namespace, &LabelQuery::new()).await?;
    configs.retain(|c| c.metadata.deletion_timestamp.is_none());
    configs.sort_by_key(|c| c.name_any());
    Ok(configs.into_iter().next())
}

/// Reconcile a single sentinel-labelled pod.
///
/// # Errors
///
/// Returns an error when a store write fails or the pod's owner chain is dangling.
pub async fn reconcile_pod<S, E>(ctx: &Context<S, E>, pod: Pod) -> Result<ReconcileOutcome>
where
    S: ObjectStore,
    E: RemoteExec,
{
    if pod.metadata.deletion_timestamp.is_some()
        || !ctx.settings.sentinel_selector().matches(pod.labels())
    {
        return Ok(ReconcileOutcome::Converged);
    }

    let pod_namespace = pod.namespace().unwrap_or_default();

    let config = match backref_of(&pod) {
        Some((config_name, config_namespace)) => {
            let config: Option<TorBridgeConfig> =
                ctx.store.get(&config_namespace, &config_name).await?;
            match config {
                Some(c) if c.metadata.deletion_timestamp.is_none() => c,
                _ => {
                    info!(
                        namespace = %pod_namespace,
                        pod = %pod.name_any(),
                        config = %config_name,
                        "TorBridgeConfig is gone, unwinding relay sidecar"
                    );
                    unwind_pod(ctx, &pod).await?;
                    return Ok(ReconcileOutcome::Converged);
                }
            }
        }
        None => match first_live_config(&ctx.store, &pod_namespace).await? {
            Some(c) => c,
            None => {
                debug!(pod = %pod.name_any(), "No TorBridgeConfig in namespace");
                return Ok(ReconcileOutcome::Converged);
            }
        },
    };

    let torrc_hash = content_hash(&render_relay_config(&config.spec));
    if let Err(e) = inject_pod(ctx, &pod, &config, &torrc_hash).await {
        if e
            .downcast_ref::<ResolveError>()
            .is_some_and(ResolveError::is_not_found)
        {
            warn!(pod = %pod.name_any(), error = %e, "Owner not visible yet, will retry");
        }
        return Err(e);
    }
    Ok(ReconcileOutcome::Converged)
}

#[cfg(test)]
#[path = "torbridgeconfig_tests.rs"]
mod torbridgeconfig_tests;
