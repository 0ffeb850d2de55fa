// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload mutator: relay sidecar injection and removal.
//!
//! Two mutation strategies, picked by [`TargetRef`]:
//!
//! - **Bare pod** (no owner): most pod spec fields are immutable once created, so the
//!   pod is deleted and recreated as `<name>-hidden-<suffix>` with the sidecar
//!   appended and proxy environment variables set on every application container.
//!   The original name is kept in an annotation so removal can restore it.
//! - **Deployment**: the pod template is patched in place (sidecar, volume, env,
//!   back-reference labels and a fresh template identity) and the `Deployment`
//!   rollout replaces the replicas.
//!
//! The presence of the sidecar container (by name) is the convergence marker: a
//! workload that already carries it is never mutated again.
//!
//! Bare-pod recreation deletes with a `resourceVersion` precondition and only the
//! worker whose delete succeeded creates the replacement, so concurrent reconciles
//! of the same pod yield a single instance. Delete-then-create is still not
//! atomic: a crash between the two steps leaves the pod missing. It is recreated
//! only if a controller owns it; an unowned pod stays gone.

use crate::constants::{
    HIDDEN_POD_INFIX, HIDDEN_POD_SUFFIX_LEN, KIND_DEPLOYMENT, KIND_POD, LOOPBACK_ADDRESS,
    PROXY_ENV_VARS, TORRC_CONFIGMAP_KEY, TORRC_CONFIGMAP_SUFFIX, TORRC_MOUNT_PATH,
    TORRC_VOLUME_NAME,
};
use crate::context::{Context, Settings};
use crate::crd::TorBridgeConfig;
use crate::exec::RemoteExec;
use crate::labels::{
    ANNOTATION_ORIGINAL_NAME, ANNOTATION_TEMPLATE_REVISION, ANNOTATION_TORRC_HASH,
    BACKREF_CONFIG_NAME, BACKREF_CONFIG_NAMESPACE,
};
use crate::metrics;
use crate::reconcilers::ownership::TargetRef;
use crate::reconcilers::resources::delete_if_unchanged;
use crate::store::ObjectStore;
use anyhow::{Context as _, Result};
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Prefix of every proxy URL written into application containers.
const PROXY_SCHEME: &str = "socks5://";

// ============================================================================
// Builders
// ============================================================================

/// `socks5://127.0.0.1:<port>`
#[must_use]
pub fn proxy_url(socks_port: u16) -> String {
    format!("{PROXY_SCHEME}{LOOPBACK_ADDRESS}:{socks_port}")
}

/// Name of the generated torrc `ConfigMap` for a `TorBridgeConfig`.
#[must_use]
pub fn torrc_configmap_name(config_name: &str) -> String {
    format!("{config_name}{TORRC_CONFIGMAP_SUFFIX}")
}

/// `<original>-hidden-<4 lowercase letters>`
#[must_use]
pub fn hidden_name(original: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..HIDDEN_POD_SUFFIX_LEN)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    format!("{original}{HIDDEN_POD_INFIX}{suffix}")
}

/// Back-reference labels tying a mutated workload to its `TorBridgeConfig`.
#[must_use]
pub fn backref_labels(config: &TorBridgeConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BACKREF_CONFIG_NAME.to_string(), config.name_any()),
        (
            BACKREF_CONFIG_NAMESPACE.to_string(),
            config.namespace().unwrap_or_default(),
        ),
    ])
}

/// Build the relay sidecar container for `config`.
///
/// The torrc is mounted from the generated `ConfigMap`; only non-zero ports are
/// exposed.
#[must_use]
pub fn build_relay_container(settings: &Settings, config: &TorBridgeConfig) -> Container {
    let ports = &config.spec.ports;
    let container_ports: Vec<ContainerPort> = [
        ("orport", ports.or_port),
        ("dirport", ports.dir_port),
        ("socks", config.spec.effective_socks_port()),
    ]
    .into_iter()
    .filter(|(_, port)| *port != 0)
    .map(|(name, port)| ContainerPort {
        name: Some(name.to_string()),
        container_port: i32::from(port),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    })
    .collect();

    Container {
        name: settings.sidecar_container_name.clone(),
        image: Some(
            config
                .spec
                .image
                .clone()
                .unwrap_or_else(|| settings.relay_image.clone()),
        ),
        command: Some(vec![
            "tor".to_string(),
            "-f".to_string(),
            TORRC_MOUNT_PATH.to_string(),
        ]),
        ports: Some(container_ports),
        volume_mounts: Some(vec![VolumeMount {
            name: TORRC_VOLUME_NAME.to_string(),
            mount_path: TORRC_MOUNT_PATH.to_string(),
            sub_path: Some(TORRC_CONFIGMAP_KEY.to_string()),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Volume exposing the generated torrc `ConfigMap` to the sidecar.
#[must_use]
pub fn build_torrc_volume(config_name: &str) -> Volume {
    Volume {
        name: TORRC_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: torrc_configmap_name(config_name),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Pod spec surgery
// ============================================================================

/// True when `spec` already carries the sidecar (as a container or init container).
#[must_use]
pub fn has_sidecar(spec: &PodSpec, sidecar_name: &str) -> bool {
    spec.containers.iter().any(|c| c.name == sidecar_name)
        || spec
            .init_containers
            .as_ref()
            .is_some_and(|init| init.iter().any(|c| c.name == sidecar_name))
}

fn set_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => existing.value = Some(value.to_string()),
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }),
    }
}

/// Append the sidecar and its volume and point every application container at the
/// relay's SOCKS port.
pub fn inject_into_pod_spec(spec: &mut PodSpec, settings: &Settings, config: &TorBridgeConfig) {
    let proxy = proxy_url(config.spec.effective_socks_port());
    for container in &mut spec.containers {
        for var in PROXY_ENV_VARS {
            set_env(container, var, &proxy);
        }
    }

    spec.containers.push(build_relay_container(settings, config));

    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    volumes.retain(|v| v.name != TORRC_VOLUME_NAME);
    volumes.push(build_torrc_volume(&config.name_any()));
}

/// Reverse of [`inject_into_pod_spec`].
pub fn strip_from_pod_spec(spec: &mut PodSpec, settings: &Settings) {
    spec.containers
        .retain(|c| c.name != settings.sidecar_container_name);

    for container in &mut spec.containers {
        if let Some(env) = container.env.as_mut() {
            env.retain(|e| {
                !(PROXY_ENV_VARS.contains(&e.name.as_str())
                    && e.value.as_deref().is_some_and(|v| v.starts_with(PROXY_SCHEME)))
            });
            if env.is_empty() {
                container.env = None;
            }
        }
    }

    if let Some(volumes) = spec.volumes.as_mut() {
        volumes.retain(|v| v.name != TORRC_VOLUME_NAME);
        if volumes.is_empty() {
            spec.volumes = None;
        }
    }
}

fn without_backrefs(
    labels: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let labels: BTreeMap<String, String> = labels
        .into_iter()
        .flatten()
        .filter(|(k, _)| !matches!(k.as_str(), BACKREF_CONFIG_NAME | BACKREF_CONFIG_NAMESPACE))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!labels.is_empty()).then_some(labels)
}

/// Build the replacement for a bare pod: same spec plus the relay sidecar.
#[must_use]
pub fn build_injected_pod(pod: &Pod, settings: &Settings, config: &TorBridgeConfig) -> Pod {
    let original_name = pod
        .annotations()
        .get(ANNOTATION_ORIGINAL_NAME)
        .cloned()
        .unwrap_or_else(|| pod.name_any());

    let mut labels = pod.labels().clone();
    labels.extend(backref_labels(config));

    let mut annotations = pod.annotations().clone();
    annotations.insert(ANNOTATION_ORIGINAL_NAME.to_string(), original_name.clone());

    let mut spec = pod.spec.clone().unwrap_or_default();
    inject_into_pod_spec(&mut spec, settings, config);

    Pod {
        metadata: ObjectMeta {
            name: Some(hidden_name(&original_name)),
            namespace: pod.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

/// Build the replacement for an injected bare pod: original name, no sidecar.
#[must_use]
pub fn build_restored_pod(pod: &Pod, settings: &Settings) -> Pod {
    let original_name = pod
        .annotations()
        .get(ANNOTATION_ORIGINAL_NAME)
        .cloned()
        .unwrap_or_else(|| pod.name_any());

    let mut annotations = pod.annotations().clone();
    annotations.remove(ANNOTATION_ORIGINAL_NAME);

    let mut spec = pod.spec.clone().unwrap_or_default();
    strip_from_pod_spec(&mut spec, settings);

    Pod {
        metadata: ObjectMeta {
            name: Some(original_name),
            namespace: pod.namespace(),
            labels: without_backrefs(pod.metadata.labels.as_ref()),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    }
}

/// Deployment with the sidecar added to its template and a fresh template identity.
///
/// Back-reference labels go on both the `Deployment` (so cleanup can find it even
/// when scaled to zero) and its template (so every replica carries them).
#[must_use]
pub fn build_injected_deployment(
    deployment: &Deployment,
    settings: &Settings,
    config: &TorBridgeConfig,
    torrc_hash: &str,
) -> Deployment {
    let mut updated = deployment.clone();
    updated
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(backref_labels(config));

    let spec = updated.spec.get_or_insert_with(Default::default);
    let template_meta = spec.template.metadata.get_or_insert_with(Default::default);

    template_meta
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(backref_labels(config));
    let annotations = template_meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(ANNOTATION_TORRC_HASH.to_string(), torrc_hash.to_string());
    annotations.insert(
        ANNOTATION_TEMPLATE_REVISION.to_string(),
        Utc::now().to_rfc3339(),
    );
    template_meta.name = Some(hidden_name(&deployment.name_any()));

    let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
    inject_into_pod_spec(pod_spec, settings, config);
    updated
}

/// Deployment with the sidecar removed from its template.
#[must_use]
pub fn build_restored_deployment(deployment: &Deployment, settings: &Settings) -> Deployment {
    let mut updated = deployment.clone();
    updated.metadata.labels = without_backrefs(updated.metadata.labels.as_ref());

    let spec = updated.spec.get_or_insert_with(Default::default);
    let template_meta = spec.template.metadata.get_or_insert_with(Default::default);

    template_meta.labels = without_backrefs(template_meta.labels.as_ref());
    let annotations = template_meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.remove(ANNOTATION_TORRC_HASH);
    annotations.insert(
        ANNOTATION_TEMPLATE_REVISION.to_string(),
        Utc::now().to_rfc3339(),
    );
    template_meta.name = None;

    if let Some(pod_spec) = spec.template.spec.as_mut() {
        strip_from_pod_spec(pod_spec, settings);
    }
    updated
}

fn template_has_sidecar(deployment: &Deployment, sidecar_name: &str) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|s| has_sidecar(s, sidecar_name))
}

// ============================================================================
// Mutations
// ============================================================================

/// Make sure the workload behind `target` carries the relay sidecar for `config`.
///
/// # Returns
///
/// `Ok(true)` when a mutation was applied, `Ok(false)` when the workload was
/// already converged (or is being deleted).
///
/// # Errors
///
/// Returns an error if a store write fails. A version conflict on the
/// `Deployment` surfaces here and is retried by the caller's backoff.
pub async fn ensure_injected<S, E>(
    ctx: &Context<S, E>,
    target: &TargetRef,
    config: &TorBridgeConfig,
    torrc_hash: &str,
) -> Result<bool>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let settings = &ctx.settings;
    match target {
        TargetRef::Bare(pod) => {
            let converged = pod
                .spec
                .as_ref()
                .is_some_and(|s| has_sidecar(s, &settings.sidecar_container_name));
            if converged {
                debug!(pod = %pod.name_any(), "Pod already carries the relay sidecar");
                return Ok(false);
            }
            if pod.metadata.deletion_timestamp.is_some() {
                return Ok(false);
            }

            let namespace = pod.namespace().unwrap_or_default();
            let replacement = build_injected_pod(pod, settings, config);
            info!(
                namespace = %namespace,
                pod = %pod.name_any(),
                replacement = %replacement.name_any(),
                config = %config.name_any(),
                "Recreating bare pod with relay sidecar"
            );

            if !delete_if_unchanged(&ctx.store, pod).await? {
                debug!(pod = %pod.name_any(), "Pod changed since it was read, skipping recreate");
                return Ok(false);
            }
            ctx.store
                .create(&namespace, &replacement)
                .await
                .with_context(|| format!("failed to create pod {}", replacement.name_any()))?;
            metrics::record_sidecar_injected(KIND_POD);
            Ok(true)
        }
        TargetRef::TopLevelController(deployment) => {
            if template_has_sidecar(deployment, &settings.sidecar_container_name) {
                debug!(
                    deployment = %deployment.name_any(),
                    "Deployment template already carries the relay sidecar"
                );
                return Ok(false);
            }

            let namespace = deployment.namespace().unwrap_or_default();
            info!(
                namespace = %namespace,
                deployment = %deployment.name_any(),
                config = %config.name_any(),
                "Patching deployment template with relay sidecar"
            );

            let updated = build_injected_deployment(deployment, settings, config, torrc_hash);
            ctx.store
                .replace(&namespace, &updated)
                .await
                .with_context(|| format!("failed to update deployment {}", deployment.name_any()))?;
            metrics::record_sidecar_injected(KIND_DEPLOYMENT);
            Ok(true)
        }
    }
}

/// Remove the relay sidecar from the workload behind `target`.
///
/// # Returns
///
/// `Ok(true)` when a mutation was applied, `Ok(false)` when there was nothing to undo.
///
/// # Errors
///
/// Returns an error if a store write fails.
pub async fn ensure_removed<S, E>(ctx: &Context<S, E>, target: &TargetRef) -> Result<bool>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let settings = &ctx.settings;
    match target {
        TargetRef::Bare(pod) => {
            let injected = pod
                .spec
                .as_ref()
                .is_some_and(|s| has_sidecar(s, &settings.sidecar_container_name));
            if !injected || pod.metadata.deletion_timestamp.is_some() {
                return Ok(false);
            }

            let namespace = pod.namespace().unwrap_or_default();
            let restored = build_restored_pod(pod, settings);
            info!(
                namespace = %namespace,
                pod = %pod.name_any(),
                restored = %restored.name_any(),
                "Recreating pod without relay sidecar"
            );

            if !delete_if_unchanged(&ctx.store, pod).await? {
                debug!(pod = %pod.name_any(), "Pod changed since it was read, skipping recreate");
                return Ok(false);
            }
            ctx.store
                .create(&namespace, &restored)
                .await
                .with_context(|| format!("failed to create pod {}", restored.name_any()))?;
            metrics::record_sidecar_unwound(KIND_POD);
            Ok(true)
        }
        TargetRef::TopLevelController(deployment) => {
            if !template_has_sidecar(deployment, &settings.sidecar_container_name) {
                return Ok(false);
            }

            let namespace = deployment.namespace().unwrap_or_default();
            info!(
                namespace = %namespace,
                deployment = %deployment.name_any(),
                "Removing relay sidecar from deployment template"
            );

            let updated = build_restored_deployment(deployment, settings);
            ctx.store
                .replace(&namespace, &updated)
                .await
                .with_context(|| format!("failed to update deployment {}", deployment.name_any()))?;
            metrics::record_sidecar_unwound(KIND_DEPLOYMENT);
            Ok(true)
        }
    }
}

#[cfg(test)]
#[path = "sidecar_tests.rs"]
mod sidecar_tests;
