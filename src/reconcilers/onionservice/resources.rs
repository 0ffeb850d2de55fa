// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Resource builders and lifecycle for `OnionService`.
//!
//! Every `OnionService` owns three objects, all named after it and carrying a
//! controller owner reference back to it:
//!
//! - `ConfigMap` `<name>-torrc` with the rendered torrc
//! - `PersistentVolumeClaim` `<name>-hidden-service` keeping the service keys across restarts
//! - `Deployment` `<name>` running a single Tor relay
//!
//! Builders are pure; [`create_or_update_resources`] and [`delete_resources`] apply them.

use crate::constants::{
    HIDDEN_SERVICE_PVC_SUFFIX, HIDDEN_SERVICE_STORAGE_REQUEST, HIDDEN_SERVICE_VOLUME_NAME,
    ONION_CONTAINER_NAME, ONION_INIT_CONTAINER_NAME, ONION_SERVICE_REPLICAS, TORRC_CONFIGMAP_KEY,
    TORRC_CONFIGMAP_SUFFIX, TORRC_MOUNT_PATH, TORRC_VOLUME_NAME, TOR_USER_ID,
};
use crate::context::{Context, Settings};
use crate::crd::OnionService;
use crate::exec::RemoteExec;
use crate::labels::{
    ANNOTATION_SPEC_HASH, ANNOTATION_TORRC_HASH, APP_LABEL, APP_NAME_TOR,
    COMPONENT_ONION_SERVICE, K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME, K8S_PART_OF,
    MANAGED_BY_ONION_SERVICE, PART_OF_SIDETOR,
};
use crate::reconcilers::resources::{create_if_missing, create_or_replace_if, delete_if_exists};
use crate::store::ObjectStore;
use crate::torrc::{content_hash, render_onion_service};
use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[must_use]
pub fn configmap_name(service_name: &str) -> String {
    format!("{service_name}{TORRC_CONFIGMAP_SUFFIX}")
}

#[must_use]
pub fn pvc_name(service_name: &str) -> String {
    format!("{service_name}{HIDDEN_SERVICE_PVC_SUFFIX}")
}

/// Labels shared by every object an `OnionService` owns.
///
/// `app=<name>` doubles as the Deployment selector and the pod lookup key used by
/// the status poller.
#[must_use]
pub fn build_labels(service_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), service_name.to_string()),
        (K8S_NAME.to_string(), APP_NAME_TOR.to_string()),
        (K8S_INSTANCE.to_string(), service_name.to_string()),
        (K8S_COMPONENT.to_string(), COMPONENT_ONION_SERVICE.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_ONION_SERVICE.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_SIDETOR.to_string()),
    ])
}

fn selector_labels(service_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), service_name.to_string())])
}

fn owner_references(service: &OnionService) -> Option<Vec<OwnerReference>> {
    service.controller_owner_ref(&()).map(|o| vec![o])
}

fn owned_meta(service: &OnionService, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: service.namespace(),
        labels: Some(build_labels(&service.name_any())),
        owner_references: owner_references(service),
        ..Default::default()
    }
}

/// Directory the hidden-service volume is mounted on: the parent of the
/// hidden-service directory, so Tor can create the directory itself with mode 0700.
fn volume_mount_dir(hidden_service_dir: &str) -> String {
    Path::new(hidden_service_dir.trim_end_matches('/'))
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty() && p != "/")
        .unwrap_or_else(|| hidden_service_dir.to_string())
}

#[must_use]
pub fn build_configmap(service: &OnionService, torrc: &str) -> ConfigMap {
    ConfigMap {
        metadata: owned_meta(service, configmap_name(&service.name_any())),
        data: Some(BTreeMap::from([(
            TORRC_CONFIGMAP_KEY.to_string(),
            torrc.to_string(),
        )])),
        ..Default::default()
    }
}

#[must_use]
pub fn build_pvc(service: &OnionService) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: owned_meta(service, pvc_name(&service.name_any())),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(HIDDEN_SERVICE_STORAGE_REQUEST.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_init_container(settings: &Settings, hidden_service_dir: &str) -> Container {
    let mount_dir = volume_mount_dir(hidden_service_dir);
    let script = format!(
        "mkdir -p {hidden_service_dir} && chown -R {TOR_USER_ID}:{TOR_USER_ID} {mount_dir} && chmod -R 700 {hidden_service_dir}"
    );

    Container {
        name: ONION_INIT_CONTAINER_NAME.to_string(),
        image: Some(settings.init_image.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        volume_mounts: Some(vec![VolumeMount {
            name: HIDDEN_SERVICE_VOLUME_NAME.to_string(),
            mount_path: mount_dir,
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            run_as_user: Some(0),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_tor_container(settings: &Settings, service: &OnionService) -> Container {
    let spec = &service.spec;
    let ports = (spec.socks_port != 0).then(|| {
        vec![ContainerPort {
            name: Some("socks".to_string()),
            container_port: i32::from(spec.socks_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]
    });

    Container {
        name: ONION_CONTAINER_NAME.to_string(),
        image: Some(
            spec.image
                .clone()
                .unwrap_or_else(|| settings.relay_image.clone()),
        ),
        command: Some(vec![
            "tor".to_string(),
            "-f".to_string(),
            TORRC_MOUNT_PATH.to_string(),
        ]),
        ports,
        volume_mounts: Some(vec![
            VolumeMount {
                name: TORRC_VOLUME_NAME.to_string(),
                mount_path: TORRC_MOUNT_PATH.to_string(),
                sub_path: Some(TORRC_CONFIGMAP_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: HIDDEN_SERVICE_VOLUME_NAME.to_string(),
                mount_path: volume_mount_dir(spec.effective_hidden_service_dir()),
                ..Default::default()
            },
        ]),
        security_context: Some(SecurityContext {
            run_as_user: Some(TOR_USER_ID),
            run_as_group: Some(TOR_USER_ID),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the relay Deployment, stamped with a hash of its own spec.
///
/// The pod template carries the torrc hash so a torrc change rolls the pod; the
/// torrc is mounted through `subPath` and would not be refreshed in place.
///
/// # Errors
///
/// Returns an error if the desired spec cannot be serialized for hashing.
pub fn build_deployment(
    service: &OnionService,
    settings: &Settings,
    torrc_hash: &str,
) -> Result<Deployment> {
    let name = service.name_any();
    let hidden_service_dir = service.spec.effective_hidden_service_dir();

    let spec = DeploymentSpec {
        replicas: Some(ONION_SERVICE_REPLICAS),
        selector: LabelSelector {
            match_labels: Some(selector_labels(&name)),
            ..Default::default()
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(build_labels(&name)),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_TORRC_HASH.to_string(),
                    torrc_hash.to_string(),
                )])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(vec![build_init_container(settings, hidden_service_dir)]),
                containers: vec![build_tor_container(settings, service)],
                security_context: Some(PodSecurityContext {
                    fs_group: Some(TOR_USER_ID),
                    ..Default::default()
                }),
                volumes: Some(vec![
                    Volume {
                        name: TORRC_VOLUME_NAME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: configmap_name(&name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Volume {
                        name: HIDDEN_SERVICE_VOLUME_NAME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: pvc_name(&name),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    let spec_hash = content_hash(
        &serde_json::to_string(&spec).context("failed to serialize deployment spec")?,
    );

    let mut metadata = owned_meta(service, name);
    metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_SPEC_HASH.to_string(),
        spec_hash,
    )]));

    Ok(Deployment {
        metadata,
        spec: Some(spec),
        ..Default::default()
    })
}

fn spec_hash_of(deployment: &Deployment) -> Option<&str> {
    deployment
        .annotations()
        .get(ANNOTATION_SPEC_HASH)
        .map(String::as_str)
}

/// Converge the `ConfigMap`, PVC and Deployment of `service`.
///
/// The `ConfigMap` is replaced when its data differs, the PVC is only ever
/// created, and the Deployment is replaced when its spec hash differs.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn create_or_update_resources<S, E>(
    ctx: &Context<S, E>,
    service: &OnionService,
) -> Result<()>
where
    S: ObjectStore,
    E: RemoteExec,
{
    let namespace = service.namespace().unwrap_or_default();

    let torrc = render_onion_service(&service.spec);
    let torrc_hash = content_hash(&torrc);
    debug!(service = %service.name_any(), torrc_hash = %torrc_hash, "Rendered onion service torrc");

    create_or_replace_if(
        &ctx.store,
        &namespace,
        &build_configmap(service, &torrc),
        |live: &ConfigMap, desired: &ConfigMap| live.data != desired.data,
    )
    .await?;

    create_if_missing(&ctx.store, &namespace, &build_pvc(service)).await?;

    create_or_replace_if(
        &ctx.store,
        &namespace,
        &build_deployment(service, &ctx.settings, &torrc_hash)?,
        |live: &Deployment, desired: &Deployment| spec_hash_of(live) != spec_hash_of(desired),
    )
    .await?;

    Ok(())
}

/// Delete everything `service` owns. Safe to call repeatedly.
///
/// # Errors
///
/// Returns an error for any store failure other than the object being gone.
pub async fn delete_resources<S: ObjectStore>(store: &S, namespace: &str, name: &str) -> Result<()> {
    delete_if_exists::<S, Deployment>(store, namespace, name).await?;
    delete_if_exists::<S, ConfigMap>(store, namespace, &configmap_name(name)).await?;
    delete_if_exists::<S, PersistentVolumeClaim>(store, namespace, &pvc_name(name)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
