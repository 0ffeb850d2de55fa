// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fixtures shared by the reconciler unit tests.

use crate::context::{Context, Settings};
use crate::crd::{
    OnionService, OnionServiceSpec, RelayMode, RelayPorts, TorBridgeConfig, TorBridgeConfigSpec,
};
use crate::exec::{ExecError, ExecOutput, RemoteExec};
use crate::labels::{SENTINEL_LABEL_KEY, SENTINEL_LABEL_VALUE};
use crate::store::InMemoryStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, PodStatus, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const NS: &str = "default";

/// [`RemoteExec`] that replays queued responses and counts invocations.
#[derive(Default)]
pub struct ScriptedExec {
    responses: Mutex<VecDeque<Result<ExecOutput, String>>>,
    calls: AtomicUsize,
}

impl ScriptedExec {
    pub fn push_stdout(&self, stdout: &str) {
        self.responses.lock().unwrap().push_back(Ok(ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        }));
    }

    pub fn push_failure(&self, stderr: &str) {
        self.responses.lock().unwrap().push_back(Ok(ExecOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        }));
    }

    pub fn push_transport_error(&self, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(reason.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExec for ScriptedExec {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(reason)) => Err(ExecError::Transport {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                reason,
            }),
            None => Err(ExecError::Transport {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                reason: "no scripted response".to_string(),
            }),
        }
    }
}

pub fn test_context() -> Context<InMemoryStore, ScriptedExec> {
    Context::new(
        InMemoryStore::new(),
        ScriptedExec::default(),
        Settings::default(),
    )
}

pub fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NS.to_string()),
        ..Default::default()
    }
}

pub fn bridge_config(name: &str) -> TorBridgeConfig {
    let mut config = TorBridgeConfig::new(
        name,
        TorBridgeConfigSpec {
            mode: RelayMode::Bridge,
            ports: RelayPorts {
                or_port: 9001,
                socks_port: 9050,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    config.metadata.namespace = Some(NS.to_string());
    config
}

pub fn onion_service(name: &str) -> OnionService {
    let mut service = OnionService::new(
        name,
        OnionServiceSpec {
            socks_port: 0,
            socks_policy: vec![],
            hidden_service_port: 80,
            hidden_service_target: "web:8080".to_string(),
            hidden_service_dir: String::new(),
            image: None,
        },
    );
    service.metadata.namespace = Some(NS.to_string());
    service
}

pub fn app_container(name: &str) -> Container {
    Container {
        name: name.to_string(),
        image: Some("nginx:1.27".to_string()),
        ..Default::default()
    }
}

pub fn sentinel_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (SENTINEL_LABEL_KEY.to_string(), SENTINEL_LABEL_VALUE.to_string()),
        ("app".to_string(), "web".to_string()),
    ])
}

pub fn owner_ref(kind: &str, name: &str, api_version: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{name}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// A running sentinel-labelled pod with one application container.
pub fn sentinel_pod(name: &str, owners: Vec<OwnerReference>) -> Pod {
    let mut metadata = meta(name);
    metadata.labels = Some(sentinel_labels());
    if !owners.is_empty() {
        metadata.owner_references = Some(owners);
    }
    Pod {
        metadata,
        spec: Some(PodSpec {
            containers: vec![app_container("web")],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A Deployment whose template carries the sentinel label.
pub fn sentinel_deployment(name: &str) -> Deployment {
    Deployment {
        metadata: meta(name),
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(sentinel_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![app_container("web")],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn replica_set(name: &str, owners: Vec<OwnerReference>) -> ReplicaSet {
    let mut metadata = meta(name);
    if !owners.is_empty() {
        metadata.owner_references = Some(owners);
    }
    ReplicaSet {
        metadata,
        spec: Some(ReplicaSetSpec {
            selector: LabelSelector::default(),
            ..Default::default()
        }),
        status: None,
    }
}
