// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ObjectStore`] backed by the Kubernetes API server.

use super::{ObjectStore, StoreError, StoreObject};
use crate::selector::LabelQuery;
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Api, Client, Resource};
use tracing::debug;

/// State store that issues requests through a [`kube::Client`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying Kubernetes client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate a `kube::Error` into the store's error taxonomy.
pub(crate) fn map_kube_error<K: StoreObject>(
    err: kube::Error,
    namespace: &str,
    name: &str,
) -> StoreError {
    let kind = K::kind(&()).to_string();
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => StoreError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            409 => StoreError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: ae.message.clone(),
            },
            code => StoreError::Api {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                code,
                message: ae.message.clone(),
            },
        },
        other => StoreError::Transport(other.to_string()),
    }
}

fn object_name<K: StoreObject>(object: &K) -> Result<String, StoreError> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Serialization {
            kind: K::kind(&()).to_string(),
            message: "object has no metadata.name".to_string(),
        })
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &LabelQuery,
    ) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }
        debug!(
            kind = %K::kind(&()),
            namespace = %namespace,
            selector = %selector,
            "Listing objects"
        );
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, ""))?;
        Ok(list.items)
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        let name = object_name(object)?;
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn replace<K: StoreObject>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, StoreError> {
        let name = object_name(object)?;
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, &name))
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn delete_at_version<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(resource_version.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        self.api::<K>(namespace)
            .delete(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }
}
