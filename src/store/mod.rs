// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! State store boundary.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through [`ObjectStore`],
//! which exposes the handful of verbs the operator needs (get, list, create,
//! version-checked replace, delete, merge patch and status patch) over any namespaced
//! resource. [`KubeStore`] implements it against the API server. The test-only
//! `InMemoryStore` implements the same semantics (optimistic concurrency,
//! finalizer-gated deletion) so reconcilers can be tested without a cluster.
//!
//! Errors are normalised into [`StoreError`] so callers can branch on
//! `NotFound`/`Conflict` without matching on HTTP status codes.

pub mod cluster;
#[cfg(test)]
pub mod memory;

pub use cluster::KubeStore;
#[cfg(test)]
pub use memory::{InMemoryStore, Mutation, Verb};

use crate::selector::LabelQuery;
use async_trait::async_trait;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Any namespaced, serializable Kubernetes object the store can handle.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Errors returned by [`ObjectStore`] implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Namespace that was searched.
        namespace: String,
        /// Name that was looked up.
        name: String,
    },

    /// The object changed since it was read (resourceVersion mismatch).
    #[error("{kind} {namespace}/{name} was modified concurrently: {message}")]
    Conflict {
        /// Kind of the object.
        kind: String,
        /// Namespace of the object.
        namespace: String,
        /// Name of the object.
        name: String,
        /// Server-provided detail.
        message: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        /// Kind of the object.
        kind: String,
        /// Namespace of the object.
        namespace: String,
        /// Name of the object.
        name: String,
    },

    /// The API server rejected the request.
    #[error("API error {code} for {kind} {namespace}/{name}: {message}")]
    Api {
        /// Kind of the object.
        kind: String,
        /// Namespace of the object.
        namespace: String,
        /// Name of the object, empty for list calls.
        name: String,
        /// HTTP status code.
        code: u16,
        /// Server-provided detail.
        message: String,
    },

    /// The API server could not be reached.
    #[error("transport error talking to the API server: {0}")]
    Transport(String),

    /// An object could not be converted to or from JSON.
    #[error("failed to (de)serialize {kind}: {message}")]
    Serialization {
        /// Kind of the object.
        kind: String,
        /// Serializer detail.
        message: String,
    },
}

impl StoreError {
    /// True for [`StoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for [`StoreError::Conflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn not_found<K: StoreObject>(namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// The cluster state store, as seen by the reconcilers.
///
/// All operations are namespaced. `replace` is version-checked: when the object
/// carries a `resourceVersion` that is no longer current, it fails with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one object, `Ok(None)` when it does not exist.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str)
        -> Result<Option<K>, StoreError>;

    /// List objects in a namespace matching a label selector.
    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &LabelQuery,
    ) -> Result<Vec<K>, StoreError>;

    /// Create an object.
    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError>;

    /// Replace an object, honouring its `resourceVersion`.
    async fn replace<K: StoreObject>(&self, namespace: &str, object: &K)
        -> Result<K, StoreError>;

    /// Request deletion of an object. Objects with finalizers are only marked for deletion.
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Request deletion only while the object is still at `resource_version`.
    ///
    /// Fails with [`StoreError::Conflict`] once the object has been written since,
    /// including an earlier delete that marked it as terminating.
    async fn delete_at_version<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), StoreError>;

    /// Apply a JSON merge patch to an object.
    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    /// Apply a JSON merge patch to an object's status subresource.
    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), StoreError>;
}
