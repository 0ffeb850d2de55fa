// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Owner-chain resolution.
//!
//! A sentinel-labelled pod is either mutated directly (no owner) or through the
//! top-level controller that stamps it out. The chain in this domain is at most
//! `Pod -> ReplicaSet -> Deployment`, so the walk is bounded by
//! [`MAX_OWNER_DEPTH`] hops.
//!
//! ```text
//! Pod (no owners)                      => TargetRef::Bare(pod)
//! Pod -> Deployment                    => TargetRef::TopLevelController(deployment)
//! Pod -> ReplicaSet -> Deployment      => TargetRef::TopLevelController(deployment)
//! Pod -> ReplicaSet (standalone)       => ResolveError::UnsupportedOwner
//! Pod -> StatefulSet / DaemonSet / Job => ResolveError::UnsupportedOwner
//! Pod -> <missing object>              => ResolveError::NotFound (retried)
//! ```

use crate::constants::{KIND_DEPLOYMENT, KIND_POD, KIND_REPLICA_SET, MAX_OWNER_DEPTH};
use crate::errors::ResolveError;
use crate::store::ObjectStore;
use futures::future::{BoxFuture, FutureExt};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use tracing::debug;

/// The object that must be mutated to get a relay sidecar into a pod.
#[derive(Clone, Debug)]
pub enum TargetRef {
    /// Unowned pod: recreated with the sidecar.
    Bare(Pod),
    /// Top-level workload controller: pod template patched in place.
    TopLevelController(Deployment),
}

impl TargetRef {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bare(_) => KIND_POD,
            Self::TopLevelController(_) => KIND_DEPLOYMENT,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Bare(pod) => pod.name_any(),
            Self::TopLevelController(deployment) => deployment.name_any(),
        }
    }
}

/// Classification of an object's controlling owner.
#[derive(Clone, Debug, PartialEq)]
pub enum OwnerLink {
    /// No owner references.
    Bare,
    /// Owned by a replica-managing intermediate (`ReplicaSet`).
    IntermediateReplica(OwnerReference),
    /// Owned by a top-level workload controller (`Deployment`).
    TopLevelController(OwnerReference),
    /// Owned by a controller kind the engine does not mutate.
    Unsupported(OwnerReference),
}

impl OwnerLink {
    /// Classify the controlling owner in `meta`.
    ///
    /// The reference flagged `controller: true` wins; otherwise the first one is used.
    #[must_use]
    pub fn of(meta: &ObjectMeta) -> Self {
        let owners = meta.owner_references.as_deref().unwrap_or_default();
        let owner = owners
            .iter()
            .find(|o| o.controller == Some(true))
            .or_else(|| owners.first());

        match owner {
            None => Self::Bare,
            Some(o) if o.kind == KIND_REPLICA_SET => Self::IntermediateReplica(o.clone()),
            Some(o) if o.kind == KIND_DEPLOYMENT => Self::TopLevelController(o.clone()),
            Some(o) => Self::Unsupported(o.clone()),
        }
    }
}

/// Resolve `pod` to the object the workload mutator should act on.
///
/// # Errors
///
/// - [`ResolveError::NotFound`] when an owner reference is dangling
/// - [`ResolveError::UnsupportedOwner`] for controllers other than `Deployment`
/// - [`ResolveError::DepthExceeded`] when the chain is longer than expected
/// - [`ResolveError::Store`] when a lookup fails
pub async fn resolve_target<S: ObjectStore>(
    store: &S,
    pod: &Pod,
) -> Result<TargetRef, ResolveError> {
    resolve_link(store, pod, OwnerLink::of(&pod.metadata), pod.name_any(), 0).await
}

fn resolve_link<'a, S: ObjectStore>(
    store: &'a S,
    pod: &'a Pod,
    link: OwnerLink,
    child: String,
    hops: usize,
) -> BoxFuture<'a, Result<TargetRef, ResolveError>> {
    async move {
        let namespace = pod.namespace().unwrap_or_default();

        if !matches!(link, OwnerLink::Bare) && hops >= MAX_OWNER_DEPTH {
            return Err(ResolveError::DepthExceeded {
                namespace,
                name: pod.name_any(),
                max_depth: MAX_OWNER_DEPTH,
            });
        }

        match link {
            OwnerLink::Bare => Ok(TargetRef::Bare(pod.clone())),
            OwnerLink::TopLevelController(owner) => {
                let deployment = store
                    .get::<Deployment>(&namespace, &owner.name)
                    .await?
                    .ok_or_else(|| dangling(&owner, &namespace, &child))?;
                debug!(
                    namespace = %namespace,
                    pod = %pod.name_any(),
                    deployment = %owner.name,
                    hops = hops + 1,
                    "Resolved pod to top-level controller"
                );
                Ok(TargetRef::TopLevelController(deployment))
            }
            OwnerLink::IntermediateReplica(owner) => {
                let replica_set = store
                    .get::<ReplicaSet>(&namespace, &owner.name)
                    .await?
                    .ok_or_else(|| dangling(&owner, &namespace, &child))?;
                match OwnerLink::of(&replica_set.metadata) {
                    OwnerLink::Bare => Err(unsupported(pod, &owner)),
                    next => resolve_link(store, pod, next, owner.name.clone(), hops + 1).await,
                }
            }
            OwnerLink::Unsupported(owner) => Err(unsupported(pod, &owner)),
        }
    }
    .boxed()
}

fn dangling(owner: &OwnerReference, namespace: &str, child: &str) -> ResolveError {
    ResolveError::NotFound {
        kind: owner.kind.clone(),
        namespace: namespace.to_string(),
        name: owner.name.clone(),
        child: child.to_string(),
    }
}

fn unsupported(pod: &Pod, owner: &OwnerReference) -> ResolveError {
    ResolveError::UnsupportedOwner {
        namespace: pod.namespace().unwrap_or_default(),
        name: pod.name_any(),
        owner_kind: owner.kind.clone(),
        owner_name: owner.name.clone(),
    }
}

#[cfg(test)]
#[path = "ownership_tests.rs"]
mod ownership_tests;
