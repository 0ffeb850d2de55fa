// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for owner-chain resolution.
//!
//! Store and exec failures have their own types in [`crate::store`] and
//! [`crate::exec`]; this module covers failures that only make sense once those
//! primitives are composed into the ownership walk.

use crate::store::StoreError;
use thiserror::Error;

/// Errors that can occur while resolving a pod to the workload that should be mutated.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// An owner reference points at an object that does not exist.
    ///
    /// Usually a transient condition (the owner was just deleted or is not yet
    /// visible); the caller retries through backoff.
    #[error("{kind} {namespace}/{name} referenced as owner of {child} does not exist")]
    NotFound {
        /// Kind of the missing owner.
        kind: String,
        /// Namespace searched.
        namespace: String,
        /// Name of the missing owner.
        name: String,
        /// Object that carried the dangling reference.
        child: String,
    },

    /// The owner chain is deeper than the resolver will follow.
    #[error("owner chain of {namespace}/{name} is deeper than {max_depth} hops")]
    DepthExceeded {
        /// Namespace of the starting pod.
        namespace: String,
        /// Name of the starting pod.
        name: String,
        /// Configured hop limit.
        max_depth: usize,
    },

    /// The pod is managed by a controller the engine does not mutate
    /// (for example a `StatefulSet`, `DaemonSet`, `Job`, or a `ReplicaSet` without a
    /// `Deployment` above it).
    #[error("{namespace}/{name} is owned by unsupported {owner_kind} {owner_name}")]
    UnsupportedOwner {
        /// Namespace of the starting pod.
        namespace: String,
        /// Name of the starting pod.
        name: String,
        /// Kind of the owner that stopped the walk.
        owner_kind: String,
        /// Name of that owner.
        owner_name: String,
    },

    /// The store failed while fetching an owner.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// True when resolution failed because an owner no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
            || matches!(self, Self::Store(e) if e.is_not_found())
    }

    /// True when the pod should be skipped rather than retried.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOwner { .. })
    }
}
