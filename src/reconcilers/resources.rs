// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic resource creation and update helpers over [`ObjectStore`].
//!
//! # Strategies
//!
//! - [`create_if_missing`]: create once, never touch again (e.g. PVCs, whose spec is
//!   largely immutable)
//! - [`create_or_replace_if`]: create, or replace when a caller-supplied predicate
//!   says the live object drifted from the desired one
//! - [`delete_if_exists`]: delete, treating "already gone" as success
//! - [`delete_if_unchanged`]: delete only the exact version the caller read, so
//!   of several workers acting on the same snapshot only one wins
//!
//! Replacements carry the live object's `resourceVersion`, so a concurrent writer
//! surfaces as [`crate::store::StoreError::Conflict`] and the reconcile is retried.

use crate::metrics;
use crate::store::{ObjectStore, StoreObject};
use anyhow::{anyhow, Context as _, Result};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// What a create-or-update helper did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceChange {
    Created,
    Updated,
    Unchanged,
}

fn required_name<T: StoreObject>(resource: &T) -> Result<String> {
    resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| anyhow!("{} must have a name", T::kind(&())))
}

/// Create `resource` unless an object with the same name already exists.
///
/// # Errors
///
/// Returns an error if the resource has no name or a store call fails.
pub async fn create_if_missing<S, T>(
    store: &S,
    namespace: &str,
    resource: &T,
) -> Result<ResourceChange>
where
    S: ObjectStore,
    T: StoreObject,
{
    let name = required_name(resource)?;
    if store.get::<T>(namespace, &name).await?.is_some() {
        debug!(
            kind = %T::kind(&()),
            namespace = %namespace,
            name = %name,
            "Resource already exists"
        );
        return Ok(ResourceChange::Unchanged);
    }

    store
        .create(namespace, resource)
        .await
        .with_context(|| format!("failed to create {} {namespace}/{name}", T::kind(&())))?;
    info!(kind = %T::kind(&()), namespace = %namespace, name = %name, "Created resource");
    metrics::record_resource_created(&T::kind(&()));
    Ok(ResourceChange::Created)
}

/// Create `desired`, or replace the live object when `needs_update(live, desired)`.
///
/// # Errors
///
/// Returns an error if the resource has no name or a store call fails, including
/// a version conflict on replace.
pub async fn create_or_replace_if<S, T, F>(
    store: &S,
    namespace: &str,
    desired: &T,
    needs_update: F,
) -> Result<ResourceChange>
where
    S: ObjectStore,
    T: StoreObject,
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    let name = required_name(desired)?;
    let kind = T::kind(&()).to_string();

    let Some(live) = store.get::<T>(namespace, &name).await? else {
        store
            .create(namespace, desired)
            .await
            .with_context(|| format!("failed to create {kind} {namespace}/{name}"))?;
        info!(kind = %kind, namespace = %namespace, name = %name, "Created resource");
        metrics::record_resource_created(&kind);
        return Ok(ResourceChange::Created);
    };

    if !needs_update(&live, desired) {
        debug!(kind = %kind, namespace = %namespace, name = %name, "Resource is up to date");
        return Ok(ResourceChange::Unchanged);
    }

    let mut replacement = desired.clone();
    replacement.meta_mut().resource_version = live.resource_version();
    store
        .replace(namespace, &replacement)
        .await
        .with_context(|| format!("failed to replace {kind} {namespace}/{name}"))?;
    info!(kind = %kind, namespace = %namespace, name = %name, "Replaced resource");
    metrics::record_resource_updated(&kind);
    Ok(ResourceChange::Updated)
}

/// Delete an object, returning whether it existed.
///
/// # Errors
///
/// Returns an error for any store failure other than `NotFound`.
pub async fn delete_if_exists<S, T>(store: &S, namespace: &str, name: &str) -> Result<bool>
where
    S: ObjectStore,
    T: StoreObject,
{
    match store.delete::<T>(namespace, name).await {
        Ok(()) => {
            info!(kind = %T::kind(&()), namespace = %namespace, name = %name, "Deleted resource");
            metrics::record_resource_deleted(&T::kind(&()));
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!(
                kind = %T::kind(&()),
                namespace = %namespace,
                name = %name,
                "Resource already gone"
            );
            Ok(false)
        }
        Err(e) => Err(e)
            .with_context(|| format!("failed to delete {} {namespace}/{name}", T::kind(&()))),
    }
}

/// Delete `object` only if it is still at the `resourceVersion` it was read with.
///
/// # Returns
///
/// `Ok(true)` when this call performed the delete. `Ok(false)` when the object is
/// gone or has changed since it was read, meaning another writer got there first.
///
/// # Errors
///
/// Returns an error for any other store failure, or when `object` has no name.
pub async fn delete_if_unchanged<S, T>(store: &S, object: &T) -> Result<bool>
where
    S: ObjectStore,
    T: StoreObject,
{
    let kind = T::kind(&()).to_string();
    let namespace = object.namespace().unwrap_or_default();
    let name = required_name(object)?;
    let Some(version) = object.resource_version() else {
        return delete_if_exists::<S, T>(store, &namespace, &name).await;
    };

    match store.delete_at_version::<T>(&namespace, &name, &version).await {
        Ok(()) => {
            info!(kind = %kind, namespace = %namespace, name = %name, "Deleted resource");
            metrics::record_resource_deleted(&kind);
            Ok(true)
        }
        Err(e) if e.is_not_found() || e.is_conflict() => {
            debug!(
                kind = %kind,
                namespace = %namespace,
                name = %name,
                resource_version = %version,
                "Resource already deleted or changed since it was read"
            );
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("failed to delete {kind} {namespace}/{name}")),
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
