// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for sidetor resources.
//!
//! A finalizer is attached on the first reconcile of a live resource and removed
//! only after [`FinalizerCleanup::cleanup`] succeeds, so the objects the engine
//! created on the resource's behalf are never orphaned.
//!
//! ```text
//! NoFinalizer --ensure_finalizer--> Finalized --deletionTimestamp--> Cleaning --handle_deletion--> Removed
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sidetor::reconcilers::finalizers::{ensure_finalizer, handle_deletion};
//!
//! if config.metadata.deletion_timestamp.is_some() {
//!     return handle_deletion(&ctx, &config, FINALIZER_TOR_BRIDGE_CONFIG).await;
//! }
//! if ensure_finalizer(&ctx.store, &config, FINALIZER_TOR_BRIDGE_CONFIG).await? {
//!     return Ok(ReconcileOutcome::finalizer_added());
//! }
//! ```

use crate::context::Context;
use crate::exec::RemoteExec;
use crate::store::{ObjectStore, StoreObject};
use anyhow::{Context as _, Result};
use kube::ResourceExt;
use serde_json::json;
use tracing::info;

/// Trait for resources that require cleanup operations when being deleted.
///
/// If `cleanup` returns an error the finalizer is NOT removed and deletion stays
/// blocked until a later reconcile succeeds. Implementations must be idempotent:
/// a crash mid-cleanup redelivers the same deletion.
#[async_trait::async_trait]
pub trait FinalizerCleanup: StoreObject {
    /// Release everything this engine created for the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if any owned object cannot be removed or restored.
    async fn cleanup<S: ObjectStore, E: RemoteExec>(&self, ctx: &Context<S, E>) -> Result<()>;
}

/// True when `finalizer` is present on `resource`.
#[must_use]
pub fn has_finalizer<T: StoreObject>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add a finalizer to a resource if not already present.
///
/// # Returns
///
/// `Ok(true)` when the finalizer was added by this call, `Ok(false)` when it was
/// already there.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn ensure_finalizer<S, T>(store: &S, resource: &T, finalizer: &str) -> Result<bool>
where
    S: ObjectStore,
    T: StoreObject,
{
    if has_finalizer(resource, finalizer) {
        return Ok(false);
    }

    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    info!(
        kind = %T::kind(&()),
        namespace = %namespace,
        name = %name,
        finalizer = %finalizer,
        "Adding finalizer"
    );

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    store
        .merge_patch::<T>(&namespace, &name, &patch)
        .await
        .with_context(|| format!("failed to add finalizer to {namespace}/{name}"))?;

    Ok(true)
}

/// Remove a finalizer from a resource.
///
/// Idempotent: a missing finalizer or an already-removed object is not an error.
///
/// # Errors
///
/// Returns an error if the patch fails for any reason other than the object being gone.
pub async fn remove_finalizer<S, T>(store: &S, resource: &T, finalizer: &str) -> Result<()>
where
    S: ObjectStore,
    T: StoreObject,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    info!(
        kind = %T::kind(&()),
        namespace = %namespace,
        name = %name,
        finalizer = %finalizer,
        "Removing finalizer"
    );

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);

    let patch = json!({ "metadata": { "finalizers": finalizers } });
    match store.merge_patch::<T>(&namespace, &name, &patch).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("failed to remove finalizer from {namespace}/{name}")),
    }
}

/// Handle resource deletion with cleanup and finalizer removal.
///
/// Runs [`FinalizerCleanup::cleanup`] and then removes the finalizer. Does nothing
/// if the finalizer is already gone (cleanup already completed).
///
/// # Errors
///
/// Returns an error if cleanup or finalizer removal fails. The finalizer then stays
/// in place and deletion is retried on the next reconcile.
pub async fn handle_deletion<S, E, T>(
    ctx: &Context<S, E>,
    resource: &T,
    finalizer: &str,
) -> Result<()>
where
    S: ObjectStore,
    E: RemoteExec,
    T: FinalizerCleanup,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    info!(
        kind = %T::kind(&()),
        namespace = %namespace,
        name = %name,
        "Resource is being deleted"
    );

    if has_finalizer(resource, finalizer) {
        info!(kind = %T::kind(&()), namespace = %namespace, name = %name, "Running cleanup");
        resource.cleanup(ctx).await?;
        remove_finalizer(&ctx.store, resource, finalizer).await?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
