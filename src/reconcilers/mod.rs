// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for sidetor resources.
//!
//! Each reconciler is level-triggered: it reads the current state through the
//! [`crate::store::ObjectStore`], computes what is missing and applies it. Running
//! a reconciler again on converged state performs no writes.
//!
//! # Reconciliation Architecture
//!
//! 1. **Lifecycle** - finalizer add on first sight, cleanup on deletion ([`finalizers`])
//! 2. **Resolve** - map each sentinel-labelled pod to the object to mutate ([`ownership`])
//! 3. **Mutate** - inject or remove the relay sidecar ([`sidecar`])
//! 4. **Status** - report progress back on the resource ([`status`])
//!
//! # Available Reconcilers
//!
//! - [`reconcile_torbridgeconfig`] - Renders the relay torrc and injects the sidecar
//!   into every sentinel-labelled workload in the namespace
//! - [`reconcile_pod`] - Injects new sentinel-labelled pods and unwinds pods whose
//!   `TorBridgeConfig` no longer exists
//! - [`reconcile_onionservice`] - Runs a dedicated Tor deployment per `OnionService`
//!   and publishes its `.onion` address

pub mod finalizers;
pub mod onionservice;
pub mod ownership;
pub mod resources;
pub mod retry;
pub mod sidecar;
pub mod status;
pub mod torbridgeconfig;

#[cfg(test)]
pub(crate) mod test_support;

pub use onionservice::reconcile_onionservice;
pub use torbridgeconfig::{reconcile_pod, reconcile_torbridgeconfig};

use crate::constants::{REQUEUE_AFTER_FINALIZER_SECS, REQUEUE_PENDING_SECS};
use std::time::Duration;

/// What the controller should do after a successful reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Desired state reached; wait for the next watch event.
    Converged,
    /// Something is still outstanding; look again after the given delay.
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    /// Requeue right after persisting a new finalizer.
    #[must_use]
    pub fn finalizer_added() -> Self {
        Self::RequeueAfter(Duration::from_secs(REQUEUE_AFTER_FINALIZER_SECS))
    }

    /// Requeue to poll a condition that is expected to resolve on its own.
    #[must_use]
    pub fn pending() -> Self {
        Self::RequeueAfter(Duration::from_secs(REQUEUE_PENDING_SECS))
    }
}

/// Check if a status value has actually changed compared to the current status.
///
/// Status writes trigger watch events; skipping no-op writes keeps the controller
/// from looping on its own updates.
#[must_use]
pub fn status_changed<T: PartialEq>(current_value: &Option<T>, new_value: &Option<T>) -> bool {
    current_value != new_value
}
