// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every reconciler receives an `Arc<Context>` that carries:
//! - the state store used for all reads and writes
//! - the remote exec transport used by the onion service status poller
//! - operator [`Settings`] (sidecar name, images, sentinel label)
//! - the per-key error backoff tracker consulted by the controllers' error policy
//!
//! `Context` is generic over the store and exec implementations so reconcilers can
//! be driven by the in-memory store in tests and by
//! [`crate::store::KubeStore`] in production.

use crate::constants::{
    DEFAULT_INIT_IMAGE, DEFAULT_RELAY_IMAGE, DEFAULT_SIDECAR_CONTAINER_NAME,
};
use crate::exec::{KubeExec, RemoteExec};
use crate::labels::{SENTINEL_LABEL_KEY, SENTINEL_LABEL_VALUE};
use crate::reconcilers::retry::BackoffTracker;
use crate::selector::LabelQuery;
use crate::store::{KubeStore, ObjectStore};

/// Operator-wide configuration, fixed at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Name of the injected relay container, also the "already converged" marker.
    pub sidecar_container_name: String,

    /// Relay image used when a resource does not set one.
    pub relay_image: String,

    /// Image for the onion service init container.
    pub init_image: String,

    /// Label a pod must carry to receive the relay sidecar.
    pub sentinel_label: (String, String),
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sidecar_container_name: DEFAULT_SIDECAR_CONTAINER_NAME.to_string(),
            relay_image: DEFAULT_RELAY_IMAGE.to_string(),
            init_image: DEFAULT_INIT_IMAGE.to_string(),
            sentinel_label: (
                SENTINEL_LABEL_KEY.to_string(),
                SENTINEL_LABEL_VALUE.to_string(),
            ),
        }
    }
}

impl Settings {
    /// Selector matching pods that want the relay sidecar.
    #[must_use]
    pub fn sentinel_selector(&self) -> LabelQuery {
        LabelQuery::new().with(
            self.sentinel_label.0.clone(),
            self.sentinel_label.1.clone(),
        )
    }
}

/// Shared context passed to all controllers.
pub struct Context<S = KubeStore, E = KubeExec>
where
    S: ObjectStore,
    E: RemoteExec,
{
    /// State store for API operations
    pub store: S,

    /// Transport for running commands inside containers
    pub exec: E,

    /// Operator configuration
    pub settings: Settings,

    /// Consecutive-failure tracking for error requeues
    pub backoff: BackoffTracker,
}

impl<S: ObjectStore, E: RemoteExec> Context<S, E> {
    #[must_use]
    pub fn new(store: S, exec: E, settings: Settings) -> Self {
        Self {
            store,
            exec,
            settings,
            backoff: BackoffTracker::default(),
        }
    }
}
