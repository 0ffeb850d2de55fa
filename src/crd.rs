// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for the Tor relay sidecar operator.
//!
//! This module defines the two Kubernetes custom resources managed by sidetor:
//!
//! - [`TorBridgeConfig`] - Relay settings injected as a sidecar into every pod in its
//!   namespace that carries the sentinel label (`tor=hide-me`)
//! - [`OnionService`] - A standalone Tor hidden service backed by its own Deployment,
//!   `ConfigMap` and `PersistentVolumeClaim`
//!
//! All resources are namespaced and live in the `tor.stack.io/v1alpha1` API group.
//!
//! # Example: Injecting a bridge relay
//!
//! ```rust
//! use sidetor::crd::{RelayIdentity, RelayMode, RelayPorts, TorBridgeConfigSpec};
//!
//! let spec = TorBridgeConfigSpec {
//!     mode: RelayMode::Bridge,
//!     ports: RelayPorts {
//!         or_port: 9001,
//!         socks_port: 9050,
//!         ..Default::default()
//!     },
//!     identity: RelayIdentity {
//!         nickname: "sidetor".to_string(),
//!         contact_info: "ops@example.com".to_string(),
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(spec.effective_socks_port(), 9050);
//! ```

use crate::constants::{DEFAULT_HIDDEN_SERVICE_DIR, TOR_DEFAULT_SOCKS_PORT};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Common types include: Ready, Progressing, Degraded.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// TorBridgeConfig
// ============================================================================

/// Relay flavour rendered into the sidecar's torrc.
///
/// Exactly one mode governs which directives are mandatory. Values the operator
/// does not understand deserialize to [`RelayMode::Unsupported`] and render a
/// diagnostic line instead of a working configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Unlisted bridge relay. Never carries exit traffic.
    #[default]
    Bridge,
    /// Public relay, optionally an exit.
    Relay,
    /// Publishes the workload as a v3 onion service from inside the sidecar.
    HiddenService,
    /// Any value not listed above.
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bridge => "bridge",
            Self::Relay => "relay",
            Self::HiddenService => "hidden_service",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Listener ports for the relay sidecar.
///
/// A zero port means "omit the directive".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayPorts {
    /// Onion router port (`ORPort`).
    #[serde(default)]
    pub or_port: u16,

    /// Directory port (`DirPort`). Only rendered in relay mode.
    #[serde(default)]
    pub dir_port: u16,

    /// Local SOCKS port bound on 127.0.0.1.
    ///
    /// Application containers get `http_proxy`, `https_proxy` and `all_proxy`
    /// pointing at this port. When zero, Tor's default (9050) is assumed.
    #[serde(default)]
    pub socks_port: u16,

    /// Extended OR port for pluggable transports, as `host:port` or `auto`.
    #[serde(default)]
    pub ext_or_port: String,

    /// Virtual port published by the hidden service in `hidden_service` mode.
    #[serde(default)]
    pub redirect_port: u16,

    /// Local port the hidden service forwards to in `hidden_service` mode.
    ///
    /// Falls back to `orPort` when zero.
    #[serde(default)]
    pub origin_port: u16,
}

/// Pluggable transport settings (bridge mode).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransportSpec {
    /// Value of `ServerTransportPlugin`, e.g. `obfs4 exec /usr/bin/obfs4proxy`.
    #[serde(default)]
    pub plugin_spec: String,

    /// Value of `ServerTransportListenAddr`, e.g. `obfs4 0.0.0.0:443`.
    #[serde(default)]
    pub listen_addr: String,
}

/// Operator-facing identity published in the relay descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelayIdentity {
    /// Relay nickname (1-19 alphanumeric characters).
    #[serde(default)]
    pub nickname: String,

    /// Contact information for the relay operator.
    #[serde(default)]
    pub contact_info: String,
}

/// `TorBridgeConfig` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TorBridgeConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation of the spec last acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Number of workloads (bare pods or deployments) currently carrying the relay sidecar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injected_workloads: Option<i32>,
}

/// `TorBridgeConfig` tells the operator how to configure the Tor relay sidecar injected
/// into every pod labelled `tor=hide-me` in the same namespace.
///
/// Bare pods are recreated with the sidecar; pods owned by a Deployment (directly or
/// through a `ReplicaSet`) get the sidecar through a patch of the Deployment's pod
/// template, which triggers a normal rollout.
///
/// # Example
///
/// ```yaml
/// apiVersion: tor.stack.io/v1alpha1
/// kind: TorBridgeConfig
/// metadata:
///   name: egress
///   namespace: default
/// spec:
///   mode: bridge
///   ports:
///     orPort: 9001
///     socksPort: 9050
///   transport:
///     pluginSpec: obfs4 exec /usr/bin/obfs4proxy
///     listenAddr: obfs4 0.0.0.0:443
///   identity:
///     nickname: sidetor
///     contactInfo: ops@example.com
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tor.stack.io",
    version = "v1alpha1",
    kind = "TorBridgeConfig",
    namespaced,
    shortname = "tbc",
    doc = "TorBridgeConfig describes the Tor relay sidecar injected into every pod labelled tor=hide-me in its namespace.",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Injected","type":"integer","jsonPath":".status.injectedWorkloads"}"#
)]
#[kube(status = "TorBridgeConfigStatus")]
#[serde(rename_all = "camelCase")]
pub struct TorBridgeConfigSpec {
    /// Relay flavour: `bridge`, `relay` or `hidden_service`.
    #[serde(default)]
    pub mode: RelayMode,

    #[serde(default)]
    pub ports: RelayPorts,

    #[serde(default)]
    pub transport: TransportSpec,

    #[serde(default)]
    pub identity: RelayIdentity,

    /// Container image for the relay sidecar. Defaults to the operator's configured relay image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Allow exit traffic (relay mode only).
    #[serde(default)]
    pub exit_relay: bool,
}

impl TorBridgeConfigSpec {
    /// SOCKS port application containers should be pointed at.
    #[must_use]
    pub fn effective_socks_port(&self) -> u16 {
        if self.ports.socks_port == 0 {
            TOR_DEFAULT_SOCKS_PORT
        } else {
            self.ports.socks_port
        }
    }
}

// ============================================================================
// OnionService
// ============================================================================

/// Lifecycle phase of an [`OnionService`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum OnionServicePhase {
    /// Backing Deployment does not exist yet.
    #[default]
    Pending,
    /// Deployment exists, Tor has not published an address yet.
    Initializing,
    /// `.onion` address is known.
    Ready,
    /// Spec cannot be turned into a working service.
    Failed,
}

impl fmt::Display for OnionServicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// `OnionService` status
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnionServiceStatus {
    /// Published `.onion` address. Only set once the phase is `Ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onion_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<OnionServicePhase>,

    /// Human-readable detail about the current phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OnionServiceStatus {
    /// Build a status for the given phase with no address.
    #[must_use]
    pub fn with_phase(phase: OnionServicePhase, message: &str) -> Self {
        Self {
            onion_address: None,
            phase: Some(phase),
            message: Some(message.to_string()),
        }
    }

    /// True once an address has been recorded and the service is `Ready`.
    #[must_use]
    pub fn is_ready_with_address(&self) -> bool {
        self.phase == Some(OnionServicePhase::Ready)
            && self.onion_address.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// `OnionService` runs a dedicated Tor relay that publishes `hiddenServiceTarget` as a
/// v3 onion service. The generated address is reported in `status.onionAddress`.
///
/// # Example
///
/// ```yaml
/// apiVersion: tor.stack.io/v1alpha1
/// kind: OnionService
/// metadata:
///   name: web
///   namespace: default
/// spec:
///   hiddenServicePort: 80
///   hiddenServiceTarget: web.default.svc.cluster.local:8080
///   socksPolicy:
///     - accept 10.0.0.0/8
///     - reject *
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tor.stack.io",
    version = "v1alpha1",
    kind = "OnionService",
    namespaced,
    shortname = "onion",
    doc = "OnionService publishes a cluster endpoint as a Tor onion service backed by a dedicated relay Deployment.",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.onionAddress"}"#
)]
#[kube(status = "OnionServiceStatus")]
#[serde(rename_all = "camelCase")]
pub struct OnionServiceSpec {
    /// SOCKS listener port. `0` disables the SOCKS listener.
    #[serde(default)]
    pub socks_port: u16,

    /// Ordered `accept`/`reject` SOCKS policy rules; first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub socks_policy: Vec<String>,

    /// Virtual port the onion service is published on.
    pub hidden_service_port: u16,

    /// Backend the onion service forwards to, as `host:port`.
    pub hidden_service_target: String,

    /// Directory holding the hidden service keys. Defaults to `/var/lib/tor/hidden_service`.
    #[serde(default)]
    pub hidden_service_dir: String,

    /// Container image for the relay. Defaults to the operator's configured relay image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl OnionServiceSpec {
    /// Hidden service directory with the default applied.
    #[must_use]
    pub fn effective_hidden_service_dir(&self) -> &str {
        let dir = self.hidden_service_dir.trim();
        if dir.is_empty() {
            DEFAULT_HIDDEN_SERVICE_DIR
        } else {
            dir
        }
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
