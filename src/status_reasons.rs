// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition reasons for sidetor resources.
//!
//! Reasons are programmatic identifiers in `CamelCase` that explain why a condition
//! has a particular status.
//!
//! `TorBridgeConfig` carries a single `type: Ready` condition describing whether every
//! sentinel-labelled workload in its namespace carries the relay sidecar.
//! `OnionService` reports progress through `status.phase` / `status.message` instead.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   observedGeneration: 3
//!   injectedWorkloads: 2
//!   conditions:
//!     - type: Ready
//!       status: "True"
//!       reason: SidecarsInjected
//!       message: "Relay sidecar present on 2 workload(s)"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// The encompassing readiness condition.
pub const CONDITION_TYPE_READY: &str = "Ready";

// ============================================================================
// TorBridgeConfig Reasons
// ============================================================================

/// Every matching workload carries the relay sidecar.
pub const REASON_SIDECARS_INJECTED: &str = "SidecarsInjected";

/// No sentinel-labelled workloads exist in the namespace yet.
///
/// The config is still considered ready; workloads created later are injected by the
/// pod reconciler.
pub const REASON_NO_WORKLOADS: &str = "NoWorkloads";

/// Injecting the sidecar into a workload failed; the reconcile will be retried.
pub const REASON_INJECTION_FAILED: &str = "InjectionFailed";

/// The requested relay mode is not supported. The generated torrc carries a
/// diagnostic line instead of relay directives.
pub const REASON_UNSUPPORTED_MODE: &str = "UnsupportedMode";

// ============================================================================
// OnionService Messages
// ============================================================================

/// Phase message while the Deployment has not been observed yet.
pub const MESSAGE_DEPLOYMENT_NOT_CREATED: &str = "Deployment not yet created";

/// Phase message while no replica reports ready.
pub const MESSAGE_WAITING_FOR_READY_POD: &str = "Waiting for pod to become ready";

/// Phase message when no pod carries the service's `app` label.
pub const MESSAGE_NO_PODS_FOUND: &str = "No pods found";

/// Phase message when pods exist but none is running.
pub const MESSAGE_WAITING_FOR_POD_START: &str = "Waiting for pod to start";

/// Phase message when the hostname probe fails.
pub const MESSAGE_WAITING_FOR_ADDRESS: &str = "Waiting for Tor to generate .onion address";

/// Phase message when the hostname probe returns nothing.
pub const MESSAGE_ADDRESS_FILE_EMPTY: &str = "Onion address file is empty, waiting for Tor";

/// Phase message once the `.onion` address is known.
pub const MESSAGE_ONION_READY: &str = "OnionService is ready";
