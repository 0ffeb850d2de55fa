// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and sidetor-specific labels/annotations
//! to ensure consistency across all resources touched by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of sidetor
pub const PART_OF_SIDETOR: &str = "sidetor";

/// Application name for Tor relay workloads
pub const APP_NAME_TOR: &str = "tor";

/// Component value for onion service deployments
pub const COMPONENT_ONION_SERVICE: &str = "onion-service";

/// Component value for generated relay configuration
pub const COMPONENT_RELAY_CONFIG: &str = "relay-config";

/// Value for `app.kubernetes.io/managed-by` on objects generated for a `TorBridgeConfig`
pub const MANAGED_BY_TOR_BRIDGE_CONFIG: &str = "TorBridgeConfig";

/// Value for `app.kubernetes.io/managed-by` on objects generated for an `OnionService`
pub const MANAGED_BY_ONION_SERVICE: &str = "OnionService";

/// Selector label used by onion service deployments
pub const APP_LABEL: &str = "app";

// ============================================================================
// Sentinel Label
// ============================================================================

/// Key of the label that marks a pod as wanting the relay sidecar
pub const SENTINEL_LABEL_KEY: &str = "tor";

/// Value of the label that marks a pod as wanting the relay sidecar
pub const SENTINEL_LABEL_VALUE: &str = "hide-me";

// ============================================================================
// Back-Reference Labels
// ============================================================================

/// Name of the `TorBridgeConfig` that injected this workload
pub const BACKREF_CONFIG_NAME: &str = "tor.stack.io/config-name";

/// Namespace of the `TorBridgeConfig` that injected this workload
pub const BACKREF_CONFIG_NAMESPACE: &str = "tor.stack.io/config-namespace";

// ============================================================================
// Annotations
// ============================================================================

/// Name a bare pod had before it was recreated with the relay sidecar
pub const ANNOTATION_ORIGINAL_NAME: &str = "tor.stack.io/original-name";

/// SHA-256 of the rendered torrc stamped on injected pod templates
pub const ANNOTATION_TORRC_HASH: &str = "tor.stack.io/torrc-hash";

/// SHA-256 of the desired deployment spec for onion services
pub const ANNOTATION_SPEC_HASH: &str = "tor.stack.io/spec-hash";

/// Template revision stamp, changed on every inject/unwind to force a rollout
pub const ANNOTATION_TEMPLATE_REVISION: &str = "tor.stack.io/template-revision";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `TorBridgeConfig` resources
pub const FINALIZER_TOR_BRIDGE_CONFIG: &str = "torbridgeconfig.tor.stack.io/finalizer";

/// Finalizer for `OnionService` resources
pub const FINALIZER_ONION_SERVICE: &str = "onionservice.tor.stack.io/finalizer";
