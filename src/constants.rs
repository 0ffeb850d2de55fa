// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the sidetor operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Kind Names
// ============================================================================

/// Kind name for core `Pod` resources
pub const KIND_POD: &str = "Pod";

/// Kind name for `ReplicaSet` owner references
pub const KIND_REPLICA_SET: &str = "ReplicaSet";

/// Kind name for `Deployment` owner references
pub const KIND_DEPLOYMENT: &str = "Deployment";

// ============================================================================
// Relay Container Defaults
// ============================================================================

/// Default name of the injected relay sidecar container.
///
/// Its presence in a pod spec is the "already converged" marker.
pub const DEFAULT_SIDECAR_CONTAINER_NAME: &str = "tor-bridge";

/// Default image for the relay sidecar and the onion service deployment
pub const DEFAULT_RELAY_IMAGE: &str = "dperson/torproxy:latest";

/// Default image for the init container that prepares the hidden service directory
pub const DEFAULT_INIT_IMAGE: &str = "busybox:latest";

/// Name of the relay container inside an onion service deployment
pub const ONION_CONTAINER_NAME: &str = "tor";

/// Name of the init container inside an onion service deployment
pub const ONION_INIT_CONTAINER_NAME: &str = "init-permissions";

/// Path the rendered torrc is mounted at inside relay containers
pub const TORRC_MOUNT_PATH: &str = "/etc/tor/torrc";

/// Key holding the rendered torrc in generated `ConfigMaps`
pub const TORRC_CONFIGMAP_KEY: &str = "torrc";

/// Suffix appended to the owner name for generated torrc `ConfigMaps`
pub const TORRC_CONFIGMAP_SUFFIX: &str = "-torrc";

/// Volume name used for the torrc `ConfigMap` mount
pub const TORRC_VOLUME_NAME: &str = "tor-config";

/// Volume name used for the hidden service key material
pub const HIDDEN_SERVICE_VOLUME_NAME: &str = "hidden-service";

/// Suffix appended to the onion service name for its `PersistentVolumeClaim`
pub const HIDDEN_SERVICE_PVC_SUFFIX: &str = "-hidden-service";

/// Storage requested for the hidden service key material
pub const HIDDEN_SERVICE_STORAGE_REQUEST: &str = "100Mi";

/// UID/GID the relay process runs as in the upstream image
pub const TOR_USER_ID: i64 = 101;

/// Infix used when naming recreated bare pods (`<name>-hidden-<suffix>`)
pub const HIDDEN_POD_INFIX: &str = "-hidden-";

/// Length of the random suffix appended to recreated pod names
pub const HIDDEN_POD_SUFFIX_LEN: usize = 4;

// ============================================================================
// Tor Protocol Constants
// ============================================================================

/// Loopback address the local SOCKS listener binds to
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Port Tor listens on for SOCKS when no `SOCKSPort` is configured
pub const TOR_DEFAULT_SOCKS_PORT: u16 = 9050;

/// Virtual port published by hidden services when no redirect port is set
pub const DEFAULT_HIDDEN_SERVICE_VIRTUAL_PORT: u16 = 80;

/// Hidden service directory used by the relay sidecar in `hidden_service` mode
pub const RELAY_HIDDEN_SERVICE_DIR: &str = "/var/lib/tor/hidden_service/";

/// Default hidden service directory for `OnionService` resources
pub const DEFAULT_HIDDEN_SERVICE_DIR: &str = "/var/lib/tor/hidden_service";

/// Data directory used by onion service deployments
pub const TOR_DATA_DIRECTORY: &str = "/var/lib/tor";

/// File Tor writes the `.onion` address to inside the hidden service directory
pub const ONION_HOSTNAME_FILE: &str = "hostname";

/// Environment variables pointed at the local SOCKS proxy on application containers
pub const PROXY_ENV_VARS: [&str; 3] = ["http_proxy", "https_proxy", "all_proxy"];

// ============================================================================
// Replica Constants
// ============================================================================

/// Replica count for onion service deployments.
///
/// A hidden service key must only be served by one relay at a time.
pub const ONION_SERVICE_REPLICAS: i32 = 1;

// ============================================================================
// Owner Chain Constants
// ============================================================================

/// Maximum owner-reference hops followed from a pod (Pod → `ReplicaSet` → `Deployment`)
pub const MAX_OWNER_DEPTH: usize = 2;

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Requeue delay after a finalizer was just added
pub const REQUEUE_AFTER_FINALIZER_SECS: u64 = 1;

/// Requeue delay while an onion service is still waiting for its address
pub const REQUEUE_PENDING_SECS: u64 = 10;

/// Upper bound for one exec session into a relay container, output included
pub const EXEC_TIMEOUT_SECS: u64 = 30;

/// Initial delay for error backoff
pub const ERROR_BACKOFF_INITIAL_SECS: u64 = 1;

/// Upper bound for error backoff
pub const ERROR_BACKOFF_MAX_SECS: u64 = 300;

/// Multiplier applied to the error backoff after each consecutive failure
pub const ERROR_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor applied to backoff delays (±10%)
pub const ERROR_BACKOFF_JITTER: f64 = 0.1;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default number of reconciles each controller runs in parallel
pub const DEFAULT_CONTROLLER_CONCURRENCY: u16 = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Default port for the Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";

/// HTTP path for Prometheus metrics scraping
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// HTTP path for liveness probes
pub const HEALTH_SERVER_PATH: &str = "/healthz";
