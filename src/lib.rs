// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Sidetor - Tor sidecar operator for Kubernetes
//!
//! Sidetor routes workload traffic through Tor without changing application
//! images. Pods opt in with a sentinel label (`tor=hide-me` by default) and the
//! operator injects a relay sidecar whose torrc is rendered from a
//! `TorBridgeConfig`. `OnionService` resources get a dedicated relay Deployment
//! that publishes a `.onion` address in status.
//!
//! ## Modules
//!
//! - [`crd`] - `TorBridgeConfig` and `OnionService` custom resources
//! - [`torrc`] - torrc rendering and content hashing
//! - [`reconcilers`] - reconciliation logic for each resource type
//! - [`store`] - the object store seam, backed by the API server or memory
//! - [`exec`] - running commands inside containers
//! - [`context`] - shared controller context and operator settings
//! - [`selector`] - equality-based label selectors
//! - [`metrics`] - Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use sidetor::crd::{RelayMode, TorBridgeConfigSpec};
//! use sidetor::torrc::{content_hash, render_relay_config};
//!
//! let spec = TorBridgeConfigSpec {
//!     mode: RelayMode::Bridge,
//!     ..Default::default()
//! };
//! let torrc = render_relay_config(&spec);
//! assert!(torrc.starts_with("Log notice stdout"));
//! println!("torrc hash: {}", content_hash(&torrc));
//! ```

pub mod constants;
pub mod context;
pub mod crd;
pub mod errors;
pub mod exec;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod selector;
pub mod status_reasons;
pub mod store;
pub mod torrc;
