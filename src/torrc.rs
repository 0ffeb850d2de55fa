// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! torrc rendering for relay sidecars and onion services.
//!
//! Rendering is a pure function of the spec. Each relay mode owns a fixed, ordered
//! list of [`DirectiveRule`]s; a rule's predicate decides whether its line is emitted
//! and its renderer produces the `Directive value` text. Output order is the rule
//! order, so identical specs always render byte-identical files.
//!
//! Optional directives are skipped when their value is zero or empty, so a zero port
//! never shows up as `ORPort 0`. Required directives are emitted unconditionally.
//!
//! # Example
//!
//! ```rust
//! use sidetor::crd::{RelayMode, TorBridgeConfigSpec};
//! use sidetor::torrc::render_relay_config;
//!
//! let spec = TorBridgeConfigSpec {
//!     mode: RelayMode::Bridge,
//!     ..Default::default()
//! };
//! let torrc = render_relay_config(&spec);
//! assert!(torrc.contains("BridgeRelay 1\n"));
//! assert!(torrc.contains("ExitPolicy reject *:*\n"));
//! ```

use crate::constants::{
    DEFAULT_HIDDEN_SERVICE_VIRTUAL_PORT, LOOPBACK_ADDRESS, RELAY_HIDDEN_SERVICE_DIR,
    TOR_DATA_DIRECTORY,
};
use crate::crd::{OnionServiceSpec, RelayMode, TorBridgeConfigSpec};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Line rendered in place of a configuration when the relay mode is not supported.
///
/// Tor refuses to start on it, which keeps a bad spec from silently running a
/// default relay while leaving the generated file readable.
pub const INVALID_MODE_DIRECTIVE: &str = "Invalid mode specified";

/// One line of a torrc template.
pub struct DirectiveRule<T> {
    /// Whether the directive applies to this spec.
    pub emit: fn(&T) -> bool,
    /// Produces the full `Directive value` line, without the trailing newline.
    pub render: fn(&T) -> String,
}

fn always<T>(_: &T) -> bool {
    true
}

// ============================================================================
// Relay sidecar predicates and renderers
// ============================================================================

fn has_or_port(spec: &TorBridgeConfigSpec) -> bool {
    spec.ports.or_port != 0
}

fn has_dir_port(spec: &TorBridgeConfigSpec) -> bool {
    spec.ports.dir_port != 0
}

fn has_socks_port(spec: &TorBridgeConfigSpec) -> bool {
    spec.ports.socks_port != 0
}

fn has_ext_or_port(spec: &TorBridgeConfigSpec) -> bool {
    !spec.ports.ext_or_port.trim().is_empty()
}

fn has_transport_plugin(spec: &TorBridgeConfigSpec) -> bool {
    !spec.transport.plugin_spec.trim().is_empty()
}

fn has_transport_listen_addr(spec: &TorBridgeConfigSpec) -> bool {
    !spec.transport.listen_addr.trim().is_empty()
}

fn has_contact_info(spec: &TorBridgeConfigSpec) -> bool {
    !spec.identity.contact_info.trim().is_empty()
}

fn has_nickname(spec: &TorBridgeConfigSpec) -> bool {
    !spec.identity.nickname.trim().is_empty()
}

fn has_hidden_service_origin(spec: &TorBridgeConfigSpec) -> bool {
    hidden_service_origin_port(spec) != 0
}

fn hidden_service_origin_port(spec: &TorBridgeConfigSpec) -> u16 {
    if spec.ports.origin_port == 0 {
        spec.ports.or_port
    } else {
        spec.ports.origin_port
    }
}

fn bridge_relay(_: &TorBridgeConfigSpec) -> String {
    "BridgeRelay 1".to_string()
}

fn or_port(spec: &TorBridgeConfigSpec) -> String {
    format!("ORPort {}", spec.ports.or_port)
}

fn dir_port(spec: &TorBridgeConfigSpec) -> String {
    format!("DirPort {}", spec.ports.dir_port)
}

fn socks_port(spec: &TorBridgeConfigSpec) -> String {
    format!("SOCKSPort {LOOPBACK_ADDRESS}:{}", spec.ports.socks_port)
}

fn ext_or_port(spec: &TorBridgeConfigSpec) -> String {
    format!("ExtORPort {}", spec.ports.ext_or_port.trim())
}

fn transport_plugin(spec: &TorBridgeConfigSpec) -> String {
    format!("ServerTransportPlugin {}", spec.transport.plugin_spec.trim())
}

fn transport_listen_addr(spec: &TorBridgeConfigSpec) -> String {
    format!(
        "ServerTransportListenAddr {}",
        spec.transport.listen_addr.trim()
    )
}

fn contact_info(spec: &TorBridgeConfigSpec) -> String {
    format!("ContactInfo {}", spec.identity.contact_info.trim())
}

fn nickname(spec: &TorBridgeConfigSpec) -> String {
    format!("Nickname {}", spec.identity.nickname.trim())
}

fn reject_all_exits(_: &TorBridgeConfigSpec) -> String {
    "ExitPolicy reject *:*".to_string()
}

fn exit_relay(spec: &TorBridgeConfigSpec) -> String {
    format!("ExitRelay {}", u8::from(spec.exit_relay))
}

fn relay_hidden_service_dir(_: &TorBridgeConfigSpec) -> String {
    format!("HiddenServiceDir {RELAY_HIDDEN_SERVICE_DIR}")
}

fn relay_hidden_service_port(spec: &TorBridgeConfigSpec) -> String {
    let virtual_port = if spec.ports.redirect_port == 0 {
        DEFAULT_HIDDEN_SERVICE_VIRTUAL_PORT
    } else {
        spec.ports.redirect_port
    };
    format!(
        "HiddenServicePort {virtual_port} {LOOPBACK_ADDRESS}:{}",
        hidden_service_origin_port(spec)
    )
}

// ============================================================================
// Relay sidecar templates
// ============================================================================

const BRIDGE_RULES: &[DirectiveRule<TorBridgeConfigSpec>] = &[
    DirectiveRule {
        emit: always,
        render: bridge_relay,
    },
    DirectiveRule {
        emit: has_or_port,
        render: or_port,
    },
    DirectiveRule {
        emit: has_socks_port,
        render: socks_port,
    },
    DirectiveRule {
        emit: has_transport_plugin,
        render: transport_plugin,
    },
    DirectiveRule {
        emit: has_transport_listen_addr,
        render: transport_listen_addr,
    },
    DirectiveRule {
        emit: has_ext_or_port,
        render: ext_or_port,
    },
    DirectiveRule {
        emit: has_contact_info,
        render: contact_info,
    },
    DirectiveRule {
        emit: has_nickname,
        render: nickname,
    },
    DirectiveRule {
        emit: always,
        render: reject_all_exits,
    },
];

const RELAY_RULES: &[DirectiveRule<TorBridgeConfigSpec>] = &[
    DirectiveRule {
        emit: has_or_port,
        render: or_port,
    },
    DirectiveRule {
        emit: has_dir_port,
        render: dir_port,
    },
    DirectiveRule {
        emit: has_socks_port,
        render: socks_port,
    },
    DirectiveRule {
        emit: has_ext_or_port,
        render: ext_or_port,
    },
    DirectiveRule {
        emit: has_contact_info,
        render: contact_info,
    },
    DirectiveRule {
        emit: has_nickname,
        render: nickname,
    },
    DirectiveRule {
        emit: always,
        render: exit_relay,
    },
];

const HIDDEN_SERVICE_RULES: &[DirectiveRule<TorBridgeConfigSpec>] = &[
    DirectiveRule {
        emit: always,
        render: relay_hidden_service_dir,
    },
    DirectiveRule {
        emit: has_hidden_service_origin,
        render: relay_hidden_service_port,
    },
    DirectiveRule {
        emit: has_socks_port,
        render: socks_port,
    },
    DirectiveRule {
        emit: has_contact_info,
        render: contact_info,
    },
    DirectiveRule {
        emit: has_nickname,
        render: nickname,
    },
];

/// Directive template for a relay mode, or `None` when the mode is unsupported.
#[must_use]
pub fn relay_rules(mode: RelayMode) -> Option<&'static [DirectiveRule<TorBridgeConfigSpec>]> {
    match mode {
        RelayMode::Bridge => Some(BRIDGE_RULES),
        RelayMode::Relay => Some(RELAY_RULES),
        RelayMode::HiddenService => Some(HIDDEN_SERVICE_RULES),
        RelayMode::Unsupported => None,
    }
}

fn render_rules<T>(out: &mut String, rules: &[DirectiveRule<T>], spec: &T) {
    for rule in rules.iter().filter(|rule| (rule.emit)(spec)) {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{}", (rule.render)(spec));
    }
}

/// Render the torrc for a relay sidecar.
///
/// Every file starts with `Log notice stdout` so the relay logs to the container's
/// output. An unsupported mode renders [`INVALID_MODE_DIRECTIVE`] after the header.
#[must_use]
pub fn render_relay_config(spec: &TorBridgeConfigSpec) -> String {
    let mut out = String::from("Log notice stdout\n");
    match relay_rules(spec.mode) {
        Some(rules) => render_rules(&mut out, rules, spec),
        None => {
            out.push_str(INVALID_MODE_DIRECTIVE);
            out.push('\n');
        }
    }
    out
}

// ============================================================================
// Onion service template
// ============================================================================

fn onion_socks_port(spec: &OnionServiceSpec) -> String {
    format!("SOCKSPort {}", spec.socks_port)
}

fn onion_hidden_service_dir(spec: &OnionServiceSpec) -> String {
    format!("HiddenServiceDir {}", spec.effective_hidden_service_dir())
}

fn onion_hidden_service_port(spec: &OnionServiceSpec) -> String {
    format!(
        "HiddenServicePort {} {}",
        spec.hidden_service_port,
        spec.hidden_service_target.trim()
    )
}

fn onion_data_directory(_: &OnionServiceSpec) -> String {
    format!("DataDirectory {TOR_DATA_DIRECTORY}")
}

fn onion_foreground(_: &OnionServiceSpec) -> String {
    "RunAsDaemon 0".to_string()
}

/// Render the torrc for an onion service deployment.
///
/// `SOCKSPort 0` is emitted explicitly when the listener is disabled, since Tor
/// would otherwise open its default SOCKS port. Policy lines keep their order.
#[must_use]
pub fn render_onion_service(spec: &OnionServiceSpec) -> String {
    let mut out = String::new();
    render_rules(
        &mut out,
        &[DirectiveRule {
            emit: always,
            render: onion_socks_port,
        }],
        spec,
    );
    for policy in spec
        .socks_policy
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
    {
        let _ = writeln!(out, "SOCKSPolicy {policy}");
    }
    render_rules(
        &mut out,
        &[
            DirectiveRule {
                emit: always,
                render: onion_hidden_service_dir,
            },
            DirectiveRule {
                emit: always,
                render: onion_hidden_service_port,
            },
            DirectiveRule {
                emit: always,
                render: onion_data_directory,
            },
            DirectiveRule {
                emit: always,
                render: onion_foreground,
            },
        ],
        spec,
    );
    out
}

/// Hex-encoded SHA-256 digest of a rendered file or serialized spec.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
#[path = "torrc_tests.rs"]
mod torrc_tests;
