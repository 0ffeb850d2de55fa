// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `torrc.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        OnionServiceSpec, RelayIdentity, RelayMode, RelayPorts, TorBridgeConfigSpec,
        TransportSpec,
    };
    use crate::torrc::{
        content_hash, relay_rules, render_onion_service, render_relay_config,
        INVALID_MODE_DIRECTIVE,
    };

    fn full_spec(mode: RelayMode) -> TorBridgeConfigSpec {
        TorBridgeConfigSpec {
            mode,
            ports: RelayPorts {
                or_port: 9001,
                dir_port: 9030,
                socks_port: 9050,
                ext_or_port: "auto".to_string(),
                redirect_port: 0,
                origin_port: 8080,
            },
            transport: TransportSpec {
                plugin_spec: "obfs4 exec /usr/bin/obfs4proxy".to_string(),
                listen_addr: "obfs4 0.0.0.0:443".to_string(),
            },
            identity: RelayIdentity {
                nickname: "sidetor".to_string(),
                contact_info: "ops@example.com".to_string(),
            },
            image: None,
            exit_relay: false,
        }
    }

    #[test]
    fn test_bridge_renders_full_template_in_order() {
        let torrc = render_relay_config(&full_spec(RelayMode::Bridge));
        assert_eq!(
            torrc,
            "Log notice stdout\n\
             BridgeRelay 1\n\
             ORPort 9001\n\
             SOCKSPort 127.0.0.1:9050\n\
             ServerTransportPlugin obfs4 exec /usr/bin/obfs4proxy\n\
             ServerTransportListenAddr obfs4 0.0.0.0:443\n\
             ExtORPort auto\n\
             ContactInfo ops@example.com\n\
             Nickname sidetor\n\
             ExitPolicy reject *:*\n"
        );
    }

    #[test]
    fn test_bridge_always_emits_bridge_relay_and_reject_policy() {
        let torrc = render_relay_config(&TorBridgeConfigSpec::default());
        assert_eq!(
            torrc,
            "Log notice stdout\nBridgeRelay 1\nExitPolicy reject *:*\n"
        );
    }

    #[test]
    fn test_bridge_never_renders_dir_port() {
        let torrc = render_relay_config(&full_spec(RelayMode::Bridge));
        assert!(!torrc.contains("DirPort"));
    }

    #[test]
    fn test_relay_renders_dir_port_and_exit_flag() {
        let mut spec = full_spec(RelayMode::Relay);
        let torrc = render_relay_config(&spec);
        assert_eq!(
            torrc,
            "Log notice stdout\n\
             ORPort 9001\n\
             DirPort 9030\n\
             SOCKSPort 127.0.0.1:9050\n\
             ExtORPort auto\n\
             ContactInfo ops@example.com\n\
             Nickname sidetor\n\
             ExitRelay 0\n"
        );

        spec.exit_relay = true;
        assert!(render_relay_config(&spec).ends_with("ExitRelay 1\n"));
    }

    #[test]
    fn test_zero_ports_are_omitted_per_field() {
        let mut spec = full_spec(RelayMode::Relay);
        spec.ports.dir_port = 0;
        let torrc = render_relay_config(&spec);
        assert!(!torrc.contains("DirPort"));
        assert!(torrc.contains("ORPort 9001\n"));

        spec.ports.or_port = 0;
        let torrc = render_relay_config(&spec);
        assert!(!torrc.contains("ORPort"));

        spec.ports.socks_port = 0;
        let torrc = render_relay_config(&spec);
        assert!(!torrc.contains("SOCKSPort"));
        assert!(!torrc.contains("Port 0"));
    }

    #[test]
    fn test_empty_strings_are_omitted() {
        let mut spec = full_spec(RelayMode::Bridge);
        spec.identity.nickname = String::new();
        spec.identity.contact_info = "   ".to_string();
        spec.transport = TransportSpec::default();
        spec.ports.ext_or_port = String::new();

        let torrc = render_relay_config(&spec);
        assert!(!torrc.contains("Nickname"));
        assert!(!torrc.contains("ContactInfo"));
        assert!(!torrc.contains("ServerTransport"));
        assert!(!torrc.contains("ExtORPort"));
    }

    #[test]
    fn test_hidden_service_mode() {
        let torrc = render_relay_config(&full_spec(RelayMode::HiddenService));
        assert_eq!(
            torrc,
            "Log notice stdout\n\
             HiddenServiceDir /var/lib/tor/hidden_service/\n\
             HiddenServicePort 80 127.0.0.1:8080\n\
             SOCKSPort 127.0.0.1:9050\n\
             ContactInfo ops@example.com\n\
             Nickname sidetor\n"
        );
    }

    #[test]
    fn test_hidden_service_port_uses_redirect_and_falls_back_to_or_port() {
        let mut spec = full_spec(RelayMode::HiddenService);
        spec.ports.redirect_port = 443;
        spec.ports.origin_port = 0;
        let torrc = render_relay_config(&spec);
        assert!(torrc.contains("HiddenServicePort 443 127.0.0.1:9001\n"));

        spec.ports.or_port = 0;
        let torrc = render_relay_config(&spec);
        assert!(!torrc.contains("HiddenServicePort"));
        assert!(torrc.contains("HiddenServiceDir"));
    }

    #[test]
    fn test_unsupported_mode_fails_closed() {
        let torrc = render_relay_config(&full_spec(RelayMode::Unsupported));
        assert_eq!(torrc, format!("Log notice stdout\n{INVALID_MODE_DIRECTIVE}\n"));
        assert!(relay_rules(RelayMode::Unsupported).is_none());
    }

    #[test]
    fn test_render_is_deterministic() {
        for mode in [
            RelayMode::Bridge,
            RelayMode::Relay,
            RelayMode::HiddenService,
            RelayMode::Unsupported,
        ] {
            let spec = full_spec(mode);
            assert_eq!(render_relay_config(&spec), render_relay_config(&spec));
        }
    }

    #[test]
    fn test_onion_service_torrc() {
        let spec = OnionServiceSpec {
            socks_port: 9050,
            socks_policy: vec!["accept 10.0.0.0/8".to_string(), "reject *".to_string()],
            hidden_service_port: 80,
            hidden_service_target: "web.default.svc:8080".to_string(),
            hidden_service_dir: String::new(),
            image: None,
        };
        assert_eq!(
            render_onion_service(&spec),
            "SOCKSPort 9050\n\
             SOCKSPolicy accept 10.0.0.0/8\n\
             SOCKSPolicy reject *\n\
             HiddenServiceDir /var/lib/tor/hidden_service\n\
             HiddenServicePort 80 web.default.svc:8080\n\
             DataDirectory /var/lib/tor\n\
             RunAsDaemon 0\n"
        );
    }

    #[test]
    fn test_onion_service_disabled_socks_and_custom_dir() {
        let spec = OnionServiceSpec {
            socks_port: 0,
            socks_policy: Vec::new(),
            hidden_service_port: 443,
            hidden_service_target: "10.0.0.5:8443".to_string(),
            hidden_service_dir: "/data/hs".to_string(),
            image: None,
        };
        let torrc = render_onion_service(&spec);
        assert!(torrc.starts_with("SOCKSPort 0\nHiddenServiceDir /data/hs\n"));
        assert!(!torrc.contains("SOCKSPolicy"));
    }

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash("BridgeRelay 1\n");
        let b = content_hash("BridgeRelay 1\n");
        let c = content_hash("BridgeRelay 0\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
