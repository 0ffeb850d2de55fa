// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `onionservice/resources.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::reconcilers::test_support::{onion_service, test_context, NS};

    fn owned_service(name: &str) -> OnionService {
        let mut service = onion_service(name);
        service.metadata.uid = Some(format!("uid-{name}"));
        service
    }

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
        deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
    }

    #[test]
    fn test_volume_mount_dir_is_parent_of_hidden_service_dir() {
        assert_eq!(volume_mount_dir("/var/lib/tor/hidden_service"), "/var/lib/tor");
        assert_eq!(volume_mount_dir("/var/lib/tor/hidden_service/"), "/var/lib/tor");
        assert_eq!(volume_mount_dir("/onion"), "/onion");
    }

    #[test]
    fn test_configmap_carries_torrc_and_owner() {
        let service = owned_service("shop");
        let configmap = build_configmap(&service, "SOCKSPort 0\n");

        assert_eq!(configmap.metadata.name.as_deref(), Some("shop-torrc"));
        assert_eq!(configmap.metadata.namespace.as_deref(), Some(NS));
        assert_eq!(
            configmap.data.unwrap().get("torrc").map(String::as_str),
            Some("SOCKSPort 0\n")
        );
        let owner = &configmap.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "OnionService");
        assert_eq!(owner.name, "shop");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_pvc_requests_single_writer_storage() {
        let pvc = build_pvc(&owned_service("shop"));
        assert_eq!(pvc.metadata.name.as_deref(), Some("shop-hidden-service"));

        let spec = pvc.spec.unwrap();
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        let requests = spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("100Mi".to_string()));
    }

    #[test]
    fn test_deployment_layout() {
        let settings = Settings::default();
        let deployment = build_deployment(&owned_service("shop"), &settings, "abc").unwrap();

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get("app").map(String::as_str),
            Some("shop")
        );
        let template_meta = spec.template.metadata.as_ref().unwrap();
        assert_eq!(
            template_meta.labels.as_ref().unwrap().get("app").map(String::as_str),
            Some("shop")
        );
        assert_eq!(
            template_meta
                .annotations
                .as_ref()
                .unwrap()
                .get(ANNOTATION_TORRC_HASH)
                .map(String::as_str),
            Some("abc")
        );

        let pod = pod_spec(&deployment);
        assert_eq!(pod.security_context.as_ref().unwrap().fs_group, Some(101));

        let init = &pod.init_containers.as_ref().unwrap()[0];
        assert_eq!(init.name, "init-permissions");
        assert_eq!(init.image.as_deref(), Some("busybox:latest"));
        assert_eq!(init.security_context.as_ref().unwrap().run_as_user, Some(0));
        let script = &init.command.as_ref().unwrap()[2];
        assert!(script.contains("chown -R 101:101 /var/lib/tor"));

        let tor = &pod.containers[0];
        assert_eq!(tor.name, "tor");
        assert_eq!(tor.image.as_deref(), Some("dperson/torproxy:latest"));
        assert_eq!(
            tor.command,
            Some(vec![
                "tor".to_string(),
                "-f".to_string(),
                "/etc/tor/torrc".to_string()
            ])
        );
        let security = tor.security_context.as_ref().unwrap();
        assert_eq!(security.run_as_user, Some(101));
        assert_eq!(security.run_as_group, Some(101));
        assert!(tor.ports.is_none(), "SOCKS port is disabled");

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes[0].config_map.as_ref().unwrap().name, "shop-torrc");
        assert_eq!(
            volumes[1]
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "shop-hidden-service"
        );

        assert!(deployment.annotations().contains_key(ANNOTATION_SPEC_HASH));
    }

    #[test]
    fn test_deployment_exposes_socks_port_when_enabled() {
        let mut service = owned_service("shop");
        service.spec.socks_port = 9050;
        service.spec.image = Some("registry.local/tor:0.4.8".to_string());

        let deployment = build_deployment(&service, &Settings::default(), "abc").unwrap();
        let tor = &pod_spec(&deployment).containers[0];
        assert_eq!(tor.image.as_deref(), Some("registry.local/tor:0.4.8"));
        let port = &tor.ports.as_ref().unwrap()[0];
        assert_eq!(port.name.as_deref(), Some("socks"));
        assert_eq!(port.container_port, 9050);
    }

    #[test]
    fn test_spec_hash_tracks_desired_spec() {
        let settings = Settings::default();
        let service = owned_service("shop");

        let first = build_deployment(&service, &settings, "abc").unwrap();
        let again = build_deployment(&service, &settings, "abc").unwrap();
        assert_eq!(spec_hash_of(&first), spec_hash_of(&again));

        let new_torrc = build_deployment(&service, &settings, "def").unwrap();
        assert_ne!(spec_hash_of(&first), spec_hash_of(&new_torrc));
    }

    #[tokio::test]
    async fn test_resources_converge_once() {
        let ctx = test_context();
        let service = ctx.store.seed(onion_service("shop")).unwrap();

        create_or_update_resources(&ctx, &service).await.unwrap();
        let created = ctx.store.mutations();
        assert_eq!(created.len(), 3);
        assert!(ctx.store.get::<ConfigMap>(NS, "shop-torrc").await.unwrap().is_some());
        assert!(ctx
            .store
            .get::<PersistentVolumeClaim>(NS, "shop-hidden-service")
            .await
            .unwrap()
            .is_some());
        assert!(ctx.store.get::<Deployment>(NS, "shop").await.unwrap().is_some());

        ctx.store.clear_mutations();
        create_or_update_resources(&ctx, &service).await.unwrap();
        assert!(ctx.store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_resources_is_repeatable() {
        let ctx = test_context();
        let service = ctx.store.seed(onion_service("shop")).unwrap();
        create_or_update_resources(&ctx, &service).await.unwrap();

        delete_resources(&ctx.store, NS, "shop").await.unwrap();
        delete_resources(&ctx.store, NS, "shop").await.unwrap();

        assert!(ctx.store.objects::<Deployment>(NS).unwrap().is_empty());
        assert!(ctx.store.objects::<ConfigMap>(NS).unwrap().is_empty());
        assert!(ctx
            .store
            .objects::<PersistentVolumeClaim>(NS)
            .unwrap()
            .is_empty());
    }
}
