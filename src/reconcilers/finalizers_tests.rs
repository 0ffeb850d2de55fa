// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::reconcilers::resources::delete_if_exists;
    use crate::reconcilers::test_support::{meta, test_context, NS};
    use crate::store::Verb;
    use anyhow::anyhow;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};

    const FINALIZER: &str = "test.tor.stack.io/finalizer";

    /// Owns a sibling `ConfigMap` named `<name>-child`.
    #[async_trait::async_trait]
    impl FinalizerCleanup for ConfigMap {
        async fn cleanup<S: ObjectStore, E: RemoteExec>(&self, ctx: &Context<S, E>) -> Result<()> {
            let child = format!("{}-child", self.name_any());
            delete_if_exists::<S, ConfigMap>(&ctx.store, NS, &child).await?;
            Ok(())
        }
    }

    /// Cleanup that never succeeds.
    #[async_trait::async_trait]
    impl FinalizerCleanup for Secret {
        async fn cleanup<S: ObjectStore, E: RemoteExec>(&self, _ctx: &Context<S, E>) -> Result<()> {
            Err(anyhow!("backing store unavailable"))
        }
    }

    fn configmap(name: &str, finalizers: Option<Vec<String>>) -> ConfigMap {
        let mut metadata = meta(name);
        metadata.finalizers = finalizers;
        ConfigMap {
            metadata,
            ..Default::default()
        }
    }

    #[test]
    fn test_has_finalizer() {
        assert!(!has_finalizer(&configmap("a", None), FINALIZER));
        assert!(!has_finalizer(
            &configmap("a", Some(vec!["other".to_string()])),
            FINALIZER
        ));
        assert!(has_finalizer(
            &configmap("a", Some(vec!["other".to_string(), FINALIZER.to_string()])),
            FINALIZER
        ));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_adds_once() {
        let ctx = test_context();
        let parent = ctx.store.seed(configmap("parent", None)).unwrap();

        assert!(ensure_finalizer(&ctx.store, &parent, FINALIZER).await.unwrap());
        let stored: ConfigMap = ctx.store.get(NS, "parent").await.unwrap().unwrap();
        assert_eq!(stored.finalizers(), &[FINALIZER.to_string()]);

        ctx.store.clear_mutations();
        assert!(!ensure_finalizer(&ctx.store, &stored, FINALIZER).await.unwrap());
        assert!(ctx.store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_remove_finalizer_keeps_others() {
        let ctx = test_context();
        let parent = ctx
            .store
            .seed(configmap(
                "parent",
                Some(vec!["other".to_string(), FINALIZER.to_string()]),
            ))
            .unwrap();

        remove_finalizer(&ctx.store, &parent, FINALIZER).await.unwrap();
        let stored: ConfigMap = ctx.store.get(NS, "parent").await.unwrap().unwrap();
        assert_eq!(stored.finalizers(), &["other".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_finalizer_tolerates_missing_object() {
        let ctx = test_context();
        let ghost = configmap("ghost", Some(vec![FINALIZER.to_string()]));
        remove_finalizer(&ctx.store, &ghost, FINALIZER).await.unwrap();
    }

    #[tokio::test]
    async fn test_deletion_blocked_until_cleanup_runs() {
        let ctx = test_context();
        ctx.store
            .seed(configmap("parent", Some(vec![FINALIZER.to_string()])))
            .unwrap();
        ctx.store.seed(configmap("parent-child", None)).unwrap();

        ctx.store.delete::<ConfigMap>(NS, "parent").await.unwrap();
        let deleting: ConfigMap = ctx.store.get(NS, "parent").await.unwrap().unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        handle_deletion(&ctx, &deleting, FINALIZER).await.unwrap();
        assert!(ctx.store.get::<ConfigMap>(NS, "parent").await.unwrap().is_none());
        assert!(ctx
            .store
            .get::<ConfigMap>(NS, "parent-child")
            .await
            .unwrap()
            .is_none());

        // Redelivery of the same deletion is a no-op
        ctx.store.clear_mutations();
        let released = configmap("parent", None);
        handle_deletion(&ctx, &released, FINALIZER).await.unwrap();
        assert!(ctx.store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_finalizer() {
        let ctx = test_context();
        let mut metadata = meta("creds");
        metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let secret = Secret {
            metadata,
            ..Default::default()
        };
        ctx.store.seed(secret).unwrap();
        ctx.store.delete::<Secret>(NS, "creds").await.unwrap();
        let deleting: Secret = ctx.store.get(NS, "creds").await.unwrap().unwrap();

        assert!(handle_deletion(&ctx, &deleting, FINALIZER).await.is_err());

        let stored: Secret = ctx.store.get(NS, "creds").await.unwrap().unwrap();
        assert!(has_finalizer(&stored, FINALIZER));
        let patches = ctx
            .store
            .mutations()
            .iter()
            .filter(|m| m.verb == Verb::Patch)
            .count();
        assert_eq!(patches, 0);
    }
}
