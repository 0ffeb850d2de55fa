// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ObjectStore`].
//!
//! Objects are kept as JSON documents keyed by kind, namespace and name, so any
//! [`StoreObject`] can be stored without per-type code. The store mimics the API
//! server semantics the reconcilers rely on:
//!
//! - every write bumps `metadata.resourceVersion`; `replace` with a stale version
//!   fails with [`StoreError::Conflict`], as does `delete_at_version`
//! - `metadata.generation` increments when `spec` changes
//! - deleting an object that has finalizers only sets `deletionTimestamp`; the
//!   object disappears once a write leaves it with no finalizers
//! - writes to the main resource never change `status`
//!
//! Every write is recorded as a [`Mutation`] so tests can assert exactly what a
//! reconcile did (or that it did nothing).

use super::{ObjectStore, StoreError, StoreObject};
use crate::selector::LabelQuery;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Write verb recorded by [`InMemoryStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Replace,
    Delete,
    Patch,
    PatchStatus,
}

/// One write applied to an [`InMemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub verb: Verb,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    revision: u64,
    mutations: Vec<Mutation>,
}

impl Inner {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn record(&mut self, verb: Verb, key: &ObjectKey) {
        self.mutations.push(Mutation {
            verb,
            kind: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
        });
    }

    /// Drop the object if it is being deleted and nothing blocks it anymore.
    fn finalize_if_released(&mut self, key: &ObjectKey) {
        let released = self.objects.get(key).is_some_and(|obj| {
            !obj["metadata"]["deletionTimestamp"].is_null() && finalizers_of(obj).is_empty()
        });
        if released {
            self.objects.remove(key);
        }
    }
}

/// Thread-safe, process-local state store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock only happens inside a failing test
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Insert an object as if it already existed, without recording a mutation.
    ///
    /// Missing `uid`, `resourceVersion` and `generation` are filled in. Status is
    /// kept, which makes this the way to stage e.g. a Deployment with ready replicas.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] when the object has no namespace or
    /// name, or cannot be converted to JSON.
    pub fn seed<K: StoreObject>(&self, object: K) -> Result<K, StoreError> {
        let mut value = to_json(&object)?;
        let key = key_of::<K>(&value)?;
        let mut inner = self.lock();
        let revision = inner.next_revision();
        stamp_new(&mut value, &revision);
        inner.objects.insert(key, value.clone());
        from_json(value)
    }

    /// All writes applied since creation or the last [`InMemoryStore::clear_mutations`].
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    /// Forget recorded writes.
    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Every stored object of kind `K` in a namespace, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] when a stored document no longer
    /// deserializes as `K`.
    pub fn objects<K: StoreObject>(&self, namespace: &str) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, value)| from_json(value.clone()))
            .collect()
    }

    fn delete_object<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        precondition: Option<&str>,
    ) -> Result<(), StoreError> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let mut inner = self.lock();
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(StoreError::not_found::<K>(namespace, name));
        };

        let current = stored["metadata"]["resourceVersion"].as_str();
        if let Some(expected) = precondition {
            if Some(expected) != current {
                return Err(StoreError::Conflict {
                    kind: key.0,
                    namespace: key.1,
                    name: key.2,
                    message: format!(
                        "precondition resourceVersion {expected} does not match current {}",
                        current.unwrap_or_default()
                    ),
                });
            }
        }

        inner.record(Verb::Delete, &key);
        if finalizers_of(&stored).is_empty() {
            inner.objects.remove(&key);
            return Ok(());
        }

        if stored["metadata"]["deletionTimestamp"].is_null() {
            let revision = inner.next_revision();
            if let Some(obj) = inner.objects.get_mut(&key) {
                obj["metadata"]["deletionTimestamp"] =
                    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
                obj["metadata"]["resourceVersion"] = Value::String(revision);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let value = self.lock().objects.get(&key).cloned();
        value.map(from_json::<K>).transpose()
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &LabelQuery,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|((k, ns, _), value)| {
                *k == kind && ns == namespace && selector.matches(&labels_of(value))
            })
            .map(|(_, value)| from_json(value.clone()))
            .collect()
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        let mut value = to_json(object)?;
        value["metadata"]["namespace"] = Value::String(namespace.to_string());
        let key = key_of::<K>(&value)?;

        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        }
        let revision = inner.next_revision();
        stamp_new(&mut value, &revision);
        inner.objects.insert(key.clone(), value.clone());
        inner.record(Verb::Create, &key);
        from_json(value)
    }

    async fn replace<K: StoreObject>(
        &self,
        namespace: &str,
        object: &K,
    ) -> Result<K, StoreError> {
        let mut value = to_json(object)?;
        value["metadata"]["namespace"] = Value::String(namespace.to_string());
        let key = key_of::<K>(&value)?;

        let mut inner = self.lock();
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(StoreError::NotFound {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        };

        let expected = value["metadata"]["resourceVersion"].as_str();
        let current = stored["metadata"]["resourceVersion"].as_str();
        if let Some(expected) = expected {
            if Some(expected) != current {
                return Err(StoreError::Conflict {
                    kind: key.0,
                    namespace: key.1,
                    name: key.2,
                    message: format!(
                        "resourceVersion {expected} does not match current {}",
                        current.unwrap_or_default()
                    ),
                });
            }
        }

        carry_server_fields(&stored, &mut value);
        let revision = inner.next_revision();
        value["metadata"]["resourceVersion"] = Value::String(revision);
        inner.objects.insert(key.clone(), value.clone());
        inner.record(Verb::Replace, &key);
        inner.finalize_if_released(&key);
        from_json(value)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.delete_object::<K>(namespace, name, None)
    }

    async fn delete_at_version<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<(), StoreError> {
        self.delete_object::<K>(namespace, name, Some(resource_version))
    }

    async fn merge_patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, StoreError> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let mut inner = self.lock();
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(StoreError::not_found::<K>(namespace, name));
        };

        let mut patch = patch.clone();
        if let Some(obj) = patch.as_object_mut() {
            obj.remove("status");
        }
        let mut value = stored.clone();
        json_merge(&mut value, &patch);
        carry_server_fields(&stored, &mut value);
        let revision = inner.next_revision();
        value["metadata"]["resourceVersion"] = Value::String(revision);

        // Validate before committing so a bad patch leaves the store untouched
        let typed: K = from_json(value.clone())?;
        inner.objects.insert(key.clone(), value);
        inner.record(Verb::Patch, &key);
        inner.finalize_if_released(&key);
        Ok(typed)
    }

    async fn merge_patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<(), StoreError> {
        let key = (K::kind(&()).to_string(), namespace.to_string(), name.to_string());
        let mut inner = self.lock();
        if !inner.objects.contains_key(&key) {
            return Err(StoreError::not_found::<K>(namespace, name));
        }
        let revision = inner.next_revision();
        if let Some(obj) = inner.objects.get_mut(&key) {
            if let Some(status) = patch.get("status") {
                json_merge(&mut obj["status"], status);
            }
            obj["metadata"]["resourceVersion"] = Value::String(revision);
        }
        inner.record(Verb::PatchStatus, &key);
        Ok(())
    }
}

fn to_json<K: StoreObject>(object: &K) -> Result<Value, StoreError> {
    serde_json::to_value(object).map_err(|e| StoreError::Serialization {
        kind: K::kind(&()).to_string(),
        message: e.to_string(),
    })
}

fn from_json<K: StoreObject>(value: Value) -> Result<K, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Serialization {
        kind: K::kind(&()).to_string(),
        message: e.to_string(),
    })
}

fn key_of<K: StoreObject>(value: &Value) -> Result<ObjectKey, StoreError> {
    let field = |name: &str| {
        value["metadata"][name]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Serialization {
                kind: K::kind(&()).to_string(),
                message: format!("object has no metadata.{name}"),
            })
    };
    Ok((K::kind(&()).to_string(), field("namespace")?, field("name")?))
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    value["metadata"]["labels"]
        .as_object()
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn finalizers_of(value: &Value) -> Vec<String> {
    value["metadata"]["finalizers"]
        .as_array()
        .map(|f| {
            f.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn stamp_new(value: &mut Value, revision: &str) {
    let meta = &mut value["metadata"];
    if meta["uid"].is_null() {
        meta["uid"] = Value::String(format!("uid-{revision}"));
    }
    if meta["generation"].is_null() {
        meta["generation"] = Value::from(1);
    }
    if meta["creationTimestamp"].is_null() {
        meta["creationTimestamp"] =
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    meta["resourceVersion"] = Value::String(revision.to_string());
}

/// Keep fields the server owns across a write to the main resource.
fn carry_server_fields(stored: &Value, value: &mut Value) {
    for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
        let current = stored["metadata"][field].clone();
        if current.is_null() {
            if let Some(meta) = value["metadata"].as_object_mut() {
                meta.remove(field);
            }
        } else {
            value["metadata"][field] = current;
        }
    }

    let generation = stored["metadata"]["generation"].as_i64().unwrap_or(1);
    let generation = if stored["spec"] == value["spec"] {
        generation
    } else {
        generation + 1
    };
    value["metadata"]["generation"] = Value::from(generation);

    match stored.get("status") {
        Some(status) if !status.is_null() => value["status"] = status.clone(),
        _ => {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("status");
            }
        }
    }
}

/// RFC 7386 JSON merge patch.
fn json_merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                json_merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
