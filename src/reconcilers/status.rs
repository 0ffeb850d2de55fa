// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for sidetor resources.
//!
//! Kubernetes conditions follow a standard format:
//! - `type`: The aspect of the resource being reported (e.g., "Ready")
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (`CamelCase`)
//! - `message`: A human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp when the condition changed
//!
//! # Example
//!
//! ```rust
//! use sidetor::reconcilers::status::create_condition;
//!
//! let condition = create_condition("Ready", "True", "SidecarsInjected", "2 workloads");
//! assert_eq!(condition.r#type, "Ready");
//! ```

use crate::crd::Condition;
use crate::store::{ObjectStore, StoreObject};
use anyhow::{Context as _, Result};
use chrono::Utc;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Create a new Kubernetes condition with the current timestamp.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Find a condition by type in a list of conditions.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Update or add a condition in a mutable conditions list (in-memory, no API call).
///
/// The `lastTransitionTime` is preserved when the status value does not change.
pub fn update_condition_in_memory(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) {
        let last_transition_time = if existing.status == status {
            existing
                .last_transition_time
                .clone()
                .unwrap_or_else(|| Utc::now().to_rfc3339())
        } else {
            Utc::now().to_rfc3339()
        };

        existing.status = status.to_string();
        existing.reason = Some(reason.to_string());
        existing.message = Some(message.to_string());
        existing.last_transition_time = Some(last_transition_time);
    } else {
        conditions.push(create_condition(condition_type, status, reason, message));
    }
}

/// Compare two condition lists, ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(current: &[Condition], new: &[Condition]) -> bool {
    if current.len() != new.len() {
        return false;
    }

    new.iter().all(|new_cond| {
        current.iter().any(|c| {
            c.r#type == new_cond.r#type
                && c.status == new_cond.status
                && c.reason == new_cond.reason
                && c.message == new_cond.message
        })
    })
}

/// Write `status` to the status subresource of `resource`.
///
/// # Errors
///
/// Returns an error if the status cannot be serialized or the patch fails.
pub async fn patch_status<S, K, T>(store: &S, resource: &K, status: &T) -> Result<()>
where
    S: ObjectStore,
    K: StoreObject,
    T: Serialize + Sync,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let patch = json!({ "status": status });

    debug!(
        kind = %K::kind(&()),
        namespace = %namespace,
        name = %name,
        "Patching status"
    );

    store
        .merge_patch_status::<K>(&namespace, &name, &patch)
        .await
        .with_context(|| format!("failed to update status of {namespace}/{name}"))
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
