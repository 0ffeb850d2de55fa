// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Remote exec boundary.
//!
//! The onion service status poller reads the `.onion` hostname file from inside
//! the running relay container. That read goes through [`RemoteExec`] so the
//! poller can be exercised without a cluster; [`KubeExec`] is the real transport
//! over the pod `exec` subresource. A session that does not finish within
//! [`EXEC_TIMEOUT_SECS`] is abandoned and reported as a transport failure.

use crate::constants::EXEC_TIMEOUT_SECS;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::AttachParams;
use kube::{Api, Client};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Captured result of a command run inside a container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// True when the process exited with status `Success`.
    pub success: bool,
}

/// Failures reaching or talking to the exec transport.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The exec session could not be established.
    #[error("failed to exec into {namespace}/{pod} container {container}: {reason}")]
    Transport {
        /// Namespace of the pod.
        namespace: String,
        /// Pod name.
        pod: String,
        /// Container name.
        container: String,
        /// Underlying error.
        reason: String,
    },

    /// Output streams could not be read to completion.
    #[error("failed to read exec output from {namespace}/{pod}: {reason}")]
    Stream {
        /// Namespace of the pod.
        namespace: String,
        /// Pod name.
        pod: String,
        /// Underlying error.
        reason: String,
    },
}

/// Runs a command inside a container of a running pod.
#[async_trait]
pub trait RemoteExec: Send + Sync + 'static {
    /// Execute `command` in `container` of `namespace/pod` and collect its output.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError>;
}

/// [`RemoteExec`] over the Kubernetes `pods/exec` websocket subresource.
#[derive(Clone)]
pub struct KubeExec {
    client: Client,
}

impl KubeExec {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Run `session`, giving up with [`ExecError::Transport`] once `deadline` passes.
async fn with_deadline<F>(
    deadline: Duration,
    namespace: &str,
    pod: &str,
    container: &str,
    session: F,
) -> Result<ExecOutput, ExecError>
where
    F: Future<Output = Result<ExecOutput, ExecError>>,
{
    match tokio::time::timeout(deadline, session).await {
        Ok(result) => result,
        Err(_) => Err(ExecError::Transport {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            reason: format!("exec did not complete within {}s", deadline.as_secs_f64()),
        }),
    }
}

#[async_trait]
impl RemoteExec for KubeExec {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        with_deadline(
            Duration::from_secs(EXEC_TIMEOUT_SECS),
            namespace,
            pod,
            container,
            self.run_session(namespace, pod, container, command),
        )
        .await
    }
}

impl KubeExec {
    async fn run_session(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        debug!(
            namespace = %namespace,
            pod = %pod,
            container = %container,
            command = ?command,
            "Executing command in container"
        );

        let mut attached = pods
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| ExecError::Transport {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                reason: e.to_string(),
            })?;

        let stream_error = |e: std::io::Error| ExecError::Stream {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            reason: e.to_string(),
        };

        let mut output = ExecOutput::default();
        if let Some(mut stdout) = attached.stdout() {
            stdout
                .read_to_string(&mut output.stdout)
                .await
                .map_err(stream_error)?;
        }
        if let Some(mut stderr) = attached.stderr() {
            stderr
                .read_to_string(&mut output.stderr)
                .await
                .map_err(stream_error)?;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        output.success = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .is_some_and(|s| s == "Success");

        attached.join().await.map_err(|e| ExecError::Stream {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            reason: e.to_string(),
        })?;

        Ok(output)
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod exec_tests;
