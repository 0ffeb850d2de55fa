// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `exec.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    #[tokio::test]
    async fn test_stalled_session_times_out_as_transport_error() {
        let session = std::future::pending::<Result<ExecOutput, ExecError>>();

        let err = with_deadline(Duration::from_millis(20), "shop", "relay-0", "tor", session)
            .await
            .unwrap_err();
        match err {
            ExecError::Transport {
                namespace,
                pod,
                container,
                reason,
            } => {
                assert_eq!(namespace, "shop");
                assert_eq!(pod, "relay-0");
                assert_eq!(container, "tor");
                assert!(reason.contains("did not complete"), "reason: {reason}");
            }
            other => panic!("expected a transport error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_finished_session_passes_through() {
        let output = ExecOutput {
            stdout: "abc.onion\n".to_string(),
            stderr: String::new(),
            success: true,
        };
        let session = std::future::ready(Ok(output.clone()));

        let result = with_deadline(Duration::from_secs(5), "shop", "relay-0", "tor", session)
            .await
            .unwrap();
        assert_eq!(result, output);
    }

    #[tokio::test]
    async fn test_session_error_is_not_masked() {
        let session = std::future::ready(Err(ExecError::Stream {
            namespace: "shop".to_string(),
            pod: "relay-0".to_string(),
            reason: "closed".to_string(),
        }));

        let err = with_deadline(Duration::from_secs(5), "shop", "relay-0", "tor", session)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Stream { .. }));
    }
}
