//! External aggregation process runner
//!
//! Spawns the configured command with `<model_dir> <updates_dir>
//! <round>` appended, streams its output into the coordinator's logs,
//! and verifies the expected artifact exists before reporting success.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{AggregationConfig, CommandSpec};
use crate::storage::global_model_filename;

use super::{AggregationError, AggregationOutcome, AggregationRequest, Aggregator};

/// Runs aggregation as a child process
pub struct ProcessAggregator {
    command: CommandSpec,
    timeout: Option<Duration>,
}

impl ProcessAggregator {
    pub fn new(command: CommandSpec, timeout: Option<Duration>) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(config.command.clone(), config.timeout())
    }
}

#[async_trait]
impl Aggregator for ProcessAggregator {
    async fn aggregate(
        &self,
        request: AggregationRequest,
    ) -> Result<AggregationOutcome, AggregationError> {
        let start = Instant::now();

        info!(
            "Aggregating round {} ({} updates) via '{}'",
            request.ordinal,
            request.update_refs.len(),
            self.command.program
        );

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg(&request.model_dir)
            .arg(&request.updates_dir)
            .arg(request.ordinal.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| AggregationError::Spawn {
            program: self.command.program.clone(),
            source: e,
        })?;

        // Stream child output into our logs so training-side progress
        // stays observable
        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("aggregation stdout: {line}");
                }
            })
        });

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("error") || line.contains("Error") {
                        warn!("aggregation stderr: {line}");
                    } else {
                        debug!("aggregation stderr: {line}");
                    }
                }
            })
        });

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        "Aggregation for round {} exceeded {}s, killing process",
                        request.ordinal,
                        limit.as_secs()
                    );
                    let _ = child.kill().await;
                    if let Some(task) = stdout_task {
                        let _ = task.await;
                    }
                    if let Some(task) = stderr_task {
                        let _ = task.await;
                    }
                    return Err(AggregationError::Timeout {
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        };

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let status = waited?;

        if !status.success() {
            error!(
                "Aggregation for round {} exited with {}",
                request.ordinal, status
            );
            return Err(AggregationError::ProcessFailed {
                code: status.code(),
            });
        }

        let artifact = request.model_dir.join(global_model_filename(request.ordinal));
        if tokio::fs::metadata(&artifact).await.is_err() {
            error!(
                "Aggregation for round {} exited cleanly but produced no {}",
                request.ordinal,
                artifact.display()
            );
            return Err(AggregationError::MissingArtifact { path: artifact });
        }

        let elapsed = start.elapsed();
        info!(
            "Round {} aggregated into {} in {:.2}s",
            request.ordinal,
            artifact.display(),
            elapsed.as_secs_f64()
        );

        Ok(AggregationOutcome {
            ordinal: request.ordinal,
            artifact,
            update_count: request.update_refs.len(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request_for(root: &Path, ordinal: u64) -> AggregationRequest {
        let model_dir = root.join("global-models");
        let updates_dir = root.join("provider-updates");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(&updates_dir).unwrap();
        AggregationRequest {
            ordinal,
            global_model: None,
            update_refs: Vec::new(),
            model_dir,
            updates_dir,
        }
    }

    fn shell(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "aggregate".to_string()],
        }
    }

    #[tokio::test]
    async fn test_successful_aggregation_finds_artifact() {
        let dir = tempfile::tempdir().unwrap();
        // $1 = model_dir, $2 = updates_dir, $3 = round
        let aggregator = ProcessAggregator::new(shell("touch \"$1/round-$3.pt\""), None);

        let mut request = request_for(dir.path(), 7);
        request.update_refs = vec![dir.path().join("provider-updates/round-7-p1.pt")];

        let outcome = aggregator.aggregate(request).await.unwrap();
        assert_eq!(outcome.ordinal, 7);
        assert_eq!(outcome.update_count, 1);
        assert!(outcome.artifact.ends_with("round-7.pt"));
        assert!(outcome.artifact.exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = ProcessAggregator::new(shell("exit 3"), None);

        let err = aggregator.aggregate(request_for(dir.path(), 1)).await.unwrap_err();
        match err {
            AggregationError::ProcessFailed { code } => assert_eq!(code, Some(3)),
            other => panic!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_without_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = ProcessAggregator::new(shell("true"), None);

        let err = aggregator.aggregate(request_for(dir.path(), 2)).await.unwrap_err();
        assert!(matches!(err, AggregationError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn test_unspawnable_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = ProcessAggregator::new(
            CommandSpec {
                program: "muster-no-such-binary".to_string(),
                args: Vec::new(),
            },
            None,
        );

        let err = aggregator.aggregate(request_for(dir.path(), 1)).await.unwrap_err();
        assert!(matches!(err, AggregationError::Spawn { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_overrunning_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator =
            ProcessAggregator::new(shell("sleep 5"), Some(Duration::from_millis(100)));

        let start = Instant::now();
        let err = aggregator.aggregate(request_for(dir.path(), 1)).await.unwrap_err();
        assert!(matches!(err, AggregationError::Timeout { .. }));
        assert!(err.is_transient());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
