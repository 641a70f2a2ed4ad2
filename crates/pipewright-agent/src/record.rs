use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;

use crate::graph::ExecutionResult;
use crate::pipeline::Step;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Error summary in an output record.
#[derive(Debug, Clone, Serialize)]
pub struct RunError {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
}

impl From<&PipewrightError> for RunError {
    fn from(e: &PipewrightError) -> Self {
        Self {
            kind: e.kind().to_string(),
            node: e.node().map(str::to_string),
            message: e.root().to_string(),
        }
    }
}

/// The JSON document written at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord<'a> {
    pub status: RunStatus,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Node names in the order they ran. Empty when the run failed.
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub state: &'a RunState,
}

impl<'a> RunRecord<'a> {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcome: &Result<ExecutionResult<Step>>,
        state: &'a RunState,
    ) -> Self {
        let (status, path, error) = match outcome {
            Ok(result) => {
                let status = if state.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
                let path = result.path().iter().map(|s| s.to_string()).collect();
                (status, path, None)
            }
            Err(e) => {
                let status = if matches!(e.root(), PipewrightError::Cancelled) {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                (status, Vec::new(), Some(RunError::from(e)))
            }
        };

        Self {
            status,
            run_id,
            started_at,
            finished_at: Utc::now(),
            path,
            error,
            state,
        }
    }

    /// Write the record as pretty JSON, creating parent directories.
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        info!(path = %path.display(), status = ?self.status, "Output record written");
        Ok(())
    }
}
