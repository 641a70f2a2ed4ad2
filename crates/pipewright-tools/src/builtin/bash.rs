use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use pipewright_core::error::{PipewrightError, Result};
use pipewright_core::state::RunState;
use pipewright_core::traits::Tool;
use pipewright_core::types::ToolOutcome;

const MAX_OUTPUT: usize = 30_000;

/// Runs a shell command in a fixed working directory.
pub struct BashTool {
    working_dir: PathBuf,
}

#[derive(Deserialize)]
struct BashInput {
    command: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 { 120 }

impl BashTool {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

fn truncate(content: &mut String) {
    if content.len() <= MAX_OUTPUT {
        return;
    }
    let mut cut = MAX_OUTPUT;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    content.push_str("\n... (output truncated)");
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command. Returns stdout and stderr."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120)",
                    "default": 120
                }
            },
            "required": ["command"]
        })
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        _state: &'a mut RunState,
    ) -> BoxFuture<'a, Result<ToolOutcome>> {
        Box::pin(async move {
            let params: BashInput = serde_json::from_value(input)
                .map_err(|e| PipewrightError::ToolValidation(e.to_string()))?;

            debug!(command = %params.command, "Executing bash command");

            let timeout = std::time::Duration::from_secs(params.timeout);
            let result = tokio::time::timeout(timeout, async {
                tokio::process::Command::new("bash")
                    .arg("-c")
                    .arg(&params.command)
                    .current_dir(&self.working_dir)
                    .output()
                    .await
            })
            .await;

            match result {
                Ok(Ok(output)) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);

                    let mut content = stdout.into_owned();
                    if !stderr.is_empty() {
                        if !content.is_empty() {
                            content.push('\n');
                        }
                        content.push_str("STDERR:\n");
                        content.push_str(&stderr);
                    }
                    truncate(&mut content);
                    if content.is_empty() {
                        content = "(no output)".to_string();
                    }

                    if output.status.success() {
                        Ok(ToolOutcome::Done(content))
                    } else {
                        let code = output.status.code().unwrap_or(-1);
                        Ok(ToolOutcome::Failed(format!("Exit code {}\n{}", code, content)))
                    }
                }
                Ok(Err(e)) => Err(PipewrightError::ToolExecution {
                    tool: "bash".to_string(),
                    message: e.to_string(),
                }),
                Err(_) => Err(PipewrightError::ToolTimeout {
                    tool: "bash".to_string(),
                    timeout_secs: params.timeout,
                }),
            }
        })
    }

    fn timeout_secs(&self) -> u64 {
        120
    }
}
