use async_trait::async_trait;
use serde_json::{Value, json};

use super::traits::{Tool, ToolResult};

/// Executes shell commands via `/bin/sh -c`. Destructive-pattern blocking,
/// sudo/reboot gating, and caller-level checks happen once in `ToolGuard`
/// before the executor reaches this handler.
#[derive(Default)]
pub struct ShellTool;

impl ShellTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout/stderr output. \
         Only safe, non-destructive commands are permitted by the active tool guard."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory for the command."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'command'")?
            .to_string();

        let working_dir = args.get("working_dir").and_then(Value::as_str).map(str::to_string);

        let result = tokio::task::spawn_blocking(move || {
            let mut cmd = std::process::Command::new("sh");
            cmd.arg("-c").arg(&command);
            if let Some(dir) = &working_dir {
                cmd.current_dir(dir);
            }
            cmd.output().map_err(|e| format!("failed to spawn process: {e}"))
        })
        .await
        .map_err(|e| format!("blocking task panicked: {e}"))??;

        let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
        let success = result.status.success();

        let output = if stderr.is_empty() {
            stdout
        } else if stdout.is_empty() {
            format!("STDERR: {stderr}")
        } else {
            format!("{stdout}\nSTDERR: {stderr}")
        };

        let meta = json!({ "exit_code": result.status.code() });
        if success {
            Ok(ToolResult::ok(output).with_metadata(meta))
        } else {
            Ok(ToolResult::err(output).with_metadata(meta))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_succeeds() {
        let tool = ShellTool::new();
        let r = tool.execute(json!({"command": "echo hello"})).await.unwrap();
        assert!(r.success);
        assert!(r.output.contains("hello"));
    }

    #[tokio::test]
    async fn missing_command_arg_errors() {
        let tool = ShellTool::new();
        let r = tool.execute(json!({})).await;
        assert!(r.is_err());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failure() {
        let tool = ShellTool::new();
        let r = tool.execute(json!({"command": "exit 1"})).await.unwrap();
        assert!(!r.success);
    }

    #[tokio::test]
    async fn schema_is_valid_json_object() {
        let tool = ShellTool::new();
        let schema = tool.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["command"].is_object());
    }
}
