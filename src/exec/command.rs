// src/exec/command.rs

//! Shell command tasks, as defined in `[task.<name>]` config sections.

use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::{Captures, Regex};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::callable::{TaskCallable, TaskFuture, TaskOutput};
use crate::exec::context::{RunConfig, TaskContext};

static PARAM_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*params\.([A-Za-z0-9_\-]+)\s*\}\}").expect("placeholder regex is valid")
});

/// A task that runs `cmd` through the platform shell.
///
/// The environment of the child carries:
/// - `DAGFLOW_RUN_ID`, `DAGFLOW_TASK`, `DAGFLOW_ATTEMPT`
/// - `DAGFLOW_PARAM_<KEY>` for every run parameter
/// - `DAGFLOW_INPUT_<TASK>` (JSON) for every resolved declared read
///
/// A non-zero exit status fails the attempt. The last non-empty stdout line
/// is the task's result: JSON if it parses, a string otherwise. Branch tasks
/// print their chosen label.
#[derive(Debug, Clone)]
pub struct CommandTask {
    cmd: String,
}

impl CommandTask {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, ctx: TaskContext) -> Result<TaskOutput> {
        let rendered = render_command(&self.cmd, &ctx.config)
            .with_context(|| format!("rendering command of task '{}'", ctx.task_id))?;

        info!(
            task = %ctx.task_id,
            run_id = ctx.run_id,
            attempt = ctx.attempt,
            cmd = %rendered,
            "starting task process"
        );

        let mut cmd = shell_command(&rendered);
        cmd.env("DAGFLOW_RUN_ID", ctx.run_id.to_string())
            .env("DAGFLOW_TASK", &ctx.task_id)
            .env("DAGFLOW_ATTEMPT", ctx.attempt.to_string());
        for (key, value) in &ctx.config.params {
            cmd.env(format!("DAGFLOW_PARAM_{}", env_key(key)), value);
        }
        for (task, value) in &ctx.inputs {
            cmd.env(format!("DAGFLOW_INPUT_{}", env_key(task)), value.to_string());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", ctx.task_id))?;

        // Always consume stderr so buffers don't fill; keep the last line for
        // error messages.
        let stderr_tail = child.stderr.take().map(|stderr| {
            let task_name = ctx.task_id.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                let mut last = None;
                while let Ok(n) = reader.read_until(b'\n', &mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    debug!(task = %task_name, "stderr: {}", line);
                    if !line.trim().is_empty() {
                        last = Some(line.to_string());
                    }
                    buf.clear();
                }
                last
            })
        });

        // Read raw bytes: a command may print anything, only the last line
        // has to make sense.
        let mut last_stdout = None;
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                if reader.read_until(b'\n', &mut buf).await? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(task = %ctx.task_id, "stdout: {}", line);
                if !line.trim().is_empty() {
                    last_stdout = Some(line.to_string());
                }
            }
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of task '{}'", ctx.task_id))?;

        let stderr_last = match stderr_tail {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        info!(
            task = %ctx.task_id,
            run_id = ctx.run_id,
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "task process exited"
        );

        if !status.success() {
            match stderr_last {
                Some(line) => bail!("command exited with {status}: {line}"),
                None => bail!("command exited with {status}"),
            }
        }

        Ok(TaskOutput::Value(parse_result_line(last_stdout.as_deref())))
    }
}

impl TaskCallable for CommandTask {
    fn call(&self, ctx: TaskContext) -> TaskFuture<'_> {
        Box::pin(self.run(ctx))
    }

    fn describe(&self) -> String {
        format!("sh: {}", self.cmd)
    }
}

fn shell_command(script: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    }
}

/// Substitute `{{ params.KEY }}` placeholders from the run config.
///
/// An unknown key is an error rather than an empty string.
pub fn render_command(cmd: &str, config: &RunConfig) -> Result<String> {
    let mut missing = Vec::new();
    let rendered = PARAM_PLACEHOLDER.replace_all(cmd, |caps: &Captures<'_>| {
        let key = &caps[1];
        match config.get(key) {
            Some(v) => v.to_string(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        bail!("unknown run parameter(s): {}", missing.join(", "));
    }
    Ok(rendered.into_owned())
}

/// `vendor-name` -> `VENDOR_NAME`.
fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn parse_result_line(line: Option<&str>) -> Value {
    match line.map(str::trim) {
        None => Value::Null,
        Some(line) => {
            serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::json;

    fn ctx(config: RunConfig, inputs: BTreeMap<String, Value>) -> TaskContext {
        TaskContext {
            run_id: 4,
            task_id: "cmd".into(),
            attempt: 1,
            config: Arc::new(config),
            args: Value::Null,
            inputs,
        }
    }

    #[test]
    fn renders_params() {
        let config = RunConfig::new().with_param("bucket_name", "b1");
        assert_eq!(
            render_command("ls s3://{{ params.bucket_name }}/x", &config).unwrap(),
            "ls s3://b1/x"
        );
        let err = render_command("{{params.nope}}", &config).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn result_line_parsing() {
        assert_eq!(parse_result_line(None), Value::Null);
        assert_eq!(parse_result_line(Some("412.5")), json!(412.5));
        assert_eq!(parse_result_line(Some(" deploy ")), json!("deploy"));
        assert_eq!(parse_result_line(Some(r#"{"ok":true}"#)), json!({ "ok": true }));
        assert_eq!(env_key("train-model.v2"), "TRAIN_MODEL_V2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn last_stdout_line_is_result() {
        let task = CommandTask::new("echo first; echo; echo 650");
        let out = task.call(ctx(RunConfig::new(), BTreeMap::new())).await.unwrap();
        assert_eq!(out, TaskOutput::Value(json!(650)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn binary_stdout_does_not_fail_the_task() {
        let task = CommandTask::new("printf '\\377\\376\\n'; echo 42");
        let out = task.call(ctx(RunConfig::new(), BTreeMap::new())).await.unwrap();
        assert_eq!(out, TaskOutput::Value(json!(42)));

        let task = CommandTask::new("printf 'rmse \\377\\n'");
        let out = task.call(ctx(RunConfig::new(), BTreeMap::new())).await.unwrap();
        assert_eq!(out, TaskOutput::Value(json!("rmse \u{fffd}")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inputs_and_params_reach_the_environment() {
        let mut inputs = BTreeMap::new();
        inputs.insert("train".to_string(), json!(420));
        let config = RunConfig::new().with_param("vendor_name", "acme");
        let task = CommandTask::new("echo \"$DAGFLOW_PARAM_VENDOR_NAME-$DAGFLOW_INPUT_TRAIN-$DAGFLOW_RUN_ID\"");

        let out = task.call(ctx(config, inputs)).await.unwrap();
        assert_eq!(out, TaskOutput::Value(json!("acme-420-4")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_fails_with_stderr() {
        let task = CommandTask::new("echo broken >&2; exit 3");
        let err = task
            .call(ctx(RunConfig::new(), BTreeMap::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }
}
