//! Built-in action handlers.
//!
//! Every handler validates its params, checks touched paths against the
//! safety denylist and reports failures as typed `HandlerError`s.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::adapters::CommandSpec;
use crate::domain::truncate_chars;

use super::registry::{ActionHandler, HandlerContext, HandlerError, HandlerOutput, HandlerRegistry};

/// Default cap on bytes returned by `read_file`
const DEFAULT_READ_LIMIT: u64 = 1024 * 1024;

/// Register all built-in handlers
pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(ShellCommand));
    registry.register(Arc::new(WriteFile));
    registry.register(Arc::new(ReadFile));
    registry.register(Arc::new(DeleteFile));
    registry.register(Arc::new(CreateDirectory));
    registry.register(Arc::new(CopyFile));
    registry.register(Arc::new(SetVariable));
    registry.register(Arc::new(LogMessage));
    registry.register(Arc::new(Sleep));
}

fn required_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, HandlerError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing string param '{}'", key)))
}

fn optional_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn flag(params: &Map<String, Value>, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Resolve a path param and check it against the denylist
fn checked_path(
    params: &Map<String, Value>,
    key: &str,
    ctx: &HandlerContext,
) -> Result<PathBuf, HandlerError> {
    let path = PathBuf::from(required_str(params, key)?);
    ctx.limits().validate_path(&path)?;
    Ok(path)
}

/// Run a process: `{command}` through `sh -c`, or `{program, args}` directly
pub struct ShellCommand;

#[async_trait]
impl ActionHandler for ShellCommand {
    fn name(&self) -> &str {
        "shell_command"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let mut spec = if let Some(command) = optional_str(params, "command") {
            CommandSpec::shell(command)
        } else if let Some(program) = optional_str(params, "program") {
            let args = match params.get("args") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or_else(|| {
                            HandlerError::InvalidParams("args must be strings".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => {
                    return Err(HandlerError::InvalidParams(
                        "args must be an array".to_string(),
                    ))
                }
            };
            CommandSpec::new(program, args)
        } else {
            return Err(HandlerError::InvalidParams(
                "shell_command needs 'command' or 'program'".to_string(),
            ));
        };

        let timeout = params
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or_else(|| ctx.settings.action_timeout());
        spec = spec.with_timeout(timeout).with_sudo(ctx.use_sudo);

        if params.contains_key("cwd") {
            spec = spec.with_cwd(checked_path(params, "cwd", ctx)?);
        }
        if let Some(stdin) = optional_str(params, "stdin") {
            spec = spec.with_stdin(stdin);
        }

        let command = spec.display();
        let output = ctx.runner.run(&spec).await?;
        ctx.audit(format!("ran `{}` -> {:?}", command, output.exit_code));

        if !output.success() {
            return Err(HandlerError::CommandFailed {
                command,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        if let Some(var) = optional_str(params, "capture_as") {
            ctx.variables
                .insert(var.to_string(), Value::String(output.stdout.trim().to_string()));
        }

        let snippet = ctx.settings.snippet_chars;
        Ok(HandlerOutput {
            value: json!({
                "exit_code": output.exit_code,
                "stdout": truncate_chars(&output.stdout, snippet),
                "stderr": truncate_chars(&output.stderr, snippet),
                "duration_ms": output.duration.as_millis() as u64,
            }),
            command: Some(command),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Write or append text to a file
pub struct WriteFile;

#[async_trait]
impl ActionHandler for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let path = checked_path(params, "path", ctx)?;
        let content = required_str(params, "content")?;
        let append = flag(params, "append", false);
        let display = path.display().to_string();

        if flag(params, "create_parents", true) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HandlerError::io(parent.display().to_string(), e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| HandlerError::io(&display, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| HandlerError::io(&display, e))?;
        file.flush().await.map_err(|e| HandlerError::io(&display, e))?;

        ctx.audit(format!("wrote {} bytes to {}", content.len(), display));
        Ok(HandlerOutput::new(json!({
            "path": display,
            "bytes": content.len(),
            "appended": append,
        })))
    }
}

/// Read a text file, optionally into a variable
pub struct ReadFile;

#[async_trait]
impl ActionHandler for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let path = checked_path(params, "path", ctx)?;
        let display = path.display().to_string();
        let max_bytes = params
            .get("max_bytes")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_READ_LIMIT);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| HandlerError::io(&display, e))?;
        if metadata.len() > max_bytes {
            return Err(HandlerError::InvalidParams(format!(
                "{} is {} bytes, over the {} byte limit",
                display,
                metadata.len(),
                max_bytes
            )));
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| HandlerError::io(&display, e))?;

        if let Some(var) = optional_str(params, "into") {
            ctx.variables.insert(var.to_string(), Value::String(content.clone()));
        }

        ctx.audit(format!("read {} bytes from {}", content.len(), display));
        Ok(HandlerOutput::new(json!({
            "path": display,
            "bytes": content.len(),
            "content": content,
        })))
    }
}

/// Remove a file
pub struct DeleteFile;

#[async_trait]
impl ActionHandler for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let path = checked_path(params, "path", ctx)?;
        let display = path.display().to_string();

        let deleted = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && flag(params, "missing_ok", false) => {
                false
            }
            Err(e) => return Err(HandlerError::io(&display, e)),
        };

        ctx.audit(format!("deleted {}", display));
        Ok(HandlerOutput::new(json!({ "path": display, "deleted": deleted })))
    }
}

/// Create a directory and its parents
pub struct CreateDirectory;

#[async_trait]
impl ActionHandler for CreateDirectory {
    fn name(&self) -> &str {
        "create_directory"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let path = checked_path(params, "path", ctx)?;
        let display = path.display().to_string();

        fs::create_dir_all(&path)
            .await
            .map_err(|e| HandlerError::io(&display, e))?;

        ctx.audit(format!("created directory {}", display));
        Ok(HandlerOutput::new(json!({ "path": display })))
    }
}

/// Copy a file
pub struct CopyFile;

#[async_trait]
impl ActionHandler for CopyFile {
    fn name(&self) -> &str {
        "copy_file"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let from = checked_path(params, "from", ctx)?;
        let to = checked_path(params, "to", ctx)?;

        let bytes = fs::copy(&from, &to)
            .await
            .map_err(|e| HandlerError::io(from.display().to_string(), e))?;

        ctx.audit(format!("copied {} -> {}", from.display(), to.display()));
        Ok(HandlerOutput::new(json!({
            "from": from.display().to_string(),
            "to": to.display().to_string(),
            "bytes": bytes,
        })))
    }
}

/// Store a value in the context for later actions
pub struct SetVariable;

#[async_trait]
impl ActionHandler for SetVariable {
    fn name(&self) -> &str {
        "set_variable"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let name = required_str(params, "name")?.to_string();
        let value = params
            .get("value")
            .cloned()
            .ok_or_else(|| HandlerError::InvalidParams("missing param 'value'".to_string()))?;

        let previous = ctx.variables.insert(name.clone(), value.clone());
        ctx.audit(format!("set {}", name));
        Ok(HandlerOutput::new(json!({
            "name": name,
            "value": value,
            "previous": previous,
        })))
    }
}

/// Emit a log line at the requested level
pub struct LogMessage;

#[async_trait]
impl ActionHandler for LogMessage {
    fn name(&self) -> &str {
        "log_message"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let message = required_str(params, "message")?;
        let level = optional_str(params, "level").unwrap_or("info");

        match level {
            "debug" => tracing::debug!(target: "omnitide::instruction", "{}", message),
            "warn" | "warning" => tracing::warn!(target: "omnitide::instruction", "{}", message),
            "error" => tracing::error!(target: "omnitide::instruction", "{}", message),
            "info" => tracing::info!(target: "omnitide::instruction", "{}", message),
            other => {
                return Err(HandlerError::InvalidParams(format!(
                    "unknown log level '{}'",
                    other
                )))
            }
        }

        ctx.audit(format!("[{}] {}", level, message));
        Ok(HandlerOutput::new(json!({ "level": level, "message": message })))
    }
}

/// Wait a number of seconds
pub struct Sleep;

#[async_trait]
impl ActionHandler for Sleep {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn execute(
        &self,
        params: &Map<String, Value>,
        ctx: &mut HandlerContext,
    ) -> Result<HandlerOutput, HandlerError> {
        let seconds = params
            .get("seconds")
            .and_then(Value::as_f64)
            .ok_or_else(|| HandlerError::InvalidParams("missing number param 'seconds'".to_string()))?;
        let requested = Duration::try_from_secs_f64(seconds).map_err(|e| {
            HandlerError::InvalidParams(format!("'seconds' is not a usable duration: {}", e))
        })?;

        // Never outlive the action timeout
        let limit = ctx.settings.action_timeout();
        if requested > limit {
            tokio::time::sleep(limit).await;
            return Err(HandlerError::Timeout(limit));
        }
        tokio::time::sleep(requested).await;

        ctx.audit(format!("slept {}s", seconds));
        Ok(HandlerOutput::new(json!({ "seconds": seconds })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemRunner;
    use crate::config::DispatcherSettings;
    use tempfile::TempDir;

    fn context() -> HandlerContext {
        HandlerContext::new(DispatcherSettings::default(), Arc::new(SystemRunner::new()))
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/out.txt");
        let mut ctx = context();

        WriteFile
            .execute(&params(json!({"path": path, "content": "hello"})), &mut ctx)
            .await
            .unwrap();
        WriteFile
            .execute(
                &params(json!({"path": path, "content": " world", "append": true})),
                &mut ctx,
            )
            .await
            .unwrap();

        let out = ReadFile
            .execute(&params(json!({"path": path, "into": "text"})), &mut ctx)
            .await
            .unwrap();

        assert_eq!(out.value["content"], json!("hello world"));
        assert_eq!(ctx.variables["text"], json!("hello world"));
        assert_eq!(ctx.audit_trail.len(), 3);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context();
        let err = ReadFile
            .execute(&params(json!({"path": temp.path().join("nope")})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[tokio::test]
    async fn test_denylisted_path_refused() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context();
        let err = WriteFile
            .execute(
                &params(json!({"path": temp.path().join(".env"), "content": "X=1"})),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "denied");
        assert!(!temp.path().join(".env").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_ok() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context();
        let path = temp.path().join("gone.txt");

        let err = DeleteFile
            .execute(&params(json!({"path": path})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io");

        let out = DeleteFile
            .execute(&params(json!({"path": path, "missing_ok": true})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.value["deleted"], json!(false));
    }

    #[tokio::test]
    async fn test_copy_and_create_directory() {
        let temp = TempDir::new().unwrap();
        let mut ctx = context();
        let dir = temp.path().join("a/b");
        let src = temp.path().join("src.txt");
        std::fs::write(&src, "data").unwrap();

        CreateDirectory
            .execute(&params(json!({"path": dir})), &mut ctx)
            .await
            .unwrap();
        let out = CopyFile
            .execute(&params(json!({"from": src, "to": dir.join("dst.txt")})), &mut ctx)
            .await
            .unwrap();

        assert_eq!(out.value["bytes"], json!(4));
        assert_eq!(std::fs::read_to_string(dir.join("dst.txt")).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_shell_command_capture() {
        let mut ctx = context();
        let out = ShellCommand
            .execute(
                &params(json!({"command": "printf 'v1.2\\n'", "capture_as": "version"})),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.command.as_deref(), Some("sh -c printf 'v1.2\\n'"));
        assert_eq!(ctx.variables["version"], json!("v1.2"));
    }

    #[tokio::test]
    async fn test_shell_command_program_args() {
        let mut ctx = context();
        let out = ShellCommand
            .execute(&params(json!({"program": "echo", "args": ["a", "b"]})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "a b");
    }

    #[tokio::test]
    async fn test_shell_command_failure() {
        let mut ctx = context();
        let err = ShellCommand
            .execute(&params(json!({"command": "echo bad >&2; exit 4"})), &mut ctx)
            .await
            .unwrap_err();

        match err {
            HandlerError::CommandFailed { exit_code, stderr, .. } => {
                assert_eq!(exit_code, Some(4));
                assert_eq!(stderr.trim(), "bad");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shell_command_cwd_checked() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("secrets")).unwrap();
        std::fs::create_dir_all(temp.path().join("work")).unwrap();
        let mut ctx = context();

        let sneaky = temp.path().join("work/../secrets");
        let err = ShellCommand
            .execute(
                &params(json!({"command": "touch ran", "cwd": sneaky.to_str().unwrap()})),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "denied");
        assert!(!temp.path().join("secrets/ran").exists());

        let out = ShellCommand
            .execute(
                &params(json!({"command": "pwd", "cwd": temp.path().join("work").to_str().unwrap()})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert!(out.stdout.trim().ends_with("work"));
    }

    #[tokio::test]
    async fn test_shell_command_invalid_params() {
        let mut ctx = context();
        let err = ShellCommand
            .execute(&params(json!({"program": "echo", "args": "a b"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_params");

        let err = ShellCommand.execute(&Map::new(), &mut ctx).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_params");
    }

    #[tokio::test]
    async fn test_set_variable_and_sleep() {
        let mut ctx = context();
        let out = SetVariable
            .execute(&params(json!({"name": "mode", "value": "fast"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.value["previous"], Value::Null);
        assert_eq!(ctx.variables["mode"], json!("fast"));

        Sleep
            .execute(&params(json!({"seconds": 0.01})), &mut ctx)
            .await
            .unwrap();

        let err = Sleep
            .execute(&params(json!({"seconds": -1})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_params");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_capped_by_action_timeout() {
        let mut ctx = context();
        ctx.settings.action_timeout_seconds = 2;

        let started = tokio::time::Instant::now();
        let err = Sleep
            .execute(&params(json!({"seconds": 86400})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_sleep_rejects_unrepresentable_seconds() {
        let mut ctx = context();
        for seconds in [json!(1e20), json!(f64::MAX), json!("5")] {
            let err = Sleep
                .execute(&params(json!({ "seconds": seconds })), &mut ctx)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_params");
        }
    }

    #[tokio::test]
    async fn test_log_message_levels() {
        let mut ctx = context();
        LogMessage
            .execute(&params(json!({"message": "hi", "level": "warn"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.audit_trail, vec!["[warn] hi".to_string()]);

        let err = LogMessage
            .execute(&params(json!({"message": "hi", "level": "loud"})), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_params");
    }
}
