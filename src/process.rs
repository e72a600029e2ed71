use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::process::Command;

use crate::error::{KiteError, Result};

/// The grace period a timed-out process is given to exit after being asked
/// to terminate, before it is force-killed (`spec.md` §4.2).
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// The outcome of a successful process invocation.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
    pub duration_ms: u64,
}

fn render_command(cmd: &str, args: &[String]) -> String {
    if args.is_empty() {
        cmd.to_string()
    } else {
        format!("{} {}", cmd, args.join(" "))
    }
}

/// Launches external processes with working directory, environment
/// overlay, merged output capture and timeout — grounded in the
/// process-execution pattern of `pantsbuild/pants`'s local command runner
/// (`tokio::process::Command`, piped stdout/stderr, `tokio::time::timeout`)
/// from the reference pack.
pub struct ProcessRunner;

impl ProcessRunner {
    /// Runs `cmd args...` in `working_dir`, overlaying `env` onto the
    /// inherited environment. stderr is merged into stdout. Fails with
    /// `ProcessExecutionError` if the process could not start, timed out,
    /// or exited non-zero.
    pub async fn execute(
        cmd: &str,
        args: &[String],
        working_dir: &Path,
        env: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<ProcessResult> {
        let command_str = render_command(cmd, args);
        let start = Instant::now();

        let mut command = Command::new(cmd);
        command
            .args(args)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| KiteError::ProcessExecutionError {
            command: command_str.clone(),
            exit_code: -1,
            output: e.to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        // Accumulates bytes as they're read off the pipes, independent of
        // the `run` future below. If `tokio::time::timeout` races it out on
        // expiry, the future (and its internal `read_to_string`-style
        // buffers) would normally be dropped along with whatever it had
        // already pulled out of the pipe — holding the buffer outside `run`
        // means that output survives the cancellation (`spec.md` §4.2: "the
        // partial captured output is returned in the error").
        let output: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));

        let run = async {
            let (_, _, status) = tokio::join!(
                Self::pump(&mut stdout, &output),
                Self::pump(&mut stderr, &output),
                child.wait(),
            );
            status
        };

        let status = match timeout {
            Some(duration) => match tokio::time::timeout(duration, run).await {
                Ok(status) => status,
                Err(_) => {
                    Self::kill_and_collect(&mut child, &mut stdout, &mut stderr, &output).await;
                    return Err(KiteError::ProcessExecutionError {
                        command: command_str,
                        exit_code: -1,
                        output: output.lock().clone(),
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
            },
            None => run.await,
        };

        let status = status.map_err(|e| KiteError::ProcessExecutionError {
            command: command_str.clone(),
            exit_code: -1,
            output: output.lock().clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);
        let captured = output.lock().clone();

        if status.success() {
            Ok(ProcessResult {
                command: command_str,
                exit_code,
                output: captured,
                duration_ms,
            })
        } else {
            Err(KiteError::ProcessExecutionError {
                command: command_str,
                exit_code,
                output: captured,
                duration_ms,
            })
        }
    }

    /// Reads `reader` to completion (if present), appending each chunk to
    /// `buffer` as soon as it arrives rather than only once the whole
    /// stream has been consumed — so a cancelled caller still observes
    /// whatever was read before cancellation.
    async fn pump<R: AsyncRead + Unpin>(reader: &mut Option<R>, buffer: &Arc<Mutex<String>>) {
        let Some(reader) = reader.as_mut() else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                    buffer.lock().push_str(&text);
                }
            }
        }
    }

    /// As `execute`, but returns `None` on any failure instead of raising.
    pub async fn execute_or_null(
        cmd: &str,
        args: &[String],
        working_dir: &Path,
        env: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Option<ProcessResult> {
        Self::execute(cmd, args, working_dir, env, timeout).await.ok()
    }

    /// Wraps `line` in the platform's shell: on Windows, `cmd /c`; otherwise
    /// `sh -c`.
    pub async fn shell(
        line: &str,
        working_dir: &Path,
        env: &HashMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<ProcessResult> {
        if cfg!(target_os = "windows") {
            Self::execute(
                "cmd",
                &["/c".to_string(), line.to_string()],
                working_dir,
                env,
                timeout,
            )
            .await
        } else {
            Self::execute(
                "sh",
                &["-c".to_string(), line.to_string()],
                working_dir,
                env,
                timeout,
            )
            .await
        }
    }

    /// Asks the process to terminate, draining any further output it
    /// produces into `output` while it winds down; if it is still alive
    /// after the grace period it is force-killed.
    async fn kill_and_collect(
        child: &mut tokio::process::Child,
        stdout: &mut Option<ChildStdout>,
        stderr: &mut Option<ChildStderr>,
        output: &Arc<Mutex<String>>,
    ) {
        let _ = child.start_kill();

        let drain = async {
            tokio::join!(Self::pump(stdout, output), Self::pump(stderr, output), child.wait());
        };
        let _ = tokio::time::timeout(KILL_GRACE_PERIOD, drain).await;

        let _ = child.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn test_successful_command_captures_output() {
        let result = ProcessRunner::execute(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            Path::new("."),
            &empty_env(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_process_execution_error() {
        let err = ProcessRunner::execute(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            Path::new("."),
            &empty_env(),
            None,
        )
        .await
        .unwrap_err();

        match err {
            KiteError::ProcessExecutionError { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("expected ProcessExecutionError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_or_null_swallows_failure() {
        let result = ProcessRunner::execute_or_null(
            "sh",
            &["-c".to_string(), "exit 1".to_string()],
            Path::new("."),
            &empty_env(),
            None,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_timeout_produces_timeout_like_error() {
        let err = ProcessRunner::execute(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Path::new("."),
            &empty_env(),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

        match err {
            KiteError::ProcessExecutionError { exit_code, .. } => assert_eq!(exit_code, -1),
            other => panic!("expected ProcessExecutionError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_env_overlay_is_visible_to_child() {
        let mut env = HashMap::new();
        env.insert("KITE_TEST_VAR".to_string(), "42".to_string());

        let result = ProcessRunner::shell(
            "echo $KITE_TEST_VAR",
            Path::new("."),
            &env,
            None,
        )
        .await
        .unwrap();

        assert!(result.output.contains("42"));
    }

    #[tokio::test]
    async fn test_shell_merges_stderr_into_stdout() {
        let result = ProcessRunner::shell(
            "echo out; echo err 1>&2",
            Path::new("."),
            &empty_env(),
            None,
        )
        .await
        .unwrap();

        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }
}
