use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::artifacts::ArtifactsView;
use crate::error::Result;
use crate::logger::SegmentLogger;
use crate::process::{ProcessResult, ProcessRunner};

/// The per-segment handle passed to `execute`. Created by the scheduler at
/// dispatch time and released after the body returns (`spec.md` §3
/// "Lifecycles"). Cheaply `Clone`-able since every field is an `Arc`/owned
/// value that can be shared across the segment's own task without
/// re-creating the logger or registry view.
#[derive(Clone)]
pub struct ExecutionContext {
    pub segment_name: String,
    workspace: PathBuf,
    env: Arc<HashMap<String, String>>,
    logger: Arc<SegmentLogger>,
    artifacts: ArtifactsView,
}

impl ExecutionContext {
    pub fn new(
        segment_name: impl Into<String>,
        workspace: PathBuf,
        env: Arc<HashMap<String, String>>,
        logger: Arc<SegmentLogger>,
        artifacts: ArtifactsView,
    ) -> Self {
        Self {
            segment_name: segment_name.into(),
            workspace,
            env,
            logger,
            artifacts,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn env(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned().or_else(|| std::env::var(name).ok())
    }

    pub fn logger(&self) -> &SegmentLogger {
        &self.logger
    }

    pub fn artifacts(&self) -> &ArtifactsView {
        &self.artifacts
    }

    /// Runs `cmd args...` in the workspace; raises on non-zero exit.
    pub async fn exec(&self, cmd: &str, args: &[String]) -> Result<ProcessResult> {
        self.exec_with_timeout(cmd, args, None).await
    }

    pub async fn exec_with_timeout(
        &self,
        cmd: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<ProcessResult> {
        self.logger.log_command_start(&Self::render(cmd, args));
        let start = std::time::Instant::now();
        let result = ProcessRunner::execute(cmd, args, &self.workspace, &self.env, timeout).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(ok) => self
                .logger
                .log_command_complete(&Self::render(cmd, args), ok.exit_code, elapsed_ms),
            Err(crate::error::KiteError::ProcessExecutionError { exit_code, .. }) => self
                .logger
                .log_command_complete(&Self::render(cmd, args), *exit_code, elapsed_ms),
            Err(_) => {}
        }
        result
    }

    /// As `exec`, but returns `None` on any failure instead of raising.
    pub async fn exec_or_null(&self, cmd: &str, args: &[String]) -> Option<ProcessResult> {
        self.exec(cmd, args).await.ok()
    }

    /// Runs `line` through the platform shell.
    pub async fn shell(&self, line: &str) -> Result<ProcessResult> {
        self.logger.log_command_start(&format!("$ {line}"));
        let start = std::time::Instant::now();
        let result = ProcessRunner::shell(line, &self.workspace, &self.env, None).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(ok) => self.logger.log_command_complete(line, ok.exit_code, elapsed_ms),
            Err(crate::error::KiteError::ProcessExecutionError { exit_code, .. }) => {
                self.logger.log_command_complete(line, *exit_code, elapsed_ms)
            }
            Err(_) => {}
        }
        result
    }

    fn render(cmd: &str, args: &[String]) -> String {
        if args.is_empty() {
            cmd.to_string()
        } else {
            format!("{} {}", cmd, args.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::SegmentLogger;

    fn test_context(dir: &Path) -> ExecutionContext {
        let logger = Arc::new(SegmentLogger::new(&dir.join(".kite/logs"), "demo", None).unwrap());
        ExecutionContext::new(
            "demo",
            dir.to_path_buf(),
            Arc::new(HashMap::new()),
            logger,
            ArtifactsView::default(),
        )
    }

    #[tokio::test]
    async fn test_exec_runs_in_workspace_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let result = ctx.shell("pwd").await.unwrap();
        assert!(result.output.trim().ends_with(
            dir.path()
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
        ));
    }

    #[tokio::test]
    async fn test_env_reads_overlay_first() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(SegmentLogger::new(&dir.path().join(".kite/logs"), "demo", None).unwrap());
        let mut env = HashMap::new();
        env.insert("KITE_DEMO_VAR".to_string(), "overlaid".to_string());
        let ctx = ExecutionContext::new(
            "demo",
            dir.path().to_path_buf(),
            Arc::new(env),
            logger,
            ArtifactsView::default(),
        );

        assert_eq!(ctx.env("KITE_DEMO_VAR"), Some("overlaid".to_string()));
        assert_eq!(ctx.env("KITE_DEFINITELY_UNSET_VAR"), None);
    }
}
