//! Script sequencing and failure policy around sandboxed runs.

use crate::context::{SharedContext, TestContextManager};
use crate::error::SandboxError;
use crate::logger::{default_logger, ScriptLogger};
use crate::model::*;
use crate::sandbox::{Sandbox, SandboxLimits};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default budget for a post-response script.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Runs one script against one context.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` bound to `context`. `None` means no time limit.
    async fn run_script(
        &self,
        script: &str,
        context: &SharedContext,
        kind: ScriptKind,
        timeout: Option<Duration>,
    ) -> Result<(), SandboxError>;
}

/// Runs scripts in a fresh [`Sandbox`] each time.
#[derive(Debug)]
pub struct SandboxRunner {
    logger: Arc<dyn ScriptLogger>,
    limits: SandboxLimits,
}

impl SandboxRunner {
    pub fn new(logger: Arc<dyn ScriptLogger>, limits: SandboxLimits) -> Self {
        Self { logger, limits }
    }
}

impl Default for SandboxRunner {
    fn default() -> Self {
        Self::new(default_logger(), SandboxLimits::default())
    }
}

#[async_trait]
impl ScriptRunner for SandboxRunner {
    async fn run_script(
        &self,
        script: &str,
        context: &SharedContext,
        kind: ScriptKind,
        timeout: Option<Duration>,
    ) -> Result<(), SandboxError> {
        let sandbox = Sandbox::new(context, self.logger.clone(), self.limits).with_kind(kind);
        match timeout {
            Some(limit) => sandbox.run_in_secure_sandbox(script, limit).await,
            None => {
                let script = script.to_string();
                tokio::task::spawn_blocking(move || sandbox.run_in_sandbox(&script))
                    .await
                    .map_err(|e| SandboxError::Join(e.to_string()))?
            }
        }
    }
}

/// Orchestrates pre-request, post-response, sequence and batch runs.
#[derive(Clone)]
pub struct ScriptExecutor {
    runner: Arc<dyn ScriptRunner>,
    logger: Arc<dyn ScriptLogger>,
    default_timeout: Duration,
    pre_request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutor")
            .field("default_timeout", &self.default_timeout)
            .field("pre_request_timeout", &self.pre_request_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        let logger = default_logger();
        Self::new(
            Arc::new(SandboxRunner::new(logger.clone(), SandboxLimits::default())),
            logger,
        )
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

impl ScriptExecutor {
    pub fn new(runner: Arc<dyn ScriptRunner>, logger: Arc<dyn ScriptLogger>) -> Self {
        Self {
            runner,
            logger,
            default_timeout: DEFAULT_TIMEOUT,
            pre_request_timeout: None,
        }
    }

    /// Executor backed by [`SandboxRunner`].
    pub fn with_sandbox(logger: Arc<dyn ScriptLogger>, limits: SandboxLimits) -> Self {
        Self::new(Arc::new(SandboxRunner::new(logger.clone(), limits)), logger)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Bound pre-request runs, which are otherwise unlimited.
    pub fn with_pre_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pre_request_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Turn a run result into an outcome. Failures are annotated on
    /// the context's console before they are returned.
    fn settle(
        &self,
        result: Result<(), SandboxError>,
        context: &SharedContext,
        started: Instant,
    ) -> ExecutionOutcome {
        let duration = elapsed_ms(started);
        match result {
            Ok(()) => ExecutionOutcome::succeeded(duration),
            Err(err) => {
                let failure = ExecutionFailure::from(&err);
                self.logger.error(&format!("Script execution failed: {err}"));
                context.push_console(
                    ConsoleEntry::new(
                        ConsoleLevel::Error,
                        format!("Script execution failed: {}", failure.message),
                        SOURCE_SCRIPT_EXECUTOR,
                    )
                    .with_error(err.to_string()),
                );
                ExecutionOutcome::failed(failure, duration)
            }
        }
    }

    /// Run a pre-request script once. There is no time limit unless
    /// one was set with [`Self::with_pre_request_timeout`].
    pub async fn execute_pre_request(&self, script: &str, context: &SharedContext) -> ExecutionOutcome {
        let started = Instant::now();
        let result = self
            .runner
            .run_script(script, context, ScriptKind::PreRequest, self.pre_request_timeout)
            .await;
        self.settle(result, context, started)
    }

    /// Run a post-response script under `timeout`, or the default
    /// budget. `duration` is measured whatever the outcome.
    pub async fn execute_post_response(
        &self,
        script: &str,
        context: &SharedContext,
        timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let limit = timeout.unwrap_or(self.default_timeout);
        let result = self
            .runner
            .run_script(script, context, ScriptKind::PostResponse, Some(limit))
            .await;
        self.settle(result, context, started)
    }

    async fn execute(&self, script: &str, context: &SharedContext, kind: ScriptKind) -> ExecutionOutcome {
        match kind {
            ScriptKind::PreRequest => self.execute_pre_request(script, context).await,
            ScriptKind::PostResponse => self.execute_post_response(script, context, None).await,
        }
    }

    /// Run `scripts` in order against one shared context.
    ///
    /// Disabled scripts are recorded as skipped successes. The first
    /// enabled script that fails ends the sequence; later scripts are
    /// not attempted and have no record.
    #[instrument(skip(self, scripts, context), fields(count = scripts.len(), kind = kind.as_str()))]
    pub async fn execute_script_sequence(
        &self,
        scripts: &[ScriptDefinition],
        context: &SharedContext,
        kind: ScriptKind,
    ) -> Vec<ScriptRunRecord> {
        let mut records = Vec::with_capacity(scripts.len());

        for script in scripts {
            if !script.enabled {
                debug!("Skipping disabled script '{}'", script.name);
                records.push(ScriptRunRecord {
                    id: script.id.clone(),
                    name: script.name.clone(),
                    skipped: true,
                    outcome: ExecutionOutcome::succeeded(0),
                });
                continue;
            }

            info!("Running script '{}'", script.name);
            let outcome = self.execute(&script.script, context, kind).await;
            let failed = !outcome.success;
            records.push(ScriptRunRecord {
                id: script.id.clone(),
                name: script.name.clone(),
                skipped: false,
                outcome,
            });

            if failed {
                warn!("Stopping sequence after failure in '{}'", script.name);
                break;
            }
        }

        records
    }

    /// Run every script against its own reset clone of `base`.
    /// Failures, timeouts included, do not stop later scripts.
    #[instrument(skip(self, scripts, base), fields(count = scripts.len()))]
    pub async fn execute_batch(
        &self,
        scripts: &[ScriptDefinition],
        base: &TestContext,
        timeout: Option<Duration>,
    ) -> Vec<BatchEntry> {
        let manager = TestContextManager::default();
        let mut entries = Vec::with_capacity(scripts.len());

        for script in scripts {
            let mut isolated = manager.clone_context(base);
            manager.reset_context(&mut isolated);

            if !script.enabled {
                entries.push(BatchEntry {
                    script_id: script.id.clone(),
                    script_name: script.name.clone(),
                    enabled: false,
                    duration: 0,
                    context: isolated,
                    error: None,
                });
                continue;
            }

            let shared = SharedContext::new(isolated);
            let outcome = self
                .execute_post_response(&script.script, &shared, timeout)
                .await;
            entries.push(BatchEntry {
                script_id: script.id.clone(),
                script_name: script.name.clone(),
                enabled: true,
                duration: outcome.duration,
                error: outcome.error_message().map(str::to_string),
                context: shared.into_context(),
            });
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{LogLevel, MemoryLogger};
    use parking_lot::Mutex;
    use serde_json::json;

    fn script(id: &str, body: &str) -> ScriptDefinition {
        ScriptDefinition {
            id: id.to_string(),
            name: format!("script {id}"),
            script: body.to_string(),
            enabled: true,
        }
    }

    fn disabled(id: &str, body: &str) -> ScriptDefinition {
        ScriptDefinition {
            enabled: false,
            ..script(id, body)
        }
    }

    fn executor() -> ScriptExecutor {
        ScriptExecutor::with_sandbox(MemoryLogger::new(), SandboxLimits::default())
    }

    /// Records every script it is asked to run; scripts containing
    /// `fail` fail.
    #[derive(Debug, Default)]
    struct RecordingRunner {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptRunner for RecordingRunner {
        async fn run_script(
            &self,
            script: &str,
            _context: &SharedContext,
            _kind: ScriptKind,
            _timeout: Option<Duration>,
        ) -> Result<(), SandboxError> {
            self.seen.lock().push(script.to_string());
            if script.contains("fail") {
                Err(SandboxError::Runtime(script.to_string()))
            } else {
                Ok(())
            }
        }
    }

    // ── single runs ─────────────────────────────────────

    #[tokio::test]
    async fn test_post_response_failure_is_annotated() {
        let ctx = SharedContext::default();
        let outcome = executor()
            .execute_post_response(r#"throw Error("boom");"#, &ctx, None)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_message(), Some("boom"));
        let errors: Vec<_> = ctx
            .snapshot()
            .console
            .into_iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("boom"));
        assert_eq!(errors[0].source, SOURCE_SCRIPT_EXECUTOR);
    }

    #[tokio::test]
    async fn test_post_response_timeout() {
        let ctx = SharedContext::default();
        let outcome = executor()
            .execute_post_response("sleep(200);", &ctx, Some(Duration::from_millis(20)))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(FailureKind::Timeout));
        assert!(outcome.duration >= 20);
    }

    #[tokio::test]
    async fn test_pre_request_runs_without_timeout() {
        let ctx = SharedContext::default();
        let logger = MemoryLogger::new();
        let exec = ScriptExecutor::with_sandbox(logger.clone(), SandboxLimits::default());
        let outcome = exec
            .execute_pre_request(r#"variables.set("token", "t-1");"#, &ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(ctx.snapshot().variables.get("token"), Some(&json!("t-1")));

        let outcome = exec.execute_pre_request("let = 1;", &ctx).await;
        assert_eq!(outcome.error.map(|e| e.kind), Some(FailureKind::Compile));
        assert!(logger.contains(LogLevel::Error, "compile"));
    }

    #[tokio::test]
    async fn test_pre_request_timeout_when_configured() {
        let ctx = SharedContext::default();
        let outcome = executor()
            .with_pre_request_timeout(Some(Duration::from_millis(20)))
            .execute_pre_request("sleep(200);", &ctx)
            .await;
        assert_eq!(outcome.error.map(|e| e.kind), Some(FailureKind::Timeout));
    }

    // ── sequences ───────────────────────────────────────

    #[tokio::test]
    async fn test_sequence_is_fail_fast() {
        let runner = Arc::new(RecordingRunner::default());
        let exec = ScriptExecutor::new(runner.clone(), MemoryLogger::new());
        let ctx = SharedContext::default();

        let records = exec
            .execute_script_sequence(
                &[script("a", "pass a"), script("b", "fail b"), script("c", "pass c")],
                &ctx,
                ScriptKind::PostResponse,
            )
            .await;

        assert_eq!(records.len(), 2);
        assert!(records[0].outcome.success);
        assert!(!records[1].outcome.success);
        assert_eq!(*runner.seen.lock(), vec!["pass a", "fail b"]);
    }

    #[tokio::test]
    async fn test_disabled_scripts_do_not_halt() {
        let runner = Arc::new(RecordingRunner::default());
        let exec = ScriptExecutor::new(runner.clone(), MemoryLogger::new());
        let ctx = SharedContext::default();

        let records = exec
            .execute_script_sequence(
                &[disabled("a", "fail a"), script("b", "pass b"), disabled("c", "fail c")],
                &ctx,
                ScriptKind::PreRequest,
            )
            .await;

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.outcome.success));
        assert!(records[0].skipped);
        assert_eq!(records[0].outcome.duration, 0);
        assert_eq!(*runner.seen.lock(), vec!["pass b"]);
    }

    #[tokio::test]
    async fn test_sequence_shares_context() {
        let ctx = SharedContext::default();
        let records = executor()
            .execute_script_sequence(
                &[
                    script("a", r#"variables.set("id", 42);"#),
                    script("b", r#"pm.expect(variables.get("id")).toBe(42);"#),
                ],
                &ctx,
                ScriptKind::PostResponse,
            )
            .await;

        assert!(records.iter().all(|r| r.outcome.success));
        assert!(ctx.snapshot().assertions[0].is_pass());
    }

    // ── batches ─────────────────────────────────────────

    #[tokio::test]
    async fn test_batch_runs_are_independent() {
        let mut base = TestContext::default();
        base.variables.insert("seed".to_string(), json!(1));
        base.console
            .push(ConsoleEntry::new(ConsoleLevel::Log, "stale", SOURCE_TEST_SCRIPT));

        let entries = executor()
            .execute_batch(
                &[
                    script("1", r#"variables.set("seed", 2); pm.expect(1).toBe(1);"#),
                    script("2", "sleep(200);"),
                    script("3", r#"pm.expect(variables.get("seed")).toBe(1);"#),
                    disabled("4", "throw 1;"),
                ],
                &base,
                Some(Duration::from_millis(50)),
            )
            .await;

        assert_eq!(entries.len(), 4);
        assert!(entries[0].error.is_none());
        assert!(entries[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out")));
        assert!(entries[2].error.is_none());
        assert!(entries[2].context.assertions[0].is_pass());
        assert!(!entries[3].enabled);
        assert!(entries[0]
            .context
            .console
            .iter()
            .all(|e| e.message != "stale"));
    }
}
