//! Suite execution: pre-request scripts, then post-response scripts
//! against the recorded response, reduced into a [`SuiteReport`].

use crate::config::EngineConfig;
use crate::context::{ContextSeed, SharedContext, TestContextManager};
use crate::executor::ScriptExecutor;
use crate::logger::{default_logger, ScriptLogger};
use crate::model::*;
use crate::processor::TestResultProcessor;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

const PRE_REQUEST_PHASE: &str = "pre-request";
const POST_RESPONSE_PHASE: &str = "post-response";

/// Suite runner trait
#[async_trait]
pub trait SuiteRunner: Send + Sync {
    /// Execute a script suite
    async fn run(&self, suite: &ScriptSuite) -> Result<SuiteReport>;
}

/// Default suite runner, backed by the sandboxed [`ScriptExecutor`].
#[derive(Debug, Clone)]
pub struct DefaultSuiteRunner {
    executor: ScriptExecutor,
    processor: TestResultProcessor,
    config: EngineConfig,
}

impl DefaultSuiteRunner {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_logger(config, default_logger())
    }

    pub fn with_logger(config: EngineConfig, logger: Arc<dyn ScriptLogger>) -> Self {
        let executor = ScriptExecutor::with_sandbox(logger, config.limits())
            .with_default_timeout(config.post_response_timeout())
            .with_pre_request_timeout(config.pre_request_timeout());
        Self::with_executor(executor, config)
    }

    /// Use a caller-supplied executor, e.g. one with a fake runner.
    pub fn with_executor(executor: ScriptExecutor, config: EngineConfig) -> Self {
        Self {
            executor,
            processor: TestResultProcessor::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn executor_for(&self, suite: &ScriptSuite) -> ScriptExecutor {
        match suite.timeout_ms {
            Some(ms) => self
                .executor
                .clone()
                .with_default_timeout(Duration::from_millis(ms)),
            None => self.executor.clone(),
        }
    }

    /// Results for a fail-fast sequence over one shared context.
    ///
    /// Skipped and failed scripts get one result each. Named tests
    /// and assertions recorded by the phase are reported once, under
    /// the phase, when at least one script completed.
    fn sequence_results(
        &self,
        phase: &str,
        scripts: &[ScriptDefinition],
        records: &[ScriptRunRecord],
        context: &TestContext,
    ) -> Vec<TestResult> {
        let mut results = Vec::new();
        let mut completed = 0;
        let mut duration = 0;

        for record in records {
            if record.skipped {
                results.push(self.processor.create_skip_result(&record.id, &record.name));
            } else if let Some(error) = record.outcome.error_message() {
                results.push(self.processor.create_error_result(
                    &record.id,
                    &record.name,
                    error,
                    record.outcome.duration,
                ));
            } else {
                completed += 1;
                duration += record.outcome.duration;
            }
        }

        // Scripts after a failure never ran.
        for script in scripts.iter().skip(records.len()) {
            results.push(
                self.processor
                    .create_skip_result(&script.id, &script.name)
                    .with_message("Not run after an earlier script failed"),
            );
        }

        if completed > 0 {
            results.extend(
                self.processor
                    .process_results(context, phase, phase, duration),
            );
        } else {
            results.extend(context.assertions.iter().cloned());
        }
        results
    }
}

impl Default for DefaultSuiteRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn first_error(records: &[ScriptRunRecord]) -> Option<&str> {
    records.iter().find_map(|r| r.outcome.error_message())
}

#[async_trait]
impl SuiteRunner for DefaultSuiteRunner {
    #[instrument(skip(self, suite), fields(name = %suite.name))]
    async fn run(&self, suite: &ScriptSuite) -> Result<SuiteReport> {
        let start_time = Instant::now();
        let manager = TestContextManager::new(suite.variables.clone());
        let executor = self.executor_for(suite);

        info!("Starting script suite: {}", suite.name);

        let mut pre = manager.create_pre_request_context(ContextSeed {
            request: Some(suite.request.clone()),
            environment: suite.environment.clone(),
        });
        pre.globals = suite.globals.clone();

        let validation = manager.validate_context(&pre);
        if !validation.valid {
            bail!(
                "Suite '{}' has an invalid request: {}",
                suite.name,
                validation.errors.join(", ")
            );
        }

        let mut results = Vec::new();
        let mut console = Vec::new();

        // ── pre-request ─────────────────────────────────
        let shared = SharedContext::new(pre);
        let pre_records = executor
            .execute_script_sequence(&suite.pre_request, &shared, ScriptKind::PreRequest)
            .await;
        let pre = shared.into_context();

        if let Some(error) = first_error(&pre_records) {
            warn!("Pre-request phase failed: {}", error);
            let failed = manager.create_error_context(error, &pre);

            // Completed scripts keep their results; the failing one is
            // reported under its own id.
            results.extend(self.sequence_results(
                PRE_REQUEST_PHASE,
                &suite.pre_request,
                &pre_records,
                &pre,
            ));
            results.extend(
                failed
                    .tests
                    .iter()
                    .filter(|test| test.name == SOURCE_PRE_REQUEST && !test.passed)
                    .map(|test| {
                        TestResult::new(test.name.clone(), TestStatus::Fail)
                            .with_id(format!("{PRE_REQUEST_PHASE}:{SOURCE_PRE_REQUEST}"))
                            .with_message(format!("Pre-request script error: {error}"))
                            .with_error(error)
                    }),
            );
            results.extend(suite.post_response.iter().map(|script| {
                self.processor
                    .create_skip_result(&script.id, &script.name)
                    .with_message("Not run after a pre-request failure")
            }));

            return Ok(self.finish(
                suite,
                results,
                failed.console,
                failed.variables,
                failed.globals,
                start_time,
            ));
        }

        if !suite.pre_request.is_empty() {
            results.extend(self.sequence_results(
                PRE_REQUEST_PHASE,
                &suite.pre_request,
                &pre_records,
                &pre,
            ));
        }
        let carried = manager.extract_pre_request_results(&pre);
        console.extend(carried.console);

        // ── post-response ───────────────────────────────
        let mut post = manager.create_post_response_context(
            pre.request,
            suite.response.clone(),
            pre.environment,
        );
        post.variables = carried.variables;
        post.globals = carried.globals;

        let (variables, globals) = match suite.policy {
            ExecutionPolicy::FailFast => {
                let shared = SharedContext::new(post);
                let records = executor
                    .execute_script_sequence(
                        &suite.post_response,
                        &shared,
                        ScriptKind::PostResponse,
                    )
                    .await;
                let post = shared.into_context();
                if !suite.post_response.is_empty() {
                    results.extend(self.sequence_results(
                        POST_RESPONSE_PHASE,
                        &suite.post_response,
                        &records,
                        &post,
                    ));
                }
                console.extend(post.console);
                (post.variables, post.globals)
            }
            ExecutionPolicy::Independent => {
                let entries = executor
                    .execute_batch(&suite.post_response, &post, None)
                    .await;
                results.extend(self.processor.process_batch_results(&entries));
                console.extend(entries.into_iter().flat_map(|e| e.context.console));
                // Independent runs never write back to the suite state.
                (post.variables, post.globals)
            }
        };

        Ok(self.finish(suite, results, console, variables, globals, start_time))
    }
}

impl DefaultSuiteRunner {
    fn finish(
        &self,
        suite: &ScriptSuite,
        results: Vec<TestResult>,
        console: Vec<ConsoleEntry>,
        variables: ValueMap,
        globals: ValueMap,
        start_time: Instant,
    ) -> SuiteReport {
        let report = SuiteReport {
            name: suite.name.clone(),
            summary: self.processor.generate_summary(&results),
            results,
            console,
            variables,
            globals,
            duration_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Script suite finished: {} ({} ms) - Success: {}",
            suite.name,
            report.duration_ms,
            report.success()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;
    use serde_json::json;
    use std::collections::HashMap;

    fn script(id: &str, body: &str) -> ScriptDefinition {
        ScriptDefinition {
            id: id.to_string(),
            name: format!("script {id}"),
            script: body.to_string(),
            enabled: true,
        }
    }

    fn suite(pre: Vec<ScriptDefinition>, post: Vec<ScriptDefinition>) -> ScriptSuite {
        ScriptSuite {
            name: "users".to_string(),
            description: None,
            request: RequestSnapshot {
                url: "https://api.test/users/1".to_string(),
                ..RequestSnapshot::default()
            },
            response: ResponseSnapshot {
                status: Some(200),
                status_text: Some("OK".to_string()),
                headers: Some(HashMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )])),
                data: Some(json!({"id": 1, "name": "Ada"})),
            },
            environment: ValueMap::new(),
            variables: HashMap::from([("base".to_string(), "v1".to_string())]),
            globals: ValueMap::new(),
            pre_request: pre,
            post_response: post,
            policy: ExecutionPolicy::FailFast,
            timeout_ms: None,
        }
    }

    fn runner() -> DefaultSuiteRunner {
        DefaultSuiteRunner::with_logger(EngineConfig::default(), MemoryLogger::new())
    }

    #[tokio::test]
    async fn test_variables_flow_from_pre_request_to_post_response() {
        let suite = suite(
            vec![script("p1", r#"variables.set("token", "t-" + variables.get("base"));"#)],
            vec![script(
                "s1",
                r#"
                pm.test("token carried", || {
                    pm.expect(variables.get("token")).toBe("t-v1");
                });
                pm.status.expectOk();
                pm.json.expectKeyWithValue("name", "Ada");
                "#,
            )],
        );

        let report = runner().run(&suite).await.unwrap();
        assert!(report.success(), "{:?}", report.results);
        assert_eq!(report.variables.get("token"), Some(&json!("t-v1")));
        assert!(report.results.iter().any(|r| r.name == "token carried" && r.is_pass()));
    }

    #[tokio::test]
    async fn test_pre_request_failure_skips_post_response() {
        let suite = suite(
            vec![script("p1", r#"throw Error("no credentials");"#)],
            vec![script("s1", "pm.status.expectOk();")],
        );

        let report = runner().run(&suite).await.unwrap();
        assert!(!report.success());

        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![TestStatus::Error, TestStatus::Fail, TestStatus::Skip]);
        assert_eq!(report.results[0].id.as_deref(), Some("p1"));
        assert_eq!(report.results[0].error.as_deref(), Some("no credentials"));
        assert_eq!(report.results[1].name, SOURCE_PRE_REQUEST);
        assert_eq!(report.results[1].error.as_deref(), Some("no credentials"));
        assert_eq!(report.results[2].id.as_deref(), Some("s1"));

        let errors: Vec<_> = report
            .console
            .iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("no credentials"));
    }

    #[tokio::test]
    async fn test_pre_request_failure_keeps_earlier_results() {
        let suite = suite(
            vec![
                script("a", r#"pm.test("a ok", || pm.expect(1).toBe(1));"#),
                script("b", r#"throw "nope";"#),
                script("c", r#"variables.set("c", true);"#),
            ],
            vec![script("s1", "pm.status.expectOk();")],
        );

        let report = runner().run(&suite).await.unwrap();
        assert!(!report.success());

        let by_id = |id: &str| report.results.iter().find(|r| r.id.as_deref() == Some(id));
        let failed = by_id("b").expect("result for the failing script");
        assert_eq!(failed.status, TestStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("nope"));
        assert_eq!(by_id("c").map(|r| r.status), Some(TestStatus::Skip));
        assert_eq!(by_id("s1").map(|r| r.status), Some(TestStatus::Skip));

        assert!(report.results.iter().any(|r| r.name == "a ok" && r.is_pass()));
        assert!(report
            .results
            .iter()
            .any(|r| r.name == SOURCE_PRE_REQUEST && r.status == TestStatus::Fail));
        assert!(report.variables.get("c").is_none());

        let errors = report
            .console
            .iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_fail_fast_reports_unrun_scripts() {
        let suite = suite(
            vec![],
            vec![
                script("s1", "pm.expect(1).toBe(1);"),
                script("s2", "throw \"broken\";"),
                script("s3", "pm.expect(2).toBe(2);"),
            ],
        );

        let report = runner().run(&suite).await.unwrap();
        let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![TestStatus::Error, TestStatus::Skip, TestStatus::Pass, TestStatus::Pass]
        );
        assert_eq!(report.summary.errors, 1);
    }

    #[tokio::test]
    async fn test_independent_policy_isolates_scripts() {
        let mut suite = suite(
            vec![],
            vec![
                script("s1", r#"variables.set("base", "changed"); throw "broken";"#),
                script("s2", r#"pm.expect(variables.get("base")).toBe("v1");"#),
            ],
        );
        suite.policy = ExecutionPolicy::Independent;

        let report = runner().run(&suite).await.unwrap();
        assert_eq!(report.summary.errors, 1);
        assert!(report.results.iter().any(|r| r.name == "to be" && r.is_pass()));
        assert_eq!(report.variables.get("base"), Some(&json!("v1")));
    }

    #[tokio::test]
    async fn test_suite_timeout_override() {
        let mut suite = suite(vec![], vec![script("s1", "sleep(500);")]);
        suite.timeout_ms = Some(30);

        let report = runner().run(&suite).await.unwrap();
        assert_eq!(report.results[0].status, TestStatus::Error);
        assert!(report.results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("timed out after 30 ms")));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let mut suite = suite(vec![], vec![]);
        suite.request.url.clear();
        let err = runner().run(&suite).await.unwrap_err();
        assert!(err.to_string().contains("request.url is required"));
    }
}
