use std::{fs, path::PathBuf, time::Duration};

use serde_json::json;
use vigil::assertion::{matches_schema, StatusAssertions};
use vigil::{
    validate_script, DefaultSuiteRunner, ExecutionPolicy, MemoryLogger, ResponseSnapshot,
    Sandbox, SandboxLimits, ScriptDefinition, ScriptExecutor, ScriptKind, ScriptSuite,
    SharedContext, SuiteLoader, SuiteRunner, TestContext, TestContextManager, TestResult,
    TestResultProcessor, TestStatus,
};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_suite(name: &str) -> ScriptSuite {
    let path = fixture_path(name);
    let content = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {path:?}: {e}"));
    ScriptSuite::from_yaml(&content)
        .unwrap_or_else(|e| panic!("failed to parse suite yaml: {e}"))
}

fn script(id: &str, body: &str) -> ScriptDefinition {
    ScriptDefinition {
        id: id.to_string(),
        name: id.to_string(),
        script: body.to_string(),
        enabled: true,
    }
}

fn response_context(status: u16) -> SharedContext {
    SharedContext::new(TestContext {
        response: ResponseSnapshot {
            status: Some(status),
            ..ResponseSnapshot::default()
        },
        ..TestContext::default()
    })
}

fn sandbox(ctx: &SharedContext) -> Sandbox {
    Sandbox::new(ctx, MemoryLogger::new(), SandboxLimits::default())
}

// ── end-to-end ──────────────────────────────────────────

#[test]
fn named_test_records_outcome_and_assertion() {
    let ctx = response_context(200);
    sandbox(&ctx)
        .run_in_sandbox(
            r#"pm.tests.test("status ok", || pm.expect(pm.response.status).toBe(200));"#,
        )
        .expect("script should run");

    let state = ctx.snapshot();
    assert_eq!(state.test_outcome("status ok"), Some(true));
    assert_eq!(state.assertions.len(), 1);
    assert_eq!(state.assertions[0].name, "to be");
    assert_eq!(state.assertions[0].status, TestStatus::Pass);
}

#[tokio::test]
async fn uncaught_error_fails_post_response_run() {
    let ctx = response_context(200);
    let outcome = ScriptExecutor::default()
        .execute_post_response(r#"throw Error("boom");"#, &ctx, None)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error_message(), Some("boom"));
    let errors: Vec<_> = ctx
        .snapshot()
        .console
        .into_iter()
        .filter(|e| e.level == vigil::ConsoleLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("boom"));
}

#[tokio::test]
async fn independent_batch_continues_after_timeout() {
    let suite = load_suite("batch_timeout.yaml");
    assert_eq!(suite.policy, ExecutionPolicy::Independent);

    let report = DefaultSuiteRunner::default()
        .run(&suite)
        .await
        .expect("runner returned error");

    let slow = report
        .results
        .iter()
        .find(|r| r.id.as_deref() == Some("b2"))
        .expect("slow script result");
    assert_eq!(slow.status, TestStatus::Error);
    assert!(slow.error.as_deref().is_some_and(|e| e.contains("timed out")));

    let third = report
        .results
        .iter()
        .find(|r| r.id.as_deref() == Some("b3"))
        .expect("third script result");
    assert_eq!(third.status, TestStatus::Pass);
    assert_eq!(report.summary.errors, 1);
}

#[tokio::test]
async fn users_suite_passes() {
    let suite = load_suite("users.yaml");
    let report = DefaultSuiteRunner::default()
        .run(&suite)
        .await
        .expect("runner returned error");

    assert!(report.success(), "suite should pass: {:?}", report.results);
    assert_eq!(report.variables.get("token"), Some(&json!("bearer-acme")));
    assert_eq!(report.globals.get("runs"), Some(&json!(1)));
    assert_eq!(report.summary.skipped, 1);
    assert!(report
        .console
        .iter()
        .any(|e| e.message == "token ready"));
}

#[tokio::test]
async fn fail_fast_suite_stops_at_thrown_error() {
    let suite = load_suite("fail_fast.yaml");
    let report = DefaultSuiteRunner::default()
        .run(&suite)
        .await
        .expect("runner returned error");

    assert!(!report.success());
    assert_eq!(report.summary.errors, 1);
    assert!(report.summary.failed >= 1);
    assert!(report.variables.get("reached").is_none());
    let unrun = report
        .results
        .iter()
        .find(|r| r.id.as_deref() == Some("f3"))
        .expect("unrun script result");
    assert_eq!(unrun.status, TestStatus::Skip);
}

#[test]
fn fixture_scripts_compile() {
    let mut loader = SuiteLoader::new();
    loader.add_path(fixture_path(""));
    let suites = loader.load_all_suites().expect("fixtures load");
    assert_eq!(suites.len(), 3);

    for suite in &suites {
        for s in suite.scripts() {
            let validation = validate_script(&s.script);
            assert!(validation.valid, "{} / {}: {:?}", suite.name, s.name, validation.error);
        }
    }
}

// ── properties ──────────────────────────────────────────

#[test]
fn recorded_entries_survive_a_later_throw() {
    let ctx = response_context(200);
    let err = sandbox(&ctx)
        .run_in_sandbox(
            r#"
            console.log("one");
            pm.expect(1).toBe(1);
            console.warn("two");
            pm.expect(2).toBe(3);
            throw "stop";
            "#,
        )
        .unwrap_err();

    assert_eq!(err.message(), "stop");
    let state = ctx.snapshot();
    assert_eq!(state.assertions.len(), 2);
    let messages: Vec<_> = state.console.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["one", "two"]);
}

#[tokio::test]
async fn disabled_scripts_neither_fail_nor_halt() {
    let ctx = SharedContext::default();
    let records = ScriptExecutor::default()
        .execute_script_sequence(
            &[
                ScriptDefinition {
                    enabled: false,
                    ..script("a", "throw 1;")
                },
                script("b", r#"variables.set("b", true);"#),
            ],
            &ctx,
            ScriptKind::PreRequest,
        )
        .await;

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.outcome.success));
    assert_eq!(ctx.snapshot().variables.get("b"), Some(&json!(true)));
}

#[tokio::test]
async fn sequence_never_invokes_script_after_failure() {
    let ctx = SharedContext::default();
    let records = ScriptExecutor::default()
        .execute_script_sequence(
            &[
                script("a", "pm.expect(1).toBe(1);"),
                script("b", r#"throw "b failed";"#),
                script("c", r#"variables.set("c", true);"#),
            ],
            &ctx,
            ScriptKind::PostResponse,
        )
        .await;

    assert_eq!(records.len(), 2);
    assert!(records[0].outcome.success);
    assert!(!records[1].outcome.success);
    assert!(ctx.snapshot().variables.get("c").is_none());
}

#[test]
fn length_assertion_on_string_and_array() {
    let ctx = response_context(200);
    sandbox(&ctx)
        .run_in_sandbox(
            r#"
            pm.expect("abcde").toHaveLength(5);
            pm.expect([1, 2, 3]).toHaveLength(5);
            "#,
        )
        .expect("script should run");

    let assertions = ctx.snapshot().assertions;
    assert_eq!(assertions[0].status, TestStatus::Pass);
    assert_eq!(assertions[1].status, TestStatus::Fail);
    assert_eq!(assertions[1].actual, Some(json!(3)));
}

#[test]
fn server_error_range_bounds() {
    for (status, expected) in [
        (500, TestStatus::Pass),
        (599, TestStatus::Pass),
        (499, TestStatus::Fail),
        (600, TestStatus::Fail),
    ] {
        let ctx = SharedContext::default();
        StatusAssertions::new(&ctx, Some(status)).expect_server_error();
        assert_eq!(ctx.snapshot().assertions[0].status, expected, "status {status}");
    }
}

#[test]
fn schema_checks_are_permissive() {
    assert!(matches_schema(&json!({}), &json!({"type": "object"})));
    assert!(!matches_schema(
        &json!({}),
        &json!({"type": "object", "required": ["x"]})
    ));
    assert!(matches_schema(&json!([1, "two"]), &json!({})));
    assert!(matches_schema(&json!(null), &json!({})));
}

#[test]
fn summary_excludes_skips_from_success_rate() {
    let processor = TestResultProcessor::new();
    let results = vec![
        TestResult::new("a", TestStatus::Pass),
        TestResult::new("b", TestStatus::Pass),
        TestResult::new("c", TestStatus::Fail),
        TestResult::new("d", TestStatus::Skip),
    ];
    assert_eq!(processor.generate_summary(&results).success_rate, 67);
}

#[test]
fn cloned_context_is_isolated() {
    let manager = TestContextManager::default();
    let mut original = TestContext::default();
    original.variables.insert("k".to_string(), json!("v"));

    let mut copy = manager.clone_context(&original);
    copy.variables.insert("k".to_string(), json!("changed"));
    copy.variables.insert("extra".to_string(), json!(1));

    assert_eq!(original.variables.get("k"), Some(&json!("v")));
    assert!(original.variables.get("extra").is_none());
}

#[test]
fn reset_is_idempotent() {
    let manager = TestContextManager::default();
    let ctx = response_context(200);
    sandbox(&ctx)
        .run_in_sandbox(
            r#"
            variables.set("keep", 1);
            globals.set("also", 2);
            pm.test("t", || pm.expect(true).toBeTruthy());
            console.log("noise");
            "#,
        )
        .expect("script should run");

    let mut once = ctx.snapshot();
    manager.reset_context(&mut once);
    let mut twice = once.clone();
    manager.reset_context(&mut twice);

    assert_eq!(once, twice);
    assert!(twice.tests.is_empty() && twice.assertions.is_empty() && twice.console.is_empty());
    assert_eq!(twice.variables.get("keep"), Some(&json!(1)));
    assert_eq!(twice.globals.get("also"), Some(&json!(2)));
}

#[tokio::test]
async fn secure_sandbox_reports_timeout() {
    let ctx = SharedContext::default();
    let err = sandbox(&ctx)
        .run_in_secure_sandbox("sleep(1000);", Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
