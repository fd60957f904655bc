//! Data model shared by the context manager, sandbox, assertion
//! library and result processor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// String-keyed JSON bag. Insertion order is preserved.
pub type ValueMap = Map<String, Value>;

/// Console source tag for entries written by user scripts.
pub const SOURCE_TEST_SCRIPT: &str = "test-script";
/// Console source tag for entries written by the executor.
pub const SOURCE_SCRIPT_EXECUTOR: &str = "script-executor";
/// Console source tag and test name used for failed pre-request runs.
pub const SOURCE_PRE_REQUEST: &str = "pre-request-script";

/// Read-only snapshot of the outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: default_method(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// Read-only snapshot of the received response.
///
/// Pre-request contexts carry an empty response (every field
/// `None`), which serializes to `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseSnapshot {
    /// Returns `true` for the `{}` response of a pre-request run.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.status_text.is_none()
            && self.headers.is_none()
            && self.data.is_none()
    }
}

/// Outcome kind of a single [`TestResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Skip => "skip",
            TestStatus::Error => "error",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reportable result: an assertion, a named test, or a
/// script-level rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Elapsed milliseconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
}

impl TestResult {
    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            id: None,
            name: name.into(),
            status,
            message: None,
            duration: 0,
            error: None,
            actual: None,
            expected: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_values(
        mut self,
        actual: Option<Value>,
        expected: Option<Value>,
    ) -> Self {
        self.actual = actual;
        self.expected = expected;
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == TestStatus::Pass
    }
}

/// Severity of a [`ConsoleEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl ConsoleLevel {
    pub const ALL: [ConsoleLevel; 5] = [
        ConsoleLevel::Log,
        ConsoleLevel::Info,
        ConsoleLevel::Warn,
        ConsoleLevel::Error,
        ConsoleLevel::Debug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
            ConsoleLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of console output. Entries are append-only and
/// chronological in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsoleEntry {
    pub fn new(
        level: ConsoleLevel,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Explicit `pm.tests.test(name, fn)` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedTest {
    pub name: String,
    pub passed: bool,
}

/// Execution state for one script run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestContext {
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    #[serde(default)]
    pub variables: ValueMap,
    #[serde(default)]
    pub globals: ValueMap,
    #[serde(default)]
    pub tests: Vec<NamedTest>,
    #[serde(default)]
    pub assertions: Vec<TestResult>,
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
    #[serde(default)]
    pub environment: ValueMap,
}

impl TestContext {
    /// Record a named test outcome. A repeated name overwrites the
    /// earlier outcome in place.
    pub fn set_test(&mut self, name: &str, passed: bool) {
        match self.tests.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.passed = passed,
            None => self.tests.push(NamedTest {
                name: name.to_string(),
                passed,
            }),
        }
    }

    pub fn test_outcome(&self, name: &str) -> Option<bool> {
        self.tests
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.passed)
    }

    pub fn failed_assertions(&self) -> usize {
        self.assertions
            .iter()
            .filter(|a| a.status == TestStatus::Fail)
            .count()
    }
}

/// Which phase a script runs in. Exposed to scripts as
/// `pm.info.scriptType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptKind {
    PreRequest,
    #[default]
    PostResponse,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptKind::PreRequest => "pre-request",
            ScriptKind::PostResponse => "post-response",
        }
    }
}

/// A stored script record, as held by a suite or a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub id: String,
    pub name: String,
    pub script: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Classification of a script failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Compile,
    Runtime,
    Timeout,
    Internal,
}

/// Why a script run did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of a single executor call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    /// Wall-clock milliseconds, measured regardless of outcome.
    pub duration: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(duration: u64) -> Self {
        Self {
            success: true,
            error: None,
            duration,
        }
    }

    pub fn failed(failure: ExecutionFailure, duration: u64) -> Self {
        Self {
            success: false,
            error: Some(failure),
            duration,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// One entry of an `execute_script_sequence` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRunRecord {
    pub id: String,
    pub name: String,
    pub skipped: bool,
    pub outcome: ExecutionOutcome,
}

/// Structural validation report. Never produced by a panic or an
/// `Err`; callers decide the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Result of compiling (not running) a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Script-visible state projected out of a finished context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptResults {
    pub console: Vec<ConsoleEntry>,
    pub variables: ValueMap,
    pub globals: ValueMap,
    pub tests: Vec<NamedTest>,
    pub assertions: Vec<TestResult>,
}

/// Aggregate statistics over a list of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_duration: u64,
    /// Percentage of passing results, skipped results excluded.
    pub success_rate: u32,
}

/// Input of `TestResultProcessor::process_batch_results`.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub script_id: String,
    pub script_name: String,
    pub enabled: bool,
    pub duration: u64,
    pub context: TestContext,
    /// Set when the script itself failed to run to completion.
    pub error: Option<String>,
}

/// How a suite's post-response scripts are orchestrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// Shared context, stop at the first failing script.
    #[default]
    FailFast,
    /// Each script runs on its own clone; failures do not stop
    /// later scripts.
    Independent,
}

/// A suite file: a recorded exchange plus the scripts to run
/// against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSuite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub request: RequestSnapshot,
    #[serde(default)]
    pub response: ResponseSnapshot,
    #[serde(default)]
    pub environment: ValueMap,
    /// Seed for the external variable store.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub globals: ValueMap,
    #[serde(default)]
    pub pre_request: Vec<ScriptDefinition>,
    #[serde(default)]
    pub post_response: Vec<ScriptDefinition>,
    #[serde(default)]
    pub policy: ExecutionPolicy,
    /// Per-script timeout override for post-response scripts.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ScriptSuite {
    /// Deserialize a suite from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize the suite to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &ScriptDefinition> {
        self.pre_request.iter().chain(self.post_response.iter())
    }
}

/// Report of one suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub name: String,
    pub results: Vec<TestResult>,
    pub summary: TestSummary,
    pub console: Vec<ConsoleEntry>,
    pub variables: ValueMap,
    pub globals: ValueMap,
    pub duration_ms: u64,
}

impl SuiteReport {
    pub fn success(&self) -> bool {
        self.summary.failed == 0 && self.summary.errors == 0
    }
}

/// Report payload covering every suite of one CLI invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
    pub summary: TestSummary,
    pub total_duration_ms: u64,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_response_serializes_to_empty_object() {
        let response = ResponseSnapshot::default();
        assert!(response.is_empty());
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({}));
    }

    #[test]
    fn test_response_uses_camel_case() {
        let response = ResponseSnapshot {
            status: Some(404),
            status_text: Some("Not Found".to_string()),
            headers: None,
            data: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusText"], json!("Not Found"));
    }

    #[test]
    fn test_request_defaults() {
        let request: RequestSnapshot = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "");
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }

    #[test]
    fn test_set_test_overwrites_in_place() {
        let mut ctx = TestContext::default();
        ctx.set_test("a", true);
        ctx.set_test("b", true);
        ctx.set_test("a", false);

        assert_eq!(ctx.tests.len(), 2);
        assert_eq!(ctx.tests[0].name, "a");
        assert_eq!(ctx.test_outcome("a"), Some(false));
        assert_eq!(ctx.test_outcome("missing"), None);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(TestStatus::Error).unwrap(),
            json!("error")
        );
        assert_eq!(TestStatus::Skip.to_string(), "skip");
    }

    #[test]
    fn test_suite_from_yaml() {
        let yaml = r#"
name: users
request:
  url: http://localhost/users
response:
  status: 200
  data:
    items: [1, 2]
post_response:
  - id: s1
    name: status
    script: pm.status.expectOk();
  - id: s2
    name: disabled
    script: throw "never";
    enabled: false
policy: independent
"#;
        let suite = ScriptSuite::from_yaml(yaml).unwrap();
        assert_eq!(suite.name, "users");
        assert_eq!(suite.request.method, "GET");
        assert_eq!(suite.response.status, Some(200));
        assert_eq!(suite.post_response.len(), 2);
        assert!(suite.post_response[0].enabled);
        assert!(!suite.post_response[1].enabled);
        assert_eq!(suite.policy, ExecutionPolicy::Independent);
        assert_eq!(suite.scripts().count(), 2);
    }
}
