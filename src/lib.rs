//! Vigil - sandboxed execution of API test scripts.
//!
//! Pre-request and post-response scripts run in an embedded script
//! engine against a snapshot of the request and the recorded
//! response. Scripts read and write variables, log to a captured
//! console and record assertions through the `pm` object; the result
//! processor reduces what they recorded into reportable results.

pub mod assertion;
pub mod bindings;
pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod executor;
pub mod logger;
pub mod model;
pub mod processor;
pub mod runner;
pub mod sandbox;
pub mod validator;

pub use assertion::Expectation;
pub use config::*;
pub use context::{ContextSeed, ContextUpdate, SharedContext, TestContextManager, VariableSource};
pub use error::SandboxError;
pub use executor::{ScriptExecutor, ScriptRunner, SandboxRunner, DEFAULT_TIMEOUT};
pub use logger::{LogLevel, MemoryLogger, ScriptLogger, TracingLogger};
pub use model::*;
pub use processor::TestResultProcessor;
pub use runner::*;
pub use sandbox::{validate_script, CancelFlag, Sandbox, SandboxLimits};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"
name: users
request:
  url: https://api.test/users/1
response:
  status: 200
  headers:
    content-type: application/json
  data:
    id: 1
    tags: [a, b]
variables:
  base: v1
post_response:
  - id: s1
    name: body checks
    script: |
      pm.expect(responseJSON.tags).toHaveLength(2);
      pm.expect(responseCode).toBe(200);
  - id: s2
    name: disabled
    enabled: false
    script: throw "never";
policy: independent
"#;

    #[test]
    fn test_suite_yaml_roundtrip() {
        let suite = ScriptSuite::from_yaml(SUITE).unwrap();
        assert_eq!(suite.policy, ExecutionPolicy::Independent);
        assert_eq!(suite.scripts().count(), 2);
        assert!(!suite.post_response[1].enabled);

        let yaml = suite.to_yaml().unwrap();
        let again = ScriptSuite::from_yaml(&yaml).unwrap();
        assert_eq!(again.name, suite.name);
        assert_eq!(again.response, suite.response);
        assert_eq!(again.post_response, suite.post_response);
    }

    #[tokio::test]
    async fn test_default_runner_executes_suite() {
        let suite = ScriptSuite::from_yaml(SUITE).unwrap();
        let report = DefaultSuiteRunner::default().run(&suite).await.unwrap();

        assert!(report.success(), "{:?}", report.results);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.failed, 0);
    }
}
