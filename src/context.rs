//! Construction, validation, merging and reset of [`TestContext`]
//! values, plus the shared handle scripts write through.

use crate::model::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Handle to the one context a run is bound to.
///
/// Cloning the handle shares the context; use
/// [`TestContextManager::clone_context`] for an isolated copy.
#[derive(Debug, Clone, Default)]
pub struct SharedContext(Arc<Mutex<TestContext>>);

impl SharedContext {
    pub fn new(context: TestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    /// Run `f` with exclusive access to the context. `f` must not
    /// call back into the same handle.
    pub fn with<R>(&self, f: impl FnOnce(&mut TestContext) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn snapshot(&self) -> TestContext {
        self.0.lock().clone()
    }

    pub fn push_assertion(&self, result: TestResult) {
        self.0.lock().assertions.push(result);
    }

    pub fn push_console(&self, entry: ConsoleEntry) {
        self.0.lock().console.push(entry);
    }

    /// Unwrap the context, cloning it if other handles are alive
    /// (e.g. a timed-out script still holds one).
    pub fn into_context(self) -> TestContext {
        match Arc::try_unwrap(self.0) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        }
    }
}

impl From<TestContext> for SharedContext {
    fn from(context: TestContext) -> Self {
        Self::new(context)
    }
}

/// External key/value store the context seeds `variables` from.
/// Read once, at context construction.
pub trait VariableSource: Send + Sync {
    fn variables(&self) -> Vec<(String, String)>;
}

impl VariableSource for HashMap<String, String> {
    fn variables(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }
}

impl VariableSource for BTreeMap<String, String> {
    fn variables(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl VariableSource for Vec<(String, String)> {
    fn variables(&self) -> Vec<(String, String)> {
        self.clone()
    }
}

/// Partial input for [`TestContextManager::create_pre_request_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextSeed {
    pub request: Option<RequestSnapshot>,
    pub environment: ValueMap,
}

/// Field-level overrides for a request snapshot.
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<Value>,
}

/// Field-level overrides for a response snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResponsePatch {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub data: Option<Value>,
}

/// Updates applied by [`TestContextManager::update_context`].
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub request: Option<RequestPatch>,
    pub response: Option<ResponsePatch>,
    pub environment: ValueMap,
    pub variables: ValueMap,
    pub globals: ValueMap,
}

pub struct TestContextManager {
    source: Arc<dyn VariableSource>,
}

impl std::fmt::Debug for TestContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContextManager").finish_non_exhaustive()
    }
}

impl Default for TestContextManager {
    fn default() -> Self {
        Self::new(Vec::<(String, String)>::new())
    }
}

impl TestContextManager {
    pub fn new(source: impl VariableSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    fn seeded_variables(&self) -> ValueMap {
        self.source
            .variables()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    }

    /// Context for a pre-request script: empty response, variables
    /// seeded from the source, everything else empty.
    pub fn create_pre_request_context(&self, seed: ContextSeed) -> TestContext {
        let variables = self.seeded_variables();
        debug!(
            "Creating pre-request context with {} seeded variable(s)",
            variables.len()
        );
        TestContext {
            request: seed.request.unwrap_or_default(),
            response: ResponseSnapshot::default(),
            variables,
            environment: seed.environment,
            ..TestContext::default()
        }
    }

    pub fn create_post_response_context(
        &self,
        request: RequestSnapshot,
        response: ResponseSnapshot,
        environment: ValueMap,
    ) -> TestContext {
        TestContext {
            request,
            response,
            variables: self.seeded_variables(),
            environment,
            ..TestContext::default()
        }
    }

    /// Shallow-merge request/response fields and environment keys;
    /// merge variables and globals key by key.
    pub fn update_context(&self, context: &mut TestContext, updates: ContextUpdate) {
        if let Some(patch) = updates.request {
            let request = &mut context.request;
            if let Some(url) = patch.url {
                request.url = url;
            }
            if let Some(method) = patch.method {
                request.method = method;
            }
            if let Some(headers) = patch.headers {
                request.headers = headers;
            }
            if let Some(body) = patch.body {
                request.body = Some(body);
            }
        }

        if let Some(patch) = updates.response {
            let response = &mut context.response;
            if let Some(status) = patch.status {
                response.status = Some(status);
            }
            if let Some(status_text) = patch.status_text {
                response.status_text = Some(status_text);
            }
            if let Some(headers) = patch.headers {
                response.headers = Some(headers);
            }
            if let Some(data) = patch.data {
                response.data = Some(data);
            }
        }

        context.environment.extend(updates.environment);
        context.variables.extend(updates.variables);
        context.globals.extend(updates.globals);
    }

    /// Clear `tests`, `assertions` and `console`. Variables and
    /// globals survive so a session can reuse the context.
    pub fn reset_context(&self, context: &mut TestContext) {
        context.tests.clear();
        context.assertions.clear();
        context.console.clear();
    }

    pub fn clone_context(&self, context: &TestContext) -> TestContext {
        context.clone()
    }

    /// Structural check of a typed context.
    pub fn validate_context(&self, context: &TestContext) -> ValidationReport {
        let mut errors = Vec::new();
        if context.request.url.is_empty() {
            errors.push("request.url is required".to_string());
        }
        if context.request.method.is_empty() {
            errors.push("request.method is required".to_string());
        }
        ValidationReport::from_errors(errors)
    }

    /// Structural check of an untyped context, e.g. one received as
    /// JSON from a collaborator.
    pub fn validate_context_value(&self, value: &Value) -> ValidationReport {
        let Some(obj) = value.as_object() else {
            return ValidationReport::from_errors(vec![
                "context must be an object".to_string(),
            ]);
        };

        let mut errors = Vec::new();
        match obj.get("request").and_then(Value::as_object) {
            Some(request) => {
                if !request.get("url").is_some_and(Value::is_string) {
                    errors.push("request.url is required".to_string());
                }
                if !request.get("method").is_some_and(Value::is_string) {
                    errors.push("request.method is required".to_string());
                }
            }
            None => errors.push("request is required".to_string()),
        }
        if !obj.get("response").is_some_and(Value::is_object) {
            errors.push("response is required".to_string());
        }
        for key in ["variables", "globals"] {
            if !obj.get(key).is_some_and(Value::is_object) {
                errors.push(format!("{key} must be an object"));
            }
        }
        for key in ["assertions", "console"] {
            if !obj.get(key).is_some_and(Value::is_array) {
                errors.push(format!("{key} must be an array"));
            }
        }

        ValidationReport::from_errors(errors)
    }

    pub fn extract_pre_request_results(&self, context: &TestContext) -> ScriptResults {
        ScriptResults {
            console: context.console.clone(),
            variables: context.variables.clone(),
            globals: context.globals.clone(),
            tests: context.tests.clone(),
            assertions: context.assertions.clone(),
        }
    }

    /// Results for a pre-request run that failed: the context's own
    /// results plus a failing `pre-request-script` test. The failure gets
    /// one error console entry; an entry already written by the executor
    /// counts.
    pub fn create_error_context(&self, error: &str, context: &TestContext) -> ScriptResults {
        let mut results = self.extract_pre_request_results(context);
        results.tests.push(NamedTest {
            name: SOURCE_PRE_REQUEST.to_string(),
            passed: false,
        });
        let annotated = results
            .console
            .iter()
            .any(|e| e.level == ConsoleLevel::Error && e.source == SOURCE_SCRIPT_EXECUTOR);
        if !annotated {
            results.console.push(
                ConsoleEntry::new(
                    ConsoleLevel::Error,
                    format!("Pre-request script error: {error}"),
                    SOURCE_PRE_REQUEST,
                )
                .with_error(error),
            );
        }
        results
    }
}
