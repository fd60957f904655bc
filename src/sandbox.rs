//! Isolated script execution against one [`TestContext`].
//!
//! A fresh engine is built for every run. Scripts see exactly the
//! bindings listed by [`Sandbox::binding_names`] plus the registered
//! API functions; there is no module loading, no `eval`, and every
//! run is bounded by [`SandboxLimits`].
//!
//! [`TestContext`]: crate::model::TestContext

use crate::bindings::{body_text, error_message, register_api, root_cause, terminated, to_json, PmApi, Store, StoreApi};
use crate::context::SharedContext;
use crate::convert::json_to_dynamic;
use crate::error::SandboxError;
use crate::logger::ScriptLogger;
use crate::model::{ConsoleEntry, ConsoleLevel, ScriptKind, ScriptValidation, SOURCE_TEST_SCRIPT};
use crate::validator::DEFAULT_MAX_PATTERN_LENGTH;
use regex::Regex;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{Package, StandardPackage};
use rhai::{Dynamic, Engine, EvalAltResult, Scope, INT};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Names every sandbox binds, in binding order.
pub const BINDING_NAMES: [&str; 17] = [
    "pm",
    "request",
    "response",
    "environment",
    "variables",
    "globals",
    "tests",
    "console",
    "responseJSON",
    "responseBody",
    "responseHeaders",
    "responseCode",
    "requestJSON",
    "requestBody",
    "requestHeaders",
    "requestMethod",
    "requestUrl",
];

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("failed to compile identifier regex")
});

/// Names that may never be bound, even when they are well-formed
/// identifiers.
const DENIED_NAMES: [&str; 24] = [
    "__proto__",
    "constructor",
    "prototype",
    "this",
    "eval",
    "global",
    "let",
    "const",
    "fn",
    "if",
    "else",
    "while",
    "loop",
    "for",
    "in",
    "return",
    "throw",
    "try",
    "catch",
    "import",
    "export",
    "true",
    "false",
    "Fn",
];

/// Check a binding name against the identifier allowlist.
pub fn validate_binding_name(name: &str) -> Result<(), SandboxError> {
    if !IDENTIFIER_RE.is_match(name) || DENIED_NAMES.contains(&name) {
        return Err(SandboxError::InvalidBinding(name.to_string()));
    }
    Ok(())
}

/// Resource bounds applied to every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_pattern_length: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 1 << 20,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }
}

/// Cooperative cancellation signal, polled between operations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A script environment bound to exactly one context.
#[derive(Debug, Clone)]
pub struct Sandbox {
    context: SharedContext,
    logger: Arc<dyn ScriptLogger>,
    limits: SandboxLimits,
    kind: ScriptKind,
    extra: Vec<(String, Value)>,
}

impl Sandbox {
    pub fn new(context: &SharedContext, logger: Arc<dyn ScriptLogger>, limits: SandboxLimits) -> Self {
        Self {
            context: context.clone(),
            logger,
            limits,
            kind: ScriptKind::default(),
            extra: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: ScriptKind) -> Self {
        self.kind = kind;
        self
    }

    /// Bind an additional read-only value. The name is checked when
    /// the script runs.
    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.push((name.into(), value));
        self
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn binding_names(&self) -> Vec<String> {
        BINDING_NAMES
            .iter()
            .map(|n| n.to_string())
            .chain(self.extra.iter().map(|(n, _)| n.clone()))
            .collect()
    }

    fn pm(&self) -> PmApi {
        PmApi::new(
            &self.context,
            self.logger.clone(),
            self.kind,
            self.limits.max_pattern_length,
        )
    }

    /// Materialize every binding. Request and response values are
    /// snapshots taken now.
    pub fn bindings(&self) -> Result<Vec<(String, Dynamic)>, SandboxError> {
        let (request, response, environment) = self.context.with(|ctx| {
            (
                ctx.request.clone(),
                ctx.response.clone(),
                ctx.environment.clone(),
            )
        });
        let pm = self.pm();
        let status = response.status.map_or(Dynamic::UNIT, |s| Dynamic::from_int(INT::from(s)));
        let response_headers = to_json(&response.headers.clone().unwrap_or_default());

        let values = [
            Dynamic::from(pm.clone()),
            json_to_dynamic(&to_json(&request)),
            json_to_dynamic(&to_json(&response)),
            json_to_dynamic(&Value::Object(environment)),
            Dynamic::from(StoreApi::new(&self.context, Store::Variables)),
            Dynamic::from(StoreApi::new(&self.context, Store::Globals)),
            Dynamic::from(pm.tests()),
            Dynamic::from(pm.console()),
            response.data.as_ref().map_or(Dynamic::UNIT, json_to_dynamic),
            body_text(response.data.as_ref()),
            json_to_dynamic(&response_headers),
            status,
            request.body.as_ref().map_or(Dynamic::UNIT, json_to_dynamic),
            body_text(request.body.as_ref()),
            json_to_dynamic(&to_json(&request.headers)),
            Dynamic::from(request.method.clone()),
            Dynamic::from(request.url.clone()),
        ];

        let mut bindings: Vec<(String, Dynamic)> = BINDING_NAMES
            .iter()
            .map(|n| n.to_string())
            .zip(values)
            .collect();
        bindings.extend(
            self.extra
                .iter()
                .map(|(name, value)| (name.clone(), json_to_dynamic(value))),
        );

        for (name, _) in &bindings {
            validate_binding_name(name)?;
        }
        Ok(bindings)
    }

    pub fn binding(&self, name: &str) -> Option<Dynamic> {
        self.bindings()
            .ok()?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn build_engine(&self, bindings: Vec<(String, Dynamic)>, cancel: &CancelFlag) -> Engine {
        let mut engine = restricted_engine(&self.limits);

        let flag = cancel.clone();
        engine.on_progress(move |_| {
            if flag.is_cancelled() {
                Some(Dynamic::from("cancelled".to_string()))
            } else {
                None
            }
        });

        let context = self.context.clone();
        engine.on_print(move |text| {
            context.push_console(ConsoleEntry::new(ConsoleLevel::Log, text, SOURCE_TEST_SCRIPT));
        });

        let flag = cancel.clone();
        engine.register_fn("sleep", move |ms: INT| cooperative_sleep(ms, &flag));

        register_api(&mut engine, &self.pm());

        // Locals declared by the script shadow bindings; everything
        // else resolves here.
        let bindings: HashMap<String, Dynamic> = bindings.into_iter().collect();
        engine.on_var(move |name, index, _| {
            if index > 0 {
                return Ok(None);
            }
            Ok(bindings.get(name).cloned())
        });

        engine
    }

    /// Run `script` to completion on the current thread.
    ///
    /// Assertion failures do not stop the script. A raised error
    /// stops it and surfaces as [`SandboxError::Runtime`]; anything
    /// the script appended before that stays in the context.
    pub fn run_in_sandbox(&self, script: &str) -> Result<(), SandboxError> {
        self.run_with_cancel(script, &CancelFlag::default())
    }

    pub fn run_with_cancel(&self, script: &str, cancel: &CancelFlag) -> Result<(), SandboxError> {
        let bindings = self.bindings()?;
        let engine = self.build_engine(bindings, cancel);
        let ast = engine
            .compile(script)
            .map_err(|e| SandboxError::Compile(e.to_string()))?;

        debug!("Running {} script ({} bytes)", self.kind.as_str(), script.len());
        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|err| classify(&err))
    }

    /// Run `script` on a blocking worker and stop waiting after
    /// `timeout`.
    ///
    /// On timeout the run is also cancelled: the script stops at its
    /// next operation boundary. Side effects it already made on the
    /// context remain.
    pub async fn run_in_secure_sandbox(&self, script: &str, timeout: Duration) -> Result<(), SandboxError> {
        let cancel = CancelFlag::default();
        let sandbox = self.clone();
        let script = script.to_string();
        let flag = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || sandbox.run_with_cancel(&script, &flag));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SandboxError::Join(join_err.to_string())),
            Err(_) => {
                cancel.cancel();
                let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!("Script timed out after {millis} ms");
                Err(SandboxError::Timeout(millis))
            }
        }
    }
}

/// Compile `script` without running it.
pub fn validate_script(script: &str) -> ScriptValidation {
    let engine = restricted_engine(&SandboxLimits::default());
    match engine.compile(script) {
        Ok(_) => ScriptValidation {
            valid: true,
            error: None,
        },
        Err(e) => ScriptValidation {
            valid: false,
            error: Some(e.to_string()),
        },
    }
}

fn restricted_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(StandardPackage::new().as_shared_module());
    engine
        .set_module_resolver(DummyModuleResolver::new())
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_array_size)
        .set_max_map_size(limits.max_map_size);
    engine.disable_symbol("eval");
    engine
}

fn cooperative_sleep(ms: INT, cancel: &CancelFlag) -> Result<(), Box<EvalAltResult>> {
    const SLICE: Duration = Duration::from_millis(5);
    let deadline = Instant::now() + Duration::from_millis(u64::try_from(ms).unwrap_or(0));
    loop {
        if cancel.is_cancelled() {
            return Err(terminated());
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}

fn classify(err: &EvalAltResult) -> SandboxError {
    match root_cause(err) {
        EvalAltResult::ErrorTerminated(..) => SandboxError::Cancelled,
        _ => SandboxError::Runtime(error_message(err)),
    }
}
