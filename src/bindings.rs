//! Script-visible API objects and their engine registration.
//!
//! Every object is a thin handle onto the [`SharedContext`] of one
//! run. Reads go to the live context; writes append to it or merge
//! into its maps.

use crate::assertion::{Expectation, HeaderAssertions, JsonAssertions, StatusAssertions};
use crate::context::SharedContext;
use crate::convert::{dynamic_to_json, json_to_dynamic};
use crate::logger::ScriptLogger;
use crate::model::{ConsoleEntry, ConsoleLevel, ScriptKind, SOURCE_TEST_SCRIPT};
use crate::validator::is_truthy;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, NativeCallContext, Position, INT};
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::sync::Arc;

pub(crate) fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Text form of a body: strings as-is, everything else as JSON.
pub(crate) fn body_text(body: Option<&Value>) -> Dynamic {
    match body {
        None => Dynamic::UNIT,
        Some(Value::String(s)) => Dynamic::from(s.clone()),
        Some(other) => Dynamic::from(other.to_string()),
    }
}

/// Strip call-frame wrappers down to the error that was raised.
pub(crate) fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _)
        | EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

/// Errors that must unwind the whole script instead of failing a
/// single test callback.
pub(crate) fn is_abort(err: &EvalAltResult) -> bool {
    matches!(
        root_cause(err),
        EvalAltResult::ErrorTerminated(..)
            | EvalAltResult::ErrorTooManyOperations(..)
            | EvalAltResult::ErrorStackOverflow(..)
    )
}

/// Message of a raised error. `throw "boom"` and
/// `throw Error("boom")` both yield `boom`.
pub(crate) fn error_message(err: &EvalAltResult) -> String {
    match root_cause(err) {
        EvalAltResult::ErrorRuntime(value, _) => thrown_message(value),
        other => other.to_string(),
    }
}

fn thrown_message(value: &Dynamic) -> String {
    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<Map>() {
            if let Some(message) = map.get("message") {
                return message.to_string();
            }
        }
    }
    value.to_string()
}

fn render(value: &Dynamic) -> String {
    match dynamic_to_json(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

// ── pm ──────────────────────────────────────────────────

/// The `pm` object: entry point to every other binding.
#[derive(Debug, Clone)]
pub struct PmApi {
    context: SharedContext,
    logger: Arc<dyn ScriptLogger>,
    kind: ScriptKind,
    max_pattern_length: usize,
}

impl PmApi {
    pub fn new(
        context: &SharedContext,
        logger: Arc<dyn ScriptLogger>,
        kind: ScriptKind,
        max_pattern_length: usize,
    ) -> Self {
        Self {
            context: context.clone(),
            logger,
            kind,
            max_pattern_length,
        }
    }

    fn request(&self) -> Dynamic {
        json_to_dynamic(&self.context.with(|ctx| to_json(&ctx.request)))
    }

    fn response_json(&self) -> Value {
        self.context.with(|ctx| to_json(&ctx.response))
    }

    fn environment(&self) -> Dynamic {
        json_to_dynamic(&Value::Object(self.context.with(|ctx| ctx.environment.clone())))
    }

    fn info(&self) -> Map {
        let mut info = Map::new();
        info.insert("scriptType".into(), Dynamic::from(self.kind.as_str().to_string()));
        info
    }

    pub fn variables(&self) -> StoreApi {
        StoreApi::new(&self.context, Store::Variables)
    }

    pub fn globals(&self) -> StoreApi {
        StoreApi::new(&self.context, Store::Globals)
    }

    pub fn tests(&self) -> TestsApi {
        TestsApi::new(&self.context, self.logger.clone())
    }

    pub fn console(&self) -> ConsoleApi {
        ConsoleApi::new(&self.context)
    }

    pub fn expect(&self, actual: &Dynamic) -> Expectation {
        Expectation::new(&self.context, dynamic_to_json(actual))
            .with_max_pattern_length(self.max_pattern_length)
    }
}

// ── variables / globals ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Variables,
    Globals,
}

/// `variables` and `globals`: get/set/unset/clear/has/toObject over
/// one of the context's maps.
#[derive(Debug, Clone)]
pub struct StoreApi {
    context: SharedContext,
    store: Store,
}

impl StoreApi {
    pub fn new(context: &SharedContext, store: Store) -> Self {
        Self {
            context: context.clone(),
            store,
        }
    }

    fn with_map<R>(&self, f: impl FnOnce(&mut crate::model::ValueMap) -> R) -> R {
        let store = self.store;
        self.context.with(|ctx| match store {
            Store::Variables => f(&mut ctx.variables),
            Store::Globals => f(&mut ctx.globals),
        })
    }

    pub fn get(&self, key: &str) -> Dynamic {
        self.with_map(|map| map.get(key).map_or(Dynamic::UNIT, json_to_dynamic))
    }

    pub fn set(&self, key: &str, value: &Dynamic) {
        let value = dynamic_to_json(value);
        self.with_map(|map| map.insert(key.to_string(), value));
    }

    pub fn unset(&self, key: &str) {
        self.with_map(|map| map.shift_remove(key));
    }

    pub fn clear(&self) {
        self.with_map(|map| map.clear());
    }

    pub fn has(&self, key: &str) -> bool {
        self.with_map(|map| map.contains_key(key))
    }

    pub fn to_object(&self) -> Dynamic {
        json_to_dynamic(&Value::Object(self.with_map(|map| map.clone())))
    }
}

// ── tests ───────────────────────────────────────────────

/// `tests.test(name, fn)` and `tests.get(name)`.
#[derive(Debug, Clone)]
pub struct TestsApi {
    context: SharedContext,
    logger: Arc<dyn ScriptLogger>,
}

impl TestsApi {
    pub fn new(context: &SharedContext, logger: Arc<dyn ScriptLogger>) -> Self {
        Self {
            context: context.clone(),
            logger,
        }
    }

    /// Run `callback` and record the outcome under `name`. A raised
    /// error fails the test and is reported to the logger; script
    /// aborts (cancellation, resource limits) propagate.
    fn run(
        &self,
        call: &NativeCallContext,
        name: &str,
        callback: &FnPtr,
    ) -> Result<(), Box<EvalAltResult>> {
        let passed = match callback.call_within_context::<Dynamic>(call, ()) {
            Ok(_) => true,
            Err(err) if is_abort(&err) => return Err(err),
            Err(err) => {
                self.logger
                    .error(&format!("Test '{name}' failed: {}", error_message(&err)));
                false
            }
        };
        self.context.with(|ctx| ctx.set_test(name, passed));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.context.with(|ctx| ctx.test_outcome(name))
    }
}

// ── console ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConsoleApi {
    context: SharedContext,
}

impl ConsoleApi {
    pub fn new(context: &SharedContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Arguments are rendered individually and joined by a space.
    pub fn write(&self, level: ConsoleLevel, parts: &[Dynamic]) {
        let message = parts.iter().map(render).collect::<Vec<_>>().join(" ");
        self.context
            .push_console(ConsoleEntry::new(level, message, SOURCE_TEST_SCRIPT));
    }
}

// ── registration ────────────────────────────────────────

/// Register every API type and free function on `engine`.
/// `expect(x)` is bound to `pm`'s context.
///
/// Bindings resolve as constants, so methods take their receiver by
/// value; the handles are cheap to clone.
pub fn register_api(engine: &mut Engine, pm: &PmApi) {
    register_pm(engine);
    register_store(engine);
    register_tests(engine);
    register_console(engine);
    register_expectation(engine);
    register_facades(engine);
    register_helpers(engine);

    let bound = pm.clone();
    engine.register_fn("expect", move |actual: Dynamic| bound.expect(&actual));
}

fn register_pm(engine: &mut Engine) {
    engine
        .register_type_with_name::<PmApi>("Pm")
        .register_get("request", |pm: &mut PmApi| pm.request())
        .register_get("response", |pm: &mut PmApi| json_to_dynamic(&pm.response_json()))
        .register_get("environment", |pm: &mut PmApi| pm.environment())
        .register_get("variables", |pm: &mut PmApi| pm.variables())
        .register_get("globals", |pm: &mut PmApi| pm.globals())
        .register_get("tests", |pm: &mut PmApi| pm.tests())
        .register_get("console", |pm: &mut PmApi| pm.console())
        .register_get("info", |pm: &mut PmApi| pm.info())
        .register_get("status", |pm: &mut PmApi| StatusAssertions::from_response(&pm.context))
        .register_get("headers", |pm: &mut PmApi| HeaderAssertions::from_response(&pm.context))
        .register_get("json", |pm: &mut PmApi| JsonAssertions::new(&pm.context, pm.response_json()))
        .register_fn("expect", |pm: PmApi, actual: Dynamic| pm.expect(&actual))
        .register_fn(
            "test",
            |call: NativeCallContext, pm: PmApi, name: &str, callback: FnPtr| {
                pm.tests().run(&call, name, &callback)
            },
        );
}

fn register_store(engine: &mut Engine) {
    engine
        .register_type_with_name::<StoreApi>("VariableStore")
        .register_fn("get", |s: StoreApi, key: &str| s.get(key))
        .register_fn("set", |s: StoreApi, key: &str, value: Dynamic| s.set(key, &value))
        .register_fn("unset", |s: StoreApi, key: &str| s.unset(key))
        .register_fn("clear", |s: StoreApi| s.clear())
        .register_fn("has", |s: StoreApi, key: &str| s.has(key))
        .register_fn("toObject", |s: StoreApi| s.to_object());
}

fn register_tests(engine: &mut Engine) {
    engine
        .register_type_with_name::<TestsApi>("Tests")
        .register_fn(
            "test",
            |call: NativeCallContext, tests: TestsApi, name: &str, callback: FnPtr| {
                tests.run(&call, name, &callback)
            },
        )
        .register_fn("get", |tests: TestsApi, name: &str| {
            tests.get(name).map_or(Dynamic::UNIT, Dynamic::from_bool)
        });
}

/// Most values a single `console.*` call accepts.
pub const MAX_CONSOLE_ARGS: usize = 8;

fn register_console(engine: &mut Engine) {
    engine.register_type_with_name::<ConsoleApi>("Console");
    for level in ConsoleLevel::ALL {
        for arity in 0..=MAX_CONSOLE_ARGS {
            let mut arg_types = vec![TypeId::of::<ConsoleApi>()];
            arg_types.extend(std::iter::repeat(TypeId::of::<Dynamic>()).take(arity));

            engine.register_raw_fn(
                level.as_str(),
                arg_types,
                move |_: NativeCallContext, args: &mut [&mut Dynamic]| {
                    let Some((receiver, parts)) = args.split_first() else {
                        return Ok(());
                    };
                    if let Some(console) = (**receiver).clone().try_cast::<ConsoleApi>() {
                        let parts: Vec<Dynamic> = parts.iter().map(|p| (**p).clone()).collect();
                        console.write(level, &parts);
                    }
                    Ok(())
                },
            );
        }
    }
}

fn as_number(value: &Dynamic) -> f64 {
    value
        .as_float()
        .or_else(|_| value.as_int().map(|i| i as f64))
        .unwrap_or(f64::NAN)
}

fn as_length(n: INT) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Saturate into the status code range.
fn as_status(n: INT) -> u16 {
    u16::try_from(n.clamp(0, INT::from(u16::MAX))).unwrap_or(u16::MAX)
}

/// Evaluate a script predicate over `actual`. A raised error counts
/// as `false`.
fn call_predicate(
    call: &NativeCallContext,
    predicate: &FnPtr,
    actual: &Value,
) -> Result<bool, Box<EvalAltResult>> {
    match predicate.call_within_context::<Dynamic>(call, (json_to_dynamic(actual),)) {
        Ok(result) => Ok(is_truthy(&dynamic_to_json(&result))),
        Err(err) if is_abort(&err) => Err(err),
        Err(_) => Ok(false),
    }
}

/// `name()` and `name(message)`.
macro_rules! register_unary {
    ($engine:expr, $name:literal, $method:ident) => {
        $engine
            .register_fn($name, |e: Expectation| e.$method(None))
            .register_fn($name, |e: Expectation, m: &str| e.$method(Some(m)));
    };
}

/// `name(expected)` and `name(expected, message)` for methods that
/// take a JSON value.
macro_rules! register_json {
    ($engine:expr, $name:literal, $method:ident) => {
        $engine
            .register_fn($name, |e: Expectation, v: Dynamic| {
                e.$method(&dynamic_to_json(&v), None)
            })
            .register_fn($name, |e: Expectation, v: Dynamic, m: &str| {
                e.$method(&dynamic_to_json(&v), Some(m))
            });
    };
}

/// Same as `register_json!` for methods that take a string.
macro_rules! register_text {
    ($engine:expr, $name:literal, $method:ident) => {
        $engine
            .register_fn($name, |e: Expectation, v: &str| e.$method(v, None))
            .register_fn($name, |e: Expectation, v: &str, m: &str| {
                e.$method(v, Some(m))
            });
    };
}

fn register_expectation(engine: &mut Engine) {
    engine
        .register_type_with_name::<Expectation>("Expectation")
        .register_get("not", |e: &mut Expectation| e.not())
        .register_get("deep", |e: &mut Expectation| e.deep());

    register_unary!(engine, "toBeNull", to_be_null);
    register_unary!(engine, "toBeDefined", to_be_defined);
    register_unary!(engine, "toBeUndefined", to_be_undefined);
    register_unary!(engine, "toBeTruthy", to_be_truthy);
    register_unary!(engine, "toBeFalsy", to_be_falsy);
    register_unary!(engine, "toBeObject", to_be_object);
    register_unary!(engine, "pass", pass);
    register_unary!(engine, "fail", fail);

    register_json!(engine, "toBe", to_be);
    register_json!(engine, "toEqual", to_equal);
    register_json!(engine, "toContain", to_contain);
    register_json!(engine, "toMatchSchema", to_match_schema);

    register_text!(engine, "toMatch", to_match);
    register_text!(engine, "toBeA", to_be_a);
    register_text!(engine, "toBeAn", to_be_a);
    register_text!(engine, "toBeInstanceOf", to_be_instance_of);

    engine
        .register_fn("toHaveLength", |e: Expectation, n: INT| {
            e.to_have_length(as_length(n), None)
        })
        .register_fn("toHaveLength", |e: Expectation, n: INT, m: &str| {
            e.to_have_length(as_length(n), Some(m))
        })
        .register_fn("toBeGreaterThan", |e: Expectation, bound: Dynamic| {
            e.to_be_greater_than(as_number(&bound), None)
        })
        .register_fn("toBeGreaterThan", |e: Expectation, bound: Dynamic, m: &str| {
            e.to_be_greater_than(as_number(&bound), Some(m))
        })
        .register_fn("toBeLessThan", |e: Expectation, bound: Dynamic| {
            e.to_be_less_than(as_number(&bound), None)
        })
        .register_fn("toBeLessThan", |e: Expectation, bound: Dynamic, m: &str| {
            e.to_be_less_than(as_number(&bound), Some(m))
        });

    engine
        .register_fn("toBeOneOf", |e: Expectation, items: Array| {
            let candidates: Vec<Value> = items.iter().map(dynamic_to_json).collect();
            e.to_be_one_of(&candidates, None)
        })
        .register_fn("toBeOneOf", |e: Expectation, items: Array, m: &str| {
            let candidates: Vec<Value> = items.iter().map(dynamic_to_json).collect();
            e.to_be_one_of(&candidates, Some(m))
        })
        .register_fn("toHaveProperty", |e: Expectation, path: &str| {
            e.to_have_property(path, None)
        })
        .register_fn("toHaveProperty", |e: Expectation, path: &str, value: Dynamic| {
            e.to_have_property_value(path, &dynamic_to_json(&value), None)
        })
        .register_fn(
            "toHaveProperty",
            |e: Expectation, path: &str, value: Dynamic, m: &str| {
                e.to_have_property_value(path, &dynamic_to_json(&value), Some(m))
            },
        )
        .register_fn(
            "toSatisfy",
            |call: NativeCallContext, e: Expectation, predicate: FnPtr| {
                let passed = call_predicate(&call, &predicate, e.actual())?;
                Ok::<_, Box<EvalAltResult>>(e.to_satisfy(|_| passed, None))
            },
        )
        .register_fn(
            "toSatisfy",
            |call: NativeCallContext, e: Expectation, predicate: FnPtr, m: &str| {
                let passed = call_predicate(&call, &predicate, e.actual())?;
                Ok::<_, Box<EvalAltResult>>(e.to_satisfy(|_| passed, Some(m)))
            },
        );
}

/// `pm.status`, `pm.headers` and `pm.json`. Each method returns the
/// facade so calls chain.
fn register_facades(engine: &mut Engine) {
    engine
        .register_type_with_name::<StatusAssertions>("StatusAssertions")
        .register_fn("expectOk", |s: StatusAssertions| s.expect_ok().clone())
        .register_fn("expectCreated", |s: StatusAssertions| s.expect_created().clone())
        .register_fn("expectBadRequest", |s: StatusAssertions| {
            s.expect_bad_request().clone()
        })
        .register_fn("expectUnauthorized", |s: StatusAssertions| {
            s.expect_unauthorized().clone()
        })
        .register_fn("expectForbidden", |s: StatusAssertions| s.expect_forbidden().clone())
        .register_fn("expectNotFound", |s: StatusAssertions| s.expect_not_found().clone())
        .register_fn("expectServerError", |s: StatusAssertions| {
            s.expect_server_error().clone()
        })
        .register_fn("toHaveStatus", |s: StatusAssertions, code: INT| {
            s.to_have_status(as_status(code), None).clone()
        })
        .register_fn("toBeInRange", |s: StatusAssertions, min: INT, max: INT| {
            s.to_be_in_range(as_status(min), as_status(max), None).clone()
        });

    engine
        .register_type_with_name::<HeaderAssertions>("HeaderAssertions")
        .register_fn("toHaveHeader", |h: HeaderAssertions, name: &str| {
            h.to_have_header(name, None).clone()
        })
        .register_fn(
            "toHaveHeaderValue",
            |h: HeaderAssertions, name: &str, value: &str| {
                h.to_have_header_value(name, value, None).clone()
            },
        )
        .register_fn("toHaveContentType", |h: HeaderAssertions, ct: &str| {
            h.to_have_content_type(ct, None).clone()
        });

    engine
        .register_type_with_name::<JsonAssertions>("JsonAssertions")
        .register_fn("expectJSON", |j: JsonAssertions| j.expect_json(None).clone())
        .register_fn("expectArray", |j: JsonAssertions| j.expect_array("", None).clone())
        .register_fn("expectArray", |j: JsonAssertions, path: &str| {
            j.expect_array(path, None).clone()
        })
        .register_fn("expectEmpty", |j: JsonAssertions| j.expect_empty("", None).clone())
        .register_fn("expectEmpty", |j: JsonAssertions, path: &str| {
            j.expect_empty(path, None).clone()
        })
        .register_fn("expectKeyExists", |j: JsonAssertions, key: &str| {
            j.expect_key_exists(key, None).clone()
        })
        .register_fn(
            "expectKeyWithValue",
            |j: JsonAssertions, key: &str, value: Dynamic| {
                j.expect_key_with_value(key, &dynamic_to_json(&value), None)
                    .clone()
            },
        )
        .register_fn("toHaveProperty", |j: JsonAssertions, path: &str| {
            j.to_have_property(path, None).clone()
        })
        .register_fn(
            "toHaveProperty",
            |j: JsonAssertions, path: &str, value: Dynamic| {
                j.to_have_property_value(path, &dynamic_to_json(&value), None)
                    .clone()
            },
        )
        .register_fn("toBeObject", |j: JsonAssertions| j.to_be_object(None).clone())
        .register_fn("toMatchSchema", |j: JsonAssertions, schema: Dynamic| {
            j.to_match_schema(&dynamic_to_json(&schema), None).clone()
        });
}

fn register_helpers(engine: &mut Engine) {
    engine
        .register_fn("Error", |message: &str| {
            let mut error = Map::new();
            error.insert("name".into(), Dynamic::from("Error".to_string()));
            error.insert("message".into(), Dynamic::from(message.to_string()));
            error
        });
}

/// Error raised inside a script when its run is cancelled.
pub(crate) fn terminated() -> Box<EvalAltResult> {
    EvalAltResult::ErrorTerminated(Dynamic::from("cancelled".to_string()), Position::NONE).into()
}
