//! Rhai script fragments.
//!
//! A fragment is a script body. Its scope binds `input` (the first argument,
//! or `()`) and `args` (every argument as an array). Protected state is
//! reached through `state_read(path)` and `state_write(path, value)`, both
//! mediated by the invocation's guarded view.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use hotmod_core::{Path, Reader, Value, Writer};
use hotmod_overrides::Language;
use hotmod_state::StateView;
use parking_lot::Mutex;
use rhai::packages::{Package, StandardPackage};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position, Scope, AST};

use crate::budget::Budget;
use crate::engine::{Executable, Invocation, ScriptEngine};
use crate::error::{Result, SandboxError};
use crate::outcome::{FaultKind, Outcome, Resource};

/// How often, in operations, the progress callback looks at the clock.
const CLOCK_CHECK_INTERVAL: u64 = 256;

/// Fault raised by a host function, kept so it can be classified after the
/// engine unwinds.
type HostFault = Arc<Mutex<Option<(FaultKind, String)>>>;

/// Compiles Rhai fragments.
pub struct RhaiEngine {
    compiler: Engine,
    package: Arc<StandardPackage>,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self {
            compiler: Engine::new_raw(),
            package: Arc::new(StandardPackage::new()),
        }
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for RhaiEngine {
    fn language(&self) -> Language {
        Language::Rhai
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn Executable>> {
        let ast = self
            .compiler
            .compile(source)
            .map_err(|e| SandboxError::compile(Language::Rhai, e.to_string()))?;
        Ok(Arc::new(RhaiExecutable {
            ast,
            package: Arc::clone(&self.package),
        }))
    }
}

struct RhaiExecutable {
    ast: AST,
    package: Arc<StandardPackage>,
}

impl Executable for RhaiExecutable {
    fn language(&self) -> Language {
        Language::Rhai
    }

    fn execute(&self, invocation: &mut Invocation) -> Outcome {
        let view = Arc::new(Mutex::new(std::mem::replace(
            &mut invocation.view,
            StateView::None,
        )));
        let host_fault: HostFault = Arc::default();

        let outcome = {
            let mut engine = runtime_engine(&self.package, &invocation.budget);
            let token = invocation.token.clone();
            let deadline = invocation.deadline;
            engine.on_progress(move |ops| {
                let expired = ops % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline;
                if token.is_terminated() || expired {
                    Some(Dynamic::UNIT)
                } else {
                    None
                }
            });
            register_state_functions(&mut engine, &view, &host_fault);

            let mut scope = Scope::new();
            let input = invocation
                .args
                .first()
                .map(value_to_dynamic)
                .unwrap_or(Dynamic::UNIT);
            let args: Array = invocation.args.iter().map(value_to_dynamic).collect();
            scope.push_dynamic("input", input);
            scope.push("args", args);

            match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &self.ast) {
                Ok(result) => match dynamic_to_value(result) {
                    Ok(value) => Outcome::Success(value),
                    Err(message) => Outcome::faulted(FaultKind::Type, message),
                },
                Err(err) => match host_fault.lock().take() {
                    Some((kind, message)) => Outcome::faulted(kind, message),
                    None => classify(&err),
                },
            }
        };

        // The engine and its closures are gone; the view has one owner again.
        invocation.view = match Arc::try_unwrap(view) {
            Ok(view) => view.into_inner(),
            Err(_) => StateView::None,
        };
        outcome
    }
}

fn runtime_engine(package: &StandardPackage, budget: &Budget) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(package.as_shared_module());
    engine.on_print(|text| tracing::debug!(target: "hotmod::fragment", "{text}"));

    let elements = (budget.memory_bytes / 16).max(1);
    engine.set_max_call_levels(budget.max_call_depth);
    engine.set_max_string_size(budget.memory_bytes.max(1));
    engine.set_max_array_size(elements);
    engine.set_max_map_size(elements);
    if let Some(operations) = budget.max_operations {
        engine.set_max_operations(operations);
    }
    engine
}

fn register_state_functions(engine: &mut Engine, view: &Arc<Mutex<StateView>>, fault: &HostFault) {
    let (reader, read_fault) = (Arc::clone(view), Arc::clone(fault));
    engine.register_fn(
        "state_read",
        move |path: ImmutableString| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
            let path = parse_path(&path, &read_fault)?;
            match reader.lock().read(&path) {
                Ok(Some(value)) => Ok(value_to_dynamic(&value)),
                Ok(None) => Ok(Dynamic::UNIT),
                Err(e) => Err(host_error(&read_fault, access_kind(&e), e.to_string())),
            }
        },
    );

    let (writer, write_fault) = (Arc::clone(view), Arc::clone(fault));
    engine.register_fn(
        "state_write",
        move |path: ImmutableString, value: Dynamic| -> std::result::Result<(), Box<EvalAltResult>> {
            let path = parse_path(&path, &write_fault)?;
            let value = dynamic_to_value(value)
                .map_err(|message| host_error(&write_fault, FaultKind::Type, message))?;
            writer
                .lock()
                .write(&path, value)
                .map(|_| ())
                .map_err(|e| host_error(&write_fault, access_kind(&e), e.to_string()))
        },
    );
}

fn parse_path(
    text: &str,
    fault: &HostFault,
) -> std::result::Result<Path, Box<EvalAltResult>> {
    Path::parse(text).map_err(|e| host_error(fault, FaultKind::Type, e.to_string()))
}

fn access_kind(error: &hotmod_core::Error) -> FaultKind {
    if error.is_access_violation() {
        FaultKind::StateDenied
    } else {
        FaultKind::Type
    }
}

fn host_error(fault: &HostFault, kind: FaultKind, message: String) -> Box<EvalAltResult> {
    let err = EvalAltResult::ErrorRuntime(Dynamic::from(message.clone()), Position::NONE);
    *fault.lock() = Some((kind, message));
    err.into()
}

fn classify(err: &EvalAltResult) -> Outcome {
    let message = err.to_string();
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify(inner),
        EvalAltResult::ErrorTerminated(..) => Outcome::Timeout,
        EvalAltResult::ErrorStackOverflow(..) => Outcome::exceeded(Resource::Depth, message),
        EvalAltResult::ErrorDataTooLarge(..) => Outcome::exceeded(Resource::Memory, message),
        EvalAltResult::ErrorTooManyOperations(..) => {
            Outcome::exceeded(Resource::Operations, message)
        }
        EvalAltResult::ErrorRuntime(thrown, _) => {
            Outcome::faulted(FaultKind::Thrown, thrown.to_string())
        }
        EvalAltResult::ErrorVariableNotFound(..)
        | EvalAltResult::ErrorFunctionNotFound(..)
        | EvalAltResult::ErrorPropertyNotFound(..) => {
            Outcome::faulted(FaultKind::Reference, message)
        }
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..) => Outcome::faulted(FaultKind::Type, message),
        EvalAltResult::ErrorArithmetic(..) => Outcome::faulted(FaultKind::Arithmetic, message),
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => {
            Outcome::faulted(FaultKind::Index, message)
        }
        _ => Outcome::faulted(FaultKind::Runtime, message),
    }
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Integer(i) => Dynamic::from_int(*i),
        Value::Float(f) => Dynamic::from_float(*f),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        Value::Array(items) => Dynamic::from_array(items.iter().map(value_to_dynamic).collect()),
        Value::Map(entries) => {
            let map: Map = entries
                .iter()
                .map(|(k, v)| (k.as_str().into(), value_to_dynamic(v)))
                .collect();
            Dynamic::from_map(map)
        }
    }
}

fn dynamic_to_value(value: Dynamic) -> std::result::Result<Value, String> {
    let unsupported = |type_name: &str| format!("unsupported result type: {type_name}");

    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Integer(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Value::Float(f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value.into_string().map(Value::String).map_err(unsupported);
    }
    if value.is_blob() {
        return value.into_blob().map(Value::Bytes).map_err(unsupported);
    }
    if value.is_array() {
        let items = value.into_array().map_err(unsupported)?;
        return items
            .into_iter()
            .map(dynamic_to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if value.is_map() {
        let type_name = value.type_name();
        let map = value
            .try_cast::<Map>()
            .ok_or_else(|| unsupported(type_name))?;
        let mut entries = BTreeMap::new();
        for (key, item) in map {
            entries.insert(key.to_string(), dynamic_to_value(item)?);
        }
        return Ok(Value::Map(entries));
    }
    Err(unsupported(value.type_name()))
}
