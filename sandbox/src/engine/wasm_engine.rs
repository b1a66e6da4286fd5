//! WebAssembly fragments using Wasmtime.
//!
//! A fragment is a WAT module exporting a `run` function with numeric
//! parameters and results. It may not import anything, so it has no way to
//! reach protected state.
//!
//! Budgets map onto Wasmtime as follows: the deadline and cancel token are
//! checked on every epoch tick, `max_operations` becomes fuel, the memory
//! ceiling caps linear memory growth, and call depth is bounded by the wasm
//! stack limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hotmod_core::Value;
use hotmod_overrides::Language;
use wasmtime::{
    Config, Engine, ExternType, Instance, Module, ResourceLimiter, Store, Trap, UpdateDeadline, Val,
    ValType,
};

use crate::engine::{Executable, Invocation, ScriptEngine};
use crate::error::{Result, SandboxError};
use crate::outcome::{FaultKind, Outcome, Resource};

const RUN_EXPORT: &str = "run";
const WASM_STACK_BYTES: usize = 512 * 1024;
const MAX_TABLE_ELEMENTS: usize = 10_000;

/// Compiles wasm fragments and drives the epoch clock they are interrupted
/// by.
pub struct WasmEngine {
    engine: Engine,
    ticking: Arc<AtomicBool>,
}

impl WasmEngine {
    /// Create an engine whose epoch advances every `tick`.
    pub fn new(tick: Duration) -> Result<Self> {
        let mut config = Config::new();
        config
            .epoch_interruption(true)
            .consume_fuel(true)
            .max_wasm_stack(WASM_STACK_BYTES);
        let engine = Engine::new(&config).map_err(|e| SandboxError::Engine(e.to_string()))?;

        let ticking = Arc::new(AtomicBool::new(true));
        let clock = engine.clone();
        let running = Arc::clone(&ticking);
        std::thread::Builder::new()
            .name("hotmod-epoch".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(tick);
                    clock.increment_epoch();
                }
            })
            .map_err(|e| SandboxError::Engine(e.to_string()))?;

        Ok(Self { engine, ticking })
    }
}

impl Drop for WasmEngine {
    fn drop(&mut self) {
        self.ticking.store(false, Ordering::Relaxed);
    }
}

impl ScriptEngine for WasmEngine {
    fn language(&self) -> Language {
        Language::Wasm
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn Executable>> {
        let compile_error = |message: String| SandboxError::compile(Language::Wasm, message);

        let module = Module::new(&self.engine, source.as_bytes())
            .map_err(|e| compile_error(e.to_string()))?;
        if module.imports().len() > 0 {
            return Err(compile_error("fragments may not import host functions".into()));
        }
        let ty = match module.get_export(RUN_EXPORT) {
            Some(ExternType::Func(ty)) => ty,
            _ => return Err(compile_error(format!("module must export a `{RUN_EXPORT}` function"))),
        };
        let params = ty.params().collect();
        let results = ty.results().len();

        Ok(Arc::new(WasmExecutable {
            engine: self.engine.clone(),
            module,
            params,
            results,
        }))
    }
}

struct WasmExecutable {
    engine: Engine,
    module: Module,
    params: Vec<ValType>,
    results: usize,
}

impl WasmExecutable {
    fn params(&self, args: &[Value]) -> std::result::Result<Vec<Val>, String> {
        if args.len() != self.params.len() {
            return Err(format!(
                "`{RUN_EXPORT}` takes {} arguments, got {}",
                self.params.len(),
                args.len()
            ));
        }
        self.params
            .iter()
            .zip(args)
            .map(|(ty, arg)| {
                let val = match ty {
                    ValType::I32 => arg.as_i64().and_then(|i| i32::try_from(i).ok()).map(Val::I32),
                    ValType::I64 => arg.as_i64().map(Val::I64),
                    ValType::F32 => arg.as_f64().map(|f| Val::F32((f as f32).to_bits())),
                    ValType::F64 => arg.as_f64().map(|f| Val::F64(f.to_bits())),
                    _ => None,
                };
                val.ok_or_else(|| format!("cannot pass {} as {ty:?}", arg.type_name()))
            })
            .collect()
    }
}

struct MemoryCeiling {
    limit: usize,
    exceeded: bool,
}

impl ResourceLimiter for MemoryCeiling {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.limit {
            self.exceeded = true;
            return Ok(false);
        }
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= MAX_TABLE_ELEMENTS)
    }
}

impl Executable for WasmExecutable {
    fn language(&self) -> Language {
        Language::Wasm
    }

    fn execute(&self, invocation: &mut Invocation) -> Outcome {
        let params = match self.params(&invocation.args) {
            Ok(params) => params,
            Err(message) => return Outcome::faulted(FaultKind::Type, message),
        };

        let mut store = Store::new(
            &self.engine,
            MemoryCeiling {
                limit: invocation.budget.memory_bytes,
                exceeded: false,
            },
        );
        store.limiter(|ceiling| ceiling);
        let fuel = invocation.budget.max_operations.unwrap_or(u64::MAX);
        if let Err(e) = store.set_fuel(fuel) {
            return Outcome::faulted(FaultKind::Runtime, e.to_string());
        }

        let token = invocation.token.clone();
        let deadline = invocation.deadline;
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(move |_| {
            if token.is_terminated() || Instant::now() >= deadline {
                Err(Trap::Interrupt.into())
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let instance = match Instance::new(&mut store, &self.module, &[]) {
            Ok(instance) => instance,
            Err(e) => return classify(store.data().exceeded, e),
        };
        let Some(run) = instance.get_func(&mut store, RUN_EXPORT) else {
            return Outcome::faulted(FaultKind::Reference, "`run` export missing");
        };

        let mut results = vec![Val::I32(0); self.results];
        match run.call(&mut store, &params, &mut results) {
            Ok(()) => results_to_outcome(results),
            Err(e) => classify(store.data().exceeded, e),
        }
    }
}

fn results_to_outcome(results: Vec<Val>) -> Outcome {
    let mut values = Vec::with_capacity(results.len());
    for val in results {
        let value = match val {
            Val::I32(i) => Value::Integer(i64::from(i)),
            Val::I64(i) => Value::Integer(i),
            Val::F32(bits) => Value::Float(f64::from(f32::from_bits(bits))),
            Val::F64(bits) => Value::Float(f64::from_bits(bits)),
            _ => return Outcome::faulted(FaultKind::Type, "unsupported wasm result type"),
        };
        values.push(value);
    }
    match values.len() {
        0 => Outcome::Success(Value::Null),
        1 => Outcome::Success(values.remove(0)),
        _ => Outcome::Success(Value::Array(values)),
    }
}

fn classify(memory_exceeded: bool, err: wasmtime::Error) -> Outcome {
    let message = err.to_string();
    if memory_exceeded {
        return Outcome::exceeded(Resource::Memory, message);
    }
    match err.downcast_ref::<Trap>() {
        Some(Trap::Interrupt) => Outcome::Timeout,
        Some(Trap::StackOverflow) => Outcome::exceeded(Resource::Depth, message),
        Some(Trap::OutOfFuel) => Outcome::exceeded(Resource::Operations, message),
        Some(
            Trap::IntegerDivisionByZero | Trap::IntegerOverflow | Trap::BadConversionToInteger,
        ) => Outcome::faulted(FaultKind::Arithmetic, message),
        Some(Trap::MemoryOutOfBounds | Trap::TableOutOfBounds | Trap::HeapMisaligned) => {
            Outcome::faulted(FaultKind::Index, message)
        }
        Some(_) => Outcome::faulted(FaultKind::Trap, message),
        None => Outcome::faulted(FaultKind::Runtime, message),
    }
}
