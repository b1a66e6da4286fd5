//! Admission, caching and supervised execution.

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use hotmod_core::Value;
use hotmod_overrides::{FragmentKey, Language, OverrideFragment, OverrideSet};
use hotmod_state::StateView;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{timeout, timeout_at};

use crate::budget::{Budget, SandboxConfig};
use crate::engine::{Executable, Invocation, RhaiEngine, ScriptEngine};
use crate::error::{Result, SandboxError};
use crate::outcome::{Execution, FaultKind, Outcome, Resource};
use crate::pool::{Job, UnitPool};
use crate::stats::{Counters, SandboxStats};
use crate::token::CancelToken;

/// Runs override fragments in isolation.
///
/// One `Sandbox` serves the whole process. It owns the compiled-fragment
/// cache and the pool of execution units, and is shared behind an `Arc`.
pub struct Sandbox {
    engines: HashMap<Language, Arc<dyn ScriptEngine>>,
    cache: Arc<Mutex<LruCache<FragmentKey, Arc<dyn Executable>>>>,
    pool: UnitPool,
    config: SandboxConfig,
    counters: Arc<Counters>,
}

impl Sandbox {
    /// A sandbox with every engine compiled into this build.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let mut sandbox = Self::without_engines(config);
        sandbox.register(Arc::new(RhaiEngine::new()));
        #[cfg(feature = "wasm")]
        {
            let tick = std::time::Duration::from_millis(sandbox.config.wasm_tick_ms.max(1));
            sandbox.register(Arc::new(crate::engine::WasmEngine::new(tick)?));
        }
        Ok(sandbox)
    }

    /// A sandbox with no engines; add them with [`register`](Self::register).
    pub fn without_engines(config: SandboxConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            engines: HashMap::new(),
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            pool: UnitPool::new(config.units, config.unit_stack_bytes),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register `engine` for its language, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn ScriptEngine>) -> Option<Arc<dyn ScriptEngine>> {
        self.engines.insert(engine.language(), engine)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn supports(&self, language: Language) -> bool {
        self.engines.contains_key(&language)
    }

    /// Compile without touching the cache or the compile budget.
    pub fn compile(&self, language: Language, source: &str) -> Result<Arc<dyn Executable>> {
        let engine = self
            .engines
            .get(&language)
            .ok_or(SandboxError::UnsupportedLanguage(language))?;
        engine.compile(source)
    }

    /// Executable for `fragment`, compiling it under the compile budget on a
    /// cache miss.
    ///
    /// The compile runs on the blocking pool, never on the calling task. If
    /// it does not finish within the time budget this call is rejected at
    /// the budget; the compile carries on and caches its result for later
    /// calls. Compile errors are never cached.
    pub async fn admit(&self, fragment: &OverrideFragment) -> Result<Arc<dyn Executable>> {
        if let Some(executable) = self.cache.lock().get(fragment.key()) {
            self.counters.cache_hit();
            return Ok(Arc::clone(executable));
        }
        self.counters.cache_miss();

        let budget = &self.config.compile;
        if fragment.source().len() > budget.max_source_bytes {
            self.counters.rejected();
            return Err(SandboxError::rejected(format!(
                "{} source bytes exceed the {} byte allowance",
                fragment.source().len(),
                budget.max_source_bytes
            )));
        }

        let engine = Arc::clone(
            self.engines
                .get(&fragment.language())
                .ok_or(SandboxError::UnsupportedLanguage(fragment.language()))?,
        );
        let (cache, counters) = (Arc::clone(&self.cache), Arc::clone(&self.counters));
        let (key, source) = (fragment.key().clone(), fragment.source().to_string());
        let compile = tokio::task::spawn_blocking(move || {
            let compiled = engine.compile(&source);
            match &compiled {
                Ok(executable) => {
                    cache.lock().put(key, Arc::clone(executable));
                }
                Err(_) => counters.compile_error(),
            }
            compiled
        });

        match timeout(budget.max_compile_time(), compile).await {
            Ok(Ok(compiled)) => compiled,
            Ok(Err(e)) => Err(SandboxError::Unavailable(format!("compile task failed: {e}"))),
            Err(_) => {
                self.counters.rejected();
                tracing::warn!(
                    point = fragment.point(),
                    key = fragment.key().short(),
                    budget = ?budget.max_compile_time(),
                    "compile exceeded budget; left to finish in the background"
                );
                Err(SandboxError::rejected(format!(
                    "compile did not finish within {:?}",
                    budget.max_compile_time()
                )))
            }
        }
    }

    /// Compile every fragment of `set` ahead of use.
    ///
    /// Runs off the hot path, so the compile budget does not apply. Returns
    /// how many fragments were newly compiled; a failure names the extension
    /// point whose fragment did not compile.
    pub fn precompile(&self, set: &OverrideSet) -> Result<usize> {
        let mut compiled = 0;
        for (_, fragment) in set.iter() {
            if self.cache.lock().contains(fragment.key()) {
                continue;
            }
            self.compile_and_cache(fragment)
                .map_err(|e| SandboxError::Fragment {
                    point: fragment.point().to_string(),
                    source: Box::new(e),
                })?;
            compiled += 1;
        }
        tracing::debug!(scope = %set.scope(), tag = %set.tag(), compiled, "precompiled set");
        Ok(compiled)
    }

    fn compile_and_cache(&self, fragment: &OverrideFragment) -> Result<Arc<dyn Executable>> {
        let executable = match self.compile(fragment.language(), fragment.source()) {
            Ok(executable) => executable,
            Err(e) => {
                self.counters.compile_error();
                return Err(e);
            }
        };
        self.cache
            .lock()
            .put(fragment.key().clone(), Arc::clone(&executable));
        Ok(executable)
    }

    pub fn is_cached(&self, key: &FragmentKey) -> bool {
        self.cache.lock().contains(key)
    }

    /// Run `executable` on an execution unit under `budget`.
    ///
    /// Always yields an outcome for the invocation; `Err` means no unit
    /// could run it at all. The deadline covers waiting for a free unit as
    /// well as running on it. On deadline expiry the unit is told to stop and
    /// given the configured grace period. A unit that reports back in time
    /// goes back to the pool, otherwise it is retired.
    pub async fn execute(
        &self,
        executable: Arc<dyn Executable>,
        args: Vec<Value>,
        view: StateView,
        budget: &Budget,
    ) -> Result<Execution> {
        let started = Instant::now();
        let deadline = started + budget.deadline();
        let lease = match timeout_at(deadline.into(), self.pool.checkout()).await {
            Ok(lease) => lease?,
            Err(_) => {
                let elapsed = started.elapsed();
                self.counters.record(&Outcome::Timeout);
                tracing::warn!(?elapsed, "no execution unit became free before the deadline");
                return Ok(Execution {
                    outcome: Outcome::Timeout,
                    view: Some(view),
                    elapsed,
                });
            }
        };
        let unit = lease.unit.id();
        let token = CancelToken::new();
        let (reply, mut completion) = oneshot::channel::<(Outcome, StateView)>();

        let mut invocation =
            Invocation::new(args, view, budget.clone(), token.clone()).until(deadline);
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| executable.execute(&mut invocation)))
                .unwrap_or_else(|panic| {
                    Outcome::faulted(FaultKind::Panic, panic_message(panic.as_ref()))
                });
            let _ = reply.send((outcome, invocation.view));
        });

        if let Err(e) = lease.unit.submit(job) {
            self.counters.retired();
            self.pool.retire(lease);
            return Err(e);
        }

        let (outcome, view) = match timeout_at(deadline.into(), &mut completion).await {
            Ok(Ok((outcome, view))) => {
                self.pool.release(lease);
                (outcome, Some(view))
            }
            Ok(Err(_)) => {
                self.counters.retired();
                self.pool.retire(lease);
                let message = "execution unit stopped without reporting";
                (Outcome::faulted(FaultKind::Panic, message), None)
            }
            Err(_) => {
                token.terminate();
                match timeout(self.config.grace(), &mut completion).await {
                    Ok(Ok((_, view))) => {
                        self.pool.release(lease);
                        (Outcome::Timeout, Some(view))
                    }
                    _ => {
                        self.counters.retired();
                        self.pool.retire(lease);
                        (Outcome::Timeout, None)
                    }
                }
            }
        };

        let outcome = match outcome {
            Outcome::Success(value) if value.approx_size() > budget.memory_bytes => {
                Outcome::exceeded(
                    Resource::Memory,
                    format!(
                        "result of about {} bytes exceeds the {} byte ceiling",
                        value.approx_size(),
                        budget.memory_bytes
                    ),
                )
            }
            other => other,
        };

        let elapsed = started.elapsed();
        self.counters.record(&outcome);
        if !outcome.is_success() {
            tracing::warn!(unit, ?elapsed, %outcome, "invocation did not succeed");
        }
        Ok(Execution {
            outcome,
            view,
            elapsed,
        })
    }

    pub fn stats(&self) -> SandboxStats {
        self.counters.snapshot()
    }

    /// Idle execution units ready for reuse.
    pub fn idle_units(&self) -> usize {
        self.pool.idle()
    }

    /// Execution units spawned so far, including retired ones.
    pub fn spawned_units(&self) -> usize {
        self.pool.spawned()
    }

    pub fn max_units(&self) -> usize {
        self.pool.size()
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut languages: Vec<_> = self.engines.keys().map(Language::to_string).collect();
        languages.sort();
        f.debug_struct("Sandbox")
            .field("languages", &languages)
            .field("cached", &self.cache.lock().len())
            .field("units", &self.pool.size())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::budget::CompileBudget;
    use hotmod_overrides::Scope;

    fn fragment(source: &str) -> OverrideFragment {
        OverrideFragment::new("fun1", source, Language::Rhai, Scope::Request)
    }

    fn sandbox(compile: CompileBudget) -> Sandbox {
        Sandbox::new(SandboxConfig {
            units: 2,
            compile,
            ..SandboxConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn second_admission_hits_the_cache() {
        let sandbox = sandbox(CompileBudget::default());
        let fragment = fragment("40 + 2");
        sandbox.admit(&fragment).await.unwrap();
        sandbox.admit(&fragment).await.unwrap();

        let stats = sandbox.stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!(sandbox.is_cached(fragment.key()));
    }

    #[tokio::test]
    async fn oversized_source_is_rejected_without_compiling() {
        let sandbox = sandbox(CompileBudget {
            max_source_bytes: 4,
            ..CompileBudget::default()
        });
        let fragment = fragment("1 + 2 + 3");
        let err = sandbox.admit(&fragment).await.err().unwrap();
        assert!(matches!(err, SandboxError::AdmissionRejected { .. }));
        assert!(!sandbox.is_cached(fragment.key()));
    }

    /// Compiles the same Rhai source after a fixed delay.
    struct Sluggish(Duration);

    impl ScriptEngine for Sluggish {
        fn language(&self) -> Language {
            Language::Rhai
        }

        fn compile(&self, source: &str) -> Result<Arc<dyn Executable>> {
            std::thread::sleep(self.0);
            RhaiEngine::new().compile(source)
        }
    }

    async fn wait_until_cached(sandbox: &Sandbox, key: &FragmentKey) {
        for _ in 0..200 {
            if sandbox.is_cached(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("compile never reached the cache");
    }

    #[tokio::test]
    async fn slow_compile_is_rejected_at_the_budget() {
        let mut sandbox = Sandbox::without_engines(SandboxConfig {
            units: 1,
            compile: CompileBudget {
                max_compile_ms: 20,
                ..CompileBudget::default()
            },
            ..SandboxConfig::default()
        });
        sandbox.register(Arc::new(Sluggish(Duration::from_millis(600))));
        let fragment = fragment("let x = 1; x + 1");

        let started = Instant::now();
        let err = sandbox.admit(&fragment).await.err().unwrap();
        assert!(matches!(err, SandboxError::AdmissionRejected { .. }));
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(sandbox.stats().admission_rejects, 1);

        // The compile finishes in the background and serves later calls.
        wait_until_cached(&sandbox, fragment.key()).await;
        assert!(sandbox.admit(&fragment).await.is_ok());
        assert_eq!(sandbox.stats().cache_hits, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn compile_does_not_block_the_calling_runtime() {
        let mut sandbox = Sandbox::without_engines(SandboxConfig {
            units: 1,
            compile: CompileBudget {
                max_compile_ms: 1_000,
                ..CompileBudget::default()
            },
            ..SandboxConfig::default()
        });
        sandbox.register(Arc::new(Sluggish(Duration::from_millis(400))));
        let fragment = fragment("7");

        let ticker = tokio::spawn(async {
            let mut ticks = 0;
            for _ in 0..10 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks += 1;
            }
            ticks
        });
        assert!(sandbox.admit(&fragment).await.is_ok());
        // The single runtime thread kept serving other tasks while compiling.
        assert!(ticker.is_finished());
        assert_eq!(ticker.await.unwrap(), 10);
    }

    #[tokio::test]
    async fn compile_errors_are_not_cached() {
        let sandbox = sandbox(CompileBudget::default());
        let fragment = fragment("let = ;");
        assert!(matches!(
            sandbox.admit(&fragment).await.err().unwrap(),
            SandboxError::Compile { .. }
        ));
        assert!(!sandbox.is_cached(fragment.key()));
        assert!(sandbox.admit(&fragment).await.is_err());
        assert_eq!(sandbox.stats().compile_errors, 2);
    }

    #[tokio::test]
    async fn missing_engine_is_reported() {
        let sandbox = Sandbox::without_engines(SandboxConfig::default());
        assert!(matches!(
            sandbox.admit(&fragment("1")).await.err().unwrap(),
            SandboxError::UnsupportedLanguage(Language::Rhai)
        ));
    }

    #[test]
    fn precompile_warms_every_fragment_and_names_failures() {
        use hotmod_overrides::{ExtensionPoint, Manifest, OverridePayload};

        let sandbox = sandbox(CompileBudget::default());
        let manifest =
            Manifest::from_points([ExtensionPoint::new("a", 0), ExtensionPoint::new("b", 0)])
                .unwrap();

        let good = OverridePayload::new().with("a", "1").with("b", "2");
        let set = OverrideSet::from_payload(Scope::Service, &good, &manifest).unwrap();
        assert_eq!(sandbox.precompile(&set).unwrap(), 2);
        assert_eq!(sandbox.precompile(&set).unwrap(), 0);

        let bad = OverridePayload::new().with("b", "let = ;");
        let set = OverrideSet::from_payload(Scope::Service, &bad, &manifest).unwrap();
        match sandbox.precompile(&set).err().unwrap() {
            SandboxError::Fragment { point, source } => {
                assert_eq!(point, "b");
                assert!(matches!(*source, SandboxError::Compile { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_result_exceeds_memory() {
        let sandbox = sandbox(CompileBudget::default());
        let executable = sandbox
            .admit(&fragment("let a = []; for i in 0..60 { a.push(i) } a"))
            .await
            .unwrap();

        let roomy = Budget::default();
        let ok = sandbox
            .execute(Arc::clone(&executable), vec![], StateView::None, &roomy)
            .await
            .unwrap();
        assert!(ok.outcome.is_success());

        // Sixty integers fit the engine's element limit but not the byte
        // ceiling once converted.
        let tight = Budget::default().with_memory_bytes(1024);
        let big = sandbox
            .execute(executable, vec![], StateView::None, &tight)
            .await
            .unwrap();
        assert!(matches!(
            big.outcome,
            Outcome::ResourceExceeded {
                resource: Resource::Memory,
                ..
            }
        ));
    }
}
