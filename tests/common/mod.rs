#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use stencil_flow::stencil::BoxFuture;
use stencil_flow::{CellError, Evaluator, GlobalRef, Locality, SchedulerConfig, ValueSource};

pub fn locality(workers: usize) -> Arc<Locality> {
    Locality::new(SchedulerConfig::default().with_workers(workers)).unwrap()
}

/// Spins until `cond` holds, failing the test after five seconds.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::yield_now();
    }
}

/// A value source that always yields the same reference.
pub struct FixedSource(pub GlobalRef);

impl ValueSource for FixedSource {
    fn fetch_value(&self) -> BoxFuture<'static, Result<GlobalRef, CellError>> {
        Box::pin(future::ready(Ok(self.0)))
    }
}

/// Registers a [`FixedSource`] and returns its reference.
pub fn fixed_source(locality: &Locality, value: GlobalRef) -> GlobalRef {
    locality
        .registry()
        .register_source(Arc::new(FixedSource(value)))
}

/// Evaluator that answers `eval` from a script and tracks every buffer it hands out.
///
/// Once the script runs dry every further step is the last one.
pub struct ScriptedEvaluator {
    script: Mutex<VecDeque<bool>>,
    alloc_budget: Option<u64>,
    next: AtomicU64,
    live: Mutex<HashSet<GlobalRef>>,
    allocations: AtomicU64,
    frees: AtomicU64,
    evals: Mutex<Vec<(GlobalRef, Vec<GlobalRef>)>>,
}

impl ScriptedEvaluator {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            alloc_budget: None,
            next: AtomicU64::new(1 << 32),
            live: Mutex::new(HashSet::new()),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            evals: Mutex::new(Vec::new()),
        }
    }

    /// Steps that are not last, then a last one.
    pub fn steps(count: usize) -> Self {
        assert!(count > 0);
        Self::new((1..count).map(|_| false).chain([true]))
    }

    /// Lets only `budget` allocations succeed.
    pub fn with_alloc_budget(mut self, budget: u64) -> Self {
        self.alloc_budget = Some(budget);
        self
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> HashSet<GlobalRef> {
        self.live.lock().unwrap().clone()
    }

    /// `(result, inputs)` of every `eval`, in call order.
    pub fn evals(&self) -> Vec<(GlobalRef, Vec<GlobalRef>)> {
        self.evals.lock().unwrap().clone()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn alloc(&self) -> Result<GlobalRef, CellError> {
        if let Some(budget) = self.alloc_budget {
            if self.allocations.load(Ordering::SeqCst) >= budget {
                return Err(CellError::ResourceExhausted);
            }
        }
        let id = GlobalRef::from_raw(self.next.fetch_add(1, Ordering::SeqCst));
        self.live.lock().unwrap().insert(id);
        self.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn free(&self, value: GlobalRef) {
        assert!(self.live.lock().unwrap().remove(&value), "double free of {value}");
        self.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn eval(&self, result: GlobalRef, inputs: &[GlobalRef]) -> Result<bool, CellError> {
        self.evals.lock().unwrap().push((result, inputs.to_vec()));
        Ok(self.script.lock().unwrap().pop_front().unwrap_or(true))
    }
}
