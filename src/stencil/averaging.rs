//! An in-memory reference evaluator.
//!
//! Each buffer holds a [`Sample`]. Evaluating a step writes the mean of the
//! input values, stamped one timestep past the inputs, and reports the last
//! step once the configured number of steps has been reached. Inputs from
//! different timesteps mean the pipeline delivered out of order, which is
//! reported as [`CellError::Evaluation`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use super::evaluator::Evaluator;
use crate::error::CellError;
use crate::naming::{GlobalRef, Registry};

/// Contents of one value buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time step the value belongs to.
    pub timestep: u64,
    /// The value itself.
    pub value: f64,
}

/// Averaging evaluator backed by a buffer table.
pub struct AveragingEvaluator {
    registry: Arc<Registry>,
    steps: u64,
    capacity: Option<usize>,
    buffers: Mutex<HashMap<GlobalRef, Sample>>,
    allocations: AtomicU64,
    frees: AtomicU64,
    evaluations: AtomicU64,
}

impl AveragingEvaluator {
    /// Creates an evaluator that stops after `steps` steps. Buffer references
    /// are drawn from `registry`.
    pub fn new(registry: Arc<Registry>, steps: u64) -> Self {
        Self {
            registry,
            steps,
            capacity: None,
            buffers: Mutex::new(HashMap::new()),
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
        }
    }

    /// Limits the number of live buffers; `alloc` beyond it fails with
    /// [`CellError::ResourceExhausted`].
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Stores a seed buffer. Not counted as an allocation.
    pub fn create(&self, sample: Sample) -> GlobalRef {
        let id = self.registry.next_ref();
        self.table().insert(id, sample);
        id
    }

    /// Reads a buffer.
    pub fn sample(&self, value: GlobalRef) -> Option<Sample> {
        self.table().get(&value).copied()
    }

    /// Removes a seed or result buffer handed back by the cell.
    pub fn release(&self, value: GlobalRef) -> Option<Sample> {
        self.table().remove(&value)
    }

    /// Number of successful `alloc` calls.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of `free` calls that released a buffer.
    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    /// Number of `eval` calls.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Number of buffers currently stored, seeds included.
    pub fn live_buffers(&self) -> usize {
        self.table().len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<GlobalRef, Sample>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Evaluator for AveragingEvaluator {
    fn alloc(&self) -> Result<GlobalRef, CellError> {
        let mut table = self.table();
        if self.capacity.is_some_and(|cap| table.len() >= cap) {
            return Err(CellError::ResourceExhausted);
        }
        let id = self.registry.next_ref();
        table.insert(id, Sample::default());
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn free(&self, value: GlobalRef) {
        let removed = self.table().remove(&value).is_some();
        if removed {
            self.frees.fetch_add(1, Ordering::Relaxed);
        } else {
            error!(%value, "freed a buffer that is not live");
        }
        debug_assert!(removed, "double free of {value}");
    }

    fn eval(&self, result: GlobalRef, inputs: &[GlobalRef]) -> Result<bool, CellError> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let mut table = self.table();

        let mut timestep = None;
        let mut sum = 0.0;
        for input in inputs {
            let sample = table.get(input).ok_or(CellError::Unresolved(*input))?;
            match timestep {
                None => timestep = Some(sample.timestep),
                Some(t) if t != sample.timestep => {
                    return Err(CellError::Evaluation(format!(
                        "inputs span timesteps {t} and {}",
                        sample.timestep
                    )));
                }
                Some(_) => {}
            }
            sum += sample.value;
        }
        let timestep = timestep.unwrap_or(0) + 1;

        let slot = table.get_mut(&result).ok_or(CellError::Unresolved(result))?;
        #[allow(clippy::cast_precision_loss)]
        let count = inputs.len().max(1) as f64;
        *slot = Sample {
            timestep,
            value: sum / count,
        };
        trace!(%result, timestep, value = slot.value, "evaluated");
        Ok(timestep >= self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(steps: u64) -> AveragingEvaluator {
        AveragingEvaluator::new(Arc::new(Registry::new()), steps)
    }

    #[test]
    fn eval_writes_mean_one_step_ahead() {
        let eval = evaluator(5);
        let a = eval.create(Sample { timestep: 2, value: 1.0 });
        let b = eval.create(Sample { timestep: 2, value: 3.0 });
        let out = eval.alloc().unwrap();

        assert_eq!(eval.eval(out, &[a, b]), Ok(false));
        assert_eq!(eval.sample(out), Some(Sample { timestep: 3, value: 2.0 }));
    }

    #[test]
    fn last_step_is_reported() {
        let eval = evaluator(1);
        let a = eval.create(Sample { timestep: 0, value: 4.0 });
        let out = eval.alloc().unwrap();
        assert_eq!(eval.eval(out, &[a]), Ok(true));
    }

    #[test]
    fn mixed_timesteps_are_an_error() {
        let eval = evaluator(5);
        let a = eval.create(Sample { timestep: 0, value: 1.0 });
        let b = eval.create(Sample { timestep: 1, value: 1.0 });
        let out = eval.alloc().unwrap();
        assert!(matches!(eval.eval(out, &[a, b]), Err(CellError::Evaluation(_))));
    }

    #[test]
    fn capacity_limits_allocation() {
        let eval = evaluator(1).with_capacity(1);
        let first = eval.alloc().unwrap();
        assert_eq!(eval.alloc(), Err(CellError::ResourceExhausted));
        eval.free(first);
        assert!(eval.alloc().is_ok());
        assert_eq!(eval.allocations(), 2);
        assert_eq!(eval.frees(), 1);
    }

    #[test]
    fn seeds_are_not_allocations() {
        let eval = evaluator(1);
        let seed = eval.create(Sample::default());
        assert_eq!(eval.allocations(), 0);
        assert_eq!(eval.live_buffers(), 1);
        assert_eq!(eval.release(seed), Some(Sample::default()));
        assert_eq!(eval.live_buffers(), 0);
    }
}
