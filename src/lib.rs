//! # `stencil-flow` - pipelined stencil cells on cooperative tasks
//!
//! One node ("cell") of a distributed, time-stepped dataflow graph. Each cell
//! pulls values from up to `N` neighbors, computes a new value through an
//! externally supplied [`Evaluator`], and publishes it to up to `N`
//! consumers, repeating until the evaluator reports the last step.
//!
//! ## Architecture
//!
//! 1. **Counting semaphore** ([`CountingSemaphore`]):
//!    - `wait(n)` suspends the calling task until `n` permits can be taken at once
//!    - `signal(n)` returns permits and wakes satisfied waiters
//!
//! 2. **Cooperative scheduler** ([`Scheduler`]):
//!    - Futures multiplexed over a few work-stealing worker threads
//!    - A task gives up its worker only at a wait point
//!
//! 3. **Ports** ([`InPort`], [`OutPort`]):
//!    - Input ports start a remote fetch and later collect it
//!    - Output ports answer fetches through a [`FetchCurrent`] callback
//!
//! 4. **Stencil cell** ([`StencilCell`]):
//!    - Three-semaphore handshake over double-buffered storage
//!    - A driver task spawned exactly once when wiring completes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stencil_flow::{block_on, AveragingEvaluator, Locality, Sample, SchedulerConfig, StencilCell};
//!
//! let locality = Locality::new(SchedulerConfig::default().with_workers(2)).unwrap();
//! let evaluator = Arc::new(AveragingEvaluator::new(Arc::clone(locality.registry()), 4));
//! let evaluator_ref = locality.registry().register_evaluator(evaluator.clone());
//!
//! // A single cell that reads its own output.
//! let cell = StencilCell::<1>::new(&locality);
//! cell.connect_input_ports(&cell.get_output_ports()).unwrap();
//! cell.set_functional_component(evaluator_ref).unwrap();
//!
//! let seed = evaluator.create(Sample { timestep: 0, value: 1.5 });
//! let result = block_on(cell.call(seed)).unwrap();
//! assert_eq!(evaluator.sample(result), Some(Sample { timestep: 4, value: 1.5 }));
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod concurrency;
pub mod error;
pub mod locality;
pub mod naming;
pub mod stencil;
pub mod threads;

pub use concurrency::{AtomicGlobalRef, CountingSemaphore};
pub use error::{CellError, ConfigError, Elapsed, SchedulerError};
pub use locality::Locality;
pub use naming::{GlobalRef, Registry};
pub use stencil::{
    AveragingEvaluator, Evaluator, FetchCurrent, InPort, OutPort, Published, RemoteFetch, Sample,
    Seeding, StencilCell, ValueSource,
};
pub use threads::{
    block_on, block_on_timeout, current_task_id, Scheduler, SchedulerConfig, TaskHandle, TaskId,
    TaskState, WaitOutcome,
};

const _: () = {
    use core::mem;

    // A reference slot is exactly one atomic word.
    assert!(mem::size_of::<AtomicGlobalRef>() == mem::size_of::<u64>());
    assert!(mem::size_of::<GlobalRef>() == mem::size_of::<u64>());
};
