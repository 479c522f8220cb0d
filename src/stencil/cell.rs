//! The stencil cell: one node of a pipelined dataflow graph.
//!
//! # Protocol
//!
//! Three counting semaphores sequence a producer (the driver task) against the
//! `N` readers of its output ports:
//!
//! - `sem_in` (starts at `N`) counts readers that have finished with the
//!   currently published value
//! - `sem_out` (starts at `0`) counts reads the producer has released
//! - `sem_result` (starts at `0`) wakes the seeding caller once the driver exits
//!
//! The driver evaluates step `k + 1` into `backup` while readers may still be
//! draining step `k` from `current`, then waits for all `N` reads before the
//! two buffers swap roles. A fourth gate, `sem_seeded`, keeps the driver from
//! taking the preloaded `sem_in` permits before `call` has published the seed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, error, trace, warn, Instrument};

use super::evaluator::Evaluator;
use super::port::{BoxFuture, FetchCurrent, InPort, OutPort, Published, ValueSource};
use crate::concurrency::{AtomicGlobalRef, CountingSemaphore};
use crate::error::CellError;
use crate::locality::Locality;
use crate::naming::GlobalRef;
use crate::threads::task::{catch_unwind, panic_message};
use crate::threads::{TaskHandle, TaskState};

/// Description carried by every driver task.
pub const DRIVER_DESCRIPTION: &str = "stencil_value::main";

/// Where a cell's step-0 value comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seeding {
    /// An orchestrator supplies it through [`StencilCell::call`] and collects
    /// the final value the same way.
    #[default]
    External,
    /// No seed is published. The driver allocates its second buffer on the
    /// first step and frees both buffers when it exits; `call` is rejected.
    ///
    /// Inputs of such a cell must not depend on step-0 values of another
    /// driver-seeded cell, since none is ever published.
    Driver,
}

/// A cell with `N` input and `N` output ports.
///
/// Created unwired. Once every input port is bound and an evaluator is set,
/// the driver task is spawned exactly once and runs until the evaluator
/// reports the last step.
pub struct StencilCell<const N: usize> {
    id: GlobalRef,
    locality: Arc<Locality>,
    seeding: Seeding,
    in_ports: [InPort; N],
    out_ports: [Arc<OutPort>; N],
    sem_in: CountingSemaphore,
    sem_out: CountingSemaphore,
    sem_result: CountingSemaphore,
    sem_seeded: CountingSemaphore,
    current: AtomicGlobalRef,
    backup: AtomicGlobalRef,
    evaluator: AtomicGlobalRef,
    seed: AtomicGlobalRef,
    step: AtomicU64,
    seed_claimed: AtomicBool,
    driver_claimed: AtomicBool,
    wiring: Mutex<()>,
    driver: OnceLock<TaskHandle>,
    failure: Mutex<Option<CellError>>,
}

impl<const N: usize> StencilCell<N> {
    const HAS_PORTS: () = assert!(N > 0, "a stencil cell needs at least one port");

    /// Creates an externally seeded cell and registers its output ports.
    pub fn new(locality: &Arc<Locality>) -> Arc<Self> {
        Self::with_seeding(locality, Seeding::External)
    }

    /// Creates a cell with the given seeding mode.
    pub fn with_seeding(locality: &Arc<Locality>, seeding: Seeding) -> Arc<Self> {
        let () = Self::HAS_PORTS;
        let registry = locality.registry();

        let cell = Arc::new_cyclic(|weak: &Weak<Self>| {
            let producer: Weak<dyn FetchCurrent> = weak.clone();
            Self {
                id: registry.next_ref(),
                locality: Arc::clone(locality),
                seeding,
                in_ports: std::array::from_fn(|_| InPort::new()),
                out_ports: std::array::from_fn(|_| {
                    Arc::new(OutPort::new(registry.next_ref(), producer.clone()))
                }),
                sem_in: CountingSemaphore::new(N),
                sem_out: CountingSemaphore::new(0),
                sem_result: CountingSemaphore::new(0),
                sem_seeded: CountingSemaphore::new(0),
                current: AtomicGlobalRef::invalid(),
                backup: AtomicGlobalRef::invalid(),
                evaluator: AtomicGlobalRef::invalid(),
                seed: AtomicGlobalRef::invalid(),
                step: AtomicU64::new(0),
                seed_claimed: AtomicBool::new(false),
                driver_claimed: AtomicBool::new(false),
                wiring: Mutex::new(()),
                driver: OnceLock::new(),
                failure: Mutex::new(None),
            }
        });

        for port in &cell.out_ports {
            registry.bind_source(port.id(), Arc::clone(port) as Arc<dyn ValueSource>);
        }
        debug!(cell = %cell.id, ports = N, ?seeding, "cell created");
        cell
    }

    /// The reference naming this cell.
    #[inline]
    pub fn id(&self) -> GlobalRef {
        self.id
    }

    /// The cell's seeding mode.
    #[inline]
    pub fn seeding(&self) -> Seeding {
        self.seeding
    }

    /// The locality the cell runs in.
    #[inline]
    pub fn locality(&self) -> &Arc<Locality> {
        &self.locality
    }

    /// References of the output ports, in port order.
    ///
    /// Fixed at construction; wiring never changes them.
    pub fn get_output_ports(&self) -> [GlobalRef; N] {
        std::array::from_fn(|i| self.out_ports[i].id())
    }

    /// Binds input port `i` to `refs[i]`.
    ///
    /// Spawns the driver if an evaluator is already set. References beyond
    /// the first `N` are ignored.
    pub fn connect_input_ports(self: &Arc<Self>, refs: &[GlobalRef]) -> Result<(), CellError> {
        if refs.len() < N {
            warn!(cell = %self.id, expected = N, supplied = refs.len(), "too few input bindings");
            return Err(CellError::InsufficientBindings {
                expected: N,
                supplied: refs.len(),
            });
        }
        if refs[..N].iter().any(|r| !r.is_valid()) {
            warn!(cell = %self.id, "input binding to an invalid reference");
            return Err(CellError::InvalidState("input ports must be bound to valid references"));
        }

        let _wiring = self.wiring.lock().unwrap_or_else(PoisonError::into_inner);
        if self.driver_claimed.load(Ordering::SeqCst) {
            warn!(cell = %self.id, "rewiring a running cell");
            return Err(CellError::InvalidState("cell is already running"));
        }

        for (port, &remote) in self.in_ports.iter().zip(refs) {
            port.connect(remote);
        }
        debug!(cell = %self.id, inputs = ?&refs[..N], "input ports connected");
        self.try_start()
    }

    /// Assigns the evaluator, which must already be registered.
    ///
    /// Spawns the driver if every input port is already bound.
    pub fn set_functional_component(self: &Arc<Self>, evaluator: GlobalRef) -> Result<(), CellError> {
        if let Err(err) = self.locality.registry().resolve_evaluator(evaluator) {
            warn!(cell = %self.id, %evaluator, "unknown evaluator");
            return Err(err);
        }

        let _wiring = self.wiring.lock().unwrap_or_else(PoisonError::into_inner);
        if self.driver_claimed.load(Ordering::SeqCst) {
            warn!(cell = %self.id, "replacing the evaluator of a running cell");
            return Err(CellError::InvalidState("cell is already running"));
        }

        self.evaluator.store(evaluator, Ordering::SeqCst);
        debug!(cell = %self.id, %evaluator, "functional component set");
        self.try_start()
    }

    /// Spawns the driver once both wiring preconditions hold.
    ///
    /// Called with the wiring lock held, so the running check, the bindings
    /// and the claim happen as one step; the flag admits exactly one spawn.
    fn try_start(self: &Arc<Self>) -> Result<(), CellError> {
        if !self.evaluator.is_set(Ordering::SeqCst) || !self.in_ports.iter().all(InPort::is_bound) {
            return Ok(());
        }
        if self
            .driver_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let span = debug_span!("stencil_driver", cell = %self.id);
        let driver = Arc::clone(self).main().instrument(span);
        match self.locality.scheduler().spawn(DRIVER_DESCRIPTION, driver) {
            Ok(handle) => {
                debug!(cell = %self.id, task = %handle.id(), "driver spawned");
                let _ = self.driver.set(handle);
                Ok(())
            }
            Err(err) => {
                error!(cell = %self.id, error = %err, "driver could not be spawned");
                self.record_failure(err.clone());
                self.sem_result.signal(1);
                Err(err)
            }
        }
    }

    /// Seeds the cell with `initial` and waits for the final value.
    ///
    /// Allowed once per externally seeded cell, after wiring is complete. The
    /// caller keeps ownership of `initial` and owns the returned buffer.
    pub async fn call(&self, initial: GlobalRef) -> Result<GlobalRef, CellError> {
        if self.seeding == Seeding::Driver {
            return Err(CellError::InvalidState("cell seeds itself"));
        }
        if !initial.is_valid() {
            return Err(CellError::InvalidState("initial value must be a valid reference"));
        }
        if !self.driver_claimed.load(Ordering::Acquire) {
            warn!(cell = %self.id, "call before wiring completed");
            return Err(CellError::InvalidState("cell is not fully wired"));
        }
        if self.seed_claimed.swap(true, Ordering::AcqRel) {
            warn!(cell = %self.id, "call made twice");
            return Err(CellError::InvalidState("call may only be made once"));
        }

        self.sem_in.wait(N).await;
        self.seed.store(initial, Ordering::Release);
        let previous = self.current.swap(initial, Ordering::AcqRel);
        debug_assert!(!previous.is_valid(), "seeded a cell that already publishes");
        debug!(cell = %self.id, value = %initial, "seeded");
        self.sem_out.signal(N);
        self.sem_seeded.signal(1);

        self.sem_result.wait(1).await;
        let result = self.current.take(Ordering::AcqRel);
        match self.failure() {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Waits for the published value and counts this as one read of it.
    ///
    /// Each output port must read exactly once per published step.
    pub async fn get_value(&self) -> GlobalRef {
        self.read_current().await.value
    }

    async fn read_current(&self) -> Published {
        self.sem_out.wait(1).await;
        let published = Published {
            value: self.current.load(Ordering::Acquire),
            step: self.step.load(Ordering::Acquire),
        };
        self.sem_in.signal(1);
        trace!(cell = %self.id, step = published.step, value = %published.value, "read");
        published
    }

    async fn main(self: Arc<Self>) -> TaskState {
        debug!("driver started");
        let mut seeded = self.seeding == Seeding::Driver;
        let outcome = match self
            .locality
            .registry()
            .resolve_evaluator(self.evaluator.load(Ordering::Acquire))
        {
            Ok(evaluator) => {
                let outcome = catch_unwind(self.step_until_last(&*evaluator, &mut seeded))
                    .await
                    .unwrap_or_else(|payload| {
                        Err(CellError::Panicked(panic_message(&*payload).to_owned()))
                    });
                self.release_buffers(&*evaluator, outcome.is_err(), seeded);
                outcome
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(steps) => debug!(steps, "driver finished"),
            Err(err) => {
                error!(error = %err, "driver failed");
                self.record_failure(err);
            }
        }
        self.sem_result.signal(1);
        TaskState::Terminated
    }

    async fn step_until_last(&self, evaluator: &dyn Evaluator, seeded: &mut bool) -> Result<u64, CellError> {
        self.backup.store(evaluator.alloc()?, Ordering::Release);
        let mut inputs = [GlobalRef::INVALID; N];

        loop {
            for port in &self.in_ports {
                port.acquire(self.locality.scheduler(), self.locality.fetch())?;
            }
            for (input, port) in inputs.iter_mut().zip(&self.in_ports) {
                *input = port.get().await?;
            }

            let next = self.backup.load(Ordering::Acquire);
            let is_last = evaluator.eval(next, &inputs)?;

            if !*seeded {
                self.sem_seeded.wait(1).await;
                *seeded = true;
            }
            self.sem_in.wait(N).await;

            let mut previous = self.current.load(Ordering::Acquire);
            if !previous.is_valid() {
                previous = evaluator.alloc()?;
                debug!(value = %previous, "allocated second buffer");
            }
            self.current.store(next, Ordering::Release);
            self.backup.store(previous, Ordering::Release);
            let step = self.step.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(step, value = %next, last = is_last, "published");
            self.sem_out.signal(N);

            if is_last {
                return Ok(step);
            }
        }
    }

    /// Frees the buffers the driver owns on exit. The seed is never freed, and
    /// on success an externally seeded cell leaves `current` to `call`.
    fn release_buffers(&self, evaluator: &dyn Evaluator, failed: bool, seeded: bool) {
        let seed = self.seed.load(Ordering::Acquire);
        let owned = |value: GlobalRef| value.is_valid() && value != seed;

        let backup = self.backup.take(Ordering::AcqRel);
        if owned(backup) {
            evaluator.free(backup);
        }
        if seeded && (failed || self.seeding == Seeding::Driver) {
            let current = self.current.take(Ordering::AcqRel);
            if owned(current) {
                evaluator.free(current);
            }
        }
    }

    fn record_failure(&self, err: CellError) {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(err);
    }

    /// The error that stopped the driver, if any.
    pub fn failure(&self) -> Option<CellError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle of the driver task, once spawned.
    pub fn driver(&self) -> Option<&TaskHandle> {
        self.driver.get()
    }

    /// Number of steps published by the driver so far.
    pub fn step(&self) -> u64 {
        self.step.load(Ordering::Acquire)
    }
}

impl<const N: usize> FetchCurrent for StencilCell<N> {
    fn fetch_current(&self) -> BoxFuture<'_, Published> {
        Box::pin(self.read_current())
    }
}

impl<const N: usize> Drop for StencilCell<N> {
    fn drop(&mut self) {
        let registry = self.locality.registry();
        for port in &self.out_ports {
            registry.unregister(port.id());
        }
    }
}

impl<const N: usize> fmt::Debug for StencilCell<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StencilCell")
            .field("id", &self.id)
            .field("ports", &N)
            .field("seeding", &self.seeding)
            .field("step", &self.step())
            .field("current", &self.current)
            .field("backup", &self.backup)
            .field("driver", &self.driver.get().map(TaskHandle::id))
            .finish_non_exhaustive()
    }
}
