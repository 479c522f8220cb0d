//! Input and output ports: the per-neighbor connection points of a cell.
//!
//! Input ports pull values from a remote source; output ports are pulled from.
//! Neither kind ever owns a value buffer: a reader only gets transient,
//! read-only access to whatever reference the producer is publishing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{error, trace};

use crate::concurrency::{AtomicGlobalRef, CountingSemaphore};
use crate::error::CellError;
use crate::naming::GlobalRef;
use crate::threads::{Scheduler, TaskState};

/// An owned, type-erased future that can move between worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The value a producer is currently publishing, tagged with its time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Reference to the published buffer.
    pub value: GlobalRef,
    /// Step that produced it; `0` is the externally seeded value.
    pub step: u64,
}

/// Callback an output port uses to obtain its producer's current value.
///
/// Implemented by the owning cell. The future completes once a value is
/// readable and counts as that port's single read of the step.
pub trait FetchCurrent: Send + Sync {
    /// Waits for and returns the current value.
    fn fetch_current(&self) -> BoxFuture<'_, Published>;
}

/// Something an input port can pull a value from.
pub trait ValueSource: Send + Sync {
    /// Starts a fetch; the future resolves to the fetched reference.
    fn fetch_value(&self) -> BoxFuture<'static, Result<GlobalRef, CellError>>;
}

/// Remote-fetch capability consumed by input ports.
pub trait RemoteFetch: Send + Sync {
    /// Starts fetching the value behind `remote`.
    fn fetch(&self, remote: GlobalRef) -> BoxFuture<'static, Result<GlobalRef, CellError>>;
}

/// One-shot slot holding the result of an in-flight fetch.
struct FetchSlot {
    value: Mutex<Option<Result<GlobalRef, CellError>>>,
    ready: CountingSemaphore,
}

impl FetchSlot {
    fn fill(&self, result: Result<GlobalRef, CellError>) {
        let previous = self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(result);
        debug_assert!(previous.is_none(), "fetch completed twice without a get");
        self.ready.signal(1);
    }
}

/// The receiving end of a neighbor connection.
pub struct InPort {
    remote: AtomicGlobalRef,
    pending: Arc<FetchSlot>,
}

impl InPort {
    /// Creates an unbound port.
    pub fn new() -> Self {
        Self {
            remote: AtomicGlobalRef::invalid(),
            pending: Arc::new(FetchSlot {
                value: Mutex::new(None),
                ready: CountingSemaphore::new(0),
            }),
        }
    }

    /// Binds the port to a remote value source.
    pub fn connect(&self, remote: GlobalRef) {
        self.remote.store(remote, Ordering::SeqCst);
    }

    /// Returns `true` once the port has been bound to a valid reference.
    pub fn is_bound(&self) -> bool {
        self.remote.is_set(Ordering::SeqCst)
    }

    /// The bound remote reference, or [`GlobalRef::INVALID`].
    pub fn remote(&self) -> GlobalRef {
        self.remote.load(Ordering::SeqCst)
    }

    /// Kicks off a fetch of the remote value without waiting for it.
    ///
    /// The fetch runs as its own task; [`get`](Self::get) collects the result.
    pub fn acquire(&self, scheduler: &Scheduler, fetch: &dyn RemoteFetch) -> Result<(), CellError> {
        let remote = self.remote();
        if !remote.is_valid() {
            return Err(CellError::InvalidState("input port is not bound"));
        }
        let request = fetch.fetch(remote);
        let slot = Arc::clone(&self.pending);
        scheduler.spawn("stencil_value::in_port::acquire", async move {
            slot.fill(request.await);
            TaskState::Terminated
        })?;
        Ok(())
    }

    /// Waits for the fetch started by [`acquire`](Self::acquire) and returns its value.
    pub async fn get(&self) -> Result<GlobalRef, CellError> {
        self.pending.ready.wait(1).await;
        self.pending
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(Err(CellError::InvalidState("fetch finished without a value")))
    }
}

impl Default for InPort {
    fn default() -> Self {
        Self::new()
    }
}

const NO_STEP: u64 = u64::MAX;

/// The publishing end of a neighbor connection.
///
/// Holds only a weak association to its producer, so a registered port never
/// keeps a cell alive.
pub struct OutPort {
    id: GlobalRef,
    producer: Weak<dyn FetchCurrent>,
    last_step: Arc<AtomicU64>,
}

impl OutPort {
    /// Creates a port named `id` that reads through `producer`.
    pub fn new(id: GlobalRef, producer: Weak<dyn FetchCurrent>) -> Self {
        Self {
            id,
            producer,
            last_step: Arc::new(AtomicU64::new(NO_STEP)),
        }
    }

    /// The reference under which this port is reachable.
    #[inline]
    pub fn id(&self) -> GlobalRef {
        self.id
    }
}

impl ValueSource for OutPort {
    fn fetch_value(&self) -> BoxFuture<'static, Result<GlobalRef, CellError>> {
        let id = self.id;
        let producer = self.producer.clone();
        let last_step = Arc::clone(&self.last_step);
        Box::pin(async move {
            let producer = producer.upgrade().ok_or(CellError::Unresolved(id))?;
            let published = producer.fetch_current().await;
            let previous = last_step.swap(published.step, Ordering::AcqRel);
            if previous == published.step {
                error!(port = %id, step = published.step, "output port delivered the same step twice");
                debug_assert_ne!(previous, published.step, "exactly-once delivery violated");
            }
            trace!(port = %id, step = published.step, value = %published.value, "delivered");
            Ok(published.value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::{block_on, SchedulerConfig};
    use std::future;

    struct Fixed(GlobalRef);

    impl RemoteFetch for Fixed {
        fn fetch(&self, _remote: GlobalRef) -> BoxFuture<'static, Result<GlobalRef, CellError>> {
            Box::pin(future::ready(Ok(self.0)))
        }
    }

    struct Stepping {
        step: AtomicU64,
    }

    impl FetchCurrent for Stepping {
        fn fetch_current(&self) -> BoxFuture<'_, Published> {
            let step = self.step.fetch_add(1, Ordering::SeqCst);
            Box::pin(future::ready(Published {
                value: GlobalRef::from_raw(100 + step),
                step,
            }))
        }
    }

    #[test]
    fn unbound_port_refuses_acquire() {
        let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(1)).unwrap();
        let port = InPort::new();
        assert!(!port.is_bound());
        assert_eq!(
            port.acquire(&scheduler, &Fixed(GlobalRef::from_raw(1))),
            Err(CellError::InvalidState("input port is not bound"))
        );
    }

    #[test]
    fn acquire_then_get_yields_fetched_value() {
        let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(1)).unwrap();
        let port = InPort::new();
        port.connect(GlobalRef::from_raw(9));
        assert!(port.is_bound());

        let value = GlobalRef::from_raw(42);
        for _ in 0..3 {
            port.acquire(&scheduler, &Fixed(value)).unwrap();
            assert_eq!(block_on(port.get()), Ok(value));
        }
    }

    #[test]
    fn out_port_reads_through_producer() {
        let producer: Arc<dyn FetchCurrent> = Arc::new(Stepping {
            step: AtomicU64::new(0),
        });
        let port = OutPort::new(GlobalRef::from_raw(5), Arc::downgrade(&producer));
        assert_eq!(block_on(port.fetch_value()), Ok(GlobalRef::from_raw(100)));
        assert_eq!(block_on(port.fetch_value()), Ok(GlobalRef::from_raw(101)));
    }

    #[test]
    fn out_port_without_producer_is_unresolved() {
        let producer: Arc<dyn FetchCurrent> = Arc::new(Stepping {
            step: AtomicU64::new(0),
        });
        let port = OutPort::new(GlobalRef::from_raw(5), Arc::downgrade(&producer));
        drop(producer);
        assert_eq!(
            block_on(port.fetch_value()),
            Err(CellError::Unresolved(GlobalRef::from_raw(5)))
        );
    }
}
