//! Runs a periodic ring of 3-point averaging cells to completion.
//!
//! ```text
//! STENCIL_WORKERS=4 cargo run --example ring -- 16 100
//! ```
//!
//! Arguments: number of cells (default 8) and number of steps (default 20).

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use stencil_flow::{
    AveragingEvaluator, GlobalRef, Locality, Sample, SchedulerConfig, StencilCell, TaskState,
};
use tracing::{info, Level};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_thread_names(true)
        .init();

    let mut args = std::env::args().skip(1);
    let cells: usize = match args.next() {
        Some(arg) => arg.parse().context("cell count must be a number")?,
        None => 8,
    };
    let steps: u64 = match args.next() {
        Some(arg) => arg.parse().context("step count must be a number")?,
        None => 20,
    };
    if cells == 0 || steps == 0 {
        bail!("need at least one cell and one step");
    }

    let config = SchedulerConfig::from_env().context("reading scheduler configuration")?;
    info!(workers = config.workers, cells, steps, "starting ring");
    let locality = Locality::new(config)?;

    let evaluator = Arc::new(AveragingEvaluator::new(Arc::clone(locality.registry()), steps));
    let evaluator_ref = locality.registry().register_evaluator(evaluator.clone());

    let ring: Vec<Arc<StencilCell<3>>> = (0..cells).map(|_| StencilCell::new(&locality)).collect();
    for (i, cell) in ring.iter().enumerate() {
        let left = &ring[(i + cells - 1) % cells];
        let right = &ring[(i + 1) % cells];
        cell.connect_input_ports(&[
            left.get_output_ports()[0],
            cell.get_output_ports()[1],
            right.get_output_ports()[2],
        ])?;
        cell.set_functional_component(evaluator_ref)?;
    }

    // A single unit spike that diffuses around the ring.
    let started = Instant::now();
    let results = Arc::new(Mutex::new(vec![GlobalRef::INVALID; cells]));
    let mut callers = Vec::with_capacity(cells);
    for (i, cell) in ring.iter().enumerate() {
        let value = if i == 0 { 1.0 } else { 0.0 };
        let seed = evaluator.create(Sample { timestep: 0, value });
        let cell = Arc::clone(cell);
        let results = Arc::clone(&results);
        callers.push(locality.scheduler().spawn("ring::call", async move {
            match cell.call(seed).await {
                Ok(result) => {
                    if let Ok(mut results) = results.lock() {
                        results[i] = result;
                    }
                }
                Err(err) => tracing::error!(cell = i, error = %err, "cell failed"),
            }
            TaskState::Terminated
        })?);
    }
    for caller in callers {
        caller.join();
    }
    let elapsed = started.elapsed();

    let results = results
        .lock()
        .map_err(|_| anyhow::anyhow!("result table poisoned"))?
        .clone();
    let mut total = 0.0;
    for (i, result) in results.iter().enumerate() {
        let sample = evaluator
            .sample(*result)
            .with_context(|| format!("cell {i} produced no value"))?;
        total += sample.value;
        println!("cell {i:>3}  t={:<4} {:.6}", sample.timestep, sample.value);
    }
    println!("sum {total:.6}");

    info!(
        ?elapsed,
        evaluations = evaluator.evaluations(),
        allocations = evaluator.allocations(),
        frees = evaluator.frees(),
        "ring finished"
    );
    locality.shutdown();
    Ok(())
}
