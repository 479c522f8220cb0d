mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fixed_source, ScriptedEvaluator};
use proptest::prelude::*;
use stencil_flow::{block_on_timeout, GlobalRef, Locality, SchedulerConfig, StencilCell, TaskState};

/// Runs an `N`-port cell for `steps` steps with every output port read by the
/// cell's own inputs, and checks what `call` hands back.
fn run_cell<const N: usize>(workers: usize, steps: usize) -> Result<(), TestCaseError> {
    let locality = Locality::new(SchedulerConfig::default().with_workers(workers)).unwrap();
    let evaluator = Arc::new(ScriptedEvaluator::steps(steps));
    let evaluator_ref = locality.registry().register_evaluator(evaluator.clone());
    let seed = GlobalRef::from_raw(0x5eed);

    let cell = StencilCell::<N>::new(&locality);
    cell.connect_input_ports(&cell.get_output_ports()).unwrap();
    cell.set_functional_component(evaluator_ref).unwrap();

    let result = block_on_timeout(cell.call(seed), Duration::from_secs(10))
        .map_err(|elapsed| TestCaseError::fail(format!("call: {elapsed}")))?;
    let result = result.map_err(|err| TestCaseError::fail(format!("call: {err}")))?;

    let evals = evaluator.evals();
    prop_assert_eq!(evals.len(), steps);
    prop_assert_eq!(result, evals[steps - 1].0);
    prop_assert_eq!(cell.driver().map(|d| d.join()), Some(TaskState::Terminated));

    // The seed is never the cell's to free, so only the second buffer can be live.
    prop_assert_eq!(evaluator.allocations(), 1);
    let live = evaluator.live();
    if result == seed {
        prop_assert!(live.is_empty());
        prop_assert_eq!(evaluator.frees(), 1);
    } else {
        prop_assert_eq!(live.into_iter().collect::<Vec<_>>(), vec![result]);
        prop_assert_eq!(evaluator.frees(), 0);
    }
    prop_assert_eq!(result == seed, steps % 2 == 0);
    Ok(())
}

/// Same as [`run_cell`], with inputs bound to fixed sources and the ports
/// drained by a reader thread.
fn run_cell_with_fixed_inputs<const N: usize>(steps: usize) -> Result<(), TestCaseError> {
    let locality = Locality::new(SchedulerConfig::default().with_workers(2)).unwrap();
    let evaluator = Arc::new(ScriptedEvaluator::steps(steps));
    let evaluator_ref = locality.registry().register_evaluator(evaluator.clone());
    let seed = GlobalRef::from_raw(0x5eed);

    let cell = StencilCell::<N>::new(&locality);
    let inputs: [GlobalRef; N] =
        std::array::from_fn(|i| fixed_source(&locality, GlobalRef::from_raw(i as u64 + 1)));
    cell.connect_input_ports(&inputs).unwrap();
    cell.set_functional_component(evaluator_ref).unwrap();

    let result = std::thread::scope(|s| {
        // One reader thread per port keeps each port at one read per step.
        for port in cell.get_output_ports() {
            let locality = Arc::clone(&locality);
            let cell = Arc::clone(&cell);
            s.spawn(move || {
                for step in 0..steps as u64 {
                    while cell.step() < step {
                        std::thread::yield_now();
                    }
                    stencil_flow::block_on(locality.fetch().fetch(port)).unwrap();
                }
            });
        }
        block_on_timeout(cell.call(seed), Duration::from_secs(10))
    });
    let result = result
        .map_err(|elapsed| TestCaseError::fail(format!("call: {elapsed}")))?
        .map_err(|err| TestCaseError::fail(format!("call: {err}")))?;

    prop_assert_eq!(result, evaluator.evals()[steps - 1].0);
    let live = evaluator.live();
    prop_assert!(live.is_empty() || live.into_iter().collect::<Vec<_>>() == vec![result]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn test_call_returns_last_eval_and_balances_buffers(
        ports in prop::sample::select(vec![1usize, 3, 5]),
        steps in 1usize..=8,
        workers in 1usize..=3,
    ) {
        match ports {
            1 => run_cell::<1>(workers, steps)?,
            3 => run_cell::<3>(workers, steps)?,
            _ => run_cell::<5>(workers, steps)?,
        }
    }

    #[test]
    fn test_fixed_inputs_balance_buffers(
        ports in prop::sample::select(vec![1usize, 3, 5]),
        steps in 1usize..=8,
    ) {
        match ports {
            1 => run_cell_with_fixed_inputs::<1>(steps)?,
            3 => run_cell_with_fixed_inputs::<3>(steps)?,
            _ => run_cell_with_fixed_inputs::<5>(steps)?,
        }
    }
}
