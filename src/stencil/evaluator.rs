//! The functional component a cell drives.

use crate::error::CellError;
use crate::naming::GlobalRef;

/// Allocation and evaluation capability supplied to a cell.
///
/// The cell never looks inside a buffer; it only passes references back to the
/// evaluator that produced them and decides, by convention, who frees what.
pub trait Evaluator: Send + Sync {
    /// Allocates a fresh value buffer.
    ///
    /// Fails with [`CellError::ResourceExhausted`] when nothing is left.
    fn alloc(&self) -> Result<GlobalRef, CellError>;

    /// Releases a buffer obtained from [`alloc`](Self::alloc).
    ///
    /// Freeing the same buffer twice is a contract violation.
    fn free(&self, value: GlobalRef);

    /// Computes one time step into `result` from `inputs` (in port order).
    ///
    /// Returns `true` when this was the final step.
    fn eval(&self, result: GlobalRef, inputs: &[GlobalRef]) -> Result<bool, CellError>;
}
