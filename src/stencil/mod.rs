//! Stencil cells and the pieces they are wired from.
//!
//! A [`StencilCell`] owns `N` input ports that pull neighbor values, `N`
//! output ports that neighbors pull from, and a driver task that steps an
//! [`Evaluator`] until it reports the last step.

pub mod averaging;
pub mod cell;
pub mod evaluator;
pub mod port;

pub use averaging::{AveragingEvaluator, Sample};
pub use cell::{Seeding, StencilCell, DRIVER_DESCRIPTION};
pub use evaluator::Evaluator;
pub use port::{BoxFuture, FetchCurrent, InPort, OutPort, Published, RemoteFetch, ValueSource};
