//! Search for a plan over growing horizon lengths.
//!
//! A compiled [`Template`](horizon_template::Template) is unrolled
//! step by step into one backend. A [`Scheduler`] picks the lengths
//! to try, and the [`Driver`] grounds, solves, and optionally checks
//! each attempt.

mod check;
mod driver;
mod memory;
mod options;
mod schedule;
mod stats;

use horizon_solver::SolveError;
use horizon_syntax::{Step, Symbol};
use horizon_template::{Answer, CompileError, InstantiateError};
use thiserror::Error;

pub use check::{BlockMode, ModelCheck, Retry, SequentialCheck, Verdict};
pub use driver::{Attempt, Driver, Event};
pub use memory::{Fixed, MemoryProbe, ProcStatus};
pub use options::{PlannerOptions, Strategy};
pub use schedule::{EffortScheduler, Growth, Outcome, QueueScheduler, Run, Schedule, Scheduler};
pub use stats::Stats;

#[derive(Clone, Debug, PartialEq)]
pub enum PlanResult {
    Found { length: Step, answer: Answer },
    /// The scheduler ran out of lengths.
    NotFound,
}

/// Errors that end a planner run.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("the template has no external labelled {0}")]
    MissingExternal(Symbol),
    #[error("cannot block {1} at step {0}: it is not shown")]
    Unshown(Step, Symbol),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Instantiate(#[from] InstantiateError),
    #[error(transparent)]
    Solve(#[from] SolveError),
}
