use std::time::Duration;

use horizon_solver::Limit;
use horizon_syntax::{Step, Symbol};
use horizon_tracer::Trace;

use crate::check::Retry;
use crate::schedule::{EffortScheduler, Growth, QueueScheduler, Scheduler};

/// Which horizon scheduler to run, with its parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Strategy {
    /// Algorithm A: a queue of `size` lengths spaced by the increment.
    Linear { size: usize },
    /// Algorithm B: an effort portfolio decaying by `gamma`.
    Effort { gamma: f64 },
    /// Algorithm C: a queue of lengths growing by `ratio`.
    Geometric { ratio: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannerOptions {
    pub strategy: Strategy,
    /// Pool size of algorithm B and queue size of algorithm C.
    pub processes: usize,
    pub inc: Step,
    pub start: Step,
    pub limit: Step,
    /// Drop shorter lengths once a length is unsatisfiable.
    pub propagate_unsat: bool,

    /// Decisions per restart and restarts per solve call.
    pub conflicts_per_restart: u64,
    pub restarts_per_solve: u64,
    pub time_limit: Option<Duration>,

    /// In MB; `None` admits every extension.
    pub memory_limit: Option<u64>,
    /// Initial estimate of the memory one step costs, in MB.
    pub step_memory: u64,

    pub query: Symbol,
    pub skip: Symbol,
    pub retry: Retry,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Effort { gamma: 0.9 },
            processes: 20,
            inc: 5,
            start: 0,
            limit: 3000,
            propagate_unsat: true,
            conflicts_per_restart: 60,
            restarts_per_solve: 100,
            time_limit: None,
            memory_limit: None,
            step_memory: 0,
            query: Symbol::constant("query"),
            skip: Symbol::constant("skip"),
            retry: Retry::Once,
        }
    }
}

impl PlannerOptions {
    pub fn scheduler(&self, trace: Trace) -> Scheduler {
        match self.strategy {
            Strategy::Linear { size } => Scheduler::Queue(QueueScheduler::new(
                self.start,
                size,
                Growth::Linear(self.inc),
                self.limit,
                self.propagate_unsat,
                trace,
            )),
            Strategy::Effort { gamma } => Scheduler::Effort(EffortScheduler::new(
                self.start,
                self.inc,
                self.limit,
                self.processes,
                self.propagate_unsat,
                gamma,
                trace,
            )),
            Strategy::Geometric { ratio } => Scheduler::Queue(QueueScheduler::new(
                self.start,
                self.processes,
                Growth::Geometric(ratio),
                self.limit,
                self.propagate_unsat,
                trace,
            )),
        }
    }

    /// The search budget of one solve call. A restart count of 0
    /// leaves the decisions unbounded.
    pub fn solve_limit(&self) -> Limit {
        let decisions = match (self.conflicts_per_restart, self.restarts_per_solve) {
            (_, 0) | (0, _) => None,
            (c, r) => Some(c.saturating_mul(r)),
        };
        Limit {
            decisions,
            time: self.time_limit,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::Schedule;

    #[test]
    fn defaults() {
        let options = PlannerOptions::default();
        assert_eq!(options.strategy, Strategy::Effort { gamma: 0.9 });
        assert_eq!(options.solve_limit().decisions, Some(6000));
        let mut scheduler = options.scheduler(Trace::none());
        assert_eq!(scheduler.next(None), Some(0));
        assert_eq!(scheduler.next(Some(crate::Outcome::Unsatisfiable)), Some(5));

        let options = PlannerOptions {
            strategy: Strategy::Geometric { ratio: 2.0 },
            start: 1,
            restarts_per_solve: 0,
            ..Default::default()
        };
        assert_eq!(options.solve_limit().decisions, None);
        let mut scheduler = options.scheduler(Trace::none());
        assert_eq!(scheduler.next(None), Some(1));
        assert_eq!(scheduler.next(Some(crate::Outcome::Unsatisfiable)), Some(2));
    }
}
