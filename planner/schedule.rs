//! Decide which horizon length to try next.
//!
//! Every strategy reacts to the [`Outcome`] of the previous attempt
//! (`None` before the first one) and proposes a length, or `None`
//! once no candidate is left.

use std::collections::{BTreeSet, VecDeque};

use horizon_syntax::Step;
use horizon_tracer::{trace, Trace};

/// The result of one attempt at a horizon length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Satisfiable,
    Unsatisfiable,
    /// The solve call ran out of budget, or no model passed the check.
    Unknown,
    /// Grounding the length would exceed the memory limit.
    OutOfMemory,
}

pub trait Schedule {
    fn next(&mut self, outcome: Option<Outcome>) -> Option<Step>;
}

/// How a queue of lengths grows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Growth {
    /// `l + inc`
    Linear(Step),
    /// `max(l + 1, ⌈l · ratio⌉)`
    Geometric(f64),
}

impl Growth {
    fn grow(self, length: Step) -> Step {
        match self {
            Growth::Linear(inc) => length.saturating_add(inc),
            Growth::Geometric(ratio) => {
                let next = (length as f64 * ratio).ceil();
                let next = if next >= Step::MAX as f64 { Step::MAX } else { next as Step };
                next.max(length.saturating_add(1))
            }
        }
    }
}

/// Round-robin over a fixed-size queue of lengths: algorithm A with
/// linear growth, algorithm C with geometric growth.
#[derive(Clone, Debug)]
pub struct QueueScheduler {
    start: Step,
    size: usize,
    growth: Growth,
    limit: Step,
    propagate_unsat: bool,
    queue: VecDeque<Step>,
    last: Step,
    exhausted: BTreeSet<Step>,
    trace: Trace,
}

impl QueueScheduler {
    pub fn new(start: Step, size: usize, growth: Growth, limit: Step, propagate_unsat: bool, trace: Trace) -> Self {
        Self {
            start,
            size: size.max(1),
            growth,
            limit,
            propagate_unsat,
            queue: VecDeque::new(),
            last: start,
            exhausted: BTreeSet::new(),
            trace,
        }
    }

    pub fn queue(&self) -> impl Iterator<Item = Step> + '_ {
        self.queue.iter().copied()
    }

    fn fill(&mut self) {
        self.queue.clear();
        self.exhausted.clear();
        let mut length = self.start;
        for i in 0..self.size {
            if i > 0 {
                length = self.growth.grow(length);
            }
            if length <= self.limit {
                self.queue.push_back(length);
            }
        }
        self.last = length;
    }
}

impl Schedule for QueueScheduler {
    fn next(&mut self, outcome: Option<Outcome>) -> Option<Step> {
        match outcome {
            None => self.fill(),
            Some(Outcome::Satisfiable) => return None,
            Some(Outcome::Unsatisfiable) => {
                let current = self.queue.pop_front()?;
                self.exhausted.remove(&current);
                if self.propagate_unsat {
                    self.queue.retain(|&l| l >= current);
                }
                let next = self.growth.grow(self.last);
                if next <= self.limit && next > self.last {
                    self.last = next;
                    self.queue.push_back(next);
                }
            }
            Some(Outcome::Unknown) => {
                let current = self.queue.pop_front()?;
                self.exhausted.remove(&current);
                self.queue.push_back(current);
            }
            Some(Outcome::OutOfMemory) => {
                let current = self.queue.pop_front()?;
                self.exhausted.insert(current);
                self.queue.push_back(current);
                if self.queue.iter().all(|l| self.exhausted.contains(l)) {
                    trace!(self.trace, Schedule, "Every queued length is out of memory");
                    return None;
                }
            }
        }
        trace!(self.trace, Schedule, "Queue: {:?}", self.queue);
        self.queue.front().copied()
    }
}

/// A candidate length of the effort scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub index: usize,
    pub length: Step,
    /// How many times the run came back unknown.
    pub effort: u32,
    /// Whether the run is attempted this round.
    pub solve: bool,
    pub exhausted: bool,
}

impl Run {
    fn new(index: usize, length: Step) -> Self {
        Self {
            index,
            length,
            effort: 0,
            solve: true,
            exhausted: false,
        }
    }
}

/// Algorithm B: simulate a portfolio of runs on one solver. Runs
/// further from the leader get exponentially less effort.
#[derive(Clone, Debug)]
pub struct EffortScheduler {
    start: Step,
    inc: Step,
    limit: Step,
    size: usize,
    propagate_unsat: bool,
    gamma: f64,
    index: usize,
    runs: VecDeque<Run>,
    pending: Vec<Run>,
    trace: Trace,
}

impl EffortScheduler {
    pub fn new(
        start: Step,
        inc: Step,
        limit: Step,
        size: usize,
        propagate_unsat: bool,
        gamma: f64,
        trace: Trace,
    ) -> Self {
        Self {
            start,
            inc,
            limit,
            size: size.max(1),
            propagate_unsat,
            gamma,
            index: 0,
            runs: VecDeque::new(),
            pending: Vec::new(),
            trace,
        }
    }

    /// The effort a run at `index` is granted behind `leader`.
    fn share(&self, leader: &Run, index: usize) -> f64 {
        let distance = index.saturating_sub(leader.index) as i32;
        (leader.effort as f64 + 1.0) * self.gamma.powi(distance)
    }

    /// Does a run at `index` with `effort` deserve a turn behind `leader`?
    pub fn admits(&self, leader: &Run, index: usize, effort: u32) -> bool {
        (effort as f64) < self.share(leader, index) + 0.5
    }

    fn length(&self, index: usize) -> Step {
        let index = Step::try_from(index).unwrap_or(Step::MAX);
        self.start.saturating_add(self.inc.saturating_mul(index))
    }

    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter()
    }

    pub fn pending(&self) -> &[Run] {
        &self.pending
    }

    /// Refill the active pool from the pending runs, or with a fresh
    /// run when nothing is pending.
    fn refill(&mut self) -> Option<()> {
        let leader = if self.pending.is_empty() {
            let run = Run::new(self.index, self.length(self.index));
            self.index += 1;
            if run.length > self.limit {
                return None;
            }
            self.runs.push_back(run.clone());
            run
        } else {
            if self.pending.iter().all(|r| r.exhausted) {
                trace!(self.trace, Schedule, "Every pending run is out of memory");
                return None;
            }
            let mut pending = std::mem::take(&mut self.pending).into_iter();
            let mut leader = pending.next()?;
            leader.solve = true;
            self.runs.push_back(leader.clone());
            for mut run in pending {
                run.solve = self.admits(&leader, run.index, run.effort);
                self.runs.push_back(run);
            }
            leader
        };
        while self.share(&leader, self.index) > 0.5 && self.runs.len() < self.size {
            let length = self.length(self.index);
            if length > self.limit {
                break;
            }
            self.runs.push_back(Run::new(self.index, length));
            self.index += 1;
        }
        Some(())
    }
}

impl Schedule for EffortScheduler {
    fn next(&mut self, outcome: Option<Outcome>) -> Option<Step> {
        if let Some(outcome) = outcome {
            let mut current = self.runs.pop_front()?;
            match outcome {
                Outcome::Satisfiable => return None,
                Outcome::Unknown => {
                    current.effort += 1;
                    current.exhausted = false;
                    self.pending.push(current);
                }
                Outcome::OutOfMemory => {
                    current.exhausted = true;
                    self.pending.push(current);
                }
                Outcome::Unsatisfiable => {
                    if self.propagate_unsat {
                        self.pending.clear();
                    }
                }
            }
            while self.runs.front().map_or(false, |r| !r.solve) {
                if let Some(run) = self.runs.pop_front() {
                    self.pending.push(run);
                }
            }
        }
        if self.runs.is_empty() {
            self.refill()?;
        }
        trace!(
            self.trace,
            Schedule,
            "Runs: {}",
            self.runs
                .iter()
                .map(|r| format!("({},{},{},{})", r.index, r.length, r.effort, r.solve))
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.runs.front().map(|r| r.length)
    }
}

/// The configured strategy.
#[derive(Clone, Debug)]
pub enum Scheduler {
    Queue(QueueScheduler),
    Effort(EffortScheduler),
}

impl Schedule for Scheduler {
    fn next(&mut self, outcome: Option<Outcome>) -> Option<Step> {
        match self {
            Scheduler::Queue(s) => s.next(outcome),
            Scheduler::Effort(s) => s.next(outcome),
        }
    }
}
