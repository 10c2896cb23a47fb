//! Run the scheduler against one incrementally grown program.
//!
//! Two externals of the template steer the unrolled program. `query`
//! marks the step where the goal must hold and is true at exactly one
//! step per solve call. `skip`, when the template has it, forbids
//! actions at a step; it lets one grounding answer shorter lengths.

use std::time::Instant;

use horizon_solver::{Backend, SolveResult};
use horizon_syntax::{ExternalValue, Rule, Step, Symbol};
use horizon_template::{Answer, ExternalHandle, Instantiator, Template};
use horizon_tracer::{trace, Trace};

use crate::check::{ModelCheck, Retry, Verdict};
use crate::memory::MemoryProbe;
use crate::options::PlannerOptions;
use crate::schedule::{Outcome, Schedule, Scheduler};
use crate::stats::Stats;
use crate::{PlanError, PlanResult};

/// What the driver reports while it runs.
#[derive(Clone, Debug, PartialEq)]
pub enum Event<'a> {
    Solving { iteration: usize, length: Step },
    Model { length: Step, answer: &'a Answer },
    Rejected { length: Step, atoms: &'a [(Step, Symbol)] },
    Outcome { length: Step, outcome: Outcome },
}

/// The result of one attempt at a length.
#[derive(Clone, Debug, PartialEq)]
pub struct Attempt {
    pub length: Step,
    pub outcome: Outcome,
    pub answer: Option<Answer>,
}

impl Attempt {
    fn new(length: Step, outcome: Outcome) -> Self {
        Self {
            length,
            outcome,
            answer: None,
        }
    }
}

pub struct Driver<B, P> {
    backend: B,
    instantiator: Instantiator,
    scheduler: Scheduler,
    probe: P,
    check: Option<Box<dyn ModelCheck>>,
    retry: Retry,
    memory_limit: Option<u64>,
    step_memory: u64,
    query: ExternalHandle,
    skip: Option<ExternalHandle>,
    marker: Option<Step>,
    stats: Stats,
    trace: Trace,
}

impl<B: Backend, P: MemoryProbe> Driver<B, P> {
    pub fn new(
        template: Template,
        backend: B,
        probe: P,
        options: &PlannerOptions,
        trace: Trace,
    ) -> Result<Self, PlanError> {
        let query = template
            .external(&options.query)
            .ok_or_else(|| PlanError::MissingExternal(options.query.clone()))?;
        let skip = template.external(&options.skip);
        trace!(
            trace,
            Schedule,
            "Query handle {}, skip handle {:?}",
            query.index(),
            skip.map(|s| s.index())
        );
        Ok(Self {
            backend,
            instantiator: Instantiator::new(template, trace),
            scheduler: options.scheduler(trace),
            probe,
            check: None,
            retry: options.retry,
            memory_limit: options.memory_limit,
            step_memory: options.step_memory,
            query,
            skip,
            marker: None,
            stats: Stats::default(),
            trace,
        })
    }

    /// Check every model before accepting it.
    pub fn with_check(mut self, check: Box<dyn ModelCheck>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// How many steps are grounded.
    pub fn steps(&self) -> Step {
        self.instantiator.steps()
    }

    /// Ask the scheduler for lengths until one is satisfiable or
    /// none is left.
    pub fn run(&mut self, mut on_event: impl FnMut(Event)) -> Result<PlanResult, PlanError> {
        let mut outcome = None;
        loop {
            let Some(length) = self.scheduler.next(outcome) else {
                return Ok(PlanResult::NotFound);
            };
            self.stats.iterations += 1;
            on_event(Event::Solving {
                iteration: self.stats.iterations,
                length,
            });
            let attempt = self.attempt(length, &mut on_event)?;
            on_event(Event::Outcome {
                length: attempt.length,
                outcome: attempt.outcome,
            });
            if let (Outcome::Satisfiable, Some(answer)) = (attempt.outcome, attempt.answer) {
                return Ok(PlanResult::Found {
                    length: attempt.length,
                    answer,
                });
            }
            outcome = Some(attempt.outcome);
        }
    }

    /// Solve for a plan of exactly `length` steps, grounding more
    /// steps if needed and the memory limit admits them.
    pub fn attempt(&mut self, length: Step, on_event: &mut dyn FnMut(Event)) -> Result<Attempt, PlanError> {
        // Without a skip external every grounded step must be used.
        let length = if length == 0 && self.skip.is_none() { 1 } else { length };
        let target = length.max(1);
        let grounded = self.instantiator.steps();
        if target > grounded {
            let added = u64::from(target - grounded);
            let usage = self.probe.usage();
            self.stats.memory = self.stats.memory.max(usage);
            if let Some(limit) = self.memory_limit {
                let estimate = usage.saturating_add(self.step_memory.saturating_mul(added));
                if estimate > limit {
                    trace!(
                        self.trace,
                        Schedule,
                        "Length {}: {}MB projected, {}MB allowed",
                        length,
                        estimate,
                        limit
                    );
                    self.stats.out_of_memory += 1;
                    return Ok(Attempt::new(length, Outcome::OutOfMemory));
                }
            }
            let clock = Instant::now();
            self.instantiator.ground(&mut self.backend, grounded + 1, target)?;
            self.stats.grounding += clock.elapsed();
            let after = self.probe.usage();
            self.stats.memory = self.stats.memory.max(after);
            self.step_memory = self.step_memory.max(after.saturating_sub(usage) / added);
            self.move_query(target)?;
            self.stats.steps = target;
        }
        self.stats.rules = self.backend.rule_count();

        let grounded = self.instantiator.steps();
        let masked = length < grounded;
        if masked {
            self.mask(length, grounded, true)?;
        }
        let attempt = self.solve(length, on_event);
        if masked {
            self.mask(length, grounded, false)?;
        }
        attempt
    }

    fn move_query(&mut self, target: Step) -> Result<(), PlanError> {
        if let Some(old) = self.marker {
            if self.skip.is_some() {
                self.instantiator
                    .release_external(&mut self.backend, old, self.query)?;
            } else {
                self.instantiator
                    .assign_external(old, self.query, ExternalValue::False)?;
            }
        }
        self.instantiator
            .assign_external(target, self.query, ExternalValue::True)?;
        self.marker = Some(target);
        Ok(())
    }

    /// Hide the grounded steps beyond `length`, or show them again.
    fn mask(&mut self, length: Step, grounded: Step, hide: bool) -> Result<(), PlanError> {
        let (on, off) = if hide {
            (ExternalValue::True, ExternalValue::False)
        } else {
            (ExternalValue::False, ExternalValue::True)
        };
        match self.skip {
            Some(skip) => {
                for step in length + 1..=grounded {
                    self.instantiator.assign_external(step, skip, on)?;
                }
            }
            None => {
                let marker = self.marker.unwrap_or(grounded);
                self.instantiator.assign_external(marker, self.query, off)?;
                self.instantiator.assign_external(length, self.query, on)?;
            }
        }
        Ok(())
    }

    fn solve(&mut self, length: Step, on_event: &mut dyn FnMut(Event)) -> Result<Attempt, PlanError> {
        let mut retries = 0;
        loop {
            let clock = Instant::now();
            let result = self.backend.solve(&self.instantiator.assumptions())?;
            self.stats.solving += clock.elapsed();
            self.stats.solves += 1;
            let model = match result {
                SolveResult::Satisfiable(model) => model,
                SolveResult::Unsatisfiable => return Ok(Attempt::new(length, Outcome::Unsatisfiable)),
                SolveResult::Unknown => return Ok(Attempt::new(length, Outcome::Unknown)),
            };
            let answer = self.instantiator.answer(&model, length);
            let verdict = match self.check.as_mut() {
                Some(check) => check.check(&answer, length),
                None => Verdict::Accept,
            };
            let atoms = match verdict {
                Verdict::Accept => {
                    on_event(Event::Model {
                        length,
                        answer: &answer,
                    });
                    return Ok(Attempt {
                        length,
                        outcome: Outcome::Satisfiable,
                        answer: Some(answer),
                    });
                }
                Verdict::Reject(atoms) => atoms,
            };
            on_event(Event::Rejected {
                length,
                atoms: &atoms,
            });
            self.stats.rejected += 1;
            if atoms.is_empty() {
                return Ok(Attempt::new(length, Outcome::Unknown));
            }
            self.block(&atoms)?;
            if retries >= self.retry.attempts() {
                trace!(self.trace, Check, "Giving up on length {} after {} retries", length, retries);
                return Ok(Attempt::new(length, Outcome::Unknown));
            }
            retries += 1;
        }
    }

    /// Forbid the atoms from holding together again.
    fn block(&mut self, atoms: &[(Step, Symbol)]) -> Result<(), PlanError> {
        let body = atoms
            .iter()
            .map(|(step, label)| {
                self.instantiator
                    .output_literal(*step, label)
                    .ok_or_else(|| PlanError::Unshown(*step, label.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.backend.add_rule(Rule::constraint(body))?;
        Ok(())
    }
}
