//! Stamp a [`Template`] into a [`Backend`] one step at a time.
//!
//! The backend only ever grows. Per-step externals are switched
//! through assumptions; releasing one asserts a constraint instead of
//! retracting anything.

use std::collections::BTreeMap;
use std::fmt;

use horizon_solver::{Assignment, Backend, SolveError};
use horizon_syntax::{Atom, ExternalValue, Literal, Rule, Step, Symbol};
use horizon_tracer::{trace, Trace};
use thiserror::Error;

use crate::{ExternalHandle, Template};

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum InstantiateError {
    #[error("grounding must continue at step {expected}, not at step {start}")]
    GroundingOrder { expected: Step, start: Step },
    #[error("step {0} is not grounded")]
    UnknownStep(Step),
    #[error("an external at step {0} can only be released with release_external")]
    Release(Step),
    #[error("step {0} needs atoms beyond the largest literal")]
    AtomOverflow(Step),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// Shown atoms of a model: the template's fact labels plus labels
/// true at some step.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Answer {
    pub facts: Vec<Symbol>,
    pub atoms: Vec<(Step, Symbol)>,
}

impl Answer {
    /// Every shown symbol, with the step appended to stepped labels.
    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.facts
            .iter()
            .cloned()
            .chain(self.atoms.iter().map(|(step, symbol)| symbol.with_step(*step)))
    }

    pub fn contains(&self, step: Step, symbol: &Symbol) -> bool {
        self.atoms.iter().any(|(s, l)| *s == step && l == symbol)
    }

    /// Labels true at `step`.
    pub fn at(&self, step: Step) -> impl Iterator<Item = &Symbol> {
        self.atoms
            .iter()
            .filter(move |(s, _)| *s == step)
            .map(|(_, l)| l)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbols = self.symbols().map(|s| s.to_string()).collect::<Vec<_>>();
        f.write_str(&symbols.join(" "))
    }
}

pub struct Instantiator {
    template: Template,
    steps: Step,
    started: bool,
    assigned: BTreeMap<(Step, ExternalHandle), bool>,
    trace: Trace,
}

impl Instantiator {
    pub fn new(template: Template, trace: Trace) -> Self {
        Self {
            template,
            steps: 0,
            started: false,
            assigned: BTreeMap::new(),
            trace,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// How many steps have been grounded.
    pub fn steps(&self) -> Step {
        self.steps
    }

    /// Assert the initial state at step 0. Does nothing the second time.
    pub fn start<B: Backend>(&mut self, backend: &mut B) -> Result<(), InstantiateError> {
        if self.started {
            return Ok(());
        }
        for &k in self.template.init() {
            backend.add_rule(Rule::new(false, vec![k], vec![]))?;
        }
        self.started = true;
        trace!(self.trace, Ground, "Initial state: {:?}", self.template.init());
        Ok(())
    }

    /// Ground steps `start..=end`, which must continue the steps
    /// grounded so far. Newly grounded externals are assumed false.
    pub fn ground<B: Backend>(&mut self, backend: &mut B, start: Step, end: Step) -> Result<(), InstantiateError> {
        if start != self.steps + 1 {
            return Err(InstantiateError::GroundingOrder {
                expected: self.steps + 1,
                start,
            });
        }
        if !self.template.fits(end) {
            return Err(InstantiateError::AtomOverflow(end));
        }
        self.start(backend)?;
        for step in start..=end {
            for rule in self.template.rules() {
                let rule = self
                    .template
                    .relocate(rule, step)
                    .ok_or(InstantiateError::AtomOverflow(step))?;
                backend.add_rule(rule)?;
            }
            for rule in self.template.weight_rules() {
                let rule = self
                    .template
                    .relocate_weight(rule, step)
                    .ok_or(InstantiateError::AtomOverflow(step))?;
                backend.add_weight_rule(rule)?;
            }
            for (_, handle) in self.template.externals() {
                self.assigned.insert((step, handle), false);
            }
            self.steps = step;
        }
        trace!(
            self.trace,
            Ground,
            "Grounded steps {}..={}: {} rules asserted",
            start,
            end,
            backend.rule_count()
        );
        Ok(())
    }

    /// Ground `n` more steps.
    pub fn extend<B: Backend>(&mut self, backend: &mut B, n: Step) -> Result<(), InstantiateError> {
        let start = self.steps + 1;
        self.ground(backend, start, self.steps + n)
    }

    fn check_step(&self, step: Step) -> Result<(), InstantiateError> {
        if step == 0 || step > self.steps {
            Err(InstantiateError::UnknownStep(step))
        } else {
            Ok(())
        }
    }

    /// Assume the external true or false at `step`, or leave it open
    /// with [`ExternalValue::Free`].
    pub fn assign_external(
        &mut self,
        step: Step,
        handle: ExternalHandle,
        value: ExternalValue,
    ) -> Result<(), InstantiateError> {
        self.check_step(step)?;
        match value {
            ExternalValue::Free => {
                self.assigned.remove(&(step, handle));
            }
            ExternalValue::True => {
                self.assigned.insert((step, handle), true);
            }
            ExternalValue::False => {
                self.assigned.insert((step, handle), false);
            }
            ExternalValue::Release => return Err(InstantiateError::Release(step)),
        }
        Ok(())
    }

    /// Make the external false at `step` for good.
    pub fn release_external<B: Backend>(
        &mut self,
        backend: &mut B,
        step: Step,
        handle: ExternalHandle,
    ) -> Result<(), InstantiateError> {
        self.check_step(step)?;
        let literal = self
            .literal(step, handle.index())
            .ok_or(InstantiateError::AtomOverflow(step))?;
        self.assigned.remove(&(step, handle));
        backend.add_rule(Rule::constraint(vec![literal]))?;
        Ok(())
    }

    /// The positive literal of local index `k` at `step`. Always
    /// `Some` for grounded steps.
    pub fn literal(&self, step: Step, k: Atom) -> Option<Literal> {
        self.template.literal(step, k)
    }

    /// The literal of a shown label at `step`.
    pub fn output_literal(&self, step: Step, label: &Symbol) -> Option<Literal> {
        self.template
            .output()
            .iter()
            .find(|(_, l)| l == label)
            .and_then(|&(k, _)| self.literal(step, k))
    }

    /// The assumptions for the next solve call.
    pub fn assumptions(&self) -> Vec<Literal> {
        self.assigned
            .iter()
            .filter_map(|(&(step, handle), &value)| {
                let literal = self.literal(step, handle.index())?;
                Some(if value { literal } else { literal.negate() })
            })
            .collect()
    }

    /// Project a model onto the shown labels of steps `0..=upto`.
    pub fn answer<M: Assignment>(&self, model: &M, upto: Step) -> Answer {
        let mut atoms = Vec::new();
        for step in 0..=upto {
            for (k, symbol) in self.template.output() {
                if self.literal(step, *k).is_some_and(|l| model.holds(l)) {
                    atoms.push((step, symbol.clone()));
                }
            }
        }
        Answer {
            facts: self.template.facts().to_vec(),
            atoms,
        }
    }
}

#[cfg(test)]
mod test {
    use horizon_solver::{Limit, Solver, SolveResult};
    use horizon_syntax::{parse_aspif, MAX_ATOM};

    use super::*;
    use crate::compile;

    const LOADED_ALIVE: &str = include_str!("../demos/loaded_alive.aspif");

    fn sym(s: &str) -> Symbol {
        s.parse().unwrap()
    }

    fn instantiator() -> Instantiator {
        let mut engine = Solver::new(Limit::default(), Trace::none());
        engine.load(parse_aspif(LOADED_ALIVE).unwrap()).unwrap();
        let template = compile(&mut engine, Trace::none()).unwrap();
        Instantiator::new(template, Trace::none())
    }

    #[test]
    fn grounding_order() {
        let mut inst = instantiator();
        let mut backend = Solver::new(Limit::default(), Trace::none());
        assert_eq!(
            inst.ground(&mut backend, 2, 3),
            Err(InstantiateError::GroundingOrder { expected: 1, start: 2 })
        );
        assert_eq!(inst.steps(), 0);
        assert_eq!(backend.rule_count(), 0);
        inst.ground(&mut backend, 1, 2).unwrap();
        assert_eq!(inst.steps(), 2);
        let count = backend.rule_count();
        assert_eq!(
            inst.ground(&mut backend, 2, 2),
            Err(InstantiateError::GroundingOrder { expected: 3, start: 2 })
        );
        assert_eq!(backend.rule_count(), count);
        inst.extend(&mut backend, 1).unwrap();
        assert_eq!(inst.steps(), 3);
    }

    #[test]
    fn atom_overflow() {
        let mut inst = instantiator();
        let mut backend = Solver::new(Limit::default(), Trace::none());
        let last = MAX_ATOM / 8;
        assert_eq!(inst.ground(&mut backend, 1, last), Err(InstantiateError::AtomOverflow(last)));
        assert_eq!(
            inst.ground(&mut backend, 1, Step::MAX),
            Err(InstantiateError::AtomOverflow(Step::MAX))
        );
        assert_eq!(inst.steps(), 0);
        assert_eq!(backend.rule_count(), 0);
        assert!(inst.template().fits(last - 1));
        assert_eq!(inst.template().literal(last, 7), Some(Literal::positive(MAX_ATOM)));
        assert_eq!(inst.template().literal(last, 8), None);
    }

    #[test]
    fn assumptions() {
        let mut inst = instantiator();
        let mut backend = Solver::new(Limit::default(), Trace::none());
        inst.ground(&mut backend, 1, 2).unwrap();
        let query = inst.template().external(&sym("query")).unwrap();
        let skip = inst.template().external(&sym("skip")).unwrap();

        // Every grounded external starts out false.
        let mut expected = vec![
            Literal::negative(7 + 8),
            Literal::negative(8 + 8),
            Literal::negative(7 + 16),
            Literal::negative(8 + 16),
        ];
        let mut assumptions = inst.assumptions();
        assumptions.sort();
        expected.sort();
        assert_eq!(assumptions, expected);

        inst.assign_external(2, query, ExternalValue::True).unwrap();
        inst.assign_external(1, skip, ExternalValue::Free).unwrap();
        assert!(inst.assumptions().contains(&Literal::positive(23)));
        assert!(!inst.assumptions().contains(&Literal::negative(16)));
        assert_eq!(
            inst.assign_external(3, query, ExternalValue::True),
            Err(InstantiateError::UnknownStep(3))
        );
        assert_eq!(
            inst.assign_external(1, query, ExternalValue::Release),
            Err(InstantiateError::Release(1))
        );

        let count = backend.rule_count();
        inst.release_external(&mut backend, 1, query).unwrap();
        assert_eq!(backend.rule_count(), count + 1);
        assert!(!inst.assumptions().iter().any(|l| l.atom() == 15));
        assert_eq!(inst.output_literal(2, &sym("occurs(shoot)")), Some(Literal::positive(18)));
        assert_eq!(inst.output_literal(2, &sym("nothing")), None);
    }

    #[test]
    fn plan_from_unloaded() {
        let mut inst = instantiator();
        let mut backend = Solver::new(Limit::default(), Trace::none());
        let query = inst.template().external(&sym("query")).unwrap();
        inst.start(&mut backend).unwrap();
        inst.start(&mut backend).unwrap();
        assert_eq!(backend.rule_count(), 2);

        inst.ground(&mut backend, 1, 1).unwrap();
        inst.assign_external(1, query, ExternalValue::True).unwrap();
        let result = backend.solve(&inst.assumptions()).unwrap();
        assert_eq!(result, SolveResult::Unsatisfiable);

        inst.extend(&mut backend, 1).unwrap();
        inst.release_external(&mut backend, 1, query).unwrap();
        inst.assign_external(2, query, ExternalValue::True).unwrap();
        let SolveResult::Satisfiable(model) = backend.solve(&inst.assumptions()).unwrap() else {
            panic!("no plan of length 2");
        };
        let answer = inst.answer(&model, 2);
        assert!(answer.contains(0, &sym("holds(loaded,false)")));
        assert!(answer.contains(0, &sym("holds(alive,true)")));
        assert!(answer.contains(1, &sym("occurs(load)")));
        assert!(answer.contains(2, &sym("occurs(shoot)")));
        assert!(answer.contains(2, &sym("holds(alive,false)")));
        for step in 0..=2 {
            // One value per fluent per step.
            let holds = answer.at(step).filter(|l| l.name() == Some("holds")).count();
            assert_eq!(holds, 2, "step {}", step);
        }
        assert!(answer.symbols().any(|s| s == sym("occurs(shoot,2)")));
        assert!(answer.facts.contains(&sym("action(load)")));
        assert!(answer.to_string().contains("occurs(load,1)"));
    }
}
