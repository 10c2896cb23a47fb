//! The boundary between the planner and a grounding/solving engine.
//! Anything that implements these traits can stand in for the
//! reference [`Solver`](crate::Solver).

use horizon_syntax::{Atom, ExternalValue, Literal, Rule, Symbol, WeightRule};

use crate::SolveError;

/// Listens to a one-shot grounding.
pub trait Observer {
    fn rule(&mut self, rule: &Rule);
    fn weight_rule(&mut self, rule: &WeightRule);
    fn external(&mut self, atom: Atom, value: ExternalValue);

    /// Atom `0` labels a fact.
    fn output_atom(&mut self, symbol: &Symbol, atom: Atom);
}

pub trait Grounder {
    /// Replay the ground program to `observer`, exactly once per call.
    fn ground(&mut self, observer: &mut dyn Observer) -> Result<(), SolveError>;
}

/// Consequences over every stable model of the grounded program,
/// with all externals free. `None` means there are no models at all.
pub trait Oracle {
    fn brave(&mut self) -> Result<Option<Vec<Atom>>, SolveError>;
    fn cautious(&mut self) -> Result<Option<Vec<Atom>>, SolveError>;
}

/// What a model looks like from outside the engine.
pub trait Assignment {
    fn is_true(&self, atom: Atom) -> bool;

    fn holds(&self, literal: Literal) -> bool {
        self.is_true(literal.atom()) == literal.is_positive()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SolveResult<M> {
    Satisfiable(M),
    Unsatisfiable,
    /// Interrupted before an answer was found.
    Unknown,
}

impl<M> SolveResult<M> {
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, Self::Satisfiable(_))
    }
}

/// An engine that accepts rules incrementally and solves under
/// assumptions. Asserted rules are never retracted.
pub trait Backend {
    type Model: Assignment;

    fn add_rule(&mut self, rule: Rule) -> Result<(), SolveError>;
    fn add_weight_rule(&mut self, rule: WeightRule) -> Result<(), SolveError>;
    fn solve(&mut self, assumptions: &[Literal]) -> Result<SolveResult<Self::Model>, SolveError>;

    /// How many rules have been asserted so far.
    fn rule_count(&self) -> usize;
}
