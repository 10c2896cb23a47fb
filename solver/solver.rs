//! A reference engine for small ground programs.
//!
//! The [`Solver`] implements every engine boundary trait: it replays
//! a loaded aspif program to an [`Observer`], answers brave and
//! cautious consequence queries, and accepts rules incrementally to
//! solve under assumptions. Search is a plain backtracking procedure
//! over the unassigned atoms (kept in a reversible sparse set) with
//! body/head, constraint, weight, and support propagation; a total
//! assignment is accepted only if it is the least model of its own
//! reduct (Gelfond & Lifschitz 1988).
//!
//! Disjunctive heads are shifted into normal rules, which is exact
//! for head-cycle-free programs. Weights are assumed non-negative,
//! as gringo writes them.

mod domain;
mod engine;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use horizon_syntax::{Atom, ExternalValue, Literal, Rule, Statement, Weight, WeightRule};
use horizon_tracer::{trace, Trace};
use thiserror::Error;

use domain::{Domain, SparseAtomSet};
pub use engine::{Assignment, Backend, Grounder, Observer, Oracle, SolveResult};

/// Things that may go wrong loading rules or solving.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SolveError {
    #[error("atom 0 is reserved")]
    ReservedAtom,
    #[error("literal {0} refers to an atom beyond the program")]
    OutOfRange(Literal),
    #[error("consequence enumeration interrupted by the search limit")]
    Interrupted,
}

/// Search budget for one solve call. Reaching either bound
/// yields [`SolveResult::Unknown`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Limit {
    pub decisions: Option<u64>,
    pub time: Option<Duration>,
}

/// A stable model: the truth value of every atom of the program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Model {
    values: Vec<bool>,
}

impl Model {
    /// The true atoms, in increasing order.
    pub fn atoms(&self) -> impl Iterator<Item = Atom> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(|(a, _)| a as Atom)
    }
}

impl Assignment for Model {
    fn is_true(&self, atom: Atom) -> bool {
        self.values.get(atom as usize).copied().unwrap_or(false)
    }
}

/// A rule after shifting: non-choice heads hold at most one atom.
/// The body holds when every literal of `body` does and, if present,
/// the weights of the true literals of `sum` reach its bound.
#[derive(Clone, Debug)]
struct Clause {
    choice: bool,
    head: Vec<Atom>,
    body: Vec<Literal>,
    sum: Option<(Weight, Vec<(Literal, Weight)>)>,
}

/// A partial assignment; the unassigned atoms form the trail.
struct State {
    values: Vec<Option<bool>>,
    unassigned: SparseAtomSet,
}

impl State {
    fn new(max: Atom) -> Self {
        Self {
            values: vec![None; max as usize + 1],
            unassigned: SparseAtomSet::new(max),
        }
    }

    fn value(&self, literal: Literal) -> Option<bool> {
        self.values[literal.atom() as usize].map(|v| v == literal.is_positive())
    }

    fn holds(&self, literal: Literal) -> bool {
        self.value(literal) == Some(true)
    }

    /// Make `literal` true; `false` on conflict.
    fn assign(&mut self, literal: Literal) -> bool {
        match self.value(literal) {
            Some(v) => v,
            None => {
                self.values[literal.atom() as usize] = Some(literal.is_positive());
                self.unassigned.delete(literal.atom());
                true
            }
        }
    }

    /// Undo every assignment made since `n` atoms were unassigned.
    fn undo(&mut self, n: usize) {
        for &atom in self.unassigned.deleted(n) {
            self.values[atom as usize] = None;
        }
        self.unassigned.restore(n);
    }
}

/// Weights of the true literals, and of the true or unassigned ones.
fn bounds(elements: &[(Literal, Weight)], state: &State) -> (Weight, Weight) {
    elements
        .iter()
        .fold((0, 0), |(lo, hi), &(l, w)| match state.value(l) {
            Some(true) => (lo + w, hi + w),
            None => (lo, hi + w),
            Some(false) => (lo, hi),
        })
}

impl Clause {
    /// Truth of the body under a partial assignment.
    fn body_value(&self, state: &State) -> Option<bool> {
        let mut unknown = false;
        for &l in &self.body {
            match state.value(l) {
                Some(false) => return Some(false),
                None => unknown = true,
                Some(true) => (),
            }
        }
        if let Some((lower, elements)) = &self.sum {
            let (lo, hi) = bounds(elements, state);
            if hi < *lower {
                return Some(false);
            }
            if lo < *lower {
                unknown = true;
            }
        }
        if unknown {
            None
        } else {
            Some(true)
        }
    }

    fn propagate(&self, state: &mut State) -> bool {
        if self.choice {
            return true;
        }
        let body = self.body_value(state);
        let head = self.head.first().copied();
        match (body, head.map_or(Some(false), |a| state.value(Literal::positive(a)))) {
            (Some(true), Some(false)) => false,
            (Some(true), None) => head.map_or(false, |a| state.assign(Literal::positive(a))),
            (None, Some(false)) => self.refute(state),
            _ => true,
        }
    }

    /// The head is false, so the body must become false.
    fn refute(&self, state: &mut State) -> bool {
        let mut pending = None;
        let mut count = 0;
        for &l in &self.body {
            match state.value(l) {
                Some(false) => return true,
                None => {
                    count += 1;
                    pending = Some(l);
                }
                Some(true) => (),
            }
        }
        match (&self.sum, pending) {
            (None, Some(l)) if count == 1 => state.assign(l.negate()),
            (None, _) => true,
            (Some((lower, elements)), pending) => {
                let (lo, hi) = bounds(elements, state);
                if hi < *lower {
                    true
                } else if count == 0 {
                    elements.iter().all(|&(l, w)| {
                        state.value(l).is_some() || lo + w < *lower || state.assign(l.negate())
                    })
                } else if let (1, Some(l), true) = (count, pending, lo >= *lower) {
                    state.assign(l.negate())
                } else {
                    true
                }
            }
        }
    }

    /// Does the body hold in the reduct of `state`, given the atoms
    /// `derived` so far?
    fn fires(&self, state: &State, derived: &[bool]) -> bool {
        let sat = |l: Literal| {
            if l.is_positive() {
                derived[l.atom() as usize]
            } else {
                state.holds(l)
            }
        };
        self.body.iter().all(|&l| sat(l))
            && self.sum.as_ref().map_or(true, |(lower, elements)| {
                elements
                    .iter()
                    .filter(|(l, _)| sat(*l))
                    .map(|(_, w)| w)
                    .sum::<Weight>()
                    >= *lower
            })
    }
}

enum Flow {
    Exhausted,
    Interrupted,
    Stopped,
}

/// The reference engine.
pub struct Solver {
    statements: Vec<Statement>,
    clauses: Vec<Clause>,
    externals: BTreeMap<Atom, ExternalValue>,
    max_atom: Atom,
    rules: usize,
    limit: Limit,
    trace: Trace,
}

impl Solver {
    pub fn new(limit: Limit, trace: Trace) -> Self {
        Self {
            statements: Vec::new(),
            clauses: Vec::new(),
            externals: BTreeMap::new(),
            max_atom: 0,
            rules: 0,
            limit,
            trace,
        }
    }

    /// Load a ground program, to be replayed by [`Grounder::ground`].
    /// Outputs with a compound condition get an auxiliary atom.
    pub fn load(&mut self, statements: Vec<Statement>) -> Result<(), SolveError> {
        for statement in &statements {
            let atoms: Vec<Atom> = match statement {
                Statement::Rule(rule) => rule
                    .head
                    .iter()
                    .copied()
                    .chain(rule.body.iter().map(|l| l.atom()))
                    .collect(),
                Statement::WeightRule(rule) => rule
                    .head
                    .iter()
                    .copied()
                    .chain(rule.body.iter().map(|(l, _)| l.atom()))
                    .collect(),
                Statement::External { atom, .. } => vec![*atom],
                Statement::Output { condition, .. } => condition.iter().map(|l| l.atom()).collect(),
            };
            for atom in atoms {
                self.check(atom)?;
            }
        }
        for statement in statements {
            match &statement {
                Statement::Rule(rule) => self.add_rule(rule.clone())?,
                Statement::WeightRule(rule) => self.add_weight_rule(rule.clone())?,
                Statement::External { atom, value } => {
                    self.check(*atom)?;
                    self.externals.insert(*atom, *value);
                }
                Statement::Output { symbol, condition } => match condition.as_slice() {
                    [] => (),
                    [l] if l.is_positive() => (),
                    _ => {
                        let aux = self.max_atom + 1;
                        let rule = Rule::new(false, vec![aux], condition.clone());
                        self.add_rule(rule.clone())?;
                        self.statements.push(Statement::Rule(rule));
                        self.statements.push(Statement::Output {
                            symbol: symbol.clone(),
                            condition: vec![Literal::positive(aux)],
                        });
                        continue;
                    }
                },
            }
            self.statements.push(statement);
        }
        Ok(())
    }

    pub fn max_atom(&self) -> Atom {
        self.max_atom
    }

    pub fn set_limit(&mut self, limit: Limit) {
        self.limit = limit;
    }

    fn check(&mut self, atom: Atom) -> Result<(), SolveError> {
        if atom == 0 {
            return Err(SolveError::ReservedAtom);
        }
        self.max_atom = self.max_atom.max(atom);
        Ok(())
    }

    fn add_clause(
        &mut self,
        choice: bool,
        head: Vec<Atom>,
        body: Vec<Literal>,
        sum: Option<(Weight, Vec<(Literal, Weight)>)>,
    ) -> Result<(), SolveError> {
        let atoms = head
            .iter()
            .copied()
            .chain(body.iter().map(|l| l.atom()))
            .chain(sum.iter().flat_map(|(_, e)| e.iter().map(|(l, _)| l.atom())))
            .collect::<Vec<_>>();
        for atom in atoms {
            self.check(atom)?;
        }
        self.rules += 1;
        if choice || head.len() <= 1 {
            self.clauses.push(Clause {
                choice,
                head,
                body,
                sum,
            });
        } else {
            for &h in &head {
                let mut body = body.clone();
                body.extend(head.iter().filter(|&&a| a != h).map(|&a| Literal::negative(a)));
                self.clauses.push(Clause {
                    choice,
                    head: vec![h],
                    body,
                    sum: sum.clone(),
                });
            }
        }
        Ok(())
    }

    fn exhausted(&self, decisions: u64, deadline: Option<Instant>) -> bool {
        self.limit.decisions.map_or(false, |d| decisions >= d)
            || deadline.map_or(false, |t| Instant::now() >= t)
    }

    /// Propagate to a fixpoint; `false` on conflict.
    fn propagate(&self, state: &mut State, open: &[bool]) -> bool {
        loop {
            let before = state.unassigned.len();
            if !self.clauses.iter().all(|c| c.propagate(state)) {
                return false;
            }

            // Atoms without a possibly applicable rule are false.
            let mut supported = open.to_vec();
            for clause in &self.clauses {
                if clause.body_value(state) != Some(false) {
                    for &h in &clause.head {
                        supported[h as usize] = true;
                    }
                }
            }
            for atom in 1..=self.max_atom {
                if !supported[atom as usize] && !state.assign(Literal::negative(atom)) {
                    return false;
                }
            }

            if state.unassigned.len() == before {
                return true;
            }
        }
    }

    /// Is the total assignment `state` the least model of its reduct?
    fn is_stable(&self, state: &State, open: &[bool]) -> bool {
        let mut derived = (0..=self.max_atom)
            .map(|a| a > 0 && open[a as usize] && state.holds(Literal::positive(a)))
            .collect::<Vec<bool>>();
        loop {
            let mut changed = false;
            for clause in &self.clauses {
                if clause.fires(state, &derived) {
                    for &h in &clause.head {
                        if state.holds(Literal::positive(h)) && !derived[h as usize] {
                            derived[h as usize] = true;
                            changed = true;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
        (1..=self.max_atom).all(|a| derived[a as usize] == state.holds(Literal::positive(a)))
    }

    /// Enumerate stable models under `assumptions`, handing each to
    /// `visit` until it returns `false`. With `free`, every external
    /// may be chosen either way regardless of its declared value.
    fn search(
        &self,
        assumptions: &[Literal],
        free: bool,
        mut visit: impl FnMut(&Model) -> bool,
    ) -> Result<Flow, SolveError> {
        for &l in assumptions {
            if l.atom() == 0 {
                return Err(SolveError::ReservedAtom);
            }
            if l.atom() > self.max_atom {
                return Err(SolveError::OutOfRange(l));
            }
        }
        let deadline = self.limit.time.map(|t| Instant::now() + t);
        let mut state = State::new(self.max_atom);
        let mut open = vec![false; self.max_atom as usize + 1];
        let mut root = assumptions.to_vec();
        for (&atom, &value) in &self.externals {
            if free || assumptions.iter().any(|l| l.atom() == atom) {
                open[atom as usize] = true;
                continue;
            }
            match value {
                ExternalValue::Free => open[atom as usize] = true,
                ExternalValue::True => {
                    open[atom as usize] = true;
                    root.push(Literal::positive(atom));
                }
                ExternalValue::False | ExternalValue::Release => root.push(Literal::negative(atom)),
            }
        }

        // Decisions: (unassigned count before, atom, second branch taken).
        let mut stack = Vec::<(usize, Atom, bool)>::new();
        let mut decisions = 0;
        let mut ok = root.iter().all(|&l| state.assign(l)) && self.propagate(&mut state, &open);
        loop {
            if ok {
                match state.unassigned.first() {
                    None => {
                        if self.is_stable(&state, &open) {
                            let model = Model {
                                values: state.values.iter().map(|v| *v == Some(true)).collect(),
                            };
                            if !visit(&model) {
                                trace!(self.trace, Solve, "Model after {} decisions", decisions);
                                return Ok(Flow::Stopped);
                            }
                        }
                        ok = false;
                    }
                    Some(atom) => {
                        if self.exhausted(decisions, deadline) {
                            trace!(self.trace, Solve, "Interrupted after {} decisions", decisions);
                            return Ok(Flow::Interrupted);
                        }
                        decisions += 1;
                        stack.push((state.unassigned.len(), atom, false));
                        ok = state.assign(Literal::negative(atom)) && self.propagate(&mut state, &open);
                    }
                }
            } else {
                match stack.pop() {
                    None => {
                        trace!(self.trace, Solve, "Exhausted after {} decisions", decisions);
                        return Ok(Flow::Exhausted);
                    }
                    Some((n, atom, false)) => {
                        state.undo(n);
                        stack.push((n, atom, true));
                        ok = state.assign(Literal::positive(atom)) && self.propagate(&mut state, &open);
                    }
                    Some((n, _, true)) => state.undo(n),
                }
            }
        }
    }

    fn consequences(&self, brave: bool) -> Result<Option<Vec<Atom>>, SolveError> {
        let mut acc = None::<Vec<bool>>;
        let flow = self.search(&[], true, |model| {
            acc = Some(match acc.take() {
                None => model.values.clone(),
                Some(acc) => acc
                    .iter()
                    .zip(&model.values)
                    .map(|(&a, &b)| if brave { a || b } else { a && b })
                    .collect(),
            });
            true
        })?;
        if let Flow::Interrupted = flow {
            return Err(SolveError::Interrupted);
        }
        Ok(acc.map(|values| Model { values }.atoms().collect()))
    }
}

impl Grounder for Solver {
    fn ground(&mut self, observer: &mut dyn Observer) -> Result<(), SolveError> {
        trace!(self.trace, Ground, "Replaying {} statements", self.statements.len());
        for statement in &self.statements {
            match statement {
                Statement::Rule(rule) => observer.rule(rule),
                Statement::WeightRule(rule) => observer.weight_rule(rule),
                Statement::External { atom, value } => observer.external(*atom, *value),
                Statement::Output { symbol, condition } => {
                    observer.output_atom(symbol, condition.first().map_or(0, |l| l.atom()))
                }
            }
        }
        Ok(())
    }
}

impl Oracle for Solver {
    fn brave(&mut self) -> Result<Option<Vec<Atom>>, SolveError> {
        self.consequences(true)
    }

    fn cautious(&mut self) -> Result<Option<Vec<Atom>>, SolveError> {
        self.consequences(false)
    }
}

impl Backend for Solver {
    type Model = Model;

    fn add_rule(&mut self, rule: Rule) -> Result<(), SolveError> {
        self.add_clause(rule.choice, rule.head, rule.body, None)
    }

    fn add_weight_rule(&mut self, rule: WeightRule) -> Result<(), SolveError> {
        self.add_clause(rule.choice, rule.head, vec![], Some((rule.lower, rule.body)))
    }

    fn solve(&mut self, assumptions: &[Literal]) -> Result<SolveResult<Model>, SolveError> {
        trace!(
            self.trace,
            Solve,
            "Solving {} rules over {} atoms with {} assumptions",
            self.rules,
            self.max_atom,
            assumptions.len()
        );
        let mut found = None;
        let flow = self.search(assumptions, false, |model| {
            found = Some(model.clone());
            false
        })?;
        Ok(match (found, flow) {
            (Some(model), _) => SolveResult::Satisfiable(model),
            (None, Flow::Exhausted) => SolveResult::Unsatisfiable,
            (None, _) => SolveResult::Unknown,
        })
    }

    fn rule_count(&self) -> usize {
        self.rules
    }
}

#[cfg(test)]
mod test {
    use horizon_syntax::{parse_aspif, Symbol};

    use super::*;

    fn pos(a: Atom) -> Literal {
        Literal::positive(a)
    }

    fn neg(a: Atom) -> Literal {
        Literal::negative(a)
    }

    fn engine() -> Solver {
        Solver::new(Limit::default(), Trace::none())
    }

    fn solver(rules: Vec<Rule>) -> Solver {
        let mut solver = engine();
        for rule in rules {
            solver.add_rule(rule).unwrap();
        }
        solver
    }

    fn atoms(result: SolveResult<Model>) -> Vec<Atom> {
        match result {
            SolveResult::Satisfiable(model) => model.atoms().collect(),
            other => panic!("expected a model, got {other:?}"),
        }
    }

    #[test]
    fn choice_under_assumptions() {
        let mut s = solver(vec![
            Rule::new(true, vec![1, 2], vec![]),
            Rule::constraint(vec![pos(1), pos(2)]),
            Rule::new(false, vec![3], vec![pos(1)]),
        ]);
        assert_eq!(atoms(s.solve(&[pos(3)]).unwrap()), vec![1, 3]);
        assert_eq!(atoms(s.solve(&[neg(1), pos(2)]).unwrap()), vec![2]);
        assert_eq!(s.solve(&[pos(2), pos(3)]).unwrap(), SolveResult::Unsatisfiable);
        assert_eq!(s.rule_count(), 3);
    }

    #[test]
    fn unfounded_loop() {
        let mut s = solver(vec![
            Rule::new(false, vec![1], vec![pos(2)]),
            Rule::new(false, vec![2], vec![pos(1)]),
        ]);
        assert_eq!(atoms(s.solve(&[]).unwrap()), Vec::<Atom>::new());
        assert_eq!(s.solve(&[pos(1)]).unwrap(), SolveResult::Unsatisfiable);
    }

    #[test]
    fn weight_rule() {
        let mut s = solver(vec![
            Rule::new(true, vec![1, 2, 3], vec![]),
            Rule::constraint(vec![neg(4)]),
        ]);
        s.add_weight_rule(WeightRule::new(
            false,
            vec![4],
            2,
            vec![(pos(1), 1), (pos(2), 1), (pos(3), 1)],
        ))
        .unwrap();
        assert_eq!(atoms(s.solve(&[neg(1)]).unwrap()), vec![2, 3, 4]);
        assert_eq!(s.solve(&[neg(1), neg(2)]).unwrap(), SolveResult::Unsatisfiable);
    }

    #[test]
    fn consequences() {
        let mut s = solver(vec![
            Rule::new(false, vec![1], vec![neg(2)]),
            Rule::new(false, vec![2], vec![neg(1)]),
            Rule::new(false, vec![3], vec![]),
        ]);
        assert_eq!(s.brave().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(s.cautious().unwrap(), Some(vec![3]));
        s.add_rule(Rule::constraint(vec![pos(2)])).unwrap();
        assert_eq!(s.cautious().unwrap(), Some(vec![1, 3]));
        s.add_rule(Rule::constraint(vec![pos(1)])).unwrap();
        assert_eq!(s.brave().unwrap(), None);
    }

    #[test]
    fn disjunction_is_shifted() {
        let mut s = solver(vec![Rule::new(false, vec![1, 2], vec![])]);
        assert_eq!(s.brave().unwrap(), Some(vec![1, 2]));
        assert_eq!(s.cautious().unwrap(), Some(vec![]));
        s.add_rule(Rule::constraint(vec![pos(1)])).unwrap();
        assert_eq!(atoms(s.solve(&[]).unwrap()), vec![2]);
    }

    #[test]
    fn externals() {
        let mut s = engine();
        s.load(
            parse_aspif("asp 1 0 0\n5 1 2\n5 2 0\n1 0 1 3 0 1 1\n0\n").unwrap(),
        )
        .unwrap();
        assert_eq!(atoms(s.solve(&[neg(2)]).unwrap()), Vec::<Atom>::new());
        assert_eq!(atoms(s.solve(&[pos(1), neg(2)]).unwrap()), vec![1, 3]);
        assert_eq!(s.brave().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(s.cautious().unwrap(), Some(vec![]));
    }

    #[test]
    fn budget() {
        let mut s = solver(vec![Rule::new(true, vec![1], vec![])]);
        s.set_limit(Limit {
            decisions: Some(0),
            time: None,
        });
        assert_eq!(s.solve(&[]).unwrap(), SolveResult::Unknown);
        assert_eq!(s.brave(), Err(SolveError::Interrupted));
        assert_eq!(atoms(s.solve(&[pos(1)]).unwrap()), vec![1]);
    }

    #[test]
    fn errors() {
        let mut s = engine();
        assert_eq!(s.add_rule(Rule::new(false, vec![0], vec![])), Err(SolveError::ReservedAtom));
        s.add_rule(Rule::new(false, vec![1], vec![])).unwrap();
        assert_eq!(s.solve(&[pos(2)]), Err(SolveError::OutOfRange(pos(2))));
    }

    struct Recorder(Vec<String>);

    impl Observer for Recorder {
        fn rule(&mut self, rule: &Rule) {
            self.0.push(rule.to_string());
        }
        fn weight_rule(&mut self, rule: &WeightRule) {
            self.0.push(rule.to_string());
        }
        fn external(&mut self, atom: Atom, value: ExternalValue) {
            self.0.push(format!("#external {atom} {value:?}"));
        }
        fn output_atom(&mut self, symbol: &Symbol, atom: Atom) {
            self.0.push(format!("#show {symbol}: {atom}"));
        }
    }

    #[test]
    fn replay() {
        let mut s = engine();
        s.load(parse_aspif("asp 1 0 0\n1 1 1 1 0 0\n4 1 a 0\n4 1 b 2 1 -1\n5 2 0\n0\n").unwrap())
            .unwrap();
        let mut recorder = Recorder(vec![]);
        s.ground(&mut recorder).unwrap();
        assert_eq!(
            recorder.0,
            vec![
                "{1}.",
                "#show a: 0",
                "3 :- 1, not 1.",
                "#show b: 3",
                "#external 2 Free",
            ]
        );
    }
}
