//! Compile a one-shot grounding of a transition system into a
//! reusable template, then stamp that template out once per step.
//!
//! A template lives in two bands of `period` atom ids: `[1, period]`
//! holds the previous state, `[period + 1, 2 * period]` the current
//! step. Relocating to step `s` shifts every id by `(s - 1) * period`,
//! so the current band of step `s - 1` is exactly the previous band of
//! step `s`.

mod collect;
mod instantiate;
mod renumber;
mod simplify;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use horizon_solver::{Grounder, Oracle, SolveError};
use horizon_syntax::{Atom, Literal, Rule, Step, Symbol, WeightRule, MAX_ATOM};
use horizon_tracer::{trace, Trace};
use thiserror::Error;

pub use collect::{Collector, Context, Resolution};
pub use instantiate::{Answer, InstantiateError, Instantiator};
pub use renumber::Renumberer;
pub use simplify::Simplifier;

/// How an atom of the grounding survives compilation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AtomClass {
    /// Owns a slot in the current band.
    Internal,
    /// A primed external standing for its counterpart one step back.
    BridgeIn,
    /// A normal external, toggled per step through its handle.
    BridgeOut,
    ForcedTrue,
    ForcedFalse,
    /// Never mentioned, or atom `0`.
    Eliminated,
}

/// A primed external and the local index it resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bridge {
    pub atom: Atom,
    /// The unprimed atom of the grounding, if it has one.
    pub counterpart: Option<Atom>,
    pub alias: Atom,
}

/// The local index of a normal external; its atom at step `s` is
/// `index + s * period`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ExternalHandle(pub(crate) Atom);

impl ExternalHandle {
    pub fn index(self) -> Atom {
        self.0
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CompileError {
    #[error("the transition template has no stable model")]
    UnsatTemplate,
    #[error("atom {0} was forced both true and false")]
    Conflict(Atom),
    #[error("external atom {0} has no output symbol")]
    AnonymousExternal(Atom),
    #[error("atom {0} survived simplification without a template id")]
    Dangling(Atom),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// A renumbered transition template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    pub(crate) period: Atom,
    pub(crate) rules: Vec<Rule>,
    pub(crate) weight_rules: Vec<WeightRule>,
    pub(crate) bridges: Vec<Bridge>,
    pub(crate) externals: BTreeMap<Symbol, ExternalHandle>,
    pub(crate) init: Vec<Atom>,
    pub(crate) output: Vec<(Atom, Symbol)>,
    pub(crate) facts: Vec<Symbol>,
    pub(crate) classes: Vec<AtomClass>,
    pub(crate) ids: Vec<Option<Atom>>,
}

impl Template {
    /// How many atoms one step adds.
    pub fn period(&self) -> Atom {
        self.period
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn weight_rules(&self) -> &[WeightRule] {
        &self.weight_rules
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    /// The handle of the normal external labelled `symbol`.
    pub fn external(&self, symbol: &Symbol) -> Option<ExternalHandle> {
        self.externals.get(symbol).copied()
    }

    pub fn externals(&self) -> impl Iterator<Item = (&Symbol, ExternalHandle)> {
        self.externals.iter().map(|(s, &h)| (s, h))
    }

    /// Local indices true in the initial state.
    pub fn init(&self) -> &[Atom] {
        &self.init
    }

    /// Shown atoms by local index.
    pub fn output(&self) -> &[(Atom, Symbol)] {
        &self.output
    }

    /// Shown atoms true at every step.
    pub fn facts(&self) -> &[Symbol] {
        &self.facts
    }

    pub fn class(&self, atom: Atom) -> AtomClass {
        self.classes
            .get(atom as usize)
            .copied()
            .unwrap_or(AtomClass::Eliminated)
    }

    /// The template id of a grounding atom.
    pub fn id(&self, atom: Atom) -> Option<Atom> {
        self.ids.get(atom as usize).copied().flatten()
    }

    fn offset(&self, step: Step) -> Option<Atom> {
        step.saturating_sub(1).checked_mul(self.period)
    }

    fn head(atom: Atom, offset: Atom) -> Option<Atom> {
        atom.checked_add(offset).filter(|&a| a <= MAX_ATOM)
    }

    /// The rule as it reads at step `step >= 1`, or `None` if some
    /// atom of it would not fit a [`Literal`].
    pub fn relocate(&self, rule: &Rule, step: Step) -> Option<Rule> {
        let offset = self.offset(step)?;
        Some(Rule::new(
            rule.choice,
            rule.head.iter().map(|&h| Self::head(h, offset)).collect::<Option<_>>()?,
            rule.body.iter().map(|&l| l.shift(offset)).collect::<Option<_>>()?,
        ))
    }

    pub fn relocate_weight(&self, rule: &WeightRule, step: Step) -> Option<WeightRule> {
        let offset = self.offset(step)?;
        Some(WeightRule::new(
            rule.choice,
            rule.head.iter().map(|&h| Self::head(h, offset)).collect::<Option<_>>()?,
            rule.lower,
            rule.body
                .iter()
                .map(|&(l, w)| l.shift(offset).map(|l| (l, w)))
                .collect::<Option<_>>()?,
        ))
    }

    /// The literal of local index `k` at `step`, where step `0` is the
    /// initial state.
    pub fn literal(&self, step: Step, k: Atom) -> Option<Literal> {
        step.checked_mul(self.period)
            .and_then(|offset| offset.checked_add(k))
            .and_then(Literal::checked)
    }

    /// Can `steps` steps be grounded without running out of atoms?
    pub fn fits(&self, steps: Step) -> bool {
        self.period == 0 || self.literal(steps, self.period).is_some()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "% period {}", self.period)?;
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        for rule in &self.weight_rules {
            writeln!(f, "{}", rule)?;
        }
        for (k, symbol) in &self.output {
            writeln!(f, "#show {}: {}.", symbol, k)?;
        }
        for (symbol, handle) in &self.externals {
            writeln!(f, "#external {}: {}.", symbol, handle.index())?;
        }
        Ok(())
    }
}

/// Ground once, restrict by the oracle's consequences, simplify,
/// and renumber.
pub fn compile<E: Grounder + Oracle>(engine: &mut E, trace: Trace) -> Result<Template, CompileError> {
    let mut collector = Collector::new();
    engine.ground(&mut collector)?;
    let context = collector.finish();
    trace!(
        trace,
        Collect,
        "Collected {} rules and {} weight rules over {} atoms",
        context.rules.len(),
        context.weight_rules.len(),
        context.max_atom
    );

    let brave = engine
        .brave()?
        .ok_or(CompileError::UnsatTemplate)?
        .into_iter()
        .collect::<BTreeSet<Atom>>();
    let cautious = engine.cautious()?.ok_or(CompileError::UnsatTemplate)?;
    let never = (1..=context.max_atom)
        .filter(|&a| context.mentioned[a as usize] && !brave.contains(&a))
        .collect::<Vec<_>>();
    trace!(
        trace,
        Simplify,
        "{} atoms are never true, {} always",
        never.len(),
        cautious.len()
    );

    let mut simplifier = Simplifier::new(context, trace);
    simplifier.assume_false(never);
    simplifier.assume_cautious(cautious);
    simplifier.run()?;
    Renumberer::new(simplifier.into_context(), trace).renumber()
}
