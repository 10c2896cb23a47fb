//! Post-checks on found plans.
//!
//! A plan found under parallel semantics may put actions in one step
//! that cannot be executed one after another. [`SequentialCheck`]
//! detects such steps from STRIPS-like action descriptions given as
//! facts `pre(A,F)`, `add(A,F)` and `del(A,F)`.

use std::collections::{BTreeMap, BTreeSet};

use gray_codes::{InclusionExclusion, SetMutation};
use horizon_syntax::{Step, Symbol};
use horizon_template::Answer;
use horizon_tracer::{trace, Trace};

/// Subsets are enumerated only for steps with at most this many actions.
const MAX_MINIMAL: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Accept,
    /// Shown atoms that must not all hold again.
    Reject(Vec<(Step, Symbol)>),
}

pub trait ModelCheck {
    fn check(&mut self, answer: &Answer, length: Step) -> Verdict;
}

/// What a rejection blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockMode {
    /// Every action of the plan.
    Model,
    /// A smallest non-serializable set of actions of the first bad step.
    Minimal,
}

/// How often a rejected plan is re-solved before giving up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Retry {
    Once,
    UntilNotSat { max: usize },
}

impl Retry {
    pub fn attempts(self) -> usize {
        match self {
            Retry::Once => 1,
            Retry::UntilNotSat { max } => max,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Effects {
    pre: BTreeSet<Symbol>,
    add: BTreeSet<Symbol>,
    del: BTreeSet<Symbol>,
}

pub struct SequentialCheck {
    actions: BTreeMap<Symbol, Effects>,
    occurs: String,
    mode: BlockMode,
    trace: Trace,
}

impl SequentialCheck {
    pub fn new(facts: &[Symbol], mode: BlockMode, trace: Trace) -> Self {
        let mut actions = BTreeMap::<Symbol, Effects>::new();
        for fact in facts {
            let (Some(name), [action, fluent]) = (fact.name(), fact.arguments()) else {
                continue;
            };
            let effects = actions.entry(action.clone()).or_default();
            match name {
                "pre" => effects.pre.insert(fluent.clone()),
                "add" => effects.add.insert(fluent.clone()),
                "del" => effects.del.insert(fluent.clone()),
                _ => continue,
            };
        }
        trace!(trace, Check, "Sequential check over {} actions", actions.len());
        Self {
            actions,
            occurs: String::from("occurs"),
            mode,
            trace,
        }
    }

    fn effects(&self, action: &Symbol) -> Option<&Effects> {
        self.actions.get(action)
    }

    /// Can `actions` be executed one after another in some order?
    pub fn serializable(&self, actions: &[&Symbol]) -> bool {
        let empty = Effects::default();
        let effects = actions
            .iter()
            .map(|a| self.effects(a).unwrap_or(&empty))
            .collect::<Vec<_>>();
        let n = effects.len();

        // `before[i]` holds the actions that must come after `i`.
        let mut before = vec![Vec::new(); n];
        let mut incoming = vec![0usize; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if !effects[i].add.is_disjoint(&effects[j].del) {
                    return false;
                }
                if !effects[j].del.is_disjoint(&effects[i].pre) {
                    before[i].push(j);
                    incoming[j] += 1;
                }
            }
        }
        let mut ready = (0..n).filter(|&i| incoming[i] == 0).collect::<Vec<_>>();
        let mut ordered = 0;
        while let Some(i) = ready.pop() {
            ordered += 1;
            for &j in &before[i] {
                incoming[j] -= 1;
                if incoming[j] == 0 {
                    ready.push(j);
                }
            }
        }
        ordered == n
    }

    /// Indices of a smallest non-serializable subset of `actions`.
    pub fn minimal(&self, actions: &[&Symbol]) -> Vec<usize> {
        if actions.len() > MAX_MINIMAL {
            return (0..actions.len()).collect();
        }
        let mut subset = BTreeSet::new();
        let mut best: Option<BTreeSet<usize>> = None;
        for mutation in InclusionExclusion::of_len(actions.len()) {
            match mutation {
                SetMutation::Insert(i) => subset.insert(i),
                SetMutation::Remove(i) => subset.remove(&i),
            };
            if best.as_ref().map_or(false, |b| b.len() <= subset.len()) {
                continue;
            }
            let chosen = subset.iter().map(|&i| actions[i]).collect::<Vec<_>>();
            if !self.serializable(&chosen) {
                best = Some(subset.clone());
            }
        }
        best.map_or_else(|| (0..actions.len()).collect(), |b| b.into_iter().collect())
    }

    fn actions<'a>(&self, answer: &'a Answer, step: Step) -> Vec<&'a Symbol> {
        answer
            .at(step)
            .filter(|l| l.name() == Some(self.occurs.as_str()) && l.arguments().len() == 1)
            .collect()
    }
}

impl ModelCheck for SequentialCheck {
    fn check(&mut self, answer: &Answer, length: Step) -> Verdict {
        for step in 1..=length {
            let labels = self.actions(answer, step);
            let actions = labels.iter().map(|l| &l.arguments()[0]).collect::<Vec<_>>();
            if self.serializable(&actions) {
                continue;
            }
            trace!(self.trace, Check, "Step {} is not serializable", step);
            let rejected: Vec<(Step, Symbol)> = match self.mode {
                BlockMode::Model => (1..=length)
                    .flat_map(|s| self.actions(answer, s).into_iter().map(move |l| (s, l.clone())))
                    .collect(),
                BlockMode::Minimal => self
                    .minimal(&actions)
                    .into_iter()
                    .map(|i| (step, labels[i].clone()))
                    .collect(),
            };
            return Verdict::Reject(rejected);
        }
        Verdict::Accept
    }
}
