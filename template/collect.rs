//! Record a one-shot grounding of the transition template.

use std::collections::{BTreeMap, BTreeSet};

use horizon_solver::Observer;
use horizon_syntax::{Atom, ExternalValue, Literal, Rule, Symbol, Weight, WeightRule};

/// Where an atom occurs, by rule index. Weighted occurrences index
/// the weight rules; the weight itself lives in the rule.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Adjacency {
    pub heads: BTreeSet<usize>,
    pub positive: BTreeSet<usize>,
    pub negative: BTreeSet<usize>,
    pub weight_heads: BTreeSet<usize>,
    pub weighted_positive: BTreeSet<usize>,
    pub weighted_negative: BTreeSet<usize>,
}

impl Adjacency {
    pub fn is_supported(&self) -> bool {
        !self.heads.is_empty() || !self.weight_heads.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = usize> + '_ {
        self.heads.iter().chain(&self.positive).chain(&self.negative).copied()
    }

    pub fn weight_rules(&self) -> impl Iterator<Item = usize> + '_ {
        self.weight_heads
            .iter()
            .chain(&self.weighted_positive)
            .chain(&self.weighted_negative)
            .copied()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NormalRule {
    pub choice: bool,
    pub head: BTreeSet<Atom>,
    pub body: BTreeSet<Literal>,
}

/// A weight rule whose `lower` bound shrinks as body literals
/// are satisfied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SumRule {
    pub choice: bool,
    pub head: BTreeSet<Atom>,
    pub lower: Weight,
    pub body: Vec<(Literal, Weight)>,
}

impl SumRule {
    pub fn total(&self) -> Weight {
        self.body.iter().map(|(_, w)| w).sum()
    }
}

/// What a truth value propagation decided about an atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    True,
    False,
    /// True in every stable model, but still in need of support.
    Cautious,
}

/// The state threaded from collection through simplification
/// to renumbering.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub max_atom: Atom,
    pub mentioned: Vec<bool>,
    pub atoms: Vec<Adjacency>,
    pub resolved: Vec<Option<Resolution>>,
    pub rules: Vec<Option<NormalRule>>,
    pub weight_rules: Vec<Option<SumRule>>,
    pub externals: BTreeSet<Atom>,
    pub outputs: Vec<(Symbol, Atom)>,
    pub symbols: BTreeMap<Symbol, Atom>,

    /// Found during collection, waiting for propagation.
    pub facts: Vec<Atom>,
    pub falsified: Vec<Atom>,
    pub cautious: Vec<Atom>,

    /// An empty constraint was collected.
    pub bottom: bool,
}

impl Context {
    /// Make room for `atom` and mark it as occurring.
    pub fn mention(&mut self, atom: Atom) {
        let n = atom as usize + 1;
        if self.atoms.len() < n {
            self.atoms.resize_with(n, Adjacency::default);
            self.mentioned.resize(n, false);
            self.resolved.resize(n, None);
        }
        self.mentioned[atom as usize] = true;
        self.max_atom = self.max_atom.max(atom);
    }

    pub fn adjacency(&mut self, atom: Atom) -> &mut Adjacency {
        self.mention(atom);
        &mut self.atoms[atom as usize]
    }

    pub fn symbol(&self, atom: Atom) -> Option<&Symbol> {
        self.outputs
            .iter()
            .find(|(_, a)| *a == atom && atom != 0)
            .map(|(s, _)| s)
    }

    pub fn live_rules(&self) -> impl Iterator<Item = &NormalRule> {
        self.rules.iter().flatten()
    }

    pub fn live_weight_rules(&self) -> impl Iterator<Item = &SumRule> {
        self.weight_rules.iter().flatten()
    }

    fn constrain(&mut self, literal: Literal) {
        self.mention(literal.atom());
        if literal.is_positive() {
            self.falsified.push(literal.atom());
        } else {
            self.cautious.push(literal.atom());
        }
    }

    /// Store a rule and index its atoms.
    pub fn push_rule(&mut self, rule: NormalRule) -> usize {
        let index = self.rules.len();
        for &h in &rule.head {
            self.adjacency(h).heads.insert(index);
        }
        for &l in &rule.body {
            let adjacency = self.adjacency(l.atom());
            if l.is_positive() {
                adjacency.positive.insert(index);
            } else {
                adjacency.negative.insert(index);
            }
        }
        self.rules.push(Some(rule));
        index
    }

    pub fn push_weight_rule(&mut self, rule: SumRule) -> usize {
        let index = self.weight_rules.len();
        for &h in &rule.head {
            self.adjacency(h).weight_heads.insert(index);
        }
        for &(l, _) in &rule.body {
            let adjacency = self.adjacency(l.atom());
            if l.is_positive() {
                adjacency.weighted_positive.insert(index);
            } else {
                adjacency.weighted_negative.insert(index);
            }
        }
        self.weight_rules.push(Some(rule));
        index
    }
}

/// Listens to the grounding and builds a [`Context`]. Facts and
/// one-literal constraints are queued instead of stored.
#[derive(Debug, Default)]
pub struct Collector {
    context: Context,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Context {
        self.context
    }

    fn normal(&mut self, choice: bool, head: BTreeSet<Atom>, body: BTreeSet<Literal>) {
        match (choice, head.len(), body.len()) {
            (true, 0, _) => (),
            (false, 0, 0) => self.context.bottom = true,
            (false, 1, 0) => {
                for h in head {
                    self.context.mention(h);
                    self.context.facts.push(h);
                }
            }
            (false, 0, 1) => {
                for l in body {
                    self.context.constrain(l);
                }
            }
            _ => {
                self.context.push_rule(NormalRule { choice, head, body });
            }
        }
    }
}

impl Observer for Collector {
    fn rule(&mut self, rule: &Rule) {
        self.normal(
            rule.choice,
            rule.head.iter().copied().collect(),
            rule.body.iter().copied().collect(),
        );
    }

    fn weight_rule(&mut self, rule: &WeightRule) {
        let head = rule.head.iter().copied().collect::<BTreeSet<Atom>>();
        let total = rule.body.iter().map(|(_, w)| w).sum::<Weight>();
        if rule.lower <= 0 {
            self.normal(rule.choice, head, BTreeSet::new());
        } else if total < rule.lower {
            // Never applicable; its atoms still exist.
            for h in head {
                self.context.mention(h);
            }
            for &(l, _) in &rule.body {
                self.context.mention(l.atom());
            }
        } else if let (false, true, [(l, w)]) = (rule.choice, head.is_empty(), rule.body.as_slice()) {
            if *w >= rule.lower {
                self.context.constrain(*l);
            }
        } else {
            self.context.push_weight_rule(SumRule {
                choice: rule.choice,
                head,
                lower: rule.lower,
                body: rule.body.clone(),
            });
        }
    }

    fn external(&mut self, atom: Atom, value: ExternalValue) {
        self.context.mention(atom);
        if value != ExternalValue::Release {
            self.context.externals.insert(atom);
        }
    }

    fn output_atom(&mut self, symbol: &Symbol, atom: Atom) {
        if atom != 0 {
            self.context.mention(atom);
        }
        self.context.outputs.push((symbol.clone(), atom));
        self.context.symbols.insert(symbol.clone(), atom);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pos(a: Atom) -> Literal {
        Literal::positive(a)
    }

    fn neg(a: Atom) -> Literal {
        Literal::negative(a)
    }

    #[test]
    fn collect() {
        let mut c = Collector::new();
        c.rule(&Rule::new(false, vec![1], vec![]));
        c.rule(&Rule::new(false, vec![2], vec![pos(1), neg(3)]));
        c.rule(&Rule::constraint(vec![pos(4)]));
        c.rule(&Rule::constraint(vec![neg(5)]));
        c.weight_rule(&WeightRule::new(true, vec![6], 1, vec![(pos(2), 1), (neg(3), 2)]));
        c.external(3, ExternalValue::Free);
        c.output_atom(&Symbol::constant("a"), 1);
        c.output_atom(&Symbol::constant("f"), 0);
        let ctx = c.finish();

        assert_eq!(ctx.max_atom, 6);
        assert_eq!(ctx.facts, vec![1]);
        assert_eq!(ctx.falsified, vec![4]);
        assert_eq!(ctx.cautious, vec![5]);
        assert_eq!(ctx.live_rules().count(), 1);
        assert_eq!(ctx.live_weight_rules().count(), 1);
        assert_eq!(ctx.atoms[2].heads, BTreeSet::from([0]));
        assert_eq!(ctx.atoms[2].weighted_positive, BTreeSet::from([0]));
        assert_eq!(ctx.atoms[3].negative, BTreeSet::from([0]));
        assert_eq!(ctx.atoms[3].weighted_negative, BTreeSet::from([0]));
        assert!(ctx.atoms[6].is_supported());
        assert!(!ctx.atoms[1].is_supported());
        assert!(ctx.externals.contains(&3));
        assert_eq!(ctx.symbol(1), Some(&Symbol::constant("a")));
        assert_eq!(ctx.symbols[&Symbol::constant("f")], 0);
        assert!(!ctx.bottom);
    }

    #[test]
    fn degenerate_weight_rules() {
        let mut c = Collector::new();
        c.weight_rule(&WeightRule::new(false, vec![1], 0, vec![(pos(2), 1)]));
        c.weight_rule(&WeightRule::new(false, vec![3], 5, vec![(pos(2), 1)]));
        c.weight_rule(&WeightRule::new(false, vec![], 2, vec![(pos(4), 2)]));
        c.weight_rule(&WeightRule::new(false, vec![], 2, vec![(pos(5), 1), (pos(5), 1)]));
        let ctx = c.finish();
        assert_eq!(ctx.facts, vec![1]);
        assert_eq!(ctx.falsified, vec![4]);
        assert_eq!(ctx.live_weight_rules().count(), 1);
        assert!(!ctx.atoms[3].is_supported());
    }
}
