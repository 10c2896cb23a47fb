//! Fitting: propagate forced truth values through the collected
//! template until nothing more can be resolved.
//!
//! Atoms come from three queues. The true and false queues are
//! drained to a joint fixpoint before any cautious atom is taken;
//! whatever cautious processing resolves goes back through them
//! first. Rules are never removed from their arenas, only replaced
//! by `None`, and a dead rule's index is detached from every atom
//! it mentioned.

use std::collections::VecDeque;

use horizon_syntax::{Atom, Literal};
use horizon_tracer::{trace, Trace};

use crate::collect::{Context, NormalRule, Resolution};
use crate::CompileError;

pub struct Simplifier {
    context: Context,
    true_queue: VecDeque<Atom>,
    false_queue: VecDeque<Atom>,
    cautious_queue: VecDeque<Atom>,

    /// Atoms queued true, which must not be falsified by support loss.
    facts: Vec<bool>,

    log: Vec<(Atom, Resolution)>,
    trace: Trace,
}

impl Simplifier {
    pub fn new(mut context: Context, trace: Trace) -> Self {
        let facts = std::mem::take(&mut context.facts);
        let falsified = std::mem::take(&mut context.falsified);
        let cautious = std::mem::take(&mut context.cautious);
        let mut simplifier = Self {
            facts: vec![false; context.atoms.len()],
            context,
            true_queue: VecDeque::new(),
            false_queue: VecDeque::new(),
            cautious_queue: VecDeque::new(),
            log: Vec::new(),
            trace,
        };
        for atom in facts {
            simplifier.queue_true(atom);
        }
        simplifier.assume_false(falsified);
        simplifier.assume_cautious(cautious);
        simplifier
    }

    /// Queue atoms that are false in every stable model.
    pub fn assume_false(&mut self, atoms: impl IntoIterator<Item = Atom>) {
        for atom in atoms {
            self.context.mention(atom);
            self.false_queue.push_back(atom);
        }
    }

    /// Queue atoms that are true in every stable model.
    pub fn assume_cautious(&mut self, atoms: impl IntoIterator<Item = Atom>) {
        for atom in atoms {
            self.context.mention(atom);
            self.cautious_queue.push_back(atom);
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_context(self) -> Context {
        self.context
    }

    /// Every resolution made so far, in order.
    pub fn log(&self) -> &[(Atom, Resolution)] {
        &self.log
    }

    pub fn run(&mut self) -> Result<(), CompileError> {
        if self.context.bottom {
            return Err(CompileError::UnsatTemplate);
        }
        loop {
            if let Some(atom) = self.true_queue.pop_front() {
                self.resolve(atom, true)?;
            } else if let Some(atom) = self.false_queue.pop_front() {
                self.resolve(atom, false)?;
            } else if let Some(atom) = self.cautious_queue.pop_front() {
                self.caution(atom)?;
            } else {
                trace!(
                    self.trace,
                    Simplify,
                    "Fitting resolved {} atoms; {} rules and {} weight rules remain",
                    self.log.len(),
                    self.context.live_rules().count(),
                    self.context.live_weight_rules().count()
                );
                return Ok(());
            }
        }
    }

    fn queue_true(&mut self, atom: Atom) {
        self.context.mention(atom);
        if self.facts.len() <= atom as usize {
            self.facts.resize(atom as usize + 1, false);
        }
        self.facts[atom as usize] = true;
        self.true_queue.push_back(atom);
    }

    fn is_fact(&self, atom: Atom) -> bool {
        self.facts.get(atom as usize).copied().unwrap_or(false)
    }

    /// Propagate `:- literal`.
    fn constrain(&mut self, literal: Literal) {
        if literal.is_positive() {
            self.false_queue.push_back(literal.atom());
        } else {
            self.cautious_queue.push_back(literal.atom());
        }
    }

    fn resolve(&mut self, atom: Atom, value: bool) -> Result<(), CompileError> {
        self.context.mention(atom);
        let resolution = if value {
            Resolution::True
        } else {
            Resolution::False
        };
        match self.context.resolved[atom as usize] {
            Some(r) if r == resolution => return Ok(()),
            Some(Resolution::Cautious) if value => (),
            Some(_) => return Err(CompileError::Conflict(atom)),
            None => (),
        }
        self.context.resolved[atom as usize] = Some(resolution);
        self.log.push((atom, resolution));
        trace!(self.trace, Simplify, "Resolved {} {:?}", atom, resolution);

        let adjacency = std::mem::take(&mut self.context.atoms[atom as usize]);
        let (satisfied, unsatisfied) = if value {
            (adjacency.positive, adjacency.negative)
        } else {
            (adjacency.negative, adjacency.positive)
        };
        let (weighted_satisfied, weighted_unsatisfied) = if value {
            (adjacency.weighted_positive, adjacency.weighted_negative)
        } else {
            (adjacency.weighted_negative, adjacency.weighted_positive)
        };
        let literal = if value {
            Literal::positive(atom)
        } else {
            Literal::negative(atom)
        };

        for i in adjacency.heads {
            let Some(rule) = self.context.rules[i].as_mut() else { continue };
            if !rule.choice && value {
                self.tombstone(i);
            } else {
                rule.head.remove(&atom);
                self.settle(i)?;
            }
        }
        for i in adjacency.weight_heads {
            let Some(rule) = self.context.weight_rules[i].as_mut() else { continue };
            if !rule.choice && value {
                self.tombstone_weight(i);
            } else {
                rule.head.remove(&atom);
                self.settle_weight(i)?;
            }
        }
        for i in satisfied {
            if let Some(rule) = self.context.rules[i].as_mut() {
                rule.body.remove(&literal);
                self.settle(i)?;
            }
        }
        for i in unsatisfied {
            self.tombstone(i);
        }
        for i in weighted_satisfied {
            if let Some(rule) = self.context.weight_rules[i].as_mut() {
                let weight = rule
                    .body
                    .iter()
                    .filter(|(l, _)| *l == literal)
                    .map(|(_, w)| w)
                    .sum::<i64>();
                rule.body.retain(|(l, _)| *l != literal);
                rule.lower -= weight;
                self.settle_weight(i)?;
            }
        }
        for i in weighted_unsatisfied {
            if let Some(rule) = self.context.weight_rules[i].as_mut() {
                rule.body.retain(|(l, _)| *l != literal.negate());
                self.settle_weight(i)?;
            }
        }
        Ok(())
    }

    /// `atom` holds in every model: rules that need it false are dead.
    fn caution(&mut self, atom: Atom) -> Result<(), CompileError> {
        self.context.mention(atom);
        match self.context.resolved[atom as usize] {
            Some(Resolution::True) | Some(Resolution::Cautious) => return Ok(()),
            Some(Resolution::False) => return Err(CompileError::Conflict(atom)),
            None => (),
        }
        self.context.resolved[atom as usize] = Some(Resolution::Cautious);
        self.log.push((atom, Resolution::Cautious));
        trace!(self.trace, Simplify, "Resolved {} Cautious", atom);

        let adjacency = &mut self.context.atoms[atom as usize];
        let negative = std::mem::take(&mut adjacency.negative);
        let weighted_negative = std::mem::take(&mut adjacency.weighted_negative);
        for i in negative {
            self.tombstone(i);
        }
        for i in weighted_negative {
            if let Some(rule) = self.context.weight_rules[i].as_mut() {
                rule.body.retain(|(l, _)| *l != Literal::negative(atom));
                self.settle_weight(i)?;
            }
        }
        Ok(())
    }

    /// Re-examine a rule that just lost a head atom or a body literal.
    fn settle(&mut self, i: usize) -> Result<(), CompileError> {
        let Some(rule) = self.context.rules[i].as_mut() else { return Ok(()) };
        match (rule.choice, rule.head.len(), rule.body.len()) {
            (true, 0, _) => self.tombstone(i),
            (false, 0, 0) => return Err(CompileError::UnsatTemplate),
            (false, 1, 0) => {
                let head = rule.head.clone();
                for h in head {
                    self.queue_true(h);
                }
                self.tombstone(i);
            }
            (false, 0, 1) => {
                let body = rule.body.clone();
                self.tombstone(i);
                for l in body {
                    self.constrain(l);
                }
            }
            _ => (),
        }
        Ok(())
    }

    fn settle_weight(&mut self, i: usize) -> Result<(), CompileError> {
        let Some(rule) = self.context.weight_rules[i].as_mut() else { return Ok(()) };
        if rule.choice && rule.head.is_empty() {
            self.tombstone_weight(i);
        } else if rule.lower <= 0 {
            // The body holds: keep the head as an unconditional rule.
            let head = rule.head.clone();
            let choice = rule.choice;
            match (choice, head.len()) {
                (false, 0) => return Err(CompileError::UnsatTemplate),
                (false, 1) => {
                    for h in head {
                        self.queue_true(h);
                    }
                }
                _ => {
                    self.context.push_rule(NormalRule {
                        choice,
                        head,
                        body: Default::default(),
                    });
                }
            }
            self.tombstone_weight(i);
        } else if rule.total() < rule.lower {
            self.tombstone_weight(i);
        } else if let (false, true, [(l, w)]) = (rule.choice, rule.head.is_empty(), rule.body.as_slice()) {
            let literal = *l;
            let forced = *w >= rule.lower;
            self.tombstone_weight(i);
            if forced {
                self.constrain(literal);
            }
        }
        Ok(())
    }

    fn tombstone(&mut self, i: usize) {
        let Some(rule) = self.context.rules[i].take() else { return };
        for l in rule.body {
            let adjacency = &mut self.context.atoms[l.atom() as usize];
            if l.is_positive() {
                adjacency.positive.remove(&i);
            } else {
                adjacency.negative.remove(&i);
            }
        }
        for h in rule.head {
            self.context.atoms[h as usize].heads.remove(&i);
            self.lose_support(h);
        }
    }

    fn tombstone_weight(&mut self, i: usize) {
        let Some(rule) = self.context.weight_rules[i].take() else { return };
        for (l, _) in rule.body {
            let adjacency = &mut self.context.atoms[l.atom() as usize];
            if l.is_positive() {
                adjacency.weighted_positive.remove(&i);
            } else {
                adjacency.weighted_negative.remove(&i);
            }
        }
        for h in rule.head {
            self.context.atoms[h as usize].weight_heads.remove(&i);
            self.lose_support(h);
        }
    }

    /// An atom with no rule left to derive it is false,
    /// unless it is an external or already known.
    fn lose_support(&mut self, atom: Atom) {
        let resolved = self.context.resolved[atom as usize];
        if !self.context.atoms[atom as usize].is_supported()
            && !self.context.externals.contains(&atom)
            && !self.is_fact(atom)
            && !matches!(resolved, Some(Resolution::True) | Some(Resolution::False))
        {
            self.false_queue.push_back(atom);
        }
    }

    /// Is there nothing left to resolve? Checks the queues, the
    /// adjacency records, and every live rule.
    pub fn is_fixpoint(&self) -> bool {
        let ctx = &self.context;
        let decided = |a: Atom| {
            matches!(
                ctx.resolved[a as usize],
                Some(Resolution::True) | Some(Resolution::False)
            )
        };
        let cautious = |a: Atom| ctx.resolved[a as usize] == Some(Resolution::Cautious);
        let queues = self.true_queue.is_empty()
            && self.false_queue.is_empty()
            && self.cautious_queue.is_empty();
        let adjacency = ctx.atoms.iter().all(|adjacency| {
            adjacency.rules().all(|i| ctx.rules[i].is_some())
                && adjacency.weight_rules().all(|i| ctx.weight_rules[i].is_some())
        });
        let rules = ctx.live_rules().all(|rule| {
            !rule.head.iter().any(|&h| decided(h))
                && !rule
                    .body
                    .iter()
                    .any(|l| decided(l.atom()) || (!l.is_positive() && cautious(l.atom())))
                && match (rule.choice, rule.head.len(), rule.body.len()) {
                    (true, 0, _) => false,
                    (false, 1, 0) | (false, 0, 0) | (false, 0, 1) => false,
                    _ => true,
                }
        });
        let weight_rules = ctx.live_weight_rules().all(|rule| {
            !rule.head.iter().any(|&h| decided(h))
                && !rule
                    .body
                    .iter()
                    .any(|(l, _)| decided(l.atom()) || (!l.is_positive() && cautious(l.atom())))
                && rule.lower > 0
                && rule.total() >= rule.lower
                && !(rule.choice && rule.head.is_empty())
                && !(!rule.choice && rule.head.is_empty() && rule.body.len() == 1)
        });
        queues && adjacency && rules && weight_rules
    }
}

#[cfg(test)]
mod test {
    use horizon_solver::Observer;
    use horizon_syntax::{Rule, WeightRule};

    use super::*;
    use crate::collect::Collector;

    fn pos(a: Atom) -> Literal {
        Literal::positive(a)
    }

    fn neg(a: Atom) -> Literal {
        Literal::negative(a)
    }

    fn simplifier(rules: Vec<Rule>, weight_rules: Vec<WeightRule>) -> Simplifier {
        let mut c = Collector::new();
        for rule in &rules {
            c.rule(rule);
        }
        for rule in &weight_rules {
            c.weight_rule(rule);
        }
        Simplifier::new(c.finish(), Trace::none())
    }

    fn mentions(ctx: &Context, atom: Atom) -> bool {
        ctx.live_rules().any(|r| {
            r.head.contains(&atom) || r.body.iter().any(|l| l.atom() == atom)
        }) || ctx
            .live_weight_rules()
            .any(|r| r.head.contains(&atom) || r.body.iter().any(|(l, _)| l.atom() == atom))
    }

    #[test]
    fn facts_cascade() {
        // 1. 2 :- 1. 3 :- 2, not 4. 4 :- 5. {5} :- not 1. 6 :- 4.
        let mut s = simplifier(
            vec![
                Rule::new(false, vec![1], vec![]),
                Rule::new(false, vec![2], vec![pos(1)]),
                Rule::new(false, vec![3], vec![pos(2), neg(4)]),
                Rule::new(false, vec![4], vec![pos(5)]),
                Rule::new(true, vec![5], vec![neg(1)]),
                Rule::new(false, vec![6], vec![pos(4)]),
            ],
            vec![],
        );
        s.run().unwrap();
        assert!(s.is_fixpoint());
        let ctx = s.context();
        for atom in 1..=6 {
            assert!(!mentions(ctx, atom), "atom {atom} still mentioned");
        }
        assert_eq!(ctx.resolved[3], Some(Resolution::True));
        assert_eq!(ctx.resolved[6], Some(Resolution::False));
        assert_eq!(
            s.log().iter().filter(|(_, r)| *r == Resolution::True).count(),
            3
        );
    }

    #[test]
    fn true_and_false_before_cautious() {
        // {1;2}. 3 :- not 2. 4 :- 1, not 3. Cautious 3, false 2.
        let mut s = simplifier(
            vec![
                Rule::new(true, vec![1, 2], vec![]),
                Rule::new(false, vec![3], vec![neg(2)]),
                Rule::new(false, vec![4], vec![pos(1), neg(3)]),
            ],
            vec![],
        );
        s.assume_cautious([3]);
        s.assume_false([2]);
        s.run().unwrap();
        assert_eq!(s.log()[0], (2, Resolution::False));
        assert_eq!(s.log()[1], (3, Resolution::True));
        assert_eq!(s.context().resolved[4], Some(Resolution::False));
        assert!(s.is_fixpoint());
        assert_eq!(s.context().live_rules().count(), 1);
    }

    #[test]
    fn cautious_keeps_support() {
        // {1}. 2 :- 1. 3 :- not 2. Cautious 2.
        let mut s = simplifier(
            vec![
                Rule::new(true, vec![1], vec![]),
                Rule::new(false, vec![2], vec![pos(1)]),
                Rule::new(false, vec![3], vec![neg(2)]),
            ],
            vec![],
        );
        s.assume_cautious([2]);
        s.run().unwrap();
        let ctx = s.context();
        assert_eq!(ctx.resolved[2], Some(Resolution::Cautious));
        assert_eq!(ctx.resolved[3], Some(Resolution::False));
        assert_eq!(ctx.live_rules().count(), 2);
        assert!(s.is_fixpoint());
    }

    #[test]
    fn disjunction_and_constraints() {
        // 1 | 2 :- 3. {3}. :- 4, not 3. 4. False 2.
        let mut s = simplifier(
            vec![
                Rule::new(false, vec![1, 2], vec![pos(3)]),
                Rule::new(true, vec![3], vec![]),
                Rule::new(false, vec![], vec![pos(4), neg(3)]),
                Rule::new(false, vec![4], vec![]),
            ],
            vec![],
        );
        s.assume_false([2]);
        s.run().unwrap();
        let ctx = s.context();
        assert_eq!(ctx.resolved[3], Some(Resolution::Cautious));
        let rules = ctx.live_rules().cloned().collect::<Vec<_>>();
        assert!(rules.contains(&NormalRule {
            choice: false,
            head: [1].into(),
            body: [pos(3)].into(),
        }));
        assert!(s.is_fixpoint());
    }

    #[test]
    fn weight_rules() {
        // {1;2;3}. 4 :- 2 #sum {1:1; 1:2; 1:3}. 5 :- 3 #sum {2:1; 2:not 2}. Fact 1, false 2.
        let mut s = simplifier(
            vec![
                Rule::new(true, vec![1, 2, 3], vec![]),
                Rule::new(false, vec![1], vec![]),
            ],
            vec![
                WeightRule::new(false, vec![4], 2, vec![(pos(1), 1), (pos(2), 1), (pos(3), 1)]),
                WeightRule::new(false, vec![5], 3, vec![(pos(1), 2), (neg(2), 2)]),
            ],
        );
        s.assume_false([2]);
        s.run().unwrap();
        let ctx = s.context();
        assert_eq!(ctx.resolved[5], Some(Resolution::True));
        let rule = ctx.live_weight_rules().next().unwrap();
        assert_eq!(rule.lower, 1);
        assert_eq!(rule.body, vec![(pos(3), 1)]);
        assert!(s.is_fixpoint());
    }

    #[test]
    fn second_pass_changes_nothing() {
        // {1;2;3}. 1. 4 :- 2 #sum {1:1; 1:2; 1:3}. 6 :- 3, not 4. False 2.
        let mut s = simplifier(
            vec![
                Rule::new(true, vec![1, 2, 3], vec![]),
                Rule::new(false, vec![1], vec![]),
                Rule::new(false, vec![6], vec![pos(3), neg(4)]),
            ],
            vec![WeightRule::new(false, vec![4], 2, vec![(pos(1), 1), (pos(2), 1), (pos(3), 1)])],
        );
        s.assume_false([2]);
        s.run().unwrap();
        assert!(!s.log().is_empty());
        let rules = s.context().live_rules().cloned().collect::<Vec<_>>();
        let weight_rules = s.context().live_weight_rules().cloned().collect::<Vec<_>>();
        let resolved = s.context().resolved.clone();
        assert!(!rules.is_empty() && !weight_rules.is_empty());

        let mut again = Simplifier::new(s.into_context(), Trace::none());
        again.run().unwrap();
        assert!(again.log().is_empty());
        assert_eq!(again.context().live_rules().cloned().collect::<Vec<_>>(), rules);
        assert_eq!(again.context().live_weight_rules().cloned().collect::<Vec<_>>(), weight_rules);
        assert_eq!(again.context().resolved, resolved);
        assert!(again.is_fixpoint());
    }

    #[test]
    fn unsupported_weight_rule_dies() {
        // {1}. 2 :- 2 #sum {1:1; 1:3}. {3} :- 1. False 3.
        let mut s = simplifier(
            vec![
                Rule::new(true, vec![1], vec![]),
                Rule::new(true, vec![3], vec![pos(1)]),
            ],
            vec![WeightRule::new(false, vec![2], 2, vec![(pos(1), 1), (pos(3), 1)])],
        );
        s.assume_false([3]);
        s.run().unwrap();
        assert_eq!(s.context().resolved[2], Some(Resolution::False));
        assert_eq!(s.context().live_weight_rules().count(), 0);
        assert!(s.is_fixpoint());
    }

    #[test]
    fn errors() {
        let mut s = simplifier(vec![Rule::new(false, vec![1], vec![])], vec![]);
        s.assume_false([1]);
        assert_eq!(s.run(), Err(CompileError::Conflict(1)));

        let mut s = simplifier(
            vec![Rule::new(false, vec![], vec![pos(1), pos(2)]), Rule::new(false, vec![1], vec![])],
            vec![],
        );
        s.assume_cautious([2]);
        assert_eq!(s.run(), Err(CompileError::Conflict(2)));

        let mut s = simplifier(vec![Rule::constraint(vec![])], vec![]);
        assert_eq!(s.run(), Err(CompileError::UnsatTemplate));
    }
}
