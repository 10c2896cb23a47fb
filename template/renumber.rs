//! Lay the simplified template out in two bands of `period` ids.
//!
//! Surviving atoms get dense local indices `1..=period` and are stored
//! in the current-step band as `period + k`. A primed external aliases
//! the local index of its unprimed counterpart, which lands in the
//! previous-step band; relocating a rule to step `s` then makes the
//! alias refer to the counterpart at step `s − 1`.

use std::collections::{BTreeMap, BTreeSet};

use horizon_syntax::{Atom, Literal, Rule, WeightRule};
use horizon_tracer::{trace, Trace};

use crate::collect::{Context, Resolution};
use crate::{AtomClass, Bridge, ExternalHandle, Template};
use crate::CompileError;

pub struct Renumberer {
    context: Context,
    trace: Trace,
}

impl Renumberer {
    pub fn new(context: Context, trace: Trace) -> Self {
        Self { context, trace }
    }

    fn classify(&self) -> Result<Vec<AtomClass>, CompileError> {
        let ctx = &self.context;
        (0..=ctx.max_atom)
            .map(|atom| {
                let i = atom as usize;
                if atom == 0 || !ctx.mentioned.get(i).copied().unwrap_or(false) {
                    Ok(AtomClass::Eliminated)
                } else if ctx.externals.contains(&atom) {
                    let symbol = ctx.symbol(atom).ok_or(CompileError::AnonymousExternal(atom))?;
                    Ok(if symbol.is_primed() {
                        AtomClass::BridgeIn
                    } else {
                        AtomClass::BridgeOut
                    })
                } else {
                    Ok(match ctx.resolved[i] {
                        Some(Resolution::True) => AtomClass::ForcedTrue,
                        Some(Resolution::False) => AtomClass::ForcedFalse,
                        _ => AtomClass::Internal,
                    })
                }
            })
            .collect()
    }

    pub fn renumber(self) -> Result<Template, CompileError> {
        let mut classes = self.classify()?;
        let ctx = &self.context;
        let n = ctx.max_atom as usize + 1;

        // Dense local indices for atoms that own a slot.
        let mut local = vec![None; n];
        let mut k: Atom = 0;
        for (atom, class) in classes.iter().enumerate() {
            if matches!(class, AtomClass::Internal | AtomClass::BridgeOut) {
                k += 1;
                local[atom] = Some(k);
            }
        }

        // Bridges alias their counterpart, or get a fresh slot whose
        // value is fixed.
        let mut bridges = Vec::new();
        let mut fixed = Vec::new();
        for atom in 1..=ctx.max_atom {
            if classes[atom as usize] != AtomClass::BridgeIn {
                continue;
            }
            let counterpart = ctx
                .symbol(atom)
                .and_then(|symbol| ctx.symbols.get(&symbol.unprimed()))
                .copied();
            let live = counterpart.and_then(|c| match classes.get(c as usize) {
                Some(AtomClass::Internal | AtomClass::BridgeOut) => local[c as usize],
                _ => None,
            });
            let alias = match live {
                Some(alias) => alias,
                None => {
                    k += 1;
                    let value = match counterpart {
                        Some(0) => true,
                        Some(c) => classes.get(c as usize) == Some(&AtomClass::ForcedTrue),
                        None => false,
                    };
                    fixed.push((k, value));
                    classes[atom as usize] = AtomClass::Internal;
                    k
                }
            };
            bridges.push(Bridge {
                atom,
                counterpart: counterpart.filter(|&c| c != 0),
                alias,
            });
        }
        let period = k;

        // Template ids: current band for slots, previous band for bridges.
        let mut ids = local.iter().map(|k| k.map(|k| period + k)).collect::<Vec<_>>();
        for bridge in &bridges {
            ids[bridge.atom as usize] = Some(bridge.alias);
        }
        let id = |atom: Atom| ids[atom as usize].ok_or(CompileError::Dangling(atom));
        let literal = |l: Literal| id(l.atom()).map(|a| l.with_atom(a));

        let mut rules = ctx
            .live_rules()
            .map(|rule| {
                Ok(Rule::new(
                    rule.choice,
                    rule.head.iter().map(|&h| id(h)).collect::<Result<_, _>>()?,
                    rule.body.iter().map(|&l| literal(l)).collect::<Result<_, _>>()?,
                ))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        let weight_rules = ctx
            .live_weight_rules()
            .map(|rule| {
                Ok(WeightRule::new(
                    rule.choice,
                    rule.head.iter().map(|&h| id(h)).collect::<Result<_, _>>()?,
                    rule.lower,
                    rule.body
                        .iter()
                        .map(|&(l, w)| literal(l).map(|l| (l, w)))
                        .collect::<Result<_, _>>()?,
                ))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        // Fix what the oracle forced but the rules no longer say.
        let fix = |atom: Atom, value: bool| {
            if value {
                Rule::constraint(vec![Literal::negative(atom)])
            } else {
                Rule::constraint(vec![Literal::positive(atom)])
            }
        };
        let mut externals = BTreeMap::new();
        for atom in 1..=ctx.max_atom {
            let i = atom as usize;
            let Some(target) = ids[i] else { continue };
            if classes[i] == AtomClass::BridgeOut {
                rules.push(Rule::new(true, vec![target], vec![]));
                if let Some(symbol) = ctx.symbol(atom) {
                    externals.insert(symbol.clone(), ExternalHandle(target - period));
                }
            }
            match ctx.resolved[i] {
                Some(Resolution::True | Resolution::Cautious) => rules.push(fix(target, true)),
                Some(Resolution::False) => rules.push(fix(target, false)),
                None => (),
            }
        }
        // A fresh bridge slot has no rules of its own: true needs a fact.
        for &(k, value) in &fixed {
            let slot = period + k;
            rules.push(if value {
                Rule::new(false, vec![slot], vec![])
            } else {
                fix(slot, false)
            });
        }
        rules.dedup();

        // Initial state: init(F) facts through the bridge of F'.
        let aliases = bridges
            .iter()
            .map(|b| (b.atom, b.alias))
            .collect::<BTreeMap<Atom, Atom>>();
        let mut init = BTreeSet::new();
        for (symbol, atom) in &ctx.outputs {
            let fact = *atom == 0 || ctx.resolved[*atom as usize] == Some(Resolution::True);
            match (symbol.name(), symbol.arguments(), fact) {
                (Some("init"), [fluent], true) => {
                    let primed = fluent.primed();
                    match ctx.symbols.get(&primed).and_then(|b| aliases.get(b)) {
                        Some(&alias) => {
                            init.insert(alias);
                        }
                        None => trace!(self.trace, Collect, "Skipping {}: {} is no bridge", symbol, primed),
                    }
                }
                _ => (),
            }
        }

        // Output labels by local index; facts have none.
        let mut output = Vec::new();
        let mut facts = Vec::new();
        for (symbol, atom) in &ctx.outputs {
            let i = *atom as usize;
            if *atom == 0 || ctx.resolved[i] == Some(Resolution::True) {
                if !facts.contains(symbol) {
                    facts.push(symbol.clone());
                }
                continue;
            }
            let entry = match (aliases.get(atom), local[i]) {
                (Some(&alias), _) => (alias, symbol.unprimed()),
                (None, Some(k)) => (k, symbol.clone()),
                (None, None) => continue,
            };
            if !output.contains(&entry) {
                output.push(entry);
            }
        }

        trace!(
            self.trace,
            Collect,
            "Period {}: {} rules, {} weight rules, {} bridges, {} externals",
            period,
            rules.len(),
            weight_rules.len(),
            bridges.len(),
            externals.len()
        );
        Ok(Template {
            period,
            rules,
            weight_rules,
            bridges,
            externals,
            init: init.into_iter().collect(),
            output,
            facts,
            classes,
            ids,
        })
    }
}
