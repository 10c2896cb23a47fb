//! Syntactic elements of ground logic programs: numbered atoms,
//! signed literals, (weight) rules, and the symbols that name atoms.
//!
//! Ground programs arrive in the line-based `aspif` format that
//! `gringo --output=intermediate` writes; see "Theory Solving Made
//! Easy with Clingo 5" (Gebser et al., 2016), appendix A. Symbols
//! follow clingo's term syntax, with a trailing `'` allowed on names
//! to mark the "next step" copy of a fluent.

mod aspif;
mod lexer;
mod symbol;

use std::fmt;

use thiserror::Error;

pub use aspif::{parse_aspif, Statement};
pub use lexer::parse_facts;
pub use symbol::Symbol;

/// A positive atom identifier. Zero is reserved and never a real atom.
pub type Atom = u32;

/// A weight in a weight rule body, or the lower bound of one.
pub type Weight = i64;

/// A discrete time step of a planning horizon.
pub type Step = u32;

/// The largest atom a [`Literal`] can carry.
pub const MAX_ATOM: Atom = i32::MAX as Atom;

/// A signed atom: negative literals denote default negation (`not a`).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Literal(i32);

impl Literal {
    /// `atom` must not exceed [`MAX_ATOM`]; see [`Literal::checked`].
    pub fn positive(atom: Atom) -> Self {
        debug_assert!(atom <= MAX_ATOM, "atom {atom} out of range");
        Self(atom as i32)
    }

    pub fn negative(atom: Atom) -> Self {
        debug_assert!(atom <= MAX_ATOM, "atom {atom} out of range");
        Self(-(atom as i32))
    }

    /// The positive literal of `atom`, if it is representable.
    pub fn checked(atom: Atom) -> Option<Self> {
        i32::try_from(atom).ok().filter(|&a| a > 0).map(Self)
    }

    /// Build a literal from its raw aspif representation.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn atom(self) -> Atom {
        self.0.unsigned_abs()
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn negate(self) -> Self {
        Self(-self.0)
    }

    /// Move the literal's atom `offset` ids up, keeping its sign.
    /// `None` if the new atom would exceed [`MAX_ATOM`].
    pub fn shift(self, offset: Atom) -> Option<Self> {
        let offset = i32::try_from(offset).ok()?;
        let raw = if self.is_positive() {
            self.0.checked_add(offset)?
        } else {
            self.0.checked_sub(offset).filter(|&raw| raw != i32::MIN)?
        };
        Some(Self(raw))
    }

    /// Replace the literal's atom, keeping its sign.
    pub fn with_atom(self, atom: Atom) -> Self {
        if self.is_positive() {
            Self::positive(atom)
        } else {
            Self::negative(atom)
        }
    }
}

impl From<Atom> for Literal {
    fn from(atom: Atom) -> Self {
        Self::positive(atom)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_positive() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "not {}", self.atom())
        }
    }
}

/// A normal, disjunctive, or choice rule `H :- B` over numbered atoms.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub choice: bool,
    pub head: Vec<Atom>,
    pub body: Vec<Literal>,
}

impl Rule {
    pub fn new(choice: bool, head: Vec<Atom>, body: Vec<Literal>) -> Self {
        Self { choice, head, body }
    }

    /// An integrity constraint `:- B`.
    pub fn constraint(body: Vec<Literal>) -> Self {
        Self::new(false, vec![], body)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_head(f, self.choice, &self.head)?;
        if !self.body.is_empty() {
            if !self.head.is_empty() || self.choice {
                f.write_str(" ")?;
            }
            f.write_str(":- ")?;
            f.write_str(
                &self
                    .body
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )?;
        }
        f.write_str(".")
    }
}

/// A rule whose head is derivable once the weights of its true
/// body literals sum to at least `lower`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WeightRule {
    pub choice: bool,
    pub head: Vec<Atom>,
    pub lower: Weight,
    pub body: Vec<(Literal, Weight)>,
}

impl WeightRule {
    pub fn new(choice: bool, head: Vec<Atom>, lower: Weight, body: Vec<(Literal, Weight)>) -> Self {
        Self {
            choice,
            head,
            lower,
            body,
        }
    }
}

impl fmt::Display for WeightRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_head(f, self.choice, &self.head)?;
        if !self.head.is_empty() || self.choice {
            f.write_str(" ")?;
        }
        write!(
            f,
            ":- {} #sum {{{}}}.",
            self.lower,
            self.body
                .iter()
                .map(|(l, w)| format!("{w}: {l}"))
                .collect::<Vec<_>>()
                .join("; ")
        )
    }
}

fn fmt_head(f: &mut fmt::Formatter<'_>, choice: bool, head: &[Atom]) -> fmt::Result {
    let atoms = head
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(if choice { "; " } else { " | " });
    if choice {
        write!(f, "{{{atoms}}}")
    } else {
        f.write_str(&atoms)
    }
}

/// The truth value an external atom is declared or assigned with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExternalValue {
    /// Open: may be chosen either way.
    Free,
    True,
    False,
    /// False for good; the atom can no longer be assigned.
    Release,
}

/// Things that may go wrong reading a ground program or a symbol.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseError {
    #[error("missing or unsupported aspif header")]
    Header,
    #[error("line {line}: malformed statement `{text}`")]
    Syntax { line: usize, text: String },
    #[error("line {line}: unsupported aspif statement type {kind}")]
    Unsupported { line: usize, kind: u32 },
    #[error("invalid symbol `{0}`")]
    Symbol(String),
}
