//! Ground terms naming atoms: `occurs(shoot)`, `holds'(loaded,true)`,
//! numbers, strings, and tuples (functions with an empty name).

use std::fmt;
use std::str::FromStr;

use crate::lexer::parse_symbol;
use crate::{ParseError, Step};

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Symbol {
    Number(i64),
    String(String),
    Function(String, Vec<Symbol>),
}

impl Symbol {
    pub fn function(name: &str, arguments: Vec<Symbol>) -> Self {
        Self::Function(name.to_owned(), arguments)
    }

    pub fn constant(name: &str) -> Self {
        Self::function(name, vec![])
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Function(name, _) => Some(name),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[Symbol] {
        match self {
            Self::Function(_, args) => args,
            _ => &[],
        }
    }

    /// Primed symbols name the next-step copy of a fluent.
    pub fn is_primed(&self) -> bool {
        self.name().map_or(false, |name| name.ends_with('\''))
    }

    pub fn primed(&self) -> Self {
        match self {
            Self::Function(name, args) => Self::Function(format!("{name}'"), args.clone()),
            other => other.clone(),
        }
    }

    pub fn unprimed(&self) -> Self {
        match self {
            Self::Function(name, args) => {
                Self::Function(name.trim_end_matches('\'').to_owned(), args.clone())
            }
            other => other.clone(),
        }
    }

    /// Append `step` as the last argument: `occurs(shoot)` becomes
    /// `occurs(shoot,1)`. Non-function symbols are returned as they are.
    pub fn with_step(&self, step: Step) -> Self {
        match self {
            Self::Function(name, args) if !name.is_empty() => {
                let mut args = args.clone();
                args.push(Self::Number(i64::from(step)));
                Self::Function(name.clone(), args)
            }
            other => other.clone(),
        }
    }
}

impl FromStr for Symbol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_symbol(s)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Function(name, args) if name.is_empty() || !args.is_empty() => {
                write!(
                    f,
                    "{name}({})",
                    args.iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",")
                )
            }
            Self::Function(name, _) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn primes() {
        let s: Symbol = "holds'(loaded,true)".parse().unwrap();
        assert!(s.is_primed());
        assert_eq!(s.unprimed().to_string(), "holds(loaded,true)");
        assert_eq!(s.unprimed().primed(), s);
        assert!(!Symbol::Number(3).is_primed());
    }

    #[test]
    fn step_argument() {
        let s = Symbol::function("occurs", vec![Symbol::constant("shoot")]);
        assert_eq!(s.with_step(1).to_string(), "occurs(shoot,1)");
        assert_eq!(Symbol::constant("query").with_step(4).to_string(), "query(4)");
    }

    #[test]
    fn display() {
        assert_eq!(Symbol::constant("a").to_string(), "a");
        assert_eq!(Symbol::String("x y".into()).to_string(), "\"x y\"");
        assert_eq!(Symbol::function("", vec![]).to_string(), "()");
        assert_eq!("p(-1, \"s\")".parse::<Symbol>().unwrap().to_string(), "p(-1,\"s\")");
    }
}
