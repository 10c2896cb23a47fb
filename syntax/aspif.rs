//! Read the line-based aspif format written by `gringo --output=intermediate`.
//!
//! Only the statements a planning template needs are accepted: rules
//! (type 1, with normal or weight bodies), outputs (4), externals (5),
//! and comments (10). Anything else is rejected rather than dropped.

use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, not_line_ending, space0, space1},
    combinator::{all_consuming, map, map_res, opt, recognize, verify},
    error::{Error, ErrorKind},
    multi::length_count,
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::lexer::parse_symbol;
use crate::{Atom, ExternalValue, Literal, ParseError, Rule, Symbol, Weight, WeightRule, MAX_ATOM};

/// One aspif statement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    Rule(Rule),
    WeightRule(WeightRule),
    /// `symbol` holds whenever every literal of `condition` does;
    /// an empty condition makes it a fact label.
    Output {
        symbol: Symbol,
        condition: Vec<Literal>,
    },
    External {
        atom: Atom,
        value: ExternalValue,
    },
}

fn unsigned(input: &str) -> IResult<&str, u32> {
    preceded(space0, map_res(digit1, str::parse))(input)
}

fn atom(input: &str) -> IResult<&str, Atom> {
    verify(unsigned, |&a| a <= MAX_ATOM)(input)
}

fn signed<T: std::str::FromStr>(input: &str) -> IResult<&str, T> {
    preceded(
        space0,
        map_res(recognize(pair(opt(char('-')), digit1)), str::parse),
    )(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    map(verify(signed::<i32>, |&raw| raw != i32::MIN), Literal::from_raw)(input)
}

fn fail<T>(input: &str) -> IResult<&str, T> {
    Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)))
}

/// `1 H n a1..an B ...`, the rule type already consumed.
fn rule(input: &str) -> IResult<&str, Statement> {
    let (input, head_type) = unsigned(input)?;
    let choice = match head_type {
        0 => false,
        1 => true,
        _ => return fail(input),
    };
    let (input, head) = length_count(unsigned, atom)(input)?;
    let (input, body_type) = unsigned(input)?;
    match body_type {
        0 => map(length_count(unsigned, literal), |body| {
            Statement::Rule(Rule::new(choice, head.clone(), body))
        })(input),
        1 => map(
            pair(
                signed::<Weight>,
                length_count(unsigned, pair(literal, signed::<Weight>)),
            ),
            |(lower, body)| Statement::WeightRule(WeightRule::new(choice, head.clone(), lower, body)),
        )(input),
        _ => fail(input),
    }
}

/// `4 m s n l1..ln`: `s` is exactly `m` bytes and may contain spaces.
fn output(input: &str) -> IResult<&str, Statement> {
    let (input, length) = unsigned(input)?;
    let (input, _) = char(' ')(input)?;
    let length = length as usize;
    let (text, input) = match (input.get(..length), input.get(length..)) {
        (Some(text), Some(rest)) => (text, rest),
        _ => return fail(input),
    };
    let symbol = match parse_symbol(text) {
        Ok(symbol) => symbol,
        Err(_) => return fail(input),
    };
    map(length_count(unsigned, literal), move |condition| Statement::Output {
        symbol: symbol.clone(),
        condition,
    })(input)
}

fn external(input: &str) -> IResult<&str, Statement> {
    let (input, atom) = atom(input)?;
    let (input, value) = unsigned(input)?;
    let value = match value {
        0 => ExternalValue::Free,
        1 => ExternalValue::True,
        2 => ExternalValue::False,
        3 => ExternalValue::Release,
        _ => return fail(input),
    };
    Ok((input, Statement::External { atom, value }))
}

fn header(input: &str) -> IResult<&str, ()> {
    map(
        all_consuming(tuple((
            tag("asp"),
            space1,
            tag("1"),
            unsigned,
            unsigned,
            opt(preceded(space1, not_line_ending)),
        ))),
        |_| (),
    )(input)
}

/// Parse an aspif program into its statements, in order.
pub fn parse_aspif(input: &str) -> Result<Vec<Statement>, ParseError> {
    let mut lines = input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end()))
        .filter(|(_, line)| !line.is_empty());
    match lines.next() {
        Some((_, line)) if header(line).is_ok() => (),
        _ => return Err(ParseError::Header),
    }

    let mut statements = Vec::new();
    for (line, text) in lines {
        let syntax = || ParseError::Syntax {
            line,
            text: text.to_owned(),
        };
        let (rest, kind) = unsigned(text).map_err(|_| syntax())?;
        let statement = match kind {
            0 => break,
            1 => rule(rest),
            4 => output(rest),
            5 => external(rest),
            10 => continue,
            kind => return Err(ParseError::Unsupported { line, kind }),
        };
        let (rest, statement) = statement.map_err(|_| syntax())?;
        if !rest.trim().is_empty() {
            return Err(syntax());
        }
        statements.push(statement);
    }
    Ok(statements)
}
