//! Recognize symbols and fact files with [nom](https://crates.io/crates/nom).

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{char, digit1, multispace0, multispace1, none_of, not_line_ending, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::{many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};

use crate::{ParseError, Symbol};

pub(crate) fn space(input: &str) -> IResult<&str, &str> {
    multispace0(input)
}

/// Whitespace and `%` line comments.
fn blank(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize(pair(char('%'), not_line_ending)),
        ))),
    )(input)
}

/// A clingo identifier, `_*[a-z][A-Za-z0-9_']*`; primes mark
/// next-step fluents.
pub(crate) fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        many0_count(char('_')),
        satisfy(|c| c.is_ascii_lowercase()),
        many0_count(satisfy(|c| c.is_ascii_alphanumeric() || c == '_' || c == '\'')),
    )))(input)
}

pub(crate) fn integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse)(input)
}

// `escaped_transform` rejects an empty body.
fn empty_string(input: &str) -> IResult<&str, String> {
    map(tag(r#""""#), |_| String::new())(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        escaped_transform(
            none_of(r#"\""#),
            '\\',
            alt((
                value("\\", tag("\\")),
                value("\"", tag("\"")),
                value("\n", tag("n")),
            )),
        ),
        char('"'),
    )(input)
}

pub(crate) fn string(input: &str) -> IResult<&str, String> {
    alt((empty_string, quoted_string))(input)
}

fn arguments(input: &str) -> IResult<&str, Vec<Symbol>> {
    delimited(
        pair(char('('), space),
        separated_list0(delimited(space, char(','), space), term),
        pair(space, char(')')),
    )(input)
}

fn function(input: &str) -> IResult<&str, Symbol> {
    map(pair(identifier, opt(arguments)), |(name, args)| {
        Symbol::function(name, args.unwrap_or_default())
    })(input)
}

/// A ground term: number, string, function, or tuple.
pub(crate) fn term(input: &str) -> IResult<&str, Symbol> {
    alt((
        map(integer, Symbol::Number),
        map(string, Symbol::String),
        function,
        map(arguments, |args| Symbol::function("", args)),
    ))(input)
}

pub(crate) fn parse_symbol(input: &str) -> Result<Symbol, ParseError> {
    all_consuming(delimited(space, term, space))(input)
        .finish()
        .map(|(_, symbol)| symbol)
        .map_err(|_| ParseError::Symbol(input.to_owned()))
}

/// Parse a file of ground facts `p(a,b).`, one or more per line,
/// with `%` comments.
pub fn parse_facts(input: &str) -> Result<Vec<Symbol>, ParseError> {
    all_consuming(terminated(
        many0(preceded(
            blank,
            terminated(term, preceded(space, char('.'))),
        )),
        blank,
    ))(input)
    .finish()
    .map(|(_, facts)| facts)
    .map_err(|e| ParseError::Symbol(e.input.lines().next().unwrap_or_default().to_owned()))
}
