//! # bzr-parser
//!
//! Parser for report parameter expressions using a pest PEG grammar.
//!
//! Three entry points cover the value shapes the query compiler needs:
//! - [`parse_match`] for field filters (`P1,P2`, `!(CLOSED,VERIFIED)`, `+`)
//! - [`parse_date`] for date filters (`2024-01-01:*`, `-2w`)
//! - [`parse_columns`] for column lists (`+to:Owner,-url`)
//!
//! The grammar lives in `src/filter.pest`.

pub mod ast;

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

pub use ast::{
    ColumnEdit, ColumnOp, ColumnRef, ColumnsExpr, DateBound, DateExpr, MatchExpr, Special, Term,
    TermOp,
};

/// Seconds in the units accepted by relative date offsets.
pub const DAY_SECS: i64 = 86_400;
pub const WEEK_SECS: i64 = 604_800;
/// Months are a fixed thirty days.
pub const MONTH_SECS: i64 = 2_592_000;

#[derive(Parser)]
#[grammar = "filter.pest"]
struct FilterParser;

/// Errors raised when an expression does not fit the grammar.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{kind} expression {input:?} could not be parsed: {message}")]
    Grammar {
        kind: &'static str,
        input: String,
        message: String,
    },

    #[error("{kind} expression {input:?} produced no result")]
    Empty { kind: &'static str, input: String },
}

fn root<'i>(rule: Rule, kind: &'static str, input: &'i str) -> Result<Pair<'i, Rule>, ParseError> {
    let mut pairs = FilterParser::parse(rule, input).map_err(|e| ParseError::Grammar {
        kind,
        input: input.to_string(),
        message: e.to_string(),
    })?;
    pairs
        .next()
        .and_then(|top| top.into_inner().next())
        .ok_or_else(|| ParseError::Empty {
            kind,
            input: input.to_string(),
        })
}

/// Parse a field filter value. The value is trimmed first.
///
/// # Errors
///
/// Returns [`ParseError`] if the grammar rejects the input; every string
/// the parameter policies admit parses.
pub fn parse_match(input: &str) -> Result<MatchExpr, ParseError> {
    let trimmed = input.trim();
    let alt = root(Rule::match_expr, "match", trimmed)?;

    let expr = match alt.as_rule() {
        Rule::special_expr => {
            let symbol = alt.into_inner().next().map(|p| p.as_str()).unwrap_or("*");
            MatchExpr::Special(Special::from_symbol(symbol).unwrap_or(Special::Any))
        }
        Rule::negated_list => MatchExpr::NoneOf(terms_of(alt, Rule::group_term)),
        Rule::term_list => MatchExpr::AnyOf(terms_of(alt, Rule::term)),
        _ => {
            let term = alt
                .into_inner()
                .find(|p| p.as_rule() == Rule::term)
                .map(build_term)
                .ok_or_else(|| ParseError::Empty {
                    kind: "match",
                    input: trimmed.to_string(),
                })?;
            MatchExpr::Single(term)
        }
    };
    Ok(expr)
}

fn terms_of(pair: Pair<'_, Rule>, rule: Rule) -> Vec<Term> {
    pair.into_inner()
        .filter(|p| p.as_rule() == rule)
        .map(build_term)
        .collect()
}

fn build_term(pair: Pair<'_, Rule>) -> Term {
    let has_wildcard = pair.as_str().contains('%');
    let mut op = TermOp::Equals;
    let mut literal = "";
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::prefix => {
                op = match inner.as_str() {
                    "!" => TermOp::Negate,
                    "<" => TermOp::Less,
                    _ => TermOp::Greater,
                }
            }
            Rule::literal | Rule::group_literal => literal = inner.as_str(),
            _ => {}
        }
    }
    Term {
        op,
        literal: literal.trim_end().to_string(),
        has_wildcard,
    }
}

/// Parse a date filter value. The value is trimmed first.
///
/// # Errors
///
/// Returns [`ParseError`] only if the grammar itself fails; unknown shapes
/// come back as [`DateExpr::Unrecognized`].
pub fn parse_date(input: &str) -> Result<DateExpr, ParseError> {
    let trimmed = input.trim();
    let alt = root(Rule::date_expr, "date", trimmed)?;

    let expr = match alt.as_rule() {
        Rule::date_range => {
            let mut bounds = alt
                .into_inner()
                .filter(|p| p.as_rule() == Rule::date_bound)
                .map(|p| parse_bound(p.as_str()));
            let from = bounds.next().unwrap_or(DateBound::Open);
            let to = bounds.next().unwrap_or(DateBound::Open);
            DateExpr::Range { from, to }
        }
        Rule::date_before => DateExpr::OnOrBefore(parse_bound(trimmed)),
        Rule::date_after => DateExpr::OnOrAfter(parse_bound(trimmed)),
        Rule::date_special => match Special::from_symbol(trimmed) {
            Some(special) => DateExpr::Special(special),
            None => DateExpr::Unrecognized(trimmed.to_string()),
        },
        _ => DateExpr::Unrecognized(trimmed.to_string()),
    };
    Ok(expr)
}

/// Resolve one side of a date comparison: `*`, a signed offset such as
/// `+2w`, or literal date text.
#[must_use]
pub fn parse_bound(text: &str) -> DateBound {
    if text == "*" {
        return DateBound::Open;
    }
    let Some(bound) = FilterParser::parse(Rule::relative_bound, text)
        .ok()
        .and_then(|mut pairs| pairs.next())
    else {
        return DateBound::Absolute(text.to_string());
    };

    let mut negative = false;
    let mut amount = 0_i64;
    let mut unit_secs = 0_i64;
    for part in bound.into_inner() {
        match part.as_rule() {
            Rule::sign => negative = part.as_str() == "-",
            // Digits only, so a parse failure means the amount is out of range
            Rule::amount => {
                amount = match part.as_str() {
                    "" => 0,
                    digits => digits.parse().unwrap_or(i64::MAX),
                }
            }
            Rule::unit => {
                unit_secs = match part.as_str() {
                    "d" => DAY_SECS,
                    "w" => WEEK_SECS,
                    "m" => MONTH_SECS,
                    _ => 0,
                }
            }
            _ => {}
        }
    }

    let seconds = amount.saturating_mul(unit_secs);
    DateBound::Relative {
        seconds: if negative { -seconds } else { seconds },
    }
}

/// Parse a `columns` value into a delta or a replacement list.
///
/// Entries with an empty name are dropped.
///
/// # Errors
///
/// Returns [`ParseError`] if the grammar rejects the input.
pub fn parse_columns(input: &str) -> Result<ColumnsExpr, ParseError> {
    let trimmed = input.trim();
    let alt = root(Rule::columns_expr, "columns", trimmed)?;

    let expr = match alt.as_rule() {
        Rule::column_delta => {
            let mut default_op = ColumnOp::Add;
            let mut edits = Vec::new();
            for inner in alt.into_inner() {
                match inner.as_rule() {
                    Rule::column_op => default_op = column_op(inner.as_str()),
                    Rule::column_edit => {
                        let mut op = default_op;
                        let mut column = None;
                        for part in inner.into_inner() {
                            match part.as_rule() {
                                Rule::column_op => op = column_op(part.as_str()),
                                Rule::column_ref => column = Some(build_column_ref(part)),
                                _ => {}
                            }
                        }
                        if let Some(column) = column.filter(|c| !c.name.is_empty()) {
                            edits.push(ColumnEdit { op, column });
                        }
                    }
                    _ => {}
                }
            }
            ColumnsExpr::Delta(edits)
        }
        _ => ColumnsExpr::Replace(
            alt.into_inner()
                .filter(|p| p.as_rule() == Rule::column_ref)
                .map(build_column_ref)
                .filter(|c| !c.name.is_empty())
                .collect(),
        ),
    };
    Ok(expr)
}

fn column_op(symbol: &str) -> ColumnOp {
    if symbol == "-" {
        ColumnOp::Remove
    } else {
        ColumnOp::Add
    }
}

fn build_column_ref(pair: Pair<'_, Rule>) -> ColumnRef {
    let mut name = String::new();
    let mut title = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::column_name => name = inner.as_str().trim().to_string(),
            Rule::column_title => title = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    ColumnRef { name, title }
}
