//! Filter values → WHERE fragments.
//!
//! Literals are bound as numbered parameters; only column expressions taken
//! from the schema tables (or validated custom-field identifiers) and fixed
//! operators are written into the SQL text.

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use bzr_connector::SqlParam;
use bzr_core::{DiagnosticKind, Diagnostics};
use bzr_parser::{DateBound, DateExpr, MatchExpr, Special, Term, TermOp};

/// Stands in for a literal that failed the safe-character check.
pub const INVALID_FIELD_VALUE: &str = "INVALID_FIELD_VALUE";

static SAFE_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_,@.\s*/%!()+-]*$").expect("safe literal pattern is valid")
});

/// Bound parameters of one statement.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    params: Vec<SqlParam>,
}

impl Bindings {
    /// Bind a value and return its `?N` placeholder.
    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("?{}", self.params.len())
    }

    pub fn bind_text(&mut self, value: impl Into<String>) -> String {
        self.bind(SqlParam::Text(value.into()))
    }

    #[must_use]
    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    #[must_use]
    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}

/// URL-decode a literal (`+` is a space) and check it against the safe
/// character class.
pub fn safe_decode(raw: &str, diagnostics: &Diagnostics) -> String {
    let spaced = raw.replace('+', " ");
    let decoded = match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            diagnostics.warn(
                DiagnosticKind::ValidationRejected,
                format!("String {raw} is not valid UTF-8 once decoded"),
            );
            return INVALID_FIELD_VALUE.to_string();
        }
    };
    if SAFE_LITERAL.is_match(&decoded) {
        decoded
    } else {
        diagnostics.warn(
            DiagnosticKind::ValidationRejected,
            format!(
                "String {decoded} is invalid using regex {}",
                SAFE_LITERAL.as_str()
            ),
        );
        INVALID_FIELD_VALUE.to_string()
    }
}

/// Compiles field filter values against SQL columns.
pub struct FilterCompiler<'d> {
    bindings: Bindings,
    diagnostics: &'d Diagnostics,
    now: DateTime<Utc>,
}

impl<'d> FilterCompiler<'d> {
    #[must_use]
    pub fn new(diagnostics: &'d Diagnostics, now: DateTime<Utc>) -> Self {
        Self {
            bindings: Bindings::default(),
            diagnostics,
            now,
        }
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    #[must_use]
    pub fn into_params(self) -> Vec<SqlParam> {
        self.bindings.into_params()
    }

    /// Match-expression filter: specials, OR lists, `!( )` AND lists or a
    /// single term.
    pub fn compile_where(&mut self, column: &str, value: &str) -> String {
        let expr = match bzr_parser::parse_match(value) {
            Ok(expr) => expr,
            Err(e) => {
                self.diagnostics
                    .warn(DiagnosticKind::GrammarUnrecognized, e.to_string());
                return String::new();
            }
        };

        match expr {
            MatchExpr::Special(special) => special_clause(column, special),
            MatchExpr::Single(term) => format!(" AND {}", self.term(column, &term, false)),
            MatchExpr::AnyOf(terms) => self.group(column, &terms, false),
            MatchExpr::NoneOf(terms) => self.group(column, &terms, true),
        }
    }

    fn group(&mut self, column: &str, terms: &[Term], negate: bool) -> String {
        let operator = if negate { " AND " } else { " OR " };
        let parts: Vec<String> = terms
            .iter()
            .map(|term| self.term(column, term, negate))
            .collect();
        format!(" AND ({})", parts.join(operator))
    }

    fn term(&mut self, column: &str, term: &Term, negate: bool) -> String {
        let negate = negate ^ (term.op == TermOp::Negate);
        let value = safe_decode(&term.literal, self.diagnostics);
        let placeholder = self.bindings.bind_text(value);

        if term.has_wildcard {
            let op = if negate { "NOT LIKE" } else { "LIKE" };
            return format!("{column} {op} {placeholder}");
        }
        let op = match (term.op, negate) {
            (TermOp::Less, false) | (TermOp::Greater, true) => " < ",
            (TermOp::Less, true) | (TermOp::Greater, false) => " > ",
            (_, true) => "<>",
            (_, false) => "=",
        };
        format!("{column}{op}{placeholder}")
    }

    /// Numeric filter. Only `+` (greater than zero) is understood.
    pub fn compile_int_where(&mut self, column: &str, value: &str) -> String {
        if value.trim() == "+" {
            return format!(" AND {column} > 0");
        }
        self.diagnostics.warn(
            DiagnosticKind::GrammarUnrecognized,
            format!("Int match not recognised {column}={value}"),
        );
        String::new()
    }

    /// Date filter: `A:B` ranges, `+offset` / `-offset` and the specials.
    pub fn compile_date_where(&mut self, column: &str, value: &str) -> String {
        let expr = match bzr_parser::parse_date(value) {
            Ok(expr) => expr,
            Err(e) => {
                self.diagnostics
                    .warn(DiagnosticKind::GrammarUnrecognized, e.to_string());
                return String::new();
            }
        };

        match expr {
            DateExpr::Range { from, to } => {
                let (Some(from), Some(to)) =
                    (self.resolve(column, &from), self.resolve(column, &to))
                else {
                    return String::new();
                };
                let mut clause = String::new();
                if let Some(from) = from {
                    let p = self.bindings.bind_text(from);
                    clause.push_str(&format!(" AND {column} >= {p}"));
                }
                if let Some(to) = to {
                    let p = self.bindings.bind_text(to);
                    clause.push_str(&format!(" AND {column} <= {p}"));
                }
                clause
            }
            DateExpr::OnOrBefore(bound) => self.date_comparison(column, "<=", &bound),
            DateExpr::OnOrAfter(bound) => self.date_comparison(column, ">=", &bound),
            DateExpr::Special(special) => special_clause(column, special),
            DateExpr::Unrecognized(text) => {
                self.diagnostics.warn(
                    DiagnosticKind::GrammarUnrecognized,
                    format!("Date match not recognised {column}={text}"),
                );
                String::new()
            }
        }
    }

    fn date_comparison(&mut self, column: &str, op: &str, bound: &DateBound) -> String {
        match self.resolve(column, bound) {
            Some(Some(date)) => {
                let p = self.bindings.bind_text(date);
                format!(" AND {column} {op} {p}")
            }
            Some(None) | None => String::new(),
        }
    }

    /// Calendar date for a bound: `Some(None)` for an open end, `None` when
    /// a relative offset falls outside the representable range.
    fn resolve(&self, column: &str, bound: &DateBound) -> Option<Option<String>> {
        match bound {
            DateBound::Open => Some(None),
            DateBound::Relative { seconds } => {
                let date = TimeDelta::try_seconds(*seconds)
                    .and_then(|offset| self.now.checked_add_signed(offset));
                match date {
                    Some(date) => Some(Some(date.format("%Y-%m-%d").to_string())),
                    None => {
                        self.diagnostics.warn(
                            DiagnosticKind::GrammarUnrecognized,
                            format!("Date offset out of range {column}={seconds}s"),
                        );
                        None
                    }
                }
            }
            DateBound::Absolute(text) => Some(Some(text.clone())),
        }
    }
}

fn special_clause(column: &str, special: Special) -> String {
    match special {
        Special::NotNull => format!(" AND {column} IS NOT NULL"),
        Special::Null => format!(" AND {column} IS NULL"),
        Special::Any => String::new(),
    }
}
