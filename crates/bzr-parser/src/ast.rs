//! AST types for report parameter expressions.
//!
//! The parser produces these from raw (already validated) parameter values;
//! the query compiler turns them into WHERE fragments, search-URL fragments
//! and column sets.

use serde::{Deserialize, Serialize};

/// A filter value such as `P1,P2`, `!(CLOSED,VERIFIED)` or `+`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchExpr {
    /// `+`, `-` or `*`
    Special(Special),
    /// `a,b,c`: any of the terms
    AnyOf(Vec<Term>),
    /// `!(a,b,c)`: none of the terms
    NoneOf(Vec<Term>),
    /// A single term without commas
    Single(Term),
}

impl MatchExpr {
    /// Number of terms, zero for specials.
    #[must_use]
    pub fn term_count(&self) -> usize {
        match self {
            Self::Special(_) => 0,
            Self::AnyOf(terms) | Self::NoneOf(terms) => terms.len(),
            Self::Single(_) => 1,
        }
    }
}

/// Null checks that bypass term matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Special {
    /// `+`
    NotNull,
    /// `-`
    Null,
    /// `*`
    Any,
}

impl Special {
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Self::NotNull),
            "-" => Some(Self::Null),
            "*" => Some(Self::Any),
            _ => None,
        }
    }
}

/// One comparison inside a match expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub op: TermOp,
    /// Still percent-encoded.
    pub literal: String,
    /// The term contained `%`, so it compares with LIKE.
    pub has_wildcard: bool,
}

/// Leading control character of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermOp {
    Equals,
    /// `!`
    Negate,
    /// `<`
    Less,
    /// `>`
    Greater,
}

/// A date filter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateExpr {
    /// `A:B`, either side may be `*`
    Range { from: DateBound, to: DateBound },
    /// `+N{d,w,m}`: on or before a future date
    OnOrBefore(DateBound),
    /// `-N{d,w,m}`: on or after a past date
    OnOrAfter(DateBound),
    Special(Special),
    /// Anything else; contributes no clause.
    Unrecognized(String),
}

/// One end of a date comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateBound {
    /// `*`
    Open,
    /// Signed offset from now in seconds.
    Relative { seconds: i64 },
    /// Literal date text, compared as-is.
    Absolute(String),
}

/// A `columns` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnsExpr {
    /// `+a,-b,c`: edits applied to the default column list
    Delta(Vec<ColumnEdit>),
    /// `a,b,c`: replaces the default column list
    Replace(Vec<ColumnRef>),
}

/// Column name with an optional inline title (`name:title`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    pub name: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnEdit {
    pub op: ColumnOp,
    pub column: ColumnRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_count_covers_every_shape() {
        let term = Term {
            op: TermOp::Equals,
            literal: "P1".to_string(),
            has_wildcard: false,
        };
        assert_eq!(MatchExpr::Special(Special::Any).term_count(), 0);
        assert_eq!(MatchExpr::Single(term.clone()).term_count(), 1);
        assert_eq!(MatchExpr::NoneOf(vec![term.clone(), term]).term_count(), 2);
    }

    #[test]
    fn ast_roundtrip_columns() {
        let expr = ColumnsExpr::Delta(vec![ColumnEdit {
            op: ColumnOp::Add,
            column: ColumnRef {
                name: "to".to_string(),
                title: Some("Owner".to_string()),
            },
        }]);
        let json = serde_json::to_string(&expr).expect("serialize");
        let back: ColumnsExpr = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(expr, back);
    }
}
