//! # bzr-connector
//!
//! Database access for bzreport.
//!
//! The query compiler only needs physical table names ([`TableNames`]); the
//! report runner needs to open a connection, run one statement and walk the
//! rows ([`Connector`]). [`SqliteConnector`] is the bundled implementation.
//! [`FieldIdCache`] memoizes the `fielddefs` name → id lookup that the
//! status-transition joins use.

mod field_ids;
mod sqlite;

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

pub use field_ids::{FieldIdCache, FieldIds};
pub use sqlite::SqliteConnector;

use bzr_core::Result;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

/// One fetched row keyed by column label.
pub type Row = HashMap<String, serde_json::Value>;

/// Maps logical Bugzilla table names to the names used in SQL text.
pub trait TableNames {
    fn table_name(&self, logical: &str) -> String;
}

/// Identity mapping, for compiling SQL without a live connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTables;

impl TableNames for PlainTables {
    fn table_name(&self, logical: &str) -> String {
        logical.to_string()
    }
}

/// A bug database backend.
pub trait Connector: TableNames {
    type Connection;

    /// Open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`bzr_core::ReportError::ConnectionFailed`] when the database
    /// cannot be reached or does not look like a Bugzilla database.
    fn connect(&self) -> Result<Self::Connection>;

    /// Run one statement with positional parameters.
    ///
    /// # Errors
    ///
    /// Returns [`bzr_core::ReportError::QueryFailed`] carrying the SQL text
    /// and the driver message.
    fn execute(
        &self,
        conn: &Self::Connection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<ResultSet>;

    fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Rows returned by a statement, consumed front to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    rows: VecDeque<Row>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Rows not yet fetched.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Next row, or `None` once exhausted.
    pub fn fetch(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }
}

impl Iterator for ResultSet {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.fetch()
    }
}
