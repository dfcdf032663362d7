//! SQLite backend.

use std::path::{Path, PathBuf};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};

use bzr_core::{ReportError, Result};

use crate::{Connector, ResultSet, Row, SqlParam, TableNames};

/// Read-only connector for a Bugzilla database stored in SQLite.
///
/// With a schema name, the database file is attached under that name and
/// every table reference is qualified with it.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
    schema: Option<String>,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, schema: Option<String>) -> Self {
        Self {
            path: path.into(),
            schema: schema.filter(|s| !s.is_empty()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        // `main` names the opened file itself.
        let Some(schema) = self.schema.as_deref().filter(|s| *s != "main") else {
            return Connection::open_with_flags(&self.path, flags)
                .map_err(|e| ReportError::ConnectionFailed(e.to_string()));
        };

        if !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ReportError::ConnectionFailed(format!(
                "invalid schema name '{schema}'"
            )));
        }
        let conn = Connection::open_in_memory()
            .map_err(|e| ReportError::ConnectionFailed(e.to_string()))?;
        let uri = format!("file:{}?mode=ro", self.path.display());
        conn.execute("ATTACH DATABASE ?1 AS ?2", rusqlite::params![uri, schema])
            .map_err(|e| ReportError::ConnectionFailed(e.to_string()))?;
        Ok(conn)
    }
}

impl TableNames for SqliteConnector {
    fn table_name(&self, logical: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{logical}"),
            None => logical.to_string(),
        }
    }
}

impl Connector for SqliteConnector {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(ReportError::ConnectionFailed(format!(
                "database not found: {}",
                self.path.display()
            )));
        }
        let conn = self.open()?;

        let master = self.table_name("sqlite_master");
        let found: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {master} WHERE type='table' AND name='bugs'"),
                [],
                |row| row.get(0),
            )
            .map_err(|e| ReportError::ConnectionFailed(e.to_string()))?;
        if found == 0 {
            return Err(ReportError::ConnectionFailed(format!(
                "{} has no bugs table",
                self.path.display()
            )));
        }

        tracing::debug!(path = %self.path.display(), schema = ?self.schema, "connected");
        Ok(conn)
    }

    fn execute(&self, conn: &Connection, sql: &str, params: &[SqlParam]) -> Result<ResultSet> {
        let failed = |e: rusqlite::Error| ReportError::QueryFailed {
            sql: sql.to_string(),
            message: e.to_string(),
        };

        let mut stmt = conn.prepare(sql).map_err(failed)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let values: Vec<SqlValue> = params
            .iter()
            .map(|p| match p {
                SqlParam::Text(s) => SqlValue::Text(s.clone()),
                SqlParam::Integer(i) => SqlValue::Integer(*i),
                SqlParam::Float(f) => SqlValue::Real(*f),
                SqlParam::Null => SqlValue::Null,
            })
            .collect();

        let rows = stmt
            .query_map(rusqlite::params_from_iter(values), |row| {
                let mut fields = Row::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    fields.insert(name.clone(), to_json(row.get_ref(i)?));
                }
                Ok(fields)
            })
            .map_err(failed)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(failed)?;

        tracing::debug!(rows = rows.len(), "statement executed");
        Ok(ResultSet::new(columns, rows))
    }
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}
