//! Report executor: parameters in, rendered report out.
//!
//! A [`Report`] owns one request's parameters, resolved configuration and
//! diagnostics. [`Report::run`] connects, compiles, executes and renders.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use bzr_connector::{Connector, FieldIdCache, FieldIds, TableNames};
use bzr_core::{
    ConfigFile, Diagnostic, Diagnostics, ParameterSpec, ParameterStore, ReportConfig,
    ReportError, Result,
};

use crate::compiler::{CompiledQuery, QueryCompiler};
use crate::render::{RenderedTable, Renderer};

/// What a report produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ReportBody {
    /// `format=count`.
    Count(i64),
    /// No rows matched; carries `noresultsmessage`.
    NoResults(String),
    Table(RenderedTable),
}

/// Result of one report request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutput {
    pub body: ReportBody,
    /// SQL with parameters inlined.
    pub sql: String,
    /// `buglist.cgi` link, shown unless `bzurl` is changed from `show`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_url: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    /// Level from the `debug` option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<u8>,
}

/// One report request.
#[derive(Debug)]
pub struct Report {
    store: ParameterStore,
    config: ReportConfig,
    diagnostics: Diagnostics,
    now: DateTime<Utc>,
}

impl Report {
    /// Build a request from `name=value` arguments.
    ///
    /// Arguments are applied in order, later ones winning. Configured
    /// defaults fill in the parameters the caller did not set, with the
    /// selected instance's defaults applied over the site-wide ones.
    pub fn from_args<'a, I>(file: &ConfigFile, args: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let diagnostics = Diagnostics::new();
        let mut store = ParameterStore::new(ParameterSpec::bugzilla());
        store.extract_options(args, &diagnostics);

        let instance = store.get_present("instance").map(str::to_string);
        let alternate = store.get_present("bzalternateconfig").map(str::to_string);
        let caller_set: HashSet<String> =
            store.explicit_names().into_iter().map(str::to_string).collect();

        for default in file.default_parameters(instance.as_deref()) {
            let Some((name, value)) = default.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if caller_set.contains(name) {
                continue;
            }
            if let Err(diagnostic) = store.set(name, value) {
                diagnostics.push(diagnostic);
            }
        }

        let config = file.resolve(instance.as_deref(), alternate.as_deref(), &diagnostics);
        tracing::debug!(
            instance = ?instance,
            alternate = ?alternate,
            parameters = ?store.explicit_names(),
            "report request"
        );

        Self {
            store,
            config,
            diagnostics,
            now: Utc::now(),
        }
    }

    /// Instant relative dates resolve against.
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    #[must_use]
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Compile without a database, using sub-selects for field ids.
    pub fn compile(&mut self, tables: &dyn TableNames) -> CompiledQuery {
        self.compile_with(tables, None)
    }

    fn compile_with(&mut self, tables: &dyn TableNames, ids: Option<&FieldIds>) -> CompiledQuery {
        QueryCompiler::new(&mut self.store, tables, &self.diagnostics)
            .field_ids(ids)
            .now(self.now)
            .bzserver(self.config.bzserver.clone())
            .compile()
    }

    /// Run the report against a database.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::ConnectionFailed`] when the database cannot be
    /// opened and [`ReportError::QueryFailed`] (carrying the SQL with its
    /// parameters inlined) when the statement fails.
    pub fn run<C: Connector>(mut self, connector: &C, cache: &FieldIdCache) -> Result<ReportOutput> {
        let conn = connector.connect()?;

        let ids = match cache.ensure(connector, &conn) {
            Ok(ids) => Some(ids),
            Err(e) => {
                tracing::warn!(error = %e, "field ids unavailable, falling back to sub-selects");
                None
            }
        };

        let query = self.compile_with(connector, ids.as_deref());
        let sql = query.display_sql();
        tracing::debug!(sql = %sql, "executing report query");

        let executed = connector.execute(&conn, &query.sql, &query.params);
        connector.close(conn);
        let rows = executed.map_err(|e| match e {
            ReportError::QueryFailed { message, .. } => ReportError::QueryFailed {
                sql: sql.clone(),
                message,
            },
            other => other,
        })?;

        let body = if self.store.get("format") == Some("count") {
            let count = rows
                .last()
                .and_then(|row| row.get("count").and_then(serde_json::Value::as_i64))
                .unwrap_or(0);
            ReportBody::Count(count)
        } else if rows.row_count() == 0 && self.store.get_present("total").is_none() {
            tracing::debug!("no results to render");
            ReportBody::NoResults(self.store.get("noresultsmessage").unwrap_or_default().to_string())
        } else {
            let renderer = Renderer::new(&self.store, &self.config, &self.diagnostics, &query)
                .with_now(self.now);
            ReportBody::Table(renderer.render(rows))
        };

        let search_url =
            (self.store.get("bzurl") == Some("show")).then(|| query.search_url.clone());

        Ok(ReportOutput {
            body,
            sql,
            search_url,
            diagnostics: self.diagnostics.to_vec(),
            debug: self.store.debug_level(),
        })
    }
}
