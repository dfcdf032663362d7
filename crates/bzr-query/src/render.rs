//! Result rows → rendered table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use bzr_connector::Row;
use bzr_core::{DiagnosticKind, Diagnostics, ParameterStore, ReportConfig};

use crate::compiler::CompiledQuery;
use crate::value_format::{cell_text, ValueFormatter};

/// One line of the table body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderedRow {
    /// Emitted whenever the group column changes value.
    Group { heading: String },
    Bug {
        /// `"<priority> <severity>"`, used for row styling.
        class: String,
        cells: Vec<String>,
        /// Most recent comment when `lastcomment` is set.
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

/// Count of rows per value of the `bar` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarEntry {
    pub value: String,
    pub count: usize,
}

/// A report ready for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub columns: Vec<String>,
    /// `None` with `headers=hide`.
    pub headings: Option<Vec<String>>,
    pub rows: Vec<RenderedRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub totals: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bars: Option<Vec<BarEntry>>,
    pub sortable: bool,
    /// More rows matched than were rendered.
    pub truncated: bool,
}

/// Renders the rows of one compiled query.
pub struct Renderer<'a> {
    store: &'a ParameterStore,
    config: &'a ReportConfig,
    diagnostics: &'a Diagnostics,
    query: &'a CompiledQuery,
    formatter: ValueFormatter<'a>,
}

impl<'a> Renderer<'a> {
    #[must_use]
    pub fn new(
        store: &'a ParameterStore,
        config: &'a ReportConfig,
        diagnostics: &'a Diagnostics,
        query: &'a CompiledQuery,
    ) -> Self {
        Self {
            store,
            config,
            diagnostics,
            query,
            formatter: ValueFormatter::new(store, config, diagnostics)
                .with_formats(query.formats.clone()),
        }
    }

    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.formatter = self.formatter.with_now(now);
        self
    }

    /// Row limit: the `maxrows` parameter, capped by the configuration.
    #[must_use]
    pub fn max_rows(&self) -> usize {
        self.limit("maxrows", self.config.maxrows)
    }

    /// Row limit for bar aggregation, capped the same way.
    #[must_use]
    pub fn max_rows_bar(&self) -> usize {
        self.limit("maxrowsbar", self.config.maxrowsbar)
    }

    fn limit(&self, name: &str, configured: usize) -> usize {
        let Some(value) = self.store.get_present(name) else {
            return configured;
        };
        match value.parse::<usize>() {
            Ok(requested) if requested > configured => {
                self.diagnostics.warn(
                    DiagnosticKind::ValidationRejected,
                    format!("{name}={requested} is greater than the configured {configured}, ignoring"),
                );
                configured
            }
            Ok(requested) => requested,
            Err(_) => {
                self.diagnostics.warn(
                    DiagnosticKind::ValidationRejected,
                    format!("{name}={value} is not a number, ignoring"),
                );
                configured
            }
        }
    }

    /// Heading for a column: inline title, then the schema heading, then
    /// the bare name.
    #[must_use]
    pub fn heading(&self, column: &str) -> String {
        self.query
            .titles
            .get(column)
            .map(String::as_str)
            .or_else(|| self.store.spec().heading(column))
            .unwrap_or(column)
            .to_string()
    }

    /// Render the fetched rows.
    pub fn render(&self, rows: impl IntoIterator<Item = Row>) -> RenderedTable {
        let spec = self.store.spec();
        let columns = &self.query.columns;
        let max_rows = self.max_rows();
        let group = self
            .store
            .group()
            .and_then(|g| g.split(',').next())
            .and_then(|g| g.split_whitespace().next())
            .map(|g| (g, spec.result_key(g)));
        let bar = self.store.get_present("bar");
        let max_rows_bar = self.max_rows_bar();
        let totalled: Vec<&str> = self
            .store
            .get_present("total")
            .map(|t| t.split(',').collect())
            .unwrap_or_default();

        let mut rendered = Vec::new();
        let mut sums: HashMap<&str, f64> = totalled.iter().map(|c| (*c, 0.0)).collect();
        let mut bars: Vec<BarEntry> = Vec::new();
        let mut current_group: Option<String> = None;
        let mut count = 0;
        let mut truncated = false;

        for row in rows {
            if let Some(bar) = bar.filter(|_| count < max_rows_bar) {
                let value = self
                    .formatter
                    .format_heading(&self.cell(&row, spec.result_key(bar)), bar);
                match bars.iter_mut().find(|b| b.value == value) {
                    Some(entry) => entry.count += 1,
                    None => bars.push(BarEntry { value, count: 1 }),
                }
            }

            if count >= max_rows {
                truncated = true;
                count += 1;
                continue;
            }
            count += 1;

            if let Some((column, key)) = group {
                let value = self.cell(&row, key);
                if current_group.as_deref() != Some(value.as_str()) {
                    rendered.push(RenderedRow::Group {
                        heading: self.formatter.format_heading(&value, column),
                    });
                    current_group = Some(value);
                }
            }

            for column in &totalled {
                let value = self.cell(&row, spec.result_key(column));
                *sums.entry(*column).or_default() += value.parse::<f64>().unwrap_or(0.0);
            }

            rendered.push(self.render_row(&row));
        }

        if truncated {
            tracing::debug!(rows = count, max_rows, "result truncated");
        }

        let totals = (!totalled.is_empty()).then(|| {
            columns
                .iter()
                .map(|c| match sums.get(c.as_str()) {
                    Some(sum) if *sum == 0.0 => "0".to_string(),
                    Some(sum) => self.formatter.format_with(&sum.to_string(), "number", ""),
                    None => String::new(),
                })
                .collect()
        });

        let headings = (self.store.get("headers") != Some("hide"))
            .then(|| columns.iter().map(|c| self.heading(c)).collect());

        RenderedTable {
            title: self.store.get_present("heading").map(str::to_string),
            columns: columns.clone(),
            headings,
            rows: rendered,
            totals,
            bars: bar.map(|_| bars),
            sortable: self.store.is("sortable"),
            truncated,
        }
    }

    fn render_row(&self, row: &Row) -> RenderedRow {
        let spec = self.store.spec();
        let class = format!("{} {}", self.cell(row, "priority"), self.cell(row, "severity"));
        let cells = self
            .query
            .columns
            .iter()
            .map(|column| {
                let value = self.cell(row, spec.result_key(column));
                let title = self.formatter.value_title(row, column);
                self.formatter.format(&value, column, &title)
            })
            .collect();
        let comment = self
            .store
            .get_present("lastcomment")
            .and_then(|_| row.get("thetext"))
            .map(cell_text);
        RenderedRow::Bug {
            class,
            cells,
            comment,
        }
    }

    fn cell(&self, row: &Row, key: &str) -> String {
        row.get(key).map(cell_text).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzr_connector::PlainTables;
    use bzr_core::ParameterSpec;
    use chrono::TimeZone;
    use serde_json::json;

    use crate::compiler::QueryCompiler;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn compiled(params: &[(&str, &str)]) -> (ParameterStore, CompiledQuery) {
        let mut store = ParameterStore::new(ParameterSpec::bugzilla());
        for (name, value) in params {
            store.set(name, value).unwrap();
        }
        let query = QueryCompiler::new(&mut store, &PlainTables, &Diagnostics::new())
            .now(now())
            .bzserver("https://bugs.example.com")
            .compile();
        (store, query)
    }

    fn config() -> ReportConfig {
        ReportConfig {
            bzserver: "https://bugs.example.com".to_string(),
            maxrows: 10,
            ..ReportConfig::default()
        }
    }

    fn row(fields: serde_json::Value) -> Row {
        serde_json::from_value(fields).unwrap()
    }

    fn bugs() -> Vec<Row> {
        vec![
            row(json!({"id": 101, "priority": "P1", "severity": "major", "status": "NEW",
                       "product": "Widgets", "summary": "Crash on startup", "votes": 3})),
            row(json!({"id": 102, "priority": "P2", "severity": "normal", "status": "ASSIGNED",
                       "product": "Widgets", "summary": "Button misaligned", "votes": 0})),
            row(json!({"id": 105, "priority": "P2", "severity": "enhancement", "status": "NEW",
                       "product": "Gadgets", "summary": "Add dark mode", "votes": 8})),
        ]
    }

    fn cells(table: &RenderedTable) -> Vec<Vec<String>> {
        table
            .rows
            .iter()
            .filter_map(|r| match r {
                RenderedRow::Bug { cells, .. } => Some(cells.clone()),
                RenderedRow::Group { .. } => None,
            })
            .collect()
    }

    fn render(params: &[(&str, &str)], rows: Vec<Row>) -> (RenderedTable, Diagnostics) {
        let (store, query) = compiled(params);
        let config = config();
        let diagnostics = Diagnostics::new();
        let table = Renderer::new(&store, &config, &diagnostics, &query)
            .with_now(now())
            .render(rows);
        (table, diagnostics)
    }

    // === Headings ===

    #[test]
    fn headings_use_titles_then_schema_then_name() {
        let (table, _) = render(&[("columns", "id,summary:What,cf_team")], bugs());
        assert_eq!(
            table.headings,
            Some(vec!["ID".to_string(), "What".to_string(), "cf_team".to_string()])
        );
    }

    #[test]
    fn headers_can_be_hidden() {
        let (table, _) = render(&[("headers", "hide")], bugs());
        assert!(table.headings.is_none());
    }

    // === Rows ===

    #[test]
    fn cells_are_formatted_per_column() {
        let (table, _) = render(&[("columns", "id,summary,votes")], bugs());
        let cells = cells(&table);
        assert_eq!(cells.len(), 3);
        assert_eq!(
            cells[0],
            [
                "[https://bugs.example.com/show_bug.cgi?id=101 <span title=\"101\">101</span>]",
                "Crash on startup",
                "3",
            ]
        );
        assert_eq!(cells[1][2], "", "zero votes render blank");
    }

    #[test]
    fn rows_are_classed_by_priority_and_severity() {
        let (table, _) = render(&[], bugs());
        let RenderedRow::Bug { class, .. } = &table.rows[0] else {
            panic!("expected a bug row");
        };
        assert_eq!(class, "P1 major");
    }

    #[test]
    fn person_columns_read_their_result_keys() {
        let rows = vec![row(json!({"id": 1, "assignedto": "Alice Smith"}))];
        let (table, _) = render(&[("columns", "to")], rows);
        assert_eq!(cells(&table), [["Alice&nbsp;Smith"]]);
    }

    #[test]
    fn group_rows_mark_value_changes() {
        let (table, _) = render(&[("group", "product"), ("columns", "id")], bugs());
        let headings: Vec<&str> = table
            .rows
            .iter()
            .filter_map(|r| match r {
                RenderedRow::Group { heading } => Some(heading.as_str()),
                RenderedRow::Bug { .. } => None,
            })
            .collect();
        assert_eq!(headings, ["Widgets", "Gadgets"]);
        assert_eq!(table.rows.len(), 5);
        assert!(!table.sortable);
    }

    #[test]
    fn multi_column_group_heads_on_the_first_column() {
        let (table, _) = render(&[("group", "product,component"), ("columns", "id")], bugs());
        assert_eq!(
            table.rows[0],
            RenderedRow::Group {
                heading: "Widgets".to_string()
            }
        );
    }

    #[test]
    fn empty_group_value_reads_not_set() {
        let rows = vec![row(json!({"id": 1, "product": null}))];
        let (table, _) = render(&[("group", "product"), ("columns", "id")], rows);
        assert_eq!(
            table.rows[0],
            RenderedRow::Group {
                heading: "not set".to_string()
            }
        );
    }

    #[test]
    fn last_comment_is_attached() {
        let rows = vec![row(json!({"id": 1, "thetext": "Looking into it"}))];
        let (table, _) = render(&[("lastcomment", "1"), ("columns", "id")], rows);
        let RenderedRow::Bug { comment, .. } = &table.rows[0] else {
            panic!("expected a bug row");
        };
        assert_eq!(comment.as_deref(), Some("Looking into it"));
    }

    // === Limits ===

    #[test]
    fn maxrows_truncates() {
        let (table, diagnostics) = render(&[("maxrows", "2")], bugs());
        assert_eq!(cells(&table).len(), 2);
        assert!(table.truncated);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn maxrows_above_configuration_is_capped() {
        let (store, query) = compiled(&[("maxrows", "500")]);
        let config = config();
        let diagnostics = Diagnostics::new();
        let renderer = Renderer::new(&store, &config, &diagnostics, &query);
        assert_eq!(renderer.max_rows(), 10);
        assert!(diagnostics.has(DiagnosticKind::ValidationRejected));
    }

    // === Totals and bars ===

    #[test]
    fn totals_sum_listed_columns() {
        let (table, _) = render(&[("columns", "id,votes"), ("total", "votes")], bugs());
        assert_eq!(table.totals, Some(vec![String::new(), "11".to_string()]));
    }

    #[test]
    fn zero_totals_still_show() {
        let (table, _) = render(&[("columns", "id,votes"), ("total", "votes")], Vec::new());
        assert_eq!(table.totals, Some(vec![String::new(), "0".to_string()]));
        assert!(table.rows.is_empty());
    }

    #[test]
    fn bar_counts_rows_per_value() {
        let (table, _) = render(&[("bar", "status")], bugs());
        assert_eq!(
            table.bars,
            Some(vec![
                BarEntry { value: "NEW".to_string(), count: 2 },
                BarEntry { value: "ASSIGNED".to_string(), count: 1 },
            ])
        );
    }

    #[test]
    fn table_serializes_with_row_kinds() {
        let (table, _) = render(&[("group", "product"), ("columns", "id")], bugs());
        let value = serde_json::to_value(&table).unwrap();
        assert_eq!(value["rows"][0]["kind"], "group");
        assert_eq!(value["rows"][1]["kind"], "bug");
        assert!(value.get("totals").is_none());
    }
}
