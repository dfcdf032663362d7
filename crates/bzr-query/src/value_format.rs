//! Cell formatting for rendered reports.
//!
//! Each column has a format spec `name[~argument]` from the schema, which
//! `link`, `modifiedformat` and `createdformat` can override per report.

use std::cell::OnceCell;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};

use bzr_connector::Row;
use bzr_core::{DiagnosticKind, Diagnostics, ParameterStore, ReportConfig};

/// Deadline value Bugzilla uses for "no date".
pub const NO_DATE_SENTINEL: &str = "2100-01-01";

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Text of a result value: null is empty, strings are unquoted.
#[must_use]
pub fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a database timestamp or calendar date as UTC.
fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn is_no_date(time: NaiveDateTime) -> bool {
    NaiveDate::parse_from_str(NO_DATE_SENTINEL, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        == Some(time)
}

/// Calendar boundaries the radar format compares against.
#[derive(Debug)]
struct RadarMarks {
    yesterday: String,
    today: String,
    tomorrow: String,
    this_week: String,
    next_week: String,
    this_month: String,
    next_month: String,
    this_year: String,
    next_year: String,
}

impl RadarMarks {
    fn at(now: NaiveDateTime) -> Self {
        let day = |t: NaiveDateTime| t.format("%Y-%m-%d").to_string();
        let week = |t: NaiveDateTime| t.format("%G-%V").to_string();
        let month = |t: NaiveDateTime| t.format("%Y-%m").to_string();
        let year = |t: NaiveDateTime| t.format("%Y").to_string();
        let in_a_month = now.checked_add_months(Months::new(1)).unwrap_or(now);
        let in_a_year = now.checked_add_months(Months::new(12)).unwrap_or(now);
        Self {
            yesterday: day(now - Duration::days(1)),
            today: day(now),
            tomorrow: day(now + Duration::days(1)),
            this_week: week(now),
            next_week: week(now + Duration::weeks(1)),
            this_month: month(now),
            next_month: month(in_a_month),
            this_year: year(now),
            next_year: year(in_a_year),
        }
    }
}

/// Formats result values according to column format specs.
pub struct ValueFormatter<'a> {
    store: &'a ParameterStore,
    config: &'a ReportConfig,
    diagnostics: &'a Diagnostics,
    overrides: HashMap<String, String>,
    now: DateTime<Utc>,
    radar: OnceCell<RadarMarks>,
}

impl<'a> ValueFormatter<'a> {
    #[must_use]
    pub fn new(
        store: &'a ParameterStore,
        config: &'a ReportConfig,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            store,
            config,
            diagnostics,
            overrides: HashMap::new(),
            now: Utc::now(),
            radar: OnceCell::new(),
        }
    }

    /// Per-column format overrides, taking precedence over the schema.
    #[must_use]
    pub fn with_formats(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Format spec in effect for a column.
    #[must_use]
    pub fn format_of(&self, column: &str) -> Option<&str> {
        self.overrides
            .get(column)
            .map(String::as_str)
            .or_else(|| self.store.spec().format(column))
    }

    /// Format a value for a column; columns without a format pass through.
    #[must_use]
    pub fn format(&self, value: &str, column: &str, title: &str) -> String {
        match self.format_of(column) {
            Some(spec) => self.format_with(value, spec, title),
            None => value.to_string(),
        }
    }

    /// Format a group heading value. `groupformat` wins over the column
    /// format and empty results read `not set`.
    #[must_use]
    pub fn format_heading(&self, value: &str, column: &str) -> String {
        let formatted = match self.store.get_present("groupformat") {
            Some(spec) => self.format_with(value, spec, ""),
            None => self.format(value, column, ""),
        };
        if formatted.is_empty() {
            "not set".to_string()
        } else {
            formatted
        }
    }

    /// Space-joined values of the columns that title this column's cells.
    #[must_use]
    pub fn value_title(&self, row: &Row, column: &str) -> String {
        let Some(columns) = self.store.spec().value_title_columns(column) else {
            return String::new();
        };
        columns
            .split(',')
            .map(|c| row.get(c).map(cell_text).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    /// Apply an explicit format spec.
    #[must_use]
    pub fn format_with(&self, value: &str, spec: &str, title: &str) -> String {
        let (name, argument) = match spec.split_once('~') {
            Some((name, argument)) => (name, Some(argument)),
            None => (spec, None),
        };

        match name {
            "date" => self.with_date(value, |t| t.format("%Y-%m-%d").to_string()),
            "relativedate" => self.with_date(value, |t| self.relative_date(t)),
            "radar" => self.with_date(value, |t| self.radar(t).to_string()),
            "url" if value.is_empty() => "&nbsp;".to_string(),
            "url" => format!("[{value}]"),
            "id" => self.bug_link(value, title),
            "number" => self.number(value),
            "name" if value.is_empty() => "&nbsp;".to_string(),
            "name" if self.store.get("nameformat") == Some("tla") => name_to_tla(value),
            "name" => value.replace(' ', "&nbsp;"),
            "link" => value
                .split(',')
                .filter(|part| !part.is_empty())
                .map(|part| match argument {
                    Some(namespace) => format!("[[{namespace} {part}|{part}]]"),
                    None => format!("[[{part}]]"),
                })
                .collect::<Vec<_>>()
                .join(", "),
            _ => {
                self.diagnostics.warn(
                    DiagnosticKind::GrammarUnrecognized,
                    format!("Format {spec} not recognised"),
                );
                value.to_string()
            }
        }
    }

    /// Run a date formatter; empty, unparseable and "no date" values are
    /// handled here.
    fn with_date(&self, value: &str, f: impl FnOnce(NaiveDateTime) -> String) -> String {
        if value.is_empty() {
            return String::new();
        }
        match parse_timestamp(value) {
            Some(t) if is_no_date(t) => String::new(),
            Some(t) => f(t),
            None => value.to_string(),
        }
    }

    fn relative_date(&self, time: NaiveDateTime) -> String {
        let diff = (self.now.naive_utc() - time).num_seconds();
        let date = time.format("%Y-%m-%d").to_string();

        let (visible, title, class) = if diff > 0 {
            match diff {
                d if d < 3_600 => ("+++", "&lt; 1 hour", "date2"),
                d if d < 86_400 => ("++", "&lt; 1 day", "date3"),
                d if d < 172_800 => ("+", "&lt; 2 days", "date3"),
                d if d < 259_200 => ("-", "&lt; 3 days", "date3"),
                d if d < 345_600 => (".", "&lt; 4 days", "date3"),
                d if d < 604_800 => ("&nbsp;", "&lt; 1 week", "date4"),
                d if d < 1_209_600 => ("&nbsp;", "&lt; 2 weeks", "date4"),
                d if d < 2_592_000 => ("&nbsp;", "&lt; 1 month", "date5"),
                d if d < 31_536_000 => ("&nbsp;", "&lt; 1 year", "date6"),
                _ => (date.as_str(), "", "date6"),
            }
        } else {
            match -diff {
                d if d < 60 => ("&lt; 1 min to go", "", "date1"),
                d if d < 3_600 => ("&lt; 1 hr to go", "", "date2"),
                d if d < 86_400 => ("&lt; 1 day to go", "", "date3"),
                d if d < 604_800 => ("&lt; 1 week to go", "", "date4"),
                d if d < 2_592_000 => ("&gt; 1 week to go", "", "date5"),
                _ => (date.as_str(), "", "date6"),
            }
        };

        let title = if title.is_empty() {
            format!("({date})")
        } else {
            format!("{title} ({date})")
        };
        format!("<div class=\"{class}\" title=\"{title}\">{visible}</div>")
    }

    fn radar(&self, time: NaiveDateTime) -> &'static str {
        let now = self.now.naive_utc();
        let marks = self.radar.get_or_init(|| RadarMarks::at(now));
        let day = time.format("%Y-%m-%d").to_string();
        let week = time.format("%G-%V").to_string();
        let month = time.format("%Y-%m").to_string();
        let year = time.format("%Y").to_string();

        if day == marks.yesterday {
            "yesterday"
        } else if time < now - Duration::days(1) {
            "overdue"
        } else if day == marks.today {
            "today"
        } else if day == marks.tomorrow {
            "tomorrow"
        } else if week == marks.this_week {
            "this week"
        } else if week == marks.next_week {
            "next week"
        } else if month == marks.this_month {
            "this month"
        } else if month == marks.next_month {
            "next month"
        } else if year == marks.this_year {
            "this year"
        } else if year == marks.next_year {
            "next year"
        } else {
            "years away"
        }
    }

    fn bug_link(&self, value: &str, title: &str) -> String {
        if value.is_empty() {
            return "&nbsp;".to_string();
        }
        let text = if title.is_empty() {
            value.to_string()
        } else {
            let flag = if title == value {
                ""
            } else {
                "<span class=\"flag\">+</span>"
            };
            format!("<span title=\"{title}\">{value}{flag}</span>")
        };

        let server = &self.config.bzserver;
        if self.config.raw_html {
            return format!("<a href=\"{server}/show_bug.cgi?id={value}\">{text}</a>");
        }
        match self.config.interwiki.as_deref().filter(|iw| !iw.is_empty()) {
            Some(interwiki) => format!("[[{interwiki}:{value}|{text}]]"),
            None => format!("[{server}/show_bug.cgi?id={value} {text}]"),
        }
    }

    fn number(&self, value: &str) -> String {
        let parsed = if value.trim().is_empty() {
            Some(0.0)
        } else {
            value.trim().parse::<f64>().ok()
        };
        let Some(number) = parsed else {
            return value.to_string();
        };

        if number == 0.0 {
            return if self.store.get("zeroasblank") == Some("true") {
                String::new()
            } else {
                "0".to_string()
            };
        }
        if number.fract() == 0.0 {
            return format!("{number:.0}");
        }
        let one_decimal = (number * 10.0).round() / 10.0;
        if one_decimal.fract() == 0.0 {
            format!("{number:.2}")
        } else {
            format!("{one_decimal:.1}")
        }
    }
}

/// Three-letter abbreviation of a person's name.
#[must_use]
pub fn name_to_tla(value: &str) -> String {
    fn take(s: &str, n: usize) -> String {
        s.chars().take(n).collect()
    }

    let names: Vec<&str> = value.split(' ').collect();
    let tla = match names.as_slice() {
        [only] => take(only, 3),
        [first, second, ..] if second.chars().count() > 1 => take(first, 1) + &take(second, 2),
        [first, second, ..] if first.chars().count() > 1 => take(first, 2) + &take(second, 1),
        [first, second, ..] => format!("{first}{second}A"),
        [] => String::new(),
    };
    tla.to_uppercase()
}
