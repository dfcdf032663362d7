//! Parameter schema for report kinds.
//!
//! A [`ParameterSpec`] declares which parameters a report accepts, their
//! type tags and defaults, and the lookup tables that tie report columns to
//! SQL columns, headings, formats and search-engine field names. Values are
//! whitelisted per type with a permissive character class before they are
//! stored; anything outside the class is rejected, never escaped.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, DiagnosticKind};

/// Type tag of a report parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    Field,
    FieldId,
    FieldDate,
    FieldNumber,
    FieldDepends,
    FieldKeywords,
    FieldText,
    FieldJoin,
    FieldSpecial,
    Filters,
    Columns,
    Sort,
    Column,
    Boolean,
    Value,
    Free,
}

impl ParamType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Field => "field",
            Self::FieldId => "field-id",
            Self::FieldDate => "field-date",
            Self::FieldNumber => "field-number",
            Self::FieldDepends => "field-depends",
            Self::FieldKeywords => "field-keywords",
            Self::FieldText => "field-text",
            Self::FieldJoin => "field-join",
            Self::FieldSpecial => "field-special",
            Self::Filters => "filters",
            Self::Columns => "columns",
            Self::Sort => "sort",
            Self::Column => "column",
            Self::Boolean => "boolean",
            Self::Value => "value",
            Self::Free => "free",
        }
    }

    /// Whether this is one of the `field*` types that filter rows.
    #[must_use]
    pub fn is_field(self) -> bool {
        matches!(
            self,
            Self::Field
                | Self::FieldId
                | Self::FieldDate
                | Self::FieldNumber
                | Self::FieldDepends
                | Self::FieldKeywords
                | Self::FieldText
                | Self::FieldJoin
                | Self::FieldSpecial
        )
    }

    /// Whether values of this type are comma lists whose entries get trimmed.
    #[must_use]
    pub fn tidies_commas(self) -> bool {
        matches!(self, Self::Field | Self::Columns)
    }

    fn policy(self) -> &'static Regex {
        match self {
            Self::Filters => &FILTER_POLICY,
            Self::Column => &COLUMN_POLICY,
            Self::Columns => &COLUMNS_POLICY,
            Self::FieldDate => &DATE_POLICY,
            Self::Free => &FREE_POLICY,
            Self::Sort => &SORT_POLICY,
            t if t.is_field() => &FILTER_POLICY,
            _ => &WORD_POLICY,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// `+->` inside a class is the range '+'..'>', which admits `,-./0-9:;<=>`.
static FILTER_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[A-Za-z0-9_,@.\s*/%!()+->]*$"));
static COLUMN_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[A-Za-z0-9_+-]*$"));
static COLUMNS_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[A-Za-z0-9_,+-~]*$"));
static DATE_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[*A-Za-z0-9_+-:]*$"));
static FREE_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^.*$"));
static SORT_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[A-Za-z0-9_\s,-]*$"));
static WORD_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[A-Za-z0-9_]*$"));
static DEBUG_POLICY: LazyLock<Regex> = LazyLock::new(|| policy(r"^[12]$"));

fn policy(pattern: &str) -> Regex {
    Regex::new(pattern).expect("parameter policy patterns are valid")
}

/// Name of the host-level option that appends the SQL to the output.
pub const DEBUG_PARAMETER: &str = "debug";

/// Schema of one report kind.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    parameters: &'static [(&'static str, ParamType)],
    defaults: &'static [(&'static str, &'static str)],
    /// Column headings used when no title override is given.
    pub headings: &'static [(&'static str, &'static str)],
    /// Default value format per column.
    pub formats: &'static [(&'static str, &'static str)],
    /// SQL expression each field filters and sorts on.
    pub sql_columns: &'static [(&'static str, &'static str)],
    /// Field names understood by the external search engine.
    pub search_names: &'static [(&'static str, &'static str)],
    /// Fields that sort descending by default.
    pub default_orders: &'static [(&'static str, &'static str)],
    /// ORDER BY overrides that take precedence over `sql_columns`.
    pub sort_mappings: &'static [(&'static str, &'static str)],
    /// Result-set key a column is read from when it differs from its name.
    pub result_keys: &'static [(&'static str, &'static str)],
    /// Result columns joined together to form a value's title.
    pub value_titles: &'static [(&'static str, &'static str)],
}

fn lookup(table: &'static [(&'static str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

impl ParameterSpec {
    /// Type of a parameter, or `None` if it is not part of the schema.
    #[must_use]
    pub fn param_type(&self, name: &str) -> Option<ParamType> {
        self.parameters
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
    }

    #[must_use]
    pub fn is_supported(&self, name: &str) -> bool {
        self.param_type(name).is_some()
    }

    /// All parameters in declaration order.
    pub fn parameters(&self) -> impl Iterator<Item = (&'static str, ParamType)> + '_ {
        self.parameters.iter().copied()
    }

    #[must_use]
    pub fn default_value(&self, name: &str) -> Option<&'static str> {
        lookup(self.defaults, name)
    }

    #[must_use]
    pub fn heading(&self, column: &str) -> Option<&'static str> {
        lookup(self.headings, column)
    }

    #[must_use]
    pub fn format(&self, column: &str) -> Option<&'static str> {
        lookup(self.formats, column)
    }

    /// SQL expression for a field, falling back to the field name itself.
    #[must_use]
    pub fn sql_column<'a>(&self, field: &'a str) -> &'a str {
        lookup(self.sql_columns, field).unwrap_or(field)
    }

    #[must_use]
    pub fn search_name<'a>(&self, field: &'a str) -> &'a str {
        lookup(self.search_names, field).unwrap_or(field)
    }

    #[must_use]
    pub fn default_order(&self, field: &str) -> Option<&'static str> {
        lookup(self.default_orders, field)
    }

    /// ORDER BY expression for a sort column: explicit override, then SQL
    /// column, then `None` so the caller can fall back to the bare name.
    #[must_use]
    pub fn sort_expression(&self, column: &str) -> Option<&'static str> {
        lookup(self.sort_mappings, column).or_else(|| lookup(self.sql_columns, column))
    }

    #[must_use]
    pub fn result_key<'a>(&self, column: &'a str) -> &'a str {
        lookup(self.result_keys, column).unwrap_or(column)
    }

    #[must_use]
    pub fn value_title_columns(&self, column: &str) -> Option<&'static str> {
        lookup(self.value_titles, column)
    }

    /// Check a raw value against the character policy of its parameter.
    ///
    /// # Errors
    ///
    /// Returns an [`DiagnosticKind::UnsupportedParameter`] diagnostic for
    /// names outside the schema and [`DiagnosticKind::ValidationRejected`]
    /// for values containing characters outside the policy.
    pub fn validate(&self, name: &str, raw: &str) -> Result<String, Diagnostic> {
        let value = raw.trim();
        let policy: &Regex = if name == DEBUG_PARAMETER {
            &DEBUG_POLICY
        } else {
            match self.param_type(name) {
                Some(t) => t.policy(),
                None => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::UnsupportedParameter,
                        format!("Parameter {name} is not supported"),
                    ))
                }
            }
        };

        if policy.is_match(value) {
            Ok(value.to_string())
        } else {
            Err(Diagnostic::new(
                DiagnosticKind::ValidationRejected,
                format!(
                    "Parameter {name}={value} is invalid using regex {}",
                    policy.as_str()
                ),
            ))
        }
    }

    /// Schema of the Bugzilla bug report.
    #[must_use]
    pub fn bugzilla() -> Self {
        Self {
            parameters: BUGZILLA_PARAMETERS,
            defaults: BUGZILLA_DEFAULTS,
            headings: BUGZILLA_HEADINGS,
            formats: BUGZILLA_FORMATS,
            sql_columns: BUGZILLA_SQL_COLUMNS,
            search_names: BUGZILLA_SEARCH_NAMES,
            default_orders: BUGZILLA_DEFAULT_ORDERS,
            sort_mappings: BUGZILLA_SORT_MAPPINGS,
            result_keys: BUGZILLA_RESULT_KEYS,
            value_titles: BUGZILLA_VALUE_TITLES,
        }
    }
}

const BUGZILLA_PARAMETERS: &[(&str, ParamType)] = &[
    ("alias", ParamType::FieldId),
    ("assigned", ParamType::FieldDate),
    ("attachments", ParamType::FieldNumber),
    ("bar", ParamType::Column),
    ("bzalternateconfig", ParamType::Free),
    ("bzurl", ParamType::Value),
    ("blocks", ParamType::FieldDepends),
    ("cc", ParamType::Field),
    ("closed", ParamType::FieldDate),
    ("columns", ParamType::Columns),
    ("created", ParamType::FieldDate),
    ("createdformat", ParamType::Value),
    ("component", ParamType::Field),
    ("customfields", ParamType::Value),
    ("customprefix", ParamType::Value),
    ("deadline", ParamType::FieldDate),
    ("debug", ParamType::Value),
    ("depends", ParamType::FieldDepends),
    ("dependsstatus", ParamType::FieldJoin),
    ("disablecache", ParamType::Boolean),
    ("estimated", ParamType::FieldNumber),
    ("filters", ParamType::Filters),
    ("flag", ParamType::FieldSpecial),
    ("format", ParamType::Value),
    ("from", ParamType::Field),
    ("group", ParamType::Sort),
    ("groupformat", ParamType::Value),
    ("grouporder", ParamType::Value),
    ("hardware", ParamType::Field),
    ("heading", ParamType::Free),
    ("headers", ParamType::Value),
    ("id", ParamType::FieldId),
    ("implicitcustom", ParamType::Boolean),
    ("instance", ParamType::Value),
    ("keywords", ParamType::FieldKeywords),
    ("link", ParamType::Columns),
    ("lastcomment", ParamType::Boolean),
    ("maxrows", ParamType::Value),
    ("maxrowsbar", ParamType::Value),
    ("milestone", ParamType::Field),
    ("modified", ParamType::FieldDate),
    ("modifiedformat", ParamType::Value),
    ("nameformat", ParamType::Value),
    ("order", ParamType::Value),
    ("os", ParamType::Field),
    ("priority", ParamType::Field),
    ("product", ParamType::Field),
    ("qa", ParamType::Field),
    ("quickflag", ParamType::Value),
    ("noresultsmessage", ParamType::Free),
    ("remaining", ParamType::FieldNumber),
    ("reopened", ParamType::FieldDate),
    ("resolution", ParamType::Field),
    ("resolved", ParamType::FieldDate),
    ("search", ParamType::FieldText),
    ("severity", ParamType::Field),
    ("sort", ParamType::Sort),
    ("sortable", ParamType::Boolean),
    ("status", ParamType::Field),
    ("status_whiteboard", ParamType::Field),
    ("to", ParamType::Field),
    ("total", ParamType::Columns),
    ("url", ParamType::Field),
    ("version", ParamType::Field),
    ("verified", ParamType::FieldDate),
    ("votes", ParamType::FieldNumber),
    ("work", ParamType::FieldNumber),
    ("zeroasblank", ParamType::Boolean),
];

const BUGZILLA_DEFAULTS: &[(&str, &str)] = &[
    ("bzurl", "show"),
    ("columns", "id,priority,status,severity,version,product,summary,url"),
    ("customprefix", "cf_"),
    ("dependsstatus", "!(CLOSED,VERIFIED,RESOLVED)"),
    ("format", "table"),
    ("implicitcustom", "false"),
    ("noresultsmessage", "no bugzilla tickets were found"),
    ("order", "asc"),
    ("status", "!CLOSED"),
    ("sort", "priority,status"),
    ("sortable", "1"),
    ("zeroasblank", "true"),
];

const BUGZILLA_HEADINGS: &[(&str, &str)] = &[
    ("alias", "Alias"),
    ("assigned", "Assigned"),
    ("attachments", "@"),
    ("blocks", "Blocks"),
    ("closed", "Closed"),
    ("component", "Component"),
    ("cc", "CC"),
    ("created", "Created"),
    ("deadline", "Deadline"),
    ("depends", "Depends"),
    ("estimated", "E"),
    ("flag", "Flagged For"),
    ("flagdate", "Flag Date"),
    ("flagfrom", "Flagged By"),
    ("flagname", "Flag"),
    ("from", "Requester"),
    ("hardware", "Hardware"),
    ("keywords", "Keywords"),
    ("id", "ID"),
    ("milestone", "Milestone"),
    ("modified", "Modified"),
    ("os", "OS"),
    ("product", "Product"),
    ("priority", "P"),
    ("qa", "QA"),
    ("remaining", "R"),
    ("reopened", "Reopened"),
    ("resolution", "Resolution"),
    ("resolved", "Resolved"),
    ("severity", "Severity"),
    ("status", "Status"),
    ("status_whiteboard", "Whiteboard"),
    ("summary", "Summary"),
    ("to", "Assignee"),
    ("url", "&nbsp;"),
    ("version", "Version"),
    ("verified", "Verified"),
    ("votes", "Votes"),
    ("work", "W"),
];

const BUGZILLA_FORMATS: &[(&str, &str)] = &[
    ("alias", "id"),
    ("assigned", "date"),
    ("blocks", "id"),
    ("cc", "name"),
    ("created", "date"),
    ("closed", "date"),
    ("deadline", "date"),
    ("depends", "id"),
    ("estimated", "number"),
    ("flagdate", "date"),
    ("flagfrom", "name"),
    ("from", "name"),
    ("id", "id"),
    ("modified", "relativedate"),
    ("qa", "name"),
    ("remaining", "number"),
    ("reopened", "date"),
    ("resolved", "date"),
    ("to", "name"),
    ("url", "url"),
    ("verified", "date"),
    ("votes", "number"),
    ("work", "number"),
];

const BUGZILLA_SQL_COLUMNS: &[(&str, &str)] = &[
    ("alias", "aliases.alias"),
    ("assigned", "assignedactivity.bug_when"),
    ("attachments", "attachments.nattachments"),
    ("blocks", "blockstab.blocks"),
    ("cc", "ccprofiles.login_name"),
    ("component", "components.name"),
    ("closed", "closedactivity.bug_when"),
    ("created", "creation_ts"),
    ("depends", "dependstab.depends"),
    ("estimated", "estimated_time"),
    ("hardware", "rep_platform"),
    ("id", "bugs.bug_id"),
    ("from", "reporterprofiles.login_name"),
    ("keywords", "keyworddefs.name"),
    ("milestone", "target_milestone"),
    ("modified", "lastdiffed"),
    ("product", "products.name"),
    ("os", "op_sys"),
    ("qa", "qaprofiles.login_name"),
    ("remaining", "remaining_time"),
    ("reopened", "reopenedactivity.bug_when"),
    ("resolved", "resolvedactivity.bug_when"),
    ("severity", "bug_severity"),
    ("status", "bug_status"),
    ("to", "profiles.login_name"),
    ("url", "bug_file_loc"),
    ("verified", "verifiedactivity.bug_when"),
    ("work", "work_time"),
];

const BUGZILLA_SEARCH_NAMES: &[(&str, &str)] = &[
    ("blocks", "blocked"),
    ("hardware", "rep_platform"),
    ("id", "bug_id"),
    ("milestone", "target_milestone"),
    ("os", "op_sys"),
    ("qa", "qa_contact"),
    ("severity", "bug_severity"),
    ("status", "bug_status"),
    ("to", "assigned_to"),
];

const BUGZILLA_DEFAULT_ORDERS: &[(&str, &str)] = &[("modified", "desc"), ("votes", "desc")];

const BUGZILLA_SORT_MAPPINGS: &[(&str, &str)] = &[
    ("deadline", "COALESCE(deadline, '2100-01-01')"),
    ("milestone", "COALESCE(NULLIF(target_milestone,'---'),'XXXXX')"),
    ("id", "bugs.bug_id"),
];

const BUGZILLA_RESULT_KEYS: &[(&str, &str)] =
    &[("cc", "cc"), ("from", "raisedby"), ("to", "assignedto")];

const BUGZILLA_VALUE_TITLES: &[(&str, &str)] = &[
    ("alias", "id,alias"),
    ("blocks", "blocks,blocksalias"),
    ("depends", "depends,dependsalias"),
    ("id", "id,alias"),
];
