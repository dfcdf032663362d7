//! Report parameters → parameterized SQL compiler.
//!
//! Walks the parameter schema in declaration order, turning every set filter
//! into WHERE fragments and search-URL rows while recording which fields the
//! statement must fetch. The SELECT and JOIN blocks are then emitted for the
//! required fields only.
//!
//! Filter literals are bound as `?N` parameters; [`CompiledQuery::display_sql`]
//! inlines them again for diagnostics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use bzr_connector::{FieldIds, SqlParam, TableNames};
use bzr_core::{
    DiagnosticKind, Diagnostics, Field, ParamType, ParameterStore, RequiredFieldSet,
};

use crate::columns::{is_identifier, ColumnResolver, CustomFieldPolicy};
use crate::filter::FilterCompiler;
use crate::search_url::SearchUrl;

/// Characters that make a filter value match more than one row, which keeps
/// the filtered column visible in the table.
const MULTI_VALUE_MARKERS: [char; 7] = [',', '!', '+', '*', '%', '<', '>'];

/// Order in which JOIN fragments are appended to the FROM clause.
const JOIN_ORDER: [Field; 19] = [
    Field::Assigned,
    Field::Attachments,
    Field::Blocks,
    Field::Component,
    Field::Cc,
    Field::Closed,
    Field::Depends,
    Field::Flag,
    Field::QuickFlag,
    Field::From,
    Field::LastComment,
    Field::Product,
    Field::Qa,
    Field::Reopened,
    Field::Resolved,
    Field::To,
    Field::Verified,
    Field::Alias,
    Field::Work,
];

/// A compiled report query.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// The SQL statement with `?N` placeholders.
    pub sql: String,
    /// Bound parameter values in placeholder order.
    pub params: Vec<SqlParam>,
    /// Equivalent `buglist.cgi` URL.
    pub search_url: String,
    /// Columns to render, in order.
    pub columns: Vec<String>,
    /// Fields the statement selects.
    pub required: RequiredFieldSet,
    /// Custom fields appended to the SELECT list.
    pub custom_fields: Vec<String>,
    /// Per-column format overrides (`link`, `modifiedformat`, ...).
    pub formats: HashMap<String, String>,
    /// Inline column titles from `name:title`.
    pub titles: HashMap<String, String>,
}

impl CompiledQuery {
    /// SQL with every placeholder replaced by its quoted value.
    #[must_use]
    pub fn display_sql(&self) -> String {
        inline_params(&self.sql, &self.params)
    }
}

/// Replace `?N` placeholders outside quoted literals with their values.
///
/// Text is single-quoted with embedded quotes doubled; numbers are bare.
/// Placeholders without a matching parameter are left untouched.
#[must_use]
pub fn inline_params(sql: &str, params: &[SqlParam]) -> String {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut chars = sql.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            quoted = !quoted;
            out.push(c);
            continue;
        }
        if c != '?' || quoted {
            out.push(c);
            continue;
        }

        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits.push(d);
            chars.next();
        }
        let param = digits
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(param) => out.push_str(&sql_literal(param)),
            None => {
                out.push('?');
                out.push_str(&digits);
            }
        }
    }
    out
}

fn sql_literal(param: &SqlParam) -> String {
    match param {
        SqlParam::Text(s) => format!("'{}'", s.replace('\'', "''")),
        SqlParam::Integer(i) => i.to_string(),
        SqlParam::Float(f) => f.to_string(),
        SqlParam::Null => "NULL".to_string(),
    }
}

/// Compiles one report request.
///
/// The compiler records implicit parameters (`sort`, `order`, `grouporder`,
/// `sortable`) in the store, so the store should not be compiled twice.
pub struct QueryCompiler<'a> {
    store: &'a mut ParameterStore,
    tables: &'a dyn TableNames,
    diagnostics: &'a Diagnostics,
    field_ids: Option<&'a FieldIds>,
    now: DateTime<Utc>,
    bzserver: String,
}

impl<'a> QueryCompiler<'a> {
    #[must_use]
    pub fn new(
        store: &'a mut ParameterStore,
        tables: &'a dyn TableNames,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            store,
            tables,
            diagnostics,
            field_ids: None,
            now: Utc::now(),
            bzserver: String::new(),
        }
    }

    /// Use cached `fielddefs` ids instead of a sub-select.
    #[must_use]
    pub fn field_ids(mut self, ids: Option<&'a FieldIds>) -> Self {
        self.field_ids = ids;
        self
    }

    /// Instant relative dates are resolved against.
    #[must_use]
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Server root the search URL points at.
    #[must_use]
    pub fn bzserver(mut self, bzserver: impl Into<String>) -> Self {
        self.bzserver = bzserver.into();
        self
    }

    /// Compile the stored parameters into a query.
    #[must_use]
    pub fn compile(self) -> CompiledQuery {
        let policy = CustomFieldPolicy::from_store(self.store);
        let compilation = Compilation {
            filter: FilterCompiler::new(self.diagnostics, self.now),
            search: SearchUrl::new(&self.bzserver),
            store: self.store,
            tables: self.tables,
            diagnostics: self.diagnostics,
            field_ids: self.field_ids,
            required: RequiredFieldSet::new(),
            columns: ColumnResolver::new(),
            policy,
            custom_fields: Vec::new(),
            formats: HashMap::new(),
        };
        compilation.run()
    }
}

/// State accumulated while compiling.
struct Compilation<'a> {
    store: &'a mut ParameterStore,
    tables: &'a dyn TableNames,
    diagnostics: &'a Diagnostics,
    field_ids: Option<&'a FieldIds>,
    filter: FilterCompiler<'a>,
    search: SearchUrl,
    required: RequiredFieldSet,
    columns: ColumnResolver,
    policy: CustomFieldPolicy,
    custom_fields: Vec<String>,
    formats: HashMap<String, String>,
}

impl Compilation<'_> {
    fn run(mut self) -> CompiledQuery {
        self.prepare();
        let mut filters = self.process_parameters();
        self.apply_post_filter_rules(&mut filters);
        let columns = self.pre_generate();

        let sql = self.assemble(&filters);
        tracing::debug!(
            required = %self.required.iter().map(Field::name).collect::<Vec<_>>().join(","),
            sql = %sql,
            "query compiled"
        );

        CompiledQuery {
            sql,
            params: self.filter.into_params(),
            search_url: self.search.url(),
            columns,
            required: self.required,
            custom_fields: self.custom_fields,
            formats: self.formats,
            titles: self.columns.titles().clone(),
        }
    }

    fn table(&self, logical: &str) -> String {
        self.tables.table_name(logical)
    }

    fn present(&self, name: &str) -> Option<String> {
        self.store.get_present(name).map(str::to_string)
    }

    // === Preparation ===

    /// Format overrides and the rules that must run before any filter.
    fn prepare(&mut self) {
        if let Some(link) = self.present("link") {
            for entry in link.split(',').filter(|e| !e.is_empty()) {
                let (column, format) = match entry.split_once('~') {
                    Some((column, namespace)) => (column, format!("link~{namespace}")),
                    None => (entry, "link".to_string()),
                };
                self.formats.insert(column.to_string(), format);
                self.columns.add_implicit(column);
            }
        }

        if self.present("lastcomment").is_some() {
            self.required.insert(Field::Keywords);
            self.formats
                .entry("keywords".to_string())
                .or_insert_with(|| "link~keyword".to_string());
        }

        if self.store.group().is_some() {
            if let Err(diagnostic) = self.store.set("sortable", "0") {
                self.diagnostics.push(diagnostic);
            }
        }

        for (param, column) in [("modifiedformat", "modified"), ("createdformat", "created")] {
            if let Some(format) = self.present(param) {
                self.formats.insert(column.to_string(), format);
            }
        }
    }

    // === Parameter loop ===

    fn process_parameters(&mut self) -> String {
        let set: Vec<(&'static str, ParamType, String)> = self
            .store
            .spec()
            .parameters()
            .filter_map(|(name, t)| {
                self.store
                    .get_present(name)
                    .map(|value| (name, t, value.to_string()))
            })
            .collect();

        let mut filters = String::new();
        for (name, param_type, value) in set {
            tracing::debug!(name, value = %value, "handling parameter");
            match param_type {
                ParamType::Filters => filters.push_str(&self.process_filters(&value)),
                ParamType::FieldKeywords => {
                    let clause = self.process_field(name, &value, ParamType::Field);
                    filters.push_str(&format!(
                        " AND EXISTS (SELECT keywords.keywordid FROM {} AS keywords \
                         LEFT JOIN {} AS keyworddefs ON keywords.keywordid=keyworddefs.id \
                         WHERE keywords.bug_id=bugs.bug_id{clause})",
                        self.table("keywords"),
                        self.table("keyworddefs"),
                    ));
                }
                _ => filters.push_str(&self.process_field(name, &value, param_type)),
            }
        }
        filters
    }

    /// `col%3Dvalue` pairs separated by `%26`.
    fn process_filters(&mut self, value: &str) -> String {
        let mut filters = String::new();
        for arg in value.split("%26") {
            let Some((column, rest)) = arg.split_once("%3D") else {
                self.diagnostics.warn(
                    DiagnosticKind::GrammarUnrecognized,
                    format!("Filter {arg} should be column%3Dvalue, ignoring"),
                );
                continue;
            };
            let field_value = rest.split("%3D").next().unwrap_or_default();

            let param_type = if self.policy.is_custom(column, self.store) {
                if !self.add_custom_field(column) {
                    continue;
                }
                Some(ParamType::Field)
            } else {
                self.store.spec().param_type(column)
            };

            match param_type {
                Some(t) if t.is_field() => {
                    filters.push_str(&self.process_field(column, field_value, t));
                }
                _ => self.diagnostics.warn(
                    DiagnosticKind::UnsupportedParameter,
                    format!("{column} is not of type field so ignoring"),
                ),
            }
        }
        filters
    }

    /// WHERE fragment, required field and search-URL rows for one filter.
    fn process_field(&mut self, column: &str, value: &str, param_type: ParamType) -> String {
        if matches!(
            param_type,
            ParamType::Field | ParamType::FieldDate | ParamType::FieldNumber
        ) {
            if value.contains(MULTI_VALUE_MARKERS) {
                self.columns.add_implicit(column);
                if let Some(order) = self.store.spec().default_order(column) {
                    self.store.set_implicit("sort", column);
                    self.store.set_implicit("order", order);
                }
            } else {
                self.columns.remove_implicit(column);
            }
        }

        let sql_column = self.store.spec().sql_column(column);
        let clause = match param_type {
            ParamType::FieldId | ParamType::Field | ParamType::FieldDepends => {
                self.filter.compile_where(sql_column, value)
            }
            ParamType::FieldNumber => self.filter.compile_int_where(sql_column, value),
            ParamType::FieldDate => self.filter.compile_date_where(sql_column, value),
            _ => return String::new(),
        };

        self.required.require(column);
        let search_name = self.store.spec().search_name(column);
        self.search.append(value, search_name);
        clause
    }

    fn add_custom_field(&mut self, column: &str) -> bool {
        if !is_identifier(column) {
            self.diagnostics.warn(
                DiagnosticKind::ValidationRejected,
                format!("Custom field {column} is not a valid column name"),
            );
            return false;
        }
        if !self.custom_fields.iter().any(|c| c == column) {
            tracing::debug!(column, "custom field added");
            self.custom_fields.push(column.to_string());
        }
        true
    }

    // === After the loop ===

    fn apply_post_filter_rules(&mut self, filters: &mut String) {
        if self.store.get("format") == Some("list") {
            self.required.insert(Field::To);
            self.required.insert(Field::Deadline);
        }

        if self.present("flag").is_some() {
            self.required.insert(Field::Flag);
            for column in ["flagfrom", "flagname", "flagdate"] {
                self.columns.add_implicit(column);
            }
        }

        if self.present("lastcomment").is_some() {
            self.required.insert(Field::LastComment);
        }

        if let Some(search) = self.present("search") {
            let p = self.filter.bindings_mut().bind_text(format!("%{search}%"));
            filters.push_str(&format!(" AND short_desc LIKE {p}"));
        }

        let group_order = self
            .store
            .group()
            .and_then(|group| self.store.spec().default_order(group));
        if let Some(order) = group_order {
            self.store.set_implicit("grouporder", order);
        }

        self.required.insert(Field::QuickFlag);
        self.required.insert(Field::Alias);
    }

    /// Sort and group columns, the resolved column list and the bar field.
    fn pre_generate(&mut self) -> Vec<String> {
        let sort_columns: Vec<String> = self
            .store
            .sort()
            .split(',')
            .filter_map(|entry| entry.split_whitespace().next())
            .map(str::to_string)
            .collect();
        for column in &sort_columns {
            self.columns.add_implicit(column);
            self.required.require(column);
        }

        let group: Vec<String> = self
            .store
            .group()
            .map(|g| g.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        for column in &group {
            self.columns.remove_implicit(column);
            self.required.require(column);
        }

        let columns = self.columns.resolve(self.store, self.diagnostics).to_vec();
        for column in &columns {
            if !self.required.require(column) && self.policy.is_custom(column, self.store) {
                self.add_custom_field(column);
            }
        }
        for column in &group {
            if Field::from_name(column).is_none() && self.policy.is_custom(column, self.store) {
                self.add_custom_field(column);
            }
        }

        if let Some(bar) = self.present("bar") {
            tracing::debug!(bar = %bar, "requiring bar field");
            self.required.require(&bar);
        }
        columns
    }

    // === SQL assembly ===

    fn assemble(&mut self, filters: &str) -> String {
        let count = self.store.get("format") == Some("count");
        let mut sql = String::new();
        if count {
            sql.push_str("SELECT COUNT(DISTINCT(id)) AS count FROM (");
        }

        sql.push_str("SELECT DISTINCT bugs.bug_id AS id");
        for field in Field::ALL {
            if let Some(select) = self.select_expression(field) {
                sql.push_str(", ");
                sql.push_str(&select);
            }
        }
        for column in &self.custom_fields {
            sql.push_str(&format!(", bugs.{column} AS {column}"));
        }

        sql.push_str(&format!(" FROM {} AS bugs", self.table("bugs")));
        for field in JOIN_ORDER {
            if let Some(join) = self.join(field) {
                sql.push_str(&join);
            }
        }

        sql.push_str(" WHERE 1=1");
        sql.push_str(filters);
        if self.required.contains(Field::Work) {
            sql.push_str(" AND longdescswork.bug_id=bugs.bug_id GROUP BY bugs.bug_id");
        }
        sql.push_str(&format!(
            " ORDER BY {} {}",
            self.mapped_sort(),
            self.store.order().as_sql()
        ));
        if count {
            sql.push_str(") AS b");
        }
        sql.push(';');
        sql
    }

    fn person_column(&self) -> &'static str {
        if self.store.get("nameformat") == Some("login") {
            "login_name"
        } else {
            "realname"
        }
    }

    fn select_expression(&self, field: Field) -> Option<String> {
        let always = matches!(field, Field::Priority | Field::Severity);
        if !always && !self.required.contains(field) {
            return None;
        }
        let person = self.person_column();
        let select = match field {
            Field::Id => return None,
            Field::Alias => "aliases.alias AS alias".to_string(),
            Field::Assigned => "assignedactivity.bug_when AS assigned".to_string(),
            Field::Attachments => "attachments.nattachments AS attachments".to_string(),
            Field::Blocks => dependency_select("blockstab", "blocks"),
            Field::Cc => format!("ccprofiles.{person} AS cc"),
            Field::Closed => "closedactivity.bug_when AS closed".to_string(),
            Field::Component => "components.name AS component".to_string(),
            Field::Created => "creation_ts AS created".to_string(),
            Field::Deadline => "deadline".to_string(),
            Field::Depends => dependency_select("dependstab", "depends"),
            Field::Flag => {
                let suffix = if person == "login_name" { "login" } else { "realname" };
                format!(
                    "flagprofiles.flagfrom_{suffix} AS flagfrom, flagprofiles.flag_{suffix} AS flag, \
                     flagprofiles.flagname AS flagname, flagprofiles.flagdate AS flagdate"
                )
            }
            Field::QuickFlag => {
                if self.required.contains(Field::Flag) {
                    return None;
                }
                "quickflag.flagdate AS flagdate".to_string()
            }
            Field::Estimated => "estimated_time AS estimated".to_string(),
            Field::From => format!("reporterprofiles.{person} AS raisedby"),
            Field::Hardware => "rep_platform AS hardware".to_string(),
            Field::Keywords => format!(
                "(SELECT GROUP_CONCAT(keyworddefs.name) FROM {} AS keyworddefs \
                 WHERE keyworddefs.id IN (SELECT keywords.keywordid FROM {} AS keywords \
                 WHERE keywords.bug_id=bugs.bug_id)) AS keywords",
                self.table("keyworddefs"),
                self.table("keywords"),
            ),
            Field::Milestone => "target_milestone AS milestone".to_string(),
            Field::LastComment => "longdescslastcomment.thetext AS thetext".to_string(),
            Field::Modified => "lastdiffed AS modified".to_string(),
            Field::Os => "op_sys AS os".to_string(),
            Field::Priority => "priority".to_string(),
            Field::Product => "products.name AS product".to_string(),
            Field::Qa => format!("qaprofiles.{person} AS qa"),
            Field::Remaining => "remaining_time AS remaining".to_string(),
            Field::Reopened => "reopenedactivity.bug_when AS reopened".to_string(),
            Field::Resolution => "resolution".to_string(),
            Field::Resolved => "resolvedactivity.bug_when AS resolved".to_string(),
            Field::Severity => "bug_severity AS severity".to_string(),
            Field::Status => "bug_status AS status".to_string(),
            Field::Summary => "short_desc AS summary".to_string(),
            Field::To => format!("profiles.{person} AS assignedto"),
            Field::Url => "bug_file_loc AS url".to_string(),
            Field::Verified => "verifiedactivity.bug_when AS verified".to_string(),
            Field::Version => "version".to_string(),
            Field::Votes => "votes".to_string(),
            Field::Whiteboard => "status_whiteboard".to_string(),
            Field::Work => "SUM(longdescswork.work_time) AS work".to_string(),
        };
        Some(select)
    }

    fn join(&mut self, field: Field) -> Option<String> {
        if !self.required.contains(field) {
            return None;
        }
        if let Some(status) = field.transition_status() {
            return Some(self.transition_join(field, status));
        }

        let join = match field {
            Field::Attachments => format!(
                " LEFT JOIN (SELECT bug_id AS attachmentbugid, COUNT(attach_id) AS nattachments \
                 FROM {} AS attachments GROUP BY bug_id) AS attachments \
                 ON attachments.attachmentbugid=bugs.bug_id",
                self.table("attachments"),
            ),
            Field::Blocks => self.dependency_join(Dependency::Blocks),
            Field::Depends => self.dependency_join(Dependency::Depends),
            Field::Component => format!(
                " LEFT JOIN {} AS components ON bugs.component_id=components.id",
                self.table("components"),
            ),
            Field::Cc => {
                let filter = match self.present("cc") {
                    Some(cc) => self.filter.compile_where("profiles.login_name", &cc),
                    None => String::new(),
                };
                format!(
                    " INNER JOIN (SELECT cc.bug_id AS bug_id, profiles.login_name AS login_name, \
                     profiles.realname AS realname FROM {} AS cc INNER JOIN {} AS profiles \
                     ON cc.who=profiles.userid WHERE 1=1{filter}) AS ccprofiles \
                     ON ccprofiles.bug_id=bugs.bug_id",
                    self.table("cc"),
                    self.table("profiles"),
                )
            }
            Field::Flag => {
                let filter = match self.present("flag") {
                    Some(flag) => self.filter.compile_where("flagsto.login_name", &flag),
                    None => String::new(),
                };
                let profiles = self.table("profiles");
                format!(
                    " INNER JOIN (SELECT flags.bug_id AS bug_id, flags.creation_date AS flagdate, \
                     flagsto.login_name AS flag_login, flagsto.realname AS flag_realname, \
                     flagsfrom.login_name AS flagfrom_login, flagsfrom.realname AS flagfrom_realname, \
                     flagtypes.name AS flagname FROM {} AS flags \
                     INNER JOIN {} AS flagtypes ON flags.type_id=flagtypes.id \
                     INNER JOIN {profiles} AS flagsto ON flags.requestee_id=flagsto.userid \
                     INNER JOIN {profiles} AS flagsfrom ON flags.setter_id=flagsfrom.userid \
                     WHERE flags.status='?'{filter}) AS flagprofiles \
                     ON flagprofiles.bug_id=bugs.bug_id",
                    self.table("flags"),
                    self.table("flagtypes"),
                )
            }
            Field::QuickFlag => {
                if self.required.contains(Field::Flag) {
                    return None;
                }
                format!(
                    " LEFT JOIN (SELECT bug_id AS quickflagbugid, MAX(creation_date) AS flagdate \
                     FROM {} AS flags WHERE status='?' GROUP BY bug_id) AS quickflag \
                     ON quickflag.quickflagbugid=bugs.bug_id",
                    self.table("flags"),
                )
            }
            Field::From => format!(
                " LEFT JOIN {} AS reporterprofiles ON bugs.reporter=reporterprofiles.userid",
                self.table("profiles"),
            ),
            Field::LastComment => {
                let longdescs = self.table("longdescs");
                format!(
                    " LEFT JOIN (SELECT MAX(longdescs.bug_when) AS sub_comment_when, \
                     longdescs.bug_id AS sub_bug_id FROM {longdescs} AS longdescs \
                     GROUP BY longdescs.bug_id) AS descs ON bugs.bug_id=descs.sub_bug_id \
                     LEFT JOIN {longdescs} AS longdescslastcomment \
                     ON longdescslastcomment.bug_when=descs.sub_comment_when \
                     AND longdescslastcomment.bug_id=descs.sub_bug_id"
                )
            }
            Field::Product => format!(
                " LEFT JOIN {} AS products ON bugs.product_id=products.id",
                self.table("products"),
            ),
            Field::Qa => format!(
                " LEFT JOIN {} AS qaprofiles ON bugs.qa_contact=qaprofiles.userid",
                self.table("profiles"),
            ),
            Field::To => format!(
                " LEFT JOIN {} AS profiles ON bugs.assigned_to=profiles.userid",
                self.table("profiles"),
            ),
            Field::Alias => format!(
                " LEFT JOIN {} AS aliases ON aliases.bug_id=bugs.bug_id",
                self.table("bugs_aliases"),
            ),
            Field::Work => format!(", {} AS longdescswork", self.table("longdescs")),
            _ => return None,
        };
        Some(join)
    }

    /// Latest activity row where the status changed to `status`.
    fn transition_join(&self, field: Field, status: &str) -> String {
        let field_id = match self.field_ids.and_then(|ids| ids.get("bug_status")) {
            Some(id) => id.to_string(),
            None => format!(
                "(SELECT id FROM {} WHERE name='bug_status')",
                self.table("fielddefs")
            ),
        };
        let alias = format!("{}activity", field.name());
        format!(
            " LEFT JOIN (SELECT bug_id, MAX(bug_when) AS bug_when FROM {} \
             WHERE fieldid={field_id} AND added='{status}' GROUP BY bug_id) AS {alias} \
             ON bugs.bug_id={alias}.bug_id",
            self.table("bugs_activity"),
        )
    }

    fn dependency_join(&mut self, kind: Dependency) -> String {
        let (tab, other, near, far, label) = match kind {
            Dependency::Blocks => ("blockstab", "blockedbugs", "dependson", "blocked", "blocks"),
            Dependency::Depends => ("dependstab", "dependsonbugs", "blocked", "dependson", "depends"),
        };
        let alias_table = match kind {
            Dependency::Blocks => "blockedalias",
            Dependency::Depends => "dependsonalias",
        };
        let status_filter = match self.present("dependsstatus") {
            Some(status) => self
                .filter
                .compile_where(&format!("{other}.bug_status"), &status),
            None => String::new(),
        };
        format!(
            " LEFT JOIN (SELECT dependencies.{near} AS {near}, dependencies.{far} AS {label}, \
             {alias_table}.alias AS {label}alias, {other}.short_desc AS {label}summary, \
             {other}.bug_status AS {label}status, {other}.priority AS {label}priority, \
             profiles.login_name AS login_name, profiles.realname AS realname \
             FROM {} AS dependencies \
             INNER JOIN {} AS {other} ON dependencies.{far}={other}.bug_id \
             LEFT JOIN {} AS {alias_table} ON {alias_table}.bug_id={other}.bug_id \
             INNER JOIN {} AS profiles ON {other}.assigned_to=profiles.userid \
             WHERE 1=1{status_filter} ORDER BY {other}.priority) AS {tab} \
             ON {tab}.{near}=bugs.bug_id",
            self.table("dependencies"),
            self.table("bugs"),
            self.table("bugs_aliases"),
            self.table("profiles"),
        )
    }

    /// ORDER BY list: sort override, SQL column or bare identifier, with any
    /// per-column direction kept.
    fn mapped_sort(&self) -> String {
        let mut mapped = Vec::new();
        for entry in self.store.sort().split(',') {
            let mut words = entry.split_whitespace();
            let Some(column) = words.next() else {
                continue;
            };
            if !is_identifier(column) {
                self.diagnostics.warn(
                    DiagnosticKind::ValidationRejected,
                    format!("Sort column {column} is not a valid column name"),
                );
                continue;
            }
            let mut expression = self
                .store
                .spec()
                .sort_expression(column)
                .unwrap_or(column)
                .to_string();
            if let Some(direction) = words.next() {
                match direction.to_ascii_uppercase().as_str() {
                    "DESC" => expression.push_str(" DESC"),
                    "ASC" => expression.push_str(" ASC"),
                    _ => self.diagnostics.warn(
                        DiagnosticKind::GrammarUnrecognized,
                        format!("Sort argument not recognised: {direction}"),
                    ),
                }
            }
            mapped.push(expression);
        }

        if mapped.is_empty() {
            "bugs.bug_id".to_string()
        } else {
            let joined = mapped.join(",");
            tracing::debug!(sort = %joined, "mapped sort");
            joined
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Dependency {
    Blocks,
    Depends,
}

fn dependency_select(tab: &str, label: &str) -> String {
    format!(
        "{tab}.{label} AS {label}, {tab}.{label}alias AS {label}alias, \
         {tab}.{label}summary AS {label}summary, {tab}.{label}status AS {label}status, \
         {tab}.{label}priority AS {label}priority, {tab}.realname AS {label}to"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzr_connector::{Connector, PlainTables, SqliteConnector};
    use bzr_core::ParameterSpec;
    use chrono::TimeZone;

    const FIXTURE: &str = include_str!("../../../testdata/bugzilla.sql");

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn store(params: &[(&str, &str)]) -> ParameterStore {
        let mut store = ParameterStore::new(ParameterSpec::bugzilla());
        for (name, value) in params {
            store.set(name, value).unwrap();
        }
        store
    }

    fn compile_with(params: &[(&str, &str)], diagnostics: &Diagnostics) -> CompiledQuery {
        let mut store = store(params);
        QueryCompiler::new(&mut store, &PlainTables, diagnostics)
            .now(now())
            .bzserver("https://bugs.example.com")
            .compile()
    }

    fn compile(params: &[(&str, &str)]) -> CompiledQuery {
        compile_with(params, &Diagnostics::new())
    }

    // === Placeholders ===

    #[test]
    fn inline_params_quotes_text_and_leaves_numbers_bare() {
        let params = [
            SqlParam::Text("O'Brien".to_string()),
            SqlParam::Integer(7),
            SqlParam::Float(1.5),
            SqlParam::Null,
        ];
        assert_eq!(
            inline_params("a=?1 AND b=?2 AND c=?3 AND d IS ?4", &params),
            "a='O''Brien' AND b=7 AND c=1.5 AND d IS NULL"
        );
    }

    #[test]
    fn inline_params_skips_quoted_question_marks() {
        let params = [SqlParam::Text("x".to_string())];
        assert_eq!(
            inline_params("status='?' AND name=?1", &params),
            "status='?' AND name='x'"
        );
    }

    #[test]
    fn inline_params_handles_multi_digit_indexes() {
        let params: Vec<SqlParam> = (1..=11).map(SqlParam::Integer).collect();
        assert_eq!(inline_params("?1,?11", &params), "1,11");
        assert_eq!(inline_params("?12", &params), "?12");
    }

    // === Filters ===

    #[test]
    fn status_priority_and_sort() {
        let query = compile(&[("status", "!CLOSED"), ("priority", "P1,P2"), ("sort", "priority")]);
        let sql = query.display_sql();
        assert!(sql.contains("bug_status<>'CLOSED'"), "{sql}");
        assert!(sql.contains("(priority='P1' OR priority='P2')"), "{sql}");
        assert!(sql.contains("ORDER BY priority ASC"), "{sql}");
        assert!(query.required.contains(Field::Priority));
        assert!(!query.sql.contains("'CLOSED'"), "literals are bound");
    }

    #[test]
    fn plain_value_compiles_to_one_equality() {
        let sql = compile(&[("product", "Widgets")]).display_sql();
        assert_eq!(sql.matches(" AND products.name='Widgets'").count(), 1);
        assert!(sql.contains("LEFT JOIN products AS products"));
    }

    #[test]
    fn default_status_filter_applies() {
        let sql = compile(&[]).display_sql();
        assert!(sql.contains(" WHERE 1=1 AND bug_status<>'CLOSED'"), "{sql}");
        assert!(sql.ends_with(" ORDER BY priority,bug_status ASC;"), "{sql}");
    }

    #[test]
    fn single_value_filter_hides_its_column() {
        let query = compile(&[("product", "Widgets")]);
        assert!(!query.columns.contains(&"product".to_string()));
        let query = compile(&[("product", "Widgets,Gadgets")]);
        assert!(query.columns.contains(&"product".to_string()));
    }

    #[test]
    fn filtering_a_field_with_default_order_sorts_by_it() {
        let sql = compile(&[("modified", "-1w:*")]).display_sql();
        assert!(sql.contains(" AND lastdiffed >= '2024-03-08'"), "{sql}");
        assert!(sql.ends_with(" ORDER BY lastdiffed DESC;"), "{sql}");
    }

    #[test]
    fn explicit_sort_beats_implicit_sort() {
        let sql = compile(&[("votes", "+"), ("sort", "id")]).display_sql();
        assert!(sql.contains(" AND votes > 0"));
        assert!(sql.ends_with(" ORDER BY bugs.bug_id DESC;"), "{sql}");
    }

    #[test]
    fn keywords_filter_is_an_exists_subselect() {
        let query = compile(&[("keywords", "regression")]);
        let sql = query.display_sql();
        assert!(sql.contains(
            " AND EXISTS (SELECT keywords.keywordid FROM keywords AS keywords \
             LEFT JOIN keyworddefs AS keyworddefs ON keywords.keywordid=keyworddefs.id \
             WHERE keywords.bug_id=bugs.bug_id AND keyworddefs.name='regression')"
        ), "{sql}");
        assert!(query.required.contains(Field::Keywords));
    }

    #[test]
    fn search_adds_summary_like() {
        let sql = compile(&[("search", "crash")]).display_sql();
        assert!(sql.contains(" AND short_desc LIKE '%crash%'"), "{sql}");
    }

    #[test]
    fn generic_filters_route_to_fields() {
        let diagnostics = Diagnostics::new();
        let query = compile_with(
            &[("filters", "product%3DWidgets%26cf_team%3Dred%26sort%3Dx")],
            &diagnostics,
        );
        let sql = query.display_sql();
        assert!(sql.contains(" AND products.name='Widgets'"), "{sql}");
        assert!(sql.contains(" AND cf_team='red'"), "{sql}");
        assert!(sql.contains(", bugs.cf_team AS cf_team"), "{sql}");
        assert_eq!(query.custom_fields, ["cf_team"]);
        assert!(diagnostics.has(DiagnosticKind::UnsupportedParameter));
    }

    #[test]
    fn malformed_filter_pair_warns() {
        let diagnostics = Diagnostics::new();
        compile_with(&[("filters", "product")], &diagnostics);
        assert!(diagnostics.has(DiagnosticKind::GrammarUnrecognized));
    }

    // === Required fields and joins ===

    #[test]
    fn quickflag_and_alias_are_always_joined() {
        let query = compile(&[]);
        assert!(query.required.contains(Field::QuickFlag));
        assert!(query.required.contains(Field::Alias));
        assert!(query.sql.contains("quickflag.flagdate AS flagdate"));
        assert!(query.sql.contains(" LEFT JOIN bugs_aliases AS aliases"));
    }

    #[test]
    fn priority_and_severity_are_always_selected() {
        let sql = compile(&[("columns", "id")]).sql;
        assert!(sql.contains(", priority"));
        assert!(sql.contains(", bug_severity AS severity"));
    }

    #[test]
    fn flag_filter_replaces_quickflag() {
        let query = compile(&[("flag", "bob@example.com")]);
        let sql = query.display_sql();
        assert!(sql.contains("WHERE flags.status='?' AND flagsto.login_name='bob@example.com'"));
        assert!(!sql.contains("quickflag.flagdate"));
        for column in ["flagfrom", "flagname", "flagdate"] {
            assert!(query.columns.contains(&column.to_string()), "{column}");
        }
    }

    #[test]
    fn list_format_requires_owner_and_deadline() {
        let query = compile(&[("format", "list")]);
        assert!(query.required.contains(Field::To));
        assert!(query.required.contains(Field::Deadline));
    }

    #[test]
    fn dependency_joins_filter_by_status() {
        let sql = compile(&[("columns", "+depends")]).display_sql();
        assert!(sql.contains(
            "WHERE 1=1 AND (dependsonbugs.bug_status<>'CLOSED' AND \
             dependsonbugs.bug_status<>'VERIFIED' AND dependsonbugs.bug_status<>'RESOLVED')"
        ), "{sql}");
        assert!(sql.contains(") AS dependstab ON dependstab.blocked=bugs.bug_id"));
    }

    #[test]
    fn transition_joins_use_cached_field_id() {
        let ids = FieldIds::from([("bug_status".to_string(), 9)]);
        let mut store = store(&[("columns", "+closed")]);
        let query = QueryCompiler::new(&mut store, &PlainTables, &Diagnostics::new())
            .field_ids(Some(&ids))
            .compile();
        assert!(query.sql.contains("WHERE fieldid=9 AND added='CLOSED'"));
    }

    #[test]
    fn transition_joins_fall_back_to_subselect() {
        let sql = compile(&[("columns", "+resolved")]).sql;
        assert!(sql.contains(
            "WHERE fieldid=(SELECT id FROM fielddefs WHERE name='bug_status') AND added='RESOLVED'"
        ));
        assert!(sql.contains("AS resolvedactivity ON bugs.bug_id=resolvedactivity.bug_id"));
    }

    #[test]
    fn work_adds_group_by() {
        let sql = compile(&[("columns", "+work")]).sql;
        assert!(sql.contains(", longdescs AS longdescswork WHERE 1=1"));
        assert!(sql.contains(" AND longdescswork.bug_id=bugs.bug_id GROUP BY bugs.bug_id ORDER BY"));
    }

    #[test]
    fn login_nameformat_selects_logins() {
        let sql = compile(&[("columns", "+to"), ("nameformat", "login")]).sql;
        assert!(sql.contains("profiles.login_name AS assignedto"));
        let sql = compile(&[("columns", "+to")]).sql;
        assert!(sql.contains("profiles.realname AS assignedto"));
    }

    #[test]
    fn count_wraps_select() {
        let sql = compile(&[("format", "count")]).sql;
        assert!(sql.starts_with("SELECT COUNT(DISTINCT(id)) AS count FROM (SELECT DISTINCT"));
        assert!(sql.ends_with(") AS b;"));
    }

    #[test]
    fn group_disables_sorting_and_leads_sort() {
        let mut store = store(&[("group", "product")]);
        let query = QueryCompiler::new(&mut store, &PlainTables, &Diagnostics::new()).compile();
        assert_eq!(store.get("sortable"), Some("0"));
        assert!(query.sql.contains(" ORDER BY products.name ASC,priority,bug_status ASC;"));
        assert!(query.required.contains(Field::Product));
        assert!(!query.columns.contains(&"product".to_string()));
    }

    #[test]
    fn group_with_default_order_sets_group_order() {
        let mut store = store(&[("group", "votes")]);
        let query = QueryCompiler::new(&mut store, &PlainTables, &Diagnostics::new()).compile();
        assert_eq!(store.implicit("grouporder"), Some("desc"));
        assert!(query.required.contains(Field::Votes));
    }

    #[test]
    fn sort_directions_are_kept_and_unknown_ones_warn() {
        let diagnostics = Diagnostics::new();
        let sql = compile_with(&[("sort", "milestone desc,deadline sideways")], &diagnostics).sql;
        assert!(sql.contains(
            "ORDER BY COALESCE(NULLIF(target_milestone,'---'),'XXXXX') DESC,\
             COALESCE(deadline, '2100-01-01') ASC;"
        ), "{sql}");
        assert!(diagnostics.has(DiagnosticKind::GrammarUnrecognized));
    }

    #[test]
    fn link_sets_format_and_adds_column() {
        let query = compile(&[("link", "component~Component,version")]);
        assert_eq!(query.formats["component"], "link~Component");
        assert_eq!(query.formats["version"], "link");
        assert!(query.columns.contains(&"component".to_string()));
    }

    #[test]
    fn lastcomment_requires_keywords_and_comment() {
        let query = compile(&[("lastcomment", "1")]);
        assert!(query.required.contains(Field::Keywords));
        assert!(query.required.contains(Field::LastComment));
        assert_eq!(query.formats["keywords"], "link~keyword");
        assert!(query.sql.contains("longdescslastcomment.thetext AS thetext"));
    }

    #[test]
    fn search_url_uses_search_names() {
        let query = compile(&[("to", "alice@example.com")]);
        assert!(query.search_url.starts_with("https://bugs.example.com/buglist.cgi?"));
        assert!(query
            .search_url
            .contains("&field0-1-0=assigned_to&type0-1-0=equals&value0-1-0=alice@example.com"));
    }

    #[test]
    fn schema_qualifies_every_table() {
        let mut store = store(&[("columns", "+to,+cc,+blocks,+closed")]);
        let connector = SqliteConnector::new("unused.db", Some("bz".to_string()));
        let sql = QueryCompiler::new(&mut store, &connector, &Diagnostics::new())
            .compile()
            .sql;
        assert!(sql.contains(" FROM bz.bugs AS bugs"));
        assert!(sql.contains("FROM bz.bugs_activity"));
        assert!(sql.contains("INNER JOIN bz.profiles AS profiles"));
        assert!(!sql.contains(" FROM bugs "));
    }

    // === Against SQLite ===

    fn fixture() -> (tempfile::TempDir, SqliteConnector) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bugs.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(FIXTURE)
            .unwrap();
        (dir, SqliteConnector::new(path, None))
    }

    fn run(params: &[(&str, &str)]) -> Vec<bzr_connector::Row> {
        let (_dir, connector) = fixture();
        let conn = connector.connect().unwrap();
        let mut store = store(params);
        let query = QueryCompiler::new(&mut store, &connector, &Diagnostics::new())
            .now(now())
            .compile();
        connector
            .execute(&conn, &query.sql, &query.params)
            .unwrap_or_else(|e| panic!("{e}\n{}", query.display_sql()))
            .collect()
    }

    fn ids(rows: &[bzr_connector::Row]) -> Vec<i64> {
        rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn every_field_compiles_to_valid_sql() {
        // flag and cc are inner joins and work is an aggregate; they filter
        // rows and are covered separately.
        let columns: Vec<&str> = Field::ALL
            .into_iter()
            .filter(|f| !matches!(f, Field::Flag | Field::Cc | Field::Work))
            .map(|f| f.name())
            .collect();
        let rows = run(&[("columns", &columns.join(",")), ("status", "*"), ("sort", "id")]);
        assert_eq!(ids(&rows), [101, 102, 103, 104, 105]);
    }

    #[test]
    fn default_report_excludes_closed_bugs() {
        let rows = run(&[("sort", "id")]);
        assert_eq!(ids(&rows), [101, 102, 104, 105]);
    }

    #[test]
    fn filters_select_matching_rows() {
        assert_eq!(ids(&run(&[("priority", "P1"), ("status", "*"), ("sort", "id")])), [101, 103]);
        assert_eq!(ids(&run(&[("product", "Gadgets"), ("status", "*"), ("sort", "id")])), [103, 104]);
        assert_eq!(ids(&run(&[("search", "dark")])), [105]);
        assert_eq!(ids(&run(&[("keywords", "ux")])), [102]);
        // votes sort descending by default
        assert_eq!(ids(&run(&[("votes", "+"), ("sort", "id")])), [105, 101]);
        assert_eq!(ids(&run(&[("deadline", "+")])), [105]);
    }

    #[test]
    fn count_mode_counts_distinct_bugs() {
        let rows = run(&[("format", "count"), ("status", "*")]);
        assert_eq!(rows[0]["count"], 5);
    }

    #[test]
    fn work_sums_comment_time() {
        let rows = run(&[("columns", "id,work"), ("sort", "id")]);
        let work: Vec<f64> = rows.iter().map(|r| r["work"].as_f64().unwrap()).collect();
        assert_eq!(ids(&rows), [101, 102]);
        assert_eq!(work, [1.5, 0.5]);
    }

    #[test]
    fn inner_joins_restrict_to_linked_bugs() {
        // One row per cc entry
        assert_eq!(ids(&run(&[("columns", "+cc"), ("sort", "id")])), [101, 101, 105]);
        let rows = run(&[("flag", "bob@example.com")]);
        assert_eq!(ids(&rows), [102]);
        assert_eq!(rows[0]["flagname"], "review");
        assert_eq!(rows[0]["flagfrom"], "Alice Smith");
    }

    #[test]
    fn resolved_transition_is_joined() {
        let rows = run(&[("columns", "id,resolved"), ("status", "*"), ("sort", "id")]);
        assert_eq!(rows[2]["resolved"], "2024-02-01 08:00:00");
        assert!(rows[0]["resolved"].is_null());
    }
}
