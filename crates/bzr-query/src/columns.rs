//! Column resolution.
//!
//! The rendered column set comes from the default list, a delta against it
//! (`+to,-url`) or an explicit replacement list. Columns the compiler adds
//! or removes on its own are tracked apart from the caller's edits so that
//! an explicit `+col` / `-col` wins over the implicit rule.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use bzr_core::{DiagnosticKind, Diagnostics, ParameterStore};
use bzr_parser::{ColumnOp, ColumnRef, ColumnsExpr};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Whether a name can be written into SQL as a bare column.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Ordered set insert.
fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Decides which columns are Bugzilla custom fields.
#[derive(Debug, Clone)]
pub struct CustomFieldPolicy {
    implicit: bool,
    prefix: String,
    listed: Vec<String>,
}

impl CustomFieldPolicy {
    #[must_use]
    pub fn from_store(store: &ParameterStore) -> Self {
        Self {
            implicit: store.get("implicitcustom") == Some("true"),
            prefix: store.get("customprefix").unwrap_or_default().to_string(),
            listed: store
                .get_present("customfields")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// With `implicitcustom=true` anything without a heading is custom;
    /// otherwise the custom prefix or the `customfields` list decides.
    #[must_use]
    pub fn is_custom(&self, column: &str, store: &ParameterStore) -> bool {
        if self.implicit {
            store.spec().heading(column).is_none()
        } else {
            (!self.prefix.is_empty() && column.starts_with(&self.prefix))
                || self.listed.iter().any(|c| c == column)
        }
    }
}

/// Tracks implicit column edits and computes the final column list once.
#[derive(Debug, Default)]
pub struct ColumnResolver {
    implicitly_added: Vec<String>,
    implicitly_removed: Vec<String>,
    titles: HashMap<String, String>,
    resolved: Option<Vec<String>>,
}

impl ColumnResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_implicit(&mut self, column: &str) {
        tracing::debug!(column, "column registered for implicit addition");
        push_unique(&mut self.implicitly_added, column);
    }

    pub fn remove_implicit(&mut self, column: &str) {
        tracing::debug!(column, "column registered for implicit removal");
        push_unique(&mut self.implicitly_removed, column);
    }

    /// Title given inline with `name:title`.
    #[must_use]
    pub fn title(&self, column: &str) -> Option<&str> {
        self.titles.get(column).map(String::as_str)
    }

    #[must_use]
    pub fn titles(&self) -> &HashMap<String, String> {
        &self.titles
    }

    /// Final column list. Computed on first call; later implicit edits do
    /// not change it.
    pub fn resolve(&mut self, store: &ParameterStore, diagnostics: &Diagnostics) -> &[String] {
        if self.resolved.is_none() {
            let columns = self.compute(store, diagnostics);
            tracing::debug!(columns = %columns.join(","), "columns resolved");
            self.resolved = Some(columns);
        }
        self.resolved.as_deref().unwrap_or_default()
    }

    fn compute(&mut self, store: &ParameterStore, diagnostics: &Diagnostics) -> Vec<String> {
        let defaults: Vec<String> = store
            .spec()
            .default_value("columns")
            .unwrap_or_default()
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        self.apply(defaults, store.explicit("columns"), diagnostics)
    }

    /// Apply the caller's column expression to a default list.
    fn apply(
        &mut self,
        defaults: Vec<String>,
        explicit: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> Vec<String> {
        let Some(explicit) = explicit.filter(|v| !v.is_empty()) else {
            return self.apply_implicit(defaults);
        };

        match bzr_parser::parse_columns(explicit) {
            Ok(ColumnsExpr::Delta(edits)) => {
                let mut base = defaults;
                let mut added = Vec::new();
                for edit in edits {
                    let name = self.register(&edit.column);
                    match edit.op {
                        ColumnOp::Add => {
                            added.push(name.clone());
                            self.implicitly_removed.retain(|c| *c != name);
                        }
                        ColumnOp::Remove => match base.iter().position(|c| *c == name) {
                            Some(pos) => {
                                base.remove(pos);
                                self.implicitly_added.retain(|c| *c != name);
                            }
                            None => diagnostics.warn(
                                DiagnosticKind::GrammarUnrecognized,
                                format!("Can't remove column [{name}] it doesn't exist"),
                            ),
                        },
                    }
                }
                let mut columns = self.apply_implicit(base);
                for name in &added {
                    push_unique(&mut columns, name);
                }
                columns
            }
            Ok(ColumnsExpr::Replace(refs)) => {
                let mut columns = Vec::new();
                for column in &refs {
                    let name = self.register(column);
                    push_unique(&mut columns, &name);
                }
                columns
            }
            Err(e) => {
                diagnostics.warn(DiagnosticKind::GrammarUnrecognized, e.to_string());
                self.apply_implicit(defaults)
            }
        }
    }

    /// Record an inline title and return the bare name.
    fn register(&mut self, column: &ColumnRef) -> String {
        if let Some(title) = &column.title {
            self.titles.insert(column.name.clone(), title.clone());
        }
        column.name.clone()
    }

    /// Base columns plus implicit additions, minus implicit removals.
    fn apply_implicit(&self, base: Vec<String>) -> Vec<String> {
        let mut columns = Vec::with_capacity(base.len() + self.implicitly_added.len());
        for column in base.iter().chain(&self.implicitly_added) {
            push_unique(&mut columns, column);
        }
        columns.retain(|c| !self.implicitly_removed.contains(c));
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzr_core::ParameterSpec;

    const DEFAULTS: [&str; 8] = [
        "id", "priority", "status", "severity", "version", "product", "summary", "url",
    ];

    fn store(params: &[(&str, &str)]) -> ParameterStore {
        let mut store = ParameterStore::new(ParameterSpec::bugzilla());
        for (name, value) in params {
            store.set(name, value).unwrap();
        }
        store
    }

    fn resolve(resolver: &mut ColumnResolver, store: &ParameterStore) -> Vec<String> {
        resolver.resolve(store, &Diagnostics::new()).to_vec()
    }

    #[test]
    fn defaults_without_explicit_columns() {
        let store = store(&[]);
        assert_eq!(resolve(&mut ColumnResolver::new(), &store), DEFAULTS);
    }

    #[test]
    fn removing_one_default_changes_nothing_else() {
        let store = store(&[("columns", "-summary")]);
        let expected: Vec<&str> = DEFAULTS.iter().copied().filter(|c| *c != "summary").collect();
        assert_eq!(resolve(&mut ColumnResolver::new(), &store), expected);
    }

    #[test]
    fn additions_go_last_after_removals() {
        let store = store(&[("columns", "+to,-url,-version")]);
        assert_eq!(
            resolve(&mut ColumnResolver::new(), &store),
            ["id", "priority", "status", "severity", "product", "summary", "to"]
        );
    }

    #[test]
    fn delta_against_small_default_list() {
        let defaults = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let columns = ColumnResolver::new().apply(defaults, Some("+d,-b"), &Diagnostics::new());
        assert_eq!(columns, ["a", "c", "d"]);
    }

    #[test]
    fn replacement_ignores_implicit_rules() {
        let store = store(&[("columns", "id,summary")]);
        let mut resolver = ColumnResolver::new();
        resolver.add_implicit("deadline");
        resolver.remove_implicit("summary");
        assert_eq!(resolve(&mut resolver, &store), ["id", "summary"]);
    }

    #[test]
    fn implicit_edits_apply_to_defaults() {
        let store = store(&[]);
        let mut resolver = ColumnResolver::new();
        resolver.add_implicit("deadline");
        resolver.remove_implicit("product");
        let columns = resolve(&mut resolver, &store);
        assert_eq!(columns.last().map(String::as_str), Some("deadline"));
        assert!(!columns.contains(&"product".to_string()));
    }

    #[test]
    fn explicit_add_cancels_implicit_removal() {
        let store = store(&[("columns", "+product")]);
        let mut resolver = ColumnResolver::new();
        resolver.remove_implicit("product");
        let columns = resolve(&mut resolver, &store);
        // The re-added default keeps its default position
        assert_eq!(columns, DEFAULTS);
    }

    #[test]
    fn explicit_remove_cancels_implicit_addition() {
        let store = store(&[("columns", "-status")]);
        let mut resolver = ColumnResolver::new();
        resolver.add_implicit("status");
        assert!(!resolve(&mut resolver, &store).contains(&"status".to_string()));
    }

    #[test]
    fn removing_missing_column_warns() {
        let store = store(&[("columns", "-votes")]);
        let diagnostics = Diagnostics::new();
        let columns = ColumnResolver::new().resolve(&store, &diagnostics).to_vec();
        assert_eq!(columns, DEFAULTS);
        assert!(diagnostics.has(DiagnosticKind::GrammarUnrecognized));
    }

    #[test]
    fn inline_titles_are_captured() {
        let store = store(&[("columns", "+to:Owner")]);
        let mut resolver = ColumnResolver::new();
        let columns = resolve(&mut resolver, &store);
        assert!(columns.contains(&"to".to_string()));
        assert_eq!(resolver.title("to"), Some("Owner"));
    }

    #[test]
    fn resolution_is_memoized() {
        let store = store(&[]);
        let mut resolver = ColumnResolver::new();
        let first = resolve(&mut resolver, &store);
        resolver.add_implicit("deadline");
        assert_eq!(resolve(&mut resolver, &store), first);
    }

    // === Custom fields ===

    #[test]
    fn prefix_and_list_identify_custom_fields() {
        let store = store(&[("customfields", "team_size")]);
        let policy = CustomFieldPolicy::from_store(&store);
        assert!(policy.is_custom("cf_team", &store));
        assert!(policy.is_custom("team_size", &store));
        assert!(!policy.is_custom("status", &store));
    }

    #[test]
    fn implicit_custom_treats_unknown_columns_as_custom() {
        let store = store(&[("implicitcustom", "true")]);
        let policy = CustomFieldPolicy::from_store(&store);
        assert!(policy.is_custom("team", &store));
        assert!(!policy.is_custom("summary", &store));
    }

    #[test]
    fn identifiers_reject_sql_syntax() {
        assert!(is_identifier("cf_team"));
        assert!(!is_identifier("cf-team"));
        assert!(!is_identifier("1team"));
        assert!(!is_identifier("a;b"));
    }
}
