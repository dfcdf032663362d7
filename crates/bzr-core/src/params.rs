//! Three-tier parameter value store.
//!
//! Each parameter resolves from the explicit (user) tier, then the implicit
//! tier (values the compiler infers while preparing a query), then the
//! schema default. `sort`, `order`, `group` and `grouporder` are resolved
//! once and memoized for the rest of the compile.

use std::cell::OnceCell;
use std::collections::HashMap;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::schema::{ParameterSpec, DEBUG_PARAMETER};

/// Sort direction after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Only the literal `desc` sorts descending; anything else is ascending.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("desc") => Self::Desc,
            _ => Self::Asc,
        }
    }

    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Whether a value counts as set: non-empty and not `0`.
#[must_use]
pub fn is_present(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

/// First source holding a value accepted by `accept`.
fn resolve<'a>(sources: &[Option<&'a str>], accept: impl Fn(&str) -> bool) -> Option<&'a str> {
    sources.iter().flatten().copied().find(|&v| accept(v))
}

/// Parameter values for a single report request.
#[derive(Debug)]
pub struct ParameterStore {
    spec: ParameterSpec,
    explicit: HashMap<String, String>,
    implicit: HashMap<String, String>,
    sort: OnceCell<String>,
    order: OnceCell<SortOrder>,
    group: OnceCell<Option<String>>,
    group_order: OnceCell<SortOrder>,
}

impl ParameterStore {
    #[must_use]
    pub fn new(spec: ParameterSpec) -> Self {
        Self {
            spec,
            explicit: HashMap::new(),
            implicit: HashMap::new(),
            sort: OnceCell::new(),
            order: OnceCell::new(),
            group: OnceCell::new(),
            group_order: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn spec(&self) -> &ParameterSpec {
        &self.spec
    }

    /// Set an explicit value after checking it against the schema policy.
    ///
    /// # Errors
    ///
    /// Returns the diagnostic describing why the value was not stored; the
    /// parameter keeps whatever value it resolved to before.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), Diagnostic> {
        let sanitized = self.spec.validate(name, value)?;
        let stored = match self.spec.param_type(name) {
            Some(t) if t.tidies_commas() => tidy_comma_separated(&sanitized),
            _ => sanitized,
        };
        tracing::debug!(name, value = %stored, "parameter set");
        self.explicit.insert(name.to_string(), stored);
        Ok(())
    }

    /// Record an inferred value; explicit values still take precedence.
    pub fn set_implicit(&mut self, name: &str, value: impl Into<String>) {
        if !self.spec.is_supported(name) {
            tracing::warn!(name, "implicit parameter is not supported");
            return;
        }
        let value = value.into();
        tracing::debug!(name, value = %value, "implicit parameter set");
        self.implicit.insert(name.to_string(), value);
    }

    /// Resolved value: explicit, else implicit, else default.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        resolve(
            &[
                self.explicit(name),
                self.implicit(name),
                self.spec.default_value(name),
            ],
            |_| true,
        )
    }

    #[must_use]
    pub fn explicit(&self, name: &str) -> Option<&str> {
        self.explicit.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn implicit(&self, name: &str) -> Option<&str> {
        self.implicit.get(name).map(String::as_str)
    }

    /// Resolved value, but only when it counts as set.
    #[must_use]
    pub fn get_present(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| is_present(v))
    }

    /// True only for the literal values `1` and `y`.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        matches!(self.get(name), Some("1" | "y"))
    }

    /// Explicit or implicit value that counts as set, else the default.
    fn resolve_memoized(&self, name: &str) -> Option<&str> {
        resolve(&[self.explicit(name), self.implicit(name)], is_present)
            .or_else(|| self.spec.default_value(name))
    }

    /// Group column, if any.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group
            .get_or_init(|| {
                resolve(&[self.explicit("group"), self.implicit("group")], is_present)
                    .map(str::to_string)
            })
            .as_deref()
    }

    #[must_use]
    pub fn group_order(&self) -> SortOrder {
        *self
            .group_order
            .get_or_init(|| SortOrder::parse(self.resolve_memoized("grouporder")))
    }

    #[must_use]
    pub fn order(&self) -> SortOrder {
        *self
            .order
            .get_or_init(|| SortOrder::parse(self.resolve_memoized("order")))
    }

    /// Sort list, prefixed with `<group> <grouporder>` when grouping.
    #[must_use]
    pub fn sort(&self) -> &str {
        self.sort.get_or_init(|| {
            let base = self.resolve_memoized("sort").unwrap_or_default();
            let sort = match self.group() {
                Some(group) => format!("{group} {},{base}", self.group_order().as_sql()),
                None => base.to_string(),
            };
            tracing::debug!(sort = %sort, "sort resolved");
            sort
        })
    }

    /// Apply `name=value` lines in order, recording rejected ones.
    ///
    /// Lines without `=` are skipped. The name is everything before the
    /// first `=`; the value is trimmed before validation.
    pub fn extract_options<'a, I>(&mut self, args: I, diagnostics: &Diagnostics)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in args {
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if let Err(diagnostic) = self.set(name, value) {
                diagnostics.push(diagnostic);
            }
        }
    }

    /// Debug level requested with the `debug` option, if any.
    #[must_use]
    pub fn debug_level(&self) -> Option<u8> {
        self.explicit(DEBUG_PARAMETER).and_then(|v| v.parse().ok())
    }

    /// Names explicitly set by the caller, sorted.
    #[must_use]
    pub fn explicit_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.explicit.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Trim whitespace around each comma-separated entry.
fn tidy_comma_separated(value: &str) -> String {
    value.split(',').map(str::trim).collect::<Vec<_>>().join(",")
}
