//! Search-URL generation for Bugzilla's `buglist.cgi` boolean charts.
//!
//! Each filter adds `field0-F-G`, `type0-F-G` and `value0-F-G` triples.
//! `F` is the AND counter: it advances after every term of a negated list
//! and once after an OR list. `G` is the OR position within the current
//! chart row.

/// Path of the bug list below the server root.
pub const BUGLIST_PATH: &str = "/buglist.cgi?";

/// A `buglist.cgi` URL under construction.
#[derive(Debug, Clone)]
pub struct SearchUrl {
    base: String,
    query: String,
    field_count: usize,
}

impl SearchUrl {
    #[must_use]
    pub fn new(bzserver: &str) -> Self {
        Self {
            base: format!("{bzserver}{BUGLIST_PATH}"),
            query: String::new(),
            field_count: 0,
        }
    }

    /// Append the chart rows for one filter value.
    ///
    /// Values starting with `+`, `-` or `*` have no chart equivalent and are
    /// skipped.
    pub fn append(&mut self, value: &str, field_name: &str) {
        if value.starts_with(['+', '-', '*']) {
            tracing::debug!(field = field_name, value, "not expressible in a search URL");
            return;
        }

        let safe = value.replace(' ', "%20");
        let (list, negate) = if let Some(inner) = safe.strip_prefix("!(") {
            (inner.strip_suffix(')').unwrap_or(inner), true)
        } else if safe.contains('!') {
            (safe.strip_prefix('!').unwrap_or(&safe), true)
        } else {
            (safe.as_str(), false)
        };

        let kind = if negate { "notequals" } else { "equals" };
        let mut group_count = 0;
        for single in list.split(',') {
            let name = format!("0-{}-{group_count}", self.field_count);
            self.query.push_str(&format!(
                "&field{name}={field_name}&type{name}={kind}&value{name}={single}"
            ));
            if negate {
                self.field_count += 1;
            } else {
                group_count += 1;
            }
        }
        if !negate {
            self.field_count += 1;
        }
    }

    /// Query string without the server prefix.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.base, self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_list_shares_one_chart_row() {
        let mut url = SearchUrl::new("https://bugs.example.com");
        url.append("P1,P2", "priority");
        assert_eq!(
            url.query(),
            "&field0-0-0=priority&type0-0-0=equals&value0-0-0=P1\
             &field0-0-1=priority&type0-0-1=equals&value0-0-1=P2"
        );
        assert!(url.url().starts_with("https://bugs.example.com/buglist.cgi?&field0-0-0"));
    }

    #[test]
    fn negated_list_uses_one_row_per_term() {
        let mut url = SearchUrl::new("");
        url.append("!(CLOSED,VERIFIED)", "bug_status");
        assert_eq!(
            url.query(),
            "&field0-0-0=bug_status&type0-0-0=notequals&value0-0-0=CLOSED\
             &field0-1-0=bug_status&type0-1-0=notequals&value0-1-0=VERIFIED"
        );
    }

    #[test]
    fn counter_persists_across_fields() {
        let mut url = SearchUrl::new("");
        url.append("!CLOSED", "bug_status");
        url.append("P1,P2", "priority");
        url.append("Widgets", "product");
        let q = url.query();
        assert!(q.starts_with("&field0-0-0=bug_status&type0-0-0=notequals&value0-0-0=CLOSED"));
        assert!(q.contains("&field0-1-0=priority"));
        assert!(q.contains("&field0-1-1=priority"));
        assert!(q.contains("&field0-2-0=product&type0-2-0=equals&value0-2-0=Widgets"));
    }

    #[test]
    fn specials_are_omitted() {
        let mut url = SearchUrl::new("");
        for value in ["+", "-", "*", "-1w"] {
            url.append(value, "deadline");
        }
        assert_eq!(url.query(), "");
    }

    #[test]
    fn spaces_are_escaped() {
        let mut url = SearchUrl::new("");
        url.append("Release 1", "version");
        assert_eq!(
            url.query(),
            "&field0-0-0=version&type0-0-0=equals&value0-0-0=Release%201"
        );
    }
}
