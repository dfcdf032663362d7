//! Process-wide cache of `fielddefs` ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bzr_core::Result;

use crate::Connector;

/// Field name → `fielddefs.id`.
pub type FieldIds = HashMap<String, i64>;

/// Loads `fielddefs` once and shares the map between reports.
///
/// Population happens under the lock, so concurrent first readers load the
/// table at most once. A failed load leaves the cache empty and the next
/// reader tries again.
#[derive(Debug, Default)]
pub struct FieldIdCache {
    ids: Mutex<Option<Arc<FieldIds>>>,
}

impl FieldIdCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that is already populated.
    #[must_use]
    pub fn with_ids(ids: FieldIds) -> Self {
        Self {
            ids: Mutex::new(Some(Arc::new(ids))),
        }
    }

    /// The cached map, if loaded.
    #[must_use]
    pub fn get(&self) -> Option<Arc<FieldIds>> {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Id of one field, if loaded and known.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<i64> {
        self.get().and_then(|ids| ids.get(name).copied())
    }

    /// Populate from the database unless already loaded.
    ///
    /// # Errors
    ///
    /// Propagates the query failure; the cache stays empty.
    pub fn ensure<C: Connector>(&self, connector: &C, conn: &C::Connection) -> Result<Arc<FieldIds>> {
        let mut slot = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ids) = slot.as_ref() {
            return Ok(Arc::clone(ids));
        }

        let sql = format!("SELECT id, name FROM {}", connector.table_name("fielddefs"));
        let rows = connector.execute(conn, &sql, &[])?;

        let ids: FieldIds = rows
            .filter_map(|row| {
                let id = row.get("id")?.as_i64()?;
                let name = row.get("name")?.as_str()?.to_string();
                Some((name, id))
            })
            .collect();

        tracing::debug!(fields = ids.len(), "loaded field ids");
        let ids = Arc::new(ids);
        *slot = Some(Arc::clone(&ids));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResultSet, Row, SqlParam, TableNames};
    use bzr_core::ReportError;
    use std::cell::Cell;

    /// Serves a fixed `fielddefs` table and counts queries.
    struct FakeConnector {
        queries: Cell<usize>,
        fail: bool,
    }

    impl TableNames for FakeConnector {
        fn table_name(&self, logical: &str) -> String {
            logical.to_string()
        }
    }

    impl Connector for FakeConnector {
        type Connection = ();

        fn connect(&self) -> Result<()> {
            Ok(())
        }

        fn execute(&self, _conn: &(), sql: &str, _params: &[SqlParam]) -> Result<ResultSet> {
            self.queries.set(self.queries.get() + 1);
            if self.fail {
                return Err(ReportError::QueryFailed {
                    sql: sql.to_string(),
                    message: "no such table: fielddefs".to_string(),
                });
            }
            let rows = [(1, "bug_status"), (2, "priority")]
                .into_iter()
                .map(|(id, name)| {
                    let mut row = Row::new();
                    row.insert("id".to_string(), serde_json::json!(id));
                    row.insert("name".to_string(), serde_json::json!(name));
                    row
                })
                .collect();
            Ok(ResultSet::new(vec!["id".into(), "name".into()], rows))
        }
    }

    #[test]
    fn loads_once() {
        let connector = FakeConnector {
            queries: Cell::new(0),
            fail: false,
        };
        let cache = FieldIdCache::new();
        assert!(cache.get().is_none());

        let ids = cache.ensure(&connector, &()).unwrap();
        assert_eq!(ids.get("bug_status"), Some(&1));
        cache.ensure(&connector, &()).unwrap();
        assert_eq!(connector.queries.get(), 1);
        assert_eq!(cache.id("priority"), Some(2));
        assert_eq!(cache.id("votes"), None);
    }

    #[test]
    fn failed_load_leaves_cache_empty() {
        let connector = FakeConnector {
            queries: Cell::new(0),
            fail: true,
        };
        let cache = FieldIdCache::new();
        assert!(cache.ensure(&connector, &()).is_err());
        assert!(cache.get().is_none());
        assert!(cache.ensure(&connector, &()).is_err());
        assert_eq!(connector.queries.get(), 2, "each reader retries");
    }

    #[test]
    fn prepopulated_cache_skips_database() {
        let connector = FakeConnector {
            queries: Cell::new(0),
            fail: true,
        };
        let cache = FieldIdCache::with_ids(FieldIds::from([("bug_status".to_string(), 7)]));
        assert_eq!(cache.ensure(&connector, &()).unwrap()["bug_status"], 7);
        assert_eq!(connector.queries.get(), 0);
    }

    #[test]
    fn concurrent_readers_share_one_map() {
        let cache = Arc::new(FieldIdCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let connector = FakeConnector {
                        queries: Cell::new(0),
                        fail: false,
                    };
                    cache.ensure(&connector, &()).unwrap();
                    connector.queries.get()
                })
            })
            .collect();
        let loads: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(loads, 1);
    }
}
