use std::collections::HashMap;

use log::trace;

use crate::restriction::{self, Restriction, StaleWhereId, WhereLookup};

#[derive(Debug, Clone)]
struct WhereEntry {
    filter: String,
    restriction: Restriction,
}

/// Compiled filters of live queries, keyed by query id.
#[derive(Debug, Default)]
pub struct WhereIdRegistry {
    entries: HashMap<u32, WhereEntry>,
}

impl WhereIdRegistry {
    pub fn insert(&mut self, where_id: u32, filter: String, restriction: Restriction) {
        trace!("where id {where_id}: {filter}");
        self.entries.insert(
            where_id,
            WhereEntry {
                filter,
                restriction,
            },
        );
    }

    pub fn remove(&mut self, where_id: u32) -> bool {
        self.entries.remove(&where_id).is_some()
    }

    pub fn lookup(&self, where_id: u32) -> Option<&str> {
        self.entries.get(&where_id).map(|e| e.filter.as_str())
    }

    /// Filter text for `where_id`, or a placeholder naming the missing id.
    pub fn describe(&self, where_id: u32) -> String {
        self.lookup(where_id)
            .map(str::to_owned)
            .unwrap_or_else(|| restriction::placeholder(where_id))
    }

    pub fn resolve(&self, where_id: u32) -> Result<&Restriction, StaleWhereId> {
        self.entries
            .get(&where_id)
            .map(|e| &e.restriction)
            .ok_or(StaleWhereId(where_id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl WhereLookup for WhereIdRegistry {
    fn filter(&self, where_id: u32) -> Option<&str> {
        self.lookup(where_id)
    }

    fn restriction(&self, where_id: u32) -> Option<&Restriction> {
        self.resolve(where_id).ok()
    }
}

#[cfg(test)]
mod tests {
    use crate::{props, restriction::RelOp, rowset::Value};

    use super::*;

    fn named(name: &str) -> Restriction {
        Restriction::Property {
            property: props::FILE_NAME,
            op: RelOp::Eq,
            value: Value::Str(name.into()),
        }
    }

    #[test]
    fn missing_id_is_lenient_or_stale() {
        let registry = WhereIdRegistry::default();
        assert_eq!(registry.describe(12), "no filter available for id 12");
        assert_eq!(registry.resolve(12), Err(StaleWhereId(12)));
    }

    #[test]
    fn removal_forgets_filter() {
        let mut registry = WhereIdRegistry::default();
        registry.insert(1, "System.FileName = 'a'".into(), named("a"));
        assert_eq!(registry.describe(1), "System.FileName = 'a'");
        assert_eq!(registry.resolve(1), Ok(&named("a")));

        assert!(registry.remove(1));
        assert!(!registry.remove(1));
        assert!(registry.is_empty());
        assert_eq!(registry.lookup(1), None);
    }
}
