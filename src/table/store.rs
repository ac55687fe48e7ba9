use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::info;

use crate::core::TableStamp;
use crate::table::{TableError, TableSource, VersionedTable, load};

/// Process-wide holder of the current reference table.
///
/// Readers take an `Arc` snapshot and keep using it for the whole audit, so a
/// refresh running at the same time is never observed half-way: the new table
/// is built completely and then published with a single pointer swap.
#[derive(Debug, Default)]
pub struct TableStore {
    current: ArcSwapOption<VersionedTable>,
}

impl TableStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_table(table: VersionedTable) -> Self {
        let store = Self::empty();
        store.publish(table);
        store
    }

    /// Returns the table that was replaced, if any.
    pub fn publish(&self, table: VersionedTable) -> Option<Arc<VersionedTable>> {
        info!(
            version = table.version(),
            entries = table.len(),
            "reference table published"
        );
        self.current.swap(Some(Arc::new(table)))
    }

    /// Loads `source` off to the side and publishes it. On error the
    /// previously published table stays in place.
    pub fn refresh(&self, source: &TableSource) -> Result<TableStamp, TableError> {
        let table = load(source)?;
        let stamp = table.stamp();
        self.publish(table);
        Ok(stamp)
    }

    pub fn snapshot(&self) -> Option<Arc<VersionedTable>> {
        self.current.load_full()
    }

    pub fn stamp(&self) -> Option<TableStamp> {
        self.snapshot().map(|t| t.stamp())
    }
}
