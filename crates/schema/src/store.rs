use std::collections::{BTreeMap, HashMap};
use std::ops::RangeBounds;

use redolink_common::RowId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dict::DictRow;

/// Keyed collection backing one shadow dictionary table: rows indexed by
/// physical row-id (how redo addresses them) and by domain key (how the
/// rebuild addresses them). Domain keys sort, so range scans walk e.g. all
/// columns of one object in segment order.
pub struct DictStore<R: DictRow> {
    by_row_id: HashMap<RowId, R>,
    by_key: BTreeMap<R::Key, RowId>,
}

impl<R: DictRow> Default for DictStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: DictRow> DictStore<R> {
    pub fn new() -> Self {
        Self {
            by_row_id: HashMap::new(),
            by_key: BTreeMap::new(),
        }
    }

    /// Insert or replace by row-id. Returns the replaced row, if any.
    pub fn upsert(&mut self, row: R) -> Option<R> {
        let row_id = row.row_id();
        let old = self.by_row_id.remove(&row_id);
        if let Some(old_row) = &old {
            self.by_key.remove(&old_row.key());
        }
        self.by_key.insert(row.key(), row_id);
        self.by_row_id.insert(row_id, row);
        old
    }

    pub fn remove(&mut self, row_id: RowId) -> Option<R> {
        let row = self.by_row_id.remove(&row_id)?;
        self.by_key.remove(&row.key());
        Some(row)
    }

    pub fn get_by_row_id(&self, row_id: RowId) -> Option<&R> {
        self.by_row_id.get(&row_id)
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.by_key.get(key).and_then(|id| self.by_row_id.get(id))
    }

    /// Ordered scan over a key range.
    pub fn range(&self, bounds: impl RangeBounds<R::Key>) -> impl Iterator<Item = &R> {
        self.by_key
            .range(bounds)
            .filter_map(|(_, id)| self.by_row_id.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.by_key.values().filter_map(|id| self.by_row_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.by_row_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_row_id.is_empty()
    }
}

impl<R> DictStore<R>
where
    R: DictRow + Serialize + DeserializeOwned,
{
    /// Snapshot form: plain row list, reindexed on load.
    pub fn to_rows(&self) -> Vec<&R> {
        self.iter().collect()
    }

    pub fn from_rows(rows: Vec<R>) -> Self {
        let mut store = Self::new();
        for row in rows {
            store.upsert(row);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::SysCol;
    use redolink_common::{Dba, RowId};

    fn col(obj: u32, seg_col: i32, name: &str) -> SysCol {
        SysCol {
            row_id: RowId::new(obj, Dba(seg_col as u32), 0),
            obj,
            col: seg_col,
            seg_col,
            int_col: seg_col,
            name: name.to_string(),
            col_type: crate::dict::ColType::Number,
            length: 22,
            precision: -1,
            scale: -1,
            charset_form: 0,
            charset_id: 0,
            null: 0,
            property: 0,
        }
    }

    #[test]
    fn test_upsert_and_lookup() {
        let mut store = DictStore::new();
        store.upsert(col(87, 1, "DEPTNO"));
        store.upsert(col(87, 2, "DNAME"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&(87, 1, 1)).unwrap().name, "DEPTNO");
        assert!(store.get(&(87, 3, 3)).is_none());
    }

    #[test]
    fn test_upsert_replaces_by_row_id() {
        let mut store = DictStore::new();
        store.upsert(col(87, 1, "DEPTNO"));
        let mut renamed = col(87, 1, "DEPT_NO");
        renamed.row_id = RowId::new(87, Dba(1), 0);
        let old = store.upsert(renamed);
        assert_eq!(old.unwrap().name, "DEPTNO");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_range_scan_in_segcol_order() {
        let mut store = DictStore::new();
        store.upsert(col(90, 1, "A"));
        store.upsert(col(87, 2, "DNAME"));
        store.upsert(col(87, 1, "DEPTNO"));

        let names: Vec<&str> = store
            .range((87, i32::MIN, i32::MIN)..(88, i32::MIN, i32::MIN))
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["DEPTNO", "DNAME"]);
    }

    #[test]
    fn test_remove_by_row_id() {
        let mut store = DictStore::new();
        let row = col(87, 1, "DEPTNO");
        let row_id = row.row_id;
        store.upsert(row);

        let removed = store.remove(row_id).unwrap();
        assert_eq!(removed.name, "DEPTNO");
        assert!(store.is_empty());
        assert!(store.remove(row_id).is_none());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut store = DictStore::new();
        store.upsert(col(87, 1, "DEPTNO"));
        store.upsert(col(87, 2, "DNAME"));

        let rows: Vec<SysCol> = store.to_rows().into_iter().cloned().collect();
        let rebuilt = DictStore::from_rows(rows);
        assert_eq!(rebuilt.len(), 2);
        assert_eq!(rebuilt.get(&(87, 2, 2)).unwrap().name, "DNAME");
    }
}
