use redolink_common::{RedoError, Result, Scn};
use serde::{Deserialize, Serialize};

use crate::dict::*;
use crate::schema::Schema;
use crate::store::DictStore;

/// Immutable serialized union of the shadow dictionary tables, written under
/// a single logical SCN. Checkpoints reference a snapshot by SCN; recovery
/// restores one before replaying dictionary deltas from redo.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub scn: u64,
    pub db_supp_log_primary: bool,
    pub db_supp_log_all: bool,
    pub default_charset_id: u32,
    pub default_ncharset_id: u32,
    pub users: Vec<SysUser>,
    pub objs: Vec<SysObj>,
    pub tabs: Vec<SysTab>,
    pub cols: Vec<SysCol>,
    pub ccols: Vec<SysCCol>,
    pub cdefs: Vec<SysCDef>,
    pub deferred: Vec<SysDeferredStg>,
    pub ecols: Vec<SysECol>,
    pub lobs: Vec<SysLob>,
    pub lob_comp_parts: Vec<SysLobCompPart>,
    pub lob_frags: Vec<SysLobFrag>,
    pub tab_parts: Vec<SysTabPart>,
    pub tab_com_parts: Vec<SysTabComPart>,
    pub tab_sub_parts: Vec<SysTabSubPart>,
    pub tss: Vec<SysTs>,
    pub ttsets: Vec<XdbTtSet>,
    pub xnms: Vec<XdbXNm>,
    pub xqns: Vec<XdbXQn>,
    pub xpts: Vec<XdbXPt>,
}

fn rows<R: DictRow + Clone + Serialize + for<'de> Deserialize<'de>>(
    store: &DictStore<R>,
) -> Vec<R> {
    store.to_rows().into_iter().cloned().collect()
}

impl SchemaSnapshot {
    pub fn capture(schema: &Schema, scn: Scn) -> SchemaSnapshot {
        SchemaSnapshot {
            scn: scn.0,
            db_supp_log_primary: schema.db_supp_log_primary,
            db_supp_log_all: schema.db_supp_log_all,
            default_charset_id: schema.default_charset_id,
            default_ncharset_id: schema.default_ncharset_id,
            users: rows(&schema.users),
            objs: rows(&schema.objs),
            tabs: rows(&schema.tabs),
            cols: rows(&schema.cols),
            ccols: rows(&schema.ccols),
            cdefs: rows(&schema.cdefs),
            deferred: rows(&schema.deferred),
            ecols: rows(&schema.ecols),
            lobs: rows(&schema.lobs),
            lob_comp_parts: rows(&schema.lob_comp_parts),
            lob_frags: rows(&schema.lob_frags),
            tab_parts: rows(&schema.tab_parts),
            tab_com_parts: rows(&schema.tab_com_parts),
            tab_sub_parts: rows(&schema.tab_sub_parts),
            tss: rows(&schema.tss),
            ttsets: rows(&schema.ttsets),
            xnms: rows(&schema.xnms),
            xqns: rows(&schema.xqns),
            xpts: rows(&schema.xpts),
        }
    }

    /// Restore the shadow stores into `schema` and rebuild every descriptor.
    pub fn restore(self, schema: &mut Schema) {
        schema.scn = Scn(self.scn);
        schema.db_supp_log_primary = self.db_supp_log_primary;
        schema.db_supp_log_all = self.db_supp_log_all;
        schema.default_charset_id = self.default_charset_id;
        schema.default_ncharset_id = self.default_ncharset_id;

        let all_objs: Vec<_> = self.objs.iter().map(|o| o.obj).collect();
        schema.users = DictStore::from_rows(self.users);
        schema.objs = DictStore::from_rows(self.objs);
        schema.tabs = DictStore::from_rows(self.tabs);
        schema.cols = DictStore::from_rows(self.cols);
        schema.ccols = DictStore::from_rows(self.ccols);
        schema.cdefs = DictStore::from_rows(self.cdefs);
        schema.deferred = DictStore::from_rows(self.deferred);
        schema.ecols = DictStore::from_rows(self.ecols);
        schema.lobs = DictStore::from_rows(self.lobs);
        schema.lob_comp_parts = DictStore::from_rows(self.lob_comp_parts);
        schema.lob_frags = DictStore::from_rows(self.lob_frags);
        schema.tab_parts = DictStore::from_rows(self.tab_parts);
        schema.tab_com_parts = DictStore::from_rows(self.tab_com_parts);
        schema.tab_sub_parts = DictStore::from_rows(self.tab_sub_parts);
        schema.tss = DictStore::from_rows(self.tss);
        schema.ttsets = DictStore::from_rows(self.ttsets);
        schema.xnms = DictStore::from_rows(self.xnms);
        schema.xqns = DictStore::from_rows(self.xqns);
        schema.xpts = DictStore::from_rows(self.xpts);

        for obj in all_objs {
            schema.touch(obj);
        }
        schema.touch_xml();
        schema.rebuild_touched();
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RedoError::StateStore(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<SchemaSnapshot> {
        serde_json::from_slice(data).map_err(|e| RedoError::StateStore(e.to_string()))
    }
}
