use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use redolink_common::decode::{number_to_string, number_to_u64};
use redolink_common::{Obj, RedoError, Result, RowId, RowImage, Scn};
use tracing::{debug, info, warn};

use crate::dict::*;
use crate::filter::SchemaElement;
use crate::store::DictStore;
use crate::table::{lob_index_name, Column, SystemTableKind, Table, TableLob, TableOptions};
use crate::xml::XmlCtx;

/// Column visibility switches, mirroring the engine's SHOW_* flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnVisibility {
    pub hidden: bool,
    pub guard: bool,
    pub nested: bool,
    pub unused: bool,
}

/// How a dictionary row changed inside a schema transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictChange {
    Insert,
    Update,
    Delete,
}

/// The schema shadow: replicated dictionary tables plus the derived
/// per-object descriptors. Mutated only by the parser, and only inside a
/// dedicated schema-update transaction; readers observe either the pre- or
/// the post-update snapshot because the derived maps are rebuilt before the
/// updating transaction commits.
pub struct Schema {
    pub scn: Scn,

    pub users: DictStore<SysUser>,
    pub objs: DictStore<SysObj>,
    pub tabs: DictStore<SysTab>,
    pub cols: DictStore<SysCol>,
    pub ccols: DictStore<SysCCol>,
    pub cdefs: DictStore<SysCDef>,
    pub deferred: DictStore<SysDeferredStg>,
    pub ecols: DictStore<SysECol>,
    pub lobs: DictStore<SysLob>,
    pub lob_comp_parts: DictStore<SysLobCompPart>,
    pub lob_frags: DictStore<SysLobFrag>,
    pub tab_parts: DictStore<SysTabPart>,
    pub tab_com_parts: DictStore<SysTabComPart>,
    pub tab_sub_parts: DictStore<SysTabSubPart>,
    pub tss: DictStore<SysTs>,
    pub ttsets: DictStore<XdbTtSet>,
    pub xnms: DictStore<XdbXNm>,
    pub xqns: DictStore<XdbXQn>,
    pub xpts: DictStore<XdbXPt>,

    table_map: HashMap<Obj, Arc<Table>>,
    partition_map: HashMap<Obj, Arc<Table>>,
    /// LOB (or LOB fragment/partition) object → owning (table obj, intCol).
    lob_map: HashMap<Obj, (Obj, i32)>,
    xml_ctx: XmlCtx,

    elements: Vec<SchemaElement>,
    touched: BTreeSet<Obj>,
    xml_touched: bool,
    supp_warned: HashSet<Obj>,

    pub visibility: ColumnVisibility,
    pub db_supp_log_primary: bool,
    pub db_supp_log_all: bool,
    /// Database and national character set defaults, used when COL$ carries
    /// zero.
    pub default_charset_id: u32,
    pub default_ncharset_id: u32,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    pub fn new() -> Schema {
        Schema {
            scn: Scn::ZERO,
            users: DictStore::new(),
            objs: DictStore::new(),
            tabs: DictStore::new(),
            cols: DictStore::new(),
            ccols: DictStore::new(),
            cdefs: DictStore::new(),
            deferred: DictStore::new(),
            ecols: DictStore::new(),
            lobs: DictStore::new(),
            lob_comp_parts: DictStore::new(),
            lob_frags: DictStore::new(),
            tab_parts: DictStore::new(),
            tab_com_parts: DictStore::new(),
            tab_sub_parts: DictStore::new(),
            tss: DictStore::new(),
            ttsets: DictStore::new(),
            xnms: DictStore::new(),
            xqns: DictStore::new(),
            xpts: DictStore::new(),
            table_map: HashMap::new(),
            partition_map: HashMap::new(),
            lob_map: HashMap::new(),
            xml_ctx: XmlCtx::default(),
            elements: Vec::new(),
            touched: BTreeSet::new(),
            xml_touched: false,
            supp_warned: HashSet::new(),
            visibility: ColumnVisibility::default(),
            db_supp_log_primary: false,
            db_supp_log_all: false,
            default_charset_id: 873,   // AL32UTF8
            default_ncharset_id: 2000, // AL16UTF16
        }
    }

    /// Replace the replication element set atomically and queue every known
    /// object for rebuild against the new set.
    pub fn set_elements(&mut self, elements: Vec<SchemaElement>) {
        self.elements = elements;
        let all: Vec<Obj> = self.objs.iter().map(|o| o.obj).collect();
        self.touched.extend(all);
    }

    pub fn elements(&self) -> &[SchemaElement] {
        &self.elements
    }

    pub fn touch(&mut self, obj: Obj) {
        self.touched.insert(obj);
    }

    pub fn touch_xml(&mut self) {
        self.xml_touched = true;
    }

    pub fn has_touched(&self) -> bool {
        !self.touched.is_empty() || self.xml_touched
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Descriptor for an object, resolving partitions to their base table.
    pub fn table_for_obj(&self, obj: Obj) -> Option<&Arc<Table>> {
        self.table_map.get(&obj).or_else(|| self.partition_map.get(&obj))
    }

    /// Owning (table, intCol) of a LOB segment object.
    pub fn lob_owner(&self, lob_obj: Obj) -> Option<(&Arc<Table>, i32)> {
        let (table_obj, int_col) = self.lob_map.get(&lob_obj)?;
        Some((self.table_map.get(table_obj)?, *int_col))
    }

    pub fn xml_ctx(&self) -> &XmlCtx {
        &self.xml_ctx
    }

    /// Token dictionaries of the XMLType storage attached to a table, via
    /// the XDB$TTSET registration.
    pub fn xml_dicts_for_obj(&self, obj: Obj) -> Option<&crate::xml::XmlDicts> {
        let tok_suf = self.ttsets.iter().find(|t| t.obj == obj)?.tok_suf.clone();
        self.xml_ctx.dicts(&tok_suf)
    }

    pub fn table_count(&self) -> usize {
        self.table_map.len()
    }

    /// Usable LOB page payload for a tablespace block size.
    pub fn page_data_size(block_size: u32) -> u32 {
        match block_size {
            8192 => 8132,
            16384 => 16264,
            32768 => 32528,
            other => other.saturating_sub(60),
        }
    }

    // -----------------------------------------------------------------------
    // Dictionary changes
    // -----------------------------------------------------------------------

    /// Apply one replicated dictionary DML to the shadow. `row_id` is the
    /// physical address of the dictionary row; `image` the after image for
    /// inserts/updates or the before image for deletes.
    pub fn apply_change(
        &mut self,
        kind: SystemTableKind,
        table_name: &str,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
    ) -> Result<()> {
        match kind {
            SystemTableKind::SysUser => self.apply_user(change, row_id, image),
            SystemTableKind::SysObj => self.apply_obj(change, row_id, image),
            SystemTableKind::SysTab => self.apply_tab(change, row_id, image),
            SystemTableKind::SysCol => self.apply_col(change, row_id, image),
            SystemTableKind::SysCCol => self.apply_ccol(change, row_id, image),
            SystemTableKind::SysCDef => self.apply_cdef(change, row_id, image),
            SystemTableKind::SysDeferredStg => self.apply_deferred(change, row_id, image),
            SystemTableKind::SysECol => self.apply_ecol(change, row_id, image),
            SystemTableKind::SysLob => self.apply_lob(change, row_id, image),
            SystemTableKind::SysLobCompPart => self.apply_lob_comp_part(change, row_id, image),
            SystemTableKind::SysLobFrag => self.apply_lob_frag(change, row_id, image),
            SystemTableKind::SysTabPart => self.apply_tab_part(change, row_id, image),
            SystemTableKind::SysTabComPart => self.apply_tab_com_part(change, row_id, image),
            SystemTableKind::SysTabSubPart => self.apply_tab_sub_part(change, row_id, image),
            SystemTableKind::SysTs => self.apply_ts(change, row_id, image),
            SystemTableKind::XdbTtSet => self.apply_ttset(change, row_id, image),
            SystemTableKind::XdbXNm => self.apply_xnm(change, row_id, image, table_name),
            SystemTableKind::XdbXQn => self.apply_xqn(change, row_id, image, table_name),
            SystemTableKind::XdbXPt => self.apply_xpt(change, row_id, image, table_name),
            SystemTableKind::None => Ok(()),
        }
    }

    fn apply_user(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            self.users.remove(row_id);
            return Ok(());
        }
        let row = SysUser {
            row_id,
            user: num(image, "USER#")? as u32,
            name: text(image, "NAME")?,
            spare1: num_or(image, "SPARE1", 0),
        };
        self.users.upsert(row);
        Ok(())
    }

    fn apply_obj(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.objs.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysObj {
            row_id,
            owner: num(image, "OWNER#")? as u32,
            obj: num(image, "OBJ#")? as Obj,
            data_obj: num_or(image, "DATAOBJ#", 0) as Obj,
            obj_type: ObjType::from_raw(num(image, "TYPE#")? as u16),
            name: text(image, "NAME")?,
            flags: num_or(image, "FLAGS", 0),
        };
        self.touched.insert(row.obj);
        if let Some(old) = self.objs.upsert(row) {
            self.touched.insert(old.obj);
        }
        Ok(())
    }

    fn apply_tab(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.tabs.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysTab {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            data_obj: num_or(image, "DATAOBJ#", 0) as Obj,
            ts: num_or(image, "TS#", 0) as u32,
            clu_cols: num_i32_or(image, "CLUCOLS", 0),
            flags: num_or(image, "FLAGS", 0),
            property: num_or(image, "PROPERTY", 0),
        };
        self.touched.insert(row.obj);
        self.tabs.upsert(row);
        Ok(())
    }

    fn apply_col(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.cols.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysCol {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            col: num_i32_or(image, "COL#", 0),
            seg_col: num_i32_or(image, "SEGCOL#", 0),
            int_col: num_i32_or(image, "INTCOL#", 0),
            name: text(image, "NAME")?,
            col_type: ColType::from_raw(num(image, "TYPE#")? as u8),
            length: num_or(image, "LENGTH", 0) as u32,
            precision: num_i32_or(image, "PRECISION#", -1),
            scale: num_i32_or(image, "SCALE", -1),
            charset_form: num_or(image, "CHARSETFORM", 0) as u32,
            charset_id: num_or(image, "CHARSETID", 0) as u32,
            null: num_i32_or(image, "NULL$", 0),
            property: num_or(image, "PROPERTY", 0),
        };
        self.touched.insert(row.obj);
        self.cols.upsert(row);
        Ok(())
    }

    fn apply_ccol(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.ccols.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysCCol {
            row_id,
            con: num(image, "CON#")? as u32,
            int_col: num_i32_or(image, "INTCOL#", 0),
            obj: num(image, "OBJ#")? as Obj,
            spare1: num_or(image, "SPARE1", 0),
        };
        self.touched.insert(row.obj);
        self.ccols.upsert(row);
        Ok(())
    }

    fn apply_cdef(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.cdefs.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysCDef {
            row_id,
            con: num(image, "CON#")? as u32,
            obj: num(image, "OBJ#")? as Obj,
            def_type: num(image, "TYPE#")? as u16,
        };
        self.touched.insert(row.obj);
        self.cdefs.upsert(row);
        Ok(())
    }

    fn apply_deferred(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.deferred.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysDeferredStg {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            flags_stg: num_or(image, "FLAGS_STG", 0),
        };
        self.touched.insert(row.obj);
        self.deferred.upsert(row);
        Ok(())
    }

    fn apply_ecol(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.ecols.remove(row_id) {
                self.touched.insert(old.tab_obj);
            }
            return Ok(());
        }
        let row = SysECol {
            row_id,
            tab_obj: num(image, "TABOBJ#")? as Obj,
            col_num: num_i32_or(image, "COLNUM", 0),
            guard_id: num_i32_or(image, "GUARD_ID", -1),
        };
        self.touched.insert(row.tab_obj);
        self.ecols.upsert(row);
        Ok(())
    }

    fn apply_lob(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.lobs.remove(row_id) {
                self.touched.insert(old.obj);
            }
            return Ok(());
        }
        let row = SysLob {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            col: num_i32_or(image, "COL#", 0),
            int_col: num_i32_or(image, "INTCOL#", 0),
            l_obj: num(image, "LOBJ#")? as Obj,
            ts: num_or(image, "TS#", 0) as u32,
        };
        self.touched.insert(row.obj);
        self.lobs.upsert(row);
        Ok(())
    }

    fn apply_lob_comp_part(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
    ) -> Result<()> {
        if change == DictChange::Delete {
            self.lob_comp_parts.remove(row_id);
            return Ok(());
        }
        let row = SysLobCompPart {
            row_id,
            part_obj: num(image, "PARTOBJ#")? as Obj,
            l_obj: num(image, "LOBJ#")? as Obj,
        };
        if let Some((owner, _)) = self.lob_map.get(&row.l_obj) {
            self.touched.insert(*owner);
        }
        self.lob_comp_parts.upsert(row);
        Ok(())
    }

    fn apply_lob_frag(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            self.lob_frags.remove(row_id);
            return Ok(());
        }
        let row = SysLobFrag {
            row_id,
            frag_obj: num(image, "FRAGOBJ#")? as Obj,
            parent_obj: num(image, "PARENTOBJ#")? as Obj,
            ts: num_or(image, "TS#", 0) as u32,
        };
        if let Some((owner, _)) = self.lob_map.get(&row.parent_obj) {
            self.touched.insert(*owner);
        }
        self.lob_frags.upsert(row);
        Ok(())
    }

    fn apply_tab_part(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.tab_parts.remove(row_id) {
                self.touched.insert(old.bo);
            }
            return Ok(());
        }
        let row = SysTabPart {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            data_obj: num_or(image, "DATAOBJ#", 0) as Obj,
            bo: num(image, "BO#")? as Obj,
        };
        self.touched.insert(row.bo);
        self.tab_parts.upsert(row);
        Ok(())
    }

    fn apply_tab_com_part(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
    ) -> Result<()> {
        if change == DictChange::Delete {
            if let Some(old) = self.tab_com_parts.remove(row_id) {
                self.touched.insert(old.bo);
            }
            return Ok(());
        }
        let row = SysTabComPart {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            data_obj: num_or(image, "DATAOBJ#", 0) as Obj,
            bo: num(image, "BO#")? as Obj,
        };
        self.touched.insert(row.bo);
        self.tab_com_parts.upsert(row);
        Ok(())
    }

    fn apply_tab_sub_part(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
    ) -> Result<()> {
        if change == DictChange::Delete {
            self.tab_sub_parts.remove(row_id);
            return Ok(());
        }
        let row = SysTabSubPart {
            row_id,
            obj: num(image, "OBJ#")? as Obj,
            data_obj: num_or(image, "DATAOBJ#", 0) as Obj,
            p_obj: num(image, "POBJ#")? as Obj,
        };
        // the composite partition links back to the base table
        if let Some(parent) = self
            .tab_com_parts
            .iter()
            .find(|p| p.obj == row.p_obj)
            .map(|p| p.bo)
        {
            self.touched.insert(parent);
        }
        self.tab_sub_parts.upsert(row);
        Ok(())
    }

    fn apply_ts(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        if change == DictChange::Delete {
            self.tss.remove(row_id);
            return Ok(());
        }
        let row = SysTs {
            row_id,
            ts: num(image, "TS#")? as u32,
            name: text(image, "NAME")?,
            block_size: num(image, "BLOCKSIZE")? as u32,
        };
        self.tss.upsert(row);
        Ok(())
    }

    fn apply_ttset(&mut self, change: DictChange, row_id: RowId, image: &RowImage) -> Result<()> {
        self.xml_touched = true;
        if change == DictChange::Delete {
            self.ttsets.remove(row_id);
            return Ok(());
        }
        let row = XdbTtSet {
            row_id,
            guid: text(image, "GUID")?,
            tok_suf: text(image, "TOKSUF")?,
            flags: num_or(image, "FLAGS", 0),
            obj: num_or(image, "OBJ#", 0) as Obj,
        };
        self.ttsets.upsert(row);
        Ok(())
    }

    fn apply_xnm(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
        table_name: &str,
    ) -> Result<()> {
        self.xml_touched = true;
        if change == DictChange::Delete {
            self.xnms.remove(row_id);
            return Ok(());
        }
        let row = XdbXNm {
            row_id,
            tok_suf: xdb_suffix(table_name, "X$NM"),
            nmspc_uri: text(image, "NMSPCURI")?,
            id: num(image, "ID")? as u32,
        };
        self.xnms.upsert(row);
        Ok(())
    }

    fn apply_xqn(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
        table_name: &str,
    ) -> Result<()> {
        self.xml_touched = true;
        if change == DictChange::Delete {
            self.xqns.remove(row_id);
            return Ok(());
        }
        let row = XdbXQn {
            row_id,
            tok_suf: xdb_suffix(table_name, "X$QN"),
            nmspc_id: num_or(image, "NMSPCID", 0) as u32,
            local_name: text(image, "LOCALNAME")?,
            id: num(image, "ID")? as u32,
        };
        self.xqns.upsert(row);
        Ok(())
    }

    fn apply_xpt(
        &mut self,
        change: DictChange,
        row_id: RowId,
        image: &RowImage,
        table_name: &str,
    ) -> Result<()> {
        self.xml_touched = true;
        if change == DictChange::Delete {
            self.xpts.remove(row_id);
            return Ok(());
        }
        let row = XdbXPt {
            row_id,
            tok_suf: xdb_suffix(table_name, "X$PT"),
            path: text(image, "PATH")?,
            id: num(image, "ID")? as u32,
        };
        self.xpts.upsert(row);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------------

    /// Rebuild descriptors for every touched object. Returns the objects
    /// whose descriptors changed (built or dropped).
    pub fn rebuild_touched(&mut self) -> Vec<Obj> {
        let touched: Vec<Obj> = std::mem::take(&mut self.touched).into_iter().collect();
        for &obj in &touched {
            self.drop_object(obj);
        }
        for &obj in &touched {
            if let Some(table) = self.build_object(obj) {
                self.install(table);
            }
        }
        if self.xml_touched {
            self.xml_ctx = XmlCtx::rebuild(&self.xnms, &self.xqns);
            self.xml_touched = false;
        }
        touched
    }

    fn drop_object(&mut self, obj: Obj) {
        if let Some(table) = self.table_map.remove(&obj) {
            for part in &table.partitions {
                self.partition_map.remove(part);
            }
            for lob in &table.lobs {
                self.lob_map.remove(&lob.l_obj);
                for part in &lob.partitions {
                    self.lob_map.remove(part);
                }
                for index in &lob.indexes {
                    self.lob_map.remove(index);
                }
            }
        }
    }

    fn install(&mut self, table: Table) {
        let table = Arc::new(table);
        for part in &table.partitions {
            self.partition_map.insert(*part, Arc::clone(&table));
        }
        for lob in &table.lobs {
            self.lob_map.insert(lob.l_obj, (table.obj, lob.int_col));
            for part in &lob.partitions {
                self.lob_map.insert(*part, (table.obj, lob.int_col));
            }
            for index in &lob.indexes {
                self.lob_map.insert(*index, (table.obj, lob.int_col));
            }
        }
        debug!(obj = table.obj, table = %table.qualified_name(), columns = table.columns.len(), "table descriptor installed");
        self.table_map.insert(table.obj, table);
    }

    /// Derive one table descriptor from the shadow rows. Returns `None`
    /// (with the reason logged) when the object is not replicable.
    fn build_object(&mut self, obj: Obj) -> Option<Table> {
        let (owner_id, table_name) = {
            let sys_obj = self.objs.get(&obj)?;
            if sys_obj.obj_type != ObjType::Table {
                return None;
            }
            if sys_obj.is_dropped() {
                debug!(obj, name = %sys_obj.name, "skipping dropped object");
                return None;
            }
            if sys_obj.is_temporary() {
                debug!(obj, name = %sys_obj.name, "skipping temporary table");
                return None;
            }
            (sys_obj.owner, sys_obj.name.clone())
        };

        let tab_data_obj = {
            let sys_tab = self.tabs.get(&obj)?;
            if sys_tab.is_iot() {
                debug!(obj, table = %table_name, "skipping index-organized table");
                return None;
            }
            if sys_tab.is_binary() {
                debug!(obj, table = %table_name, "skipping binary table");
                return None;
            }
            if sys_tab.is_nested() {
                debug!(obj, table = %table_name, "skipping nested table");
                return None;
            }
            if sys_tab.is_global_temporary() {
                debug!(obj, table = %table_name, "skipping global temporary table");
                return None;
            }
            if sys_tab.is_initial()
                && self.deferred.get(&obj).is_some_and(|stg| stg.is_compressed())
            {
                debug!(obj, table = %table_name, "skipping initial compressed table");
                return None;
            }
            sys_tab.data_obj
        };

        let (owner_name, owner_supp_primary, owner_supp_all) = match self.users.get(&owner_id) {
            Some(user) => (user.name.clone(), user.is_supp_log_primary(), user.is_supp_log_all()),
            None => {
                warn!(obj, owner = owner_id, "owner not in dictionary");
                return None;
            }
        };

        let system_kind = SystemTableKind::classify(&owner_name, &table_name);
        let element = self
            .elements
            .iter()
            .find(|e| e.matches(&owner_name, &table_name));
        if !system_kind.is_system() && element.is_none() {
            return None;
        }
        let options = element.map(|e| e.options).unwrap_or_default();
        let condition = element.and_then(|e| e.condition.clone());
        let tag = element.and_then(|e| e.tag.clone());

        // Columns in segCol order; the descriptor must stay contiguous.
        let mut columns = Vec::new();
        for sys_col in self
            .cols
            .range((obj, 1, i32::MIN)..(obj, i32::MAX, i32::MAX))
        {
            let expected = columns.len() as i32 + 1;
            if sys_col.seg_col != expected {
                warn!(
                    obj,
                    table = %table_name,
                    seg_col = sys_col.seg_col,
                    expected,
                    "column numbering gap, rejecting descriptor"
                );
                return None;
            }

            let charset_id = if sys_col.charset_form == 2 {
                self.default_ncharset_id
            } else if sys_col.charset_id != 0 {
                sys_col.charset_id
            } else {
                self.default_charset_id
            };

            let mut num_pk = 0u32;
            let mut num_supp = 0u32;
            for ccol in self.ccols.range(
                (obj, sys_col.int_col, u32::MIN)..(obj, sys_col.int_col + 1, u32::MIN),
            ) {
                if let Some(cdef) = self.cdefs.get(&(obj, ccol.con)) {
                    if cdef.is_pk() {
                        num_pk += 1;
                    }
                    if cdef.is_supplemental() {
                        num_supp += 1;
                    }
                }
            }

            let guard = sys_col.is_guard()
                || self
                    .ecols
                    .get(&(obj, sys_col.col))
                    .is_some_and(|e| e.guard_id == sys_col.int_col);

            columns.push(Column {
                col: sys_col.col,
                seg_col: sys_col.seg_col,
                int_col: sys_col.int_col,
                name: sys_col.name.clone(),
                col_type: sys_col.col_type,
                length: sys_col.length,
                precision: sys_col.precision,
                scale: sys_col.scale,
                charset_id,
                nullable: sys_col.is_nullable(),
                hidden: sys_col.is_hidden(),
                guard,
                added: sys_col.is_added(),
                unused: sys_col.is_unused(),
                num_pk,
                num_supp,
                stored_as_lob: sys_col.is_stored_as_lob(),
                xml_type: sys_col.col_type == ColType::XmlType,
            });
        }
        let max_seg_col = columns.len() as i32;

        // LOB descriptors: page size from TS$, index segments by synthesized
        // name, partitions via LOBCOMPPART$/LOBFRAG$.
        let mut table_lobs = Vec::new();
        for sys_lob in self
            .lobs
            .range((obj, i32::MIN)..(obj, i32::MAX))
        {
            let page_size = self
                .tss
                .get(&sys_lob.ts)
                .map(|ts| Self::page_data_size(ts.block_size))
                .unwrap_or_else(|| Self::page_data_size(8192));

            let index_name = lob_index_name(obj, sys_lob.int_col);
            let indexes: Vec<Obj> = self
                .objs
                .iter()
                .filter(|o| o.owner == owner_id && o.name == index_name)
                .map(|o| o.obj)
                .collect();

            let mut partitions: Vec<Obj> = self
                .lob_frags
                .range((sys_lob.l_obj, 0)..(sys_lob.l_obj, Obj::MAX))
                .map(|f| f.frag_obj)
                .collect();
            for comp in self
                .lob_comp_parts
                .range((sys_lob.l_obj, 0)..(sys_lob.l_obj, Obj::MAX))
            {
                partitions.push(comp.part_obj);
                partitions.extend(
                    self.lob_frags
                        .range((comp.part_obj, 0)..(comp.part_obj, Obj::MAX))
                        .map(|f| f.frag_obj),
                );
            }

            table_lobs.push(TableLob {
                obj,
                l_obj: sys_lob.l_obj,
                col: sys_lob.col,
                int_col: sys_lob.int_col,
                page_size,
                indexes,
                partitions,
            });
        }

        // Table partitions (plain, composite, sub).
        let mut partitions: Vec<Obj> = self
            .tab_parts
            .range((obj, 0)..(obj, Obj::MAX))
            .map(|p| p.obj)
            .collect();
        for comp in self.tab_com_parts.range((obj, 0)..(obj, Obj::MAX)) {
            partitions.push(comp.obj);
            partitions.extend(
                self.tab_sub_parts
                    .range((comp.obj, 0)..(comp.obj, Obj::MAX))
                    .map(|s| s.obj),
            );
        }

        let total_pk: u32 = columns.iter().filter(|c| c.num_pk > 0).count() as u32;
        let pk_covered = total_pk > 0
            && columns
                .iter()
                .filter(|c| c.num_pk > 0)
                .all(|c| c.num_supp > 0);
        let supp_log_ok = self.db_supp_log_primary
            || self.db_supp_log_all
            || owner_supp_primary
            || owner_supp_all
            || pk_covered;

        if !supp_log_ok && !system_kind.is_system() && self.supp_warned.insert(obj) {
            info!(
                table = %format!("{}.{}", owner_name, table_name),
                "supplemental log missing: updates and deletes may be skipped when no key can be formed"
            );
        }

        Some(Table {
            obj,
            data_obj: tab_data_obj,
            owner: owner_name,
            name: table_name,
            columns,
            max_seg_col,
            total_pk,
            supp_log_ok,
            options,
            lobs: table_lobs,
            partitions,
            system_kind,
            condition,
            tag,
        })
    }
}

fn xdb_suffix(table_name: &str, prefix: &str) -> String {
    table_name.strip_prefix(prefix).unwrap_or(table_name).to_string()
}

// ---------------------------------------------------------------------------
// Row-image field parsing
// ---------------------------------------------------------------------------

fn field<'a>(image: &'a RowImage, name: &str) -> Result<&'a [u8]> {
    image
        .get(name)
        .ok_or_else(|| RedoError::Dictionary(format!("missing column {}", name)))
}

fn num(image: &RowImage, name: &str) -> Result<u64> {
    let bytes = field(image, name)?;
    number_to_u64(bytes)
        .ok_or_else(|| RedoError::Dictionary(format!("column {} is not a number", name)))
}

fn num_or(image: &RowImage, name: &str, default: u64) -> u64 {
    image
        .get(name)
        .and_then(number_to_u64)
        .unwrap_or(default)
}

fn num_i32_or(image: &RowImage, name: &str, default: i32) -> i32 {
    image
        .get(name)
        .and_then(number_to_string)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn text(image: &RowImage, name: &str) -> Result<String> {
    let bytes = field(image, name)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
