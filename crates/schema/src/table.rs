use redolink_common::{DataObj, LObj, Obj};
use serde::{Deserialize, Serialize};

use crate::dict::ColType;
use crate::filter::Condition;

/// Dictionary tables the engine itself replicates; DML against them is
/// routed into the schema shadow instead of the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemTableKind {
    None,
    SysCCol,
    SysCDef,
    SysCol,
    SysDeferredStg,
    SysECol,
    SysLob,
    SysLobCompPart,
    SysLobFrag,
    SysObj,
    SysTab,
    SysTabComPart,
    SysTabPart,
    SysTabSubPart,
    SysTs,
    SysUser,
    XdbTtSet,
    XdbXNm,
    XdbXPt,
    XdbXQn,
}

impl SystemTableKind {
    /// Classify by owner and table name the way the dictionary names them.
    pub fn classify(owner: &str, table: &str) -> SystemTableKind {
        match (owner, table) {
            ("SYS", "CCOL$") => SystemTableKind::SysCCol,
            ("SYS", "CDEF$") => SystemTableKind::SysCDef,
            ("SYS", "COL$") => SystemTableKind::SysCol,
            ("SYS", "DEFERRED_STG$") => SystemTableKind::SysDeferredStg,
            ("SYS", "ECOL$") => SystemTableKind::SysECol,
            ("SYS", "LOB$") => SystemTableKind::SysLob,
            ("SYS", "LOBCOMPPART$") => SystemTableKind::SysLobCompPart,
            ("SYS", "LOBFRAG$") => SystemTableKind::SysLobFrag,
            ("SYS", "OBJ$") => SystemTableKind::SysObj,
            ("SYS", "TAB$") => SystemTableKind::SysTab,
            ("SYS", "TABCOMPART$") => SystemTableKind::SysTabComPart,
            ("SYS", "TABPART$") => SystemTableKind::SysTabPart,
            ("SYS", "TABSUBPART$") => SystemTableKind::SysTabSubPart,
            ("SYS", "TS$") => SystemTableKind::SysTs,
            ("SYS", "USER$") => SystemTableKind::SysUser,
            ("XDB", "XDB$TTSET") => SystemTableKind::XdbTtSet,
            (_, t) if t.starts_with("X$NM") => SystemTableKind::XdbXNm,
            (_, t) if t.starts_with("X$PT") => SystemTableKind::XdbXPt,
            (_, t) if t.starts_with("X$QN") => SystemTableKind::XdbXQn,
            _ => SystemTableKind::None,
        }
    }

    pub fn is_system(self) -> bool {
        self != SystemTableKind::None
    }
}

/// One column of a table descriptor. `seg_col` is the 1-based physical
/// position; after a rebuild `columns[i].seg_col == i + 1` always holds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Column {
    pub col: i32,
    pub seg_col: i32,
    pub int_col: i32,
    pub name: String,
    pub col_type: ColType,
    pub length: u32,
    pub precision: i32,
    pub scale: i32,
    pub charset_id: u32,
    pub nullable: bool,
    pub hidden: bool,
    pub guard: bool,
    pub added: bool,
    pub unused: bool,
    /// Number of primary-key constraints this column participates in.
    pub num_pk: u32,
    /// Number of supplemental-log groups covering this column.
    pub num_supp: u32,
    pub stored_as_lob: bool,
    pub xml_type: bool,
}

/// LOB descriptor attached to a table: resolves a locator to the set of
/// page-producing segments.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableLob {
    pub obj: Obj,
    pub l_obj: LObj,
    pub col: i32,
    pub int_col: i32,
    /// Usable page payload bytes, derived from the tablespace block size.
    pub page_size: u32,
    /// Index segments, named SYS_IL<obj>C<intCol>$$ in the dictionary.
    pub indexes: Vec<Obj>,
    /// Partition/fragment objects producing pages for this LOB.
    pub partitions: Vec<Obj>,
}

/// Replication options carried per schema element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Emit full before/after images even for unchanged columns.
    pub full_update: bool,
}

/// Logical table descriptor derived from the shadow dictionary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Table {
    pub obj: Obj,
    pub data_obj: DataObj,
    pub owner: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub max_seg_col: i32,
    /// Total primary-key columns.
    pub total_pk: u32,
    /// Supplemental-log coverage of the key exists (table, user or database
    /// level).
    pub supp_log_ok: bool,
    pub options: TableOptions,
    pub lobs: Vec<TableLob>,
    pub partitions: Vec<Obj>,
    pub system_kind: SystemTableKind,
    pub condition: Option<Condition>,
    pub tag: Option<String>,
}

impl Table {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// Column by 0-based segment index (the numbering row images use).
    pub fn column_by_seg_index(&self, index: u16) -> Option<&Column> {
        self.columns.get(index as usize)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn lob_for_int_col(&self, int_col: i32) -> Option<&TableLob> {
        self.lobs.iter().find(|l| l.int_col == int_col)
    }

    pub fn is_system(&self) -> bool {
        self.system_kind.is_system()
    }
}

/// The synthesized LOB index segment name.
pub fn lob_index_name(obj: Obj, int_col: i32) -> String {
    format!("SYS_IL{:010}C{:05}$$", obj, int_col)
}
