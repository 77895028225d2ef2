//! Shadow rows of the replicated data-dictionary tables. Field sets and
//! flag bits follow the upstream dictionary; only the columns logical
//! reconstruction needs are carried.

use redolink_common::{DataObj, LObj, Obj, RowId};
use serde::{Deserialize, Serialize};

/// A shadow dictionary row: addressable by physical row-id (for change
/// tracking) and by a domain key (for lookups and ordered scans).
pub trait DictRow: Clone {
    type Key: Ord + Clone;

    fn row_id(&self) -> RowId;
    fn key(&self) -> Self::Key;
    /// The table object this row contributes to, for touched-set tracking.
    fn touches(&self) -> Option<Obj>;
}

// ---------------------------------------------------------------------------
// SYS.USER$
// ---------------------------------------------------------------------------

/// SPARE1 bits of USER$.
pub mod user_spare1 {
    /// Supplemental logging of primary keys enabled for the whole user.
    pub const SUPP_LOG_PRIMARY: u64 = 1 << 0;
    /// Supplemental logging of all columns enabled for the whole user.
    pub const SUPP_LOG_ALL: u64 = 1 << 3;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysUser {
    pub row_id: RowId,
    pub user: u32,
    pub name: String,
    pub spare1: u64,
}

impl SysUser {
    pub fn is_supp_log_primary(&self) -> bool {
        self.spare1 & user_spare1::SUPP_LOG_PRIMARY != 0
    }

    pub fn is_supp_log_all(&self) -> bool {
        self.spare1 & user_spare1::SUPP_LOG_ALL != 0
    }
}

impl DictRow for SysUser {
    type Key = u32;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> u32 {
        self.user
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

// ---------------------------------------------------------------------------
// SYS.OBJ$
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjType {
    NextObject = 0,
    Index = 1,
    Table = 2,
    Cluster = 3,
    View = 4,
    Synonym = 5,
    Sequence = 6,
    TablePartition = 19,
    IndexPartition = 20,
    Lob = 21,
    TableSubPartition = 34,
    LobPartition = 40,
    LobSubPartition = 41,
    MaterializedView = 42,
    Other = 255,
}

impl ObjType {
    pub fn from_raw(raw: u16) -> ObjType {
        match raw {
            0 => ObjType::NextObject,
            1 => ObjType::Index,
            2 => ObjType::Table,
            3 => ObjType::Cluster,
            4 => ObjType::View,
            5 => ObjType::Synonym,
            6 => ObjType::Sequence,
            19 => ObjType::TablePartition,
            20 => ObjType::IndexPartition,
            21 => ObjType::Lob,
            34 => ObjType::TableSubPartition,
            40 => ObjType::LobPartition,
            41 => ObjType::LobSubPartition,
            42 => ObjType::MaterializedView,
            _ => ObjType::Other,
        }
    }
}

/// FLAGS bits of OBJ$.
pub mod obj_flags {
    pub const TEMPORARY: u64 = 1 << 1;
    pub const SECONDARY: u64 = 1 << 4;
    pub const IN_MEMORY_TEMP: u64 = 1 << 5;
    pub const DROPPED: u64 = 1 << 7;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysObj {
    pub row_id: RowId,
    pub owner: u32,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub obj_type: ObjType,
    pub name: String,
    pub flags: u64,
}

impl SysObj {
    pub fn is_dropped(&self) -> bool {
        self.flags & obj_flags::DROPPED != 0
    }

    pub fn is_temporary(&self) -> bool {
        self.flags & (obj_flags::TEMPORARY | obj_flags::IN_MEMORY_TEMP) != 0
    }
}

impl DictRow for SysObj {
    type Key = Obj;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> Obj {
        self.obj
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

// ---------------------------------------------------------------------------
// SYS.TAB$
// ---------------------------------------------------------------------------

/// PROPERTY bits of TAB$.
pub mod tab_property {
    pub const BINARY: u64 = 1 << 0;
    pub const PARTITIONED: u64 = 1 << 5;
    pub const IOT_INDEX_ONLY: u64 = 1 << 6;
    pub const IOT_ROW_OVERFLOW: u64 = 1 << 7;
    pub const IOT_OVERFLOW_SEGMENT: u64 = 1 << 9;
    pub const CLUSTERED: u64 = 1 << 10;
    pub const NESTED: u64 = 1 << 13;
    pub const GLOBAL_TEMPORARY: u64 = 1 << 22;
    /// Segment not yet materialized; row format depends on FLAGSSTG.
    pub const INITIAL: u64 = 1 << 17;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTab {
    pub row_id: RowId,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub ts: u32,
    pub clu_cols: i32,
    pub flags: u64,
    pub property: u64,
}

impl SysTab {
    pub fn is_binary(&self) -> bool {
        self.property & tab_property::BINARY != 0
    }

    pub fn is_iot(&self) -> bool {
        self.property & (tab_property::IOT_INDEX_ONLY | tab_property::IOT_OVERFLOW_SEGMENT) != 0
    }

    pub fn is_clustered(&self) -> bool {
        self.property & tab_property::CLUSTERED != 0
    }

    pub fn is_nested(&self) -> bool {
        self.property & tab_property::NESTED != 0
    }

    pub fn is_partitioned(&self) -> bool {
        self.property & tab_property::PARTITIONED != 0
    }

    pub fn is_initial(&self) -> bool {
        self.property & tab_property::INITIAL != 0
    }

    pub fn is_global_temporary(&self) -> bool {
        self.property & tab_property::GLOBAL_TEMPORARY != 0
    }
}

impl DictRow for SysTab {
    type Key = Obj;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> Obj {
        self.obj
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

// ---------------------------------------------------------------------------
// SYS.COL$
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColType {
    None,
    Varchar,
    Number,
    Long,
    Date,
    Raw,
    LongRaw,
    XmlType,
    Char,
    Float,
    Double,
    Clob,
    Blob,
    Json,
    Timestamp,
    TimestampWithTz,
    IntervalYearToMonth,
    IntervalDayToSecond,
    URowId,
    TimestampWithLocalTz,
    Boolean,
    Other(u8),
}

impl ColType {
    pub fn from_raw(raw: u8) -> ColType {
        match raw {
            1 => ColType::Varchar,
            2 => ColType::Number,
            8 => ColType::Long,
            12 => ColType::Date,
            23 => ColType::Raw,
            24 => ColType::LongRaw,
            58 => ColType::XmlType,
            96 => ColType::Char,
            100 => ColType::Float,
            101 => ColType::Double,
            112 => ColType::Clob,
            113 => ColType::Blob,
            119 => ColType::Json,
            180 => ColType::Timestamp,
            181 => ColType::TimestampWithTz,
            182 => ColType::IntervalYearToMonth,
            183 => ColType::IntervalDayToSecond,
            208 => ColType::URowId,
            231 => ColType::TimestampWithLocalTz,
            252 => ColType::Boolean,
            other => ColType::Other(other),
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            ColType::None => 0,
            ColType::Varchar => 1,
            ColType::Number => 2,
            ColType::Long => 8,
            ColType::Date => 12,
            ColType::Raw => 23,
            ColType::LongRaw => 24,
            ColType::XmlType => 58,
            ColType::Char => 96,
            ColType::Float => 100,
            ColType::Double => 101,
            ColType::Clob => 112,
            ColType::Blob => 113,
            ColType::Json => 119,
            ColType::Timestamp => 180,
            ColType::TimestampWithTz => 181,
            ColType::IntervalYearToMonth => 182,
            ColType::IntervalDayToSecond => 183,
            ColType::URowId => 208,
            ColType::TimestampWithLocalTz => 231,
            ColType::Boolean => 252,
            ColType::Other(raw) => raw,
        }
    }

    pub fn is_lob(self) -> bool {
        matches!(self, ColType::Clob | ColType::Blob | ColType::XmlType | ColType::Json)
    }

    /// Character data decoded through the column charset.
    pub fn is_character(self) -> bool {
        matches!(self, ColType::Varchar | ColType::Char | ColType::Clob | ColType::Long)
    }
}

/// PROPERTY bits of COL$.
pub mod col_property {
    pub const ADT: u64 = 1 << 0;
    pub const OID: u64 = 1 << 1;
    pub const NESTED1: u64 = 1 << 2;
    pub const VIRTUAL1: u64 = 1 << 3;
    pub const NESTED_TABLE_SETID: u64 = 1 << 4;
    pub const HIDDEN: u64 = 1 << 5;
    pub const STORED_AS_LOB: u64 = 1 << 7;
    pub const SYSTEM_GENERATED: u64 = 1 << 8;
    pub const NESTED_TABLES_SETID: u64 = 1 << 10;
    pub const DROPPED: u64 = 1 << 14;
    pub const UNUSED: u64 = 1 << 15;
    pub const VIRTUAL2: u64 = 1 << 16;
    pub const LENGTH_IN_CHARS: u64 = 1 << 23;
    pub const ADDED: u64 = 1 << 30;
    pub const GUARD: u64 = 1 << 39;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysCol {
    pub row_id: RowId,
    pub obj: Obj,
    pub col: i32,
    pub seg_col: i32,
    pub int_col: i32,
    pub name: String,
    pub col_type: ColType,
    pub length: u32,
    pub precision: i32,
    pub scale: i32,
    pub charset_form: u32,
    pub charset_id: u32,
    pub null: i32,
    pub property: u64,
}

impl SysCol {
    pub fn is_property(&self, bit: u64) -> bool {
        self.property & bit != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.is_property(col_property::HIDDEN)
    }

    pub fn is_nullable(&self) -> bool {
        self.null == 0
    }

    pub fn is_stored_as_lob(&self) -> bool {
        self.is_property(col_property::STORED_AS_LOB)
    }

    pub fn is_system_generated(&self) -> bool {
        self.is_property(col_property::SYSTEM_GENERATED)
    }

    pub fn is_nested(&self) -> bool {
        self.is_property(col_property::NESTED_TABLES_SETID)
    }

    pub fn is_unused(&self) -> bool {
        self.is_property(col_property::UNUSED)
    }

    pub fn is_added(&self) -> bool {
        self.is_property(col_property::ADDED)
    }

    pub fn is_guard(&self) -> bool {
        self.is_property(col_property::GUARD)
    }

    pub fn is_virtual(&self) -> bool {
        self.is_property(col_property::VIRTUAL1) || self.is_property(col_property::VIRTUAL2)
    }
}

/// Ordered by (obj, segCol, intCol) so a range scan yields the physical
/// column order of one object.
impl DictRow for SysCol {
    type Key = (Obj, i32, i32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, i32, i32) {
        (self.obj, self.seg_col, self.int_col)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

// ---------------------------------------------------------------------------
// SYS.CCOL$ / SYS.CDEF$
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysCCol {
    pub row_id: RowId,
    pub con: u32,
    pub int_col: i32,
    pub obj: Obj,
    pub spare1: u64,
}

impl DictRow for SysCCol {
    type Key = (Obj, i32, u32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, i32, u32) {
        (self.obj, self.int_col, self.con)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

/// TYPE# values of CDEF$ relevant to key derivation.
pub mod cdef_type {
    pub const TABLE_CHECK: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE: u16 = 3;
    pub const SUPPLEMENTAL_LOG: u16 = 12;
    pub const SUPPLEMENTAL_LOG_PK: u16 = 14;
    pub const SUPPLEMENTAL_LOG_UNIQUE: u16 = 15;
    pub const SUPPLEMENTAL_LOG_FK: u16 = 16;
    pub const SUPPLEMENTAL_LOG_ALL: u16 = 17;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysCDef {
    pub row_id: RowId,
    pub con: u32,
    pub obj: Obj,
    pub def_type: u16,
}

impl SysCDef {
    pub fn is_pk(&self) -> bool {
        self.def_type == cdef_type::PRIMARY_KEY
    }

    pub fn is_supplemental(&self) -> bool {
        matches!(
            self.def_type,
            cdef_type::SUPPLEMENTAL_LOG
                | cdef_type::SUPPLEMENTAL_LOG_PK
                | cdef_type::SUPPLEMENTAL_LOG_UNIQUE
                | cdef_type::SUPPLEMENTAL_LOG_FK
                | cdef_type::SUPPLEMENTAL_LOG_ALL
        )
    }
}

impl DictRow for SysCDef {
    type Key = (Obj, u32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, u32) {
        (self.obj, self.con)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

// ---------------------------------------------------------------------------
// SYS.DEFERRED_STG$ / SYS.ECOL$
// ---------------------------------------------------------------------------

pub mod deferred_flags_stg {
    pub const COMPRESSED: u64 = 1 << 2;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysDeferredStg {
    pub row_id: RowId,
    pub obj: Obj,
    pub flags_stg: u64,
}

impl SysDeferredStg {
    pub fn is_compressed(&self) -> bool {
        self.flags_stg & deferred_flags_stg::COMPRESSED != 0
    }
}

impl DictRow for SysDeferredStg {
    type Key = Obj;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> Obj {
        self.obj
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysECol {
    pub row_id: RowId,
    pub tab_obj: Obj,
    pub col_num: i32,
    /// Guard segment column, -1 when absent.
    pub guard_id: i32,
}

impl DictRow for SysECol {
    type Key = (Obj, i32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, i32) {
        (self.tab_obj, self.col_num)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.tab_obj)
    }
}

// ---------------------------------------------------------------------------
// SYS.LOB$ and friends
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysLob {
    pub row_id: RowId,
    pub obj: Obj,
    pub col: i32,
    pub int_col: i32,
    pub l_obj: LObj,
    pub ts: u32,
}

impl DictRow for SysLob {
    type Key = (Obj, i32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, i32) {
        (self.obj, self.int_col)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.obj)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysLobCompPart {
    pub row_id: RowId,
    pub part_obj: Obj,
    pub l_obj: LObj,
}

impl DictRow for SysLobCompPart {
    type Key = (LObj, Obj);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (LObj, Obj) {
        (self.l_obj, self.part_obj)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysLobFrag {
    pub row_id: RowId,
    pub frag_obj: Obj,
    pub parent_obj: Obj,
    pub ts: u32,
}

impl DictRow for SysLobFrag {
    type Key = (Obj, Obj);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, Obj) {
        (self.parent_obj, self.frag_obj)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

// ---------------------------------------------------------------------------
// SYS.TABPART$ / TABCOMPART$ / TABSUBPART$
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTabPart {
    pub row_id: RowId,
    pub obj: Obj,
    pub data_obj: DataObj,
    /// Base table object.
    pub bo: Obj,
}

impl DictRow for SysTabPart {
    type Key = (Obj, Obj);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, Obj) {
        (self.bo, self.obj)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.bo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTabComPart {
    pub row_id: RowId,
    pub obj: Obj,
    pub data_obj: DataObj,
    pub bo: Obj,
}

impl DictRow for SysTabComPart {
    type Key = (Obj, Obj);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, Obj) {
        (self.bo, self.obj)
    }

    fn touches(&self) -> Option<Obj> {
        Some(self.bo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTabSubPart {
    pub row_id: RowId,
    pub obj: Obj,
    pub data_obj: DataObj,
    /// Parent composite partition object.
    pub p_obj: Obj,
}

impl DictRow for SysTabSubPart {
    type Key = (Obj, Obj);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (Obj, Obj) {
        (self.p_obj, self.obj)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

// ---------------------------------------------------------------------------
// SYS.TS$
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTs {
    pub row_id: RowId,
    pub ts: u32,
    pub name: String,
    pub block_size: u32,
}

impl DictRow for SysTs {
    type Key = u32;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> u32 {
        self.ts
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

// ---------------------------------------------------------------------------
// XDB dictionaries (binary XMLType token sets)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdbTtSet {
    pub row_id: RowId,
    pub guid: String,
    /// Suffix selecting the per-schema X$NM/X$QN/X$PT tables.
    pub tok_suf: String,
    pub flags: u64,
    pub obj: Obj,
}

impl DictRow for XdbTtSet {
    type Key = String;

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> String {
        self.tok_suf.clone()
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdbXNm {
    pub row_id: RowId,
    pub tok_suf: String,
    pub nmspc_uri: String,
    pub id: u32,
}

impl DictRow for XdbXNm {
    type Key = (String, u32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (String, u32) {
        (self.tok_suf.clone(), self.id)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdbXQn {
    pub row_id: RowId,
    pub tok_suf: String,
    pub nmspc_id: u32,
    pub local_name: String,
    pub id: u32,
}

impl DictRow for XdbXQn {
    type Key = (String, u32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (String, u32) {
        (self.tok_suf.clone(), self.id)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdbXPt {
    pub row_id: RowId,
    pub tok_suf: String,
    pub path: String,
    pub id: u32,
}

impl DictRow for XdbXPt {
    type Key = (String, u32);

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn key(&self) -> (String, u32) {
        (self.tok_suf.clone(), self.id)
    }

    fn touches(&self) -> Option<Obj> {
        None
    }
}
