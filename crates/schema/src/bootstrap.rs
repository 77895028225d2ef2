//! Seeds the shadow dictionary with the dictionary's description of itself,
//! so replicated DML against SYS.OBJ$/COL$/... can be decoded into named row
//! images and applied back to the shadow. The object ids are fixed; user
//! tables discovered from redo always arrive with higher ids.

use redolink_common::{Dba, Obj, RowId};

use crate::dict::{ColType, ObjType, SysCol, SysObj, SysTab, SysUser};
use crate::schema::Schema;

pub const SYS_USER: u32 = 0;
pub const XDB_USER: u32 = 45;

/// Fixed object ids of the seeded dictionary tables.
pub mod objects {
    pub const TS: u32 = 16;
    pub const USER: u32 = 22;
    pub const OBJ: u32 = 18;
    pub const TAB: u32 = 4;
    pub const COL: u32 = 21;
    pub const CCOL: u32 = 29;
    pub const CDEF: u32 = 31;
    pub const ECOL: u32 = 65;
    pub const DEFERRED_STG: u32 = 94;
    pub const LOB: u32 = 110;
    pub const LOBFRAG: u32 = 111;
    pub const LOBCOMPPART: u32 = 112;
    pub const TABPART: u32 = 120;
    pub const TABCOMPART: u32 = 121;
    pub const TABSUBPART: u32 = 122;
    pub const XDB_TTSET: u32 = 130;
}

struct ColDef {
    name: &'static str,
    col_type: ColType,
}

fn n(name: &'static str) -> ColDef {
    ColDef {
        name,
        col_type: ColType::Number,
    }
}

fn v(name: &'static str) -> ColDef {
    ColDef {
        name,
        col_type: ColType::Varchar,
    }
}

fn seed_table(schema: &mut Schema, owner: u32, obj: Obj, name: &str, columns: &[ColDef]) {
    let row_dba = Dba(obj);
    schema.objs.upsert(SysObj {
        row_id: RowId::new(obj, row_dba, 0),
        owner,
        obj,
        data_obj: obj,
        obj_type: ObjType::Table,
        name: name.to_string(),
        flags: 0,
    });
    schema.tabs.upsert(SysTab {
        row_id: RowId::new(obj, row_dba, 1),
        obj,
        data_obj: obj,
        ts: 0,
        clu_cols: 0,
        flags: 0,
        property: 0,
    });
    for (i, col) in columns.iter().enumerate() {
        let pos = i as i32 + 1;
        schema.cols.upsert(SysCol {
            row_id: RowId::new(obj, row_dba, 2 + i as u16),
            obj,
            col: pos,
            seg_col: pos,
            int_col: pos,
            name: col.name.to_string(),
            col_type: col.col_type,
            length: 0,
            precision: -1,
            scale: -1,
            charset_form: 0,
            charset_id: 0,
            null: 0,
            property: 0,
        });
    }
    schema.touch(obj);
}

/// Install the self-describing dictionary rows and build their descriptors.
pub fn seed_system_dictionary(schema: &mut Schema) {
    schema.users.upsert(SysUser {
        row_id: RowId::new(objects::USER, Dba(1), 0),
        user: SYS_USER,
        name: "SYS".to_string(),
        spare1: 0,
    });
    schema.users.upsert(SysUser {
        row_id: RowId::new(objects::USER, Dba(1), 1),
        user: XDB_USER,
        name: "XDB".to_string(),
        spare1: 0,
    });

    seed_table(schema, SYS_USER, objects::TS, "TS$", &[n("TS#"), v("NAME"), n("BLOCKSIZE")]);
    seed_table(schema, SYS_USER, objects::USER, "USER$", &[n("USER#"), v("NAME"), n("SPARE1")]);
    seed_table(
        schema,
        SYS_USER,
        objects::OBJ,
        "OBJ$",
        &[n("OBJ#"), n("DATAOBJ#"), n("OWNER#"), v("NAME"), n("TYPE#"), n("FLAGS")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::TAB,
        "TAB$",
        &[n("OBJ#"), n("DATAOBJ#"), n("TS#"), n("CLUCOLS"), n("FLAGS"), n("PROPERTY")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::COL,
        "COL$",
        &[
            n("OBJ#"),
            n("COL#"),
            n("SEGCOL#"),
            n("INTCOL#"),
            v("NAME"),
            n("TYPE#"),
            n("LENGTH"),
            n("PRECISION#"),
            n("SCALE"),
            n("CHARSETFORM"),
            n("CHARSETID"),
            n("NULL$"),
            n("PROPERTY"),
        ],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::CCOL,
        "CCOL$",
        &[n("CON#"), n("INTCOL#"), n("OBJ#"), n("SPARE1")],
    );
    seed_table(schema, SYS_USER, objects::CDEF, "CDEF$", &[n("CON#"), n("OBJ#"), n("TYPE#")]);
    seed_table(
        schema,
        SYS_USER,
        objects::ECOL,
        "ECOL$",
        &[n("TABOBJ#"), n("COLNUM"), n("GUARD_ID")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::DEFERRED_STG,
        "DEFERRED_STG$",
        &[n("OBJ#"), n("FLAGS_STG")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::LOB,
        "LOB$",
        &[n("OBJ#"), n("COL#"), n("INTCOL#"), n("LOBJ#"), n("TS#")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::LOBFRAG,
        "LOBFRAG$",
        &[n("FRAGOBJ#"), n("PARENTOBJ#"), n("TS#")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::LOBCOMPPART,
        "LOBCOMPPART$",
        &[n("PARTOBJ#"), n("LOBJ#")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::TABPART,
        "TABPART$",
        &[n("OBJ#"), n("DATAOBJ#"), n("BO#")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::TABCOMPART,
        "TABCOMPART$",
        &[n("OBJ#"), n("DATAOBJ#"), n("BO#")],
    );
    seed_table(
        schema,
        SYS_USER,
        objects::TABSUBPART,
        "TABSUBPART$",
        &[n("OBJ#"), n("DATAOBJ#"), n("POBJ#")],
    );
    seed_table(
        schema,
        XDB_USER,
        objects::XDB_TTSET,
        "XDB$TTSET",
        &[v("GUID"), v("TOKSUF"), n("FLAGS"), n("OBJ#")],
    );

    schema.rebuild_touched();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::SystemTableKind;

    #[test]
    fn test_seed_builds_system_descriptors() {
        let mut schema = Schema::new();
        seed_system_dictionary(&mut schema);

        let obj_table = schema.table_for_obj(objects::OBJ).expect("OBJ$ descriptor");
        assert_eq!(obj_table.qualified_name(), "SYS.OBJ$");
        assert_eq!(obj_table.system_kind, SystemTableKind::SysObj);
        assert_eq!(obj_table.columns.len(), 6);
        assert_eq!(obj_table.columns[3].name, "NAME");

        let col_table = schema.table_for_obj(objects::COL).expect("COL$ descriptor");
        assert_eq!(col_table.columns.len(), 13);
        // seg_col invariant
        for (i, c) in col_table.columns.iter().enumerate() {
            assert_eq!(c.seg_col, i as i32 + 1);
        }
    }

    #[test]
    fn test_system_tables_built_without_elements() {
        // no replication elements configured, dictionary still tracked
        let mut schema = Schema::new();
        seed_system_dictionary(&mut schema);
        assert!(schema.table_count() >= 16);
    }
}
