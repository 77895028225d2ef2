pub mod arena;
pub mod chunk;
pub mod lob;
pub mod store;
pub mod transaction;
pub mod xmltype;

pub use arena::{Arena, ArenaConfig, ArenaStats, Chunk};
pub use chunk::{ColValue, EntryCode, EntryMeta, EntryView, TxChunk};
pub use lob::{decode_character_lob, LobAssembler, LobKey};
pub use store::{MinOpenTxn, TransactionStore};
pub use transaction::{CommittedTxn, FlushOptions, Transaction, TxnEvent};
pub use xmltype::decode_binary_xml;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use redolink_common::{Dba, DmlKind, FileOffset, Scn, Seq, Shutdown, Uba, Xid};
    use redolink_redo::ops::LobLocator;
    use redolink_schema::dict::{cdef_type, ColType, ObjType, SysCCol, SysCDef, SysCol, SysLob, SysObj, SysTab, SysTs, SysUser};
    use redolink_schema::{Schema, SchemaElement};

    use crate::arena::{Arena, ArenaConfig};
    use crate::chunk::{ColValue, EntryCode, EntryMeta};
    use crate::lob::LobAssembler;
    use crate::transaction::{FlushOptions, Transaction, TxnEvent};

    fn arena() -> Arc<Arena> {
        Arc::new(Arena::new(ArenaConfig { min_mb: 2, max_mb: 8 }, Shutdown::new()).unwrap())
    }

    fn row_id(obj: u32, tag: u16) -> redolink_common::RowId {
        redolink_common::RowId::new(obj, Dba(obj), tag)
    }

    /// SCOTT.DEPT(deptno NUMBER PK, dname VARCHAR2) with obj 87.
    fn dept_schema() -> Schema {
        let mut schema = Schema::new();
        schema.set_elements(vec![SchemaElement::new("SCOTT", ".*").unwrap()]);
        schema.users.upsert(SysUser {
            row_id: row_id(1, 0),
            user: 10,
            name: "SCOTT".into(),
            spare1: 0,
        });
        schema.objs.upsert(SysObj {
            row_id: row_id(87, 0),
            owner: 10,
            obj: 87,
            data_obj: 87,
            obj_type: ObjType::Table,
            name: "DEPT".into(),
            flags: 0,
        });
        schema.tabs.upsert(SysTab {
            row_id: row_id(87, 1),
            obj: 87,
            data_obj: 87,
            ts: 1,
            clu_cols: 0,
            flags: 0,
            property: 0,
        });
        for (seg_col, name, col_type, null) in [
            (1, "DEPTNO", ColType::Number, 1),
            (2, "DNAME", ColType::Varchar, 0),
        ] {
            schema.cols.upsert(SysCol {
                row_id: row_id(87, 10 + seg_col as u16),
                obj: 87,
                col: seg_col,
                seg_col,
                int_col: seg_col,
                name: name.into(),
                col_type,
                length: 22,
                precision: -1,
                scale: -1,
                charset_form: 0,
                charset_id: 0,
                null,
                property: 0,
            });
        }
        schema.ccols.upsert(SysCCol {
            row_id: row_id(87, 20),
            con: 1000,
            int_col: 1,
            obj: 87,
            spare1: 0,
        });
        schema.cdefs.upsert(SysCDef {
            row_id: row_id(87, 21),
            con: 1000,
            obj: 87,
            def_type: cdef_type::PRIMARY_KEY,
        });
        schema.touch(87);
        schema.rebuild_touched();
        schema
    }

    fn meta(code: EntryCode, uba: u64, slot: u16) -> EntryMeta {
        EntryMeta {
            code,
            flags: 0,
            scn: Scn(1000),
            sub_scn: 0,
            slot,
            uba: Uba(uba),
            obj: 87,
            data_obj: 87,
            bdba: Dba(0x0100_0010),
            file_offset: FileOffset(0x2000),
        }
    }

    fn col(colnum: u16, value: &[u8]) -> ColValue {
        ColValue {
            colnum,
            supplemental: false,
            value: Some(value.to_vec()),
        }
    }

    fn supp(colnum: u16, value: &[u8]) -> ColValue {
        ColValue {
            colnum,
            supplemental: true,
            value: Some(value.to_vec()),
        }
    }

    fn txn(_arena: &Arena) -> Transaction {
        let mut t = Transaction::new(Xid::new(1, 2, 3), 1);
        t.begin_seen = true;
        t.begin_scn = Scn(1000);
        t.begin_seq = Seq(1);
        t.commit_scn = Scn(1001);
        t.commit_seq = Seq(1);
        t
    }

    #[test]
    fn test_insert_flush_projects_names() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(
            &arena,
            meta(EntryCode::Insert, 1, 0),
            &[],
            &[col(0, &[0xC1, 0x0B]), col(1, b"SALES")],
        )
        .unwrap();

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert_eq!(committed.events.len(), 1);
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.kind, DmlKind::Insert);
        assert_eq!(row.table, "SCOTT.DEPT");
        assert!(row.before.is_none());
        let after = row.after.as_ref().unwrap();
        assert_eq!(after.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
        assert_eq!(after.get("DNAME"), Some(&b"SALES"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_update_merges_supplemental_and_propagates_key() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        // undo: old DNAME; supplemental: DEPTNO before image; redo: new DNAME
        t.add_entry(
            &arena,
            meta(EntryCode::Update, 1, 7),
            &[col(1, b"SALES"), supp(0, &[0xC1, 0x0B])],
            &[col(1, b"MARKETING")],
        )
        .unwrap();

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.kind, DmlKind::Update);
        let before = row.before.as_ref().unwrap();
        let after = row.after.as_ref().unwrap();
        assert_eq!(before.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
        assert_eq!(before.get("DNAME"), Some(&b"SALES"[..]));
        assert_eq!(after.get("DEPTNO"), Some(&[0xC1, 0x0B][..]));
        assert_eq!(after.get("DNAME"), Some(&b"MARKETING"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_update_minimization_drops_unchanged_non_key() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(
            &arena,
            meta(EntryCode::Update, 1, 0),
            &[col(0, &[0xC1, 0x0B]), col(1, b"SALES")],
            &[col(0, &[0xC1, 0x0B]), col(1, b"SALES")],
        )
        .unwrap();

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        let after = row.after.as_ref().unwrap();
        // key survives, unchanged non-key column is minimized away
        assert!(after.contains("DEPTNO"));
        assert!(!after.contains("DNAME"));
        t.purge(&arena);
    }

    #[test]
    fn test_not_null_missing_promotion_is_flag_gated() {
        let schema = dept_schema();
        let arena = arena();

        let run = |not_null_missing: bool| {
            let mut t = txn(&arena);
            // DEPTNO (NOT NULL PK) missing from the before image entirely
            t.add_entry(
                &arena,
                meta(EntryCode::Update, 1, 0),
                &[col(1, b"SALES")],
                &[col(0, &[0xC1, 0x0B]), col(1, b"MARKETING")],
            )
            .unwrap();
            let mut lobs = LobAssembler::new();
            let options = FlushOptions {
                not_null_missing,
                ..FlushOptions::default()
            };
            let committed = t.flush(&schema, &mut lobs, &options).unwrap();
            let TxnEvent::Row(row) = &committed.events[0] else {
                panic!("expected row event");
            };
            let has = row.before.as_ref().unwrap().contains("DEPTNO");
            t.purge(&arena);
            has
        };

        assert!(!run(false));
        assert!(run(true));
    }

    #[test]
    fn test_delete_emits_before_image_only() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(
            &arena,
            meta(EntryCode::Delete, 1, 3),
            &[col(0, &[0xC1, 0x0B]), col(1, b"SALES")],
            &[],
        )
        .unwrap();

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.kind, DmlKind::Delete);
        assert!(row.after.is_none());
        assert_eq!(row.before.as_ref().unwrap().get("DNAME"), Some(&b"SALES"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_schema_miss_skips_or_synthesizes() {
        let schema = Schema::new(); // obj 87 unknown
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(&arena, meta(EntryCode::Insert, 1, 0), &[], &[col(0, b"x")])
            .unwrap();

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert!(committed.events.is_empty());
        assert_eq!(committed.skipped_schema_miss, 1);

        let options = FlushOptions {
            schemaless: true,
            ..FlushOptions::default()
        };
        let committed = t.flush(&schema, &mut lobs, &options).unwrap();
        assert_eq!(committed.skipped_schema_miss, 0);
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.table, "OBJ_87");
        assert_eq!(row.after.as_ref().unwrap().get("COL_0"), Some(&b"x"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_rollback_to_savepoint_keeps_prefix() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        for (uba, name) in [(1, "A"), (2, "B"), (3, "C")] {
            t.add_entry(
                &arena,
                meta(EntryCode::Insert, uba, uba as u16),
                &[],
                &[col(1, name.as_bytes())],
            )
            .unwrap();
        }
        // savepoint above A: B and C disappear
        t.rollback_to_savepoint(&arena, Uba(1));

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert_eq!(committed.events.len(), 1);
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.after.as_ref().unwrap().get("DNAME"), Some(&b"A"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_rollback_last_op_by_uba() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(&arena, meta(EntryCode::Insert, 1, 0), &[], &[col(1, b"A")])
            .unwrap();
        t.add_entry(&arena, meta(EntryCode::Insert, 2, 1), &[], &[col(1, b"B")])
            .unwrap();
        t.rollback_last_op(&arena, Uba(2));

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert_eq!(committed.events.len(), 1);
        t.purge(&arena);
    }

    #[test]
    fn test_mid_chain_rollback_tombstones() {
        let schema = dept_schema();
        let arena = arena();
        let mut t = txn(&arena);
        t.add_entry(&arena, meta(EntryCode::Insert, 1, 0), &[], &[col(1, b"A")])
            .unwrap();
        t.add_entry(&arena, meta(EntryCode::Insert, 2, 1), &[], &[col(1, b"B")])
            .unwrap();
        // roll back A while B stays
        t.rollback_last_op(&arena, Uba(1));

        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert_eq!(committed.events.len(), 1);
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        assert_eq!(row.after.as_ref().unwrap().get("DNAME"), Some(&b"B"[..]));
        t.purge(&arena);
    }

    #[test]
    fn test_clob_column_assembles_from_pages() {
        let mut schema = Schema::new();
        schema.set_elements(vec![SchemaElement::new("SCOTT", ".*").unwrap()]);
        schema.users.upsert(SysUser {
            row_id: row_id(1, 0),
            user: 10,
            name: "SCOTT".into(),
            spare1: 0,
        });
        schema.objs.upsert(SysObj {
            row_id: row_id(90, 0),
            owner: 10,
            obj: 90,
            data_obj: 90,
            obj_type: ObjType::Table,
            name: "DOCS".into(),
            flags: 0,
        });
        schema.tabs.upsert(SysTab {
            row_id: row_id(90, 1),
            obj: 90,
            data_obj: 90,
            ts: 1,
            clu_cols: 0,
            flags: 0,
            property: 0,
        });
        for (seg_col, name, col_type) in [(1, "ID", ColType::Number), (2, "BODY", ColType::Clob)] {
            schema.cols.upsert(SysCol {
                row_id: row_id(90, 10 + seg_col as u16),
                obj: 90,
                col: seg_col,
                seg_col,
                int_col: seg_col,
                name: name.into(),
                col_type,
                length: 22,
                precision: -1,
                scale: -1,
                charset_form: 0,
                charset_id: 873,
                null: 0,
                property: 0,
            });
        }
        schema.lobs.upsert(SysLob {
            row_id: row_id(90, 30),
            obj: 90,
            col: 2,
            int_col: 2,
            l_obj: 5000,
            ts: 1,
        });
        schema.tss.upsert(SysTs {
            row_id: row_id(1, 40),
            ts: 1,
            name: "USERS".into(),
            block_size: 8192,
        });
        schema.touch(90);
        schema.rebuild_touched();

        let arena = arena();
        let mut lobs = LobAssembler::new();
        for page in 0..5u32 {
            lobs.add_page(5000, 0x4C, page, vec![b'a' + page as u8; 600]);
        }

        let mut t = txn(&arena);
        let mut m = meta(EntryCode::Insert, 1, 0);
        m.obj = 90;
        m.data_obj = 90;
        let locator = LobLocator::out_of_line(0x4C, 3000, 5);
        t.add_entry(
            &arena,
            m,
            &[],
            &[
                col(0, &[0xC1, 0x02]),
                ColValue {
                    colnum: 1,
                    supplemental: false,
                    value: Some(locator.encode(redolink_common::Endian::Little)),
                },
            ],
        )
        .unwrap();

        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        let TxnEvent::Row(row) = &committed.events[0] else {
            panic!("expected row event");
        };
        let body = row.after.as_ref().unwrap().get("BODY").unwrap();
        assert_eq!(body.len(), 3000);
        assert_eq!(&body[..600], &[b'a'; 600][..]);
        assert_eq!(&body[2400..], &[b'e'; 600][..]);
        t.purge(&arena);
    }

    #[test]
    fn test_unresolvable_lob_becomes_null() {
        let schema = dept_schema();
        let arena = arena();
        // DEPT has no lob columns; craft one on a schemaless table instead
        let mut t = txn(&arena);
        let mut m = meta(EntryCode::Insert, 1, 0);
        m.obj = 90; // unknown obj
        t.add_entry(&arena, m, &[], &[col(0, b"x")]).unwrap();
        let mut lobs = LobAssembler::new();
        let committed = t.flush(&schema, &mut lobs, &FlushOptions::default()).unwrap();
        assert_eq!(committed.skipped_schema_miss, 1);
        t.purge(&arena);
    }
}
