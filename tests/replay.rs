//! # Persistence and Replay Tests
//!
//! Crash-recovery behaviour: a checkpointed block reopened from disk must
//! replay to the same visible state, and opening the same on-disk state
//! twice must produce identical blocks (replay idempotence).

use std::sync::Arc;

use tempfile::tempdir;

use chert::{
    Batch, Block, BlockError, BlockId, BlockMeta, BufferManager, ColDef, ColumnVector, DataType,
    Filter, Schema, SegmentFile, Txn, Value,
};

fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new(
            "t",
            vec![
                ColDef {
                    name: "pk".into(),
                    data_type: DataType::Int64,
                    idx: 0,
                },
                ColDef {
                    name: "v".into(),
                    data_type: DataType::Int64,
                    idx: 1,
                },
            ],
            &[0],
            None,
            16,
        )
        .unwrap(),
    )
}

fn int_col(vals: &[i64]) -> ColumnVector {
    let mut c = ColumnVector::new(DataType::Int64);
    for v in vals {
        c.push(Value::Int64(*v)).unwrap();
    }
    c
}

const ID: BlockId = BlockId {
    db: 1,
    table: 1,
    segment: 1,
    block: 1,
};

fn reopen(dir: &std::path::Path) -> Arc<Block> {
    let seg = Arc::new(SegmentFile::open(dir, 1).unwrap());
    let meta = Arc::new(BlockMeta::new(ID, schema(), true));
    let buffer = Arc::new(BufferManager::with_default_budget());
    Block::open(meta, seg, buffer).unwrap()
}

fn build_and_checkpoint(dir: &std::path::Path) {
    let block = reopen(dir);

    let t1 = Arc::new(Txn::new(1, 10));
    let appender = block.make_appender().unwrap();
    appender
        .append(
            &t1,
            &Batch::new(vec![int_col(&[1, 2, 3, 4]), int_col(&[10, 20, 30, 40])]).unwrap(),
        )
        .unwrap();
    block.commit_txn(&t1, 100, None).unwrap();

    let t2 = Arc::new(Txn::new(2, 110));
    block.update(&t2, 0, 1, Value::Int64(11)).unwrap();
    block.commit_txn(&t2, 120, None).unwrap();

    let t3 = Arc::new(Txn::new(3, 130));
    block.range_delete(&t3, 2, 2).unwrap();
    block.commit_txn(&t3, 140, None).unwrap();

    block.checkpoint(140).unwrap();
}

fn visible_column(block: &Arc<Block>, ts: u64) -> Vec<i64> {
    let txn = Arc::new(Txn::new(ts, ts));
    let view = block.get_column_data(&txn, 1).unwrap();
    let vec = view.materialize().unwrap();
    (0..vec.len())
        .map(|i| match vec.get(i).unwrap() {
            Value::Int64(v) => v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect()
}

#[test]
fn replayed_block_matches_pre_crash_state() {
    let dir = tempdir().unwrap();
    build_and_checkpoint(dir.path());

    let block = reopen(dir.path());
    assert_eq!(block.max_visible_ts(), 140);
    assert_eq!(block.rows(None, true), 4);
    assert_eq!(block.rows_on_replay(), 4);

    // Updated row 0, deleted row 2.
    assert_eq!(visible_column(&block, 150), vec![11, 20, 40]);

    let reader = Arc::new(Txn::new(9, 150));
    assert!(matches!(
        block.get_value(&reader, 2, 1),
        Err(BlockError::NotFound)
    ));
    assert!(matches!(
        block.get_by_filter(&reader, &Filter::eq(Value::Int64(3))),
        Err(BlockError::NotFound)
    ));
    assert_eq!(
        block.get_by_filter(&reader, &Filter::eq(Value::Int64(4))).unwrap(),
        3
    );
}

#[test]
fn replay_is_idempotent() {
    let dir = tempdir().unwrap();
    build_and_checkpoint(dir.path());

    let first = reopen(dir.path());
    let second = reopen(dir.path());

    assert_eq!(first.max_visible_ts(), second.max_visible_ts());
    assert_eq!(first.max_checkpoint_ts(), second.max_checkpoint_ts());
    assert_eq!(first.rows(None, true), second.rows(None, true));
    for ts in [140u64, 150, 200] {
        assert_eq!(visible_column(&first, ts), visible_column(&second, ts));
    }
    for pk in 1..=4i64 {
        let a = Arc::new(Txn::new(100 + pk as u64, 150));
        let b = Arc::new(Txn::new(200 + pk as u64, 150));
        let lhs = first.get_by_filter(&a, &Filter::eq(Value::Int64(pk)));
        let rhs = second.get_by_filter(&b, &Filter::eq(Value::Int64(pk)));
        match (lhs, rhs) {
            (Ok(x), Ok(y)) => assert_eq!(x, y),
            (Err(BlockError::NotFound), Err(BlockError::NotFound)) => {}
            (lhs, rhs) => panic!("index membership diverged: {lhs:?} vs {rhs:?}"),
        }
    }
}

#[test]
fn writes_after_replay_layer_on_replayed_state() {
    let dir = tempdir().unwrap();
    build_and_checkpoint(dir.path());

    let block = reopen(dir.path());
    let t = Arc::new(Txn::new(20, 200));
    block.update(&t, 1, 1, Value::Int64(21)).unwrap();
    block.commit_txn(&t, 210, None).unwrap();

    assert_eq!(visible_column(&block, 220), vec![11, 21, 40]);
    // The pre-checkpoint snapshot still reads the replayed state: replayed
    // nodes carry the checkpoint timestamp, so history below it collapses.
    assert_eq!(visible_column(&block, 140), vec![11, 20, 40]);
}

#[test]
fn buffer_eviction_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let seg = Arc::new(SegmentFile::open(dir.path(), 1).unwrap());
    // A budget small enough that two loaded nodes cannot coexist, so
    // pinning the second evicts (and thereby flushes) the first.
    let buffer = Arc::new(BufferManager::new(16));

    let open = |block_id: u64| {
        let meta = Arc::new(BlockMeta::new(
            BlockId {
                block: block_id,
                ..ID
            },
            schema(),
            true,
        ));
        Block::open(meta, Arc::clone(&seg), Arc::clone(&buffer)).unwrap()
    };
    let first = open(1);
    let second = open(2);

    let t1 = Arc::new(Txn::new(1, 10));
    let appender = first.make_appender().unwrap();
    appender
        .append(
            &t1,
            &Batch::new(vec![int_col(&[1, 2]), int_col(&[10, 20])]).unwrap(),
        )
        .unwrap();
    first.commit_txn(&t1, 100, None).unwrap();

    // Touching the second block's buffer forces the first one out.
    let t2 = Arc::new(Txn::new(2, 110));
    let appender = second.make_appender().unwrap();
    appender
        .append(
            &t2,
            &Batch::new(vec![int_col(&[9]), int_col(&[90])]).unwrap(),
        )
        .unwrap();
    second.commit_txn(&t2, 120, None).unwrap();

    // The first block reloads transparently from its flushed columns.
    let reader = Arc::new(Txn::new(3, 150));
    assert_eq!(first.get_value(&reader, 1, 1).unwrap(), Value::Int64(20));
    assert_eq!(second.get_value(&reader, 0, 1).unwrap(), Value::Int64(90));
}

#[test]
fn destroyed_block_cannot_reopen() {
    let dir = tempdir().unwrap();
    let seg = Arc::new(SegmentFile::open(dir.path(), 1).unwrap());
    let meta = Arc::new(BlockMeta::new(ID, schema(), true));
    let buffer = Arc::new(BufferManager::with_default_budget());
    let block = Block::open(meta, Arc::clone(&seg), buffer).unwrap();
    block.destroy().unwrap();

    let meta = Arc::new(BlockMeta::new(ID, schema(), true));
    let buffer = Arc::new(BufferManager::with_default_budget());
    assert!(matches!(
        Block::open(meta, seg, buffer),
        Err(BlockError::NotFound)
    ));
}
