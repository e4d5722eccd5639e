use ramp_db::{AggregatorDb, StoreError};
use ramp_interface::Hash;
use tempfile::TempDir;

struct TestDb {
    _tmpdir: TempDir,
    db: AggregatorDb,
}

impl TestDb {
    fn new() -> Self {
        let tmpdir = tempfile::tempdir().unwrap();
        let db = AggregatorDb::open(tmpdir.path()).expect("Failed to open store.");
        TestDb {
            _tmpdir: tmpdir,
            db,
        }
    }
}

impl std::ops::Deref for TestDb {
    type Target = AggregatorDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn h(byte: u8) -> Hash {
    Hash([byte; 32])
}

#[test]
fn log_round_trip() {
    let db = TestDb::new();
    assert_eq!(db.log_count(), 0);
    assert_eq!(db.get_log(0).unwrap(), None);

    let idx_a = db.save_log(b"alpha").unwrap();
    let idx_b = db.save_log(b"beta").unwrap();
    assert_eq!((idx_a, idx_b), (0, 1));
    assert_eq!(db.log_count(), 2);
    assert_eq!(db.get_log(0).unwrap().as_deref(), Some(b"alpha".as_ref()));
    assert_eq!(db.get_log(1).unwrap().as_deref(), Some(b"beta".as_ref()));
    assert_eq!(db.get_log(2).unwrap(), None);
}

#[test]
fn message_round_trip() {
    let db = TestDb::new();
    let idx = db.save_message(b"msg-0").unwrap();
    assert_eq!(idx, 0);
    assert_eq!(db.message_count(), 1);
    assert_eq!(db.get_message(0).unwrap().as_deref(), Some(b"msg-0".as_ref()));
    assert_eq!(db.get_message(1).unwrap(), None);
}

#[test]
fn counts_are_monotonic_across_saves() {
    let db = TestDb::new();
    let mut last = db.log_count();
    for i in 0..20u8 {
        db.save_log(&[i]).unwrap();
        let count = db.log_count();
        assert!(count >= last);
        last = count;
    }
    assert_eq!(last, 20);
}

#[test]
fn counts_survive_reopen() {
    let tmpdir = tempfile::tempdir().unwrap();
    {
        let db = AggregatorDb::open(tmpdir.path()).unwrap();
        db.save_log(b"one").unwrap();
        db.save_message(b"two").unwrap();
        db.save_block(4, h(4)).unwrap();
    }
    let db = AggregatorDb::open(tmpdir.path()).unwrap();
    assert_eq!(db.log_count(), 1);
    assert_eq!(db.message_count(), 1);
    assert_eq!(db.block_count(), 5);
    assert_eq!(db.get_log(0).unwrap().as_deref(), Some(b"one".as_ref()));
}

#[test]
fn blocks_attribute_logs_between_boundaries() {
    let db = TestDb::new();
    db.save_block(10, h(10)).unwrap();
    db.save_log(b"a").unwrap();
    db.save_log(b"b").unwrap();
    db.save_block(11, h(11)).unwrap();
    db.save_log(b"c").unwrap();

    let block_10 = db.get_block(10).unwrap().unwrap();
    assert_eq!(block_10.hash, h(10));
    assert_eq!((block_10.start_log, block_10.log_count), (0, 2));

    let block_11 = db.get_block(11).unwrap().unwrap();
    assert_eq!((block_11.start_log, block_11.log_count), (2, 1));

    assert_eq!(db.get_block(9).unwrap(), None);
    assert_eq!(db.get_block(12).unwrap(), None);
}

#[test]
fn out_of_order_blocks_are_rejected() {
    let db = TestDb::new();
    db.save_block(10, h(10)).unwrap();
    match db.save_block(12, h(12)) {
        Err(StoreError::OutOfOrder { expected, got }) => {
            assert_eq!((expected, got), (11, 12));
        }
        other => panic!("expected OutOfOrder, got {other:?}"),
    }
    match db.save_block(10, h(10)) {
        Err(StoreError::OutOfOrder { expected, got }) => {
            assert_eq!((expected, got), (11, 10));
        }
        other => panic!("expected OutOfOrder, got {other:?}"),
    }
}

#[test]
fn restore_truncates_blocks_logs_and_messages() {
    let db = TestDb::new();
    for height in 10..13u64 {
        db.save_block(height, h(height as u8)).unwrap();
        for i in 0..3u8 {
            db.save_log(&[height as u8, i]).unwrap();
            db.save_message(&[height as u8, i, i]).unwrap();
        }
    }
    assert_eq!(db.block_count(), 13);
    assert_eq!(db.log_count(), 9);

    db.restore_block(11).unwrap();

    assert_eq!(db.block_count(), 11);
    assert_eq!(db.log_count(), 3);
    assert_eq!(db.message_count(), 3);
    assert_eq!(db.get_block(11).unwrap(), None);
    assert_eq!(db.get_block(12).unwrap(), None);
    assert_eq!(db.get_log(2).unwrap().as_deref(), Some([10u8, 2].as_ref()));
    assert_eq!(db.get_log(3).unwrap(), None);

    // Block 10 is now the head; its logs are intact.
    let block_10 = db.get_block(10).unwrap().unwrap();
    assert_eq!((block_10.start_log, block_10.log_count), (0, 3));

    // The chain continues from the restored height.
    match db.save_block(13, h(13)) {
        Err(StoreError::OutOfOrder { expected, .. }) => assert_eq!(expected, 11),
        other => panic!("expected OutOfOrder, got {other:?}"),
    }
    db.save_block(11, h(99)).unwrap();
    assert_eq!(db.block_count(), 12);
    assert_eq!(db.get_block(11).unwrap().unwrap().hash, h(99));
}

#[test]
fn restore_matches_predecessor_arithmetic() {
    // A3: after restore_block(h), log_count = block(h-1).start_log + block(h-1).log_count.
    let db = TestDb::new();
    for height in 0..4u64 {
        db.save_block(height, h(height as u8)).unwrap();
        for i in 0..=height as u8 {
            db.save_log(&[i]).unwrap();
        }
    }
    let predecessor = db.get_block(1).unwrap().unwrap();
    db.restore_block(2).unwrap();
    assert_eq!(
        db.log_count(),
        predecessor.start_log + predecessor.log_count
    );
    assert_eq!(db.block_count(), 2);
}

#[test]
fn restore_unknown_heights_fail() {
    let db = TestDb::new();
    assert!(matches!(
        db.restore_block(0),
        Err(StoreError::UnknownBlock(0))
    ));
    db.save_block(10, h(10)).unwrap();
    assert!(matches!(
        db.restore_block(9),
        Err(StoreError::UnknownBlock(9))
    ));
    assert!(matches!(
        db.restore_block(12),
        Err(StoreError::UnknownBlock(12))
    ));
    // Restoring to the current head state is a no-op.
    db.restore_block(11).unwrap();
    assert_eq!(db.block_count(), 11);
}

#[test]
fn requests_last_writer_wins() {
    let db = TestDb::new();
    let request = h(0xAA);
    assert_eq!(db.get_request(request).unwrap(), None);
    db.save_request(request, 3).unwrap();
    assert_eq!(db.get_request(request).unwrap(), Some(3));
    db.save_request(request, 7).unwrap();
    assert_eq!(db.get_request(request).unwrap(), Some(7));
}
