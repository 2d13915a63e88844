// WAL manager: append, replay, rotation, recovery, removal.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use lsm_journal::kv::Entry;
use lsm_journal::wal::manager::segment_filename;
use lsm_journal::wal::{EntryInfo, Manager, Record, RecordType, WalOptions};
use lsm_journal::Error;

fn collect(manager: &Manager) -> Vec<(EntryInfo, Bytes)> {
    let mut out = Vec::new();
    manager
        .replay(|info, payload| {
            out.push((info, payload));
            Ok(())
        })
        .unwrap();
    out
}

fn raft(i: usize) -> Record {
    Record::raft_entry(format!("raft-{i}").into_bytes())
}

// =============================================================================
// Test 1: Append then replay yields every record, in order, with its locator
// =============================================================================
#[test]
fn append_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();

    let entry = Entry::new(&b"k1"[..], &b"v1"[..]);
    let records = vec![Record::entry(&entry), raft(1), Record::raft_state(&b"hs"[..])];
    let infos = manager.append_records(&records).unwrap();

    assert_eq!(infos.len(), 3);
    assert_eq!(infos[0].offset, 0);
    assert_eq!(infos[1].offset, infos[0].end_offset());
    assert_eq!(infos[2].offset, infos[1].end_offset());
    assert!(infos.iter().all(|i| i.segment_id == 1));

    let replayed = collect(&manager);
    assert_eq!(replayed.len(), 3);
    for ((info, payload), (expected_info, record)) in
        replayed.iter().zip(infos.iter().zip(records.iter()))
    {
        assert_eq!(info, expected_info);
        assert_eq!(payload, &record.payload);
        assert_eq!(info.length as usize, record.payload.len());
    }

    let (decoded, _) = Entry::decode(&replayed[0].1).unwrap();
    assert_eq!(decoded, entry);
}

// =============================================================================
// Test 2: Records survive close and reopen
// =============================================================================
#[test]
fn reopen_preserves_records() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
        manager.append_records(&[raft(0), raft(1)]).unwrap();
        manager.close().unwrap();
        manager.close().unwrap();
        assert!(matches!(manager.append_records(&[raft(2)]), Err(Error::Closed)));
    }

    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    manager.append_records(&[raft(2)]).unwrap();
    let payloads: Vec<_> = collect(&manager).into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![raft(0).payload, raft(1).payload, raft(2).payload]);
}

// =============================================================================
// Test 3: A torn tail is dropped on reopen and appends resume after it
// =============================================================================
#[test]
fn torn_tail_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
        manager.append_records(&[raft(0), raft(1)]).unwrap();
        manager.close().unwrap();
    }

    // Chop the last two bytes off the final record's CRC.
    let path = dir.path().join(segment_filename(1));
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 2)
        .unwrap();

    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    let replayed = collect(&manager);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].1, raft(0).payload);

    let infos = manager.append_records(&[raft(9)]).unwrap();
    assert_eq!(infos[0].offset, replayed[0].0.end_offset());
    let payloads: Vec<_> = collect(&manager).into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![raft(0).payload, raft(9).payload]);
}

// =============================================================================
// Test 4: A damaged rotated segment makes replay fail with a checksum error
// =============================================================================
#[test]
fn corruption_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    manager.append_records(&[raft(0), raft(1)]).unwrap();
    manager.rotate().unwrap();
    manager.append_records(&[raft(2)]).unwrap();

    // Flip a payload byte of the first record in segment 1.
    let path = dir.path().join(segment_filename(1));
    let mut data = fs::read(&path).unwrap();
    data[6] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let mut seen = 0;
    let result = manager.replay(|_, _| {
        seen += 1;
        Ok(())
    });
    assert!(matches!(result, Err(Error::Checksum { .. })));
    assert_eq!(seen, 0);

    // Reopening does not hide it either.
    manager.close().unwrap();
    let reopened = Manager::open(dir.path(), WalOptions::default()).unwrap();
    assert!(matches!(
        reopened.replay(|_, _| Ok(())),
        Err(Error::Checksum { .. })
    ));
}

// =============================================================================
// Test 5: A corrupt active segment is left alone; appends go to a new one
// =============================================================================
#[test]
fn corrupt_active_segment_rotates_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
        manager.append_records(&[raft(0)]).unwrap();
        manager.close().unwrap();
    }
    let path = dir.path().join(segment_filename(1));
    let mut data = fs::read(&path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    assert_eq!(manager.active_segment(), 2);
    assert_eq!(fs::read(&path).unwrap(), data, "corrupt segment untouched");

    let infos = manager.append_records(&[raft(1)]).unwrap();
    assert_eq!(infos[0].segment_id, 2);
}

// =============================================================================
// Test 6: Rotation produces strictly increasing ids, even across removals
// =============================================================================
#[test]
fn rotation_ids_increase() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    assert_eq!(manager.list_segments(), vec![1]);

    assert_eq!(manager.rotate().unwrap(), 2);
    assert_eq!(manager.rotate().unwrap(), 3);
    manager.remove_segment(1).unwrap();
    manager.remove_segment(2).unwrap();
    assert_eq!(manager.rotate().unwrap(), 4);
    assert_eq!(manager.list_segments(), vec![3, 4]);
    manager.close().unwrap();

    let reopened = Manager::open(dir.path(), WalOptions::default()).unwrap();
    assert_eq!(reopened.active_segment(), 4);
    assert_eq!(reopened.rotate().unwrap(), 5);
}

// =============================================================================
// Test 7: Records spill into new segments once segment_size is reached
// =============================================================================
#[test]
fn size_based_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let record = Record::raft_entry(vec![7u8; 100]);
    let size = record.encoded_size() as u64;
    let manager = Manager::open(dir.path(), WalOptions::with_segment_size(size * 2)).unwrap();

    let infos = manager
        .append_records(&[record.clone(), record.clone(), record.clone(), record.clone(), record])
        .unwrap();
    let segments: Vec<_> = infos.iter().map(|i| i.segment_id).collect();
    assert_eq!(segments, vec![1, 1, 2, 2, 3]);
    assert_eq!(manager.list_segments(), vec![1, 2, 3]);
    assert_eq!(collect(&manager).len(), 5);
}

// =============================================================================
// Test 8: A record larger than segment_size still lands in an empty segment
// =============================================================================
#[test]
fn oversized_record_fits_empty_segment() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::with_segment_size(16)).unwrap();

    let infos = manager
        .append_records(&[Record::raft_entry(vec![1u8; 64]), Record::raft_entry(vec![2u8; 64])])
        .unwrap();
    assert_eq!(infos[0].segment_id, 1);
    assert_eq!(infos[1].segment_id, 2);
    assert_eq!(infos[1].offset, 0);
}

// =============================================================================
// Test 9: The active segment cannot be removed; a missing one is NotFound
// =============================================================================
#[test]
fn remove_segment_rules() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    manager.rotate().unwrap();

    assert!(matches!(manager.remove_segment(2), Err(Error::ActiveSegment(2))));
    manager.remove_segment(1).unwrap();
    assert!(!dir.path().join(segment_filename(1)).exists());
    assert!(manager.remove_segment(1).unwrap_err().is_not_found());
    assert_eq!(manager.list_segments(), vec![2]);
}

// =============================================================================
// Test 10: Metrics count records per type and per segment
// =============================================================================
#[test]
fn metrics_track_record_types() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    manager
        .append_records(&[Record::entry(&Entry::new(&b"a"[..], &b"1"[..])), raft(0)])
        .unwrap();
    manager.rotate().unwrap();
    manager.append_records(&[Record::raft_snapshot(&b"s"[..])]).unwrap();
    manager.rotate().unwrap();
    manager
        .append_records(&[Record::entry(&Entry::new(&b"b"[..], &b"2"[..]))])
        .unwrap();

    let metrics = manager.metrics();
    assert_eq!(metrics.active_segment, 3);
    assert_eq!(metrics.segment_count, 3);
    assert_eq!(metrics.record_counts.entries, 2);
    assert_eq!(metrics.record_counts.raft_entries, 1);
    assert_eq!(metrics.record_counts.raft_snapshots, 1);
    assert_eq!(metrics.record_counts.total(), 4);
    assert_eq!(metrics.segments_with_raft_records, 2);

    let first = manager.segment_metrics(1).unwrap();
    assert_eq!((first.entries, first.raft_entries), (1, 1));
    assert_eq!(manager.segment_metrics(9), None);

    // Rebuilt identically from disk.
    manager.close().unwrap();
    let reopened = Manager::open(dir.path(), WalOptions::default()).unwrap();
    assert_eq!(reopened.metrics(), metrics);
}

// =============================================================================
// Test 11: An error from the replay callback aborts the replay
// =============================================================================
#[test]
fn replay_callback_error_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::open(dir.path(), WalOptions::default()).unwrap();
    manager.append_records(&[raft(0), raft(1), raft(2)]).unwrap();

    let mut seen = 0;
    let result = manager.replay(|info, _| {
        seen += 1;
        if info.record_type == RecordType::RaftEntry && seen == 2 {
            return Err(Error::Corruption("stop".into()));
        }
        Ok(())
    });
    assert!(matches!(result, Err(Error::Corruption(_))));
    assert_eq!(seen, 2);
}

// =============================================================================
// Test 12: A failed append is cut back so later records replay cleanly
// =============================================================================
#[test]
fn failed_append_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    // raft(i) encodes to 15 bytes: two fit, the third forces a rotation.
    let manager = Manager::open(dir.path(), WalOptions::with_segment_size(40)).unwrap();
    let first = manager.append_records(&[raft(0)]).unwrap();

    // Segment 2 cannot be created while a directory holds its name.
    fs::create_dir(manager.segment_path(2)).unwrap();
    let result = manager.append_records(&[raft(1), raft(2)]);
    assert!(matches!(result, Err(Error::Io(_))));

    assert_eq!(manager.active_segment(), 1);
    assert_eq!(manager.segment_metrics(1).unwrap().raft_entries, 1);
    let on_disk = fs::metadata(manager.segment_path(1)).unwrap().len();
    assert_eq!(on_disk, first[0].end_offset());

    fs::remove_dir(manager.segment_path(2)).unwrap();
    let next = manager.append_records(&[raft(3)]).unwrap();
    assert_eq!(next[0].segment_id, 1);
    assert_eq!(next[0].offset, first[0].end_offset());

    let payloads: Vec<Bytes> = collect(&manager).into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec![raft(0).payload, raft(3).payload]);

    manager.close().unwrap();
    let reopened = Manager::open(dir.path(), WalOptions::with_segment_size(40)).unwrap();
    assert_eq!(collect(&reopened).len(), 2);
}

// =============================================================================
// Test 13: Concurrent appenders each get a contiguous run in the log
// =============================================================================
#[test]
fn concurrent_batches_stay_contiguous() {
    const THREADS: u8 = 8;
    const BATCHES: u8 = 25;
    const BATCH_LEN: u8 = 4;

    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(Manager::open(dir.path(), WalOptions::with_segment_size(1024)).unwrap());

    let mut handles = vec![];
    for t in 0..THREADS {
        let mgr = Arc::clone(&manager);
        handles.push(thread::spawn(move || {
            let mut infos = Vec::new();
            for b in 0..BATCHES {
                // Payload tag: thread, batch, position, then padding.
                let batch: Vec<Record> = (0..BATCH_LEN)
                    .map(|r| {
                        let mut payload = vec![t, b, r];
                        payload.resize(24, 0xAB);
                        Record::raft_entry(payload)
                    })
                    .collect();
                infos.extend(mgr.append_records(&batch).unwrap());
            }
            infos
        }));
    }

    let mut returned = HashSet::new();
    for h in handles {
        returned.extend(h.join().unwrap());
    }

    let replayed = collect(&manager);
    let total = THREADS as usize * BATCHES as usize * BATCH_LEN as usize;
    assert_eq!(replayed.len(), total);
    assert!(manager.active_segment() > 1, "small segments should rotate");

    // Every locator handed out is exactly one replayed record.
    let replayed_infos: HashSet<EntryInfo> = replayed.iter().map(|(info, _)| *info).collect();
    assert_eq!(returned.len(), total);
    assert_eq!(replayed_infos, returned);

    // Records of one segment sit back to back; segment ids only grow.
    for pair in replayed.windows(2) {
        let (prev, next) = (&pair[0].0, &pair[1].0);
        if prev.segment_id == next.segment_id {
            assert_eq!(next.offset, prev.end_offset());
        } else {
            assert!(next.segment_id > prev.segment_id);
            assert_eq!(next.offset, 0);
        }
    }

    // Each batch is one uninterrupted run, and each thread's batches are in order.
    let mut next_batch = vec![0u8; THREADS as usize];
    for run in replayed.chunks(BATCH_LEN as usize) {
        let (t, b) = (run[0].1[0], run[0].1[1]);
        assert_eq!(b, next_batch[t as usize], "thread {t} batches out of order");
        next_batch[t as usize] += 1;
        for (r, (_, payload)) in run.iter().enumerate() {
            assert_eq!(&payload[..3], &[t, b, r as u8], "batch t{t}-b{b} interleaved");
        }
    }
    assert!(next_batch.iter().all(|&n| n == BATCHES));
}
