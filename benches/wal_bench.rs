use bytes::Bytes;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lsm_journal::kv::Entry;
use lsm_journal::manifest::{self, FileMeta};
use lsm_journal::wal::{self, Record, SyncPolicy, WalOptions};
use lsm_journal::ManifestOptions;

fn bench_record_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_codec");
    for size in [64usize, 1024, 16 * 1024] {
        let record = Record::raft_entry(vec![0xA5; size]);
        let encoded = Bytes::from(record.encode());
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &record, |b, record| {
            let mut buf = Vec::with_capacity(record.encoded_size());
            b.iter(|| {
                buf.clear();
                record.encode_into(&mut buf);
                black_box(buf.len());
            });
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, encoded| {
            b.iter(|| black_box(Record::decode(encoded).unwrap()));
        });
    }
    group.finish();
}

fn bench_entry_encode(c: &mut Criterion) {
    let entry = Entry::new(&b"user:00000042"[..], vec![7u8; 256]).with_expires_at(1_700_000_000);
    c.bench_function("entry_encode_into", |b| {
        let mut buf = Vec::with_capacity(entry.estimate_encoded_size());
        b.iter(|| {
            buf.clear();
            black_box(entry.encode_into(&mut buf));
        });
    });
}

fn bench_wal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal_append");
    let batch: Vec<Record> = (0..32)
        .map(|i| Record::entry(&Entry::new(format!("key{i:08}"), vec![1u8; 128])))
        .collect();
    group.throughput(Throughput::Elements(batch.len() as u64));

    for (name, policy) in [("manual", SyncPolicy::Manual), ("every_64", SyncPolicy::EveryNWrites(64))] {
        group.bench_function(name, |b| {
            let dir = tempfile::tempdir().unwrap();
            let options = WalOptions::default().sync_policy(policy);
            let manager = wal::Manager::open(dir.path(), options).unwrap();
            b.iter(|| black_box(manager.append_records(&batch).unwrap()));
        });
    }
    group.finish();
}

fn bench_wal_replay(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let manager = wal::Manager::open(dir.path(), WalOptions::with_segment_size(1 << 20)).unwrap();
    let batch: Vec<Record> = (0..1000)
        .map(|i| Record::raft_entry(format!("raft-entry-{i}").into_bytes()))
        .collect();
    for _ in 0..10 {
        manager.append_records(&batch).unwrap();
    }

    c.bench_function("wal_replay_10k", |b| {
        b.iter(|| {
            let mut n = 0usize;
            manager
                .replay(|_, payload| {
                    n += payload.len();
                    Ok(())
                })
                .unwrap();
            black_box(n)
        });
    });
}

fn bench_manifest_log_edit(c: &mut Criterion) {
    c.bench_function("manifest_log_file_add", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let manager = manifest::Manager::open(dir.path(), ManifestOptions::default()).unwrap();
                (dir, manager)
            },
            |(_dir, manager)| {
                for file_id in 0..16 {
                    manager
                        .log_file_add(FileMeta {
                            level: 0,
                            file_id,
                            size: 4096,
                            ..Default::default()
                        })
                        .unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_record_codec,
    bench_entry_encode,
    bench_wal_append,
    bench_wal_replay,
    bench_manifest_log_edit
);
criterion_main!(benches);
