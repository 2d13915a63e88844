// Entry, internal key and value pointer codecs.

use std::cmp::Ordering;

use lsm_journal::Error;
use lsm_journal::kv::{
    ColumnFamily, Entry, EntryMeta, InternalKey, ValuePtr, compare_internal_keys,
    encode_internal_key, key_hash, split_internal_key, strip_timestamp,
};

// =============================================================================
// Test 1: Entry survives encode → decode with every field intact
// =============================================================================
#[test]
fn entry_encode_decode() {
    let entry = Entry::new(&b"user:42"[..], &b"alice"[..]).with_expires_at(1_700_000_000);
    let encoded = entry.encode();

    let (decoded, consumed) = Entry::decode(&encoded).unwrap();
    assert_eq!(decoded, entry);
    assert_eq!(consumed, encoded.len());
}

// =============================================================================
// Test 2: Decoding stops at the entry boundary; trailing bytes are left alone
// =============================================================================
#[test]
fn entry_decode_reports_consumed_bytes() {
    let first = Entry::new(&b"a"[..], &b"1"[..]);
    let second = Entry::delete(&b"b"[..]);
    let mut buf = Vec::new();
    let n1 = first.encode_into(&mut buf);
    let n2 = second.encode_into(&mut buf);
    assert_eq!(buf.len(), n1 + n2);

    let (a, used) = Entry::decode(&buf).unwrap();
    assert_eq!(a, first);
    assert_eq!(used, n1);

    let (b, used) = Entry::decode(&buf[n1..]).unwrap();
    assert_eq!(b, second);
    assert_eq!(used, n2);
    assert!(b.is_deleted());
}

// =============================================================================
// Test 3: Every strict prefix of an encoded entry is Truncated
// =============================================================================
#[test]
fn entry_prefixes_are_truncated() {
    let entry = Entry::new(vec![b'k'; 200], vec![b'v'; 300]);
    let encoded = entry.encode();

    for cut in 0..encoded.len() {
        let err = Entry::decode(&encoded[..cut]).unwrap_err();
        assert!(err.is_truncated(), "cut at {cut}: {err:?}");
    }
}

// =============================================================================
// Test 4: A flipped bit in key or value fails the checksum
// =============================================================================
#[test]
fn entry_bit_flip_is_checksum_error() {
    let entry = Entry::new(&b"key"[..], &b"value"[..]);
    let mut encoded = entry.encode();
    let last_value_byte = encoded.len() - 5;
    encoded[last_value_byte] ^= 0x01;

    assert!(matches!(
        Entry::decode(&encoded),
        Err(Error::Checksum { .. })
    ));
}

// =============================================================================
// Test 5: Value pointer entries expose the pointer
// =============================================================================
#[test]
fn value_pointer_entry() {
    let ptr = ValuePtr::new(3, 4096, 128);
    let entry = Entry::with_value_ptr(&b"big"[..], ptr);
    assert!(entry.meta.contains(EntryMeta::VALUE_POINTER));

    let (decoded, _) = Entry::decode(&entry.encode()).unwrap();
    assert_eq!(decoded.value_ptr().unwrap(), Some(ptr));

    let plain = Entry::new(&b"small"[..], &b"v"[..]);
    assert_eq!(plain.value_ptr().unwrap(), None);
}

// =============================================================================
// Test 6: Value pointer layout is len ‖ offset ‖ file_id, big-endian
// =============================================================================
#[test]
fn value_ptr_layout() {
    let ptr = ValuePtr::new(7, 0x0102_0304, 16);
    let encoded = ptr.encode();
    assert_eq!(encoded.len(), ValuePtr::SIZE);
    assert_eq!(&encoded[0..4], &16u32.to_be_bytes());
    assert_eq!(&encoded[4..8], &0x0102_0304u32.to_be_bytes());
    assert_eq!(&encoded[8..12], &7u32.to_be_bytes());

    assert!(ValuePtr::decode(&encoded[..11]).unwrap_err().is_truncated());
    assert!(ValuePtr::default().is_zero());
}

// =============================================================================
// Test 7: Internal keys split back into (cf, user_key, ts)
// =============================================================================
#[test]
fn internal_key_split() {
    let key = encode_internal_key(ColumnFamily::Write, b"row-1", 99);
    let (cf, user_key, ts) = split_internal_key(&key).unwrap();
    assert_eq!(cf, ColumnFamily::Write);
    assert_eq!(user_key, b"row-1");
    assert_eq!(ts, 99);

    assert_eq!(InternalKey::decode(&key).unwrap(), InternalKey::new(cf, &b"row-1"[..], 99));
}

// =============================================================================
// Test 8: Keys without the CF marker are treated as default-CF keys
// =============================================================================
#[test]
fn legacy_key_is_default_cf() {
    let mut legacy = b"plain".to_vec();
    legacy.extend_from_slice(&(!5u64).to_be_bytes());

    let (cf, user_key, ts) = split_internal_key(&legacy).unwrap();
    assert_eq!(cf, ColumnFamily::Default);
    assert_eq!(user_key, b"plain");
    assert_eq!(ts, 5);
    assert_eq!(strip_timestamp(&legacy), b"plain");

    assert!(split_internal_key(b"short").unwrap_err().is_truncated());
}

// =============================================================================
// Test 9: Newer versions sort first; shorter user keys sort before longer
// =============================================================================
#[test]
fn internal_key_ordering() {
    let newer = encode_internal_key(ColumnFamily::Default, b"k", 20);
    let older = encode_internal_key(ColumnFamily::Default, b"k", 10);
    assert_eq!(compare_internal_keys(&newer, &older), Ordering::Less);

    // Byte order alone would compare "k"'s timestamp against "k0".
    let short = encode_internal_key(ColumnFamily::Default, b"k", 0);
    let long = encode_internal_key(ColumnFamily::Default, b"k0", u64::MAX);
    assert_eq!(compare_internal_keys(&short, &long), Ordering::Less);

    let mut keys = vec![
        InternalKey::new(ColumnFamily::Lock, &b"a"[..], 1),
        InternalKey::new(ColumnFamily::Default, &b"b"[..], 1),
        InternalKey::new(ColumnFamily::Default, &b"b"[..], 9),
        InternalKey::new(ColumnFamily::Default, &b"a"[..], 3),
    ];
    keys.sort();
    let order: Vec<_> = keys.iter().map(|k| (k.cf, k.user_key.clone(), k.ts)).collect();
    assert_eq!(
        order,
        vec![
            (ColumnFamily::Default, b"a".to_vec(), 3),
            (ColumnFamily::Default, b"b".to_vec(), 9),
            (ColumnFamily::Default, b"b".to_vec(), 1),
            (ColumnFamily::Lock, b"a".to_vec(), 1),
        ]
    );
}

// =============================================================================
// Test 10: Key hash is stable across calls and differs between keys
// =============================================================================
#[test]
fn key_hash_is_stable() {
    assert_eq!(key_hash(b"alpha"), key_hash(b"alpha"));
    assert_ne!(key_hash(b"alpha"), key_hash(b"beta"));
}
