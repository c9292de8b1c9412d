use holdfast_core::{Error, FixedRecordFile, copy_bytes, copy_records};
use tempfile::NamedTempFile;

const RECORD_LEN: u32 = 16;

/// A record whose bytes encode its ordinal, so shifted content stays
/// recognizable.
fn record(n: u8) -> Vec<u8> {
    vec![n; RECORD_LEN as usize]
}

fn filled(path: &std::path::Path, count: u8) -> FixedRecordFile {
    let mut f = FixedRecordFile::open(path, RECORD_LEN).unwrap();
    f.add_records(0, u64::from(count)).unwrap();
    for i in 0..count {
        f.write_record(u64::from(i), &record(i)).unwrap();
    }
    f
}

fn contents(f: &FixedRecordFile) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for i in 0..f.record_count().unwrap() {
        let mut buf = vec![0u8; RECORD_LEN as usize];
        f.read_record(i, &mut buf).unwrap();
        out.push(buf);
    }
    out
}

#[test]
fn test_append_and_read_back() {
    let tmp = NamedTempFile::new().unwrap();
    let f = filled(tmp.path(), 10);
    assert_eq!(f.record_count().unwrap(), 10);
    assert_eq!(f.record_length(), RECORD_LEN);
    for (i, rec) in contents(&f).into_iter().enumerate() {
        assert_eq!(rec, record(i as u8));
    }
}

#[test]
fn test_add_records_at_start_middle_end() {
    for (index, k) in [(0u64, 1u64), (0, 3), (5, 1), (5, 3), (10, 1), (10, 3), (3, 0)] {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = filled(tmp.path(), 10);
        let before = contents(&f);

        f.add_records(index, k).unwrap();
        let after = contents(&f);
        assert_eq!(after.len() as u64, 10 + k, "insert {k} at {index}");

        // Records before the gap are untouched, records after it moved
        // forward by k with identical content.
        for i in 0..index {
            assert_eq!(after[i as usize], before[i as usize], "prefix at {i}");
        }
        for i in index..10 {
            assert_eq!(after[(i + k) as usize], before[i as usize], "suffix at {i}");
        }
    }
}

#[test]
fn test_add_records_large_shift() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 200);
    let before = contents(&f);

    // A 100-record shift spans many scratch-buffer chunks.
    f.add_records(1, 100).unwrap();
    let after = contents(&f);

    assert_eq!(after[0], before[0]);
    for i in 1..200 {
        assert_eq!(after[i + 100], before[i], "record {i} after large shift");
    }
}

#[test]
fn test_add_records_past_end_extends() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 2);
    let offset = f.add_records(5, 2).unwrap();
    assert_eq!(offset, 5 * u64::from(RECORD_LEN));
    assert_eq!(f.record_count().unwrap(), 7);
}

#[test]
fn test_remove_record_shifts_back() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 10);

    f.remove_record(4).unwrap();
    let after = contents(&f);
    assert_eq!(after.len(), 9);
    for i in 0..4 {
        assert_eq!(after[i], record(i as u8));
    }
    for i in 4..9 {
        assert_eq!(after[i], record(i as u8 + 1));
    }

    // Removing the last record only truncates.
    f.remove_record(8).unwrap();
    assert_eq!(f.record_count().unwrap(), 8);
    assert_eq!(contents(&f).last().unwrap(), &record(8));
}

#[test]
fn test_remove_all_records() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 6);
    f.remove_all_records().unwrap();
    assert_eq!(f.record_count().unwrap(), 0);
}

#[test]
fn test_swap_is_its_own_inverse() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 8);
    let original = contents(&f);

    for (i, j) in [(0, 7), (2, 5), (3, 3), (6, 1)] {
        f.swap(i, j).unwrap();
        f.swap(i, j).unwrap();
        assert_eq!(contents(&f), original, "swap({i},{j}) twice must restore");
    }

    // A single swap actually moves content.
    f.swap(0, 7).unwrap();
    let after = contents(&f);
    assert_eq!(after[0], record(7));
    assert_eq!(after[7], record(0));
}

#[test]
fn test_out_of_range_indices() {
    let tmp = NamedTempFile::new().unwrap();
    let mut f = filled(tmp.path(), 3);

    assert!(matches!(f.record_offset(3), Err(Error::OutOfRange(_))));
    assert!(matches!(f.remove_record(3), Err(Error::OutOfRange(_))));
    assert!(matches!(f.swap(0, 3), Err(Error::OutOfRange(_))));
    let mut buf = vec![0u8; RECORD_LEN as usize];
    assert!(matches!(f.read_record(3, &mut buf), Err(Error::OutOfRange(_))));
    assert!(matches!(f.read_record(0, &mut [0u8; 4]), Err(Error::OutOfRange(_))));
}

#[test]
fn test_copy_records_between_files() {
    let tmp_a = NamedTempFile::new().unwrap();
    let tmp_b = NamedTempFile::new().unwrap();
    let a = filled(tmp_a.path(), 6);
    let mut b = FixedRecordFile::open(tmp_b.path(), RECORD_LEN).unwrap();

    b.add_records(0, 4).unwrap();
    copy_records(&a, 2, &b, 0, 4).unwrap();
    let copied = contents(&b);
    for i in 0..4u8 {
        assert_eq!(copied[i as usize], record(i + 2));
    }

    // Mismatched record lengths are rejected.
    let tmp_c = NamedTempFile::new().unwrap();
    let c = FixedRecordFile::open(tmp_c.path(), RECORD_LEN * 2).unwrap();
    assert!(matches!(copy_records(&a, 0, &c, 0, 1), Err(Error::OutOfRange(_))));
}

#[test]
fn test_copy_bytes_overlapping_both_directions() {
    // A recognizable byte ramp longer than the scratch buffer, slid
    // forward and backward in place over its own storage.
    let tmp = NamedTempFile::new().unwrap();
    let ramp: Vec<u8> = (0..20_000u64).map(|i| (i % 251) as u8).collect();
    std::fs::write(tmp.path(), &ramp).unwrap();
    let file = std::fs::OpenOptions::new().read(true).write(true).open(tmp.path()).unwrap();

    // Forward move (source < destination): must copy back-to-front.
    copy_bytes(&file, 0, &file, 5_000, 15_000).unwrap();
    let after = std::fs::read(tmp.path()).unwrap();
    assert_eq!(&after[..5_000], &ramp[..5_000]);
    assert_eq!(&after[5_000..], &ramp[..15_000], "forward overlap");

    // Backward move (source > destination): must copy front-to-back.
    copy_bytes(&file, 4_000, &file, 1_000, 12_000).unwrap();
    let last = std::fs::read(tmp.path()).unwrap();
    assert_eq!(&last[1_000..13_000], &after[4_000..16_000], "backward overlap");
    assert_eq!(&last[..1_000], &after[..1_000]);
    assert_eq!(&last[13_000..], &after[13_000..]);
}

#[test]
fn test_copy_bytes_short_source_is_end_of_data() {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), [1u8; 100]).unwrap();
    let file = std::fs::OpenOptions::new().read(true).write(true).open(tmp.path()).unwrap();
    assert!(matches!(copy_bytes(&file, 50, &file, 0, 200), Err(Error::EndOfData)));
}

#[test]
fn test_copy_bytes_zero_is_noop() {
    let tmp = NamedTempFile::new().unwrap();
    let f = filled(tmp.path(), 2);
    copy_records(&f, 0, &f, 1, 0).unwrap();
    assert_eq!(contents(&f), vec![record(0), record(1)]);
}

#[test]
fn test_partial_record_file_is_corrupt() {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), [1u8; 33]).unwrap();
    assert!(matches!(FixedRecordFile::open(tmp.path(), RECORD_LEN), Err(Error::Corrupt(_))));
}
