//! Property-based tests for the cache engine using proptest.
//!
//! These verify the accounting and codec invariants under randomized
//! operation sequences that unit tests would not reach.

use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;

use filecache_core::{pathcodec, CacheParams, CacheSet, ObjectId};

const HI_WATERMARK: u64 = 16384;

/// A randomized cache operation.
#[derive(Debug, Clone)]
enum Op {
    Insert { size: u64 },
    Expire { slot: usize },
    Touch { slot: usize },
    Resize { slot: usize, new_size: u64 },
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..4096).prop_map(|size| Op::Insert { size }),
        (0usize..64).prop_map(|slot| Op::Expire { slot }),
        (0usize..64).prop_map(|slot| Op::Touch { slot }),
        ((0usize..64), (1u64..4096)).prop_map(|(slot, new_size)| Op::Resize { slot, new_size }),
    ]
}

fn any_filename() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}(\\.[a-z]{1,4})?"
}

proptest! {
    /// After any operation sequence, the type's reported usage equals the
    /// sum of live object sizes and never exceeds the high watermark.
    #[test]
    fn test_usage_accounting_invariant(ops in proptest::collection::vec(any_op(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let mut set = CacheSet::new(dir.path().join("cache"), 1 << 24).unwrap();
        set.define_type("t", CacheParams::new(4096, HI_WATERMARK, 512, 0, 0), false).unwrap();

        let mut inserted: Vec<ObjectId> = Vec::new();
        for op in ops {
            match op {
                Op::Insert { size } => {
                    if let Ok((id, _)) = set.insert("t", "f.bin", size, 0, 0) {
                        inserted.push(id);
                    }
                }
                Op::Expire { slot } => {
                    if let Some(id) = inserted.get(slot) {
                        let _ = set.expire(*id);
                    }
                }
                Op::Touch { slot } => {
                    if let Some(id) = inserted.get(slot) {
                        let _ = set.touch(*id);
                    }
                }
                Op::Resize { slot, new_size } => {
                    if let Some(id) = inserted.get(slot) {
                        let _ = set.resize(*id, new_size);
                    }
                }
            }

            let (used, count) = set.get_type_status("t").unwrap();
            prop_assert!(used <= HI_WATERMARK, "usage {} exceeds ceiling", used);

            let live: Vec<u64> = inserted
                .iter()
                .filter_map(|id| set.object_size(*id))
                .collect();
            prop_assert_eq!(live.len(), count);
            prop_assert_eq!(live.iter().sum::<u64>(), used);
        }
    }

    /// Path encoding round-trips every valid id regardless of filename.
    #[test]
    fn test_path_codec_roundtrip(raw in 1u64..=u64::MAX, filename in any_filename()) {
        let id = ObjectId::new(raw);
        let path = pathcodec::encode_path(Path::new("/cache"), "t", id, &filename);
        prop_assert_eq!(pathcodec::decode_object_id(&path), id);
        let extracted = pathcodec::extract_type_name(Path::new("/cache"), &path);
        prop_assert_eq!(extracted.as_deref(), Some("t"));
    }

    /// Object ids never repeat within one cache root lifetime, even as
    /// objects are evicted and expired.
    #[test]
    fn test_ids_never_repeat(sizes in proptest::collection::vec(1u64..4096, 1..40)) {
        let dir = TempDir::new().unwrap();
        let mut set = CacheSet::new(dir.path().join("cache"), 1 << 24).unwrap();
        set.define_type("t", CacheParams::new(2048, 4096, 512, 0, 0), false).unwrap();

        let mut seen = std::collections::HashSet::new();
        for size in sizes {
            if let Ok((id, _)) = set.insert("t", "f", size, 0, 0) {
                prop_assert!(seen.insert(id), "id {} repeated", id);
            }
        }
    }
}
