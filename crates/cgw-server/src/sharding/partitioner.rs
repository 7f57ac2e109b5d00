//! Kafka-compatible default partitioner
//!
//! Producers pick the partition of a keyed record with
//! `(murmur2(key) & 0x7fffffff) % partitions_num`. Matching this exactly lets
//! the in-memory broker and a real Kafka cluster agree on placement.

use cgw_core::{GroupId, Partition};

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// 32-bit murmur2 as implemented by the Kafka Java client.
pub fn murmur2(data: &[u8]) -> i32 {
    let mut h = SEED ^ data.len() as u32;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h as i32
}

/// Producer key of a command addressing `group_id`.
pub fn partition_key(group_id: GroupId) -> Vec<u8> {
    group_id.to_string().into_bytes()
}

/// Partition a keyed record lands on.
pub fn partition_for_key(key: &[u8], partitions_num: usize) -> Partition {
    if partitions_num == 0 {
        return 0;
    }
    ((murmur2(key) & 0x7fff_ffff) as usize % partitions_num) as Partition
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_matches_kafka() {
        assert_eq!(murmur2(b"21"), -973932308);
        assert_eq!(murmur2(b"foobar"), -790332482);
    }

    #[test]
    fn test_partition_in_range() {
        for gid in 0..500 {
            let p = partition_for_key(&partition_key(gid), 3);
            assert!((0..3).contains(&p));
        }
    }

    #[test]
    fn test_deterministic() {
        let key = partition_key(100);
        assert_eq!(key, b"100".to_vec());
        assert_eq!(partition_for_key(&key, 6), partition_for_key(&key, 6));
    }

    #[test]
    fn test_keys_spread_over_partitions() {
        let mut counts = [0usize; 4];
        for gid in 0..4000 {
            counts[partition_for_key(&partition_key(gid), 4) as usize] += 1;
        }
        for count in counts {
            assert!(count > 700, "uneven spread: {counts:?}");
        }
    }
}
