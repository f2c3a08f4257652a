use xxhash_rust::xxh64::xxh64;

/// Maps a key to its slot position within an index block of `block_len`
/// slots.
///
/// Unseeded, so two opens of the same file always agree on slot placement.
pub fn slot_hash(key: &[u8], block_len: u64) -> u64 {
    xxh64(key, 0) % block_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(slot_hash(b"foo", 512), slot_hash(b"foo", 512));
        assert_eq!(slot_hash(b"mulimuta", 131), slot_hash(b"mulimuta", 131));
    }

    #[test]
    fn test_within_block_length() {
        for block_len in [1u64, 2, 53, 512, 1024] {
            for key in [&b"hey"[..], b"hi", b"salut", b"bonjour", b"hola", b"oi"] {
                assert!(slot_hash(key, block_len) < block_len);
            }
        }
    }

    #[test]
    fn test_spreads_distinct_keys() {
        // 100 random-ish keys into 512 slots should not all collapse into a
        // handful of slots.
        let mut slots: Vec<u64> = (0..100u32)
            .map(|i| slot_hash(format!("key-{i}").as_bytes(), 512))
            .collect();
        slots.sort_unstable();
        slots.dedup();
        assert!(slots.len() > 60, "only {} distinct slots", slots.len());
    }
}
