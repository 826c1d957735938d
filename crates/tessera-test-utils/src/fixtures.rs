//! Deterministic value and length patterns.
//!
//! All generators are pure functions of their seed, so failing tests
//! reproduce exactly.

use tessera_core::{EntryRef, Weighted};

/// SplitMix64 step.
pub fn mix(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// `len` values derived from `seed`.
pub fn pattern(seed: u64, len: usize) -> Vec<u32> {
    (0..len as u64).map(|i| mix(seed ^ (i << 32)) as u32).collect()
}

/// `len` weighted values derived from `seed`, weights in `1..=100`.
pub fn weighted_pattern(seed: u64, len: usize) -> Vec<Weighted<i32>> {
    (0..len as u64)
        .map(|i| {
            let h = mix(seed ^ (i << 32));
            Weighted::new(h as i32, (h >> 40) as i32 % 100 + 1)
        })
        .collect()
}

/// The array `[key, key + 1, ..]` of length `len`, easy to eyeball in failures.
pub fn ramp(key: u32, len: usize) -> Vec<u32> {
    (0..len as u32).map(|i| key.wrapping_add(i)).collect()
}

/// `count` array lengths in `0..=max_len` derived from `seed`.
pub fn lengths(seed: u64, count: usize, max_len: usize) -> Vec<usize> {
    (0..count as u64)
        .map(|i| (mix(seed.wrapping_add(i)) % (max_len as u64 + 1)) as usize)
        .collect()
}

/// Whether any two non-null refs are equal.
pub fn has_duplicate_refs(refs: &[EntryRef]) -> bool {
    let mut live: Vec<u32> = refs.iter().filter(|r| r.is_valid()).map(|r| r.raw()).collect();
    live.sort_unstable();
    live.windows(2).any(|w| w[0] == w[1])
}
