//! 32-bit MurmurHash2 over the UTF-8 bytes of a source text.
//!
//! Kernels hash dumped cells with the same function, so the output has to stay
//! bit-compatible with the kernel side (little-endian blocks, `m = 0x5bd1e995`,
//! `r = 24`).

const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// Hash `data` with the given `seed`.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    let mut h = seed ^ (data.len() as u32);

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M) ^ k;
    }

    let tail = blocks.remainder();
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
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_with_zero_seed() {
        assert_eq!(murmur2(b"", 0), 0);
    }

    #[test]
    fn test_known_vectors() {
        assert_eq!(murmur2(b"", 1), 1540447798);
        assert_eq!(murmur2(b"a", 0), 2456313694);
        assert_eq!(murmur2(b"x=1", 1), 3908581943);
        assert_eq!(murmur2(b"hello", 0), 3848350155);
        assert_eq!(murmur2(b"print(1)", 1), 1626409200);
        assert_eq!(murmur2(b"print(1)", 3339675911), 3773950048);
    }

    #[test]
    fn test_seed_changes_output() {
        assert_ne!(murmur2(b"x=1", 0), murmur2(b"x=1", 1));
    }
}
