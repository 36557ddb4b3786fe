//! CRC32C hashing utilities.
//!
//! Forest libraries identify their entries by a CRC32C hash of the
//! lower-cased entry name. The same hash shows up in chunk relocation
//! trailers as an integrity hint.

/// Compute CRC32C hash of a byte slice.
///
/// Uses hardware acceleration when available (SSE4.2 on x86).
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Compute CRC32C hash of a byte slice with a seed value.
///
/// This continues a previous CRC computation.
#[inline]
pub fn hash_bytes_with_seed(data: &[u8], seed: u32) -> u32 {
    crc32c::crc32c_append(seed, data)
}

/// Compute CRC32C hash of a string.
#[inline]
pub fn hash_str(s: &str) -> u32 {
    hash_bytes(s.as_bytes())
}

/// Compute the canonical name hash of a resource entry.
///
/// Entry names are hashed case-insensitively; the original tooling
/// lower-cased before hashing.
pub fn hash_name(name: &str) -> u32 {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        hash_str(&name.to_ascii_lowercase())
    } else {
        hash_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash() {
        assert_eq!(hash_bytes(&[]), 0);
    }

    #[test]
    fn test_string_hash() {
        let hash1 = hash_str("test");
        let hash2 = hash_bytes(b"test");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_name_hash_case_insensitive() {
        assert_eq!(hash_name("Oak_Large"), hash_name("oak_large"));
        assert_ne!(hash_name("oak_large"), hash_name("oak_small"));
    }
}
