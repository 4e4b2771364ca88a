#![forbid(unsafe_code)]

/// Computes the integrity checksum stored in a page reference.
///
/// The page key is folded in so a page image copied to the wrong slot does
/// not verify.
pub fn page_crc32(page_key: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_key.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Checksum of the uber pointer record (key + page checksum).
pub fn pointer_crc32(page_key: u64, page_crc: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_key.to_be_bytes());
    hasher.update(&page_crc.to_be_bytes());
    hasher.finalize()
}
