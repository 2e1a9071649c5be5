//! Deterministic character seeds and image filenames.
//!
//! The seed is the identity anchor of the whole pipeline: the same
//! character name must map to the same 32-bit seed across processes,
//! platforms, and runtimes, because the seed feeds both the image
//! provider's seed parameter and the deterministic image filename.
//!
//! MD5 is chosen deliberately: universally available, cheap, and
//! well-defined. Cryptographic strength is irrelevant here.

/// Map a character name to a deterministic `u32` seed.
///
/// Defined as `MD5(lowercase(trim(name)))` interpreted as a big-endian
/// integer modulo 2³², which is exactly the digest's last four bytes in
/// big-endian order. Invariant under surrounding whitespace and case:
/// `seed("Harry Potter") == seed("  HARRY POTTER  ")`.
pub fn character_seed(name: &str) -> u32 {
    let normalized = name.trim().to_lowercase();
    let digest = md5::compute(normalized.as_bytes());
    u32::from_be_bytes([digest[12], digest[13], digest[14], digest[15]])
}

/// Filename-safe form of a canonical name: lowercased, whitespace runs
/// collapsed to `_`, all other non-alphanumeric characters stripped.
pub fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Deterministic image filename for a character: `<slug>_<seed>.png`.
pub fn image_filename(name: &str, seed: u32) -> String {
    format!("{}_{}.png", slug(name), seed)
}
