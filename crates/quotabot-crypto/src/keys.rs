/// Blowfish accepts keys from 32 to 448 bits.
pub const MIN_KEY_LEN: usize = 4;
pub const MAX_KEY_LEN: usize = 56;

/// Key bytes as handed to the cipher: anything past 56 bytes is ignored.
pub fn prepare_key(key: &str) -> &[u8] {
    let bytes = key.as_bytes();
    &bytes[..bytes.len().min(MAX_KEY_LEN)]
}

/// Whether a configured key is usable as-is, without truncation.
pub fn is_valid_key(key: &str) -> bool {
    (MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.len())
}
