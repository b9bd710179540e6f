use base64::{
    Engine as _,
    alphabet,
    engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64},
    engine::DecodePaddingMode,
};
use blowfish::Blowfish;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};

use crate::keys::prepare_key;

/// Prefix of every CBC envelope on the wire.
pub const MARKER: &str = "+OK *";

const BLOCK_SIZE: usize = 8;
const IV_LEN: usize = 8;

/// Clients disagree on base64 padding, so decoding accepts it either way.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

type BlowfishCbcEnc = cbc::Encryptor<Blowfish>;
type BlowfishCbcDec = cbc::Decryptor<Blowfish>;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
    #[error("encryption failed: {0}")]
    Encode(String),
}

/// Encrypt `plaintext` into a `+OK *<base64>` envelope with a fresh random IV.
pub fn encode(plaintext: &str, key: &str) -> Result<String, EnvelopeError> {
    let iv: [u8; IV_LEN] = rand::random();
    encode_with_iv(plaintext, key, iv)
}

/// Deterministic core of [`encode`].
pub fn encode_with_iv(plaintext: &str, key: &str, iv: [u8; IV_LEN]) -> Result<String, EnvelopeError> {
    let padded = pad_plaintext(plaintext.as_bytes());
    let ciphertext = encrypt_blocks(prepare_key(key), &iv, &padded)?;

    let mut framed = Vec::with_capacity(IV_LEN + ciphertext.len());
    framed.extend_from_slice(&iv);
    framed.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", MARKER, BASE64.encode(framed)))
}

/// Decrypt a `+OK *<base64>` envelope. `*` is read as base64 padding.
pub fn decode(envelope: &str, key: &str) -> Result<String, EnvelopeError> {
    let body = envelope
        .trim_end()
        .strip_prefix(MARKER)
        .ok_or(EnvelopeError::Malformed("missing +OK * marker"))?;

    let body = body.replace('*', "=");
    let data = LENIENT_BASE64
        .decode(body.as_bytes())
        .map_err(|_| EnvelopeError::Malformed("invalid base64"))?;

    if data.len() <= IV_LEN || (data.len() - IV_LEN) % BLOCK_SIZE != 0 {
        return Err(EnvelopeError::Malformed("ciphertext is not block aligned"));
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);

    let mut plain = BlowfishCbcDec::new_from_slices(prepare_key(key), iv)
        .map_err(|_| EnvelopeError::Malformed("key rejected by cipher"))?
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|_| EnvelopeError::Malformed("decryption failed"))?;

    let end = plain.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    plain.truncate(end);

    String::from_utf8(plain).map_err(|_| EnvelopeError::Malformed("plaintext is not UTF-8"))
}

/// Raw Blowfish-CBC over block-aligned input, no padding.
pub fn encrypt_blocks(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(EnvelopeError::Encode(format!(
            "input of {} bytes is not block aligned",
            data.len()
        )));
    }

    let cipher = BlowfishCbcEnc::new_from_slices(key, iv)
        .map_err(|e| EnvelopeError::Encode(e.to_string()))?;

    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(data))
}

/// NUL-pad to a multiple of 3 (so the plaintext itself never implies base64
/// padding), then append 1..=8 NULs to reach the next block boundary.
fn pad_plaintext(message: &[u8]) -> Vec<u8> {
    let mut buf = message.to_vec();

    let to_triplet = (3 - buf.len() % 3) % 3;
    buf.resize(buf.len() + to_triplet, 0);

    let to_block = BLOCK_SIZE - buf.len() % BLOCK_SIZE;
    buf.resize(buf.len() + to_block, 0);

    buf
}
