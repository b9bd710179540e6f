/// Quotabot Crypto Library
///
/// FiSH-compatible channel encryption: Blowfish in CBC mode with a random
/// 8-byte IV, explicit NUL padding and a `+OK *` marker around base64 text.
/// Every channel shares one symmetric key distributed out-of-band.

pub mod fish;
pub mod keys;

pub use fish::{EnvelopeError, MARKER, decode, encode};
