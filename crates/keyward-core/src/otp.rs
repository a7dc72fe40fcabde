//! Time-based one-time passwords (RFC 6238) and seed storage.
//!
//! Seeds are 10 random bytes encoded as padded RFC 4648 base32, the format
//! authenticator apps expect. At rest a seed is encrypted with AES-128 in
//! full-block CFB mode under a key made by repeating the user's password to
//! 16 bytes; the stored form is `base32(iv || ciphertext)`.
//!
//! Codes are six digits over HMAC-SHA1 with a 30 second step. Verification
//! accepts the current step and the one before it.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::unix_now;

/// Seconds covered by one code.
pub const STEP_SECONDS: u64 = 30;

/// Number of digits in a code.
pub const DIGITS: u32 = 6;

/// Issuer label shown by authenticator apps.
pub const ISSUER: &str = "Keyward";

const SEED_BYTES: usize = 10;
const BLOCK: usize = 16;
const ALPHABET: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: true };

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;
type HmacSha1 = Hmac<Sha1>;

/// Errors from seed handling and code generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    #[error("password must not be empty")]
    EmptyPassword,

    #[error("invalid base32 encoding")]
    InvalidEncoding,

    #[error("encrypted seed shorter than one cipher block")]
    CiphertextTooShort,

    #[error("decrypted seed is not valid text")]
    InvalidSeed,
}

/// Generates a fresh random seed.
pub fn generate_seed() -> String {
    let mut raw = Zeroizing::new([0u8; SEED_BYTES]);
    OsRng.fill_bytes(&mut raw[..]);
    base32::encode(ALPHABET, &raw[..])
}

/// Encrypts `seed` for storage next to the password hash.
pub fn encrypt_seed(seed: &str, password: &str) -> Result<String, OtpError> {
    let key = password_key(password)?;
    let mut iv = [0u8; BLOCK];
    OsRng.fill_bytes(&mut iv);

    let mut buf = Vec::with_capacity(BLOCK + seed.len());
    buf.extend_from_slice(&iv);
    buf.extend_from_slice(seed.as_bytes());
    Aes128CfbEnc::new(&(*key).into(), &iv.into()).encrypt(&mut buf[BLOCK..]);

    Ok(base32::encode(ALPHABET, &buf))
}

/// Reverses [`encrypt_seed`].
///
/// A wrong password does not fail here; it yields a different seed and the
/// code check fails instead, unless the result is not valid UTF-8.
pub fn decrypt_seed(encrypted: &str, password: &str) -> Result<String, OtpError> {
    let key = password_key(password)?;
    let mut buf = Zeroizing::new(
        base32::decode(ALPHABET, encrypted.trim()).ok_or(OtpError::InvalidEncoding)?,
    );
    if buf.len() < BLOCK {
        return Err(OtpError::CiphertextTooShort);
    }

    let (iv, ciphertext) = buf.split_at_mut(BLOCK);
    let iv: [u8; BLOCK] = (&*iv).try_into().map_err(|_| OtpError::CiphertextTooShort)?;
    Aes128CfbDec::new(&(*key).into(), &iv.into()).decrypt(ciphertext);

    String::from_utf8(ciphertext.to_vec()).map_err(|_| OtpError::InvalidSeed)
}

/// Computes the code for `step` (unix time divided by [`STEP_SECONDS`]).
pub fn generate_code(seed: &str, step: u64) -> Result<String, OtpError> {
    let secret =
        Zeroizing::new(base32::decode(ALPHABET, seed.trim()).ok_or(OtpError::InvalidEncoding)?);

    let mut mac = <HmacSha1 as Mac>::new_from_slice(&secret).map_err(|_| OtpError::InvalidSeed)?;
    mac.update(&step.to_be_bytes());
    let sum = mac.finalize().into_bytes();

    let offset = usize::from(sum[sum.len() - 1] & 0x0f);
    let value = u32::from_be_bytes([sum[offset], sum[offset + 1], sum[offset + 2], sum[offset + 3]])
        & 0x7fff_ffff;

    Ok(format!(
        "{:0width$}",
        value % 10u32.pow(DIGITS),
        width = DIGITS as usize
    ))
}

/// Time step containing `unix_secs`.
pub fn time_step(unix_secs: u64) -> u64 {
    unix_secs / STEP_SECONDS
}

/// Time step containing the current wall-clock time.
pub fn current_step() -> u64 {
    time_step(unix_now())
}

/// Checks `code` against the step for `unix_secs` and the step before it.
pub fn verify_code(seed: &str, code: &str, unix_secs: u64) -> Result<bool, OtpError> {
    let step = time_step(unix_secs);
    for candidate in [Some(step), step.checked_sub(1)].into_iter().flatten() {
        let expected = generate_code(seed, candidate)?;
        if bool::from(expected.as_bytes().ct_eq(code.as_bytes())) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `otpauth://` URI for enrolling `seed` in an authenticator app.
pub fn provision_uri(seed: &str) -> String {
    format!("otpauth://totp/{ISSUER}?secret={seed}&issuer={ISSUER}")
}

fn password_key(password: &str) -> Result<Zeroizing<[u8; BLOCK]>, OtpError> {
    if password.is_empty() {
        return Err(OtpError::EmptyPassword);
    }
    let mut key = Zeroizing::new([0u8; BLOCK]);
    for (slot, byte) in key.iter_mut().zip(password.as_bytes().iter().cycle()) {
        *slot = *byte;
    }
    Ok(key)
}
