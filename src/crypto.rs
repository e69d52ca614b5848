//! AES-CBC and AES-GCM primitives for the inform wire codec, plus the
//! PKCS#7 padding helpers the CBC path needs. Kept as pure functions over
//! byte slices so the codec module stays the only place that knows about
//! frame layout.

use aes::Aes128;
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::AesGcm;
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use rand::RngCore;
use std::fmt;

pub const AES_BLOCK_SIZE: usize = 16;
pub const GCM_NONCE_SIZE: usize = 16;
pub const GCM_TAG_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128Gcm16 = AesGcm<Aes128, U16>;

#[derive(Debug)]
pub enum CryptoError {
    InvalidKeyLength(usize),
    PaddingError,
    DecryptError,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidKeyLength(n) => {
                write!(f, "AES key must decode to 16 bytes, got {n}")
            }
            CryptoError::PaddingError => write!(f, "PKCS#7 padding invalid"),
            CryptoError::DecryptError => write!(f, "AES decryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Decode a hex-encoded AES-128 key (as stored in the KeyBag) into 16 raw
/// bytes.
pub fn decode_hex_key(hex_key: &str) -> Result<[u8; 16], CryptoError> {
    let raw = hex::decode(hex_key).map_err(|_| CryptoError::InvalidKeyLength(0))?;
    raw.try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKeyLength(v.len()))
}

/// PKCS#7-pad `src` to a multiple of `block_size`. Always appends at least
/// one byte, even if `src` is already block-aligned (a full padding block
/// is added), matching the reference encoder.
pub fn pad(src: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (src.len() % block_size);
    let mut out = Vec::with_capacity(src.len() + pad_len);
    out.extend_from_slice(src);
    out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    out
}

/// Strip and validate PKCS#7 padding. Rejects a padding length of zero, one
/// exceeding `block_size`, or one exceeding `src`'s own length.
pub fn unpad(src: &[u8], block_size: usize) -> Result<Vec<u8>, CryptoError> {
    let src_len = src.len();
    if src_len == 0 {
        return Err(CryptoError::PaddingError);
    }
    let pad_len = src[src_len - 1] as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > src_len {
        return Err(CryptoError::PaddingError);
    }
    if src[src_len - pad_len..].iter().any(|&b| b as usize != pad_len) {
        return Err(CryptoError::PaddingError);
    }
    Ok(src[..src_len - pad_len].to_vec())
}

/// Generate a fresh 16-byte IV from a cryptographic RNG.
pub fn generate_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// AES-128-CBC encrypt `plaintext` under `key`/`iv`, PKCS#7-padding first.
pub fn cbc_encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    let mut buf = pad(plaintext, AES_BLOCK_SIZE);
    let len = buf.len();
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .expect("buffer is block-aligned by construction")
        .to_vec()
}

/// AES-128-CBC decrypt `ciphertext` under `key`/`iv`, then strip and
/// validate PKCS#7 padding.
pub fn cbc_decrypt(ciphertext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(CryptoError::DecryptError);
    }
    let mut buf = ciphertext.to_vec();
    let decrypted = Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::DecryptError)?;
    unpad(decrypted, AES_BLOCK_SIZE)
}

/// AES-128-GCM decrypt in place with a non-standard 16-byte nonce and the
/// given associated data. `ciphertext` must include the trailing 16-byte
/// authentication tag; on success it is truncated down to the plaintext.
pub fn gcm_decrypt(
    ciphertext: &mut Vec<u8>,
    key: &[u8; 16],
    nonce: &[u8; 16],
    associated_data: &[u8],
) -> Result<(), CryptoError> {
    let cipher = Aes128Gcm16::new(GenericArray::from_slice(key));
    let nonce = GenericArray::<u8, U16>::from_slice(nonce);
    cipher
        .decrypt_in_place(nonce, associated_data, ciphertext)
        .map_err(|_| CryptoError::DecryptError)
}
