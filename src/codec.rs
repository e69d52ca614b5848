//! The binary inform frame: fixed header, AES-CBC/GCM body encryption, and
//! optional zlib/Snappy payload compression. `decode`/`encode` are the only
//! entry points; everything else here is a helper for them.

use std::fmt;
use std::io::{Read, Write};

use crate::crypto::{self, CryptoError};
use crate::keybag::{format_mac, KeyBag};

pub const MAGIC: u32 = 0x544E_4255; // "TNBU"
pub const DEFAULT_VERSION: u32 = 0;
pub const DEFAULT_DATA_VERSION: u32 = 1;

pub const FLAG_ENCRYPTED: u16 = 0x01;
pub const FLAG_ZLIB: u16 = 0x02;
pub const FLAG_SNAPPY: u16 = 0x04;
pub const FLAG_GCM: u16 = 0x08;

const IV_SIZE: usize = 16;
const MAC_SIZE: usize = 6;

/// One inform frame: the fixed header plus a decoded (decrypted,
/// decompressed) JSON payload. A `Frame` only exists for the duration of
/// one codec/reconcile cycle; it is never persisted.
#[derive(Debug, Clone)]
pub struct Frame {
    pub version: u32,
    pub mac: [u8; 6],
    pub flags: u16,
    pub iv: [u8; 16],
    pub data_version: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(mac: [u8; 6]) -> Self {
        Frame {
            version: DEFAULT_VERSION,
            mac,
            flags: 0,
            iv: [0u8; 16],
            data_version: DEFAULT_DATA_VERSION,
            payload: Vec::new(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_gcm(&self) -> bool {
        self.flags & FLAG_GCM != 0
    }

    pub fn is_zlib(&self) -> bool {
        self.flags & FLAG_ZLIB != 0
    }

    pub fn is_snappy(&self) -> bool {
        self.flags & FLAG_SNAPPY != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.is_zlib() || self.is_snappy()
    }

    pub fn set_encrypted(&mut self, on: bool) {
        if on {
            self.flags |= FLAG_ENCRYPTED;
        } else {
            self.flags &= !FLAG_ENCRYPTED;
        }
    }

    pub fn formatted_mac(&self) -> String {
        format_mac(&self.mac)
    }
}

#[derive(Debug)]
pub enum CodecError {
    InvalidMagic(u32),
    TruncatedFrame,
    NoKey(String),
    PaddingError,
    DecryptError,
    DecompressError(String),
    PayloadNotEncrypted,
    MultipleCompressionFlags,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidMagic(v) => write!(f, "Invalid magic number: {v:#010x}"),
            CodecError::TruncatedFrame => write!(f, "Frame is truncated"),
            CodecError::NoKey(mac) => write!(f, "No key found for device {mac}"),
            CodecError::PaddingError => write!(f, "PKCS#7 padding invalid"),
            CodecError::DecryptError => write!(f, "Decryption failed"),
            CodecError::DecompressError(msg) => write!(f, "Decompression failed: {msg}"),
            CodecError::PayloadNotEncrypted => {
                write!(f, "Decrypt requested on a frame without the encrypted flag")
            }
            CodecError::MultipleCompressionFlags => {
                write!(f, "Frame sets both ZLIB and SNAPPY compression flags")
            }
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CryptoError> for CodecError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::PaddingError => CodecError::PaddingError,
            CryptoError::DecryptError | CryptoError::InvalidKeyLength(_) => CodecError::DecryptError,
        }
    }
}

/// Re-serialize the fixed header in wire order. Used both to write the
/// frame and, for GCM frames, as the AEAD associated data.
fn serialize_header(
    version: u32,
    mac: &[u8; 6],
    flags: u16,
    iv: &[u8; 16],
    data_version: u32,
    data_length: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 + MAC_SIZE + 2 + IV_SIZE + 4 + 4);
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&version.to_be_bytes());
    out.extend_from_slice(mac);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(iv);
    out.extend_from_slice(&data_version.to_be_bytes());
    out.extend_from_slice(&data_length.to_be_bytes());
    out
}

fn decompress(flags: u16, body: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    let zlib = flags & FLAG_ZLIB != 0;
    let snappy = flags & FLAG_SNAPPY != 0;
    if zlib && snappy {
        return Err(CodecError::MultipleCompressionFlags);
    }
    if zlib {
        let mut decoder = flate2::read::ZlibDecoder::new(&body[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecompressError(e.to_string()))?;
        Ok(out)
    } else if snappy {
        snap::raw::Decoder::new()
            .decompress_vec(&body)
            .map_err(|e| CodecError::DecompressError(e.to_string()))
    } else {
        Ok(body)
    }
}

fn compress_if_needed(flags: u16, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let zlib = flags & FLAG_ZLIB != 0;
    let snappy = flags & FLAG_SNAPPY != 0;
    if zlib && snappy {
        return Err(CodecError::MultipleCompressionFlags);
    }
    if zlib {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(payload)
            .map_err(|e| CodecError::DecompressError(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::DecompressError(e.to_string()))
    } else if snappy {
        snap::raw::Encoder::new()
            .compress_vec(payload)
            .map_err(|e| CodecError::DecompressError(e.to_string()))
    } else {
        Ok(payload.to_vec())
    }
}

/// Decode a complete inform frame from `reader`: read the header, resolve
/// the key, decrypt (CBC or GCM per flags), decompress, and return the
/// `Frame` with its plaintext JSON payload.
pub fn decode<R: Read>(reader: &mut R, keys: &dyn KeyBag) -> Result<Frame, CodecError> {
    let mut magic_buf = [0u8; 4];
    reader
        .read_exact(&mut magic_buf)
        .map_err(|_| CodecError::TruncatedFrame)?;
    let magic = u32::from_be_bytes(magic_buf);
    if magic != MAGIC {
        return Err(CodecError::InvalidMagic(magic));
    }

    let mut version_buf = [0u8; 4];
    reader
        .read_exact(&mut version_buf)
        .map_err(|_| CodecError::TruncatedFrame)?;
    let version = u32::from_be_bytes(version_buf);

    let mut mac = [0u8; MAC_SIZE];
    reader.read_exact(&mut mac).map_err(|_| CodecError::TruncatedFrame)?;

    let mut flags_buf = [0u8; 2];
    reader
        .read_exact(&mut flags_buf)
        .map_err(|_| CodecError::TruncatedFrame)?;
    let flags = u16::from_be_bytes(flags_buf);

    let mut iv = [0u8; IV_SIZE];
    reader.read_exact(&mut iv).map_err(|_| CodecError::TruncatedFrame)?;

    let mut data_version_buf = [0u8; 4];
    reader
        .read_exact(&mut data_version_buf)
        .map_err(|_| CodecError::TruncatedFrame)?;
    let data_version = u32::from_be_bytes(data_version_buf);

    let mut data_length_buf = [0u8; 4];
    reader
        .read_exact(&mut data_length_buf)
        .map_err(|_| CodecError::TruncatedFrame)?;
    let data_length = u32::from_be_bytes(data_length_buf) as usize;

    let mut body = vec![0u8; data_length];
    reader.read_exact(&mut body).map_err(|_| CodecError::TruncatedFrame)?;

    let plaintext = if flags & FLAG_ENCRYPTED != 0 {
        let mac_str = format_mac(&mac);
        let hex_key = keys.key_for(&mac_str).ok_or_else(|| CodecError::NoKey(mac_str.clone()))?;
        let key = crypto::decode_hex_key(hex_key)?;

        if flags & FLAG_GCM != 0 {
            let header = serialize_header(version, &mac, flags, &iv, data_version, data_length as u32);
            let mut buf = body;
            crypto::gcm_decrypt(&mut buf, &key, &iv, &header)?;
            if buf.len() < 16 {
                return Err(CodecError::DecryptError);
            }
            let trimmed_len = buf.len() - 16;
            buf.truncate(trimmed_len);
            buf
        } else {
            crypto::cbc_decrypt(&body, &key, &iv)?
        }
    } else {
        body
    };

    let payload = decompress(flags, plaintext)?;

    Ok(Frame {
        version,
        mac,
        flags,
        iv,
        data_version,
        payload,
    })
}

/// Encode a `Frame` to wire bytes: compress (if flagged), then encrypt (if
/// flagged; CBC only — GCM is a read-path-only compatibility feature). The
/// reconciler never sets a compression flag on reply frames, but the
/// codec supports it for any caller that builds a compressed frame directly.
pub fn encode(frame: &Frame, keys: &dyn KeyBag) -> Result<Vec<u8>, CodecError> {
    let compressed = compress_if_needed(frame.flags, &frame.payload)?;

    let mut iv;
    let body = if frame.is_encrypted() {
        let mac_str = frame.formatted_mac();
        let hex_key = keys
            .key_for(&mac_str)
            .ok_or_else(|| CodecError::NoKey(mac_str.clone()))?;
        let key = crypto::decode_hex_key(hex_key)?;
        iv = crypto::generate_iv();
        crypto::cbc_encrypt(&compressed, &key, &iv)
    } else {
        iv = [0u8; 16];
        compressed
    };

    let data_length = body.len() as u32;
    let mut out = serialize_header(frame.version, &frame.mac, frame.flags, &iv, frame.data_version, data_length);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keybag::MapKeyBag;
    use std::io::Cursor;

    fn test_keybag() -> MapKeyBag {
        let mut bag = MapKeyBag::new();
        bag.insert("aa:bb:cc:dd:ee:ff", "00112233445566778899aabbccddeeff");
        bag
    }

    #[test]
    fn encode_decode_roundtrip_encrypted() {
        let keys = test_keybag();
        let mut frame = Frame::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        frame.set_encrypted(true);
        frame.payload = br#"{"_type":"noop","interval":10,"server_time_in_utc":"0"}"#.to_vec();

        let wire = encode(&frame, &keys).unwrap();
        let mut cursor = Cursor::new(wire);
        let decoded = decode(&mut cursor, &keys).unwrap();

        assert_eq!(decoded.payload, frame.payload);
        assert_eq!(decoded.mac, frame.mac);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let keys = test_keybag();
        let mut bytes = vec![0u8; 50];
        bytes[0] = 0xff; // corrupt magic
        let mut cursor = Cursor::new(bytes);
        match decode(&mut cursor, &keys) {
            Err(CodecError::InvalidMagic(_)) => {}
            other => panic!("expected InvalidMagic, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_unknown_mac() {
        let keys = MapKeyBag::new(); // empty
        let mut frame = Frame::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        frame.set_encrypted(true);
        frame.payload = b"{}".to_vec();

        // Build with a bag that *has* the key, then decode with the empty one.
        let mut signing_bag = MapKeyBag::new();
        signing_bag.insert("11:22:33:44:55:66", "00112233445566778899aabbccddeeff");
        let wire = encode(&frame, &signing_bag).unwrap();

        let mut cursor = Cursor::new(wire);
        match decode(&mut cursor, &keys) {
            Err(CodecError::NoKey(mac)) => assert_eq!(mac, "11:22:33:44:55:66"),
            other => panic!("expected NoKey, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let keys = test_keybag();
        let mut cursor = Cursor::new(vec![0u8; 10]);
        match decode(&mut cursor, &keys) {
            Err(CodecError::TruncatedFrame) | Err(CodecError::InvalidMagic(_)) => {}
            other => panic!("expected TruncatedFrame/InvalidMagic, got {other:?}"),
        }
    }

    #[test]
    fn decode_gcm_trims_trailing_16_bytes() {
        use crate::crypto::decode_hex_key;
        use aes_gcm::aead::generic_array::typenum::U16;
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::AeadInPlace;
        use aes_gcm::{AesGcm, KeyInit};

        let keys = test_keybag();
        let key = decode_hex_key("00112233445566778899aabbccddeeff").unwrap();
        let nonce = [0x07u8; 16];
        let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        let flags = FLAG_ENCRYPTED | FLAG_GCM;
        let version = DEFAULT_VERSION;
        let data_version = DEFAULT_DATA_VERSION;

        let plaintext = b"{\"_type\":\"noop\",\"interval\":10}".to_vec();
        let mut padded_plaintext = plaintext.clone();
        padded_plaintext.extend_from_slice(&[0u8; 16]); // the "garbage" trailing block

        // data_length is fixed before encryption: GCM appends a 16-byte tag,
        // so the on-the-wire length is known in advance and must match what
        // the decoder reconstructs for the associated data to verify.
        let data_length = (padded_plaintext.len() + 16) as u32;
        let header_for_aad = serialize_header(version, &mac, flags, &nonce, data_version, data_length);
        let cipher = AesGcm::<aes::Aes128, U16>::new(GenericArray::from_slice(&key));
        let nonce_ga = GenericArray::<u8, U16>::from_slice(&nonce);
        let mut buf = padded_plaintext.clone();
        cipher.encrypt_in_place(nonce_ga, &header_for_aad[..], &mut buf).unwrap();
        assert_eq!(buf.len() as u32, data_length);

        let mut wire = serialize_header(version, &mac, flags, &nonce, data_version, data_length);
        wire.extend_from_slice(&buf);

        let mut cursor = Cursor::new(wire);
        let decoded = decode(&mut cursor, &keys).unwrap();
        assert_eq!(decoded.payload, plaintext);
    }
}
