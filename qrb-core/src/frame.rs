//! Stream framing: length, flags, cipher parameters and checksum in front of
//! the (optionally compressed, then encrypted) payload.
//!
//! Layout, little endian:
//!
//! ```text
//! original_length u64 | compressed u8 | encrypted u8 | salt ‖ nonce (encrypted only) | checksum [32] | payload
//! ```
//!
//! The checksum is BLAKE3 over `original_length ‖ raw`, i.e. over the bytes the
//! user handed in, so restore verifies the input independently of the
//! chunking and erasure layers.

use crate::cipher::{Cipher, PasswordCipher};
use crate::compress::{Compressor, ZstdCompressor};
use crate::error::{QrbError, Result};
use tracing::{debug, warn};

pub const CHECKSUM_LEN: usize = 32;
/// Header length without cipher parameters.
pub const FIXED_HEADER_LEN: usize = 8 + 1 + 1 + CHECKSUM_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    pub original_length: u64,
    pub compressed: bool,
    pub encrypted: bool,
    /// `salt ‖ nonce`; empty unless `encrypted`.
    pub cipher_params: Vec<u8>,
    pub stream_checksum: [u8; CHECKSUM_LEN],
}

impl StreamHeader {
    pub fn encoded_len(&self) -> usize {
        FIXED_HEADER_LEN + self.cipher_params.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.original_length.to_le_bytes());
        out.push(self.compressed as u8);
        out.push(self.encrypted as u8);
        out.extend_from_slice(&self.cipher_params);
        out.extend_from_slice(&self.stream_checksum);
    }

    /// Parses a header from the front of `bytes` and returns the rest as payload.
    /// `params_len` is the cipher parameter length used when the encrypted flag is set.
    pub fn decode(bytes: &[u8], params_len: usize) -> Result<(Self, &[u8])> {
        if bytes.len() < FIXED_HEADER_LEN {
            return Err(QrbError::IntegrityError(format!(
                "stream is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        let mut len8 = [0u8; 8];
        len8.copy_from_slice(&bytes[0..8]);
        let original_length = u64::from_le_bytes(len8);
        let compressed = decode_flag(bytes[8], "compressed")?;
        let encrypted = decode_flag(bytes[9], "encrypted")?;

        let params_len = if encrypted { params_len } else { 0 };
        let header_len = FIXED_HEADER_LEN + params_len;
        if bytes.len() < header_len {
            return Err(QrbError::IntegrityError("stream truncated inside header".into()));
        }
        let cipher_params = bytes[10..10 + params_len].to_vec();
        let mut stream_checksum = [0u8; CHECKSUM_LEN];
        stream_checksum.copy_from_slice(&bytes[10 + params_len..header_len]);

        let header =
            StreamHeader { original_length, compressed, encrypted, cipher_params, stream_checksum };
        Ok((header, &bytes[header_len..]))
    }

    /// First eight hex digits of the checksum, as printed on page labels.
    pub fn short_id(&self) -> String {
        blake3::Hash::from(self.stream_checksum).to_hex().as_str()[..8].to_string()
    }
}

fn decode_flag(b: u8, name: &str) -> Result<bool> {
    match b {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(QrbError::IntegrityError(format!("bad {name} flag {other:#04x}"))),
    }
}

pub fn stream_checksum(raw: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut h = blake3::Hasher::new();
    h.update(&(raw.len() as u64).to_le_bytes());
    h.update(raw);
    *h.finalize().as_bytes()
}

/// Stream framer over pluggable compression and encryption.
pub struct Framer {
    compressor: Box<dyn Compressor>,
    cipher: Box<dyn Cipher>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(Box::new(ZstdCompressor::default()), Box::new(PasswordCipher))
    }
}

impl Framer {
    pub fn new(compressor: Box<dyn Compressor>, cipher: Box<dyn Cipher>) -> Self {
        Self { compressor, cipher }
    }

    pub fn params_len(&self) -> usize {
        self.cipher.params_len()
    }

    /// Compresses (optional) then encrypts (when a password is given).
    pub fn frame(
        &self,
        raw: &[u8],
        compress: bool,
        password: Option<&str>,
    ) -> Result<(StreamHeader, Vec<u8>)> {
        if password.is_some_and(str::is_empty) {
            return Err(QrbError::InvalidConfig("password must not be empty".into()));
        }
        let checksum = stream_checksum(raw);
        let mut payload = if compress { self.compressor.compress(raw)? } else { raw.to_vec() };

        let mut cipher_params = Vec::new();
        if let Some(pw) = password {
            let (params, ciphertext) = self.cipher.seal(pw, &payload)?;
            cipher_params = params;
            payload = ciphertext;
        }
        debug!(
            original = raw.len(),
            framed = payload.len(),
            compress,
            encrypted = password.is_some(),
            "framed stream"
        );
        let header = StreamHeader {
            original_length: raw.len() as u64,
            compressed: compress,
            encrypted: password.is_some(),
            cipher_params,
            stream_checksum: checksum,
        };
        Ok((header, payload))
    }

    /// `frame`, then header and payload concatenated into one byte stream.
    pub fn frame_stream(
        &self,
        raw: &[u8],
        compress: bool,
        password: Option<&str>,
    ) -> Result<(StreamHeader, Vec<u8>)> {
        let (header, payload) = self.frame(raw, compress, password)?;
        let mut out = Vec::with_capacity(header.encoded_len() + payload.len());
        header.encode_into(&mut out);
        out.extend_from_slice(&payload);
        Ok((header, out))
    }

    /// Inverse of [`Framer::frame`]: decrypt, decompress, verify.
    pub fn unframe(
        &self,
        header: &StreamHeader,
        payload: &[u8],
        password: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut data = payload.to_vec();
        if header.encrypted {
            let pw = password.ok_or_else(|| {
                QrbError::DecryptError("backup is encrypted but no password was given".into())
            })?;
            data = self.cipher.open(pw, &header.cipher_params, &data)?;
        } else if password.is_some() {
            warn!("password given but backup is not encrypted; ignoring it");
        }
        if header.compressed {
            data = self.compressor.decompress(&data, header.original_length)?;
        }
        if data.len() as u64 != header.original_length {
            return Err(QrbError::IntegrityError(format!(
                "restored {} bytes, header declares {}",
                data.len(),
                header.original_length
            )));
        }
        if stream_checksum(&data) != header.stream_checksum {
            return Err(QrbError::IntegrityError("stream checksum mismatch".into()));
        }
        Ok(data)
    }

    pub fn unframe_stream(&self, framed: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
        let (header, payload) = StreamHeader::decode(framed, self.params_len())?;
        self.unframe(&header, payload, password)
    }
}
