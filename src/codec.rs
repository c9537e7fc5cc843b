//! Snapshot encoding helpers
//!
//! - gzip compression of serialized records
//! - SHA-256 checksums for integrity verification
//! - base64 transport encoding for the remote store

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Compute SHA-256 hash of data as lowercase hex
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compress bytes with gzip
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress gzip bytes
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encode bytes to base64 string (for transmission)
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes
pub fn decode_base64(data: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// A compressed, hashed snapshot of a serializable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSnapshot {
    pub payload: Vec<u8>,
    pub hash: String,
}

/// Serialize, compress and hash a value
///
/// The hash covers the compressed payload, so it can be verified without
/// decompressing.
pub fn seal<T: Serialize>(value: &T) -> Result<SealedSnapshot, CodecError> {
    let json = serde_json::to_vec(value)?;
    let payload = gzip_compress(&json)?;
    let hash = compute_sha256(&payload);
    Ok(SealedSnapshot { payload, hash })
}

/// Verify, decompress and deserialize a sealed snapshot
pub fn open<T: DeserializeOwned>(payload: &[u8], expected_hash: &str) -> Result<T, CodecError> {
    let actual = compute_sha256(payload);
    if actual != expected_hash {
        return Err(CodecError::ChecksumMismatch {
            expected: expected_hash.to_string(),
            actual,
        });
    }
    let json = gzip_decompress(payload)?;
    Ok(serde_json::from_slice(&json)?)
}
