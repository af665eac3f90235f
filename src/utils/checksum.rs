use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::models::ChecksumInfo;

/// Algorithms advertised via `Tus-Checksum-Algorithm`.
pub const SUPPORTED_ALGORITHMS: &str = "sha256";

/// A checksum the client declared for one chunk, parsed from the
/// `Upload-Checksum` header (`<algorithm> <base64 digest>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: String,
    /// Hex-encoded expected digest.
    pub digest: String,
}

impl Checksum {
    pub fn parse_header(value: &str) -> Result<Self, String> {
        let (algorithm, encoded) = value
            .trim()
            .split_once(' ')
            .ok_or_else(|| "expected '<algorithm> <base64 digest>'".to_string())?;

        if algorithm != "sha256" {
            return Err(format!(
                "unsupported checksum algorithm '{algorithm}', supported: {SUPPORTED_ALGORITHMS}"
            ));
        }

        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64 digest: {e}"))?;
        if raw.len() != 32 {
            return Err(format!(
                "sha256 digest must be 32 bytes, got {}",
                raw.len()
            ));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            digest: hex::encode(raw),
        })
    }

    pub fn info(&self) -> ChecksumInfo {
        ChecksumInfo {
            algorithm: self.algorithm.clone(),
            digest: self.digest.clone(),
        }
    }
}

/// Incremental SHA-256 over a streamed chunk. Backends feed it from their
/// read loops so the digest is ready the moment the stream is drained.
pub struct StreamingHasher {
    inner: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Hex-encoded digest of everything fed so far.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}
