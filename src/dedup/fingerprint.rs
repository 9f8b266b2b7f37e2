//! Content fingerprinting
//!
//! SHA-256 over the complete byte stream, hex-encoded. The fingerprint is the
//! deduplication key: identical bytes always produce the same value.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer for streaming digests
const READ_BUF_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 digest of a payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a stored fingerprint, rejecting anything that is not 64 hex chars
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Fingerprint a byte stream, consuming it to the end
pub async fn fingerprint_reader<R>(mut reader: R) -> std::io::Result<Fingerprint>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Fingerprint a file on disk
pub async fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let file = tokio::fs::File::open(path).await?;
    fingerprint_reader(file).await
}
