//! Content addressing for probe payloads
//!
//! Every probe writes a fixed-size blob of random bytes keyed by the BLAKE3
//! digest of its own content. The key therefore doubles as an integrity check:
//! a payload read back under a key must hash to that key.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hex::FromHexError;
use rand::RngCore;
use thiserror::Error;

/// Default payload size in bytes
pub const DEFAULT_PAYLOAD_SIZE: usize = 10_000;

/// BLAKE3 digest identifying a payload
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobKey(pub [u8; 32]);

impl BlobKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short prefix used in log lines
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.short())
    }
}

/// Error parsing a hex-encoded key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("expected 64 hex characters, got {0}")]
    Length(usize),
    #[error("invalid hex digit at position {0}")]
    Digit(usize),
}

impl FromStr for BlobKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(KeyParseError::Length(s.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|e| match e {
            FromHexError::InvalidHexCharacter { index, .. } => KeyParseError::Digit(index),
            _ => KeyParseError::Length(s.len()),
        })?;
        Ok(BlobKey(out))
    }
}

/// Compute the content key of `bytes`
pub fn blob_key(bytes: &[u8]) -> BlobKey {
    BlobKey(*blake3::hash(bytes).as_bytes())
}

/// Immutable payload bytes
///
/// Cloning is cheap; the coordinator and every worker see the same allocation.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Payload(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Content key of these bytes
    pub fn key(&self) -> BlobKey {
        blob_key(&self.0)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::new(bytes)
    }
}

/// Produces random fixed-size payloads together with their keys
///
/// Holds no mutable state; each call draws from the calling thread's RNG so it
/// can be shared freely across workers.
#[derive(Debug, Clone, Copy)]
pub struct ContentAddresser {
    size: usize,
}

impl ContentAddresser {
    pub fn new(size: usize) -> Self {
        ContentAddresser { size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Generate a new payload and its content key
    pub fn generate(&self) -> (Payload, BlobKey) {
        let mut bytes = vec![0u8; self.size];
        rand::rng().fill_bytes(&mut bytes);
        let key = blob_key(&bytes);
        (Payload::new(bytes), key)
    }
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self::new(DEFAULT_PAYLOAD_SIZE)
    }
}
