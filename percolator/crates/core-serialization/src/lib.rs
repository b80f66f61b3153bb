//! Wire helpers for payloads exchanged between engine instances.
//!
//! Replication frames are bincode with a small header (magic + version) so a
//! peer running an incompatible build rejects the frame instead of decoding
//! garbage.

use anyhow::{Context, Result, bail};
use core_types::{FilterId, Namespace};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Frame magic, "PRCL".
pub const FRAME_MAGIC: [u8; 4] = *b"PRCL";
/// Bumped whenever a replicated type changes shape.
pub const WIRE_VERSION: u16 = 1;

const HEADER_LEN: usize = FRAME_MAGIC.len() + 2;

/// Identifies one filter across instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterRef {
    pub namespace: Namespace,
    pub id: FilterId,
}

/// Serialize a value to bincode.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context("bincode serialize")
}

/// Deserialize a value from bincode.
pub fn from_bincode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context("bincode deserialize")
}

/// Encode `value` as a versioned frame.
pub fn to_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let body = to_bincode(value)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&WIRE_VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a frame produced by [`to_frame`], checking magic and version.
pub fn from_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        bail!("frame too short: {} bytes", bytes.len());
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if header[..FRAME_MAGIC.len()] != FRAME_MAGIC {
        bail!("not a replication frame");
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != WIRE_VERSION {
        bail!("unsupported frame version {version}, expected {WIRE_VERSION}");
    }
    from_bincode(body).context("frame body")
}
