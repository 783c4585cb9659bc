//! MessagePack codec helpers.
//!
//! Two deliberate choices on top of plain msgpack:
//! - struct-map mode, so field names travel on the wire and a peer built
//!   against a different struct layout still decodes by name;
//! - human-readable mode, so ids (uuids) encode as their string forms and
//!   stay opaque to heterogeneous implementations. Byte payloads still use
//!   the msgpack bin format via `serde_bytes`.

use std::io::Cursor;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Errors during wire encode/decode.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a wire message.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut buf)
        .with_struct_map()
        .with_human_readable();
    msg.serialize(&mut ser)?;
    Ok(buf)
}

/// Decode a wire message.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    let mut de = rmp_serde::Deserializer::new(Cursor::new(bytes)).with_human_readable();
    Ok(T::deserialize(&mut de)?)
}
