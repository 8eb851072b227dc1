// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic framing and CBOR helpers for the worker session socket.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is the CBOR encoding of one [`Command`] or [`DispatchOutcome`]
//! * LENGTH is the payload byte count, big-endian
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Command, DispatchOutcome, ProtoError};

/// Protocol magic constant "SKN!".
pub const MAGIC: [u8; 4] = [0x53, 0x4b, 0x4e, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (zero for v1).
pub const FLAGS: u16 = 0x0000;

/// Header length in bytes.
const HEADER_LEN: usize = 12;
/// Checksum length in bytes.
const CHECKSUM_LEN: usize = 32;

/// Encode any wire value to CBOR bytes.
///
/// # Errors
/// [`ProtoError::Encode`] when serialization fails.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtoError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode any wire value from CBOR bytes.
///
/// # Errors
/// [`ProtoError::Decode`] when the bytes are not a valid encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    ciborium::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// A full packet (header + payload + checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw header (12 bytes).
    pub header: [u8; HEADER_LEN],
    /// CBOR payload bytes.
    pub payload: Vec<u8>,
    /// blake3 checksum over header||payload.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Packet {
    /// Build a packet from a CBOR payload.
    pub fn from_payload(payload: Vec<u8>) -> Self {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        header[8..12].copy_from_slice(&len.to_be_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);
        let checksum = *hasher.finalize().as_bytes();

        Packet {
            header,
            payload,
            checksum,
        }
    }

    /// Encode a wire value into a full packet byte vector.
    ///
    /// # Errors
    /// [`ProtoError::Encode`] when CBOR serialization fails.
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtoError> {
        let payload = to_cbor(value)?;
        let packet = Packet::from_payload(payload);
        let mut out =
            Vec::with_capacity(packet.header.len() + packet.payload.len() + packet.checksum.len());
        out.extend_from_slice(&packet.header);
        out.extend_from_slice(&packet.payload);
        out.extend_from_slice(&packet.checksum);
        Ok(out)
    }

    /// Decode a wire value from a byte slice, returning it and the bytes
    /// consumed.
    ///
    /// # Errors
    /// [`ProtoError::Frame`] on framing violations, [`ProtoError::Decode`]
    /// when the payload is not a valid encoding of `T`.
    #[allow(clippy::cast_possible_truncation)] // length field is 32-bit
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), ProtoError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(ProtoError::Frame("incomplete packet"));
        }
        if bytes[0..4] != MAGIC {
            return Err(ProtoError::Frame("bad magic"));
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(ProtoError::Frame("unsupported version"));
        }
        let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        if bytes.len() < HEADER_LEN + len + CHECKSUM_LEN {
            return Err(ProtoError::Frame("incomplete payload"));
        }
        let header = &bytes[0..HEADER_LEN];
        let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
        let checksum = &bytes[HEADER_LEN + len..HEADER_LEN + len + CHECKSUM_LEN];

        // Verify checksum
        let mut hasher = Hasher::new();
        hasher.update(header);
        hasher.update(payload);
        let expect = hasher.finalize();
        if expect.as_bytes() != checksum {
            return Err(ProtoError::Frame("checksum mismatch"));
        }

        let value: T = from_cbor(payload)?;
        Ok((value, HEADER_LEN + len + CHECKSUM_LEN))
    }
}

/// Encode one [`Command`] as a packet.
///
/// # Errors
/// [`ProtoError::Encode`] when CBOR serialization fails.
pub fn encode_command(cmd: &Command) -> Result<Vec<u8>, ProtoError> {
    Packet::encode(cmd)
}

/// Decode one [`Command`], returning it and the bytes consumed.
///
/// # Errors
/// See [`Packet::decode`].
pub fn decode_command(bytes: &[u8]) -> Result<(Command, usize), ProtoError> {
    Packet::decode(bytes)
}

/// Encode one [`DispatchOutcome`] as a packet.
///
/// # Errors
/// [`ProtoError::Encode`] when CBOR serialization fails.
pub fn encode_outcome(outcome: &DispatchOutcome) -> Result<Vec<u8>, ProtoError> {
    Packet::encode(outcome)
}

/// Decode one [`DispatchOutcome`], returning it and the bytes consumed.
///
/// # Errors
/// See [`Packet::decode`].
pub fn decode_outcome(bytes: &[u8]) -> Result<(DispatchOutcome, usize), ProtoError> {
    Packet::decode(bytes)
}

// --- Unit tests -----------------------------------------------------------
