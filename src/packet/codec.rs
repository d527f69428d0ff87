//! # Packet Codec
//!
//! Decodes and encodes peripheral packets. A packet has the layout
//!
//! ```text
//! +-----+---------+---------+-------------------+----------+
//! | tag | len_lo  | len_hi  | payload (len B)   | checksum |
//! +-----+---------+---------+-------------------+----------+
//! ```
//!
//! The checksum is the arithmetic sum modulo 256 of every preceding byte.
//! The transport hands over one complete packet per buffer; the codec keeps
//! no state between calls.
//!
//! ## Usage
//!
//! ```rust
//! use spirolink_rs::packet::codec::{decode, encode};
//! use spirolink_rs::packet::tag::PacketTag;
//! use spirolink_rs::session::types::TestType;
//!
//! let bytes = encode(0x02, &[0x10, 0x00, 0x0A, 0x00]);
//! let packet = decode(&bytes, TestType::Vc).unwrap();
//! assert_eq!(packet.tag(), PacketTag::Vc);
//! assert_eq!(packet.len(), 4);
//! ```

use crate::constants::{PACKET_CHECKSUM_SIZE, PACKET_HEADER_SIZE, PACKET_MIN_SIZE};
use crate::error::DecodeError;
use crate::packet::tag::{resolve_tag, PacketTag};
use crate::session::types::TestType;
use bytes::{BufMut, Bytes, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{le_u16, u8 as parse_u8};
use nom::IResult;

/// A validated packet. Only [`decode`] and [`RawPacket::new`] construct one,
/// so `length == payload.len()` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    tag: PacketTag,
    payload: Bytes,
    length: u16,
}

impl RawPacket {
    /// Builds a packet from an already resolved tag.
    ///
    /// Payloads longer than `u16::MAX` are truncated to the wire limit.
    pub fn new(tag: PacketTag, payload: impl Into<Bytes>) -> Self {
        let mut payload: Bytes = payload.into();
        if payload.len() > u16::MAX as usize {
            payload.truncate(u16::MAX as usize);
        }
        let length = payload.len() as u16;
        RawPacket {
            tag,
            payload,
            length,
        }
    }

    pub fn tag(&self) -> PacketTag {
        self.tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> u16 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Re-encodes the packet into wire bytes.
    pub fn to_bytes(&self) -> BytesMut {
        encode(self.tag.code(), &self.payload)
    }
}

/// Frame fields before checksum validation and tag resolution.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub code: u8,
    pub payload: &'a [u8],
    pub checksum: u8,
}

/// Uses `nom` to split a buffer into frame fields.
pub fn parse_frame(input: &[u8]) -> IResult<&[u8], Frame<'_>> {
    let (input, code) = parse_u8(input)?;
    let (input, length) = le_u16(input)?;
    let (input, payload) = take(length as usize)(input)?;
    let (input, checksum) = parse_u8(input)?;
    Ok((
        input,
        Frame {
            code,
            payload,
            checksum,
        },
    ))
}

/// Arithmetic checksum over the tag, length and payload bytes.
pub fn calculate_checksum(code: u8, payload: &[u8]) -> u8 {
    let length = (payload.len() as u16).to_le_bytes();
    let mut checksum = code.wrapping_add(length[0]).wrapping_add(length[1]);
    for byte in payload {
        checksum = checksum.wrapping_add(*byte);
    }
    checksum
}

/// Verifies the checksum of a parsed frame.
pub fn verify_frame(frame: &Frame<'_>) -> Result<(), DecodeError> {
    let calculated = calculate_checksum(frame.code, frame.payload);
    if frame.checksum != calculated {
        return Err(DecodeError::ChecksumMismatch {
            expected: frame.checksum,
            calculated,
        });
    }
    Ok(())
}

/// Decodes exactly one packet, resolving its tag in the context of the armed test.
pub fn decode(bytes: &[u8], context: TestType) -> Result<RawPacket, DecodeError> {
    if bytes.len() < PACKET_MIN_SIZE {
        return Err(DecodeError::Truncated {
            expected: PACKET_MIN_SIZE,
            actual: bytes.len(),
        });
    }

    let declared = u16::from_le_bytes([bytes[1], bytes[2]]) as usize
        + PACKET_HEADER_SIZE
        + PACKET_CHECKSUM_SIZE;
    if bytes.len() < declared {
        return Err(DecodeError::Truncated {
            expected: declared,
            actual: bytes.len(),
        });
    }
    if bytes.len() > declared {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let (_, frame) = parse_frame(bytes).map_err(|_| DecodeError::Truncated {
        expected: declared,
        actual: bytes.len(),
    })?;
    verify_frame(&frame)?;

    let tag = resolve_tag(context, frame.code).ok_or(DecodeError::UnknownTag(frame.code))?;
    Ok(RawPacket::new(tag, Bytes::copy_from_slice(frame.payload)))
}

/// Encodes a packet with the given wire code and payload.
pub fn encode(code: u8, payload: &[u8]) -> BytesMut {
    let payload = &payload[..payload.len().min(u16::MAX as usize)];
    let mut buf = BytesMut::with_capacity(payload.len() + PACKET_MIN_SIZE);
    buf.put_u8(code);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    buf.put_u8(calculate_checksum(code, payload));
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_includes_header() {
        // 0x02 + 0x01 + 0x00 + 0x05
        assert_eq!(calculate_checksum(0x02, &[0x05]), 0x08);
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(calculate_checksum(0xFF, &[0x02]), 0x02);
    }

    #[test]
    fn test_parse_frame_fields() {
        let bytes = [0x08, 0x02, 0x00, 0xAA, 0xBB, 0x0F];
        let (rest, frame) = parse_frame(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(frame.code, 0x08);
        assert_eq!(frame.payload, &[0xAA, 0xBB]);
        assert_eq!(frame.checksum, 0x0F);
    }

    #[test]
    fn test_empty_payload_packet() {
        let bytes = encode(0x00, &[]);
        assert_eq!(&bytes[..], &[0x00, 0x00, 0x00, 0x00]);
        let packet = decode(&bytes, TestType::None).unwrap();
        assert_eq!(packet.tag(), PacketTag::On);
        assert!(packet.is_empty());
    }
}
