//! Packet layer: framing, tag resolution and payload decoding.

pub mod codec;
pub mod payload;
pub mod tag;

pub use codec::{decode, encode, RawPacket};
pub use payload::{parse_body, Housekeeping, OximetryRealtime, PacketBody};
pub use tag::{resolve_tag, PacketTag};
