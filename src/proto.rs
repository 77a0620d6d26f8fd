//! The PulseAudio native wire protocol: framing, the tagged-value format,
//! and the message catalog.
//!
//! Every packet on the wire is a 20-byte big-endian [`Descriptor`] followed
//! by `length` bytes of payload. Control packets use the reserved channel
//! [`CONTROL_CHANNEL`] and carry a tagged envelope (opcode, tag, body); any
//! other channel value marks the payload as raw audio data for the stream
//! with that index.

pub mod command;
pub mod tagstruct;
pub mod types;

mod error;

use std::io::{Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

pub use command::*;
pub use error::*;
pub use types::*;

/// Protocol version sent in the auth handshake, before negotiation.
pub const INITIAL_VERSION: Version = Version::new(32);

/// The size of a packet descriptor.
pub const DESCRIPTOR_SIZE: usize = 5 * 4;

/// The channel index reserved for tagged control envelopes.
pub const CONTROL_CHANNEL: u32 = 0xFFFF_FFFF;

const VERSION_MASK: u32 = 0x0000_FFFF;

/// A protocol version: the low 16 bits are the version number, the high 16
/// bits carry feature flags negotiated alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(u32);

impl Version {
    /// The client supports shared-memory data transfer.
    pub const FLAG_SHM: u32 = 0x8000_0000;
    /// The client supports memfd-backed shared memory.
    pub const FLAG_MEMFD: u32 = 0x4000_0000;

    /// Creates a version with the given number and no feature flags.
    pub const fn new(number: u16) -> Self {
        Version(number as u32)
    }

    /// Reconstructs a version from its raw wire representation.
    pub const fn from_bits(bits: u32) -> Self {
        Version(bits)
    }

    /// The raw wire representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// The version number, without feature flags.
    pub const fn number(self) -> u16 {
        (self.0 & VERSION_MASK) as u16
    }

    /// The feature flag bits.
    pub const fn flags(self) -> u32 {
        self.0 & !VERSION_MASK
    }

    /// Reduces `self` to the lower of the two version numbers, keeping
    /// `self`'s feature flags.
    pub fn min(self, other: Version) -> Version {
        let number = self.number().min(other.number());
        Version(self.flags() | number as u32)
    }
}

/// Packet descriptor, the outer framing of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Payload length in bytes.
    pub length: u32,
    /// The stream the packet belongs to, or [`CONTROL_CHANNEL`].
    pub channel: u32,
    /// Offset into the server-side memory block. Always zero here.
    pub offset: u64,
    /// Seek mode and shared-memory flags. Always zero here.
    pub flags: u32,
}

impl Descriptor {
    /// A descriptor for a control packet of the given payload length.
    pub fn control(length: u32) -> Self {
        Descriptor {
            length,
            channel: CONTROL_CHANNEL,
            offset: 0,
            flags: 0,
        }
    }

    /// A descriptor for an audio data packet on the given stream.
    pub fn audio(channel: u32, length: u32) -> Self {
        Descriptor {
            length,
            channel,
            offset: 0,
            flags: 0,
        }
    }
}

/// Reads a packet descriptor from an input stream.
pub fn read_descriptor<R: Read>(r: &mut R) -> Result<Descriptor, ProtocolError> {
    Ok(Descriptor {
        length: r.read_u32::<NetworkEndian>()?,
        channel: r.read_u32::<NetworkEndian>()?,
        offset: r.read_u64::<NetworkEndian>()?,
        flags: r.read_u32::<NetworkEndian>()?,
    })
}

/// Writes a packet descriptor to an output stream.
pub fn write_descriptor<W: Write>(w: &mut W, desc: &Descriptor) -> Result<(), ProtocolError> {
    w.write_u32::<NetworkEndian>(desc.length)?;
    w.write_u32::<NetworkEndian>(desc.channel)?;
    w.write_u64::<NetworkEndian>(desc.offset)?;
    w.write_u32::<NetworkEndian>(desc.flags)?;

    Ok(())
}

/// Encodes a control envelope (opcode, tag, body) for the given request
/// into a fresh buffer, without the descriptor.
pub fn encode_request<Q: CommandRequest>(
    tag: u32,
    req: &Q,
    version: Version,
) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    let mut w = tagstruct::TagWriter::new(&mut buf, version);
    w.put_u32(Q::OPCODE as u32)?;
    w.put_u32(tag)?;
    req.write(&mut w, version)?;

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn version_min_takes_lower_number() {
        let local = Version::new(32);
        let remote = Version::new(30);

        assert_eq!(local.min(remote), Version::new(30));
        assert_eq!(remote.min(local), Version::new(30));
    }

    #[test]
    fn version_min_preserves_local_flags() {
        let local = Version::from_bits(Version::FLAG_SHM | 32);
        let remote = Version::new(35);

        let negotiated = local.min(remote);
        assert_eq!(negotiated.number(), 32);
        assert_eq!(negotiated.flags(), Version::FLAG_SHM);

        let negotiated = local.min(Version::new(13));
        assert_eq!(negotiated.number(), 13);
        assert_eq!(negotiated.flags(), Version::FLAG_SHM);
    }

    #[test]
    fn descriptor_roundtrip() {
        let desc = Descriptor::audio(3, 1024);

        let mut buf = Vec::new();
        write_descriptor(&mut buf, &desc).unwrap();
        assert_eq!(buf.len(), DESCRIPTOR_SIZE);

        let back = read_descriptor(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(desc, back);
    }

    #[test]
    fn control_descriptor_uses_sentinel_channel() {
        let desc = Descriptor::control(10);

        let mut buf = Vec::new();
        write_descriptor(&mut buf, &desc).unwrap();
        assert_eq!(&buf[4..8], &[0xff, 0xff, 0xff, 0xff]);
    }
}
