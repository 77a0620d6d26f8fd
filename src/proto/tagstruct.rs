//! The tagged-value format used for control payloads.
//!
//! Structured payloads are a flat sequence of values, each preceded by a
//! single ASCII tag byte naming its type. Struct fields are written in
//! declaration order; fields added in later protocol versions are guarded
//! by the negotiated [`Version`] on both ends.

use std::io::{BufRead, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::{ProtocolError, Version};

/// The type tags of the wire format.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
#[allow(missing_docs)]
pub enum Tag {
    String = b't',
    StringNull = b'N',
    U32 = b'L',
    U8 = b'B',
    U64 = b'R',
    S64 = b'r',
    SampleSpec = b'a',
    Arbitrary = b'x',
    BooleanTrue = b'1',
    BooleanFalse = b'0',
    Timeval = b'T',
    Usec = b'U',
    ChannelMap = b'm',
    ChannelVolumes = b'v',
    PropList = b'P',
    Volume = b'V',
    FormatInfo = b'f',
}

/// A value that can be decoded from a tagged payload.
pub trait WireRead: Sized {
    /// Reads an instance of `Self`, skipping fields above `version`.
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError>;
}

/// A value that can be encoded into a tagged payload.
pub trait WireWrite {
    /// Writes `self`, omitting fields above `version`.
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError>;
}

impl<T: WireWrite + ?Sized> WireWrite for &T {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        (*self).write(w, version)
    }
}

/// Streaming reader for tagged payloads. Validates tags on the fly.
pub struct TagReader<'a> {
    inner: &'a mut dyn BufRead,
    version: Version,
}

impl std::fmt::Debug for TagReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagReader")
            .field("version", &self.version)
            .finish()
    }
}

impl<'a> TagReader<'a> {
    /// Creates a reader over a buffered input stream.
    pub fn new(inner: &'a mut dyn BufRead, version: Version) -> Self {
        TagReader { inner, version }
    }

    /// The protocol version used to gate struct fields.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Reads a tag byte.
    pub fn tag(&mut self) -> Result<Tag, ProtocolError> {
        let b = self.inner.read_u8()?;
        Tag::from_u8(b)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid tag byte 0x{:02x}", b)))
    }

    /// Reads a tag byte and checks it against `want`.
    pub fn expect(&mut self, want: Tag) -> Result<(), ProtocolError> {
        let got = self.tag()?;
        if got == want {
            Ok(())
        } else {
            Err(ProtocolError::Invalid(format!(
                "expected {:?}, got {:?}",
                want, got
            )))
        }
    }

    /// Whether any payload bytes remain.
    pub fn has_more(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.inner.fill_buf().map(|b| !b.is_empty())?)
    }

    /// Reads a single untagged byte.
    pub(crate) fn raw_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.inner.read_u8()?)
    }

    /// Reads an untagged big-endian u32.
    pub(crate) fn raw_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.inner.read_u32::<NetworkEndian>()?)
    }

    /// Reads an untagged big-endian u64.
    pub(crate) fn raw_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(self.inner.read_u64::<NetworkEndian>()?)
    }

    fn raw_string(&mut self) -> Result<String, ProtocolError> {
        let mut buf = Vec::new();
        self.inner.read_until(0, &mut buf)?;
        match buf.pop() {
            Some(0) => {}
            _ => return Err(ProtocolError::Invalid("unterminated string".into())),
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Reads a tagged byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.expect(Tag::U8)?;
        self.raw_u8()
    }

    /// Reads a tagged u32.
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.expect(Tag::U32)?;
        self.raw_u32()
    }

    /// Reads a tagged u64.
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.expect(Tag::U64)?;
        self.raw_u64()
    }

    /// Reads a tagged i64, stored as two's-complement on the wire.
    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.expect(Tag::S64)?;
        Ok(self.raw_u64()? as i64)
    }

    /// Reads a boolean.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        match self.tag()? {
            Tag::BooleanTrue => Ok(true),
            Tag::BooleanFalse => Ok(false),
            tag => Err(ProtocolError::Invalid(format!(
                "expected boolean, got {:?}",
                tag
            ))),
        }
    }

    /// Reads a microsecond count.
    pub fn read_usec(&mut self) -> Result<u64, ProtocolError> {
        self.expect(Tag::Usec)?;
        self.raw_u64()
    }

    /// Reads a length-prefixed byte blob.
    pub fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.expect(Tag::Arbitrary)?;
        let len = self.raw_u32()? as usize;
        let mut buf = vec![0; len];
        self.inner.read_exact(&mut buf)?;

        Ok(buf)
    }

    /// Reads a string. The null-string tag decodes as an empty string, and
    /// a blob in string position is trimmed of its trailing NUL.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        match self.tag()? {
            Tag::String => self.raw_string(),
            Tag::StringNull => Ok(String::new()),
            Tag::Arbitrary => {
                let len = self.raw_u32()? as usize;
                let mut buf = vec![0; len];
                self.inner.read_exact(&mut buf)?;
                if buf.last() == Some(&0) {
                    buf.pop();
                }

                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
            tag => Err(ProtocolError::Invalid(format!(
                "expected string, got {:?}",
                tag
            ))),
        }
    }

    /// Reads a u32 and converts it to the given enum.
    pub fn read_enum<T: FromPrimitive>(&mut self) -> Result<T, ProtocolError> {
        let v = self.read_u32()?;
        T::from_u32(v).ok_or_else(|| {
            ProtocolError::Invalid(format!(
                "invalid value {} for {}",
                v,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Reads a value implementing [`WireRead`] at the reader's version.
    pub fn read<T: WireRead>(&mut self) -> Result<T, ProtocolError> {
        T::read(self, self.version)
    }
}

/// Writer for tagged payloads.
pub struct TagWriter<'a> {
    inner: &'a mut dyn Write,
    version: Version,
}

impl std::fmt::Debug for TagWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagWriter")
            .field("version", &self.version)
            .finish()
    }
}

impl<'a> TagWriter<'a> {
    /// Creates a writer over an output stream.
    pub fn new(inner: &'a mut dyn Write, version: Version) -> Self {
        TagWriter { inner, version }
    }

    /// The protocol version used to gate struct fields.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Writes a single untagged byte.
    pub(crate) fn raw_u8(&mut self, v: u8) -> Result<(), ProtocolError> {
        Ok(self.inner.write_u8(v)?)
    }

    /// Writes an untagged big-endian u32.
    pub(crate) fn raw_u32(&mut self, v: u32) -> Result<(), ProtocolError> {
        Ok(self.inner.write_u32::<NetworkEndian>(v)?)
    }

    /// Writes an untagged big-endian u64.
    pub(crate) fn raw_u64(&mut self, v: u64) -> Result<(), ProtocolError> {
        Ok(self.inner.write_u64::<NetworkEndian>(v)?)
    }

    /// Writes a tagged byte.
    pub fn put_u8(&mut self, v: u8) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::U8 as u8)?;
        self.raw_u8(v)
    }

    /// Writes a tagged u32.
    pub fn put_u32(&mut self, v: u32) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::U32 as u8)?;
        self.raw_u32(v)
    }

    /// Writes a tagged u64.
    pub fn put_u64(&mut self, v: u64) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::U64 as u8)?;
        self.raw_u64(v)
    }

    /// Writes a tagged i64.
    pub fn put_i64(&mut self, v: i64) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::S64 as u8)?;
        self.raw_u64(v as u64)
    }

    /// Writes a boolean.
    pub fn put_bool(&mut self, v: bool) -> Result<(), ProtocolError> {
        self.raw_u8(if v {
            Tag::BooleanTrue as u8
        } else {
            Tag::BooleanFalse as u8
        })
    }

    /// Writes a microsecond count.
    pub fn put_usec(&mut self, v: u64) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::Usec as u8)?;
        self.raw_u64(v)
    }

    /// Writes a length-prefixed byte blob.
    pub fn put_blob(&mut self, v: &[u8]) -> Result<(), ProtocolError> {
        self.raw_u8(Tag::Arbitrary as u8)?;
        self.raw_u32(v.len() as u32)?;
        Ok(self.inner.write_all(v)?)
    }

    /// Writes a string. Empty strings are written as the null-string tag.
    pub fn put_string(&mut self, v: &str) -> Result<(), ProtocolError> {
        if v.is_empty() {
            return self.raw_u8(Tag::StringNull as u8);
        }

        self.raw_u8(Tag::String as u8)?;
        self.inner.write_all(v.as_bytes())?;
        self.raw_u8(0)
    }

    /// Writes a value implementing [`WireWrite`] at the writer's version.
    pub fn put<T: WireWrite>(&mut self, v: T) -> Result<(), ProtocolError> {
        v.write(self, self.version)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::proto::INITIAL_VERSION;

    fn reader(buf: &[u8]) -> (Cursor<&[u8]>, Version) {
        (Cursor::new(buf), INITIAL_VERSION)
    }

    #[test]
    fn scalar_roundtrips() {
        let mut buf = Vec::new();
        {
            let mut w = TagWriter::new(&mut buf, INITIAL_VERSION);
            w.put_u8(7).unwrap();
            w.put_u32(0xdead_beef).unwrap();
            w.put_u64(1 << 40).unwrap();
            w.put_i64(-12345).unwrap();
            w.put_bool(true).unwrap();
            w.put_bool(false).unwrap();
            w.put_usec(1_234_567_890).unwrap();
        }

        let (mut cursor, version) = reader(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), 1 << 40);
        assert_eq!(r.read_i64().unwrap(), -12345);
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_usec().unwrap(), 1_234_567_890);
        assert!(!r.has_more().unwrap());
    }

    #[test]
    fn string_roundtrips() {
        let mut buf = Vec::new();
        {
            let mut w = TagWriter::new(&mut buf, INITIAL_VERSION);
            w.put_string("hello").unwrap();
            w.put_string("").unwrap();
            w.put_blob(b"blob").unwrap();
        }

        let (mut cursor, version) = reader(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        assert_eq!(r.read_string().unwrap(), "hello");
        assert_eq!(r.read_string().unwrap(), "");
        assert_eq!(r.read_blob().unwrap(), b"blob");
    }

    #[test]
    fn blob_in_string_position_is_trimmed() {
        let mut buf = Vec::new();
        {
            let mut w = TagWriter::new(&mut buf, INITIAL_VERSION);
            w.put_blob(b"trimmed\0").unwrap();
        }

        let (mut cursor, version) = reader(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        assert_eq!(r.read_string().unwrap(), "trimmed");
    }

    #[test]
    fn invalid_tag_is_rejected() {
        let buf = [0x7fu8, 0, 0, 0, 1];
        let (mut cursor, version) = reader(&buf);
        let mut r = TagReader::new(&mut cursor, version);

        assert!(matches!(r.read_u32(), Err(ProtocolError::Invalid(_))));
    }

    #[test]
    fn mismatched_tag_is_rejected() {
        let mut buf = Vec::new();
        {
            let mut w = TagWriter::new(&mut buf, INITIAL_VERSION);
            w.put_bool(true).unwrap();
        }

        let (mut cursor, version) = reader(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        assert!(matches!(r.read_u32(), Err(ProtocolError::Invalid(_))));
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::io::Cursor;

    use anyhow::Context as _;
    use pretty_assertions::assert_eq;

    use super::*;

    const MIN_TESTED_VERSION: u16 = 13;
    const MAX_TESTED_VERSION: u16 = 35;

    /// Round-trips a value through the wire format at every supported
    /// protocol version.
    pub(crate) fn roundtrip<T>(v: &T) -> anyhow::Result<()>
    where
        T: WireRead + WireWrite + PartialEq + std::fmt::Debug,
    {
        for number in MIN_TESTED_VERSION..=MAX_TESTED_VERSION {
            roundtrip_at(v, Version::new(number))
                .with_context(|| format!("roundtrip failed at protocol version {}", number))?;
        }

        Ok(())
    }

    /// Round-trips a value at a single protocol version.
    pub(crate) fn roundtrip_at<T>(v: &T, version: Version) -> anyhow::Result<()>
    where
        T: WireRead + WireWrite + PartialEq + std::fmt::Debug,
    {
        let buf = encode_at(v, version)?;

        let mut cursor = Cursor::new(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        let back = T::read(&mut r, version)?;

        assert_eq!(v, &back, "mismatch at protocol version {}", version.number());
        assert!(!r.has_more()?, "trailing bytes at version {}", version.number());

        Ok(())
    }

    /// Encodes a value at a single protocol version.
    pub(crate) fn encode_at<T: WireWrite>(v: &T, version: Version) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut w = TagWriter::new(&mut buf, version);
        v.write(&mut w, version)?;

        Ok(buf)
    }
}
