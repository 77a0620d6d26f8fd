//! Value types shared across the message catalog.

use std::collections::BTreeMap;

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::tagstruct::{Tag, TagReader, TagWriter, WireRead, WireWrite};
use super::{ProtocolError, Version};

/// The value used for "no index" in index-valued fields.
pub const UNDEFINED: u32 = 0xFFFF_FFFF;

/// Maximum number of channels in a map or volume set.
pub const CHANNELS_MAX: usize = 32;

/// How individual samples are encoded.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive, Default)]
pub enum SampleFormat {
    /// Unsigned 8-bit PCM.
    #[default]
    U8 = 0,
    /// 8-bit a-law.
    Alaw = 1,
    /// 8-bit mu-law.
    Ulaw = 2,
    /// Signed 16-bit PCM, little endian.
    S16Le = 3,
    /// Signed 16-bit PCM, big endian.
    S16Be = 4,
    /// 32-bit IEEE float, little endian, range -1.0 to 1.0.
    Float32Le = 5,
    /// 32-bit IEEE float, big endian, range -1.0 to 1.0.
    Float32Be = 6,
    /// Signed 32-bit PCM, little endian.
    S32Le = 7,
    /// Signed 32-bit PCM, big endian.
    S32Be = 8,
    /// Signed 24-bit PCM packed, little endian.
    S24Le = 9,
    /// Signed 24-bit PCM packed, big endian.
    S24Be = 10,
    /// Signed 24-bit PCM in the LSB of 32-bit words, little endian.
    S24In32Le = 11,
    /// Signed 24-bit PCM in the LSB of 32-bit words, big endian.
    S24In32Be = 12,
}

impl SampleFormat {
    /// The number of bytes used to store a single sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::Alaw | SampleFormat::Ulaw => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::S24Le | SampleFormat::S24Be => 3,
            SampleFormat::Float32Le
            | SampleFormat::Float32Be
            | SampleFormat::S32Le
            | SampleFormat::S32Be
            | SampleFormat::S24In32Le
            | SampleFormat::S24In32Be => 4,
        }
    }

    /// Signed 16-bit PCM in the host's byte order.
    pub fn s16_ne() -> Self {
        if cfg!(target_endian = "little") {
            SampleFormat::S16Le
        } else {
            SampleFormat::S16Be
        }
    }

    /// Signed 32-bit PCM in the host's byte order.
    pub fn s32_ne() -> Self {
        if cfg!(target_endian = "little") {
            SampleFormat::S32Le
        } else {
            SampleFormat::S32Be
        }
    }

    /// 32-bit IEEE float in the host's byte order.
    pub fn float32_ne() -> Self {
        if cfg!(target_endian = "little") {
            SampleFormat::Float32Le
        } else {
            SampleFormat::Float32Be
        }
    }
}

/// A full description of the format of a sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    /// Encoding of individual samples.
    pub format: SampleFormat,
    /// Number of interleaved channels.
    pub channels: u8,
    /// Samples per second, per channel.
    pub rate: u32,
}

impl Default for SampleSpec {
    fn default() -> Self {
        SampleSpec {
            format: SampleFormat::default(),
            channels: 1,
            rate: 44100,
        }
    }
}

impl WireRead for SampleSpec {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::SampleSpec)?;
        let format = r.raw_u8()?;
        let format = SampleFormat::from_u8(format)
            .ok_or_else(|| ProtocolError::Invalid(format!("invalid sample format {}", format)))?;

        Ok(SampleSpec {
            format,
            channels: r.raw_u8()?,
            rate: r.raw_u32()?,
        })
    }
}

impl WireWrite for SampleSpec {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::SampleSpec as u8)?;
        w.raw_u8(self.format as u8)?;
        w.raw_u8(self.channels)?;
        w.raw_u32(self.rate)
    }
}

/// Speaker position labels for channel maps.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive, Default)]
#[allow(missing_docs)]
pub enum ChannelPosition {
    #[default]
    Mono = 0,
    FrontLeft = 1,
    FrontRight = 2,
    FrontCenter = 3,
    RearCenter = 4,
    RearLeft = 5,
    RearRight = 6,
    Lfe = 7,
    FrontLeftOfCenter = 8,
    FrontRightOfCenter = 9,
    SideLeft = 10,
    SideRight = 11,
    Aux0 = 12,
    Aux1 = 13,
    Aux2 = 14,
    Aux3 = 15,
    Aux4 = 16,
    Aux5 = 17,
    Aux6 = 18,
    Aux7 = 19,
    Aux8 = 20,
    Aux9 = 21,
    Aux10 = 22,
    Aux11 = 23,
    Aux12 = 24,
    Aux13 = 25,
    Aux14 = 26,
    Aux15 = 27,
    Aux16 = 28,
    Aux17 = 29,
    Aux18 = 30,
    Aux19 = 31,
    Aux20 = 32,
    Aux21 = 33,
    Aux22 = 34,
    Aux23 = 35,
    Aux24 = 36,
    Aux25 = 37,
    Aux26 = 38,
    Aux27 = 39,
    Aux28 = 40,
    Aux29 = 41,
    Aux30 = 42,
    Aux31 = 43,
    TopCenter = 44,
    TopFrontLeft = 45,
    TopFrontRight = 46,
    TopFrontCenter = 47,
    TopRearLeft = 48,
    TopRearRight = 49,
    TopRearCenter = 50,
}

/// A map from stream channels to speaker positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap(Vec<ChannelPosition>);

impl ChannelMap {
    /// A single-channel map.
    pub fn mono() -> Self {
        ChannelMap(vec![ChannelPosition::Mono])
    }

    /// A two-channel front-left/front-right map.
    pub fn stereo() -> Self {
        ChannelMap(vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight])
    }

    /// Creates a map from explicit positions.
    pub fn new(positions: Vec<ChannelPosition>) -> Self {
        ChannelMap(positions)
    }

    /// The number of channels in the map.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map has no channels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The mapped positions.
    pub fn positions(&self) -> &[ChannelPosition] {
        &self.0
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        ChannelMap::mono()
    }
}

impl WireRead for ChannelMap {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::ChannelMap)?;
        let len = r.raw_u8()? as usize;
        if len > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "channel map with {} channels",
                len
            )));
        }

        let mut positions = Vec::with_capacity(len);
        for _ in 0..len {
            let b = r.raw_u8()?;
            positions.push(ChannelPosition::from_u8(b).ok_or_else(|| {
                ProtocolError::Invalid(format!("invalid channel position {}", b))
            })?);
        }

        Ok(ChannelMap(positions))
    }
}

impl WireWrite for ChannelMap {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::ChannelMap as u8)?;
        w.raw_u8(self.0.len() as u8)?;
        for p in &self.0 {
            w.raw_u8(*p as u8)?;
        }

        Ok(())
    }
}

/// A single volume value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Volume(pub u32);

impl Volume {
    /// Muted (minimal valid) volume, 0%.
    pub const MUTED: Volume = Volume(0);
    /// Normal volume, 100%, 0 dB.
    pub const NORM: Volume = Volume(0x10000);
    /// Maximum valid volume.
    pub const MAX: Volume = Volume(u32::MAX / 2);
    /// The special invalid volume.
    pub const INVALID: Volume = Volume(u32::MAX);
}

impl WireRead for Volume {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::Volume)?;
        Ok(Volume(r.raw_u32()?))
    }
}

impl WireWrite for Volume {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::Volume as u8)?;
        w.raw_u32(self.0)
    }
}

/// Per-channel volume values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelVolumes(pub Vec<u32>);

impl ChannelVolumes {
    /// The same volume on `channels` channels.
    pub fn uniform(channels: usize, volume: u32) -> Self {
        ChannelVolumes(vec![volume; channels])
    }

    /// The number of channels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no channels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl WireRead for ChannelVolumes {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::ChannelVolumes)?;
        let len = r.raw_u8()? as usize;
        if len > CHANNELS_MAX {
            return Err(ProtocolError::Invalid(format!(
                "volume set with {} channels",
                len
            )));
        }

        let mut volumes = Vec::with_capacity(len);
        for _ in 0..len {
            volumes.push(r.raw_u32()?);
        }

        Ok(ChannelVolumes(volumes))
    }
}

impl WireWrite for ChannelVolumes {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::ChannelVolumes as u8)?;
        w.raw_u8(self.0.len() as u8)?;
        for v in &self.0 {
            w.raw_u32(*v)?;
        }

        Ok(())
    }
}

/// A timestamp with microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeval {
    /// Whole seconds.
    pub seconds: u32,
    /// Fractional microseconds.
    pub microseconds: u32,
}

impl WireRead for Timeval {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::Timeval)?;
        Ok(Timeval {
            seconds: r.raw_u32()?,
            microseconds: r.raw_u32()?,
        })
    }
}

impl WireWrite for Timeval {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::Timeval as u8)?;
        w.raw_u32(self.seconds)?;
        w.raw_u32(self.microseconds)
    }
}

/// A key-value map attaching human-readable labels to clients and streams.
///
/// Keys are strings; values are opaque byte blobs, by convention
/// NUL-terminated strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropList(BTreeMap<String, Vec<u8>>);

impl PropList {
    /// Creates an empty property list.
    pub fn new() -> Self {
        PropList::default()
    }

    /// Sets a string-valued property, stored NUL-terminated as the
    /// protocol convention requires.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut blob = Vec::with_capacity(value.len() + 1);
        blob.extend_from_slice(value.as_bytes());
        blob.push(0);
        self.0.insert(key.to_owned(), blob);
    }

    /// Sets a raw byte-blob property.
    pub fn set_bytes(&mut self, key: &str, value: Vec<u8>) {
        self.0.insert(key.to_owned(), value);
    }

    /// Gets a property as a string, if it is stored NUL-terminated.
    pub fn get(&self, key: &str) -> Option<&str> {
        let blob = self.0.get(key)?;
        match blob.split_last() {
            Some((&0, body)) => std::str::from_utf8(body).ok(),
            _ => None,
        }
    }

    /// Gets the raw bytes of a property.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(|v| &v[..])
    }

    /// The number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), &v[..]))
    }
}

impl WireRead for PropList {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::PropList)?;
        read_prop_entries(r)
    }
}

impl WireWrite for PropList {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::PropList as u8)?;
        write_prop_entries(w, self)
    }
}

fn read_prop_entries(r: &mut TagReader<'_>) -> Result<PropList, ProtocolError> {
    let mut map = BTreeMap::new();
    loop {
        match r.tag()? {
            Tag::StringNull => break,
            Tag::String => {}
            tag => {
                return Err(ProtocolError::Invalid(format!(
                    "expected property key, got {:?}",
                    tag
                )))
            }
        }

        let key = r.read_string_body()?;
        let len = r.read_u32()?;
        let value = r.read_blob()?;
        if value.len() != len as usize {
            return Err(ProtocolError::Invalid(format!(
                "property length mismatch for {}",
                key
            )));
        }

        map.insert(key, value);
    }

    Ok(PropList(map))
}

fn write_prop_entries(w: &mut TagWriter<'_>, props: &PropList) -> Result<(), ProtocolError> {
    for (key, value) in props.iter() {
        w.raw_u8(Tag::String as u8)?;
        for b in key.as_bytes() {
            w.raw_u8(*b)?;
        }
        w.raw_u8(0)?;
        w.put_u32(value.len() as u32)?;
        w.put_blob(value)?;
    }
    w.raw_u8(Tag::StringNull as u8)?;

    Ok(())
}

/// Raw PCM encoding in a format description.
pub const ENCODING_PCM: u8 = 1;

/// A stream format description: an encoding plus free-form properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    /// The encoding, e.g. [`ENCODING_PCM`].
    pub encoding: u8,
    /// Encoding-specific properties.
    pub properties: PropList,
}

impl Default for FormatInfo {
    fn default() -> Self {
        FormatInfo {
            encoding: ENCODING_PCM,
            properties: PropList::new(),
        }
    }
}

impl WireRead for FormatInfo {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        r.expect(Tag::FormatInfo)?;
        let encoding = r.read_u8()?;
        r.expect(Tag::PropList)?;
        let properties = read_prop_entries(r)?;

        Ok(FormatInfo {
            encoding,
            properties,
        })
    }
}

impl WireWrite for FormatInfo {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.raw_u8(Tag::FormatInfo as u8)?;
        w.put_u8(self.encoding)?;
        w.raw_u8(Tag::PropList as u8)?;
        write_prop_entries(w, &self.properties)
    }
}

/// Reads a format-info list: a count byte followed by that many entries.
pub(crate) fn read_format_infos(
    r: &mut TagReader<'_>,
    version: Version,
) -> Result<Vec<FormatInfo>, ProtocolError> {
    let len = r.read_u8()? as usize;
    let mut formats = Vec::with_capacity(len);
    for _ in 0..len {
        formats.push(FormatInfo::read(r, version)?);
    }

    Ok(formats)
}

/// Writes a format-info list: a count byte followed by the entries.
pub(crate) fn write_format_infos(
    w: &mut TagWriter<'_>,
    formats: &[FormatInfo],
    version: Version,
) -> Result<(), ProtocolError> {
    w.put_u8(formats.len() as u8)?;
    for f in formats {
        f.write(w, version)?;
    }

    Ok(())
}

impl TagReader<'_> {
    /// Reads the body of a 't'-tagged string after the tag was consumed.
    fn read_string_body(&mut self) -> Result<String, ProtocolError> {
        let mut buf = Vec::new();
        loop {
            let b = self.raw_u8()?;
            if b == 0 {
                break;
            }
            buf.push(b);
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::roundtrip;

    #[test]
    fn sample_spec_roundtrip() -> anyhow::Result<()> {
        roundtrip(&SampleSpec {
            format: SampleFormat::S16Le,
            channels: 2,
            rate: 48000,
        })
    }

    #[test]
    fn channel_map_roundtrip() -> anyhow::Result<()> {
        roundtrip(&ChannelMap::stereo())?;
        roundtrip(&ChannelMap::mono())
    }

    #[test]
    fn channel_volumes_roundtrip() -> anyhow::Result<()> {
        roundtrip(&ChannelVolumes::uniform(2, 0x100))
    }

    #[test]
    fn prop_list_roundtrip() -> anyhow::Result<()> {
        let mut props = PropList::new();
        props.set("media.name", "sine");
        props.set("application.name", "tests");

        roundtrip(&props)
    }

    #[test]
    fn prop_list_string_access() {
        let mut props = PropList::new();
        props.set("media.name", "sine");

        assert_eq!(props.get("media.name"), Some("sine"));
        assert_eq!(props.get_bytes("media.name"), Some(&b"sine\0"[..]));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn format_info_roundtrip() -> anyhow::Result<()> {
        let mut properties = PropList::new();
        properties.set("format.rate", "44100");

        roundtrip(&FormatInfo {
            encoding: ENCODING_PCM,
            properties,
        })
    }

    #[test]
    fn native_endian_formats_match_host() {
        if cfg!(target_endian = "little") {
            assert_eq!(SampleFormat::s16_ne(), SampleFormat::S16Le);
            assert_eq!(SampleFormat::s32_ne(), SampleFormat::S32Le);
            assert_eq!(SampleFormat::float32_ne(), SampleFormat::Float32Le);
        } else {
            assert_eq!(SampleFormat::s16_ne(), SampleFormat::S16Be);
        }
    }

    #[test]
    fn bytes_per_sample() {
        assert_eq!(SampleFormat::U8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::S16Le.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::S24Le.bytes_per_sample(), 3);
        assert_eq!(SampleFormat::Float32Be.bytes_per_sample(), 4);
    }
}
