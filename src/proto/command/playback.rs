//! Playback stream lifecycle commands.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{
    read_format_infos, write_format_infos, ChannelMap, ChannelVolumes, FormatInfo, PropList,
    ProtocolError, SampleSpec, Version, UNDEFINED,
};

use super::{CommandReply, CommandRequest, Opcode};

/// Creates a playback stream connected to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlaybackStream {
    /// Requested sample format.
    pub sample_spec: SampleSpec,
    /// Requested channel map; its length should match `sample_spec.channels`.
    pub channel_map: ChannelMap,
    /// Index of the sink to connect to, or [`UNDEFINED`] for the default.
    pub sink_index: u32,
    /// Name of the sink to connect to, if `sink_index` is undefined.
    pub sink_name: String,

    /// Maximum server-side buffer length in bytes.
    pub buffer_max_length: u32,
    /// Whether the stream starts corked.
    pub corked: bool,
    /// Target server-side buffer fill in bytes.
    pub buffer_target_length: u32,
    /// Bytes buffered before playback starts.
    pub buffer_prebuffer_length: u32,
    /// Minimum number of bytes the server requests at once.
    pub buffer_minimum_request: u32,

    /// Synchronization group, or zero.
    pub sync_id: u32,
    /// Initial per-channel volumes.
    pub channel_volumes: ChannelVolumes,

    // Since protocol 12.
    #[allow(missing_docs)]
    pub no_remap: bool,
    #[allow(missing_docs)]
    pub no_remix: bool,
    #[allow(missing_docs)]
    pub fix_format: bool,
    #[allow(missing_docs)]
    pub fix_rate: bool,
    #[allow(missing_docs)]
    pub fix_channels: bool,
    #[allow(missing_docs)]
    pub no_move: bool,
    #[allow(missing_docs)]
    pub variable_rate: bool,

    // Since protocol 13.
    /// Whether the stream starts muted.
    pub muted: bool,
    /// Adjust sink latency to the requested buffer metrics.
    pub adjust_latency: bool,
    /// Stream properties such as `media.name`.
    pub properties: PropList,

    // Since protocol 14.
    /// Whether `channel_volumes` carries a caller-chosen volume.
    pub volume_set: bool,
    /// Request data as early as possible.
    pub early_requests: bool,

    // Since protocol 15.
    /// Whether `muted` carries a caller choice.
    pub muted_set: bool,
    #[allow(missing_docs)]
    pub dont_inhibit_auto_suspend: bool,
    #[allow(missing_docs)]
    pub fail_on_suspend: bool,

    /// Since protocol 17. Volume is relative to the sink volume.
    pub relative_volume: bool,

    /// Since protocol 18. Passthrough stream for compressed formats.
    pub passthrough: bool,

    /// Since protocol 21. Formats the client offers.
    pub formats: Vec<FormatInfo>,
}

impl Default for CreatePlaybackStream {
    fn default() -> Self {
        CreatePlaybackStream {
            sample_spec: SampleSpec::default(),
            channel_map: ChannelMap::mono(),
            sink_index: UNDEFINED,
            sink_name: String::new(),
            buffer_max_length: UNDEFINED,
            corked: true,
            buffer_target_length: UNDEFINED,
            buffer_prebuffer_length: UNDEFINED,
            buffer_minimum_request: UNDEFINED,
            sync_id: 0,
            channel_volumes: ChannelVolumes::default(),
            no_remap: false,
            no_remix: false,
            fix_format: false,
            fix_rate: false,
            fix_channels: false,
            no_move: false,
            variable_rate: false,
            muted: false,
            adjust_latency: false,
            properties: PropList::new(),
            volume_set: false,
            early_requests: false,
            muted_set: false,
            dont_inhibit_auto_suspend: false,
            fail_on_suspend: false,
            relative_volume: false,
            passthrough: false,
            formats: Vec::new(),
        }
    }
}

impl CommandRequest for CreatePlaybackStream {
    const OPCODE: Opcode = Opcode::CreatePlaybackStream;
}

impl WireRead for CreatePlaybackStream {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = CreatePlaybackStream {
            sample_spec: r.read()?,
            channel_map: r.read()?,
            sink_index: r.read_u32()?,
            sink_name: r.read_string()?,
            buffer_max_length: r.read_u32()?,
            corked: r.read_bool()?,
            buffer_target_length: r.read_u32()?,
            buffer_prebuffer_length: r.read_u32()?,
            buffer_minimum_request: r.read_u32()?,
            sync_id: r.read_u32()?,
            channel_volumes: r.read()?,
            ..Default::default()
        };

        if version.number() >= 12 {
            v.no_remap = r.read_bool()?;
            v.no_remix = r.read_bool()?;
            v.fix_format = r.read_bool()?;
            v.fix_rate = r.read_bool()?;
            v.fix_channels = r.read_bool()?;
            v.no_move = r.read_bool()?;
            v.variable_rate = r.read_bool()?;
        }
        if version.number() >= 13 {
            v.muted = r.read_bool()?;
            v.adjust_latency = r.read_bool()?;
            v.properties = r.read()?;
        }
        if version.number() >= 14 {
            v.volume_set = r.read_bool()?;
            v.early_requests = r.read_bool()?;
        }
        if version.number() >= 15 {
            v.muted_set = r.read_bool()?;
            v.dont_inhibit_auto_suspend = r.read_bool()?;
            v.fail_on_suspend = r.read_bool()?;
        }
        if version.number() >= 17 {
            v.relative_volume = r.read_bool()?;
        }
        if version.number() >= 18 {
            v.passthrough = r.read_bool()?;
        }
        if version.number() >= 21 {
            v.formats = read_format_infos(r, version)?;
        }

        Ok(v)
    }
}

impl WireWrite for CreatePlaybackStream {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put(self.sample_spec)?;
        w.put(&self.channel_map)?;
        w.put_u32(self.sink_index)?;
        w.put_string(&self.sink_name)?;
        w.put_u32(self.buffer_max_length)?;
        w.put_bool(self.corked)?;
        w.put_u32(self.buffer_target_length)?;
        w.put_u32(self.buffer_prebuffer_length)?;
        w.put_u32(self.buffer_minimum_request)?;
        w.put_u32(self.sync_id)?;
        w.put(&self.channel_volumes)?;

        if version.number() >= 12 {
            w.put_bool(self.no_remap)?;
            w.put_bool(self.no_remix)?;
            w.put_bool(self.fix_format)?;
            w.put_bool(self.fix_rate)?;
            w.put_bool(self.fix_channels)?;
            w.put_bool(self.no_move)?;
            w.put_bool(self.variable_rate)?;
        }
        if version.number() >= 13 {
            w.put_bool(self.muted)?;
            w.put_bool(self.adjust_latency)?;
            w.put(&self.properties)?;
        }
        if version.number() >= 14 {
            w.put_bool(self.volume_set)?;
            w.put_bool(self.early_requests)?;
        }
        if version.number() >= 15 {
            w.put_bool(self.muted_set)?;
            w.put_bool(self.dont_inhibit_auto_suspend)?;
            w.put_bool(self.fail_on_suspend)?;
        }
        if version.number() >= 17 {
            w.put_bool(self.relative_volume)?;
        }
        if version.number() >= 18 {
            w.put_bool(self.passthrough)?;
        }
        if version.number() >= 21 {
            write_format_infos(w, &self.formats, version)?;
        }

        Ok(())
    }
}

/// The server's answer to [`CreatePlaybackStream`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreatePlaybackStreamReply {
    /// The connection-scoped stream index used in frames and stream
    /// commands.
    pub stream_index: u32,
    /// The server-wide sink-input index of the stream.
    pub sink_input_index: u32,
    /// Bytes the server is ready to accept immediately.
    pub missing: u32,

    // Since protocol 9.
    /// Effective maximum buffer length in bytes.
    pub buffer_max_length: u32,
    /// Effective target buffer fill in bytes.
    pub buffer_target_length: u32,
    /// Effective prebuffer length in bytes.
    pub buffer_prebuffer_length: u32,
    /// Effective minimum request size in bytes.
    pub buffer_minimum_request: u32,

    // Since protocol 12.
    /// The negotiated sample format.
    pub sample_spec: SampleSpec,
    /// The negotiated channel map.
    pub channel_map: ChannelMap,
    /// The sink the stream connected to.
    pub sink_index: u32,
    /// The name of that sink.
    pub sink_name: String,
    /// Whether that sink is suspended.
    pub sink_suspended: bool,

    /// Since protocol 13. The sink latency in microseconds.
    pub sink_latency: u64,

    /// Since protocol 21. The negotiated format.
    pub format: FormatInfo,
}

impl CommandReply for CreatePlaybackStreamReply {
    const REPLY_TO: Opcode = Opcode::CreatePlaybackStream;
}

impl WireRead for CreatePlaybackStreamReply {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = CreatePlaybackStreamReply {
            stream_index: r.read_u32()?,
            sink_input_index: r.read_u32()?,
            missing: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 9 {
            v.buffer_max_length = r.read_u32()?;
            v.buffer_target_length = r.read_u32()?;
            v.buffer_prebuffer_length = r.read_u32()?;
            v.buffer_minimum_request = r.read_u32()?;
        }
        if version.number() >= 12 {
            v.sample_spec = r.read()?;
            v.channel_map = r.read()?;
            v.sink_index = r.read_u32()?;
            v.sink_name = r.read_string()?;
            v.sink_suspended = r.read_bool()?;
        }
        if version.number() >= 13 {
            v.sink_latency = r.read_usec()?;
        }
        if version.number() >= 21 {
            v.format = r.read()?;
        }

        Ok(v)
    }
}

impl WireWrite for CreatePlaybackStreamReply {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.sink_input_index)?;
        w.put_u32(self.missing)?;

        if version.number() >= 9 {
            w.put_u32(self.buffer_max_length)?;
            w.put_u32(self.buffer_target_length)?;
            w.put_u32(self.buffer_prebuffer_length)?;
            w.put_u32(self.buffer_minimum_request)?;
        }
        if version.number() >= 12 {
            w.put(self.sample_spec)?;
            w.put(&self.channel_map)?;
            w.put_u32(self.sink_index)?;
            w.put_string(&self.sink_name)?;
            w.put_bool(self.sink_suspended)?;
        }
        if version.number() >= 13 {
            w.put_usec(self.sink_latency)?;
        }
        if version.number() >= 21 {
            w.put(&self.format)?;
        }

        Ok(())
    }
}

macro_rules! stream_index_command {
    ($(#[$doc:meta])* $name:ident, $opcode:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            /// The connection-scoped stream index.
            pub stream_index: u32,
        }

        impl CommandRequest for $name {
            const OPCODE: Opcode = $opcode;
        }

        impl WireRead for $name {
            fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
                Ok($name {
                    stream_index: r.read_u32()?,
                })
            }
        }

        impl WireWrite for $name {
            fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
                w.put_u32(self.stream_index)
            }
        }
    };
}

pub(crate) use stream_index_command;

stream_index_command!(
    /// Destroys a playback stream.
    DeletePlaybackStream,
    Opcode::DeletePlaybackStream
);

stream_index_command!(
    /// Discards buffered data for a playback stream.
    FlushPlaybackStream,
    Opcode::FlushPlaybackStream
);

stream_index_command!(
    /// Waits for the server to finish playing all delivered data.
    DrainPlaybackStream,
    Opcode::DrainPlaybackStream
);

/// Pauses or resumes a playback stream on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorkPlaybackStream {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// True to pause, false to resume.
    pub corked: bool,
}

impl CommandRequest for CorkPlaybackStream {
    const OPCODE: Opcode = Opcode::CorkPlaybackStream;
}

impl WireRead for CorkPlaybackStream {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(CorkPlaybackStream {
            stream_index: r.read_u32()?,
            corked: r.read_bool()?,
        })
    }
}

impl WireWrite for CorkPlaybackStream {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_bool(self.corked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::{encode_at, roundtrip, roundtrip_at};
    use crate::proto::SampleFormat;

    fn full_request() -> CreatePlaybackStream {
        let mut properties = PropList::new();
        properties.set("media.name", "sine");

        CreatePlaybackStream {
            sample_spec: SampleSpec {
                format: SampleFormat::S16Le,
                channels: 2,
                rate: 44100,
            },
            channel_map: ChannelMap::stereo(),
            buffer_target_length: 8192,
            buffer_max_length: 16384,
            channel_volumes: ChannelVolumes::uniform(2, 0x100),
            adjust_latency: true,
            properties,
            volume_set: true,
            muted_set: true,
            relative_volume: true,
            passthrough: true,
            formats: vec![FormatInfo::default()],
            ..Default::default()
        }
    }

    #[test]
    fn create_roundtrip() -> anyhow::Result<()> {
        let mut v = full_request();

        // Fields below their version guard are lost on a low-version trip,
        // so only run the full cross-version sweep on a value whose gated
        // fields are defaults.
        roundtrip_at(&v, Version::new(35))?;
        roundtrip_at(&v, Version::new(21))?;

        v.formats = Vec::new();
        roundtrip_at(&v, Version::new(18))?;

        v.passthrough = false;
        v.relative_volume = false;
        v.muted_set = false;
        roundtrip_at(&v, Version::new(14))
    }

    #[test]
    fn create_gates_fields_by_version() -> anyhow::Result<()> {
        let v = full_request();

        let low = encode_at(&v, Version::new(13))?;
        let high = encode_at(&v, Version::new(35))?;
        assert!(low.len() < high.len());

        // Decoding a low-version encoding at the same version reconstructs
        // the gated fields as defaults.
        let mut cursor = std::io::Cursor::new(&low);
        let mut r = crate::proto::tagstruct::TagReader::new(&mut cursor, Version::new(13));
        let back = CreatePlaybackStream::read(&mut r, Version::new(13))?;
        assert!(!back.volume_set);
        assert!(!back.passthrough);
        assert!(back.formats.is_empty());
        assert_eq!(back.buffer_target_length, 8192);

        Ok(())
    }

    #[test]
    fn reply_roundtrip() -> anyhow::Result<()> {
        roundtrip(&CreatePlaybackStreamReply {
            stream_index: 1,
            sink_input_index: 42,
            missing: 4096,
            buffer_max_length: 16384,
            buffer_target_length: 8192,
            buffer_prebuffer_length: 8192,
            buffer_minimum_request: 1024,
            sample_spec: SampleSpec::default(),
            channel_map: ChannelMap::mono(),
            sink_index: 0,
            sink_name: "default".into(),
            sink_suspended: false,
            sink_latency: 25_000,
            format: FormatInfo::default(),
        })
    }

    #[test]
    fn control_commands_roundtrip() -> anyhow::Result<()> {
        roundtrip(&DeletePlaybackStream { stream_index: 3 })?;
        roundtrip(&FlushPlaybackStream { stream_index: 3 })?;
        roundtrip(&DrainPlaybackStream { stream_index: 3 })?;
        roundtrip(&CorkPlaybackStream {
            stream_index: 3,
            corked: true,
        })
    }
}
