//! Record stream lifecycle commands.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{
    read_format_infos, write_format_infos, ChannelMap, ChannelVolumes, FormatInfo, PropList,
    ProtocolError, SampleSpec, Version, UNDEFINED,
};

use super::playback::stream_index_command;
use super::{CommandReply, CommandRequest, Opcode};

/// Creates a record stream connected to a source.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRecordStream {
    /// Requested sample format.
    pub sample_spec: SampleSpec,
    /// Requested channel map.
    pub channel_map: ChannelMap,
    /// Index of the source to capture from, or [`UNDEFINED`] for the default.
    pub source_index: u32,
    /// Name of the source, if `source_index` is undefined.
    pub source_name: String,
    /// Maximum server-side buffer length in bytes.
    pub buffer_max_length: u32,
    /// Whether the stream starts corked.
    pub corked: bool,
    /// Fragment size: how many bytes the server pushes per data packet.
    pub buffer_frag_size: u32,

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
    /// Deliver peaks instead of raw samples.
    pub peak_detect: bool,
    /// Adjust source latency to the requested fragment size.
    pub adjust_latency: bool,
    /// Stream properties.
    pub properties: PropList,
    /// Capture directly from this sink input, or [`UNDEFINED`].
    pub direct_on_input_index: u32,

    /// Since protocol 14. Request data as early as possible.
    pub early_requests: bool,

    // Since protocol 15.
    #[allow(missing_docs)]
    pub dont_inhibit_auto_suspend: bool,
    #[allow(missing_docs)]
    pub fail_on_suspend: bool,

    // Since protocol 22.
    /// Formats the client offers.
    pub formats: Vec<FormatInfo>,
    /// Initial per-channel volumes.
    pub channel_volumes: ChannelVolumes,
    /// Whether the stream starts muted.
    pub muted: bool,
    /// Whether `channel_volumes` carries a caller-chosen volume.
    pub volume_set: bool,
    /// Whether `muted` carries a caller choice.
    pub muted_set: bool,
    #[allow(missing_docs)]
    pub relative_volume: bool,
    #[allow(missing_docs)]
    pub passthrough: bool,
}

impl Default for CreateRecordStream {
    fn default() -> Self {
        CreateRecordStream {
            sample_spec: SampleSpec::default(),
            channel_map: ChannelMap::mono(),
            source_index: UNDEFINED,
            source_name: String::new(),
            buffer_max_length: UNDEFINED,
            corked: true,
            buffer_frag_size: UNDEFINED,
            no_remap: false,
            no_remix: false,
            fix_format: false,
            fix_rate: false,
            fix_channels: false,
            no_move: false,
            variable_rate: false,
            peak_detect: false,
            adjust_latency: false,
            properties: PropList::new(),
            direct_on_input_index: UNDEFINED,
            early_requests: false,
            dont_inhibit_auto_suspend: false,
            fail_on_suspend: false,
            formats: Vec::new(),
            channel_volumes: ChannelVolumes::default(),
            muted: false,
            volume_set: false,
            muted_set: false,
            relative_volume: false,
            passthrough: false,
        }
    }
}

impl CommandRequest for CreateRecordStream {
    const OPCODE: Opcode = Opcode::CreateRecordStream;
}

impl WireRead for CreateRecordStream {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = CreateRecordStream {
            sample_spec: r.read()?,
            channel_map: r.read()?,
            source_index: r.read_u32()?,
            source_name: r.read_string()?,
            buffer_max_length: r.read_u32()?,
            corked: r.read_bool()?,
            buffer_frag_size: r.read_u32()?,
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
            v.peak_detect = r.read_bool()?;
            v.adjust_latency = r.read_bool()?;
            v.properties = r.read()?;
            v.direct_on_input_index = r.read_u32()?;
        }
        if version.number() >= 14 {
            v.early_requests = r.read_bool()?;
        }
        if version.number() >= 15 {
            v.dont_inhibit_auto_suspend = r.read_bool()?;
            v.fail_on_suspend = r.read_bool()?;
        }
        if version.number() >= 22 {
            v.formats = read_format_infos(r, version)?;
            v.channel_volumes = r.read()?;
            v.muted = r.read_bool()?;
            v.volume_set = r.read_bool()?;
            v.muted_set = r.read_bool()?;
            v.relative_volume = r.read_bool()?;
            v.passthrough = r.read_bool()?;
        }

        Ok(v)
    }
}

impl WireWrite for CreateRecordStream {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put(self.sample_spec)?;
        w.put(&self.channel_map)?;
        w.put_u32(self.source_index)?;
        w.put_string(&self.source_name)?;
        w.put_u32(self.buffer_max_length)?;
        w.put_bool(self.corked)?;
        w.put_u32(self.buffer_frag_size)?;

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
            w.put_bool(self.peak_detect)?;
            w.put_bool(self.adjust_latency)?;
            w.put(&self.properties)?;
            w.put_u32(self.direct_on_input_index)?;
        }
        if version.number() >= 14 {
            w.put_bool(self.early_requests)?;
        }
        if version.number() >= 15 {
            w.put_bool(self.dont_inhibit_auto_suspend)?;
            w.put_bool(self.fail_on_suspend)?;
        }
        if version.number() >= 22 {
            write_format_infos(w, &self.formats, version)?;
            w.put(&self.channel_volumes)?;
            w.put_bool(self.muted)?;
            w.put_bool(self.volume_set)?;
            w.put_bool(self.muted_set)?;
            w.put_bool(self.relative_volume)?;
            w.put_bool(self.passthrough)?;
        }

        Ok(())
    }
}

/// The server's answer to [`CreateRecordStream`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateRecordStreamReply {
    /// The connection-scoped stream index used in frames and stream
    /// commands.
    pub stream_index: u32,
    /// The server-wide source-output index of the stream.
    pub source_output_index: u32,

    // Since protocol 9.
    /// Effective maximum buffer length in bytes.
    pub buffer_max_length: u32,
    /// Effective fragment size in bytes.
    pub buffer_frag_size: u32,

    // Since protocol 12.
    /// The negotiated sample format.
    pub sample_spec: SampleSpec,
    /// The negotiated channel map.
    pub channel_map: ChannelMap,
    /// The source the stream captures from.
    pub source_index: u32,
    /// The name of that source.
    pub source_name: String,
    /// Whether that source is suspended.
    pub source_suspended: bool,

    /// Since protocol 13. The source latency in microseconds.
    pub source_latency: u64,

    /// Since protocol 22. The negotiated format.
    pub format: FormatInfo,
}

impl CommandReply for CreateRecordStreamReply {
    const REPLY_TO: Opcode = Opcode::CreateRecordStream;
}

impl WireRead for CreateRecordStreamReply {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = CreateRecordStreamReply {
            stream_index: r.read_u32()?,
            source_output_index: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 9 {
            v.buffer_max_length = r.read_u32()?;
            v.buffer_frag_size = r.read_u32()?;
        }
        if version.number() >= 12 {
            v.sample_spec = r.read()?;
            v.channel_map = r.read()?;
            v.source_index = r.read_u32()?;
            v.source_name = r.read_string()?;
            v.source_suspended = r.read_bool()?;
        }
        if version.number() >= 13 {
            v.source_latency = r.read_usec()?;
        }
        if version.number() >= 22 {
            v.format = r.read()?;
        }

        Ok(v)
    }
}

impl WireWrite for CreateRecordStreamReply {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.source_output_index)?;

        if version.number() >= 9 {
            w.put_u32(self.buffer_max_length)?;
            w.put_u32(self.buffer_frag_size)?;
        }
        if version.number() >= 12 {
            w.put(self.sample_spec)?;
            w.put(&self.channel_map)?;
            w.put_u32(self.source_index)?;
            w.put_string(&self.source_name)?;
            w.put_bool(self.source_suspended)?;
        }
        if version.number() >= 13 {
            w.put_usec(self.source_latency)?;
        }
        if version.number() >= 22 {
            w.put(&self.format)?;
        }

        Ok(())
    }
}

stream_index_command!(
    /// Destroys a record stream.
    DeleteRecordStream,
    Opcode::DeleteRecordStream
);

stream_index_command!(
    /// Discards buffered data for a record stream.
    FlushRecordStream,
    Opcode::FlushRecordStream
);

/// Pauses or resumes a record stream on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CorkRecordStream {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// True to pause, false to resume.
    pub corked: bool,
}

impl CommandRequest for CorkRecordStream {
    const OPCODE: Opcode = Opcode::CorkRecordStream;
}

impl WireRead for CorkRecordStream {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(CorkRecordStream {
            stream_index: r.read_u32()?,
            corked: r.read_bool()?,
        })
    }
}

impl WireWrite for CorkRecordStream {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_bool(self.corked)
    }
}
