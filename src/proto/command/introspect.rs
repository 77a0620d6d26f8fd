//! Introspection commands reading back server state.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{
    read_format_infos, write_format_infos, ChannelMap, ChannelVolumes, FormatInfo, PropList,
    ProtocolError, SampleSpec, Version, Volume, UNDEFINED,
};

use super::{CommandReply, CommandRequest, Opcode};

/// Fetches a single sink, by index or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSinkInfo {
    /// The sink index, or [`UNDEFINED`] to look up by name (an empty name
    /// with an undefined index selects the default sink).
    pub sink_index: u32,
    /// The sink name, if the index is undefined.
    pub sink_name: String,
}

impl Default for GetSinkInfo {
    fn default() -> Self {
        GetSinkInfo {
            sink_index: UNDEFINED,
            sink_name: String::new(),
        }
    }
}

impl CommandRequest for GetSinkInfo {
    const OPCODE: Opcode = Opcode::GetSinkInfo;
}

impl WireRead for GetSinkInfo {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(GetSinkInfo {
            sink_index: r.read_u32()?,
            sink_name: r.read_string()?,
        })
    }
}

impl WireWrite for GetSinkInfo {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.sink_index)?;
        w.put_string(&self.sink_name)
    }
}

/// Fetches every sink on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetSinkInfoList;

impl CommandRequest for GetSinkInfoList {
    const OPCODE: Opcode = Opcode::GetSinkInfoList;
}

impl WireRead for GetSinkInfoList {
    fn read(_r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(GetSinkInfoList)
    }
}

impl WireWrite for GetSinkInfoList {
    fn write(&self, _w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// A port on a sink or source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortInfo {
    /// The port name.
    pub name: String,
    /// A human-readable description.
    pub description: String,
    /// Selection priority.
    pub priority: u32,
    /// Since protocol 24. Availability status.
    pub available: u32,
}

impl WireRead for PortInfo {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = PortInfo {
            name: r.read_string()?,
            description: r.read_string()?,
            priority: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 24 {
            v.available = r.read_u32()?;
        }

        Ok(v)
    }
}

impl WireWrite for PortInfo {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_string(&self.name)?;
        w.put_string(&self.description)?;
        w.put_u32(self.priority)?;

        if version.number() >= 24 {
            w.put_u32(self.available)?;
        }

        Ok(())
    }
}

/// The description of one sink.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SinkInfo {
    /// The sink index.
    pub sink_index: u32,
    /// The sink name.
    pub sink_name: String,
    /// The underlying device description.
    pub device: String,
    /// The sink's sample format.
    pub sample_spec: SampleSpec,
    /// The sink's channel map.
    pub channel_map: ChannelMap,
    /// The module that owns the sink.
    pub module_index: u32,
    /// Current per-channel volumes.
    pub channel_volumes: ChannelVolumes,
    /// Whether the sink is muted.
    pub mute: bool,
    /// The index of the sink's monitor source.
    pub monitor_source_index: u32,
    /// The name of the sink's monitor source.
    pub monitor_source_name: String,
    /// The sink latency in microseconds.
    pub latency: u64,
    /// The driver name.
    pub driver: String,
    /// Sink flags.
    pub flags: u32,

    // Since protocol 13.
    /// Sink properties.
    pub properties: PropList,
    /// The configured latency in microseconds.
    pub requested_latency: u64,

    // Since protocol 15.
    /// The volume that corresponds to 100% hardware volume.
    pub base_volume: Volume,
    /// Run/idle/suspended state.
    pub state: u32,
    /// Number of discrete volume steps, for sinks with quantized volume.
    pub num_volume_steps: u32,
    /// The card the sink belongs to.
    pub card_index: u32,

    // Since protocol 16.
    /// The sink's ports.
    pub ports: Vec<PortInfo>,
    /// The name of the active port.
    pub active_port_name: String,

    /// Since protocol 21. Supported formats.
    pub formats: Vec<FormatInfo>,
}

impl CommandReply for SinkInfo {
    const REPLY_TO: Opcode = Opcode::GetSinkInfo;
}

impl WireRead for SinkInfo {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = SinkInfo {
            sink_index: r.read_u32()?,
            sink_name: r.read_string()?,
            device: r.read_string()?,
            sample_spec: r.read()?,
            channel_map: r.read()?,
            module_index: r.read_u32()?,
            channel_volumes: r.read()?,
            mute: r.read_bool()?,
            monitor_source_index: r.read_u32()?,
            monitor_source_name: r.read_string()?,
            latency: r.read_usec()?,
            driver: r.read_string()?,
            flags: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 13 {
            v.properties = r.read()?;
            v.requested_latency = r.read_usec()?;
        }
        if version.number() >= 15 {
            v.base_volume = r.read()?;
            v.state = r.read_u32()?;
            v.num_volume_steps = r.read_u32()?;
            v.card_index = r.read_u32()?;
        }
        if version.number() >= 16 {
            let n = r.read_u32()? as usize;
            v.ports.reserve(n);
            for _ in 0..n {
                v.ports.push(r.read()?);
            }
            v.active_port_name = r.read_string()?;
        }
        if version.number() >= 21 {
            v.formats = read_format_infos(r, version)?;
        }

        Ok(v)
    }
}

impl WireWrite for SinkInfo {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.sink_index)?;
        w.put_string(&self.sink_name)?;
        w.put_string(&self.device)?;
        w.put(self.sample_spec)?;
        w.put(&self.channel_map)?;
        w.put_u32(self.module_index)?;
        w.put(&self.channel_volumes)?;
        w.put_bool(self.mute)?;
        w.put_u32(self.monitor_source_index)?;
        w.put_string(&self.monitor_source_name)?;
        w.put_usec(self.latency)?;
        w.put_string(&self.driver)?;
        w.put_u32(self.flags)?;

        if version.number() >= 13 {
            w.put(&self.properties)?;
            w.put_usec(self.requested_latency)?;
        }
        if version.number() >= 15 {
            w.put(self.base_volume)?;
            w.put_u32(self.state)?;
            w.put_u32(self.num_volume_steps)?;
            w.put_u32(self.card_index)?;
        }
        if version.number() >= 16 {
            w.put_u32(self.ports.len() as u32)?;
            for p in &self.ports {
                p.write(w, version)?;
            }
            w.put_string(&self.active_port_name)?;
        }
        if version.number() >= 21 {
            write_format_infos(w, &self.formats, version)?;
        }

        Ok(())
    }
}

impl WireRead for Vec<SinkInfo> {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut infos = Vec::new();
        while r.has_more()? {
            infos.push(SinkInfo::read(r, version)?);
        }

        Ok(infos)
    }
}

impl WireWrite for Vec<SinkInfo> {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        for info in self {
            info.write(w, version)?;
        }

        Ok(())
    }
}

impl CommandReply for Vec<SinkInfo> {
    const REPLY_TO: Opcode = Opcode::GetSinkInfoList;
}

/// Fetches a single source, by index or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSourceInfo {
    /// The source index, or [`UNDEFINED`] to look up by name (an empty
    /// name with an undefined index selects the default source).
    pub source_index: u32,
    /// The source name, if the index is undefined.
    pub source_name: String,
}

impl Default for GetSourceInfo {
    fn default() -> Self {
        GetSourceInfo {
            source_index: UNDEFINED,
            source_name: String::new(),
        }
    }
}

impl CommandRequest for GetSourceInfo {
    const OPCODE: Opcode = Opcode::GetSourceInfo;
}

impl WireRead for GetSourceInfo {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(GetSourceInfo {
            source_index: r.read_u32()?,
            source_name: r.read_string()?,
        })
    }
}

impl WireWrite for GetSourceInfo {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.source_index)?;
        w.put_string(&self.source_name)
    }
}

/// Fetches every source on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetSourceInfoList;

impl CommandRequest for GetSourceInfoList {
    const OPCODE: Opcode = Opcode::GetSourceInfoList;
}

impl WireRead for GetSourceInfoList {
    fn read(_r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(GetSourceInfoList)
    }
}

impl WireWrite for GetSourceInfoList {
    fn write(&self, _w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// The description of one source. The layout mirrors [`SinkInfo`], with
/// the monitor fields pointing the other way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceInfo {
    /// The source index.
    pub source_index: u32,
    /// The source name.
    pub source_name: String,
    /// The underlying device description.
    pub device: String,
    /// The source's sample format.
    pub sample_spec: SampleSpec,
    /// The source's channel map.
    pub channel_map: ChannelMap,
    /// The module that owns the source.
    pub module_index: u32,
    /// Current per-channel volumes.
    pub channel_volumes: ChannelVolumes,
    /// Whether the source is muted.
    pub mute: bool,
    /// For monitor sources, the sink being monitored.
    pub monitor_of_sink_index: u32,
    /// For monitor sources, the name of the sink being monitored.
    pub monitor_of_sink_name: String,
    /// The source latency in microseconds.
    pub latency: u64,
    /// The driver name.
    pub driver: String,
    /// Source flags.
    pub flags: u32,

    // Since protocol 13.
    /// Source properties.
    pub properties: PropList,
    /// The configured latency in microseconds.
    pub requested_latency: u64,

    // Since protocol 15.
    /// The volume that corresponds to 100% hardware volume.
    pub base_volume: Volume,
    /// Run/idle/suspended state.
    pub state: u32,
    /// Number of discrete volume steps.
    pub num_volume_steps: u32,
    /// The card the source belongs to.
    pub card_index: u32,

    // Since protocol 16.
    /// The source's ports.
    pub ports: Vec<PortInfo>,
    /// The name of the active port.
    pub active_port_name: String,

    /// Since protocol 21. Supported formats.
    pub formats: Vec<FormatInfo>,
}

impl CommandReply for SourceInfo {
    const REPLY_TO: Opcode = Opcode::GetSourceInfo;
}

impl WireRead for SourceInfo {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = SourceInfo {
            source_index: r.read_u32()?,
            source_name: r.read_string()?,
            device: r.read_string()?,
            sample_spec: r.read()?,
            channel_map: r.read()?,
            module_index: r.read_u32()?,
            channel_volumes: r.read()?,
            mute: r.read_bool()?,
            monitor_of_sink_index: r.read_u32()?,
            monitor_of_sink_name: r.read_string()?,
            latency: r.read_usec()?,
            driver: r.read_string()?,
            flags: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 13 {
            v.properties = r.read()?;
            v.requested_latency = r.read_usec()?;
        }
        if version.number() >= 15 {
            v.base_volume = r.read()?;
            v.state = r.read_u32()?;
            v.num_volume_steps = r.read_u32()?;
            v.card_index = r.read_u32()?;
        }
        if version.number() >= 16 {
            let n = r.read_u32()? as usize;
            v.ports.reserve(n);
            for _ in 0..n {
                v.ports.push(r.read()?);
            }
            v.active_port_name = r.read_string()?;
        }
        if version.number() >= 21 {
            v.formats = read_format_infos(r, version)?;
        }

        Ok(v)
    }
}

impl WireWrite for SourceInfo {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.source_index)?;
        w.put_string(&self.source_name)?;
        w.put_string(&self.device)?;
        w.put(self.sample_spec)?;
        w.put(&self.channel_map)?;
        w.put_u32(self.module_index)?;
        w.put(&self.channel_volumes)?;
        w.put_bool(self.mute)?;
        w.put_u32(self.monitor_of_sink_index)?;
        w.put_string(&self.monitor_of_sink_name)?;
        w.put_usec(self.latency)?;
        w.put_string(&self.driver)?;
        w.put_u32(self.flags)?;

        if version.number() >= 13 {
            w.put(&self.properties)?;
            w.put_usec(self.requested_latency)?;
        }
        if version.number() >= 15 {
            w.put(self.base_volume)?;
            w.put_u32(self.state)?;
            w.put_u32(self.num_volume_steps)?;
            w.put_u32(self.card_index)?;
        }
        if version.number() >= 16 {
            w.put_u32(self.ports.len() as u32)?;
            for p in &self.ports {
                p.write(w, version)?;
            }
            w.put_string(&self.active_port_name)?;
        }
        if version.number() >= 21 {
            write_format_infos(w, &self.formats, version)?;
        }

        Ok(())
    }
}

impl WireRead for Vec<SourceInfo> {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut infos = Vec::new();
        while r.has_more()? {
            infos.push(SourceInfo::read(r, version)?);
        }

        Ok(infos)
    }
}

impl WireWrite for Vec<SourceInfo> {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        for info in self {
            info.write(w, version)?;
        }

        Ok(())
    }
}

impl CommandReply for Vec<SourceInfo> {
    const REPLY_TO: Opcode = Opcode::GetSourceInfoList;
}

/// Fetches one sink input (the server-side handle of a playback stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetSinkInputInfo {
    /// The sink-input index.
    pub sink_input_index: u32,
}

impl CommandRequest for GetSinkInputInfo {
    const OPCODE: Opcode = Opcode::GetSinkInputInfo;
}

impl WireRead for GetSinkInputInfo {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(GetSinkInputInfo {
            sink_input_index: r.read_u32()?,
        })
    }
}

impl WireWrite for GetSinkInputInfo {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.sink_input_index)
    }
}

/// The description of one sink input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SinkInputInfo {
    /// The sink-input index.
    pub sink_input_index: u32,
    /// The stream's media name.
    pub media_name: String,
    /// The owning module, if any.
    pub module_index: u32,
    /// The owning client, if any.
    pub client_index: u32,
    /// The sink the stream plays into.
    pub sink_index: u32,
    /// The stream's sample format.
    pub sample_spec: SampleSpec,
    /// The stream's channel map.
    pub channel_map: ChannelMap,
    /// Current per-channel volumes.
    pub channel_volumes: ChannelVolumes,
    /// Latency in the sink input buffer, in microseconds.
    pub sink_input_latency: u64,
    /// Latency of the sink, in microseconds.
    pub sink_latency: u64,
    /// The resampling method in use.
    pub resample_method: String,
    /// The driver name.
    pub driver: String,

    /// Since protocol 11. Whether the stream is muted.
    pub muted: bool,

    /// Since protocol 13. Stream properties.
    pub properties: PropList,

    /// Since protocol 19. Whether the stream is corked.
    pub corked: bool,

    // Since protocol 20.
    /// Whether the stream's volume can be read.
    pub volume_readable: bool,
    /// Whether the stream's volume can be written.
    pub volume_writable: bool,

    /// Since protocol 21. The negotiated format.
    pub format: FormatInfo,
}

impl CommandReply for SinkInputInfo {
    const REPLY_TO: Opcode = Opcode::GetSinkInputInfo;
}

impl WireRead for SinkInputInfo {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = SinkInputInfo {
            sink_input_index: r.read_u32()?,
            media_name: r.read_string()?,
            module_index: r.read_u32()?,
            client_index: r.read_u32()?,
            sink_index: r.read_u32()?,
            sample_spec: r.read()?,
            channel_map: r.read()?,
            channel_volumes: r.read()?,
            sink_input_latency: r.read_usec()?,
            sink_latency: r.read_usec()?,
            resample_method: r.read_string()?,
            driver: r.read_string()?,
            ..Default::default()
        };

        if version.number() >= 11 {
            v.muted = r.read_bool()?;
        }
        if version.number() >= 13 {
            v.properties = r.read()?;
        }
        if version.number() >= 19 {
            v.corked = r.read_bool()?;
        }
        if version.number() >= 20 {
            v.volume_readable = r.read_bool()?;
            v.volume_writable = r.read_bool()?;
        }
        if version.number() >= 21 {
            v.format = r.read()?;
        }

        Ok(v)
    }
}

impl WireWrite for SinkInputInfo {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.sink_input_index)?;
        w.put_string(&self.media_name)?;
        w.put_u32(self.module_index)?;
        w.put_u32(self.client_index)?;
        w.put_u32(self.sink_index)?;
        w.put(self.sample_spec)?;
        w.put(&self.channel_map)?;
        w.put(&self.channel_volumes)?;
        w.put_usec(self.sink_input_latency)?;
        w.put_usec(self.sink_latency)?;
        w.put_string(&self.resample_method)?;
        w.put_string(&self.driver)?;

        if version.number() >= 11 {
            w.put_bool(self.muted)?;
        }
        if version.number() >= 13 {
            w.put(&self.properties)?;
        }
        if version.number() >= 19 {
            w.put_bool(self.corked)?;
        }
        if version.number() >= 20 {
            w.put_bool(self.volume_readable)?;
            w.put_bool(self.volume_writable)?;
        }
        if version.number() >= 21 {
            w.put(&self.format)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::{roundtrip, roundtrip_at};
    use crate::proto::tagstruct::{TagReader, TagWriter};

    fn sample_sink(index: u32) -> SinkInfo {
        let mut properties = PropList::new();
        properties.set("device.description", "Test Sink");

        SinkInfo {
            sink_index: index,
            sink_name: format!("sink-{}", index),
            device: "test".into(),
            sample_spec: SampleSpec {
                channels: 2,
                ..Default::default()
            },
            channel_map: ChannelMap::stereo(),
            channel_volumes: ChannelVolumes::uniform(2, 0x10000),
            monitor_source_index: index + 100,
            monitor_source_name: format!("sink-{}.monitor", index),
            latency: 20_000,
            driver: "module-null-sink.c".into(),
            properties,
            base_volume: Volume::NORM,
            ports: vec![PortInfo {
                name: "analog-output".into(),
                description: "Analog Output".into(),
                priority: 9900,
                available: 2,
            }],
            active_port_name: "analog-output".into(),
            ..Default::default()
        }
    }

    #[test]
    fn get_sink_info_roundtrip() -> anyhow::Result<()> {
        roundtrip(&GetSinkInfo::default())?;
        roundtrip(&GetSinkInfo {
            sink_index: UNDEFINED,
            sink_name: "some-sink".into(),
        })
    }

    #[test]
    fn sink_info_roundtrip() -> anyhow::Result<()> {
        // The port's `available` field gates at 24, so sweep from there up.
        let info = sample_sink(1);
        for number in 24..=35 {
            roundtrip_at(&info, Version::new(number))?;
        }

        let mut early = info;
        early.ports[0].available = 0;
        roundtrip_at(&early, Version::new(16))
    }

    #[test]
    fn sink_info_list_decodes_until_exhausted() -> anyhow::Result<()> {
        let version = Version::new(32);
        let infos = vec![sample_sink(1), sample_sink(2), sample_sink(3)];

        let mut buf = Vec::new();
        {
            let mut w = TagWriter::new(&mut buf, version);
            infos.write(&mut w, version)?;
        }

        let mut cursor = std::io::Cursor::new(&buf);
        let mut r = TagReader::new(&mut cursor, version);
        let back = <Vec<SinkInfo>>::read(&mut r, version)?;
        pretty_assertions::assert_eq!(infos, back);

        Ok(())
    }

    #[test]
    fn source_info_roundtrip() -> anyhow::Result<()> {
        let info = SourceInfo {
            source_index: 4,
            source_name: "mic".into(),
            channel_map: ChannelMap::mono(),
            channel_volumes: ChannelVolumes::uniform(1, 0x10000),
            monitor_of_sink_index: UNDEFINED,
            ..Default::default()
        };

        roundtrip_at(&info, Version::new(32))?;
        roundtrip_at(&info, Version::new(15))
    }

    #[test]
    fn sink_input_info_roundtrip() -> anyhow::Result<()> {
        let info = SinkInputInfo {
            sink_input_index: 9,
            media_name: "sine".into(),
            client_index: 3,
            sink_index: 0,
            channel_volumes: ChannelVolumes::uniform(1, 0x100),
            volume_readable: true,
            volume_writable: true,
            ..Default::default()
        };

        roundtrip(&GetSinkInputInfo {
            sink_input_index: 9,
        })?;
        roundtrip_at(&info, Version::new(32))?;
        roundtrip_at(&info, Version::new(20))?;

        // Below 20 the volume access flags are gated off both ways.
        let early = SinkInputInfo {
            volume_readable: false,
            volume_writable: false,
            ..info
        };
        roundtrip_at(&early, Version::new(19))
    }
}
