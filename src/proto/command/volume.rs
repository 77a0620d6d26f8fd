//! Volume control commands.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{ChannelVolumes, ProtocolError, Version};

use super::{CommandRequest, Opcode};

/// Sets the volume of a sink input. Acknowledged with an empty reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetSinkInputVolume {
    /// The sink-input index.
    pub sink_input_index: u32,
    /// The new per-channel volumes.
    pub channel_volumes: ChannelVolumes,
}

impl CommandRequest for SetSinkInputVolume {
    const OPCODE: Opcode = Opcode::SetSinkInputVolume;
}

impl WireRead for SetSinkInputVolume {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(SetSinkInputVolume {
            sink_input_index: r.read_u32()?,
            channel_volumes: r.read()?,
        })
    }
}

impl WireWrite for SetSinkInputVolume {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.sink_input_index)?;
        w.put(&self.channel_volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::roundtrip;

    #[test]
    fn set_sink_input_volume_roundtrip() -> anyhow::Result<()> {
        roundtrip(&SetSinkInputVolume {
            sink_input_index: 42,
            channel_volumes: ChannelVolumes::uniform(2, 0x8000),
        })
    }
}
