//! Server event subscription.

use bitflags::bitflags;

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{ProtocolError, Version};

use super::{CommandRequest, Opcode};

bitflags! {
    /// Which server-side object classes to receive change events for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubscriptionMask: u32 {
        /// Sink changes.
        const SINK = 0x0001;
        /// Source changes.
        const SOURCE = 0x0002;
        /// Sink-input changes.
        const SINK_INPUT = 0x0004;
        /// Source-output changes.
        const SOURCE_OUTPUT = 0x0008;
        /// Module changes.
        const MODULE = 0x0010;
        /// Client changes.
        const CLIENT = 0x0020;
        /// Sample-cache changes.
        const SAMPLE_CACHE = 0x0040;
        /// Global server changes.
        const SERVER = 0x0080;
        /// Autoload table changes.
        const AUTOLOAD = 0x0100;
        /// Card changes.
        const CARD = 0x0200;
        /// Everything.
        const ALL = 0x02ff;
    }
}

/// Subscribes to change events for the masked object classes.
/// Acknowledged with an empty reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Subscribe {
    /// The classes of interest.
    pub mask: SubscriptionMask,
}

impl CommandRequest for Subscribe {
    const OPCODE: Opcode = Opcode::Subscribe;
}

impl WireRead for Subscribe {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Subscribe {
            mask: SubscriptionMask::from_bits_truncate(r.read_u32()?),
        })
    }
}

impl WireWrite for Subscribe {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.mask.bits())
    }
}

/// The object class named in a subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SubscriptionFacility {
    Sink,
    Source,
    SinkInput,
    SourceOutput,
    Module,
    Client,
    SampleCache,
    Server,
    Autoload,
    Card,
    Unknown(u32),
}

/// What happened to the object named in a subscription event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SubscriptionKind {
    New,
    Changed,
    Removed,
    Unknown(u32),
}

/// An unsolicited change notification from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeEvent {
    /// Packed facility and kind.
    pub event: u32,
    /// The index of the affected object.
    pub index: u32,
}

impl SubscribeEvent {
    const FACILITY_MASK: u32 = 0x000f;
    const KIND_MASK: u32 = 0x0030;

    /// The affected object class.
    pub fn facility(&self) -> SubscriptionFacility {
        match self.event & Self::FACILITY_MASK {
            0 => SubscriptionFacility::Sink,
            1 => SubscriptionFacility::Source,
            2 => SubscriptionFacility::SinkInput,
            3 => SubscriptionFacility::SourceOutput,
            4 => SubscriptionFacility::Module,
            5 => SubscriptionFacility::Client,
            6 => SubscriptionFacility::SampleCache,
            7 => SubscriptionFacility::Server,
            8 => SubscriptionFacility::Autoload,
            9 => SubscriptionFacility::Card,
            other => SubscriptionFacility::Unknown(other),
        }
    }

    /// The kind of change.
    pub fn kind(&self) -> SubscriptionKind {
        match self.event & Self::KIND_MASK {
            0x0000 => SubscriptionKind::New,
            0x0010 => SubscriptionKind::Changed,
            0x0020 => SubscriptionKind::Removed,
            other => SubscriptionKind::Unknown(other),
        }
    }
}

impl WireRead for SubscribeEvent {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(SubscribeEvent {
            event: r.read_u32()?,
            index: r.read_u32()?,
        })
    }
}

impl WireWrite for SubscribeEvent {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.event)?;
        w.put_u32(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::roundtrip;

    #[test]
    fn subscribe_roundtrip() -> anyhow::Result<()> {
        roundtrip(&Subscribe {
            mask: SubscriptionMask::SINK | SubscriptionMask::SINK_INPUT,
        })?;
        roundtrip(&SubscribeEvent {
            event: 0x0012,
            index: 4,
        })
    }

    #[test]
    fn event_unpacks_facility_and_kind() {
        let ev = SubscribeEvent {
            event: 0x0012,
            index: 4,
        };

        assert_eq!(ev.facility(), SubscriptionFacility::SinkInput);
        assert_eq!(ev.kind(), SubscriptionKind::Changed);
    }
}
