//! Unsolicited server-to-client messages.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{PropList, ProtocolError, Version};

use super::{Opcode, SubscribeEvent};

/// The server asking a playback stream for more data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Request {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// How many bytes the server is ready to accept.
    pub length: u32,
}

impl WireRead for Request {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Request {
            stream_index: r.read_u32()?,
            length: r.read_u32()?,
        })
    }
}

impl WireWrite for Request {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.length)
    }
}

/// A playback stream delivered more data than the server could buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overflow {
    /// The connection-scoped stream index.
    pub stream_index: u32,
}

impl WireRead for Overflow {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Overflow {
            stream_index: r.read_u32()?,
        })
    }
}

impl WireWrite for Overflow {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)
    }
}

/// The server ran out of buffered data for a running playback stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Underflow {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// Since protocol 23. The write offset at which the underrun happened.
    pub offset: i64,
}

impl WireRead for Underflow {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = Underflow {
            stream_index: r.read_u32()?,
            ..Default::default()
        };

        if version.number() >= 23 {
            v.offset = r.read_i64()?;
        }

        Ok(v)
    }
}

impl WireWrite for Underflow {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;

        if version.number() >= 23 {
            w.put_i64(self.offset)?;
        }

        Ok(())
    }
}

/// The server started playing a stream (the first data reached the device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Started {
    /// The connection-scoped stream index.
    pub stream_index: u32,
}

impl WireRead for Started {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Started {
            stream_index: r.read_u32()?,
        })
    }
}

impl WireWrite for Started {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)
    }
}

/// A stream was destroyed server-side, e.g. because its device vanished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamKilled {
    /// The connection-scoped stream index.
    pub stream_index: u32,
}

impl WireRead for StreamKilled {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(StreamKilled {
            stream_index: r.read_u32()?,
        })
    }
}

impl WireWrite for StreamKilled {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)
    }
}

/// A stream's device was suspended or woken up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSuspended {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// The new suspension state.
    pub suspended: bool,
}

impl WireRead for StreamSuspended {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(StreamSuspended {
            stream_index: r.read_u32()?,
            suspended: r.read_bool()?,
        })
    }
}

impl WireWrite for StreamSuspended {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_bool(self.suspended)
    }
}

/// A playback stream was moved to a different sink.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackStreamMoved {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// The index of the new sink.
    pub dest_index: u32,
    /// The name of the new sink.
    pub dest_name: String,
    /// Whether the new sink is suspended.
    pub suspended: bool,

    // Since protocol 13.
    /// Effective maximum buffer length on the new sink.
    pub buffer_max_length: u32,
    /// Effective target buffer fill on the new sink.
    pub buffer_target_length: u32,
    /// Effective prebuffer length on the new sink.
    pub buffer_prebuffer_length: u32,
    /// Effective minimum request size on the new sink.
    pub buffer_minimum_request: u32,
    /// The new sink's latency in microseconds.
    pub sink_latency: u64,
}

impl WireRead for PlaybackStreamMoved {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = PlaybackStreamMoved {
            stream_index: r.read_u32()?,
            dest_index: r.read_u32()?,
            dest_name: r.read_string()?,
            suspended: r.read_bool()?,
            ..Default::default()
        };

        if version.number() >= 13 {
            v.buffer_max_length = r.read_u32()?;
            v.buffer_target_length = r.read_u32()?;
            v.buffer_prebuffer_length = r.read_u32()?;
            v.buffer_minimum_request = r.read_u32()?;
            v.sink_latency = r.read_usec()?;
        }

        Ok(v)
    }
}

impl WireWrite for PlaybackStreamMoved {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.dest_index)?;
        w.put_string(&self.dest_name)?;
        w.put_bool(self.suspended)?;

        if version.number() >= 13 {
            w.put_u32(self.buffer_max_length)?;
            w.put_u32(self.buffer_target_length)?;
            w.put_u32(self.buffer_prebuffer_length)?;
            w.put_u32(self.buffer_minimum_request)?;
            w.put_usec(self.sink_latency)?;
        }

        Ok(())
    }
}

/// A record stream was moved to a different source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordStreamMoved {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// The index of the new source.
    pub dest_index: u32,
    /// The name of the new source.
    pub dest_name: String,
    /// Whether the new source is suspended.
    pub suspended: bool,

    // Since protocol 13.
    /// Effective maximum buffer length on the new source.
    pub buffer_max_length: u32,
    /// Effective fragment size on the new source.
    pub buffer_frag_size: u32,
    /// The new source's latency in microseconds.
    pub source_latency: u64,
}

impl WireRead for RecordStreamMoved {
    fn read(r: &mut TagReader<'_>, version: Version) -> Result<Self, ProtocolError> {
        let mut v = RecordStreamMoved {
            stream_index: r.read_u32()?,
            dest_index: r.read_u32()?,
            dest_name: r.read_string()?,
            suspended: r.read_bool()?,
            ..Default::default()
        };

        if version.number() >= 13 {
            v.buffer_max_length = r.read_u32()?;
            v.buffer_frag_size = r.read_u32()?;
            v.source_latency = r.read_usec()?;
        }

        Ok(v)
    }
}

impl WireWrite for RecordStreamMoved {
    fn write(&self, w: &mut TagWriter<'_>, version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.dest_index)?;
        w.put_string(&self.dest_name)?;
        w.put_bool(self.suspended)?;

        if version.number() >= 13 {
            w.put_u32(self.buffer_max_length)?;
            w.put_u32(self.buffer_frag_size)?;
            w.put_usec(self.source_latency)?;
        }

        Ok(())
    }
}

/// A free-form event addressed to the client itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientEvent {
    /// The event name.
    pub event: String,
    /// Event properties.
    pub properties: PropList,
}

impl WireRead for ClientEvent {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(ClientEvent {
            event: r.read_string()?,
            properties: r.read()?,
        })
    }
}

impl WireWrite for ClientEvent {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_string(&self.event)?;
        w.put(&self.properties)
    }
}

/// A free-form event addressed to one stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamEvent {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// The event name.
    pub event: String,
    /// Event properties.
    pub properties: PropList,
}

impl WireRead for StreamEvent {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(StreamEvent {
            stream_index: r.read_u32()?,
            event: r.read_string()?,
            properties: r.read()?,
        })
    }
}

impl WireWrite for StreamEvent {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_string(&self.event)?;
        w.put(&self.properties)
    }
}

/// The server changed a playback stream's buffer metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackBufferAttrChanged {
    /// The connection-scoped stream index.
    pub stream_index: u32,
    /// The new maximum buffer length.
    pub buffer_max_length: u32,
    /// The new target buffer fill.
    pub buffer_target_length: u32,
    /// The new prebuffer length.
    pub buffer_prebuffer_length: u32,
    /// The new minimum request size.
    pub buffer_minimum_request: u32,
    /// The new sink latency in microseconds.
    pub sink_latency: u64,
}

impl WireRead for PlaybackBufferAttrChanged {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(PlaybackBufferAttrChanged {
            stream_index: r.read_u32()?,
            buffer_max_length: r.read_u32()?,
            buffer_target_length: r.read_u32()?,
            buffer_prebuffer_length: r.read_u32()?,
            buffer_minimum_request: r.read_u32()?,
            sink_latency: r.read_usec()?,
        })
    }
}

impl WireWrite for PlaybackBufferAttrChanged {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.stream_index)?;
        w.put_u32(self.buffer_max_length)?;
        w.put_u32(self.buffer_target_length)?;
        w.put_u32(self.buffer_prebuffer_length)?;
        w.put_u32(self.buffer_minimum_request)?;
        w.put_usec(self.sink_latency)
    }
}

/// Every unsolicited control message the client understands, keyed by
/// opcode.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Event {
    Request(Request),
    Overflow(Overflow),
    Underflow(Underflow),
    Started(Started),
    PlaybackStreamKilled(StreamKilled),
    RecordStreamKilled(StreamKilled),
    Subscription(SubscribeEvent),
    PlaybackStreamSuspended(StreamSuspended),
    RecordStreamSuspended(StreamSuspended),
    PlaybackStreamMoved(PlaybackStreamMoved),
    RecordStreamMoved(RecordStreamMoved),
    Client(ClientEvent),
    PlaybackStream(StreamEvent),
    RecordStream(StreamEvent),
    PlaybackBufferAttrChanged(PlaybackBufferAttrChanged),
}

impl Event {
    /// Decodes the event body for the given opcode, or `None` if the
    /// opcode is not an event this client handles.
    pub fn read(op: Opcode, r: &mut TagReader<'_>) -> Result<Option<Event>, ProtocolError> {
        let event = match op {
            Opcode::Request => Event::Request(r.read()?),
            Opcode::Overflow => Event::Overflow(r.read()?),
            Opcode::Underflow => Event::Underflow(r.read()?),
            Opcode::Started => Event::Started(r.read()?),
            Opcode::PlaybackStreamKilled => Event::PlaybackStreamKilled(r.read()?),
            Opcode::RecordStreamKilled => Event::RecordStreamKilled(r.read()?),
            Opcode::SubscribeEvent => Event::Subscription(r.read()?),
            Opcode::PlaybackStreamSuspended => Event::PlaybackStreamSuspended(r.read()?),
            Opcode::RecordStreamSuspended => Event::RecordStreamSuspended(r.read()?),
            Opcode::PlaybackStreamMoved => Event::PlaybackStreamMoved(r.read()?),
            Opcode::RecordStreamMoved => Event::RecordStreamMoved(r.read()?),
            Opcode::ClientEvent => Event::Client(r.read()?),
            Opcode::PlaybackStreamEvent => Event::PlaybackStream(r.read()?),
            Opcode::RecordStreamEvent => Event::RecordStream(r.read()?),
            Opcode::PlaybackBufferAttrChanged => Event::PlaybackBufferAttrChanged(r.read()?),
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::{roundtrip, roundtrip_at};

    #[test]
    fn event_bodies_roundtrip() -> anyhow::Result<()> {
        roundtrip(&Request {
            stream_index: 1,
            length: 4096,
        })?;
        roundtrip(&Overflow { stream_index: 1 })?;
        roundtrip(&Started { stream_index: 1 })?;
        roundtrip(&StreamKilled { stream_index: 1 })?;
        roundtrip(&StreamSuspended {
            stream_index: 1,
            suspended: true,
        })?;
        roundtrip(&PlaybackBufferAttrChanged {
            stream_index: 1,
            buffer_max_length: 16384,
            buffer_target_length: 8192,
            buffer_prebuffer_length: 8192,
            buffer_minimum_request: 1024,
            sink_latency: 25_000,
        })
    }

    #[test]
    fn underflow_offset_gates_at_23() -> anyhow::Result<()> {
        let v = Underflow {
            stream_index: 2,
            offset: 8192,
        };
        roundtrip_at(&v, Version::new(23))?;
        roundtrip_at(&v, Version::new(35))?;

        let early = Underflow {
            offset: 0,
            ..v
        };
        roundtrip_at(&early, Version::new(22))
    }

    #[test]
    fn moved_events_roundtrip() -> anyhow::Result<()> {
        roundtrip(&PlaybackStreamMoved {
            stream_index: 1,
            dest_index: 3,
            dest_name: "other-sink".into(),
            suspended: false,
            buffer_max_length: 16384,
            buffer_target_length: 8192,
            buffer_prebuffer_length: 8192,
            buffer_minimum_request: 1024,
            sink_latency: 30_000,
        })?;
        roundtrip(&RecordStreamMoved {
            stream_index: 2,
            dest_index: 4,
            dest_name: "other-source".into(),
            suspended: true,
            buffer_max_length: 4096,
            buffer_frag_size: 256,
            source_latency: 15_000,
        })
    }

    #[test]
    fn stream_events_roundtrip() -> anyhow::Result<()> {
        let mut properties = PropList::new();
        properties.set("reason", "format-lost");

        roundtrip(&ClientEvent {
            event: "test".into(),
            properties: properties.clone(),
        })?;
        roundtrip(&StreamEvent {
            stream_index: 1,
            event: "format-lost".into(),
            properties,
        })
    }

    #[test]
    fn read_dispatches_by_opcode() -> anyhow::Result<()> {
        use crate::proto::tagstruct::test_util::encode_at;
        use crate::proto::tagstruct::TagReader;
        use crate::proto::Version;

        let version = Version::new(32);
        let body = encode_at(
            &Request {
                stream_index: 5,
                length: 512,
            },
            version,
        )?;

        let mut cursor = std::io::Cursor::new(&body);
        let mut r = TagReader::new(&mut cursor, version);
        let ev = Event::read(Opcode::Request, &mut r)?;
        assert_eq!(
            ev,
            Some(Event::Request(Request {
                stream_index: 5,
                length: 512
            }))
        );

        // A known opcode that is not an event decodes to None.
        let mut cursor = std::io::Cursor::new(&[][..]);
        let mut r = TagReader::new(&mut cursor, version);
        assert_eq!(Event::read(Opcode::Stat, &mut r)?, None);

        Ok(())
    }
}
