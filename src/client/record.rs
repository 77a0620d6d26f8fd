//! The record engine: server-push audio delivered to a [`SampleSink`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crate::proto::{
    ChannelMap, ChannelVolumes, CorkRecordStream, CreateRecordStream, CreateRecordStreamReply,
    DeleteRecordStream, FlushRecordStream, SampleSpec, CHANNELS_MAX,
};

use super::connection::Connection;
use super::sample::SampleSink;
use super::{Client, ClientError, ClientShared, Source, StreamState};

const DEFAULT_CHANNEL_VOLUME: u32 = 0x100;

/// Configures a record stream before creation. Options apply in call
/// order.
#[derive(Debug)]
pub struct RecordBuilder {
    req: CreateRecordStream,
}

impl RecordBuilder {
    pub(super) fn new(format: crate::proto::SampleFormat) -> Self {
        RecordBuilder {
            req: CreateRecordStream {
                sample_spec: SampleSpec {
                    format,
                    channels: 1,
                    rate: 44100,
                },
                channel_map: ChannelMap::mono(),
                ..Default::default()
            },
        }
    }

    /// A single-channel stream.
    pub fn mono(self) -> Self {
        self.channels(ChannelMap::mono())
    }

    /// A two-channel stream.
    pub fn stereo(self) -> Self {
        self.channels(ChannelMap::stereo())
    }

    /// A custom channel map. The channel count follows the map.
    pub fn channels(mut self, map: ChannelMap) -> Self {
        self.req.sample_spec.channels = map.len() as u8;
        self.req.channel_map = map;
        self
    }

    /// The stream's sample rate.
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.req.sample_spec.rate = rate;
        self
    }

    /// The fragment size in bytes: how much audio the server pushes per
    /// data packet.
    pub fn fragment_size(mut self, bytes: u32) -> Self {
        self.req.buffer_frag_size = bytes;
        self
    }

    /// Adjust source latency to the requested fragment size.
    pub fn adjust_latency(mut self, adjust: bool) -> Self {
        self.req.adjust_latency = adjust;
        self
    }

    /// The source to capture from. The default is the server's default
    /// source.
    pub fn source(mut self, source: &Source) -> Self {
        self.req.source_index = source.index();
        self
    }

    /// Captures from an arbitrary source index, e.g. a sink monitor.
    pub fn source_index(mut self, index: u32) -> Self {
        self.req.source_index = index;
        self
    }
}

pub(crate) struct RecordShared {
    conn: Arc<Connection>,
    client: Weak<ClientShared>,
    reply: CreateRecordStreamReply,

    state: AtomicU32,
    error: Mutex<Option<Arc<ClientError>>>,
    sink: Mutex<Box<dyn SampleSink>>,
    stopping: AtomicBool,
}

impl RecordShared {
    pub(super) fn state(&self) -> StreamState {
        StreamState::from_bits(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u32, Ordering::Release);
    }

    fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Feeds one data packet to the sink, on the connection's reader
    /// thread. A sink failure records the error and corks the stream from
    /// a separate thread, so the reader never writes reentrantly.
    pub(super) fn deliver(self: &Arc<Self>, data: &[u8]) {
        let result = self.sink.lock().unwrap().write(data);
        let Err(err) = result else {
            return;
        };

        *self.error.lock().unwrap() = Some(Arc::new(ClientError::Stream(err)));
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = self.clone();
        let _ = thread::Builder::new()
            .name("pulseio-record-stop".into())
            .spawn(move || {
                if shared.transition(StreamState::Running, StreamState::Idle) {
                    let _ = shared.conn.roundtrip_ack(&CorkRecordStream {
                        stream_index: shared.reply.stream_index,
                        corked: true,
                    });
                }
                shared.stopping.store(false, Ordering::Release);
            });
    }

    /// The session died.
    pub(super) fn server_lost(&self) {
        self.set_state(StreamState::ServerLost);
        *self.error.lock().unwrap() = Some(Arc::new(ClientError::ConnectionClosed));
    }
}

/// A stream capturing audio into a [`SampleSink`].
///
/// Created idle; call [`start`](RecordStream::start) to begin capture.
/// Handles can be freely cloned and shared between threads.
#[derive(Clone)]
pub struct RecordStream {
    shared: Arc<RecordShared>,
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("stream_index", &self.shared.reply.stream_index)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl RecordStream {
    pub(super) fn new(
        client: &Client,
        sink: impl SampleSink,
        configure: impl FnOnce(RecordBuilder) -> RecordBuilder,
    ) -> Result<RecordStream, ClientError> {
        let builder = configure(RecordBuilder::new(sink.format()));
        let mut req = builder.req;

        if req.channel_map.is_empty() || req.channel_map.len() > CHANNELS_MAX {
            return Err(ClientError::InvalidChannelMap);
        }
        req.channel_volumes =
            ChannelVolumes::uniform(req.channel_map.len(), DEFAULT_CHANNEL_VOLUME);

        let conn = client.shared.conn.clone();
        let reply: CreateRecordStreamReply = conn.roundtrip(&req)?;
        log::debug!(
            "created record stream {} (source output {}, fragment {} bytes)",
            reply.stream_index,
            reply.source_output_index,
            reply.buffer_frag_size,
        );

        let shared = Arc::new(RecordShared {
            conn,
            client: Arc::downgrade(&client.shared),
            reply,
            state: AtomicU32::new(StreamState::Idle as u32),
            error: Mutex::new(None),
            sink: Mutex::new(Box::new(sink)),
            stopping: AtomicBool::new(false),
        });

        client
            .shared
            .record
            .lock()
            .unwrap()
            .insert(shared.reply.stream_index, shared.clone());

        Ok(RecordStream { shared })
    }

    /// Starts capturing: discards stale buffered data, then uncorks.
    pub fn start(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if !s.transition(StreamState::Idle, StreamState::Running) {
            return Ok(());
        }

        *s.error.lock().unwrap() = None;
        s.conn.roundtrip_ack(&FlushRecordStream {
            stream_index: s.reply.stream_index,
        })?;
        s.conn.roundtrip_ack(&CorkRecordStream {
            stream_index: s.reply.stream_index,
            corked: false,
        })
    }

    /// Stops capturing by corking the server side.
    pub fn stop(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if s.transition(StreamState::Running, StreamState::Idle) {
            s.conn.roundtrip_ack(&CorkRecordStream {
                stream_index: s.reply.stream_index,
                corked: true,
            })?;
        }

        Ok(())
    }

    /// Resumes a stopped stream without flushing.
    pub fn resume(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if s.transition(StreamState::Idle, StreamState::Running) {
            s.conn.roundtrip_ack(&CorkRecordStream {
                stream_index: s.reply.stream_index,
                corked: false,
            })?;
        }

        Ok(())
    }

    /// Destroys the stream.
    pub fn close(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        let closing = s.transition(StreamState::Running, StreamState::Closed)
            || s.transition(StreamState::Idle, StreamState::Closed);
        if !closing {
            return Ok(());
        }

        if let Some(client) = s.client.upgrade() {
            client.record.lock().unwrap().remove(&s.reply.stream_index);
        }

        s.conn.roundtrip_ack(&DeleteRecordStream {
            stream_index: s.reply.stream_index,
        })
    }

    /// The stream's lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Whether the stream is currently capturing.
    pub fn running(&self) -> bool {
        self.shared.state() == StreamState::Running
    }

    /// The last error recorded on the stream, if any. Cleared by the next
    /// start.
    pub fn error(&self) -> Option<Arc<ClientError>> {
        self.shared.error.lock().unwrap().clone()
    }

    /// The negotiated sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.shared.reply.sample_spec.rate
    }

    /// The negotiated channel count.
    pub fn channels(&self) -> usize {
        self.shared.reply.sample_spec.channels as usize
    }

    /// The fragment size confirmed by the server, in bytes.
    pub fn fragment_size(&self) -> usize {
        self.shared.reply.buffer_frag_size as usize
    }

    /// The connection-scoped stream index, for use with raw requests.
    pub fn stream_index(&self) -> u32 {
        self.shared.reply.stream_index
    }

    /// The server-wide source-output index of this stream.
    pub fn source_output_index(&self) -> u32 {
        self.shared.reply.source_output_index
    }
}
