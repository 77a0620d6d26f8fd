//! The playback engine: a request-driven producer feeding a server-side
//! buffer through a double-buffered pull loop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;

use crate::proto::{
    ChannelMap, ChannelVolumes, CorkPlaybackStream, CreatePlaybackStream,
    CreatePlaybackStreamReply, DeletePlaybackStream, DrainPlaybackStream, FlushPlaybackStream,
    GetSinkInputInfo, SampleSpec, SetSinkInputVolume, SinkInputInfo, CHANNELS_MAX,
};

use super::connection::Connection;
use super::sample::{SampleSource, SourceEnd};
use super::{Client, ClientError, ClientShared, Sink, StreamState};

/// The default volume applied to each channel when none is chosen.
const DEFAULT_CHANNEL_VOLUME: u32 = 0x100;

/// Configures a playback stream before creation.
///
/// Options apply in call order, which matters where they feed each other:
/// [`latency`](PlaybackBuilder::latency) derives byte counts from the
/// sample rate and channel count in effect when it is called, and the last
/// of [`buffer_size`](PlaybackBuilder::buffer_size) / `latency` wins.
#[derive(Debug)]
pub struct PlaybackBuilder {
    req: CreatePlaybackStream,
    bytes_per_sample: usize,
}

impl PlaybackBuilder {
    pub(super) fn new(spec_format: crate::proto::SampleFormat) -> Self {
        PlaybackBuilder {
            req: CreatePlaybackStream {
                sample_spec: SampleSpec {
                    format: spec_format,
                    channels: 1,
                    rate: 44100,
                },
                channel_map: ChannelMap::mono(),
                ..Default::default()
            },
            bytes_per_sample: spec_format.bytes_per_sample(),
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

    /// The server-side buffer size, in samples per channel. Too small a
    /// buffer causes underflows. Mutually exclusive with
    /// [`latency`](PlaybackBuilder::latency); the last one wins.
    pub fn buffer_size(mut self, samples: usize) -> Self {
        self.req.buffer_target_length = (samples * self.bytes_per_sample) as u32;
        self.req.adjust_latency = false;
        self
    }

    /// The stream latency in seconds. Call after setting the sample rate
    /// and channel count. Mutually exclusive with
    /// [`buffer_size`](PlaybackBuilder::buffer_size); the last one wins.
    pub fn latency(mut self, seconds: f64) -> Self {
        let target = (seconds * self.req.sample_spec.rate as f64) as u32
            * self.req.sample_spec.channels as u32
            * self.bytes_per_sample as u32;
        self.req.buffer_target_length = target;
        self.req.buffer_max_length = 2 * target;
        self.req.adjust_latency = true;
        self
    }

    /// The sink to play into. The default is the server's default sink.
    pub fn sink(mut self, sink: &Sink) -> Self {
        self.req.sink_index = sink.index();
        self
    }

    /// The media name shown by volume control applications.
    pub fn media_name(mut self, name: &str) -> Self {
        self.req.properties.set("media.name", name);
        self
    }

    /// An XDG icon name for the media.
    pub fn media_icon_name(mut self, name: &str) -> Self {
        self.req.properties.set("media.icon_name", name);
        self
    }

    #[cfg(test)]
    pub(super) fn into_request(self) -> CreatePlaybackStream {
        self.req
    }
}

pub(crate) struct PlaybackShared {
    conn: Arc<Connection>,
    client: Weak<ClientShared>,
    reply: CreatePlaybackStreamReply,
    bytes_per_sample: usize,

    state: AtomicU32,
    underflow: AtomicBool,
    error: Mutex<Option<Arc<ClientError>>>,

    request_tx: Mutex<Option<mpsc::Sender<usize>>>,
    started_tx: Mutex<Option<mpsc::SyncSender<()>>>,
    started_rx: Mutex<mpsc::Receiver<()>>,
}

impl PlaybackShared {
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

    /// Queues a server request for `n` more bytes.
    pub(super) fn push_request(&self, n: usize) {
        if let Some(tx) = self.request_tx.lock().unwrap().as_ref() {
            let _ = tx.send(n);
        }
    }

    /// Marks the underflow flag if the stream is running.
    pub(super) fn note_underflow(&self) {
        if self.state() == StreamState::Running {
            self.underflow.store(true, Ordering::Relaxed);
        }
    }

    /// Wakes a blocked `start()` once the server reports the stream live.
    pub(super) fn note_started(&self) {
        if self.state() == StreamState::Running && !self.underflow.load(Ordering::Relaxed) {
            if let Some(tx) = self.started_tx.lock().unwrap().as_ref() {
                let _ = tx.try_send(());
            }
        }
    }

    /// The session died: the producer stops, and every operation from now
    /// on reports the closed connection.
    pub(super) fn server_lost(&self) {
        self.set_state(StreamState::ServerLost);
        *self.error.lock().unwrap() = Some(Arc::new(ClientError::ConnectionClosed));
        self.request_tx.lock().unwrap().take();
        self.started_tx.lock().unwrap().take();
    }

    fn record_error(&self, err: ClientError) {
        *self.error.lock().unwrap() = Some(Arc::new(err));
    }

    /// The producer loop. Waits for request sizes, pulls from the source
    /// into the front buffer, ships the bytes, and swaps buffers so the
    /// source never writes into bytes still being sent.
    fn run(self: Arc<Self>, mut source: impl SampleSource, requests: mpsc::Receiver<usize>) {
        let max = self.reply.buffer_max_length as usize;
        let mut front = vec![0u8; max];
        let mut back = vec![0u8; max];
        let mut requested = 0usize;

        while let Ok(n) = requests.recv() {
            if self.state() != StreamState::Running {
                continue;
            }

            requested += n;
            while requested > 0 {
                let want = requested.min(front.len());
                match source.read(&mut front[..want]) {
                    Ok(n) if n > 0 => {
                        if self
                            .conn
                            .send_audio(self.reply.stream_index, &front[..n])
                            .is_err()
                        {
                            return;
                        }
                        requested -= n.min(requested);
                        std::mem::swap(&mut front, &mut back);
                    }
                    Ok(_) | Err(SourceEnd::EndOfData) => {
                        self.stop_from_producer();
                        break;
                    }
                    Err(SourceEnd::Error(err)) => {
                        self.record_error(ClientError::Stream(err));
                        self.stop_from_producer();
                        break;
                    }
                }

                // Fold in any further requests without blocking, so the
                // next producer call sees the full outstanding span.
                while let Ok(more) = requests.try_recv() {
                    requested += more;
                }
            }
        }

        log::debug!(
            "producer for playback stream {} exiting",
            self.reply.stream_index
        );
    }

    fn stop_from_producer(&self) {
        if !self.transition(StreamState::Running, StreamState::Idle) {
            self.transition(StreamState::Paused, StreamState::Idle);
        }
    }
}

/// A stream playing audio pulled from a [`SampleSource`].
///
/// Created idle; call [`start`](PlaybackStream::start) to begin playback.
/// Handles can be freely cloned and shared between threads.
#[derive(Clone)]
pub struct PlaybackStream {
    shared: Arc<PlaybackShared>,
}

impl std::fmt::Debug for PlaybackStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackStream")
            .field("stream_index", &self.shared.reply.stream_index)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl PlaybackStream {
    pub(super) fn new(
        client: &Client,
        source: impl SampleSource,
        configure: impl FnOnce(PlaybackBuilder) -> PlaybackBuilder,
    ) -> Result<PlaybackStream, ClientError> {
        let builder = configure(PlaybackBuilder::new(source.format()));
        let mut req = builder.req;

        if req.channel_map.is_empty() || req.channel_map.len() > CHANNELS_MAX {
            return Err(ClientError::InvalidChannelMap);
        }
        if req.channel_volumes.is_empty() {
            req.channel_volumes =
                ChannelVolumes::uniform(req.channel_map.len(), DEFAULT_CHANNEL_VOLUME);
        }

        let conn = client.shared.conn.clone();
        let reply: CreatePlaybackStreamReply = conn.roundtrip(&req)?;
        log::debug!(
            "created playback stream {} (sink input {}, buffer {}/{} bytes)",
            reply.stream_index,
            reply.sink_input_index,
            reply.buffer_target_length,
            reply.buffer_max_length,
        );

        let (request_tx, request_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let shared = Arc::new(PlaybackShared {
            conn,
            client: Arc::downgrade(&client.shared),
            reply,
            bytes_per_sample: builder.bytes_per_sample,
            state: AtomicU32::new(StreamState::Idle as u32),
            underflow: AtomicBool::new(false),
            error: Mutex::new(None),
            request_tx: Mutex::new(Some(request_tx)),
            started_tx: Mutex::new(Some(started_tx)),
            started_rx: Mutex::new(started_rx),
        });

        client
            .shared
            .playback
            .lock()
            .unwrap()
            .insert(shared.reply.stream_index, shared.clone());

        let runner = shared.clone();
        thread::Builder::new()
            .name(format!("pulseio-playback-{}", shared.reply.stream_index))
            .spawn(move || runner.run(source, request_rx))?;

        Ok(PlaybackStream { shared })
    }

    /// Starts playback. Blocks until the server reports the stream live.
    ///
    /// A stream that stopped (end of data or a source error) can be
    /// started again; the recorded error is cleared.
    pub fn start(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if !s.transition(StreamState::Idle, StreamState::Running) {
            return Ok(());
        }

        let run = || -> Result<(), ClientError> {
            s.conn.roundtrip_ack(&FlushPlaybackStream {
                stream_index: s.reply.stream_index,
            })?;
            *s.error.lock().unwrap() = None;
            s.underflow.store(false, Ordering::Relaxed);

            // A stale signal from a previous run must not satisfy this
            // start; the server cannot send a fresh one before the uncork.
            {
                let rx = s.started_rx.lock().unwrap();
                while rx.try_recv().is_ok() {}
            }

            s.push_request(s.reply.buffer_target_length as usize);
            s.conn.roundtrip_ack(&CorkPlaybackStream {
                stream_index: s.reply.stream_index,
                corked: false,
            })?;

            let rx = s.started_rx.lock().unwrap();
            rx.recv().map_err(|_| ClientError::ConnectionClosed)
        };

        let result = run();
        if result.is_err() {
            s.transition(StreamState::Running, StreamState::Idle);
        }
        result
    }

    /// Stops calling the producer. Audio already buffered server-side may
    /// keep playing until the server underflows.
    pub fn stop(&self) {
        let s = &self.shared;
        if !s.transition(StreamState::Running, StreamState::Idle) {
            s.transition(StreamState::Paused, StreamState::Idle);
        }
    }

    /// Pauses playback immediately by corking the server side.
    pub fn pause(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if s.transition(StreamState::Running, StreamState::Paused) {
            s.conn.roundtrip_ack(&CorkPlaybackStream {
                stream_index: s.reply.stream_index,
                corked: true,
            })?;
        }

        Ok(())
    }

    /// Resumes a paused stream.
    pub fn resume(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        if s.transition(StreamState::Paused, StreamState::Running) {
            s.conn.roundtrip_ack(&CorkPlaybackStream {
                stream_index: s.reply.stream_index,
                corked: false,
            })?;
            s.underflow.store(false, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Blocks until the server has played every byte already delivered.
    /// Does nothing for a stream that is not running.
    pub fn drain(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::Running {
            s.conn.roundtrip_ack(&DrainPlaybackStream {
                stream_index: s.reply.stream_index,
            })?;
        }

        Ok(())
    }

    /// Destroys the stream. The producer task exits once its queue drains.
    pub fn close(&self) -> Result<(), ClientError> {
        let s = &self.shared;
        if s.state() == StreamState::ServerLost {
            return Err(ClientError::ConnectionClosed);
        }
        let closing = s.transition(StreamState::Running, StreamState::Closed)
            || s.transition(StreamState::Paused, StreamState::Closed)
            || s.transition(StreamState::Idle, StreamState::Closed);
        if !closing {
            return Ok(());
        }

        if let Some(client) = s.client.upgrade() {
            client
                .playback
                .lock()
                .unwrap()
                .remove(&s.reply.stream_index);
        }
        s.request_tx.lock().unwrap().take();
        s.started_tx.lock().unwrap().take();

        s.conn.roundtrip_ack(&DeletePlaybackStream {
            stream_index: s.reply.stream_index,
        })
    }

    /// The stream's lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Whether the stream is currently playing.
    pub fn running(&self) -> bool {
        self.shared.state() == StreamState::Running
    }

    /// Whether the stream was closed.
    pub fn closed(&self) -> bool {
        self.shared.state() == StreamState::Closed
    }

    /// Whether any underflow happened since the last start or resume.
    pub fn underflow(&self) -> bool {
        self.shared.underflow.load(Ordering::Relaxed)
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

    /// The server-side buffer size, in samples per channel.
    pub fn buffer_size(&self) -> usize {
        let per_channel =
            self.shared.reply.buffer_target_length as usize / self.channels().max(1);
        per_channel / self.shared.bytes_per_sample
    }

    /// The server-side buffer size in bytes.
    pub fn buffer_size_bytes(&self) -> usize {
        self.shared.reply.buffer_target_length as usize
    }

    /// The connection-scoped stream index, for use with raw requests.
    pub fn stream_index(&self) -> u32 {
        self.shared.reply.stream_index
    }

    /// The server-wide sink-input index of this stream.
    pub fn sink_input_index(&self) -> u32 {
        self.shared.reply.sink_input_index
    }

    /// Reads the stream's current per-channel volumes.
    pub fn volume(&self) -> Result<ChannelVolumes, ClientError> {
        let info: SinkInputInfo = self.shared.conn.roundtrip(&GetSinkInputInfo {
            sink_input_index: self.shared.reply.sink_input_index,
        })?;

        Ok(info.channel_volumes)
    }

    /// Changes the stream's per-channel volumes.
    ///
    /// Don't set a volume when opening a stream; the server picks (and may
    /// remember) an appropriate one. Change it only on user input.
    pub fn set_volume(&self, volumes: ChannelVolumes) -> Result<(), ClientError> {
        self.shared.conn.roundtrip_ack(&SetSinkInputVolume {
            sink_input_index: self.shared.reply.sink_input_index,
            channel_volumes: volumes,
        })
    }
}
