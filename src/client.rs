//! The client facade: session bootstrap, stream registries, and event
//! fan-out.

mod address;
mod connection;
mod device;
mod playback;
mod record;
mod sample;

pub use device::*;
pub use playback::{PlaybackBuilder, PlaybackStream};
pub use record::{RecordBuilder, RecordStream};
pub use sample::*;

use std::{
    collections::HashMap,
    env,
    os::unix::net::UnixStream,
    path::Path,
    sync::{Arc, Mutex},
};

use connection::{Connection, Incoming, Transport};
use playback::PlaybackShared;
use record::RecordShared;

use crate::proto::{
    self, CommandReply, CommandRequest, Event, GetSinkInfo, GetSinkInfoList, GetSourceInfo,
    GetSourceInfoList, PropList, SetClientName, SetClientNameReply, SinkInfo, SourceInfo,
};

/// An error surfaced by a [`Client`] operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The peer closed the connection; also delivered to every request
    /// that was in flight when it happened.
    #[error("connection closed")]
    ConnectionClosed,
    /// No server address was available to try.
    #[error("no valid server address")]
    NoValidServer,
    /// A server string was given but contained no usable entry.
    #[error("invalid server string")]
    InvalidServerString,
    /// The cookie file exists but could not be read.
    #[error("error reading cookie file: {0}")]
    Cookie(std::io::Error),
    /// The reply type passed to a raw request does not answer the
    /// request's opcode.
    #[error("reply type does not answer the request opcode")]
    WrongReplyType,
    /// A stream was configured with an empty or oversized channel map.
    #[error("invalid channel map")]
    InvalidChannelMap,
    /// An error message sent by the server in response to a request.
    #[error("server error: {0}")]
    Server(proto::ErrorCode),
    /// A structural violation decoding a server payload. Fatal to the
    /// session.
    #[error("protocol error: {0}")]
    Protocol(#[from] proto::ProtocolError),
    /// An error returned by a stream's sample source or sink.
    #[error("stream callback error: {0}")]
    Stream(StreamError),
    /// A socket-level error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The lifecycle state of a playback or record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StreamState {
    /// Created or stopped; the stream exists but moves no audio.
    Idle = 0,
    /// Audio is flowing.
    Running = 1,
    /// Corked by [`PlaybackStream::pause`].
    Paused = 2,
    /// Destroyed by an explicit close.
    Closed = 3,
    /// The session ended underneath the stream. Terminal.
    ServerLost = 4,
}

impl StreamState {
    pub(crate) fn from_bits(v: u32) -> StreamState {
        match v {
            0 => StreamState::Idle,
            1 => StreamState::Running,
            2 => StreamState::Paused,
            3 => StreamState::Closed,
            _ => StreamState::ServerLost,
        }
    }
}

pub(crate) struct ClientShared {
    pub(crate) conn: Arc<Connection>,
    pub(crate) playback: Mutex<HashMap<u32, Arc<PlaybackShared>>>,
    pub(crate) record: Mutex<HashMap<u32, Arc<RecordShared>>>,
}

impl ClientShared {
    /// Routes reader-thread traffic to the affected stream. Runs on the
    /// connection's reader thread, so it only pokes channels and atomics.
    fn dispatch(&self, incoming: Incoming<'_>) {
        match incoming {
            Incoming::Event(Event::Request(rq)) => {
                let stream = self.playback.lock().unwrap().get(&rq.stream_index).cloned();
                match stream {
                    Some(stream) => stream.push_request(rq.length as usize),
                    None => {
                        log::warn!("request for unknown playback stream {}", rq.stream_index)
                    }
                }
            }
            Incoming::Event(Event::Started(ev)) => {
                let stream = self.playback.lock().unwrap().get(&ev.stream_index).cloned();
                if let Some(stream) = stream {
                    stream.note_started();
                }
            }
            Incoming::Event(Event::Underflow(ev)) => {
                let stream = self.playback.lock().unwrap().get(&ev.stream_index).cloned();
                if let Some(stream) = stream {
                    stream.note_underflow();
                }
            }
            Incoming::Event(event) => log::debug!("unhandled event: {:?}", event),
            Incoming::Data { stream, data } => {
                let record = self.record.lock().unwrap().get(&stream).cloned();
                match record {
                    Some(record) => record.deliver(data),
                    None => log::warn!("data for unknown record stream {}", stream),
                }
            }
            Incoming::Closed(_) => {
                for (_, stream) in self.playback.lock().unwrap().drain() {
                    stream.server_lost();
                }
                for (_, stream) in self.record.lock().unwrap().drain() {
                    stream.server_lost();
                }
            }
        }
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        self.conn.close();
    }
}

/// A connection to the server. An application typically uses one client;
/// handles can be freely cloned and shared between threads.
#[derive(Clone)]
pub struct Client {
    pub(crate) shared: Arc<ClientShared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("version", &self.protocol_version())
            .finish()
    }
}

/// Configuration for [`Client::connect`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    server: Option<String>,
    application_name: Option<String>,
    application_icon_name: Option<String>,
}

impl ClientBuilder {
    /// Overrides the server string. The default comes from $PULSE_SERVER,
    /// falling back to the platform's usual socket path.
    pub fn server_string(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// A human-readable application name, shown by volume controls.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// An XDG icon name for the application.
    pub fn application_icon_name(mut self, name: impl Into<String>) -> Self {
        self.application_icon_name = Some(name.into());
        self
    }

    /// Dials, authenticates and names the client.
    pub fn connect(self) -> Result<Client, ClientError> {
        let conn = address::connect(self.server.as_deref())?;
        Client::finish(
            conn,
            default_props(self.application_name, self.application_icon_name),
        )
    }
}

fn default_props(application_name: Option<String>, icon_name: Option<String>) -> PropList {
    let binary = env::args().next().unwrap_or_default();
    let base = Path::new(&binary)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut props = PropList::new();
    props.set("media.name", "pulseio");
    props.set("application.name", &application_name.unwrap_or(base));
    props.set(
        "application.icon_name",
        icon_name.as_deref().unwrap_or("audio-x-generic"),
    );
    props.set("application.process.id", &std::process::id().to_string());
    props.set("application.process.binary", &binary);
    props.set(
        "window.x11.display",
        &env::var("DISPLAY").unwrap_or_default(),
    );

    props
}

impl Client {
    /// Connects with default configuration.
    pub fn connect() -> Result<Client, ClientError> {
        Client::builder().connect()
    }

    /// Starts building a connection.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Connects over an already-established unix stream, authenticating
    /// with the cookie from the environment.
    pub fn connect_stream(socket: UnixStream) -> Result<Client, ClientError> {
        let cookie = address::load_cookie()?;
        let conn = Connection::open(Transport::Unix(socket))?;
        address::authenticate(&conn, cookie)?;

        Client::finish(conn, default_props(None, None))
    }

    fn finish(conn: Arc<Connection>, props: PropList) -> Result<Client, ClientError> {
        let _: SetClientNameReply = conn.roundtrip(&SetClientName { props })?;

        let shared = Arc::new(ClientShared {
            conn,
            playback: Mutex::new(HashMap::new()),
            record: Mutex::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&shared);
        shared.conn.set_handler(move |incoming| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(incoming);
            }
        });

        Ok(Client { shared })
    }

    /// The protocol version negotiated with the server.
    pub fn protocol_version(&self) -> u16 {
        self.shared.conn.version().number()
    }

    /// Closes the connection. Pending requests fail with
    /// [`ClientError::ConnectionClosed`] and streams become
    /// [`StreamState::ServerLost`].
    pub fn close(&self) {
        self.shared.conn.close();
    }

    /// Fetches every sink on the server.
    pub fn list_sinks(&self) -> Result<Vec<Sink>, ClientError> {
        let infos: Vec<SinkInfo> = self.shared.conn.roundtrip(&GetSinkInfoList)?;
        Ok(infos.into_iter().map(|info| Sink { info }).collect())
    }

    /// Fetches every source on the server.
    pub fn list_sources(&self) -> Result<Vec<Source>, ClientError> {
        let infos: Vec<SourceInfo> = self.shared.conn.roundtrip(&GetSourceInfoList)?;
        Ok(infos.into_iter().map(|info| Source { info }).collect())
    }

    /// Fetches the server's default sink.
    pub fn default_sink(&self) -> Result<Sink, ClientError> {
        let info: SinkInfo = self.shared.conn.roundtrip(&GetSinkInfo::default())?;
        Ok(Sink { info })
    }

    /// Fetches the server's default source.
    pub fn default_source(&self) -> Result<Source, ClientError> {
        let info: SourceInfo = self.shared.conn.roundtrip(&GetSourceInfo::default())?;
        Ok(Source { info })
    }

    /// Fetches a sink by its index.
    pub fn sink_by_index(&self, index: u32) -> Result<Sink, ClientError> {
        let info: SinkInfo = self.shared.conn.roundtrip(&GetSinkInfo {
            sink_index: index,
            sink_name: String::new(),
        })?;
        Ok(Sink { info })
    }

    /// Fetches a source by its index.
    pub fn source_by_index(&self, index: u32) -> Result<Source, ClientError> {
        let info: SourceInfo = self.shared.conn.roundtrip(&GetSourceInfo {
            source_index: index,
            source_name: String::new(),
        })?;
        Ok(Source { info })
    }

    /// Creates a playback stream pulling audio from `source`. The stream
    /// starts idle.
    pub fn new_playback(
        &self,
        source: impl SampleSource,
        configure: impl FnOnce(PlaybackBuilder) -> PlaybackBuilder,
    ) -> Result<PlaybackStream, ClientError> {
        PlaybackStream::new(self, source, configure)
    }

    /// Creates a record stream pushing captured audio into `sink`. The
    /// stream starts idle.
    pub fn new_record(
        &self,
        sink: impl SampleSink,
        configure: impl FnOnce(RecordBuilder) -> RecordBuilder,
    ) -> Result<RecordStream, ClientError> {
        RecordStream::new(self, sink, configure)
    }

    /// Sends an arbitrary catalog request and waits for its typed reply.
    ///
    /// The reply type must answer the request's opcode, otherwise
    /// [`ClientError::WrongReplyType`] is returned without sending
    /// anything.
    pub fn raw_request<Q, R>(&self, req: &Q) -> Result<R, ClientError>
    where
        Q: CommandRequest,
        R: CommandReply + Send + 'static,
    {
        if R::REPLY_TO != Q::OPCODE {
            return Err(ClientError::WrongReplyType);
        }

        self.shared.conn.roundtrip(req)
    }
}
