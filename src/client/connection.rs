//! The connection multiplexer: one reader thread, serialized writes, and a
//! pending-reply table correlating tagged replies with their callers.

use std::{
    collections::HashMap,
    io::{self, BufReader, Read, Write},
    net::TcpStream,
    os::unix::net::UnixStream,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    thread,
};

use futures::channel::oneshot;

use crate::proto::{
    self, tagstruct::TagReader, CommandReply, CommandRequest, Event, Opcode, Version,
};

use super::ClientError;

/// The underlying stream socket.
#[derive(Debug)]
pub(crate) enum Transport {
    /// A unix domain socket.
    Unix(UnixStream),
    /// A TCP socket.
    Tcp(TcpStream),
}

impl Transport {
    fn try_clone(&self) -> io::Result<Transport> {
        match self {
            Transport::Unix(s) => Ok(Transport::Unix(s.try_clone()?)),
            Transport::Tcp(s) => Ok(Transport::Tcp(s.try_clone()?)),
        }
    }

    fn shutdown(&self) {
        let _ = match self {
            Transport::Unix(s) => s.shutdown(std::net::Shutdown::Both),
            Transport::Tcp(s) => s.shutdown(std::net::Shutdown::Both),
        };
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Unix(s) => s.read(buf),
            Transport::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Unix(s) => s.write(buf),
            Transport::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Unix(s) => s.flush(),
            Transport::Tcp(s) => s.flush(),
        }
    }
}

/// A reply handler parked in the pending table. It is fed the reader
/// positioned at the reply body, or the error that resolved the request.
type ReplyHandler = Box<dyn FnOnce(Result<&mut TagReader<'_>, ClientError>) + Send>;

/// What the reader thread hands to the connection's event handler.
#[derive(Debug)]
pub(crate) enum Incoming<'a> {
    /// A decoded non-reply control message.
    Event(Event),
    /// A raw audio payload for the stream with the given index.
    Data {
        /// The connection-scoped stream index from the frame header.
        stream: u32,
        /// The payload, valid only for the duration of the call.
        data: &'a [u8],
    },
    /// The connection terminated; no further callbacks will be made.
    Closed(ClientError),
}

type EventHandler = Box<dyn Fn(Incoming<'_>) + Send + Sync>;

#[derive(Default)]
struct Pending {
    next_tag: u32,
    map: HashMap<u32, ReplyHandler>,
}

/// One authenticated session over one duplex byte stream.
pub(crate) struct Connection {
    writer: Mutex<Transport>,
    ctrl: Transport,
    pending: Mutex<Pending>,
    version: AtomicU32,
    handler: Mutex<Option<Arc<EventHandler>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("version", &self.version())
            .finish()
    }
}

impl Connection {
    /// Takes ownership of the socket and spawns the reader thread.
    pub(crate) fn open(socket: Transport) -> Result<Arc<Connection>, ClientError> {
        let reader = socket.try_clone()?;
        let writer = socket.try_clone()?;

        let conn = Arc::new(Connection {
            writer: Mutex::new(writer),
            ctrl: socket,
            pending: Mutex::new(Pending::default()),
            version: AtomicU32::new(proto::INITIAL_VERSION.bits()),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let handle = conn.clone();
        thread::Builder::new()
            .name("pulseio-reader".into())
            .spawn(move || {
                let err = handle.read_loop(BufReader::new(reader));
                handle.fail(err);
            })?;

        Ok(conn)
    }

    /// The negotiated protocol version.
    pub(crate) fn version(&self) -> Version {
        Version::from_bits(self.version.load(Ordering::Relaxed))
    }

    /// Updates the negotiated version after the auth handshake.
    pub(crate) fn set_version(&self, version: Version) {
        self.version.store(version.bits(), Ordering::Relaxed);
    }

    /// Installs the event handler. The handler runs on the reader thread
    /// and must not issue requests on this connection synchronously.
    pub(crate) fn set_handler<F>(&self, handler: F)
    where
        F: Fn(Incoming<'_>) + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Arc::new(Box::new(handler)));
    }

    /// Shuts the socket down, which makes the reader thread fail every
    /// outstanding request and notify the handler.
    pub(crate) fn close(&self) {
        self.ctrl.shutdown();
    }

    /// Whether the connection has terminated.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends a request and blocks until its typed reply arrives.
    pub(crate) fn roundtrip<Q, R>(&self, req: &Q) -> Result<R, ClientError>
    where
        Q: CommandRequest,
        R: CommandReply + Send + 'static,
    {
        let version = self.version();
        let (tx, rx) = oneshot::channel();
        self.send_request(
            req,
            Box::new(move |res| {
                let _ = tx.send(res.and_then(|ts| R::read(ts, version).map_err(ClientError::from)));
            }),
        )?;

        futures::executor::block_on(rx).map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Sends a request and blocks until its empty acknowledgement arrives.
    pub(crate) fn roundtrip_ack<Q: CommandRequest>(&self, req: &Q) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send_request(
            req,
            Box::new(move |res| {
                let _ = tx.send(res.map(|_| ()));
            }),
        )?;

        futures::executor::block_on(rx).map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Sends a raw audio payload for the given stream. Audio frames are
    /// not correlated with any reply.
    pub(crate) fn send_audio(&self, stream: u32, data: &[u8]) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        log::trace!("sending {} bytes to stream {}", data.len(), stream);
        self.send_frame(proto::Descriptor::audio(stream, data.len() as u32), data)
    }

    fn send_request<Q: CommandRequest>(
        &self,
        req: &Q,
        handler: ReplyHandler,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }

        let tag = {
            let mut pending = self.pending.lock().unwrap();
            let tag = pending.next_tag;
            pending.next_tag += 1;
            pending.map.insert(tag, handler);
            tag
        };

        log::debug!("client [{}]: {:?}", tag, Q::OPCODE);
        let body = proto::encode_request(tag, req, self.version())?;

        if let Err(err) = self.send_frame(proto::Descriptor::control(body.len() as u32), &body) {
            self.pending.lock().unwrap().map.remove(&tag);
            return Err(err);
        }

        Ok(())
    }

    fn send_frame(&self, desc: proto::Descriptor, payload: &[u8]) -> Result<(), ClientError> {
        let mut w = self.writer.lock().unwrap();
        proto::write_descriptor(&mut *w, &desc)?;
        w.write_all(payload)?;
        w.flush()?;

        Ok(())
    }

    fn read_loop(&self, mut r: BufReader<Transport>) -> ClientError {
        let mut payload = Vec::new();
        loop {
            let desc = match proto::read_descriptor(&mut r) {
                Ok(desc) => desc,
                Err(err) => return connection_error(err),
            };

            payload.resize(desc.length as usize, 0);
            if let Err(err) = r.read_exact(&mut payload) {
                return connection_error(err.into());
            }

            if desc.channel == proto::CONTROL_CHANNEL {
                if let Err(err) = self.dispatch_control(&payload) {
                    return err;
                }
            } else {
                log::trace!("{} bytes of data for stream {}", desc.length, desc.channel);
                self.with_handler(Incoming::Data {
                    stream: desc.channel,
                    data: &payload,
                });
            }
        }
    }

    fn dispatch_control(&self, payload: &[u8]) -> Result<(), ClientError> {
        let mut cursor = io::Cursor::new(payload);
        let mut ts = TagReader::new(&mut cursor, self.version());

        let op = ts.read_u32()?;
        let tag = ts.read_u32()?;

        let Some(op) = <Opcode as num_traits::FromPrimitive>::from_u32(op) else {
            log::debug!("discarding message with unknown opcode {}", op);
            return Ok(());
        };

        match op {
            Opcode::Reply => {
                log::debug!("server [{}]: reply", tag);
                match self.take_pending(tag) {
                    Some(handler) => handler(Ok(&mut ts)),
                    None => log::warn!("reply for unknown tag {}", tag),
                }
            }
            Opcode::Error => {
                // The error body is a single tagged u32 code.
                ts.raw_u8()?;
                let code = proto::ErrorCode::from_wire(ts.raw_u32()?);
                log::debug!("server [{}]: error: {}", tag, code);
                match self.take_pending(tag) {
                    Some(handler) => handler(Err(ClientError::Server(code))),
                    None => log::warn!("error {} for unknown tag {}", code, tag),
                }
            }
            op => match Event::read(op, &mut ts)? {
                Some(event) => {
                    log::debug!("server: {:?}", event);
                    self.with_handler(Incoming::Event(event));
                }
                None => log::debug!("ignoring unexpected command {:?}", op),
            },
        }

        // Leftover payload bytes are dropped with the frame buffer.
        Ok(())
    }

    fn take_pending(&self, tag: u32) -> Option<ReplyHandler> {
        self.pending.lock().unwrap().map.remove(&tag)
    }

    fn with_handler(&self, incoming: Incoming<'_>) {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => (*handler)(incoming),
            None => log::trace!("no handler installed, dropping {:?}", incoming),
        }
    }

    /// Terminates the connection: every outstanding request resolves with
    /// [`ClientError::ConnectionClosed`], then the handler is told why.
    fn fail(&self, err: ClientError) {
        self.closed.store(true, Ordering::Release);
        self.ctrl.shutdown();

        let handlers: Vec<ReplyHandler> = {
            let mut pending = self.pending.lock().unwrap();
            pending.map.drain().map(|(_, h)| h).collect()
        };
        for handler in handlers {
            handler(Err(ClientError::ConnectionClosed));
        }

        log::error!("connection terminated: {}", err);
        self.with_handler(Incoming::Closed(err));
    }
}

/// Maps reader-side failures onto the error surfaced to callers. A peer
/// EOF reads as an orderly close.
fn connection_error(err: crate::proto::ProtocolError) -> ClientError {
    match err {
        crate::proto::ProtocolError::Io(ref io_err)
            if io_err.kind() == io::ErrorKind::UnexpectedEof =>
        {
            ClientError::ConnectionClosed
        }
        err => err.into(),
    }
}

/// Reads one whole frame, header plus payload. Test servers use this to
/// consume client traffic.
#[cfg(test)]
pub(crate) fn read_frame<R: io::BufRead>(
    r: &mut R,
) -> Result<(proto::Descriptor, Vec<u8>), crate::proto::ProtocolError> {
    let desc = proto::read_descriptor(r)?;
    let mut payload = vec![0; desc.length as usize];
    r.read_exact(&mut payload)?;

    Ok((desc, payload))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::proto::{
        tagstruct::{TagWriter, WireWrite},
        ChannelMap, ChannelVolumes, GetSinkInfoList, SampleSpec, SinkInfo,
    };

    fn open_pair() -> (Arc<Connection>, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let conn = Connection::open(Transport::Unix(ours)).unwrap();
        (conn, theirs)
    }

    fn write_reply_frame<T: WireWrite>(
        sock: &mut UnixStream,
        tag: u32,
        value: &T,
        version: Version,
    ) {
        let mut body = Vec::new();
        {
            let mut w = TagWriter::new(&mut body, version);
            w.put_u32(Opcode::Reply as u32).unwrap();
            w.put_u32(tag).unwrap();
            w.put(value).unwrap();
        }
        proto::write_descriptor(sock, &proto::Descriptor::control(body.len() as u32)).unwrap();
        sock.write_all(&body).unwrap();
    }

    fn write_error_frame(sock: &mut UnixStream, tag: u32, code: u32) {
        let mut body = Vec::new();
        {
            let mut w = TagWriter::new(&mut body, proto::INITIAL_VERSION);
            w.put_u32(Opcode::Error as u32).unwrap();
            w.put_u32(tag).unwrap();
            w.put_u32(code).unwrap();
        }
        proto::write_descriptor(sock, &proto::Descriptor::control(body.len() as u32)).unwrap();
        sock.write_all(&body).unwrap();
    }

    fn write_event_frame<T: WireWrite>(
        sock: &mut UnixStream,
        op: Opcode,
        value: &T,
        version: Version,
    ) {
        let mut body = Vec::new();
        {
            let mut w = TagWriter::new(&mut body, version);
            w.put_u32(op as u32).unwrap();
            w.put_u32(u32::MAX).unwrap();
            w.put(value).unwrap();
        }
        proto::write_descriptor(sock, &proto::Descriptor::control(body.len() as u32)).unwrap();
        sock.write_all(&body).unwrap();
    }

    fn sink(index: u32) -> SinkInfo {
        SinkInfo {
            sink_index: index,
            sink_name: format!("sink-{}", index),
            sample_spec: SampleSpec::default(),
            channel_map: ChannelMap::mono(),
            channel_volumes: ChannelVolumes::uniform(1, 0x10000),
            ..Default::default()
        }
    }

    #[test_log::test]
    fn concurrent_requests_resolve_out_of_order() {
        let (conn, mut sock) = open_pair();
        let version = conn.version();

        // Three concurrent lookups, each for a different sink index.
        let mut waiters = Vec::new();
        for index in 0..3u32 {
            let conn = conn.clone();
            waiters.push(thread::spawn(move || {
                let info: proto::SinkInfo = conn
                    .roundtrip(&proto::GetSinkInfo {
                        sink_index: index,
                        sink_name: String::new(),
                    })
                    .unwrap();
                (index, info)
            }));
        }

        // Collect (tag, requested index) pairs from the wire.
        let mut reader = BufReader::new(sock.try_clone().unwrap());
        let mut requests = Vec::new();
        for _ in 0..3 {
            let (_, payload) = read_frame(&mut reader).unwrap();
            let mut cursor = io::Cursor::new(&payload);
            let mut ts = TagReader::new(&mut cursor, version);
            assert_eq!(ts.read_u32().unwrap(), Opcode::GetSinkInfo as u32);
            let tag = ts.read_u32().unwrap();
            let req: proto::GetSinkInfo = ts.read().unwrap();
            requests.push((tag, req.sink_index));
        }

        // Answer them in reverse arrival order.
        for (tag, index) in requests.iter().rev() {
            write_reply_frame(&mut sock, *tag, &sink(*index), version);
        }

        // Every caller gets the reply correlated with its own tag.
        for waiter in waiters {
            let (requested, info) = waiter.join().unwrap();
            assert_eq!(info.sink_index, requested);
            assert_eq!(info.sink_name, format!("sink-{}", requested));
        }
    }

    #[test_log::test]
    fn tags_increase_monotonically() {
        let (conn, sock) = open_pair();
        let version = conn.version();

        for _ in 0..3 {
            let conn = conn.clone();
            thread::spawn(move || {
                let _ = conn.roundtrip_ack(&GetSinkInfoList);
            });
        }

        let mut reader = BufReader::new(sock);
        let mut tags = Vec::new();
        for _ in 0..3 {
            let (_, payload) = read_frame(&mut reader).unwrap();
            let mut cursor = io::Cursor::new(&payload);
            let mut ts = TagReader::new(&mut cursor, version);
            ts.read_u32().unwrap();
            tags.push(ts.read_u32().unwrap());
        }

        tags.sort_unstable();
        assert_eq!(tags, vec![0, 1, 2]);

        // Unblock the waiters.
        conn.close();
    }

    #[test_log::test]
    fn server_error_resolves_the_right_caller() {
        let (conn, mut sock) = open_pair();

        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.roundtrip::<_, Vec<SinkInfo>>(&GetSinkInfoList))
        };

        let mut reader = BufReader::new(sock.try_clone().unwrap());
        let (_, payload) = read_frame(&mut reader).unwrap();
        let mut cursor = io::Cursor::new(&payload);
        let mut ts = TagReader::new(&mut cursor, conn.version());
        ts.read_u32().unwrap();
        let tag = ts.read_u32().unwrap();

        write_error_frame(&mut sock, tag, proto::ErrorCode::NoSuchEntity as u32);

        assert_matches!(
            waiter.join().unwrap(),
            Err(ClientError::Server(proto::ErrorCode::NoSuchEntity))
        );
    }

    #[test_log::test]
    fn events_dispatch_in_order() {
        let (conn, mut sock) = open_pair();
        let version = conn.version();

        let (tx, rx) = std::sync::mpsc::channel();
        conn.set_handler(move |incoming| {
            if let Incoming::Event(Event::Request(rq)) = incoming {
                let _ = tx.send(rq.length);
            }
        });

        for length in [1u32, 2, 3, 4, 5] {
            write_event_frame(
                &mut sock,
                Opcode::Request,
                &proto::Request {
                    stream_index: 0,
                    length,
                },
                version,
            );
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test_log::test]
    fn unknown_opcodes_are_skipped() {
        let (conn, mut sock) = open_pair();
        let version = conn.version();

        let (tx, rx) = std::sync::mpsc::channel();
        conn.set_handler(move |incoming| {
            if let Incoming::Event(Event::Started(ev)) = incoming {
                let _ = tx.send(ev.stream_index);
            }
        });

        // An opcode outside the table entirely, with junk payload.
        let mut body = Vec::new();
        {
            let mut w = TagWriter::new(&mut body, version);
            w.put_u32(9999).unwrap();
            w.put_u32(u32::MAX).unwrap();
            w.put_u32(42).unwrap();
        }
        proto::write_descriptor(&mut sock, &proto::Descriptor::control(body.len() as u32))
            .unwrap();
        sock.write_all(&body).unwrap();

        // The stream stays usable afterwards.
        write_event_frame(
            &mut sock,
            Opcode::Started,
            &proto::Started { stream_index: 7 },
            version,
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test_log::test]
    fn peer_eof_fails_outstanding_requests() {
        let (conn, mut sock) = open_pair();

        let (closed_tx, closed_rx) = std::sync::mpsc::channel();
        conn.set_handler(move |incoming| {
            if let Incoming::Closed(_) = incoming {
                let _ = closed_tx.send(());
            }
        });

        let waiter = {
            let conn = conn.clone();
            thread::spawn(move || conn.roundtrip::<_, Vec<SinkInfo>>(&GetSinkInfoList))
        };

        // Swallow the request, then hang up.
        let mut reader = BufReader::new(sock.try_clone().unwrap());
        read_frame(&mut reader).unwrap();
        drop(reader);
        sock.shutdown(std::net::Shutdown::Both).unwrap();
        drop(sock);

        assert_matches!(waiter.join().unwrap(), Err(ClientError::ConnectionClosed));
        closed_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Requests after the close fail immediately.
        assert_matches!(
            conn.roundtrip_ack(&GetSinkInfoList),
            Err(ClientError::ConnectionClosed)
        );
    }
}
