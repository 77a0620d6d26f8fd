//! Locating the server: the PULSE_SERVER string format, platform default
//! socket paths, cookie loading, and the auth handshake.

use std::{
    env, fs, io,
    net::{TcpStream, ToSocketAddrs},
    os::unix::net::UnixStream,
    path::PathBuf,
    sync::Arc,
};

use crate::proto::{self, Auth, AuthReply};

use super::connection::{Connection, Transport};
use super::ClientError;

/// The TCP port used when a server string does not name one.
const DEFAULT_PORT: u16 = 4713;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Proto {
    Unix,
    Tcp,
    Tcp4,
    Tcp6,
}

impl Proto {
    #[cfg(test)]
    fn as_str(self) -> &'static str {
        match self {
            Proto::Unix => "unix",
            Proto::Tcp => "tcp",
            Proto::Tcp4 => "tcp4",
            Proto::Tcp6 => "tcp6",
        }
    }
}

/// One candidate server address parsed from a server string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerAddr {
    /// The `{localname}` scope, or empty for any host.
    pub(crate) localname: String,
    pub(crate) proto: Proto,
    /// A socket path for unix, `host:port` for the TCP families.
    pub(crate) addr: String,
}

/// Parses a server string: a whitespace-separated list of entries, each
/// optionally scoped with `{localname}`. A bare `host[:port]` entry means
/// TCP on the default port.
pub(crate) fn parse_server_string(s: &str) -> Vec<ServerAddr> {
    let mut out = Vec::new();
    for entry in s.split_whitespace() {
        let mut localname = String::new();
        let mut rest = entry;
        if let Some(tail) = rest.strip_prefix('{') {
            match tail.split_once('}') {
                Some((name, after)) => {
                    localname = name.to_owned();
                    rest = after;
                }
                None => continue,
            }
        }
        if rest.is_empty() {
            continue;
        }

        let (proto, addr) = if rest.starts_with('/') {
            (Proto::Unix, rest.to_owned())
        } else if let Some(path) = rest.strip_prefix("unix:") {
            (Proto::Unix, path.to_owned())
        } else if let Some(addr) = rest.strip_prefix("tcp6:") {
            (Proto::Tcp6, with_default_port(addr))
        } else if let Some(addr) = rest.strip_prefix("tcp4:") {
            (Proto::Tcp4, with_default_port(addr))
        } else if let Some(addr) = rest.strip_prefix("tcp:") {
            (Proto::Tcp, with_default_port(addr))
        } else {
            (Proto::Tcp, with_default_port(rest))
        };

        out.push(ServerAddr {
            localname,
            proto,
            addr,
        });
    }

    out
}

fn with_default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_owned()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    }
}

/// The default socket candidates tried when no server string is given.
fn default_candidates() -> Vec<ServerAddr> {
    let path = if cfg!(target_os = "macos") {
        let home = env::var("HOME").unwrap_or_default();
        let host = hostname().unwrap_or_default();
        format!("{}/.config/pulse/{}-runtime/native", home, host)
    } else {
        match env::var("XDG_RUNTIME_DIR") {
            Ok(dir) => format!("{}/pulse/native", dir),
            Err(_) => format!("/run/user/{}/pulse/native", uid()),
        }
    };

    vec![ServerAddr {
        localname: String::new(),
        proto: Proto::Unix,
        addr: path,
    }]
}

fn uid() -> u32 {
    unsafe { libc::getuid() }
}

pub(crate) fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }

    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Loads the authentication cookie: $PULSE_COOKIE, then
/// $HOME/.config/pulse/cookie. A missing file yields 256 zero bytes,
/// which a server running with anonymous auth accepts.
pub(crate) fn load_cookie() -> Result<Vec<u8>, ClientError> {
    let path = match env::var_os("PULSE_COOKIE") {
        Some(p) => PathBuf::from(p),
        None => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".config/pulse/cookie"),
            None => return Ok(vec![0; 256]),
        },
    };

    match fs::read(&path) {
        Ok(cookie) => Ok(cookie),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(vec![0; 256]),
        Err(err) => Err(ClientError::Cookie(err)),
    }
}

/// Performs the auth handshake and applies the negotiated version to the
/// connection.
pub(crate) fn authenticate(conn: &Connection, cookie: Vec<u8>) -> Result<(), ClientError> {
    let reply: AuthReply = conn.roundtrip(&Auth {
        version: proto::INITIAL_VERSION,
        cookie,
    })?;

    conn.set_version(proto::INITIAL_VERSION.min(reply.version));
    log::debug!(
        "negotiated protocol version {}",
        conn.version().number()
    );

    Ok(())
}

/// Dials and authenticates, trying each candidate in order. Entries scoped
/// to a different hostname are skipped; the last failure is reported when
/// nothing works.
pub(crate) fn connect(server: Option<&str>) -> Result<Arc<Connection>, ClientError> {
    let env_server = env::var("PULSE_SERVER").ok();
    let candidates = match server.or(env_server.as_deref()) {
        Some(s) => {
            let parsed = parse_server_string(s);
            if parsed.is_empty() {
                return Err(ClientError::InvalidServerString);
            }
            parsed
        }
        None => default_candidates(),
    };

    let local = hostname().unwrap_or_default();
    let cookie = load_cookie()?;

    let mut last_err = ClientError::NoValidServer;
    for candidate in candidates {
        if !candidate.localname.is_empty() && candidate.localname != local {
            continue;
        }

        log::info!("connecting to {:?} server at {}", candidate.proto, candidate.addr);
        let transport = match dial(&candidate) {
            Ok(t) => t,
            Err(err) => {
                last_err = err.into();
                continue;
            }
        };

        let conn = Connection::open(transport)?;
        match authenticate(&conn, cookie.clone()) {
            Ok(()) => return Ok(conn),
            Err(err) => {
                conn.close();
                last_err = err;
            }
        }
    }

    Err(last_err)
}

fn dial(candidate: &ServerAddr) -> io::Result<Transport> {
    match candidate.proto {
        Proto::Unix => Ok(Transport::Unix(UnixStream::connect(&candidate.addr)?)),
        Proto::Tcp => Ok(Transport::Tcp(TcpStream::connect(&candidate.addr)?)),
        Proto::Tcp4 | Proto::Tcp6 => {
            let want_v4 = candidate.proto == Proto::Tcp4;
            let addrs = candidate
                .addr
                .to_socket_addrs()?
                .filter(|a| a.is_ipv4() == want_v4);

            let mut last = io::Error::new(io::ErrorKind::NotFound, "no matching address");
            for addr in addrs {
                match TcpStream::connect(addr) {
                    Ok(s) => return Ok(Transport::Tcp(s)),
                    Err(err) => last = err,
                }
            }

            Err(last)
        }
    }
}
