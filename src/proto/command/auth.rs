//! The authentication handshake.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{ProtocolError, Version};

use super::{CommandReply, CommandRequest, Opcode};

/// Authenticates the connection and opens version negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    /// The client's protocol version and feature flags.
    pub version: Version,
    /// The contents of the authentication cookie file.
    pub cookie: Vec<u8>,
}

impl CommandRequest for Auth {
    const OPCODE: Opcode = Opcode::Auth;
}

impl WireRead for Auth {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(Auth {
            version: Version::from_bits(r.read_u32()?),
            cookie: r.read_blob()?,
        })
    }
}

impl WireWrite for Auth {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.version.bits())?;
        w.put_blob(&self.cookie)
    }
}

/// The server's half of the version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthReply {
    /// The server's protocol version and accepted feature flags.
    pub version: Version,
}

impl CommandReply for AuthReply {
    const REPLY_TO: Opcode = Opcode::Auth;
}

impl WireRead for AuthReply {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(AuthReply {
            version: Version::from_bits(r.read_u32()?),
        })
    }
}

impl WireWrite for AuthReply {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.version.bits())
    }
}
