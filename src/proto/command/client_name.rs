//! Client identification.

use crate::proto::tagstruct::{TagReader, TagWriter, WireRead, WireWrite};
use crate::proto::{PropList, ProtocolError, Version};

use super::{CommandReply, CommandRequest, Opcode};

/// Sets the client's property list (its name and related metadata).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetClientName {
    /// Client properties such as `application.name`.
    pub props: PropList,
}

impl CommandRequest for SetClientName {
    const OPCODE: Opcode = Opcode::SetClientName;
}

impl WireRead for SetClientName {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(SetClientName { props: r.read()? })
    }
}

impl WireWrite for SetClientName {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put(&self.props)
    }
}

/// The server's acknowledgement of [`SetClientName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetClientNameReply {
    /// The index assigned to this client.
    pub client_index: u32,
}

impl CommandReply for SetClientNameReply {
    const REPLY_TO: Opcode = Opcode::SetClientName;
}

impl WireRead for SetClientNameReply {
    fn read(r: &mut TagReader<'_>, _version: Version) -> Result<Self, ProtocolError> {
        Ok(SetClientNameReply {
            client_index: r.read_u32()?,
        })
    }
}

impl WireWrite for SetClientNameReply {
    fn write(&self, w: &mut TagWriter<'_>, _version: Version) -> Result<(), ProtocolError> {
        w.put_u32(self.client_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tagstruct::test_util::roundtrip;

    #[test]
    fn set_client_name_roundtrip() -> anyhow::Result<()> {
        let mut props = PropList::new();
        props.set("application.name", "pulseio tests");
        props.set("application.process.id", "1234");

        roundtrip(&SetClientName { props })?;
        roundtrip(&SetClientNameReply { client_index: 7 })
    }
}
