//! Wire-level error types and the protocol error-code table.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use thiserror::Error;

/// A failure while encoding or decoding the wire format.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload violates the wire format.
    #[error("invalid message: {0}")]
    Invalid(String),
    /// An I/O error, such as an unexpected EOF mid-payload.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An error code carried by the protocol's error messages.
///
/// Each variant maps 1:1 to a code in the uint32 error field.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
#[allow(missing_docs)]
pub enum ErrorCode {
    Ok = 0,
    AccessDenied = 1,
    UnknownCommand = 2,
    InvalidArgument = 3,
    EntityExists = 4,
    NoSuchEntity = 5,
    ConnectionRefused = 6,
    ProtocolError = 7,
    Timeout = 8,
    NoAuthKey = 9,
    Internal = 10,
    ConnectionTerminated = 11,
    EntityKilled = 12,
    InvalidServer = 13,
    ModuleInitFailed = 14,
    BadState = 15,
    NoData = 16,
    IncompatibleVersion = 17,
    TooLarge = 18,
    NotSupported = 19,
    Unknown = 20,
    NoSuchExtension = 21,
    Obsolete = 22,
    NotImplemented = 23,
    ClientForked = 24,
    Io = 25,
    Busy = 26,
}

impl ErrorCode {
    /// Converts a wire value, mapping out-of-table codes to [`ErrorCode::Unknown`].
    pub fn from_wire(code: u32) -> ErrorCode {
        ErrorCode::from_u32(code).unwrap_or(ErrorCode::Unknown)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::UnknownCommand => "unknown command",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::EntityExists => "entity exists",
            ErrorCode::NoSuchEntity => "no such entity",
            ErrorCode::ConnectionRefused => "connection refused",
            ErrorCode::ProtocolError => "protocol error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::NoAuthKey => "no authentication key",
            ErrorCode::Internal => "internal error",
            ErrorCode::ConnectionTerminated => "connection terminated",
            ErrorCode::EntityKilled => "entity killed",
            ErrorCode::InvalidServer => "invalid server",
            ErrorCode::ModuleInitFailed => "module initialization failed",
            ErrorCode::BadState => "bad state",
            ErrorCode::NoData => "no data",
            ErrorCode::IncompatibleVersion => "incompatible protocol version",
            ErrorCode::TooLarge => "too large",
            ErrorCode::NotSupported => "not supported",
            ErrorCode::Unknown => "unknown error code",
            ErrorCode::NoSuchExtension => "no such extension",
            ErrorCode::Obsolete => "obsolete functionality",
            ErrorCode::NotImplemented => "missing implementation",
            ErrorCode::ClientForked => "client forked",
            ErrorCode::Io => "input/output error",
            ErrorCode::Busy => "device or resource busy",
        };

        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_one_to_one() {
        for code in 0..=26u32 {
            let parsed = ErrorCode::from_wire(code);
            assert_eq!(parsed as u32, code);
        }
    }

    #[test]
    fn out_of_table_codes_become_unknown() {
        assert_eq!(ErrorCode::from_wire(27), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_wire(9999), ErrorCode::Unknown);
    }
}
