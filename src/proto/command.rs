//! The message catalog: every request, reply and event this client
//! understands, with their opcodes and per-field protocol-version guards.

mod auth;
mod client_name;
mod events;
mod introspect;
mod playback;
mod record;
mod subscribe;
mod volume;

pub use auth::*;
pub use client_name::*;
pub use events::*;
pub use introspect::*;
pub use playback::*;
pub use record::*;
pub use subscribe::*;
pub use volume::*;

use enum_primitive_derive::Primitive;

use super::tagstruct::{WireRead, WireWrite};

/// The numeric command table of the native protocol.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Primitive)]
#[allow(missing_docs)]
pub enum Opcode {
    Error = 0,
    Timeout = 1,
    Reply = 2,

    CreatePlaybackStream = 3,
    DeletePlaybackStream = 4,
    CreateRecordStream = 5,
    DeleteRecordStream = 6,
    Exit = 7,
    Auth = 8,
    SetClientName = 9,
    LookupSink = 10,
    LookupSource = 11,
    DrainPlaybackStream = 12,
    Stat = 13,
    GetPlaybackLatency = 14,
    CreateUploadStream = 15,
    DeleteUploadStream = 16,
    FinishUploadStream = 17,
    PlaySample = 18,
    RemoveSample = 19,

    GetServerInfo = 20,
    GetSinkInfo = 21,
    GetSinkInfoList = 22,
    GetSourceInfo = 23,
    GetSourceInfoList = 24,
    GetModuleInfo = 25,
    GetModuleInfoList = 26,
    GetClientInfo = 27,
    GetClientInfoList = 28,
    GetSinkInputInfo = 29,
    GetSinkInputInfoList = 30,
    GetSourceOutputInfo = 31,
    GetSourceOutputInfoList = 32,
    GetSampleInfo = 33,
    GetSampleInfoList = 34,
    Subscribe = 35,

    SetSinkVolume = 36,
    SetSinkInputVolume = 37,
    SetSourceVolume = 38,
    SetSinkMute = 39,
    SetSourceMute = 40,

    CorkPlaybackStream = 41,
    FlushPlaybackStream = 42,
    TriggerPlaybackStream = 43,

    SetDefaultSink = 44,
    SetDefaultSource = 45,
    SetPlaybackStreamName = 46,
    SetRecordStreamName = 47,
    KillClient = 48,
    KillSinkInput = 49,
    KillSourceOutput = 50,

    LoadModule = 51,
    UnloadModule = 52,

    // 53..=56 are obsolete autoload commands.
    GetRecordLatency = 57,
    CorkRecordStream = 58,
    FlushRecordStream = 59,
    PrebufPlaybackStream = 60,

    // Server -> client.
    Request = 61,
    Overflow = 62,
    Underflow = 63,
    PlaybackStreamKilled = 64,
    RecordStreamKilled = 65,
    SubscribeEvent = 66,

    MoveSinkInput = 67,
    MoveSourceOutput = 68,
    SetSinkInputMute = 69,
    SuspendSink = 70,
    SuspendSource = 71,
    SetPlaybackStreamBufferAttr = 72,
    SetRecordStreamBufferAttr = 73,
    UpdatePlaybackStreamSampleRate = 74,
    UpdateRecordStreamSampleRate = 75,

    // Server -> client.
    PlaybackStreamSuspended = 76,
    RecordStreamSuspended = 77,
    PlaybackStreamMoved = 78,
    RecordStreamMoved = 79,

    UpdateRecordStreamProplist = 80,
    UpdatePlaybackStreamProplist = 81,
    UpdateClientProplist = 82,
    RemoveRecordStreamProplist = 83,
    RemovePlaybackStreamProplist = 84,
    RemoveClientProplist = 85,

    // Server -> client.
    Started = 86,

    Extension = 87,

    GetCardInfo = 88,
    GetCardInfoList = 89,
    SetCardProfile = 90,

    // Server -> client.
    ClientEvent = 91,
    PlaybackStreamEvent = 92,
    RecordStreamEvent = 93,
    PlaybackBufferAttrChanged = 94,
    RecordBufferAttrChanged = 95,

    SetSinkPort = 96,
    SetSourcePort = 97,
    SetSourceOutputVolume = 98,
    SetSourceOutputMute = 99,

    SetPortLatencyOffset = 100,

    EnableSrbChannel = 101,
    DisableSrbChannel = 102,

    RegisterMemfdShmid = 103,
}

/// A request the client can send. Each has a stable opcode.
pub trait CommandRequest: WireRead + WireWrite {
    /// The opcode carried in the control envelope.
    const OPCODE: Opcode;
}

/// Reply data answering a specific request opcode.
pub trait CommandReply: WireRead + WireWrite {
    /// The request opcode this reply answers.
    const REPLY_TO: Opcode;
}
