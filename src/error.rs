use crate::stream::StreamEvent;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Envelope declared {declared} bytes but {consumed} were consumed")]
    EnvelopeSizeMismatch { declared: usize, consumed: usize },

    #[error("Sub-message declared {declared} bytes but {consumed} were consumed")]
    FrameSizeMismatch { declared: usize, consumed: usize },

    #[error("Field payload of {payload} bytes overruns its frame ({remaining} bytes remaining)")]
    FrameOverrun { payload: usize, remaining: usize },

    #[error("Field prefix 0x{prefix:02X} disagrees with the declared width of type id {type_id}")]
    PrefixWidthMismatch { prefix: u8, type_id: u8 },

    #[error("Unknown fixed-width type id {0} with no registered recovery size")]
    UnknownFixedWidthType(u8),

    #[error("Field name is {0} bytes of UTF-8 (maximum is 255)")]
    FieldNameTooLong(usize),

    #[error("Array payload of {size} bytes is not a multiple of the element width {elem}")]
    ArrayPayloadSize { size: usize, elem: usize },

    #[error("String payload is not valid UTF-8")]
    InvalidStringPayload,

    #[error("Field name at byte offset {offset} is not valid UTF-8")]
    InvalidFieldName { offset: u64 },

    #[error("Time zone offset {0} minutes is not a whole number of 15-minute units")]
    InvalidTimeZoneOffset(i32),

    #[error("Time zone offset {0} minutes is outside the representable +/-24h range")]
    TimeZoneOffsetOutOfRange(i32),

    #[error("Nanoseconds value {0} is outside [0, 10^9)")]
    InvalidNanos(u32),

    #[error("JSON parse error at line {line}, column {column}: {msg}")]
    JsonParse {
        line: usize,
        column: usize,
        msg: String,
    },

    #[error("Unexpected stream event {0:?}")]
    UnexpectedEvent(StreamEvent),

    #[error("Stream reader is in a terminal state after a previous error")]
    TerminalState,

    #[error("No surrogate registered for runtime type '{0}'")]
    UnregisteredType(&'static str),

    #[error("No surrogate matched type name candidates {0:?}")]
    TypeResolution(Vec<String>),

    #[error("Object reference {0} is out of range")]
    ReferenceOutOfRange(i64),

    #[error("Relative reference from {from} to {to} points forward")]
    ForwardReference { from: i32, to: i32 },

    #[error("Sub-message {0} was not registered before a back-reference to it was followed")]
    UnregisteredBackReference(i32),

    #[error("Sub-message {0} was registered twice")]
    DuplicateRegistration(i32),

    #[error("register called outside an active deserialization frame")]
    RegisterOutsideFrame,

    #[error("Object field '{0}' holds neither a sub-message nor a relative reference")]
    NotAnObjectField(String),

    #[error("Field value cannot be converted to {0}")]
    ValueConversion(&'static str),

    #[error("I/O error at byte offset {offset} (frame depth {depth}): {source}")]
    Stream {
        offset: u64,
        depth: usize,
        source: io::Error,
    },

    #[error("I/O error ({})", .0.kind())]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn at_offset(source: io::Error, offset: u64, depth: usize) -> Self {
        Error::Stream {
            offset,
            depth,
            source,
        }
    }
}
