//! JSON rendition of the stream event model: a tokenizer, a reader
//! mapping JSON documents to events, and a writer emitting JSON from
//! events.

use crate::{
    error::Error,
    stream::{pipe, StreamEvent},
    tree::{TreeReader, TreeWriter},
    types::Message,
    wire::EnvelopeHeader,
};

pub use crate::config::JsonSettings;
pub use reader::JsonStreamReader;
pub use writer::JsonStreamWriter;

pub(crate) mod lexer;
pub mod reader;
pub mod writer;

/// Render one message as a JSON document.
pub fn to_json_string(
    header: &EnvelopeHeader,
    message: &Message,
    settings: &JsonSettings,
) -> Result<String, Error> {
    let mut reader = TreeReader::new(*header, message.clone());
    let mut writer = JsonStreamWriter::new(Vec::new(), settings.clone());
    pipe(&mut reader, &mut writer)?;
    String::from_utf8(writer.into_inner()).map_err(|_| Error::InvalidStringPayload)
}

/// Parse one JSON document into its envelope header and message tree.
pub fn from_json_str(
    text: &str,
    settings: &JsonSettings,
) -> Result<(EnvelopeHeader, Message), Error> {
    let mut reader = JsonStreamReader::new(text.as_bytes(), settings.clone());
    let mut writer = TreeWriter::new();
    pipe(&mut reader, &mut writer)?;
    writer
        .take_message()
        .ok_or(Error::UnexpectedEvent(StreamEvent::NoElement))
}
