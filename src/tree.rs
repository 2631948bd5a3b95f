use crate::{
    error::Error,
    reader::BinaryReader,
    stream::{pipe, StreamEvent, StreamReader, StreamWriter},
    types::{Field, Message, Value},
    wire::EnvelopeHeader,
    writer::BinaryWriter,
};
use std::collections::VecDeque;

#[derive(Clone, Debug)]
struct QueuedEvent {
    event: StreamEvent,
    name: Option<String>,
    ordinal: Option<i16>,
    value: Option<Value>,
}

impl QueuedEvent {
    fn bare(event: StreamEvent) -> Self {
        Self {
            event,
            name: None,
            ordinal: None,
            value: None,
        }
    }
}

/// Replays an in-memory message as the stream event sequence.
pub struct TreeReader {
    header: EnvelopeHeader,
    events: VecDeque<QueuedEvent>,
    current: Option<QueuedEvent>,
}

impl TreeReader {
    pub fn new(header: EnvelopeHeader, message: Message) -> Self {
        let mut events = VecDeque::new();
        events.push_back(QueuedEvent::bare(StreamEvent::MessageStart));
        flatten(&message, &mut events);
        events.push_back(QueuedEvent::bare(StreamEvent::MessageEnd));
        Self {
            header,
            events,
            current: None,
        }
    }
}

fn flatten(message: &Message, out: &mut VecDeque<QueuedEvent>) {
    for field in message.fields() {
        match &field.value {
            Value::Message(inner) => {
                out.push_back(QueuedEvent {
                    event: StreamEvent::SubmessageFieldStart,
                    name: field.name.clone(),
                    ordinal: field.ordinal,
                    value: None,
                });
                flatten(inner, out);
                out.push_back(QueuedEvent::bare(StreamEvent::SubmessageFieldEnd));
            }
            value => out.push_back(QueuedEvent {
                event: StreamEvent::SimpleField,
                name: field.name.clone(),
                ordinal: field.ordinal,
                value: Some(value.clone()),
            }),
        }
    }
}

impl StreamReader for TreeReader {
    fn has_next(&mut self) -> Result<bool, Error> {
        Ok(!self.events.is_empty())
    }

    fn move_next(&mut self) -> Result<StreamEvent, Error> {
        match self.events.pop_front() {
            Some(ev) => {
                let event = ev.event;
                self.current = Some(ev);
                Ok(event)
            }
            None => {
                self.current = None;
                Ok(StreamEvent::NoElement)
            }
        }
    }

    fn envelope(&self) -> EnvelopeHeader {
        self.header
    }

    fn field_name(&self) -> Option<&str> {
        self.current.as_ref().and_then(|e| e.name.as_deref())
    }

    fn field_ordinal(&self) -> Option<i16> {
        self.current.as_ref().and_then(|e| e.ordinal)
    }

    fn field_value(&self) -> Option<&Value> {
        self.current.as_ref().and_then(|e| e.value.as_ref())
    }
}

/// Materializes the event sequence into `(header, message)` trees, one
/// per completed top-level message.
#[derive(Default)]
pub struct TreeWriter {
    header: Option<EnvelopeHeader>,
    stack: Vec<(Option<String>, Option<i16>, Message)>,
    completed: VecDeque<(EnvelopeHeader, Message)>,
}

impl TreeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next completed message, in arrival order.
    pub fn take_message(&mut self) -> Option<(EnvelopeHeader, Message)> {
        self.completed.pop_front()
    }
}

impl StreamWriter for TreeWriter {
    fn start_message(&mut self, header: &EnvelopeHeader) -> Result<(), Error> {
        if !self.stack.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageStart));
        }
        self.header = Some(*header);
        self.stack.push((None, None, Message::new()));
        Ok(())
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error> {
        match self.stack.last_mut() {
            Some((_, _, msg)) => {
                msg.push(Field::new(name.map(str::to_owned), ordinal, value.clone()));
                Ok(())
            }
            None => Err(Error::UnexpectedEvent(StreamEvent::SimpleField)),
        }
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<(), Error> {
        if self.stack.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldStart));
        }
        self.stack
            .push((name.map(str::to_owned), ordinal, Message::new()));
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<(), Error> {
        if self.stack.len() < 2 {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldEnd));
        }
        if let Some((name, ordinal, msg)) = self.stack.pop() {
            if let Some((_, _, parent)) = self.stack.last_mut() {
                parent.push(Field::new(name, ordinal, Value::Message(msg)));
            }
        }
        Ok(())
    }

    fn end_message(&mut self) -> Result<(), Error> {
        if self.stack.len() != 1 {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageEnd));
        }
        if let (Some(header), Some((_, _, root))) = (self.header, self.stack.pop()) {
            self.completed.push_back((header, root));
        }
        Ok(())
    }
}

/// Encode one message as a complete binary envelope.
pub fn encode(header: &EnvelopeHeader, message: &Message) -> Result<Vec<u8>, Error> {
    let mut reader = TreeReader::new(*header, message.clone());
    let mut writer = BinaryWriter::new(Vec::new());
    pipe(&mut reader, &mut writer)?;
    Ok(writer.into_inner())
}

/// Decode one binary envelope into its header and message tree.
pub fn decode(bytes: &[u8]) -> Result<(EnvelopeHeader, Message), Error> {
    let mut reader = BinaryReader::new(bytes);
    let mut writer = TreeWriter::new();
    pipe(&mut reader, &mut writer)?;
    writer
        .take_message()
        .ok_or(Error::UnexpectedEvent(StreamEvent::NoElement))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nested_message() -> Message {
        let mut inner = Message::new();
        inner.add("a", 7_i32);
        inner.add("b", "fred");
        let mut msg = Message::new();
        msg.add("outer", inner);
        msg.add_at(9, true);
        msg
    }

    #[test]
    fn tree_replay_round_trip() {
        let msg = nested_message();
        let header = EnvelopeHeader::with_taxonomy(3);
        let mut reader = TreeReader::new(header, msg.clone());
        let mut writer = TreeWriter::new();
        let n = pipe(&mut reader, &mut writer).unwrap();
        assert_eq!(n, 1);
        assert_eq!(writer.take_message(), Some((header, msg)));
    }

    #[test]
    fn binary_round_trip() {
        let msg = nested_message();
        let header = EnvelopeHeader::default();
        let bytes = encode(&header, &msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), (header, msg));
    }
}
