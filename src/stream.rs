use crate::{error::Error, types::Value, wire::EnvelopeHeader};
use tracing::debug;

/// The linear event sequence every reader emits and every writer consumes.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StreamEvent {
    MessageStart,
    SimpleField,
    SubmessageFieldStart,
    SubmessageFieldEnd,
    MessageEnd,
    /// The source is exhausted.
    NoElement,
}

/// Pull-cursor over a message source.
///
/// `move_next` advances and returns the event kind; the `field_*`
/// accessors expose the current element state. `field_value` is populated
/// only for [`StreamEvent::SimpleField`].
pub trait StreamReader {
    fn has_next(&mut self) -> Result<bool, Error>;
    fn move_next(&mut self) -> Result<StreamEvent, Error>;
    /// Envelope metadata; valid from [`StreamEvent::MessageStart`] until
    /// the matching [`StreamEvent::MessageEnd`].
    fn envelope(&self) -> EnvelopeHeader;
    fn field_name(&self) -> Option<&str>;
    fn field_ordinal(&self) -> Option<i16>;
    fn field_value(&self) -> Option<&Value>;
}

/// Push-sink for the event sequence.
pub trait StreamWriter {
    fn start_message(&mut self, header: &EnvelopeHeader) -> Result<(), Error>;
    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error>;
    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<(), Error>;
    fn end_submessage(&mut self) -> Result<(), Error>;
    fn end_message(&mut self) -> Result<(), Error>;
}

impl<T: StreamReader + ?Sized> StreamReader for &mut T {
    fn has_next(&mut self) -> Result<bool, Error> {
        (**self).has_next()
    }

    fn move_next(&mut self) -> Result<StreamEvent, Error> {
        (**self).move_next()
    }

    fn envelope(&self) -> EnvelopeHeader {
        (**self).envelope()
    }

    fn field_name(&self) -> Option<&str> {
        (**self).field_name()
    }

    fn field_ordinal(&self) -> Option<i16> {
        (**self).field_ordinal()
    }

    fn field_value(&self) -> Option<&Value> {
        (**self).field_value()
    }
}

impl<T: StreamWriter + ?Sized> StreamWriter for &mut T {
    fn start_message(&mut self, header: &EnvelopeHeader) -> Result<(), Error> {
        (**self).start_message(header)
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error> {
        (**self).write_field(name, ordinal, value)
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<(), Error> {
        (**self).start_submessage(name, ordinal)
    }

    fn end_submessage(&mut self) -> Result<(), Error> {
        (**self).end_submessage()
    }

    fn end_message(&mut self) -> Result<(), Error> {
        (**self).end_message()
    }
}

/// Forward every remaining event from `reader` into `writer`. Returns the
/// number of complete top-level messages pumped.
pub fn pipe<R, W>(reader: &mut R, writer: &mut W) -> Result<usize, Error>
where
    R: StreamReader + ?Sized,
    W: StreamWriter + ?Sized,
{
    let mut p = MessagePipe::new(reader, writer);
    p.run()
}

/// Whether a [`MessagePipe`] keeps pumping after a top-level message.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PipeControl {
    Continue,
    /// Release the reader at the next event boundary without consuming
    /// the rest of the stream.
    Abort,
}

/// Couples a reader to a writer, surfacing a control point after each
/// top-level message so consumers can drain or abort. Synchronous and
/// single-threaded.
pub struct MessagePipe<R, W> {
    reader: R,
    writer: W,
    aborted: bool,
}

impl<R, W> MessagePipe<R, W>
where
    R: StreamReader,
    W: StreamWriter,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            aborted: false,
        }
    }

    /// Mark the pipe aborted; the current `run_with` loop stops at the
    /// next event boundary.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Pump until the reader is exhausted.
    pub fn run(&mut self) -> Result<usize, Error> {
        self.run_with(|_| PipeControl::Continue)
    }

    /// Pump, invoking `on_message` after each completed top-level message
    /// with the running message count.
    pub fn run_with<F>(&mut self, mut on_message: F) -> Result<usize, Error>
    where
        F: FnMut(usize) -> PipeControl,
    {
        let mut messages = 0;
        while !self.aborted && self.reader.has_next()? {
            match self.reader.move_next()? {
                StreamEvent::MessageStart => {
                    let header = self.reader.envelope();
                    self.writer.start_message(&header)?;
                }
                StreamEvent::SimpleField => {
                    let value = self
                        .reader
                        .field_value()
                        .ok_or(Error::UnexpectedEvent(StreamEvent::SimpleField))?;
                    self.writer.write_field(
                        self.reader.field_name(),
                        self.reader.field_ordinal(),
                        value,
                    )?;
                }
                StreamEvent::SubmessageFieldStart => {
                    self.writer
                        .start_submessage(self.reader.field_name(), self.reader.field_ordinal())?;
                }
                StreamEvent::SubmessageFieldEnd => self.writer.end_submessage()?,
                StreamEvent::MessageEnd => {
                    self.writer.end_message()?;
                    messages += 1;
                    if on_message(messages) == PipeControl::Abort {
                        debug!(messages, "Pipe aborted by consumer");
                        self.aborted = true;
                    }
                }
                StreamEvent::NoElement => break,
            }
        }
        Ok(messages)
    }
}
