use crate::{
    error::Error,
    stream::{StreamEvent, StreamReader},
    taxonomy::{Taxonomy, TaxonomyResolver},
    tree::TreeWriter,
    types::{Message, Value, WireType},
    wire::{EnvelopeHeader, FieldPrefix, TypeDictionary},
};
use byteordered::{ByteOrdered, Endianness};
use bytes::{Buf, BytesMut};
use std::io::{self, Read};
use std::sync::Arc;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, trace, warn};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct Frame {
    size: usize,
    consumed: usize,
}

impl Frame {
    fn remaining(&self) -> usize {
        self.size.saturating_sub(self.consumed)
    }
}

/// Event-based reader over the binary encoding.
///
/// Consumes envelopes back to back; between envelopes a single-byte
/// lookahead distinguishes a graceful end of stream from truncation. Any
/// error inside an envelope is fatal and leaves the reader terminal.
pub struct BinaryReader<R> {
    inner: ByteOrdered<R, Endianness>,
    dictionary: Arc<TypeDictionary>,
    resolver: Option<Arc<dyn TaxonomyResolver>>,
    taxonomy: Option<Arc<dyn Taxonomy>>,
    frames: Vec<Frame>,
    envelope: EnvelopeHeader,
    field_name: Option<String>,
    field_ordinal: Option<i16>,
    field_type: Option<WireType>,
    field_value: Option<Value>,
    peeked: Option<u8>,
    offset: u64,
    terminal: bool,
}

impl<R: Read> BinaryReader<R> {
    pub fn new(r: R) -> Self {
        Self {
            inner: ByteOrdered::runtime(r, Endianness::Big),
            dictionary: Arc::new(TypeDictionary::standard()),
            resolver: None,
            taxonomy: None,
            frames: Vec::new(),
            envelope: EnvelopeHeader::default(),
            field_name: None,
            field_ordinal: None,
            field_type: None,
            field_value: None,
            peeked: None,
            offset: 0,
            terminal: false,
        }
    }

    pub fn with_dictionary(mut self, dictionary: Arc<TypeDictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn with_taxonomy_resolver(mut self, resolver: Arc<dyn TaxonomyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Wire type of the current field, if positioned on one.
    pub fn field_type(&self) -> Option<WireType> {
        self.field_type
    }

    fn fail(&self, source: io::Error) -> Error {
        Error::at_offset(source, self.offset, self.frames.len())
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        if let Some(b) = self.peeked.take() {
            self.offset += 1;
            return Ok(b);
        }
        let b = self.inner.read_u8().map_err(|e| self.fail(e))?;
        self.offset += 1;
        Ok(b)
    }

    fn read_i16(&mut self) -> Result<i16, Error> {
        let v = self.inner.read_i16().map_err(|e| self.fail(e))?;
        self.offset += 2;
        Ok(v)
    }

    fn read_u16(&mut self) -> Result<u16, Error> {
        let v = self.inner.read_u16().map_err(|e| self.fail(e))?;
        self.offset += 2;
        Ok(v)
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let v = self.inner.read_u32().map_err(|e| self.fail(e))?;
        self.offset += 4;
        Ok(v)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0_u8; len];
        self.inner.read_exact(&mut bytes).map_err(|e| self.fail(e))?;
        self.offset += len as u64;
        Ok(bytes)
    }

    fn clear_field_state(&mut self) {
        self.field_name = None;
        self.field_ordinal = None;
        self.field_type = None;
        self.field_value = None;
    }

    /// One-byte lookahead between envelopes; `false` on graceful EOF.
    fn lookahead(&mut self) -> Result<bool, Error> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.inner.read_u8() {
            Ok(b) => {
                self.peeked = Some(b);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn read_envelope(&mut self) -> Result<StreamEvent, Error> {
        let processing_directives = self.read_u8()?;
        let schema_version = self.read_u8()?;
        let taxonomy_id = self.read_i16()?;
        let size = self.read_u32()? as usize;
        if size < EnvelopeHeader::WIRE_SIZE {
            return Err(Error::EnvelopeSizeMismatch {
                declared: size,
                consumed: EnvelopeHeader::WIRE_SIZE,
            });
        }
        self.envelope = EnvelopeHeader {
            processing_directives,
            schema_version,
            taxonomy_id,
        };
        self.taxonomy = self
            .resolver
            .as_ref()
            .and_then(|r| r.resolve(taxonomy_id));
        debug!(
            processing_directives,
            schema_version, taxonomy_id, size, "Read envelope header"
        );
        self.frames.push(Frame {
            size,
            consumed: EnvelopeHeader::WIRE_SIZE,
        });
        self.clear_field_state();
        Ok(StreamEvent::MessageStart)
    }

    fn pop_frame(&mut self) -> Result<StreamEvent, Error> {
        // Only pop when the frame is exactly consumed
        let frame = self.frames[self.frames.len() - 1];
        if frame.consumed != frame.size {
            return Err(if self.frames.len() == 1 {
                Error::EnvelopeSizeMismatch {
                    declared: frame.size,
                    consumed: frame.consumed,
                }
            } else {
                Error::FrameSizeMismatch {
                    declared: frame.size,
                    consumed: frame.consumed,
                }
            });
        }
        self.frames.pop();
        self.clear_field_state();
        if let Some(parent) = self.frames.last_mut() {
            parent.consumed += frame.size;
            trace!(depth = self.frames.len(), "Sub-message frame closed");
            Ok(StreamEvent::SubmessageFieldEnd)
        } else {
            debug!(offset = self.offset, "Message complete");
            Ok(StreamEvent::MessageEnd)
        }
    }

    fn read_field(&mut self) -> Result<StreamEvent, Error> {
        let prefix_byte = self.read_u8()?;
        let type_byte = self.read_u8()?;
        let prefix = FieldPrefix::unpack(prefix_byte);
        let wire_type = WireType::from(type_byte);
        let mut header_bytes = 2_usize;

        let ordinal = if prefix.ordinal_present {
            header_bytes += 2;
            Some(self.read_i16()?)
        } else {
            None
        };

        let name = if prefix.name_present {
            let len = usize::from(self.read_u8()?);
            let offset = self.offset;
            let bytes = self.read_bytes(len)?;
            header_bytes += 1 + len;
            Some(String::from_utf8(bytes).map_err(|_| Error::InvalidFieldName { offset })?)
        } else {
            None
        };

        // A declared-fixed prefix must agree with the dictionary; unknown
        // fixed-width types are fatal unless a recovery size is registered.
        let payload_size = if prefix.fixed_width {
            match self.dictionary.fixed_size(wire_type) {
                Some(n) => n,
                None if self.dictionary.is_known(wire_type) => {
                    return Err(Error::PrefixWidthMismatch {
                        prefix: prefix_byte,
                        type_id: type_byte,
                    })
                }
                None => return Err(Error::UnknownFixedWidthType(type_byte)),
            }
        } else {
            if self.dictionary.is_known(wire_type)
                && self.dictionary.fixed_size(wire_type).is_some()
            {
                return Err(Error::PrefixWidthMismatch {
                    prefix: prefix_byte,
                    type_id: type_byte,
                });
            }
            header_bytes += usize::from(prefix.var_size_width);
            match prefix.var_size_width {
                0 => 0,
                1 => usize::from(self.read_u8()?),
                2 => usize::from(self.read_u16()?),
                _ => self.read_u32()? as usize,
            }
        };

        let top = self.frames.len() - 1;
        self.frames[top].consumed += header_bytes;
        let remaining = self.frames[top].remaining();
        if payload_size > remaining {
            return Err(Error::FrameOverrun {
                payload: payload_size,
                remaining,
            });
        }

        // Taxonomy fill-in; a miss leaves the name absent
        let name = match (name, ordinal, self.taxonomy.as_ref()) {
            (None, Some(ord), Some(tax)) => tax.name_for(ord).map(|n| n.to_owned()),
            (name, _, _) => name,
        };

        self.field_name = name;
        self.field_ordinal = ordinal;
        self.field_type = Some(wire_type);

        if wire_type == WireType::Message {
            self.field_value = None;
            self.frames.push(Frame {
                size: payload_size,
                consumed: 0,
            });
            trace!(
                name = ?self.field_name,
                ?ordinal,
                size = payload_size,
                "Sub-message frame opened"
            );
            return Ok(StreamEvent::SubmessageFieldStart);
        }

        if !self.dictionary.is_known(wire_type) {
            warn!(type_id = type_byte, "Unknown type id, preserving payload opaquely");
        }
        let value = self
            .dictionary
            .decode_payload(wire_type, payload_size, &mut self.inner)?;
        self.offset += payload_size as u64;
        self.frames[top].consumed += payload_size;
        trace!(
            name = ?self.field_name,
            ?ordinal,
            %wire_type,
            payload = payload_size,
            "Read field"
        );
        self.field_value = Some(value);
        Ok(StreamEvent::SimpleField)
    }

    fn next_event(&mut self) -> Result<StreamEvent, Error> {
        if self.frames.is_empty() {
            if !self.lookahead()? {
                self.clear_field_state();
                return Ok(StreamEvent::NoElement);
            }
            return self.read_envelope();
        }
        let top = self.frames[self.frames.len() - 1];
        if top.consumed >= top.size {
            return self.pop_frame();
        }
        self.read_field()
    }
}

impl<R: Read> StreamReader for BinaryReader<R> {
    fn has_next(&mut self) -> Result<bool, Error> {
        if self.terminal {
            return Ok(false);
        }
        if !self.frames.is_empty() {
            return Ok(true);
        }
        self.lookahead()
    }

    fn move_next(&mut self) -> Result<StreamEvent, Error> {
        if self.terminal {
            return Err(Error::TerminalState);
        }
        let event = self.next_event();
        if event.is_err() {
            self.terminal = true;
        }
        event
    }

    fn envelope(&self) -> EnvelopeHeader {
        self.envelope
    }

    fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    fn field_ordinal(&self) -> Option<i16> {
        self.field_ordinal
    }

    fn field_value(&self) -> Option<&Value> {
        self.field_value.as_ref()
    }
}

/// Frames complete envelopes out of an async byte stream, yielding one
/// decoded `(header, message)` per envelope.
#[derive(Clone, Default)]
pub struct EnvelopeDecoder {
    dictionary: Arc<TypeDictionary>,
    resolver: Option<Arc<dyn TaxonomyResolver>>,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dictionary(mut self, dictionary: Arc<TypeDictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn with_taxonomy_resolver(mut self, resolver: Arc<dyn TaxonomyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl Decoder for EnvelopeDecoder {
    type Item = (EnvelopeHeader, Message);
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < EnvelopeHeader::WIRE_SIZE {
            return Ok(None);
        }
        let size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if size < EnvelopeHeader::WIRE_SIZE {
            return Err(Error::EnvelopeSizeMismatch {
                declared: size,
                consumed: EnvelopeHeader::WIRE_SIZE,
            });
        }
        if src.len() < size {
            // Not enough data for the full envelope
            src.reserve(size - src.len());
            return Ok(None);
        }
        let frame = src.split_to(size);
        let mut reader = BinaryReader::new(frame.reader());
        reader.dictionary = self.dictionary.clone();
        reader.resolver = self.resolver.clone();
        let mut writer = TreeWriter::new();
        crate::stream::pipe(&mut reader, &mut writer)?;
        writer
            .take_message()
            .map(Some)
            .ok_or(Error::UnexpectedEvent(StreamEvent::NoElement))
    }
}

/// A [`FramedRead`] of envelopes over any async byte source.
pub fn framed<R>(reader: R, decoder: EnvelopeDecoder) -> FramedRead<R, EnvelopeDecoder>
where
    R: tokio::io::AsyncRead,
{
    FramedRead::new(reader, decoder)
}
