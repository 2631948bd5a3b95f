use crate::{
    config::CodecSettings,
    error::Error,
    stream::{StreamEvent, StreamWriter},
    taxonomy::Taxonomy,
    types::Value,
    wire::{EnvelopeHeader, FieldPrefix, TypeDictionary},
};
use byteordered::{ByteOrdered, Endianness};
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, trace};

/// Event-based writer producing the binary encoding.
///
/// One envelope is staged in an internal buffer so the envelope and
/// sub-message sizes can be backpatched into their reserved 4-byte slots;
/// the buffer is handed to the sink at `end_message`. Simple fields use
/// the narrowest size width that fits their payload.
pub struct BinaryWriter<W: Write> {
    out: W,
    dictionary: Arc<TypeDictionary>,
    taxonomy: Option<Arc<dyn Taxonomy>>,
    settings: CodecSettings,
    buf: Vec<u8>,
    size_slots: Vec<usize>,
}

impl<W: Write> BinaryWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            dictionary: Arc::new(TypeDictionary::standard()),
            taxonomy: None,
            settings: CodecSettings::default(),
            buf: Vec::new(),
            size_slots: Vec::new(),
        }
    }

    pub fn with_dictionary(mut self, dictionary: Arc<TypeDictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    /// Substitute ordinals for names the taxonomy knows, omitting the
    /// name from the wire.
    pub fn with_taxonomy(mut self, taxonomy: Arc<dyn Taxonomy>) -> Self {
        self.taxonomy = Some(taxonomy);
        self
    }

    pub fn with_settings(mut self, settings: CodecSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn patch_size(&mut self, slot: usize, size: u32) {
        self.buf[slot..slot + 4].copy_from_slice(&size.to_be_bytes());
    }

    fn write_field_header(
        &mut self,
        prefix: FieldPrefix,
        type_id: u8,
        name: Option<&str>,
        ordinal: Option<i16>,
    ) -> Result<(), Error> {
        self.buf.push(prefix.pack());
        self.buf.push(type_id);
        if let Some(ord) = ordinal {
            self.buf.extend_from_slice(&ord.to_be_bytes());
        }
        if let Some(name) = name {
            let len = name.len();
            if len > 255 {
                return Err(Error::FieldNameTooLong(len));
            }
            self.buf.push(len as u8);
            self.buf.extend_from_slice(name.as_bytes());
        }
        Ok(())
    }

    /// Apply the taxonomy: a named, unordinaled field whose name the
    /// taxonomy maps is written as ordinal only.
    fn apply_taxonomy<'a>(
        &self,
        name: Option<&'a str>,
        ordinal: Option<i16>,
    ) -> (Option<&'a str>, Option<i16>) {
        if let (Some(n), None, Some(tax)) = (name, ordinal, self.taxonomy.as_ref()) {
            if let Some(ord) = tax.ordinal_for(n) {
                trace!(name = n, ordinal = ord, "Taxonomy substituted ordinal for name");
                return (None, Some(ord));
            }
        }
        (name, ordinal)
    }
}

impl<W: Write> StreamWriter for BinaryWriter<W> {
    fn start_message(&mut self, header: &EnvelopeHeader) -> Result<(), Error> {
        if !self.size_slots.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageStart));
        }
        self.buf.clear();
        self.buf.push(header.processing_directives);
        self.buf.push(header.schema_version);
        self.buf.extend_from_slice(&header.taxonomy_id.to_be_bytes());
        self.size_slots.push(self.buf.len());
        self.buf.extend_from_slice(&[0; 4]);
        Ok(())
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error> {
        if self.size_slots.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::SimpleField));
        }

        // An in-memory sub-message expands into its event sequence
        if let Value::Message(msg) = value {
            self.start_submessage(name, ordinal)?;
            for field in msg.fields() {
                self.write_field(field.name.as_deref(), field.ordinal, &field.value)?;
            }
            return self.end_submessage();
        }

        let (name, ordinal) = self.apply_taxonomy(name, ordinal);
        let wire_type = value.wire_type();
        let payload = self.dictionary.payload_size(value);
        let fixed = self.dictionary.fixed_size(wire_type) == Some(payload);
        let var_size_width = if fixed {
            0
        } else {
            FieldPrefix::var_width_for(payload)
        };
        let prefix = FieldPrefix {
            fixed_width: fixed,
            ordinal_present: ordinal.is_some(),
            name_present: name.is_some(),
            var_size_width,
        };
        self.write_field_header(prefix, wire_type.into(), name, ordinal)?;
        match var_size_width {
            0 => {}
            1 => self.buf.push(payload as u8),
            2 => self.buf.extend_from_slice(&(payload as u16).to_be_bytes()),
            _ => self.buf.extend_from_slice(&(payload as u32).to_be_bytes()),
        }
        let mut w = ByteOrdered::runtime(&mut self.buf, Endianness::Big);
        self.dictionary.encode_payload(value, &mut w)?;
        Ok(())
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<(), Error> {
        if self.size_slots.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldStart));
        }
        let (name, ordinal) = self.apply_taxonomy(name, ordinal);
        let prefix = FieldPrefix {
            fixed_width: false,
            ordinal_present: ordinal.is_some(),
            name_present: name.is_some(),
            var_size_width: 4,
        };
        self.write_field_header(prefix, crate::types::WireType::Message.into(), name, ordinal)?;
        self.size_slots.push(self.buf.len());
        self.buf.extend_from_slice(&[0; 4]);
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<(), Error> {
        if self.size_slots.len() < 2 {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldEnd));
        }
        let slot = self.size_slots.pop().unwrap_or_default();
        let size = (self.buf.len() - (slot + 4)) as u32;
        self.patch_size(slot, size);
        Ok(())
    }

    fn end_message(&mut self) -> Result<(), Error> {
        if self.size_slots.len() != 1 {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageEnd));
        }
        let slot = self.size_slots.pop().unwrap_or_default();
        let size = self.buf.len() as u32;
        self.patch_size(slot, size);
        self.out.write_all(&self.buf)?;
        if self.settings.auto_flush_on_message_end {
            self.out.flush()?;
        }
        debug!(size, "Wrote envelope");
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_size_is_backpatched() {
        let mut w = BinaryWriter::new(Vec::new());
        w.start_message(&EnvelopeHeader::default()).unwrap();
        w.write_field(Some("a"), None, &Value::Int(7)).unwrap();
        w.end_message().unwrap();
        let bytes = w.into_inner();
        let declared = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(declared, bytes.len());
    }

    #[test]
    fn zero_length_variable_payload_has_no_size_bytes() {
        let mut w = BinaryWriter::new(Vec::new());
        w.start_message(&EnvelopeHeader::default()).unwrap();
        w.write_field(None, None, &Value::String(String::new()))
            .unwrap();
        w.end_message().unwrap();
        let bytes = w.into_inner();
        // 8 byte header + prefix + type id, nothing else
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[8], 0x00);
        assert_eq!(bytes[9], 14);
    }

    #[test]
    fn unbalanced_events_are_rejected() {
        let mut w = BinaryWriter::new(Vec::new());
        assert!(w.write_field(None, None, &Value::Int(1)).is_err());
        w.start_message(&EnvelopeHeader::default()).unwrap();
        assert!(w.end_submessage().is_err());
        assert!(w.start_message(&EnvelopeHeader::default()).is_err());
    }
}
