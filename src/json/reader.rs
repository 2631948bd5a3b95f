use crate::{
    config::JsonSettings,
    error::Error,
    json::lexer::{Lexer, Token},
    stream::{StreamEvent, StreamReader},
    types::Value,
    wire::EnvelopeHeader,
};
use ordered_float::OrderedFloat;
use std::collections::VecDeque;
use std::io::Read;
use tracing::trace;

/// A parsed JSON value, materialized only for array lookahead.
#[derive(Clone, PartialEq, Debug)]
enum JsonValue {
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Null,
    String(String),
    Object(Vec<(String, JsonValue)>),
    Array(Vec<JsonValue>),
}

#[derive(Clone, Debug)]
struct QueuedEvent {
    event: StreamEvent,
    name: Option<String>,
    ordinal: Option<i16>,
    value: Option<Value>,
}

/// Maps a JSON document (or a concatenation of documents) to the stream
/// event sequence.
///
/// Leading members named by the configured envelope fields are absorbed
/// into the envelope header before `MessageStart` is surfaced. Arrays are
/// scanned ahead: a homogeneous primitive numeric array (integers widening
/// to longs) becomes a single primitive-array field, anything else is
/// replayed as repeated fields with the same name.
pub struct JsonStreamReader<R> {
    lexer: Lexer<R>,
    settings: JsonSettings,
    queue: VecDeque<QueuedEvent>,
    depth: usize,
    in_message: bool,
    envelope: EnvelopeHeader,
    field_name: Option<String>,
    field_ordinal: Option<i16>,
    field_value: Option<Value>,
    terminal: bool,
}

impl<R: Read> JsonStreamReader<R> {
    pub fn new(source: R, settings: JsonSettings) -> Self {
        Self {
            lexer: Lexer::new(source),
            settings,
            queue: VecDeque::new(),
            depth: 0,
            in_message: false,
            envelope: EnvelopeHeader::default(),
            field_name: None,
            field_ordinal: None,
            field_value: None,
            terminal: false,
        }
    }

    fn clear_field_state(&mut self) {
        self.field_name = None;
        self.field_ordinal = None;
        self.field_value = None;
    }

    fn apply(&mut self, ev: QueuedEvent) -> StreamEvent {
        self.field_name = ev.name;
        self.field_ordinal = ev.ordinal;
        self.field_value = ev.value;
        ev.event
    }

    /// Split a JSON member key into field name/ordinal.
    fn convert_name(&self, raw: String) -> (Option<String>, Option<i16>) {
        if raw.is_empty() {
            return (None, None);
        }
        if self.settings.numbers_are_ordinals && looks_like_ordinal(&raw) {
            if let Ok(ordinal) = raw.parse::<i16>() {
                return (None, Some(ordinal));
            }
        }
        (Some(raw), None)
    }

    fn reserved_slot(&self, key: &str) -> Option<ReservedField> {
        if self.settings.processing_directives_field.as_deref() == Some(key) {
            Some(ReservedField::ProcessingDirectives)
        } else if self.settings.schema_version_field.as_deref() == Some(key) {
            Some(ReservedField::SchemaVersion)
        } else if self.settings.taxonomy_field.as_deref() == Some(key) {
            Some(ReservedField::Taxonomy)
        } else {
            None
        }
    }

    /// Consume `{`-adjacent reserved members into the envelope header.
    fn begin_message(&mut self) -> Result<(), Error> {
        self.envelope = EnvelopeHeader::default();
        loop {
            let slot = match self.lexer.peek()? {
                Token::String(s) => match self.reserved_slot(&s) {
                    Some(slot) => slot,
                    None => break,
                },
                _ => break,
            };
            let _name = self.lexer.next_token()?;
            if self.lexer.next_token()? != Token::NameSeparator {
                return Err(self.lexer.error("expected ':'"));
            }
            let value = match self.lexer.next_token()? {
                Token::Integer(v) => i64::from(v),
                Token::Long(v) => v,
                _ => return Err(self.lexer.error("envelope field must be an integer")),
            };
            match slot {
                ReservedField::ProcessingDirectives => {
                    self.envelope.processing_directives = value as u8
                }
                ReservedField::SchemaVersion => self.envelope.schema_version = value as u8,
                ReservedField::Taxonomy => self.envelope.taxonomy_id = value as i16,
            }
            if self.lexer.peek()? == Token::ValueSeparator {
                let _ = self.lexer.next_token()?;
            }
        }
        trace!(envelope = ?self.envelope, "JSON message started");
        self.depth = 1;
        self.in_message = true;
        self.clear_field_state();
        Ok(())
    }

    fn parse_value(&mut self, tok: Token) -> Result<JsonValue, Error> {
        Ok(match tok {
            Token::Integer(v) => JsonValue::Integer(v),
            Token::Long(v) => JsonValue::Long(v),
            Token::Double(v) => JsonValue::Double(v),
            Token::Boolean(v) => JsonValue::Boolean(v),
            Token::Null => JsonValue::Null,
            Token::String(v) => JsonValue::String(v),
            Token::BeginArray => JsonValue::Array(self.parse_array_body()?),
            Token::BeginObject => {
                let mut members = Vec::new();
                loop {
                    match self.lexer.next_token()? {
                        Token::EndObject => break,
                        Token::ValueSeparator => continue,
                        Token::String(name) => {
                            if self.lexer.next_token()? != Token::NameSeparator {
                                return Err(self.lexer.error("expected ':'"));
                            }
                            let tok = self.lexer.next_token()?;
                            members.push((name, self.parse_value(tok)?));
                        }
                        _ => return Err(self.lexer.error("expected member name or '}'")),
                    }
                }
                JsonValue::Object(members)
            }
            _ => return Err(self.lexer.error("unexpected token in value position")),
        })
    }

    fn parse_array_body(&mut self) -> Result<Vec<JsonValue>, Error> {
        let mut items = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::EndArray => break,
                Token::ValueSeparator => continue,
                tok => items.push(self.parse_value(tok)?),
            }
        }
        Ok(items)
    }

    /// Queue the events for one named JSON value.
    fn enqueue_value(&mut self, name: Option<String>, ordinal: Option<i16>, value: JsonValue) {
        match value {
            JsonValue::Object(members) => {
                self.queue.push_back(QueuedEvent {
                    event: StreamEvent::SubmessageFieldStart,
                    name,
                    ordinal,
                    value: None,
                });
                for (raw, member) in members {
                    let (name, ordinal) = self.convert_name(raw);
                    self.enqueue_value(name, ordinal, member);
                }
                self.queue.push_back(QueuedEvent {
                    event: StreamEvent::SubmessageFieldEnd,
                    name: None,
                    ordinal: None,
                    value: None,
                });
            }
            JsonValue::Array(items) => self.enqueue_array(name, ordinal, items),
            primitive => self.queue.push_back(QueuedEvent {
                event: StreamEvent::SimpleField,
                name,
                ordinal,
                value: Some(primitive_value(primitive)),
            }),
        }
    }

    fn enqueue_array(&mut self, name: Option<String>, ordinal: Option<i16>, items: Vec<JsonValue>) {
        match classify_numeric_array(&items) {
            Some(value) => self.queue.push_back(QueuedEvent {
                event: StreamEvent::SimpleField,
                name,
                ordinal,
                value: Some(value),
            }),
            None => {
                // Replay as repeated fields carrying the same name
                for item in items {
                    self.enqueue_value(name.clone(), ordinal, item);
                }
            }
        }
    }

    fn next_event(&mut self) -> Result<StreamEvent, Error> {
        if let Some(ev) = self.queue.pop_front() {
            return Ok(self.apply(ev));
        }
        if !self.in_message {
            return match self.lexer.peek()? {
                Token::Eof => {
                    self.clear_field_state();
                    Ok(StreamEvent::NoElement)
                }
                Token::BeginObject => {
                    let _ = self.lexer.next_token()?;
                    self.begin_message()?;
                    Ok(StreamEvent::MessageStart)
                }
                _ => Err(self.lexer.error("expected top-level object")),
            };
        }
        loop {
            match self.lexer.next_token()? {
                Token::ValueSeparator => continue,
                Token::EndObject => {
                    self.depth -= 1;
                    self.clear_field_state();
                    return if self.depth == 0 {
                        self.in_message = false;
                        Ok(StreamEvent::MessageEnd)
                    } else {
                        Ok(StreamEvent::SubmessageFieldEnd)
                    };
                }
                Token::String(raw) => {
                    if self.lexer.next_token()? != Token::NameSeparator {
                        return Err(self.lexer.error("expected ':'"));
                    }
                    let (name, ordinal) = self.convert_name(raw);
                    match self.lexer.next_token()? {
                        Token::BeginObject => {
                            self.depth += 1;
                            self.field_name = name;
                            self.field_ordinal = ordinal;
                            self.field_value = None;
                            return Ok(StreamEvent::SubmessageFieldStart);
                        }
                        Token::BeginArray => {
                            let items = self.parse_array_body()?;
                            self.enqueue_array(name, ordinal, items);
                            match self.queue.pop_front() {
                                Some(ev) => return Ok(self.apply(ev)),
                                // Zero repeated fields; keep scanning
                                None => continue,
                            }
                        }
                        tok => {
                            let value = primitive_value(self.parse_value(tok)?);
                            self.field_name = name;
                            self.field_ordinal = ordinal;
                            self.field_value = Some(value);
                            return Ok(StreamEvent::SimpleField);
                        }
                    }
                }
                Token::Eof => return Err(self.lexer.error("unexpected end of document")),
                _ => return Err(self.lexer.error("expected member name or '}'")),
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum ReservedField {
    ProcessingDirectives,
    SchemaVersion,
    Taxonomy,
}

fn looks_like_ordinal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn primitive_value(v: JsonValue) -> Value {
    match v {
        JsonValue::Integer(v) => Value::Int(v),
        JsonValue::Long(v) => Value::Long(v),
        JsonValue::Double(v) => Value::Double(OrderedFloat(v)),
        JsonValue::Boolean(v) => Value::Boolean(v),
        JsonValue::Null => Value::Indicator,
        JsonValue::String(v) => Value::String(v),
        // Containers are expanded by the caller before this conversion
        JsonValue::Object(_) | JsonValue::Array(_) => Value::Indicator,
    }
}

/// A single primitive-array value when every element shares one numeric
/// kind, integers widening to longs. An empty array reads as an empty
/// int array.
fn classify_numeric_array(items: &[JsonValue]) -> Option<Value> {
    let mut any_long = false;
    let mut any_double = false;
    for item in items {
        match item {
            JsonValue::Integer(_) => {}
            JsonValue::Long(_) => any_long = true,
            JsonValue::Double(_) => any_double = true,
            _ => return None,
        }
    }
    if any_double {
        if items
            .iter()
            .all(|item| matches!(item, JsonValue::Double(_)))
        {
            return Some(Value::DoubleArray(
                items
                    .iter()
                    .map(|item| match item {
                        JsonValue::Double(v) => OrderedFloat(*v),
                        _ => OrderedFloat(0.0),
                    })
                    .collect(),
            ));
        }
        return None;
    }
    if any_long {
        return Some(Value::LongArray(
            items
                .iter()
                .map(|item| match item {
                    JsonValue::Integer(v) => i64::from(*v),
                    JsonValue::Long(v) => *v,
                    _ => 0,
                })
                .collect(),
        ));
    }
    Some(Value::IntArray(
        items
            .iter()
            .map(|item| match item {
                JsonValue::Integer(v) => *v,
                _ => 0,
            })
            .collect(),
    ))
}

impl<R: Read> StreamReader for JsonStreamReader<R> {
    fn has_next(&mut self) -> Result<bool, Error> {
        if self.terminal {
            return Ok(false);
        }
        if !self.queue.is_empty() || self.in_message {
            return Ok(true);
        }
        Ok(self.lexer.peek()? != Token::Eof)
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
