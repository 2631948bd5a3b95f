use crate::{
    config::JsonSettings,
    error::Error,
    stream::{StreamEvent, StreamWriter},
    types::{Field, Message, Value},
    wire::EnvelopeHeader,
};
use itertools::Itertools;
use std::io::Write;
use tracing::debug;

/// A rendered JSON fragment: either leaf text or an object whose members
/// still need adjacent same-key grouping.
#[derive(Clone, Debug)]
enum Node {
    Leaf(String),
    Object(Vec<(String, Node)>),
}

/// Emits the stream event sequence as JSON.
///
/// One message is buffered so that successive fields with an identical
/// key can merge into a JSON array; the document is written to the sink
/// at `end_message`. Indicators render as `null`, primitive arrays as
/// JSON arrays, date-times as RFC 3339 strings.
pub struct JsonStreamWriter<W: Write> {
    out: W,
    settings: JsonSettings,
    frames: Vec<Vec<(String, Node)>>,
    open_keys: Vec<String>,
}

impl<W: Write> JsonStreamWriter<W> {
    pub fn new(out: W, settings: JsonSettings) -> Self {
        Self {
            out,
            settings,
            frames: Vec::new(),
            open_keys: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// The JSON member key for a field, honoring `prefer_field_names`.
    fn key_for(&self, name: Option<&str>, ordinal: Option<i16>) -> String {
        match (name, ordinal) {
            (Some(n), Some(o)) => {
                if self.settings.prefer_field_names {
                    n.to_owned()
                } else {
                    o.to_string()
                }
            }
            (Some(n), None) => n.to_owned(),
            (None, Some(o)) => o.to_string(),
            (None, None) => String::new(),
        }
    }

    fn node_for_value(&self, value: &Value) -> Node {
        match value {
            Value::Message(msg) => Node::Object(self.members_for(msg)),
            other => Node::Leaf(render_leaf(other)),
        }
    }

    fn members_for(&self, msg: &Message) -> Vec<(String, Node)> {
        msg.fields()
            .map(|Field {
                     name,
                     ordinal,
                     value,
                 }| {
                (
                    self.key_for(name.as_deref(), *ordinal),
                    self.node_for_value(value),
                )
            })
            .collect()
    }
}

impl<W: Write> StreamWriter for JsonStreamWriter<W> {
    fn start_message(&mut self, header: &EnvelopeHeader) -> Result<(), Error> {
        if !self.frames.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageStart));
        }
        let mut members = Vec::new();
        if let Some(key) = self.settings.processing_directives_field.as_deref() {
            if header.processing_directives != 0 {
                members.push((
                    key.to_owned(),
                    Node::Leaf(header.processing_directives.to_string()),
                ));
            }
        }
        if let Some(key) = self.settings.schema_version_field.as_deref() {
            if header.schema_version != 0 {
                members.push((key.to_owned(), Node::Leaf(header.schema_version.to_string())));
            }
        }
        if let Some(key) = self.settings.taxonomy_field.as_deref() {
            if header.taxonomy_id != 0 {
                members.push((key.to_owned(), Node::Leaf(header.taxonomy_id.to_string())));
            }
        }
        self.frames.push(members);
        Ok(())
    }

    fn write_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error> {
        let key = self.key_for(name, ordinal);
        let node = self.node_for_value(value);
        match self.frames.last_mut() {
            Some(members) => {
                members.push((key, node));
                Ok(())
            }
            None => Err(Error::UnexpectedEvent(StreamEvent::SimpleField)),
        }
    }

    fn start_submessage(&mut self, name: Option<&str>, ordinal: Option<i16>) -> Result<(), Error> {
        if self.frames.is_empty() {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldStart));
        }
        self.open_keys.push(self.key_for(name, ordinal));
        self.frames.push(Vec::new());
        Ok(())
    }

    fn end_submessage(&mut self) -> Result<(), Error> {
        if self.frames.len() < 2 {
            return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldEnd));
        }
        if let (Some(members), Some(key), Some(parent)) = (
            self.frames.pop(),
            self.open_keys.pop(),
            self.frames.last_mut(),
        ) {
            parent.push((key, Node::Object(members)));
        }
        Ok(())
    }

    fn end_message(&mut self) -> Result<(), Error> {
        if self.frames.len() != 1 {
            return Err(Error::UnexpectedEvent(StreamEvent::MessageEnd));
        }
        if let Some(members) = self.frames.pop() {
            let mut text = String::new();
            write_object(&mut text, &members);
            debug!(bytes = text.len(), "Wrote JSON message");
            self.out.write_all(text.as_bytes())?;
            self.out.flush()?;
        }
        Ok(())
    }
}

fn write_object(out: &mut String, members: &[(String, Node)]) {
    out.push('{');
    let mut first = true;
    // Successive members with an identical key collapse into an array
    for (key, group) in &members.iter().chunk_by(|(key, _)| key.clone()) {
        if !first {
            out.push(',');
        }
        first = false;
        let nodes: Vec<&Node> = group.map(|(_, node)| node).collect();
        escape_string_into(out, key.as_str());
        out.push(':');
        if nodes.len() == 1 {
            write_node(out, nodes[0]);
        } else {
            out.push('[');
            for (i, node) in nodes.iter().enumerate() {
                if i != 0 {
                    out.push(',');
                }
                write_node(out, node);
            }
            out.push(']');
        }
    }
    out.push('}');
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Leaf(text) => out.push_str(text),
        Node::Object(members) => write_object(out, members),
    }
}

fn render_leaf(value: &Value) -> String {
    match value {
        Value::Indicator => "null".to_owned(),
        Value::Boolean(b) => b.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => fmt_double(f64::from(v.0)),
        Value::Double(v) => fmt_double(v.0),
        Value::String(s) => escape_string(s),
        Value::DateTime(dt) => escape_string(&dt.to_rfc3339()),
        Value::ByteArray(bytes) => render_array(bytes.iter().map(|b| b.to_string())),
        Value::ShortArray(vs) => render_array(vs.iter().map(|v| v.to_string())),
        Value::IntArray(vs) => render_array(vs.iter().map(|v| v.to_string())),
        Value::LongArray(vs) => render_array(vs.iter().map(|v| v.to_string())),
        Value::FloatArray(vs) => render_array(vs.iter().map(|v| fmt_double(f64::from(v.0)))),
        Value::DoubleArray(vs) => render_array(vs.iter().map(|v| fmt_double(v.0))),
        Value::Opaque { bytes, .. } => render_array(bytes.iter().map(|b| b.to_string())),
        // Handled structurally by node_for_value
        Value::Message(_) => "null".to_owned(),
    }
}

fn render_array(items: impl Iterator<Item = String>) -> String {
    let mut out = String::from("[");
    for (i, item) in items.enumerate() {
        if i != 0 {
            out.push(',');
        }
        out.push_str(&item);
    }
    out.push(']');
    out
}

/// Shortest round-trip rendering, normalized to `E+xx`/`E-xx` exponent
/// form outside the plain-decimal range. The output always re-reads as a
/// floating point number.
fn fmt_double(v: f64) -> String {
    if !v.is_finite() {
        // JSON has no NaN/infinity; degrade to null
        return "null".to_owned();
    }
    let abs = v.abs();
    if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        let s = format!("{v:E}");
        match s.split_once('E') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}E+{exp}"),
            _ => s,
        }
    } else {
        let s = v.to_string();
        if s.contains('.') || s.contains('e') || s.contains('E') {
            s
        } else {
            format!("{s}.0")
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    escape_string_into(&mut out, s);
    out
}

fn escape_string_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::DateTime;
    use pretty_assertions::assert_eq;

    fn write_one(msg: &Message, settings: JsonSettings) -> String {
        write_one_with_header(&EnvelopeHeader::default(), msg, settings)
    }

    fn write_one_with_header(
        header: &EnvelopeHeader,
        msg: &Message,
        settings: JsonSettings,
    ) -> String {
        let mut writer = JsonStreamWriter::new(Vec::new(), settings);
        let mut reader = crate::tree::TreeReader::new(*header, msg.clone());
        crate::stream::pipe(&mut reader, &mut writer).unwrap();
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn nested_message_rendering() {
        let mut inner = Message::new();
        inner.add("a", 7_i32);
        inner.add("b", "fred");
        let mut msg = Message::new();
        msg.add("outer", inner);
        assert_eq!(
            write_one(&msg, JsonSettings::default()),
            r#"{"outer":{"a":7,"b":"fred"}}"#
        );
    }

    #[test]
    fn repeated_fields_merge_into_array() {
        let mut msg = Message::new();
        msg.add("v", 1_i32);
        msg.add("v", 2_i32);
        msg.add("w", "solo");
        assert_eq!(
            write_one(&msg, JsonSettings::default()),
            r#"{"v":[1,2],"w":"solo"}"#
        );
    }

    #[test]
    fn primitive_array_renders_as_json_array() {
        let mut msg = Message::new();
        msg.add("nums", vec![1_i32, 2, 4]);
        assert_eq!(
            write_one(&msg, JsonSettings::default()),
            r#"{"nums":[1,2,4]}"#
        );
    }

    #[test]
    fn indicator_renders_null() {
        let mut msg = Message::new();
        msg.push(Field::named("gap", Value::Indicator));
        assert_eq!(write_one(&msg, JsonSettings::default()), r#"{"gap":null}"#);
    }

    #[test]
    fn datetime_renders_rfc3339() {
        let mut msg = Message::new();
        msg.add(
            "when",
            DateTime::from_civil_utc(2001, 3, 4, 5, 6, 7, 0)
                .unwrap()
                .with_accuracy(crate::types::Accuracy::Second),
        );
        assert_eq!(
            write_one(&msg, JsonSettings::default()),
            r#"{"when":"2001-03-04T05:06:07Z"}"#
        );
    }

    #[test]
    fn envelope_fields_emitted_when_nonzero() {
        let mut msg = Message::new();
        msg.add("a", 1_i32);
        let header = EnvelopeHeader {
            processing_directives: 0,
            schema_version: 2,
            taxonomy_id: 3,
        };
        assert_eq!(
            write_one_with_header(&header, &msg, JsonSettings::default()),
            r#"{"fudgeSchemaVersion":2,"fudgeTaxonomy":3,"a":1}"#
        );
        let silent = JsonSettings {
            schema_version_field: None,
            taxonomy_field: None,
            ..JsonSettings::default()
        };
        assert_eq!(
            write_one_with_header(&header, &msg, silent),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn key_preference() {
        let mut msg = Message::new();
        msg.add_both("B", 2, "both");
        assert_eq!(
            write_one(&msg, JsonSettings::default()),
            r#"{"B":"both"}"#
        );
        let by_ordinal = JsonSettings {
            prefer_field_names: false,
            ..JsonSettings::default()
        };
        assert_eq!(write_one(&msg, by_ordinal), r#"{"2":"both"}"#);
    }

    #[test]
    fn double_formatting() {
        assert_eq!(fmt_double(2.375e15), "2.375E+15");
        assert_eq!(fmt_double(-2.375e15), "-2.375E+15");
        assert_eq!(fmt_double(0.0000625), "6.25E-5");
        assert_eq!(fmt_double(-1_234_500.0), "-1234500.0");
        assert_eq!(fmt_double(123.45), "123.45");
        assert_eq!(fmt_double(0.0), "0.0");
        assert_eq!(fmt_double(3.0), "3.0");
    }
}
