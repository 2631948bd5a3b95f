use crate::types::{DateTime, Value};
use serde::{Deserialize, Serialize};

/// One field of a message: an optional name (at most 255 UTF-8 bytes on
/// the wire), an optional ordinal, and a typed value.
#[derive(Clone, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct Field {
    pub name: Option<String>,
    pub ordinal: Option<i16>,
    pub value: Value,
}

impl Field {
    pub fn new(name: Option<String>, ordinal: Option<i16>, value: Value) -> Self {
        Self {
            name,
            ordinal,
            value,
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(Some(name.into()), None, value.into())
    }

    pub fn at_ordinal(ordinal: i16, value: impl Into<Value>) -> Self {
        Self::new(None, Some(ordinal), value.into())
    }

    pub fn anonymous(value: impl Into<Value>) -> Self {
        Self::new(None, None, value.into())
    }
}

/// An ordered sequence of fields. Duplicate names and ordinals are
/// permitted; lookups return the first match unless the `all_` form is
/// used. Messages are plain values; building one mutates in place.
#[derive(Clone, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub struct Message {
    fields: Vec<Field>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Append a named field, converting the native value to its preferred
    /// wire type.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.push(Field::named(name, value));
        self
    }

    /// Append an ordinal-only field.
    pub fn add_at(&mut self, ordinal: i16, value: impl Into<Value>) -> &mut Self {
        self.push(Field::at_ordinal(ordinal, value));
        self
    }

    /// Append a field carrying both a name and an ordinal.
    pub fn add_both(
        &mut self,
        name: impl Into<String>,
        ordinal: i16,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.push(Field::new(Some(name.into()), Some(ordinal), value.into()));
        self
    }

    pub fn first_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name.as_deref() == Some(name))
    }

    pub fn all_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name.as_deref() == Some(name))
    }

    pub fn first_by_ordinal(&self, ordinal: i16) -> Option<&Field> {
        self.fields.iter().find(|f| f.ordinal == Some(ordinal))
    }

    pub fn all_by_ordinal(&self, ordinal: i16) -> impl Iterator<Item = &Field> + '_ {
        self.fields
            .iter()
            .filter(move |f| f.ordinal == Some(ordinal))
    }

    pub fn bool_by_name(&self, name: &str) -> Option<bool> {
        self.first_by_name(name).and_then(|f| f.value.as_bool())
    }

    pub fn i32_by_name(&self, name: &str) -> Option<i32> {
        self.first_by_name(name).and_then(|f| f.value.as_i32())
    }

    pub fn i64_by_name(&self, name: &str) -> Option<i64> {
        self.first_by_name(name).and_then(|f| f.value.as_i64())
    }

    pub fn f32_by_name(&self, name: &str) -> Option<f32> {
        self.first_by_name(name).and_then(|f| f.value.as_f32())
    }

    pub fn f64_by_name(&self, name: &str) -> Option<f64> {
        self.first_by_name(name).and_then(|f| f.value.as_f64())
    }

    pub fn str_by_name(&self, name: &str) -> Option<&str> {
        self.first_by_name(name).and_then(|f| f.value.as_str())
    }

    pub fn bytes_by_name(&self, name: &str) -> Option<&[u8]> {
        self.first_by_name(name).and_then(|f| f.value.as_bytes())
    }

    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.first_by_name(name).and_then(|f| f.value.as_message())
    }

    pub fn datetime_by_name(&self, name: &str) -> Option<&DateTime> {
        self.first_by_name(name).and_then(|f| f.value.as_datetime())
    }

    pub fn i32_by_ordinal(&self, ordinal: i16) -> Option<i32> {
        self.first_by_ordinal(ordinal).and_then(|f| f.value.as_i32())
    }

    pub fn i64_by_ordinal(&self, ordinal: i16) -> Option<i64> {
        self.first_by_ordinal(ordinal).and_then(|f| f.value.as_i64())
    }

    pub fn str_by_ordinal(&self, ordinal: i16) -> Option<&str> {
        self.first_by_ordinal(ordinal).and_then(|f| f.value.as_str())
    }

    /// Total count of sub-messages in this tree, this message excluded.
    pub(crate) fn submessage_count(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|f| f.value.as_message())
            .map(|m| 1 + m.submessage_count())
            .sum()
    }
}

impl FromIterator<Field> for Message {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
