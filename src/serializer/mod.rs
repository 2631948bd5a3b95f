//! Object graph (de)serialization over the stream event model.
//!
//! Objects are `Rc<RefCell<T>>` handles, type-erased as [`ObjectRef`];
//! identity is the `Rc` pointer. A [`TypeMap`] picks the surrogate for
//! each runtime type; the contexts drive surrogates over any stream
//! reader/writer, assigning every sub-message a ref id so shared
//! references and cycles round-trip as relative integer deltas.

use crate::{
    error::Error,
    stream::{StreamReader, StreamWriter},
    types::Value,
    wire::EnvelopeHeader,
};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub use context::{DeserializationContext, SerializationContext};
pub use surrogate::{
    FudgeSerializable, InfoSerializable, ListItem, Property, PropertyTable, SerializationInfo,
    StructSurrogate, Surrogate,
};
pub use type_map::{TypeMap, TypeMapBuilder};

pub mod context;
pub mod surrogate;
pub mod type_map;

/// Index of a sub-message within one (de)serialization, assigned in
/// first-encounter (pre-order) stream order. The top-level message is 0.
pub type RefId = i32;

/// A type-erased object handle. Concretely always an `Rc<RefCell<T>>`.
pub type ObjectRef = Rc<dyn Any>;

/// The reserved ordinal carrying type names or a type back-reference.
pub const TYPE_ORDINAL: i16 = -1;

/// Recover the typed handle behind an [`ObjectRef`].
pub fn downcast_object<T: 'static>(obj: ObjectRef) -> Result<Rc<RefCell<T>>, Error> {
    obj.downcast::<RefCell<T>>()
        .map_err(|_| Error::ValueConversion(std::any::type_name::<T>()))
}

/// A field of a loaded sub-message: nested sub-messages are replaced by
/// their ref id so surrogates can follow references explicitly.
#[derive(Clone, PartialEq, Debug)]
pub struct DecodedField {
    pub name: Option<String>,
    pub ordinal: Option<i16>,
    pub value: DecodedValue,
}

#[derive(Clone, PartialEq, Debug)]
pub enum DecodedValue {
    Value(Value),
    SubMessage(RefId),
}

impl DecodedField {
    pub fn value(&self) -> Option<&Value> {
        match &self.value {
            DecodedValue::Value(v) => Some(v),
            DecodedValue::SubMessage(_) => None,
        }
    }

    pub(crate) fn display_name(&self) -> String {
        match (&self.name, self.ordinal) {
            (Some(n), _) => n.clone(),
            (None, Some(o)) => o.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// One sub-message of the source stream, in decoded form.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DecodedMessage {
    pub fields: Vec<DecodedField>,
}

impl DecodedMessage {
    pub fn fields(&self) -> impl Iterator<Item = &DecodedField> {
        self.fields.iter()
    }

    /// Fields other than the reserved type-id ordinal.
    pub fn data_fields(&self) -> impl Iterator<Item = &DecodedField> {
        self.fields
            .iter()
            .filter(|f| f.ordinal != Some(TYPE_ORDINAL))
    }

    pub fn first_by_name(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name.as_deref() == Some(name))
    }

    pub fn all_by_ordinal(&self, ordinal: i16) -> impl Iterator<Item = &DecodedField> {
        self.fields
            .iter()
            .filter(move |f| f.ordinal == Some(ordinal))
    }
}

/// Facade binding a [`TypeMap`] to the stream layer.
#[derive(Clone)]
pub struct FudgeSerializer {
    type_map: Arc<TypeMap>,
}

impl FudgeSerializer {
    pub fn new(type_map: Arc<TypeMap>) -> Self {
        Self { type_map }
    }

    /// Write `root` and every object reachable from it as one envelope.
    pub fn serialize<T, W>(
        &self,
        writer: &mut W,
        header: &EnvelopeHeader,
        root: &Rc<RefCell<T>>,
    ) -> Result<(), Error>
    where
        T: 'static,
        W: StreamWriter,
    {
        let mut ctx = SerializationContext::new(&self.type_map, writer);
        ctx.serialize_root(header, root)
    }

    /// Load one envelope and rebuild the object graph rooted at its
    /// top-level message.
    pub fn deserialize<T, R>(&self, reader: &mut R) -> Result<Rc<RefCell<T>>, Error>
    where
        T: 'static,
        R: StreamReader,
    {
        let mut ctx = DeserializationContext::load(&self.type_map, reader)?;
        let obj = ctx.get_from_ref(0, Some(TypeId::of::<T>()))?;
        downcast_object::<T>(obj)
    }
}
