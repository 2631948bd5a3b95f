use crate::{
    error::Error,
    serializer::{
        type_map::{TypeEntry, TypeMap},
        DecodedField, DecodedMessage, DecodedValue, ObjectRef, RefId, TYPE_ORDINAL,
    },
    stream::{StreamEvent, StreamReader, StreamWriter},
    types::Value,
    wire::EnvelopeHeader,
};
use fxhash::FxHashMap;
use std::any::TypeId;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

fn identity_key(obj: &ObjectRef) -> usize {
    Rc::as_ptr(obj) as *const () as usize
}

/// Drives surrogates while writing an object graph.
///
/// Keeps an identity map from object pointer to the ref id of the
/// sub-message the object was written into, bumps the ref counter for
/// every sub-message emitted (raw message trees included), and tracks
/// per-class prototype ref ids so repeat classes write a relative type
/// reference instead of their names.
pub struct SerializationContext<'a> {
    type_map: &'a TypeMap,
    writer: &'a mut dyn StreamWriter,
    refs: FxHashMap<usize, RefId>,
    prototypes: FxHashMap<TypeId, RefId>,
    next_ref: RefId,
    frames: Vec<RefId>,
}

impl<'a> SerializationContext<'a> {
    pub(crate) fn new(type_map: &'a TypeMap, writer: &'a mut dyn StreamWriter) -> Self {
        Self {
            type_map,
            writer,
            refs: FxHashMap::default(),
            prototypes: FxHashMap::default(),
            next_ref: 0,
            frames: Vec::new(),
        }
    }

    pub(crate) fn serialize_root<T: 'static>(
        &mut self,
        header: &EnvelopeHeader,
        root: &Rc<RefCell<T>>,
    ) -> Result<(), Error> {
        let type_map: &'a TypeMap = self.type_map;
        let entry = type_map
            .entry_by_type(TypeId::of::<T>())
            .ok_or(Error::UnregisteredType(std::any::type_name::<T>()))?;
        self.writer.start_message(header)?;
        let obj: ObjectRef = root.clone();
        self.refs.insert(identity_key(&obj), 0);
        self.next_ref = 1;
        self.write_type_header(TypeId::of::<T>(), entry, 0)?;
        self.frames.push(0);
        let result = entry.surrogate.serialize(&obj, self);
        self.frames.pop();
        result?;
        self.writer.end_message()
    }

    fn current_ref(&self) -> RefId {
        self.frames.last().copied().unwrap_or(0)
    }

    /// First occurrence of a class writes its names at the reserved
    /// ordinal; later occurrences write a non-positive delta back to the
    /// prototype sub-message.
    fn write_type_header(
        &mut self,
        type_id: TypeId,
        entry: &TypeEntry,
        self_ref: RefId,
    ) -> Result<(), Error> {
        if let Some(&prototype) = self.prototypes.get(&type_id) {
            let delta = prototype - self_ref;
            trace!(self_ref, prototype, delta, "Type back-reference");
            self.writer
                .write_field(None, Some(TYPE_ORDINAL), &Value::Int(delta))
        } else {
            self.prototypes.insert(type_id, self_ref);
            for name in &entry.names {
                self.writer
                    .write_field(None, Some(TYPE_ORDINAL), &Value::String(name.clone()))?;
            }
            Ok(())
        }
    }

    /// Write a plain value field into the current sub-message.
    pub fn write_value_field(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        value: &Value,
    ) -> Result<(), Error> {
        // Raw message trees still occupy ref ids on the read side
        if let Value::Message(msg) = value {
            self.next_ref += 1 + msg.submessage_count() as RefId;
        }
        self.writer.write_field(name, ordinal, value)
    }

    /// Write an object-valued field: inline on first encounter, a
    /// relative reference to the earlier sub-message afterwards.
    pub fn write_object<T: 'static>(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        obj: &Rc<RefCell<T>>,
    ) -> Result<(), Error> {
        let any: ObjectRef = obj.clone();
        self.write_object_dyn(
            name,
            ordinal,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            &any,
        )
    }

    pub fn write_object_dyn(
        &mut self,
        name: Option<&str>,
        ordinal: Option<i16>,
        type_id: TypeId,
        type_name: &'static str,
        obj: &ObjectRef,
    ) -> Result<(), Error> {
        let key = identity_key(obj);
        if let Some(&target) = self.refs.get(&key) {
            let delta = target - self.current_ref();
            trace!(target, current = self.current_ref(), delta, "Shared reference");
            return self.writer.write_field(name, ordinal, &Value::Int(delta));
        }
        let type_map: &'a TypeMap = self.type_map;
        let entry = type_map
            .entry_by_type(type_id)
            .ok_or(Error::UnregisteredType(type_name))?;
        self.writer.start_submessage(name, ordinal)?;
        let ref_id = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(key, ref_id);
        self.write_type_header(type_id, entry, ref_id)?;
        self.frames.push(ref_id);
        let result = entry.surrogate.serialize(obj, self);
        self.frames.pop();
        result?;
        self.writer.end_submessage()
    }
}

#[derive(Default)]
struct RefSlot {
    msg: DecodedMessage,
    obj: Option<ObjectRef>,
}

/// Drives surrogates while reading an object graph.
///
/// `load` materializes the envelope into an indexed table of decoded
/// sub-messages (pre-order ref ids); objects are then built on demand,
/// each surrogate registering its instance before following nested
/// references so back-edges resolve to the same handle.
pub struct DeserializationContext<'a> {
    type_map: &'a TypeMap,
    slots: Vec<RefSlot>,
    in_progress: Vec<RefId>,
}

impl<'a> DeserializationContext<'a> {
    pub(crate) fn load<R: StreamReader>(
        type_map: &'a TypeMap,
        reader: &mut R,
    ) -> Result<Self, Error> {
        match reader.move_next()? {
            StreamEvent::MessageStart => {}
            other => return Err(Error::UnexpectedEvent(other)),
        }
        let mut slots = vec![RefSlot::default()];
        let mut stack = vec![0_usize];
        loop {
            let event = reader.move_next()?;
            let top = match stack.last() {
                Some(&top) => top,
                None => return Err(Error::UnexpectedEvent(event)),
            };
            match event {
                StreamEvent::SimpleField => {
                    let value = reader
                        .field_value()
                        .cloned()
                        .ok_or(Error::UnexpectedEvent(StreamEvent::SimpleField))?;
                    slots[top].msg.fields.push(DecodedField {
                        name: reader.field_name().map(str::to_owned),
                        ordinal: reader.field_ordinal(),
                        value: DecodedValue::Value(value),
                    });
                }
                StreamEvent::SubmessageFieldStart => {
                    let ref_id = slots.len() as RefId;
                    slots[top].msg.fields.push(DecodedField {
                        name: reader.field_name().map(str::to_owned),
                        ordinal: reader.field_ordinal(),
                        value: DecodedValue::SubMessage(ref_id),
                    });
                    slots.push(RefSlot::default());
                    stack.push(ref_id as usize);
                }
                StreamEvent::SubmessageFieldEnd => {
                    stack.pop();
                    if stack.is_empty() {
                        return Err(Error::UnexpectedEvent(StreamEvent::SubmessageFieldEnd));
                    }
                }
                StreamEvent::MessageEnd => break,
                other => return Err(Error::UnexpectedEvent(other)),
            }
        }
        debug!(sub_messages = slots.len(), "Loaded message for deserialization");
        Ok(Self {
            type_map,
            slots,
            in_progress: Vec::new(),
        })
    }

    fn slot_index(&self, ref_id: RefId) -> Result<usize, Error> {
        if ref_id < 0 || ref_id as usize >= self.slots.len() {
            return Err(Error::ReferenceOutOfRange(i64::from(ref_id)));
        }
        Ok(ref_id as usize)
    }

    /// The decoded form of a sub-message.
    pub fn decoded(&self, ref_id: RefId) -> Result<&DecodedMessage, Error> {
        Ok(&self.slots[self.slot_index(ref_id)?].msg)
    }

    fn current_ref(&self) -> RefId {
        self.in_progress.last().copied().unwrap_or(0)
    }

    /// Bind the partially constructed object to the sub-message being
    /// deserialized. Surrogates must call this before following any
    /// nested reference so cyclic edges resolve to the same handle.
    pub fn register(&mut self, obj: ObjectRef) -> Result<(), Error> {
        let current = match self.in_progress.last() {
            Some(&current) => current,
            None => return Err(Error::RegisterOutsideFrame),
        };
        let idx = self.slot_index(current)?;
        if self.slots[idx].obj.is_some() {
            return Err(Error::DuplicateRegistration(current));
        }
        trace!(ref_id = current, "Registered instance");
        self.slots[idx].obj = Some(obj);
        Ok(())
    }

    /// The live object for a ref id, deserializing it on demand.
    pub fn get_from_ref(&mut self, ref_id: RefId, hint: Option<TypeId>) -> Result<ObjectRef, Error> {
        let idx = self.slot_index(ref_id)?;
        if let Some(obj) = &self.slots[idx].obj {
            return Ok(obj.clone());
        }
        if self.in_progress.contains(&ref_id) {
            return Err(Error::UnregisteredBackReference(ref_id));
        }
        self.deserialize_from_message(ref_id, hint)
    }

    fn deserialize_from_message(
        &mut self,
        ref_id: RefId,
        hint: Option<TypeId>,
    ) -> Result<ObjectRef, Error> {
        let entry = self.resolve_entry(ref_id, hint)?;
        let idx = self.slot_index(ref_id)?;
        let msg = self.slots[idx].msg.clone();
        self.in_progress.push(ref_id);
        let result = entry.surrogate.deserialize(&msg, self);
        self.in_progress.pop();
        let obj = result?;
        let slot = &mut self.slots[idx];
        if slot.obj.is_none() {
            slot.obj = Some(obj.clone());
        }
        Ok(obj)
    }

    /// Resolve the runtime type of a sub-message by reading the reserved
    /// ordinal, following chained non-positive type references until the
    /// type names are found.
    fn resolve_entry(&self, ref_id: RefId, hint: Option<TypeId>) -> Result<&'a TypeEntry, Error> {
        let type_map: &'a TypeMap = self.type_map;
        let mut at = ref_id;
        let mut names: Vec<String> = Vec::new();
        for _ in 0..self.slots.len() {
            let msg = &self.slots[self.slot_index(at)?].msg;
            let mut type_fields = msg.all_by_ordinal(TYPE_ORDINAL).peekable();
            let first = match type_fields.peek() {
                Some(first) => first,
                None => break,
            };
            match &first.value {
                DecodedValue::Value(Value::String(_)) => {
                    names = type_fields
                        .filter_map(|f| f.value().and_then(Value::as_str))
                        .map(str::to_owned)
                        .collect();
                    break;
                }
                DecodedValue::Value(v) => {
                    let delta = v
                        .as_i32()
                        .ok_or_else(|| Error::NotAnObjectField(first.display_name()))?;
                    if delta > 0 {
                        return Err(Error::ForwardReference {
                            from: at,
                            to: at + delta,
                        });
                    }
                    at += delta;
                }
                DecodedValue::SubMessage(_) => break,
            }
        }
        for name in &names {
            if let Some(entry) = type_map.entry_by_name(name) {
                return Ok(entry);
            }
        }
        if let Some(type_id) = hint {
            if let Some(entry) = type_map.entry_by_type(type_id) {
                return Ok(entry);
            }
        }
        Err(Error::TypeResolution(names))
    }

    /// Resolve an object-valued field: a nested sub-message deserializes
    /// in place, an integer is a relative reference to an earlier
    /// sub-message.
    pub fn resolve_object<T: 'static>(
        &mut self,
        field: &DecodedField,
    ) -> Result<Rc<RefCell<T>>, Error> {
        let obj = self.resolve_object_dyn(field, Some(TypeId::of::<T>()))?;
        crate::serializer::downcast_object::<T>(obj)
    }

    pub fn resolve_object_dyn(
        &mut self,
        field: &DecodedField,
        hint: Option<TypeId>,
    ) -> Result<ObjectRef, Error> {
        match &field.value {
            DecodedValue::SubMessage(ref_id) => self.get_from_ref(*ref_id, hint),
            DecodedValue::Value(v) => {
                let delta = v
                    .as_i32()
                    .ok_or_else(|| Error::NotAnObjectField(field.display_name()))?;
                self.get_from_ref(self.current_ref() + delta, hint)
            }
        }
    }
}
