use crate::{
    error::Error,
    serializer::{
        downcast_object, DecodedField, DecodedMessage, DeserializationContext, ObjectRef,
        SerializationContext,
    },
    types::{DateTime, Value},
};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::trace;

/// Adapter converting one runtime type to and from its sub-message form.
///
/// `serialize` writes the object's fields into the sub-message the
/// context has already opened (the type-id field is written by the
/// context). `deserialize` must call [`DeserializationContext::register`]
/// with the fresh instance before following any nested reference, so
/// that cyclic edges resolve to the same handle.
pub trait Surrogate: Send + Sync {
    fn serialize(&self, obj: &ObjectRef, ctx: &mut SerializationContext<'_>)
        -> Result<(), Error>;

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error>;
}

/// The user-hook capability: a type that writes and reads its own
/// fields. Preferred over every other surrogate shape when present.
pub trait FudgeSerializable: Default + 'static {
    fn serialize_fields(&self, ctx: &mut SerializationContext<'_>) -> Result<(), Error>;

    fn deserialize_fields(
        &mut self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<(), Error>;
}

pub(crate) struct HookSurrogate<T> {
    _pd: PhantomData<fn() -> T>,
}

impl<T> HookSurrogate<T> {
    pub(crate) fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<T: FudgeSerializable> Surrogate for HookSurrogate<T> {
    fn serialize(
        &self,
        obj: &ObjectRef,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<(), Error> {
        let cell = downcast_object::<T>(obj.clone())?;
        let guard = cell.borrow();
        guard.serialize_fields(ctx)
    }

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error> {
        let rc = Rc::new(RefCell::new(T::default()));
        ctx.register(rc.clone())?;
        rc.borrow_mut().deserialize_fields(msg, ctx)?;
        Ok(rc)
    }
}

enum InfoSlot {
    Value(Value),
    Object {
        type_id: TypeId,
        type_name: &'static str,
        obj: ObjectRef,
    },
    Decoded(DecodedField),
}

/// An ordered name/value bag, the exchange format of the classic
/// info-bag capability. Writers fill it with `add_value`/`add_object`;
/// on the read side entries wrap the decoded fields and objects resolve
/// through the context.
#[derive(Default)]
pub struct SerializationInfo {
    entries: Vec<(String, InfoSlot)>,
}

impl SerializationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .push((name.into(), InfoSlot::Value(value.into())));
    }

    pub fn add_object<U: 'static>(&mut self, name: impl Into<String>, obj: &Rc<RefCell<U>>) {
        self.entries.push((
            name.into(),
            InfoSlot::Object {
                type_id: TypeId::of::<U>(),
                type_name: std::any::type_name::<U>(),
                obj: obj.clone(),
            },
        ));
    }

    pub(crate) fn push_decoded(&mut self, field: DecodedField) {
        let name = field.display_name();
        self.entries.push((name, InfoSlot::Decoded(field)));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find_map(|(n, slot)| {
            if n != name {
                return None;
            }
            match slot {
                InfoSlot::Value(v) => Some(v),
                InfoSlot::Decoded(field) => field.value(),
                InfoSlot::Object { .. } => None,
            }
        })
    }

    /// Resolve an object entry. Only meaningful on the read side, where
    /// nested sub-messages and relative references resolve through the
    /// context.
    pub fn object<U: 'static>(
        &self,
        name: &str,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<Rc<RefCell<U>>, Error> {
        for (n, slot) in &self.entries {
            if n != name {
                continue;
            }
            return match slot {
                InfoSlot::Decoded(field) => ctx.resolve_object::<U>(field),
                InfoSlot::Object { obj, .. } => downcast_object::<U>(obj.clone()),
                InfoSlot::Value(_) => Err(Error::NotAnObjectField(name.to_owned())),
            };
        }
        Err(Error::NotAnObjectField(name.to_owned()))
    }
}

/// The classic info-bag capability: the object writes a name/value bag,
/// and is rebuilt from one. `Default` stands in for allocation without
/// construction; the instance is registered before the bag resolves any
/// nested object, then replaced wholesale once `from_info` returns.
pub trait InfoSerializable: Default + 'static {
    fn write_info(&self, info: &mut SerializationInfo);

    fn from_info(
        info: &SerializationInfo,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<Self, Error>;
}

pub(crate) struct InfoSurrogate<T> {
    _pd: PhantomData<fn() -> T>,
}

impl<T> InfoSurrogate<T> {
    pub(crate) fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<T: InfoSerializable> Surrogate for InfoSurrogate<T> {
    fn serialize(
        &self,
        obj: &ObjectRef,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<(), Error> {
        let cell = downcast_object::<T>(obj.clone())?;
        let mut info = SerializationInfo::new();
        cell.borrow().write_info(&mut info);
        for (name, slot) in &info.entries {
            match slot {
                InfoSlot::Value(v) => ctx.write_value_field(Some(name), None, v)?,
                InfoSlot::Object {
                    type_id,
                    type_name,
                    obj,
                } => ctx.write_object_dyn(Some(name), None, *type_id, type_name, obj)?,
                InfoSlot::Decoded(_) => {}
            }
        }
        Ok(())
    }

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error> {
        let rc = Rc::new(RefCell::new(T::default()));
        ctx.register(rc.clone())?;
        let mut info = SerializationInfo::new();
        for field in msg.data_fields() {
            info.push_decoded(field.clone());
        }
        let value = T::from_info(&info, ctx)?;
        *rc.borrow_mut() = value;
        Ok(rc)
    }
}

/// An element a list or map surrogate can carry: a primitive value or an
/// object reference.
pub trait ListItem: Sized + 'static {
    fn write_item(&self, ordinal: i16, ctx: &mut SerializationContext<'_>) -> Result<(), Error>;

    fn read_item(
        field: &DecodedField,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<Self, Error>;
}

macro_rules! impl_value_list_item {
    ($ty:ty, $get:expr) => {
        impl ListItem for $ty {
            fn write_item(
                &self,
                ordinal: i16,
                ctx: &mut SerializationContext<'_>,
            ) -> Result<(), Error> {
                ctx.write_value_field(None, Some(ordinal), &Value::from(self.clone()))
            }

            fn read_item(
                field: &DecodedField,
                _ctx: &mut DeserializationContext<'_>,
            ) -> Result<Self, Error> {
                field
                    .value()
                    .and_then($get)
                    .ok_or(Error::ValueConversion(stringify!($ty)))
            }
        }
    };
}

impl_value_list_item!(bool, Value::as_bool);
impl_value_list_item!(i8, Value::as_i8);
impl_value_list_item!(i16, Value::as_i16);
impl_value_list_item!(i32, Value::as_i32);
impl_value_list_item!(i64, Value::as_i64);
impl_value_list_item!(f32, Value::as_f32);
impl_value_list_item!(f64, Value::as_f64);
impl_value_list_item!(String, |v: &Value| v.as_str().map(str::to_owned));
impl_value_list_item!(Vec<u8>, |v: &Value| v.as_bytes().map(<[u8]>::to_vec));
impl_value_list_item!(DateTime, |v: &Value| v.as_datetime().copied());

impl<U: 'static> ListItem for Rc<RefCell<U>> {
    fn write_item(&self, ordinal: i16, ctx: &mut SerializationContext<'_>) -> Result<(), Error> {
        ctx.write_object(None, Some(ordinal), self)
    }

    fn read_item(
        field: &DecodedField,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<Self, Error> {
        ctx.resolve_object::<U>(field)
    }
}

/// `Vec<E>` as repeated fields at ordinal 1.
pub(crate) struct ListSurrogate<E> {
    _pd: PhantomData<fn() -> E>,
}

impl<E> ListSurrogate<E> {
    pub(crate) fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<E: ListItem> Surrogate for ListSurrogate<E> {
    fn serialize(
        &self,
        obj: &ObjectRef,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<(), Error> {
        let cell = downcast_object::<Vec<E>>(obj.clone())?;
        let guard = cell.borrow();
        for item in guard.iter() {
            item.write_item(1, ctx)?;
        }
        Ok(())
    }

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error> {
        let rc = Rc::new(RefCell::new(Vec::<E>::new()));
        ctx.register(rc.clone())?;
        for field in msg.all_by_ordinal(1) {
            let item = E::read_item(field, ctx)?;
            rc.borrow_mut().push(item);
        }
        Ok(rc)
    }
}

/// `BTreeMap<K, V>` as parallel key/value sequences at ordinals 1 and 2.
/// Reading pairs by position and truncates to the shorter sequence.
pub(crate) struct MapSurrogate<K, V> {
    _pd: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MapSurrogate<K, V> {
    pub(crate) fn new() -> Self {
        Self { _pd: PhantomData }
    }
}

impl<K, V> Surrogate for MapSurrogate<K, V>
where
    K: ListItem + Ord,
    V: ListItem,
{
    fn serialize(
        &self,
        obj: &ObjectRef,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<(), Error> {
        let cell = downcast_object::<BTreeMap<K, V>>(obj.clone())?;
        let guard = cell.borrow();
        for (key, value) in guard.iter() {
            key.write_item(1, ctx)?;
            value.write_item(2, ctx)?;
        }
        Ok(())
    }

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error> {
        let rc = Rc::new(RefCell::new(BTreeMap::<K, V>::new()));
        ctx.register(rc.clone())?;
        let keys: Vec<&DecodedField> = msg.all_by_ordinal(1).collect();
        let values: Vec<&DecodedField> = msg.all_by_ordinal(2).collect();
        let pairs = keys.len().min(values.len());
        if keys.len() != values.len() {
            trace!(
                keys = keys.len(),
                values = values.len(),
                "Key/value sequences differ in length, truncating"
            );
        }
        for i in 0..pairs {
            let key = K::read_item(keys[i], ctx)?;
            let value = V::read_item(values[i], ctx)?;
            rc.borrow_mut().insert(key, value);
        }
        Ok(rc)
    }
}

type ScalarGet<T> = Box<dyn Fn(&T) -> Value + Send + Sync>;
type ScalarSet<T> = Box<dyn Fn(&mut T, &Value) -> Result<(), Error> + Send + Sync>;
type RefWrite<T> =
    Box<dyn Fn(&T, Option<&str>, &mut SerializationContext<'_>) -> Result<(), Error> + Send + Sync>;
type RefRead<T> = Box<
    dyn Fn(&mut T, &DecodedField, &mut DeserializationContext<'_>) -> Result<(), Error>
        + Send
        + Sync,
>;
type RepeatedGet<T> = Box<dyn Fn(&T) -> Vec<Value> + Send + Sync>;
type RepeatedPush<T> = Box<dyn Fn(&mut T, &Value) -> Result<(), Error> + Send + Sync>;
type Hook<T> = Box<dyn Fn(&T) + Send + Sync>;
type HookMut<T> = Box<dyn Fn(&mut T) + Send + Sync>;

enum PropertyKind<T> {
    Scalar { get: ScalarGet<T>, set: ScalarSet<T> },
    Reference { write: RefWrite<T>, read: RefRead<T> },
    Repeated {
        get: RepeatedGet<T>,
        push: RepeatedPush<T>,
    },
}

/// One serialized property of a property-table type.
pub struct Property<T> {
    name: String,
    kind: PropertyKind<T>,
}

impl<T: 'static> Property<T> {
    /// A plain value property with a getter/setter pair.
    pub fn scalar(
        name: impl Into<String>,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, &Value) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Scalar {
                get: Box::new(get),
                set: Box::new(set),
            },
        }
    }

    /// An object-reference property. An absent reference writes nothing.
    pub fn reference<U: 'static>(
        name: impl Into<String>,
        get: impl Fn(&T) -> Option<Rc<RefCell<U>>> + Send + Sync + 'static,
        set: impl Fn(&mut T, Rc<RefCell<U>>) + Send + Sync + 'static,
    ) -> Self {
        let write: RefWrite<T> = Box::new(move |t, name, ctx| match get(t) {
            Some(obj) => ctx.write_object(name, None, &obj),
            None => Ok(()),
        });
        let read: RefRead<T> = Box::new(move |t, field, ctx| {
            let obj = ctx.resolve_object::<U>(field)?;
            set(t, obj);
            Ok(())
        });
        Self {
            name: name.into(),
            kind: PropertyKind::Reference { write, read },
        }
    }

    /// A list-valued property with no setter: elements write as repeated
    /// fields and append into the existing list on read.
    pub fn repeated(
        name: impl Into<String>,
        get: impl Fn(&T) -> Vec<Value> + Send + Sync + 'static,
        push: impl Fn(&mut T, &Value) -> Result<(), Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Repeated {
                get: Box::new(get),
                push: Box::new(push),
            },
        }
    }
}

/// The member table of a property-table type, precomputed at
/// registration and addressed during serialization.
pub struct PropertyTable<T> {
    properties: Vec<Property<T>>,
}

impl<T: 'static> PropertyTable<T> {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, property: Property<T>) -> Self {
        self.properties.push(property);
        self
    }
}

impl<T: 'static> Default for PropertyTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The bean shape: properties emitted by serialized name, rebuilt over a
/// default instance, with optional lifecycle hooks around each pass.
pub struct StructSurrogate<T: Default + 'static> {
    table: PropertyTable<T>,
    serializing: Option<Hook<T>>,
    serialized: Option<Hook<T>>,
    deserializing: Option<HookMut<T>>,
    deserialized: Option<HookMut<T>>,
}

impl<T: Default + 'static> StructSurrogate<T> {
    pub fn new(table: PropertyTable<T>) -> Self {
        Self {
            table,
            serializing: None,
            serialized: None,
            deserializing: None,
            deserialized: None,
        }
    }

    pub fn on_serializing(mut self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.serializing = Some(Box::new(hook));
        self
    }

    pub fn on_serialized(mut self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.serialized = Some(Box::new(hook));
        self
    }

    pub fn on_deserializing(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.deserializing = Some(Box::new(hook));
        self
    }

    pub fn on_deserialized(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.deserialized = Some(Box::new(hook));
        self
    }
}

impl<T: Default + 'static> Surrogate for StructSurrogate<T> {
    fn serialize(
        &self,
        obj: &ObjectRef,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<(), Error> {
        let cell = downcast_object::<T>(obj.clone())?;
        let guard = cell.borrow();
        if let Some(hook) = &self.serializing {
            hook(&guard);
        }
        for property in &self.table.properties {
            match &property.kind {
                PropertyKind::Scalar { get, .. } => {
                    let value = get(&guard);
                    ctx.write_value_field(Some(&property.name), None, &value)?;
                }
                PropertyKind::Repeated { get, .. } => {
                    for value in get(&guard) {
                        ctx.write_value_field(Some(&property.name), None, &value)?;
                    }
                }
                PropertyKind::Reference { write, .. } => {
                    write(&guard, Some(&property.name), ctx)?;
                }
            }
        }
        if let Some(hook) = &self.serialized {
            hook(&guard);
        }
        Ok(())
    }

    fn deserialize(
        &self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<ObjectRef, Error> {
        let rc = Rc::new(RefCell::new(T::default()));
        ctx.register(rc.clone())?;
        if let Some(hook) = &self.deserializing {
            hook(&mut rc.borrow_mut());
        }
        for field in msg.data_fields() {
            let name = match field.name.as_deref() {
                Some(name) => name,
                None => continue,
            };
            let property = match self.table.properties.iter().find(|p| p.name == name) {
                Some(property) => property,
                // Unknown fields are tolerated
                None => continue,
            };
            match &property.kind {
                PropertyKind::Scalar { set, .. } => {
                    if let Some(value) = field.value() {
                        set(&mut rc.borrow_mut(), value)?;
                    }
                }
                PropertyKind::Repeated { push, .. } => {
                    if let Some(value) = field.value() {
                        push(&mut rc.borrow_mut(), value)?;
                    }
                }
                PropertyKind::Reference { read, .. } => {
                    read(&mut *rc.borrow_mut(), field, ctx)?;
                }
            }
        }
        if let Some(hook) = &self.deserialized {
            hook(&mut rc.borrow_mut());
        }
        Ok(rc)
    }
}
