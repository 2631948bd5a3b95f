use fudge_codec::serializer::{
    DecodedMessage, DeserializationContext, FudgeSerializable, InfoSerializable, Property,
    PropertyTable, SerializationContext, SerializationInfo, TypeMap,
};
use fudge_codec::*;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use test_log::test;

fn to_bytes<T: 'static>(serializer: &FudgeSerializer, root: &Rc<RefCell<T>>) -> Vec<u8> {
    let mut writer = BinaryWriter::new(Vec::new());
    serializer
        .serialize(&mut writer, &EnvelopeHeader::default(), root)
        .unwrap();
    writer.into_inner()
}

fn from_bytes<T: 'static>(serializer: &FudgeSerializer, bytes: &[u8]) -> Rc<RefCell<T>> {
    let mut reader = BinaryReader::new(bytes);
    serializer.deserialize::<T, _>(&mut reader).unwrap()
}

fn to_tree<T: 'static>(serializer: &FudgeSerializer, root: &Rc<RefCell<T>>) -> Message {
    let mut writer = TreeWriter::new();
    serializer
        .serialize(&mut writer, &EnvelopeHeader::default(), root)
        .unwrap();
    writer.take_message().unwrap().1
}

#[derive(Default, Debug, PartialEq)]
struct Person {
    name: String,
    age: i32,
}

fn person_table() -> PropertyTable<Person> {
    PropertyTable::new()
        .with(Property::scalar(
            "name",
            |p: &Person| Value::from(p.name.clone()),
            |p, v| {
                p.name = v
                    .as_str()
                    .ok_or(Error::ValueConversion("String"))?
                    .to_owned();
                Ok(())
            },
        ))
        .with(Property::scalar(
            "age",
            |p: &Person| Value::from(p.age),
            |p, v| {
                p.age = v.as_i32().ok_or(Error::ValueConversion("i32"))?;
                Ok(())
            },
        ))
}

#[test]
fn property_table_round_trip() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let fred = Rc::new(RefCell::new(Person {
        name: "fred".to_owned(),
        age: 42,
    }));
    let bytes = to_bytes(&serializer, &fred);
    let restored = from_bytes::<Person>(&serializer, &bytes);
    assert_eq!(*restored.borrow(), *fred.borrow());
}

#[test]
fn type_names_written_once_then_referenced() {
    #[derive(Default)]
    struct Holder {
        left: Option<Rc<RefCell<Person>>>,
        right: Option<Rc<RefCell<Person>>>,
    }

    let holder_table = PropertyTable::new()
        .with(Property::reference(
            "left",
            |h: &Holder| h.left.clone(),
            |h, obj| h.left = Some(obj),
        ))
        .with(Property::reference(
            "right",
            |h: &Holder| h.right.clone(),
            |h, obj| h.right = Some(obj),
        ));

    let type_map = Arc::new(
        TypeMap::builder()
            .register_struct::<Holder>(&["test.Holder"], holder_table)
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let holder = Rc::new(RefCell::new(Holder {
        left: Some(Rc::new(RefCell::new(Person {
            name: "a".to_owned(),
            age: 1,
        }))),
        right: Some(Rc::new(RefCell::new(Person {
            name: "b".to_owned(),
            age: 2,
        }))),
    }));

    let tree = to_tree(&serializer, &holder);
    let left = tree.message_by_name("left").unwrap();
    let right = tree.message_by_name("right").unwrap();

    // First instance carries the class name, the second a non-positive
    // relative reference to it
    assert_eq!(left.str_by_ordinal(-1), Some("test.Person"));
    let type_ref = right.i32_by_ordinal(-1).unwrap();
    assert!(type_ref < 0, "expected back-reference, got {type_ref}");
    assert_eq!(type_ref, -1); // prototype is sub-message 1, self is 2

    let restored = from_bytes::<Holder>(&serializer, &to_bytes(&serializer, &holder));
    let restored = restored.borrow();
    assert_eq!(restored.left.as_ref().unwrap().borrow().name, "a");
    assert_eq!(restored.right.as_ref().unwrap().borrow().name, "b");
}

#[test]
fn shared_child_keeps_identity() {
    #[derive(Default)]
    struct Pair {
        first: Option<Rc<RefCell<Person>>>,
        second: Option<Rc<RefCell<Person>>>,
    }

    let pair_table = PropertyTable::new()
        .with(Property::reference(
            "first",
            |p: &Pair| p.first.clone(),
            |p, obj| p.first = Some(obj),
        ))
        .with(Property::reference(
            "second",
            |p: &Pair| p.second.clone(),
            |p, obj| p.second = Some(obj),
        ));

    let type_map = Arc::new(
        TypeMap::builder()
            .register_struct::<Pair>(&["test.Pair"], pair_table)
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let shared = Rc::new(RefCell::new(Person {
        name: "s".to_owned(),
        age: 7,
    }));
    let pair = Rc::new(RefCell::new(Pair {
        first: Some(shared.clone()),
        second: Some(shared),
    }));

    // The second occurrence is a relative integer reference, not a
    // nested sub-message
    let tree = to_tree(&serializer, &pair);
    assert!(tree.message_by_name("first").is_some());
    assert_eq!(tree.i32_by_name("second"), Some(1));

    let restored = from_bytes::<Pair>(&serializer, &to_bytes(&serializer, &pair));
    let restored = restored.borrow();
    let first = restored.first.as_ref().unwrap();
    let second = restored.second.as_ref().unwrap();
    assert!(Rc::ptr_eq(first, second));
    assert_eq!(first.borrow().name, "s");
}

#[derive(Default)]
struct Node {
    name: String,
    next: Option<Rc<RefCell<Node>>>,
}

impl FudgeSerializable for Node {
    fn serialize_fields(&self, ctx: &mut SerializationContext<'_>) -> Result<(), Error> {
        ctx.write_value_field(Some("name"), None, &Value::from(self.name.clone()))?;
        if let Some(next) = &self.next {
            ctx.write_object(Some("next"), None, next)?;
        }
        Ok(())
    }

    fn deserialize_fields(
        &mut self,
        msg: &DecodedMessage,
        ctx: &mut DeserializationContext<'_>,
    ) -> Result<(), Error> {
        if let Some(field) = msg.first_by_name("name") {
            if let Some(value) = field.value() {
                self.name = value
                    .as_str()
                    .ok_or(Error::ValueConversion("String"))?
                    .to_owned();
            }
        }
        if let Some(field) = msg.first_by_name("next") {
            self.next = Some(ctx.resolve_object::<Node>(field)?);
        }
        Ok(())
    }
}

#[test]
fn cyclic_graph_round_trips() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_hook::<Node>(&["test.Node"])
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let a = Rc::new(RefCell::new(Node {
        name: "a".to_owned(),
        next: None,
    }));
    let b = Rc::new(RefCell::new(Node {
        name: "b".to_owned(),
        next: Some(a.clone()),
    }));
    a.borrow_mut().next = Some(b);

    let bytes = to_bytes(&serializer, &a);
    let restored = from_bytes::<Node>(&serializer, &bytes);

    let b2 = restored.borrow().next.clone().unwrap();
    assert_eq!(restored.borrow().name, "a");
    assert_eq!(b2.borrow().name, "b");
    let back = b2.borrow().next.clone().unwrap();
    assert!(Rc::ptr_eq(&restored, &back));
}

#[test]
fn list_surrogate_uses_ordinal_one() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_list::<i32>(&["test.IntList"])
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let list = Rc::new(RefCell::new(vec![3_i32, 1, 4, 1, 5]));
    let tree = to_tree(&serializer, &list);
    assert_eq!(tree.all_by_ordinal(1).count(), 5);

    let restored = from_bytes::<Vec<i32>>(&serializer, &to_bytes(&serializer, &list));
    assert_eq!(*restored.borrow(), vec![3, 1, 4, 1, 5]);
}

#[test]
fn list_of_objects_round_trips() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_list::<Rc<RefCell<Person>>>(&["test.PersonList"])
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let shared = Rc::new(RefCell::new(Person {
        name: "dup".to_owned(),
        age: 1,
    }));
    let list = Rc::new(RefCell::new(vec![shared.clone(), shared]));
    let restored =
        from_bytes::<Vec<Rc<RefCell<Person>>>>(&serializer, &to_bytes(&serializer, &list));
    let restored = restored.borrow();
    assert_eq!(restored.len(), 2);
    assert!(Rc::ptr_eq(&restored[0], &restored[1]));
    assert_eq!(restored[0].borrow().name, "dup");
}

#[test]
fn map_surrogate_parallel_sequences() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_map::<String, i64>(&["test.Counts"])
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let mut counts = BTreeMap::new();
    counts.insert("a".to_owned(), 1_i64);
    counts.insert("b".to_owned(), 2_i64);
    let map = Rc::new(RefCell::new(counts.clone()));

    let tree = to_tree(&serializer, &map);
    assert_eq!(tree.all_by_ordinal(1).count(), 2);
    assert_eq!(tree.all_by_ordinal(2).count(), 2);

    let restored = from_bytes::<BTreeMap<String, i64>>(&serializer, &to_bytes(&serializer, &map));
    assert_eq!(*restored.borrow(), counts);
}

#[derive(Default, Debug, PartialEq)]
struct Order {
    id: i64,
    note: String,
}

impl InfoSerializable for Order {
    fn write_info(&self, info: &mut SerializationInfo) {
        info.add_value("id", self.id);
        info.add_value("note", self.note.clone());
    }

    fn from_info(
        info: &SerializationInfo,
        _ctx: &mut DeserializationContext<'_>,
    ) -> Result<Self, Error> {
        Ok(Self {
            id: info
                .value("id")
                .and_then(Value::as_i64)
                .ok_or(Error::ValueConversion("i64"))?,
            note: info
                .value("note")
                .and_then(Value::as_str)
                .ok_or(Error::ValueConversion("String"))?
                .to_owned(),
        })
    }
}

#[test]
fn info_bag_round_trip() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_info::<Order>(&["test.Order"])
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let order = Rc::new(RefCell::new(Order {
        id: 99,
        note: "ship it".to_owned(),
    }));
    let restored = from_bytes::<Order>(&serializer, &to_bytes(&serializer, &order));
    assert_eq!(*restored.borrow(), *order.borrow());
}

#[test]
fn unregistered_type_is_an_error() {
    let serializer = FudgeSerializer::new(Arc::new(TypeMap::builder().build()));
    let person = Rc::new(RefCell::new(Person::default()));
    let mut writer = BinaryWriter::new(Vec::new());
    assert!(matches!(
        serializer.serialize(&mut writer, &EnvelopeHeader::default(), &person),
        Err(Error::UnregisteredType(_))
    ));
}

#[test]
fn deserialization_resolves_most_specific_name_first() {
    // The wire carries two candidate names; only the second is registered
    let type_map = Arc::new(
        TypeMap::builder()
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let mut msg = Message::new();
    msg.add_at(-1, "test.SpecificPerson");
    msg.add_at(-1, "test.Person");
    msg.add("name", "fred");
    msg.add("age", 30_i32);
    let bytes = encode(&EnvelopeHeader::default(), &msg).unwrap();

    let restored = from_bytes::<Person>(&serializer, &bytes);
    assert_eq!(restored.borrow().name, "fred");
    assert_eq!(restored.borrow().age, 30);
}

#[test]
fn graph_serializes_through_json_too() {
    let type_map = Arc::new(
        TypeMap::builder()
            .register_struct::<Person>(&["test.Person"], person_table())
            .build(),
    );
    let serializer = FudgeSerializer::new(type_map);

    let fred = Rc::new(RefCell::new(Person {
        name: "fred".to_owned(),
        age: 42,
    }));
    let mut writer = JsonStreamWriter::new(Vec::new(), JsonSettings::default());
    serializer
        .serialize(&mut writer, &EnvelopeHeader::default(), &fred)
        .unwrap();
    let text = String::from_utf8(writer.into_inner()).unwrap();
    assert_eq!(text, r#"{"-1":"test.Person","name":"fred","age":42}"#);

    let mut reader = JsonStreamReader::new(text.as_bytes(), JsonSettings::default());
    let restored = serializer.deserialize::<Person, _>(&mut reader).unwrap();
    assert_eq!(*restored.borrow(), *fred.borrow());
}
