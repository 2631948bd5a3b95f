use crate::serializer::surrogate::{
    FudgeSerializable, HookSurrogate, InfoSerializable, InfoSurrogate, ListItem, ListSurrogate,
    MapSurrogate, PropertyTable, StructSurrogate, Surrogate,
};
use fxhash::FxHashMap;
use std::any::TypeId;
use std::collections::BTreeMap;
use tracing::debug;

pub(crate) struct TypeEntry {
    pub(crate) names: Vec<String>,
    pub(crate) surrogate: Box<dyn Surrogate>,
}

/// Maps runtime types to surrogates and wire type names.
///
/// Built once through [`TypeMapBuilder`] and immutable afterwards, so it
/// can be shared (`Arc`) across any number of independent contexts.
#[derive(Default)]
pub struct TypeMap {
    by_type: FxHashMap<TypeId, usize>,
    by_name: FxHashMap<String, usize>,
    entries: Vec<TypeEntry>,
}

impl TypeMap {
    pub fn builder() -> TypeMapBuilder {
        TypeMapBuilder::default()
    }

    pub(crate) fn entry_by_type(&self, type_id: TypeId) -> Option<&TypeEntry> {
        self.by_type.get(&type_id).map(|&i| &self.entries[i])
    }

    pub(crate) fn entry_by_name(&self, name: &str) -> Option<&TypeEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn is_registered(&self, type_id: TypeId) -> bool {
        self.by_type.contains_key(&type_id)
    }
}

/// Builder for a [`TypeMap`].
///
/// The registration constructors mirror the surrogate selection order:
/// a type with explicit serialize/deserialize hooks registers through
/// `register_hook`, a name/value-bag type through `register_info`,
/// collection shapes through `register_list`/`register_map`, and plain
/// property-bag types through `register_struct`. Names are the wire type
/// names, most specific first.
#[derive(Default)]
pub struct TypeMapBuilder {
    registrations: Vec<(TypeId, TypeEntry)>,
}

impl TypeMapBuilder {
    pub fn register_hook<T: FudgeSerializable>(self, names: &[&str]) -> Self {
        self.register_surrogate::<T>(names, Box::new(HookSurrogate::<T>::new()))
    }

    pub fn register_info<T: InfoSerializable>(self, names: &[&str]) -> Self {
        self.register_surrogate::<T>(names, Box::new(InfoSurrogate::<T>::new()))
    }

    /// Register `Vec<E>`; elements serialize as repeated fields at
    /// ordinal 1.
    pub fn register_list<E: ListItem>(self, names: &[&str]) -> Self {
        self.register_surrogate::<Vec<E>>(names, Box::new(ListSurrogate::<E>::new()))
    }

    /// Register `BTreeMap<K, V>`; keys and values serialize as parallel
    /// sequences at ordinals 1 and 2.
    pub fn register_map<K, V>(self, names: &[&str]) -> Self
    where
        K: ListItem + Ord,
        V: ListItem,
    {
        self.register_surrogate::<BTreeMap<K, V>>(names, Box::new(MapSurrogate::<K, V>::new()))
    }

    /// Register a type through a precomputed property table.
    pub fn register_struct<T: Default + 'static>(
        self,
        names: &[&str],
        table: PropertyTable<T>,
    ) -> Self {
        self.register_surrogate::<T>(names, Box::new(StructSurrogate::new(table)))
    }

    pub fn register_surrogate<T: 'static>(
        mut self,
        names: &[&str],
        surrogate: Box<dyn Surrogate>,
    ) -> Self {
        debug!(
            type_name = std::any::type_name::<T>(),
            wire_names = ?names,
            "Registered surrogate"
        );
        self.registrations.push((
            TypeId::of::<T>(),
            TypeEntry {
                names: names.iter().map(|n| (*n).to_owned()).collect(),
                surrogate,
            },
        ));
        self
    }

    pub fn build(self) -> TypeMap {
        let mut map = TypeMap::default();
        for (type_id, entry) in self.registrations {
            let index = map.entries.len();
            map.by_type.insert(type_id, index);
            for name in &entry.names {
                map.by_name.entry(name.clone()).or_insert(index);
            }
            map.entries.push(entry);
        }
        map
    }
}
