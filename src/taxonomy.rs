use fxhash::FxHashMap;
use internment::Intern;
use std::sync::Arc;

/// An external mapping between field ordinals and names, used to omit
/// names on the wire. Implementations are immutable and shared.
pub trait Taxonomy: Send + Sync {
    fn name_for(&self, ordinal: i16) -> Option<&str>;
    fn ordinal_for(&self, name: &str) -> Option<i16>;
}

/// Resolves the taxonomy referenced by an envelope's taxonomy id.
pub trait TaxonomyResolver: Send + Sync {
    fn resolve(&self, taxonomy_id: i16) -> Option<Arc<dyn Taxonomy>>;
}

/// A taxonomy backed by an in-memory bidirectional map of interned names.
#[derive(Clone, Debug, Default)]
pub struct MapTaxonomy {
    by_ordinal: FxHashMap<i16, Intern<String>>,
    by_name: FxHashMap<Intern<String>, i16>,
}

impl MapTaxonomy {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i16, S)>,
        S: Into<String>,
    {
        let mut by_ordinal = FxHashMap::default();
        let mut by_name = FxHashMap::default();
        for (ordinal, name) in entries {
            let name = Intern::new(name.into());
            by_ordinal.insert(ordinal, name);
            by_name.insert(name, ordinal);
        }
        Self {
            by_ordinal,
            by_name,
        }
    }
}

impl Taxonomy for MapTaxonomy {
    fn name_for(&self, ordinal: i16) -> Option<&str> {
        self.by_ordinal.get(&ordinal).map(|n| n.as_ref().as_str())
    }

    fn ordinal_for(&self, name: &str) -> Option<i16> {
        // Intern::new on lookup is fine; taxonomy names are a small set
        self.by_name.get(&Intern::new(name.to_owned())).copied()
    }
}

/// Resolver over a fixed set of taxonomies keyed by id.
#[derive(Clone, Default)]
pub struct MapTaxonomyResolver {
    taxonomies: FxHashMap<i16, Arc<dyn Taxonomy>>,
}

impl MapTaxonomyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, taxonomy_id: i16, taxonomy: Arc<dyn Taxonomy>) {
        self.taxonomies.insert(taxonomy_id, taxonomy);
    }

    pub fn with(mut self, taxonomy_id: i16, taxonomy: Arc<dyn Taxonomy>) -> Self {
        self.insert(taxonomy_id, taxonomy);
        self
    }
}

impl TaxonomyResolver for MapTaxonomyResolver {
    fn resolve(&self, taxonomy_id: i16) -> Option<Arc<dyn Taxonomy>> {
        self.taxonomies.get(&taxonomy_id).cloned()
    }
}
