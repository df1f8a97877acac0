//! Mapping options and per-type settings.
//!
//! [`MappingOptions`] is the configuration surface of the mapper: the child
//! separator, the provider's unnamed-column sentinel, custom scalar rules,
//! and per-type [`TypeSettings`] (preferred constructor, default concrete
//! type, factory, subtype rules). Options take part in the cache key through
//! [`MappingOptions::fingerprint`]; closure-valued settings contribute their
//! allocation identity, and the fingerprint holds those allocations so an
//! address cannot be reused while a cache entry keyed by it exists.
//!
//! [`MapperSettings`] is the serialisable subset, loadable from YAML.

use std::{collections::HashMap, fmt, fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_SEPARATOR;
use crate::conversion::ScalarRule;
use crate::data::Object;
use crate::record::Record;
use crate::types::{Constructor, ObjectType, arc_identity};

pub type RowPredicate = Arc<dyn Fn(&dyn Record) -> bool + Send + Sync>;
pub type FactoryFn = Arc<dyn Fn(&dyn Record) -> Option<Object> + Send + Sync>;

/// User-supplied instantiation for a type. Returning `None` is a defect and
/// fails the row.
#[derive(Clone)]
pub struct Factory {
    pub produces: Arc<ObjectType>,
    make: FactoryFn,
}

impl Factory {
    pub fn new<F>(produces: &Arc<ObjectType>, make: F) -> Self
    where
        F: Fn(&dyn Record) -> Option<Object> + Send + Sync + 'static,
    {
        Self {
            produces: Arc::clone(produces),
            make: Arc::new(make),
        }
    }

    pub fn invoke(&self, record: &dyn Record) -> Option<Object> {
        (self.make)(record)
    }

    fn pinned(&self) -> Pinned {
        Pinned {
            address: arc_identity(&self.make),
            _held: Held::Factory(self.clone()),
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("produces", &self.produces.name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum SubtypeTarget {
    Type(Arc<ObjectType>),
    Factory(Factory),
}

impl SubtypeTarget {
    pub fn object_type(&self) -> &Arc<ObjectType> {
        match self {
            SubtypeTarget::Type(ty) => ty,
            SubtypeTarget::Factory(factory) => &factory.produces,
        }
    }

    fn pinned(&self) -> Pinned {
        match self {
            SubtypeTarget::Type(ty) => Pinned::object(ty),
            SubtypeTarget::Factory(factory) => factory.pinned(),
        }
    }
}

#[derive(Clone)]
pub struct SubtypeRule {
    pub predicate: RowPredicate,
    pub target: SubtypeTarget,
}

impl fmt::Debug for SubtypeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtypeRule")
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeSettings {
    pub preferred_constructor: Option<Arc<Constructor>>,
    pub default_concrete: Option<Arc<ObjectType>>,
    pub factory: Option<Factory>,
    pub subtypes: Vec<SubtypeRule>,
}

impl TypeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer_constructor(mut self, constructor: &Arc<Constructor>) -> Self {
        self.preferred_constructor = Some(Arc::clone(constructor));
        self
    }

    pub fn default_to(mut self, concrete: &Arc<ObjectType>) -> Self {
        self.default_concrete = Some(Arc::clone(concrete));
        self
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Selects `concrete` for rows matching `predicate`. Rules are evaluated
    /// in registration order.
    pub fn when<P>(mut self, predicate: P, concrete: &Arc<ObjectType>) -> Self
    where
        P: Fn(&dyn Record) -> bool + Send + Sync + 'static,
    {
        self.subtypes.push(SubtypeRule {
            predicate: Arc::new(predicate),
            target: SubtypeTarget::Type(Arc::clone(concrete)),
        });
        self
    }

    pub fn when_factory<P>(mut self, predicate: P, factory: Factory) -> Self
    where
        P: Fn(&dyn Record) -> bool + Send + Sync + 'static,
    {
        self.subtypes.push(SubtypeRule {
            predicate: Arc::new(predicate),
            target: SubtypeTarget::Factory(factory),
        });
        self
    }

    fn identities(&self) -> Vec<Option<Pinned>> {
        let mut ids = vec![
            self.preferred_constructor.as_ref().map(Pinned::constructor),
            self.default_concrete.as_ref().map(Pinned::object),
            self.factory.as_ref().map(Factory::pinned),
        ];
        for rule in &self.subtypes {
            ids.push(Some(Pinned::predicate(&rule.predicate)));
            ids.push(Some(rule.target.pinned()));
        }
        ids
    }
}

#[derive(Clone)]
pub struct MappingOptions {
    pub separator: String,
    pub unnamed_column_sentinel: String,
    pub custom_rules: Vec<Arc<dyn ScalarRule>>,
    types: HashMap<String, TypeSettings>,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            unnamed_column_sentinel: String::new(),
            custom_rules: Vec::new(),
            types: HashMap::new(),
        }
    }
}

impl fmt::Debug for MappingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types = self.types.keys().collect::<Vec<_>>();
        types.sort();
        f.debug_struct("MappingOptions")
            .field("separator", &self.separator)
            .field("unnamed_column_sentinel", &self.unnamed_column_sentinel)
            .field(
                "custom_rules",
                &self.custom_rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("types", &types)
            .finish()
    }
}

/// Owners only; nothing reads them back.
#[allow(dead_code)]
#[derive(Clone)]
enum Held {
    Constructor(Arc<Constructor>),
    Object(Arc<ObjectType>),
    Factory(Factory),
    Predicate(RowPredicate),
    Rule(Arc<dyn ScalarRule>),
}

/// A shared setting compared by allocation. The allocation is kept alive
/// for as long as the key is, so equal addresses mean the same setting.
#[derive(Clone)]
pub struct Pinned {
    address: usize,
    _held: Held,
}

impl Pinned {
    fn constructor(constructor: &Arc<Constructor>) -> Self {
        Self {
            address: arc_identity(constructor),
            _held: Held::Constructor(Arc::clone(constructor)),
        }
    }

    fn object(object: &Arc<ObjectType>) -> Self {
        Self {
            address: arc_identity(object),
            _held: Held::Object(Arc::clone(object)),
        }
    }

    fn predicate(predicate: &RowPredicate) -> Self {
        Self {
            address: arc_identity(predicate),
            _held: Held::Predicate(Arc::clone(predicate)),
        }
    }

    fn rule(rule: &Arc<dyn ScalarRule>) -> Self {
        Self {
            address: arc_identity(rule),
            _held: Held::Rule(Arc::clone(rule)),
        }
    }
}

impl PartialEq for Pinned {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Pinned {}

impl std::hash::Hash for Pinned {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl PartialOrd for Pinned {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pinned {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.address.cmp(&other.address)
    }
}

impl fmt::Debug for Pinned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.address)
    }
}

/// Cache-key view of [`MappingOptions`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionsFingerprint {
    separator: String,
    sentinel: String,
    rules: Vec<Pinned>,
    types: Vec<(String, Vec<Option<Pinned>>)>,
}

impl MappingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_unnamed_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.unnamed_column_sentinel = sentinel.into();
        self
    }

    pub fn with_rule(mut self, rule: Arc<dyn ScalarRule>) -> Self {
        self.custom_rules.push(rule);
        self
    }

    /// Registers settings for the custom type named `type_name`, replacing
    /// earlier settings for the same name.
    pub fn configure(mut self, type_name: impl Into<String>, settings: TypeSettings) -> Self {
        self.types.insert(type_name.into(), settings);
        self
    }

    pub fn type_settings(&self, type_name: &str) -> Option<&TypeSettings> {
        self.types.get(type_name)
    }

    pub fn fingerprint(&self) -> OptionsFingerprint {
        let mut types = self
            .types
            .iter()
            .map(|(name, settings)| (name.clone(), settings.identities()))
            .collect::<Vec<_>>();
        types.sort();
        OptionsFingerprint {
            separator: self.separator.clone(),
            sentinel: self.unnamed_column_sentinel.clone(),
            rules: self.custom_rules.iter().map(Pinned::rule).collect(),
            types,
        }
    }
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

/// Serialisable mapper configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapperSettings {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default, alias = "unnamed_sentinel")]
    pub unnamed_column_sentinel: String,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            unnamed_column_sentinel: String::new(),
        }
    }
}

impl MapperSettings {
    pub fn from_yaml_str(input: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(input).context("Parsing mapper settings YAML")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening mapper settings {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing mapper settings YAML")
    }

    pub fn to_options(&self) -> MappingOptions {
        MappingOptions::default()
            .with_separator(self.separator.clone())
            .with_unnamed_sentinel(self.unnamed_column_sentinel.clone())
    }
}
