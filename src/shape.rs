//! YAML shape files.
//!
//! A shape file declares the target a row should be mapped to, together with
//! the custom types it references and the mapper settings to use:
//!
//! ```yaml
//! root: list<Order>
//! settings:
//!   separator: "_"
//! columns:
//!   Id: int32
//! enums:
//!   - name: Status
//!     variants: [Open, { name: Closed, value: 9 }]
//! types:
//!   - name: Customer
//!     properties:
//!       - { name: Name, type: string }
//!   - name: Order
//!     properties:
//!       - { name: Id, type: int32 }
//!       - { name: Status, type: Status }
//!       - { name: Customer, type: Customer }
//! ```
//!
//! Object types may extend another object type (inheriting its properties),
//! declare constructors, be abstract, name a default concrete type, and carry
//! subtype rules whose `when` clauses are evaluated against the row (see
//! [`crate::expr`]). Types may be declared in any order. Object types may
//! refer to themselves or to each other through properties and constructor
//! parameters; cycles through `extends` or among collection and map
//! definitions are rejected.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::expr::RowExpression;
use crate::options::{MapperSettings, MappingOptions, SubtypeRule, SubtypeTarget, TypeSettings};
use crate::types::{
    CollectionType, Constructor, EnumType, MapType, ObjectType, Param, Property, TargetType,
    TypeRef, ValueType,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeDocument {
    pub root: String,
    #[serde(default)]
    pub settings: MapperSettings,
    /// Declared column types for text sources, keyed by column name.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub enums: Vec<EnumDef>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub collections: Vec<CollectionDef>,
    #[serde(default)]
    pub maps: Vec<MapDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<VariantDef>,
}

/// A bare name takes the next discriminant after the previous variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantDef {
    Named(String),
    Valued { name: String, value: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDef {
    pub name: String,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub constructors: Vec<ConstructorDef>,
    /// Position of the preferred constructor in `constructors`.
    #[serde(default)]
    pub preferred_constructor: Option<usize>,
    #[serde(default, alias = "default")]
    pub default_concrete: Option<String>,
    #[serde(default)]
    pub subtypes: Vec<SubtypeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub write_only: bool,
    #[serde(default)]
    pub sink: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstructorDef {
    #[serde(default)]
    pub params: Vec<ParamDef>,
    #[serde(default)]
    pub private: bool,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: String,
    #[serde(default)]
    pub sink: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtypeDef {
    pub when: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionDef {
    pub name: String,
    pub element: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapDef {
    pub name: String,
    pub value: String,
}

/// A loaded shape: the root target plus the options to map it with.
#[derive(Debug, Clone)]
pub struct Shape {
    root: TargetType,
    options: MappingOptions,
    column_types: BTreeMap<String, ValueType>,
    registry: HashMap<String, TargetType>,
}

impl Shape {
    pub fn from_yaml_str(input: &str) -> anyhow::Result<Self> {
        let document: ShapeDocument =
            serde_yaml::from_str(input).context("Parsing shape YAML")?;
        Ok(Shape::from_document(&document)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening shape file {path:?}"))?;
        let document: ShapeDocument = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing shape file {path:?}"))?;
        Shape::from_document(&document).with_context(|| format!("Building shape from {path:?}"))
    }

    pub fn from_document(document: &ShapeDocument) -> Result<Self> {
        let mut builder = ShapeBuilder::new(document)?;
        builder.build_all()?;
        let options = builder.options()?;
        let root = builder.parse(&document.root)?;
        let column_types = document
            .columns
            .iter()
            .map(|(name, ty)| Ok((name.clone(), ValueType::from_str(ty)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        debug!(
            "Loaded shape with root {root} and {} custom type(s)",
            builder.registry.len()
        );
        Ok(Shape {
            root,
            options,
            column_types,
            registry: builder.registry,
        })
    }

    pub fn root(&self) -> &TargetType {
        &self.root
    }

    pub fn options(&self) -> &MappingOptions {
        &self.options
    }

    pub fn column_types(&self) -> &BTreeMap<String, ValueType> {
        &self.column_types
    }

    /// Custom type (object, enum, collection, or map) declared under `name`.
    pub fn lookup(&self, name: &str) -> Option<TargetType> {
        self.registry.get(&name.to_ascii_lowercase()).cloned()
    }

    /// Parses a type expression against the shape's declared types.
    pub fn parse_type(&self, expr: &str) -> Result<TargetType> {
        TargetType::parse_with(expr, |name| self.lookup(name))
    }
}

#[derive(Clone, Copy)]
enum Definition<'a> {
    Object(&'a TypeDef),
    Collection(&'a CollectionDef),
    Map(&'a MapDef),
}

impl<'a> Definition<'a> {
    fn name(&self) -> &'a str {
        match *self {
            Definition::Object(def) => &def.name,
            Definition::Collection(def) => &def.name,
            Definition::Map(def) => &def.name,
        }
    }

    /// Type expressions this type is built from. Subtype and default-concrete
    /// references are settings, not structure.
    fn requires(&self) -> Vec<&'a str> {
        match *self {
            Definition::Object(def) => def
                .properties
                .iter()
                .map(|p| p.type_expr.as_str())
                .chain(
                    def.constructors
                        .iter()
                        .flat_map(|c| c.params.iter().map(|p| p.type_expr.as_str())),
                )
                .collect(),
            Definition::Collection(def) => vec![def.element.as_str()],
            Definition::Map(def) => vec![def.value.as_str()],
        }
    }

    fn base(&self) -> Option<&'a str> {
        match *self {
            Definition::Object(def) => def.extends.as_deref(),
            _ => None,
        }
    }
}

fn referenced_names(expr: &str) -> impl Iterator<Item = &str> {
    expr.split(|ch: char| !(ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')))
        .filter(|token| !token.is_empty())
}

struct ShapeBuilder<'a> {
    document: &'a ShapeDocument,
    definitions: HashMap<String, Definition<'a>>,
    registry: HashMap<String, TargetType>,
    /// Late-bound handles for object types, bound as each one is built.
    refs: HashMap<String, TypeRef>,
}

impl<'a> ShapeBuilder<'a> {
    fn new(document: &'a ShapeDocument) -> Result<Self> {
        let mut builder = ShapeBuilder {
            document,
            definitions: HashMap::new(),
            registry: HashMap::new(),
            refs: HashMap::new(),
        };
        for def in &document.enums {
            let enum_type = build_enum(def);
            builder.declare(&def.name)?;
            builder.registry.insert(
                def.name.to_ascii_lowercase(),
                TargetType::Enum(Arc::new(enum_type)),
            );
        }
        let definitions = document
            .types
            .iter()
            .map(Definition::Object)
            .chain(document.collections.iter().map(Definition::Collection))
            .chain(document.maps.iter().map(Definition::Map));
        for def in definitions {
            builder.declare(def.name())?;
            let key = def.name().to_ascii_lowercase();
            if let Definition::Object(_) = def {
                builder.refs.insert(key.clone(), TypeRef::new(def.name()));
            }
            builder.definitions.insert(key, def);
        }
        Ok(builder)
    }

    fn declare(&self, name: &str) -> Result<()> {
        let key = name.to_ascii_lowercase();
        if self.registry.contains_key(&key) || self.definitions.contains_key(&key) {
            return Err(MapError::shape(format!("Type '{name}' is declared more than once")));
        }
        Ok(())
    }

    fn build_all(&mut self) -> Result<()> {
        let mut keys = self.definitions.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        let mut path = Vec::new();
        for key in keys {
            self.visit(&key, &mut path)?;
        }
        Ok(())
    }

    fn visit(&mut self, key: &str, path: &mut Vec<String>) -> Result<()> {
        if self.registry.contains_key(key) {
            return Ok(());
        }
        let Some(def) = self.definitions.get(key).copied() else {
            return Ok(());
        };
        if path.iter().any(|seen| seen == key) {
            path.push(key.to_string());
            return Err(MapError::shape(format!(
                "Type definitions form a cycle: {}",
                path.join(" -> ")
            )));
        }
        path.push(key.to_string());
        // Object references resolve through `refs`, so only bases and
        // collection or map definitions have to exist first.
        for expr in def.requires() {
            for name in referenced_names(expr) {
                let dependency = name.to_ascii_lowercase();
                match self.definitions.get(&dependency).copied() {
                    None | Some(Definition::Object(_)) => {}
                    Some(_) => self.visit(&dependency, path)?,
                }
            }
        }
        if let Some(base) = def.base() {
            let dependency = base.to_ascii_lowercase();
            if self.definitions.contains_key(&dependency) {
                self.visit(&dependency, path)?;
            }
        }
        path.pop();
        let built = match def {
            Definition::Object(def) => self.build_object(def)?,
            Definition::Collection(def) => TargetType::Collection(Arc::new(CollectionType::new(
                def.name.clone(),
                self.parse(&def.element)?,
            ))),
            Definition::Map(def) => TargetType::ConcreteMap(Arc::new(MapType::new(
                def.name.clone(),
                self.parse(&def.value)?,
            ))),
        };
        if let (TargetType::Object(object), Some(reference)) = (&built, self.refs.get(key)) {
            reference.bind(object)?;
        }
        self.registry.insert(key.to_string(), built);
        Ok(())
    }

    /// Built types by name, or a late-bound reference to an object type that
    /// is not built yet.
    fn lookup(&self, name: &str) -> Option<TargetType> {
        let key = name.to_ascii_lowercase();
        self.registry
            .get(&key)
            .cloned()
            .or_else(|| self.refs.get(&key).cloned().map(TargetType::Named))
    }

    fn parse(&self, expr: &str) -> Result<TargetType> {
        TargetType::parse_with(expr, |name| self.lookup(name))
    }

    fn object(&self, name: &str, context: &str) -> Result<Arc<ObjectType>> {
        match self.lookup(name) {
            Some(TargetType::Object(object)) => Ok(object),
            Some(TargetType::Named(reference)) => reference.get().ok_or_else(|| {
                MapError::shape(format!("{context}: type '{name}' is not built yet"))
            }),
            Some(other) => Err(MapError::shape(format!(
                "{context}: '{name}' is a {} and not an object type",
                other.type_name()
            ))),
            None => Err(MapError::shape(format!("{context}: unknown type '{name}'"))),
        }
    }

    fn build_object(&self, def: &TypeDef) -> Result<TargetType> {
        let mut builder = ObjectType::builder(def.name.clone());
        if def.is_abstract {
            builder = builder.abstract_type();
        }
        if let Some(base) = &def.extends {
            let base = self.object(base, &format!("Type '{}' extends", def.name))?;
            for inherited in &base.properties {
                let overridden = def
                    .properties
                    .iter()
                    .any(|p| p.name.eq_ignore_ascii_case(&inherited.name));
                if !overridden {
                    builder = builder.with_property(inherited.clone());
                }
            }
        }
        for property in &def.properties {
            builder = builder.with_property(self.property(property)?);
        }
        for constructor in &def.constructors {
            builder = builder.constructor(self.constructor(constructor)?);
        }
        Ok(TargetType::Object(builder.build()))
    }

    fn property(&self, def: &PropertyDef) -> Result<Property> {
        let mut property = Property::new(def.name.clone(), self.parse(&def.type_expr)?);
        if def.private {
            property = property.private();
        }
        if def.read_only {
            property = property.read_only();
        }
        if def.write_only {
            property = property.write_only();
        }
        if def.sink {
            property = property.sink();
        }
        Ok(property)
    }

    fn constructor(&self, def: &ConstructorDef) -> Result<Constructor> {
        let params = def
            .params
            .iter()
            .map(|param| {
                let built = Param::new(param.name.clone(), self.parse(&param.type_expr)?);
                Ok(if param.sink { built.sink() } else { built })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut constructor = Constructor::new(params);
        if def.private {
            constructor = constructor.private();
        }
        if def.is_static {
            constructor = constructor.static_factory();
        }
        Ok(constructor)
    }

    fn type_settings(&self, def: &TypeDef) -> Result<Option<TypeSettings>> {
        let object = self.object(&def.name, "Configuring settings")?;
        let mut settings = TypeSettings::new();
        let mut configured = false;
        if let Some(position) = def.preferred_constructor {
            let constructor = object.constructors.get(position).ok_or_else(|| {
                MapError::shape(format!(
                    "Type '{}' has no constructor at position {position}",
                    def.name
                ))
            })?;
            settings = settings.prefer_constructor(constructor);
            configured = true;
        }
        if let Some(concrete) = &def.default_concrete {
            let context = format!("Default concrete type of '{}'", def.name);
            settings = settings.default_to(&self.object(concrete, &context)?);
            configured = true;
        }
        for rule in &def.subtypes {
            let context = format!("Subtype rule of '{}'", def.name);
            let concrete = self.object(&rule.type_name, &context)?;
            settings.subtypes.push(SubtypeRule {
                predicate: RowExpression::new(rule.when.clone())?.into_predicate(),
                target: SubtypeTarget::Type(concrete),
            });
            configured = true;
        }
        Ok(configured.then_some(settings))
    }

    fn options(&self) -> Result<MappingOptions> {
        let mut options = self.document.settings.to_options();
        for def in &self.document.types {
            if let Some(settings) = self.type_settings(def)? {
                debug!(
                    "Type '{}' configured with {} subtype rule(s)",
                    def.name,
                    settings.subtypes.len()
                );
                options = options.configure(def.name.clone(), settings);
            }
        }
        Ok(options)
    }
}

fn build_enum(def: &EnumDef) -> EnumType {
    let mut next = 0i64;
    let variants = def
        .variants
        .iter()
        .map(|variant| {
            let (name, value) = match variant {
                VariantDef::Named(name) => (name.clone(), next),
                VariantDef::Valued { name, value } => (name.clone(), *value),
            };
            next = value.saturating_add(1);
            (name, value)
        })
        .collect::<Vec<_>>();
    EnumType::new(def.name.clone(), variants)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = r#"
root: list<Shape>
settings:
  separator: "__"
columns:
  Value: int32
enums:
  - name: Size
    variants: [Small, { name: Large, value: 10 }, Huge]
types:
  - name: Big
    extends: Shape
    properties:
      - { name: Size, type: Size }
  - name: Shape
    abstract: true
    default: Small
    properties:
      - { name: Value, type: int32 }
    subtypes:
      - when: "value > 3"
        type: Big
  - name: Small
    extends: Shape
    constructors:
      - params: [{ name: value, type: int32 }]
      - params: []
    preferred_constructor: 1
"#;

    #[test]
    fn builds_types_in_dependency_order() {
        let shape = Shape::from_yaml_str(SHAPES).unwrap();
        assert_eq!(shape.root().type_name(), "list<Shape>");
        assert_eq!(shape.options().separator, "__");
        assert_eq!(shape.column_types().get("Value"), Some(&ValueType::Int32));

        let Some(TargetType::Object(big)) = shape.lookup("big") else {
            panic!("Big should be an object type");
        };
        let names = big.properties.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Value", "Size"]);

        let settings = shape.options().type_settings("Shape").unwrap();
        assert_eq!(settings.subtypes.len(), 1);
        assert_eq!(settings.default_concrete.as_ref().unwrap().name, "Small");
        let small = shape.options().type_settings("Small").unwrap();
        assert!(small.preferred_constructor.as_ref().unwrap().params.is_empty());
    }

    #[test]
    fn enum_variants_continue_numbering() {
        let shape = Shape::from_yaml_str(SHAPES).unwrap();
        let Some(TargetType::Enum(size)) = shape.lookup("Size") else {
            panic!("Size should be an enum");
        };
        assert_eq!(
            size.variants,
            vec![("Small".to_string(), 0), ("Large".to_string(), 10), ("Huge".to_string(), 11)]
        );
    }

    #[test]
    fn object_types_may_refer_to_each_other() {
        let yaml = "root: A\ntypes:\n  - name: A\n    properties: [{ name: B, type: B }]\n  - name: B\n    properties: [{ name: A, type: list<A> }, { name: Next, type: B }]\n";
        let shape = Shape::from_yaml_str(yaml).unwrap();
        let Some(TargetType::Object(a)) = shape.lookup("A") else {
            panic!("A should be an object type");
        };
        let Some(TargetType::Object(b)) = shape.lookup("B") else {
            panic!("B should be an object type");
        };
        assert_eq!(a.properties[0].target.type_name(), "B");
        assert_eq!(b.properties[0].target.type_name(), "list<A>");
        let TargetType::Object(next) = b.properties[1].target.clone().resolved() else {
            panic!("B.Next should resolve to an object type");
        };
        assert!(Arc::ptr_eq(&next, &b));
    }

    #[test]
    fn rejects_cycles_and_unknown_types() {
        let bases = "root: A\ntypes:\n  - name: A\n    extends: B\n  - name: B\n    extends: A\n";
        let err = Shape::from_yaml_str(bases).unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));

        let lists = "root: A\ncollections:\n  - { name: A, element: B }\n  - { name: B, element: A }\n";
        let err = Shape::from_yaml_str(lists).unwrap_err();
        assert!(format!("{err:#}").contains("cycle"));

        let unknown = "root: A\ntypes:\n  - name: A\n    properties: [{ name: B, type: Missing }]\n";
        let err = Shape::from_yaml_str(unknown).unwrap_err();
        assert!(format!("{err:#}").contains("Unknown type 'Missing'"));

        let duplicate = "root: A\ntypes:\n  - name: A\n  - name: a\n";
        assert!(Shape::from_yaml_str(duplicate).is_err());
    }

    #[test]
    fn preferred_constructor_must_exist() {
        let yaml = "root: A\ntypes:\n  - name: A\n    preferred_constructor: 3\n";
        let err = Shape::from_yaml_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("no constructor at position 3"));
    }
}
