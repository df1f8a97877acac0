//! Type descriptors for columns and mapping targets.
//!
//! [`ValueType`] describes what a column holds. [`TargetType`] describes what a
//! caller wants a row turned into: scalars, nullable scalars, enums, custom
//! objects, abstract and concrete collections and maps, arrays, and tuples.
//! Custom types are described at runtime by [`ObjectType`], [`EnumType`],
//! [`CollectionType`], and [`MapType`] descriptors. A [`TypeRef`] names an
//! object type before its descriptor exists, which is how recursive shapes
//! such as a node holding a list of nodes are described.

use std::{
    fmt,
    str::FromStr,
    sync::{Arc, OnceLock, Weak},
};

use crate::data::{EnumValue, Object, Value};
use crate::error::{MapError, Result};

pub const MAX_TUPLE_ARITY: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal,
    String,
    Guid,
    Date,
    DateTime,
    Time,
    Binary,
    Object,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int8 => "int8",
            ValueType::Int16 => "int16",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::UInt8 => "uint8",
            ValueType::UInt16 => "uint16",
            ValueType::UInt32 => "uint32",
            ValueType::UInt64 => "uint64",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
            ValueType::Decimal => "decimal",
            ValueType::String => "string",
            ValueType::Guid => "guid",
            ValueType::Date => "date",
            ValueType::DateTime => "datetime",
            ValueType::Time => "time",
            ValueType::Binary => "binary",
            ValueType::Object => "object",
        }
    }

    pub fn variants() -> &'static [&'static str] {
        &[
            "bool", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64",
            "float32", "float64", "decimal", "string", "guid", "date", "datetime", "time",
            "binary", "object",
        ]
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            ValueType::Int8
                | ValueType::Int16
                | ValueType::Int32
                | ValueType::Int64
                | ValueType::UInt8
                | ValueType::UInt16
                | ValueType::UInt32
                | ValueType::UInt64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integral()
            || matches!(
                self,
                ValueType::Float32 | ValueType::Float64 | ValueType::Decimal
            )
    }

    /// Types that take part in general text/number/temporal conversion.
    pub fn is_convertible(&self) -> bool {
        self.is_numeric()
            || matches!(
                self,
                ValueType::Bool
                    | ValueType::String
                    | ValueType::Date
                    | ValueType::DateTime
                    | ValueType::Time
            )
    }

    /// Whether a null source resolves to a non-null zero value.
    pub fn is_value_type(&self) -> bool {
        !matches!(
            self,
            ValueType::String | ValueType::Binary | ValueType::Object
        )
    }

    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int8 => Value::Int8(0),
            ValueType::Int16 => Value::Int16(0),
            ValueType::Int32 => Value::Int32(0),
            ValueType::Int64 => Value::Int64(0),
            ValueType::UInt8 => Value::UInt8(0),
            ValueType::UInt16 => Value::UInt16(0),
            ValueType::UInt32 => Value::UInt32(0),
            ValueType::UInt64 => Value::UInt64(0),
            ValueType::Float32 => Value::Float32(0.0),
            ValueType::Float64 => Value::Float64(0.0),
            ValueType::Decimal => Value::Decimal(Default::default()),
            ValueType::Guid => Value::Guid(uuid::Uuid::nil()),
            ValueType::Date => Value::Date(Default::default()),
            ValueType::DateTime => Value::DateTime(Default::default()),
            ValueType::Time => Value::Time(Default::default()),
            ValueType::String | ValueType::Binary | ValueType::Object => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = MapError;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let ty = match normalized.as_str() {
            "bool" | "boolean" | "bit" => ValueType::Bool,
            "int8" | "sbyte" | "tinyint" => ValueType::Int8,
            "int16" | "short" | "smallint" => ValueType::Int16,
            "int32" | "int" | "integer" => ValueType::Int32,
            "int64" | "long" | "bigint" => ValueType::Int64,
            "uint8" | "byte" => ValueType::UInt8,
            "uint16" | "ushort" => ValueType::UInt16,
            "uint32" | "uint" => ValueType::UInt32,
            "uint64" | "ulong" => ValueType::UInt64,
            "float32" | "float" | "single" | "real" => ValueType::Float32,
            "float64" | "double" => ValueType::Float64,
            "decimal" | "numeric" | "money" => ValueType::Decimal,
            "string" | "text" | "varchar" | "nvarchar" | "char" => ValueType::String,
            "guid" | "uuid" | "uniqueidentifier" => ValueType::Guid,
            "date" => ValueType::Date,
            "datetime" | "date-time" | "timestamp" => ValueType::DateTime,
            "time" => ValueType::Time,
            "binary" | "bytes" | "blob" | "varbinary" => ValueType::Binary,
            "object" | "variant" => ValueType::Object,
            _ => {
                return Err(MapError::shape(format!(
                    "Unknown column type '{value}'. Supported types: {}",
                    ValueType::variants().join(", ")
                )));
            }
        };
        Ok(ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// An enumeration with named integral members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<(String, i64)>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    pub fn parse_name(&self, name: &str) -> Option<EnumValue> {
        let trimmed = name.trim();
        self.variants
            .iter()
            .find(|(variant, _)| variant.eq_ignore_ascii_case(trimmed))
            .map(|(variant, value)| self.member(Some(variant.clone()), *value))
    }

    pub fn from_discriminant(&self, value: i64) -> EnumValue {
        let name = self
            .variants
            .iter()
            .find(|(_, discriminant)| *discriminant == value)
            .map(|(variant, _)| variant.clone());
        self.member(name, value)
    }

    fn member(&self, name: Option<String>, value: i64) -> EnumValue {
        EnumValue {
            type_name: self.name.clone(),
            name,
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub target: TargetType,
    pub visibility: Visibility,
    pub readable: bool,
    pub writable: bool,
    pub unnamed_sink: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, target: TargetType) -> Self {
        Self {
            name: name.into(),
            target,
            visibility: Visibility::Public,
            readable: true,
            writable: true,
            unnamed_sink: false,
        }
    }

    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Marks the property as the destination for unnamed columns.
    pub fn sink(mut self) -> Self {
        self.unnamed_sink = true;
        self
    }

    pub fn is_assignable(&self) -> bool {
        self.visibility == Visibility::Public && self.readable && self.writable
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub target: TargetType,
    pub unnamed_sink: bool,
}

impl Param {
    pub fn new(name: impl Into<String>, target: TargetType) -> Self {
        Self {
            name: name.into(),
            target,
            unnamed_sink: false,
        }
    }

    pub fn sink(mut self) -> Self {
        self.unnamed_sink = true;
        self
    }
}

pub type ConstructorBody = Arc<dyn Fn(&ObjectType, Vec<Value>) -> Object + Send + Sync>;

pub struct Constructor {
    pub declaring_type: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<Param>,
    body: Option<ConstructorBody>,
}

impl Constructor {
    pub fn new(params: Vec<Param>) -> Self {
        Self {
            declaring_type: String::new(),
            visibility: Visibility::Public,
            is_static: false,
            params,
            body: None,
        }
    }

    pub fn parameterless() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(&ObjectType, Vec<Value>) -> Object + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn static_factory(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Records the declaring type explicitly. [`ObjectTypeBuilder`] fills this in
    /// for constructors added to it.
    pub fn declared_on(mut self, type_name: impl Into<String>) -> Self {
        self.declaring_type = type_name.into();
        self
    }

    /// Builds the initial instance from bound argument values.
    ///
    /// Without a custom body every property starts at its default and each
    /// argument is stored in the property sharing its name.
    pub fn construct(&self, object_type: &ObjectType, args: Vec<Value>) -> Object {
        if let Some(body) = &self.body {
            return body(object_type, args);
        }
        let mut object = object_type.blank_instance();
        for (param, value) in self.params.iter().zip(args) {
            let field = object_type
                .property(&param.name)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| param.name.clone());
            object.set(field, value);
        }
        object
    }

    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.target.type_name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({params})", self.declaring_type)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("declaring_type", &self.declaring_type)
            .field("visibility", &self.visibility)
            .field("is_static", &self.is_static)
            .field("params", &self.params)
            .field("custom_body", &self.body.is_some())
            .finish()
    }
}

/// Runtime description of a custom object type.
#[derive(Debug)]
pub struct ObjectType {
    pub name: String,
    pub is_abstract: bool,
    pub properties: Vec<Property>,
    pub constructors: Vec<Arc<Constructor>>,
}

impl ObjectType {
    pub fn builder(name: impl Into<String>) -> ObjectTypeBuilder {
        ObjectTypeBuilder {
            name: name.into(),
            is_abstract: false,
            properties: Vec::new(),
            constructors: Vec::new(),
        }
    }

    /// Builds a type whose members may refer to the type itself through the
    /// `this` target handed to `define`.
    ///
    /// ```
    /// use rowshape::{ObjectType, TargetType};
    ///
    /// let node = ObjectType::recursive("Node", |builder, this| {
    ///     builder
    ///         .property("Name", TargetType::string())
    ///         .property("Children", TargetType::list(this))
    /// });
    /// assert_eq!(node.properties[1].target.type_name(), "list<Node>");
    /// ```
    pub fn recursive<F>(name: impl Into<String>, define: F) -> Arc<ObjectType>
    where
        F: FnOnce(ObjectTypeBuilder, TargetType) -> ObjectTypeBuilder,
    {
        let name = name.into();
        let this = TypeRef::new(name.clone());
        let object = define(ObjectType::builder(name), TargetType::Named(this.clone())).build();
        // Only reachable through `object` itself, so a weak link cannot dangle.
        this.link(Link::Weak(Arc::downgrade(&object)));
        object
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// An instance with every property at its default value.
    pub fn blank_instance(&self) -> Object {
        let mut object = Object::new(self.name.clone());
        for property in &self.properties {
            object.set(property.name.clone(), property.target.default_value());
        }
        object
    }
}

pub struct ObjectTypeBuilder {
    name: String,
    is_abstract: bool,
    properties: Vec<Property>,
    constructors: Vec<Constructor>,
}

impl ObjectTypeBuilder {
    pub fn property(mut self, name: impl Into<String>, target: TargetType) -> Self {
        self.properties.push(Property::new(name, target));
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Concrete types without declared constructors receive an implicit
    /// public parameterless one.
    pub fn build(self) -> Arc<ObjectType> {
        let mut constructors = self.constructors;
        if constructors.is_empty() && !self.is_abstract {
            constructors.push(Constructor::parameterless());
        }
        let constructors = constructors
            .into_iter()
            .map(|mut ctor| {
                if ctor.declaring_type.is_empty() {
                    ctor.declaring_type = self.name.clone();
                }
                Arc::new(ctor)
            })
            .collect();
        Arc::new(ObjectType {
            name: self.name,
            is_abstract: self.is_abstract,
            properties: self.properties,
            constructors,
        })
    }
}

#[derive(Debug)]
enum Link {
    Strong(Arc<ObjectType>),
    Weak(Weak<ObjectType>),
}

/// A late-bound reference to an object type.
///
/// Clones share one binding. Until [`TypeRef::bind`] is called the reference
/// resolves to nothing and compilers decline it.
#[derive(Clone)]
pub struct TypeRef {
    name: String,
    link: Arc<OnceLock<Link>>,
}

impl TypeRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: Arc::new(OnceLock::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points the reference at `object`. Types bound this way form reference
    /// cycles when they are recursive and live as long as the process.
    pub fn bind(&self, object: &Arc<ObjectType>) -> Result<()> {
        if !object.name.eq_ignore_ascii_case(&self.name) {
            return Err(MapError::shape(format!(
                "Reference to '{}' cannot be bound to type '{}'",
                self.name, object.name
            )));
        }
        if !self.link(Link::Strong(Arc::clone(object))) {
            return Err(MapError::shape(format!(
                "Reference to '{}' is already bound",
                self.name
            )));
        }
        Ok(())
    }

    fn link(&self, link: Link) -> bool {
        self.link.set(link).is_ok()
    }

    pub fn get(&self) -> Option<Arc<ObjectType>> {
        match self.link.get()? {
            Link::Strong(object) => Some(Arc::clone(object)),
            Link::Weak(object) => object.upgrade(),
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRef")
            .field("name", &self.name)
            .field("bound", &self.link.get().is_some())
            .finish()
    }
}

pub type NewInstanceFn = Arc<dyn Fn() -> Value + Send + Sync>;
pub type AddFn = Arc<dyn Fn(&mut Value, Value) + Send + Sync>;
pub type InsertFn = Arc<dyn Fn(&mut Value, String, Value) + Send + Sync>;

/// A concrete sequence type exposing a parameterless constructor and a
/// single-argument add operation.
pub struct CollectionType {
    pub name: String,
    pub element: TargetType,
    new: Option<NewInstanceFn>,
    add: AddFn,
}

impl CollectionType {
    pub fn new(name: impl Into<String>, element: TargetType) -> Self {
        Self {
            name: name.into(),
            element,
            new: Some(Arc::new(|| Value::List(Vec::new()))),
            add: Arc::new(|target, item| {
                if let Value::List(items) | Value::Array(items) = target {
                    items.push(item);
                }
            }),
        }
    }

    pub fn with_constructor<F>(mut self, new: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.new = Some(Arc::new(new));
        self
    }

    pub fn without_default_constructor(mut self) -> Self {
        self.new = None;
        self
    }

    pub fn with_add<F>(mut self, add: F) -> Self
    where
        F: Fn(&mut Value, Value) + Send + Sync + 'static,
    {
        self.add = Arc::new(add);
        self
    }

    pub fn has_default_constructor(&self) -> bool {
        self.new.is_some()
    }

    pub fn instantiate(&self) -> Option<Value> {
        self.new.as_ref().map(|new| new())
    }

    pub fn add(&self, target: &mut Value, item: Value) {
        (self.add)(target, item);
    }
}

impl fmt::Debug for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionType")
            .field("name", &self.name)
            .field("element", &self.element)
            .field("default_constructor", &self.new.is_some())
            .finish()
    }
}

/// A concrete string-keyed map type.
pub struct MapType {
    pub name: String,
    pub value: TargetType,
    new: Option<NewInstanceFn>,
    insert: InsertFn,
}

impl MapType {
    pub fn new(name: impl Into<String>, value: TargetType) -> Self {
        Self {
            name: name.into(),
            value,
            new: Some(Arc::new(|| Value::Map(Default::default()))),
            insert: Arc::new(|target, key, item| {
                if let Value::Map(entries) = target {
                    entries.insert(key, item);
                }
            }),
        }
    }

    pub fn with_constructor<F>(mut self, new: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.new = Some(Arc::new(new));
        self
    }

    pub fn without_default_constructor(mut self) -> Self {
        self.new = None;
        self
    }

    pub fn with_insert<F>(mut self, insert: F) -> Self
    where
        F: Fn(&mut Value, String, Value) + Send + Sync + 'static,
    {
        self.insert = Arc::new(insert);
        self
    }

    pub fn has_default_constructor(&self) -> bool {
        self.new.is_some()
    }

    pub fn instantiate(&self) -> Option<Value> {
        self.new.as_ref().map(|new| new())
    }

    pub fn insert(&self, target: &mut Value, key: String, item: Value) {
        (self.insert)(target, key, item);
    }
}

impl fmt::Debug for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapType")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("default_constructor", &self.new.is_some())
            .finish()
    }
}

/// The scalar part of a target: what the conversion chain converts into.
#[derive(Debug, Clone)]
pub enum ScalarKind {
    Value(ValueType),
    Enum(Arc<EnumType>),
    Any,
}

#[derive(Debug, Clone)]
pub struct ScalarTarget {
    pub kind: ScalarKind,
    pub nullable: bool,
}

impl ScalarTarget {
    pub fn value_type(&self) -> Option<ValueType> {
        match &self.kind {
            ScalarKind::Value(ty) => Some(*ty),
            _ => None,
        }
    }

    pub fn enum_type(&self) -> Option<&EnumType> {
        match &self.kind {
            ScalarKind::Enum(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self.kind, ScalarKind::Any)
    }

    pub fn default_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match &self.kind {
            ScalarKind::Value(ty) => ty.default_value(),
            ScalarKind::Enum(ty) => Value::Enum(ty.from_discriminant(0)),
            ScalarKind::Any => Value::Null,
        }
    }

    pub fn describe(&self) -> String {
        let base = match &self.kind {
            ScalarKind::Value(ty) => ty.to_string(),
            ScalarKind::Enum(ty) => ty.name.clone(),
            ScalarKind::Any => "any".to_string(),
        };
        if self.nullable {
            format!("{base}?")
        } else {
            base
        }
    }
}

#[derive(Debug, Clone)]
pub enum TargetType {
    Scalar(ValueType),
    Nullable(Box<TargetType>),
    Enum(Arc<EnumType>),
    Any,
    Dynamic,
    Object(Arc<ObjectType>),
    /// Object type referenced before its descriptor was built.
    Named(TypeRef),
    List(Box<TargetType>),
    Collection(Arc<CollectionType>),
    Map(Box<TargetType>),
    ConcreteMap(Arc<MapType>),
    Array(Box<TargetType>),
    Tuple(Vec<TargetType>),
}

impl TargetType {
    pub fn bool() -> Self {
        TargetType::Scalar(ValueType::Bool)
    }

    pub fn int32() -> Self {
        TargetType::Scalar(ValueType::Int32)
    }

    pub fn int64() -> Self {
        TargetType::Scalar(ValueType::Int64)
    }

    pub fn float64() -> Self {
        TargetType::Scalar(ValueType::Float64)
    }

    pub fn string() -> Self {
        TargetType::Scalar(ValueType::String)
    }

    pub fn guid() -> Self {
        TargetType::Scalar(ValueType::Guid)
    }

    pub fn nullable(inner: TargetType) -> Self {
        TargetType::Nullable(Box::new(inner))
    }

    pub fn list(element: TargetType) -> Self {
        TargetType::List(Box::new(element))
    }

    pub fn array(element: TargetType) -> Self {
        TargetType::Array(Box::new(element))
    }

    pub fn map(value: TargetType) -> Self {
        TargetType::Map(Box::new(value))
    }

    pub fn tuple(items: Vec<TargetType>) -> Self {
        TargetType::Tuple(items)
    }

    pub fn object(object: &Arc<ObjectType>) -> Self {
        TargetType::Object(Arc::clone(object))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TargetType::Any | TargetType::Dynamic)
    }

    /// Replaces a bound [`TypeRef`] by the object type it points at.
    pub fn resolved(self) -> TargetType {
        match self {
            TargetType::Named(reference) => match reference.get() {
                Some(object) => TargetType::Object(object),
                None => TargetType::Named(reference),
            },
            other => other,
        }
    }

    /// Scalar targets are mapped from exactly one column.
    pub fn scalar_target(&self) -> Option<ScalarTarget> {
        match self {
            TargetType::Scalar(ty) => Some(ScalarTarget {
                kind: ScalarKind::Value(*ty),
                nullable: false,
            }),
            TargetType::Enum(ty) => Some(ScalarTarget {
                kind: ScalarKind::Enum(Arc::clone(ty)),
                nullable: false,
            }),
            TargetType::Any | TargetType::Dynamic => Some(ScalarTarget {
                kind: ScalarKind::Any,
                nullable: true,
            }),
            TargetType::Nullable(inner) => inner.scalar_target().map(|mut scalar| {
                scalar.nullable = true;
                scalar
            }),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar_target().is_some()
    }

    pub fn default_value(&self) -> Value {
        match self.scalar_target() {
            Some(scalar) => scalar.default_value(),
            None => Value::Null,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            TargetType::Scalar(ty) => ty.to_string(),
            TargetType::Nullable(inner) => format!("{}?", inner.type_name()),
            TargetType::Enum(ty) => ty.name.clone(),
            TargetType::Any => "any".to_string(),
            TargetType::Dynamic => "dynamic".to_string(),
            TargetType::Object(ty) => ty.name.clone(),
            TargetType::Named(reference) => reference.name().to_string(),
            TargetType::List(element) => format!("list<{}>", element.type_name()),
            TargetType::Collection(ty) => ty.name.clone(),
            TargetType::Map(value) => format!("map<{}>", value.type_name()),
            TargetType::ConcreteMap(ty) => ty.name.clone(),
            TargetType::Array(element) => format!("array<{}>", element.type_name()),
            TargetType::Tuple(items) => format!(
                "tuple<{}>",
                items
                    .iter()
                    .map(TargetType::type_name)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// Text identity used in cache keys. Custom descriptors include their
    /// allocation identity so distinct descriptors never collide by name.
    pub fn signature_token(&self) -> String {
        match self {
            TargetType::Nullable(inner) => format!("{}?", inner.signature_token()),
            TargetType::Enum(ty) => format!("enum:{}#{:x}", ty.name, arc_identity(ty)),
            TargetType::Object(ty) => format!("object:{}#{:x}", ty.name, arc_identity(ty)),
            TargetType::Named(reference) => match reference.get() {
                Some(ty) => format!("object:{}#{:x}", ty.name, arc_identity(&ty)),
                None => format!("unbound:{}", reference.name()),
            },
            TargetType::List(element) => format!("list<{}>", element.signature_token()),
            TargetType::Collection(ty) => format!(
                "collection:{}#{:x}<{}>",
                ty.name,
                arc_identity(ty),
                ty.element.signature_token()
            ),
            TargetType::Map(value) => format!("map<{}>", value.signature_token()),
            TargetType::ConcreteMap(ty) => format!(
                "concrete-map:{}#{:x}<{}>",
                ty.name,
                arc_identity(ty),
                ty.value.signature_token()
            ),
            TargetType::Array(element) => format!("array<{}>", element.signature_token()),
            TargetType::Tuple(items) => format!(
                "tuple<{}>",
                items
                    .iter()
                    .map(TargetType::signature_token)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            other => other.type_name(),
        }
    }

    /// Parses a type expression such as `list<Order>`, `int32?`, or
    /// `tuple<int32,string>`, resolving custom names through `lookup`.
    pub fn parse_with<F>(expr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<TargetType>,
    {
        let mut parser = TypeExprParser {
            input: expr,
            pos: 0,
            lookup: &lookup,
        };
        let parsed = parser.parse_type()?;
        parser.skip_whitespace();
        if parser.pos != expr.len() {
            return Err(MapError::shape(format!(
                "Unexpected trailing input in type expression '{expr}' at offset {}",
                parser.pos
            )));
        }
        Ok(parsed)
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

impl FromStr for TargetType {
    type Err = MapError;

    fn from_str(value: &str) -> Result<Self> {
        TargetType::parse_with(value, |_| None)
    }
}

pub(crate) fn arc_identity<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

struct TypeExprParser<'a, F> {
    input: &'a str,
    pos: usize,
    lookup: &'a F,
}

impl<F> TypeExprParser<'_, F>
where
    F: Fn(&str) -> Option<TargetType>,
{
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&str> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.') {
                self.pos += ch.len_utf8();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(MapError::shape(format!(
                "Expected a type name in '{}' at offset {start}",
                self.input
            )));
        }
        Ok(&self.input[start..self.pos])
    }

    fn parse_args(&mut self) -> Result<Vec<TargetType>> {
        let mut args = Vec::new();
        if !self.eat('<') {
            return Ok(args);
        }
        loop {
            args.push(self.parse_type()?);
            if self.eat(',') {
                continue;
            }
            if self.eat('>') {
                break;
            }
            return Err(MapError::shape(format!(
                "Expected ',' or '>' in '{}' at offset {}",
                self.input, self.pos
            )));
        }
        Ok(args)
    }

    fn parse_type(&mut self) -> Result<TargetType> {
        let name = self.ident()?.to_string();
        let args = self.parse_args()?;
        let lowered = name.to_ascii_lowercase();
        let single = |args: Vec<TargetType>, label: &str| -> Result<TargetType> {
            let mut args = args;
            if args.len() != 1 {
                return Err(MapError::shape(format!(
                    "{label}<T> takes exactly one type argument"
                )));
            }
            Ok(args.remove(0))
        };
        let mut parsed = match lowered.as_str() {
            "list" | "seq" | "sequence" => TargetType::list(single(args, "list")?),
            "array" => TargetType::array(single(args, "array")?),
            "map" | "dictionary" => TargetType::map(single(args, "map")?),
            "tuple" => {
                if args.is_empty() || args.len() > MAX_TUPLE_ARITY {
                    return Err(MapError::shape(format!(
                        "tuple<...> takes between 1 and {MAX_TUPLE_ARITY} type arguments"
                    )));
                }
                TargetType::Tuple(args)
            }
            "any" => TargetType::Any,
            "dynamic" => TargetType::Dynamic,
            _ if !args.is_empty() => {
                return Err(MapError::shape(format!(
                    "Type '{name}' does not take type arguments"
                )));
            }
            _ => match (self.lookup)(&name) {
                Some(custom) => custom,
                None => TargetType::Scalar(ValueType::from_str(&name).map_err(|_| {
                    MapError::shape(format!("Unknown type '{name}' in '{}'", self.input))
                })?),
            },
        };
        loop {
            if self.eat('?') {
                parsed = TargetType::nullable(parsed);
            } else if self.eat('[') {
                if !self.eat(']') {
                    return Err(MapError::shape(format!(
                        "Expected ']' in '{}' at offset {}",
                        self.input, self.pos
                    )));
                }
                parsed = TargetType::array(parsed);
            } else {
                break;
            }
        }
        Ok(parsed)
    }
}
