// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type Bridge: native layouts <-> class descriptors.
//!
//! - **Descriptor -> layout** ([`layout_of`]): derive the [`Shape`] of a
//!   class that has no native type registered, recursively resolving nested
//!   classes, containers and pointers through the registry.
//! - **Layout -> descriptor** ([`descriptor_of`], [`register_native`]):
//!   introspect a native [`StructShape`] and synthesize the descriptor that
//!   streams it. Shapes with no fixed wire form fail here, before any byte
//!   is written.
//!
//! ```
//! use rootdict::bridge::{register_native, NativeType, Shape, StructShape};
//! use rootdict::Registry;
//! use std::sync::Arc;
//!
//! struct Hit {
//!     energy: f32,
//!     cells: Vec<u16>,
//! }
//!
//! impl NativeType for Hit {
//!     fn type_name() -> String {
//!         "Hit".into()
//!     }
//!
//!     fn shape() -> Shape {
//!         Shape::Struct(Arc::new(
//!             StructShape::new("Hit")
//!                 .field("fEnergy", f32::shape())
//!                 .field("fCells", Vec::<u16>::shape()),
//!         ))
//!     }
//! }
//!
//! let registry = Registry::new();
//! let Shape::Struct(hit) = Hit::shape() else { unreachable!() };
//! let desc = register_native(&registry, &hit).expect("introspection");
//! assert_eq!(desc.fields()[1].type_name, "vector<unsigned short>");
//! ```

use crate::descriptor::{
    map_type_name, parse_template, sequence_type_name, ClassDescriptor, ClassDescriptorBuilder,
    Element, FieldDescriptor, FieldKind,
};
use crate::error::{Error, Result, SchemaError};
use crate::meta::{type_name_to_kind, Builtin, ScalarKind, StlKind};
use crate::registry::Registry;
use crate::value::{Record, Value};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// In-memory layout of a streamable type.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Scalar(ScalarKind),
    /// `TString` as a class member, `std::string` inside containers.
    String,
    /// Fixed-size array.
    Array(Box<Shape>, usize),
    /// `vector`, `list` and `deque`.
    Seq(Box<Shape>),
    Set(Box<Shape>),
    Map(Box<Shape>, Box<Shape>),
    Bitset(usize),
    Struct(Arc<StructShape>),
    /// Pointer to an object of the named class (null allowed).
    Pointer(String),
    /// A native type with no wire form; rejected by introspection.
    Unsupported(String),
}

/// Named composite layout.
#[derive(Debug, Clone, PartialEq)]
pub struct StructShape {
    pub name: String,
    pub version: i32,
    pub title: String,
    pub fields: Vec<ShapeField>,
}

/// One member of a [`StructShape`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeField {
    pub name: String,
    /// Member comment; carries `[xmin,xmax,nbits]` for compressed floats.
    pub title: String,
    pub shape: Shape,
}

impl StructShape {
    /// Empty layout, class version 1.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            title: String::new(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn field(self, name: impl Into<String>, shape: Shape) -> Self {
        self.field_with_title(name, "", shape)
    }

    #[must_use]
    pub fn field_with_title(
        mut self,
        name: impl Into<String>,
        title: impl Into<String>,
        shape: Shape,
    ) -> Self {
        self.fields.push(ShapeField {
            name: name.into(),
            title: title.into(),
            shape,
        });
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Zero record of this layout.
    pub fn default_record(&self) -> Record {
        Record {
            class: self.name.clone(),
            fields: self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.shape.default_value()))
                .collect(),
        }
    }
}

impl Shape {
    /// C++ spelling of the shape, as used in descriptor type names.
    pub fn type_name(&self) -> String {
        match self {
            Shape::Scalar(kind) => kind.type_name().to_string(),
            Shape::String => "string".to_string(),
            Shape::Array(..) => {
                let (dims, elem) = array_dims(self);
                let dims: String = dims.iter().map(|d| format!("[{}]", d)).collect();
                format!("{}{}", elem.type_name(), dims)
            }
            Shape::Seq(elem) => sequence_type_name(StlKind::Vector, &elem.type_name()),
            Shape::Set(elem) => sequence_type_name(StlKind::Set, &elem.type_name()),
            Shape::Map(key, value) => map_type_name(&key.type_name(), &value.type_name()),
            Shape::Bitset(n) => format!("bitset<{}>", n),
            Shape::Struct(s) => s.name.clone(),
            Shape::Pointer(class) => format!("{}*", class),
            Shape::Unsupported(what) => what.clone(),
        }
    }

    /// Zero value: the decode target for this shape.
    pub fn default_value(&self) -> Value {
        match self {
            Shape::Scalar(kind) => Value::zero(*kind),
            Shape::String => Value::String(String::new()),
            Shape::Array(elem, n) => Value::Array((0..*n).map(|_| elem.default_value()).collect()),
            Shape::Seq(_) | Shape::Set(_) => Value::Array(Vec::new()),
            Shape::Map(..) => Value::Map(Vec::new()),
            Shape::Bitset(n) => Value::Bits(vec![false; *n]),
            Shape::Struct(s) => Value::Record(s.default_record()),
            Shape::Pointer(_) => Value::Pointer(None),
            Shape::Unsupported(_) => Value::Null,
        }
    }

    pub fn as_struct(&self) -> Option<&Arc<StructShape>> {
        match self {
            Shape::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

// ---------------------------------------------------------------------------
// Native types
// ---------------------------------------------------------------------------

/// A Rust type with a known streamable layout.
///
/// Struct implementations override [`type_name`](Self::type_name) with a
/// constant so self-referencing pointers (`Option<Box<Self>>`) do not
/// recurse into [`shape`](Self::shape).
pub trait NativeType {
    fn shape() -> Shape;

    fn type_name() -> String {
        Self::shape().type_name()
    }
}

macro_rules! impl_native_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl NativeType for $ty {
                fn shape() -> Shape {
                    Shape::Scalar(ScalarKind::$kind)
                }
            }
        )*
    };
}

impl_native_scalar!(
    bool => Bool,
    i8 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long64,
    u8 => UChar,
    u16 => UShort,
    u32 => UInt,
    u64 => ULong64,
    f32 => Float,
    f64 => Double,
);

macro_rules! impl_native_unsupported {
    ($($ty:ty => $what:expr),* $(,)?) => {
        $(
            impl NativeType for $ty {
                fn shape() -> Shape {
                    Shape::Unsupported($what.to_string())
                }
            }
        )*
    };
}

// pointer-sized integers have no fixed wire width
impl_native_unsupported!(
    usize => "usize",
    isize => "isize",
    Box<dyn std::any::Any> => "dyn Any",
);

impl<T> NativeType for std::sync::mpsc::Sender<T> {
    fn shape() -> Shape {
        Shape::Unsupported("channel".into())
    }
}

impl<T> NativeType for std::sync::mpsc::Receiver<T> {
    fn shape() -> Shape {
        Shape::Unsupported("channel".into())
    }
}

impl<R> NativeType for fn() -> R {
    fn shape() -> Shape {
        Shape::Unsupported("function".into())
    }
}

impl<A, R> NativeType for fn(A) -> R {
    fn shape() -> Shape {
        Shape::Unsupported("function".into())
    }
}

impl NativeType for String {
    fn shape() -> Shape {
        Shape::String
    }
}

impl<T: NativeType> NativeType for Vec<T> {
    fn shape() -> Shape {
        Shape::Seq(Box::new(T::shape()))
    }
}

impl<T: NativeType, const N: usize> NativeType for [T; N] {
    fn shape() -> Shape {
        Shape::Array(Box::new(T::shape()), N)
    }
}

impl<T: NativeType> NativeType for Option<Box<T>> {
    fn shape() -> Shape {
        Shape::Pointer(T::type_name())
    }
}

impl<K: NativeType, V: NativeType> NativeType for BTreeMap<K, V> {
    fn shape() -> Shape {
        Shape::Map(Box::new(K::shape()), Box::new(V::shape()))
    }
}

impl<K: NativeType, V: NativeType> NativeType for HashMap<K, V> {
    fn shape() -> Shape {
        Shape::Map(Box::new(K::shape()), Box::new(V::shape()))
    }
}

impl<T: NativeType> NativeType for BTreeSet<T> {
    fn shape() -> Shape {
        Shape::Set(Box::new(T::shape()))
    }
}

impl<T: NativeType> NativeType for HashSet<T> {
    fn shape() -> Shape {
        Shape::Set(Box::new(T::shape()))
    }
}

/// Concurrent class name -> native layout factory.
///
/// [`layout_of`] consults it before deriving a layout from a descriptor.
#[derive(Debug, Default, Clone)]
pub struct NativeTypes {
    shapes: Arc<DashMap<String, Shape>>,
}

impl NativeTypes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `shape` under `name`, replacing any previous layout.
    pub fn register(&self, name: impl Into<String>, shape: Shape) {
        let name = name.into();
        log::debug!("[bridge] native type {} -> {}", name, shape);
        self.shapes.insert(name, shape);
    }

    pub fn register_type<T: NativeType>(&self) {
        self.register(T::type_name(), T::shape());
    }

    pub fn get(&self, name: &str) -> Option<Shape> {
        self.shapes.get(name).map(|s| s.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shapes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Descriptor -> layout
// ---------------------------------------------------------------------------

/// Native layout of `desc`.
///
/// Base class members are inlined in front of the class's own, matching the
/// slot order of [`Record`]s. Top-level `string` and container classes with
/// a single implicit member come back as the bare container shape.
pub fn layout_of(
    registry: &Registry,
    natives: &NativeTypes,
    desc: &ClassDescriptor,
) -> Result<Shape> {
    let mut stack = Vec::new();
    Deriver { registry, natives }.class(desc, &mut stack)
}

struct Deriver<'a> {
    registry: &'a Registry,
    natives: &'a NativeTypes,
}

impl Deriver<'_> {
    fn class(&self, desc: &ClassDescriptor, stack: &mut Vec<String>) -> Result<Shape> {
        if let Some(shape) = self.natives.get(desc.name()) {
            return Ok(shape);
        }
        if let Some(kind) = StlKind::from_type_name(desc.name()) {
            if kind == StlKind::String {
                return Ok(Shape::String);
            }
            if desc.fields().len() == 1 {
                return self.named(desc.name(), stack);
            }
        }

        self.enter(desc.name(), stack)?;
        let mut shape = StructShape::new(desc.name())
            .version(desc.version())
            .title(desc.title());
        self.members(desc, &mut shape.fields, stack)?;
        stack.pop();
        Ok(Shape::Struct(Arc::new(shape)))
    }

    fn enter(&self, name: &str, stack: &mut Vec<String>) -> Result<()> {
        if stack.iter().any(|n| n == name) {
            return Err(SchemaError::InvalidDescriptor {
                class: name.to_string(),
                reason: format!("class embeds itself ({} -> {})", stack.join(" -> "), name),
            }
            .into());
        }
        stack.push(name.to_string());
        Ok(())
    }

    fn members(
        &self,
        desc: &ClassDescriptor,
        out: &mut Vec<ShapeField>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        for field in desc.fields() {
            if let FieldKind::Base { version } = field.kind {
                self.base(&field.name, version, out, stack)?;
                continue;
            }
            out.push(ShapeField {
                name: field.name.clone(),
                title: field.title.clone(),
                shape: self.member(desc, field, stack)?,
            });
        }
        Ok(())
    }

    fn base(
        &self,
        name: &str,
        version: i32,
        out: &mut Vec<ShapeField>,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        if let Some(Shape::Struct(native)) = self.natives.get(name) {
            out.extend(native.fields.iter().cloned());
            return Ok(());
        }
        let base = self.lookup(name, version)?;
        self.enter(base.name(), stack)?;
        self.members(&base, out, stack)?;
        stack.pop();
        Ok(())
    }

    fn member(
        &self,
        desc: &ClassDescriptor,
        field: &FieldDescriptor,
        stack: &mut Vec<String>,
    ) -> Result<Shape> {
        let shape = match &field.kind {
            FieldKind::Scalar(ScalarKind::Counter) if field.size == 8 => {
                Shape::Scalar(ScalarKind::Long64)
            }
            FieldKind::Scalar(ScalarKind::Counter) => Shape::Scalar(ScalarKind::Int),
            FieldKind::Scalar(kind) => Shape::Scalar(*kind),
            FieldKind::FixedArray(elem) => Shape::Array(
                Box::new(self.element(elem, stack)?),
                field.array_len.max(0) as usize,
            ),
            FieldKind::CountedArray { element, .. } => {
                Shape::Seq(Box::new(self.element(element, stack)?))
            }
            FieldKind::LoopArray { class, .. } => Shape::Seq(Box::new(self.named(class, stack)?)),
            FieldKind::String => Shape::String,
            FieldKind::Object { class, .. } => self.named(class, stack)?,
            FieldKind::ObjectPointer { class, .. } => Shape::Pointer(class.clone()),
            FieldKind::Stl { .. } => self.named(&field.type_name, stack)?,
            FieldKind::Base { .. } => self.named(&field.name, stack)?,
            FieldKind::Opaque => {
                return Err(Error::unsupported(
                    "opaque member",
                    format!("{}::{}", desc.name(), field.name),
                ))
            }
        };
        Ok(shape)
    }

    fn element(&self, elem: &Element, stack: &mut Vec<String>) -> Result<Shape> {
        match elem {
            Element::Scalar(kind) => Ok(Shape::Scalar(*kind)),
            Element::String => Ok(Shape::String),
            Element::Class(class) => self.named(class, stack),
        }
    }

    /// Shape of a C++ type name: builtin, container, pointer or class.
    fn named(&self, type_name: &str, stack: &mut Vec<String>) -> Result<Shape> {
        let name = type_name.trim();
        match type_name_to_kind(name) {
            Some(Builtin::Scalar(kind)) => return Ok(Shape::Scalar(kind)),
            Some(Builtin::StdString | Builtin::TString) => return Ok(Shape::String),
            _ => {}
        }
        if let Some(class) = name.strip_suffix('*') {
            return Ok(Shape::Pointer(class.trim().to_string()));
        }
        if let Some(kind) = StlKind::from_type_name(name) {
            return self.container(name, kind, stack);
        }
        if let Some(shape) = self.natives.get(name) {
            return Ok(shape);
        }
        let desc = self.lookup(name, -1)?;
        self.class(&desc, stack)
    }

    fn container(&self, name: &str, kind: StlKind, stack: &mut Vec<String>) -> Result<Shape> {
        if kind == StlKind::String {
            return Ok(Shape::String);
        }
        let tmpl = parse_template(name)?;
        let shape = match kind {
            StlKind::Bitset => {
                let nbits = tmpl.element().parse::<usize>().map_err(|_| SchemaError::BadTemplate {
                    type_name: name.to_string(),
                    reason: format!("invalid bitset size {:?}", tmpl.element()),
                })?;
                Shape::Bitset(nbits)
            }
            kind if kind.is_map() => {
                let value = tmpl.value().ok_or_else(|| SchemaError::BadTemplate {
                    type_name: name.to_string(),
                    reason: "map without a mapped type".into(),
                })?;
                Shape::Map(
                    Box::new(self.named(tmpl.element(), stack)?),
                    Box::new(self.named(value, stack)?),
                )
            }
            kind if kind.is_set() => Shape::Set(Box::new(self.named(tmpl.element(), stack)?)),
            _ => Shape::Seq(Box::new(self.named(tmpl.element(), stack)?)),
        };
        Ok(shape)
    }

    fn lookup(&self, name: &str, version: i32) -> Result<Arc<ClassDescriptor>> {
        self.registry
            .get(name, version)
            .or_else(|| self.registry.get(name, -1))
            .ok_or_else(|| {
                SchemaError::UnknownClass {
                    name: name.to_string(),
                    version,
                }
                .into()
            })
    }
}

// ---------------------------------------------------------------------------
// Layout -> descriptor
// ---------------------------------------------------------------------------

/// Descriptor streaming `shape`.
///
/// Native strings become `TString` members; vectors, sets, maps and bitsets
/// become standard containers; nested structs are embedded objects.
pub fn descriptor_of(shape: &StructShape) -> Result<ClassDescriptor> {
    let mut builder = ClassDescriptorBuilder::new(&shape.name, shape.version).title(&shape.title);
    for field in &shape.fields {
        builder = builder.field(field_of(&shape.name, field)?);
    }
    Ok(builder.build()?)
}

fn field_of(class: &str, field: &ShapeField) -> Result<FieldDescriptor> {
    let unsupported = |what: String| -> Error {
        SchemaError::UnsupportedShape {
            field: format!("{}::{}", class, field.name),
            shape: what,
        }
        .into()
    };
    let (name, title) = (field.name.as_str(), field.title.as_str());
    let desc = match &field.shape {
        Shape::Scalar(kind) => FieldDescriptor::scalar(name, title, *kind),
        Shape::String => FieldDescriptor::tstring(name, title),
        Shape::Array(..) => {
            let (dims, elem) = array_dims(&field.shape);
            if dims.contains(&0) {
                return Err(unsupported(format!("zero-length array {}", field.shape)));
            }
            let element = match elem {
                Shape::Scalar(kind) => Element::Scalar(*kind),
                Shape::String => Element::String,
                Shape::Struct(s) => Element::Class(s.name.clone()),
                other => return Err(unsupported(format!("array of {}", other))),
            };
            let dims = dims
                .iter()
                .map(|&d| {
                    i32::try_from(d).map_err(|_| unsupported(format!("array dimension {}", d)))
                })
                .collect::<Result<Vec<_>>>()?;
            FieldDescriptor::fixed_array(name, title, element, &dims)
        }
        Shape::Seq(_) | Shape::Set(_) | Shape::Map(..) | Shape::Bitset(_) => {
            if let Some(bad) = container_defect(&field.shape) {
                return Err(unsupported(bad));
            }
            FieldDescriptor::stl(name, title, &field.shape.type_name())?
        }
        Shape::Struct(s) => FieldDescriptor::object(name, title, s.name.as_str()),
        Shape::Pointer(target) => FieldDescriptor::object_pointer(name, title, target.as_str()),
        Shape::Unsupported(what) => return Err(unsupported(what.clone())),
    };
    Ok(desc)
}

/// Dimensions of nested fixed arrays, outermost first, and the element.
fn array_dims(shape: &Shape) -> (Vec<usize>, &Shape) {
    let mut dims = Vec::new();
    let mut cur = shape;
    while let Shape::Array(elem, n) = cur {
        dims.push(*n);
        cur = elem;
    }
    (dims, cur)
}

/// First element of a container that has no container wire form.
fn container_defect(shape: &Shape) -> Option<String> {
    match shape {
        Shape::Unsupported(what) => Some(what.clone()),
        Shape::Array(..) => Some(format!("fixed array {} inside a container", shape)),
        Shape::Seq(elem) | Shape::Set(elem) => container_defect(elem),
        Shape::Map(key, value) => container_defect(key).or_else(|| container_defect(value)),
        Shape::Scalar(_)
        | Shape::String
        | Shape::Bitset(_)
        | Shape::Struct(_)
        | Shape::Pointer(_) => None,
    }
}

/// Introspect `shape`, then register its descriptor and the descriptors of
/// every struct it embeds (directly or through containers).
///
/// Nested classes are registered first; already registered classes with the
/// same name and version are left alone.
pub fn register_native(registry: &Registry, shape: &StructShape) -> Result<Arc<ClassDescriptor>> {
    let mut nested = Vec::new();
    let mut seen = HashSet::new();
    seen.insert(shape.name.clone());
    for field in &shape.fields {
        collect_structs(&field.shape, &mut seen, &mut nested);
    }
    for s in &nested {
        if !registry.contains(&s.name, s.version) {
            registry.add(descriptor_of(s)?)?;
        }
    }
    registry.add(descriptor_of(shape)?)
}

/// Embedded struct shapes, dependencies before dependents.
fn collect_structs(shape: &Shape, seen: &mut HashSet<String>, out: &mut Vec<Arc<StructShape>>) {
    match shape {
        Shape::Struct(s) => {
            if !seen.insert(s.name.clone()) {
                return;
            }
            for field in &s.fields {
                collect_structs(&field.shape, seen, out);
            }
            out.push(Arc::clone(s));
        }
        Shape::Array(elem, _) | Shape::Seq(elem) | Shape::Set(elem) => {
            collect_structs(elem, seen, out);
        }
        Shape::Map(key, value) => {
            collect_structs(key, seen, out);
            collect_structs(value, seen, out);
        }
        Shape::Scalar(_)
        | Shape::String
        | Shape::Bitset(_)
        | Shape::Pointer(_)
        | Shape::Unsupported(_) => {}
    }
}
