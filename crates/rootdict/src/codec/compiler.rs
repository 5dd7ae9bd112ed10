// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec Compiler: descriptor fields to transcoding procedures.
//!
//! Every field of a [`ClassDescriptor`] maps to exactly one [`Op`]. Type
//! names are resolved in a fixed order: builtin table, contained type code,
//! container template, `T*` pointer, then a class descriptor from the
//! registry. Nested classes are referenced lazily through [`ClassRef`] so
//! that mutually referencing schemas never recurse at build time.

use super::runtime::Codec;
use crate::descriptor::{
    parse_template, ClassDescriptor, Element, FieldDescriptor, FieldKind, FloatRange,
};
use crate::error::{Error, Result, SchemaError};
use crate::meta::{code, is_builtin, type_name_to_kind, Builtin, ScalarKind, StlKind};
use crate::registry::Registry;
use crate::rbytes::STL_VERSION;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, Weak};

/// Container payload layout.
///
/// Object-wise streams each element in full; member-wise streams one member
/// of every element at a time. Member-wise container members are not
/// supported and fail to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamMode {
    #[default]
    ObjectWise,
    MemberWise,
}

impl StreamMode {
    pub(crate) fn index(self) -> usize {
        match self {
            StreamMode::ObjectWise => 0,
            StreamMode::MemberWise => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled procedures
// ---------------------------------------------------------------------------

/// Lazy reference to the codec of a nested class.
///
/// Holds the descriptor weakly; when it is gone the registry is asked again
/// for the same `(name, version)`.
pub(crate) struct ClassRef {
    pub(crate) name: String,
    pub(crate) version: i32,
    pub(crate) mode: StreamMode,
    desc: Weak<ClassDescriptor>,
}

impl ClassRef {
    fn new(desc: &Arc<ClassDescriptor>, mode: StreamMode) -> Self {
        Self {
            name: desc.name().to_string(),
            version: desc.version(),
            mode,
            desc: Arc::downgrade(desc),
        }
    }

    /// Codec of the referenced class, built on first use.
    pub(crate) fn resolve(&self, registry: Option<&Registry>) -> Result<Arc<Codec>> {
        let missing = || SchemaError::UnknownClass {
            name: self.name.clone(),
            version: self.version,
        };
        let desc = match self.desc.upgrade() {
            Some(desc) => desc,
            None => registry
                .and_then(|r| r.get(&self.name, self.version))
                .ok_or_else(missing)?,
        };
        if let Some(codec) = desc.compiled(self.mode) {
            return Ok(codec);
        }
        let registry = registry.ok_or_else(missing)?;
        build(registry, &desc, self.mode)
    }
}

impl std::fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/v{}", self.name, self.version)
    }
}

/// Transcoder for one value of a given type.
#[derive(Debug)]
pub(crate) enum Elem {
    Scalar { kind: ScalarKind, range: FloatRange },
    /// `TString`, `char*` or `std::string` payload.
    String,
    /// Whole object, version header included.
    Class(ClassRef),
    /// `vector`, `list`, `deque` and set kinds: count then elements.
    Seq { kind: StlKind, elem: Box<Elem> },
    /// Map: own header, count, key block, value block.
    Map {
        type_name: String,
        key: Box<Elem>,
        key_name: String,
        /// Version of the key block header, `None` when the block has none.
        key_header: Option<i16>,
        value: Box<Elem>,
        value_name: String,
        value_header: Option<i16>,
    },
    Bitset { nbits: usize },
    /// Object pointer streamed with an object tag.
    Pointer(ClassRef),
}

impl Elem {
    /// Builtin payloads that member-wise containers can still carry.
    pub(crate) fn is_plain(&self) -> bool {
        matches!(self, Elem::Scalar { .. } | Elem::String)
    }

    /// Version written in front of a map key or value block.
    fn block_version(&self) -> i16 {
        match self {
            Elem::Scalar { .. } | Elem::String | Elem::Pointer(_) => -1,
            Elem::Seq { .. } | Elem::Map { .. } | Elem::Bitset { .. } => STL_VERSION,
            Elem::Class(class) => class.version as i16,
        }
    }

    fn class_refs<'a>(&'a self, out: &mut Vec<&'a ClassRef>) {
        match self {
            Elem::Class(class) | Elem::Pointer(class) => out.push(class),
            Elem::Seq { elem, .. } => elem.class_refs(out),
            Elem::Map { key, value, .. } => {
                key.class_refs(out);
                value.class_refs(out);
            }
            Elem::Scalar { .. } | Elem::String | Elem::Bitset { .. } => {}
        }
    }
}

/// Procedure for one descriptor field. `slot` indexes the flattened record.
#[derive(Debug)]
pub(crate) enum Op {
    /// Base class members, stored inline in `slots`.
    Base { class: ClassRef, slots: Range<usize> },
    Value { slot: usize, elem: Elem },
    FixedArray { slot: usize, elem: Elem, len: usize },
    /// Is-array marker, then as many elements as the counter slot holds.
    Counted { slot: usize, elem: Elem, counter: usize },
    /// Is-array marker, then whole objects.
    Loop { slot: usize, class: ClassRef, counter: usize },
    Pointer { slot: usize, class: ClassRef },
    /// Container member; `wrap` adds the member-level version header.
    Stl { slot: usize, type_name: String, elem: Elem, wrap: bool },
}

impl Op {
    fn class_refs<'a>(&'a self, out: &mut Vec<&'a ClassRef>) {
        match self {
            Op::Base { class, .. } | Op::Loop { class, .. } | Op::Pointer { class, .. } => {
                out.push(class);
            }
            Op::Value { elem, .. }
            | Op::FixedArray { elem, .. }
            | Op::Counted { elem, .. }
            | Op::Stl { elem, .. } => elem.class_refs(out),
        }
    }
}

/// Map block header rule: builtin payloads (`string` excepted) and
/// `TString` carry none.
fn block_header(type_name: &str, elem: &Elem) -> Option<i16> {
    if (is_builtin(type_name) && type_name != "string") || type_name == "TString" {
        return None;
    }
    Some(elem.block_version())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Compile (or fetch) the codec of `desc` for `mode`.
///
/// The codec is built at most once per descriptor and mode, however many
/// threads ask concurrently. Nested classes are then resolved eagerly so
/// that a missing or invalid nested schema fails here rather than during a
/// decode.
pub fn compile(
    registry: &Registry,
    desc: &Arc<ClassDescriptor>,
    mode: StreamMode,
) -> Result<Arc<Codec>> {
    let codec = build(registry, desc, mode)?;
    if !codec.is_resolved() {
        let mut seen = HashSet::new();
        seen.insert((codec.class().to_string(), codec.version()));
        resolve_nested(registry, &codec, &mut seen)?;
        codec.mark_resolved();
    }
    Ok(codec)
}

impl Registry {
    /// Look up `(name, version)` and compile its codec.
    pub fn codec(&self, name: &str, version: i32, mode: StreamMode) -> Result<Arc<Codec>> {
        let desc = self.get(name, version).ok_or_else(|| SchemaError::UnknownClass {
            name: name.to_string(),
            version,
        })?;
        compile(self, &desc, mode)
    }
}

/// Build without resolving nested classes. Only the per-descriptor build
/// lock is held while compiling.
pub(crate) fn build(
    registry: &Registry,
    desc: &Arc<ClassDescriptor>,
    mode: StreamMode,
) -> Result<Arc<Codec>> {
    desc.cache.get_or_build(mode, || {
        Compiler {
            registry,
            desc,
            mode,
        }
        .compile()
    })
}

fn resolve_nested(
    registry: &Registry,
    codec: &Codec,
    seen: &mut HashSet<(String, i32)>,
) -> Result<()> {
    let mut refs = Vec::new();
    for op in codec.ops() {
        op.class_refs(&mut refs);
    }
    for class in refs {
        if !seen.insert((class.name.clone(), class.version)) {
            continue;
        }
        let nested = class.resolve(Some(registry))?;
        resolve_nested(registry, &nested, seen)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Flattened slot layout: base members inline, in wire order.
struct Layout {
    names: Vec<String>,
    /// Slots covered by each descriptor field.
    spans: Vec<Range<usize>>,
}

fn base_descriptor(registry: &Registry, name: &str, version: i32) -> Result<Arc<ClassDescriptor>> {
    registry
        .get(name, version)
        .or_else(|| registry.get(name, -1))
        .ok_or_else(|| {
            SchemaError::UnknownClass {
                name: name.to_string(),
                version,
            }
            .into()
        })
}

fn flatten(registry: &Registry, desc: &ClassDescriptor, stack: &mut Vec<String>) -> Result<Layout> {
    let mut names = Vec::with_capacity(desc.fields().len());
    let mut spans = Vec::with_capacity(desc.fields().len());
    for field in desc.fields() {
        let start = names.len();
        if let FieldKind::Base { version } = field.kind {
            if stack.iter().any(|n| *n == field.name) {
                return Err(SchemaError::InvalidDescriptor {
                    class: desc.name().to_string(),
                    reason: format!("cyclic base class {:?}", field.name),
                }
                .into());
            }
            let base = base_descriptor(registry, &field.name, version)?;
            stack.push(field.name.clone());
            let sub = flatten(registry, &base, stack)?;
            stack.pop();
            names.extend(sub.names);
        } else {
            names.push(field.name.clone());
        }
        spans.push(start..names.len());
    }
    Ok(Layout { names, spans })
}

/// Find a counter member: own fields first, then bases depth-first.
///
/// Returns its slot in `desc`'s flattened layout.
fn find_counter(
    registry: &Registry,
    desc: &ClassDescriptor,
    layout: &Layout,
    name: &str,
) -> Result<Option<(usize, FieldDescriptor)>> {
    for (i, field) in desc.fields().iter().enumerate() {
        if !field.is_base() && field.name == name {
            return Ok(Some((layout.spans[i].start, field.clone())));
        }
    }
    for (i, field) in desc.fields().iter().enumerate() {
        if let FieldKind::Base { version } = field.kind {
            let base = base_descriptor(registry, &field.name, version)?;
            let sub = flatten(registry, &base, &mut vec![base.name().to_string()])?;
            if let Some((slot, found)) = find_counter(registry, &base, &sub, name)? {
                return Ok(Some((layout.spans[i].start + slot, found)));
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

struct Compiler<'a> {
    registry: &'a Registry,
    desc: &'a Arc<ClassDescriptor>,
    mode: StreamMode,
}

impl Compiler<'_> {
    fn compile(&self) -> Result<Codec> {
        let desc = self.desc;
        let mut stack = vec![desc.name().to_string()];
        let layout = flatten(self.registry, desc, &mut stack)?;

        let mut ops = Vec::with_capacity(desc.fields().len());
        for (i, field) in desc.fields().iter().enumerate() {
            ops.push(self.op(field, &layout, i)?);
        }

        log::debug!(
            "[codec] compiled {} v{} ({:?}, {} ops, {} slots)",
            desc.name(),
            desc.version(),
            self.mode,
            ops.len(),
            layout.names.len()
        );
        Ok(Codec::new(desc, self.mode, layout.names, ops, self.registry.downgrade()))
    }

    fn context(&self, field: &FieldDescriptor) -> String {
        format!("{}::{}", self.desc.name(), field.name)
    }

    fn op(&self, field: &FieldDescriptor, layout: &Layout, index: usize) -> Result<Op> {
        let slot = layout.spans[index].start;
        let op = match &field.kind {
            FieldKind::Base { version } => {
                let base = base_descriptor(self.registry, &field.name, *version)?;
                Op::Base {
                    class: ClassRef::new(&base, self.mode),
                    slots: layout.spans[index].clone(),
                }
            }
            FieldKind::Scalar(kind) => Op::Value {
                slot,
                elem: scalar_elem(*kind, field.size, field.range),
            },
            FieldKind::FixedArray(element) => {
                let len = field.array_len.max(0) as usize;
                let max = self.registry.config().max_collection_len;
                if len > max {
                    return Err(SchemaError::InvalidDescriptor {
                        class: self.desc.name().to_string(),
                        reason: format!(
                            "array {:?} of {} elements exceeds the limit of {}",
                            field.name, len, max
                        ),
                    }
                    .into());
                }
                Op::FixedArray {
                    slot,
                    elem: self.element(element, field)?,
                    len,
                }
            }
            FieldKind::CountedArray { element, counter } => Op::Counted {
                slot,
                elem: self.element(element, field)?,
                counter: self.counter(field, &counter.name, layout, slot)?,
            },
            FieldKind::LoopArray { class, counter } => Op::Loop {
                slot,
                class: self.class(class, field)?,
                counter: self.counter(field, &counter.name, layout, slot)?,
            },
            FieldKind::String => Op::Value {
                slot,
                elem: Elem::String,
            },
            FieldKind::Object { class, .. } => Op::Value {
                slot,
                elem: Elem::Class(self.class(class, field)?),
            },
            FieldKind::ObjectPointer { class, .. } => Op::Pointer {
                slot,
                class: self.class(class.trim_end_matches('*'), field)?,
            },
            FieldKind::Stl { contained, .. } => {
                if field.array_len > 1 {
                    return Err(Error::unsupported("array of STL containers", self.context(field)));
                }
                if self.mode == StreamMode::MemberWise {
                    return Err(Error::unsupported("member-wise STL", self.context(field)));
                }
                let (elem, wrap) = match parse_template(&field.type_name)? {
                    t if t.kind == StlKind::String => (Elem::String, true),
                    t => {
                        let wrap = !t.kind.is_map();
                        (self.container(&field.type_name, *contained, field.range, field)?, wrap)
                    }
                };
                Op::Stl {
                    slot,
                    type_name: field.type_name.clone(),
                    elem,
                    wrap,
                }
            }
            FieldKind::Opaque => {
                let feature = match field.type_code {
                    c if (code::CONV..code::CONV + 60).contains(&c) => {
                        "schema evolution conversion"
                    }
                    c if c % code::OFFSET_L == code::LEGACY_CHAR && c < code::OBJECT => {
                        "legacy char"
                    }
                    c if (code::SKIP..code::SKIP + 60).contains(&c) => "skipped member",
                    _ => "unknown type code",
                };
                return Err(Error::unsupported(
                    feature,
                    format!("{} (type={})", self.context(field), field.type_code),
                ));
            }
        };
        Ok(op)
    }

    fn element(&self, element: &Element, field: &FieldDescriptor) -> Result<Elem> {
        Ok(match element {
            Element::Scalar(kind) => scalar_elem(*kind, kind.size() as i32, field.range),
            Element::String => Elem::String,
            Element::Class(name) => Elem::Class(self.class(name, field)?),
        })
    }

    fn class(&self, name: &str, field: &FieldDescriptor) -> Result<ClassRef> {
        let desc = self.registry.get(name, -1).ok_or_else(|| SchemaError::UnknownClass {
            name: name.to_string(),
            version: -1,
        });
        match desc {
            Ok(desc) => Ok(ClassRef::new(&desc, self.mode)),
            Err(err) => {
                log::debug!("[codec] {}: {}", self.context(field), err);
                Err(err.into())
            }
        }
    }

    /// Resolve the slot of a counter member and check it holds an integer.
    fn counter(
        &self,
        field: &FieldDescriptor,
        name: &str,
        layout: &Layout,
        slot: usize,
    ) -> Result<usize> {
        let found = find_counter(self.registry, self.desc, layout, name)?;
        let (counter_slot, counter) = found.ok_or_else(|| SchemaError::UnresolvedCounter {
            class: self.desc.name().to_string(),
            field: field.name.clone(),
            counter: name.to_string(),
        })?;
        if !counter.scalar_kind().is_some_and(ScalarKind::is_integer) {
            return Err(SchemaError::NonIntegerCounter {
                class: self.desc.name().to_string(),
                counter: name.to_string(),
                type_name: counter.type_name.clone(),
            }
            .into());
        }
        if counter_slot > slot {
            log::warn!(
                "[codec] {}: counter {:?} is streamed after its array",
                self.context(field),
                name
            );
        }
        Ok(counter_slot)
    }

    /// Transcoder for a whole container type.
    fn container(
        &self,
        type_name: &str,
        contained: i32,
        range: FloatRange,
        field: &FieldDescriptor,
    ) -> Result<Elem> {
        let tmpl = parse_template(type_name)?;
        let elem = match tmpl.kind {
            StlKind::String => Elem::String,
            StlKind::Bitset => {
                let nbits = tmpl.element().parse::<usize>().map_err(|_| SchemaError::BadTemplate {
                    type_name: type_name.to_string(),
                    reason: format!("invalid bitset size {:?}", tmpl.element()),
                })?;
                Elem::Bitset { nbits }
            }
            kind if kind.is_map() => {
                let key_name = tmpl.element().to_string();
                let value_name = tmpl.value().unwrap_or_default().to_string();
                let key = self.resolve(&key_name, contained, range, field)?;
                let value = self.resolve(&value_name, contained, range, field)?;
                Elem::Map {
                    type_name: type_name.to_string(),
                    key_header: block_header(&key_name, &key),
                    value_header: block_header(&value_name, &value),
                    key: Box::new(key),
                    key_name,
                    value: Box::new(value),
                    value_name,
                }
            }
            kind => Elem::Seq {
                kind,
                elem: Box::new(self.resolve(tmpl.element(), contained, range, field)?),
            },
        };
        Ok(elem)
    }

    /// Resolve a container element type name.
    fn resolve(
        &self,
        type_name: &str,
        contained: i32,
        range: FloatRange,
        field: &FieldDescriptor,
    ) -> Result<Elem> {
        let name = type_name.trim();
        if let Some(elem) = builtin_elem(type_name_to_kind(name), range) {
            return self.finish_builtin(elem, field);
        }
        if let Some(elem) = builtin_elem(contained_kind(contained), range) {
            return self.finish_builtin(elem, field);
        }
        if StlKind::from_type_name(name).is_some() {
            return self.container(name, 0, FloatRange::default(), field);
        }
        if let Some(class) = name.strip_suffix('*') {
            return Ok(Elem::Pointer(self.class(class.trim(), field)?));
        }
        match self.registry.get(name, -1) {
            Some(desc) => Ok(Elem::Class(ClassRef::new(&desc, self.mode))),
            None => Err(SchemaError::UnknownType {
                context: self.context(field),
                type_name: name.to_string(),
            }
            .into()),
        }
    }

    fn finish_builtin(&self, elem: BuiltinElem, field: &FieldDescriptor) -> Result<Elem> {
        match elem {
            BuiltinElem::Ready(elem) => Ok(elem),
            BuiltinElem::Class(class) => Ok(Elem::Class(self.class(class, field)?)),
        }
    }
}

enum BuiltinElem {
    Ready(Elem),
    Class(&'static str),
}

fn builtin_elem(kind: Option<Builtin>, range: FloatRange) -> Option<BuiltinElem> {
    Some(match kind? {
        Builtin::Scalar(kind) => BuiltinElem::Ready(scalar_elem(kind, kind.size() as i32, range)),
        Builtin::StdString | Builtin::TString => BuiltinElem::Ready(Elem::String),
        Builtin::TObject => BuiltinElem::Class("TObject"),
        Builtin::TNamed => BuiltinElem::Class("TNamed"),
    })
}

/// Builtin designated by a raw contained-type code.
fn contained_kind(contained: i32) -> Option<Builtin> {
    match contained {
        code::TSTRING | code::CHAR_STAR => Some(Builtin::TString),
        code::STL_STRING => Some(Builtin::StdString),
        code::TOBJECT => Some(Builtin::TObject),
        code::TNAMED => Some(Builtin::TNamed),
        c => ScalarKind::from_code(c).map(Builtin::Scalar),
    }
}

/// Counters stream as `Int_t` or `Long64_t` depending on their declared size.
fn scalar_elem(kind: ScalarKind, size: i32, range: FloatRange) -> Elem {
    let kind = match kind {
        ScalarKind::Counter if size == 8 => ScalarKind::Long64,
        ScalarKind::Counter => ScalarKind::Int,
        kind => kind,
    };
    Elem::Scalar { kind, range }
}
