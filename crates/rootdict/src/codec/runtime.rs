// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Codec Runtime: replay compiled procedures against a cursor.
//!
//! A class is transcoded as: version header, every field procedure in wire
//! order, byte-count check. Records are flat; a base class runs its own
//! codec against the slice of slots it owns.

use super::compiler::{build, ClassRef, Elem, Op, StreamMode};
use crate::config::CodecConfig;
use crate::descriptor::{read_tobject, write_tobject, ClassDescriptor, FloatRange};
use crate::error::{Error, Result, SchemaError, WireError, WireResult};
use crate::meta::ScalarKind;
use crate::rbytes::{Header, ObjectTag, RBuffer, WBuffer, STL_VERSION};
use crate::registry::{Registry, WeakRegistry};
use crate::value::{Record, Value};
use std::borrow::Cow;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Slots = [(String, Value)];

/// Nesting bound when building blank records.
const MAX_BLANK_DEPTH: usize = 64;

/// Compiled decode/encode procedures of one class, one per field.
///
/// Obtained from [`compile`](super::compile); shared through `Arc` and safe
/// to use from any number of threads, each with its own cursor and target.
pub struct Codec {
    class: String,
    alias: String,
    version: i32,
    checksum: u32,
    mode: StreamMode,
    /// `TObject` streams without a byte count.
    tobject: bool,
    slots: Vec<String>,
    ops: Vec<Op>,
    registry: WeakRegistry,
    resolved: AtomicBool,
}

/// Per-call state: registry, limits and current nesting depth.
struct Ctx {
    registry: Option<Registry>,
    config: Arc<CodecConfig>,
    depth: Cell<usize>,
}

impl Ctx {
    fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    /// Enter one class record; the level is released when the guard drops.
    fn enter(&self, class: &str) -> WireResult<Nesting<'_>> {
        let depth = self.depth.get() + 1;
        let max = self.config.max_nesting_depth;
        if depth > max {
            return Err(WireError::Limit {
                context: format!("{} nesting depth", class),
                value: depth as i64,
                max,
            });
        }
        self.depth.set(depth);
        Ok(Nesting(&self.depth))
    }

    /// Validate a collection length read from the wire.
    fn len(&self, n: i64, at: At<'_>) -> WireResult<usize> {
        let max = self.config.max_collection_len;
        if n < 0 || n as u64 > max as u64 {
            return Err(WireError::Limit {
                context: at.context(),
                value: n,
                max,
            });
        }
        Ok(n as usize)
    }
}

struct Nesting<'a>(&'a Cell<usize>);

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Class and member being transcoded, for error reports.
#[derive(Clone, Copy)]
struct At<'a> {
    class: &'a str,
    field: &'a str,
}

impl At<'_> {
    fn context(&self) -> String {
        format!("{}::{}", self.class, self.field)
    }

    fn mismatch(&self, expected: &str, found: &Value) -> WireError {
        WireError::TypeMismatch {
            context: self.context(),
            expected: expected.to_string(),
            found: found.kind_name().to_string(),
        }
    }

    fn length(&self, expected: usize, actual: usize) -> WireError {
        WireError::LengthMismatch {
            class: self.class.to_string(),
            field: self.field.to_string(),
            expected,
            actual,
        }
    }
}

impl Codec {
    pub(crate) fn new(
        desc: &ClassDescriptor,
        mode: StreamMode,
        slots: Vec<String>,
        ops: Vec<Op>,
        registry: WeakRegistry,
    ) -> Self {
        Self {
            class: desc.name().to_string(),
            alias: desc.title().to_string(),
            version: desc.version(),
            checksum: desc.checksum(),
            mode,
            tobject: desc.name() == "TObject" && slots.len() == 2,
            slots,
            ops,
            registry,
            resolved: AtomicBool::new(false),
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Record slot names, base class members first.
    pub fn slot_names(&self) -> &[String] {
        &self.slots
    }

    /// Number of field procedures (one per descriptor field).
    pub fn field_count(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub(crate) fn mark_resolved(&self) {
        self.resolved.store(true, Ordering::Release);
    }

    fn ctx(&self) -> Ctx {
        let registry = self.registry.upgrade();
        let config = registry.as_ref().map(Registry::config).unwrap_or_default();
        Ctx {
            registry,
            config,
            depth: Cell::new(0),
        }
    }

    fn at(&self, slot: usize) -> At<'_> {
        At {
            class: &self.class,
            field: self.slots.get(slot).map(String::as_str).unwrap_or("?"),
        }
    }

    fn op(&self, index: usize) -> Result<&Op> {
        self.ops.get(index).ok_or_else(|| {
            SchemaError::InvalidDescriptor {
                class: self.class.clone(),
                reason: format!("no field #{} ({} fields)", index, self.ops.len()),
            }
            .into()
        })
    }

    // ---- public entry points

    /// Zero value of this class: every slot holds its type's default.
    pub fn new_record(&self) -> Record {
        self.blank(&self.ctx(), 0)
    }

    /// Decode one object into `target`.
    ///
    /// `target` is reset to this class's slot layout when it does not have
    /// it already; every slot is overwritten on success.
    pub fn decode(&self, r: &mut RBuffer<'_>, target: &mut Record) -> Result<()> {
        let ctx = self.ctx();
        r.set_max_class_name(ctx.config.max_class_name_len);
        if !self.answers_to(&target.class) || !self.has_layout(&target.fields) {
            *target = self.empty_record();
        }
        log::trace!("[codec] decode {} v{} at {}", self.class, self.version, r.pos());
        self.read_class(r, &mut target.fields, &ctx)
    }

    /// Decode one object into a fresh record.
    pub fn read(&self, r: &mut RBuffer<'_>) -> Result<Record> {
        let mut rec = self.empty_record();
        self.decode(r, &mut rec)?;
        Ok(rec)
    }

    /// Encode `src`; returns the number of bytes written.
    pub fn encode(&self, w: &mut WBuffer, src: &Record) -> Result<usize> {
        let ctx = self.ctx();
        let fields = self.conform(src)?;
        let start = w.pos();
        log::trace!("[codec] encode {} v{} at {}", self.class, self.version, start);
        self.write_class(w, &fields, &ctx)?;
        Ok(w.pos() - start)
    }

    /// Run the procedure of field `index` alone.
    pub fn decode_field(
        &self,
        index: usize,
        r: &mut RBuffer<'_>,
        target: &mut Record,
    ) -> Result<()> {
        let op = self.op(index)?;
        let ctx = self.ctx();
        r.set_max_class_name(ctx.config.max_class_name_len);
        self.prepare(target, &ctx);
        self.read_op(op, r, &mut target.fields, &ctx)
    }

    /// Encode field `index` alone; returns the number of bytes written.
    pub fn encode_field(&self, index: usize, w: &mut WBuffer, src: &Record) -> Result<usize> {
        let op = self.op(index)?;
        let ctx = self.ctx();
        let fields = self.conform(src)?;
        let start = w.pos();
        self.write_op(op, w, &fields, &ctx)?;
        Ok(w.pos() - start)
    }

    // ---- record layout

    fn answers_to(&self, class: &str) -> bool {
        self.class == class || (!self.alias.is_empty() && self.alias == class)
    }

    fn has_layout(&self, fields: &Slots) -> bool {
        fields.len() == self.slots.len() && fields.iter().zip(&self.slots).all(|((n, _), s)| n == s)
    }

    fn prepare(&self, target: &mut Record, ctx: &Ctx) {
        if !self.answers_to(&target.class) || !self.has_layout(&target.fields) {
            *target = self.blank(ctx, 0);
        }
    }

    /// Slots of `src` in this codec's order.
    fn conform<'a>(&self, src: &'a Record) -> WireResult<Cow<'a, Slots>> {
        if !self.answers_to(&src.class) {
            return Err(WireError::TypeMismatch {
                context: self.class.clone(),
                expected: format!("record of {}", self.class),
                found: format!("record of {}", src.class),
            });
        }
        if self.has_layout(&src.fields) {
            return Ok(Cow::Borrowed(&src.fields[..]));
        }
        let mut out = Vec::with_capacity(self.slots.len());
        for name in &self.slots {
            let value = src.get(name).ok_or_else(|| WireError::TypeMismatch {
                context: format!("{}::{}", self.class, name),
                expected: "a value".into(),
                found: "nothing".into(),
            })?;
            out.push((name.clone(), value.clone()));
        }
        Ok(Cow::Owned(out))
    }

    fn blank(&self, ctx: &Ctx, depth: usize) -> Record {
        let mut fields: Vec<(String, Value)> =
            self.slots.iter().map(|n| (n.clone(), Value::Null)).collect();
        self.fill_blank(&mut fields, ctx, depth);
        Record {
            class: self.class.clone(),
            fields,
        }
    }

    fn fill_blank(&self, slots: &mut Slots, ctx: &Ctx, depth: usize) {
        if depth > MAX_BLANK_DEPTH || slots.len() != self.slots.len() {
            return;
        }
        for op in &self.ops {
            match op {
                Op::Base { class, slots: span } => {
                    if let Ok(codec) = class.resolve(ctx.registry()) {
                        codec.fill_blank(&mut slots[span.clone()], ctx, depth + 1);
                    }
                }
                Op::Value { slot, elem } | Op::Stl { slot, elem, .. } => {
                    slots[*slot].1 = blank_elem(elem, ctx, depth);
                }
                Op::FixedArray { slot, elem, len } => {
                    let n = (*len).min(ctx.config.max_collection_len);
                    slots[*slot].1 =
                        Value::Array((0..n).map(|_| blank_elem(elem, ctx, depth)).collect());
                }
                Op::Counted { slot, .. } | Op::Loop { slot, .. } => {
                    slots[*slot].1 = Value::Array(Vec::new());
                }
                Op::Pointer { slot, .. } => slots[*slot].1 = Value::Pointer(None),
            }
        }
    }

    fn check_slots(&self, slots: &Slots) -> WireResult<()> {
        if slots.len() == self.slots.len() {
            return Ok(());
        }
        Err(WireError::TypeMismatch {
            context: self.class.clone(),
            expected: format!("{} slots", self.slots.len()),
            found: format!("{} slots", slots.len()),
        })
    }

    fn counter(&self, slots: &Slots, counter: usize, ctx: &Ctx) -> WireResult<usize> {
        let at = self.at(counter);
        let value = &slots[counter].1;
        let n = value.as_integer().ok_or_else(|| at.mismatch("integer counter", value))?;
        ctx.len(n, at)
    }

    // ---- decode

    /// Record with this class's slots, all unset.
    fn empty_record(&self) -> Record {
        Record {
            class: self.class.clone(),
            fields: self.slots.iter().map(|n| (n.clone(), Value::Null)).collect(),
        }
    }

    fn read_record(&self, r: &mut RBuffer<'_>, ctx: &Ctx) -> Result<Record> {
        let mut rec = self.empty_record();
        self.read_class(r, &mut rec.fields, ctx)?;
        Ok(rec)
    }

    fn read_class(&self, r: &mut RBuffer<'_>, slots: &mut Slots, ctx: &Ctx) -> Result<()> {
        self.check_slots(slots)?;
        let _level = ctx.enter(&self.class)?;
        if self.tobject {
            let (id, bits) = read_tobject(r)?;
            slots[0].1 = Value::U32(id);
            slots[1].1 = Value::U32(bits);
            return Ok(());
        }

        let hdr = r.read_version()?;
        let vers = i32::from(hdr.class_version());
        if vers != self.version {
            // foreign classes announce themselves with a checksum
            let accepted = vers <= 0 && r.read_u32()? == self.checksum;
            if !accepted {
                return Err(WireError::VersionMismatch {
                    class: self.class.clone(),
                    expected: self.version,
                    actual: vers,
                }
                .into());
            }
        }
        for op in &self.ops {
            self.read_op(op, r, slots, ctx)?;
        }
        r.check_header(&hdr, &self.class)?;
        Ok(())
    }

    fn read_op(&self, op: &Op, r: &mut RBuffer<'_>, slots: &mut Slots, ctx: &Ctx) -> Result<()> {
        match op {
            Op::Base { class, slots: span } => {
                let codec = class.resolve(ctx.registry())?;
                codec.read_class(r, &mut slots[span.clone()], ctx)?;
            }
            Op::Value { slot, elem } => {
                slots[*slot].1 = read_elem(elem, r, ctx, self.at(*slot))?;
            }
            Op::FixedArray { slot, elem, len } => {
                let at = self.at(*slot);
                let n = ctx.len(*len as i64, at)?;
                let mut items = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    items.push(read_elem(elem, r, ctx, at)?);
                }
                slots[*slot].1 = Value::Array(items);
            }
            Op::Counted { slot, elem, counter } => {
                let at = self.at(*slot);
                let n = self.counter(slots, *counter, ctx)?;
                let _is_array = r.read_i8()?;
                let mut items = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    items.push(read_elem(elem, r, ctx, at)?);
                }
                slots[*slot].1 = Value::Array(items);
            }
            Op::Loop { slot, class, counter } => {
                let n = self.counter(slots, *counter, ctx)?;
                let codec = class.resolve(ctx.registry())?;
                let _is_array = r.read_i8()?;
                let mut items = Vec::with_capacity(n.min(r.remaining()));
                for _ in 0..n {
                    items.push(Value::Record(codec.read_record(r, ctx)?));
                }
                slots[*slot].1 = Value::Array(items);
            }
            Op::Pointer { slot, class } => {
                slots[*slot].1 = read_pointer(class, r, ctx)?;
            }
            Op::Stl {
                slot,
                type_name,
                elem,
                wrap,
            } => {
                let at = self.at(*slot);
                let value = if *wrap {
                    let hdr = r.read_version()?;
                    skip_member_wise(&hdr, elem, r, type_name)?;
                    let value = read_elem(elem, r, ctx, at)?;
                    r.check_header(&hdr, type_name)?;
                    value
                } else {
                    read_elem(elem, r, ctx, at)?
                };
                slots[*slot].1 = value;
            }
        }
        Ok(())
    }

    // ---- encode

    fn write_class(&self, w: &mut WBuffer, slots: &Slots, ctx: &Ctx) -> Result<()> {
        self.check_slots(slots)?;
        let _level = ctx.enter(&self.class)?;
        if self.tobject {
            let id = u32_of(&slots[0].1, self.at(0))?;
            let bits = u32_of(&slots[1].1, self.at(1))?;
            write_tobject(w, id, bits);
            return Ok(());
        }

        let hdr = w.write_header(self.version as i16);
        for op in &self.ops {
            self.write_op(op, w, slots, ctx)?;
        }
        w.set_header(&hdr)?;
        Ok(())
    }

    fn write_op(&self, op: &Op, w: &mut WBuffer, slots: &Slots, ctx: &Ctx) -> Result<()> {
        match op {
            Op::Base { class, slots: span } => {
                let codec = class.resolve(ctx.registry())?;
                codec.write_class(w, &slots[span.clone()], ctx)?;
            }
            Op::Value { slot, elem } => {
                write_elem(elem, &slots[*slot].1, w, ctx, self.at(*slot))?;
            }
            Op::FixedArray { slot, elem, len } => {
                let at = self.at(*slot);
                let items = array_of(&slots[*slot].1, at)?;
                if items.len() != *len {
                    return Err(at.length(*len, items.len()).into());
                }
                for item in items {
                    write_elem(elem, item, w, ctx, at)?;
                }
            }
            Op::Counted { slot, elem, counter } => {
                let at = self.at(*slot);
                let n = self.counter(slots, *counter, ctx)?;
                let items = array_of(&slots[*slot].1, at)?;
                if items.len() != n {
                    return Err(at.length(n, items.len()).into());
                }
                w.write_i8(1);
                for item in items {
                    write_elem(elem, item, w, ctx, at)?;
                }
            }
            Op::Loop { slot, class, counter } => {
                let at = self.at(*slot);
                let n = self.counter(slots, *counter, ctx)?;
                let items = array_of(&slots[*slot].1, at)?;
                if items.len() != n {
                    return Err(at.length(n, items.len()).into());
                }
                let codec = class.resolve(ctx.registry())?;
                w.write_i8(1);
                for item in items {
                    let fields = codec.conform(record_of(item, at)?)?;
                    codec.write_class(w, &fields, ctx)?;
                }
            }
            Op::Pointer { slot, class } => {
                write_pointer(class, &slots[*slot].1, w, ctx, self.at(*slot))?;
            }
            Op::Stl { slot, elem, wrap, .. } => {
                let at = self.at(*slot);
                if *wrap {
                    let hdr = w.write_header(STL_VERSION);
                    write_elem(elem, &slots[*slot].1, w, ctx, at)?;
                    w.set_header(&hdr)?;
                } else {
                    write_elem(elem, &slots[*slot].1, w, ctx, at)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("class", &self.class)
            .field("version", &self.version)
            .field("mode", &self.mode)
            .field("slots", &self.slots)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Element transcoders
// ---------------------------------------------------------------------------

/// Codec of a class named on the wire, looked up by name (latest version).
fn lookup(ctx: &Ctx, class: &str, mode: StreamMode) -> Result<Arc<Codec>> {
    let missing = || SchemaError::UnknownClass {
        name: class.to_string(),
        version: -1,
    };
    let registry = ctx.registry().ok_or_else(missing)?;
    let desc = registry.get(class, -1).ok_or_else(missing)?;
    build(registry, &desc, mode)
}

/// Member-wise container header: skip the element class version (and
/// checksum); only builtin payloads can follow.
fn skip_member_wise(hdr: &Header, elem: &Elem, r: &mut RBuffer<'_>, type_name: &str) -> Result<()> {
    if !hdr.member_wise() {
        return Ok(());
    }
    let clvers = r.read_i16()?;
    if clvers <= 0 {
        let _checksum = r.read_u32()?;
    }
    let plain = match elem {
        Elem::Seq { elem, .. } => elem.is_plain(),
        Elem::Map { key, value, .. } => key.is_plain() && value.is_plain(),
        Elem::Class(_) | Elem::Pointer(_) => false,
        Elem::Scalar { .. } | Elem::String | Elem::Bitset { .. } => true,
    };
    if !plain {
        return Err(Error::unsupported("member-wise STL of objects", type_name));
    }
    Ok(())
}

fn read_elem(elem: &Elem, r: &mut RBuffer<'_>, ctx: &Ctx, at: At<'_>) -> Result<Value> {
    let value = match elem {
        Elem::Scalar { kind, range } => read_scalar(r, *kind, range)?,
        Elem::String => Value::String(r.read_string()?),
        Elem::Class(class) => {
            let codec = class.resolve(ctx.registry())?;
            Value::Record(codec.read_record(r, ctx)?)
        }
        Elem::Seq { elem, .. } => {
            let n = ctx.len(i64::from(r.read_i32()?), at)?;
            let mut items = Vec::with_capacity(n.min(r.remaining()));
            for _ in 0..n {
                items.push(read_elem(elem, r, ctx, at)?);
            }
            Value::Array(items)
        }
        Elem::Map {
            type_name,
            key,
            key_name,
            key_header,
            value,
            value_name,
            value_header,
        } => {
            let hdr = r.read_version()?;
            skip_member_wise(&hdr, elem, r, type_name)?;
            let n = ctx.len(i64::from(r.read_i32()?), at)?;
            let keys = read_block(key, key_name, *key_header, n, r, ctx, at)?;
            let values = read_block(value, value_name, *value_header, n, r, ctx, at)?;
            r.check_header(&hdr, type_name)?;
            Value::Map(keys.into_iter().zip(values).collect())
        }
        Elem::Bitset { nbits } => {
            let n = ctx.len(i64::from(r.read_i32()?), at)?;
            if n != *nbits {
                return Err(at.length(*nbits, n).into());
            }
            Value::Bits(r.read_bitset(n)?)
        }
        Elem::Pointer(class) => read_pointer(class, r, ctx)?,
    };
    Ok(value)
}

/// Contiguous key or value block of a map.
fn read_block(
    elem: &Elem,
    name: &str,
    header: Option<i16>,
    n: usize,
    r: &mut RBuffer<'_>,
    ctx: &Ctx,
    at: At<'_>,
) -> Result<Vec<Value>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let hdr = match header {
        Some(_) => Some(r.read_version()?),
        None => None,
    };
    let mut items = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        items.push(read_elem(elem, r, ctx, at)?);
    }
    if let Some(hdr) = hdr {
        r.check_header(&hdr, name)?;
    }
    Ok(items)
}

fn read_pointer(class: &ClassRef, r: &mut RBuffer<'_>, ctx: &Ctx) -> Result<Value> {
    let value = match r.read_object_tag()? {
        ObjectTag::Null => Value::Pointer(None),
        ObjectTag::Ref(obj) => Value::Pointer(Some(Box::new(obj))),
        ObjectTag::Inline { class: name, beg, bcnt } => {
            let codec = if name == class.name {
                class.resolve(ctx.registry())?
            } else {
                lookup(ctx, &name, class.mode)?
            };
            let obj = Value::Record(codec.read_record(r, ctx)?);
            r.end_object(&name, beg, bcnt, obj.clone())?;
            Value::Pointer(Some(Box::new(obj)))
        }
    };
    Ok(value)
}

fn read_scalar(r: &mut RBuffer<'_>, kind: ScalarKind, range: &FloatRange) -> WireResult<Value> {
    Ok(match kind {
        ScalarKind::Bool => Value::Bool(r.read_bool()?),
        ScalarKind::Char => Value::I8(r.read_i8()?),
        ScalarKind::Short => Value::I16(r.read_i16()?),
        ScalarKind::Int | ScalarKind::Counter => Value::I32(r.read_i32()?),
        ScalarKind::Long | ScalarKind::Long64 => Value::I64(r.read_i64()?),
        ScalarKind::UChar => Value::U8(r.read_u8()?),
        ScalarKind::UShort => Value::U16(r.read_u16()?),
        ScalarKind::UInt | ScalarKind::Bits => Value::U32(r.read_u32()?),
        ScalarKind::ULong | ScalarKind::ULong64 => Value::U64(r.read_u64()?),
        ScalarKind::Float => Value::F32(r.read_f32()?),
        ScalarKind::Double => Value::F64(r.read_f64()?),
        ScalarKind::Float16 => Value::F32(r.read_float16(range)?),
        ScalarKind::Double32 => Value::F64(r.read_double32(range)?),
    })
}

fn write_elem(elem: &Elem, value: &Value, w: &mut WBuffer, ctx: &Ctx, at: At<'_>) -> Result<()> {
    match elem {
        Elem::Scalar { kind, range } => write_scalar(w, *kind, range, value, at)?,
        Elem::String => match value {
            Value::String(s) => w.write_string(s),
            other => return Err(at.mismatch("string", other).into()),
        },
        Elem::Class(class) => {
            let codec = class.resolve(ctx.registry())?;
            let fields = codec.conform(record_of(value, at)?)?;
            codec.write_class(w, &fields, ctx)?;
        }
        Elem::Seq { elem, .. } => {
            let items = array_of(value, at)?;
            w.write_i32(len_i32(items.len(), at)?);
            for item in items {
                write_elem(elem, item, w, ctx, at)?;
            }
        }
        Elem::Map {
            key,
            key_header,
            value: val,
            value_header,
            ..
        } => {
            let entries = match value {
                Value::Map(entries) => entries,
                other => return Err(at.mismatch("map", other).into()),
            };
            let hdr = w.write_header(STL_VERSION);
            w.write_i32(len_i32(entries.len(), at)?);
            if !entries.is_empty() {
                let block = key_header.map(|v| w.write_header(v));
                for (k, _) in entries {
                    write_elem(key, k, w, ctx, at)?;
                }
                if let Some(block) = block {
                    w.set_header(&block)?;
                }
                let block = value_header.map(|v| w.write_header(v));
                for (_, v) in entries {
                    write_elem(val, v, w, ctx, at)?;
                }
                if let Some(block) = block {
                    w.set_header(&block)?;
                }
            }
            w.set_header(&hdr)?;
        }
        Elem::Bitset { nbits } => {
            let bits = match value {
                Value::Bits(bits) => bits,
                other => return Err(at.mismatch("bits", other).into()),
            };
            if bits.len() != *nbits {
                return Err(at.length(*nbits, bits.len()).into());
            }
            w.write_i32(len_i32(bits.len(), at)?);
            w.write_bitset(bits);
        }
        Elem::Pointer(class) => write_pointer(class, value, w, ctx, at)?,
    }
    Ok(())
}

fn write_pointer(
    class: &ClassRef,
    value: &Value,
    w: &mut WBuffer,
    ctx: &Ctx,
    at: At<'_>,
) -> Result<()> {
    let obj = match value {
        Value::Pointer(None) | Value::Null => {
            w.write_null_object();
            return Ok(());
        }
        Value::Pointer(Some(obj)) => record_of(obj, at)?,
        other => return Err(at.mismatch("pointer", other).into()),
    };
    let codec = if obj.class == class.name {
        class.resolve(ctx.registry())?
    } else {
        lookup(ctx, &obj.class, class.mode)?
    };
    let fields = codec.conform(obj)?;
    let mark = w.begin_object(&codec.class);
    codec.write_class(w, &fields, ctx)?;
    w.end_object(mark)?;
    Ok(())
}

fn write_scalar(
    w: &mut WBuffer,
    kind: ScalarKind,
    range: &FloatRange,
    value: &Value,
    at: At<'_>,
) -> WireResult<()> {
    match (kind, value) {
        (ScalarKind::Bool, Value::Bool(v)) => w.write_bool(*v),
        (ScalarKind::Char, Value::I8(v)) => w.write_i8(*v),
        (ScalarKind::Short, Value::I16(v)) => w.write_i16(*v),
        (ScalarKind::Int | ScalarKind::Counter, Value::I32(v)) => w.write_i32(*v),
        (ScalarKind::Long | ScalarKind::Long64, Value::I64(v)) => w.write_i64(*v),
        (ScalarKind::UChar, Value::U8(v)) => w.write_u8(*v),
        (ScalarKind::UShort, Value::U16(v)) => w.write_u16(*v),
        (ScalarKind::UInt | ScalarKind::Bits, Value::U32(v)) => w.write_u32(*v),
        (ScalarKind::ULong | ScalarKind::ULong64, Value::U64(v)) => w.write_u64(*v),
        (ScalarKind::Float, Value::F32(v)) => w.write_f32(*v),
        (ScalarKind::Double, Value::F64(v)) => w.write_f64(*v),
        (ScalarKind::Float16, Value::F32(v)) => w.write_float16(*v, range),
        (ScalarKind::Double32, Value::F64(v)) => w.write_double32(*v, range),
        (kind, other) => return Err(at.mismatch(kind.type_name(), other)),
    }
    Ok(())
}

fn blank_elem(elem: &Elem, ctx: &Ctx, depth: usize) -> Value {
    match elem {
        Elem::Scalar { kind, .. } => Value::zero(*kind),
        Elem::String => Value::String(String::new()),
        Elem::Class(class) => match class.resolve(ctx.registry()) {
            Ok(codec) if depth < MAX_BLANK_DEPTH => Value::Record(codec.blank(ctx, depth + 1)),
            _ => Value::Null,
        },
        Elem::Seq { .. } => Value::Array(Vec::new()),
        Elem::Map { .. } => Value::Map(Vec::new()),
        Elem::Bitset { nbits } => Value::Bits(vec![false; *nbits]),
        Elem::Pointer(_) => Value::Pointer(None),
    }
}

fn array_of<'a>(value: &'a Value, at: At<'_>) -> WireResult<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(at.mismatch("array", other)),
    }
}

fn record_of<'a>(value: &'a Value, at: At<'_>) -> WireResult<&'a Record> {
    match value {
        Value::Record(rec) => Ok(rec),
        other => Err(at.mismatch("record", other)),
    }
}

fn u32_of(value: &Value, at: At<'_>) -> WireResult<u32> {
    value.as_u32().ok_or_else(|| at.mismatch("u32", value))
}

fn len_i32(n: usize, at: At<'_>) -> WireResult<i32> {
    i32::try_from(n).map_err(|_| WireError::Limit {
        context: at.context(),
        value: n as i64,
        max: i32::MAX as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compile;
    use crate::descriptor::{ClassDescriptorBuilder, FieldDescriptor};
    use crate::value::IntoValue;

    fn codec_for(reg: &Registry, desc: ClassDescriptor) -> Arc<Codec> {
        let desc = reg.add(desc).expect("registration");
        compile(reg, &desc, StreamMode::ObjectWise).expect("codec")
    }

    fn roundtrip(codec: &Codec, rec: &Record) -> (Vec<u8>, Record) {
        let mut w = WBuffer::new();
        let n = codec.encode(&mut w, rec).expect("encode");
        assert_eq!(n, w.len());
        let bytes = w.into_bytes();
        let mut r = RBuffer::new(&bytes);
        let out = codec.read(&mut r).expect("decode");
        assert!(r.is_eof());
        (bytes, out)
    }

    #[test]
    fn test_header_layout() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("S", 3)
                .field(FieldDescriptor::scalar("i", "", ScalarKind::Int))
                .build()
                .expect("S"),
        );
        let rec = Record::new("S").with("i", -132i32);
        let (bytes, out) = roundtrip(&codec, &rec);
        // byte count 6 | mask, version 3, payload
        assert_eq!(bytes, [0x40, 0, 0, 6, 0, 3, 0xff, 0xff, 0xff, 0x7c]);
        assert_eq!(out.get("i"), Some(&Value::I32(-132)));
    }

    #[test]
    fn test_scalar_kinds_roundtrip() {
        let reg = Registry::with_builtins();
        let kinds = [
            ("b", ScalarKind::Bool, Value::Bool(true)),
            ("c", ScalarKind::Char, Value::I8(-7)),
            ("s", ScalarKind::Short, Value::I16(-300)),
            ("l", ScalarKind::Long, Value::I64(-1 << 40)),
            ("uc", ScalarKind::UChar, Value::U8(200)),
            ("us", ScalarKind::UShort, Value::U16(60000)),
            ("ui", ScalarKind::UInt, Value::U32(4_000_000_000)),
            ("ul", ScalarKind::ULong64, Value::U64(u64::MAX)),
            ("bits", ScalarKind::Bits, Value::U32(0x0300_0000)),
            ("f", ScalarKind::Float, Value::F32(1.5)),
            ("d", ScalarKind::Double, Value::F64(-2.25)),
            ("n", ScalarKind::Counter, Value::I32(9)),
        ];
        let desc = ClassDescriptorBuilder::new("All", 1)
            .fields(kinds.iter().map(|(n, k, _)| FieldDescriptor::scalar(*n, "", *k)))
            .build()
            .expect("All");
        let codec = codec_for(&reg, desc);
        let mut rec = Record::new("All");
        for (n, _, v) in &kinds {
            rec.set(n, v.clone());
        }
        let (_, out) = roundtrip(&codec, &rec);
        assert_eq!(out, rec);
    }

    #[test]
    fn test_compressed_floats_quantize() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("Q", 1)
                .field(FieldDescriptor::scalar("d", "[0,100,16]", ScalarKind::Double32))
                .field(FieldDescriptor::scalar("h", "[0,10]", ScalarKind::Float16))
                .field(FieldDescriptor::scalar("p", "", ScalarKind::Double32))
                .build()
                .expect("Q"),
        );
        let rec = Record::new("Q").with("d", 42.123).with("h", 2.5f32).with("p", 0.1);
        let (bytes, out) = roundtrip(&codec, &rec);
        // header, two quantized u32 and one plain f32
        assert_eq!(bytes.len(), 6 + 4 + 4 + 4);
        let d = out.get_as::<f64>("d").expect("d");
        assert!((d - 42.123).abs() < 100.0 / 65535.0);
        assert!((out.get_as::<f32>("h").expect("h") - 2.5).abs() < 1e-3);
        assert_eq!(out.get_as::<f64>("p").expect("p"), f64::from(0.1f32));

        // a second pass is exact: quantization is idempotent
        let (_, again) = roundtrip(&codec, &out);
        assert_eq!(again, out);
    }

    #[test]
    fn test_encode_type_mismatch() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("S", 1)
                .field(FieldDescriptor::scalar("i", "", ScalarKind::Int))
                .build()
                .expect("S"),
        );
        let rec = Record::new("S").with("i", 1i64);
        match codec.encode(&mut WBuffer::new(), &rec) {
            Err(Error::Wire(WireError::TypeMismatch { context, expected, found })) => {
                assert_eq!(context, "S::i");
                assert_eq!(expected, "int");
                assert_eq!(found, "i64");
            }
            other => panic!("Expected TypeMismatch, got {:?}", other),
        }

        let rec = Record::new("T").with("i", 1i32);
        assert!(codec.encode(&mut WBuffer::new(), &rec).is_err());
    }

    #[test]
    fn test_version_mismatch() {
        let reg = Registry::with_builtins();
        let v1 = codec_for(
            &reg,
            ClassDescriptorBuilder::new("S", 1)
                .field(FieldDescriptor::scalar("i", "", ScalarKind::Int))
                .build()
                .expect("S1"),
        );
        let v2 = codec_for(
            &reg,
            ClassDescriptorBuilder::new("S", 2)
                .field(FieldDescriptor::scalar("i", "", ScalarKind::Int))
                .build()
                .expect("S2"),
        );
        let mut w = WBuffer::new();
        v1.encode(&mut w, &v1.new_record()).expect("encode");
        let bytes = w.into_bytes();
        match v2.read(&mut RBuffer::new(&bytes)) {
            Err(Error::Wire(WireError::VersionMismatch { class, expected, actual })) => {
                assert_eq!(class, "S");
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_accepted_for_foreign_version() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("F", 2)
                .field(FieldDescriptor::scalar("i", "", ScalarKind::Int))
                .build()
                .expect("F"),
        );
        let mut w = WBuffer::new();
        let hdr = w.write_header(0);
        w.write_u32(codec.checksum());
        w.write_i32(5);
        w.set_header(&hdr).expect("header");
        let bytes = w.into_bytes();
        let rec = codec.read(&mut RBuffer::new(&bytes)).expect("checksum match");
        assert_eq!(rec.get("i"), Some(&Value::I32(5)));

        let mut bad = bytes.clone();
        bad[6] ^= 0xff;
        assert!(matches!(
            codec.read(&mut RBuffer::new(&bad)),
            Err(Error::Wire(WireError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn test_stl_members() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("C", 1)
                .field(FieldDescriptor::stl("v", "", "vector<vector<short> >").expect("vv"))
                .field(FieldDescriptor::stl("s", "", "set<string>").expect("set"))
                .field(FieldDescriptor::stl("b", "", "bitset<10>").expect("bitset"))
                .field(FieldDescriptor::std_string("name", ""))
                .build()
                .expect("C"),
        );
        let bits: Vec<bool> = (0..10).map(|i| i % 3 == 0).collect();
        let rec = Record::new("C")
            .with(
                "v",
                Value::Array(vec![
                    Value::Array(vec![Value::I16(1), Value::I16(2)]),
                    Value::Array(vec![]),
                ]),
            )
            .with("s", Value::Array(vec!["b".into(), "a".into(), "b".into()]))
            .with("b", Value::Bits(bits))
            .with("name", "calo");
        let (_, out) = roundtrip(&codec, &rec);
        // sets come back in wire order, duplicates kept
        assert_eq!(out, rec);
    }

    #[test]
    fn test_bitset_length_checked() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("B", 1)
                .field(FieldDescriptor::stl("b", "", "bitset<4>").expect("bitset"))
                .build()
                .expect("B"),
        );
        let rec = Record::new("B").with("b", Value::Bits(vec![true; 3]));
        match codec.encode(&mut WBuffer::new(), &rec) {
            Err(Error::Wire(WireError::LengthMismatch { expected, actual, .. })) => {
                assert_eq!((expected, actual), (4, 3));
            }
            other => panic!("Expected LengthMismatch, got {:?}", other),
        }

        // the bit count on the wire must match bitset<4> too
        let rec = Record::new("B").with("b", Value::Bits(vec![true, false, true, true]));
        let (mut bytes, out) = roundtrip(&codec, &rec);
        assert_eq!(out, rec);
        // class header 6, container header 6, bit count, one byte of bits
        assert_eq!(&bytes[12..], [0, 0, 0, 4, 0b1101]);
        bytes[15] = 8;
        match codec.read(&mut RBuffer::new(&bytes)) {
            Err(Error::Wire(WireError::LengthMismatch { class, field, expected, actual })) => {
                assert_eq!((class.as_str(), field.as_str()), ("B", "b"));
                assert_eq!((expected, actual), (4, 8));
            }
            other => panic!("Expected LengthMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_null_and_back_reference() {
        let reg = Registry::with_builtins();
        codec_for(
            &reg,
            ClassDescriptorBuilder::new("Hit", 1)
                .field(FieldDescriptor::scalar("e", "", ScalarKind::Float))
                .build()
                .expect("Hit"),
        );
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("Pair", 1)
                .field(FieldDescriptor::object_pointer("a", "", "Hit"))
                .field(FieldDescriptor::object_pointer("b", "", "Hit"))
                .field(FieldDescriptor::object_pointer("c", "", "Hit"))
                .build()
                .expect("Pair"),
        );
        let hit = |e: f32| {
            Value::Pointer(Some(Box::new(Value::Record(Record::new("Hit").with("e", e)))))
        };
        let rec = Record::new("Pair")
            .with("a", hit(1.0))
            .with("b", Value::Pointer(None))
            .with("c", hit(2.0));
        let (bytes, out) = roundtrip(&codec, &rec);
        assert_eq!(out, rec);
        // the second Hit refers back to the first class tag
        // header 6, a: 4 + 4 + "Hit\0" + 10, b: 4, c: byte count then tag
        let tag = u32::from_be_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        assert_eq!(tag, (10 + crate::rbytes::MAP_OFFSET) | crate::rbytes::CLASS_MASK);
    }

    #[test]
    fn test_decode_field_alone() {
        let reg = Registry::with_builtins();
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("S", 1)
                .field(FieldDescriptor::scalar("a", "", ScalarKind::Short))
                .field(FieldDescriptor::tstring("t", ""))
                .build()
                .expect("S"),
        );
        assert_eq!(codec.field_count(), 2);
        let rec = Record::new("S").with("a", 3i16).with("t", "x");
        let mut w = WBuffer::new();
        assert_eq!(codec.encode_field(1, &mut w, &rec).expect("field"), 2);
        let bytes = w.into_bytes();
        let mut target = codec.new_record();
        codec
            .decode_field(1, &mut RBuffer::new(&bytes), &mut target)
            .expect("field decode");
        assert_eq!(target.get("t"), Some(&Value::String("x".into())));
        assert_eq!(target.get("a"), Some(&Value::I16(0)));
        assert!(codec.decode_field(2, &mut RBuffer::new(&bytes), &mut target).is_err());
    }

    #[test]
    fn test_collection_limit() {
        let reg = Registry::with_config(CodecConfig {
            max_collection_len: 4,
            ..CodecConfig::default()
        });
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("V", 1)
                .field(FieldDescriptor::stl("v", "", "vector<int>").expect("vec"))
                .build()
                .expect("V"),
        );
        let rec = Record::new("V").with("v", vec![1i32; 5].into_value());
        let mut w = WBuffer::new();
        codec.encode(&mut w, &rec).expect("encode is not limited");
        let bytes = w.into_bytes();
        match codec.read(&mut RBuffer::new(&bytes)) {
            Err(Error::Wire(WireError::Limit { value, max, .. })) => {
                assert_eq!((value, max), (5, 4));
            }
            other => panic!("Expected Limit, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_array_limits() {
        // dimensions whose product overflows i32
        match ClassDescriptorBuilder::new("Huge", 1)
            .field(FieldDescriptor::fixed_array("m", "", ScalarKind::UChar, &[65536, 65536]))
            .build()
        {
            Err(SchemaError::InvalidDescriptor { class, .. }) => assert_eq!(class, "Huge"),
            other => panic!("Expected InvalidDescriptor, got {:?}", other.map(|_| ())),
        }
        assert!(ClassDescriptorBuilder::new("Neg", 1)
            .field(FieldDescriptor::fixed_array("m", "", ScalarKind::UChar, &[2, -3]))
            .build()
            .is_err());

        // representable, but larger than the collection limit
        let reg = Registry::new();
        let desc = reg
            .add(
                ClassDescriptorBuilder::new("Big", 1)
                    .field(FieldDescriptor::fixed_array(
                        "m",
                        "",
                        ScalarKind::UChar,
                        &[46340, 46340],
                    ))
                    .build()
                    .expect("Big"),
            )
            .expect("registration");
        match compile(&reg, &desc, StreamMode::ObjectWise) {
            Err(Error::Schema(SchemaError::InvalidDescriptor { class, .. })) => {
                assert_eq!(class, "Big");
            }
            other => panic!("Expected InvalidDescriptor, got {:?}", other.map(|_| ())),
        }

        // a short payload fails without allocating the whole array
        let codec = codec_for(
            &reg,
            ClassDescriptorBuilder::new("Mid", 1)
                .field(FieldDescriptor::fixed_array("m", "", ScalarKind::UChar, &[4096, 4096]))
                .build()
                .expect("Mid"),
        );
        let bytes = [0x40, 0, 0, 6, 0, 1, 1, 2, 3, 4];
        match codec.read(&mut RBuffer::new(&bytes)) {
            Err(Error::Wire(WireError::UnexpectedEof { .. })) => {}
            other => panic!("Expected UnexpectedEof, got {:?}", other.map(|_| ())),
        }
    }

    fn node_codec(reg: &Registry) -> Arc<Codec> {
        codec_for(
            reg,
            ClassDescriptorBuilder::new("Node", 1)
                .field(FieldDescriptor::scalar("v", "", ScalarKind::Int))
                .field(FieldDescriptor::object_pointer("next", "", "Node"))
                .build()
                .expect("Node"),
        )
    }

    /// Linked list of `n` nodes, outermost first.
    fn chain(n: usize) -> Record {
        let mut node = Record::new("Node").with("v", 0i32).with("next", Value::Pointer(None));
        for i in 1..n {
            let next = Value::Pointer(Some(Box::new(Value::Record(node))));
            node = Record::new("Node").with("v", i as i32).with("next", next);
        }
        node
    }

    #[test]
    fn test_nesting_depth_limit() {
        let deep = Registry::new();
        let bytes = {
            let codec = node_codec(&deep);
            let mut w = WBuffer::new();
            codec.encode(&mut w, &chain(40)).expect("40 levels fit the default depth");
            w.into_bytes()
        };

        let shallow = Registry::with_config(CodecConfig {
            max_nesting_depth: 8,
            ..CodecConfig::default()
        });
        let codec = node_codec(&shallow);
        let (_, out) = roundtrip(&codec, &chain(8));
        assert_eq!(out, chain(8));

        match codec.read(&mut RBuffer::new(&bytes)) {
            Err(Error::Wire(WireError::Limit { context, value, max })) => {
                assert!(context.starts_with("Node"), "context {:?}", context);
                assert_eq!((value, max), (9, 8));
            }
            other => panic!("Expected Limit, got {:?}", other.map(|_| ())),
        }
        match codec.encode(&mut WBuffer::new(), &chain(9)) {
            Err(Error::Wire(WireError::Limit { value, max, .. })) => {
                assert_eq!((value, max), (9, 8));
            }
            other => panic!("Expected Limit, got {:?}", other),
        }

        // siblings do not accumulate depth
        let tight = Registry::with_config(CodecConfig {
            max_nesting_depth: 2,
            ..CodecConfig::default()
        });
        node_codec(&tight);
        let codec = codec_for(
            &tight,
            ClassDescriptorBuilder::new("Ends", 1)
                .field(FieldDescriptor::object_pointer("head", "", "Node"))
                .field(FieldDescriptor::object_pointer("tail", "", "Node"))
                .build()
                .expect("Ends"),
        );
        let node = |v: i32| {
            let rec = Record::new("Node").with("v", v).with("next", Value::Pointer(None));
            Value::Pointer(Some(Box::new(Value::Record(rec))))
        };
        let rec = Record::new("Ends").with("head", node(1)).with("tail", node(2));
        let (_, out) = roundtrip(&codec, &rec);
        assert_eq!(out, rec);
    }
}
