// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! On-disk record of a class descriptor (`TStreamerInfo`).
//!
//! Layout: `TStreamerInfo` (named, checksum, class version) followed by a
//! `TObjArray` of streamer elements, each written as an object pointer of
//! its element class.

use super::builder::ClassDescriptorBuilder;
use super::class::ClassDescriptor;
use super::field::{classify, CounterRef, Element, FieldDescriptor, FieldKind, RawExtra, MAX_DIMS};
use crate::error::{Error, Result, SchemaError, WireError, WireResult};
use crate::meta::{code, StlKind};
use crate::rbytes::{ObjectTag, RBuffer, WBuffer, IS_REFERENCED};
use crate::value::Value;

// ---- record versions

const STREAMER_INFO_VERSION: i16 = 9;
const OBJ_ARRAY_VERSION: i16 = 3;
const NAMED_VERSION: i16 = 1;
const OBJECT_VERSION: u16 = 1;
const ELEMENT_VERSION: i16 = 4;

/// `kNotDeleted | kIsOnHeap`, as set on freshly created objects.
const DEFAULT_OBJECT_BITS: u32 = 0x0300_0000;

fn element_version(class: &str) -> i16 {
    match class {
        "TStreamerBase" | "TStreamerSTL" => 3,
        "TStreamerObjectAnyPointer" => 1,
        _ => 2,
    }
}

/// Element class used to stream `field`.
fn element_class(field: &FieldDescriptor) -> &'static str {
    match &field.kind {
        FieldKind::Base { .. } => "TStreamerBase",
        FieldKind::Scalar(_) | FieldKind::Opaque => "TStreamerBasicType",
        FieldKind::FixedArray(Element::Scalar(_)) => "TStreamerBasicType",
        FieldKind::FixedArray(Element::String) | FieldKind::String => "TStreamerString",
        FieldKind::FixedArray(Element::Class(_)) => {
            if field.type_code == code::OFFSET_L + code::ANY {
                "TStreamerObjectAny"
            } else {
                "TStreamerObject"
            }
        }
        FieldKind::CountedArray { .. } => "TStreamerBasicPointer",
        FieldKind::LoopArray { .. } => "TStreamerLoop",
        FieldKind::Object { any: true, .. } => "TStreamerObjectAny",
        FieldKind::Object { any: false, .. } => "TStreamerObject",
        FieldKind::ObjectPointer { any: true, .. } => "TStreamerObjectAnyPointer",
        FieldKind::ObjectPointer { any: false, .. } => "TStreamerObjectPointer",
        FieldKind::Stl {
            container: StlKind::String,
            ..
        } => "TStreamerSTLstring",
        FieldKind::Stl { .. } => "TStreamerSTL",
    }
}

// ---- TObject / TNamed

pub(crate) fn write_tobject(w: &mut WBuffer, unique_id: u32, bits: u32) {
    w.write_u16(OBJECT_VERSION);
    w.write_u32(unique_id);
    // process id is not tracked: written as 0 when referenced
    w.write_u32(bits);
    if bits & IS_REFERENCED != 0 {
        w.write_u16(0);
    }
}

/// Returns `(fUniqueID, fBits)`.
pub(crate) fn read_tobject(r: &mut RBuffer<'_>) -> WireResult<(u32, u32)> {
    let _vers = r.skip_version()?;
    let id = r.read_u32()?;
    let bits = r.read_u32()?;
    if bits & IS_REFERENCED != 0 {
        let _pid = r.read_u16()?;
    }
    Ok((id, bits))
}

fn write_named(w: &mut WBuffer, name: &str, title: &str) -> Result<()> {
    let hdr = w.write_header(NAMED_VERSION);
    write_tobject(w, 0, DEFAULT_OBJECT_BITS);
    w.write_string(name);
    w.write_string(title);
    w.set_header(&hdr)?;
    Ok(())
}

fn read_named(r: &mut RBuffer<'_>) -> Result<(String, String)> {
    let hdr = r.read_version()?;
    read_tobject(r)?;
    let name = r.read_string()?;
    let title = r.read_string()?;
    r.check_header(&hdr, "TNamed")?;
    Ok((name, title))
}

// ---- marshal

impl ClassDescriptor {
    /// Write the descriptor's `TStreamerInfo` record.
    ///
    /// Returns the number of bytes written.
    pub fn marshal(&self, w: &mut WBuffer) -> Result<usize> {
        let hdr = w.write_header(STREAMER_INFO_VERSION);
        write_named(w, &self.name, &self.title)?;
        w.write_u32(self.checksum);
        w.write_i32(self.version);

        let arr = w.begin_object("TObjArray");
        let arr_hdr = w.write_header(OBJ_ARRAY_VERSION);
        write_tobject(w, 0, DEFAULT_OBJECT_BITS);
        w.write_string("");
        w.write_i32(self.fields.len() as i32);
        w.write_i32(0); // lower bound
        for field in &self.fields {
            let class = element_class(field);
            let mark = w.begin_object(class);
            write_element(w, class, field)?;
            w.end_object(mark)?;
        }
        w.set_header(&arr_hdr)?;
        w.end_object(arr)?;

        Ok(w.set_header(&hdr)?)
    }

    /// Read a `TStreamerInfo` record.
    ///
    /// Ranges are recomputed from the element titles; the recorded checksum
    /// is kept as is.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> Result<ClassDescriptor> {
        let hdr = r.read_version()?;
        let (name, title) = read_named(r)?;
        let checksum = r.read_u32()?;
        let version = r.read_i32()?;

        let mut fields = Vec::new();
        match r.read_object_tag()? {
            ObjectTag::Null => {}
            ObjectTag::Inline { class, beg, bcnt } if class == "TObjArray" => {
                read_obj_array(r, &name, &mut fields)?;
                r.end_object(&class, beg, bcnt, Value::Pointer(None))?;
            }
            ObjectTag::Inline { class, .. } => {
                return Err(invalid(
                    &name,
                    format!("expected TObjArray of elements, got {:?}", class),
                ));
            }
            ObjectTag::Ref(_) => {
                return Err(invalid(&name, "element list is a back-reference".into()));
            }
        }
        r.check_header(&hdr, "TStreamerInfo")?;

        let desc = ClassDescriptorBuilder::new(name, version)
            .title(title)
            .checksum(checksum)
            .fields(fields)
            .build()?;
        log::debug!(
            "[descriptor] read streamer info {} v{} ({} fields)",
            desc.name,
            desc.version,
            desc.fields.len()
        );
        Ok(desc)
    }
}

fn invalid(class: &str, reason: String) -> Error {
    SchemaError::InvalidDescriptor {
        class: class.to_string(),
        reason,
    }
    .into()
}

fn write_element(w: &mut WBuffer, class: &str, field: &FieldDescriptor) -> Result<()> {
    let hdr = w.write_header(element_version(class));
    if class == "TStreamerSTLstring" {
        let stl = w.write_header(element_version("TStreamerSTL"));
        write_element_body(w, field)?;
        write_element_extra(w, field);
        w.set_header(&stl)?;
    } else {
        write_element_body(w, field)?;
        write_element_extra(w, field);
    }
    w.set_header(&hdr)?;
    Ok(())
}

fn write_element_body(w: &mut WBuffer, field: &FieldDescriptor) -> Result<()> {
    let hdr = w.write_header(ELEMENT_VERSION);
    write_named(w, &field.name, &field.title)?;
    w.write_i32(field.type_code);
    w.write_i32(field.size);
    w.write_i32(field.array_len);
    w.write_i32(field.dims.len() as i32);
    for i in 0..MAX_DIMS {
        w.write_i32(field.dims.get(i).copied().unwrap_or(0));
    }
    w.write_string(&field.type_name);
    w.set_header(&hdr)?;
    Ok(())
}

fn write_element_extra(w: &mut WBuffer, field: &FieldDescriptor) {
    match &field.kind {
        FieldKind::Base { version } => w.write_i32(*version),
        FieldKind::CountedArray { counter, .. } | FieldKind::LoopArray { counter, .. } => {
            w.write_i32(counter.class_version);
            w.write_string(&counter.name);
            w.write_string(&counter.class);
        }
        FieldKind::Stl {
            container,
            contained,
        } => {
            w.write_i32(container.code());
            w.write_i32(*contained);
        }
        _ => {}
    }
}

// ---- unmarshal

fn read_obj_array(
    r: &mut RBuffer<'_>,
    owner: &str,
    fields: &mut Vec<FieldDescriptor>,
) -> Result<()> {
    let hdr = r.read_version()?;
    if hdr.vers > 2 {
        read_tobject(r)?;
    }
    if hdr.vers > 1 {
        let _name = r.read_string()?;
    }
    let n = r.read_i32()?;
    let _lower = r.read_i32()?;
    if n < 0 {
        return Err(WireError::Limit {
            context: format!("{} element count", owner),
            value: i64::from(n),
            max: i32::MAX as usize,
        }
        .into());
    }
    for _ in 0..n {
        match r.read_object_tag()? {
            ObjectTag::Null => {}
            ObjectTag::Inline { class, beg, bcnt } => {
                fields.push(read_element(r, &class)?);
                r.end_object(&class, beg, bcnt, Value::Pointer(None))?;
            }
            ObjectTag::Ref(_) => {
                return Err(invalid(owner, "element is a back-reference".into()));
            }
        }
    }
    r.check_header(&hdr, "TObjArray")?;
    Ok(())
}

/// Common `TStreamerElement` record.
struct RawElement {
    name: String,
    title: String,
    type_code: i32,
    size: i32,
    array_len: i32,
    dims: Vec<i32>,
    type_name: String,
}

fn read_element_body(r: &mut RBuffer<'_>) -> Result<RawElement> {
    let hdr = r.read_version()?;
    let (name, title) = read_named(r)?;
    let mut type_code = r.read_i32()?;
    let size = r.read_i32()?;
    let array_len = r.read_i32()?;
    let array_dim = r.read_i32()?;
    let count = if hdr.vers == 1 { r.read_i32()? } else { MAX_DIMS as i32 };
    if !(0..=MAX_DIMS as i32).contains(&count) || !(0..=MAX_DIMS as i32).contains(&array_dim) {
        return Err(invalid(&name, format!("invalid array dimensions ({}, {})", array_dim, count)));
    }
    let mut max_index = [0i32; MAX_DIMS];
    for slot in max_index.iter_mut().take(count as usize) {
        *slot = r.read_i32()?;
    }
    let type_name = r.read_string()?;
    if type_code == code::UCHAR && (type_name == "Bool_t" || type_name == "bool") {
        type_code = code::BOOL;
    }
    if hdr.vers == 3 {
        // xmin, xmax, factor: recomputed from the title
        for _ in 0..3 {
            r.read_f64()?;
        }
    }
    r.check_header(&hdr, "TStreamerElement")?;
    Ok(RawElement {
        name,
        title,
        type_code,
        size,
        array_len,
        dims: max_index[..array_dim as usize].to_vec(),
        type_name,
    })
}

fn read_element(r: &mut RBuffer<'_>, class: &str) -> Result<FieldDescriptor> {
    let hdr = r.read_version()?;
    let stl_hdr = if class == "TStreamerSTLstring" {
        Some(r.read_version()?)
    } else {
        None
    };
    let mut raw = read_element_body(r)?;
    let mut extra = RawExtra::default();
    match class {
        "TStreamerBase" => {
            if hdr.vers > 2 {
                extra.base_version = r.read_i32()?;
            }
        }
        "TStreamerBasicType" => {
            raw.size = basic_size(raw.type_code, raw.array_len).unwrap_or(raw.size);
        }
        "TStreamerBasicPointer" | "TStreamerLoop" => {
            let class_version = r.read_i32()?;
            let name = r.read_string()?;
            let owner = r.read_string()?;
            extra.counter = CounterRef {
                name,
                class: owner,
                class_version,
            };
        }
        "TStreamerSTL" | "TStreamerSTLstring" => {
            let mut stl_type = r.read_i32()?;
            extra.contained = r.read_i32()?;
            // set/multimap codes are swapped in some writers
            let tn = raw.type_name.as_str();
            let tn = tn.strip_prefix("std::").unwrap_or(tn);
            if stl_type == StlKind::MultiMap.code() || stl_type == StlKind::Set.code() {
                if tn.starts_with("set") {
                    stl_type = StlKind::Set.code();
                } else if tn.starts_with("multimap") {
                    stl_type = StlKind::MultiMap.code();
                }
            }
            extra.stl_type = stl_type;
        }
        _ => {}
    }
    if let Some(stl_hdr) = stl_hdr {
        r.check_header(&stl_hdr, "TStreamerSTL")?;
    }
    r.check_header(&hdr, class)?;

    let kind = classify(class, raw.type_code, &raw.type_name, &raw.name, extra)?;
    Ok(FieldDescriptor {
        name: raw.name,
        title: raw.title,
        type_name: raw.type_name,
        type_code: raw.type_code,
        size: raw.size,
        array_len: raw.array_len,
        dims: raw.dims,
        offset: 0,
        range: Default::default(),
        kind,
    })
}

/// In-memory size of a basic element, whole array included.
fn basic_size(type_code: i32, array_len: i32) -> Option<i32> {
    let base = if code::OFFSET_L < type_code && type_code < code::OFFSET_P {
        type_code - code::OFFSET_L
    } else {
        type_code
    };
    let size: i32 = match base {
        code::BOOL | code::UCHAR | code::CHAR => 1,
        code::USHORT | code::SHORT => 2,
        code::BITS | code::UINT | code::INT | code::COUNTER => 4,
        code::ULONG | code::ULONG64 | code::LONG | code::LONG64 => 8,
        code::FLOAT | code::FLOAT16 => 4,
        code::DOUBLE | code::DOUBLE32 => 8,
        code::CHAR_STAR => 8,
        _ => return None,
    };
    Some(if array_len > 0 { size.saturating_mul(array_len) } else { size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ScalarKind;

    fn event() -> ClassDescriptor {
        ClassDescriptorBuilder::new("Event", 4)
            .title("an event")
            .field(FieldDescriptor::base("TNamed", 1))
            .field(FieldDescriptor::scalar("N", "", ScalarKind::Int))
            .field(FieldDescriptor::counted_array("E", "[N] energies", ScalarKind::Double32, "N"))
            .field(FieldDescriptor::fixed_array("pos", "[3]", ScalarKind::Float, &[3]))
            .field(FieldDescriptor::tstring("tag", ""))
            .field(FieldDescriptor::object("p2", "", "P2"))
            .field(FieldDescriptor::object_pointer("next", "", "Event"))
            .field(FieldDescriptor::loop_array("hits", "[N]", "Hit", "N"))
            .field(FieldDescriptor::std_string("label", ""))
            .field(FieldDescriptor::stl("ids", "", "map<int,vector<float> >").expect("map"))
            .build()
            .expect("Event descriptor")
    }

    #[test]
    fn test_streamer_info_roundtrip() {
        let desc = event();
        let mut w = WBuffer::new();
        let n = desc.marshal(&mut w).expect("marshal should succeed");
        assert_eq!(n, w.len());

        let mut r = RBuffer::new(w.bytes());
        let back = ClassDescriptor::unmarshal(&mut r).expect("unmarshal should succeed");
        assert!(r.is_eof());
        assert_eq!(back, desc);
    }

    #[test]
    fn test_truncated_record_fails() {
        let mut w = WBuffer::new();
        event().marshal(&mut w).expect("marshal should succeed");
        let bytes = &w.bytes()[..w.len() - 3];
        let mut r = RBuffer::new(bytes);
        let err = ClassDescriptor::unmarshal(&mut r).expect_err("truncated record");
        assert!(err.is_wire());
    }

    #[test]
    fn test_tobject_referenced_bit() {
        let mut w = WBuffer::new();
        write_tobject(&mut w, 7, DEFAULT_OBJECT_BITS | IS_REFERENCED);
        assert_eq!(w.len(), 2 + 4 + 4 + 2);
        let mut r = RBuffer::new(w.bytes());
        let (id, bits) = read_tobject(&mut r).expect("TObject");
        assert_eq!(id, 7);
        assert_eq!(bits & IS_REFERENCED, IS_REFERENCED);
        assert!(r.is_eof());
    }

    #[test]
    fn test_basic_size_recomputed() {
        assert_eq!(basic_size(code::OFFSET_L + code::DOUBLE, 3), Some(24));
        assert_eq!(basic_size(code::SHORT, 0), Some(2));
        assert_eq!(basic_size(code::ANY, 0), None);
    }
}
