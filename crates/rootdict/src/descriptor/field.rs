// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field descriptors (one per streamed member).

use super::range::FloatRange;
use super::template::parse_template;
use crate::error::SchemaError;
use crate::meta::{code, type_name_to_kind, Builtin, ScalarKind, StlKind};

/// Maximum number of fixed array dimensions.
pub const MAX_DIMS: usize = 5;

/// Element of a fixed or counted array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Element {
    Scalar(ScalarKind),
    /// `TString` / `char*` element.
    String,
    /// Nested class element (`TObject` and `TNamed` included).
    Class(String),
}

impl From<ScalarKind> for Element {
    fn from(kind: ScalarKind) -> Self {
        Element::Scalar(kind)
    }
}

impl Element {
    /// Raw type code of one element.
    pub fn code(&self) -> i32 {
        match self {
            Element::Scalar(kind) => kind.code(),
            Element::String => code::TSTRING,
            Element::Class(name) => match name.as_str() {
                "TObject" => code::TOBJECT,
                "TNamed" => code::TNAMED,
                _ => code::ANY,
            },
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Element::Scalar(kind) => kind.type_name(),
            Element::String => "TString",
            Element::Class(name) => name,
        }
    }

    fn size(&self) -> i32 {
        match self {
            Element::Scalar(kind) => kind.size() as i32,
            Element::String => 24,
            Element::Class(_) => 0,
        }
    }
}

/// Integer member whose live value sizes a counted or loop array.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterRef {
    /// Counter member name.
    pub name: String,
    /// Class declaring the counter (filled with the owning class when empty).
    pub class: String,
    pub class_version: i32,
}

impl CounterRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Shape of a streamed member.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldKind {
    /// Base class; the field name is the base class name.
    Base { version: i32 },
    Scalar(ScalarKind),
    /// `T x[d0][d1]...`, flattened.
    FixedArray(Element),
    /// `T* x; //[counter]`.
    CountedArray { element: Element, counter: CounterRef },
    /// `C* x; //[counter]` with whole objects as elements.
    LoopArray { class: String, counter: CounterRef },
    /// `TString` member.
    String,
    /// Embedded object; `any` is false for `TObject`-derived classes.
    Object { class: String, any: bool },
    /// Pointer to an object, streamed with an object tag.
    ObjectPointer { class: String, any: bool },
    /// Standard container; `contained` is the raw code of its elements.
    Stl { container: StlKind, contained: i32 },
    /// A type code this crate does not transcode (schema evolution,
    /// legacy char, skipped members, unknown codes).
    Opaque,
}

/// Element count of a fixed array: `None` when a dimension is not positive
/// or the product overflows `i32`.
pub(crate) fn dims_len(dims: &[i32]) -> Option<i32> {
    dims.iter()
        .try_fold(1i32, |acc, &d| if d > 0 { acc.checked_mul(d) } else { None })
}

/// Schema entry for one member.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDescriptor {
    /// Member name (class name for bases).
    pub name: String,
    /// Free-text comment; may carry `[N]`, `[counter]` or `[min,max,nbits]`.
    pub title: String,
    /// Declared C++ type name.
    pub type_name: String,
    /// Raw on-disk type code.
    pub type_code: i32,
    /// Size in bytes, whole array included.
    pub size: i32,
    /// Total number of fixed array elements (0 when not an array).
    pub array_len: i32,
    /// Fixed array dimensions, at most [`MAX_DIMS`].
    pub dims: Vec<i32>,
    /// Logical index of the member in its class.
    pub offset: usize,
    /// Compressed float range parsed from the title.
    pub range: FloatRange,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        type_name: impl Into<String>,
        kind: FieldKind,
        type_code: i32,
        size: i32,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            type_name: type_name.into(),
            type_code,
            size,
            array_len: 0,
            dims: Vec::new(),
            offset: 0,
            range: FloatRange::default(),
            kind,
        }
    }

    /// Base class entry.
    pub fn base(class: impl Into<String>, version: i32) -> Self {
        let class = class.into();
        let type_code = match class.as_str() {
            "TObject" => code::TOBJECT,
            "TNamed" => code::TNAMED,
            _ => code::BASE,
        };
        Self::new(class, "", "BASE", FieldKind::Base { version }, type_code, 0)
    }

    pub fn scalar(name: impl Into<String>, title: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(
            name,
            title,
            kind.type_name(),
            FieldKind::Scalar(kind),
            kind.code(),
            kind.size() as i32,
        )
    }

    /// Fixed-size array, flattened over all dimensions.
    pub fn fixed_array(
        name: impl Into<String>,
        title: impl Into<String>,
        element: impl Into<Element>,
        dims: &[i32],
    ) -> Self {
        let element = element.into();
        // overflowing dimensions leave array_len at 0; build() rejects them
        let len = dims_len(dims).unwrap_or(0);
        let mut field = Self::new(
            name,
            title,
            element.type_name().to_string(),
            FieldKind::FixedArray(element.clone()),
            code::OFFSET_L + element.code(),
            element.size().saturating_mul(len),
        );
        field.array_len = len;
        field.dims = dims.to_vec();
        field
    }

    /// Variable-length array sized by the live value of `counter`.
    pub fn counted_array(
        name: impl Into<String>,
        title: impl Into<String>,
        element: impl Into<Element>,
        counter: impl Into<String>,
    ) -> Self {
        let element = element.into();
        let type_code = match &element {
            Element::String => code::OFFSET_P + code::CHAR_STAR,
            other => code::OFFSET_P + other.code(),
        };
        let type_name = format!("{}*", element.type_name());
        let size = element.size();
        Self::new(
            name,
            title,
            type_name,
            FieldKind::CountedArray {
                element,
                counter: CounterRef::new(counter),
            },
            type_code,
            size,
        )
    }

    /// Variable-length array of whole `class` objects sized by `counter`.
    pub fn loop_array(
        name: impl Into<String>,
        title: impl Into<String>,
        class: impl Into<String>,
        counter: impl Into<String>,
    ) -> Self {
        let class = class.into();
        Self::new(
            name,
            title,
            format!("{}*", class),
            FieldKind::LoopArray {
                class,
                counter: CounterRef::new(counter),
            },
            code::STREAM_LOOP,
            8,
        )
    }

    pub fn tstring(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(name, title, "TString", FieldKind::String, code::TSTRING, 24)
    }

    pub fn std_string(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(
            name,
            title,
            "string",
            FieldKind::Stl {
                container: StlKind::String,
                contained: code::STL_STRING,
            },
            code::STL_STRING,
            32,
        )
    }

    /// Embedded object of `class`.
    pub fn object(
        name: impl Into<String>,
        title: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        let class = class.into();
        let (type_code, any) = match class.as_str() {
            "TObject" => (code::TOBJECT, false),
            "TNamed" => (code::TNAMED, false),
            _ => (code::ANY, true),
        };
        Self::new(
            name,
            title,
            class.clone(),
            FieldKind::Object { class, any },
            type_code,
            0,
        )
    }

    /// Pointer to a `class` object (null allowed).
    pub fn object_pointer(
        name: impl Into<String>,
        title: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        let class = class.into();
        Self::new(
            name,
            title,
            format!("{}*", class),
            FieldKind::ObjectPointer { class, any: true },
            code::ANYP,
            8,
        )
    }

    /// Standard container member, e.g. `vector<float>` or `map<int,string>`.
    pub fn stl(
        name: impl Into<String>,
        title: impl Into<String>,
        type_name: &str,
    ) -> Result<Self, SchemaError> {
        let tmpl = parse_template(type_name)?;
        if tmpl.kind == StlKind::String {
            return Ok(Self::std_string(name, title));
        }
        // map elements are key/value pairs
        let contained = match type_name_to_kind(tmpl.element()) {
            _ if tmpl.kind.is_map() => code::OBJECT,
            Some(Builtin::Scalar(kind)) => kind.code(),
            Some(Builtin::StdString) => code::STL_STRING,
            Some(Builtin::TString) => code::TSTRING,
            Some(other) => other.code(),
            None => code::OBJECT,
        };
        Ok(Self::new(
            name,
            title,
            type_name.trim(),
            FieldKind::Stl {
                container: tmpl.kind,
                contained,
            },
            code::STL,
            24,
        ))
    }

    pub fn with_size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn is_base(&self) -> bool {
        matches!(self.kind, FieldKind::Base { .. })
    }

    /// Counter of a counted or loop array.
    pub fn counter(&self) -> Option<&CounterRef> {
        match &self.kind {
            FieldKind::CountedArray { counter, .. } | FieldKind::LoopArray { counter, .. } => {
                Some(counter)
            }
            _ => None,
        }
    }

    pub(crate) fn counter_mut(&mut self) -> Option<&mut CounterRef> {
        match &mut self.kind {
            FieldKind::CountedArray { counter, .. } | FieldKind::LoopArray { counter, .. } => {
                Some(counter)
            }
            _ => None,
        }
    }

    /// Scalar kind of the member itself, if it is a plain scalar.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            FieldKind::Scalar(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether the title carries a compressed float range.
    pub(crate) fn wants_range(&self) -> bool {
        match &self.kind {
            FieldKind::Scalar(kind)
            | FieldKind::FixedArray(Element::Scalar(kind))
            | FieldKind::CountedArray {
                element: Element::Scalar(kind),
                ..
            } => kind.is_compressed(),
            FieldKind::Stl { contained, .. } => {
                *contained == code::FLOAT16 || *contained == code::DOUBLE32
            }
            _ => false,
        }
    }
}

/// Classify a raw element record into a [`FieldKind`].
///
/// `element_class` is the streamer element class name (`TStreamerBase`,
/// `TStreamerSTL`, ...).
pub(crate) fn classify(
    element_class: &str,
    type_code: i32,
    type_name: &str,
    name: &str,
    extra: RawExtra,
) -> Result<FieldKind, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidDescriptor {
        class: name.to_string(),
        reason,
    };
    let kind = match element_class {
        "TStreamerBase" => FieldKind::Base {
            version: extra.base_version,
        },
        "TStreamerSTL" | "TStreamerSTLstring" => {
            let container = StlKind::from_code(extra.stl_type)
                .ok_or_else(|| invalid(format!("unknown STL container type {}", extra.stl_type)))?;
            FieldKind::Stl {
                container,
                contained: extra.contained,
            }
        }
        "TStreamerLoop" => FieldKind::LoopArray {
            class: type_name.trim_end_matches('*').to_string(),
            counter: extra.counter,
        },
        "TStreamerBasicPointer" => {
            match element_of(type_code - code::OFFSET_P, type_name.trim_end_matches('*')) {
                Some(element) => FieldKind::CountedArray {
                    element,
                    counter: extra.counter,
                },
                None => FieldKind::Opaque,
            }
        }
        "TStreamerString" if type_code == code::TSTRING => FieldKind::String,
        "TStreamerObject" | "TStreamerObjectAny" | "TStreamerString" | "TStreamerBasicType" => {
            match type_code {
                code::TSTRING => FieldKind::String,
                code::OBJECT | code::TOBJECT | code::TNAMED => FieldKind::Object {
                    class: type_name.to_string(),
                    any: false,
                },
                code::ANY => FieldKind::Object {
                    class: type_name.to_string(),
                    any: true,
                },
                c if (code::OFFSET_L..code::OFFSET_P).contains(&c) => {
                    match element_of(c - code::OFFSET_L, type_name) {
                        Some(element) => FieldKind::FixedArray(element),
                        None => FieldKind::Opaque,
                    }
                }
                c => match ScalarKind::from_code(c) {
                    Some(kind) => FieldKind::Scalar(kind),
                    None => FieldKind::Opaque,
                },
            }
        }
        "TStreamerObjectPointer" | "TStreamerObjectAnyPointer" => FieldKind::ObjectPointer {
            class: type_name.trim_end_matches('*').to_string(),
            any: matches!(type_code, code::ANYP | code::ANY_PP),
        },
        other => return Err(invalid(format!("unknown streamer element class {:?}", other))),
    };
    Ok(kind)
}

/// Element-class specific payload read alongside the common element record.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawExtra {
    pub base_version: i32,
    pub counter: CounterRef,
    pub stl_type: i32,
    pub contained: i32,
}

fn element_of(code_: i32, type_name: &str) -> Option<Element> {
    match code_ {
        code::TSTRING | code::CHAR_STAR => Some(Element::String),
        code::OBJECT | code::ANY | code::TOBJECT | code::TNAMED => {
            Some(Element::Class(type_name.to_string()))
        }
        c => ScalarKind::from_code(c).map(Element::Scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_array_shape() {
        let f = FieldDescriptor::fixed_array("m", "[2][3]", ScalarKind::Float, &[2, 3]);
        assert_eq!(f.type_code, code::OFFSET_L + code::FLOAT);
        assert_eq!(f.array_len, 6);
        assert_eq!(f.size, 24);
        assert_eq!(f.type_name, "float");
    }

    #[test]
    fn test_counted_array_codes() {
        let f = FieldDescriptor::counted_array("x", "[N]", ScalarKind::Double, "N");
        assert_eq!(f.type_code, code::OFFSET_P + code::DOUBLE);
        assert_eq!(f.type_name, "double*");
        assert_eq!(f.counter().map(|c| c.name.as_str()), Some("N"));

        let f = FieldDescriptor::counted_array("s", "[N]", Element::String, "N");
        assert_eq!(f.type_code, code::OFFSET_P + code::CHAR_STAR);
    }

    #[test]
    fn test_stl_contained_code() {
        let f = FieldDescriptor::stl("v", "", "vector<double>").expect("vector field");
        assert_eq!(
            f.kind,
            FieldKind::Stl {
                container: StlKind::Vector,
                contained: code::DOUBLE
            }
        );
        let f = FieldDescriptor::stl("m", "", "map<int,Hit>").expect("map field");
        assert_eq!(f.type_code, code::STL);
        assert_eq!(
            f.kind,
            FieldKind::Stl {
                container: StlKind::Map,
                contained: code::OBJECT
            }
        );
        let f = FieldDescriptor::stl("s", "", "std::string").expect("string field");
        assert_eq!(f.type_code, code::STL_STRING);
        assert!(FieldDescriptor::stl("bad", "", "vector<>").is_err());
    }

    #[test]
    fn test_classify_raw_elements() {
        let kind = classify(
            "TStreamerBasicType",
            code::OFFSET_L + code::INT,
            "int",
            "a",
            RawExtra::default(),
        )
        .expect("fixed array");
        assert_eq!(kind, FieldKind::FixedArray(Element::Scalar(ScalarKind::Int)));

        let kind = classify(
            "TStreamerBasicType",
            code::CONV + code::INT,
            "int",
            "a",
            RawExtra::default(),
        )
        .expect("conv element");
        assert_eq!(kind, FieldKind::Opaque);

        let kind = classify(
            "TStreamerObjectAnyPointer",
            code::ANYP,
            "Hit*",
            "h",
            RawExtra::default(),
        )
        .expect("pointer");
        assert_eq!(
            kind,
            FieldKind::ObjectPointer {
                class: "Hit".into(),
                any: true
            }
        );

        assert!(classify("TStreamerArtificial", 0, "x", "x", RawExtra::default()).is_err());
    }
}
