// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! C++/ROOT builtin type names.

use super::{code, ScalarKind};

/// What a builtin type name stands for on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Scalar(ScalarKind),
    /// `std::string`: plain length-prefixed string inside containers.
    StdString,
    /// `TString` / `char*`: length-prefixed string.
    TString,
    TObject,
    TNamed,
}

impl Builtin {
    /// Equivalent raw type code.
    pub fn code(self) -> i32 {
        match self {
            Builtin::Scalar(kind) => kind.code(),
            Builtin::StdString => code::STL_STRING,
            Builtin::TString => code::TSTRING,
            Builtin::TObject => code::TOBJECT,
            Builtin::TNamed => code::TNAMED,
        }
    }
}

/// C/C++ and ROOT typedef names with a fixed wire encoding.
///
/// Container key/value blocks made of these carry no version header
/// (`string` excepted).
const CXX_BUILTINS: &[(&str, Builtin)] = &[
    ("bool", Builtin::Scalar(ScalarKind::Bool)),
    // C/C++ builtins
    ("unsigned", Builtin::Scalar(ScalarKind::UInt)),
    ("unsigned char", Builtin::Scalar(ScalarKind::UChar)),
    ("unsigned short", Builtin::Scalar(ScalarKind::UShort)),
    ("unsigned int", Builtin::Scalar(ScalarKind::UInt)),
    ("unsigned long", Builtin::Scalar(ScalarKind::ULong)),
    ("char", Builtin::Scalar(ScalarKind::Char)),
    ("short", Builtin::Scalar(ScalarKind::Short)),
    ("int", Builtin::Scalar(ScalarKind::Int)),
    ("long", Builtin::Scalar(ScalarKind::Long)),
    ("float", Builtin::Scalar(ScalarKind::Float)),
    ("double", Builtin::Scalar(ScalarKind::Double)),
    ("string", Builtin::StdString),
    // ROOT builtins
    ("Bool_t", Builtin::Scalar(ScalarKind::Bool)),
    ("Byte_t", Builtin::Scalar(ScalarKind::UChar)),
    ("Char_t", Builtin::Scalar(ScalarKind::Char)),
    ("UChar_t", Builtin::Scalar(ScalarKind::UChar)),
    ("Short_t", Builtin::Scalar(ScalarKind::Short)),
    ("UShort_t", Builtin::Scalar(ScalarKind::UShort)),
    ("Int_t", Builtin::Scalar(ScalarKind::Int)),
    ("UInt_t", Builtin::Scalar(ScalarKind::UInt)),
    ("Seek_t", Builtin::Scalar(ScalarKind::Long64)),
    ("Long_t", Builtin::Scalar(ScalarKind::Long)),
    ("ULong_t", Builtin::Scalar(ScalarKind::ULong)),
    ("Long64_t", Builtin::Scalar(ScalarKind::Long64)),
    ("ULong64_t", Builtin::Scalar(ScalarKind::ULong64)),
    ("Float_t", Builtin::Scalar(ScalarKind::Float)),
    ("Float16_t", Builtin::Scalar(ScalarKind::Float16)),
    ("Double_t", Builtin::Scalar(ScalarKind::Double)),
    ("Double32_t", Builtin::Scalar(ScalarKind::Double32)),
    ("Version_t", Builtin::Scalar(ScalarKind::Short)),
    ("Option_t", Builtin::StdString),
    ("Ssiz_t", Builtin::Scalar(ScalarKind::Int)),
    ("Real_t", Builtin::Scalar(ScalarKind::Float)),
    ("Axis_t", Builtin::Scalar(ScalarKind::Double)),
    ("Stat_t", Builtin::Scalar(ScalarKind::Double)),
    ("Font_t", Builtin::Scalar(ScalarKind::Short)),
    ("Style_t", Builtin::Scalar(ScalarKind::Short)),
    ("Marker_t", Builtin::Scalar(ScalarKind::Short)),
    ("Width_t", Builtin::Scalar(ScalarKind::Short)),
    ("Color_t", Builtin::Scalar(ScalarKind::Short)),
    ("SCoord_t", Builtin::Scalar(ScalarKind::Short)),
    ("Coord_t", Builtin::Scalar(ScalarKind::Double)),
    ("Angle_t", Builtin::Scalar(ScalarKind::Float)),
    ("Size_t", Builtin::Scalar(ScalarKind::Float)),
];

/// Member of the C++/ROOT builtin table (the header-less element set).
pub fn is_builtin(name: &str) -> bool {
    CXX_BUILTINS.iter().any(|(n, _)| *n == name)
}

/// Builtin table lookup, without the well-known classes.
pub fn builtin_kind(name: &str) -> Option<Builtin> {
    CXX_BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// Resolve a type name to a builtin wire kind.
///
/// Covers the builtin table, `std::string`, `TString`, `char*` and the
/// well-known `TObject`/`TNamed` base classes. Containers and user classes
/// yield `None` and are resolved by the codec compiler.
pub fn type_name_to_kind(name: &str) -> Option<Builtin> {
    let name = name.trim();
    if let Some(kind) = builtin_kind(name) {
        return Some(kind);
    }
    match name {
        "std::string" => Some(Builtin::StdString),
        "TString" | "char*" | "const char*" => Some(Builtin::TString),
        "TObject" => Some(Builtin::TObject),
        "TNamed" => Some(Builtin::TNamed),
        "int8_t" => Some(Builtin::Scalar(ScalarKind::Char)),
        "int16_t" => Some(Builtin::Scalar(ScalarKind::Short)),
        "int32_t" => Some(Builtin::Scalar(ScalarKind::Int)),
        "int64_t" | "long long" => Some(Builtin::Scalar(ScalarKind::Long64)),
        "uint8_t" => Some(Builtin::Scalar(ScalarKind::UChar)),
        "uint16_t" => Some(Builtin::Scalar(ScalarKind::UShort)),
        "uint32_t" => Some(Builtin::Scalar(ScalarKind::UInt)),
        "uint64_t" | "unsigned long long" => Some(Builtin::Scalar(ScalarKind::ULong64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        assert!(is_builtin("int"));
        assert!(is_builtin("string"));
        assert!(is_builtin("Double32_t"));
        assert!(!is_builtin("TString"));
        assert!(!is_builtin("vector<int>"));
        assert_eq!(
            builtin_kind("Color_t"),
            Some(Builtin::Scalar(ScalarKind::Short))
        );
    }

    #[test]
    fn test_type_name_to_kind() {
        assert_eq!(
            type_name_to_kind(" Long64_t "),
            Some(Builtin::Scalar(ScalarKind::Long64))
        );
        assert_eq!(type_name_to_kind("std::string"), Some(Builtin::StdString));
        assert_eq!(type_name_to_kind("TString"), Some(Builtin::TString));
        assert_eq!(type_name_to_kind("TNamed"), Some(Builtin::TNamed));
        assert_eq!(type_name_to_kind("P2"), None);
        assert_eq!(Builtin::TObject.code(), code::TOBJECT);
    }
}
