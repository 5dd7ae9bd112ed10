// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Standard container template names (`vector<T>`, `map<K,V>`, ...).

use crate::error::SchemaError;
use crate::meta::StlKind;

/// A parsed container type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub kind: StlKind,
    /// Type arguments, trimmed, in declaration order (allocators and
    /// comparators included when spelled out).
    pub args: Vec<String>,
}

impl Template {
    /// First type argument (element type, or key type of maps).
    pub fn element(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }

    /// Mapped type of maps.
    pub fn value(&self) -> Option<&str> {
        if self.kind.is_map() {
            self.args.get(1).map(String::as_str)
        } else {
            None
        }
    }
}

/// Number of type arguments accepted per container kind.
fn arity(kind: StlKind) -> (usize, usize) {
    match kind {
        StlKind::Vector | StlKind::List | StlKind::Deque | StlKind::ForwardList => (1, 2),
        StlKind::Set | StlKind::MultiSet => (1, 3),
        StlKind::UnorderedSet | StlKind::UnorderedMultiSet => (1, 4),
        StlKind::Map | StlKind::MultiMap => (2, 4),
        StlKind::UnorderedMap | StlKind::UnorderedMultiMap => (2, 5),
        StlKind::Bitset => (1, 1),
        StlKind::String => (0, 0),
    }
}

/// Parse a container type name into its kind and type arguments.
///
/// ```
/// use rootdict::descriptor::parse_template;
/// use rootdict::meta::StlKind;
///
/// let t = parse_template("map<int,vector<pair<int,int> > >").expect("valid template");
/// assert_eq!(t.kind, StlKind::Map);
/// assert_eq!(t.args, ["int", "vector<pair<int,int> >"]);
/// ```
pub fn parse_template(type_name: &str) -> Result<Template, SchemaError> {
    let bad = |reason: &str| SchemaError::BadTemplate {
        type_name: type_name.to_string(),
        reason: reason.to_string(),
    };

    let kind = StlKind::from_type_name(type_name).ok_or_else(|| bad("not a container"))?;
    if kind == StlKind::String {
        return Ok(Template {
            kind,
            args: Vec::new(),
        });
    }

    let args = split_args(type_name).ok_or_else(|| bad("unbalanced brackets"))?;
    if args.iter().any(|a| a.is_empty()) {
        return Err(bad("empty type argument"));
    }
    let (min, max) = arity(kind);
    if args.len() < min || args.len() > max {
        return Err(SchemaError::BadTemplate {
            type_name: type_name.to_string(),
            reason: format!(
                "{} takes {} to {} type arguments, got {}",
                kind,
                min,
                max,
                args.len()
            ),
        });
    }
    Ok(Template { kind, args })
}

/// Split the outermost `<...>` argument list on top-level commas.
fn split_args(name: &str) -> Option<Vec<String>> {
    let name = name.trim();
    let open = name.find('<')?;
    if !name.ends_with('>') {
        return None;
    }
    let inner = &name[open + 1..name.len() - 1];

    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    args.push(inner[start..].trim().to_string());
    Some(args)
}

/// Canonical map type name; a space separates nested closing brackets.
pub fn map_type_name(key: &str, value: &str) -> String {
    if value.ends_with('>') {
        format!("map<{},{} >", key, value)
    } else {
        format!("map<{},{}>", key, value)
    }
}

/// Canonical sequence type name (`vector<T>`, `set<T>`, ...).
pub fn sequence_type_name(kind: StlKind, element: &str) -> String {
    if element.ends_with('>') {
        format!("{}<{} >", kind.template_name(), element)
    } else {
        format!("{}<{}>", kind.template_name(), element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sequences() {
        let t = parse_template("vector<float>").expect("vector");
        assert_eq!(t.kind, StlKind::Vector);
        assert_eq!(t.element(), "float");
        assert_eq!(t.value(), None);

        let t = parse_template("std::list<std::string, std::allocator<std::string> >")
            .expect("list with allocator");
        assert_eq!(t.kind, StlKind::List);
        assert_eq!(t.args.len(), 2);
        assert_eq!(t.element(), "std::string");
    }

    #[test]
    fn test_parse_nested_map() {
        let t = parse_template("map<int,vector<pair<int,int>>>").expect("nested map");
        assert_eq!(t.element(), "int");
        assert_eq!(t.value(), Some("vector<pair<int,int>>"));

        let t = parse_template("unordered_map<string,map<int,float>,hash<string>>")
            .expect("unordered map");
        assert_eq!(t.kind, StlKind::UnorderedMap);
        assert_eq!(t.args.len(), 3);
    }

    #[test]
    fn test_parse_bitset() {
        let t = parse_template("bitset<16>").expect("bitset");
        assert_eq!(t.kind, StlKind::Bitset);
        assert_eq!(t.element(), "16");
    }

    #[test]
    fn test_rejects_bad_templates() {
        for name in [
            "vector<>",
            "vector<int,,>",
            "vector<int,a,b>",
            "map<int>",
            "bitset<1,2>",
            "vector<vector<int>",
            "vector<int>>",
            "Event",
        ] {
            match parse_template(name) {
                Err(SchemaError::BadTemplate { .. }) => {}
                other => panic!("Expected BadTemplate for {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_type_name_formatting() {
        assert_eq!(map_type_name("int", "string"), "map<int,string>");
        assert_eq!(map_type_name("int", "vector<int>"), "map<int,vector<int> >");
        assert_eq!(
            sequence_type_name(StlKind::Vector, "vector<int>"),
            "vector<vector<int> >"
        );
    }
}
