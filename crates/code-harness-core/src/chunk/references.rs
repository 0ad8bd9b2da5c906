//! Dependency-reference extraction.
//!
//! Entity units collect candidate names from imports, the supertype,
//! interfaces, field types and member signatures. Document units use a
//! capitalized-identifier heuristic over their text. Both go through the
//! same filter before landing in [`RetrievalUnit::references`]:
//!
//! 1. reduce to the base type name (`List<Order>` → `List`),
//! 2. keep uppercase-initial names only,
//! 3. drop common built-in types and the unit's own names,
//! 4. intersect with [`KnownEntities`] when it is non-empty,
//! 5. sort and deduplicate.
//!
//! [`RetrievalUnit::references`]: crate::models::RetrievalUnit::references

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::KnownEntities;
use crate::parse::{base_type_name, ParsedEntity, ParsedFile, ParsedMember};

/// Imports under these namespaces never count as dependencies.
pub const EXCLUDED_IMPORT_PREFIXES: &[&str] = &[
    "java.",
    "javax.",
    "org.springframework.",
    "com.google.",
    "org.apache.",
    "org.slf4j.",
    "lombok.",
    "org.junit.",
];

/// Standard types removed from every reference set.
pub const BUILTIN_TYPES: &[&str] = &[
    "String",
    "Integer",
    "Long",
    "Double",
    "Float",
    "Boolean",
    "Byte",
    "Short",
    "Character",
    "Object",
    "Class",
    "Void",
    "List",
    "ArrayList",
    "LinkedList",
    "Set",
    "HashSet",
    "TreeSet",
    "Map",
    "HashMap",
    "TreeMap",
    "LinkedHashMap",
    "Collection",
    "Optional",
    "Stream",
    "Collectors",
    "Arrays",
    "Collections",
    "Exception",
    "RuntimeException",
    "Throwable",
    "Error",
];

static NAME_SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-zA-Z0-9]*)\b").expect("valid name-shape regex")
});

/// References for an entity-level unit.
pub fn entity_references(
    file: &ParsedFile,
    entity: &ParsedEntity,
    known: &KnownEntities,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for import in &file.imports {
        if import.ends_with(".*")
            || EXCLUDED_IMPORT_PREFIXES.iter().any(|p| import.starts_with(p))
        {
            continue;
        }
        if let Some(last) = import.rsplit('.').next() {
            candidates.push(last.to_string());
        }
    }
    candidates.extend(entity.extends.iter().cloned());
    candidates.extend(entity.implements.iter().cloned());
    candidates.extend(entity.fields.iter().map(|f| f.type_name.clone()));
    for member in &entity.members {
        candidates.extend(signature_types(member));
    }

    filter_references(candidates, &own_names(entity), known)
}

/// References for a member-level unit: its parameter and return types.
pub fn member_references(
    member: &ParsedMember,
    entity: &ParsedEntity,
    known: &KnownEntities,
) -> Vec<String> {
    filter_references(signature_types(member), &own_names(entity), known)
}

/// Capitalized-identifier tokens in free text, closed-world filtered.
///
/// With an empty `known` set every capitalized token is returned.
pub fn detect_name_references(text: &str, known: &KnownEntities) -> Vec<String> {
    let tokens: BTreeSet<String> = NAME_SHAPE_RE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .filter(|name| known.is_empty() || known.contains(name))
        .collect();
    tokens.into_iter().collect()
}

fn signature_types(member: &ParsedMember) -> Vec<String> {
    member
        .parameters
        .iter()
        .map(|p| p.type_name.clone())
        .chain(member.return_type.iter().cloned())
        .collect()
}

fn own_names(entity: &ParsedEntity) -> Vec<String> {
    vec![entity.name.clone(), entity.qualified_name.clone()]
}

fn filter_references(
    candidates: Vec<String>,
    exclude: &[String],
    known: &KnownEntities,
) -> Vec<String> {
    let set: BTreeSet<String> = candidates
        .iter()
        .map(|c| base_type_name(c))
        .filter(|name| name.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
        .filter(|name| !BUILTIN_TYPES.contains(&name.as_str()))
        .filter(|name| !exclude.contains(name))
        .filter(|name| known.is_empty() || known.contains(name))
        .collect();
    set.into_iter().collect()
}
