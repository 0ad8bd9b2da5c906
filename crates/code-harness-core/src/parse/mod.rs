//! Structured description of a parsed source file.
//!
//! The chunker never reads source text directly for structural artifacts.
//! It consumes a [`ParsedFile`] produced by a [`SourceParser`]. Parsers
//! report their result as a [`ParseOutcome`]:
//!
//! ```text
//!   SourceParser::parse ──► Parsed(file)
//!                      ├──► Degraded(file, reason)
//!                      └──► Failed(reason) ──► FallbackParser::parse ──► Degraded(file, reason)
//! ```
//!
//! [`parse_with_fallback`] picks the alternative producer when the primary
//! one fails, so callers always get either a full or a degraded extraction
//! for a readable file.

pub mod fallback;

use serde::Serialize;

use crate::error::RagError;

pub use fallback::FallbackParser;

/// A field declared on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedField {
    pub name: String,
    pub type_name: String,
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Constructor,
}

/// A parameter as `(type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedParam {
    pub type_name: String,
    pub name: String,
}

/// A method or constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedMember {
    pub name: String,
    pub kind: MemberKind,
    /// `None` for constructors.
    pub return_type: Option<String>,
    pub parameters: Vec<ParsedParam>,
    pub modifiers: Vec<String>,
    pub annotations: Vec<String>,
    /// Full source text of the declaration, empty when the body could not
    /// be recovered.
    pub body: String,
    pub documentation: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl ParsedMember {
    /// One-line declaration, e.g. `public BigDecimal calculateTotal(int count)`.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = self.modifiers.clone();
        if let Some(ret) = &self.return_type {
            parts.push(ret.clone());
        }
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{} {}", p.type_name, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("{}({})", self.name, params));
        parts.join(" ")
    }

    /// Name used for id derivation. Includes the parameter types so that
    /// overloads map to distinct units.
    pub fn id_name(&self) -> String {
        let types = self
            .parameters
            .iter()
            .map(|p| p.type_name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}({})", self.name, types)
    }
}

/// A class-like declaration: class, interface, enum, record, or annotation type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEntity {
    /// Simple name as declared.
    pub name: String,
    /// Dotted name including enclosing declarations (`Outer.Inner`).
    pub qualified_name: String,
    /// `class`, `interface`, `enum`, `record`, or `@interface`.
    pub kind: String,
    pub modifiers: Vec<String>,
    pub annotations: Vec<String>,
    pub extends: Option<String>,
    pub implements: Vec<String>,
    pub fields: Vec<ParsedField>,
    pub members: Vec<ParsedMember>,
    pub inner: Vec<ParsedEntity>,
    pub documentation: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl ParsedEntity {
    pub fn new(name: &str, qualified_name: &str, kind: &str) -> Self {
        ParsedEntity {
            name: name.to_string(),
            qualified_name: qualified_name.to_string(),
            kind: kind.to_string(),
            modifiers: Vec::new(),
            annotations: Vec::new(),
            extends: None,
            implements: Vec::new(),
            fields: Vec::new(),
            members: Vec::new(),
            inner: Vec::new(),
            documentation: None,
            start_line: 1,
            end_line: 1,
        }
    }

    /// Visit this entity and all nested entities, depth first.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a ParsedEntity>) {
        out.push(self);
        for inner in &self.inner {
            inner.walk(out);
        }
    }
}

/// Everything extracted from one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub entities: Vec<ParsedEntity>,
}

impl ParsedFile {
    /// All entities in the file including nested ones.
    pub fn all_entities(&self) -> Vec<&ParsedEntity> {
        let mut out = Vec::new();
        for entity in &self.entities {
            entity.walk(&mut out);
        }
        out
    }
}

/// Result of a structural parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(ParsedFile),
    /// Usable but lower-fidelity extraction.
    Degraded { file: ParsedFile, reason: String },
    Failed { reason: String },
}

impl ParseOutcome {
    pub fn file(&self) -> Option<&ParsedFile> {
        match self {
            ParseOutcome::Parsed(file) => Some(file),
            ParseOutcome::Degraded { file, .. } => Some(file),
            ParseOutcome::Failed { .. } => None,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            ParseOutcome::Degraded { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Turns one source file into a [`ParsedFile`].
pub trait SourceParser: Send + Sync {
    /// Language tag stored on the produced units.
    fn language(&self) -> &str;

    /// Parse `source`. Must not panic on malformed input.
    fn parse(&self, path: &str, source: &str) -> ParseOutcome;
}

/// Run `parser`, switching to the regex [`FallbackParser`] on failure.
pub fn parse_with_fallback(parser: &dyn SourceParser, path: &str, source: &str) -> ParseOutcome {
    match parser.parse(path, source) {
        ParseOutcome::Failed { reason } => {
            let failure = RagError::ParseFailure {
                path: path.to_string(),
                reason: reason.clone(),
            };
            tracing::warn!(error = %failure, "using regex fallback extraction");
            match FallbackParser::new().parse(path, source) {
                ParseOutcome::Parsed(file) => ParseOutcome::Degraded { file, reason },
                ParseOutcome::Degraded { file, reason: inner } => ParseOutcome::Degraded {
                    file,
                    reason: format!("{}; {}", reason, inner),
                },
                ParseOutcome::Failed { reason: inner } => ParseOutcome::Failed {
                    reason: format!("{}; {}", reason, inner),
                },
            }
        }
        other => other,
    }
}

/// Reduce a type expression to its base name: `Map<String, Order>` → `Map`,
/// `Order[]` → `Order`, `com.pay.Order` → `Order`.
pub fn base_type_name(type_name: &str) -> String {
    let head = type_name.split('<').next().unwrap_or(type_name);
    let head = head.trim().trim_end_matches("...").replace("[]", "");
    let head = head.trim();
    head.rsplit('.').next().unwrap_or(head).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    impl SourceParser for AlwaysFails {
        fn language(&self) -> &str {
            "java"
        }

        fn parse(&self, _path: &str, _source: &str) -> ParseOutcome {
            ParseOutcome::Failed {
                reason: "unexpected token".into(),
            }
        }
    }

    #[test]
    fn test_base_type_name() {
        assert_eq!(base_type_name("List<Order>"), "List");
        assert_eq!(base_type_name("Map<String, List<Item>>"), "Map");
        assert_eq!(base_type_name("Order[]"), "Order");
        assert_eq!(base_type_name("com.pay.Customer"), "Customer");
        assert_eq!(base_type_name("String..."), "String");
        assert_eq!(base_type_name("int"), "int");
    }

    #[test]
    fn test_member_signature_and_id_name() {
        let member = ParsedMember {
            name: "charge".into(),
            kind: MemberKind::Method,
            return_type: Some("Receipt".into()),
            parameters: vec![
                ParsedParam {
                    type_name: "Card".into(),
                    name: "card".into(),
                },
                ParsedParam {
                    type_name: "long".into(),
                    name: "amount".into(),
                },
            ],
            modifiers: vec!["public".into()],
            annotations: vec![],
            body: String::new(),
            documentation: None,
            start_line: 1,
            end_line: 1,
        };
        assert_eq!(member.signature(), "public Receipt charge(Card card, long amount)");
        assert_eq!(member.id_name(), "charge(Card,long)");
    }

    #[test]
    fn test_fallback_selected_on_failure() {
        let source = "package com.pay;\n\npublic class Order extends Base {\n  int id;\n}\n";
        let outcome = parse_with_fallback(&AlwaysFails, "Order.java", source);
        match outcome {
            ParseOutcome::Degraded { file, reason } => {
                assert!(reason.contains("unexpected token"));
                assert_eq!(file.package.as_deref(), Some("com.pay"));
                assert_eq!(file.entities[0].name, "Order");
            }
            other => panic!("expected degraded outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_walk_visits_nested() {
        let mut outer = ParsedEntity::new("Outer", "Outer", "class");
        let mut inner = ParsedEntity::new("Inner", "Outer.Inner", "class");
        inner.inner.push(ParsedEntity::new("Deep", "Outer.Inner.Deep", "enum"));
        outer.inner.push(inner);
        let file = ParsedFile {
            path: "Outer.java".into(),
            language: "java".into(),
            package: None,
            imports: vec![],
            entities: vec![outer],
        };
        let names: Vec<_> = file
            .all_entities()
            .iter()
            .map(|e| e.qualified_name.clone())
            .collect();
        assert_eq!(names, vec!["Outer", "Outer.Inner", "Outer.Inner.Deep"]);
    }
}
