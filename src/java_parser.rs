//! Tree-sitter Java parser.
//!
//! Walks the concrete syntax tree from `tree-sitter-java` and fills the
//! [`ParsedFile`] model consumed by the chunker:
//!
//! | Node | Extracted as |
//! |------|--------------|
//! | `package_declaration` | [`ParsedFile::package`] |
//! | `import_declaration` | [`ParsedFile::imports`] |
//! | `class_declaration`, `interface_declaration`, `enum_declaration`, `record_declaration`, `annotation_type_declaration` | [`ParsedEntity`], nested ones under [`ParsedEntity::inner`] |
//! | `field_declaration`, `constant_declaration`, record components | [`ParsedField`] |
//! | `method_declaration`, `constructor_declaration`, `compact_constructor_declaration` | [`ParsedMember`] |
//!
//! Trees with syntax errors still yield whatever declarations survived, as
//! [`ParseOutcome::Degraded`]. When no type declaration can be recovered the
//! result is [`ParseOutcome::Failed`] and the regex fallback takes over.

use tree_sitter::{Node, Parser};

use code_harness_core::parse::fallback::clean_javadoc;
use code_harness_core::parse::{
    MemberKind, ParseOutcome, ParsedEntity, ParsedField, ParsedFile, ParsedMember, ParsedParam,
    SourceParser,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct JavaParser;

impl JavaParser {
    pub fn new() -> Self {
        JavaParser
    }
}

impl SourceParser for JavaParser {
    fn language(&self) -> &str {
        "java"
    }

    fn parse(&self, path: &str, source: &str) -> ParseOutcome {
        // tree_sitter::Parser is stateful and !Sync; one per call keeps the
        // parser shareable across blocking tasks.
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&tree_sitter_java::LANGUAGE.into()) {
            return ParseOutcome::Failed {
                reason: format!("failed to load Java grammar: {}", e),
            };
        }
        let Some(tree) = parser.parse(source, None) else {
            return ParseOutcome::Failed {
                reason: "parser produced no tree".to_string(),
            };
        };

        let root = tree.root_node();
        let src = source.as_bytes();
        let mut file = ParsedFile {
            path: path.to_string(),
            language: "java".to_string(),
            package: None,
            imports: Vec::new(),
            entities: Vec::new(),
        };

        for child in named_children(root) {
            match child.kind() {
                "package_declaration" => {
                    file.package = Some(strip_statement(text(child, src), "package"));
                }
                "import_declaration" => {
                    let import = strip_statement(text(child, src), "import");
                    let import = import.strip_prefix("static").map(str::trim).unwrap_or(&import);
                    file.imports.push(import.replace(char::is_whitespace, ""));
                }
                kind if entity_kind(kind).is_some() => {
                    if let Some(entity) = extract_entity(child, source, None) {
                        file.entities.push(entity);
                    }
                }
                _ => {}
            }
        }

        let errors = count_errors(root);
        if file.entities.is_empty() {
            let reason = if errors > 0 {
                format!("{} syntax error(s), no type declaration recovered", errors)
            } else {
                "no type declaration found".to_string()
            };
            return ParseOutcome::Failed { reason };
        }
        if errors > 0 {
            return ParseOutcome::Degraded {
                file,
                reason: format!("{} syntax error(s)", errors),
            };
        }
        ParseOutcome::Parsed(file)
    }
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn all_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn text<'a>(node: Node<'_>, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

/// `package a.b;` → `a.b`
fn strip_statement(statement: &str, keyword: &str) -> String {
    let s = statement.trim();
    let s = s.strip_prefix(keyword).unwrap_or(s);
    s.trim().trim_end_matches(';').trim().to_string()
}

fn entity_kind(node_kind: &str) -> Option<&'static str> {
    match node_kind {
        "class_declaration" => Some("class"),
        "interface_declaration" => Some("interface"),
        "enum_declaration" => Some("enum"),
        "record_declaration" => Some("record"),
        "annotation_type_declaration" => Some("@interface"),
        _ => None,
    }
}

fn count_errors(node: Node<'_>) -> usize {
    let own = usize::from(node.is_error() || node.is_missing());
    if !node.has_error() {
        return own;
    }
    own + all_children(node).into_iter().map(count_errors).sum::<usize>()
}

fn is_annotation(node: Node<'_>) -> bool {
    matches!(node.kind(), "annotation" | "marker_annotation")
}

fn is_comment(node: Node<'_>) -> bool {
    matches!(node.kind(), "line_comment" | "block_comment")
}

/// Keyword modifiers and annotations, in source order.
fn modifiers_of(node: Node<'_>, src: &[u8]) -> (Vec<String>, Vec<String>) {
    let mut modifiers = Vec::new();
    let mut annotations = Vec::new();
    let Some(mods) = all_children(node).into_iter().find(|c| c.kind() == "modifiers") else {
        return (modifiers, annotations);
    };
    for child in all_children(mods) {
        if is_comment(child) {
            continue;
        }
        if is_annotation(child) {
            annotations.push(text(child, src).to_string());
        } else {
            modifiers.push(text(child, src).to_string());
        }
    }
    (modifiers, annotations)
}

/// The `/** ... */` comment directly preceding `node`.
fn javadoc_before(node: Node<'_>, src: &[u8]) -> Option<String> {
    let prev = node.prev_named_sibling()?;
    if prev.kind() != "block_comment" {
        return None;
    }
    let raw = text(prev, src);
    if !raw.starts_with("/**") {
        return None;
    }
    let doc = clean_javadoc(raw);
    (!doc.is_empty()).then_some(doc)
}

/// Byte offset where the declaration proper begins, after any leading
/// annotations.
fn declaration_start(node: Node<'_>) -> usize {
    let Some(mods) = all_children(node).into_iter().find(|c| c.kind() == "modifiers") else {
        return node.start_byte();
    };
    if let Some(first) = all_children(mods)
        .into_iter()
        .find(|c| !is_annotation(*c) && !is_comment(*c))
    {
        return first.start_byte();
    }
    mods.next_sibling()
        .map(|n| n.start_byte())
        .unwrap_or_else(|| node.start_byte())
}

fn line_start(source: &str, byte: usize) -> usize {
    source[..byte].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

fn line_of(source: &str, byte: usize) -> usize {
    source[..byte].matches('\n').count() + 1
}

fn type_list(node: Node<'_>, src: &[u8]) -> Vec<String> {
    let list = named_children(node)
        .into_iter()
        .find(|c| c.kind() == "type_list");
    match list {
        Some(list) => named_children(list)
            .into_iter()
            .map(|t| text(t, src).to_string())
            .collect(),
        None => named_children(node)
            .into_iter()
            .map(|t| text(t, src).to_string())
            .collect(),
    }
}

fn extract_entity(node: Node<'_>, source: &str, outer: Option<&str>) -> Option<ParsedEntity> {
    let src = source.as_bytes();
    let kind = entity_kind(node.kind())?;
    let name = text(node.child_by_field_name("name")?, src).to_string();
    let qualified = match outer {
        Some(o) => format!("{}.{}", o, name),
        None => name.clone(),
    };

    let mut entity = ParsedEntity::new(&name, &qualified, kind);
    let (modifiers, annotations) = modifiers_of(node, src);
    entity.modifiers = modifiers;
    entity.annotations = annotations;
    entity.documentation = javadoc_before(node, src);
    entity.start_line = node.start_position().row + 1;
    entity.end_line = node.end_position().row + 1;

    for child in named_children(node) {
        match child.kind() {
            "superclass" => {
                entity.extends = named_children(child)
                    .into_iter()
                    .next()
                    .map(|t| text(t, src).to_string());
            }
            "super_interfaces" | "extends_interfaces" => {
                entity.implements = type_list(child, src);
            }
            _ => {}
        }
    }

    if kind == "record" {
        if let Some(params) = node.child_by_field_name("parameters") {
            entity.fields = parameters(params, src)
                .into_iter()
                .map(|p| ParsedField {
                    name: p.name,
                    type_name: p.type_name,
                    modifiers: Vec::new(),
                })
                .collect();
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        let mut decls = Vec::new();
        for child in named_children(body) {
            if child.kind() == "enum_body_declarations" {
                decls.extend(named_children(child));
            } else {
                decls.push(child);
            }
        }
        for decl in decls {
            match decl.kind() {
                "field_declaration" | "constant_declaration" => {
                    entity.fields.extend(fields(decl, src));
                }
                "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                    if let Some(member) = extract_member(decl, source) {
                        entity.members.push(member);
                    }
                }
                k if entity_kind(k).is_some() => {
                    if let Some(inner) = extract_entity(decl, source, Some(&qualified)) {
                        entity.inner.push(inner);
                    }
                }
                _ => {}
            }
        }
    }

    Some(entity)
}

fn fields(node: Node<'_>, src: &[u8]) -> Vec<ParsedField> {
    let (modifiers, _) = modifiers_of(node, src);
    let Some(type_node) = node.child_by_field_name("type") else {
        return Vec::new();
    };
    let type_name = text(type_node, src).to_string();
    named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "variable_declarator")
        .filter_map(|d| d.child_by_field_name("name"))
        .map(|n| ParsedField {
            name: text(n, src).to_string(),
            type_name: type_name.clone(),
            modifiers: modifiers.clone(),
        })
        .collect()
}

fn parameters(node: Node<'_>, src: &[u8]) -> Vec<ParsedParam> {
    let mut out = Vec::new();
    for param in named_children(node) {
        match param.kind() {
            "formal_parameter" => {
                let (Some(t), Some(n)) = (
                    param.child_by_field_name("type"),
                    param.child_by_field_name("name"),
                ) else {
                    continue;
                };
                out.push(ParsedParam {
                    type_name: text(t, src).to_string(),
                    name: text(n, src).to_string(),
                });
            }
            "spread_parameter" => {
                let children = named_children(param);
                let type_name = children
                    .iter()
                    .find(|c| !is_annotation(**c) && c.kind() != "modifiers" && c.kind() != "variable_declarator")
                    .map(|t| format!("{}...", text(*t, src)));
                let name = children
                    .iter()
                    .find(|c| c.kind() == "variable_declarator")
                    .and_then(|d| d.child_by_field_name("name"))
                    .map(|n| text(n, src).to_string());
                if let (Some(type_name), Some(name)) = (type_name, name) {
                    out.push(ParsedParam { type_name, name });
                }
            }
            _ => {}
        }
    }
    out
}

fn extract_member(node: Node<'_>, source: &str) -> Option<ParsedMember> {
    let src = source.as_bytes();
    let name = text(node.child_by_field_name("name")?, src).to_string();
    let (kind, return_type) = match node.kind() {
        "method_declaration" => (
            MemberKind::Method,
            node.child_by_field_name("type")
                .map(|t| text(t, src).to_string()),
        ),
        _ => (MemberKind::Constructor, None),
    };
    let params = node
        .child_by_field_name("parameters")
        .map(|p| parameters(p, src))
        .unwrap_or_default();
    let (modifiers, annotations) = modifiers_of(node, src);

    let start = declaration_start(node);
    let body = source
        .get(line_start(source, start)..node.end_byte())
        .unwrap_or_default()
        .to_string();

    Some(ParsedMember {
        name,
        kind,
        return_type,
        parameters: params,
        modifiers,
        annotations,
        body,
        documentation: javadoc_before(node, src),
        start_line: line_of(source, start),
        end_line: node.end_position().row + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_harness_core::parse::parse_with_fallback;

    const ORDER: &str = r#"package com.shop.orders;

import java.util.List;
import static java.util.Objects.requireNonNull;

/**
 * An order placed by a customer.
 */
@Entity
public class Order extends BaseEntity implements Serializable, Comparable<Order> {
    private final Customer customer;
    private List<LineItem> items, extras;

    public Order(Customer customer) {
        this.customer = requireNonNull(customer);
    }

    /** Total including tax. */
    @Override
    public Money total(int quantity, String... codes) {
        return Money.ZERO;
    }

    public Money total() {
        return Money.ZERO;
    }

    public static class Line {
        int qty;
    }

    enum Status { OPEN, CLOSED; void close() { } }
}
"#;

    fn parsed(source: &str) -> ParsedFile {
        match JavaParser::new().parse("src/Order.java", source) {
            ParseOutcome::Parsed(file) => file,
            other => panic!("expected a clean parse, got {:?}", other),
        }
    }

    #[test]
    fn test_file_header() {
        let file = parsed(ORDER);
        assert_eq!(file.package.as_deref(), Some("com.shop.orders"));
        assert_eq!(
            file.imports,
            vec!["java.util.List", "java.util.Objects.requireNonNull"]
        );
    }

    #[test]
    fn test_entity_shape() {
        let file = parsed(ORDER);
        let order = &file.entities[0];
        assert_eq!(order.name, "Order");
        assert_eq!(order.kind, "class");
        assert_eq!(order.modifiers, vec!["public"]);
        assert_eq!(order.annotations, vec!["@Entity"]);
        assert_eq!(order.extends.as_deref(), Some("BaseEntity"));
        assert_eq!(order.implements, vec!["Serializable", "Comparable<Order>"]);
        assert_eq!(order.documentation.as_deref(), Some("An order placed by a customer."));
        assert_eq!(order.start_line, 9);

        let fields: Vec<&str> = order.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, vec!["customer", "items", "extras"]);
        assert_eq!(order.fields[1].type_name, "List<LineItem>");
        assert_eq!(order.fields[0].modifiers, vec!["private", "final"]);
    }

    #[test]
    fn test_members_and_overloads() {
        let file = parsed(ORDER);
        let order = &file.entities[0];
        let ids: Vec<String> = order.members.iter().map(|m| m.id_name()).collect();
        assert_eq!(
            ids,
            vec!["Order(Customer)", "total(int,String...)", "total()"]
        );
        let ctor = &order.members[0];
        assert_eq!(ctor.kind, MemberKind::Constructor);
        assert!(ctor.return_type.is_none());

        let total = &order.members[1];
        assert_eq!(total.annotations, vec!["@Override"]);
        assert_eq!(total.documentation.as_deref(), Some("Total including tax."));
        assert!(total.body.starts_with("    public Money total("));
        assert!(total.body.trim_end().ends_with('}'));
        assert_eq!(total.start_line, 20);
        assert_eq!(total.end_line, 22);
    }

    #[test]
    fn test_nested_declarations_are_qualified() {
        let file = parsed(ORDER);
        let names: Vec<&str> = file
            .all_entities()
            .iter()
            .map(|e| e.qualified_name.as_str())
            .collect();
        assert_eq!(names, vec!["Order", "Order.Line", "Order.Status"]);
        let status = &file.entities[0].inner[1];
        assert_eq!(status.kind, "enum");
        assert_eq!(status.members.len(), 1);
    }

    #[test]
    fn test_records_and_interfaces() {
        let file = parsed(
            "public record Point(int x, int y) { }\ninterface Shape extends Drawable, Named { double area(); }\n",
        );
        let point = &file.entities[0];
        assert_eq!(point.kind, "record");
        assert_eq!(point.fields.len(), 2);
        let shape = &file.entities[1];
        assert_eq!(shape.kind, "interface");
        assert_eq!(shape.implements, vec!["Drawable", "Named"]);
        assert_eq!(shape.members[0].name, "area");
    }

    #[test]
    fn test_syntax_errors_degrade() {
        let broken = "public class Broken {\n    void ok() { }\n    void bad( { \n}\n";
        match JavaParser::new().parse("Broken.java", broken) {
            ParseOutcome::Degraded { file, reason } => {
                assert_eq!(file.entities[0].name, "Broken");
                assert!(reason.contains("syntax error"));
            }
            ParseOutcome::Failed { .. } => {}
            ParseOutcome::Parsed(_) => panic!("broken source parsed cleanly"),
        }
    }

    #[test]
    fn test_no_declaration_fails_and_falls_back() {
        let outcome = JavaParser::new().parse("Notes.java", "// nothing here\n");
        assert!(matches!(outcome, ParseOutcome::Failed { .. }));
        let outcome = parse_with_fallback(&JavaParser::new(), "Notes.java", "// nothing here\n");
        assert!(outcome.file().is_none());
    }
}
