//! Regex-based Java extraction used when the structural parser fails.
//!
//! Works line by line. Declarations are found with a signature regex and
//! nested by indentation: a declaration indented deeper than the one
//! above it (and before that one's closing line) is its inner type. Fields
//! and member signatures are recovered from lines at the first indentation
//! level inside each declaration, and member bodies by brace counting.
//!
//! The result is always reported as [`ParseOutcome::Degraded`] since
//! comments, string literals and unusual formatting can confuse the scan.

use regex::Regex;
use std::sync::LazyLock;

use super::{
    MemberKind, ParseOutcome, ParsedEntity, ParsedField, ParsedFile, ParsedMember, ParsedParam,
    SourceParser,
};

static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*package\s+([\w.]+)\s*;").expect("valid package regex"));

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+(?:\.\*)?)\s*;").expect("valid import regex")
});

static DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\s*)((?:@\w+(?:\([^)]*\))?\s+)*)((?:(?:public|protected|private|abstract|final|static|sealed|non-sealed|strictfp)\s+)*)(class|interface|enum|record|@interface)\s+([A-Za-z_]\w*)(.*)$",
    )
    .expect("valid declaration regex")
});

static EXTENDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bextends\s+(.+?)(?:\bimplements\b|\{|$)").expect("valid extends regex")
});

static IMPLEMENTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bimplements\s+(.+?)(?:\{|$)").expect("valid implements regex")
});

static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*((?:@\w+(?:\([^)]*\))?\s+)*)((?:(?:public|protected|private|static|final|abstract|synchronized|native|default)\s+)*)(?:<[^>]+>\s+)?(?:([\w.$]+(?:<.*>)?(?:\[\])*)\s+)?([A-Za-z_]\w*)\s*\(([^)]*)\)",
    )
    .expect("valid method regex")
});

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*((?:(?:public|protected|private|static|final|transient|volatile)\s+)*)([\w.$]+(?:<[^;=()]*>)?(?:\[\])*)\s+([A-Za-z_]\w*)\s*(?:=[^;]*)?;\s*$",
    )
    .expect("valid field regex")
});

/// Words that can precede `(` on a statement line but never start a declaration.
const NON_DECLARATION_WORDS: &[&str] = &[
    "return", "new", "throw", "if", "for", "while", "switch", "catch", "else", "do", "try",
    "synchronized", "assert", "case", "super", "this",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackParser;

impl FallbackParser {
    pub fn new() -> Self {
        FallbackParser
    }
}

struct Declaration {
    line: usize,
    indent: usize,
    end: usize,
    entity: ParsedEntity,
    parent: Option<usize>,
}

impl SourceParser for FallbackParser {
    fn language(&self) -> &str {
        "java"
    }

    fn parse(&self, path: &str, source: &str) -> ParseOutcome {
        let lines: Vec<&str> = source.lines().collect();

        let package = lines
            .iter()
            .find_map(|l| PACKAGE_RE.captures(l).map(|c| c[1].to_string()));
        let imports: Vec<String> = lines
            .iter()
            .filter_map(|l| IMPORT_RE.captures(l).map(|c| c[1].to_string()))
            .collect();

        let mut decls: Vec<Declaration> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if is_comment(line) {
                continue;
            }
            let Some(caps) = DECL_RE.captures(line) else {
                continue;
            };
            let indent = indentation(line);
            let name = caps[5].to_string();
            let kind = caps[4].to_string();

            let header = declaration_header(&lines, idx);
            let mut entity = ParsedEntity::new(&name, &name, &kind);
            entity.modifiers = caps[3].split_whitespace().map(str::to_string).collect();
            let (doc, mut annotations) = leading_doc_and_annotations(&lines, idx);
            annotations.extend(
                caps[2]
                    .split_whitespace()
                    .filter(|a| a.starts_with('@'))
                    .map(str::to_string),
            );
            entity.documentation = doc;
            entity.annotations = annotations;
            apply_supertypes(&mut entity, &header);
            entity.start_line = idx + 1;

            decls.push(Declaration {
                line: idx,
                indent,
                end: lines.len().saturating_sub(1),
                entity,
                parent: None,
            });
        }

        if decls.is_empty() {
            return ParseOutcome::Failed {
                reason: "no type declaration found".to_string(),
            };
        }

        // Nesting and end lines by indentation.
        let mut stack: Vec<usize> = Vec::new();
        for i in 0..decls.len() {
            while let Some(&top) = stack.last() {
                if decls[top].indent >= decls[i].indent {
                    decls[top].end = decls[i].line.saturating_sub(1).max(decls[top].line);
                    stack.pop();
                } else {
                    break;
                }
            }
            decls[i].parent = stack.last().copied();
            stack.push(i);
        }
        for i in 0..decls.len() {
            let closing = closing_line(&lines, decls[i].line, decls[i].indent, decls[i].end);
            decls[i].end = closing;
            decls[i].entity.end_line = closing + 1;
            if let Some(p) = decls[i].parent {
                let qualified = format!("{}.{}", decls[p].entity.qualified_name, decls[i].entity.name);
                decls[i].entity.qualified_name = qualified;
            }
        }

        for i in 0..decls.len() {
            let nested: Vec<(usize, usize)> = decls
                .iter()
                .filter(|d| d.parent == Some(i))
                .map(|d| (d.line, d.end))
                .collect();
            let (fields, members) =
                scan_body(&lines, decls[i].line, decls[i].end, &decls[i].entity.name, &nested);
            decls[i].entity.fields = fields;
            decls[i].entity.members = members;
        }

        // Assemble the tree bottom-up: children always follow their parent.
        let mut slots: Vec<Option<ParsedEntity>> = Vec::with_capacity(decls.len());
        let parents: Vec<Option<usize>> = decls.iter().map(|d| d.parent).collect();
        for d in decls {
            slots.push(Some(d.entity));
        }
        for i in (0..slots.len()).rev() {
            if let Some(p) = parents[i] {
                if let Some(child) = slots[i].take() {
                    if let Some(parent) = slots[p].as_mut() {
                        parent.inner.insert(0, child);
                    }
                }
            }
        }
        let entities: Vec<ParsedEntity> = slots.into_iter().flatten().collect();

        ParseOutcome::Degraded {
            file: ParsedFile {
                path: path.to_string(),
                language: "java".to_string(),
                package,
                imports,
                entities,
            },
            reason: "regex extraction".to_string(),
        }
    }
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("//") || t.starts_with('*') || t.starts_with("/*")
}

/// The declaration line joined with continuation lines up to the opening brace.
fn declaration_header(lines: &[&str], start: usize) -> String {
    let mut header = String::new();
    for line in lines.iter().skip(start).take(6) {
        header.push(' ');
        header.push_str(line.trim());
        if line.contains('{') {
            break;
        }
    }
    header
}

fn apply_supertypes(entity: &mut ParsedEntity, header: &str) {
    let extends = EXTENDS_RE
        .captures(header)
        .map(|c| split_type_list(&c[1]))
        .unwrap_or_default();
    let implements = IMPLEMENTS_RE
        .captures(header)
        .map(|c| split_type_list(&c[1]))
        .unwrap_or_default();

    if entity.kind == "interface" {
        entity.implements = extends;
    } else {
        entity.extends = extends.into_iter().next();
        entity.implements = implements;
    }
}

/// Split `A, B<C, D>, E` on top-level commas.
pub(crate) fn split_type_list(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    out.push(current.trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

/// Javadoc and annotation lines directly above `idx`.
fn leading_doc_and_annotations(lines: &[&str], idx: usize) -> (Option<String>, Vec<String>) {
    let mut annotations = Vec::new();
    let mut i = idx;
    while i > 0 {
        let t = lines[i - 1].trim();
        if t.starts_with('@') {
            annotations.insert(0, t.to_string());
            i -= 1;
        } else if t.is_empty() {
            i -= 1;
        } else {
            break;
        }
    }
    if i == 0 || !lines[i - 1].trim().ends_with("*/") {
        return (None, annotations);
    }
    let end = i - 1;
    let mut start = end;
    while start > 0 && !lines[start].trim_start().starts_with("/**") {
        start -= 1;
    }
    if !lines[start].trim_start().starts_with("/**") {
        return (None, annotations);
    }
    let doc = clean_javadoc(&lines[start..=end].join("\n"));
    (if doc.is_empty() { None } else { Some(doc) }, annotations)
}

/// Strip comment delimiters and leading asterisks from a javadoc block.
pub fn clean_javadoc(raw: &str) -> String {
    raw.lines()
        .map(|l| {
            let t = l.trim();
            let t = t.strip_prefix("/**").unwrap_or(t);
            let t = t.strip_suffix("*/").unwrap_or(t);
            let t = t.trim_start_matches('*');
            t.trim().to_string()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Line index of the `}` closing a declaration that starts at `start`.
fn closing_line(lines: &[&str], start: usize, indent: usize, limit: usize) -> usize {
    let header = lines[start];
    if header.contains('{') && header.matches('{').count() == header.matches('}').count() {
        return start;
    }
    let last = limit.min(lines.len().saturating_sub(1));
    (start + 1..=last)
        .find(|&i| lines[i].trim().starts_with('}') && indentation(lines[i]) <= indent)
        .unwrap_or(last)
        .max(start)
}

fn scan_body(
    lines: &[&str],
    start: usize,
    end: usize,
    entity_name: &str,
    nested: &[(usize, usize)],
) -> (Vec<ParsedField>, Vec<ParsedMember>) {
    let mut fields = Vec::new();
    let mut members = Vec::new();

    let member_indent = lines
        .iter()
        .enumerate()
        .take(end + 1)
        .skip(start + 1)
        .find(|(_, l)| !l.trim().is_empty() && !l.trim().starts_with('}'))
        .map(|(_, l)| indentation(l));
    let Some(member_indent) = member_indent else {
        return (fields, members);
    };

    let mut i = start + 1;
    while i <= end && i < lines.len() {
        if nested.iter().any(|(s, e)| i >= *s && i <= *e) {
            i += 1;
            continue;
        }
        let line = lines[i];
        if indentation(line) != member_indent || is_comment(line) || line.trim().is_empty() {
            i += 1;
            continue;
        }

        if let Some(member) = match_member(lines, i, end, entity_name) {
            i = member.end_line.max(i + 1);
            members.push(member);
            continue;
        }
        if let Some(caps) = FIELD_RE.captures(line) {
            let type_name = caps[2].to_string();
            if !NON_DECLARATION_WORDS.contains(&type_name.as_str()) {
                fields.push(ParsedField {
                    name: caps[3].to_string(),
                    type_name,
                    modifiers: caps[1].split_whitespace().map(str::to_string).collect(),
                });
            }
        }
        i += 1;
    }
    (fields, members)
}

fn match_member(lines: &[&str], i: usize, end: usize, entity_name: &str) -> Option<ParsedMember> {
    let line = lines[i];
    if line.trim_end().ends_with(';') && !line.contains('(') {
        return None;
    }
    let caps = METHOD_RE.captures(line)?;
    let name = caps[4].to_string();
    let return_type = caps.get(3).map(|m| m.as_str().to_string());
    if NON_DECLARATION_WORDS.contains(&name.as_str()) {
        return None;
    }
    if let Some(ret) = &return_type {
        if NON_DECLARATION_WORDS.contains(&ret.as_str()) {
            return None;
        }
    }
    let kind = match &return_type {
        None if name == entity_name => MemberKind::Constructor,
        None => return None,
        Some(_) => MemberKind::Method,
    };

    let parameters = split_type_list(&caps[5])
        .into_iter()
        .filter_map(|p| {
            let p = p.trim_start_matches("final ").trim();
            let (type_name, name) = p.rsplit_once(char::is_whitespace)?;
            Some(ParsedParam {
                type_name: type_name.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect();

    let body_end = body_end(lines, i, end);
    let (documentation, mut annotations) = leading_doc_and_annotations(lines, i);
    annotations.extend(
        caps[1]
            .split_whitespace()
            .filter(|a| a.starts_with('@'))
            .map(str::to_string),
    );

    Some(ParsedMember {
        name,
        kind,
        return_type,
        parameters,
        modifiers: caps[2].split_whitespace().map(str::to_string).collect(),
        annotations,
        body: lines[i..=body_end].join("\n"),
        documentation,
        start_line: i + 1,
        end_line: body_end + 1,
    })
}

/// Last line of a member starting at `start`, found by brace counting.
/// Abstract and interface members end at their terminating `;`.
fn body_end(lines: &[&str], start: usize, limit: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (i, line) in lines.iter().enumerate().take(limit + 1).skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if !opened && line.trim_end().ends_with(';') {
            return i;
        }
        if opened && depth <= 0 {
            return i;
        }
    }
    limit.max(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKEN: &str = r#"package com.payment;

import java.util.List;
import com.payment.model.Customer;

/**
 * Handles card payments.
 */
@Service
public class PaymentService extends BaseService implements Auditable, Comparable<PaymentService> {
    private final PaymentRepository repository;
    private Customer customer;

    public PaymentService(PaymentRepository repository) {
        this.repository = repository;
    }

    public Receipt charge(Card card, long amount) {
        if (amount <= 0) {
            throw new IllegalArgumentException("amount");
        }
        return repository.save(card, amount) ???;
    }

    public static class Builder {
        private String name;
    }

    enum Mode {
        LIVE, TEST
    }
}
"#;

    fn parse(source: &str) -> ParsedFile {
        match FallbackParser::new().parse("PaymentService.java", source) {
            ParseOutcome::Degraded { file, .. } => file,
            other => panic!("expected degraded outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_recovers_package_imports_and_supertypes() {
        let file = parse(BROKEN);
        assert_eq!(file.package.as_deref(), Some("com.payment"));
        assert_eq!(file.imports, vec!["java.util.List", "com.payment.model.Customer"]);
        assert_eq!(file.entities.len(), 1);

        let entity = &file.entities[0];
        assert_eq!(entity.name, "PaymentService");
        assert_eq!(entity.kind, "class");
        assert_eq!(entity.extends.as_deref(), Some("BaseService"));
        assert_eq!(entity.implements, vec!["Auditable", "Comparable<PaymentService>"]);
        assert_eq!(entity.annotations, vec!["@Service"]);
        assert_eq!(entity.documentation.as_deref(), Some("Handles card payments."));
    }

    #[test]
    fn test_nested_declarations_by_indentation() {
        let file = parse(BROKEN);
        let names: Vec<_> = file
            .all_entities()
            .iter()
            .map(|e| e.qualified_name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["PaymentService", "PaymentService.Builder", "PaymentService.Mode"]
        );
        let builder = &file.entities[0].inner[0];
        assert_eq!(builder.fields.len(), 1);
        assert_eq!(builder.fields[0].name, "name");
    }

    #[test]
    fn test_fields_and_members() {
        let file = parse(BROKEN);
        let entity = &file.entities[0];
        let field_names: Vec<_> = entity.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(field_names, vec!["repository", "customer"]);
        assert_eq!(entity.fields[0].type_name, "PaymentRepository");

        assert_eq!(entity.members.len(), 2);
        assert_eq!(entity.members[0].kind, MemberKind::Constructor);
        let charge = &entity.members[1];
        assert_eq!(charge.name, "charge");
        assert_eq!(charge.return_type.as_deref(), Some("Receipt"));
        assert_eq!(charge.parameters.len(), 2);
        assert_eq!(charge.parameters[0].type_name, "Card");
        assert!(charge.body.contains("IllegalArgumentException"));
        assert!(charge.body.trim_end().ends_with('}'));
    }

    #[test]
    fn test_interface_extends_become_implements() {
        let file = parse("public interface Gateway extends Closeable, Named {\n    void open();\n}\n");
        let entity = &file.entities[0];
        assert_eq!(entity.kind, "interface");
        assert!(entity.extends.is_none());
        assert_eq!(entity.implements, vec!["Closeable", "Named"]);
        assert_eq!(entity.members.len(), 1);
        assert_eq!(entity.members[0].name, "open");
    }

    #[test]
    fn test_no_declaration_fails() {
        let outcome = FallbackParser::new().parse("x.java", "// just a comment\n");
        assert!(matches!(outcome, ParseOutcome::Failed { .. }));
    }

    #[test]
    fn test_split_type_list_respects_generics() {
        assert_eq!(
            split_type_list("A, Map<K, V>, B "),
            vec!["A", "Map<K, V>", "B"]
        );
    }

    #[test]
    fn test_clean_javadoc() {
        let raw = "/**\n * Computes totals.\n *\n * @return the sum\n */";
        assert_eq!(clean_javadoc(raw), "Computes totals.\n@return the sum");
    }
}
