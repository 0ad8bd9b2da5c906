//! Entity- and member-level units for structural source.

use regex::Regex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::references::{entity_references, member_references};
use super::{bound_lines, truncate_lines, ChunkerConfig, KnownEntities, CODE_TRUNCATION_MARKER};
use crate::models::{unit_id, RetrievalUnit, UnitKind};
use crate::parse::{ParsedEntity, ParsedFile, ParsedMember};

static ACCESSOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(get|set|is|has)[A-Z]").expect("valid accessor regex"));

/// Accessors with bodies this short carry no retrieval signal.
const ACCESSOR_MAX_LINES: usize = 3;

pub(super) fn chunk_file(
    config: &ChunkerConfig,
    file: &ParsedFile,
    degraded: Option<&str>,
    known: &KnownEntities,
) -> Vec<RetrievalUnit> {
    let mut units = Vec::new();
    for entity in file.all_entities() {
        if let Some(unit) = entity_unit(config, file, entity, degraded, known) {
            units.push(unit);
        }
        if config.include_members {
            for member in &entity.members {
                if let Some(unit) = member_unit(config, file, entity, member, known) {
                    units.push(unit);
                }
            }
        }
    }
    units
}

fn entity_unit(
    config: &ChunkerConfig,
    file: &ParsedFile,
    entity: &ParsedEntity,
    degraded: Option<&str>,
    known: &KnownEntities,
) -> Option<RetrievalUnit> {
    let mut head = Vec::new();
    if let Some(pkg) = &file.package {
        head.push(format!("package {};", pkg));
    }
    if let Some(reason) = degraded {
        head.push(format!("// partial extraction: {}", reason));
    }
    if config.include_documentation {
        if let Some(doc) = &entity.documentation {
            head.extend(render_javadoc(doc));
        }
    }
    head.extend(entity.annotations.iter().cloned());
    head.push(signature_line(entity));

    let fields: Vec<String> = entity
        .fields
        .iter()
        .map(|f| {
            let mut parts = f.modifiers.clone();
            parts.push(f.type_name.clone());
            parts.push(f.name.clone());
            format!("    {};", parts.join(" "))
        })
        .collect();

    let mut full = head.clone();
    full.extend(fields.iter().cloned());
    if !entity.members.is_empty() {
        if !fields.is_empty() {
            full.push(String::new());
        }
        full.extend(entity.members.iter().map(|m| format!("    {};", m.signature())));
    }
    full.push("}".to_string());

    let mut summarized = false;
    let content = if full.len() > config.max_chunk_lines {
        summarized = true;
        let mut summary = head;
        summary.push(format!("    // {} fields", entity.fields.len()));
        summary.push(format!("    // {} methods:", entity.members.len()));
        summary.extend(
            entity
                .members
                .iter()
                .map(|m| format!("    //   - {}", m.signature())),
        );
        summary.push("}".to_string());
        truncate_lines(&summary.join("\n"), config.max_chunk_lines, CODE_TRUNCATION_MARKER)
    } else {
        full.join("\n")
    };
    let content = bound_lines(&content, config, CODE_TRUNCATION_MARKER)?;

    let mut metadata = BTreeMap::new();
    metadata.insert("entity_kind".to_string(), json!(entity.kind));
    metadata.insert("package".to_string(), json!(file.package));
    metadata.insert("extends".to_string(), json!(entity.extends));
    metadata.insert("implements".to_string(), json!(entity.implements));
    metadata.insert("field_count".to_string(), json!(entity.fields.len()));
    metadata.insert("member_count".to_string(), json!(entity.members.len()));
    metadata.insert("degraded".to_string(), json!(degraded.is_some()));
    metadata.insert("summarized".to_string(), json!(summarized));

    Some(RetrievalUnit {
        id: unit_id(&file.path, &entity.qualified_name, UnitKind::Entity),
        content,
        language: file.language.clone(),
        kind: UnitKind::Entity,
        file_path: file.path.clone(),
        start_line: entity.start_line,
        end_line: entity.end_line.max(entity.start_line),
        entity_name: Some(entity.qualified_name.clone()),
        member_name: None,
        documentation: entity.documentation.clone().filter(|_| config.include_documentation),
        references: entity_references(file, entity, known),
        metadata,
    })
}

fn member_unit(
    config: &ChunkerConfig,
    file: &ParsedFile,
    entity: &ParsedEntity,
    member: &ParsedMember,
    known: &KnownEntities,
) -> Option<RetrievalUnit> {
    let body_lines = member.body.lines().count();
    if ACCESSOR_RE.is_match(&member.name) && body_lines <= ACCESSOR_MAX_LINES {
        return None;
    }
    if member.body.trim().len() < config.min_member_chars {
        return None;
    }

    let mut lines = vec![format!("// From class: {}", entity.qualified_name)];
    if let Some(pkg) = &file.package {
        lines.push(format!("// Package: {}", pkg));
    }
    if config.include_documentation {
        if let Some(doc) = &member.documentation {
            lines.extend(render_javadoc(doc));
        }
    }
    lines.extend(member.annotations.iter().cloned());
    lines.push(member.body.clone());
    let content = bound_lines(&lines.join("\n"), config, CODE_TRUNCATION_MARKER)?;
    let truncated = super::is_truncated(&content);
    if truncated {
        tracing::debug!(
            file = %file.path,
            member = %member.name,
            "member truncated to {} lines",
            config.max_chunk_lines
        );
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("member_kind".to_string(), json!(member.kind));
    metadata.insert("signature".to_string(), json!(member.signature()));
    metadata.insert("truncated".to_string(), json!(truncated));

    Some(RetrievalUnit {
        id: unit_id(
            &file.path,
            &format!("{}.{}", entity.qualified_name, member.id_name()),
            UnitKind::Member,
        ),
        content,
        language: file.language.clone(),
        kind: UnitKind::Member,
        file_path: file.path.clone(),
        start_line: member.start_line,
        end_line: member.end_line.max(member.start_line),
        entity_name: Some(entity.qualified_name.clone()),
        member_name: Some(member.name.clone()),
        documentation: member.documentation.clone().filter(|_| config.include_documentation),
        references: member_references(member, entity, known),
        metadata,
    })
}

/// `public abstract class Name extends Base implements A, B {`
fn signature_line(entity: &ParsedEntity) -> String {
    let mut parts = entity.modifiers.clone();
    parts.push(entity.kind.clone());
    parts.push(entity.name.clone());
    let keyword = if entity.kind == "interface" {
        "extends"
    } else {
        "implements"
    };
    if let Some(base) = &entity.extends {
        parts.push(format!("extends {}", base));
    }
    if !entity.implements.is_empty() {
        parts.push(format!("{} {}", keyword, entity.implements.join(", ")));
    }
    format!("{} {{", parts.join(" "))
}

fn render_javadoc(doc: &str) -> Vec<String> {
    let mut out = vec!["/**".to_string()];
    out.extend(doc.lines().map(|l| format!(" * {}", l)));
    out.push(" */".to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{MemberKind, ParsedField, ParsedParam};

    fn method(name: &str, body_lines: usize) -> ParsedMember {
        let mut body = vec![format!("    public void {}() {{", name)];
        body.extend((0..body_lines).map(|i| format!("        registry.record(\"event-{}\", payload);", i)));
        body.push("    }".to_string());
        ParsedMember {
            name: name.into(),
            kind: MemberKind::Method,
            return_type: Some("void".into()),
            parameters: vec![],
            modifiers: vec!["public".into()],
            annotations: vec![],
            body: body.join("\n"),
            documentation: Some("Records events.".into()),
            start_line: 10,
            end_line: 10 + body_lines + 1,
        }
    }

    fn file_with(entity: ParsedEntity) -> ParsedFile {
        ParsedFile {
            path: "com/acme/Ledger.java".into(),
            language: "java".into(),
            package: Some("com.acme".into()),
            imports: vec![],
            entities: vec![entity],
        }
    }

    fn ledger() -> ParsedEntity {
        let mut e = ParsedEntity::new("Ledger", "Ledger", "class");
        e.modifiers = vec!["public".into()];
        e.extends = Some("Book".into());
        e.implements = vec!["Closeable".into(), "Auditable".into()];
        e.documentation = Some("Double-entry ledger.".into());
        e.fields = vec![ParsedField {
            name: "entries".into(),
            type_name: "List<Entry>".into(),
            modifiers: vec!["private".into(), "final".into()],
        }];
        e.start_line = 3;
        e.end_line = 40;
        e
    }

    #[test]
    fn test_entity_reconstruction() {
        let mut e = ledger();
        e.members = vec![method("post", 5)];
        let file = file_with(e);
        let units = chunk_file(&ChunkerConfig::default(), &file, None, &KnownEntities::default());
        let entity = &units[0];
        assert_eq!(entity.kind, UnitKind::Entity);
        assert_eq!(
            entity.content,
            "package com.acme;\n/**\n * Double-entry ledger.\n */\npublic class Ledger extends Book implements Closeable, Auditable {\n    private final List<Entry> entries;\n\n    public void post();\n}"
        );
        assert_eq!(entity.metadata["field_count"], json!(1));
        assert_eq!(entity.metadata["summarized"], json!(false));
        // `List<Entry>` reduces to the built-in `List`
        assert_eq!(entity.references, vec!["Auditable", "Book", "Closeable"]);
    }

    #[test]
    fn test_oversize_entity_is_summarized() {
        let mut e = ledger();
        e.members = (0..30).map(|i| method(&format!("step{}", i), 2)).collect();
        let file = file_with(e);
        let config = ChunkerConfig {
            max_chunk_lines: 25,
            ..ChunkerConfig::default()
        };
        let units = chunk_file(&config, &file, None, &KnownEntities::default());
        let entity = &units[0];
        assert_eq!(entity.metadata["summarized"], json!(true));
        assert!(entity.content.contains("    // 30 methods:"));
        assert_eq!(entity.line_count(), 25);
        assert!(entity.content.ends_with(CODE_TRUNCATION_MARKER));
    }

    #[test]
    fn test_accessors_and_short_members_skipped() {
        let mut e = ledger();
        let mut getter = method("getEntries", 1);
        getter.body = "    public List<Entry> getEntries() {\n        return entries;\n    }".into();
        let mut tiny = method("reset", 0);
        tiny.body = "void reset() { }".into();
        e.members = vec![getter, tiny, method("getTotals", 6)];
        let file = file_with(e);
        let units = chunk_file(&ChunkerConfig::default(), &file, None, &KnownEntities::default());
        let members: Vec<_> = units
            .iter()
            .filter(|u| u.kind == UnitKind::Member)
            .map(|u| u.member_name.clone().unwrap_or_default())
            .collect();
        // a getter with a long body is kept
        assert_eq!(members, vec!["getTotals"]);
    }

    #[test]
    fn test_member_prefix_and_truncation() {
        let mut e = ledger();
        e.members = vec![method("post", 80)];
        let file = file_with(e);
        let config = ChunkerConfig {
            max_chunk_lines: 20,
            ..ChunkerConfig::default()
        };
        let units = chunk_file(&config, &file, None, &KnownEntities::default());
        let member = units.iter().find(|u| u.kind == UnitKind::Member).unwrap();
        assert!(member.content.starts_with(
            "// From class: Ledger\n// Package: com.acme\n/**\n * Records events.\n */\n"
        ));
        assert_eq!(member.line_count(), 20);
        assert!(member.content.ends_with("\n// ... truncated"));
        assert_eq!(member.metadata["truncated"], json!(true));
        assert_eq!(member.entity_name.as_deref(), Some("Ledger"));
    }

    #[test]
    fn test_overloads_get_distinct_ids() {
        let mut e = ledger();
        let a = method("post", 4);
        let mut b = method("post", 4);
        b.parameters = vec![ParsedParam {
            type_name: "Entry".into(),
            name: "entry".into(),
        }];
        e.members = vec![a, b];
        let file = file_with(e);
        let units = chunk_file(&ChunkerConfig::default(), &file, None, &KnownEntities::default());
        let ids: Vec<_> = units
            .iter()
            .filter(|u| u.kind == UnitKind::Member)
            .map(|u| u.id.clone())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_nested_entity_named_with_outer() {
        let mut outer = ledger();
        outer.fields.push(ParsedField {
            name: "last".into(),
            type_name: "Entry".into(),
            modifiers: vec![],
        });
        let mut inner = ParsedEntity::new("Entry", "Ledger.Entry", "record");
        inner.fields = vec![
            ParsedField {
                name: "amount".into(),
                type_name: "long".into(),
                modifiers: vec![],
            },
            ParsedField {
                name: "ledger".into(),
                type_name: "Ledger".into(),
                modifiers: vec![],
            },
        ];
        outer.inner.push(inner);
        let file = file_with(outer);
        let known = KnownEntities::from_files([&file]);
        let units = chunk_file(&ChunkerConfig::default(), &file, None, &known);
        let inner_unit = units
            .iter()
            .find(|u| u.entity_name.as_deref() == Some("Ledger.Entry"))
            .expect("nested unit");
        assert_eq!(inner_unit.references, vec!["Ledger"]);
        let outer_unit = units
            .iter()
            .find(|u| u.entity_name.as_deref() == Some("Ledger"))
            .unwrap();
        assert_eq!(outer_unit.references, vec!["Entry"]);
        assert_ne!(inner_unit.id, outer_unit.id);
    }

    #[test]
    fn test_degraded_reason_recorded() {
        let file = file_with(ledger());
        let units = chunk_file(
            &ChunkerConfig::default(),
            &file,
            Some("syntax error at line 4"),
            &KnownEntities::default(),
        );
        assert!(units[0].content.contains("// partial extraction: syntax error at line 4"));
        assert_eq!(units[0].metadata["degraded"], json!(true));
    }
}
