//! Configuration and prose documents.
//!
//! Each document yields one whole-document unit. When the document is
//! longer than `max_chunk_lines` the whole unit is truncated and the
//! document is additionally split: configuration documents per top-level
//! key, Markdown per section at its shallowest header level, plain text
//! and reStructuredText into paragraph groups. Every section is bounded
//! and reference-scanned on its own.

use serde_json::json;
use std::collections::BTreeMap;

use super::references::detect_name_references;
use super::{
    bound_lines, ChunkerConfig, ConfigFormat, KnownEntities, ProseFormat, CODE_TRUNCATION_MARKER,
    DOC_TRUNCATION_MARKER,
};
use crate::models::{unit_id, RetrievalUnit, UnitKind};

/// A slice of a document with its 1-based line span.
#[derive(Debug, Clone, PartialEq)]
struct Section {
    title: String,
    text: String,
    start_line: usize,
    end_line: usize,
}

pub(super) fn chunk_config(
    config: &ChunkerConfig,
    path: &str,
    text: &str,
    format: ConfigFormat,
    known: &KnownEntities,
) -> Vec<RetrievalUnit> {
    let name = file_stem(path);
    let language = match format {
        ConfigFormat::Json => "json",
        ConfigFormat::Toml => "toml",
    };
    let total_lines = text.lines().count().max(1);
    let references = detect_name_references(text, known);

    let mut header = vec![format!("// Config: {}", name)];
    if !references.is_empty() {
        header.push(format!("// References: {}", references.join(", ")));
    }
    let whole = format!("{}\n\n{}", header.join("\n"), text.trim_end());
    let oversize = whole.lines().count() > config.max_chunk_lines;

    let sections = match top_level_sections(text, format) {
        Ok(sections) => sections,
        Err(e) => {
            tracing::warn!(path, error = %e, "config document did not parse; indexing as text");
            Vec::new()
        }
    };

    let mut units = Vec::new();
    if let Some(content) = bound_lines(&whole, config, CODE_TRUNCATION_MARKER) {
        let mut metadata = BTreeMap::new();
        metadata.insert("document_name".to_string(), json!(name));
        metadata.insert(
            "keys".to_string(),
            json!(sections.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>()),
        );
        units.push(RetrievalUnit {
            id: unit_id(path, &name, UnitKind::ConfigDocument),
            content,
            language: language.to_string(),
            kind: UnitKind::ConfigDocument,
            file_path: path.to_string(),
            start_line: 1,
            end_line: total_lines,
            entity_name: None,
            member_name: None,
            documentation: None,
            references,
            metadata,
        });
    }

    if !oversize {
        return units;
    }

    let lines: Vec<&str> = text.lines().collect();
    for (key, rendered) in sections {
        let section_text = format!("// Config: {}, Section: {}\n\n{}", name, key, rendered.trim_end());
        let Some(content) = bound_lines(&section_text, config, CODE_TRUNCATION_MARKER) else {
            continue;
        };
        let start_line = locate_key(&lines, &key, format).unwrap_or(1);
        let span = rendered.lines().count().saturating_sub(2).max(1);
        let end_line = (start_line + span - 1).clamp(start_line, total_lines.max(start_line));

        let mut metadata = BTreeMap::new();
        metadata.insert("document_name".to_string(), json!(name));
        metadata.insert("section".to_string(), json!(key));
        units.push(RetrievalUnit {
            id: unit_id(path, &format!("{}#{}", name, key), UnitKind::ConfigSection),
            references: detect_name_references(&rendered, known),
            content,
            language: language.to_string(),
            kind: UnitKind::ConfigSection,
            file_path: path.to_string(),
            start_line,
            end_line,
            entity_name: None,
            member_name: None,
            documentation: None,
            metadata,
        });
    }
    units
}

pub(super) fn chunk_prose(
    config: &ChunkerConfig,
    path: &str,
    text: &str,
    format: ProseFormat,
    known: &KnownEntities,
) -> Vec<RetrievalUnit> {
    let name = file_stem(path);
    let language = match format {
        ProseFormat::Markdown => "markdown",
        ProseFormat::Text => "text",
        ProseFormat::Rst => "rst",
    };
    let body = text.trim_end();
    let total_lines = body.lines().count().max(1);
    let title = match format {
        ProseFormat::Markdown => body
            .lines()
            .find_map(|l| header_level(l).map(|(_, t)| t.to_string())),
        _ => None,
    }
    .unwrap_or_else(|| name.clone());

    let mut units = Vec::new();
    if let Some(content) = bound_lines(body, config, DOC_TRUNCATION_MARKER) {
        let mut metadata = BTreeMap::new();
        metadata.insert("document_name".to_string(), json!(name));
        metadata.insert("title".to_string(), json!(title));
        units.push(RetrievalUnit {
            id: unit_id(path, &name, UnitKind::ProseDocument),
            content,
            language: language.to_string(),
            kind: UnitKind::ProseDocument,
            file_path: path.to_string(),
            start_line: 1,
            end_line: total_lines,
            entity_name: None,
            member_name: None,
            documentation: None,
            references: detect_name_references(body, known),
            metadata,
        });
    }

    if total_lines <= config.max_chunk_lines {
        return units;
    }

    let sections = match format {
        ProseFormat::Markdown => markdown_sections(body, config.max_chunk_lines),
        ProseFormat::Text | ProseFormat::Rst => paragraph_groups(body, config.max_chunk_lines),
    };
    for (index, section) in sections.into_iter().enumerate() {
        let Some(content) = bound_lines(&section.text, config, DOC_TRUNCATION_MARKER) else {
            continue;
        };
        let mut metadata = BTreeMap::new();
        metadata.insert("document_name".to_string(), json!(name));
        metadata.insert("section_title".to_string(), json!(section.title));
        metadata.insert("section_index".to_string(), json!(index));
        units.push(RetrievalUnit {
            id: unit_id(
                path,
                &format!("{}#{}:{}", name, index, section.title),
                UnitKind::ProseSection,
            ),
            references: detect_name_references(&section.text, known),
            content,
            language: language.to_string(),
            kind: UnitKind::ProseSection,
            file_path: path.to_string(),
            start_line: section.start_line,
            end_line: section.end_line,
            entity_name: None,
            member_name: None,
            documentation: None,
            metadata,
        });
    }
    units
}

fn file_stem(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => file.to_string(),
    }
}

/// `(key, rendered single-key document)` per top-level key, in key order.
fn top_level_sections(text: &str, format: ConfigFormat) -> anyhow::Result<Vec<(String, String)>> {
    match format {
        ConfigFormat::Json => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            let Some(map) = value.as_object() else {
                return Ok(Vec::new());
            };
            map.iter()
                .map(|(k, v)| -> anyhow::Result<(String, String)> {
                    let mut single = serde_json::Map::new();
                    single.insert(k.clone(), v.clone());
                    let rendered = serde_json::to_string_pretty(&serde_json::Value::Object(single))?;
                    Ok((k.clone(), rendered))
                })
                .collect()
        }
        ConfigFormat::Toml => {
            let table: toml::Table = text.parse()?;
            table
                .iter()
                .map(|(k, v)| -> anyhow::Result<(String, String)> {
                    let mut single = toml::Table::new();
                    single.insert(k.clone(), v.clone());
                    Ok((k.clone(), toml::to_string(&single)?))
                })
                .collect()
        }
    }
}

fn locate_key(lines: &[&str], key: &str, format: ConfigFormat) -> Option<usize> {
    let idx = match format {
        ConfigFormat::Json => {
            let quoted = format!("\"{}\"", key);
            lines.iter().position(|l| l.contains(&quoted))
        }
        ConfigFormat::Toml => lines.iter().position(|l| {
            let t = l.trim_start();
            t.starts_with(&format!("[{}]", key))
                || t.starts_with(&format!("[[{}]]", key))
                || t.strip_prefix(key)
                    .is_some_and(|rest| rest.trim_start().starts_with('='))
        }),
    };
    idx.map(|i| i + 1)
}

/// `(level, title)` for an ATX header line.
fn header_level(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim()))
}

/// Split on headers of the shallowest level used, ignoring fenced code.
fn markdown_sections(text: &str, max_lines: usize) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut in_fence = false;
    let mut headers: Vec<(usize, usize, String)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, title)) = header_level(line) {
            headers.push((i, level, title.to_string()));
        }
    }
    let Some(top) = headers.iter().map(|(_, level, _)| *level).min() else {
        return paragraph_groups(text, max_lines);
    };
    let starts: Vec<(usize, String)> = headers
        .into_iter()
        .filter(|(_, level, _)| *level == top)
        .map(|(i, _, title)| (i, title))
        .collect();

    let mut sections = Vec::new();
    if let Some((first, _)) = starts.first() {
        if *first > 0 {
            push_section(&mut sections, &lines, 0, *first, "intro".to_string());
        }
    }
    for (n, (start, title)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map(|(s, _)| *s).unwrap_or(lines.len());
        push_section(&mut sections, &lines, *start, end, title.clone());
    }
    sections
}

/// Paragraphs (blank-line separated) accumulated until the next one would
/// push the group past `max_lines`. A single paragraph longer than that
/// becomes its own group and is truncated later by the bounds check.
fn paragraph_groups(text: &str, max_lines: usize) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut paragraphs: Vec<(usize, usize)> = Vec::new();
    let mut start: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        match (line.trim().is_empty(), start) {
            (true, Some(s)) => {
                paragraphs.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        paragraphs.push((s, lines.len()));
    }

    let mut sections = Vec::new();
    let mut group: Option<(usize, usize)> = None;
    for (s, e) in paragraphs {
        group = match group {
            Some((gs, ge)) if e - gs > max_lines => {
                let title = format!("part {}", sections.len() + 1);
                push_section(&mut sections, &lines, gs, ge, title);
                Some((s, e))
            }
            Some((gs, _)) => Some((gs, e)),
            None => Some((s, e)),
        };
    }
    if let Some((gs, ge)) = group {
        let title = format!("part {}", sections.len() + 1);
        push_section(&mut sections, &lines, gs, ge, title);
    }
    sections
}

/// Append lines `[start, end)` as a section, skipping whitespace-only spans.
fn push_section(sections: &mut Vec<Section>, lines: &[&str], start: usize, end: usize, title: String) {
    let slice = &lines[start..end];
    let text = slice.join("\n").trim_end().to_string();
    if text.trim().is_empty() {
        return;
    }
    let used = text.lines().count();
    sections.push(Section {
        title,
        text,
        start_line: start + 1,
        end_line: start + used.max(1),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_lines: 12,
            ..ChunkerConfig::default()
        }
    }

    #[test]
    fn test_config_document_references_known_entity() {
        let text = "{\n  \"model\": \"Order\",\n  \"title\": \"Summer Sale\"\n}";
        let known = KnownEntities::from_names(["Order", "Customer"]);
        let units = chunk_config(
            &ChunkerConfig::default(),
            "templates/sale.json",
            text,
            ConfigFormat::Json,
            &known,
        );
        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert_eq!(unit.kind, UnitKind::ConfigDocument);
        assert_eq!(unit.references, vec!["Order"]);
        assert!(unit.content.starts_with("// Config: sale\n// References: Order\n\n{"));
        assert_eq!(unit.metadata["keys"], json!(["model", "title"]));
    }

    #[test]
    fn test_config_open_world_without_known_entities() {
        let text = "{\n  \"model\": \"Order\",\n  \"title\": \"Summer Sale\"\n}";
        let units = chunk_config(
            &ChunkerConfig::default(),
            "sale.json",
            text,
            ConfigFormat::Json,
            &KnownEntities::default(),
        );
        assert_eq!(units[0].references, vec!["Order", "Sale", "Summer"]);
    }

    #[test]
    fn test_oversize_config_split_per_key() {
        let items: Vec<String> = (0..10).map(|i| format!("      \"Step{}\"", i)).collect();
        let text = format!(
            "{{\n  \"flow\": {{\n    \"steps\": [\n{}\n    ]\n  }},\n  \"owner\": {{\n    \"team\": \"Payments\",\n    \"service\": \"RefundService\"\n  }}\n}}",
            items.join(",\n")
        );
        let known = KnownEntities::from_names(["RefundService"]);
        let units = chunk_config(&small_config(), "flows/refund.json", &text, ConfigFormat::Json, &known);

        let whole = &units[0];
        assert_eq!(whole.line_count(), 12);
        assert!(whole.content.ends_with(CODE_TRUNCATION_MARKER));

        let sections: Vec<_> = units
            .iter()
            .filter(|u| u.kind == UnitKind::ConfigSection)
            .collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].metadata["section"], json!("flow"));
        assert!(sections[0].references.is_empty());
        assert_eq!(sections[1].metadata["section"], json!("owner"));
        assert_eq!(sections[1].references, vec!["RefundService"]);
        assert!(sections[1]
            .content
            .starts_with("// Config: refund, Section: owner\n\n{"));
        assert_eq!(sections[1].start_line, 16);
    }

    #[test]
    fn test_toml_sections() {
        let mut text = String::from("name = \"gateway\"\n\n[retry]\n");
        for i in 0..12 {
            text.push_str(&format!("attempt_{} = {}\n", i, i * 100));
        }
        text.push_str("\n[handler]\nclass = \"RetryHandler\"\nmode = \"async\"\n");
        let units = chunk_config(
            &small_config(),
            "gateway.toml",
            &text,
            ConfigFormat::Toml,
            &KnownEntities::default(),
        );
        let mut keys: Vec<_> = units
            .iter()
            .filter(|u| u.kind == UnitKind::ConfigSection)
            .map(|u| u.metadata["section"].as_str().unwrap_or_default().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["handler", "name", "retry"]);
        let handler = units
            .iter()
            .find(|u| u.metadata.get("section") == Some(&json!("handler")))
            .unwrap();
        assert_eq!(handler.references, vec!["RetryHandler"]);
        assert_eq!(handler.start_line, 17);
    }

    #[test]
    fn test_invalid_config_still_yields_document() {
        let units = chunk_config(
            &ChunkerConfig::default(),
            "broken.json",
            "{\n  \"a\": ,\n}",
            ConfigFormat::Json,
            &KnownEntities::default(),
        );
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].metadata["keys"], json!([]));
    }

    #[test]
    fn test_markdown_sections_use_shallowest_level() {
        let mut text = String::from("Intro line one.\nIntro line two.\nIntro line three.\n\n");
        for name in ["Setup", "Usage"] {
            text.push_str(&format!("## {}\n\n", name));
            for i in 0..6 {
                text.push_str(&format!("{} detail {} for the PaymentService.\n", name, i));
            }
            text.push_str("\n### Notes\n\n```\n# not a header\n```\n\n");
        }
        let known = KnownEntities::from_names(["PaymentService"]);
        let units = chunk_prose(&small_config(), "docs/guide.md", &text, ProseFormat::Markdown, &known);

        assert_eq!(units[0].kind, UnitKind::ProseDocument);
        assert!(units[0].content.ends_with(DOC_TRUNCATION_MARKER));
        assert_eq!(units[0].metadata["title"], json!("Setup"));

        let titles: Vec<_> = units[1..]
            .iter()
            .map(|u| u.metadata["section_title"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(titles, vec!["intro", "Setup", "Usage"]);
        assert_eq!(units[2].start_line, 5);
        assert_eq!(units[2].references, vec!["PaymentService"]);
    }

    #[test]
    fn test_short_prose_is_single_unit() {
        let text = "Refunds are processed nightly.\nSee RefundService for details.\nOwned by the payments team.\n";
        let units = chunk_prose(
            &ChunkerConfig::default(),
            "NOTES.txt",
            text,
            ProseFormat::Text,
            &KnownEntities::from_names(["RefundService"]),
        );
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].references, vec!["RefundService"]);
        assert_eq!(units[0].end_line, 3);
        assert_eq!(units[0].metadata["title"], json!("NOTES"));
    }

    #[test]
    fn test_tiny_prose_dropped() {
        let units = chunk_prose(
            &ChunkerConfig::default(),
            "TODO.txt",
            "one line\n",
            ProseFormat::Text,
            &KnownEntities::default(),
        );
        assert!(units.is_empty());
    }

    #[test]
    fn test_paragraph_groups_accumulate() {
        let para = |tag: &str| (0..4).map(|i| format!("{} {}", tag, i)).collect::<Vec<_>>().join("\n");
        let text = [para("a"), para("b"), para("c"), para("d")].join("\n\n");
        let groups = paragraph_groups(&text, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].start_line, 1);
        assert_eq!(groups[0].end_line, 9);
        assert_eq!(groups[1].start_line, 11);
        assert!(groups[1].text.starts_with("c 0"));
    }
}
