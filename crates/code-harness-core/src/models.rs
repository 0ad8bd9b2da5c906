//! Retrieval data model.
//!
//! A [`RetrievalUnit`] is the atomic object that is embedded, stored, and
//! returned by search. Units are created by the chunker during indexing,
//! upserted by [`RetrievalUnit::id`], and removed by file-path prefix when
//! their artifact disappears. [`RankedResult`] pairs a unit with a
//! normalized relevance score for the lifetime of one query.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// What part of an artifact a unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Synthetic reconstruction of a class-like declaration.
    Entity,
    /// One method or constructor body.
    Member,
    /// A whole structured configuration document.
    ConfigDocument,
    /// One top-level key of an oversize configuration document.
    ConfigSection,
    /// A whole prose document.
    ProseDocument,
    /// One top-level section of an oversize prose document.
    ProseSection,
}

impl UnitKind {
    pub const ALL: [UnitKind; 6] = [
        UnitKind::Entity,
        UnitKind::Member,
        UnitKind::ConfigDocument,
        UnitKind::ConfigSection,
        UnitKind::ProseDocument,
        UnitKind::ProseSection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Entity => "entity",
            UnitKind::Member => "member",
            UnitKind::ConfigDocument => "config_document",
            UnitKind::ConfigSection => "config_section",
            UnitKind::ProseDocument => "prose_document",
            UnitKind::ProseSection => "prose_section",
        }
    }

    /// True for configuration and prose units, which take part in
    /// reverse-reference dependency lookups.
    pub fn is_document(&self) -> bool {
        !matches!(self, UnitKind::Entity | UnitKind::Member)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown unit kind: {}", s))
    }
}

/// The atomic indexed and searchable fragment of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalUnit {
    /// Deterministic id, see [`unit_id`].
    pub id: String,
    pub content: String,
    pub language: String,
    pub kind: UnitKind,
    /// Path relative to the indexed root, always `/`-separated.
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// Owning type name (`Outer.Inner` for nested declarations).
    pub entity_name: Option<String>,
    pub member_name: Option<String>,
    pub documentation: Option<String>,
    /// Sorted, deduplicated entity names this unit depends on or mentions.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RetrievalUnit {
    /// Number of lines in `content`.
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    /// Human-readable label: `Entity.member`, `Entity`, or the file path.
    pub fn display_name(&self) -> String {
        match (&self.entity_name, &self.member_name) {
            (Some(e), Some(m)) => format!("{}.{}", e, m),
            (Some(e), None) => e.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => self.file_path.clone(),
        }
    }

    /// Name other units use to refer to a document unit: the
    /// `document_name` metadata entry, falling back to the file stem.
    pub fn document_name(&self) -> String {
        if let Some(name) = self.metadata.get("document_name").and_then(|v| v.as_str()) {
            return name.to_string();
        }
        let file = self.file_path.rsplit('/').next().unwrap_or(&self.file_path);
        match file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => file.to_string(),
        }
    }

    /// Text sent to the embedding service. Prefixes the content with the
    /// structural facts so that vectors capture names as well as code.
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![
            format!("Language: {}", self.language),
            format!("Type: {}", self.kind),
        ];
        if let Some(e) = &self.entity_name {
            parts.push(format!("Class: {}", e));
        }
        if let Some(m) = &self.member_name {
            parts.push(format!("Method: {}", m));
        }
        if let Some(doc) = &self.documentation {
            parts.push(format!("Documentation: {}", doc));
        }
        parts.push(format!("Code:\n{}", self.content));
        parts.join("\n")
    }
}

/// A unit paired with a relevance score in `[0, 1]`.
///
/// Scores are comparable across fused search methods within one query,
/// never across queries.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub unit: RetrievalUnit,
    pub score: f64,
}

/// Deterministic unit id: the first 16 hex characters of
/// `sha256("{path}:{name}:{kind}")`.
///
/// Re-chunking an unchanged artifact reproduces the same ids, so an upsert
/// overwrites instead of duplicating.
pub fn unit_id(file_path: &str, name: &str, kind: UnitKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", file_path, name, kind.as_str()).as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Normalize a path to the `/`-separated form used in ids and filters.
pub fn normalize_path(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    replaced.trim_start_matches("./").to_string()
}

#[cfg(test)]
pub(crate) fn test_unit(id: &str, kind: UnitKind, entity: Option<&str>) -> RetrievalUnit {
    RetrievalUnit {
        id: id.to_string(),
        content: format!("content of {}", id),
        language: "java".to_string(),
        kind,
        file_path: format!("src/{}.java", entity.unwrap_or(id)),
        start_line: 1,
        end_line: 10,
        entity_name: entity.map(|s| s.to_string()),
        member_name: None,
        documentation: None,
        references: Vec::new(),
        metadata: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_deterministic() {
        let a = unit_id("com/pay/Order.java", "Order", UnitKind::Entity);
        let b = unit_id("com/pay/Order.java", "Order", UnitKind::Entity);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unit_id_depends_on_kind_and_name() {
        let entity = unit_id("Order.java", "Order", UnitKind::Entity);
        let member = unit_id("Order.java", "Order", UnitKind::Member);
        let other = unit_id("Order.java", "Customer", UnitKind::Entity);
        assert_ne!(entity, member);
        assert_ne!(entity, other);
    }

    #[test]
    fn test_kind_parse_and_display() {
        for kind in UnitKind::ALL {
            assert_eq!(kind.as_str().parse::<UnitKind>().unwrap(), kind);
        }
        assert!("widget".parse::<UnitKind>().is_err());
        assert!(UnitKind::ConfigSection.is_document());
        assert!(!UnitKind::Member.is_document());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&UnitKind::ProseSection).unwrap();
        assert_eq!(json, "\"prose_section\"");
    }

    #[test]
    fn test_document_name_falls_back_to_stem() {
        let mut unit = test_unit("x", UnitKind::ConfigDocument, None);
        unit.file_path = "templates/refund-flow.json".into();
        assert_eq!(unit.document_name(), "refund-flow");
        unit.metadata
            .insert("document_name".into(), serde_json::json!("RefundFlow"));
        assert_eq!(unit.document_name(), "RefundFlow");
    }

    #[test]
    fn test_embedding_text_skips_missing_fields() {
        let mut unit = test_unit("x", UnitKind::Entity, Some("Order"));
        unit.content = "public class Order {\n}".into();
        let text = unit.embedding_text();
        assert!(text.starts_with("Language: java\nType: entity\nClass: Order\n"));
        assert!(!text.contains("Method:"));
        assert!(text.ends_with("Code:\npublic class Order {\n}"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("./src\\main\\Order.java"), "src/main/Order.java");
    }
}
