//! Artifact chunker.
//!
//! Turns a tree of mixed artifacts into bounded [`RetrievalUnit`]s:
//!
//! | Artifact | Extension | Units |
//! |----------|-----------|-------|
//! | Structural source | `.java` | one `entity` per declaration (nested ones included), one `member` per non-trivial method |
//! | Configuration | `.json`, `.toml` | one `config_document`, plus one `config_section` per top-level key when oversize |
//! | Prose | `.md`, `.txt`, `.rst` | one `prose_document`, plus `prose_section`s when oversize |
//!
//! # Two phases
//!
//! ```text
//!  phase 1: parse every structural artifact ──► KnownEntities (immutable)
//!                                                     │
//!  phase 2: chunk entities, configs, prose ◄──────────┘ (reference filtering)
//! ```
//!
//! The known-entity set must be complete before phase 2 starts: reference
//! detection keeps only names that are known entities once any exist.
//!
//! # Bounds
//!
//! Every emitted unit has between `min_chunk_lines` and `max_chunk_lines`
//! lines, or ends with a truncation marker. Units below the minimum are
//! dropped.

mod document;
mod entity;
pub mod references;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::error::RagError;
use crate::models::{normalize_path, RetrievalUnit};
use crate::parse::{parse_with_fallback, ParseOutcome, ParsedFile, SourceParser};

/// Last line of a truncated code unit.
pub const CODE_TRUNCATION_MARKER: &str = "// ... truncated";
/// Last line of a truncated document unit.
pub const DOC_TRUNCATION_MARKER: &str = "... (truncated)";

/// Size and content knobs for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub min_chunk_lines: usize,
    pub max_chunk_lines: usize,
    /// Artifacts longer than this are not indexed at all.
    pub max_file_lines: usize,
    /// Members whose body is shorter than this (in characters) are skipped.
    pub min_member_chars: usize,
    pub include_members: bool,
    pub include_documentation: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            min_chunk_lines: 3,
            max_chunk_lines: 200,
            max_file_lines: 500,
            min_member_chars: 50,
            include_members: true,
            include_documentation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProseFormat {
    Markdown,
    Text,
    Rst,
}

/// Which extraction pass an artifact goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Structural,
    Config(ConfigFormat),
    Prose(ProseFormat),
}

impl ArtifactKind {
    /// Classify by extension. Returns `None` for files that are not indexed.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "java" => Some(ArtifactKind::Structural),
            "json" => Some(ArtifactKind::Config(ConfigFormat::Json)),
            "toml" => Some(ArtifactKind::Config(ConfigFormat::Toml)),
            "md" | "markdown" => Some(ArtifactKind::Prose(ProseFormat::Markdown)),
            "txt" => Some(ArtifactKind::Prose(ProseFormat::Text)),
            "rst" => Some(ArtifactKind::Prose(ProseFormat::Rst)),
            _ => None,
        }
    }

    pub fn language(&self) -> &'static str {
        match self {
            ArtifactKind::Structural => "java",
            ArtifactKind::Config(ConfigFormat::Json) => "json",
            ArtifactKind::Config(ConfigFormat::Toml) => "toml",
            ArtifactKind::Prose(ProseFormat::Markdown) => "markdown",
            ArtifactKind::Prose(ProseFormat::Text) => "text",
            ArtifactKind::Prose(ProseFormat::Rst) => "rst",
        }
    }
}

/// A file to index: its path relative to the scan root and its text.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: String,
    pub text: String,
}

impl Artifact {
    pub fn new(path: &str, text: impl Into<String>) -> Self {
        Artifact {
            path: normalize_path(path),
            text: text.into(),
        }
    }

    pub fn kind(&self) -> Option<ArtifactKind> {
        ArtifactKind::from_path(&self.path)
    }
}

/// Immutable set of entity names found by the structural pass.
///
/// Holds both simple names (`Inner`) and dotted names (`Outer.Inner`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownEntities {
    names: BTreeSet<String>,
}

impl KnownEntities {
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a ParsedFile>) -> Self {
        let mut names = BTreeSet::new();
        for file in files {
            for entity in file.all_entities() {
                names.insert(entity.name.clone());
                names.insert(entity.qualified_name.clone());
            }
        }
        KnownEntities { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KnownEntities {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.names.iter()
    }
}

/// Stateless chunker; all state lives in its arguments.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Chunker { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// False (and a warning) when the artifact exceeds the line ceiling.
    pub fn accepts(&self, artifact: &Artifact) -> bool {
        let lines = artifact.text.lines().count();
        if lines > self.config.max_file_lines {
            let err = RagError::SizeExceeded {
                path: artifact.path.clone(),
                lines,
                limit: self.config.max_file_lines,
            };
            tracing::warn!(error = %err, "skipping artifact");
            return false;
        }
        true
    }

    /// Units for one structural parse result.
    pub fn chunk_parsed(&self, outcome: &ParseOutcome, known: &KnownEntities) -> Vec<RetrievalUnit> {
        match outcome.file() {
            Some(file) => entity::chunk_file(&self.config, file, outcome.degraded_reason(), known),
            None => Vec::new(),
        }
    }

    /// Units for a non-structural artifact. Structural artifacts yield none.
    pub fn chunk_document(&self, artifact: &Artifact, known: &KnownEntities) -> Vec<RetrievalUnit> {
        match artifact.kind() {
            Some(ArtifactKind::Config(format)) => {
                document::chunk_config(&self.config, &artifact.path, &artifact.text, format, known)
            }
            Some(ArtifactKind::Prose(format)) => {
                document::chunk_prose(&self.config, &artifact.path, &artifact.text, format, known)
            }
            _ => Vec::new(),
        }
    }

    /// Run both phases sequentially over `artifacts`.
    ///
    /// The indexing pipeline parallelizes the same two phases per file;
    /// this is the single-threaded form.
    pub fn chunk_artifacts(
        &self,
        parser: &dyn SourceParser,
        artifacts: &[Artifact],
    ) -> Vec<RetrievalUnit> {
        let accepted: Vec<&Artifact> = artifacts.iter().filter(|a| self.accepts(a)).collect();

        let outcomes: Vec<ParseOutcome> = accepted
            .iter()
            .filter(|a| a.kind() == Some(ArtifactKind::Structural))
            .map(|a| parse_with_fallback(parser, &a.path, &a.text))
            .collect();
        let known = KnownEntities::from_files(outcomes.iter().filter_map(|o| o.file()));

        let mut units = Vec::new();
        for outcome in &outcomes {
            units.extend(self.chunk_parsed(outcome, &known));
        }
        for artifact in &accepted {
            units.extend(self.chunk_document(artifact, &known));
        }
        dedupe_units(units)
    }
}

/// Drop later units whose id was already seen, preserving order.
pub fn dedupe_units(units: Vec<RetrievalUnit>) -> Vec<RetrievalUnit> {
    let mut seen = HashSet::new();
    units
        .into_iter()
        .filter(|u| seen.insert(u.id.clone()))
        .collect()
}

/// Apply the line bounds: `None` below the minimum, truncated above the
/// maximum (the marker is always the last line).
pub(crate) fn bound_lines(content: &str, config: &ChunkerConfig, marker: &str) -> Option<String> {
    let count = content.lines().count();
    if count < config.min_chunk_lines {
        return None;
    }
    Some(truncate_lines(content, config.max_chunk_lines, marker))
}

/// Keep at most `max_lines` lines; when cut, the last kept line is `marker`.
pub fn truncate_lines(content: &str, max_lines: usize, marker: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return content.to_string();
    }
    let keep = max_lines.saturating_sub(1);
    let mut out = lines[..keep].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(marker);
    out
}

/// True when `content` was cut by [`truncate_lines`].
pub fn is_truncated(content: &str) -> bool {
    let last = content.lines().last().unwrap_or("");
    last == CODE_TRUNCATION_MARKER || last == DOC_TRUNCATION_MARKER
}
