//! Grounding context and prompt assembly.
//!
//! Two context shapes exist. A listing context contains only the complete
//! enumerated list of units, so the generator never mistakes a ranked
//! subset for the whole. A snippet context renders each ranked unit with
//! its location, documentation and references, followed by a separate
//! dependencies section.

use crate::models::{RankedResult, RetrievalUnit};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert software engineer assistant. Your task is to answer questions about a codebase using the provided code snippets as context.

Guidelines:
- Answer based ONLY on the provided code snippets
- If the answer is not in the provided code, say so clearly
- Include specific file paths and line numbers when referencing code
- Provide code snippets in your answer when relevant
- Be concise but thorough";

pub const LISTING_SYSTEM_PROMPT: &str = "You are an expert software engineer assistant. The context is the COMPLETE list of matching entities in the indexed codebase, not a sample.

Guidelines:
- Treat the list as exhaustive when counting or enumerating
- Report counts exactly as they appear in the list
- Group or filter the list as the question asks
- Do not invent entities that are not in the list";

/// Answer returned when retrieval found nothing to ground on.
pub const NO_MATCH_ANSWER: &str =
    "No indexed code matched this question. Try different terms or re-run `chx index`.";

fn location(unit: &RetrievalUnit) -> String {
    format!("{}:{}-{}", unit.file_path, unit.start_line, unit.end_line)
}

fn fenced(unit: &RetrievalUnit) -> String {
    format!("```{}\n{}\n```", unit.language, unit.content)
}

/// The enumerated list used for list/count questions.
pub fn build_listing_context(units: &[RetrievalUnit]) -> String {
    let mut out = format!("Complete list of {} indexed entities:\n", units.len());
    for (i, unit) in units.iter().enumerate() {
        let kind = unit
            .metadata
            .get("entity_kind")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| unit.kind.as_str());
        out.push_str(&format!(
            "\n{}. {} [{}] ({})",
            i + 1,
            unit.display_name(),
            kind,
            location(unit)
        ));
        if let Some(summary) = unit
            .documentation
            .as_deref()
            .and_then(|d| d.lines().map(str::trim).find(|l| !l.is_empty()))
        {
            out.push_str(&format!(" - {}", summary));
        }
    }
    out
}

/// Ranked snippets followed by a dependencies section.
pub fn build_snippet_context(sources: &[RankedResult], dependencies: &[RetrievalUnit]) -> String {
    let mut parts: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let unit = &r.unit;
            let mut header = format!("--- Code Snippet {} ({}) ---", i + 1, location(unit));
            if let Some(doc) = &unit.documentation {
                header.push_str(&format!("\nDocumentation: {}", doc));
            }
            if !unit.references.is_empty() {
                header.push_str(&format!("\nReferences: {}", unit.references.join(", ")));
            }
            format!("{}\n\n{}", header, fenced(unit))
        })
        .collect();

    if !dependencies.is_empty() {
        parts.push("=== Dependencies ===".to_string());
        for (i, dep) in dependencies.iter().enumerate() {
            parts.push(format!(
                "--- Dependency {}: {} ({}) ---\n\n{}",
                i + 1,
                dep.display_name(),
                location(dep),
                fenced(dep)
            ));
        }
    }
    parts.join("\n\n")
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following code snippets from the codebase, answer the question.\n\n{}\n\n---\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}
