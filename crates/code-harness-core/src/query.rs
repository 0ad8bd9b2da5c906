//! Question analysis: intent, candidate names, search terms, and policy.
//!
//! [`analyze_query`] is a pure function. Everything it decides comes from
//! the ordered tables in this module so that precedence is visible in one
//! place:
//!
//! - [`INTENT_RULES`]: phrase lists checked top to bottom; first match wins,
//!   [`QueryIntent::Search`] otherwise. Phrases match on word boundaries, so
//!   `count` does not fire on `account`.
//! - [`POLICY_RULES`]: `(result_count, similarity_floor, include_dependencies,
//!   kind_filter)` per intent.
//! - [`SYNONYMS`]: term expansion, applied in both directions.
//!
//! Singular "which X" is deliberately absent from the list phrases: "which
//! class handles logging" asks for one recommendation, while "which classes
//! …" asks for an enumeration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use crate::models::UnitKind;

/// Closed set of question purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// "what is X", "describe X"
    Definition,
    /// "how does X work"
    Explanation,
    /// "list all X", "how many X"
    ListCount,
    /// "who calls X"
    Usage,
    /// "X vs Y"
    Comparison,
    /// table/entity/field shape questions
    Schema,
    Search,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Definition => "definition",
            QueryIntent::Explanation => "explanation",
            QueryIntent::ListCount => "list_count",
            QueryIntent::Usage => "usage",
            QueryIntent::Comparison => "comparison",
            QueryIntent::Schema => "schema",
            QueryIntent::Search => "search",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct IntentRule {
    pub intent: QueryIntent,
    pub phrases: &'static [&'static str],
}

/// Intent rules in precedence order.
pub const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        intent: QueryIntent::ListCount,
        phrases: &[
            "list all",
            "list the",
            "show all",
            "what are all",
            "what are the",
            "which classes",
            "which methods",
            "which files",
            "which ones",
            "which all",
            "how many",
            "count",
            "enumerate",
            "all the",
            "all indexed",
            "all classes",
            "all methods",
        ],
    },
    IntentRule {
        intent: QueryIntent::Schema,
        phrases: &[
            "schema",
            "database schema",
            "table",
            "tables",
            "ddl",
            "entity",
            "entities",
            "orm",
            "jpa",
            "hibernate",
            "model",
            "fields",
        ],
    },
    IntentRule {
        intent: QueryIntent::Usage,
        phrases: &[
            "where is",
            "who uses",
            "what uses",
            "what calls",
            "called by",
            "used by",
            "references to",
            "usages of",
            "find usages",
        ],
    },
    IntentRule {
        intent: QueryIntent::Comparison,
        phrases: &[
            "compare",
            "difference between",
            "vs",
            "versus",
            "differ",
            "similar to",
            "different from",
        ],
    },
    IntentRule {
        intent: QueryIntent::Definition,
        phrases: &[
            "what is",
            "what's",
            "define",
            "describe",
            "tell me about",
            "show me",
            "get me",
        ],
    },
    IntentRule {
        intent: QueryIntent::Explanation,
        phrases: &[
            "how does",
            "how do",
            "explain",
            "why does",
            "why do",
            "how is",
            "how are",
            "what happens when",
            "walk through",
            "which class will",
            "which method will",
            "which should",
            "which would",
            "which can",
        ],
    },
];

/// How a policy derives its kind filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilterRule {
    None,
    Entity,
    /// Entity kind only when the question named an entity.
    EntityIfDetected,
}

pub struct PolicyRule {
    pub intent: QueryIntent,
    pub result_count: usize,
    pub similarity_floor: f32,
    pub include_dependencies: bool,
    pub kind_filter: KindFilterRule,
}

pub const POLICY_RULES: &[PolicyRule] = &[
    PolicyRule {
        intent: QueryIntent::Definition,
        result_count: 5,
        similarity_floor: 0.6,
        include_dependencies: false,
        kind_filter: KindFilterRule::EntityIfDetected,
    },
    PolicyRule {
        intent: QueryIntent::Explanation,
        result_count: 10,
        similarity_floor: 0.5,
        include_dependencies: true,
        kind_filter: KindFilterRule::None,
    },
    PolicyRule {
        intent: QueryIntent::ListCount,
        result_count: 50,
        similarity_floor: 0.3,
        include_dependencies: false,
        kind_filter: KindFilterRule::Entity,
    },
    PolicyRule {
        intent: QueryIntent::Usage,
        result_count: 15,
        similarity_floor: 0.5,
        include_dependencies: false,
        kind_filter: KindFilterRule::None,
    },
    PolicyRule {
        intent: QueryIntent::Comparison,
        result_count: 10,
        similarity_floor: 0.5,
        include_dependencies: false,
        kind_filter: KindFilterRule::None,
    },
    PolicyRule {
        intent: QueryIntent::Schema,
        result_count: 10,
        similarity_floor: 0.5,
        include_dependencies: true,
        kind_filter: KindFilterRule::Entity,
    },
    PolicyRule {
        intent: QueryIntent::Search,
        result_count: 10,
        similarity_floor: 0.5,
        include_dependencies: false,
        kind_filter: KindFilterRule::None,
    },
];

/// Term → related terms. Expansion also runs backwards (related → term).
pub const SYNONYMS: &[(&str, &[&str])] = &[
    ("auth", &["authentication", "authorize", "login", "credential", "token", "session", "security"]),
    ("authentication", &["auth", "login", "credential", "token", "session", "security"]),
    ("login", &["auth", "authentication", "signin", "credential", "session"]),
    ("security", &["auth", "authentication", "permission", "role", "access", "token"]),
    ("save", &["persist", "store", "write", "insert", "create", "update"]),
    ("load", &["read", "fetch", "get", "retrieve", "query"]),
    ("delete", &["remove", "destroy", "drop", "clear"]),
    ("update", &["modify", "change", "edit", "patch", "save"]),
    ("api", &["endpoint", "rest", "controller", "route", "handler"]),
    ("request", &["http", "call", "invoke", "fetch"]),
    ("response", &["result", "return", "output"]),
    ("database", &["db", "repository", "dao", "store", "persistence"]),
    ("query", &["select", "find", "search", "filter"]),
    ("table", &["entity", "model", "schema", "record"]),
    ("error", &["exception", "failure", "fault", "issue"]),
    ("exception", &["error", "throw", "catch", "handle"]),
    ("validation", &["validate", "check", "verify", "sanitize"]),
    ("config", &["configuration", "settings", "properties", "options"]),
    ("util", &["utility", "helper", "common", "shared"]),
    ("service", &["manager", "handler", "processor", "provider"]),
    ("factory", &["builder", "creator", "generator"]),
    ("payment", &["pay", "transaction", "checkout", "billing", "charge", "invoice"]),
    ("transaction", &["payment", "transfer", "operation"]),
    ("user", &["account", "profile", "member", "customer"]),
    ("account", &["user", "profile", "credential"]),
];

/// Capitalized words that are never entity candidates.
const COMMON_WORDS: &[&str] = &[
    "I", "A", "The", "How", "What", "When", "Where", "Why", "Which", "Who", "This", "That",
    "These", "Those", "It", "Is", "Are", "Was", "Were", "Has", "Have", "Had", "Do", "Does", "Did",
    "Will", "Would", "Should", "Can", "Could", "May", "Might", "Must", "Shall", "To", "From",
    "For", "With", "Without", "By", "In", "On", "At", "Of", "And", "Or", "But", "Show", "List",
    "Tell", "Explain", "Describe", "Compare", "Find",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by",
    "from", "as", "into", "through", "during", "before", "after", "above", "below", "between",
    "under", "again", "further", "then", "once", "what", "which", "who", "whom", "this", "that",
    "these", "those", "am", "it", "its", "and", "but", "if", "or", "because", "until", "while",
    "how", "where", "when", "why", "all", "each", "every", "both", "few", "more", "most",
    "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too",
    "very", "just", "also", "now", "here", "there", "me", "my", "i", "you", "your", "we", "our",
    "they", "their", "show", "tell", "get", "find", "search", "look", "describe", "explain",
    "list",
];

const MAX_PRIMARY_TERMS: usize = 10;
const MAX_EXPANDED_TERMS: usize = 15;
const MAX_KEYWORDS: usize = 10;

static INTENT_MATCHERS: LazyLock<Vec<(QueryIntent, Regex)>> = LazyLock::new(|| {
    INTENT_RULES
        .iter()
        .map(|rule| {
            let alternation = rule
                .phrases
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"\b(?:{})\b", alternation))
                .expect("intent phrases form a valid regex");
            (rule.intent, re)
        })
        .collect()
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-zA-Z0-9]*(?:Bean|Facade|Record|Data|Config|Type|Service|Manager|Handler|Controller|Utils|Helper|Factory|Builder|Parser|Writer|Reader|Exception|Error|Interface|Abstract|Repository|Dao|Entity|Model|Dto|Request|Response)?)\b",
    )
    .expect("valid entity regex")
});

static MEMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b((?:get|set|is|has|can|do|make|create|build|find|search|load|save|delete|update|process|handle|validate)?[a-z][a-zA-Z0-9]*[A-Z][a-zA-Z0-9]*)\b",
    )
    .expect("valid member regex")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z][a-z0-9_]*\b").expect("valid word regex"));

/// Result of analyzing one question. Recommendations apply only where the
/// caller did not override them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    pub primary_terms: Vec<String>,
    pub expanded_terms: Vec<String>,
    pub entity_names: Vec<String>,
    pub member_names: Vec<String>,
    pub result_count: usize,
    pub similarity_floor: f32,
    pub include_dependencies: bool,
    pub kind_filter: Option<UnitKind>,
}

impl QueryAnalysis {
    /// Entity, member and primary terms, deduplicated case-insensitively.
    pub fn keywords(&self) -> Vec<String> {
        let all = self
            .entity_names
            .iter()
            .chain(&self.member_names)
            .chain(&self.primary_terms);
        dedupe_case_insensitive(all.cloned()).into_iter().take(MAX_KEYWORDS).collect()
    }

    /// Terms for keyword search: primary followed by expanded.
    pub fn search_terms(&self) -> Vec<String> {
        dedupe_case_insensitive(self.primary_terms.iter().chain(&self.expanded_terms).cloned())
    }
}

/// Classify a question and derive its retrieval policy.
pub fn analyze_query(question: &str) -> QueryAnalysis {
    let lower = question.trim().to_lowercase();

    let entity_names = dedupe_case_sensitive(
        ENTITY_RE
            .captures_iter(question)
            .map(|c| c[1].to_string())
            .filter(|n| n.len() >= 2 && !COMMON_WORDS.contains(&n.as_str())),
    );
    let member_names =
        dedupe_case_sensitive(MEMBER_RE.captures_iter(question).map(|c| c[1].to_string()));

    let intent = detect_intent(&lower);
    let primary_terms = primary_terms(&lower, &entity_names, &member_names);
    let expanded_terms = expand_terms(&primary_terms);
    let policy = policy_for(intent);
    let kind_filter = match policy.kind_filter {
        KindFilterRule::None => None,
        KindFilterRule::Entity => Some(UnitKind::Entity),
        KindFilterRule::EntityIfDetected if !entity_names.is_empty() => Some(UnitKind::Entity),
        KindFilterRule::EntityIfDetected => None,
    };

    QueryAnalysis {
        intent,
        primary_terms,
        expanded_terms,
        entity_names,
        member_names,
        result_count: policy.result_count,
        similarity_floor: policy.similarity_floor,
        include_dependencies: policy.include_dependencies,
        kind_filter,
    }
}

/// First matching rule in [`INTENT_RULES`] order.
pub fn detect_intent(question_lower: &str) -> QueryIntent {
    INTENT_MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(question_lower))
        .map(|(intent, _)| *intent)
        .unwrap_or(QueryIntent::Search)
}

pub fn policy_for(intent: QueryIntent) -> &'static PolicyRule {
    POLICY_RULES
        .iter()
        .find(|p| p.intent == intent)
        .unwrap_or(&POLICY_RULES[POLICY_RULES.len() - 1])
}

fn primary_terms(question_lower: &str, entities: &[String], members: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = entities.iter().chain(members).cloned().collect();
    let mut seen: HashSet<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    for m in WORD_RE.find_iter(question_lower) {
        let word = m.as_str();
        if word.len() > 2 && !STOP_WORDS.contains(&word) && seen.insert(word.to_string()) {
            terms.push(word.to_string());
        }
    }
    terms.truncate(MAX_PRIMARY_TERMS);
    terms
}

fn expand_terms(primary: &[String]) -> Vec<String> {
    let primary_lower: HashSet<String> = primary.iter().map(|t| t.to_lowercase()).collect();
    let mut expanded: Vec<String> = Vec::new();
    let mut push = |term: &str, out: &mut Vec<String>| {
        if !primary_lower.contains(term) && !out.iter().any(|t| t == term) {
            out.push(term.to_string());
        }
    };
    for term in primary {
        let lower = term.to_lowercase();
        for (key, related) in SYNONYMS {
            if *key == lower {
                related.iter().for_each(|r| push(r, &mut expanded));
            } else if related.contains(&lower.as_str()) {
                push(key, &mut expanded);
                related.iter().for_each(|r| push(r, &mut expanded));
            }
        }
    }
    expanded.truncate(MAX_EXPANDED_TERMS);
    expanded
}

fn dedupe_case_sensitive(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(i.clone())).collect()
}

fn dedupe_case_insensitive(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(i.to_lowercase())).collect()
}
