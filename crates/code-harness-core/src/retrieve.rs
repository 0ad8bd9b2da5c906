//! The hybrid retriever: analysis, lookup, search, dependency expansion,
//! context assembly and generation.
//!
//! [`Retriever::query`] runs the steps strictly in order:
//!
//! 1. analyze the question ([`analyze_query`]); caller overrides win;
//! 2. direct lookup of each entity candidate, first hit kept; for schema
//!    questions the result set becomes every unit of that entity;
//! 3. list/count questions over entities take the complete
//!    [`Store::list_all`] instead of a similarity-ranked subset;
//! 4. otherwise embed the question and run [`hybrid_search`];
//! 5. the direct hit is moved to rank 0 with score 1.0;
//! 6. dependencies are resolved when the policy asks for them;
//! 7. context is built (listing or snippets);
//! 8. the generator answers.
//!
//! Embedding and generation failures surface as
//! [`RagError::ExternalService`] and are not retried here.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::{
    build_listing_context, build_prompt, build_snippet_context, DEFAULT_SYSTEM_PROMPT,
    LISTING_SYSTEM_PROMPT, NO_MATCH_ANSWER,
};
use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::generation::{GenerationRequest, TextGenerator};
use crate::models::{RankedResult, RetrievalUnit, UnitKind};
use crate::query::{analyze_query, QueryAnalysis, QueryIntent};
use crate::search::{hybrid_search, FusionParams, HybridRequest};
use crate::store::{SearchFilters, Store};

/// Retriever tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub fusion: FusionParams,
    /// References followed per ranked unit.
    pub max_deps_per_unit: usize,
    /// Units fetched per reverse-reference lookup.
    pub reverse_dependency_limit: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Replaces [`DEFAULT_SYSTEM_PROMPT`]. Listing answers keep
    /// [`LISTING_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            fusion: FusionParams::default(),
            max_deps_per_unit: 5,
            reverse_dependency_limit: 5,
            temperature: 0.3,
            max_output_tokens: 2048,
            system_prompt: None,
        }
    }
}

/// Per-query overrides of the analyzer's recommendations.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub similarity_floor: Option<f32>,
    pub kind: Option<UnitKind>,
    pub language: Option<String>,
    pub include_dependencies: Option<bool>,
    pub use_hybrid: Option<bool>,
    /// Question text shown to the generator in place of the raw question,
    /// e.g. with conversation history prepended. Retrieval always uses the
    /// raw question.
    pub generation_question: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Analyzing,
    Searching,
    Embedding,
    Generating,
    Done,
}

/// Receives status events while a query runs.
pub trait QueryObserver: Send + Sync {
    fn on_status(&self, status: QueryStatus);
}

pub struct NoopObserver;

impl QueryObserver for NoopObserver {
    fn on_status(&self, _status: QueryStatus) {}
}

/// Output of steps 1-6.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub analysis: QueryAnalysis,
    pub sources: Vec<RankedResult>,
    pub dependencies: Vec<RetrievalUnit>,
    /// True when `sources` is a complete listing.
    pub listing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<RankedResult>,
    pub dependencies: Vec<RetrievalUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<QueryAnalysis>,
    pub listing: bool,
    /// Generator model, absent when no generation call was made.
    pub model: Option<String>,
}

impl QueryResponse {
    fn without_generation(answer: String) -> Self {
        Self {
            answer,
            sources: Vec::new(),
            dependencies: Vec::new(),
            analysis: None,
            listing: false,
            model: None,
        }
    }

    fn not_found(err: RagError) -> Self {
        Self::without_generation(format!("Sorry, {}.", err))
    }
}

fn exact(units: Vec<RetrievalUnit>) -> Vec<RankedResult> {
    units
        .into_iter()
        .map(|unit| RankedResult { unit, score: 1.0 })
        .collect()
}

fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn TextGenerator>,
    config: RetrieverConfig,
    observer: Arc<dyn QueryObserver>,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            config,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Answer `question` from the index.
    pub async fn query(&self, question: &str, opts: &QueryOptions) -> Result<QueryResponse> {
        let retrieval = self.retrieve_only(question, opts).await?;
        if retrieval.sources.is_empty() {
            self.observer.on_status(QueryStatus::Done);
            return Ok(QueryResponse {
                analysis: Some(retrieval.analysis),
                ..QueryResponse::without_generation(NO_MATCH_ANSWER.to_string())
            });
        }

        let (context, system) = if retrieval.listing {
            let units: Vec<RetrievalUnit> =
                retrieval.sources.iter().map(|r| r.unit.clone()).collect();
            (build_listing_context(&units), LISTING_SYSTEM_PROMPT.to_string())
        } else {
            (
                build_snippet_context(&retrieval.sources, &retrieval.dependencies),
                self.default_system_prompt(),
            )
        };
        let shown = opts.generation_question.as_deref().unwrap_or(question);
        let answer = self.generate(build_prompt(shown, &context), system).await?;
        self.observer.on_status(QueryStatus::Done);

        Ok(QueryResponse {
            answer,
            sources: retrieval.sources,
            dependencies: retrieval.dependencies,
            analysis: Some(retrieval.analysis),
            listing: retrieval.listing,
            model: Some(self.generator.model_name().to_string()),
        })
    }

    /// Steps 1-6 without generation.
    pub async fn retrieve_only(&self, question: &str, opts: &QueryOptions) -> Result<Retrieval> {
        self.observer.on_status(QueryStatus::Analyzing);
        let mut analysis = analyze_query(question);
        if let Some(k) = opts.top_k {
            analysis.result_count = k;
        }
        if let Some(floor) = opts.similarity_floor {
            analysis.similarity_floor = floor;
        }
        if let Some(kind) = opts.kind {
            analysis.kind_filter = Some(kind);
        }
        if let Some(deps) = opts.include_dependencies {
            analysis.include_dependencies = deps;
        }
        let filters = SearchFilters {
            kind: analysis.kind_filter,
            language: opts.language.clone(),
        };

        self.observer.on_status(QueryStatus::Searching);
        let mut direct: Option<RetrievalUnit> = None;
        for name in &analysis.entity_names {
            if let Some(unit) = self.store.get_by_entity_name(name).await? {
                direct = Some(unit);
                break;
            }
        }

        let mut listing = false;
        let sources = match (&direct, analysis.intent) {
            (Some(hit), QueryIntent::Schema) => self.entity_units(hit).await?,
            _ if analysis.intent == QueryIntent::ListCount
                && analysis.kind_filter == Some(UnitKind::Entity) =>
            {
                listing = true;
                exact(self.store.list_all(&filters).await?)
            }
            _ => {
                self.observer.on_status(QueryStatus::Embedding);
                let query_vec = self
                    .embedder
                    .embed(question)
                    .await
                    .map_err(|e| RagError::external("embedding", e))?;
                let terms = analysis.search_terms();
                let params = FusionParams {
                    use_hybrid: opts.use_hybrid.unwrap_or(self.config.fusion.use_hybrid),
                    ..self.config.fusion
                };
                let req = HybridRequest {
                    query_vec: &query_vec,
                    terms: &terms,
                    count: analysis.result_count,
                    filters: &filters,
                    similarity_floor: analysis.similarity_floor,
                    params,
                };
                let mut ranked = hybrid_search(self.store.as_ref(), &req).await?;
                if let Some(hit) = &direct {
                    ranked.retain(|r| r.unit.id != hit.id);
                    ranked.insert(
                        0,
                        RankedResult {
                            unit: hit.clone(),
                            score: 1.0,
                        },
                    );
                    ranked.truncate(analysis.result_count.max(1));
                }
                ranked
            }
        };

        let dependencies = if analysis.include_dependencies && !listing {
            self.resolve_dependencies(&sources).await?
        } else {
            Vec::new()
        };
        tracing::debug!(
            intent = %analysis.intent,
            sources = sources.len(),
            dependencies = dependencies.len(),
            listing,
            "retrieval complete"
        );

        Ok(Retrieval {
            analysis,
            sources,
            dependencies,
            listing,
        })
    }

    /// Explain one entity: all of its units, what it depends on and what
    /// references it.
    pub async fn lookup_entity(&self, name: &str) -> Result<QueryResponse> {
        self.observer.on_status(QueryStatus::Searching);
        let Some(entity) = self.store.get_by_entity_name(name).await? else {
            self.observer.on_status(QueryStatus::Done);
            return Ok(QueryResponse::not_found(RagError::LookupMiss {
                what: "entity",
                name: name.to_string(),
            }));
        };
        let sources = self.entity_units(&entity).await?;
        let mut dependencies = self.resolve_dependencies(&sources[..1]).await?;

        let entity_name = entity.entity_name.clone().unwrap_or_else(|| name.to_string());
        let mut seen: HashSet<String> = sources
            .iter()
            .map(|r| r.unit.id.clone())
            .chain(dependencies.iter().map(|u| u.id.clone()))
            .collect();
        for unit in self
            .store
            .find_referencing(simple_name(&entity_name), self.config.reverse_dependency_limit)
            .await?
        {
            if seen.insert(unit.id.clone()) {
                dependencies.push(unit);
            }
        }

        let question = format!(
            "Explain the {} entity: its purpose, its structure, what it depends on, and which code references it.",
            entity_name
        );
        let context = build_snippet_context(&sources, &dependencies);
        let answer = self
            .generate(build_prompt(&question, &context), self.default_system_prompt())
            .await?;
        self.observer.on_status(QueryStatus::Done);

        Ok(QueryResponse {
            answer,
            sources,
            dependencies,
            analysis: None,
            listing: false,
            model: Some(self.generator.model_name().to_string()),
        })
    }

    /// Resolve the entities a configuration document references. No
    /// generation call is made.
    pub async fn config_dependencies(&self, path_or_name: &str) -> Result<QueryResponse> {
        let wanted = crate::models::normalize_path(path_or_name);
        let documents = self
            .store
            .list_all(&SearchFilters::kind(UnitKind::ConfigDocument))
            .await?;
        let Some(document) = documents.into_iter().find(|d| {
            d.file_path == wanted
                || d.file_path.ends_with(&format!("/{}", wanted))
                || d.document_name() == path_or_name
        }) else {
            return Ok(QueryResponse::not_found(RagError::LookupMiss {
                what: "config document",
                name: path_or_name.to_string(),
            }));
        };

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for name in &document.references {
            match self.store.get_by_entity_name(name).await? {
                Some(unit) => resolved.push(unit),
                None => unresolved.push(name.clone()),
            }
        }

        let mut answer = format!(
            "{} references {} indexed entit{}",
            document.file_path,
            resolved.len(),
            if resolved.len() == 1 { "y" } else { "ies" }
        );
        if !resolved.is_empty() {
            let names: Vec<String> = resolved.iter().map(|u| u.display_name()).collect();
            answer.push_str(&format!(": {}", names.join(", ")));
        }
        answer.push('.');
        if !unresolved.is_empty() {
            answer.push_str(&format!(" Not indexed: {}.", unresolved.join(", ")));
        }

        Ok(QueryResponse {
            answer,
            sources: exact(vec![document]),
            dependencies: resolved,
            analysis: None,
            listing: false,
            model: None,
        })
    }

    /// The entity unit first, then its other units by start line.
    async fn entity_units(&self, entity: &RetrievalUnit) -> Result<Vec<RankedResult>> {
        let name = entity.entity_name.as_deref().unwrap_or_default();
        let mut units = self.store.get_all_units_for_entity(name).await?;
        units.retain(|u| u.id != entity.id);
        units.insert(0, entity.clone());
        Ok(exact(units))
    }

    async fn resolve_dependencies(&self, sources: &[RankedResult]) -> Result<Vec<RetrievalUnit>> {
        let mut seen: HashSet<String> = sources.iter().map(|r| r.unit.id.clone()).collect();
        let mut dependencies = Vec::new();
        for r in sources {
            for name in r.unit.references.iter().take(self.config.max_deps_per_unit) {
                if let Some(unit) = self.store.get_by_entity_name(name).await? {
                    if seen.insert(unit.id.clone()) {
                        dependencies.push(unit);
                    }
                }
            }
            if r.unit.kind.is_document() {
                let referencing = self
                    .store
                    .find_referencing(&r.unit.document_name(), self.config.reverse_dependency_limit)
                    .await?;
                for unit in referencing {
                    if seen.insert(unit.id.clone()) {
                        dependencies.push(unit);
                    }
                }
            }
        }
        Ok(dependencies)
    }

    fn default_system_prompt(&self) -> String {
        self.config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    async fn generate(&self, prompt: String, system: String) -> Result<String> {
        self.observer.on_status(QueryStatus::Generating);
        let request = GenerationRequest {
            prompt,
            system_instruction: Some(system),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };
        let answer = self
            .generator
            .generate(&request)
            .await
            .map_err(|e| RagError::external("generation", e))?;
        Ok(answer)
    }
}
