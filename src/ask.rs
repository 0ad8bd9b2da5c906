//! Question answering commands: `chx query`, `chx chat`, `chx lookup`
//! and `chx deps`.
//!
//! Each command opens the SQLite store, wires the configured embedding and
//! generation providers into a [`Retriever`], and prints the answer
//! followed by the sources it was grounded on. `--json` prints the full
//! response instead.

use anyhow::{bail, Result};
use std::io::{BufRead, Write};
use std::sync::Arc;

use code_harness_core::models::{RankedResult, RetrievalUnit, UnitKind};
use code_harness_core::retrieve::{QueryObserver, QueryOptions, QueryResponse, Retrieval, Retriever};
use code_harness_core::session::ConversationSession;
use code_harness_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::generation::create_generator;
use crate::sqlite_store::SqliteStore;

/// Command-line overrides for a single question.
#[derive(Debug, Clone, Default)]
pub struct AskArgs {
    pub top_k: Option<usize>,
    pub language: Option<String>,
    pub kind: Option<String>,
    pub no_hybrid: bool,
    pub retrieve_only: bool,
    pub json: bool,
}

impl AskArgs {
    pub fn query_options(&self) -> Result<QueryOptions> {
        let kind = match &self.kind {
            Some(k) => Some(parse_kind(k)?),
            None => None,
        };
        Ok(QueryOptions {
            top_k: self.top_k,
            kind,
            language: self.language.clone(),
            use_hybrid: if self.no_hybrid { Some(false) } else { None },
            ..QueryOptions::default()
        })
    }
}

fn parse_kind(s: &str) -> Result<UnitKind> {
    match s.parse() {
        Ok(kind) => Ok(kind),
        Err(_) => {
            let valid: Vec<&str> = UnitKind::ALL.iter().map(|k| k.as_str()).collect();
            bail!("Unknown kind '{}'. Must be one of: {}", s, valid.join(", "))
        }
    }
}

/// Build a retriever over the configured store and providers.
pub async fn build_retriever(
    config: &Config,
    observer: Arc<dyn QueryObserver>,
) -> Result<Retriever> {
    let pool = db::connect(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::new(pool)
            .with_keyword_weights(config.retrieval.keyword_weights())
            .with_model(embedder.model_name()),
    );
    Ok(Retriever::new(store, embedder, generator, config.retriever_config()).with_observer(observer))
}

/// Run `chx query`.
pub async fn run_query(
    config: &Config,
    question: &str,
    args: &AskArgs,
    observer: Arc<dyn QueryObserver>,
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let opts = args.query_options()?;
    let retriever = build_retriever(config, observer).await?;

    if args.retrieve_only {
        let retrieval = retriever.retrieve_only(question, &opts).await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&retrieval)?);
        } else {
            print_retrieval(&retrieval);
        }
        return Ok(());
    }

    let response = retriever.query(question, &opts).await?;
    emit(&response, args.json)
}

/// Run `chx lookup <name>`.
pub async fn run_lookup(
    config: &Config,
    name: &str,
    json: bool,
    observer: Arc<dyn QueryObserver>,
) -> Result<()> {
    let retriever = build_retriever(config, observer).await?;
    let response = retriever.lookup_entity(name).await?;
    emit(&response, json)
}

/// Run `chx deps <path-or-name>`.
pub async fn run_deps(
    config: &Config,
    target: &str,
    json: bool,
    observer: Arc<dyn QueryObserver>,
) -> Result<()> {
    let retriever = build_retriever(config, observer).await?;
    let response = retriever.config_dependencies(target).await?;
    emit(&response, json)
}

/// Run `chx chat`: read questions from stdin until EOF or `exit`.
///
/// Earlier turns are folded into the question sent to the generator; the
/// bare question still drives retrieval.
pub async fn run_chat(
    config: &Config,
    args: &AskArgs,
    observer: Arc<dyn QueryObserver>,
) -> Result<()> {
    let retriever = build_retriever(config, observer).await?;
    let mut session = ConversationSession::new(config.session.max_turns);
    let base = args.query_options()?;

    println!("Ask about the indexed code. Type 'clear' to reset, 'exit' to quit.");
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let question = line?;
        let question = question.trim();
        match question {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                session.clear();
                println!("(history cleared)");
                continue;
            }
            _ => {}
        }

        let opts = QueryOptions {
            generation_question: Some(session.enhance_question(question)),
            ..base.clone()
        };
        match retriever.query(question, &opts).await {
            Ok(response) => {
                print_response(&response);
                session.record(question, &response.answer);
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

fn emit(response: &QueryResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        print_response(response);
    }
    Ok(())
}

fn print_response(response: &QueryResponse) {
    println!("{}", response.answer.trim_end());
    println!();
    print_sources(&response.sources, &response.dependencies);
    if let Some(model) = &response.model {
        println!("model: {}", model);
    }
}

fn print_retrieval(retrieval: &Retrieval) {
    println!(
        "intent: {}{}",
        retrieval.analysis.intent.as_str(),
        if retrieval.listing { " (complete listing)" } else { "" }
    );
    if retrieval.sources.is_empty() {
        println!("No results.");
        return;
    }
    println!();
    print_sources(&retrieval.sources, &retrieval.dependencies);
}

fn print_sources(sources: &[RankedResult], dependencies: &[RetrievalUnit]) {
    if !sources.is_empty() {
        println!("--- Sources ({}) ---", sources.len());
        for (i, result) in sources.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} ({})",
                i + 1,
                result.score,
                result.unit.display_name(),
                result.unit.kind.as_str()
            );
            println!("    {}", location(&result.unit));
        }
    }
    if !dependencies.is_empty() {
        println!("--- Related ({}) ---", dependencies.len());
        for unit in dependencies {
            println!("  {}  {}", unit.display_name(), location(unit));
        }
    }
    if !sources.is_empty() || !dependencies.is_empty() {
        println!();
    }
}

fn location(unit: &RetrievalUnit) -> String {
    format!("{}:{}-{}", unit.file_path, unit.start_line, unit.end_line)
}
