//! Relevance gate: turn a user question into a grounded prompt.
//!
//! [`RelevanceGate::prepare`] never fails. Each step degrades on error:
//!
//! | Step | On failure |
//! |------|-----------|
//! | embed the question | no retrieved evidence |
//! | vector query | no retrieved evidence |
//! | load structured context | prompt without project details |
//! | relevance scoring | score 0, prompt without project details |
//!
//! [`RelevanceGate::answer`] adds the generation call; its failure is the
//! only error surfaced to the caller.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use project_context_core::models::{AnalyzerProjectContext, ScoredRecord};
use project_context_core::prompt::{
    compose_system_prompt, compose_user_turn, format_evidence, parse_relevance_score,
    relevance_request, PromptInputs,
};
use project_context_core::store::{ContextStore, VectorQuery, VectorStore};

use crate::config::Config;
use crate::db;
use crate::embedding::configured_dims;
use crate::gateway::{EmbeddingGateway, ModelHandle};
use crate::generation::{create_generator, ChatMessage, TextGenerator};
use crate::index::{default_project_id, resolve_project_path};
use crate::sqlite_store::{SqliteContextStore, SqliteVectorStore};

/// Score recorded when the scoring request fails.
pub const FAILED_SCORE: u8 = 0;

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub threshold: f32,
    pub top_k: usize,
    pub min_score: u8,
    pub app_context: Option<String>,
}

impl GateSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.retrieval.threshold,
            top_k: config.retrieval.top_k,
            min_score: config.relevance.min_score,
            app_context: config.app.context.clone(),
        }
    }
}

/// Which project and owner a question is about.
#[derive(Debug, Clone)]
pub struct ChatScope {
    pub user_id: String,
    /// Keys the structured context store.
    pub project_path: String,
    /// Keys the vector store.
    pub project_id: String,
}

impl ChatScope {
    /// Scope with the project id derived from the path.
    pub fn new(user_id: &str, project_path: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            project_path: project_path.to_string(),
            project_id: default_project_id(project_path),
        }
    }
}

/// Everything needed to call the generator, plus what went into it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedPrompt {
    pub system: String,
    pub user_turn: String,
    pub relevance_score: u8,
    pub evidence: Vec<ScoredRecord>,
    /// Version of the structured context consulted, if one exists.
    pub context_version: Option<i64>,
    pub includes_project_details: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub prepared: PreparedPrompt,
}

pub struct RelevanceGate {
    gateway: EmbeddingGateway,
    vectors: Arc<dyn VectorStore>,
    contexts: Arc<dyn ContextStore>,
    generator: Arc<dyn TextGenerator>,
    settings: GateSettings,
}

impl RelevanceGate {
    pub fn new(
        gateway: EmbeddingGateway,
        vectors: Arc<dyn VectorStore>,
        contexts: Arc<dyn ContextStore>,
        generator: Arc<dyn TextGenerator>,
        settings: GateSettings,
    ) -> Self {
        Self {
            gateway,
            vectors,
            contexts,
            generator,
            settings,
        }
    }

    pub async fn prepare(&self, scope: &ChatScope, message: &str) -> PreparedPrompt {
        let evidence = self.retrieve(scope, message).await;

        let stored = match self
            .contexts
            .get_latest(&scope.user_id, &scope.project_path)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "project context lookup failed");
                None
            }
        };
        let context: Option<&AnalyzerProjectContext> = stored.as_ref().map(|s| &s.context);

        let relevance_score = match context {
            Some(ctx) => self.score(message, ctx).await,
            None => FAILED_SCORE,
        };

        let inputs = PromptInputs {
            app_context: self.settings.app_context.as_deref(),
            relevance_score,
            context,
            min_score: self.settings.min_score,
        };
        let system = compose_system_prompt(&inputs);
        let user_turn = compose_user_turn(message, format_evidence(&evidence).as_deref());

        debug!(
            evidence = evidence.len(),
            relevance_score,
            project_details = inputs.includes_project_details(),
            "prepared prompt"
        );

        PreparedPrompt {
            system,
            user_turn,
            relevance_score,
            includes_project_details: inputs.includes_project_details(),
            context_version: stored.as_ref().map(|s| s.version),
            evidence,
        }
    }

    /// Prepare the prompt and generate the answer.
    ///
    /// `history` holds earlier turns of the conversation, oldest first.
    pub async fn answer(
        &self,
        scope: &ChatScope,
        message: &str,
        history: &[ChatMessage],
    ) -> Result<Answer> {
        let prepared = self.prepare(scope, message).await;

        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prepared.user_turn.clone()));

        let text = self
            .generator
            .complete(&prepared.system, &messages)
            .await
            .context("Generation failed")?;

        Ok(Answer { text, prepared })
    }

    async fn retrieve(&self, scope: &ChatScope, message: &str) -> Vec<ScoredRecord> {
        let Some(embedding) = self.gateway.embed_one(message).await else {
            debug!("no query embedding; answering without retrieved evidence");
            return Vec::new();
        };

        let query = VectorQuery {
            embedding: &embedding,
            threshold: self.settings.threshold,
            top_k: self.settings.top_k,
            project_id: &scope.project_id,
            user_id: Some(scope.user_id.as_str()),
        };
        match self.vectors.query(&query).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "vector query failed");
                Vec::new()
            }
        }
    }

    async fn score(&self, message: &str, ctx: &AnalyzerProjectContext) -> u8 {
        let (system, user) = relevance_request(message, ctx);
        match self
            .generator
            .complete(&system, &[ChatMessage::user(user)])
            .await
        {
            Ok(reply) => parse_relevance_score(&reply),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "relevance scoring failed; using score 0");
                FAILED_SCORE
            }
        }
    }
}

/// What `pctx prompt` / `pctx ask` are asked about.
#[derive(Debug, Clone)]
pub struct QuestionArgs {
    pub path: PathBuf,
    pub question: String,
    pub user: String,
    pub project_id: Option<String>,
    pub json: bool,
}

async fn build_gate(config: &Config, args: &QuestionArgs) -> Result<(RelevanceGate, ChatScope)> {
    let pool = db::open(config).await?;
    let metric = config.retrieval.similarity_metric()?;

    let gateway = EmbeddingGateway::new(Arc::new(ModelHandle::from_config(&config.embedding)));
    let dims = match gateway.dims().await {
        Some(dims) => dims,
        None => configured_dims(&config.embedding).unwrap_or(0),
    };

    let gate = RelevanceGate::new(
        gateway,
        Arc::new(SqliteVectorStore::new(pool.clone(), dims, metric)),
        Arc::new(SqliteContextStore::new(pool)),
        create_generator(&config.generation)?,
        GateSettings::from_config(config),
    );

    let project_path = resolve_project_path(&args.path);
    let mut scope = ChatScope::new(&args.user, &project_path);
    if let Some(id) = &args.project_id {
        scope.project_id = id.clone();
    }
    Ok((gate, scope))
}

/// Entry point for `pctx prompt`: print the prompt without generating.
pub async fn run_prompt(config: &Config, args: QuestionArgs) -> Result<()> {
    let (gate, scope) = build_gate(config, &args).await?;
    let prepared = gate.prepare(&scope, &args.question).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
        return Ok(());
    }

    println!("=== system ===");
    println!("{}", prepared.system);
    println!();
    println!("=== user ===");
    println!("{}", prepared.user_turn);
    println!();
    println!(
        "relevance: {}  evidence: {}  project details: {}",
        prepared.relevance_score,
        prepared.evidence.len(),
        if prepared.includes_project_details { "yes" } else { "no" }
    );
    Ok(())
}

/// Entry point for `pctx ask`.
pub async fn run_ask(config: &Config, args: QuestionArgs) -> Result<()> {
    if !config.generation.is_enabled() {
        bail!("generation.provider is disabled; use `pctx prompt` to see the composed prompt");
    }
    let (gate, scope) = build_gate(config, &args).await?;
    let answer = gate.answer(&scope, &args.question, &[]).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.text.trim_end());
    if !answer.prepared.evidence.is_empty() {
        println!();
        println!("sources:");
        for hit in &answer.prepared.evidence {
            println!(
                "  {}:{}-{} ({:.2})",
                hit.record.file_path, hit.record.start_line, hit.record.end_line, hit.similarity
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::Utc;
    use project_context_core::embedding::{EmbeddingBackend, SimilarityMetric};
    use project_context_core::models::{Technology, TechnologyCategory, VectorRecord};
    use project_context_core::store::memory::{InMemoryContextStore, InMemoryVectorStore};
    use std::sync::Mutex;

    struct UnitBackend;

    #[async_trait]
    impl EmbeddingBackend for UnitBackend {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Replies to scoring requests with a fixed text, to answers with "answer".
    struct ScriptedGenerator {
        score_reply: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, system: &str, _messages: &[ChatMessage]) -> Result<String> {
            self.calls.lock().unwrap().push(system.to_string());
            if system.starts_with("You rate") {
                match &self.score_reply {
                    Some(reply) => Ok(reply.clone()),
                    None => bail!("scorer offline"),
                }
            } else {
                Ok("answer".to_string())
            }
        }
    }

    const PATH: &str = "/work/app";

    fn context() -> AnalyzerProjectContext {
        AnalyzerProjectContext {
            technologies: vec![Technology {
                name: "Rust".to_string(),
                category: TechnologyCategory::Language,
                version: None,
                description: None,
            }],
            ..Default::default()
        }
    }

    fn settings() -> GateSettings {
        GateSettings {
            threshold: 0.75,
            top_k: 5,
            min_score: 3,
            app_context: Some("Acme IDE".to_string()),
        }
    }

    async fn gate(score_reply: Option<&str>, with_context: bool, with_hit: bool) -> (RelevanceGate, Arc<ScriptedGenerator>) {
        let vectors = Arc::new(InMemoryVectorStore::new(2, SimilarityMetric::Cosine));
        if with_hit {
            vectors
                .store(&[VectorRecord {
                    id: "r1".to_string(),
                    project_id: default_project_id(PATH),
                    user_id: "alice".to_string(),
                    file_path: "src/main.rs".to_string(),
                    chunk_text: "fn main() {}".to_string(),
                    embedding: vec![1.0, 0.0],
                    chunk_sequence_number: 0,
                    start_offset: 0,
                    end_offset: 12,
                    start_line: 1,
                    end_line: 1,
                    created_at: Utc::now(),
                }])
                .await;
        }
        let contexts = Arc::new(InMemoryContextStore::new());
        if with_context {
            contexts.store("alice", PATH, &context()).await.unwrap();
        }
        let generator = Arc::new(ScriptedGenerator {
            score_reply: score_reply.map(|s| s.to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let gate = RelevanceGate::new(
            EmbeddingGateway::new(Arc::new(ModelHandle::from_backend(Arc::new(UnitBackend)))),
            vectors,
            contexts,
            generator.clone(),
            settings(),
        );
        (gate, generator)
    }

    #[tokio::test]
    async fn test_score_three_keeps_standard_prompt() {
        let (gate, _) = gate(Some("3"), true, false).await;
        let prepared = gate.prepare(&ChatScope::new("alice", PATH), "how?").await;
        assert_eq!(prepared.relevance_score, 3);
        assert!(!prepared.includes_project_details);
        assert!(!prepared.system.contains("## General project details"));
        assert!(prepared.system.contains("Acme IDE"));
    }

    #[tokio::test]
    async fn test_score_four_adds_project_details() {
        let (gate, _) = gate(Some("Relevance: 4/10"), true, false).await;
        let prepared = gate.prepare(&ChatScope::new("alice", PATH), "how?").await;
        assert_eq!(prepared.relevance_score, 4);
        assert!(prepared.includes_project_details);
        assert!(prepared.system.contains("- Rust"));
        assert_eq!(prepared.context_version, Some(1));
    }

    #[tokio::test]
    async fn test_scoring_failure_degrades_to_zero() {
        let (gate, _) = gate(None, true, true).await;
        let prepared = gate.prepare(&ChatScope::new("alice", PATH), "how?").await;
        assert_eq!(prepared.relevance_score, FAILED_SCORE);
        assert!(!prepared.includes_project_details);
        assert_eq!(prepared.evidence.len(), 1);
        assert!(prepared.user_turn.contains("src/main.rs"));
        assert!(prepared.user_turn.ends_with("how?"));
    }

    #[tokio::test]
    async fn test_no_context_skips_scoring() {
        let (gate, generator) = gate(Some("9"), false, true).await;
        let answer = gate
            .answer(&ChatScope::new("alice", PATH), "where is main?", &[])
            .await
            .unwrap();
        assert_eq!(answer.text, "answer");
        assert_eq!(generator.calls.lock().unwrap().len(), 1);
        assert_eq!(answer.prepared.evidence[0].record.file_path, "src/main.rs");
    }

    #[tokio::test]
    async fn test_other_users_rows_are_not_evidence() {
        let (gate, _) = gate(None, false, true).await;
        let prepared = gate.prepare(&ChatScope::new("bob", PATH), "where is main?").await;
        assert!(prepared.evidence.is_empty());
        assert_eq!(prepared.user_turn, "where is main?");
    }
}
