//! Query path: similarity search over the shared index, grounded prompt assembly and answer
//! synthesis with bracketed document citations.

use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::traits::VectorIndex;
use crate::{
    IngestError, QueryResult, RetrievedChunk, SearchFilter, ServiceError, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_K,
};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;

const CITATION_PATTERN: &str = r"\[([^\[\]\n]+)\]";

pub struct Answerer<E: ?Sized, V: ?Sized, L: ?Sized> {
    embedder: Arc<E>,
    index: Arc<V>,
    model: Arc<L>,
    top_k: usize,
    temperature: f32,
    citation_re: Regex,
}

impl<E, V, L> Answerer<E, V, L>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    L: LanguageModel + ?Sized,
{
    pub fn new(embedder: Arc<E>, index: Arc<V>, model: Arc<L>) -> Result<Self, IngestError> {
        Ok(Self {
            embedder,
            index,
            model,
            top_k: DEFAULT_TOP_K,
            temperature: DEFAULT_TEMPERATURE,
            citation_re: Regex::new(CITATION_PATTERN)?,
        })
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Answer from the `top_k` most similar chunks across every indexed document.
    pub async fn answer(&self, question: &str) -> Result<QueryResult, ServiceError> {
        self.answer_filtered(question, &SearchFilter::all()).await
    }

    /// Answer using only chunks from the named documents.
    pub async fn answer_scoped<S: AsRef<str>>(
        &self,
        question: &str,
        documents: &[S],
    ) -> Result<QueryResult, ServiceError> {
        let filter = SearchFilter::sources(documents.iter().map(|name| name.as_ref().to_string()));
        self.answer_filtered(question, &filter).await
    }

    async fn answer_filtered(
        &self,
        question: &str,
        filter: &SearchFilter,
    ) -> Result<QueryResult, ServiceError> {
        if question.trim().is_empty() {
            return Err(ServiceError::Request("question is empty".to_string()));
        }

        let query_vector = self.embedder.embed_one(question).await?;
        let retrieved = self.index.search(&query_vector, self.top_k, filter).await?;
        if retrieved.is_empty() {
            tracing::warn!(question, "no indexed chunks matched, answering without context");
        }

        let (context, sources) = assemble_context(&retrieved);
        let prompt = answer_prompt(&context, &sources, question);
        let answer = self.model.complete(&prompt, self.temperature).await?;
        let cited = self.cited_sources(&answer, &sources);

        tracing::info!(
            retrieved = retrieved.len(),
            sources = sources.len(),
            cited = cited.len(),
            "answered question"
        );

        Ok(QueryResult {
            question: question.to_string(),
            answer,
            sources,
            cited,
            retrieved,
        })
    }

    /// Bracketed names in `answer` that are among `sources`. `[a.pdf, b.pdf]` cites both, unless
    /// `a.pdf, b.pdf` is itself a source name.
    pub fn cited_sources(&self, answer: &str, sources: &BTreeSet<String>) -> BTreeSet<String> {
        self.citation_re
            .captures_iter(answer)
            .filter_map(|capture| capture.get(1))
            .flat_map(|inner| {
                let whole = inner.as_str().trim();
                if sources.contains(whole) {
                    vec![whole]
                } else {
                    whole.split([',', ';']).map(str::trim).collect()
                }
            })
            .filter(|name| sources.contains(*name))
            .map(str::to_string)
            .collect()
    }
}

/// Chunk texts joined by line breaks in rank order, plus the distinct provenance tags.
pub fn assemble_context(retrieved: &[RetrievedChunk]) -> (String, BTreeSet<String>) {
    let mut context = String::new();
    let mut sources = BTreeSet::new();
    for chunk in retrieved {
        context.push_str(&chunk.text);
        context.push('\n');
        sources.insert(chunk.source.clone());
    }
    (context, sources)
}

pub fn answer_prompt(context: &str, sources: &BTreeSet<String>, question: &str) -> String {
    let documents = sources
        .iter()
        .map(|source| format!("[{source}]"))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "You are an expert research assistant. Answer the user's question using only the \
document content provided below.\n\
Cite the document names you rely on in square brackets like [source.pdf].\n\
\n\
Documents: {documents}\n\
\n\
Context:\n\
{context}\n\
Question: {question}\n\
Answer:\n"
    )
}
