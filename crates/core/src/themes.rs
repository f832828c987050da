use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::retrieval::Answerer;
use crate::traits::VectorIndex;
use crate::{ServiceError, DEFAULT_TEMPERATURE};
use std::sync::Arc;

pub const MAIN_IDEA_QUESTION: &str = "What is the main idea of this document?";

/// Which question each selected document is asked before themes are synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThemeMode {
    /// The user's own question, scoped to each document in turn.
    Question(String),
    /// The fixed [`MAIN_IDEA_QUESTION`].
    MainIdea,
}

impl ThemeMode {
    pub fn question(&self) -> &str {
        match self {
            Self::Question(question) => question,
            Self::MainIdea => MAIN_IDEA_QUESTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThemeSummary {
    pub mode: ThemeMode,
    /// Per-document answers in the order they were fed to the synthesizer.
    pub inputs: Vec<(String, String)>,
    pub text: String,
}

pub struct ThemeSynthesizer<L: ?Sized> {
    model: Arc<L>,
    temperature: f32,
}

impl<L: LanguageModel + ?Sized> ThemeSynthesizer<L> {
    pub fn new(model: Arc<L>) -> Self {
        Self {
            model,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Identify recurring themes across `(document, answer)` pairs. The model output is
    /// returned verbatim; its citations are not validated.
    pub async fn synthesize<I, K, V>(&self, answers: I) -> Result<String, ServiceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let rendered = render_answers(answers);
        if rendered.is_empty() {
            return Err(ServiceError::Request(
                "theme synthesis needs at least one document answer".to_string(),
            ));
        }

        let summary = self
            .model
            .complete(&theme_prompt(&rendered), self.temperature)
            .await?;
        tracing::info!(characters = summary.len(), "synthesized themes");
        Ok(summary)
    }
}

/// `[document]: answer` entries separated by blank lines, in iteration order.
pub fn render_answers<I, K, V>(answers: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    answers
        .into_iter()
        .map(|(name, answer)| format!("[{}]: {}\n\n", name.as_ref(), answer.as_ref()))
        .collect()
}

pub fn theme_prompt(rendered_answers: &str) -> String {
    format!(
        "You are analyzing answers extracted from several documents.\n\
Identify 2-3 recurring themes across them. Explain each theme briefly and cite the \
supporting documents for every theme by name in square brackets like [document_name].\n\
\n\
{rendered_answers}Themes:\n"
    )
}

/// Ask every document in `documents` the question implied by `mode`, retrieving only from
/// that document, and pair each name with its answer.
pub async fn collect_theme_inputs<E, V, L, S>(
    answerer: &Answerer<E, V, L>,
    documents: &[S],
    mode: &ThemeMode,
) -> Result<Vec<(String, String)>, ServiceError>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    L: LanguageModel + ?Sized,
    S: AsRef<str>,
{
    let mut inputs = Vec::with_capacity(documents.len());
    for document in documents {
        let name = document.as_ref();
        let result = answerer.answer_scoped(mode.question(), &[name]).await?;
        tracing::debug!(document = name, sources = result.sources.len(), "collected theme input");
        inputs.push((name.to_string(), result.answer));
    }
    Ok(inputs)
}
