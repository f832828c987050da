use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::extractor::{ExtractionMethod, Extractor};
use crate::indexer::{IndexReport, Indexer};
use crate::llm::LanguageModel;
use crate::retrieval::Answerer;
use crate::themes::{collect_theme_inputs, ThemeMode, ThemeSummary, ThemeSynthesizer};
use crate::traits::VectorIndex;
use crate::{
    Document, DocumentStatus, IngestError, MediaType, PipelineOptions, QueryResult, ServiceError,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub document: String,
    pub media_type: MediaType,
    pub characters: usize,
    pub method: ExtractionMethod,
    /// Why extraction produced no text, when a backend failed rather than the document being blank.
    pub failure: Option<String>,
    pub chunks_embedded: usize,
}

impl IngestOutcome {
    pub fn has_text(&self) -> bool {
        self.characters > 0
    }
}

/// One ingestion session: the uploaded documents, the shared index they are embedded into, and
/// the components that read it.
pub struct Session<E: ?Sized, V: ?Sized, L: ?Sized> {
    extractor: Extractor,
    indexer: Indexer<E, V>,
    answerer: Answerer<E, V, L>,
    synthesizer: ThemeSynthesizer<L>,
    index: Arc<V>,
    documents: Vec<Document>,
}

impl<E, V, L> Session<E, V, L>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    L: LanguageModel + ?Sized,
{
    /// Initializes `index` and wires every component to it.
    pub async fn open(
        extractor: Extractor,
        chunker: Chunker,
        embedder: Arc<E>,
        index: Arc<V>,
        model: Arc<L>,
        options: &PipelineOptions,
    ) -> Result<Self, IngestError> {
        index.init().await?;

        let indexer = Indexer::new(Arc::clone(&embedder), Arc::clone(&index), chunker)
            .with_policy(options.reindex);
        let answerer = Answerer::new(embedder, Arc::clone(&index), Arc::clone(&model))?
            .with_top_k(options.top_k)
            .with_temperature(options.temperature);
        let synthesizer = ThemeSynthesizer::new(model).with_temperature(options.temperature);

        Ok(Self {
            extractor,
            indexer,
            answerer,
            synthesizer,
            index,
            documents: Vec::new(),
        })
    }

    /// Extract, chunk and embed one uploaded document.
    ///
    /// A document that yields no text is registered as extracted and not indexed. Upstream
    /// failures while indexing are returned; the document stays registered and can be retried
    /// with [`Session::reindex`].
    pub async fn ingest(
        &mut self,
        name: &str,
        bytes: &[u8],
        media_type: MediaType,
    ) -> Result<IngestOutcome, IngestError> {
        if name.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "document name must not be empty".to_string(),
            ));
        }
        if self.document(name).is_some() {
            return Err(IngestError::DuplicateDocument(name.to_string()));
        }

        let extraction = self.extractor.extract(bytes, media_type).await;
        let method = extraction.method();
        let failure = extraction.failure().map(ToString::to_string);

        let mut document = Document::new(name, media_type);
        document.text = extraction.into_text();
        document.extraction_failure = failure.clone();
        document.advance(DocumentStatus::Extracted);

        let characters = document.text.chars().count();
        let has_text = document.has_text();
        self.documents.push(document);

        let mut outcome = IngestOutcome {
            document: name.to_string(),
            media_type,
            characters,
            method,
            failure,
            chunks_embedded: 0,
        };

        if !has_text {
            tracing::warn!(
                document = name,
                failure = outcome.failure.as_deref().unwrap_or("none"),
                "no text found, document not indexed"
            );
            return Ok(outcome);
        }

        let report = self.embed_document(name).await?;
        outcome.chunks_embedded = report.chunks_embedded;
        Ok(outcome)
    }

    /// Run the indexer again over a registered document's stored text.
    pub async fn reindex(&mut self, name: &str) -> Result<IndexReport, IngestError> {
        if self.document(name).is_none() {
            return Err(IngestError::UnknownDocument(name.to_string()));
        }
        self.embed_document(name).await
    }

    async fn embed_document(&mut self, name: &str) -> Result<IndexReport, IngestError> {
        let text = self
            .document(name)
            .map(|document| document.text.clone())
            .ok_or_else(|| IngestError::UnknownDocument(name.to_string()))?;

        let result = self.indexer.index(name, &text).await;
        if let Some(document) = self.documents.iter_mut().find(|doc| doc.name == name) {
            match &result {
                Ok(report) => {
                    document.index_failure = None;
                    if report.chunks_embedded > 0 {
                        document.advance(DocumentStatus::Embedded);
                    }
                }
                Err(error) => {
                    tracing::warn!(document = name, error = %error, "indexing failed");
                    document.index_failure = Some(error.to_string());
                }
            }
        }
        result
    }

    pub fn document(&self, name: &str) -> Option<&Document> {
        self.documents.iter().find(|document| document.name == name)
    }

    /// Registered documents in upload order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Documents whose records are complete in the index. A document whose last indexing
    /// attempt failed is left out until [`Session::reindex`] succeeds.
    pub fn embedded_documents(&self) -> Vec<&str> {
        self.documents
            .iter()
            .filter(|document| document.is_searchable())
            .map(|document| document.name.as_str())
            .collect()
    }

    pub fn answerer(&self) -> &Answerer<E, V, L> {
        &self.answerer
    }

    /// Answer from the session's own documents. Records in a shared index that belong to no
    /// registered document are never retrieved.
    pub async fn answer(&self, question: &str) -> Result<QueryResult, ServiceError> {
        let registered: Vec<&str> = self
            .documents
            .iter()
            .map(|document| document.name.as_str())
            .collect();
        self.answerer.answer_scoped(question, &registered).await
    }

    /// Answer from the named documents only; every name must be registered.
    pub async fn answer_scoped<S: AsRef<str>>(
        &self,
        question: &str,
        documents: &[S],
    ) -> Result<QueryResult, IngestError> {
        self.ensure_registered(documents.iter().map(AsRef::as_ref))?;
        Ok(self.answerer.answer_scoped(question, documents).await?)
    }

    fn ensure_registered<'a>(
        &self,
        mut names: impl Iterator<Item = &'a str>,
    ) -> Result<(), IngestError> {
        match names.find(|name| self.document(name).is_none()) {
            Some(unknown) => Err(IngestError::UnknownDocument(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Ask each of `documents` (every embedded document when empty) the question implied by
    /// `mode`, then synthesize recurring themes across the answers.
    pub async fn themes<S: AsRef<str>>(
        &self,
        documents: &[S],
        mode: ThemeMode,
    ) -> Result<ThemeSummary, IngestError> {
        let selected: Vec<&str> = if documents.is_empty() {
            self.embedded_documents()
        } else {
            documents.iter().map(AsRef::as_ref).collect()
        };

        self.ensure_registered(selected.iter().copied())?;

        let inputs = collect_theme_inputs(&self.answerer, &selected, &mode).await?;
        let text = self
            .synthesizer
            .synthesize(inputs.iter().map(|(name, answer)| (name, answer)))
            .await?;

        Ok(ThemeSummary { mode, inputs, text })
    }

    pub async fn close(self) -> Result<(), ServiceError> {
        self.index.flush().await?;
        tracing::info!(documents = self.documents.len(), "session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::tests::{pdf_with_text, FixedOcr};
    use crate::extractor::DisabledOcr;
    use crate::retrieval::tests::ScriptedModel;
    use crate::stores::InMemoryIndex;
    use crate::EmbeddingRecord;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    type TestSession = Session<dyn Embedder, InMemoryIndex, ScriptedModel>;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            4
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Err(ServiceError::BackendResponse {
                backend: "embeddings".to_string(),
                details: "503".to_string(),
            })
        }
    }

    /// Offline embedder that starts failing once `failing` is set.
    #[derive(Default)]
    struct SwitchableEmbedder {
        inner: CharacterNgramEmbedder,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Embedder for SwitchableEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            if self.failing.load(Ordering::SeqCst) {
                return FailingEmbedder.embed(texts).await;
            }
            self.inner.embed(texts).await
        }
    }

    async fn session_with(
        embedder: Arc<dyn Embedder>,
        extractor: Extractor,
        reply: &str,
    ) -> (TestSession, Arc<InMemoryIndex>) {
        let index = Arc::new(InMemoryIndex::new());
        let session = Session::open(
            extractor,
            Chunker::for_default_model(300).unwrap(),
            embedder,
            Arc::clone(&index),
            Arc::new(ScriptedModel::replying(reply)),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();
        (session, index)
    }

    async fn session(reply: &str) -> (TestSession, Arc<InMemoryIndex>) {
        session_with(
            Arc::new(CharacterNgramEmbedder::default()),
            Extractor::new(Arc::new(DisabledOcr)),
            reply,
        )
        .await
    }

    #[tokio::test]
    async fn ingest_then_answer_cites_the_uploaded_pdf() {
        let (mut session, index) = session("Refunds take 30 days [policy.pdf].").await;
        let pdf = pdf_with_text("Refunds are issued within 30 days. Exchanges require a receipt.");

        let outcome = session.ingest("policy.pdf", &pdf, MediaType::Pdf).await.unwrap();
        assert_eq!(outcome.chunks_embedded, 1);
        assert_eq!(outcome.method, ExtractionMethod::TextLayer);
        assert!(outcome.failure.is_none());
        assert_eq!(
            session.document("policy.pdf").map(|doc| doc.status),
            Some(DocumentStatus::Embedded)
        );

        let result = session.answer("How long do refunds take?").await.unwrap();
        assert_eq!(result.sources.iter().collect::<Vec<_>>(), vec!["policy.pdf"]);
        assert!(result.cited.contains("policy.pdf"));

        let stored = index.sources().unwrap();
        let registered: Vec<&str> = session.documents().iter().map(|doc| doc.name.as_str()).collect();
        assert!(stored.iter().all(|source| registered.contains(&source.as_str())));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (mut session, _index) = session("ok").await;
        let pdf = pdf_with_text("Some text here");
        session.ingest("a.pdf", &pdf, MediaType::Pdf).await.unwrap();

        let error = session.ingest("a.pdf", &pdf, MediaType::Pdf).await.unwrap_err();
        assert!(matches!(error, IngestError::DuplicateDocument(name) if name == "a.pdf"));
        assert_eq!(session.documents().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_pdf_is_registered_but_not_indexed() {
        let (mut session, index) = session("ok").await;

        let outcome = session
            .ingest("scan.pdf", b"%PDF-1.4\n%broken", MediaType::Pdf)
            .await
            .unwrap();

        assert!(!outcome.has_text());
        assert_eq!(outcome.chunks_embedded, 0);
        assert!(outcome.failure.is_some());
        assert_eq!(
            session.document("scan.pdf").map(|doc| doc.status),
            Some(DocumentStatus::Extracted)
        );
        assert_eq!(index.len().await.unwrap(), 0);
        assert!(session.embedded_documents().is_empty());
    }

    #[tokio::test]
    async fn images_are_read_through_ocr() {
        let (mut session, _index) = session_with(
            Arc::new(CharacterNgramEmbedder::default()),
            Extractor::new(Arc::new(FixedOcr {
                pages: vec!["Receipt total twelve dollars"],
            })),
            "ok",
        )
        .await;

        let outcome = session.ingest("receipt.png", b"png", MediaType::Png).await.unwrap();
        assert_eq!(outcome.method, ExtractionMethod::Ocr);
        assert_eq!(outcome.chunks_embedded, 1);
    }

    #[tokio::test]
    async fn upstream_failure_propagates_and_leaves_document_extracted() {
        let (mut session, _index) = session_with(
            Arc::new(FailingEmbedder),
            Extractor::new(Arc::new(DisabledOcr)),
            "ok",
        )
        .await;
        let pdf = pdf_with_text("Deadlines are strict.");

        let error = session.ingest("a.pdf", &pdf, MediaType::Pdf).await.unwrap_err();
        assert!(matches!(error, IngestError::Service(_)));
        assert_eq!(
            session.document("a.pdf").map(|doc| doc.status),
            Some(DocumentStatus::Extracted)
        );
        assert!(session
            .document("a.pdf")
            .and_then(|doc| doc.index_failure.as_deref())
            .is_some());
    }

    #[tokio::test]
    async fn failed_reindex_drops_document_until_it_succeeds() {
        let embedder = Arc::new(SwitchableEmbedder::default());
        let (mut session, index) = session_with(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Extractor::new(Arc::new(DisabledOcr)),
            "ok",
        )
        .await;
        let pdf = pdf_with_text("Deadlines are strict.");
        session.ingest("a.pdf", &pdf, MediaType::Pdf).await.unwrap();
        assert_eq!(session.embedded_documents(), vec!["a.pdf"]);

        embedder.failing.store(true, Ordering::SeqCst);
        assert!(session.reindex("a.pdf").await.is_err());
        assert_eq!(index.count_document("a.pdf").await.unwrap(), 0);
        assert!(session.embedded_documents().is_empty());
        assert!(!session.document("a.pdf").unwrap().is_searchable());

        embedder.failing.store(false, Ordering::SeqCst);
        session.reindex("a.pdf").await.unwrap();
        assert_eq!(session.embedded_documents(), vec!["a.pdf"]);
        assert!(session.document("a.pdf").unwrap().index_failure.is_none());
    }

    #[tokio::test]
    async fn answers_ignore_records_of_unregistered_documents() {
        let embedder = CharacterNgramEmbedder::default();
        let leftover = "Refunds take ninety days for every order.";
        let index = Arc::new(InMemoryIndex::new());
        index
            .insert(&[EmbeddingRecord {
                chunk_id: "leftover-0".to_string(),
                source: "ghost.pdf".to_string(),
                text: leftover.to_string(),
                vector: embedder.embed_one(leftover).await.unwrap(),
            }])
            .await
            .unwrap();

        let mut session: TestSession = Session::open(
            Extractor::new(Arc::new(DisabledOcr)),
            Chunker::for_default_model(300).unwrap(),
            Arc::new(embedder) as Arc<dyn Embedder>,
            Arc::clone(&index),
            Arc::new(ScriptedModel::replying("Thirty days [policy.pdf] [ghost.pdf].")),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();
        session
            .ingest(
                "policy.pdf",
                &pdf_with_text("Refunds are issued within 30 days."),
                MediaType::Pdf,
            )
            .await
            .unwrap();

        let result = session.answer("How long do refunds take?").await.unwrap();
        let registered: BTreeSet<String> = session
            .documents()
            .iter()
            .map(|doc| doc.name.clone())
            .collect();
        assert!(result.sources.is_subset(&registered));
        assert!(!result.sources.contains("ghost.pdf"));
        assert!(!result.cited.contains("ghost.pdf"));
        assert!(result.retrieved.iter().all(|chunk| chunk.source == "policy.pdf"));

        let error = session
            .answer_scoped("How long do refunds take?", &["ghost.pdf"])
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::UnknownDocument(name) if name == "ghost.pdf"));
    }

    #[tokio::test]
    async fn answer_before_any_upload_retrieves_nothing() {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = CharacterNgramEmbedder::default();
        index
            .insert(&[EmbeddingRecord {
                chunk_id: "leftover-0".to_string(),
                source: "ghost.pdf".to_string(),
                text: "stale text".to_string(),
                vector: embedder.embed_one("stale text").await.unwrap(),
            }])
            .await
            .unwrap();
        let session: TestSession = Session::open(
            Extractor::new(Arc::new(DisabledOcr)),
            Chunker::for_default_model(300).unwrap(),
            Arc::new(embedder) as Arc<dyn Embedder>,
            index,
            Arc::new(ScriptedModel::replying("I don't know.")),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        let result = session.answer("stale text?").await.unwrap();
        assert!(result.sources.is_empty());
        assert!(!result.is_grounded());
    }

    #[tokio::test]
    async fn reindex_replaces_records_for_the_document() {
        let (mut session, index) = session("ok").await;
        let pdf = pdf_with_text("Deadlines are strict.");
        session.ingest("a.pdf", &pdf, MediaType::Pdf).await.unwrap();
        let before = index.chunk_ids("a.pdf").unwrap();

        let report = session.reindex("a.pdf").await.unwrap();
        assert_eq!(report.replaced, before.len());
        assert_eq!(index.chunk_ids("a.pdf").unwrap(), before);

        assert!(matches!(
            session.reindex("missing.pdf").await,
            Err(IngestError::UnknownDocument(_))
        ));
    }

    #[tokio::test]
    async fn themes_cover_selected_documents() {
        let (mut session, _index) = session("Deadlines recur [A.pdf] [B.pdf].").await;
        session
            .ingest("A.pdf", &pdf_with_text("Deadlines are strict."), MediaType::Pdf)
            .await
            .unwrap();
        session
            .ingest("B.pdf", &pdf_with_text("Deadlines can move."), MediaType::Pdf)
            .await
            .unwrap();

        let summary = session
            .themes(&["A.pdf", "B.pdf"], ThemeMode::MainIdea)
            .await
            .unwrap();
        assert_eq!(summary.inputs.len(), 2);
        assert_eq!(summary.inputs[0].0, "A.pdf");
        assert!(summary.text.contains("[A.pdf]"));
        assert!(summary.text.contains("[B.pdf]"));

        let all = session
            .themes::<&str>(&[], ThemeMode::Question("deadlines?".to_string()))
            .await
            .unwrap();
        assert_eq!(all.inputs.len(), 2);

        let error = session
            .themes(&["C.pdf"], ThemeMode::MainIdea)
            .await
            .unwrap_err();
        assert!(matches!(error, IngestError::UnknownDocument(name) if name == "C.pdf"));
    }
}
