use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::orchestrator::{IngestOutcome, Session};
use crate::traits::VectorIndex;
use crate::{IngestError, MediaType};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supported documents under `folder`, recursively, in path order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if MediaType::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Folders are replaced by the documents they contain; files are kept as given so unsupported
/// ones can be reported.
pub fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|path| {
            if path.is_dir() {
                discover_documents(path)
            } else {
                vec![path.clone()]
            }
        })
        .collect()
}

pub fn document_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

/// Name, media type and raw bytes of the document at `path`.
pub async fn read_document(path: &Path) -> Result<(String, MediaType, Vec<u8>), IngestError> {
    let name = document_name(path)?;
    let media_type = MediaType::from_path(path)
        .ok_or_else(|| IngestError::UnsupportedMediaType(path.display().to_string()))?;
    let bytes = tokio::fs::read(path).await?;
    Ok((name, media_type, bytes))
}

#[derive(Debug)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested: Vec<IngestOutcome>,
    pub skipped: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn chunks_embedded(&self) -> usize {
        self.ingested
            .iter()
            .map(|outcome| outcome.chunks_embedded)
            .sum()
    }
}

/// Ingest every document named by `paths` into `session`. A document that cannot be read or
/// indexed is recorded in [`IngestionReport::skipped`] and the rest still go through.
pub async fn ingest_paths<E, V, L>(
    session: &mut Session<E, V, L>,
    paths: &[PathBuf],
) -> Result<IngestionReport, IngestError>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    L: LanguageModel + ?Sized,
{
    let files = expand_paths(paths);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no documents found in {}",
            paths
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut report = IngestionReport::default();

    for path in files {
        match ingest_file(session, &path).await {
            Ok(outcome) => report.ingested.push(outcome),
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "skipping document");
                report.skipped.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

async fn ingest_file<E, V, L>(
    session: &mut Session<E, V, L>,
    path: &Path,
) -> Result<IngestOutcome, IngestError>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
    L: LanguageModel + ?Sized,
{
    let (name, media_type, bytes) = read_document(path).await?;
    session.ingest(&name, &bytes, media_type).await
}
