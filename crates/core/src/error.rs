use thiserror::Error;

/// Reason a document produced no text. Carried inside an
/// [`Extraction`](crate::extractor::Extraction) rather than returned as an error.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("pdf text layer extraction failed: {0}")]
    TextLayer(String),

    #[error("ocr failed: {0}")]
    Ocr(String),

    #[error("no ocr engine configured")]
    OcrUnavailable,

    /// The text layer could not be read and the OCR fallback failed too.
    #[error("{text_layer}; ocr fallback: {ocr}")]
    FallbackFailed {
        text_layer: Box<ExtractError>,
        ocr: Box<ExtractError>,
    },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of an upstream capability (embedding, completion, vector index).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("document already uploaded in this session: {0}")]
    DuplicateDocument(String),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("tokenizer unavailable for {model}: {details}")]
    Tokenizer { model: String, details: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
