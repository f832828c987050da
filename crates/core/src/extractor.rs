use crate::config::OcrEndpointConfig;
use crate::error::ExtractError;
use crate::models::MediaType;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TextLayer,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextLayer => "text layer",
            Self::Ocr => "ocr",
        }
    }
}

/// Outcome of extracting one document. Extraction never fails outright: a failing backend
/// yields [`Extraction::Failed`] so callers can tell it apart from a document with no text.
#[derive(Debug)]
pub enum Extraction {
    Extracted {
        text: String,
        method: ExtractionMethod,
    },
    NoText {
        method: ExtractionMethod,
    },
    Failed {
        method: ExtractionMethod,
        reason: ExtractError,
    },
}

impl Extraction {
    fn from_text(text: String, method: ExtractionMethod) -> Self {
        if text.trim().is_empty() {
            Self::NoText { method }
        } else {
            Self::Extracted { text, method }
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Extracted { text, .. } => text,
            _ => "",
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Extracted { text, .. } => text,
            _ => String::new(),
        }
    }

    pub fn method(&self) -> ExtractionMethod {
        match self {
            Self::Extracted { method, .. }
            | Self::NoText { method }
            | Self::Failed { method, .. } => *method,
        }
    }

    pub fn failure(&self) -> Option<&ExtractError> {
        match self {
            Self::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !matches!(self, Self::Extracted { .. })
    }
}

/// Direct text-layer extraction, one entry per page in page order.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractError::TextLayer(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ExtractError::TextLayer(error.to_string()))?;
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Optical character recognition capability.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Render every page of the PDF and recognize it, in page order.
    async fn recognize_pdf(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError>;

    async fn recognize_image(&self, bytes: &[u8], media: MediaType) -> Result<String, ExtractError>;
}

/// Used when no OCR backend is configured; every call reports [`ExtractError::OcrUnavailable`].
#[derive(Debug, Default)]
pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn recognize_pdf(&self, _bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        Err(ExtractError::OcrUnavailable)
    }

    async fn recognize_image(&self, _bytes: &[u8], _media: MediaType) -> Result<String, ExtractError> {
        Err(ExtractError::OcrUnavailable)
    }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest<'a> {
    content_base64: String,
    media_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// OCR through a multimodal HTTP endpoint that accepts base64 content and returns page text.
pub struct HttpOcrEngine {
    client: Client,
    config: OcrEndpointConfig,
}

impl HttpOcrEngine {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn request(&self, bytes: &[u8], media: MediaType) -> Result<LlmOcrResponse, ExtractError> {
        let payload = LlmOcrRequest {
            content_base64: STANDARD.encode(bytes),
            media_type: media.mime(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ExtractError::Ocr(format!(
                "multimodal OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    async fn recognize_pdf(&self, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        let payload = self.request(bytes, MediaType::Pdf).await?;
        Ok(payload_to_pages(&payload))
    }

    async fn recognize_image(&self, bytes: &[u8], media: MediaType) -> Result<String, ExtractError> {
        let payload = self.request(bytes, media).await?;
        Ok(join_pages(&payload_to_pages(&payload)))
    }
}

/// Build the OCR engine for an optional endpoint configuration.
pub fn ocr_engine(config: Option<&OcrEndpointConfig>) -> Arc<dyn OcrEngine> {
    match config {
        Some(config) => Arc::new(HttpOcrEngine::new(config.clone())),
        None => Arc::new(DisabledOcr),
    }
}

fn payload_to_pages(payload: &LlmOcrResponse) -> Vec<PageText> {
    if let Some(listed) = &payload.pages {
        let mut listed = listed
            .iter()
            .enumerate()
            .filter_map(|(position, page)| {
                let normalized = page.text.as_ref()?.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(position as u32 + 1),
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            listed.sort_by_key(|page| page.number);
            return listed;
        }
    }

    payload
        .text
        .as_deref()
        .unwrap_or_default()
        .split('\u{000c}')
        .enumerate()
        .filter_map(|(index, chunk)| {
            let normalized = chunk.trim().to_string();
            if normalized.is_empty() {
                None
            } else {
                Some(PageText {
                    number: (index + 1) as u32,
                    text: normalized,
                })
            }
        })
        .collect()
}

/// OCR page results, each followed by a line break.
fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| format!("{}\n", page.text))
        .collect()
}

/// Turns document bytes into text: the PDF text layer first, OCR when that is empty or broken.
pub struct Extractor {
    pdf: Box<dyn PdfExtractor>,
    ocr: Arc<dyn OcrEngine>,
}

impl Extractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            pdf: Box::new(LopdfExtractor),
            ocr,
        }
    }

    pub fn with_pdf_extractor(mut self, pdf: Box<dyn PdfExtractor>) -> Self {
        self.pdf = pdf;
        self
    }

    pub async fn extract(&self, bytes: &[u8], media: MediaType) -> Extraction {
        match media {
            MediaType::Pdf => self.extract_pdf(bytes).await,
            MediaType::Png | MediaType::Jpeg => match self.ocr.recognize_image(bytes, media).await {
                Ok(text) => Extraction::from_text(text, ExtractionMethod::Ocr),
                Err(reason) => {
                    tracing::warn!(media = media.mime(), error = %reason, "image OCR failed");
                    Extraction::Failed {
                        method: ExtractionMethod::Ocr,
                        reason,
                    }
                }
            },
        }
    }

    /// Like [`Extractor::extract`], resolving the media type from its MIME name.
    pub async fn extract_declared(&self, bytes: &[u8], declared_type: &str) -> Extraction {
        match MediaType::from_mime(declared_type) {
            Some(media) => self.extract(bytes, media).await,
            None => Extraction::Failed {
                method: ExtractionMethod::TextLayer,
                reason: ExtractError::UnsupportedMediaType(declared_type.to_string()),
            },
        }
    }

    pub async fn extract_text(&self, bytes: &[u8], media: MediaType) -> String {
        self.extract(bytes, media).await.into_text()
    }

    async fn extract_pdf(&self, bytes: &[u8]) -> Extraction {
        let text_layer_error = match self.pdf.extract_pages(bytes) {
            Ok(pages) => {
                let text: String = pages.into_iter().map(|page| page.text).collect();
                if !text.trim().is_empty() {
                    return Extraction::Extracted {
                        text,
                        method: ExtractionMethod::TextLayer,
                    };
                }
                tracing::warn!("pdf has no text layer, falling back to OCR");
                None
            }
            Err(error) => {
                tracing::warn!(error = %error, "pdf text extraction failed, falling back to OCR");
                Some(error)
            }
        };

        match self.ocr.recognize_pdf(bytes).await {
            Ok(pages) => Extraction::from_text(join_pages(&pages), ExtractionMethod::Ocr),
            Err(ocr_error) => {
                tracing::warn!(error = %ocr_error, "OCR failed on scanned pdf");
                let reason = match text_layer_error {
                    Some(text_layer) => ExtractError::FallbackFailed {
                        text_layer: Box::new(text_layer),
                        ocr: Box::new(ocr_error),
                    },
                    None => ocr_error,
                };
                Extraction::Failed {
                    method: ExtractionMethod::Ocr,
                    reason,
                }
            }
        }
    }
}
