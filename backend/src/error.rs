//! Error taxonomy of the booklet and scan pipeline.
//!
//! Page-level failures (`DecodeFailure`, `GeometryFailure`, `ExtractionError`)
//! are folded into the import report and never abort an upload. Only
//! `UploadFormatError` moves an upload to the `error` status. `PipelineError`
//! is what service functions and HTTP handlers return.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Why a compact identifier could not be turned back into a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("identifier text is empty")]
    Empty,
    #[error("identifier text is not valid base64")]
    NotBase64,
    #[error("unknown identifier schema version {0}")]
    UnknownVersion(u8),
    #[error("identifier has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("identifier checksum does not match")]
    ChecksumMismatch,
    #[error("identifier page number {0} is out of range")]
    InvalidPage(u16),
    #[error("no scannable symbol found on page")]
    NoSymbol,
}

/// Fiducial markers could not be located or do not form a page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryFailure {
    #[error("found {found} of 4 fiducial markers")]
    MarkersNotFound { found: usize },
    #[error("fiducial markers do not match the page geometry: {0}")]
    Inconsistent(String),
    #[error("perspective correction is degenerate")]
    Degenerate,
}

/// The uploaded file itself is unusable.
#[derive(Debug, Error)]
pub enum UploadFormatError {
    #[error("upload could not be read: {0}")]
    Unreadable(String),
    #[error("unsupported upload format")]
    Unsupported,
    #[error("upload contains no pages")]
    NoPages,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("text extraction is not configured")]
    NotConfigured,
    #[error("text extraction command failed: {0}")]
    Command(String),
    #[error("page image is not available: {0}")]
    MissingImage(String),
    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("symbol encoder failed: {0}")]
    Symbol(String),
    #[error("payload needs QR version {0}, above the printable limit")]
    PayloadTooLarge(i16),
    #[error("PDF rendering failed: {0}")]
    Pdf(String),
    #[error("image encoding failed: {0}")]
    Image(String),
    #[error("booklet has {rendered} pages but {planned} were planned")]
    PageCountMismatch { planned: usize, rendered: usize },
    #[error("I/O error while rendering: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("upload {0} is already being processed")]
    AlreadyClaimed(String),
    #[error("page code {code} is already assigned to another page")]
    PageCodeCollision { code: String },
    #[error(transparent)]
    Upload(#[from] UploadFormatError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    fn code(&self) -> &'static str {
        match self {
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::InvalidState(_) => "INVALID_STATE",
            PipelineError::BadRequest(_) => "BAD_REQUEST",
            PipelineError::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            PipelineError::PageCodeCollision { .. } => "PAGE_CODE_COLLISION",
            PipelineError::Upload(_) => "UPLOAD_FORMAT",
            PipelineError::Render(_) => "RENDER_ERROR",
            PipelineError::Database(_) => "DATABASE_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
            PipelineError::Json(_) => "SERIALIZATION_ERROR",
            PipelineError::Task(_) => "TASK_ERROR",
        }
    }
}

impl ResponseError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::BadRequest(_) | PipelineError::Upload(_) => StatusCode::BAD_REQUEST,
            PipelineError::InvalidState(_)
            | PipelineError::AlreadyClaimed(_)
            | PipelineError::PageCodeCollision { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }))
    }
}
