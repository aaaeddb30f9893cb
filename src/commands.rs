use crate::db::Db;
use crate::error::{Result, StoreError, ValidationError};
use crate::models::PerformanceRecord;
use crate::services::invoice_check::{classify, ScoreBreakdown};
use crate::services::materializer::{materialize, MaterializeInput};
use crate::types::{OcrMethod, OcrResult, ParsedFields, SessionContext, Timing};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Jpeg,
    Png,
    Webp,
}

impl DocumentKind {
    /// Identify a document from its leading bytes.
    pub fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"%PDF-") {
            Some(DocumentKind::Pdf)
        } else if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentKind::Jpeg)
        } else if header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(DocumentKind::Png)
        } else if header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP" {
            Some(DocumentKind::Webp)
        } else {
            None
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, DocumentKind::Pdf)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Jpeg => "jpg",
            DocumentKind::Png => "png",
            DocumentKind::Webp => "webp",
        }
    }
}

/// One document run: engine output, parser output and timing.
#[derive(Debug, Deserialize)]
pub struct AnalyzePayload {
    pub ocr: OcrResult,
    pub ocr_method: OcrMethod,
    #[serde(default)]
    pub parsed_data: ParsedFields,
    /// Transcript for engines whose result carries none.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub time: Timing,
    #[serde(default)]
    pub pdf_base64: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
}

/// Raw files to store with the invoice; these take precedence over the
/// base64 fields of the payload.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    pub pdf: Option<Vec<u8>>,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub text: String,
    pub confidence: f64,
    pub is_invoice: bool,
    pub score: ScoreBreakdown,
    pub invoice_id: Option<i64>,
    pub parsed_data: ParsedFields,
    pub time: Timing,
}

#[derive(Debug, Deserialize)]
pub struct SaveTimeOtherPayload {
    pub invoice_id: i64,
    pub time_other: f64,
}

/// Aggregate, classify and, when the document looks like an invoice, store it.
pub fn analyze_document(
    db: &Db,
    session: &SessionContext,
    payload: AnalyzePayload,
    attachments: Attachments,
) -> Result<AnalyzeResponse> {
    if let Err(e) = payload.ocr.validate() {
        warn!(error = %e, "rejecting malformed OCR result");
        return Err(e.into());
    }
    let aggregate = payload.ocr.aggregate();
    let text = aggregate
        .transcript
        .or(payload.text)
        .unwrap_or_default();

    let score = classify(&payload.parsed_data);
    let accepted = score.accepted();

    let invoice_id = if accepted {
        let pdf_file = match attachments.pdf {
            Some(bytes) => Some(bytes),
            None => decode_attachment(payload.pdf_base64.as_deref())?,
        };
        let image_file = match attachments.image {
            Some(bytes) => Some(bytes),
            None => decode_attachment(payload.image_base64.as_deref())?,
        };
        let id = materialize(
            db,
            session,
            MaterializeInput {
                fields: &payload.parsed_data,
                text: &text,
                average_confidence: aggregate.confidence,
                timing: payload.time,
                ocr_method: payload.ocr_method,
                pdf_file,
                image_file,
            },
        )?;
        Some(id)
    } else {
        info!(score = score.total, "document does not look like an invoice; not stored");
        None
    };

    Ok(AnalyzeResponse {
        text,
        confidence: aggregate.confidence,
        is_invoice: accepted,
        score,
        invoice_id,
        parsed_data: payload.parsed_data,
        time: payload.time,
    })
}

fn decode_attachment(encoded: Option<&str>) -> Result<Option<Vec<u8>>> {
    match encoded.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(Some(BASE64.decode(s)?)),
        None => Ok(None),
    }
}

pub fn save_time_other(db: &Db, payload: SaveTimeOtherPayload) -> Result<()> {
    if !payload.time_other.is_finite() {
        return Err(ValidationError::InvalidTiming(payload.time_other).into());
    }
    db.set_other_time(payload.invoice_id, payload.time_other)?;
    Ok(())
}

pub fn get_performance_data(db: &Db, invoice_id: i64) -> Result<PerformanceRecord> {
    let record = db
        .performance_for_invoice(invoice_id)?
        .ok_or(StoreError::NotFound {
            entity: "invoice",
            id: invoice_id,
        })?;
    Ok(record)
}

pub fn validate_document_file(path: &Path) -> Result<ValidationResult> {
    let invalid = |msg: &str| ValidationResult {
        valid: false,
        kind: None,
        error: Some(msg.to_string()),
    };
    if !path.exists() {
        return Ok(invalid("File not found."));
    }
    let metadata = fs::metadata(path)?;
    if metadata.len() > MAX_DOCUMENT_BYTES {
        return Ok(invalid("File too large (max 50MB)."));
    }
    let mut f = fs::File::open(path)?;
    let mut header = [0u8; 12];
    let read = f.read(&mut header)?;
    if read < 3 {
        return Ok(invalid("Could not read file header."));
    }
    match DocumentKind::detect(&header[..read]) {
        Some(kind) => Ok(ValidationResult {
            valid: true,
            kind: Some(kind),
            error: None,
        }),
        None => Ok(invalid("Not a PDF, JPEG, PNG or WEBP file.")),
    }
}

/// Validate and load a document for storing as an invoice attachment.
pub fn read_document_file(path: &Path) -> Result<(DocumentKind, Vec<u8>)> {
    let check = validate_document_file(path)?;
    match (check.valid, check.kind) {
        (true, Some(kind)) => Ok((kind, fs::read(path)?)),
        _ => Err(ValidationError::UnsupportedFile(format!(
            "{}: {}",
            path.display(),
            check.error.unwrap_or_default()
        ))
        .into()),
    }
}

/// Write the stored PDF and image of an invoice into `out_dir` as
/// `invoice-<id>.<ext>`. Returns the written paths, PDF first.
pub fn export_attachments(db: &Db, invoice_id: i64, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let (pdf, image) = db.invoice_files(invoice_id)?;
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();
    for (blob, fallback) in [(pdf, DocumentKind::Pdf), (image, DocumentKind::Png)] {
        let Some(bytes) = blob else { continue };
        let kind = DocumentKind::detect(&bytes).unwrap_or(fallback);
        let path = out_dir.join(format!("invoice-{}.{}", invoice_id, kind.extension()));
        fs::write(&path, &bytes)?;
        written.push(path);
    }
    info!(invoice_id, files = written.len(), "exported invoice attachments");
    Ok(written)
}
