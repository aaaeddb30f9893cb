//! Invoice scanner core: OCR confidence aggregation, invoice plausibility
//! scoring and transactional storage of extracted invoice records.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod ocr;
pub mod services;
pub mod types;

pub use db::Db;
pub use error::{Error, Result, StoreError, ValidationError};
pub use ocr::{aggregate_lines, aggregate_wordconf, Aggregate};
pub use services::invoice_check::{classify, is_invoice, score_fields, ScoreBreakdown};
pub use services::materializer::{materialize, MaterializeInput};
pub use types::{OcrLine, OcrMethod, OcrResult, ParsedFields, SessionContext, Timing};
