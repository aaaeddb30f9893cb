//! Invoice plausibility scoring over parsed fields.
//!
//! Each entry of [`INVOICE_SCORE_TABLE`] adds its weight when the value at its
//! (possibly dotted) path is truthy. A document is accepted at
//! [`INVOICE_THRESHOLD`] or above.

use crate::types::ParsedFields;
use serde::Serialize;
use tracing::debug;

/// Minimum score (inclusive) for a document to count as an invoice.
pub const INVOICE_THRESHOLD: f64 = 4.0;

pub const INVOICE_SCORE_TABLE: &[(&str, f64)] = &[
    // Critical
    ("invoice_number", 3.0),
    ("total_price", 3.0),
    ("iban", 2.0),
    // Supporting
    ("var_symbol", 1.0),
    ("due_date", 1.0),
    ("date_of_issue", 1.0),
    ("buyer_ico", 1.0),
    ("supplier_ico", 1.0),
    ("bank", 1.0),
    ("swift", 1.0),
    // Parties
    ("supplier_data.ICO", 1.0),
    ("supplier_data.DIC", 1.0),
    ("supplier_data.Name", 0.5),
    ("buyer_data.ICO", 1.0),
    ("buyer_data.DIC", 1.0),
    ("buyer_data.Name", 0.5),
];

/// Words that mark invoice-like transcripts, matched case-insensitively as substrings.
pub const INVOICE_KEYWORDS: &[&str] = &[
    "faktúra",
    "faktura",
    "invoice",
    "daňový doklad",
    "danovy doklad",
    "dodávateľ",
    "dodavatel",
    "supplier",
    "odberateľ",
    "odberatel",
    "customer",
    "dph",
    "vat",
    "ičo",
    "ico",
];

pub const KEYWORD_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Paths that contributed, in table order, with their weights.
    pub contributions: Vec<(&'static str, f64)>,
    pub total: f64,
}

impl ScoreBreakdown {
    pub fn accepted(&self) -> bool {
        self.total >= INVOICE_THRESHOLD
    }
}

/// Weighted presence score of the parsed fields. Pure.
pub fn score_fields(fields: &ParsedFields) -> ScoreBreakdown {
    let contributions: Vec<(&'static str, f64)> = INVOICE_SCORE_TABLE
        .iter()
        .filter(|(path, _)| fields.is_set(path))
        .copied()
        .collect();
    let total: f64 = contributions.iter().map(|(_, w)| w).sum();
    ScoreBreakdown {
        contributions,
        total,
    }
}

/// Score the fields and trace every contribution at debug level.
pub fn classify(fields: &ParsedFields) -> ScoreBreakdown {
    let breakdown = score_fields(fields);
    trace_breakdown(&breakdown);
    breakdown
}

/// Accept/reject decision for a parsed document.
pub fn is_invoice(fields: &ParsedFields) -> bool {
    classify(fields).accepted()
}

fn trace_breakdown(breakdown: &ScoreBreakdown) {
    for (path, weight) in &breakdown.contributions {
        debug!(field = *path, weight = *weight, "invoice score contribution");
    }
    debug!(
        score = breakdown.total,
        threshold = INVOICE_THRESHOLD,
        accepted = breakdown.accepted(),
        "invoice score"
    );
}

/// Keywords found in the transcript, each counted once.
pub fn matched_keywords(transcript: &str) -> Vec<&'static str> {
    let lower = transcript.to_lowercase();
    INVOICE_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lower.contains(kw))
        .collect()
}

pub fn transcript_keyword_bonus(transcript: &str) -> f64 {
    matched_keywords(transcript).len() as f64 * KEYWORD_WEIGHT
}

/// Field score plus the transcript keyword bonus.
pub fn score_document(fields: &ParsedFields, transcript: &str) -> ScoreBreakdown {
    let mut breakdown = score_fields(fields);
    for keyword in matched_keywords(transcript) {
        breakdown.contributions.push((keyword, KEYWORD_WEIGHT));
        breakdown.total += KEYWORD_WEIGHT;
    }
    breakdown
}
