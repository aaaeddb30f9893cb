use crate::types::OcrMethod;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub average_confidence: f64,
    pub recognition_time: f64,
    pub parsing_time: f64,
    pub other_time: Option<f64>,
    pub ocr_method: OcrMethod,
}

/// Supplier or buyer row. Blank strings when the parser found no party data;
/// `ico` is the only nullable column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub ico: Option<String>,
    pub name: String,
    pub address: String,
    pub psc: String,
    pub city: String,
    pub dic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub user_id: i64,
    pub organization_id: Option<i64>,
    pub invoice_number: Option<String>,
    pub var_symbol: Option<String>,
    pub date_of_issue: Option<String>,
    pub due_date: Option<String>,
    pub delivery_date: Option<String>,
    pub payment_method: Option<String>,
    pub total_price: Option<String>,
    pub bank: Option<String>,
    pub swift: Option<String>,
    pub iban: Option<String>,
    pub text: String,
    #[serde(skip)]
    pub pdf_file: Option<Vec<u8>>,
    #[serde(skip)]
    pub image_file: Option<Vec<u8>>,
}

/// The four rows written together for one accepted document.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceBundle {
    pub performance: PerformanceRecord,
    pub supplier: PartyRecord,
    pub buyer: PartyRecord,
    pub invoice: InvoiceRecord,
}

/// Invoice row as read back, with its related rows resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredInvoice {
    pub id: i64,
    pub created_at: String,
    pub performance_id: i64,
    pub supplier_id: i64,
    pub buyer_id: i64,
    #[serde(flatten)]
    pub invoice: InvoiceRecord,
    pub has_pdf: bool,
    pub has_image: bool,
    pub supplier: PartyRecord,
    pub buyer: PartyRecord,
    pub performance: PerformanceRecord,
}
