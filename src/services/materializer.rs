//! Maps parsed invoice fields onto the performance / supplier / buyer /
//! invoice rows and stores them as one unit.

use crate::db::Db;
use crate::error::{Result, ValidationError};
use crate::models::{InvoiceBundle, InvoiceRecord, PartyRecord, PerformanceRecord};
use crate::types::{OcrMethod, ParsedFields, SessionContext, Timing};
use tracing::info;

/// Everything the materializer needs besides the caller's identity.
#[derive(Debug, Clone)]
pub struct MaterializeInput<'a> {
    pub fields: &'a ParsedFields,
    pub text: &'a str,
    pub average_confidence: f64,
    pub timing: Timing,
    pub ocr_method: OcrMethod,
    pub pdf_file: Option<Vec<u8>>,
    pub image_file: Option<Vec<u8>>,
}

/// Party row from `supplier_data` / `buyer_data`. Missing data yields a blank
/// row with a null `ico`.
pub fn party_from_fields(fields: &ParsedFields, key: &str) -> PartyRecord {
    if !fields.is_set(key) {
        return PartyRecord::default();
    }
    let text = |sub: &str| fields.text(&format!("{}.{}", key, sub));
    PartyRecord {
        ico: text("ICO"),
        name: text("Name").unwrap_or_default(),
        address: text("Street").unwrap_or_default(),
        psc: text("PSC").unwrap_or_default(),
        city: text("City").unwrap_or_default(),
        dic: text("DIC").unwrap_or_default(),
    }
}

pub fn build_bundle(
    session: &SessionContext,
    input: MaterializeInput<'_>,
) -> std::result::Result<InvoiceBundle, ValidationError> {
    let user_id = session.user_id.ok_or(ValidationError::MissingUser)?;
    let fields = input.fields;

    let performance = PerformanceRecord {
        average_confidence: input.average_confidence,
        recognition_time: input.timing.recognition,
        parsing_time: input.timing.parsing,
        other_time: None,
        ocr_method: input.ocr_method,
    };

    let invoice = InvoiceRecord {
        user_id,
        organization_id: session.active_organization_id,
        invoice_number: fields.text("invoice_number"),
        var_symbol: fields.text("var_symbol"),
        date_of_issue: fields.text("date_of_issue"),
        due_date: fields.text("due_date"),
        delivery_date: fields.text("delivery_date"),
        payment_method: fields.text("payment_method"),
        total_price: fields.text("total_price"),
        bank: fields.text("bank"),
        swift: fields.text("swift"),
        iban: fields.text("iban"),
        text: input.text.to_string(),
        pdf_file: input.pdf_file.filter(|b| !b.is_empty()),
        image_file: input.image_file.filter(|b| !b.is_empty()),
    };

    Ok(InvoiceBundle {
        performance,
        supplier: party_from_fields(fields, "supplier_data"),
        buyer: party_from_fields(fields, "buyer_data"),
        invoice,
    })
}

/// Store one accepted document and return the new invoice id.
///
/// Fails with a validation error when the session carries no user, and with a
/// persistence error (nothing committed) when any of the four inserts fails.
pub fn materialize(db: &Db, session: &SessionContext, input: MaterializeInput<'_>) -> Result<i64> {
    let bundle = build_bundle(session, input)?;
    let invoice_id = db.insert_invoice_bundle(&bundle)?;
    info!(
        invoice_id,
        user_id = bundle.invoice.user_id,
        ocr_method = %bundle.performance.ocr_method,
        "invoice stored"
    );
    Ok(invoice_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(fields: &ParsedFields) -> MaterializeInput<'_> {
        MaterializeInput {
            fields,
            text: "FAKTURA\n",
            average_confidence: 87.5,
            timing: Timing {
                recognition: 1.5,
                parsing: 0.25,
            },
            ocr_method: OcrMethod::Tesseract,
            pdf_file: None,
            image_file: Some(vec![0x89, b'P', b'N', b'G']),
        }
    }

    fn session() -> SessionContext {
        SessionContext {
            user_id: Some(7),
            active_organization_id: None,
        }
    }

    #[test]
    fn absent_party_data_becomes_blank_row_with_null_ico() {
        let fields = ParsedFields::default();
        assert_eq!(
            party_from_fields(&fields, "supplier_data"),
            PartyRecord {
                ico: None,
                name: String::new(),
                address: String::new(),
                psc: String::new(),
                city: String::new(),
                dic: String::new(),
            }
        );
    }

    #[test]
    fn party_fields_map_street_to_address() {
        let fields: ParsedFields = serde_json::from_value(json!({
            "buyer_data": {
                "ICO": 12345678, "DIC": "SK2020", "Name": "Buyer s.r.o.",
                "Street": "Hlavna 1", "PSC": "81101", "City": "Bratislava"
            }
        }))
        .unwrap();
        assert_eq!(
            party_from_fields(&fields, "buyer_data"),
            PartyRecord {
                ico: Some("12345678".into()),
                name: "Buyer s.r.o.".into(),
                address: "Hlavna 1".into(),
                psc: "81101".into(),
                city: "Bratislava".into(),
                dic: "SK2020".into(),
            }
        );
    }

    #[test]
    fn bundle_requires_a_user() {
        let fields = ParsedFields::default();
        let err = build_bundle(&SessionContext::default(), input(&fields)).unwrap_err();
        assert!(matches!(err, ValidationError::MissingUser));
    }

    #[test]
    fn bundle_copies_business_fields_and_timing() {
        let fields: ParsedFields = serde_json::from_value(json!({
            "invoice_number": "2024001",
            "total_price": 1210.0,
            "iban": "SK3112000000198742637541",
            "payment_method": "transfer"
        }))
        .unwrap();
        let bundle = build_bundle(&session(), input(&fields)).unwrap();
        assert_eq!(bundle.invoice.user_id, 7);
        assert_eq!(bundle.invoice.organization_id, None);
        assert_eq!(bundle.invoice.invoice_number.as_deref(), Some("2024001"));
        assert_eq!(bundle.invoice.total_price.as_deref(), Some("1210.0"));
        assert_eq!(bundle.invoice.due_date, None);
        assert_eq!(bundle.invoice.text, "FAKTURA\n");
        assert_eq!(bundle.invoice.pdf_file, None);
        assert!(bundle.invoice.image_file.is_some());
        assert_eq!(bundle.performance.average_confidence, 87.5);
        assert_eq!(bundle.performance.recognition_time, 1.5);
        assert_eq!(bundle.performance.other_time, None);
        assert_eq!(bundle.supplier, PartyRecord::default());
    }
}
