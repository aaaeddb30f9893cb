pub mod records;

pub use records::{InvoiceBundle, InvoiceRecord, PartyRecord, PerformanceRecord, StoredInvoice};
