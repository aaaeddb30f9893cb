pub mod invoice_check;
pub mod materializer;
