use crate::error::StoreError;
use crate::models::{InvoiceBundle, InvoiceRecord, PartyRecord, PerformanceRecord, StoredInvoice};
use crate::types::OcrMethod;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert performance, supplier, buyer and invoice rows in one transaction.
    /// Returns the invoice id; on error nothing from this call is kept.
    pub fn insert_invoice_bundle(&self, bundle: &InvoiceBundle) -> Result<i64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let performance_id = insert_performance(&tx, &bundle.performance)?;
        let supplier_id = insert_party(&tx, "supplier", &bundle.supplier)?;
        let buyer_id = insert_party(&tx, "buyer", &bundle.buyer)?;

        let inv = &bundle.invoice;
        tx.execute(
            "INSERT INTO invoice
             (user_id, organization_id, invoice_number, var_symbol, date_of_issue, due_date,
              delivery_date, payment_method, total_price, bank, swift, iban,
              supplier_id, buyer_id, performance_id, text, pdf_file, image_file, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                inv.user_id,
                inv.organization_id,
                inv.invoice_number,
                inv.var_symbol,
                inv.date_of_issue,
                inv.due_date,
                inv.delivery_date,
                inv.payment_method,
                inv.total_price,
                inv.bank,
                inv.swift,
                inv.iban,
                supplier_id,
                buyer_id,
                performance_id,
                inv.text,
                inv.pdf_file,
                inv.image_file,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        let invoice_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(invoice_id)
    }

    /// Record the client-side "other" time on the invoice's performance row.
    pub fn set_other_time(&self, invoice_id: i64, seconds: f64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE performance SET other_time = ?1
             WHERE id = (SELECT performance_id FROM invoice WHERE id = ?2)",
            params![seconds, invoice_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "invoice",
                id: invoice_id,
            });
        }
        Ok(())
    }

    pub fn performance_for_invoice(&self, invoice_id: i64) -> Result<Option<PerformanceRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT p.average_confidence, p.recognition_time, p.parsing_time, p.other_time, p.ocr_method
                 FROM performance p JOIN invoice i ON i.performance_id = p.id
                 WHERE i.id = ?1",
                params![invoice_id],
                |row| performance_from_row(row, 0),
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_invoice(&self, invoice_id: i64) -> Result<Option<StoredInvoice>, StoreError> {
        let conn = self.lock()?;
        let stored = conn
            .query_row(
                "SELECT i.id, i.created_at, i.performance_id, i.supplier_id, i.buyer_id,
                        i.user_id, i.organization_id, i.invoice_number, i.var_symbol, i.date_of_issue,
                        i.due_date, i.delivery_date, i.payment_method, i.total_price, i.bank,
                        i.swift, i.iban, i.text, i.pdf_file IS NOT NULL, i.image_file IS NOT NULL,
                        s.ico, s.name, s.address, s.psc, s.city, s.dic,
                        b.ico, b.name, b.address, b.psc, b.city, b.dic,
                        p.average_confidence, p.recognition_time, p.parsing_time, p.other_time, p.ocr_method
                 FROM invoice i
                 JOIN supplier s ON s.id = i.supplier_id
                 JOIN buyer b ON b.id = i.buyer_id
                 JOIN performance p ON p.id = i.performance_id
                 WHERE i.id = ?1",
                params![invoice_id],
                |row| {
                    Ok(StoredInvoice {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        performance_id: row.get(2)?,
                        supplier_id: row.get(3)?,
                        buyer_id: row.get(4)?,
                        invoice: InvoiceRecord {
                            user_id: row.get(5)?,
                            organization_id: row.get(6)?,
                            invoice_number: row.get(7)?,
                            var_symbol: row.get(8)?,
                            date_of_issue: row.get(9)?,
                            due_date: row.get(10)?,
                            delivery_date: row.get(11)?,
                            payment_method: row.get(12)?,
                            total_price: row.get(13)?,
                            bank: row.get(14)?,
                            swift: row.get(15)?,
                            iban: row.get(16)?,
                            text: row.get(17)?,
                            pdf_file: None,
                            image_file: None,
                        },
                        has_pdf: row.get(18)?,
                        has_image: row.get(19)?,
                        supplier: party_from_row(row, 20)?,
                        buyer: party_from_row(row, 26)?,
                        performance: performance_from_row(row, 32)?,
                    })
                },
            )
            .optional()?;
        Ok(stored)
    }

    /// Raw PDF and image blobs attached to an invoice.
    pub fn invoice_files(&self, invoice_id: i64) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT pdf_file, image_file FROM invoice WHERE id = ?1",
            params![invoice_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "invoice",
            id: invoice_id,
        })
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?;
        Ok(n)
    }
}

/// Bring the schema up to date. The version is read and bumped under one
/// write lock so concurrent openers of a fresh file apply it only once.
fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE;")?;
    match apply_migrations(conn) {
        Ok(()) => {
            conn.execute_batch("COMMIT;")?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK;") {
                warn!(error = %rollback, "rollback after failed migration");
            }
            Err(e)
        }
    }
}

fn apply_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    let current_version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if current_version < 1 {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS performance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                average_confidence REAL NOT NULL,
                recognition_time REAL NOT NULL,
                parsing_time REAL NOT NULL,
                other_time REAL,
                ocr_method TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS supplier (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ico TEXT,
                name TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                psc TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                dic TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS buyer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ico TEXT,
                name TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                psc TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                dic TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS invoice (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                organization_id INTEGER,
                invoice_number TEXT,
                var_symbol TEXT,
                date_of_issue TEXT,
                due_date TEXT,
                delivery_date TEXT,
                payment_method TEXT,
                total_price TEXT,
                bank TEXT,
                swift TEXT,
                iban TEXT,
                supplier_id INTEGER NOT NULL REFERENCES supplier(id),
                buyer_id INTEGER NOT NULL REFERENCES buyer(id),
                performance_id INTEGER NOT NULL UNIQUE REFERENCES performance(id),
                text TEXT NOT NULL,
                pdf_file BLOB,
                image_file BLOB,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_invoice_user ON invoice(user_id);
            CREATE INDEX IF NOT EXISTS idx_invoice_organization ON invoice(organization_id);
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}

fn insert_performance(tx: &Transaction<'_>, p: &PerformanceRecord) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT INTO performance (average_confidence, recognition_time, parsing_time, other_time, ocr_method)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            p.average_confidence,
            p.recognition_time,
            p.parsing_time,
            p.other_time,
            p.ocr_method.as_str(),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// `table` is one of the fixed party tables, never caller input.
fn insert_party(tx: &Transaction<'_>, table: &'static str, party: &PartyRecord) -> Result<i64, StoreError> {
    tx.execute(
        &format!(
            "INSERT INTO {} (ico, name, address, psc, city, dic) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            table
        ),
        params![party.ico, party.name, party.address, party.psc, party.city, party.dic],
    )?;
    Ok(tx.last_insert_rowid())
}

fn party_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<PartyRecord> {
    Ok(PartyRecord {
        ico: row.get(offset)?,
        name: row.get(offset + 1)?,
        address: row.get(offset + 2)?,
        psc: row.get(offset + 3)?,
        city: row.get(offset + 4)?,
        dic: row.get(offset + 5)?,
    })
}

fn performance_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<PerformanceRecord> {
    let method: String = row.get(offset + 4)?;
    let ocr_method = method
        .parse::<OcrMethod>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(offset + 4, Type::Text, e.into()))?;
    Ok(PerformanceRecord {
        average_confidence: row.get(offset)?,
        recognition_time: row.get(offset + 1)?,
        parsing_time: row.get(offset + 2)?,
        other_time: row.get(offset + 3)?,
        ocr_method,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> InvoiceBundle {
        InvoiceBundle {
            performance: PerformanceRecord {
                average_confidence: 0.93,
                recognition_time: 2.0,
                parsing_time: 0.5,
                other_time: None,
                ocr_method: OcrMethod::PaddleOcr,
            },
            supplier: PartyRecord {
                ico: Some("36528048".into()),
                name: "Acme s.r.o.".into(),
                address: "Hlavna 1".into(),
                psc: "81101".into(),
                city: "Bratislava".into(),
                dic: "2020202020".into(),
            },
            buyer: PartyRecord::default(),
            invoice: InvoiceRecord {
                user_id: 3,
                organization_id: Some(11),
                invoice_number: Some("FV2024001".into()),
                total_price: Some("120.50".into()),
                text: "FAKTURA\nFV2024001\n".into(),
                pdf_file: Some(b"%PDF-1.7".to_vec()),
                ..InvoiceRecord::default()
            },
        }
    }

    #[test]
    fn stores_and_reads_back_all_four_rows() {
        let db = Db::open_in_memory().unwrap();
        let original = bundle();
        let id = db.insert_invoice_bundle(&original).unwrap();

        let stored = db.get_invoice(id).unwrap().expect("invoice row");
        assert_eq!(stored.id, id);
        assert_eq!(stored.supplier, original.supplier);
        assert_eq!(stored.buyer, PartyRecord::default());
        assert_eq!(stored.buyer.ico, None);
        assert_eq!(stored.performance, original.performance);
        assert_eq!(stored.invoice.invoice_number.as_deref(), Some("FV2024001"));
        assert_eq!(stored.invoice.organization_id, Some(11));
        assert!(stored.has_pdf);
        assert!(!stored.has_image);

        let (pdf, image) = db.invoice_files(id).unwrap();
        assert_eq!(pdf.as_deref(), Some(&b"%PDF-1.7"[..]));
        assert_eq!(image, None);
    }

    #[test]
    fn failed_invoice_insert_leaves_no_rows() {
        let db = Db::open_in_memory().unwrap();
        db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_invoice BEFORE INSERT ON invoice
                 BEGIN SELECT RAISE(ABORT, 'invoice insert rejected'); END;",
            )
            .unwrap();

        let err = db.insert_invoice_bundle(&bundle()).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        for table in ["performance", "supplier", "buyer", "invoice"] {
            assert_eq!(db.count_rows(table).unwrap(), 0, "{} has leftover rows", table);
        }

        db.lock().unwrap().execute_batch("DROP TRIGGER reject_invoice;").unwrap();
        db.insert_invoice_bundle(&bundle()).unwrap();
        for table in ["performance", "supplier", "buyer", "invoice"] {
            assert_eq!(db.count_rows(table).unwrap(), 1);
        }
    }

    #[test]
    fn other_time_updates_the_linked_performance_row() {
        let db = Db::open_in_memory().unwrap();
        let id = db.insert_invoice_bundle(&bundle()).unwrap();
        assert_eq!(db.performance_for_invoice(id).unwrap().unwrap().other_time, None);

        db.set_other_time(id, 0.75).unwrap();
        let perf = db.performance_for_invoice(id).unwrap().unwrap();
        assert_eq!(perf.other_time, Some(0.75));
        assert_eq!(perf.ocr_method, OcrMethod::PaddleOcr);
    }

    #[test]
    fn unknown_invoice_is_reported() {
        let db = Db::open_in_memory().unwrap();
        assert!(matches!(
            db.set_other_time(42, 1.0),
            Err(StoreError::NotFound { entity: "invoice", id: 42 })
        ));
        assert_eq!(db.performance_for_invoice(42).unwrap(), None);
        assert_eq!(db.get_invoice(42).unwrap(), None);
        assert!(db.invoice_files(42).is_err());
    }

    #[test]
    fn migration_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.lock().unwrap();
        migrate(&conn).unwrap();
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn concurrent_openers_of_a_fresh_file_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || Db::new(path).map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let db = Db::new(path).unwrap();
        let versions: i64 = db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
        db.insert_invoice_bundle(&bundle()).unwrap();
    }
}
