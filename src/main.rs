use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use invoice_scanner_lib::commands::{self, AnalyzePayload, Attachments, SaveTimeOtherPayload};
use invoice_scanner_lib::config::Config;
use invoice_scanner_lib::services::invoice_check::{score_document, score_fields};
use invoice_scanner_lib::{logging, Db, ParsedFields};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "invoice-scanner", version, about = "Score OCR output and store invoices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate OCR output, classify it and store it when it is an invoice.
    Analyze {
        /// JSON file with `ocr`, `ocr_method`, `parsed_data`, `time`.
        payload: PathBuf,
        #[arg(long)]
        pdf: Option<PathBuf>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Print the invoice score of a parsed-fields JSON file.
    Score {
        fields: PathBuf,
        /// Also count invoice keywords found in this transcript.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
    /// Record the client-side remaining time for a stored invoice.
    SaveTimeOther { invoice_id: i64, seconds: f64 },
    /// Print the performance record of a stored invoice.
    Performance { invoice_id: i64 },
    /// Print a stored invoice with its supplier, buyer and performance rows.
    Show { invoice_id: i64 },
    /// Write the stored PDF and image of an invoice to a directory.
    Export {
        invoice_id: i64,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    logging::init(&config.log_filter);

    match cli.command {
        Command::Score { fields, transcript } => {
            let fields: ParsedFields = read_json(&fields)?;
            let breakdown = match transcript {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    score_document(&fields, &text)
                }
                None => score_fields(&fields),
            };
            print_json(&serde_json::json!({
                "score": breakdown.total,
                "is_invoice": breakdown.accepted(),
                "contributions": breakdown.contributions,
            }))
        }
        Command::Analyze { payload, pdf, image } => {
            let db = open_db(&config)?;
            let payload: AnalyzePayload = read_json(&payload)?;
            let attachments = Attachments {
                pdf: pdf.map(|p| load_attachment(&p, false)).transpose()?,
                image: image.map(|p| load_attachment(&p, true)).transpose()?,
            };
            let response = commands::analyze_document(&db, &config.session, payload, attachments)?;
            print_json(&response)
        }
        Command::SaveTimeOther { invoice_id, seconds } => {
            let db = open_db(&config)?;
            commands::save_time_other(
                &db,
                SaveTimeOtherPayload {
                    invoice_id,
                    time_other: seconds,
                },
            )?;
            print_json(&serde_json::json!({ "invoice_id": invoice_id, "time_other": seconds }))
        }
        Command::Performance { invoice_id } => {
            let db = open_db(&config)?;
            print_json(&commands::get_performance_data(&db, invoice_id)?)
        }
        Command::Show { invoice_id } => {
            let db = open_db(&config)?;
            match db.get_invoice(invoice_id)? {
                Some(invoice) => print_json(&invoice),
                None => bail!("invoice {} not found", invoice_id),
            }
        }
        Command::Export { invoice_id, out } => {
            let db = open_db(&config)?;
            let written = commands::export_attachments(&db, invoice_id, &out)?;
            print_json(&written)
        }
    }
}

fn open_db(config: &Config) -> Result<Db> {
    Db::new(config.db_path.clone())
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

fn load_attachment(path: &Path, want_image: bool) -> Result<Vec<u8>> {
    let (kind, bytes) = commands::read_document_file(path)?;
    if kind.is_image() != want_image {
        bail!("{} is a {:?} file", path.display(), kind);
    }
    Ok(bytes)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
