use crate::error::{Error, Result};
use crate::types::SessionContext;
use std::path::PathBuf;

pub const APP_DIR_NAME: &str = "invoice-scanner";
pub const DB_FILE_NAME: &str = "invoice_scanner.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Identity used by the command line front end.
    pub session: SessionContext,
}

impl Config {
    /// Read configuration from the environment after loading `.env` from the
    /// working directory and from the data directory, if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let data_dir = data_dir_from(std::env::var("INVOICE_SCANNER_DATA_DIR").ok());
        let env_path = data_dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = data_dir_from(lookup("INVOICE_SCANNER_DATA_DIR"));
        let db_path = lookup("INVOICE_SCANNER_DB")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(DB_FILE_NAME));
        let log_filter = lookup("INVOICE_SCANNER_LOG")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        let session = SessionContext {
            user_id: parse_id(&lookup, "INVOICE_SCANNER_USER_ID")?,
            active_organization_id: parse_id(&lookup, "INVOICE_SCANNER_ORGANIZATION_ID")?,
        };
        Ok(Config {
            data_dir,
            db_path,
            log_filter,
            session,
        })
    }
}

fn data_dir_from(value: Option<String>) -> PathBuf {
    value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR_NAME)))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR_NAME))
}

fn parse_id<F>(lookup: &F, key: &str) -> Result<Option<i64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} must be an integer: {}", key, e))),
    }
}
