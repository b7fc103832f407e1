//! Runtime settings, read from the environment.
//!
//! | variable                 | default               |
//! |--------------------------|-----------------------|
//! | `TABULA_DATABASE_URL`    | `DATABASE_URL`        |
//! | `TABULA_POOL_SIZE`       | `8`                   |
//! | `TABULA_UPDATE_RETRIES`  | `3`                   |

use thiserror::Error;

pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_UPDATE_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("TABULA_DATABASE_URL (or DATABASE_URL) is not set")]
    MissingDatabaseUrl,

    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub pool_size: usize,
    /// How many times an update re-diffs after losing a version race.
    pub update_retries: u32,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let database_url = lookup("TABULA_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|url| !url.is_empty())
            .ok_or(SettingsError::MissingDatabaseUrl)?;

        Ok(Self {
            database_url,
            pool_size: number(&lookup, "TABULA_POOL_SIZE", DEFAULT_POOL_SIZE)?,
            update_retries: number(&lookup, "TABULA_UPDATE_RETRIES", DEFAULT_UPDATE_RETRIES)?,
        })
    }
}

fn number<T: std::str::FromStr + PartialOrd + Default>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, SettingsError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => match value.trim().parse::<T>() {
            Ok(n) if n > T::default() => Ok(n),
            _ => Err(SettingsError::InvalidNumber { var, value }),
        },
    }
}
