//! Sqlite-backed implementations of the core store traits. Rows decode by
//! hand; timestamps are RFC 3339 text, amounts are decimal text.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use signoff_core::StoreError;

pub mod approval;
pub mod chain;
pub mod directory;
pub mod level;

pub use approval::SqlApprovalStore;
pub use chain::SqlChainStore;
pub use directory::SqlUserDirectory;
pub use level::SqlLevelStore;

pub(crate) fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| StoreError::Decode(format!("invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_opt_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_amount(value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value)
        .map_err(|error| StoreError::Decode(format!("invalid amount `{value}`: {error}")))
}

pub(crate) fn try_column<'r, T>(
    row: &'r sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    use sqlx::Row;
    row.try_get(column).map_err(|error| StoreError::Decode(error.to_string()))
}
