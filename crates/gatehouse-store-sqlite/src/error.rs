//! Error type for `gatehouse-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value no enum variant maps to.
  #[error("cannot decode {column}: {value:?}")]
  Decode { column: &'static str, value: String },

  /// A row written inside a `call` could not be read back in the same call.
  #[error("{table} row {id} missing after write")]
  MissingAfterWrite { table: &'static str, id: i64 },

  /// Every generated access code collided with an existing one.
  #[error("could not generate a unique access code after {0} attempts")]
  CodeSpaceExhausted(usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
