//! Crate-level error type: wraps every module's error into one enum and
//! maps it to the status code taxonomy a dispatcher uses to build a
//! `Response::Err` (§7).

use crate::{field, file_manager, page, predicate, row};

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Field(#[from] field::Error),
    #[error(transparent)]
    Row(#[from] row::Error),
    #[error(transparent)]
    Page(#[from] page::Error),
    #[error(transparent)]
    File(#[from] file_manager::Error),
    #[error(transparent)]
    Predicate(#[from] predicate::Error),
    #[error("table {0:?} already exists")]
    TableAlreadyExists(String),
    #[error("table {0:?} does not exist")]
    TableNotFound(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("operation is not implemented")]
    NotImplemented,
}

impl DbError {
    /// The HTTP-style status code a gateway would report for this error.
    /// `400` for a malformed request, `404` for a missing table, `409` for
    /// a conflicting create, `500` for a storage failure, `501` for an
    /// unimplemented operation (§7).
    pub fn code(&self) -> u16 {
        match self {
            DbError::Field(_) | DbError::Predicate(_) => 400,
            DbError::Row(row::Error::MissingColumn(_)) | DbError::Row(row::Error::Field(_)) => 400,
            DbError::Row(row::Error::CorruptData) => 500,
            DbError::InvalidSchema(_) => 400,
            DbError::Page(_) => 500,
            DbError::File(file_manager::Error::NotFound(_)) => 404,
            DbError::File(file_manager::Error::Row(row::Error::MissingColumn(_)))
            | DbError::File(file_manager::Error::Row(row::Error::Field(_))) => 400,
            DbError::File(_) => 500,
            DbError::TableAlreadyExists(_) => 409,
            DbError::TableNotFound(_) => 404,
            DbError::NotImplemented => 501,
        }
    }
}
