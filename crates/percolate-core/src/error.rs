use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::DecodeError;
use crate::query::QueryError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("no such index [{0}]")]
    IndexNotFound(String),

    #[error("document missing [{index}][{doc_type}][{id}]")]
    DocumentMissing { index: String, doc_type: String, id: String },

    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    /// Fatal errors abort the whole call instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ClusterUnavailable(_) | Error::Routing(_))
    }

    pub fn status(&self) -> Status {
        match self {
            Error::InvalidConfig(_) | Error::InvalidRequest(_) | Error::Decode(_) | Error::Query(_) => Status::BadRequest,
            Error::IndexNotFound(_) | Error::DocumentMissing { .. } => Status::NotFound,
            Error::Timeout(_) => Status::RequestTimeout,
            Error::ClusterUnavailable(_) | Error::Routing(_) => Status::ServiceUnavailable,
            Error::Operation(_) => Status::InternalServerError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-like status attached to shard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Status {
    BadRequest,
    NotFound,
    RequestTimeout,
    InternalServerError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::RequestTimeout => 408,
            Status::InternalServerError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn is_client_error(self) -> bool { (400..500).contains(&self.code()) }
}

impl From<Status> for u16 {
    fn from(status: Status) -> u16 { status.code() }
}

impl TryFrom<u16> for Status {
    type Error = String;

    fn try_from(code: u16) -> std::result::Result<Self, Self::Error> {
        match code {
            400 => Ok(Status::BadRequest),
            404 => Ok(Status::NotFound),
            408 => Ok(Status::RequestTimeout),
            500 => Ok(Status::InternalServerError),
            503 => Ok(Status::ServiceUnavailable),
            other => Err(format!("unsupported status code {other}")),
        }
    }
}
