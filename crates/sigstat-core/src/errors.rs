//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures raised while reading flagged signals from the source database.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source database connection failed: {0}")]
    Connection(#[source] BoxError),
    #[error("source query failed: {0}")]
    Query(#[source] BoxError),
    #[error("unexpected source row shape: {0}")]
    DataShape(String),
}

/// Failures raised while reading from or writing to the published dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Http {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("unable to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: BoxError,
    },
}

/// Any failure that aborts a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("record for signal {signal_id} cannot be normalised: {reason}")]
    DataShape { signal_id: String, reason: String },
}
