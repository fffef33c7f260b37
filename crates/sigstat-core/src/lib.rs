//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core of the signal status publisher.
//!
//! A run reads flagged signals from the source database, normalises them into
//! the published schema, works out which published rows no longer have a
//! flagged counterpart, and submits upserts plus deletion markers as a single
//! batch. The database and the portal sit behind [`StatusSource`] and
//! [`PublishedDataset`] so the pipeline can be exercised without either.

pub mod dataset;
pub mod errors;
pub mod normalize;
pub mod orchestrator;
pub mod reconcile;
pub mod schema;
pub mod source;

pub use dataset::PublishedDataset;
pub use errors::{BoxError, DatasetError, PipelineError, Result, SourceError};
pub use normalize::MergeStats;
pub use orchestrator::{RunOptions, RunPlan, RunReport, StatusPublisher};
pub use schema::{
    DeletionMarker, EventTime, Location, PublishedStatus, SignalAsset, SignalId,
    SignalStatusRecord, StatusValue, UpsertRow, UpsertSummary, SIGNAL_ID_FIELD,
};
pub use source::StatusSource;
