//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;

use crate::errors::SourceError;
use crate::schema::SignalStatusRecord;

/// Provides the signals currently in a flagged operation state.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Return every flagged signal, most recent status change first.
    ///
    /// Records come back un-normalised: identifiers and status values keep the
    /// database's native types and timestamps are naive local times.
    async fn fetch_flagged(&self) -> Result<Vec<SignalStatusRecord>, SourceError>;
}
