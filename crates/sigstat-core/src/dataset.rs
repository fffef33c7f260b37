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

use crate::errors::DatasetError;
use crate::schema::{PublishedStatus, SignalAsset, UpsertRow, UpsertSummary};

/// Read and write access to the published status dataset and the asset
/// reference dataset.
#[async_trait]
pub trait PublishedDataset: Send + Sync {
    /// Fetch every row currently published in the status dataset.
    async fn fetch_published_status(&self) -> Result<Vec<PublishedStatus>, DatasetError>;

    /// Fetch asset rows for the given signal identifiers.
    async fn fetch_assets(&self, signal_ids: &[String]) -> Result<Vec<SignalAsset>, DatasetError>;

    /// Submit upserts and deletion markers as one batched write.
    async fn upsert_status(&self, payload: &[UpsertRow]) -> Result<UpsertSummary, DatasetError>;
}
