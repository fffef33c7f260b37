//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness collaborators and shared exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use sigstat_core::{
    DatasetError, PublishedDataset, PublishedStatus, SignalAsset, SignalStatusRecord, SourceError,
    StatusSource, StatusValue, UpsertRow, UpsertSummary,
};

/// Build an un-normalised record the way the KITS reader returns it.
///
/// `at` uses the `YYYY-MM-DD HH:MM:SS` layout.
pub fn flagged_record(signal_id: i64, operation_state: f64, plan_id: f64, at: &str) -> SignalStatusRecord {
    let at = NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M:%S")
        .unwrap_or_else(|err| panic!("invalid fixture timestamp {at}: {err}"));
    SignalStatusRecord::from_source(
        signal_id,
        StatusValue::Numeric(operation_state),
        StatusValue::Numeric(plan_id),
        at,
    )
}

/// Source returning a fixed set of records, or a fixed failure.
#[derive(Debug)]
pub struct StaticSource {
    records: Vec<SignalStatusRecord>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(records: Vec<SignalStatusRecord>) -> Self {
        Self {
            records,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Source whose every fetch fails with a connection error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            failure: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for StaticSource {
    async fn fetch_flagged(&self) -> Result<Vec<SignalStatusRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(SourceError::Connection(message.clone().into())),
            None => Ok(self.records.clone()),
        }
    }
}

/// Published dataset held in memory; writes are recorded, not applied.
#[derive(Debug, Default)]
pub struct InMemoryDataset {
    published: Vec<PublishedStatus>,
    assets: Vec<SignalAsset>,
    fail_writes: bool,
    asset_requests: Mutex<Vec<Vec<String>>>,
    writes: Mutex<Vec<Vec<UpsertRow>>>,
}

impl InMemoryDataset {
    pub fn new(published: Vec<PublishedStatus>, assets: Vec<SignalAsset>) -> Self {
        Self {
            published,
            assets,
            ..Self::default()
        }
    }

    /// Reject every upsert with HTTP 500.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Identifier lists passed to `fetch_assets`, in call order.
    pub fn asset_requests(&self) -> Vec<Vec<String>> {
        self.asset_requests.lock().clone()
    }

    /// Payloads passed to `upsert_status`, in call order.
    pub fn writes(&self) -> Vec<Vec<UpsertRow>> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl PublishedDataset for InMemoryDataset {
    async fn fetch_published_status(&self) -> Result<Vec<PublishedStatus>, DatasetError> {
        Ok(self.published.clone())
    }

    async fn fetch_assets(&self, signal_ids: &[String]) -> Result<Vec<SignalAsset>, DatasetError> {
        self.asset_requests.lock().push(signal_ids.to_vec());
        Ok(self
            .assets
            .iter()
            .filter(|asset| signal_ids.iter().any(|id| *id == asset.signal_id.key()))
            .cloned()
            .collect())
    }

    async fn upsert_status(&self, payload: &[UpsertRow]) -> Result<UpsertSummary, DatasetError> {
        if self.fail_writes {
            return Err(DatasetError::Http {
                method: "POST",
                url: "memory://status".into(),
                status: 500,
                body: "write rejected".into(),
            });
        }
        self.writes.lock().push(payload.to_vec());
        let deleted = payload.iter().filter(|row| row.is_delete()).count() as u64;
        Ok(UpsertSummary {
            rows_created: 0,
            rows_updated: payload.len() as u64 - deleted,
            rows_deleted: deleted,
            errors: 0,
        })
    }
}
