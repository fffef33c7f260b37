//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::dataset::PublishedDataset;
use crate::errors::Result;
use crate::normalize::{self, MergeStats};
use crate::reconcile;
use crate::schema::{UpsertRow, UpsertSummary};
use crate::source::StatusSource;

/// Per-run settings derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Zone the source timestamps are recorded in.
    pub timezone: Tz,
    /// Build the payload but skip the write.
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::US::Central,
            dry_run: false,
        }
    }
}

/// Counts describing one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub fetched: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub unmatched_assets: usize,
    pub duplicate_assets: usize,
    /// Portal counters; `None` when the write was skipped.
    pub summary: Option<UpsertSummary>,
}

impl RunReport {
    pub fn payload_len(&self) -> usize {
        self.upserted + self.deleted
    }
}

/// Payload computed for a run together with its counts.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub payload: Vec<UpsertRow>,
    pub report: RunReport,
}

/// Sequences one reconciliation run between the source and the published dataset.
#[derive(Debug)]
pub struct StatusPublisher<S, D> {
    source: S,
    dataset: D,
    options: RunOptions,
}

impl<S, D> StatusPublisher<S, D>
where
    S: StatusSource,
    D: PublishedDataset,
{
    pub fn new(source: S, dataset: D, options: RunOptions) -> Self {
        Self {
            source,
            dataset,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Execute a run stamped with the current time.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    /// Execute a run, stamping records as processed at `now`.
    ///
    /// Any failure aborts the run before the write; nothing is retried.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let RunPlan {
            payload,
            mut report,
        } = self.plan_at(now).await?;

        if self.options.dry_run {
            info!(payload = payload.len(), "dry run; upsert skipped");
            return Ok(report);
        }

        let summary = self.dataset.upsert_status(&payload).await?;
        info!(
            created = summary.rows_created,
            updated = summary.rows_updated,
            deleted = summary.rows_deleted,
            errors = summary.errors,
            "upsert complete"
        );
        if summary.errors > 0 {
            warn!(errors = summary.errors, "portal reported row errors");
        }
        report.summary = Some(summary);
        Ok(report)
    }

    /// Read both sides and build the write payload without submitting it.
    pub async fn plan_at(&self, now: DateTime<Utc>) -> Result<RunPlan> {
        let records = self.source.fetch_flagged().await?;
        info!(records = records.len(), "records to process");
        let fetched = records.len();

        let records = normalize::stringify_signal_ids(records);

        let published = self.dataset.fetch_published_status().await?;
        debug!(published = published.len(), "published status rows fetched");
        let deletes = reconcile::identify_deletes(&records, &published);
        info!(deletes = deletes.len(), "records to be deleted");

        let signal_ids = reconcile::signal_ids(&records);
        let assets = self.dataset.fetch_assets(&signal_ids).await?;
        debug!(assets = assets.len(), "asset rows fetched");

        let tz = self.options.timezone;
        let (records, stats) =
            normalize::normalize_for_publish(records, &assets, tz, now.with_timezone(&tz))?;
        let MergeStats {
            unmatched,
            duplicates,
        } = stats;
        if duplicates > 0 {
            warn!(duplicates, "signals matched more than one asset row");
        }

        let report = RunReport {
            fetched,
            upserted: records.len(),
            deleted: deletes.len(),
            unmatched_assets: unmatched,
            duplicate_assets: duplicates,
            summary: None,
        };
        let payload = reconcile::build_payload(records, deletes);
        Ok(RunPlan { payload, report })
    }
}
