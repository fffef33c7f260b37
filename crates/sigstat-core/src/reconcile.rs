//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;

use crate::schema::{DeletionMarker, PublishedStatus, SignalStatusRecord, UpsertRow};

/// String keys of the source records, in source order.
pub fn signal_ids(records: &[SignalStatusRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.signal_id.key().into_owned())
        .collect()
}

/// Deletion markers for published rows whose signal is no longer flagged.
///
/// Markers follow the order of `published`. Records present on both sides are
/// not inspected; every source record is upserted regardless.
pub fn identify_deletes(
    source: &[SignalStatusRecord],
    published: &[PublishedStatus],
) -> Vec<DeletionMarker> {
    let flagged: HashSet<String> = source
        .iter()
        .map(|record| record.signal_id.key().into_owned())
        .collect();
    published
        .iter()
        .map(|row| row.signal_id.key())
        .filter(|key| !flagged.contains(&**key))
        .map(DeletionMarker::new)
        .collect()
}

/// Batched write payload: every upsert, then every deletion marker.
pub fn build_payload(upserts: Vec<SignalStatusRecord>, deletes: Vec<DeletionMarker>) -> Vec<UpsertRow> {
    upserts
        .into_iter()
        .map(UpsertRow::Upsert)
        .chain(deletes.into_iter().map(UpsertRow::Delete))
        .collect()
}
