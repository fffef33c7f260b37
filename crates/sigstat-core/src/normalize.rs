//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Normalisation passes turning source records into published rows.
//!
//! Each pass consumes a record sequence and returns a new one. Stringifying
//! identifiers, coercing status values and formatting locations leave their
//! own output unchanged. Localising and stamping read the wall clock or the
//! source zone, so a run applies each of them exactly once.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{PipelineError, Result};
use crate::schema::{
    EventTime, Location, SignalAsset, SignalStatusRecord, StatusValue, PUBLISHED_TIME_FORMAT,
};

const LATITUDE: &str = "latitude";
const LONGITUDE: &str = "longitude";

/// Outcome of merging asset metadata onto status records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Records with no asset row; their descriptive columns stay unset.
    pub unmatched: usize,
    /// Records with more than one asset row; the first row was used.
    pub duplicates: usize,
}

/// Convert every signal identifier to its string form.
pub fn stringify_signal_ids(records: Vec<SignalStatusRecord>) -> Vec<SignalStatusRecord> {
    records
        .into_iter()
        .map(|mut record| {
            record.signal_id = record.signal_id.into_text();
            record
        })
        .collect()
}

/// Copy location and street columns from the matching asset row.
///
/// Signals unknown to the asset registry (lab and test cabinets) keep their
/// descriptive columns unset. Duplicate asset rows are tolerated and counted.
pub fn merge_assets(
    records: Vec<SignalStatusRecord>,
    assets: &[SignalAsset],
) -> (Vec<SignalStatusRecord>, MergeStats) {
    let mut index: HashMap<String, (&SignalAsset, usize)> = HashMap::with_capacity(assets.len());
    for asset in assets {
        index
            .entry(asset.signal_id.key().into_owned())
            .and_modify(|(_, count)| *count += 1)
            .or_insert((asset, 1));
    }

    let mut stats = MergeStats::default();
    let merged = records
        .into_iter()
        .map(|mut record| {
            let key = record.signal_id.key().into_owned();
            match index.get(key.as_str()) {
                Some((asset, count)) => {
                    if *count > 1 {
                        stats.duplicates += 1;
                        warn!(
                            signal_id = %record.signal_id,
                            matches = *count,
                            "multiple asset rows for signal; using the first"
                        );
                    }
                    record.apply_asset(asset);
                }
                None => {
                    stats.unmatched += 1;
                    debug!(signal_id = %record.signal_id, "signal not found in asset data");
                }
            }
            record
        })
        .collect();
    (merged, stats)
}

/// Render a naive KITS timestamp as wall-clock time in `tz`.
///
/// Ambiguous times at the end of daylight saving resolve to the earlier
/// instant. Times inside the spring-forward gap keep their wall-clock reading.
pub fn localize(naive: &NaiveDateTime, tz: Tz) -> String {
    match tz.from_local_datetime(naive).earliest() {
        Some(local) => local.format(PUBLISHED_TIME_FORMAT).to_string(),
        None => naive.format(PUBLISHED_TIME_FORMAT).to_string(),
    }
}

/// Replace naive status timestamps with their published string form.
pub fn localize_event_times(records: Vec<SignalStatusRecord>, tz: Tz) -> Vec<SignalStatusRecord> {
    records
        .into_iter()
        .map(|mut record| {
            if let EventTime::Naive(naive) = record.operation_state_datetime {
                record.operation_state_datetime = EventTime::Published(localize(&naive, tz));
            }
            record
        })
        .collect()
}

/// Stamp each record with the time this run processed it.
pub fn stamp_processed(records: Vec<SignalStatusRecord>, now: DateTime<Tz>) -> Vec<SignalStatusRecord> {
    let stamp = now.format(PUBLISHED_TIME_FORMAT).to_string();
    records
        .into_iter()
        .map(|mut record| {
            record.processed_datetime = Some(stamp.clone());
            record
        })
        .collect()
}

/// Force `operation_state` and `plan_id` to integers.
pub fn coerce_status_values(records: Vec<SignalStatusRecord>) -> Result<Vec<SignalStatusRecord>> {
    records
        .into_iter()
        .map(|mut record| {
            record.operation_state = coerce(&record, "operation_state", record.operation_state)?;
            record.plan_id = coerce(&record, "plan_id", record.plan_id)?;
            Ok(record)
        })
        .collect()
}

fn coerce(record: &SignalStatusRecord, field: &str, value: StatusValue) -> Result<StatusValue> {
    value
        .to_integer()
        .map(StatusValue::Integer)
        .ok_or_else(|| PipelineError::DataShape {
            signal_id: record.signal_id.to_string(),
            reason: format!("{field} is not a finite number"),
        })
}

/// Replace structured points carrying both coordinates with `"(lon, lat)"`.
pub fn format_locations(records: Vec<SignalStatusRecord>) -> Vec<SignalStatusRecord> {
    records
        .into_iter()
        .map(|mut record| {
            if let Some(Location::Structured(point)) = &record.location {
                if let Some(formatted) = format_point(point) {
                    record.location = Some(Location::Formatted(formatted));
                }
            }
            record
        })
        .collect()
}

fn format_point(point: &Map<String, Value>) -> Option<String> {
    let latitude = coordinate(point.get(LATITUDE))?;
    let longitude = coordinate(point.get(LONGITUDE))?;
    Some(format!("({longitude}, {latitude})"))
}

fn coordinate(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Apply the post-reconciliation passes in order: merge assets, localise
/// event times, stamp processing time, coerce status values, format locations.
pub fn normalize_for_publish(
    records: Vec<SignalStatusRecord>,
    assets: &[SignalAsset],
    tz: Tz,
    now: DateTime<Tz>,
) -> Result<(Vec<SignalStatusRecord>, MergeStats)> {
    let (records, stats) = merge_assets(records, assets);
    let records = localize_event_times(records, tz);
    let records = stamp_processed(records, now);
    let records = coerce_status_values(records)?;
    let records = format_locations(records);
    Ok((records, stats))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use chrono_tz::US::Central;
    use serde_json::json;

    use super::*;
    use crate::schema::SignalId;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn record(signal_id: SignalId) -> SignalStatusRecord {
        SignalStatusRecord::from_source(
            signal_id,
            StatusValue::Numeric(2.0),
            StatusValue::Numeric(4.0),
            naive(2024, 1, 15, 8, 30, 0),
        )
    }

    fn point(value: Value) -> Location {
        match value {
            Value::Object(map) => Location::Structured(map),
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn stringify_is_idempotent() {
        let once = stringify_signal_ids(vec![record(SignalId::Numeric(101)), record("102".into())]);
        assert_eq!(once[0].signal_id, SignalId::Text("101".into()));
        assert_eq!(once[1].signal_id, SignalId::Text("102".into()));
        let twice = stringify_signal_ids(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_copies_asset_columns() {
        let mut asset = SignalAsset::new("101");
        asset.location_name = Some("Main & 5th".into());
        asset.primary_st = Some("Main St".into());
        let (merged, stats) = merge_assets(vec![record("101".into())], &[asset]);
        assert_eq!(merged[0].location_name.as_deref(), Some("Main & 5th"));
        assert_eq!(merged[0].primary_st.as_deref(), Some("Main St"));
        assert_eq!(stats, MergeStats::default());
    }

    #[test]
    fn merge_matches_numeric_asset_ids_by_string_form() {
        let mut asset = SignalAsset::new(101_i64);
        asset.cross_st = Some("5th St".into());
        let (merged, _) = merge_assets(vec![record("101".into())], &[asset]);
        assert_eq!(merged[0].cross_st.as_deref(), Some("5th St"));
    }

    #[test]
    fn merge_with_partial_asset_clears_missing_columns() {
        let mut asset = SignalAsset::new("101");
        asset.location_name = Some("Main & 5th".into());
        let (merged, stats) = merge_assets(vec![record("101".into())], &[asset]);
        assert_eq!(stats, MergeStats::default());
        assert!(merged[0].asset_merged);
        let value = serde_json::to_value(&merged[0]).unwrap();
        assert_eq!(value.get("cross_st"), Some(&Value::Null));
        assert_eq!(value.get("primary_st"), Some(&Value::Null));
        assert_eq!(value["location_name"], json!("Main & 5th"));
    }

    #[test]
    fn merge_without_match_leaves_columns_absent() {
        let mut asset = SignalAsset::new("999");
        asset.location_name = Some("Elsewhere".into());
        let (merged, stats) = merge_assets(vec![record("101".into())], &[asset]);
        assert_eq!(merged[0].location_name, None);
        assert_eq!(stats.unmatched, 1);
        let value = serde_json::to_value(&merged[0]).unwrap();
        assert!(value.get("location_name").is_none());
    }

    #[test]
    fn merge_takes_first_duplicate_and_counts_it() {
        let mut first = SignalAsset::new("101");
        first.location_name = Some("First".into());
        let mut second = SignalAsset::new("101");
        second.location_name = Some("Second".into());
        let (merged, stats) = merge_assets(vec![record("101".into())], &[first, second]);
        assert_eq!(merged[0].location_name.as_deref(), Some("First"));
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.unmatched, 0);
    }

    #[test]
    fn localize_keeps_wall_clock_without_offset() {
        assert_eq!(
            localize(&naive(2024, 1, 15, 8, 30, 0), Central),
            "2024-01-15T08:30:00"
        );
    }

    #[test]
    fn localize_drops_subsecond_precision() {
        let precise = naive(2024, 7, 4, 17, 5, 9)
            .checked_add_signed(chrono::Duration::milliseconds(750))
            .unwrap();
        assert_eq!(localize(&precise, Central), "2024-07-04T17:05:09");
    }

    #[test]
    fn localize_handles_daylight_saving_edges() {
        // 2024-03-10 02:30 does not exist in US/Central.
        assert_eq!(
            localize(&naive(2024, 3, 10, 2, 30, 0), Central),
            "2024-03-10T02:30:00"
        );
        // 2024-11-03 01:30 occurs twice.
        assert_eq!(
            localize(&naive(2024, 11, 3, 1, 30, 0), Central),
            "2024-11-03T01:30:00"
        );
    }

    #[test]
    fn localize_pass_replaces_naive_times() {
        let records = localize_event_times(vec![record("101".into())], Central);
        assert_eq!(
            records[0].operation_state_datetime,
            EventTime::Published("2024-01-15T08:30:00".into())
        );
    }

    #[test]
    fn stamp_uses_zone_local_time() {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 35, 12)
            .unwrap()
            .with_timezone(&Central);
        let records = stamp_processed(vec![record("101".into()), record("102".into())], now);
        for record in &records {
            assert_eq!(record.processed_datetime.as_deref(), Some("2024-01-15T08:35:12"));
        }
    }

    #[test]
    fn coercion_turns_decimals_into_integers_idempotently() {
        let once = coerce_status_values(vec![record("101".into())]).unwrap();
        assert_eq!(once[0].operation_state, StatusValue::Integer(2));
        assert_eq!(once[0].plan_id, StatusValue::Integer(4));
        let twice = coerce_status_values(once.clone()).unwrap();
        assert_eq!(once, twice);
        let value = serde_json::to_value(&twice[0]).unwrap();
        assert_eq!(value["operation_state"], json!(2));
    }

    #[test]
    fn coercion_rejects_non_finite_values() {
        let mut bad = record("101".into());
        bad.plan_id = StatusValue::Numeric(f64::INFINITY);
        let err = coerce_status_values(vec![bad]).unwrap_err();
        assert!(err.to_string().contains("plan_id"));
    }

    #[test]
    fn location_point_is_formatted_lon_lat() {
        let mut rec = record("101".into());
        rec.location = Some(point(json!({"latitude": 30.1, "longitude": -97.7})));
        let once = format_locations(vec![rec]);
        assert_eq!(
            once[0].location,
            Some(Location::Formatted("(-97.7, 30.1)".into()))
        );
        let twice = format_locations(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn location_strings_from_portal_are_kept_verbatim() {
        let mut rec = record("101".into());
        rec.location = Some(point(json!({
            "latitude": "30.26728",
            "longitude": "-97.74301",
            "human_address": "{\"address\": \"\"}"
        })));
        let formatted = format_locations(vec![rec]);
        assert_eq!(
            formatted[0].location,
            Some(Location::Formatted("(-97.74301, 30.26728)".into()))
        );
    }

    #[test]
    fn coordinate_text_is_not_trimmed() {
        let mut rec = record("101".into());
        rec.location = Some(point(json!({"latitude": " 30.1", "longitude": "-97.7 "})));
        let formatted = format_locations(vec![rec]);
        assert_eq!(
            formatted[0].location,
            Some(Location::Formatted("(-97.7 ,  30.1)".into()))
        );
    }

    #[test]
    fn incomplete_location_is_left_alone() {
        let mut empty = record("101".into());
        empty.location = Some(point(json!({})));
        let mut half = record("102".into());
        half.location = Some(point(json!({"latitude": 30.1, "longitude": null})));
        let absent = record("103".into());

        let formatted = format_locations(vec![empty.clone(), half.clone(), absent.clone()]);
        assert_eq!(formatted, vec![empty, half, absent]);
    }

    #[test]
    fn publish_passes_compose_in_order() {
        let mut asset = SignalAsset::new("101");
        asset.location = Some(point(json!({"latitude": "30.1", "longitude": "-97.7"})));
        asset.location_name = Some("Main & 5th".into());
        let now = Utc
            .with_ymd_and_hms(2024, 1, 15, 14, 40, 0)
            .unwrap()
            .with_timezone(&Central);

        let records = stringify_signal_ids(vec![record(SignalId::Numeric(101))]);
        let (records, stats) = normalize_for_publish(records, &[asset], Central, now).unwrap();

        assert_eq!(stats, MergeStats::default());
        assert_eq!(
            serde_json::to_value(&records[0]).unwrap(),
            json!({
                "signal_id": "101",
                "operation_state": 2,
                "plan_id": 4,
                "operation_state_datetime": "2024-01-15T08:30:00",
                "processed_datetime": "2024-01-15T08:40:00",
                "location": "(-97.7, 30.1)",
                "location_name": "Main & 5th",
                "primary_st": null,
                "cross_st": null,
            })
        );
    }
}
