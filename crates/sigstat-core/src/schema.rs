//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reconciliation pipeline between KITS and the open data portal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Published signal status schema.
//!
//! Every column name of the status and asset datasets is spelled once, in the
//! serde attributes and serializers below. Fields that change representation during
//! normalisation are modelled as enums holding either the raw source form or
//! the published form, so a pass can be re-applied to its own output.

use std::borrow::Cow;
use std::fmt;

use chrono::NaiveDateTime;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Column shared by every dataset the pipeline touches.
pub const SIGNAL_ID_FIELD: &str = "signal_id";

/// Timestamp layout accepted by the portal: no offset, second precision.
pub const PUBLISHED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Signal identifier as read from the database or returned by the portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalId {
    Text(String),
    Numeric(i64),
}

impl SignalId {
    /// Canonical string form used for every comparison.
    pub fn key(&self) -> Cow<'_, str> {
        match self {
            SignalId::Text(text) => Cow::Borrowed(text.as_str()),
            SignalId::Numeric(value) => Cow::Owned(value.to_string()),
        }
    }

    pub fn into_text(self) -> Self {
        match self {
            SignalId::Text(_) => self,
            SignalId::Numeric(value) => SignalId::Text(value.to_string()),
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&str> for SignalId {
    fn from(value: &str) -> Self {
        SignalId::Text(value.to_owned())
    }
}

impl From<i64> for SignalId {
    fn from(value: i64) -> Self {
        SignalId::Numeric(value)
    }
}

/// Status code or plan number; KITS may deliver either as a decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Integer(i64),
    Numeric(f64),
}

impl StatusValue {
    /// Integer value truncated toward zero; `None` for NaN or infinities.
    pub fn to_integer(self) -> Option<i64> {
        match self {
            StatusValue::Integer(value) => Some(value),
            StatusValue::Numeric(value) if value.is_finite() => Some(value.trunc() as i64),
            StatusValue::Numeric(_) => None,
        }
    }
}

/// Status change timestamp before and after localisation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventTime {
    Naive(NaiveDateTime),
    Published(String),
}

/// Asset location: the portal's point object, or the `"(lon, lat)"` string
/// the status dataset expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Formatted(String),
    Structured(Map<String, Value>),
}

/// Descriptive asset metadata for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAsset {
    pub signal_id: SignalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_st: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_st: Option<String>,
}

impl SignalAsset {
    pub fn new(signal_id: impl Into<SignalId>) -> Self {
        Self {
            signal_id: signal_id.into(),
            location: None,
            location_name: None,
            primary_st: None,
            cross_st: None,
        }
    }
}

/// A row currently published in the status dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedStatus {
    pub signal_id: SignalId,
    #[serde(flatten)]
    pub columns: Map<String, Value>,
}

impl PublishedStatus {
    pub fn new(signal_id: impl Into<SignalId>) -> Self {
        Self {
            signal_id: signal_id.into(),
            columns: Map::new(),
        }
    }
}

/// One flagged signal on its way from KITS to the portal.
///
/// Once an asset row has been merged the four descriptive columns are always
/// serialised, as `null` when the asset lacks them, so the upsert clears
/// values the asset registry no longer carries. Records without an asset row
/// omit them and leave the published columns untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalStatusRecord {
    pub signal_id: SignalId,
    pub operation_state: StatusValue,
    pub plan_id: StatusValue,
    pub operation_state_datetime: EventTime,
    pub processed_datetime: Option<String>,
    pub location: Option<Location>,
    pub location_name: Option<String>,
    pub primary_st: Option<String>,
    pub cross_st: Option<String>,
    /// Set by [`SignalStatusRecord::apply_asset`].
    pub asset_merged: bool,
}

impl SignalStatusRecord {
    /// Record as read from the source, before any normalisation pass.
    pub fn from_source(
        signal_id: impl Into<SignalId>,
        operation_state: StatusValue,
        plan_id: StatusValue,
        operation_state_datetime: NaiveDateTime,
    ) -> Self {
        Self {
            signal_id: signal_id.into(),
            operation_state,
            plan_id,
            operation_state_datetime: EventTime::Naive(operation_state_datetime),
            processed_datetime: None,
            location: None,
            location_name: None,
            primary_st: None,
            cross_st: None,
            asset_merged: false,
        }
    }

    /// Copy the descriptive asset columns onto this record.
    pub fn apply_asset(&mut self, asset: &SignalAsset) {
        self.location = asset.location.clone();
        self.location_name = asset.location_name.clone();
        self.primary_st = asset.primary_st.clone();
        self.cross_st = asset.cross_st.clone();
        self.asset_merged = true;
    }
}

impl Serialize for SignalStatusRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn descriptive<M: SerializeMap, T: Serialize>(
            map: &mut M,
            merged: bool,
            key: &str,
            value: &Option<T>,
        ) -> Result<(), M::Error> {
            if merged || value.is_some() {
                map.serialize_entry(key, value)?;
            }
            Ok(())
        }

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(SIGNAL_ID_FIELD, &self.signal_id)?;
        map.serialize_entry("operation_state", &self.operation_state)?;
        map.serialize_entry("plan_id", &self.plan_id)?;
        map.serialize_entry("operation_state_datetime", &self.operation_state_datetime)?;
        if let Some(processed) = &self.processed_datetime {
            map.serialize_entry("processed_datetime", processed)?;
        }
        descriptive(&mut map, self.asset_merged, "location", &self.location)?;
        descriptive(&mut map, self.asset_merged, "location_name", &self.location_name)?;
        descriptive(&mut map, self.asset_merged, "primary_st", &self.primary_st)?;
        descriptive(&mut map, self.asset_merged, "cross_st", &self.cross_st)?;
        map.end()
    }
}

/// Tombstone removing a published row by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionMarker {
    pub signal_id: String,
    #[serde(rename = ":deleted")]
    pub deleted: bool,
}

impl DeletionMarker {
    pub fn new(signal_id: impl Into<String>) -> Self {
        Self {
            signal_id: signal_id.into(),
            deleted: true,
        }
    }
}

/// Entry of the batched write payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpsertRow {
    Upsert(SignalStatusRecord),
    Delete(DeletionMarker),
}

impl UpsertRow {
    pub fn signal_id(&self) -> Cow<'_, str> {
        match self {
            UpsertRow::Upsert(record) => record.signal_id.key(),
            UpsertRow::Delete(marker) => Cow::Borrowed(marker.signal_id.as_str()),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, UpsertRow::Delete(_))
    }
}

/// Counters reported by the portal after an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    #[serde(rename = "Rows Created", default)]
    pub rows_created: u64,
    #[serde(rename = "Rows Updated", default)]
    pub rows_updated: u64,
    #[serde(rename = "Rows Deleted", default)]
    pub rows_deleted: u64,
    #[serde(rename = "Errors", default)]
    pub errors: u64,
}
