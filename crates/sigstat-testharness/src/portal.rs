//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Test harness collaborators and shared exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sigstat_core::SIGNAL_ID_FIELD;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One request received by the mock portal.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub app_token: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

struct PortalState {
    status_file: String,
    assets_file: String,
    published: Mutex<Vec<Value>>,
    assets: Vec<Value>,
    write_failure: Option<StatusCode>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Builder for an in-process SODA endpoint serving one status and one asset dataset.
#[derive(Debug, Clone)]
pub struct MockPortalBuilder {
    status_id: String,
    assets_id: String,
    published: Vec<Value>,
    assets: Vec<Value>,
    write_failure: Option<StatusCode>,
}

impl MockPortalBuilder {
    pub fn new(status_id: impl Into<String>, assets_id: impl Into<String>) -> Self {
        Self {
            status_id: status_id.into(),
            assets_id: assets_id.into(),
            published: Vec::new(),
            assets: Vec::new(),
            write_failure: None,
        }
    }

    /// Rows initially present in the status dataset.
    pub fn with_published(mut self, rows: impl IntoIterator<Item = Value>) -> Self {
        self.published.extend(rows);
        self
    }

    /// Rows of the asset dataset.
    pub fn with_assets(mut self, rows: impl IntoIterator<Item = Value>) -> Self {
        self.assets.extend(rows);
        self
    }

    /// Answer every upsert with `status` instead of applying it.
    pub fn failing_writes(mut self, status: StatusCode) -> Self {
        self.write_failure = Some(status);
        self
    }

    /// Bind to an ephemeral loopback port and start serving.
    pub async fn spawn(self) -> anyhow::Result<MockPortal> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let address = listener.local_addr()?;
        info!(address = %address, "mock portal listening");

        let state = Arc::new(PortalState {
            status_file: format!("{}.json", self.status_id),
            assets_file: format!("{}.json", self.assets_id),
            published: Mutex::new(self.published),
            assets: self.assets,
            write_failure: self.write_failure,
            requests: Mutex::new(Vec::new()),
        });
        let router = Router::new()
            .route("/resource/:file", get(read_resource).post(write_resource))
            .with_state(Arc::clone(&state));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "mock portal exited with error");
            }
        });

        Ok(MockPortal {
            address,
            state,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Running mock portal.
pub struct MockPortal {
    address: SocketAddr,
    state: Arc<PortalState>,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MockPortal {
    /// Base URL to hand to the portal client.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Current contents of the status dataset.
    pub fn published(&self) -> Vec<Value> {
        self.state.published.lock().clone()
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn read_resource(
    State(state): State<Arc<PortalState>>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state
        .requests
        .lock()
        .push(record("GET", &file, &query, &headers, None));

    let limit = query
        .get("$limit")
        .and_then(|limit| limit.parse::<usize>().ok())
        .unwrap_or(1_000);

    let rows: Vec<Value> = if file == state.status_file {
        state.published.lock().clone()
    } else if file == state.assets_file {
        match query.get("$where").map(|clause| requested_ids(clause)) {
            Some(Some(ids)) => state
                .assets
                .iter()
                .filter(|row| row_key(row).is_some_and(|key| ids.contains(&key)))
                .cloned()
                .collect(),
            Some(None) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"message": "unsupported $where clause"})),
                )
                    .into_response()
            }
            None => state.assets.clone(),
        }
    } else {
        return StatusCode::NOT_FOUND.into_response();
    };

    Json(rows.into_iter().take(limit).collect::<Vec<_>>()).into_response()
}

async fn write_resource(
    State(state): State<Arc<PortalState>>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let parsed = serde_json::from_str::<Value>(&body).ok();
    state
        .requests
        .lock()
        .push(record("POST", &file, &query, &headers, parsed.clone()));

    if file != state.status_file {
        return StatusCode::NOT_FOUND.into_response();
    }
    if let Some(status) = state.write_failure {
        return (status, Json(json!({"message": "write rejected"}))).into_response();
    }
    let Some(Value::Array(rows)) = parsed else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "payload must be a JSON array"})),
        )
            .into_response();
    };

    let mut published = state.published.lock();
    let (mut created, mut updated, mut deleted, mut errors) = (0u64, 0u64, 0u64, 0u64);
    for row in rows {
        let Some(key) = row_key(&row) else {
            errors += 1;
            continue;
        };
        let position = published
            .iter()
            .position(|existing| row_key(existing).as_deref() == Some(key.as_str()));
        let is_delete = row.get(":deleted").and_then(Value::as_bool) == Some(true);
        match (is_delete, position) {
            (true, Some(index)) => {
                published.remove(index);
                deleted += 1;
            }
            (true, None) => debug!(signal_id = %key, "delete for absent row ignored"),
            (false, Some(index)) => {
                merge_row(&mut published[index], row);
                updated += 1;
            }
            (false, None) => {
                published.push(row);
                created += 1;
            }
        }
    }

    Json(json!({
        "Errors": errors,
        "Rows Deleted": deleted,
        "Rows Updated": updated,
        "Rows Created": created,
        "By SID": 0,
        "By RowIdentifier": created + updated + deleted,
    }))
    .into_response()
}

fn record(
    method: &str,
    file: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Option<Value>,
) -> RecordedRequest {
    let header_text = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    RecordedRequest {
        method: method.to_owned(),
        path: format!("/resource/{file}"),
        query: query.clone(),
        app_token: header_text("x-app-token"),
        authorization: header_text(header::AUTHORIZATION.as_str()),
        body,
    }
}

/// Upserts replace only the columns they name; explicit nulls clear a column.
fn merge_row(existing: &mut Value, row: Value) {
    match (existing, row) {
        (Value::Object(current), Value::Object(fields)) => current.extend(fields),
        (existing, row) => *existing = row,
    }
}

fn row_key(row: &Value) -> Option<String> {
    match row.get(SIGNAL_ID_FIELD)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Identifiers named by a `signal_id in (...)` clause.
fn requested_ids(clause: &str) -> Option<Vec<String>> {
    let inner = clause
        .trim()
        .strip_prefix(SIGNAL_ID_FIELD)?
        .trim_start()
        .strip_prefix("in (")?
        .strip_suffix(')')?;
    Some(
        inner
            .split(',')
            .map(|id| id.trim().trim_matches('\'').to_owned())
            .filter(|id| !id.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_clause_lists_ids() {
        assert_eq!(
            requested_ids("signal_id in (101,102)"),
            Some(vec!["101".to_owned(), "102".to_owned()])
        );
        assert_eq!(requested_ids("signal_id in ('7')"), Some(vec!["7".to_owned()]));
        assert_eq!(requested_ids("location_name = 'x'"), None);
    }

    #[test]
    fn row_key_accepts_text_or_number() {
        assert_eq!(row_key(&json!({"signal_id": 12})).as_deref(), Some("12"));
        assert_eq!(row_key(&json!({"signal_id": "12"})).as_deref(), Some("12"));
        assert_eq!(row_key(&json!({"name": "x"})), None);
    }

    #[test]
    fn upsert_keeps_unnamed_columns_and_applies_nulls() {
        let mut existing = json!({"signal_id": "7", "cross_st": "OLD", "plan_id": 1});
        merge_row(&mut existing, json!({"signal_id": "7", "cross_st": null}));
        assert_eq!(existing, json!({"signal_id": "7", "cross_st": null, "plan_id": 1}));
    }
}
