//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Open data portal client for status and asset datasets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! SODA client for the published status and signal asset datasets.
//!
//! Reads go to `GET /resource/<id>.json` with `$limit` (and `$where` for
//! assets). The batched write is a `POST` of a JSON array to the status
//! resource, authenticated with the API key pair over basic auth. The app
//! token, when configured, rides along on every request as `X-App-Token`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use sigstat_common::SocrataConfig;
use sigstat_core::{
    DatasetError, PublishedDataset, PublishedStatus, SignalAsset, UpsertRow, UpsertSummary,
    SIGNAL_ID_FIELD,
};
use tracing::{debug, warn};

pub const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Filter selecting asset rows by identifier.
pub fn where_signal_ids(ids: &[String]) -> String {
    format!("{SIGNAL_ID_FIELD} in ({})", ids.join(","))
}

/// [`PublishedDataset`] over the portal's SODA endpoints.
#[derive(Debug, Clone)]
pub struct SocrataClient {
    http: Client,
    base_url: String,
    app_token: Option<String>,
    credentials: Option<(String, String)>,
    status_resource: String,
    assets_resource: String,
    row_limit: u32,
}

impl SocrataClient {
    pub fn from_config(config: &SocrataConfig) -> Result<Self, DatasetError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_owned();
        let http = build_http(config.request_timeout).map_err(|err| DatasetError::Transport {
            url: base_url.clone(),
            source: Box::new(err),
        })?;
        let app_token = Some(config.app_token.trim())
            .filter(|token| !token.is_empty())
            .map(str::to_owned);
        let credentials = config
            .credentials()
            .map(|(id, secret)| (id.to_owned(), secret.to_owned()));
        if credentials.is_none() {
            warn!("socrata api key not configured; upserts will be unauthenticated");
        }
        Ok(Self {
            http,
            base_url,
            app_token,
            credentials,
            status_resource: config.status_resource_id.clone(),
            assets_resource: config.assets_resource_id.clone(),
            row_limit: config.row_limit,
        })
    }

    pub fn resource_url(&self, resource_id: &str) -> String {
        format!("{}/resource/{}.json", self.base_url, resource_id)
    }

    fn with_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.app_token {
            Some(token) => request.header(APP_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn read_rows<T: DeserializeOwned>(
        &self,
        resource_id: &str,
        filter: Option<String>,
    ) -> Result<Vec<T>, DatasetError> {
        let url = self.resource_url(resource_id);
        let mut query = vec![("$limit", self.row_limit.to_string())];
        if let Some(filter) = filter {
            query.push(("$where", filter));
        }
        let request = self.with_token(self.http.get(&url).query(&query));
        exchange("GET", &url, request).await
    }
}

fn build_http(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Send `request`, failing on non-success status, and decode the JSON body.
async fn exchange<T: DeserializeOwned>(
    method: &'static str,
    url: &str,
    request: RequestBuilder,
) -> Result<T, DatasetError> {
    let transport = |err: reqwest::Error| DatasetError::Transport {
        url: url.to_owned(),
        source: Box::new(err),
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let body = response.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(DatasetError::Http {
            method,
            url: url.to_owned(),
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|err| DatasetError::Decode {
        url: url.to_owned(),
        source: Box::new(err),
    })
}

#[async_trait]
impl PublishedDataset for SocrataClient {
    async fn fetch_published_status(&self) -> Result<Vec<PublishedStatus>, DatasetError> {
        let rows: Vec<PublishedStatus> = self.read_rows(&self.status_resource, None).await?;
        debug!(resource = %self.status_resource, rows = rows.len(), "published status fetched");
        Ok(rows)
    }

    async fn fetch_assets(&self, signal_ids: &[String]) -> Result<Vec<SignalAsset>, DatasetError> {
        if signal_ids.is_empty() {
            debug!("no signals to look up; asset request skipped");
            return Ok(Vec::new());
        }
        let rows: Vec<SignalAsset> = self
            .read_rows(&self.assets_resource, Some(where_signal_ids(signal_ids)))
            .await?;
        debug!(resource = %self.assets_resource, rows = rows.len(), "signal assets fetched");
        Ok(rows)
    }

    async fn upsert_status(&self, payload: &[UpsertRow]) -> Result<UpsertSummary, DatasetError> {
        let url = self.resource_url(&self.status_resource);
        let mut request = self.with_token(self.http.post(&url).json(payload));
        if let Some((id, secret)) = &self.credentials {
            request = request.basic_auth(id, Some(secret));
        }
        exchange("POST", &url, request).await
    }
}
