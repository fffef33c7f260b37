//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "KITS SQL Server status reader."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Reads flagged intersection statuses from the KITS SQL Server database.

pub mod query;
pub mod row;

use std::time::Instant;

use async_trait::async_trait;
use sigstat_common::KitsConfig;
use sigstat_core::{SignalStatusRecord, SourceError, StatusSource};
use tiberius::{AuthMethod, Client, Config, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type KitsClient = Client<Compat<TcpStream>>;

/// [`StatusSource`] backed by a fresh KITS connection per fetch.
#[derive(Debug, Clone)]
pub struct KitsSource {
    settings: KitsConfig,
    flagged: Vec<i32>,
}

impl KitsSource {
    pub fn new(settings: KitsConfig, flagged: Vec<i32>) -> Self {
        Self { settings, flagged }
    }

    pub fn flagged_statuses(&self) -> &[i32] {
        &self.flagged
    }

    fn tds_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.settings.server);
        config.port(self.settings.port);
        config.database(&self.settings.database);
        config.authentication(AuthMethod::sql_server(
            &self.settings.user,
            &self.settings.password,
        ));
        if self.settings.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    /// Open a connection; TCP connect and login share the configured timeout.
    async fn connect(&self) -> Result<KitsClient, SourceError> {
        let config = self.tds_config();
        let login = async move {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|err| SourceError::Connection(Box::new(err)))?;
            tcp.set_nodelay(true)
                .map_err(|err| SourceError::Connection(Box::new(err)))?;
            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|err| SourceError::Connection(Box::new(err)))
        };

        match tokio::time::timeout(self.settings.connect_timeout, login).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Connection(
                format!(
                    "no response from {}:{} within {:?}",
                    self.settings.server, self.settings.port, self.settings.connect_timeout
                )
                .into(),
            )),
        }
    }
}

#[async_trait]
impl StatusSource for KitsSource {
    async fn fetch_flagged(&self) -> Result<Vec<SignalStatusRecord>, SourceError> {
        let started = Instant::now();
        let mut client = self.connect().await?;
        debug!(server = %self.settings.server, database = %self.settings.database, "connected to kits");

        let sql = query::status_query(self.flagged.len());
        let params: Vec<&dyn ToSql> = self.flagged.iter().map(|code| code as &dyn ToSql).collect();
        let rows = client
            .query(sql, &params)
            .await
            .map_err(|err| SourceError::Query(Box::new(err)))?
            .into_first_result()
            .await
            .map_err(|err| SourceError::Query(Box::new(err)))?;

        let records = rows
            .iter()
            .map(row::decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            rows = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "kits status query complete"
        );
        Ok(records)
    }
}
