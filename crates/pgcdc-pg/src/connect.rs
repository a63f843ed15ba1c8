//! Shared Postgres connection setup, with TLS support.

use std::str::FromStr;
use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres::config::ReplicationMode;
use tokio_postgres::{Client, Config};
use tokio_postgres_rustls_improved::MakeRustlsConnect;

use pgcdc_core::{CdcResult, TransportError};

/// Connect to Postgres with TLS chosen by `sslmode` in the connection
/// string, opening the connection in logical-replication mode. Spawns the
/// connection driver future and returns only the client.
pub async fn connect_replication(connection_string: &str) -> CdcResult<Client> {
    let mut config = Config::from_str(connection_string)
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    config.replication_mode(ReplicationMode::Logical);
    connect(connection_string, config).await
}

/// Connect to Postgres for ordinary control-plane DDL (no replication mode).
pub async fn connect_control(connection_string: &str) -> CdcResult<Client> {
    let config = Config::from_str(connection_string)
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    connect(connection_string, config).await
}

async fn connect(connection_string: &str, config: Config) -> CdcResult<Client> {
    if requires_tls(connection_string) {
        let tls_config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Connection(format!("TLS config error: {e}")))?
        .with_root_certificates(root_certs())
        .with_no_client_auth();

        let connector = MakeRustlsConnect::new(tls_config);
        let (client, connection) = config
            .connect(connector)
            .await
            .map_err(TransportError::from)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        Ok(client)
    } else {
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(TransportError::from)?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        Ok(client)
    }
}

fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn requires_tls(connection_string: &str) -> bool {
    connection_string.contains("sslmode=require")
        || connection_string.contains("sslmode=verify-ca")
        || connection_string.contains("sslmode=verify-full")
}
