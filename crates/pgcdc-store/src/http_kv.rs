//! Remote key-value cursor store, talking to an external HTTP key-value
//! service over a `GET`/`PUT` pair. Keys are prefixed `pgx:replication:` so
//! a shared KV namespace doesn't collide with unrelated keys.

use pgcdc_core::{CdcResult, CursorError, Lsn};
use tracing::debug;

use crate::CursorStore;

const KEY_PREFIX: &str = "pgx:replication:";

/// Cursor store backed by a remote key-value HTTP service.
///
/// Expects `GET {base_url}/{key}` to return the raw decimal LSN (404 when
/// absent) and `PUT {base_url}/{key}` with the decimal LSN as the body to
/// set it.
pub struct HttpKvCursorStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpKvCursorStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self, slot_name: &str) -> String {
        format!("{KEY_PREFIX}{slot_name}")
    }

    fn url_for(&self, slot_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.key(slot_name))
    }
}

impl CursorStore for HttpKvCursorStore {
    async fn get(&self, slot_name: &str) -> CdcResult<Option<Lsn>> {
        let resp = self
            .client
            .get(self.url_for(slot_name))
            .send()
            .await
            .map_err(|e| CursorError::Read(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let resp = resp
            .error_for_status()
            .map_err(|e| CursorError::Read(e.to_string()))?;

        let body = resp
            .text()
            .await
            .map_err(|e| CursorError::Read(e.to_string()))?;

        let lsn = body
            .trim()
            .parse::<Lsn>()
            .map_err(|e| CursorError::Read(format!("parsing {body:?}: {e}")))?;

        Ok(Some(lsn))
    }

    async fn set(&self, slot_name: &str, lsn: Lsn) -> CdcResult<()> {
        self.client
            .put(self.url_for(slot_name))
            .body(lsn.to_string())
            .send()
            .await
            .map_err(|e| CursorError::Write(e.to_string()))?
            .error_for_status()
            .map_err(|e| CursorError::Write(e.to_string()))?;

        debug!(slot_name, lsn, "persisted cursor via remote kv store");
        Ok(())
    }

    async fn close(&self) -> CdcResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_prefixed() {
        let store = HttpKvCursorStore::new("http://localhost:8080");
        assert_eq!(store.key("my_slot"), "pgx:replication:my_slot");
    }

    #[test]
    fn url_joins_base_and_key() {
        let store = HttpKvCursorStore::new("http://localhost:8080/");
        assert_eq!(
            store.url_for("my_slot"),
            "http://localhost:8080/pgx:replication:my_slot"
        );
    }
}
