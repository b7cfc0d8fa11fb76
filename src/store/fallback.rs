use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{LocalMirror, Persisted, PgStore, Table, TableStore};
use crate::error::{StoreError, StoreResult};

/// Serves each call from the remote and falls back to the local mirror
/// when the remote cannot be reached. Refusals from a reachable remote are
/// returned as-is. Remote reads refresh the mirror in memory; `flush`
/// writes it out.
pub struct FallbackStore<R = PgStore> {
    remote: Option<R>,
    mirror: LocalMirror,
}

impl<R: TableStore> FallbackStore<R> {
    pub fn new(remote: Option<R>, mirror: LocalMirror) -> Self {
        Self { remote, mirror }
    }

    #[cfg(test)]
    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    fn fall_back(&self, op: &'static str, table: Option<Table>, err: &StoreError) {
        warn!(
            event = "store.fallback",
            op,
            table = table.map(|t| t.name()).unwrap_or("-"),
            error = %err,
        );
    }
}

#[async_trait]
impl<R: TableStore> TableStore for FallbackStore<R> {
    async fn get(&self, table: Table) -> StoreResult<Persisted<Vec<Value>>> {
        if let Some(remote) = &self.remote {
            match remote.get(table).await {
                Ok(rows) => {
                    let rows = rows.into_inner();
                    if let Err(err) = self.mirror.replace_table(table, &rows) {
                        warn!(event = "mirror.sync_failed", table = table.name(), error = %err);
                    }
                    return Ok(Persisted::Remote(rows));
                }
                Err(err) if err.is_connectivity() => self.fall_back("get", Some(table), &err),
                Err(err) => return Err(err),
            }
        }
        self.mirror.get(table).await
    }

    async fn post(&self, table: Table, record: Value) -> StoreResult<Persisted<()>> {
        if let Some(remote) = &self.remote {
            match remote.post(table, record.clone()).await {
                Ok(served) => return Ok(served),
                Err(err) if err.is_connectivity() => self.fall_back("post", Some(table), &err),
                Err(err) => return Err(err),
            }
        }
        self.mirror.post(table, record).await
    }

    async fn put(&self, table: Table, id: &str, patch: Value) -> StoreResult<Persisted<()>> {
        if let Some(remote) = &self.remote {
            match remote.put(table, id, patch.clone()).await {
                Ok(served) => return Ok(served),
                Err(err) if err.is_connectivity() => self.fall_back("put", Some(table), &err),
                Err(err) => return Err(err),
            }
        }
        self.mirror.put(table, id, patch).await
    }

    async fn delete(&self, table: Table, id: &str) -> StoreResult<Persisted<()>> {
        if let Some(remote) = &self.remote {
            match remote.delete(table, id).await {
                Ok(served) => return Ok(served),
                Err(err) if err.is_connectivity() => self.fall_back("delete", Some(table), &err),
                Err(err) => return Err(err),
            }
        }
        self.mirror.delete(table, id).await
    }

    async fn login(&self, email: &str, password: &str) -> StoreResult<Persisted<Option<Value>>> {
        if let Some(remote) = &self.remote {
            match remote.login(email, password).await {
                Ok(served) => return Ok(served),
                Err(err) if err.is_connectivity() => self.fall_back("login", None, &err),
                Err(err) => return Err(err),
            }
        }
        self.mirror.login(email, password).await
    }

    async fn check_connection(&self) -> bool {
        match &self.remote {
            Some(remote) => remote.check_connection().await,
            None => false,
        }
    }

    async fn flush(&self) -> StoreResult<()> {
        self.mirror.flush().await
    }
}
