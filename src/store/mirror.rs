use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    hash_password, record_id, strip_secret, writable_fields, Persisted, Table, TableStore,
};
use crate::error::{StoreError, StoreResult};

type Tables = BTreeMap<String, Vec<Value>>;

/// Every table kept in one JSON document on disk. Calls are always reported
/// as [`Persisted::LocalFallback`].
///
/// Writes through the trait reach the file before returning. Tables synced
/// from the remote only reach it on [`TableStore::flush`].
#[derive(Debug)]
pub struct LocalMirror {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
    dirty: AtomicBool,
}

impl LocalMirror {
    /// Opens the mirror at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let tables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Tables>(&bytes).unwrap_or_else(|err| {
                warn!(event = "mirror.unreadable", path = %path.display(), error = %err);
                Tables::new()
            }),
            Err(_) => Tables::new(),
        };
        Self {
            path: Some(path),
            tables: Mutex::new(tables),
            dirty: AtomicBool::new(false),
        }
    }

    /// Mirror that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Overwrites one table in memory with rows freshly read from the
    /// remote. Local rows the remote does not hold are dropped.
    pub fn replace_table(&self, table: Table, rows: &[Value]) -> StoreResult<()> {
        self.mutate(|tables| {
            let previous = tables.insert(table.name().to_string(), rows.to_vec());
            let discarded = previous
                .unwrap_or_default()
                .iter()
                .filter(|row| !rows.contains(row))
                .count();
            if discarded > 0 {
                warn!(
                    event = "mirror.discarded_offline_rows",
                    table = table.name(),
                    discarded,
                );
            }
            Ok(())
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> StoreResult<T> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Mirror("mirror lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Mirror("mirror lock poisoned".to_string()))?;
        let value = f(&mut tables)?;
        self.dirty.store(true, Ordering::Release);
        Ok(value)
    }

    async fn write<T>(&self, f: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let value = self.mutate(f)?;
        self.persist().await?;
        Ok(value)
    }

    /// Writes the file if anything changed since the last write. The lock is
    /// released before touching the disk.
    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let bytes = self.read(|tables| serde_json::to_vec_pretty(tables))??;
        if let Err(err) = tokio::fs::write(path, bytes).await {
            self.dirty.store(true, Ordering::Release);
            return Err(err.into());
        }
        debug!(event = "mirror.persisted", path = %path.display());
        Ok(())
    }
}

#[async_trait]
impl TableStore for LocalMirror {
    async fn get(&self, table: Table) -> StoreResult<Persisted<Vec<Value>>> {
        let rows = self.read(|tables| {
            tables
                .get(table.name())
                .cloned()
                .unwrap_or_default()
        })?;
        Ok(Persisted::LocalFallback(rows))
    }

    async fn post(&self, table: Table, record: Value) -> StoreResult<Persisted<()>> {
        let fields = writable_fields(table, &record);
        self.write(|tables| {
            let rows = tables.entry(table.name().to_string()).or_default();
            let row = Value::Object(fields);
            match record_id(&row).map(str::to_string) {
                Some(id) => {
                    rows.retain(|existing| record_id(existing) != Some(id.as_str()));
                    rows.push(row);
                    Ok(())
                }
                None => Err(StoreError::Rejected(format!(
                    "{} record without an id",
                    table.name()
                ))),
            }
        })
        .await?;
        Ok(Persisted::LocalFallback(()))
    }

    async fn put(&self, table: Table, id: &str, patch: Value) -> StoreResult<Persisted<()>> {
        let mut fields = writable_fields(table, &patch);
        fields.remove("id");
        self.write(|tables| {
            let row = tables
                .get_mut(table.name())
                .and_then(|rows| rows.iter_mut().find(|row| record_id(row) == Some(id)))
                .ok_or_else(|| StoreError::NotFound {
                    table: table.name(),
                    id: id.to_string(),
                })?;
            if let Value::Object(existing) = row {
                existing.extend(fields);
            }
            Ok(())
        })
        .await?;
        Ok(Persisted::LocalFallback(()))
    }

    async fn delete(&self, table: Table, id: &str) -> StoreResult<Persisted<()>> {
        self.write(|tables| {
            if let Some(rows) = tables.get_mut(table.name()) {
                rows.retain(|row| record_id(row) != Some(id));
            }
            Ok(())
        })
        .await?;
        Ok(Persisted::LocalFallback(()))
    }

    async fn login(&self, email: &str, password: &str) -> StoreResult<Persisted<Option<Value>>> {
        let hash = hash_password(password);
        let email = email.trim().to_lowercase();
        let user = self.read(|tables| {
            tables
                .get(Table::Users.name())
                .and_then(|users| {
                    users.iter().find(|user| {
                        user.get("email").and_then(Value::as_str).map(str::to_lowercase)
                            == Some(email.clone())
                            && user.get("password_hash").and_then(Value::as_str)
                                == Some(hash.as_str())
                    })
                })
                .cloned()
                .map(strip_secret)
        })?;
        Ok(Persisted::LocalFallback(user))
    }

    async fn check_connection(&self) -> bool {
        false
    }

    async fn flush(&self) -> StoreResult<()> {
        self.persist().await
    }
}
