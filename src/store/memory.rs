//! In-memory `TableStore` for tests, with switches to simulate an
//! unreachable backend or refused writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{hash_password, record_id, strip_secret, writable_fields, Persisted, Table, TableStore};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<Table, Vec<Value>>>,
    offline: AtomicBool,
    failing_reads: AtomicBool,
    refusals: Mutex<Vec<(Table, String, Value)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every `get` fail while writes keep working.
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Refuse posts and puts on `table` whose record has `field == value`.
    pub fn fail_writes_where(&self, table: Table, field: &str, value: impl Into<Value>) {
        self.refusals
            .lock()
            .unwrap()
            .push((table, field.to_string(), value.into()));
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    fn reachable(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_refusal(&self, table: Table, record: &Value) -> StoreResult<()> {
        let refusals = self.refusals.lock().unwrap();
        let refused = refusals
            .iter()
            .any(|(t, field, value)| *t == table && record.get(field) == Some(value));
        if refused {
            return Err(StoreError::Rejected(format!("{} write refused", table.name())));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn get(&self, table: Table) -> StoreResult<Persisted<Vec<Value>>> {
        self.reachable()?;
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read timed out".to_string()));
        }
        Ok(Persisted::Remote(self.rows(table)))
    }

    async fn post(&self, table: Table, record: Value) -> StoreResult<Persisted<()>> {
        self.reachable()?;
        self.check_refusal(table, &record)?;
        let row = Value::Object(writable_fields(table, &record));
        let mut tables = self.tables.lock().unwrap();
        tables.entry(table).or_default().push(row);
        Ok(Persisted::Remote(()))
    }

    async fn put(&self, table: Table, id: &str, patch: Value) -> StoreResult<Persisted<()>> {
        self.reachable()?;
        self.check_refusal(table, &patch)?;
        let mut fields = writable_fields(table, &patch);
        fields.remove("id");
        let mut tables = self.tables.lock().unwrap();
        let row = tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|row| record_id(row) == Some(id)))
            .ok_or_else(|| StoreError::NotFound {
                table: table.name(),
                id: id.to_string(),
            })?;
        if let Value::Object(existing) = row {
            existing.extend(fields);
        }
        Ok(Persisted::Remote(()))
    }

    async fn delete(&self, table: Table, id: &str) -> StoreResult<Persisted<()>> {
        self.reachable()?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(&table) {
            rows.retain(|row| record_id(row) != Some(id));
        }
        Ok(Persisted::Remote(()))
    }

    async fn login(&self, email: &str, password: &str) -> StoreResult<Persisted<Option<Value>>> {
        self.reachable()?;
        let hash = hash_password(password);
        let user = self.rows(Table::Users).into_iter().find(|user| {
            user.get("email").and_then(Value::as_str) == Some(email)
                && user.get("password_hash").and_then(Value::as_str) == Some(hash.as_str())
        });
        Ok(Persisted::Remote(user.map(strip_secret)))
    }

    async fn check_connection(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}
