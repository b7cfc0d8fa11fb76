//! Tabular persistence collaborator.
//!
//! - `PgStore`: the remote tables in Postgres
//! - `LocalMirror`: a JSON file holding the same tables
//! - `FallbackStore`: remote first, mirror when the remote is unreachable
//!
//! Every call reports which path served it through [`Persisted`].

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

pub mod fallback;
#[cfg(test)]
pub mod memory;
pub mod mirror;
pub mod postgres;

pub use fallback::FallbackStore;
pub use mirror::LocalMirror;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Classes,
    Students,
    Skills,
    Assessments,
    ClassDailyLogs,
    Notices,
    Users,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Classes,
        Table::Students,
        Table::Skills,
        Table::Assessments,
        Table::ClassDailyLogs,
        Table::Notices,
        Table::Users,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Classes => "classes",
            Table::Students => "students",
            Table::Skills => "skills",
            Table::Assessments => "assessments",
            Table::ClassDailyLogs => "class_daily_logs",
            Table::Notices => "notices",
            Table::Users => "users",
        }
    }

    /// Writable columns. Keys outside this list are dropped from writes.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Classes => &[
                "id",
                "name",
                "grade",
                "year",
                "shift",
                "teacher_ids",
                "is_remediation",
                "focus_skills",
                "status",
            ],
            Table::Students => &[
                "id",
                "name",
                "class_id",
                "avatar_url",
                "registration_number",
                "birth_date",
                "parent_name",
                "phone",
                "status",
                "remediation_entry_date",
                "remediation_exit_date",
            ],
            Table::Skills => &["id", "code", "description", "subject", "year"],
            Table::Assessments => &[
                "id",
                "student_id",
                "skill_id",
                "date",
                "status",
                "term",
                "notes",
                "participation_score",
                "behavior_score",
                "exam_score",
            ],
            Table::ClassDailyLogs => &["id", "class_id", "date", "content", "attendance"],
            Table::Notices => &["id", "title", "content", "date", "priority", "author"],
            Table::Users => &["id", "name", "email", "password_hash", "role"],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

impl std::str::FromStr for Table {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.name() == s)
            .ok_or_else(|| StoreError::UnknownTable(s.to_string()))
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A successful store call, tagged with the path that served it.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted<T> {
    Remote(T),
    LocalFallback(T),
}

impl<T> Persisted<T> {
    pub fn is_remote(&self) -> bool {
        matches!(self, Persisted::Remote(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Persisted::Remote(value) | Persisted::LocalFallback(value) => value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Persisted<U> {
        match self {
            Persisted::Remote(value) => Persisted::Remote(f(value)),
            Persisted::LocalFallback(value) => Persisted::LocalFallback(f(value)),
        }
    }

    pub fn served_by(&self) -> &'static str {
        match self {
            Persisted::Remote(_) => "remote",
            Persisted::LocalFallback(_) => "local-fallback",
        }
    }
}

/// Generic table access. Records are snake_case JSON objects carrying a
/// string `id`.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn get(&self, table: Table) -> StoreResult<Persisted<Vec<Value>>>;

    async fn post(&self, table: Table, record: Value) -> StoreResult<Persisted<()>>;

    /// Merge `patch` into the record with `id`. Keys absent from the patch
    /// are left untouched; explicit nulls clear the column.
    async fn put(&self, table: Table, id: &str, patch: Value) -> StoreResult<Persisted<()>>;

    async fn delete(&self, table: Table, id: &str) -> StoreResult<Persisted<()>>;

    /// Returns the user row (without its password hash) on a match.
    async fn login(&self, email: &str, password: &str) -> StoreResult<Persisted<Option<Value>>>;

    async fn check_connection(&self) -> bool;

    /// Persists any buffered local state.
    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keeps only known columns of `table` from a JSON object.
pub(crate) fn writable_fields(table: Table, record: &Value) -> serde_json::Map<String, Value> {
    match record {
        Value::Object(fields) => fields
            .iter()
            .filter(|(key, _)| table.has_column(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => serde_json::Map::new(),
    }
}

pub(crate) fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

pub(crate) fn strip_secret(mut user: Value) -> Value {
    if let Value::Object(fields) = &mut user {
        fields.remove("password_hash");
    }
    user
}
