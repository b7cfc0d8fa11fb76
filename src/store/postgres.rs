use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;

use super::{hash_password, strip_secret, writable_fields, Persisted, Table, TableStore};
use crate::error::{StoreError, StoreResult};

/// Remote tables under the `school` schema. Rows travel as JSON so one set
/// of statements serves every table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Builds a lazy pool; connectivity problems surface on first use.
    pub fn connect_lazy(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TableStore for PgStore {
    async fn get(&self, table: Table) -> StoreResult<Persisted<Vec<Value>>> {
        let sql = format!(
            "SELECT COALESCE(json_agg(t), '[]'::json) FROM school.{} t",
            table.name()
        );
        let rows: Value = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        let rows = match rows {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        Ok(Persisted::Remote(rows))
    }

    async fn post(&self, table: Table, record: Value) -> StoreResult<Persisted<()>> {
        let fields = writable_fields(table, &record);
        let sql = format!(
            "INSERT INTO school.{0} SELECT * FROM jsonb_populate_record(NULL::school.{0}, $1)",
            table.name()
        );
        sqlx::query(&sql)
            .bind(Json(Value::Object(fields)))
            .execute(&self.pool)
            .await?;
        Ok(Persisted::Remote(()))
    }

    async fn put(&self, table: Table, id: &str, patch: Value) -> StoreResult<Persisted<()>> {
        let mut fields = writable_fields(table, &patch);
        fields.remove("id");
        if fields.is_empty() {
            return Ok(Persisted::Remote(()));
        }

        let columns = fields.keys().cloned().collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE school.{0} AS t SET ({1}) = \
             (SELECT {1} FROM jsonb_populate_record(NULL::school.{0}, $1)) \
             WHERE t.id = $2",
            table.name(),
            columns
        );
        let result = sqlx::query(&sql)
            .bind(Json(Value::Object(fields)))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                table: table.name(),
                id: id.to_string(),
            });
        }
        Ok(Persisted::Remote(()))
    }

    async fn delete(&self, table: Table, id: &str) -> StoreResult<Persisted<()>> {
        let sql = format!("DELETE FROM school.{} WHERE id = $1", table.name());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(Persisted::Remote(()))
    }

    async fn login(&self, email: &str, password: &str) -> StoreResult<Persisted<Option<Value>>> {
        let user: Option<Value> = sqlx::query_scalar(
            "SELECT row_to_json(u) FROM school.users u \
             WHERE lower(u.email) = lower($1) AND u.password_hash = $2",
        )
        .bind(email.trim())
        .bind(hash_password(password))
        .fetch_optional(&self.pool)
        .await?;
        Ok(Persisted::Remote(user.map(strip_secret)))
    }

    async fn check_connection(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
