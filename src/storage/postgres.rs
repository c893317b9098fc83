//! # PostgreSQL Item Store
//!
//! [`ItemStore`] over a single PostgreSQL table. Sort columns use the `C`
//! collation so range scans order keys bytewise, matching the in-memory store.

use super::{
    AttributeCondition, CounterMarker, IndexName, ItemKey, ItemStore, QueryCursor, QueryPage, QueryRequest,
    StorageItem, WriteRequest,
};
use crate::config::DatabaseConfig;
use crate::error::{CommanderError, CommanderResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PgItemStore {
    pool: PgPool,
    table: String,
}

impl PgItemStore {
    /// Wrap an existing pool; `table` must be a plain SQL identifier
    pub fn new(pool: PgPool, table: impl Into<String>) -> CommanderResult<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        Ok(Self { pool, table })
    }

    /// Connect a new pool from configuration
    pub async fn connect(config: &DatabaseConfig, table: &str) -> CommanderResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        let store = Self::new(pool, table)?;
        if config.run_migrations {
            store.ensure_schema().await?;
        }
        info!(table = %store.table, "✅ Connected PostgreSQL item store");
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the item table and its two secondary indexes when missing
    pub async fn ensure_schema(&self) -> CommanderResult<()> {
        let t = &self.table;
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS {t} (
                    pk TEXT COLLATE "C" NOT NULL,
                    sk TEXT COLLATE "C" NOT NULL,
                    si1_sort TEXT COLLATE "C",
                    si2_hash TEXT COLLATE "C",
                    si2_sort TEXT COLLATE "C",
                    attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    PRIMARY KEY (pk, sk)
                )"#
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {t}_si1 ON {t} (sk, si1_sort, pk) WHERE si1_sort IS NOT NULL"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {t}_si2 ON {t} (si2_hash, si2_sort, pk, sk) WHERE si2_hash IS NOT NULL"
            ),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        debug!(table = %t, "Item table schema ensured");
        Ok(())
    }

    fn columns() -> &'static str {
        "pk, sk, si1_sort, si2_hash, si2_sort, attributes"
    }

    async fn write_one(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &WriteRequest,
    ) -> Result<(), sqlx::Error> {
        match request {
            WriteRequest::Put(item) => {
                sqlx::query(&self.upsert_sql())
                    .bind(&item.pk)
                    .bind(&item.sk)
                    .bind(&item.si1_sort)
                    .bind(&item.si2_hash)
                    .bind(&item.si2_sort)
                    .bind(Value::Object(item.attributes.clone()))
                    .execute(&mut **tx)
                    .await?;
            }
            WriteRequest::Delete(key) => {
                sqlx::query(&format!("DELETE FROM {} WHERE pk = $1 AND sk = $2", self.table))
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (pk, sk) DO UPDATE SET si1_sort = EXCLUDED.si1_sort, \
             si2_hash = EXCLUDED.si2_hash, si2_sort = EXCLUDED.si2_sort, \
             attributes = EXCLUDED.attributes",
            self.table,
            Self::columns()
        )
    }
}

fn validate_identifier(name: &str) -> CommanderResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(CommanderError::Configuration(format!(
            "Invalid table name '{name}': must be a plain SQL identifier"
        )))
    }
}

fn index_columns(index: IndexName) -> (&'static str, &'static str) {
    match index {
        IndexName::Primary => ("pk", "sk"),
        IndexName::Si1 => ("sk", "si1_sort"),
        IndexName::Si2 => ("si2_hash", "si2_sort"),
    }
}

fn row_to_item(row: &PgRow) -> CommanderResult<StorageItem> {
    let attributes: Value = row.try_get("attributes")?;
    let attributes = match attributes {
        Value::Object(map) => map,
        other => {
            return Err(CommanderError::storage(format!(
                "Item attributes must be a JSON object, found {other}"
            )))
        }
    };
    Ok(StorageItem {
        pk: row.try_get("pk")?,
        sk: row.try_get("sk")?,
        si1_sort: row.try_get("si1_sort")?,
        si2_hash: row.try_get("si2_hash")?,
        si2_sort: row.try_get("si2_sort")?,
        attributes,
    })
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn get_items(&self, keys: &[ItemKey]) -> CommanderResult<Vec<StorageItem>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let pks: Vec<String> = keys.iter().map(|k| k.pk.clone()).collect();
        let sks: Vec<String> = keys.iter().map(|k| k.sk.clone()).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE (pk, sk) IN (SELECT * FROM UNNEST($1::text[], $2::text[]))",
            Self::columns(),
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(pks)
            .bind(sks)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn put_item(&self, item: StorageItem) -> CommanderResult<()> {
        sqlx::query(&self.upsert_sql())
            .bind(&item.pk)
            .bind(&item.sk)
            .bind(&item.si1_sort)
            .bind(&item.si2_hash)
            .bind(&item.si2_sort)
            .bind(Value::Object(item.attributes))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey) -> CommanderResult<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE pk = $1 AND sk = $2", self.table))
            .bind(&key.pk)
            .bind(&key.sk)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> CommanderResult<Vec<WriteRequest>> {
        // All-or-nothing: a failed transaction hands every request back as unprocessed
        let outcome: Result<(), sqlx::Error> = async {
            let mut tx = self.pool.begin().await?;
            for request in &requests {
                self.write_one(&mut tx, request).await?;
            }
            tx.commit().await
        }
        .await;

        match outcome {
            Ok(()) => Ok(Vec::new()),
            Err(e) => {
                warn!(
                    error = %e,
                    requests = requests.len(),
                    "⚠️ Batch write transaction failed; returning requests as unprocessed"
                );
                Ok(requests)
            }
        }
    }

    async fn query(&self, request: &QueryRequest) -> CommanderResult<QueryPage> {
        let (hash_col, sort_col) = index_columns(request.index);
        let limit = request.limit.unwrap_or(i64::MAX as usize - 1);
        let sql = format!(
            "SELECT {columns} FROM {table} \
             WHERE {hash_col} = $1 AND {sort_col} IS NOT NULL \
             AND left({sort_col}, char_length($2)) = $2 \
             AND ($3::text IS NULL OR ({sort_col}, pk, sk) > ($3, $4, $5)) \
             ORDER BY {sort_col}, pk, sk LIMIT $6",
            columns = Self::columns(),
            table = self.table,
        );
        let start = request.exclusive_start.as_ref();
        let rows = sqlx::query(&sql)
            .bind(&request.hash)
            .bind(request.sort_prefix.as_deref().unwrap_or(""))
            .bind(start.map(|c| c.sort.as_str()))
            .bind(start.map(|c| c.pk.as_str()))
            .bind(start.map(|c| c.sk.as_str()))
            .bind((limit + 1) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut items = rows.iter().map(row_to_item).collect::<CommanderResult<Vec<_>>>()?;
        let has_more = items.len() > limit;
        items.truncate(limit);
        let last_evaluated: Option<QueryCursor> = if has_more {
            items.last().and_then(|item| item.cursor(request.index))
        } else {
            None
        };

        Ok(QueryPage {
            items,
            last_evaluated,
        })
    }

    async fn increment_counter(
        &self,
        key: &ItemKey,
        field: &str,
        delta: i64,
        marker: Option<&CounterMarker>,
    ) -> CommanderResult<Option<i64>> {
        let counter = "jsonb_set(attributes, ARRAY[$3], \
                       to_jsonb(COALESCE((attributes->>$3)::bigint, 0) + $4), true)";
        let row = match marker {
            None => {
                let sql = format!(
                    "UPDATE {} SET attributes = {counter} \
                     WHERE pk = $1 AND sk = $2 RETURNING (attributes->>$3)::bigint AS value",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .bind(field)
                    .bind(delta)
                    .fetch_optional(&self.pool)
                    .await?
            }
            Some(marker) => {
                let sql = format!(
                    "UPDATE {} SET attributes = jsonb_set({counter}, ARRAY[$5], \
                     COALESCE(attributes->$5, '[]'::jsonb) || jsonb_build_array($6::jsonb), true) \
                     WHERE pk = $1 AND sk = $2 \
                     AND NOT (COALESCE(attributes->$5, '[]'::jsonb) @> jsonb_build_array($6::jsonb)) \
                     RETURNING (attributes->>$3)::bigint AS value",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .bind(field)
                    .bind(delta)
                    .bind(&marker.field)
                    .bind(&marker.value)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            // No row updated: either the marker was already recorded or the item is gone
            None if marker.is_some() && !self.get_items(std::slice::from_ref(key)).await?.is_empty() => {
                debug!(key = %key, field = %field, "Counter marker already recorded");
                Ok(None)
            }
            None => Err(CommanderError::not_found(format!("item {key}"))),
        }
    }

    async fn set_attributes(
        &self,
        key: &ItemKey,
        attributes: Map<String, Value>,
        condition: Option<&AttributeCondition>,
    ) -> CommanderResult<bool> {
        let base = format!(
            "UPDATE {} SET attributes = attributes || $3::jsonb WHERE pk = $1 AND sk = $2",
            self.table
        );
        let query_result = match condition {
            None => {
                sqlx::query(&base)
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .bind(Value::Object(attributes))
                    .execute(&self.pool)
                    .await?
            }
            Some(AttributeCondition::Equals { field, value }) => {
                sqlx::query(&format!("{base} AND attributes->$4 = $5::jsonb"))
                    .bind(&key.pk)
                    .bind(&key.sk)
                    .bind(Value::Object(attributes))
                    .bind(field)
                    .bind(value)
                    .execute(&self.pool)
                    .await?
            }
            Some(AttributeCondition::NotIn { field, values }) => {
                sqlx::query(&format!(
                    "{base} AND NOT ($5::jsonb @> jsonb_build_array(attributes->$4))"
                ))
                .bind(&key.pk)
                .bind(&key.sk)
                .bind(Value::Object(attributes))
                .bind(field)
                .bind(Value::Array(values.clone()))
                .execute(&self.pool)
                .await?
            }
        };
        Ok(query_result.rows_affected() > 0)
    }
}
