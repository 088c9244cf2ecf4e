use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::errors::StoreError;
use crate::kv::{Item, ItemKey, KeyValueStore, SecondaryIndex, SortCondition};

/// Process-wide database handle.
///
/// Constructed once at startup and passed by handle into each component.
/// Connectivity is verified during `connect`; this is the only place a store
/// failure aborts the process.
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        // Startup connectivity check
        sqlx::query("SELECT 1").execute(&pool).await?;
        tracing::info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Release pooled connections. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Durable single-table implementation of [`KeyValueStore`].
///
/// One row per item: primary key (pk, sk), the two secondary-index key
/// pairs as indexed nullable columns, a version counter for optimistic
/// concurrency, an expiry timestamp, and the record attributes as jsonb.
/// Expired rows are filtered by every read; a periodic
/// `DELETE ... WHERE expires_at <= now()` can reclaim them.
pub struct PgStore {
    pool: PgPool,
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > now())";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the lead table and its index projections if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lead_items (
                pk         text NOT NULL,
                sk         text NOT NULL,
                gsipk      text,
                gsisk      text,
                gsipk1     text,
                gsisk1     text,
                version    bigint NOT NULL DEFAULT 1,
                expires_at timestamptz,
                attrs      jsonb NOT NULL DEFAULT '{}'::jsonb,
                PRIMARY KEY (pk, sk)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS lead_items_gsi ON lead_items (gsipk, gsisk)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS lead_items_gsi1 ON lead_items (gsipk1, gsisk1)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn item_from_row(row: &sqlx::postgres::PgRow) -> Result<Item, StoreError> {
        let attrs: serde_json::Value = row.try_get("attrs")?;
        Ok(Item {
            pk: row.try_get("pk")?,
            sk: row.try_get("sk")?,
            gsipk: row.try_get("gsipk")?,
            gsisk: row.try_get("gsisk")?,
            gsipk1: row.try_get("gsipk1")?,
            gsisk1: row.try_get("gsisk1")?,
            version: row.try_get("version")?,
            expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
            attrs: attrs.as_object().cloned().unwrap_or_default(),
        })
    }

    fn sort_clause(cond: &SortCondition, column: &str, bind_idx: usize) -> (String, Option<String>) {
        match cond {
            SortCondition::Any => (String::new(), None),
            SortCondition::Equals(v) => {
                (format!(" AND {} = ${}", column, bind_idx), Some(v.clone()))
            }
            SortCondition::BeginsWith(prefix) => (
                format!(" AND left({}, length(${})) = ${}", column, bind_idx, bind_idx),
                Some(prefix.clone()),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM lead_items WHERE pk = $1 AND sk = $2 AND {}",
            LIVE
        ))
        .bind(&key.pk)
        .bind(&key.sk)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::item_from_row).transpose()
    }

    async fn put(&self, item: Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO lead_items (pk, sk, gsipk, gsisk, gsipk1, gsisk1, expires_at, attrs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pk, sk) DO UPDATE
            SET gsipk = EXCLUDED.gsipk,
                gsisk = EXCLUDED.gsisk,
                gsipk1 = EXCLUDED.gsipk1,
                gsisk1 = EXCLUDED.gsisk1,
                expires_at = EXCLUDED.expires_at,
                attrs = EXCLUDED.attrs,
                version = lead_items.version + 1
            "#,
        )
        .bind(&item.pk)
        .bind(&item.sk)
        .bind(&item.gsipk)
        .bind(&item.gsisk)
        .bind(&item.gsipk1)
        .bind(&item.gsisk1)
        .bind(item.expires_at)
        .bind(serde_json::Value::Object(item.attrs.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_if_absent(&self, item: Item) -> Result<(), StoreError> {
        // Overwrite is permitted only when the resident row has expired;
        // a live row at the key means the dedup key is taken.
        let result = sqlx::query(
            r#"
            INSERT INTO lead_items (pk, sk, gsipk, gsisk, gsipk1, gsisk1, expires_at, attrs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pk, sk) DO UPDATE
            SET gsipk = EXCLUDED.gsipk,
                gsisk = EXCLUDED.gsisk,
                gsipk1 = EXCLUDED.gsipk1,
                gsisk1 = EXCLUDED.gsisk1,
                expires_at = EXCLUDED.expires_at,
                attrs = EXCLUDED.attrs,
                version = 1
            WHERE lead_items.expires_at IS NOT NULL AND lead_items.expires_at <= now()
            "#,
        )
        .bind(&item.pk)
        .bind(&item.sk)
        .bind(&item.gsipk)
        .bind(&item.gsisk)
        .bind(&item.gsipk1)
        .bind(&item.gsisk1)
        .bind(item.expires_at)
        .bind(serde_json::Value::Object(item.attrs.clone()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(format!(
                "{}/{}",
                item.pk, item.sk
            )));
        }
        Ok(())
    }

    async fn put_versioned(&self, item: Item, expected_version: i64) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE lead_items
            SET gsipk = $3, gsisk = $4, gsipk1 = $5, gsisk1 = $6,
                expires_at = $7, attrs = $8, version = $9 + 1
            WHERE pk = $1 AND sk = $2 AND version = $9 AND {}
            "#,
            LIVE
        ))
        .bind(&item.pk)
        .bind(&item.sk)
        .bind(&item.gsipk)
        .bind(&item.gsisk)
        .bind(&item.gsipk1)
        .bind(&item.gsisk1)
        .bind(item.expires_at)
        .bind(serde_json::Value::Object(item.attrs.clone()))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "{}/{}: expected version {}",
                item.pk, item.sk, expected_version
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &ItemKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM lead_items WHERE pk = $1 AND sk = $2")
            .bind(&key.pk)
            .bind(&key.sk)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_partition(
        &self,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError> {
        let (clause, bind) = Self::sort_clause(&cond, "sk", 2);
        let sql = format!(
            "SELECT * FROM lead_items WHERE pk = $1 AND {}{} ORDER BY sk",
            LIVE, clause
        );
        let mut query = sqlx::query(&sql).bind(pk);
        if let Some(value) = &bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::item_from_row).collect()
    }

    async fn query_index(
        &self,
        index: SecondaryIndex,
        pk: &str,
        cond: SortCondition,
    ) -> Result<Vec<Item>, StoreError> {
        let (pk_col, sk_col) = match index {
            SecondaryIndex::Gsi => ("gsipk", "gsisk"),
            SecondaryIndex::Gsi1 => ("gsipk1", "gsisk1"),
        };
        let (clause, bind) = Self::sort_clause(&cond, sk_col, 2);
        let sql = format!(
            "SELECT * FROM lead_items WHERE {} = $1 AND {}{} ORDER BY {}",
            pk_col, LIVE, clause, sk_col
        );
        let mut query = sqlx::query(&sql).bind(pk);
        if let Some(value) = &bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::item_from_row).collect()
    }
}
