use std::fmt;

use async_trait::async_trait;
use log::info;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;

use crate::error::StoreError;
use crate::import::InputRows;
use crate::parser::TweetRecord;

/// Processing status of an input row, as stored in its `status` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ItemStatus {
    Pending,
    Done,
    Error,
    ParseFailed,
    InvalidUrl,
}

impl ItemStatus {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Done => "done",
            ItemStatus::Error => "error",
            ItemStatus::ParseFailed => "parse_failed",
            ItemStatus::InvalidUrl => "invalid_url",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TargetItem {
    pub(crate) url: String,
    pub(crate) status: ItemStatus,
}

#[async_trait]
pub(crate) trait TweetStore: Send + Sync {
    async fn ensure_output_table(&self, output_table: &str) -> Result<(), StoreError>;

    /// Rows whose status is `pending`.
    async fn fetch_pending(&self, input_table: &str) -> Result<Vec<TargetItem>, StoreError>;

    async fn update_status(
        &self,
        input_table: &str,
        url: &str,
        status: ItemStatus,
    ) -> Result<(), StoreError>;

    /// Upserts the parsed record keyed by `url`.
    async fn insert_result(
        &self,
        output_table: &str,
        url: &str,
        record: &TweetRecord,
        raw: &Value,
    ) -> Result<(), StoreError>;

    /// Creates `input_table` with one text column per CSV column and appends
    /// every row. Returns the number of rows inserted.
    async fn load_input(&self, input_table: &str, input: &InputRows) -> Result<u64, StoreError>;
}

fn quote_ident(ident: &str) -> Result<String, StoreError> {
    let valid = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(ident.to_string()));
    }
    Ok(format!("\"{ident}\""))
}

pub(crate) struct PgStore {
    pool: PgPool,
    schema: String,
    url_column: String,
}

impl PgStore {
    pub(crate) async fn connect(
        database_url: &str,
        schema: &str,
        url_column: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let schema = quote_ident(schema)?;
        let url_column = quote_ident(url_column)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            schema,
            url_column,
        })
    }

    fn table(&self, name: &str) -> Result<String, StoreError> {
        Ok(format!("{}.{}", self.schema, quote_ident(name)?))
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

#[async_trait]
impl TweetStore for PgStore {
    async fn ensure_output_table(&self, output_table: &str) -> Result<(), StoreError> {
        let table = self.table(output_table)?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                tweet_url TEXT UNIQUE,
                tweet_id TEXT,
                name TEXT,
                screen_name TEXT,
                created_at TEXT,
                text TEXT,
                retweet_count BIGINT,
                reply_count BIGINT,
                like_count BIGINT,
                quote_count BIGINT,
                repost_count BIGINT,
                total_views BIGINT,
                bookmark_count BIGINT,
                raw_json JSONB,
                inserted_at TIMESTAMP DEFAULT NOW()
            )"
        ))
        .execute(&self.pool)
        .await?;
        info!("Output table {} ensured", table);
        Ok(())
    }

    async fn fetch_pending(&self, input_table: &str) -> Result<Vec<TargetItem>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE status = $1",
            self.url_column,
            self.table(input_table)?
        );
        let rows: Vec<(Option<String>,)> = sqlx::query_as(&sql)
            .bind(ItemStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(url,)| url)
            .map(|url| TargetItem {
                url,
                status: ItemStatus::Pending,
            })
            .collect())
    }

    async fn update_status(
        &self,
        input_table: &str,
        url: &str,
        status: ItemStatus,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET status = $1 WHERE {} = $2",
            self.table(input_table)?,
            self.url_column
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_result(
        &self,
        output_table: &str,
        url: &str,
        record: &TweetRecord,
        raw: &Value,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (
                tweet_url, tweet_id, name, screen_name, created_at, text,
                retweet_count, reply_count, like_count, quote_count, repost_count,
                total_views, bookmark_count, raw_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (tweet_url) DO UPDATE SET
                tweet_id = EXCLUDED.tweet_id,
                name = EXCLUDED.name,
                screen_name = EXCLUDED.screen_name,
                created_at = EXCLUDED.created_at,
                text = EXCLUDED.text,
                retweet_count = EXCLUDED.retweet_count,
                reply_count = EXCLUDED.reply_count,
                like_count = EXCLUDED.like_count,
                quote_count = EXCLUDED.quote_count,
                repost_count = EXCLUDED.repost_count,
                total_views = EXCLUDED.total_views,
                bookmark_count = EXCLUDED.bookmark_count,
                raw_json = EXCLUDED.raw_json",
            self.table(output_table)?
        );
        sqlx::query(&sql)
            .bind(url)
            .bind(&record.tweet_id)
            .bind(&record.name)
            .bind(&record.screen_name)
            .bind(record.created_at.map(|at| at.to_rfc3339()))
            .bind(&record.text)
            .bind(record.retweet_count)
            .bind(record.reply_count)
            .bind(record.like_count)
            .bind(record.quote_count)
            .bind(record.repost_count)
            .bind(record.total_views)
            .bind(record.bookmark_count)
            .bind(Json(raw))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_input(&self, input_table: &str, input: &InputRows) -> Result<u64, StoreError> {
        let table = self.table(input_table)?;
        let columns = input
            .columns
            .iter()
            .map(|column| quote_ident(column))
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        let definitions = columns
            .iter()
            .map(|column| format!("{column} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {table} ({definitions})"))
            .execute(&self.pool)
            .await?;

        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for row in &input.rows {
            let mut query = sqlx::query(&sql);
            for value in row {
                query = query.bind((!value.is_empty()).then_some(value.as_str()));
            }
            inserted += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        info!("Loaded {} rows into {}", inserted, table);
        Ok(inserted)
    }
}
