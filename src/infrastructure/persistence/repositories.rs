use crate::domain::forecasting::{self, FuturesRecord, JobLogEntry, JobStatus};
use crate::domain::ports::HistorySource;
use crate::domain::repositories::{CandleRepository, FuturesRepository, JobLogRepository};
use crate::domain::types::Candle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

fn from_unix_seconds(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).with_context(|| format!("Timestamp out of range: {}", ts))
}

fn from_unix_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Timestamp out of range: {}", ms))
}

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows_to_candles(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Candle>> {
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(Candle {
                timestamp: from_unix_seconds(row.try_get("timestamp")?)?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
            });
        }
        Ok(candles)
    }
}

#[async_trait]
impl HistorySource for SqliteCandleRepository {
    async fn fetch_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT * FROM candles WHERE timestamp >= ? AND timestamp <= ? ORDER BY timestamp ASC",
        )
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load candles for range")?;

        Self::map_rows_to_candles(rows)
    }

    async fn fetch_since(&self, start: DateTime<Utc>) -> Result<Vec<Candle>> {
        let rows = sqlx::query("SELECT * FROM candles WHERE timestamp >= ? ORDER BY timestamp ASC")
            .bind(start.timestamp())
            .fetch_all(&self.pool)
            .await
            .context("Failed to load recent candles")?;

        Self::map_rows_to_candles(rows)
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (timestamp, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(timestamp) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(candle.timestamp.timestamp())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await
            .context("Failed to save candle")?;
        }
        tx.commit().await.context("Failed to commit candles")?;

        debug!("Persisted {} candles", candles.len());
        Ok(candles.len())
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM candles")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }
}

pub struct SqliteFuturesRepository {
    pool: SqlitePool,
}

impl SqliteFuturesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows_to_records(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<FuturesRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(FuturesRecord {
                time: from_unix_seconds(row.try_get("time")?)?,
                pred_close: row.try_get("pred_close")?,
                real_close: row.try_get("real_close")?,
                err_close: row.try_get("err_close")?,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl FuturesRepository for SqliteFuturesRepository {
    async fn upsert_many(&self, records: &[FuturesRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO futures (time, pred_close, real_close, err_close)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(time) DO UPDATE SET
                    pred_close = excluded.pred_close,
                    real_close = excluded.real_close,
                    err_close = excluded.err_close
                "#,
            )
            .bind(record.time.timestamp())
            .bind(record.pred_close)
            .bind(record.real_close)
            .bind(record.err_close)
            .execute(&mut *tx)
            .await
            .context("Failed to upsert futures record")?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await.context("Failed to commit futures")?;

        Ok(written)
    }

    async fn rolling_mape(&self, n: usize) -> Result<Option<f64>> {
        let rows = sqlx::query(
            r#"
            SELECT time, pred_close, real_close, err_close
            FROM futures
            WHERE real_close IS NOT NULL AND err_close IS NOT NULL AND real_close <> 0
            ORDER BY time DESC
            LIMIT ?
            "#,
        )
        .bind(n.max(1) as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query rolling futures error")?;

        let records = Self::map_rows_to_records(rows)?;
        Ok(forecasting::rolling_mape(&records))
    }

    async fn find(
        &self,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        limit: Option<usize>,
    ) -> Result<Vec<FuturesRecord>> {
        let mut sql = String::from("SELECT time, pred_close, real_close, err_close FROM futures");
        if range.is_some() {
            sql.push_str(" WHERE time BETWEEN ? AND ?");
        }
        if limit.is_some() {
            sql.push_str(" ORDER BY time DESC LIMIT ?");
        } else {
            sql.push_str(" ORDER BY time ASC");
        }

        let mut query = sqlx::query(&sql);
        if let Some((start, end)) = range {
            query = query.bind(start.timestamp()).bind(end.timestamp());
        }
        if let Some(limit) = limit {
            query = query.bind(limit as i64);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("Failed to load futures")?;

        let mut records = Self::map_rows_to_records(rows)?;
        if limit.is_some() {
            records.reverse();
        }
        Ok(records)
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM futures")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }
}

pub struct SqliteJobLogRepository {
    pool: SqlitePool,
}

impl SqliteJobLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobLogRepository for SqliteJobLogRepository {
    async fn record(&self, entry: &JobLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_name, status, message, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.job_name)
        .bind(entry.status.to_string())
        .bind(&entry.message)
        .bind(entry.started_at.timestamp_millis())
        .bind(entry.finished_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to record job log")?;

        Ok(())
    }

    async fn last_success(&self, job_name: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT finished_at
            FROM job_logs
            WHERE job_name = ? AND status = 'ok'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load last successful job")?;

        row.map(|(ms,)| from_unix_millis(ms)).transpose()
    }

    async fn latest(&self, job_name: &str) -> Result<Option<JobLogEntry>> {
        let row = sqlx::query_as::<_, (String, String, String, i64, i64)>(
            r#"
            SELECT job_name, status, message, started_at, finished_at
            FROM job_logs
            WHERE job_name = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load latest job")?;

        if let Some((job_name, status, message, started_at, finished_at)) = row {
            Ok(Some(JobLogEntry {
                job_name,
                status: JobStatus::from_str(&status)?,
                message,
                started_at: from_unix_millis(started_at)?,
                finished_at: from_unix_millis(finished_at)?,
            }))
        } else {
            Ok(None)
        }
    }
}
