use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    model::{AudioChunk, Device},
    result::Result,
};

impl Device {
    pub async fn db_find_by_token_hash(pool: &PgPool, token_hash: &str) -> Result<Option<Device>> {
        let device: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(pool)
            .await?;
        Ok(device)
    }

    pub async fn db_find_by_id(pool: &PgPool, device_id: Uuid) -> Result<Option<Device>> {
        let device: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE device_id = $1")
            .bind(device_id)
            .fetch_optional(pool)
            .await?;
        Ok(device)
    }

    pub async fn db_insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO devices (device_id, point_id, register_id, token_hash, is_enabled)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(self.device_id)
        .bind(self.point_id)
        .bind(self.register_id)
        .bind(&self.token_hash)
        .bind(self.is_enabled)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn db_list(pool: &PgPool) -> Result<Vec<Device>> {
        let devices: Vec<Device> =
            sqlx::query_as("SELECT * FROM devices ORDER BY created_at DESC")
                .fetch_all(pool)
                .await?;
        Ok(devices)
    }

    pub async fn db_set_enabled(
        pool: &PgPool,
        device_id: Uuid,
        is_enabled: bool,
    ) -> Result<Option<Device>> {
        let device: Option<Device> = sqlx::query_as(
            r#"UPDATE devices SET is_enabled = $2 WHERE device_id = $1 RETURNING *"#,
        )
        .bind(device_id)
        .bind(is_enabled)
        .fetch_optional(pool)
        .await?;
        Ok(device)
    }

    pub async fn db_touch_last_seen(pool: &PgPool, device_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE devices SET last_seen_at = now() WHERE device_id = $1")
            .bind(device_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

impl AudioChunk {
    pub async fn db_insert(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO audio_chunks
               (chunk_id, device_id, point_id, register_id, start_ts, end_ts, duration_sec,
                codec, sample_rate, channels, file_path, file_size_bytes, file_sha256, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(self.chunk_id)
        .bind(self.device_id)
        .bind(self.point_id)
        .bind(self.register_id)
        .bind(self.start_ts)
        .bind(self.end_ts)
        .bind(self.duration_sec)
        .bind(&self.codec)
        .bind(self.sample_rate)
        .bind(self.channels)
        .bind(&self.file_path)
        .bind(self.file_size_bytes)
        .bind(&self.file_sha256)
        .bind(&self.status)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Retry probe for the upload idempotency rule: a row for the same device
    /// whose start_ts is within one second and whose payload hash matches is
    /// the same chunk re-sent across a network blip.
    pub async fn db_find_duplicate(
        pool: &PgPool,
        device_id: Uuid,
        start_ts: DateTime<Utc>,
        file_sha256: &str,
    ) -> Result<Option<AudioChunk>> {
        let chunk: Option<AudioChunk> = sqlx::query_as(
            r#"
            SELECT chunk_id, device_id, point_id, register_id, start_ts, end_ts, duration_sec,
                   codec, sample_rate, channels, file_path, file_size_bytes, file_sha256, status
            FROM audio_chunks
            WHERE device_id = $1
              AND file_sha256 = $2
              AND start_ts BETWEEN $3 - interval '1 second' AND $3 + interval '1 second'
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(file_sha256)
        .bind(start_ts)
        .fetch_optional(pool)
        .await?;
        Ok(chunk)
    }

    pub async fn db_find_by_id(pool: &PgPool, chunk_id: Uuid) -> Result<Option<AudioChunk>> {
        let chunk: Option<AudioChunk> = sqlx::query_as(
            r#"
            SELECT chunk_id, device_id, point_id, register_id, start_ts, end_ts, duration_sec,
                   codec, sample_rate, channels, file_path, file_size_bytes, file_sha256, status
            FROM audio_chunks
            WHERE chunk_id = $1
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(pool)
        .await?;
        Ok(chunk)
    }

    /// Which of the given relative paths have a chunk row. Used by the orphan
    /// sweep to tell leftovers from real chunks.
    pub async fn db_known_paths(pool: &PgPool, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT file_path FROM audio_chunks WHERE file_path = ANY($1)")
                .bind(paths)
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }
}
