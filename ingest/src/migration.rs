use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Forward-only migrations, owned by the ingest service and applied on boot.
/// Each entry runs once, inside a transaction, recorded in schema_migrations.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_core_tables",
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id UUID PRIMARY KEY,
            point_id UUID NOT NULL,
            register_id UUID NOT NULL,
            token_hash TEXT NOT NULL,
            is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_seen_at TIMESTAMPTZ
        );
        CREATE INDEX IF NOT EXISTS ix_devices_token_hash ON devices (token_hash);

        CREATE TABLE IF NOT EXISTS audio_chunks (
            chunk_id UUID PRIMARY KEY,
            device_id UUID NOT NULL REFERENCES devices (device_id) ON DELETE CASCADE,
            point_id UUID NOT NULL,
            register_id UUID NOT NULL,
            start_ts TIMESTAMPTZ NOT NULL,
            end_ts TIMESTAMPTZ NOT NULL,
            duration_sec INTEGER NOT NULL,
            codec TEXT NOT NULL,
            sample_rate INTEGER NOT NULL,
            channels INTEGER NOT NULL,
            file_path TEXT NOT NULL,
            file_size_bytes BIGINT NOT NULL,
            file_sha256 TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'QUEUED'
                CHECK (status IN ('QUEUED', 'PROCESSING', 'DONE', 'ERROR')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS ix_audio_chunks_point_start
            ON audio_chunks (point_id, start_ts);
        CREATE INDEX IF NOT EXISTS ix_audio_chunks_device_start
            ON audio_chunks (device_id, start_ts);
        CREATE INDEX IF NOT EXISTS ix_audio_chunks_dedup
            ON audio_chunks (device_id, start_ts, file_sha256);
        "#,
    ),
    (
        "002_vad_tables",
        r#"
        ALTER TABLE audio_chunks ADD COLUMN IF NOT EXISTS error_message TEXT;

        CREATE TABLE IF NOT EXISTS speech_segments (
            id UUID PRIMARY KEY,
            chunk_id UUID NOT NULL REFERENCES audio_chunks (chunk_id) ON DELETE CASCADE,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS ix_speech_segments_chunk_id
            ON speech_segments (chunk_id);

        CREATE TABLE IF NOT EXISTS dialogues (
            dialogue_id UUID PRIMARY KEY,
            device_id UUID NOT NULL REFERENCES devices (device_id) ON DELETE CASCADE,
            point_id UUID NOT NULL,
            register_id UUID NOT NULL,
            start_ts TIMESTAMPTZ NOT NULL,
            end_ts TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS ix_dialogues_device_start
            ON dialogues (device_id, start_ts);
        CREATE INDEX IF NOT EXISTS ix_dialogues_point_start
            ON dialogues (point_id, start_ts);

        CREATE TABLE IF NOT EXISTS dialogue_segments (
            dialogue_id UUID NOT NULL REFERENCES dialogues (dialogue_id) ON DELETE CASCADE,
            chunk_id UUID NOT NULL REFERENCES audio_chunks (chunk_id) ON DELETE CASCADE,
            segment_id UUID NOT NULL REFERENCES speech_segments (id) ON DELETE CASCADE,
            PRIMARY KEY (dialogue_id, chunk_id, segment_id)
        );
        CREATE INDEX IF NOT EXISTS ix_dialogue_segments_chunk_id
            ON dialogue_segments (chunk_id);

        CREATE TABLE IF NOT EXISTS device_dialogue_state (
            device_id UUID PRIMARY KEY REFERENCES devices (device_id) ON DELETE CASCADE,
            open_dialogue_id UUID NOT NULL REFERENCES dialogues (dialogue_id) ON DELETE CASCADE,
            dialogue_started_at TIMESTAMPTZ NOT NULL,
            last_speech_end_ts TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    ),
    (
        "003_processing_recovery",
        r#"
        ALTER TABLE audio_chunks ADD COLUMN IF NOT EXISTS processing_started_at TIMESTAMPTZ;
        CREATE INDEX IF NOT EXISTS ix_audio_chunks_status_processing_started
            ON audio_chunks (status, processing_started_at)
            WHERE status = 'PROCESSING';
        "#,
    ),
];

pub async fn run(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS schema_migrations (
               version TEXT PRIMARY KEY,
               applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
           )"#,
    )
    .execute(pool)
    .await?;

    for (version, sql) in MIGRATIONS {
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = $1")
                .bind(version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("applied migration {}", version);
    }
    Ok(())
}
