use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::dialogue::{stitch, AbsSegment, DialogueRef, OpenDialogue, StateChange, StitchConfig};
use crate::model::{ClaimedChunk, DialogueCursor};

pub async fn wait_for_db(pool: &PgPool) -> bool {
    for attempt in 1..=30 {
        if sqlx::query("SELECT 1").execute(pool).await.is_ok() {
            return true;
        }
        warn!("database not ready, retrying in 2s (attempt {}/30)", attempt);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    false
}

/// Claim up to `batch_size` queued chunks in one statement. SKIP LOCKED keeps
/// concurrent workers from ever selecting the same row; the chunk is owned by
/// this process the moment the statement commits.
pub async fn claim_queued_chunks(pool: &PgPool, batch_size: i64) -> Result<Vec<ClaimedChunk>> {
    let chunks: Vec<ClaimedChunk> = sqlx::query_as(
        r#"
        UPDATE audio_chunks
        SET status = 'PROCESSING', processing_started_at = now()
        WHERE chunk_id IN (
            SELECT chunk_id FROM audio_chunks
            WHERE status = 'QUEUED'
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING chunk_id, device_id, point_id, register_id, start_ts, end_ts,
                  duration_sec, sample_rate, channels, file_path
        "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(chunks)
}

/// Requeue chunks stuck in PROCESSING past the timeout. Safe because the
/// per-chunk commit is all-or-nothing: a stuck chunk has written nothing.
pub async fn requeue_stuck_chunks(pool: &PgPool, stuck_timeout_sec: f64) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE audio_chunks
        SET status = 'QUEUED', processing_started_at = NULL
        WHERE status = 'PROCESSING'
          AND processing_started_at < now() - make_interval(secs => $1)
        RETURNING chunk_id
        "#,
    )
    .bind(stuck_timeout_sec)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(chunk_id,)| chunk_id).collect())
}

/// Terminal failure; the chunk is not retried automatically.
pub async fn mark_chunk_error(pool: &PgPool, chunk_id: Uuid, message: &str) -> Result<()> {
    let message: String = message.chars().take(1000).collect();
    sqlx::query(
        r#"
        UPDATE audio_chunks
        SET status = 'ERROR', error_message = $2, processing_started_at = NULL
        WHERE chunk_id = $1
        "#,
    )
    .bind(chunk_id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Drop state rows whose dialogue went silent long ago and whose device has
/// no pending chunks that could still legitimately extend it. Keeps an idle
/// device from holding a dialogue "open" for hours.
pub async fn close_stale_dialogue_states(pool: &PgPool, silence_gap_sec: f64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM device_dialogue_state s
        WHERE s.last_speech_end_ts < now() - make_interval(secs => $1)
          AND NOT EXISTS (
              SELECT 1 FROM audio_chunks c
              WHERE c.device_id = s.device_id
                AND c.status IN ('QUEUED', 'PROCESSING')
          )
        "#,
    )
    .bind(silence_gap_sec)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, Clone, Copy)]
pub struct CommitStats {
    pub dialogues_created: usize,
    pub dialogue_extended: bool,
}

/// The atomic tail of chunk processing: segments, dialogue mutations, state
/// row and the DONE flip commit together or not at all. The advisory lock
/// serializes the dialogue state machine per device across workers.
pub async fn commit_chunk(
    pool: &PgPool,
    chunk: &ClaimedChunk,
    segments: &[AbsSegment],
    cfg: StitchConfig,
) -> Result<CommitStats> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(chunk.device_id)
        .execute(&mut *tx)
        .await?;

    let cursor: Option<DialogueCursor> = sqlx::query_as(
        r#"
        SELECT open_dialogue_id, dialogue_started_at, last_speech_end_ts
        FROM device_dialogue_state
        WHERE device_id = $1
        FOR UPDATE
        "#,
    )
    .bind(chunk.device_id)
    .fetch_optional(&mut *tx)
    .await?;

    let open = cursor.map(|c| OpenDialogue {
        dialogue_id: c.open_dialogue_id,
        started_at: c.dialogue_started_at,
        last_speech_end: c.last_speech_end_ts,
    });
    let plan = stitch(open, chunk.start_ts, segments, cfg);

    for seg in segments {
        sqlx::query(
            "INSERT INTO speech_segments (id, chunk_id, start_ms, end_ms) VALUES ($1, $2, $3, $4)",
        )
        .bind(seg.segment_id)
        .bind(chunk.chunk_id)
        .bind(seg.span.start_ms)
        .bind(seg.span.end_ms)
        .execute(&mut *tx)
        .await?;
    }

    let mut new_ids = Vec::with_capacity(plan.new_dialogues.len());
    for dialogue in &plan.new_dialogues {
        let dialogue_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO dialogues (dialogue_id, device_id, point_id, register_id, start_ts, end_ts)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(dialogue_id)
        .bind(chunk.device_id)
        .bind(chunk.point_id)
        .bind(chunk.register_id)
        .bind(dialogue.start_ts)
        .bind(dialogue.end_ts)
        .execute(&mut *tx)
        .await?;
        new_ids.push(dialogue_id);
    }

    if let (Some(end_ts), Some(open)) = (plan.extend_existing_to, open) {
        sqlx::query("UPDATE dialogues SET end_ts = $2 WHERE dialogue_id = $1")
            .bind(open.dialogue_id)
            .bind(end_ts)
            .execute(&mut *tx)
            .await?;
    }

    let resolve = |dialogue: DialogueRef| match dialogue {
        DialogueRef::Existing(id) => id,
        DialogueRef::New(idx) => new_ids[idx],
    };

    for (dialogue, segment_id) in &plan.links {
        sqlx::query(
            r#"
            INSERT INTO dialogue_segments (dialogue_id, chunk_id, segment_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(resolve(*dialogue))
        .bind(chunk.chunk_id)
        .bind(*segment_id)
        .execute(&mut *tx)
        .await?;
    }

    match plan.state {
        StateChange::Keep => {}
        StateChange::Clear => {
            sqlx::query("DELETE FROM device_dialogue_state WHERE device_id = $1")
                .bind(chunk.device_id)
                .execute(&mut *tx)
                .await?;
        }
        StateChange::Set {
            dialogue,
            started_at,
            last_speech_end,
        } => {
            sqlx::query(
                r#"
                INSERT INTO device_dialogue_state
                    (device_id, open_dialogue_id, dialogue_started_at, last_speech_end_ts, updated_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (device_id) DO UPDATE SET
                    open_dialogue_id = EXCLUDED.open_dialogue_id,
                    dialogue_started_at = EXCLUDED.dialogue_started_at,
                    last_speech_end_ts = EXCLUDED.last_speech_end_ts,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(chunk.device_id)
            .bind(resolve(dialogue))
            .bind(started_at)
            .bind(last_speech_end)
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        "UPDATE audio_chunks SET status = 'DONE', processing_started_at = NULL WHERE chunk_id = $1",
    )
    .bind(chunk.chunk_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(CommitStats {
        dialogues_created: plan.new_dialogues.len(),
        dialogue_extended: plan.extend_existing_to.is_some(),
    })
}
