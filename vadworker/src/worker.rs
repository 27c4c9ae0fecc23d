use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::decode;
use crate::dialogue::{self, StitchConfig};
use crate::metrics::WorkerMetrics;
use crate::model::ClaimedChunk;
use crate::vad::{self, SegmentSpan, VadParams};

#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub metrics: Arc<WorkerMetrics>,
    /// Bounds concurrent decode+VAD to the CPU core count.
    pub cpu_slots: Arc<Semaphore>,
}

/// Claim-and-process loop. Re-polls immediately while work was found; sleeps
/// the poll interval otherwise. On shutdown the in-flight batch gets a grace
/// window to finish its commits before the process exits.
pub async fn processing_loop(ctx: WorkerContext, shutdown: CancellationToken) {
    let poll_interval = Duration::from_secs_f64(ctx.config.worker.poll_interval_sec);
    let grace = Duration::from_secs(ctx.config.worker.shutdown_grace_sec);

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        let mut batch = tokio::spawn(process_batch(ctx.clone()));
        let processed = tokio::select! {
            res = &mut batch => match res {
                Ok(Ok(processed)) => processed,
                Ok(Err(e)) => {
                    error!("error in worker loop: {e:#}");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.cancelled() => {}
                    }
                    continue;
                }
                Err(e) => {
                    error!("batch task failed: {e}");
                    continue;
                }
            },
            _ = shutdown.cancelled() => {
                info!("shutdown requested, waiting up to {:?} for in-flight batch", grace);
                match tokio::time::timeout(grace, &mut batch).await {
                    Ok(_) => info!("in-flight batch completed"),
                    Err(_) => {
                        batch.abort();
                        warn!("grace window expired, abandoning in-flight batch to recovery");
                    }
                }
                break;
            }
        };
        if processed == 0 {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => {}
            }
        }
    }
    info!("processing loop stopped");
}

/// Claim one batch and process it. Chunks are grouped per device and each
/// group handled in start_ts order, which is what keeps dialogue stitching
/// deterministic; distinct devices run in parallel.
async fn process_batch(ctx: WorkerContext) -> anyhow::Result<usize> {
    let chunks =
        db::claim_queued_chunks(&ctx.pool, ctx.config.worker.batch_size as i64).await?;
    if chunks.is_empty() {
        return Ok(0);
    }
    info!("claimed {} chunks for processing", chunks.len());

    let mut groups: HashMap<Uuid, Vec<ClaimedChunk>> = HashMap::new();
    for chunk in chunks {
        groups.entry(chunk.device_id).or_default().push(chunk);
    }

    let mut tasks = JoinSet::new();
    for (_, mut group) in groups {
        group.sort_by_key(|c| c.start_ts);
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let mut done = 0usize;
            for chunk in group {
                if process_chunk(&ctx, chunk).await {
                    done += 1;
                }
            }
            done
        });
    }

    let mut processed = 0;
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(done) => processed += done,
            Err(e) => error!("device task failed: {e}"),
        }
    }
    Ok(processed)
}

/// Run one chunk through read → decode → VAD → commit. Returns true when the
/// chunk reached DONE. Failures never escape to the batch: file and decode
/// errors mark the chunk ERROR, commit errors leave it PROCESSING for the
/// recovery loop.
async fn process_chunk(ctx: &WorkerContext, chunk: ClaimedChunk) -> bool {
    let started = Instant::now();
    let chunk_id = chunk.chunk_id;
    debug!(%chunk_id, path = %chunk.file_path, "processing chunk");

    let bytes = match read_with_retries(ctx, &chunk).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(%chunk_id, "giving up on chunk file: {e:#}");
            ctx.metrics.record_chunk_error();
            if let Err(e) = db::mark_chunk_error(&ctx.pool, chunk_id, &format!("{e:#}")).await {
                error!(%chunk_id, "failed to mark chunk ERROR: {e:#}");
            }
            return false;
        }
    };

    let params = VadParams::new(ctx.config.vad.aggressiveness, ctx.config.vad.frame_ms);
    let vad_started = Instant::now();
    let spans = match run_vad_blocking(ctx, bytes, params).await {
        Ok(spans) => spans,
        Err(e) => {
            error!(%chunk_id, "decode/vad failed: {e:#}");
            ctx.metrics.record_chunk_error();
            if let Err(e) =
                db::mark_chunk_error(&ctx.pool, chunk_id, &format!("decode/vad failed: {e:#}"))
                    .await
            {
                error!(%chunk_id, "failed to mark chunk ERROR: {e:#}");
            }
            return false;
        }
    };
    let vad_ms = vad_started.elapsed().as_millis() as u64;
    info!(%chunk_id, segments = spans.len(), vad_ms, "vad completed");

    let segments = dialogue::to_absolute(chunk.start_ts, &spans);
    let stitch_cfg = StitchConfig::from_secs(
        ctx.config.dialogue.silence_gap_sec,
        ctx.config.dialogue.max_dialogue_sec,
    );
    match db::commit_chunk(&ctx.pool, &chunk, &segments, stitch_cfg).await {
        Ok(stats) => {
            ctx.metrics.record_chunk_processed(
                vad_ms,
                started.elapsed().as_millis() as u64,
                segments.len(),
                stats.dialogues_created,
                stats.dialogue_extended,
            );
            info!(%chunk_id, "chunk processed successfully");
            true
        }
        Err(e) => {
            // Stays PROCESSING; the recovery loop requeues it after the
            // stuck timeout and the replay produces the same plan.
            error!(%chunk_id, "commit failed, leaving chunk for recovery: {e:#}");
            ctx.metrics.record_chunk_error();
            false
        }
    }
}

async fn run_vad_blocking(
    ctx: &WorkerContext,
    bytes: Vec<u8>,
    params: VadParams,
) -> anyhow::Result<Vec<SegmentSpan>> {
    let _permit = ctx
        .cpu_slots
        .clone()
        .acquire_owned()
        .await
        .expect("cpu semaphore closed");
    tokio::task::spawn_blocking(move || {
        let pcm = decode::decode_ogg_opus(&bytes)?;
        vad::run_vad(&pcm, &params)
    })
    .await?
}

async fn read_with_retries(ctx: &WorkerContext, chunk: &ClaimedChunk) -> anyhow::Result<Vec<u8>> {
    let mut delay = Duration::from_secs_f64(ctx.config.worker.retry_delay_sec);
    let max_retries = ctx.config.worker.max_retries.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match storage::read_chunk(&ctx.config.storage.audio_dir, &chunk.file_path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < max_retries => {
                warn!(
                    chunk_id = %chunk.chunk_id,
                    attempt,
                    "chunk file read failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "file read failed after {attempt} attempts: {e}"
                ))
            }
        }
    }
}

pub async fn recovery_loop(ctx: WorkerContext, shutdown: CancellationToken) {
    let interval = Duration::from_secs_f64(ctx.config.worker.recovery_interval_sec);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
        match db::requeue_stuck_chunks(&ctx.pool, ctx.config.worker.stuck_timeout_sec).await {
            Ok(chunk_ids) if !chunk_ids.is_empty() => {
                warn!(
                    "requeued {} stuck chunks: {:?}",
                    chunk_ids.len(),
                    &chunk_ids[..chunk_ids.len().min(10)]
                );
                ctx.metrics.record_chunks_requeued(chunk_ids.len() as u64);
            }
            Ok(_) => {}
            Err(e) => error!("error in recovery loop: {e:#}"),
        }
        match db::close_stale_dialogue_states(&ctx.pool, ctx.config.dialogue.silence_gap_sec).await
        {
            Ok(0) => {}
            Ok(closed) => info!("closed {} stale dialogue states", closed),
            Err(e) => error!("error closing stale dialogue states: {e:#}"),
        }
    }
    info!("recovery loop stopped");
}

pub async fn metrics_loop(ctx: WorkerContext, shutdown: CancellationToken) {
    let interval = Duration::from_secs_f64(ctx.config.worker.metrics_log_interval_sec);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
        ctx.metrics.log_and_reset();
    }
    info!("metrics loop stopped");
}
