use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use tracing::{error, info};

use crate::model::AudioChunk;
use crate::route::AppState;

/// Periodically remove files that an interrupted upload left behind: payloads
/// written before a failed DB commit, and temp files from crashed writes.
/// Anything younger than the TTL may still be mid-upload and is left alone.
pub async fn run(state: AppState) {
    let interval = Duration::from_secs(state.config.storage.sweep_interval_sec);
    loop {
        tokio::time::sleep(interval).await;
        match do_sweep(&state).await {
            Ok(0) => {}
            Ok(removed) => info!("orphan sweep removed {} files", removed),
            Err(e) => error!("orphan sweep failed: {}", e),
        }
    }
}

async fn do_sweep(state: &AppState) -> anyhow::Result<usize> {
    let cutoff = SystemTime::now() - Duration::from_secs(state.config.storage.orphan_ttl_sec);
    let stale = storage::stale_files(&state.config.storage.audio_dir, cutoff).await?;
    if stale.is_empty() {
        return Ok(0);
    }

    let candidates: Vec<String> = stale
        .iter()
        .filter(|f| !f.is_tmp)
        .map(|f| f.relative_path.clone())
        .collect();
    let known: HashSet<String> = AudioChunk::db_known_paths(&state.pool, &candidates)
        .await
        .map_err(|e| anyhow::anyhow!("orphan sweep path lookup failed: {e:?}"))?
        .into_iter()
        .collect();

    let mut removed = 0;
    for file in stale {
        if file.is_tmp || !known.contains(&file.relative_path) {
            storage::remove_file(&state.config.storage.audio_dir, &file.relative_path).await?;
            removed += 1;
        }
    }
    Ok(removed)
}
