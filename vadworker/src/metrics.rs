use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

/// Window counters, reset at each log interval. Plain atomics; the only
/// contention is increments from the chunk tasks against the metrics loop.
#[derive(Debug)]
pub struct WorkerMetrics {
    chunks_processed: AtomicU64,
    chunks_errors: AtomicU64,
    chunks_requeued: AtomicU64,
    segments_created: AtomicU64,
    dialogues_created: AtomicU64,
    dialogues_extended: AtomicU64,
    vad_millis: AtomicU64,
    total_millis: AtomicU64,
    window_start: Mutex<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub window_sec: f64,
    pub chunks_processed: u64,
    pub chunks_errors: u64,
    pub chunks_requeued: u64,
    pub segments_created: u64,
    pub dialogues_created: u64,
    pub dialogues_extended: u64,
    pub avg_vad_ms: u64,
    pub avg_total_ms: u64,
    pub chunks_per_min: f64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            chunks_processed: AtomicU64::new(0),
            chunks_errors: AtomicU64::new(0),
            chunks_requeued: AtomicU64::new(0),
            segments_created: AtomicU64::new(0),
            dialogues_created: AtomicU64::new(0),
            dialogues_extended: AtomicU64::new(0),
            vad_millis: AtomicU64::new(0),
            total_millis: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    pub fn record_chunk_processed(
        &self,
        vad_ms: u64,
        total_ms: u64,
        segments: usize,
        dialogues_created: usize,
        dialogue_extended: bool,
    ) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.vad_millis.fetch_add(vad_ms, Ordering::Relaxed);
        self.total_millis.fetch_add(total_ms, Ordering::Relaxed);
        self.segments_created
            .fetch_add(segments as u64, Ordering::Relaxed);
        self.dialogues_created
            .fetch_add(dialogues_created as u64, Ordering::Relaxed);
        if dialogue_extended {
            self.dialogues_extended.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_chunk_error(&self) {
        self.chunks_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunks_requeued(&self, count: u64) {
        self.chunks_requeued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> MetricsSnapshot {
        let window_sec = {
            let mut start = self.window_start.lock().unwrap();
            let elapsed = start.elapsed().as_secs_f64();
            *start = Instant::now();
            elapsed
        };
        let chunks_processed = self.chunks_processed.swap(0, Ordering::Relaxed);
        let vad_millis = self.vad_millis.swap(0, Ordering::Relaxed);
        let total_millis = self.total_millis.swap(0, Ordering::Relaxed);
        MetricsSnapshot {
            window_sec,
            chunks_processed,
            chunks_errors: self.chunks_errors.swap(0, Ordering::Relaxed),
            chunks_requeued: self.chunks_requeued.swap(0, Ordering::Relaxed),
            segments_created: self.segments_created.swap(0, Ordering::Relaxed),
            dialogues_created: self.dialogues_created.swap(0, Ordering::Relaxed),
            dialogues_extended: self.dialogues_extended.swap(0, Ordering::Relaxed),
            avg_vad_ms: vad_millis.checked_div(chunks_processed).unwrap_or(0),
            avg_total_ms: total_millis.checked_div(chunks_processed).unwrap_or(0),
            chunks_per_min: if window_sec > 0.0 {
                chunks_processed as f64 / window_sec * 60.0
            } else {
                0.0
            },
        }
    }

    pub fn log_and_reset(&self) {
        let s = self.snapshot_and_reset();
        if s.chunks_processed == 0 && s.chunks_errors == 0 && s.chunks_requeued == 0 {
            info!(window_sec = format!("{:.1}", s.window_sec), "metrics: idle");
            return;
        }
        info!(
            window_sec = format!("{:.1}", s.window_sec),
            chunks_processed = s.chunks_processed,
            chunks_per_min = format!("{:.2}", s.chunks_per_min),
            chunks_errors = s.chunks_errors,
            chunks_requeued = s.chunks_requeued,
            segments_created = s.segments_created,
            dialogues_created = s.dialogues_created,
            dialogues_extended = s.dialogues_extended,
            avg_vad_ms = s.avg_vad_ms,
            avg_total_ms = s.avg_total_ms,
            "metrics window"
        );
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_aggregates_and_resets() {
        let metrics = WorkerMetrics::new();
        metrics.record_chunk_processed(100, 200, 3, 1, false);
        metrics.record_chunk_processed(300, 400, 2, 0, true);
        metrics.record_chunk_error();
        metrics.record_chunks_requeued(4);

        let s = metrics.snapshot_and_reset();
        assert_eq!(s.chunks_processed, 2);
        assert_eq!(s.chunks_errors, 1);
        assert_eq!(s.chunks_requeued, 4);
        assert_eq!(s.segments_created, 5);
        assert_eq!(s.dialogues_created, 1);
        assert_eq!(s.dialogues_extended, 1);
        assert_eq!(s.avg_vad_ms, 200);
        assert_eq!(s.avg_total_ms, 300);

        let empty = metrics.snapshot_and_reset();
        assert_eq!(empty.chunks_processed, 0);
        assert_eq!(empty.avg_vad_ms, 0);
    }
}
