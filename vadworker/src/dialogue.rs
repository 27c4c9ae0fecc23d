use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::vad::SegmentSpan;

#[derive(Debug, Clone, Copy)]
pub struct StitchConfig {
    pub silence_gap: Duration,
    pub max_dialogue: Duration,
}

impl StitchConfig {
    pub fn from_secs(silence_gap_sec: f64, max_dialogue_sec: f64) -> Self {
        Self {
            silence_gap: Duration::milliseconds((silence_gap_sec * 1000.0) as i64),
            max_dialogue: Duration::milliseconds((max_dialogue_sec * 1000.0) as i64),
        }
    }
}

/// The device's open dialogue as read from its state row.
#[derive(Debug, Clone, Copy)]
pub struct OpenDialogue {
    pub dialogue_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_speech_end: DateTime<Utc>,
}

/// A chunk-relative segment lifted onto the absolute timeline.
#[derive(Debug, Clone, Copy)]
pub struct AbsSegment {
    pub segment_id: Uuid,
    pub span: SegmentSpan,
    pub start_abs: DateTime<Utc>,
    pub end_abs: DateTime<Utc>,
}

/// Assign ids and absolute bounds to a chunk's spans, ordered by
/// (start_ms, end_ms).
pub fn to_absolute(chunk_start: DateTime<Utc>, spans: &[SegmentSpan]) -> Vec<AbsSegment> {
    let mut spans = spans.to_vec();
    spans.sort_by_key(|s| (s.start_ms, s.end_ms));
    spans
        .into_iter()
        .map(|span| AbsSegment {
            segment_id: Uuid::new_v4(),
            span,
            start_abs: chunk_start + Duration::milliseconds(span.start_ms as i64),
            end_abs: chunk_start + Duration::milliseconds(span.end_ms as i64),
        })
        .collect()
}

/// Which dialogue a link row attaches to: the one already open in the DB, or
/// the nth dialogue this plan creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueRef {
    Existing(Uuid),
    New(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewDialogue {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Leave the state row as it is (silent chunk inside the gap window).
    Keep,
    /// Delete the state row; nothing stays open.
    Clear,
    /// Upsert the state row to track `dialogue`.
    Set {
        dialogue: DialogueRef,
        started_at: DateTime<Utc>,
        last_speech_end: DateTime<Utc>,
    },
}

/// Everything the commit transaction has to apply for one chunk. Derived
/// purely from the prior state row and the chunk's segments, so a recovered
/// chunk replays to the identical plan.
#[derive(Debug, Clone)]
pub struct StitchPlan {
    pub new_dialogues: Vec<NewDialogue>,
    /// Final end_ts for the already-open dialogue when this chunk extends it.
    pub extend_existing_to: Option<DateTime<Utc>>,
    /// One link row per segment.
    pub links: Vec<(DialogueRef, Uuid)>,
    pub state: StateChange,
}

pub fn stitch(
    open: Option<OpenDialogue>,
    chunk_start: DateTime<Utc>,
    segments: &[AbsSegment],
    cfg: StitchConfig,
) -> StitchPlan {
    let mut plan = StitchPlan {
        new_dialogues: Vec::new(),
        extend_existing_to: None,
        links: Vec::new(),
        state: StateChange::Keep,
    };

    // (dialogue, started_at, last_speech_end) of the currently-open dialogue.
    let mut cursor =
        open.map(|d| (DialogueRef::Existing(d.dialogue_id), d.started_at, d.last_speech_end));

    // Silence reaching from before this chunk past the gap closes the open
    // dialogue outright; this is what ends dialogues across silent chunks.
    if let Some((_, _, last_end)) = cursor {
        if chunk_start - last_end >= cfg.silence_gap {
            cursor = None;
            plan.state = StateChange::Clear;
        }
    }

    for seg in segments {
        cursor = Some(match cursor {
            None => open_new(&mut plan, seg),
            Some((dialogue, started_at, last_end)) => {
                let gap_split = seg.start_abs - last_end >= cfg.silence_gap;
                let duration_split = seg.end_abs - started_at > cfg.max_dialogue;
                if gap_split || duration_split {
                    open_new(&mut plan, seg)
                } else {
                    match dialogue {
                        DialogueRef::Existing(_) => plan.extend_existing_to = Some(seg.end_abs),
                        DialogueRef::New(idx) => plan.new_dialogues[idx].end_ts = seg.end_abs,
                    }
                    (dialogue, started_at, seg.end_abs)
                }
            }
        });
        let (dialogue, _, _) = cursor.expect("cursor set above");
        plan.links.push((dialogue, seg.segment_id));
    }

    if !segments.is_empty() {
        let (dialogue, started_at, last_end) = cursor.expect("segments opened a dialogue");
        plan.state = StateChange::Set {
            dialogue,
            started_at,
            last_speech_end: last_end,
        };
    }

    plan
}

fn open_new(
    plan: &mut StitchPlan,
    seg: &AbsSegment,
) -> (DialogueRef, DateTime<Utc>, DateTime<Utc>) {
    plan.new_dialogues.push(NewDialogue {
        start_ts: seg.start_abs,
        end_ts: seg.end_abs,
    });
    (
        DialogueRef::New(plan.new_dialogues.len() - 1),
        seg.start_abs,
        seg.end_abs,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> StitchConfig {
        StitchConfig::from_secs(12.0, 120.0)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 9, 14, 0, 0).unwrap()
    }

    fn spans(pairs: &[(i32, i32)]) -> Vec<SegmentSpan> {
        pairs
            .iter()
            .map(|&(start_ms, end_ms)| SegmentSpan { start_ms, end_ms })
            .collect()
    }

    fn open_at(started_sec: i64, last_end_sec: i64) -> OpenDialogue {
        OpenDialogue {
            dialogue_id: Uuid::new_v4(),
            started_at: t0() + Duration::seconds(started_sec),
            last_speech_end: t0() + Duration::seconds(last_end_sec),
        }
    }

    #[test]
    fn single_chunk_builds_one_dialogue() {
        // Speech at [1.0s, 5.0s) and [6.0s, 9.0s) in one 60 s chunk.
        let segments = to_absolute(t0(), &spans(&[(1000, 5000), (6000, 9000)]));
        let plan = stitch(None, t0(), &segments, cfg());

        assert_eq!(
            plan.new_dialogues,
            vec![NewDialogue {
                start_ts: t0() + Duration::seconds(1),
                end_ts: t0() + Duration::seconds(9),
            }]
        );
        assert!(plan.extend_existing_to.is_none());
        assert_eq!(plan.links.len(), 2);
        assert!(plan.links.iter().all(|(d, _)| *d == DialogueRef::New(0)));
        assert_eq!(
            plan.state,
            StateChange::Set {
                dialogue: DialogueRef::New(0),
                started_at: t0() + Duration::seconds(1),
                last_speech_end: t0() + Duration::seconds(9),
            }
        );
    }

    #[test]
    fn dialogue_spans_two_chunks() {
        // Chunk A ended with speech [55s, 60s); chunk B starts at t0+60s with
        // speech [0s, 3s). Zero gap extends the open dialogue.
        let open = open_at(55, 60);
        let chunk_b_start = t0() + Duration::seconds(60);
        let segments = to_absolute(chunk_b_start, &spans(&[(0, 3000)]));
        let plan = stitch(Some(open), chunk_b_start, &segments, cfg());

        assert!(plan.new_dialogues.is_empty());
        assert_eq!(
            plan.extend_existing_to,
            Some(t0() + Duration::seconds(63))
        );
        assert_eq!(
            plan.links,
            vec![(DialogueRef::Existing(open.dialogue_id), segments[0].segment_id)]
        );
        assert_eq!(
            plan.state,
            StateChange::Set {
                dialogue: DialogueRef::Existing(open.dialogue_id),
                started_at: open.started_at,
                last_speech_end: t0() + Duration::seconds(63),
            }
        );
    }

    #[test]
    fn silence_gap_splits_dialogues() {
        // Chunk A ended with speech [58s, 60s); chunk B has speech only at
        // [13s, 14s): a 13 s gap opens a second dialogue.
        let open = open_at(58, 60);
        let chunk_b_start = t0() + Duration::seconds(60);
        let segments = to_absolute(chunk_b_start, &spans(&[(13000, 14000)]));
        let plan = stitch(Some(open), chunk_b_start, &segments, cfg());

        assert_eq!(
            plan.new_dialogues,
            vec![NewDialogue {
                start_ts: t0() + Duration::seconds(73),
                end_ts: t0() + Duration::seconds(74),
            }]
        );
        assert!(plan.extend_existing_to.is_none());
        assert_eq!(
            plan.state,
            StateChange::Set {
                dialogue: DialogueRef::New(0),
                started_at: t0() + Duration::seconds(73),
                last_speech_end: t0() + Duration::seconds(74),
            }
        );
    }

    #[test]
    fn gap_exactly_at_threshold_splits() {
        let open = open_at(0, 10);
        let chunk_start = t0() + Duration::seconds(10);
        // Starts exactly silence_gap after the last speech end.
        let segments = to_absolute(chunk_start, &spans(&[(12000, 13000)]));
        let plan = stitch(Some(open), chunk_start, &segments, cfg());
        assert_eq!(plan.new_dialogues.len(), 1);
        assert!(plan.extend_existing_to.is_none());
    }

    #[test]
    fn max_duration_splits_continuous_speech() {
        // Dialogue open since t0 with speech up to t0+110s; a segment ending
        // at t0+130s would exceed 120 s and must open a new dialogue.
        let open = open_at(0, 110);
        let chunk_start = t0() + Duration::seconds(120);
        let segments = to_absolute(chunk_start, &spans(&[(0, 10000), (10000, 20000)]));
        let plan = stitch(Some(open), chunk_start, &segments, cfg());

        // First segment ends at t0+130s: over the limit, new dialogue.
        // Second segment ends at t0+140s: still within the new dialogue.
        assert_eq!(
            plan.new_dialogues,
            vec![NewDialogue {
                start_ts: t0() + Duration::seconds(120),
                end_ts: t0() + Duration::seconds(140),
            }]
        );
        assert!(plan.extend_existing_to.is_none());
        assert_eq!(
            plan.state,
            StateChange::Set {
                dialogue: DialogueRef::New(0),
                started_at: t0() + Duration::seconds(120),
                last_speech_end: t0() + Duration::seconds(140),
            }
        );
    }

    #[test]
    fn silent_chunk_closes_stale_dialogue() {
        let open = open_at(0, 10);
        // Next chunk starts 30 s after the last speech ended.
        let chunk_start = t0() + Duration::seconds(40);
        let plan = stitch(Some(open), chunk_start, &[], cfg());

        assert!(plan.new_dialogues.is_empty());
        assert!(plan.links.is_empty());
        assert_eq!(plan.state, StateChange::Clear);
    }

    #[test]
    fn silent_chunk_keeps_recent_dialogue_open() {
        let open = open_at(0, 10);
        let chunk_start = t0() + Duration::seconds(15);
        let plan = stitch(Some(open), chunk_start, &[], cfg());
        assert_eq!(plan.state, StateChange::Keep);
    }

    #[test]
    fn gap_within_one_chunk_splits_dialogues() {
        let segments = to_absolute(t0(), &spans(&[(0, 2000), (20000, 22000)]));
        let plan = stitch(None, t0(), &segments, cfg());

        assert_eq!(plan.new_dialogues.len(), 2);
        assert_eq!(plan.links[0].0, DialogueRef::New(0));
        assert_eq!(plan.links[1].0, DialogueRef::New(1));
        assert_eq!(
            plan.state,
            StateChange::Set {
                dialogue: DialogueRef::New(1),
                started_at: t0() + Duration::seconds(20),
                last_speech_end: t0() + Duration::seconds(22),
            }
        );
    }

    #[test]
    fn to_absolute_sorts_spans() {
        let segments = to_absolute(t0(), &spans(&[(6000, 9000), (1000, 5000)]));
        assert_eq!(segments[0].span.start_ms, 1000);
        assert_eq!(segments[1].span.start_ms, 6000);
        assert_eq!(segments[0].start_abs, t0() + Duration::seconds(1));
        assert_eq!(segments[1].end_abs, t0() + Duration::seconds(9));
    }
}
