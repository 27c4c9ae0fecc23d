use anyhow::{anyhow, Result};
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// The classifier operates on 16 kHz mono PCM regardless of upload rate.
pub const VAD_SAMPLE_RATE: u32 = 16_000;

const MIN_SPEECH_FRAMES: usize = 3;
const SILENCE_WITHIN_SEGMENT_MS: u32 = 300;
const MIN_SEGMENT_MS: u32 = 200;

/// A speech interval within one chunk, milliseconds from the chunk start,
/// aligned to frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    pub start_ms: i32,
    pub end_ms: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct VadParams {
    pub aggressiveness: u8,
    pub frame_ms: u32,
    /// Speech frames needed before a candidate segment commits.
    pub min_speech_frames: usize,
    /// Silence tolerated inside an open segment before it closes.
    pub silence_within_segment_ms: u32,
    /// Committed segments shorter than this are dropped.
    pub min_segment_ms: u32,
}

impl VadParams {
    pub fn new(aggressiveness: u8, frame_ms: u32) -> Self {
        Self {
            aggressiveness,
            frame_ms,
            min_speech_frames: MIN_SPEECH_FRAMES,
            silence_within_segment_ms: SILENCE_WITHIN_SEGMENT_MS,
            min_segment_ms: MIN_SEGMENT_MS,
        }
    }
}

fn profile(aggressiveness: u8) -> VoiceActivityProfile {
    match aggressiveness {
        0 => VoiceActivityProfile::QUALITY,
        1 => VoiceActivityProfile::LBR,
        2 => VoiceActivityProfile::AGGRESSIVE,
        _ => VoiceActivityProfile::VERY_AGGRESSIVE,
    }
}

/// Classify each full frame of the PCM stream as speech or not. A trailing
/// partial frame is ignored.
pub fn detect_speech_frames(pcm: &[i16], params: &VadParams) -> Result<Vec<bool>> {
    let frame_len = (VAD_SAMPLE_RATE as usize * params.frame_ms as usize) / 1000;
    let mut vad = VoiceActivityDetector::new(profile(params.aggressiveness));
    let mut flags = Vec::with_capacity(pcm.len() / frame_len.max(1));
    for frame in pcm.chunks_exact(frame_len) {
        let is_speech = vad
            .predict_16khz(frame)
            .map_err(|e| anyhow!("vad predict failed: {e:?}"))?;
        flags.push(is_speech);
    }
    Ok(flags)
}

/// Smooth per-frame flags into segments with onset/offset hysteresis.
///
/// A segment opens once `min_speech_frames` consecutive speech frames
/// accumulate and is backdated to the first of them. Silence inside a
/// segment is tolerated up to `silence_within_segment_ms`; the close is
/// backdated to the end of the last speech frame so silence padding never
/// lands in the segment, including at end of audio.
pub fn frames_to_segments(flags: &[bool], params: &VadParams) -> Vec<SegmentSpan> {
    let frame_ms = params.frame_ms as usize;
    let min_speech = params.min_speech_frames.max(1);
    let min_silence = ((params.silence_within_segment_ms as usize) / frame_ms).max(1);

    let mut segments = Vec::new();
    let mut in_speech = false;
    let mut seg_start_frame = 0usize;
    let mut run_speech = 0usize;
    let mut run_silence = 0usize;

    let push = |segments: &mut Vec<SegmentSpan>, start_frame: usize, end_frame: usize| {
        let start_ms = (start_frame * frame_ms) as i32;
        let end_ms = (end_frame * frame_ms) as i32;
        if end_ms - start_ms >= params.min_segment_ms as i32 {
            segments.push(SegmentSpan { start_ms, end_ms });
        }
    };

    for (i, &is_speech) in flags.iter().enumerate() {
        if !in_speech {
            if is_speech {
                run_speech += 1;
                if run_speech >= min_speech {
                    in_speech = true;
                    seg_start_frame = i + 1 - run_speech;
                    run_silence = 0;
                }
            } else {
                run_speech = 0;
            }
        } else if is_speech {
            run_silence = 0;
        } else {
            run_silence += 1;
            if run_silence >= min_silence {
                push(&mut segments, seg_start_frame, i + 1 - run_silence);
                in_speech = false;
                run_speech = 0;
            }
        }
    }

    if in_speech {
        push(&mut segments, seg_start_frame, flags.len() - run_silence);
    }

    segments
}

pub fn run_vad(pcm: &[i16], params: &VadParams) -> Result<Vec<SegmentSpan>> {
    let flags = detect_speech_frames(pcm, params)?;
    Ok(frames_to_segments(&flags, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> VadParams {
        VadParams::new(2, 30)
    }

    fn flags(spec: &[(bool, usize)]) -> Vec<bool> {
        let mut out = Vec::new();
        for &(value, count) in spec {
            out.extend(std::iter::repeat(value).take(count));
        }
        out
    }

    #[test]
    fn continuous_speech_is_one_segment() {
        let segments = frames_to_segments(&flags(&[(true, 10)]), &params());
        assert_eq!(segments, vec![SegmentSpan { start_ms: 0, end_ms: 300 }]);
    }

    #[test]
    fn isolated_blips_are_ignored() {
        // Two speech frames, below the three-frame onset threshold.
        let segments = frames_to_segments(&flags(&[(false, 5), (true, 2), (false, 20)]), &params());
        assert!(segments.is_empty());
    }

    #[test]
    fn short_silence_stays_inside_segment() {
        // 300 ms tolerance at 30 ms frames is 10 frames; 5 silence frames
        // must not split the segment.
        let segments =
            frames_to_segments(&flags(&[(true, 7), (false, 5), (true, 7)]), &params());
        assert_eq!(segments, vec![SegmentSpan { start_ms: 0, end_ms: 570 }]);
    }

    #[test]
    fn long_silence_splits_and_trims_padding() {
        let segments =
            frames_to_segments(&flags(&[(true, 7), (false, 12), (true, 7)]), &params());
        assert_eq!(
            segments,
            vec![
                SegmentSpan { start_ms: 0, end_ms: 210 },
                SegmentSpan { start_ms: 570, end_ms: 780 },
            ]
        );
    }

    #[test]
    fn onset_is_backdated_to_first_speech_frame() {
        let segments = frames_to_segments(&flags(&[(false, 4), (true, 8)]), &params());
        assert_eq!(segments, vec![SegmentSpan { start_ms: 120, end_ms: 360 }]);
    }

    #[test]
    fn trailing_silence_is_trimmed_at_end_of_audio() {
        // Segment still open at EOF with 4 pending silence frames; the close
        // backdates to the last speech frame.
        let segments = frames_to_segments(&flags(&[(true, 7), (false, 4)]), &params());
        assert_eq!(segments, vec![SegmentSpan { start_ms: 0, end_ms: 210 }]);
    }

    #[test]
    fn sub_minimum_segments_are_dropped() {
        // Five frames is 150 ms, under the 200 ms floor.
        let segments = frames_to_segments(&flags(&[(true, 5), (false, 15)]), &params());
        assert!(segments.is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(frames_to_segments(&[], &params()).is_empty());
    }
}
