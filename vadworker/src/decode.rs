use std::io::Cursor;

use anyhow::{anyhow, bail, Context, Result};
use ogg::PacketReader;
use opus::{Channels, Decoder};

use crate::vad::VAD_SAMPLE_RATE;

/// Opus packets carry at most 120 ms of audio.
const MAX_FRAME_SAMPLES: usize = (VAD_SAMPLE_RATE as usize * 120) / 1000;

/// Decode an OGG/Opus chunk file to 16 kHz mono PCM. libopus resamples to
/// the requested rate internally, so any upload sample rate lands on the
/// VAD rate here.
pub fn decode_ogg_opus(data: &[u8]) -> Result<Vec<i16>> {
    let mut reader = PacketReader::new(Cursor::new(data));
    let mut decoder =
        Decoder::new(VAD_SAMPLE_RATE, Channels::Mono).context("opus decoder init failed")?;

    let mut pcm = Vec::new();
    let mut buf = vec![0i16; MAX_FRAME_SAMPLES];
    let mut saw_head = false;
    let mut saw_tags = false;

    loop {
        let packet = match reader.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => break,
            Err(e) => return Err(anyhow!("ogg parse error: {e}")),
        };
        let data = packet.data;
        if !saw_head {
            if !data.starts_with(b"OpusHead") {
                bail!("not an ogg/opus stream");
            }
            saw_head = true;
            continue;
        }
        if !saw_tags {
            // OpusTags page, nothing to decode.
            saw_tags = true;
            continue;
        }
        if data.is_empty() {
            continue;
        }
        let samples = decoder
            .decode(&data, &mut buf, false)
            .context("opus decode failed")?;
        pcm.extend_from_slice(&buf[..samples]);
    }

    if !saw_head {
        bail!("empty ogg stream");
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected() {
        assert!(decode_ogg_opus(&[]).is_err());
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(decode_ogg_opus(b"definitely not an ogg container").is_err());
    }
}
