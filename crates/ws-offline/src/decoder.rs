//! Audio decoding
//!
//! Uses symphonia to decode WAV, AIFF, MP3, and OGG Vorbis. Input is a
//! raw byte stream; the container is sniffed from content, never from a
//! file extension, so a mislabelled upload still decodes (or is rejected)
//! correctly. Embedded tags and cover art ride along with the samples.

use std::io::Cursor;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use ws_core::AudioBuffer;

use crate::error::{OfflineError, OfflineResult};
use crate::tags::{CoverArt, TrackTags};

/// A decoded source: samples plus whatever metadata the container carried
pub struct DecodedTrack {
    pub buffer: AudioBuffer,
    pub tags: TrackTags,
    pub cover_art: Option<CoverArt>,
}

/// Universal audio decoder
pub struct AudioDecoder;

impl AudioDecoder {
    /// Decode an in-memory byte stream, sniffing the container from content
    pub fn decode_bytes(data: Vec<u8>) -> OfflineResult<DecodedTrack> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

        // No extension hint: the probe identifies the container by content
        let mut probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| OfflineError::UnsupportedFormat(e.to_string()))?;

        let mut tags = TrackTags::default();
        let mut cover_art = None;
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                absorb_revision(revision, &mut tags, &mut cover_art);
            }
        }

        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            absorb_revision(revision, &mut tags, &mut cover_art);
        }

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| OfflineError::Decode("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| OfflineError::Decode(format!("decoder init: {}", e)))?;

        let mut samples: Vec<f64> = Vec::new();
        loop {
            match format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != track_id {
                        continue;
                    }
                    match decoder.decode(&packet) {
                        Ok(decoded) => append_samples(&decoded, channels, &mut samples),
                        // Skip corrupt packets, keep decoding
                        Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                        Err(e) => {
                            return Err(OfflineError::Decode(format!("decode: {}", e)));
                        }
                    }
                }
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    return Err(OfflineError::Decode(format!("packet read: {}", e)));
                }
            }
        }

        if samples.is_empty() {
            return Err(OfflineError::Decode("stream contained no samples".to_string()));
        }

        log::info!(
            "Decoded {} frames, {} ch @ {} Hz",
            samples.len() / channels.max(1),
            channels,
            sample_rate
        );

        Ok(DecodedTrack {
            buffer: AudioBuffer::from_interleaved(samples, channels, sample_rate),
            tags,
            cover_art,
        })
    }

    /// Decode a file from disk
    pub fn decode_file<P: AsRef<std::path::Path>>(path: P) -> OfflineResult<DecodedTrack> {
        Self::decode_bytes(std::fs::read(path)?)
    }
}

/// Merge one metadata revision into the collected tags; first value wins
fn absorb_revision(
    revision: &MetadataRevision,
    tags: &mut TrackTags,
    cover_art: &mut Option<CoverArt>,
) {
    fn fill(slot: &mut Option<String>, value: String) {
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value);
        }
    }

    for tag in revision.tags() {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => fill(&mut tags.title, value),
            Some(StandardTagKey::Artist) => fill(&mut tags.artist, value),
            Some(StandardTagKey::Album) => fill(&mut tags.album, value),
            Some(StandardTagKey::Genre) => fill(&mut tags.genre, value),
            Some(StandardTagKey::Date) => fill(&mut tags.date, value),
            Some(StandardTagKey::Comment) => fill(&mut tags.comment, value),
            Some(StandardTagKey::TrackNumber) => fill(&mut tags.track, value),
            Some(StandardTagKey::Bpm) => fill(&mut tags.bpm, value),
            _ => {
                // Musical key has no standard mapping; match the raw keys
                let key = tag.key.to_ascii_uppercase();
                if matches!(key.as_str(), "TKEY" | "KEY" | "INITIALKEY" | "INITIAL KEY") {
                    fill(&mut tags.key, value);
                }
            }
        }
    }

    for visual in revision.visuals() {
        if cover_art.is_none() {
            *cover_art = Some(CoverArt {
                media_type: visual.media_type.clone(),
                data: visual.data.to_vec(),
            });
        }
    }
}

/// Append one decoded packet, normalized to interleaved f64
fn append_samples(decoded: &AudioBufferRef, channels: usize, output: &mut Vec<f64>) {
    macro_rules! interleave {
        ($buf:expr, $convert:expr) => {{
            let planes = $buf.planes();
            let frames = $buf.frames();
            let plane_count = planes.planes().len();
            for frame in 0..frames {
                for ch in 0..channels.min(plane_count) {
                    output.push($convert(planes.planes()[ch][frame]));
                }
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => interleave!(buf, |s: f32| s as f64),
        AudioBufferRef::F64(buf) => interleave!(buf, |s: f64| s),
        AudioBufferRef::S8(buf) => interleave!(buf, |s: i8| s as f64 / 128.0),
        AudioBufferRef::S16(buf) => interleave!(buf, |s: i16| s as f64 / 32768.0),
        AudioBufferRef::S24(buf) => {
            interleave!(buf, |s: symphonia::core::sample::i24| s.inner() as f64
                / 8388608.0)
        }
        AudioBufferRef::S32(buf) => interleave!(buf, |s: i32| s as f64 / 2147483648.0),
        AudioBufferRef::U8(buf) => interleave!(buf, |s: u8| (s as f64 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => {
            interleave!(buf, |s: u16| (s as f64 - 32768.0) / 32768.0)
        }
        AudioBufferRef::U24(buf) => {
            interleave!(buf, |s: symphonia::core::sample::u24| (s.inner() as f64
                - 8388608.0)
                / 8388608.0)
        }
        AudioBufferRef::U32(buf) => {
            interleave!(buf, |s: u32| (s as f64 - 2147483648.0) / 2147483648.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[f64], channels: u16, sample_rate: u32) -> Vec<u8> {
        let mut data = Vec::new();
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(Cursor::new(&mut data), spec).unwrap();
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
        data
    }

    #[test]
    fn test_decode_wav_from_bytes() {
        let samples: Vec<f64> = (0..4410)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 44100.0).sin() * 0.5)
            .collect();
        let decoded = AudioDecoder::decode_bytes(wav_bytes(&samples, 1, 44100)).unwrap();

        assert_eq!(decoded.buffer.channels, 1);
        assert_eq!(decoded.buffer.sample_rate, 44100);
        assert_eq!(decoded.buffer.frames(), 4410);
        // 16-bit quantization error only
        for (a, b) in decoded.buffer.samples.iter().zip(&samples) {
            assert!((a - b).abs() <= 1.0 / 32767.0);
        }
    }

    #[test]
    fn test_decode_stereo_interleaving() {
        // L channel silent, R channel full scale
        let samples: Vec<f64> = (0..200)
            .flat_map(|_| [0.0, 0.9])
            .collect();
        let decoded = AudioDecoder::decode_bytes(wav_bytes(&samples, 2, 48000)).unwrap();

        assert_eq!(decoded.buffer.channels, 2);
        for frame in decoded.buffer.samples.chunks_exact(2) {
            assert!(frame[0].abs() < 1e-3);
            assert!((frame[1] - 0.9).abs() < 1e-3);
        }
    }

    #[test]
    fn test_garbage_rejected() {
        let garbage = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33];
        assert!(matches!(
            AudioDecoder::decode_bytes(garbage),
            Err(OfflineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(AudioDecoder::decode_bytes(Vec::new()).is_err());
    }
}
