//! Audio encoding
//!
//! Four export formats:
//! - WAV (via hound) — canonical 16-bit PCM, no metadata
//! - MP3 (via mp3lame-encoder) — chunked encode with bounded time slices,
//!   ID3v2.3 tag prepended
//! - OGG (via vorbis-encoder + ogg) — comment header rewritten in place
//! - FLAC (via flac-bound) — tag blocks spliced after STREAMINFO
//!
//! Every encoder takes a finished PCM buffer and returns a complete byte
//! stream; on failure nothing is returned, never partial output.

use std::io::Cursor;
use std::time::Instant;

use ws_core::AudioBuffer;

use crate::error::{OfflineError, OfflineResult};
use crate::tags::{self, CoverArt, TrackTags};

/// MP3 encode yields the thread after roughly this long
const ENCODE_SLICE_MS: u128 = 15;
/// Frames per MP3 encode block (multiple of the 1152-frame MP3 granule)
const MP3_BLOCK_FRAMES: usize = 1152 * 8;
/// Vorbis quality in -0.1..=1.0
const OGG_QUALITY: f32 = 0.5;
/// FLAC block size for process_interleaved
const FLAC_BLOCK_FRAMES: usize = 4096;

// ═══════════════════════════════════════════════════════════════════════════════
// FORMAT SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Export container format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
            Self::Ogg => "audio/ogg",
            Self::Flac => "audio/flac",
        }
    }
}

/// Audio encoder trait
pub trait AudioEncoder {
    /// Encode a buffer, embedding whatever metadata the format supports
    fn encode(
        &self,
        buffer: &AudioBuffer,
        tags: &TrackTags,
        cover: Option<&CoverArt>,
    ) -> OfflineResult<Vec<u8>>;

    fn format(&self) -> ExportFormat;
}

/// Encoder for a format
pub fn create_encoder(format: ExportFormat) -> Box<dyn AudioEncoder> {
    match format {
        ExportFormat::Wav => Box::new(WavEncoder),
        ExportFormat::Mp3 => Box::new(Mp3Encoder::default()),
        ExportFormat::Ogg => Box::new(OggEncoder),
        ExportFormat::Flac => Box::new(FlacEncoder),
    }
}

fn to_i16(sample: f64) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

// ═══════════════════════════════════════════════════════════════════════════════
// WAV ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// 16-bit PCM WAV via hound; the canonical lossless intermediate
pub struct WavEncoder;

impl AudioEncoder for WavEncoder {
    fn encode(
        &self,
        buffer: &AudioBuffer,
        _tags: &TrackTags,
        _cover: Option<&CoverArt>,
    ) -> OfflineResult<Vec<u8>> {
        let mut output = Vec::new();
        let cursor = Cursor::new(&mut output);

        let spec = hound::WavSpec {
            channels: buffer.channels as u16,
            sample_rate: buffer.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::new(cursor, spec)
            .map_err(|e| OfflineError::Encode(e.to_string()))?;
        for &sample in &buffer.samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| OfflineError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| OfflineError::Encode(e.to_string()))?;

        Ok(output)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Wav
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MP3 ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Native LAME MP3 encoder.
///
/// Long buffers are encoded in fixed-size blocks; after each block the
/// elapsed time is checked and the thread yields once the slice budget is
/// spent, so a multi-minute encode never hogs its thread uninterrupted.
pub struct Mp3Encoder {
    bitrate: mp3lame_encoder::Bitrate,
}

impl Default for Mp3Encoder {
    fn default() -> Self {
        Self {
            bitrate: mp3lame_encoder::Bitrate::Kbps192,
        }
    }
}

impl AudioEncoder for Mp3Encoder {
    fn encode(
        &self,
        buffer: &AudioBuffer,
        tags: &TrackTags,
        cover: Option<&CoverArt>,
    ) -> OfflineResult<Vec<u8>> {
        use mp3lame_encoder::{Builder, DualPcm, FlushNoGap};

        let mut builder = Builder::new()
            .ok_or_else(|| OfflineError::Encode("LAME init failed".to_string()))?;
        builder
            .set_num_channels(buffer.channels.min(2) as u8)
            .map_err(|e| OfflineError::Encode(format!("LAME channels: {:?}", e)))?;
        builder
            .set_sample_rate(buffer.sample_rate)
            .map_err(|e| OfflineError::Encode(format!("LAME sample rate: {:?}", e)))?;
        builder
            .set_brate(self.bitrate)
            .map_err(|e| OfflineError::Encode(format!("LAME bitrate: {:?}", e)))?;
        builder
            .set_quality(mp3lame_encoder::Quality::Best)
            .map_err(|e| OfflineError::Encode(format!("LAME quality: {:?}", e)))?;
        let mut encoder = builder
            .build()
            .map_err(|e| OfflineError::Encode(format!("LAME build: {:?}", e)))?;

        // Deinterleave to 16-bit L/R (mono duplicates into both)
        let frames = buffer.frames();
        let mut left: Vec<i16> = Vec::with_capacity(frames);
        let mut right: Vec<i16> = Vec::with_capacity(frames);
        if buffer.channels >= 2 {
            for frame in buffer.samples.chunks_exact(buffer.channels) {
                left.push(to_i16(frame[0]));
                right.push(to_i16(frame[1]));
            }
        } else {
            for &sample in &buffer.samples {
                let s = to_i16(sample);
                left.push(s);
                right.push(s);
            }
        }

        let mut output = tags::id3v2_tag(tags, cover).unwrap_or_default();
        let mut slice_start = Instant::now();

        for block_start in (0..frames).step_by(MP3_BLOCK_FRAMES) {
            let block_end = (block_start + MP3_BLOCK_FRAMES).min(frames);
            let input = DualPcm {
                left: &left[block_start..block_end],
                right: &right[block_start..block_end],
            };

            output.reserve(mp3lame_encoder::max_required_buffer_size(
                block_end - block_start,
            ));
            let written = encoder
                .encode(input, output.spare_capacity_mut())
                .map_err(|e| OfflineError::Encode(format!("LAME encode: {:?}", e)))?;
            // SAFETY: encoder wrote `written` bytes into spare capacity
            unsafe {
                output.set_len(output.len() + written);
            }

            if slice_start.elapsed().as_millis() >= ENCODE_SLICE_MS {
                std::thread::yield_now();
                slice_start = Instant::now();
            }
        }

        output.reserve(7200);
        let flushed = encoder
            .flush::<FlushNoGap>(output.spare_capacity_mut())
            .map_err(|e| OfflineError::Encode(format!("LAME flush: {:?}", e)))?;
        // SAFETY: encoder wrote `flushed` bytes into spare capacity
        unsafe {
            output.set_len(output.len() + flushed);
        }

        Ok(output)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Mp3
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OGG ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Native OGG Vorbis encoder.
///
/// libvorbis writes its own (empty) comment header; when there are tags
/// to embed the stream is remuxed once, replacing that second packet with
/// a comment packet carrying the tag dictionary and cover art.
pub struct OggEncoder;

impl AudioEncoder for OggEncoder {
    fn encode(
        &self,
        buffer: &AudioBuffer,
        tags: &TrackTags,
        cover: Option<&CoverArt>,
    ) -> OfflineResult<Vec<u8>> {
        use vorbis_encoder::Encoder;

        let mut encoder = Encoder::new(
            buffer.channels as u32,
            buffer.sample_rate as u64,
            OGG_QUALITY,
        )
        .map_err(|e| OfflineError::Encode(format!("Vorbis init: {}", e)))?;

        let samples_i16: Vec<i16> = buffer.samples.iter().map(|&s| to_i16(s)).collect();

        let mut ogg_data = encoder
            .encode(&samples_i16)
            .map_err(|e| OfflineError::Encode(format!("Vorbis encode: {}", e)))?;
        let flushed = encoder
            .flush()
            .map_err(|e| OfflineError::Encode(format!("Vorbis flush: {}", e)))?;
        ogg_data.extend(flushed);

        if tags.is_empty() && cover.is_none() {
            return Ok(ogg_data);
        }
        inject_ogg_comments(&ogg_data, tags::vorbis_comment_packet(tags, cover))
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Ogg
    }
}

/// Remux an Ogg Vorbis stream with the given comment header packet in
/// place of the original second packet. Page boundaries and granule
/// positions are carried over from the source stream.
fn inject_ogg_comments(ogg_data: &[u8], comment_packet: Vec<u8>) -> OfflineResult<Vec<u8>> {
    use ogg::reading::PacketReader;
    use ogg::writing::{PacketWriter, PacketWriteEndInfo};

    let mut reader = PacketReader::new(Cursor::new(ogg_data));
    let mut output = Vec::with_capacity(ogg_data.len() + comment_packet.len());
    let mut writer = PacketWriter::new(&mut output);

    let mut index = 0usize;
    loop {
        let packet = match reader
            .read_packet()
            .map_err(|e| OfflineError::Encode(format!("Ogg read: {:?}", e)))?
        {
            Some(packet) => packet,
            None => break,
        };

        let serial = packet.stream_serial();
        let granule = packet.absgp_page();
        let end_info = if packet.last_in_stream() {
            PacketWriteEndInfo::EndStream
        } else if packet.last_in_page() {
            PacketWriteEndInfo::EndPage
        } else {
            PacketWriteEndInfo::NormalPacket
        };

        let data = if index == 1 {
            comment_packet.clone()
        } else {
            packet.data
        };
        writer
            .write_packet(data, serial, end_info, granule)
            .map_err(|e| OfflineError::Encode(format!("Ogg write: {}", e)))?;
        index += 1;
    }
    drop(writer);

    if index < 3 {
        return Err(OfflineError::Encode("Ogg stream missing headers".to_string()));
    }
    Ok(output)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLAC ENCODER
// ═══════════════════════════════════════════════════════════════════════════════

/// FLAC encoder via flac-bound, tags spliced in after the encode
pub struct FlacEncoder;

impl AudioEncoder for FlacEncoder {
    fn encode(
        &self,
        buffer: &AudioBuffer,
        tags: &TrackTags,
        cover: Option<&CoverArt>,
    ) -> OfflineResult<Vec<u8>> {
        use flac_bound::{FlacEncoder as FlacEnc, WriteWrapper};

        let mut output = Vec::new();
        {
            let encoder_config = FlacEnc::new()
                .ok_or_else(|| OfflineError::Encode("FLAC init failed".to_string()))?
                .channels(buffer.channels as u32)
                .sample_rate(buffer.sample_rate)
                .bits_per_sample(16)
                .compression_level(5);

            let mut wrapper = WriteWrapper(&mut output);
            let mut encoder = encoder_config
                .init_write(&mut wrapper)
                .map_err(|e| OfflineError::Encode(format!("FLAC init write: {:?}", e)))?;

            let samples: Vec<i32> = buffer
                .samples
                .iter()
                .map(|&s| to_i16(s) as i32)
                .collect();

            let frames = buffer.frames();
            let channels = buffer.channels.max(1);
            for block_start in (0..frames).step_by(FLAC_BLOCK_FRAMES) {
                let block_end = (block_start + FLAC_BLOCK_FRAMES).min(frames);
                let block = &samples[block_start * channels..block_end * channels];
                encoder
                    .process_interleaved(block, (block_end - block_start) as u32)
                    .map_err(|e| OfflineError::Encode(format!("FLAC process: {:?}", e)))?;
            }

            encoder
                .finish()
                .map_err(|e| OfflineError::Encode(format!("FLAC finish: {:?}", e)))?;
        }

        tags::embed_flac_metadata(&output, tags, cover)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Flac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_buffer() -> AudioBuffer {
        let samples = (0..44100)
            .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 44100.0).sin() * 0.5)
            .collect();
        AudioBuffer::from_interleaved(samples, 1, 44100)
    }

    fn sample_tags() -> TrackTags {
        TrackTags {
            title: Some("Export Test".to_string()),
            artist: Some("WS".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_wav_magic_and_size() {
        let data = WavEncoder
            .encode(&tone_buffer(), &TrackTags::default(), None)
            .unwrap();
        assert_eq!(&data[..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
        // 44.1k frames of 16-bit mono plus headers
        assert!(data.len() > 44100 * 2);
    }

    #[test]
    fn test_mp3_tagged_output_starts_with_id3() {
        let data = Mp3Encoder::default()
            .encode(&tone_buffer(), &sample_tags(), None)
            .unwrap();
        assert_eq!(&data[..3], b"ID3");
    }

    #[test]
    fn test_mp3_untagged_output_has_no_id3() {
        let data = Mp3Encoder::default()
            .encode(&tone_buffer(), &TrackTags::default(), None)
            .unwrap();
        assert!(!data.is_empty());
        assert_ne!(&data[..3], b"ID3");
    }

    #[test]
    fn test_ogg_magic() {
        let data = OggEncoder
            .encode(&tone_buffer(), &sample_tags(), None)
            .unwrap();
        assert_eq!(&data[..4], b"OggS");
    }

    #[test]
    fn test_ogg_carries_vendor_string() {
        let data = OggEncoder
            .encode(&tone_buffer(), &sample_tags(), None)
            .unwrap();
        assert!(
            data.windows(crate::tags::VENDOR_STRING.len())
                .any(|w| w == crate::tags::VENDOR_STRING.as_bytes())
        );
    }

    #[test]
    fn test_flac_magic() {
        let data = FlacEncoder
            .encode(&tone_buffer(), &sample_tags(), None)
            .unwrap();
        assert_eq!(&data[..4], b"fLaC");
    }

    #[test]
    fn test_format_metadata() {
        for (format, ext, mime) in [
            (ExportFormat::Wav, "wav", "audio/wav"),
            (ExportFormat::Mp3, "mp3", "audio/mpeg"),
            (ExportFormat::Ogg, "ogg", "audio/ogg"),
            (ExportFormat::Flac, "flac", "audio/flac"),
        ] {
            assert_eq!(format.extension(), ext);
            assert_eq!(format.content_type(), mime);
            assert_eq!(create_encoder(format).format(), format);
        }
    }
}
