//! Track metadata and tag serialization
//!
//! The export formats each carry tags their own way:
//! - MP3: an ID3v2.3 tag prepended to the frame stream
//! - OGG: a Vorbis comment header packet inside the Ogg stream
//! - FLAC: VORBIS_COMMENT and PICTURE metadata blocks after STREAMINFO
//!
//! All three are small fixed layouts, built here byte by byte. Missing
//! fields are simply omitted; an empty tag set produces no tag at all.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::{OfflineError, OfflineResult};

/// Vendor string written into Vorbis comment headers
pub const VENDOR_STRING: &str = "WarpShift";

/// Metadata subset carried through an export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub track: Option<String>,
    pub bpm: Option<String>,
    pub key: Option<String>,
}

impl TrackTags {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Present fields as (vorbis comment key, value) pairs
    fn fields(&self) -> Vec<(&'static str, &str)> {
        fn push<'a>(
            fields: &mut Vec<(&'static str, &'a str)>,
            key: &'static str,
            value: &'a Option<String>,
        ) {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                fields.push((key, value));
            }
        }

        let mut fields = Vec::new();
        push(&mut fields, "TITLE", &self.title);
        push(&mut fields, "ARTIST", &self.artist);
        push(&mut fields, "ALBUM", &self.album);
        push(&mut fields, "GENRE", &self.genre);
        push(&mut fields, "DATE", &self.date);
        push(&mut fields, "COMMENT", &self.comment);
        push(&mut fields, "TRACKNUMBER", &self.track);
        push(&mut fields, "BPM", &self.bpm);
        push(&mut fields, "KEY", &self.key);
        fields
    }
}

/// Embedded cover image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverArt {
    /// MIME type, e.g. `image/jpeg`
    pub media_type: String,
    pub data: Vec<u8>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ID3v2.3 (MP3)
// ═══════════════════════════════════════════════════════════════════════════════

/// Serialize an ID3v2.3 tag, or `None` when there is nothing to embed.
///
/// Text frames use UTF-16 with BOM; frame sizes are plain big-endian
/// (only the tag header size is syncsafe in v2.3).
pub fn id3v2_tag(tags: &TrackTags, cover: Option<&CoverArt>) -> Option<Vec<u8>> {
    let mut frames = Vec::new();

    let text_ids: [(&[u8; 4], &Option<String>); 8] = [
        (b"TIT2", &tags.title),
        (b"TPE1", &tags.artist),
        (b"TALB", &tags.album),
        (b"TCON", &tags.genre),
        (b"TYER", &tags.date),
        (b"TRCK", &tags.track),
        (b"TBPM", &tags.bpm),
        (b"TKEY", &tags.key),
    ];
    for (id, value) in text_ids {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            frames.extend(id3_text_frame(id, value));
        }
    }
    if let Some(comment) = tags.comment.as_deref().filter(|v| !v.is_empty()) {
        frames.extend(id3_comment_frame(comment));
    }
    if let Some(cover) = cover {
        frames.extend(id3_apic_frame(cover));
    }

    if frames.is_empty() {
        return None;
    }

    let mut tag = Vec::with_capacity(10 + frames.len());
    tag.extend_from_slice(b"ID3");
    tag.extend_from_slice(&[0x03, 0x00, 0x00]);
    tag.extend_from_slice(&syncsafe(frames.len() as u32));
    tag.extend(frames);
    Some(tag)
}

fn id3_frame(id: &[u8; 4], body: Vec<u8>) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10 + body.len());
    frame.extend_from_slice(id);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend(body);
    frame
}

fn id3_text_frame(id: &[u8; 4], text: &str) -> Vec<u8> {
    // Encoding 0x01: UTF-16 with BOM (little-endian)
    let mut body = vec![0x01, 0xFF, 0xFE];
    for unit in text.encode_utf16() {
        body.extend_from_slice(&unit.to_le_bytes());
    }
    id3_frame(id, body)
}

fn id3_comment_frame(text: &str) -> Vec<u8> {
    let mut body = vec![0x01];
    body.extend_from_slice(b"eng");
    // Empty UTF-16 description: BOM plus terminator
    body.extend_from_slice(&[0xFF, 0xFE, 0x00, 0x00]);
    body.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        body.extend_from_slice(&unit.to_le_bytes());
    }
    id3_frame(b"COMM", body)
}

fn id3_apic_frame(cover: &CoverArt) -> Vec<u8> {
    let mut body = vec![0x00];
    body.extend_from_slice(cover.media_type.as_bytes());
    body.push(0x00);
    body.push(0x03); // picture type: front cover
    body.push(0x00); // empty description
    body.extend_from_slice(&cover.data);
    id3_frame(b"APIC", body)
}

/// 28-bit syncsafe integer, 7 bits per byte
fn syncsafe(n: u32) -> [u8; 4] {
    [
        (n >> 21) as u8 & 0x7F,
        (n >> 14) as u8 & 0x7F,
        (n >> 7) as u8 & 0x7F,
        n as u8 & 0x7F,
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// VORBIS COMMENT (OGG + FLAC)
// ═══════════════════════════════════════════════════════════════════════════════

/// Comment dictionary body: vendor string plus KEY=value entries, all
/// lengths little-endian. Shared verbatim between the Ogg comment header
/// packet and the FLAC VORBIS_COMMENT block.
fn vorbis_comment_body(tags: &TrackTags, cover: Option<&CoverArt>) -> Vec<u8> {
    let mut entries: Vec<Vec<u8>> = tags
        .fields()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}").into_bytes())
        .collect();
    if let Some(cover) = cover {
        let encoded = BASE64.encode(picture_block_body(cover));
        entries.push(format!("METADATA_BLOCK_PICTURE={encoded}").into_bytes());
    }

    let mut body = Vec::new();
    body.extend_from_slice(&(VENDOR_STRING.len() as u32).to_le_bytes());
    body.extend_from_slice(VENDOR_STRING.as_bytes());
    body.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend(entry);
    }
    body
}

/// Complete Vorbis comment header packet (type 3) for an Ogg stream
pub fn vorbis_comment_packet(tags: &TrackTags, cover: Option<&CoverArt>) -> Vec<u8> {
    let mut packet = vec![0x03];
    packet.extend_from_slice(b"vorbis");
    packet.extend(vorbis_comment_body(tags, cover));
    packet.push(0x01); // framing bit
    packet
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLAC METADATA BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

const FLAC_BLOCK_VORBIS_COMMENT: u8 = 4;
const FLAC_BLOCK_PICTURE: u8 = 6;

/// PICTURE block body (big-endian lengths). Also the payload behind the
/// base64 METADATA_BLOCK_PICTURE comment entry.
pub fn picture_block_body(cover: &CoverArt) -> Vec<u8> {
    let mut body = Vec::with_capacity(32 + cover.media_type.len() + cover.data.len());
    body.extend_from_slice(&3u32.to_be_bytes()); // front cover
    body.extend_from_slice(&(cover.media_type.len() as u32).to_be_bytes());
    body.extend_from_slice(cover.media_type.as_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // empty description
    body.extend_from_slice(&0u32.to_be_bytes()); // width unknown
    body.extend_from_slice(&0u32.to_be_bytes()); // height unknown
    body.extend_from_slice(&0u32.to_be_bytes()); // depth unknown
    body.extend_from_slice(&0u32.to_be_bytes()); // not indexed
    body.extend_from_slice(&(cover.data.len() as u32).to_be_bytes());
    body.extend_from_slice(&cover.data);
    body
}

/// Splice tag blocks into an encoded FLAC stream.
///
/// The block list is rewritten as STREAMINFO, VORBIS_COMMENT, PICTURE
/// (if any), then the remaining original blocks; any encoder-written
/// comment or picture block is replaced. Audio frames pass through
/// untouched.
pub fn embed_flac_metadata(
    flac: &[u8],
    tags: &TrackTags,
    cover: Option<&CoverArt>,
) -> OfflineResult<Vec<u8>> {
    if tags.is_empty() && cover.is_none() {
        return Ok(flac.to_vec());
    }
    if flac.len() < 4 || &flac[..4] != b"fLaC" {
        return Err(OfflineError::Encode("not a FLAC stream".to_string()));
    }

    // Walk the metadata block chain
    let mut blocks: Vec<(u8, &[u8])> = Vec::new();
    let mut pos = 4;
    loop {
        if pos + 4 > flac.len() {
            return Err(OfflineError::Encode("truncated FLAC metadata".to_string()));
        }
        let last = flac[pos] & 0x80 != 0;
        let block_type = flac[pos] & 0x7F;
        let len =
            u32::from_be_bytes([0, flac[pos + 1], flac[pos + 2], flac[pos + 3]]) as usize;
        if pos + 4 + len > flac.len() {
            return Err(OfflineError::Encode("truncated FLAC block".to_string()));
        }
        blocks.push((block_type, &flac[pos + 4..pos + 4 + len]));
        pos += 4 + len;
        if last {
            break;
        }
    }
    let audio = &flac[pos..];

    let comment_block = vorbis_comment_body(tags, None);
    let picture_block = cover.map(picture_block_body);

    let mut ordered: Vec<(u8, Vec<u8>)> = Vec::new();
    // STREAMINFO must stay first
    for (block_type, body) in &blocks {
        if *block_type == 0 {
            ordered.push((*block_type, body.to_vec()));
        }
    }
    ordered.push((FLAC_BLOCK_VORBIS_COMMENT, comment_block));
    if let Some(picture) = picture_block {
        ordered.push((FLAC_BLOCK_PICTURE, picture));
    }
    for (block_type, body) in &blocks {
        if !matches!(
            *block_type,
            0 | FLAC_BLOCK_VORBIS_COMMENT | FLAC_BLOCK_PICTURE
        ) {
            ordered.push((*block_type, body.to_vec()));
        }
    }

    let mut out = Vec::with_capacity(flac.len() + 256);
    out.extend_from_slice(b"fLaC");
    let count = ordered.len();
    for (idx, (block_type, body)) in ordered.into_iter().enumerate() {
        let last_flag = if idx + 1 == count { 0x80 } else { 0x00 };
        out.push(last_flag | block_type);
        out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        out.extend(body);
    }
    out.extend_from_slice(audio);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tags() -> TrackTags {
        TrackTags {
            title: Some("Night Drive".to_string()),
            artist: Some("Test Artist".to_string()),
            bpm: Some("128".to_string()),
            ..Default::default()
        }
    }

    fn sample_cover() -> CoverArt {
        CoverArt {
            media_type: "image/png".to_string(),
            data: vec![0x89, 0x50, 0x4E, 0x47],
        }
    }

    #[test]
    fn test_empty_tags_produce_no_id3() {
        assert!(id3v2_tag(&TrackTags::default(), None).is_none());
    }

    #[test]
    fn test_present_fields_collected_in_order() {
        let tags = TrackTags {
            title: Some("A".to_string()),
            genre: Some(String::new()), // empty values are skipped
            key: Some("Am".to_string()),
            ..Default::default()
        };
        assert!(!tags.is_empty());
        assert_eq!(tags.fields(), vec![("TITLE", "A"), ("KEY", "Am")]);
    }

    #[test]
    fn test_id3_header_and_size() {
        let tag = id3v2_tag(&sample_tags(), Some(&sample_cover())).unwrap();
        assert_eq!(&tag[..3], b"ID3");
        assert_eq!(tag[3], 0x03);

        let size = ((tag[6] as usize) << 21)
            | ((tag[7] as usize) << 14)
            | ((tag[8] as usize) << 7)
            | tag[9] as usize;
        assert_eq!(size, tag.len() - 10);
    }

    #[test]
    fn test_id3_contains_expected_frames() {
        let tag = id3v2_tag(&sample_tags(), Some(&sample_cover())).unwrap();
        for frame in [&b"TIT2"[..], b"TPE1", b"TBPM", b"APIC"] {
            assert!(
                tag.windows(4).any(|w| w == frame),
                "missing frame {}",
                String::from_utf8_lossy(frame)
            );
        }
        assert!(!tag.windows(4).any(|w| w == b"TALB"));
    }

    #[test]
    fn test_syncsafe_high_bits_clear() {
        for byte in syncsafe(u32::MAX) {
            assert_eq!(byte & 0x80, 0);
        }
    }

    #[test]
    fn test_vorbis_comment_packet_layout() {
        let packet = vorbis_comment_packet(&sample_tags(), None);
        assert_eq!(packet[0], 0x03);
        assert_eq!(&packet[1..7], b"vorbis");
        assert_eq!(*packet.last().unwrap(), 0x01);

        let vendor_len =
            u32::from_le_bytes([packet[7], packet[8], packet[9], packet[10]]) as usize;
        assert_eq!(vendor_len, VENDOR_STRING.len());
    }

    #[test]
    fn test_vorbis_comment_entry_count() {
        let packet = vorbis_comment_packet(&sample_tags(), Some(&sample_cover()));
        let offset = 7 + 4 + VENDOR_STRING.len();
        let count = u32::from_le_bytes([
            packet[offset],
            packet[offset + 1],
            packet[offset + 2],
            packet[offset + 3],
        ]);
        // Three tag fields plus the picture entry
        assert_eq!(count, 4);
    }

    #[test]
    fn test_flac_splice_inserts_comment() {
        // fLaC + STREAMINFO (last-flag set, 4 byte stub) + fake audio
        let mut flac = b"fLaC".to_vec();
        flac.extend_from_slice(&[0x80, 0x00, 0x00, 0x04]);
        flac.extend_from_slice(&[1, 2, 3, 4]);
        flac.extend_from_slice(&[0xFF, 0xF8, 0xAA, 0xBB]);

        let out = embed_flac_metadata(&flac, &sample_tags(), Some(&sample_cover())).unwrap();
        assert_eq!(&out[..4], b"fLaC");
        // STREAMINFO no longer last
        assert_eq!(out[4], 0x00);
        // Comment block follows
        assert_eq!(out[12] & 0x7F, FLAC_BLOCK_VORBIS_COMMENT);
        // Audio frames preserved at the tail
        assert_eq!(&out[out.len() - 4..], &[0xFF, 0xF8, 0xAA, 0xBB]);
    }

    #[test]
    fn test_flac_splice_noop_without_tags() {
        let flac = b"fLaC\x80\x00\x00\x01\x00audio".to_vec();
        let out = embed_flac_metadata(&flac, &TrackTags::default(), None).unwrap();
        assert_eq!(out, flac);
    }

    #[test]
    fn test_flac_splice_rejects_garbage() {
        assert!(embed_flac_metadata(b"RIFF", &sample_tags(), None).is_err());
    }
}
