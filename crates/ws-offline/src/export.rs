//! Export orchestration
//!
//! An export captures a `RenderRequest` snapshot of the loaded track and
//! the configuration at the moment it starts, so parameter edits made
//! while the render runs cannot bleed into the output. Only one export
//! runs at a time; a second request is rejected, not queued.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use ws_core::{AudioBuffer, EffectConfig};

use crate::encoder::{ExportFormat, create_encoder};
use crate::error::{OfflineError, OfflineResult};
use crate::render::OfflineRenderer;
use crate::tags::{CoverArt, TrackTags};

/// Atomic snapshot of everything an export needs
#[derive(Clone)]
pub struct RenderRequest {
    pub source: Arc<AudioBuffer>,
    /// Original filename; the export name derives from its basename
    pub source_name: String,
    pub config: EffectConfig,
    pub reverse_active: bool,
    pub format: ExportFormat,
    /// Tags copied from the metadata-source track, if one was decoded
    pub tags: TrackTags,
    pub cover_art: Option<CoverArt>,
}

/// A finished export
pub struct ExportResult {
    pub data: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
}

/// Serializes exports; holds no other state
pub struct Exporter {
    in_flight: Mutex<()>,
}

impl Exporter {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(()),
        }
    }

    /// Render and encode a snapshot. Returns `ExportBusy` if another
    /// export is still running.
    pub fn export(&self, request: &RenderRequest) -> OfflineResult<ExportResult> {
        let _guard = self.in_flight.try_lock().ok_or(OfflineError::ExportBusy)?;

        log::info!(
            "Export started: '{}' as {:?}",
            request.source_name,
            request.format
        );

        let rendered =
            OfflineRenderer::render(request.source.clone(), &request.config, request.reverse_active)?;
        let encoder = create_encoder(request.format);
        let data = encoder.encode(&rendered, &request.tags, request.cover_art.as_ref())?;

        let filename = export_filename(&request.source_name, request.format);
        log::info!("Export finished: {} ({} bytes)", filename, data.len());

        Ok(ExportResult {
            data,
            filename,
            content_type: request.format.content_type(),
        })
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Suggested filename: `<original-basename>_pitchshift.<ext>`
pub fn export_filename(source_name: &str, format: ExportFormat) -> String {
    let basename = Path::new(source_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("track");
    format!("{}_pitchshift.{}", basename, format.extension())
}
