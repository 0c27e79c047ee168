// Font Manager - resolves the label font from an ordered list of candidate files,
// falling back to a DejaVuSans face compiled into the binary

use crate::core::errors::{RenderingError, RenderingResult};
use ab_glyph::{FontArc, FontVec};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
const EMBEDDED_FONT_NAME: &str = "embedded DejaVuSans";

/// Where a loaded font came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    File(PathBuf),
    Embedded,
}

/// A loaded, usable font and its origin
#[derive(Clone)]
pub struct FontHandle {
    pub font: FontArc,
    pub source: FontSource,
}

impl std::fmt::Debug for FontHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontHandle").field("source", &self.source).finish()
    }
}

/// Platform default candidates: macOS Helvetica, Linux DejaVuSans, Windows Arial
pub fn default_font_candidates() -> Vec<PathBuf> {
    [
        "/System/Library/Fonts/Helvetica.ttc",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Load a single font file. Collections (`.ttc`) use their first face.
pub fn load_font(path: &Path) -> RenderingResult<FontHandle> {
    let font_error = |reason: String| RenderingError::FontLoadError {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| font_error(e.to_string()))?;
    let font = FontVec::try_from_vec_and_index(bytes, 0).map_err(|e| font_error(e.to_string()))?;

    Ok(FontHandle {
        font: FontArc::new(font),
        source: FontSource::File(path.to_path_buf()),
    })
}

/// The font compiled into the binary
pub fn embedded_font() -> RenderingResult<FontHandle> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT).map_err(|e| RenderingError::FontLoadError {
        path: EMBEDDED_FONT_NAME.to_string(),
        reason: e.to_string(),
    })?;

    Ok(FontHandle {
        font,
        source: FontSource::Embedded,
    })
}

/// First usable font among `candidates`, in order, else the embedded font.
///
/// `None` only if the embedded font itself fails to parse; labels then get a
/// background without glyphs.
pub fn resolve_font(candidates: &[PathBuf]) -> Option<FontHandle> {
    for path in candidates {
        if !path.exists() {
            debug!("Font candidate not found: {}", path.display());
            continue;
        }

        match load_font(path) {
            Ok(handle) => {
                info!("✓ Label font: {}", path.display());
                return Some(handle);
            }
            Err(e) => warn!("Skipping font candidate: {}", e),
        }
    }

    match embedded_font() {
        Ok(handle) => {
            info!(
                "No usable font among {} candidates, using {}",
                candidates.len(),
                EMBEDDED_FONT_NAME
            );
            Some(handle)
        }
        Err(e) => {
            warn!("⚠ {}, labels will render without text", e);
            None
        }
    }
}
