//! Artwork resolution for the foreground surface.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use super::error::SessionError;
use crate::engine::Artwork;

/// Resolves artwork references into engine artwork.
///
/// A reference with a scheme (`https://...`) is passed through for the engine
/// to load. Anything else names a bundled asset under the asset root and is
/// read eagerly.
#[derive(Debug, Clone)]
pub struct ArtworkLoader {
    asset_root: PathBuf,
}

impl ArtworkLoader {
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
        }
    }

    #[must_use]
    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Resolves one reference.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ResourceLoadFailure` if the asset escapes the
    /// asset root or cannot be read.
    pub fn resolve(&self, reference: &str) -> Result<Artwork, SessionError> {
        if is_scheme_qualified(reference) {
            return Ok(Artwork::Uri(reference.to_string()));
        }

        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.is_empty() || escapes {
            return Err(SessionError::ResourceLoadFailure(format!(
                "asset outside of {}: {}",
                self.asset_root.display(),
                reference
            )));
        }

        let path = self.asset_root.join(relative);
        std::fs::read(&path)
            .map(Artwork::Data)
            .map_err(|e| SessionError::ResourceLoadFailure(format!("{}: {}", path.display(), e)))
    }

    /// Resolves a reference, logging and dropping any failure.
    #[must_use]
    pub fn resolve_or_skip(&self, reference: Option<&str>) -> Option<Artwork> {
        let reference = reference?;
        match self.resolve(reference) {
            Ok(artwork) => Some(artwork),
            Err(e) => {
                warn!("Could not load the artwork source: {}", e);
                None
            }
        }
    }
}

impl Default for ArtworkLoader {
    fn default() -> Self {
        Self::new("public")
    }
}

/// Keeps the last resolved artwork until the reference changes.
///
/// Failures are remembered too, so a missing asset is reported once per
/// reference.
#[derive(Debug, Clone)]
pub struct CachedArtwork {
    loader: ArtworkLoader,
    resolved: Option<(Option<String>, Option<Artwork>)>,
}

impl CachedArtwork {
    pub fn new(loader: ArtworkLoader) -> Self {
        Self {
            loader,
            resolved: None,
        }
    }

    /// Resolves `reference`, reusing the previous result for the same one.
    pub fn resolve(&mut self, reference: Option<&str>) -> Option<Artwork> {
        if let Some((cached, artwork)) = &self.resolved {
            if cached.as_deref() == reference {
                return artwork.clone();
            }
        }

        let artwork = self.loader.resolve_or_skip(reference);
        self.resolved = Some((reference.map(str::to_string), artwork.clone()));
        artwork
    }
}

fn is_scheme_qualified(reference: &str) -> bool {
    match reference.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
