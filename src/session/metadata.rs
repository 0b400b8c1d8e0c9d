//! Display metadata owned by an audio source.

use std::time::Duration;

use tracing::debug;

use super::task::{Generations, PeriodicTask};
use crate::engine::{Artwork, MediaMetadata};
use crate::types::MetadataFields;

/// Invoked with the metadata after every change or explicit push.
pub type UpdateCallback = Box<dyn FnMut(&AudioMetadata) + Send>;

/// Album, artist, title and artwork reference of one source.
///
/// Strings default to empty. The update callback runs exactly once per
/// [`update`](Self::update) or [`push`](Self::push), however many fields
/// changed.
#[derive(Default)]
pub struct AudioMetadata {
    album_title: String,
    artist_name: String,
    song_title: String,
    artwork_source: Option<String>,
    update_callback: Option<UpdateCallback>,
    updater: Option<PeriodicTask>,
    updater_generation: u64,
    generations: Generations,
}

impl AudioMetadata {
    /// Creates metadata from the fields supplied at source creation.
    pub fn new(fields: &MetadataFields) -> Self {
        Self {
            album_title: fields.album_title.clone().unwrap_or_default(),
            artist_name: fields.artist_name.clone().unwrap_or_default(),
            song_title: fields.song_title.clone().unwrap_or_default(),
            artwork_source: fields.artwork_source.clone(),
            ..Self::default()
        }
    }

    /// Draws updater generations from a session-wide counter.
    #[must_use]
    pub fn with_generations(mut self, generations: Generations) -> Self {
        self.generations = generations;
        self
    }

    pub fn album_title(&self) -> &str {
        &self.album_title
    }

    pub fn artist_name(&self) -> &str {
        &self.artist_name
    }

    pub fn song_title(&self) -> &str {
        &self.song_title
    }

    pub fn artwork_source(&self) -> Option<&str> {
        self.artwork_source.as_deref()
    }

    /// Installs the callback invoked on change.
    pub fn set_update_callback(&mut self, callback: UpdateCallback) {
        self.update_callback = Some(callback);
    }

    /// Removes the update callback.
    pub fn clear_update_callback(&mut self) {
        self.update_callback = None;
    }

    /// Merges every supplied field, then notifies once.
    pub fn update(&mut self, fields: &MetadataFields) {
        if let Some(album_title) = &fields.album_title {
            self.album_title.clone_from(album_title);
        }
        if let Some(artist_name) = &fields.artist_name {
            self.artist_name.clone_from(artist_name);
        }
        if let Some(song_title) = &fields.song_title {
            self.song_title.clone_from(song_title);
        }
        if let Some(artwork_source) = &fields.artwork_source {
            self.artwork_source = Some(artwork_source.clone());
        }

        self.push();
    }

    /// Invokes the update callback without changing any field.
    pub fn push(&mut self) {
        if let Some(mut callback) = self.update_callback.take() {
            callback(self);
            // A callback installed during the call wins.
            if self.update_callback.is_none() {
                self.update_callback = Some(callback);
            }
        }
    }

    /// Starts the periodic updater. No-op while already running.
    ///
    /// `on_tick` receives the updater generation; see
    /// [`is_current_updater`](Self::is_current_updater).
    pub fn start_updater<F>(&mut self, period: Duration, on_tick: F)
    where
        F: Fn(u64) -> bool + Send + 'static,
    {
        if self.updater.is_some() {
            return;
        }

        self.updater_generation = self.generations.next();
        let generation = self.updater_generation;
        self.updater = Some(PeriodicTask::spawn(period, move || on_tick(generation)));
        debug!("Metadata updater started (generation {})", generation);
    }

    /// Stops the periodic updater. Idempotent.
    pub fn stop_updater(&mut self) {
        if let Some(task) = self.updater.take() {
            task.cancel();
            self.updater_generation = self.generations.next();
            debug!("Metadata updater stopped");
        }
    }

    #[must_use]
    pub fn is_updater_running(&self) -> bool {
        self.updater.is_some()
    }

    /// Returns true if a tick of `generation` belongs to the running updater.
    #[must_use]
    pub fn is_current_updater(&self, generation: u64) -> bool {
        self.updater.is_some() && self.updater_generation == generation
    }

    /// Current values as wire fields.
    #[must_use]
    pub fn to_fields(&self) -> MetadataFields {
        MetadataFields {
            album_title: Some(self.album_title.clone()),
            artist_name: Some(self.artist_name.clone()),
            song_title: Some(self.song_title.clone()),
            artwork_source: self.artwork_source.clone(),
        }
    }

    /// Builds the engine-facing metadata with already resolved artwork.
    #[must_use]
    pub fn to_media_metadata(&self, artwork: Option<Artwork>) -> MediaMetadata {
        MediaMetadata {
            title: self.song_title.clone(),
            artist: self.artist_name.clone(),
            album_title: self.album_title.clone(),
            artwork,
        }
    }
}

impl std::fmt::Debug for AudioMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMetadata")
            .field("album_title", &self.album_title)
            .field("artist_name", &self.artist_name)
            .field("song_title", &self.song_title)
            .field("artwork_source", &self.artwork_source)
            .field("updater_running", &self.updater.is_some())
            .finish_non_exhaustive()
    }
}
