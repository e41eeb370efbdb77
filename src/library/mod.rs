//! On-disk track and playlist formats, the loader that turns a queued
//! [`Track`] into a [`Timeline`], and the directory [`Catalog`].

pub mod catalog;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::queue::Track;
use crate::timing::{Timeline, TimelineOptions};

pub use catalog::{Catalog, PianistDirectory};

/// One note as the MIDI parser reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNote {
    /// Scientific pitch name, e.g. `C4` or `F#3`
    pub name: String,
    /// Seconds
    pub start: f64,
    /// Seconds
    pub duration: f64,
    /// 0.0 -> 1.0
    pub velocity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawControlChange {
    pub time: f64,
    /// 0.0 -> 1.0
    pub value: f32,
}

/// A parsed MIDI file: every note of every track flattened together, and
/// the control changes keyed by controller number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedMidi {
    pub notes: Vec<RawNote>,
    pub control_changes: BTreeMap<u8, Vec<RawControlChange>>,
}

impl ParsedMidi {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn to_timeline(&self, options: TimelineOptions) -> Timeline {
        Timeline::build(&self.notes, &self.control_changes, options)
    }
}

/// A RON list of tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Playlist {
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

/// Fetches and parses one track. Runs off the engine thread.
pub trait TrackLoader: Send + Sync {
    fn load(&self, track: &Track) -> Result<Timeline>;
}

/// Reads `track.url` as a path to a RON-encoded [`ParsedMidi`].
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    base: Option<PathBuf>,
    options: TimelineOptions,
}

impl FileLoader {
    pub fn new(options: TimelineOptions) -> Self {
        Self { base: None, options }
    }

    /// Relative urls are resolved against `base`, usually the playlist's
    /// directory.
    pub fn with_base(base: impl Into<PathBuf>, options: TimelineOptions) -> Self {
        Self {
            base: Some(base.into()),
            options,
        }
    }

    pub fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url);
        match &self.base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl TrackLoader for FileLoader {
    fn load(&self, track: &Track) -> Result<Timeline> {
        let path = self.resolve(&track.url);
        debug!(path = %path.display(), "Reading track");
        let parsed = ParsedMidi::load(&path).map_err(|e| Error::Load {
            url: track.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(parsed.to_timeline(self.options))
    }
}
