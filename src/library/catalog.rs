//! Playlists built from a directory of parsed tracks.
//!
//! Track files (`*.mid.ron`) are found recursively and named after what
//! they hold: `Composer - Performer - Work`, `Composer - Work`,
//! `Work by Composer`, `Work (Composer)` or `Composer_Work`. Whatever the
//! name doesn't say falls back to a placeholder. Every composer and every
//! performer gets a playlist of their tracks in scan order.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use super::Playlist;
use crate::queue::Track;

/// Parsed tracks are stored next to where the `.mid` would be.
pub const TRACK_SUFFIX: &str = ".mid.ron";
/// Optional slug -> display name map at the library root.
pub const PIANISTS_FILE: &str = "pianists.ron";
/// Extension of plain-text pianist listings at the library root.
pub const LISTING_EXTENSION: &str = "txt";

pub const UNKNOWN_COMPOSER: &str = "Unknown Composer";
pub const UNKNOWN_PERFORMER: &str = "Unknown Performer";

// Most specific first.
const FILENAME_PATTERNS: [&str; 7] = [
    r"^(?P<composer>.+?)\s+-\s+(?P<performer>.+?)\s+-\s+(?P<work>.+?)$",
    r"^(?P<composer>.+?)\s+-\s+(?P<work>.+?)$",
    r"^(?P<work>.+?)\s+by\s+(?P<composer>.+?)$",
    r"^(?P<work>.+?)\s+\((?P<composer>.+?)\)$",
    r"^(?P<composer>[^_]+)_(?P<work>.+)$",
    r"^(?P<work>.+?)\s+\((?P<composer>.+?)\)\s+(?P<performer>.+)\s+[^\s]+$",
    r"^(?P<work>.+)$",
];

const LISTING_PATTERN: &str = r"^(.+?)\s+\((\d{4}-\d{4})\)\s*$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub work: String,
    pub composer: String,
    pub performer: String,
}

/// Reads [`TrackMetadata`] out of file names.
#[derive(Debug, Clone)]
pub struct FilenameParser {
    patterns: Vec<Regex>,
}

impl FilenameParser {
    pub fn new() -> Result<Self> {
        let patterns = FILENAME_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// Tries each pattern in turn, keeping the first value found for each
    /// field, until both the work and the composer are known.
    pub fn parse(&self, stem: &str) -> TrackMetadata {
        let mut work = None;
        let mut composer = None;
        let mut performer = None;

        for pattern in &self.patterns {
            let Some(captures) = pattern.captures(stem) else {
                continue;
            };
            let field = |name: &str| captures.name(name).map(|m| m.as_str().trim().to_string());
            work = work.or_else(|| field("work"));
            composer = composer.or_else(|| field("composer"));
            performer = performer.or_else(|| field("performer"));
            if work.is_some() && composer.is_some() {
                break;
            }
        }

        TrackMetadata {
            work: work.unwrap_or_else(|| stem.to_string()),
            composer: composer.unwrap_or_else(|| UNKNOWN_COMPOSER.to_string()),
            performer: performer.unwrap_or_else(|| UNKNOWN_PERFORMER.to_string()),
        }
    }
}

/// Lower-case ASCII key for a name. Non-ASCII characters and punctuation
/// are dropped; runs of spaces and hyphens become one hyphen.
pub fn slugify(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-') || c.is_ascii_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_gap = false;
    for c in kept.trim().chars() {
        if c == '-' || c.is_ascii_whitespace() {
            if !in_gap {
                slug.push('-');
            }
            in_gap = true;
        } else {
            slug.push(c.to_ascii_lowercase());
            in_gap = false;
        }
    }
    slug
}

/// Full performer names keyed by the slug of their short name, so a file
/// credited to `Rubinstein` can be shown as `Arthur Rubinstein (1887-1982)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PianistDirectory {
    names: BTreeMap<String, String>,
}

impl PianistDirectory {
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

    /// Reads every `Full Name (YYYY-YYYY)` line of a listing. The short
    /// name is the surname, keeping a `von` prefix.
    pub fn from_listing(text: &str) -> Result<Self> {
        let line_pattern = Regex::new(LISTING_PATTERN)?;
        let mut directory = Self::default();

        for line in text.lines() {
            let Some(captures) = line_pattern.captures(line.trim()) else {
                continue;
            };
            let full_name = captures[1].trim();
            let display = format!("{full_name} ({})", captures[2].trim());

            let parts: Vec<&str> = full_name.split_whitespace().collect();
            let Some(&last) = parts.last() else {
                continue;
            };
            let short = match parts.len().checked_sub(2).map(|i| parts[i].to_lowercase()) {
                Some(prefix) if prefix == "d'albert" => "d'Albert".to_string(),
                Some(prefix) if prefix == "von" => format!("von {last}"),
                _ => last.to_string(),
            };

            directory
                .names
                .entry(slugify(&short))
                .or_insert_with(|| display.clone());
            if full_name.to_lowercase().contains("d'albert") {
                directory.names.insert("dalbert".to_string(), display);
            }
        }
        Ok(directory)
    }

    /// Entries from `other` win.
    pub fn merge(&mut self, other: PianistDirectory) {
        self.names.extend(other.names);
    }

    pub fn display_name(&self, slug: &str) -> Option<&str> {
        self.names.get(slug).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// `file-id-000000`, numbered in scan order
    pub id: String,
    /// Relative to the library root
    pub path: PathBuf,
    pub metadata: TrackMetadata,
    pub composer: String,
    pub performer: String,
}

impl CatalogEntry {
    /// Queue entry for this file; its url resolves against the library root.
    pub fn track(&self) -> Track {
        Track::new(
            self.metadata.work.clone(),
            self.path.to_string_lossy().into_owned(),
        )
    }
}

/// A composer or performer and the entries credited to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Artist {
    pub name: String,
    pub slug: String,
    /// Indexes into [`Catalog::entries`]
    pub works: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: PathBuf,
    entries: Vec<CatalogEntry>,
    composers: BTreeMap<String, Artist>,
    performers: BTreeMap<String, Artist>,
}

impl Catalog {
    /// Scans `root` for track files and reads any pianist names found at
    /// its top level. Listings take precedence over `pianists.ron`.
    pub fn scan(root: &Path) -> Result<Self> {
        let files = find_track_files(root)?;
        let pianists = load_pianists(root)?;
        let parser = FilenameParser::new()?;
        Ok(Self::build(root, &files, &parser, &pianists))
    }

    /// Builds the catalog from paths relative to `root`, in the order given.
    pub fn build(
        root: &Path,
        files: &[PathBuf],
        parser: &FilenameParser,
        pianists: &PianistDirectory,
    ) -> Self {
        let mut catalog = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        for (index, path) in files.iter().enumerate() {
            let metadata = parser.parse(&track_stem(path));
            debug!(path = %path.display(), ?metadata, "Catalogued track");

            let composer = slugify(&metadata.composer);
            catalog
                .composers
                .entry(composer.clone())
                .or_insert_with(|| Artist {
                    name: metadata.composer.clone(),
                    slug: composer.clone(),
                    works: Vec::new(),
                })
                .works
                .push(index);

            let performer = slugify(&metadata.performer);
            let performer_name = pianists
                .display_name(&performer)
                .unwrap_or(metadata.performer.as_str())
                .to_string();
            catalog
                .performers
                .entry(performer.clone())
                .or_insert_with(|| Artist {
                    name: performer_name,
                    slug: performer.clone(),
                    works: Vec::new(),
                })
                .works
                .push(index);

            catalog.entries.push(CatalogEntry {
                id: format!("file-id-{index:06}"),
                path: path.clone(),
                metadata,
                composer,
                performer,
            });
        }

        info!(
            tracks = catalog.entries.len(),
            composers = catalog.composers.len(),
            performers = catalog.performers.len(),
            "Catalog built"
        );
        catalog
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn composers(&self) -> impl Iterator<Item = &Artist> {
        self.composers.values()
    }

    pub fn performers(&self) -> impl Iterator<Item = &Artist> {
        self.performers.values()
    }

    /// Every track, in scan order.
    pub fn all(&self) -> Playlist {
        Playlist {
            tracks: self.entries.iter().map(CatalogEntry::track).collect(),
        }
    }

    /// Looks the composer up by name or slug.
    pub fn composer_playlist(&self, name: &str) -> Option<Playlist> {
        self.composers
            .get(&slugify(name))
            .map(|artist| self.playlist_for(artist))
    }

    pub fn performer_playlist(&self, name: &str) -> Option<Playlist> {
        self.performers
            .get(&slugify(name))
            .map(|artist| self.playlist_for(artist))
    }

    /// Every per-artist playlist, keyed `composer-<slug>` or
    /// `performer-<slug>`.
    pub fn playlists(&self) -> BTreeMap<String, Playlist> {
        let composers = self
            .composers
            .values()
            .map(|a| (format!("composer-{}", a.slug), self.playlist_for(a)));
        let performers = self
            .performers
            .values()
            .map(|a| (format!("performer-{}", a.slug), self.playlist_for(a)));
        composers.chain(performers).collect()
    }

    fn playlist_for(&self, artist: &Artist) -> Playlist {
        Playlist {
            tracks: artist
                .works
                .iter()
                .filter_map(|&i| self.entries.get(i))
                .map(CatalogEntry::track)
                .collect(),
        }
    }
}

/// Track files under `root`, relative to it and sorted.
pub fn find_track_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !fs::metadata(root)?.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        )));
    }
    info!(root = %root.display(), "Scanning for tracks");

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let is_track = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(TRACK_SUFFIX));
        if !is_track {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();

    info!(count = files.len(), "Found track files");
    Ok(files)
}

/// `pianists.ron` first, then every top-level listing over it.
fn load_pianists(root: &Path) -> Result<PianistDirectory> {
    let mut directory = PianistDirectory::default();
    let mapped = root.join(PIANISTS_FILE);
    if mapped.is_file() {
        directory = PianistDirectory::load(&mapped)?;
    }

    let mut listings: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file() && path.extension().is_some_and(|ext| ext == LISTING_EXTENSION)
        })
        .collect();
    listings.sort();

    for listing in listings {
        let text = fs::read_to_string(&listing)?;
        let found = PianistDirectory::from_listing(&text)?;
        debug!(listing = %listing.display(), pianists = found.len(), "Read pianist listing");
        directory.merge(found);
    }
    Ok(directory)
}

fn track_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(TRACK_SUFFIX) {
        Some(stem) => stem.to_string(),
        None => name,
    }
}
