//! Evidence filename contract and lifecycle zones
//!
//! A case is a `<plate>_<ev|ice>_<yyyyMMdd_HHmmss>.jpg` image plus an
//! identically named `.json` sidecar. The camera service writes cases into
//! *pending*; the reconciler moves each one to exactly one of *confirmed*
//! (partitioned by powertrain folder and plate segments) or *misrecognized*
//! (sharded by a per-directory file cap).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, warn};

use crate::plate::Plate;
use crate::powertrain::PowertrainTag;
use crate::{Error, Result};

pub const IMAGE_EXTENSION: &str = "jpg";
pub const SIDECAR_EXTENSION: &str = "json";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y%m%d %H%M%S";

/// Parsed evidence filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceName {
    pub plate: Plate,
    pub tag: PowertrainTag,
    /// Local capture time, second precision
    pub captured_at: NaiveDateTime,
}

impl EvidenceName {
    pub fn new(plate: Plate, tag: PowertrainTag, captured_at: NaiveDateTime) -> Self {
        let captured_at = captured_at.with_nanosecond(0).unwrap_or(captured_at);
        Self {
            plate,
            tag,
            captured_at,
        }
    }

    /// Parse an image (or sidecar) file name
    pub fn parse(file_name: &str) -> Result<Self> {
        let stem = file_name
            .strip_suffix(".jpg")
            .or_else(|| file_name.strip_suffix(".json"))
            .ok_or_else(|| Error::InvalidInput(format!("not an evidence file: {file_name:?}")))?;

        let parts: Vec<&str> = stem.split('_').collect();
        let [plate, tag, date, time] = parts.as_slice() else {
            return Err(Error::InvalidInput(format!(
                "expected <plate>_<tag>_<date>_<time>, got {file_name:?}"
            )));
        };

        let plate = Plate::parse(plate)?;
        let tag: PowertrainTag = tag.parse()?;
        let captured_at =
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), TIMESTAMP_PARSE_FORMAT)
                .map_err(|e| Error::InvalidInput(format!("bad timestamp in {file_name:?}: {e}")))?;

        Ok(Self {
            plate,
            tag,
            captured_at,
        })
    }

    pub fn stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.plate,
            self.tag,
            self.captured_at.format(TIMESTAMP_FORMAT)
        )
    }

    pub fn image_file_name(&self) -> String {
        format!("{}.{}", self.stem(), IMAGE_EXTENSION)
    }

    pub fn sidecar_file_name(&self) -> String {
        format!("{}.{}", self.stem(), SIDECAR_EXTENSION)
    }
}

impl fmt::Display for EvidenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image_file_name())
    }
}

/// Resolved zone directories
#[derive(Debug, Clone)]
pub struct EvidenceLayout {
    pub pending: PathBuf,
    pub confirmed: PathBuf,
    pub misrecognized: PathBuf,
    /// Diagnostic: low-confidence classifications
    pub uncertain: PathBuf,
    /// Diagnostic: classifications that failed after retries
    pub errors: PathBuf,
    pub predictions_log: PathBuf,
}

impl EvidenceLayout {
    /// Everything below one root, using the default zone names
    pub fn under(root: &Path) -> Self {
        crate::config::Config::default().evidence_layout(root)
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            &self.pending,
            &self.confirmed,
            &self.misrecognized,
            &self.uncertain,
            &self.errors,
            &self.predictions_log,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// A case found in the pending zone
#[derive(Debug, Clone)]
pub struct PendingCase {
    pub name: EvidenceName,
    pub image_path: PathBuf,
}

impl PendingCase {
    pub fn sidecar_path(&self) -> PathBuf {
        self.image_path.with_extension(SIDECAR_EXTENSION)
    }
}

/// Filesystem zones of the evidence lifecycle
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    layout: EvidenceLayout,
    misrecognized_cap: usize,
}

impl EvidenceStore {
    pub fn new(layout: EvidenceLayout, misrecognized_cap: usize) -> Self {
        Self {
            layout,
            misrecognized_cap: misrecognized_cap.max(1),
        }
    }

    pub fn layout(&self) -> &EvidenceLayout {
        &self.layout
    }

    /// Write a new case into pending
    ///
    /// The sidecar lands first and the image is renamed into place last, so a
    /// listing never observes a partially written image.
    pub fn save_pending(&self, name: &EvidenceName, image: &[u8], sidecar: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.layout.pending)?;

        let image_path = self.layout.pending.join(name.image_file_name());
        let sidecar_path = self.layout.pending.join(name.sidecar_file_name());
        let partial = self.layout.pending.join(format!("{}.part", name.image_file_name()));

        fs::write(&sidecar_path, sidecar)?;
        fs::write(&partial, image)?;
        fs::rename(&partial, &image_path)?;

        debug!(path = %image_path.display(), "Saved pending evidence");
        Ok(image_path)
    }

    /// All well-formed pending cases, oldest first
    ///
    /// Files whose names break the contract are logged and skipped.
    pub fn list_pending(&self) -> Result<Vec<PendingCase>> {
        let entries = match fs::read_dir(&self.layout.pending) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut cases = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXTENSION) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "Skipping evidence with non UTF-8 name");
                continue;
            };
            match EvidenceName::parse(file_name) {
                Ok(name) => cases.push(PendingCase {
                    name,
                    image_path: path.clone(),
                }),
                Err(e) => warn!(file = file_name, error = %e, "Skipping malformed evidence file"),
            }
        }

        cases.sort_by(|a, b| {
            a.name
                .captured_at
                .cmp(&b.name.captured_at)
                .then_with(|| a.image_path.cmp(&b.image_path))
        });
        Ok(cases)
    }

    /// Pending cases captured within the given minute
    pub fn count_pending_in_minute(&self, minute: NaiveDateTime) -> Result<usize> {
        let start = minute.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(minute);
        let end = start + chrono::Duration::minutes(1);
        Ok(self
            .list_pending()?
            .iter()
            .filter(|c| c.name.captured_at >= start && c.name.captured_at < end)
            .count())
    }

    /// Destination directory of a confirmed case
    ///
    /// `<confirmed>/<EV|ICE>/<prefix>/<class>/<serial>/`, following the
    /// filename tag.
    pub fn confirmed_dir(&self, name: &EvidenceName) -> PathBuf {
        let segments = name.plate.segments();
        self.layout
            .confirmed
            .join(name.tag.folder())
            .join(segments.prefix)
            .join(segments.class)
            .join(segments.serial)
    }

    /// Move a case (image and sidecar) to confirmed storage
    pub fn move_to_confirmed(&self, case: &PendingCase) -> Result<PathBuf> {
        let dir = self.confirmed_dir(&case.name);
        self.move_case(case, &dir)
    }

    /// Move a case to the first misrecognized shard with room
    pub fn move_to_misrecognized(&self, case: &PendingCase) -> Result<PathBuf> {
        let dir = self.misrecognized_shard()?;
        self.move_case(case, &dir)
    }

    /// First misrecognized directory holding fewer than the cap
    ///
    /// The primary directory comes first, then `<name>2`, `<name>3`, …
    /// next to it. The chosen directory is created if needed.
    pub fn misrecognized_shard(&self) -> Result<PathBuf> {
        let primary = &self.layout.misrecognized;
        let base_name = primary
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("bad misrecognized dir {}", primary.display())))?
            .to_string();
        let parent = primary.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut index = 1usize;
        loop {
            let dir = if index == 1 {
                primary.clone()
            } else {
                parent.join(format!("{base_name}{index}"))
            };
            if count_images(&dir)? < self.misrecognized_cap {
                fs::create_dir_all(&dir)?;
                return Ok(dir);
            }
            index += 1;
        }
    }

    fn move_case(&self, case: &PendingCase, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let image_dest = dir.join(case.name.image_file_name());
        move_file(&case.image_path, &image_dest)?;

        let sidecar = case.sidecar_path();
        if sidecar.exists() {
            move_file(&sidecar, &dir.join(case.name.sidecar_file_name()))?;
        }

        debug!(from = %case.image_path.display(), to = %image_dest.display(), "Moved evidence");
        Ok(image_dest)
    }
}

/// Cases (images) in a directory; a missing directory holds none
fn count_images(dir: &Path) -> Result<usize> {
    match fs::read_dir(dir) {
        Ok(entries) => {
            let mut count = 0;
            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(IMAGE_EXTENSION) {
                    count += 1;
                }
            }
            Ok(count)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)?;
    Ok(())
}
