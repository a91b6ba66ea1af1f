//! Reader for per-station archive datasets

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::traits::{LoadedUnit, StationId, TraceReader, UnitHandle, UnitSource};
use crate::archive::StationArchive;
use crate::error::{SetupError, SkipReason, UnitResult};

/// Lists every waveform tag of every archive under a root directory
pub struct ArchiveReader {
    root: PathBuf,
}

impl ArchiveReader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn archive_files(&self) -> Result<Vec<PathBuf>, SetupError> {
        let scan_err = |source| SetupError::Scan {
            path: self.root.clone(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(scan_err)? {
            let path = entry.map_err(scan_err)?.path();
            if path.is_file() && path.extension().map(|e| e == "db").unwrap_or(false) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Identity implied by a `NET.STA.LOC.db` file name
fn id_from_file_name(path: &Path) -> StationId {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = stem.split('.').collect();
    match parts.as_slice() {
        [net, sta, loc] => StationId::new(net, sta, loc),
        [net, sta] => StationId::new(net, sta, ""),
        _ => StationId::new("", &stem, ""),
    }
}

impl TraceReader for ArchiveReader {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn list_units(&self) -> Result<Vec<UnitHandle>, SetupError> {
        let files = self.archive_files()?;
        if files.is_empty() {
            return Err(SetupError::NoInput(self.root.clone()));
        }

        let mut units = Vec::new();
        for path in files {
            let listing = StationArchive::open_existing(&path).and_then(|archive| {
                let station = archive.station()?;
                let tags = archive.waveform_tags()?;
                Ok((station, tags))
            });

            let (station, tags) = match listing {
                Ok((Some((location, _)), tags)) => (location.id, tags),
                Ok((None, tags)) => (id_from_file_name(&path), tags),
                Err(e) => {
                    warn!("Cannot list archive {:?}: {}", path, e);
                    (id_from_file_name(&path), Vec::new())
                }
            };

            if tags.is_empty() {
                // Loading this unit reports why it is empty
                units.push(UnitHandle {
                    station,
                    label: "<no tags>".to_string(),
                    source: UnitSource::Archive { path, tag: None },
                });
                continue;
            }

            debug!("{} lists {} waveform tags", station, tags.len());
            for tag in tags {
                units.push(UnitHandle {
                    station: station.clone(),
                    label: tag.clone(),
                    source: UnitSource::Archive {
                        path: path.clone(),
                        tag: Some(tag),
                    },
                });
            }
        }
        Ok(units)
    }

    fn load(&self, unit: &UnitHandle) -> UnitResult<LoadedUnit> {
        let (path, tag) = match &unit.source {
            UnitSource::Archive { path, tag } => (path, tag),
            other => {
                return Err(SkipReason::Unreadable(format!(
                    "archive reader cannot load {:?}",
                    other
                )))
            }
        };
        let unreadable = |e: anyhow::Error| SkipReason::Unreadable(format!("{}: {}", path.display(), e));

        let archive = StationArchive::open_existing(path).map_err(unreadable)?;
        let Some(tag) = tag else {
            return match archive.waveform_tags() {
                Ok(_) => Err(SkipReason::EmptyTagList),
                Err(e) => Err(unreadable(e)),
            };
        };

        let (location, instrument) = archive
            .station()
            .map_err(unreadable)?
            .ok_or_else(|| SkipReason::Unreadable(format!("{} has no station inventory", path.display())))?;
        let trace = archive.waveform(tag, &location.id).map_err(unreadable)?;

        Ok(LoadedUnit {
            trace,
            location,
            instrument,
        })
    }
}
