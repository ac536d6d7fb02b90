//! Filesystem mutation: collision-safe naming and atomic moves.

use crate::error::PlacementError;
use crate::fingerprint::Fingerprinter;
use crate::models::{FileRecord, Fingerprint};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const MAX_SUFFIX: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Move the file here.
    Place { destination: PathBuf },
    /// Identical content already sits at the destination.
    AlreadyPlaced { existing: PathBuf },
}

pub struct Placer {
    output_root: PathBuf,
    dry_run: bool,
    fingerprinter: Fingerprinter,
    /// Destinations handed out during this run, so dry runs collide the same
    /// way real runs would.
    claimed: HashMap<PathBuf, Fingerprint>,
}

impl Placer {
    pub fn new(output_root: PathBuf, dry_run: bool, fingerprinter: Fingerprinter) -> Self {
        Self {
            output_root,
            dry_run,
            fingerprinter,
            claimed: HashMap::new(),
        }
    }

    pub fn claim_existing(&mut self, destination: PathBuf, fingerprint: Fingerprint) {
        self.claimed.insert(destination, fingerprint);
    }

    pub fn release(&mut self, destination: &Path) {
        self.claimed.remove(destination);
    }

    /// Picks the destination for `record` under the output root. Occupied
    /// names get `_1`, `_2`, ... before the extension until one is free.
    pub fn plan(&mut self, record: &FileRecord, relative: &Path) -> Result<Plan, PlacementError> {
        if relative.as_os_str().is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(PlacementError::OutsideOutput(relative.to_path_buf()));
        }
        let wanted = self.output_root.join(relative);
        let fingerprint = &record.content_fingerprint;

        for n in 0..=MAX_SUFFIX {
            let candidate = if n == 0 {
                wanted.clone()
            } else {
                with_suffix(&wanted, n)
            };
            if candidate == record.absolute_path {
                self.claimed.insert(candidate.clone(), fingerprint.clone());
                return Ok(Plan::Place {
                    destination: candidate,
                });
            }
            match self.claimed.get(&candidate) {
                Some(owner) if owner == fingerprint => {
                    return Ok(Plan::AlreadyPlaced { existing: candidate })
                }
                Some(_) => continue,
                None => {}
            }
            match fs::symlink_metadata(&candidate) {
                Ok(meta) => {
                    if meta.is_file() && self.same_content(&candidate, fingerprint) {
                        self.claimed.insert(candidate.clone(), fingerprint.clone());
                        return Ok(Plan::AlreadyPlaced { existing: candidate });
                    }
                    debug!(path = %candidate.display(), "destination occupied");
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    self.claimed.insert(candidate.clone(), fingerprint.clone());
                    return Ok(Plan::Place {
                        destination: candidate,
                    });
                }
                Err(source) => {
                    return Err(PlacementError::Io {
                        op: "stat",
                        path: candidate,
                        source,
                    })
                }
            }
        }
        Err(PlacementError::NoFreeName(wanted, MAX_SUFFIX))
    }

    fn same_content(&self, path: &Path, fingerprint: &Fingerprint) -> bool {
        match self.fingerprinter.fingerprint(path) {
            Ok(existing) => &existing == fingerprint,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot fingerprint existing destination");
                false
            }
        }
    }

    /// Moves the source into place. Dry runs do nothing. I/O failures are
    /// retried once; a retry that finds the destination already holding this
    /// content finishes the earlier partial move.
    pub fn commit(&self, record: &FileRecord, destination: &Path) -> Result<(), PlacementError> {
        if self.dry_run || record.absolute_path == destination {
            return Ok(());
        }
        self.commit_with(record, destination, move_file)
    }

    fn commit_with<F>(
        &self,
        record: &FileRecord,
        destination: &Path,
        mut mover: F,
    ) -> Result<(), PlacementError>
    where
        F: FnMut(&Path, &Path) -> Result<(), PlacementError>,
    {
        let from = &record.absolute_path;
        match mover(from, destination) {
            Err(PlacementError::Io { op, path, source }) => {
                warn!(op, path = %path.display(), error = %source, "move failed, retrying once");
                match mover(from, destination) {
                    Err(PlacementError::DestinationTaken(_))
                        if self.same_content(destination, &record.content_fingerprint) =>
                    {
                        debug!(path = %destination.display(), "destination already written by the failed attempt");
                        remove_source(from)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

fn with_suffix(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

/// Never replaces an existing destination. Same-volume moves link then
/// unlink; anything else goes through [`copy_across`].
fn move_file(from: &Path, to: &Path) -> Result<(), PlacementError> {
    if !from.exists() {
        return Err(PlacementError::SourceMissing(from.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| PlacementError::Io {
            op: "create_dir",
            path: parent.to_path_buf(),
            source,
        })?;
    }
    match fs::hard_link(from, to) {
        Ok(()) => remove_source(from),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(PlacementError::DestinationTaken(to.to_path_buf()))
        }
        Err(err) => {
            debug!(from = %from.display(), to = %to.display(), error = %err, "cannot link, copying");
            copy_across(from, to)
        }
    }
}

fn remove_source(from: &Path) -> Result<(), PlacementError> {
    match fs::remove_file(from) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PlacementError::Io {
            op: "remove_source",
            path: from.to_path_buf(),
            source,
        }),
    }
}

/// Copies into a temp file beside the destination, syncs it, then renames it
/// into place without clobbering. The source is removed last.
fn copy_across(from: &Path, to: &Path) -> Result<(), PlacementError> {
    let io_err = |op: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source| PlacementError::Io { op, path, source }
    };
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".shelver-")
        .tempfile_in(dir)
        .map_err(io_err("create_temp", dir))?;
    let mut src = fs::File::open(from).map_err(io_err("open", from))?;
    io::copy(&mut src, temp.as_file_mut()).map_err(io_err("copy", from))?;
    temp.as_file().sync_all().map_err(io_err("sync", to))?;
    temp.persist_noclobber(to).map_err(|e| {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            PlacementError::DestinationTaken(to.to_path_buf())
        } else {
            PlacementError::Io {
                op: "persist",
                path: to.to_path_buf(),
                source: e.error,
            }
        }
    })?;
    remove_source(from)
}
